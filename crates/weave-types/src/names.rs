//! Object name sanitizing and project id validation.
//!
//! Object ids on the server are restricted to `[A-Za-z0-9._-]` and at most
//! [`MAX_OBJECT_NAME_LEN`] characters. Any other character is replaced by
//! `-`, runs of `-` collapse to one, and leading or trailing `-` are trimmed.

use crate::error::{TypeError, TypeResult};

/// Longest object id the server accepts.
pub const MAX_OBJECT_NAME_LEN: usize = 128;

fn is_allowed(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '.' || ch == '_' || ch == '-'
}

/// Turn an arbitrary display name into a valid object id.
///
/// # Examples
///
/// ```
/// use weave_types::names::sanitize_object_name;
///
/// assert_eq!(sanitize_object_name("my dataset").unwrap(), "my-dataset");
/// assert_eq!(sanitize_object_name("a//b").unwrap(), "a-b");
/// assert!(sanitize_object_name("///").is_err());
/// ```
pub fn sanitize_object_name(name: &str) -> TypeResult<String> {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        let ch = if is_allowed(ch) { ch } else { '-' };
        if ch == '-' && out.ends_with('-') {
            continue;
        }
        out.push(ch);
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        return Err(TypeError::InvalidName {
            name: name.to_string(),
            reason: "no valid characters".into(),
        });
    }
    Ok(trimmed.chars().take(MAX_OBJECT_NAME_LEN).collect())
}

/// Validate an `"<entity>/<project>"` project id and split it.
pub fn split_project_id(project_id: &str) -> TypeResult<(&str, &str)> {
    let invalid = |reason: &str| TypeError::InvalidComponent {
        component: "project_id",
        reason: format!("{project_id:?}: {reason}"),
    };
    let (entity, project) = project_id
        .split_once('/')
        .ok_or_else(|| invalid("expected <entity>/<project>"))?;
    if entity.is_empty() || project.is_empty() {
        return Err(invalid("entity and project must be non-empty"));
    }
    if project.contains('/') {
        return Err(invalid("project must not contain '/'"));
    }
    Ok((entity, project))
}
