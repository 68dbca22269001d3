//! Best-effort text for values no serializer handles.

use std::panic::{self, AssertUnwindSafe};

use weave_types::CustomValue;

/// Longest fallback text kept before truncation.
pub const FALLBACK_MAX_CHARS: usize = 1000;

const ELLIPSIS: &str = "...";

/// Encode `value` as text. Never fails and never panics.
///
/// Tries the value's `Debug` output, then its `Display` output, then falls
/// back to a `<type: address>` placeholder. A formatter that panics counts as
/// absent.
pub fn fallback_encode(value: &CustomValue) -> String {
    let text = guarded(|| value.repr())
        .or_else(|| guarded(|| value.display()))
        .unwrap_or_else(|| format!("<{}: {:#x}>", value.type_name(), value.address()));
    truncate(text)
}

fn guarded(format: impl FnOnce() -> Option<String>) -> Option<String> {
    panic::catch_unwind(AssertUnwindSafe(format)).ok().flatten()
}

fn truncate(text: String) -> String {
    match text.char_indices().nth(FALLBACK_MAX_CHARS) {
        Some((cut, _)) => {
            let mut out = text[..cut].to_string();
            out.push_str(ELLIPSIS);
            out
        }
        None => text,
    }
}
