//! Content digests for objects, tables, rows and files.
//!
//! Digests are hex-encoded, domain-separated BLAKE3 hashes. The domain tag
//! keeps an object and a file with identical bytes from sharing a digest.

use crate::error::{TypeError, TypeResult};

/// Placeholder digest that resolves to the newest live version.
pub const LATEST_DIGEST: &str = "latest";

/// Length of a hex-encoded content digest.
pub const CONTENT_DIGEST_LEN: usize = 64;

/// Domain-separated BLAKE3 content hasher.
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for object versions.
    pub const OBJECT: Self = Self {
        domain: "weave-object-v1",
    };
    /// Hasher for whole tables (the ordered list of row digests).
    pub const TABLE: Self = Self {
        domain: "weave-table-v1",
    };
    /// Hasher for individual table rows.
    pub const ROW: Self = Self {
        domain: "weave-row-v1",
    };
    /// Hasher for uploaded file blobs.
    pub const FILE: Self = Self {
        domain: "weave-file-v1",
    };
    /// Hasher for custom-object envelopes in the load cache.
    pub const ENVELOPE: Self = Self {
        domain: "weave-envelope-v1",
    };

    /// Create a hasher with a custom domain tag.
    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Hash raw bytes with domain separation, returning a hex digest.
    pub fn hash(&self, data: &[u8]) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher.update(data);
        hex::encode(hasher.finalize().as_bytes())
    }

    /// Hash a serializable value as JSON with domain separation.
    ///
    /// `serde_json` writes object keys in map order; callers hashing
    /// `serde_json::Value` get sorted keys because the workspace does not
    /// enable `preserve_order`, so equal content hashes equally.
    pub fn hash_json<T: serde::Serialize>(&self, value: &T) -> TypeResult<String> {
        let data =
            serde_json::to_vec(value).map_err(|e| TypeError::Serialization(e.to_string()))?;
        Ok(self.hash(&data))
    }

    /// The domain tag used by this hasher.
    pub fn domain(&self) -> &str {
        self.domain
    }
}

/// How a digest string in a ref should be interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DigestKind {
    /// `latest`: the newest live version.
    Latest,
    /// `v<N>`: the version with ordinal `N`.
    Version(u64),
    /// A resolved content digest.
    Content,
}

impl DigestKind {
    /// Classify a digest string.
    pub fn of(digest: &str) -> Self {
        if digest == LATEST_DIGEST {
            return Self::Latest;
        }
        if let Some(n) = digest
            .strip_prefix('v')
            .filter(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|rest| rest.parse().ok())
        {
            return Self::Version(n);
        }
        Self::Content
    }

    /// Returns `true` for placeholders that must be resolved on first fetch.
    pub fn is_placeholder(&self) -> bool {
        !matches!(self, Self::Content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let a = ContentHasher::OBJECT.hash(b"hello");
        let b = ContentHasher::OBJECT.hash(b"hello");
        assert_eq!(a, b);
        assert_eq!(a.len(), CONTENT_DIGEST_LEN);
    }

    #[test]
    fn domains_separate_digests() {
        let obj = ContentHasher::OBJECT.hash(b"same");
        let file = ContentHasher::FILE.hash(b"same");
        let row = ContentHasher::ROW.hash(b"same");
        assert_ne!(obj, file);
        assert_ne!(obj, row);
    }

    #[test]
    fn json_hash_ignores_construction_order() {
        let a = serde_json::json!({"b": 1, "a": 2});
        let mut map = serde_json::Map::new();
        map.insert("a".into(), 2.into());
        map.insert("b".into(), 1.into());
        let b = serde_json::Value::Object(map);
        assert_eq!(
            ContentHasher::OBJECT.hash_json(&a).unwrap(),
            ContentHasher::OBJECT.hash_json(&b).unwrap()
        );
    }

    #[test]
    fn digest_kinds() {
        assert_eq!(DigestKind::of("latest"), DigestKind::Latest);
        assert_eq!(DigestKind::of("v3"), DigestKind::Version(3));
        assert_eq!(DigestKind::of("v"), DigestKind::Content);
        assert_eq!(DigestKind::of("vx1"), DigestKind::Content);
        assert_eq!(DigestKind::of(&"ab".repeat(32)), DigestKind::Content);
        assert!(DigestKind::Latest.is_placeholder());
        assert!(!DigestKind::Content.is_placeholder());
    }
}
