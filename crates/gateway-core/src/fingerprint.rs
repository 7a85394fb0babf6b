//! Cache-key derivation for idempotent chat requests.

use sha2::{Digest, Sha256};

use crate::schemas::ChatRequest;

/// Lowercase hex SHA-256 over the request's canonical JSON form. `stream` is
/// forced false before hashing so a streamed and non-streamed request that
/// are otherwise identical share a fingerprint. `serde_json::Map` is
/// `BTreeMap`-backed (the `preserve_order` feature is off workspace-wide),
/// so `to_string` on a `Value` already yields sort-key, no-whitespace JSON —
/// no manual canonicalization is needed.
pub fn fingerprint(request: &ChatRequest) -> String {
    let canonical = request.canonical_json();
    let serialized = serde_json::to_string(&canonical).expect("canonical value always serializes");

    let mut hasher = Sha256::new();
    hasher.update(serialized.as_bytes());
    hex::encode(hasher.finalize())
}

/// Cache key for a fingerprint, namespaced per tenant so no tenant can read
/// another tenant's cached completion.
pub fn cache_key(tenant_id: &str, fp: &str) -> String {
    format!("cache:chat:v1:{tenant_id}:{fp}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::{ChatMessage, Role};

    fn request(stream: bool, temperature: Option<f64>) -> ChatRequest {
        ChatRequest {
            model: "mock-1".to_string(),
            messages: vec![ChatMessage {
                role: Role::User,
                content: "hi".to_string(),
            }],
            temperature,
            max_tokens: None,
            stream,
        }
    }

    #[test]
    fn ignores_stream_flag() {
        let a = fingerprint(&request(false, Some(0.0)));
        let b = fingerprint(&request(true, Some(0.0)));
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_content_yields_distinct_fingerprints() {
        let mut r1 = request(false, None);
        let mut r2 = request(false, None);
        r2.messages[0].content = "different".to_string();
        r1.messages[0].content = "hi".to_string();
        assert_ne!(fingerprint(&r1), fingerprint(&r2));
    }

    #[test]
    fn fingerprint_is_hex_sha256_length() {
        let fp = fingerprint(&request(false, None));
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn cache_key_is_namespaced_per_tenant() {
        let key = cache_key("tenant-a", "deadbeef");
        assert_eq!(key, "cache:chat:v1:tenant-a:deadbeef");
    }
}
