//! Identifier generation.
//!
//! All identifiers in this system share one shape: `"<prefix>_" + 32 lowercase
//! hex characters`, e.g. `job_3f9a...`, `att_0c12...`, `req_aa00...`. A V4 UUID's
//! simple (no-hyphen) representation is exactly 32 hex characters, so that's
//! the generator for all three prefixes.

use uuid::Uuid;

fn new_hex32() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Mint a new `job_<32 hex>` identifier.
pub fn new_job_id() -> String {
    format!("job_{}", new_hex32())
}

/// Mint a new `att_<32 hex>` identifier.
pub fn new_attempt_id() -> String {
    format!("att_{}", new_hex32())
}

/// Mint a new `req_<32 hex>` identifier.
pub fn new_request_id() -> String {
    format!("req_{}", new_hex32())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_have_expected_shape() {
        for id in [new_job_id(), new_attempt_id(), new_request_id()] {
            let (prefix, hex) = id.split_once('_').expect("id has a prefix");
            assert!(matches!(prefix, "job" | "att" | "req"));
            assert_eq!(hex.len(), 32);
            assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(new_job_id(), new_job_id());
    }
}
