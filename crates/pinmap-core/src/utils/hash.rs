//! Subresource integrity hashing.

use base64::{engine::general_purpose, Engine as _};
use sha2::{Digest, Sha384};

/// `sha384-<base64>` integrity string for module source
pub fn sri_sha384(data: &[u8]) -> String {
    let digest = Sha384::digest(data);
    format!("sha384-{}", general_purpose::STANDARD.encode(digest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sri_sha384() {
        // echo -n "alert('Hello, world.');" | openssl dgst -sha384 -binary | openssl base64 -A
        assert_eq!(
            sri_sha384(b"alert('Hello, world.');"),
            "sha384-H8BRh8j48O9oYatfu5AZzq6A9RINhZO5H16dQZngK7T62em8MUt1FLm52t+eX6xO"
        );
    }

    #[test]
    fn test_sri_prefix_and_length() {
        let sri = sri_sha384(b"");
        assert!(sri.starts_with("sha384-"));
        // 48 digest bytes encode to 64 base64 chars
        assert_eq!(sri.len(), "sha384-".len() + 64);
    }
}
