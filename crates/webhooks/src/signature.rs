//! Delivery signature verification.

use {
    hmac::{Hmac, Mac},
    secrecy::{ExposeSecret, SecretString},
    sha2::Sha256,
    subtle::ConstantTimeEq,
};

type HmacSha256 = Hmac<Sha256>;

/// Verify an HMAC-SHA256 delivery signature in constant time.
///
/// Accepts the bare hex digest or the `sha256=<hex>` form providers send.
#[must_use]
pub fn verify_signature(secret: &SecretString, body: &[u8], provided: &str) -> bool {
    let provided = provided.strip_prefix("sha256=").unwrap_or(provided);
    let Ok(provided_bytes) = hex::decode(provided) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.expose_secret().as_bytes()) else {
        return false;
    };
    mac.update(body);
    let expected = mac.finalize().into_bytes();

    expected.ct_eq(provided_bytes.as_slice()).into()
}

/// Compute the signature a sender would attach (test fixtures, doc examples).
#[must_use]
pub fn sign(secret: &SecretString, body: &[u8]) -> String {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.expose_secret().as_bytes()) else {
        return String::new();
    };
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_signature_verifies() {
        let secret = SecretString::new("whsec_test".into());
        let body = br#"{"action": "opened"}"#;
        let signature = sign(&secret, body);
        assert!(verify_signature(&secret, body, &signature));
        // Bare hex (no prefix) is accepted too.
        assert!(verify_signature(
            &secret,
            body,
            signature.strip_prefix("sha256=").unwrap()
        ));
    }

    #[test]
    fn wrong_secret_or_body_fails() {
        let secret = SecretString::new("whsec_test".into());
        let body = b"payload";
        let signature = sign(&secret, body);

        assert!(!verify_signature(
            &SecretString::new("other".into()),
            body,
            &signature
        ));
        assert!(!verify_signature(&secret, b"tampered", &signature));
    }

    #[test]
    fn malformed_signature_fails_cleanly() {
        let secret = SecretString::new("whsec_test".into());
        assert!(!verify_signature(&secret, b"x", "not-hex!"));
        assert!(!verify_signature(&secret, b"x", ""));
    }
}
