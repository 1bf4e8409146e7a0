//! HMAC-SHA256 request and event signatures.
//!
//! Both directions of the integration contract sign the exact raw bytes of
//! the payload: the external application signs request bodies it sends us,
//! and the delivery engine signs the stored webhook payload. Verification
//! always recomputes the MAC over the bytes as received and compares in
//! constant time.

use hmac::{Hmac, Mac as _};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute the hex-encoded HMAC-SHA256 signature of `payload`.
pub fn sign(secret: &str, payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a hex-encoded signature over `payload`. Constant-time comparison.
pub fn verify(secret: &str, payload: &[u8], signature: &str) -> bool {
    let Ok(signature) = hex::decode(signature) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(payload);
    mac.verify_slice(&signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let sig = sign("secret", b"hello world");
        assert!(verify("secret", b"hello world", &sig));
    }

    #[test]
    fn altered_payload_fails() {
        let sig = sign("secret", b"hello world");
        assert!(!verify("secret", b"hello world!", &sig));
        assert!(!verify("secret", b"Hello world", &sig));
    }

    #[test]
    fn altered_signature_fails() {
        let mut sig = sign("secret", b"hello world").into_bytes();
        // Flip one hex digit.
        sig[0] = if sig[0] == b'0' { b'1' } else { b'0' };
        let sig = String::from_utf8(sig).unwrap();
        assert!(!verify("secret", b"hello world", &sig));
    }

    #[test]
    fn wrong_secret_fails() {
        let sig = sign("secret", b"hello world");
        assert!(!verify("other", b"hello world", &sig));
    }

    #[test]
    fn malformed_hex_fails() {
        assert!(!verify("secret", b"hello world", "not hex at all"));
        assert!(!verify("secret", b"hello world", ""));
    }
}
