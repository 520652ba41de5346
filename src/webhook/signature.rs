use hmac::{Hmac, Mac};
use sha2::Sha512;

type HmacSha512 = Hmac<Sha512>;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum SignatureError {
    #[error("Signature is not valid hex")]
    InvalidFormat,
    #[error("Webhook secret can't key the MAC")]
    InvalidSecret,
    #[error("Signature verification failed")]
    Mismatch,
}

/// Checks `signature_header` against the HMAC-SHA512 of the raw body, in constant time.
pub fn verify_signature(
    secret: &[u8],
    body: &[u8],
    signature_header: &str,
) -> Result<(), SignatureError> {
    let expected = hex::decode(signature_header.trim()).map_err(|_| SignatureError::InvalidFormat)?;

    let mut mac = HmacSha512::new_from_slice(secret).map_err(|_| SignatureError::InvalidSecret)?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| SignatureError::Mismatch)
}

/// Lower-case hex HMAC-SHA512 of `body`, as the provider sends it.
pub fn sign(secret: &[u8], body: &[u8]) -> Result<String, SignatureError> {
    let mut mac = HmacSha512::new_from_slice(secret).map_err(|_| SignatureError::InvalidSecret)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"sk_test_secret";

    #[test]
    fn test_signature_of_body_verifies() {
        let body = br#"{"event":"charge.success"}"#;
        let signature = sign(SECRET, body).unwrap();

        assert_eq!(signature.len(), 128);
        assert_eq!(verify_signature(SECRET, body, &signature), Ok(()));
        assert_eq!(
            verify_signature(SECRET, body, &signature.to_uppercase()),
            Ok(())
        );
    }

    #[test]
    fn test_tampered_body_or_wrong_secret_fails() {
        let body = br#"{"event":"charge.success"}"#;
        let signature = sign(SECRET, body).unwrap();

        assert_eq!(
            verify_signature(SECRET, br#"{"event":"charge.failed"}"#, &signature),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            verify_signature(b"other", body, &signature),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_non_hex_signature_is_rejected() {
        assert_eq!(
            verify_signature(SECRET, b"{}", "not-hex"),
            Err(SignatureError::InvalidFormat)
        );
        assert_eq!(
            verify_signature(SECRET, b"{}", ""),
            Err(SignatureError::Mismatch)
        );
    }
}
