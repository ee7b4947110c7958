//! Delivery signatures for inbound platform webhooks.
//!
//! The platform signs every delivery with an HMAC over the exact raw request
//! body, keyed by the app secret. Two header variants exist:
//!
//! ```text
//! X-Signature-256: sha256={hex_digest}
//! X-Signature:     sha1={hex_digest}      (legacy)
//! ```
//!
//! Receivers prefer the SHA-256 header and only fall back to the legacy
//! SHA-1 header when the former is absent. Digests are compared in constant
//! time by `ring::hmac::verify`.

/// Header carrying the preferred HMAC-SHA256 signature.
pub const SIGNATURE_256_HEADER: &str = "X-Signature-256";

/// Header carrying the legacy HMAC-SHA1 signature.
pub const LEGACY_SIGNATURE_HEADER: &str = "X-Signature";

/// Header name for admin API authentication (plaintext secret).
pub const ADMIN_AUTH_HEADER: &str = "Loopin-Admin-Authorization";

/// Errors produced by signature operations.
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("no signing secret configured")]
    MissingSecret,
    #[error("invalid signature header format")]
    InvalidFormat,
    #[error("invalid hex digest")]
    InvalidHex,
    #[error("invalid signature")]
    SignatureMismatch,
}

impl From<ring::error::Unspecified> for SignatureError {
    fn from(_: ring::error::Unspecified) -> Self {
        Self::SignatureMismatch
    }
}

/// Digest algorithm of a delivery signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureAlgorithm {
    Sha256,
    /// Legacy variant, only accepted when no SHA-256 header is present.
    Sha1,
}

impl SignatureAlgorithm {
    /// The `{prefix}=` part of the header value.
    pub fn prefix(self) -> &'static str {
        match self {
            SignatureAlgorithm::Sha256 => "sha256",
            SignatureAlgorithm::Sha1 => "sha1",
        }
    }

    /// The header this algorithm travels in.
    pub fn header_name(self) -> &'static str {
        match self {
            SignatureAlgorithm::Sha256 => SIGNATURE_256_HEADER,
            SignatureAlgorithm::Sha1 => LEGACY_SIGNATURE_HEADER,
        }
    }

    fn hmac(self) -> ring::hmac::Algorithm {
        match self {
            SignatureAlgorithm::Sha256 => ring::hmac::HMAC_SHA256,
            SignatureAlgorithm::Sha1 => ring::hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY,
        }
    }
}

/// A parsed delivery signature: algorithm plus raw digest bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliverySignature {
    pub algorithm: SignatureAlgorithm,
    pub digest: Box<[u8]>,
}

impl DeliverySignature {
    /// Parse a header value such as `sha256=ab01...`.
    ///
    /// The prefix must match `algorithm`; a `sha1=` value in the SHA-256
    /// header is rejected rather than silently downgraded.
    pub fn from_header(algorithm: SignatureAlgorithm, value: &str) -> Result<Self, SignatureError> {
        let (prefix, hex_digest) = value
            .trim()
            .split_once('=')
            .ok_or(SignatureError::InvalidFormat)?;
        if !prefix.eq_ignore_ascii_case(algorithm.prefix()) || hex_digest.is_empty() {
            return Err(SignatureError::InvalidFormat);
        }
        let digest = hex::decode(hex_digest)
            .map_err(|_| SignatureError::InvalidHex)?
            .into_boxed_slice();
        Ok(Self { algorithm, digest })
    }

    /// Compute the signature of `body` under `secret`.
    pub fn sign(algorithm: SignatureAlgorithm, body: &[u8], secret: &[u8]) -> Self {
        let tag = ring::hmac::sign(&ring::hmac::Key::new(algorithm.hmac(), secret), body);
        Self {
            algorithm,
            digest: tag.as_ref().to_owned().into_boxed_slice(),
        }
    }

    /// Verify this signature against the exact raw `body` bytes.
    ///
    /// An empty secret never verifies: a receiver without a configured
    /// secret must reject every delivery.
    pub fn verify(&self, body: &[u8], secret: &[u8]) -> Result<(), SignatureError> {
        if secret.is_empty() {
            return Err(SignatureError::MissingSecret);
        }
        ring::hmac::verify(
            &ring::hmac::Key::new(self.algorithm.hmac(), secret),
            body,
            &self.digest,
        )?;
        Ok(())
    }

    /// Format the header value (`{prefix}={hex}`).
    pub fn to_header(&self) -> String {
        format!("{}={}", self.algorithm.prefix(), hex::encode(&self.digest))
    }
}
