//! Custom Axum extractors for request authentication.
//!
//! Provides:
//! - `SignedDelivery`: verifies the platform's `X-Signature-256` (or legacy
//!   `X-Signature`) header against the exact raw request body.
//! - `AdminAuth`: checks the `Loopin-Admin-Authorization` header against
//!   the argon2-hashed admin secret.
//!
//! All cryptographic operations are delegated to [`loopin_sdk::signature`].

use axum::{
    extract::{FromRequest, FromRequestParts, Request},
    http::{HeaderMap, StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use loopin_sdk::signature::{
    ADMIN_AUTH_HEADER, DeliverySignature, SignatureAlgorithm, SignatureError,
};

use crate::state::AppState;

// ---------------------------------------------------------------------------
// SignedDelivery - platform webhook authentication via raw-body HMAC
// ---------------------------------------------------------------------------

/// The raw body of a delivery whose signature has been verified.
///
/// # Header format
///
/// ```text
/// X-Signature-256: sha256={hex_hmac}
/// X-Signature:     sha1={hex_hmac}
/// ```
///
/// The SHA-256 header wins when both are present. The body is not parsed
/// here: verification happens on the bytes as received.
pub struct SignedDelivery(pub Bytes);

/// Errors that can occur during delivery verification.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryRejection {
    #[error("no app secret configured")]
    MissingSecret,
    #[error("missing signature header")]
    MissingSignature,
    #[error("invalid signature header")]
    InvalidSignatureHeader,
    #[error("signature verification failed")]
    SignatureMismatch,
    #[error("failed to read request body")]
    BodyReadError,
}

impl From<SignatureError> for DeliveryRejection {
    fn from(err: SignatureError) -> Self {
        match err {
            SignatureError::MissingSecret => Self::MissingSecret,
            SignatureError::InvalidFormat | SignatureError::InvalidHex => {
                Self::InvalidSignatureHeader
            }
            SignatureError::SignatureMismatch => Self::SignatureMismatch,
        }
    }
}

impl IntoResponse for DeliveryRejection {
    fn into_response(self) -> Response {
        let status = match self {
            DeliveryRejection::BodyReadError => StatusCode::BAD_REQUEST,
            _ => StatusCode::FORBIDDEN,
        };
        tracing::warn!(reason = %self, "Webhook delivery rejected");
        (status, self.to_string()).into_response()
    }
}

/// Pick the signature header to verify. The legacy header is only
/// consulted when the SHA-256 one is absent.
fn presented_signature(headers: &HeaderMap) -> Result<DeliverySignature, DeliveryRejection> {
    let (algorithm, value) = [SignatureAlgorithm::Sha256, SignatureAlgorithm::Sha1]
        .into_iter()
        .find_map(|algorithm| {
            headers
                .get(algorithm.header_name())
                .map(|value| (algorithm, value))
        })
        .ok_or(DeliveryRejection::MissingSignature)?;
    let value = value
        .to_str()
        .map_err(|_| DeliveryRejection::InvalidSignatureHeader)?;
    Ok(DeliverySignature::from_header(algorithm, value)?)
}

impl FromRequest<AppState> for SignedDelivery {
    type Rejection = DeliveryRejection;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let webhook = state.config.webhook.read().await;
        if webhook.secret_bytes().is_empty() {
            return Err(DeliveryRejection::MissingSecret);
        }
        let max_body_bytes = webhook.max_body_bytes;
        drop(webhook);

        let signature = presented_signature(req.headers())?;

        let body = axum::body::to_bytes(req.into_body(), max_body_bytes)
            .await
            .map_err(|_| DeliveryRejection::BodyReadError)?;

        // the secret may have been reloaded while the body streamed in
        let webhook = state.config.webhook.read().await;
        signature.verify(&body, webhook.secret_bytes())?;
        drop(webhook);

        Ok(SignedDelivery(body))
    }
}

// ---------------------------------------------------------------------------
// AdminAuth - Admin API authentication
// ---------------------------------------------------------------------------

/// Marker extractor: the request carried the correct admin secret.
pub struct AdminAuth;

#[derive(Debug)]
pub enum AdminAuthError {
    MissingHeader,
    InvalidHeader,
    Unauthorized,
}

impl IntoResponse for AdminAuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AdminAuthError::MissingHeader => (
                StatusCode::UNAUTHORIZED,
                "missing Loopin-Admin-Authorization header",
            ),
            AdminAuthError::InvalidHeader => (
                StatusCode::BAD_REQUEST,
                "invalid Loopin-Admin-Authorization header",
            ),
            AdminAuthError::Unauthorized => (StatusCode::UNAUTHORIZED, "invalid admin secret"),
        };
        (status, message).into_response()
    }
}

impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = AdminAuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let secret = parts
            .headers
            .get(ADMIN_AUTH_HEADER)
            .ok_or(AdminAuthError::MissingHeader)?
            .to_str()
            .map_err(|_| AdminAuthError::InvalidHeader)?;

        let admin = state.config.admin.read().await;
        let verified = admin.verify_secret(secret);
        drop(admin);

        if verified {
            Ok(AdminAuth)
        } else {
            Err(AdminAuthError::Unauthorized)
        }
    }
}
