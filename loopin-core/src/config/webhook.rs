//! Webhook receiver configuration.

use super::ProcessingMode;

/// Settings for the inbound webhook endpoints.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// HMAC key shared with the platform. Empty means every delivery is
    /// rejected.
    pub app_secret: Box<[u8]>,
    /// Token the platform echoes back during subscription verification.
    pub verify_token: String,
    pub processing_mode: ProcessingMode,
    /// Upper bound on the raw delivery body.
    pub max_body_bytes: usize,
}

impl WebhookConfig {
    pub fn new(
        app_secret: impl Into<Box<[u8]>>,
        verify_token: String,
        processing_mode: ProcessingMode,
    ) -> Self {
        Self {
            app_secret: app_secret.into(),
            verify_token,
            processing_mode,
            max_body_bytes: 1024 * 1024,
        }
    }

    pub fn secret_bytes(&self) -> &[u8] {
        &self.app_secret
    }

    /// Subscription handshake check. An empty configured token never
    /// matches.
    pub fn accepts_verification(&self, mode: &str, token: &str) -> bool {
        mode == "subscribe" && !self.verify_token.is_empty() && token == self.verify_token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verification_requires_subscribe_and_token() {
        let config = WebhookConfig::new(*b"s", "tok".to_string(), ProcessingMode::Queue);
        assert!(config.accepts_verification("subscribe", "tok"));
        assert!(!config.accepts_verification("unsubscribe", "tok"));
        assert!(!config.accepts_verification("subscribe", "nope"));

        let unset = WebhookConfig::new(*b"s", String::new(), ProcessingMode::Queue);
        assert!(!unset.accepts_verification("subscribe", ""));
    }
}
