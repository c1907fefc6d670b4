use echocore::identity::TokenDecoder;

use crate::calls::CallCoordinatorConfig;

pub const DEFAULT_RELAY_URL: &str = "ws://127.0.0.1:3000/signal";
pub const DEFAULT_STORE_PATH: &str = "echo-store";

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub relay_url: String,
    /// Directory the file-backed store keeps its keys in.
    pub store_path: String,
    /// Shared HS256 secret. Without one, token signatures are not checked.
    pub token_secret: Option<String>,
    pub calls: CallCoordinatorConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            store_path: DEFAULT_STORE_PATH.to_string(),
            token_secret: None,
            calls: CallCoordinatorConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn token_decoder(&self) -> TokenDecoder {
        match &self.token_secret {
            Some(secret) => TokenDecoder::with_hs256_secret(secret.as_bytes()),
            None => TokenDecoder::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_enables_signature_checks() {
        assert!(!ClientConfig::default().token_decoder().verifies_signature());

        let config = ClientConfig {
            token_secret: Some("hunter2".into()),
            ..Default::default()
        };
        assert!(config.token_decoder().verifies_signature());
    }
}
