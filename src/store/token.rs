use echocore::store::{KeyValueStore, Result};
use echocore::token::{TOKEN_KEY, Token};
use log::debug;
use std::sync::Arc;

/// Persists the authentication token under a single fixed key.
///
/// Storage failures propagate to the caller unchanged.
pub struct TokenStore {
    backend: Arc<dyn KeyValueStore>,
}

impl TokenStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    pub async fn get_token(&self) -> Result<Option<Token>> {
        Ok(self.backend.get(TOKEN_KEY).await?.map(Token::from))
    }

    /// Overwrites any previously stored token.
    pub async fn set_token(&self, token: &Token) -> Result<()> {
        self.backend.set(TOKEN_KEY, token.as_str()).await?;
        debug!("Token stored ({} bytes)", token.as_str().len());
        Ok(())
    }

    pub async fn token_exists(&self) -> Result<bool> {
        Ok(self.get_token().await?.is_some())
    }

    pub async fn clear_token(&self) -> Result<()> {
        self.backend.remove(TOKEN_KEY).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn fresh_store_has_no_token() {
        let tokens = TokenStore::new(Arc::new(MemoryStore::new()));
        assert!(!tokens.token_exists().await.unwrap());
        assert_eq!(tokens.get_token().await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_token_round_trips_and_overwrites() {
        let tokens = TokenStore::new(Arc::new(MemoryStore::new()));

        tokens.set_token(&Token::from("first")).await.unwrap();
        assert!(tokens.token_exists().await.unwrap());

        tokens.set_token(&Token::from("second")).await.unwrap();
        assert_eq!(tokens.get_token().await.unwrap(), Some(Token::from("second")));

        tokens.clear_token().await.unwrap();
        assert!(!tokens.token_exists().await.unwrap());
    }

    #[tokio::test]
    async fn token_lives_under_the_fixed_key() {
        let backend = Arc::new(MemoryStore::new());
        let tokens = TokenStore::new(backend.clone());
        tokens.set_token(&Token::from("abc")).await.unwrap();
        assert_eq!(backend.get("Token").await.unwrap().as_deref(), Some("abc"));
    }
}
