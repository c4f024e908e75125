//! Credential supply for the session handshake.
//!
//! The engine never stores a bearer token itself; it asks a [`TokenProvider`]
//! at every (re)connect, so rotating credentials are picked up without any
//! session-level plumbing.

use async_trait::async_trait;
use secrecy::SecretString;
use tokio::sync::watch;

/// Source of bearer tokens for the WebSocket handshake.
///
/// `bearer_token` is called once per connection attempt, including every
/// reconnection attempt, so implementations may return a different token
/// each time.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn bearer_token(&self) -> anyhow::Result<SecretString>;

    /// A change signal the session watches while connected. When the value
    /// changes, the session tears the socket down and reconnects with the
    /// fresh credential. Providers with static tokens return `None`.
    fn refresh_signal(&self) -> Option<watch::Receiver<u64>> {
        None
    }
}

/// A fixed token, never rotated.
pub struct StaticTokenProvider {
    token: SecretString,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: SecretString::from(token.into()),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn bearer_token(&self) -> anyhow::Result<SecretString> {
        Ok(self.token.clone())
    }
}

/// A token that the owner replaces out of band (for example from an OAuth
/// refresh loop). `rotate` stores the new token and nudges the session to
/// reconnect with it.
pub struct RotatingTokenProvider {
    token: parking_lot::Mutex<SecretString>,
    generation: watch::Sender<u64>,
}

impl RotatingTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            token: parking_lot::Mutex::new(SecretString::from(token.into())),
            generation,
        }
    }

    pub fn rotate(&self, token: impl Into<String>) {
        *self.token.lock() = SecretString::from(token.into());
        self.generation.send_modify(|g| *g += 1);
    }
}

#[async_trait]
impl TokenProvider for RotatingTokenProvider {
    async fn bearer_token(&self) -> anyhow::Result<SecretString> {
        Ok(self.token.lock().clone())
    }

    fn refresh_signal(&self) -> Option<watch::Receiver<u64>> {
        Some(self.generation.subscribe())
    }
}
