//! Minimal text conversation against a Confab realtime endpoint.
//!
//! Reads configuration from the environment (`CONFAB_WS_URL` plus an optional
//! `CONFAB_TOKEN`), connects, sends one message, and prints the streamed
//! reply until the response completes.

use std::sync::Arc;

use confab_realtime::{RealtimeSession, SessionConfig, SessionEvent, StaticTokenProvider};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "confab_realtime=info".into()),
        )
        .init();

    let config = SessionConfig::from_env()?;
    let token = std::env::var("CONFAB_TOKEN").unwrap_or_default();
    let session = RealtimeSession::new(config, Arc::new(StaticTokenProvider::new(token)))?;

    let mut events = session.events();
    session.connect().await?;
    session.send_text("Give me a one-line summary of your day.").await?;

    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Streaming { message } => {
                println!("... {}", message.content);
            }
            SessionEvent::MessageComplete { message } => {
                println!("agent: {}", message.content);
                break;
            }
            SessionEvent::Error { message } => {
                eprintln!("error: {message}");
                break;
            }
            SessionEvent::Disconnected { reason, .. } => {
                eprintln!("disconnected: {reason}");
                break;
            }
            _ => {}
        }
    }

    session.disconnect().await;
    Ok(())
}
