//! Exponential-backoff reconnection with a single-cycle guarantee.
//!
//! The controller is transport-agnostic: it is handed an async reconnect
//! callback and only decides whether and when to call it. At most one cycle
//! runs at a time; a second `start` while one is active fails fast without
//! touching the running cycle.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::ReconnectionConfig;
use crate::emitter::EventSink;
use crate::event::SessionEvent;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ReconnectError {
    #[error("reconnection is disabled in configuration")]
    Disabled,
    #[error("a reconnection cycle is already active")]
    AlreadyActive,
}

/// The state of the in-flight cycle. Exists only while a cycle is active.
#[derive(Debug, Clone)]
pub struct ReconnectionAttempt {
    pub attempt_number: u32,
    pub current_delay: Duration,
    pub started_at: DateTime<Utc>,
}

/// Computes the delay before the given zero-based attempt:
/// `min(initial × multiplier^attempt, max)`, then ±`jitter_factor`
/// randomization. Deterministic when the jitter factor is zero.
pub fn backoff_delay(attempt: u32, config: &ReconnectionConfig) -> Duration {
    let base = config.initial_delay.as_millis() as f64
        * config.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32);
    let capped = base.min(config.max_delay.as_millis() as f64);
    let jittered = if config.jitter_factor > 0.0 {
        let band = rand::rng().random_range(-config.jitter_factor..=config.jitter_factor);
        capped * (1.0 + band)
    } else {
        capped
    };
    Duration::from_millis(jittered.max(0.0) as u64)
}

pub struct ReconnectionController {
    config: ReconnectionConfig,
    enabled: AtomicBool,
    active: Arc<AtomicBool>,
    attempts: Arc<AtomicU32>,
    current: Arc<Mutex<Option<ReconnectionAttempt>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    sink: EventSink,
}

impl ReconnectionController {
    pub fn new(config: ReconnectionConfig, sink: EventSink) -> Self {
        let enabled = config.enabled;
        Self {
            config,
            enabled: AtomicBool::new(enabled),
            active: Arc::new(AtomicBool::new(false)),
            attempts: Arc::new(AtomicU32::new(0)),
            current: Arc::new(Mutex::new(None)),
            task: Mutex::new(None),
            sink,
        }
    }

    /// Runs one reconnection cycle: wait, invoke `reconnect_fn`, and either
    /// finish on success or back off and retry until attempts are exhausted.
    ///
    /// Fails fast if reconnection is disabled or a cycle is already active.
    pub fn start<F, Fut>(&self, reconnect_fn: F) -> Result<(), ReconnectError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send,
    {
        if !self.enabled.load(Ordering::SeqCst) {
            return Err(ReconnectError::Disabled);
        }
        if self.active.swap(true, Ordering::SeqCst) {
            return Err(ReconnectError::AlreadyActive);
        }

        let config = self.config.clone();
        let active = self.active.clone();
        let attempts = self.attempts.clone();
        let current = self.current.clone();
        let sink = self.sink.clone();

        let handle = tokio::spawn(async move {
            loop {
                let attempt = attempts.load(Ordering::SeqCst);
                let delay = backoff_delay(attempt, &config);
                *current.lock() = Some(ReconnectionAttempt {
                    attempt_number: attempt,
                    current_delay: delay,
                    started_at: Utc::now(),
                });
                sink.emit(SessionEvent::Reconnecting {
                    attempt: attempt + 1,
                    delay_ms: delay.as_millis() as u64,
                });
                tokio::time::sleep(delay).await;

                match reconnect_fn().await {
                    Ok(()) => {
                        info!(attempt = attempt + 1, "Reconnected");
                        attempts.store(0, Ordering::SeqCst);
                        *current.lock() = None;
                        active.store(false, Ordering::SeqCst);
                        sink.emit(SessionEvent::Reconnected);
                        return;
                    }
                    Err(e) => {
                        let failed = attempt + 1;
                        warn!(attempt = failed, error = ?e, "Reconnection attempt failed");
                        attempts.store(failed, Ordering::SeqCst);
                        if config.max_attempts != 0 && failed >= config.max_attempts {
                            *current.lock() = None;
                            active.store(false, Ordering::SeqCst);
                            sink.emit(SessionEvent::ReconnectionFailed { attempts: failed });
                            return;
                        }
                    }
                }
            }
        });
        *self.task.lock() = Some(handle);
        Ok(())
    }

    /// Cancels the pending attempt immediately. Idempotent.
    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
        *self.current.lock() = None;
        self.active.store(false, Ordering::SeqCst);
    }

    /// Clears the attempt count and delay back to the initial value. Used
    /// after a clean manual reconnect.
    pub fn reset(&self) {
        self.attempts.store(0, Ordering::SeqCst);
    }

    /// Flips the master switch. Disabling while a cycle is active stops it
    /// synchronously.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        if !enabled {
            self.stop();
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn current_attempt(&self) -> Option<ReconnectionAttempt> {
        self.current.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn no_jitter_config() -> ReconnectionConfig {
        ReconnectionConfig {
            enabled: true,
            initial_delay: Duration::from_millis(1000),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_millis(30_000),
            jitter_factor: 0.0,
            max_attempts: 0,
        }
    }

    #[test]
    fn test_backoff_delays_double_and_cap() {
        let config = no_jitter_config();
        let delays: Vec<u64> = (0..7)
            .map(|a| backoff_delay(a, &config).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000, 30000, 30000]);
    }

    #[test]
    fn test_backoff_jitter_stays_in_band() {
        let config = ReconnectionConfig {
            jitter_factor: 0.25,
            ..no_jitter_config()
        };
        for _ in 0..100 {
            let delay = backoff_delay(1, &config).as_millis() as u64;
            assert!((1500..=2500).contains(&delay), "delay {delay} out of band");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_retries_until_success() {
        let sink = EventSink::new();
        let mut rx = sink.subscribe();
        let controller = ReconnectionController::new(no_jitter_config(), sink);

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_fn = calls.clone();
        controller
            .start(move || {
                let n = calls_in_fn.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(anyhow::anyhow!("connect refused"))
                    } else {
                        Ok(())
                    }
                }
            })
            .unwrap();

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(rx.recv().await.unwrap());
        }
        assert!(matches!(seen[0], SessionEvent::Reconnecting { attempt: 1, delay_ms: 1000 }));
        assert!(matches!(seen[1], SessionEvent::Reconnecting { attempt: 2, delay_ms: 2000 }));
        assert!(matches!(seen[2], SessionEvent::Reconnecting { attempt: 3, delay_ms: 4000 }));
        assert!(matches!(seen[3], SessionEvent::Reconnected));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(!controller.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_is_terminal() {
        let sink = EventSink::new();
        let mut rx = sink.subscribe();
        let config = ReconnectionConfig {
            max_attempts: 2,
            ..no_jitter_config()
        };
        let controller = ReconnectionController::new(config, sink);

        controller
            .start(|| async { Err(anyhow::anyhow!("still down")) })
            .unwrap();

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(rx.recv().await.unwrap());
        }
        assert!(matches!(seen[0], SessionEvent::Reconnecting { attempt: 1, .. }));
        assert!(matches!(seen[1], SessionEvent::Reconnecting { attempt: 2, .. }));
        assert!(matches!(seen[2], SessionEvent::ReconnectionFailed { attempts: 2 }));
        assert!(!controller.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_fails_without_disturbing_first() {
        let sink = EventSink::new();
        let mut rx = sink.subscribe();
        let controller = ReconnectionController::new(no_jitter_config(), sink);

        controller.start(|| async { Ok(()) }).unwrap();
        assert_eq!(
            controller.start(|| async { Ok(()) }).unwrap_err(),
            ReconnectError::AlreadyActive
        );

        // First cycle still completes normally.
        assert!(matches!(
            rx.recv().await.unwrap(),
            SessionEvent::Reconnecting { attempt: 1, .. }
        ));
        assert!(matches!(rx.recv().await.unwrap(), SessionEvent::Reconnected));
    }

    #[tokio::test]
    async fn test_disabled_rejects_immediately() {
        let config = ReconnectionConfig {
            enabled: false,
            ..no_jitter_config()
        };
        let controller = ReconnectionController::new(config, EventSink::new());
        assert_eq!(
            controller.start(|| async { Ok(()) }).unwrap_err(),
            ReconnectError::Disabled
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_and_is_idempotent() {
        let controller = ReconnectionController::new(no_jitter_config(), EventSink::new());
        controller.start(|| async { Err(anyhow::anyhow!("nope")) }).unwrap();
        assert!(controller.is_active());

        controller.stop();
        assert!(!controller.is_active());
        assert!(controller.current_attempt().is_none());
        controller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabling_mid_cycle_stops_it() {
        let controller = ReconnectionController::new(no_jitter_config(), EventSink::new());
        controller.start(|| async { Err(anyhow::anyhow!("nope")) }).unwrap();

        controller.set_enabled(false);
        assert!(!controller.is_active());
        assert_eq!(
            controller.start(|| async { Ok(()) }).unwrap_err(),
            ReconnectError::Disabled
        );
    }

    #[tokio::test]
    async fn test_reset_clears_attempt_count() {
        let controller = ReconnectionController::new(no_jitter_config(), EventSink::new());
        controller.attempts.store(5, Ordering::SeqCst);
        controller.reset();
        assert_eq!(controller.attempts.load(Ordering::SeqCst), 0);
    }
}
