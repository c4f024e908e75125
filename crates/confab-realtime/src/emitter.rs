//! Outward event delivery with per-listener isolation.
//!
//! A panicking listener must never prevent delivery to the remaining
//! listeners or disturb engine state, so each callback runs under
//! `catch_unwind` and failures are logged and swallowed.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::error;

use crate::event::SessionEvent;

type Listener = Box<dyn Fn(&SessionEvent) + Send + Sync>;

/// A clonable, shared list of event listeners.
///
/// Listeners are invoked synchronously, in registration order, while the
/// list is locked; a listener must not register new listeners from inside
/// its own callback.
#[derive(Clone, Default)]
pub struct EventSink {
    listeners: Arc<Mutex<Vec<Listener>>>,
}

impl EventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener for every future event.
    pub fn on(&self, listener: impl Fn(&SessionEvent) + Send + Sync + 'static) {
        self.listeners.lock().push(Box::new(listener));
    }

    /// Registers a channel-backed listener and returns its receiving end.
    /// Dropped receivers are tolerated; their events are discarded.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.on(move |event| {
            let _ = tx.send(event.clone());
        });
        rx
    }

    /// Delivers `event` to every listener, isolating panics per listener.
    pub fn emit(&self, event: SessionEvent) {
        let listeners = self.listeners.lock();
        for (i, listener) in listeners.iter().enumerate() {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(&event))) {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                error!(listener = i, %detail, "Event listener panicked; continuing delivery");
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}
