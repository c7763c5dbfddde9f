//! Single-slot value mailbox with freshness timeout
//!
//! Bridges push-style streams (MQTT, WebSocket) into pull-style getters.

use super::DEFAULT_TIMEOUT;
use crate::error::{HestiaError, Result};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

#[derive(Debug)]
pub struct Monitor<T> {
    tx: watch::Sender<Option<(T, Instant)>>,
    timeout: Duration,
}

impl<T: Clone + Send + Sync + 'static> Monitor<T> {
    /// Create a monitor whose values go stale after `timeout`; zero never expires
    pub fn new(timeout: Duration) -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx, timeout }
    }

    /// Store a value, replacing any previous one
    pub fn set(&self, value: T) {
        self.tx.send_replace(Some((value, Instant::now())));
    }

    /// Apply a function to the current value, if any
    pub fn update<F: FnOnce(Option<&T>) -> T>(&self, f: F) {
        self.tx.send_modify(|slot| {
            let next = f(slot.as_ref().map(|(v, _)| v));
            *slot = Some((next, Instant::now()));
        });
    }

    /// Whether a value has been received yet
    pub fn has_value(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Latest value; waits for the first value for at most the timeout
    pub async fn get(&self) -> Result<T> {
        let mut rx = self.tx.subscribe();

        if let Some((value, updated)) = rx.borrow().clone() {
            if !self.timeout.is_zero() && updated.elapsed() > self.timeout {
                return Err(HestiaError::timeout("outdated"));
            }
            return Ok(value);
        }

        let wait = if self.timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            self.timeout
        };

        match tokio::time::timeout(wait, rx.wait_for(Option::is_some)).await {
            Ok(Ok(slot)) => match &*slot {
                Some((value, _)) => Ok(value.clone()),
                None => Err(HestiaError::timeout("no value")),
            },
            Ok(Err(_)) => Err(HestiaError::generic("monitor closed")),
            Err(_) => Err(HestiaError::timeout("timeout")),
        }
    }
}
