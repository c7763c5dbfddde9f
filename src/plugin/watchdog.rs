//! Periodic re-assertion of the last written value
//!
//! A write of a non-reset value arms a background task re-writing that value
//! every `timeout / 2` until the next write. Every write cancels the running
//! task first, so at most one task per watchdog is alive at any time.
//!
//! With `defer` enabled, a non-reset write arriving within
//! `timeout + graceperiod` of the previous write is held back until that
//! window has passed. A later write replaces the pending one.

use super::{
    BoolSetter, Config, Context, FloatSetter, IntSetter, Other, Plugin, Setter, Typed,
    decode_other, setter_fn,
};
use crate::error::{HestiaError, Result};
use crate::logging::StructuredLogger;
use crate::util::{duration, scalar};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const DEFAULT_GRACEPERIOD: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Deserialize)]
struct Settings {
    #[serde(default, deserialize_with = "scalar::list")]
    reset: Vec<String>,
    #[serde(default, deserialize_with = "scalar::option")]
    initial: Option<String>,
    set: Config,
    #[serde(with = "duration")]
    timeout: Duration,
    #[serde(default, rename = "defer")]
    deferred: bool,
    #[serde(default, with = "duration::option")]
    graceperiod: Option<Duration>,
}

pub struct Watchdog {
    ctx: Context,
    reset: Vec<String>,
    initial: Option<String>,
    set: Config,
    timeout: Duration,
    deferred: bool,
    graceperiod: Duration,
    state: Arc<Mutex<State>>,
}

/// Shared by all setters of one watchdog
#[derive(Default)]
struct State {
    wdt: Option<CancellationToken>,
}

pub async fn new_from_config(ctx: Context, other: Other) -> Result<Box<dyn Plugin>> {
    let cc: Settings = decode_other(&other)?;

    if cc.timeout.is_zero() {
        return Err(HestiaError::config("watchdog: timeout must be positive"));
    }

    Ok(Box::new(Watchdog {
        ctx,
        reset: cc.reset,
        initial: cc.initial,
        set: cc.set,
        timeout: cc.timeout,
        deferred: cc.deferred,
        graceperiod: cc.graceperiod.unwrap_or(DEFAULT_GRACEPERIOD),
        state: Arc::new(Mutex::new(State::default())),
    }))
}

/// Per setter state guarded by the watchdog mutex
struct Writer<T> {
    state: Arc<Mutex<State>>,
    pending: Mutex<Pending>,
    set: Setter<T>,
    reset: Vec<T>,
    timeout: Duration,
    graceperiod: Duration,
    deferred: bool,
    cancel: CancellationToken,
    log: StructuredLogger,
}

#[derive(Default)]
struct Pending {
    deferred: Option<CancellationToken>,
    last_updated: Option<Instant>,
}

impl<T: Typed> Writer<T> {
    fn is_reset(&self, v: &T) -> bool {
        self.reset.contains(v)
    }

    async fn write(self: Arc<Self>, v: T) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut pending = self.pending.lock().await;

        if let Some(token) = pending.deferred.take() {
            token.cancel();
        }

        if self.deferred && !self.is_reset(&v) {
            if let Some(last) = pending.last_updated {
                let window = self.timeout + self.graceperiod;
                let delay = window.saturating_sub(last.elapsed());
                if !delay.is_zero() {
                    if let Some(wdt) = state.wdt.take() {
                        wdt.cancel();
                    }

                    self.log.debug(&format!(
                        "deferring update to {} by {}",
                        v,
                        duration::format(delay)
                    ));

                    let token = self.cancel.child_token();
                    pending.deferred = Some(token.clone());
                    tokio::spawn(self.clone().deferred(token, delay, v));
                    return Ok(());
                }
            }
        }

        if let Some(wdt) = state.wdt.take() {
            wdt.cancel();
        }

        (self.set)(v.clone()).await?;
        pending.last_updated = Some(Instant::now());

        self.arm(&mut state, v);
        Ok(())
    }

    async fn deferred(self: Arc<Self>, token: CancellationToken, delay: Duration, v: T) {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }

        let mut state = self.state.lock().await;
        let mut pending = self.pending.lock().await;

        // replaced while waiting for the lock
        if token.is_cancelled() {
            return;
        }
        pending.deferred = None;

        self.log.debug(&format!("deferred update to {}", v));
        if let Err(e) = (self.set)(v.clone()).await {
            self.log.error(&format!("deferred update failed: {}", e));
            return;
        }
        pending.last_updated = Some(Instant::now());

        self.arm(&mut state, v);
    }

    /// Start re-asserting `v` unless it is a reset value
    fn arm(self: &Arc<Self>, state: &mut State, v: T) {
        if self.reset.is_empty() || self.is_reset(&v) {
            return;
        }

        let token = self.cancel.child_token();
        state.wdt = Some(token.clone());
        tokio::spawn(self.clone().reassert(token, v));
    }

    async fn reassert(self: Arc<Self>, token: CancellationToken, v: T) {
        let period = self.timeout / 2;
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(period) => {}
            }

            let _state = self.state.lock().await;
            let mut pending = self.pending.lock().await;
            if token.is_cancelled() {
                return;
            }

            match (self.set)(v.clone()).await {
                Ok(()) => pending.last_updated = Some(Instant::now()),
                Err(e) => self.log.error(&format!("re-asserting {} failed: {}", v, e)),
            }
        }
    }
}

impl Watchdog {
    async fn watchdog<T: Typed>(&self, param: &str) -> Result<Setter<T>> {
        let set = T::setter(&self.set, &self.ctx, param).await?;
        let reset = self
            .reset
            .iter()
            .map(|s| T::parse(s))
            .collect::<Result<Vec<T>>>()?;

        let writer = Arc::new(Writer {
            state: self.state.clone(),
            pending: Mutex::new(Pending::default()),
            set,
            reset,
            timeout: self.timeout,
            graceperiod: self.graceperiod,
            deferred: self.deferred,
            cancel: self.ctx.cancel_token().clone(),
            log: self.ctx.logger("watchdog"),
        });

        if let Some(initial) = &self.initial {
            writer.clone().write(T::parse(initial)?).await?;
        }

        Ok(setter_fn(move |v: T| writer.clone().write(v)))
    }
}

#[async_trait]
impl IntSetter for Watchdog {
    async fn int_setter(&self, param: &str) -> Result<Setter<i64>> {
        self.watchdog(param).await
    }
}

#[async_trait]
impl FloatSetter for Watchdog {
    async fn float_setter(&self, param: &str) -> Result<Setter<f64>> {
        self.watchdog(param).await
    }
}

#[async_trait]
impl BoolSetter for Watchdog {
    async fn bool_setter(&self, param: &str) -> Result<Setter<bool>> {
        if self.reset.len() > 1 {
            return Err(HestiaError::config("more than one boolean reset value"));
        }
        self.watchdog(param).await
    }
}

crate::impl_plugin!(Watchdog, IntSetter, FloatSetter, BoolSetter);
