//! WebSocket stream plugin
//!
//! A background task keeps the connection open and stores every received
//! frame. Reads serve the latest frame; disconnects are retried forever.

use super::getter::derive_typed_getters;
use super::pipeline::{Pipeline, PipelineSettings};
use super::{Context, Getter, Other, Plugin, StringGetter, decode_other, getter_fn};
use crate::error::{HestiaError, Result};
use crate::logging::StructuredLogger;
use crate::request::header_map;
use crate::util::{DEFAULT_TIMEOUT, Monitor, default_scheme, duration};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_util::sync::{CancellationToken, DropGuard};

#[cfg(not(test))]
const RETRY_DELAY: Duration = Duration::from_secs(10);
#[cfg(test)]
const RETRY_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct Settings {
    uri: String,
    headers: BTreeMap<String, String>,
    #[serde(flatten)]
    pipeline: PipelineSettings,
    scale: f64,
    #[serde(with = "duration")]
    timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            uri: String::new(),
            headers: BTreeMap::new(),
            pipeline: PipelineSettings::default(),
            scale: 1.0,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

pub struct Socket {
    monitor: Arc<Monitor<String>>,
    pipeline: Arc<Pipeline>,
    scale: f64,
    // the reader stops once the plugin and all its getters are gone
    guard: Arc<DropGuard>,
}

/// Build a socket plugin; waits up to `timeout` for the first frame or error
pub async fn new_from_config(ctx: Context, other: Other) -> Result<Box<dyn Plugin>> {
    let cc: Settings = decode_other(&other)?;

    if cc.uri.is_empty() {
        return Err(HestiaError::config("missing uri"));
    }

    let url = default_scheme(&cc.uri, "ws");
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| HestiaError::config(format!("invalid uri: {}", e)))?;
    request.headers_mut().extend(header_map(&cc.headers)?);

    let monitor = Arc::new(Monitor::new(cc.timeout));
    let cancel = ctx.cancel_token().child_token();
    let (first_tx, first_rx) = oneshot::channel();

    let logger = ctx.logger("socket");
    logger.debug(&format!("connecting {}", url));
    tokio::spawn(run(
        request,
        monitor.clone(),
        cancel.clone(),
        first_tx,
        logger,
    ));

    // a timeout here is not fatal, the endpoint may just be quiet
    if let Ok(Ok(Err(err))) = tokio::time::timeout(cc.timeout, first_rx).await {
        cancel.cancel();
        return Err(err);
    }

    Ok(Box::new(Socket {
        monitor,
        pipeline: Arc::new(Pipeline::new(&cc.pipeline)?),
        scale: cc.scale,
        guard: Arc::new(cancel.drop_guard()),
    }))
}

async fn run(
    request: Request,
    monitor: Arc<Monitor<String>>,
    cancel: CancellationToken,
    first: oneshot::Sender<Result<()>>,
    logger: StructuredLogger,
) {
    let mut first = Some(first);

    loop {
        let res = tokio::select! {
            _ = cancel.cancelled() => return,
            res = read(request.clone(), &monitor, &mut first) => res,
        };

        if let Err(err) = res {
            match first.take() {
                // the constructor reports the first failure
                Some(tx) => {
                    let _ = tx.send(Err(err));
                }
                None => logger.debug(&format!("{}, reconnecting", err)),
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(RETRY_DELAY) => {}
        }
    }
}

async fn read(
    request: Request,
    monitor: &Monitor<String>,
    first: &mut Option<oneshot::Sender<Result<()>>>,
) -> Result<()> {
    let (mut ws, _) = connect_async(request)
        .await
        .map_err(|e| HestiaError::network(e.to_string()))?;

    while let Some(msg) = ws.next().await {
        let payload = match msg.map_err(|e| HestiaError::network(e.to_string()))? {
            Message::Text(text) => text.as_str().to_string(),
            Message::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Message::Close(_) => break,
            _ => continue,
        };
        monitor.set(payload);
        if let Some(tx) = first.take() {
            let _ = tx.send(Ok(()));
        }
    }

    Err(HestiaError::network("connection closed"))
}

#[async_trait]
impl StringGetter for Socket {
    async fn string_getter(&self) -> Result<Getter<String>> {
        let monitor = self.monitor.clone();
        let pipeline = self.pipeline.clone();
        let guard = self.guard.clone();
        Ok(getter_fn(move || {
            let _guard = &guard;
            let monitor = monitor.clone();
            let pipeline = pipeline.clone();
            async move {
                let payload = monitor.get().await?;
                pipeline.process(payload.as_bytes())
            }
        }))
    }
}

derive_typed_getters!(Socket);

crate::impl_plugin!(Socket, StringGetter, FloatGetter, IntGetter, BoolGetter);

#[cfg(test)]
mod tests {
    use super::*;
    use futures::SinkExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    #[test]
    fn test_settings() {
        let s: Settings = serde_yaml::from_str(
            "uri: 192.168.1.9:8080/ws\nheaders:\n  Authorization: Bearer x\njq: .power\ntimeout: 2s",
        )
        .unwrap();
        assert_eq!(s.headers.len(), 1);
        assert_eq!(s.pipeline.jq, ".power");
        assert_eq!(s.timeout, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_unreachable_fails_fast() {
        let ctx = Context::builtin().unwrap();
        let other: Other = serde_yaml::from_str("uri: 127.0.0.1:1\ntimeout: 5s").unwrap();
        let err = new_from_config(ctx, other).await.err().unwrap();
        assert!(matches!(err, HestiaError::Network { .. }));
    }

    #[tokio::test]
    async fn test_redials_after_server_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepts = Arc::new(AtomicUsize::new(0));

        let n = accepts.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let i = n.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                        return;
                    };
                    let frame = format!(r#"{{"power": {}}}"#, i + 1);
                    if ws.send(Message::text(frame)).await.is_err() {
                        return;
                    }
                    if i == 0 {
                        let _ = ws.close(None).await;
                    } else {
                        futures::future::pending::<()>().await;
                    }
                });
            }
        });

        let ctx = Context::builtin().unwrap();
        let other: Other =
            serde_yaml::from_str(&format!("uri: ws://{}\njq: .power\ntimeout: 5s", addr)).unwrap();
        let p = new_from_config(ctx.clone(), other).await.unwrap();
        let g = p.as_float_getter().unwrap().float_getter().await.unwrap();

        let mut v = g().await.unwrap();
        for _ in 0..100 {
            if v == 2.0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            v = g().await.unwrap();
        }
        assert_eq!(v, 2.0);
        assert_eq!(accepts.load(Ordering::SeqCst), 2);

        ctx.cancel_token().cancel();
    }
}
