//! MQTT broker client
//!
//! One client per broker and credentials, shared by all plugins. The event
//! loop runs in its own task, restores subscriptions after reconnecting and
//! fans incoming payloads out to every listener of a topic.

use crate::config::MqttSettings;
use crate::error::{HestiaError, Result};
use crate::logging::{StructuredLogger, get_logger};
use crate::util::{DEFAULT_TIMEOUT, default_port};
use once_cell::sync::Lazy;
use rand::Rng;
use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, SubscribeReasonCode,
    TlsConfiguration, Transport,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore, oneshot};
use tokio_util::sync::CancellationToken;

/// Parallel publishes per client
pub const INFLIGHT_LIMIT: usize = 128;

#[cfg(test)]
pub(crate) mod broker;

const SECURE: &str = "tls://";
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

type Callback = Arc<dyn Fn(String) + Send + Sync>;

#[derive(Default)]
struct Shared {
    listeners: StdMutex<HashMap<String, Vec<Callback>>>,
    // subscribe requests in the order they were queued, matched to packet ids
    queued: StdMutex<VecDeque<Option<oneshot::Sender<bool>>>>,
    pending: StdMutex<HashMap<u16, oneshot::Sender<bool>>>,
}

impl Shared {
    fn callbacks(&self, topic: &str) -> Vec<Callback> {
        let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners
            .iter()
            .filter(|(filter, _)| topic_matches(filter, topic))
            .flat_map(|(_, cbs)| cbs.iter().cloned())
            .collect()
    }

    fn topics(&self) -> Vec<String> {
        let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners.keys().cloned().collect()
    }

    /// Detach a single callback, dropping the topic once nobody listens
    fn forget(&self, topic: &str, callback: &Callback) {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(cbs) = listeners.get_mut(topic) {
            cbs.retain(|cb| !Arc::ptr_eq(cb, callback));
            if cbs.is_empty() {
                listeners.remove(topic);
            }
        }
    }
}

/// Generated client id
pub fn client_id() -> String {
    format!("hestia-{}", rand::thread_rng().gen_range(0..i32::MAX))
}

/// Whether an MQTT topic filter with `+` and `#` wildcards matches `topic`
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut f = filter.split('/');
    let mut t = topic.split('/');
    loop {
        match (f.next(), t.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(a), Some(b)) if a == b => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Split a broker address into host, port and whether TLS is requested
pub fn parse_broker(broker: &str) -> Result<(String, u16, bool)> {
    let (rest, secure) = match broker.strip_prefix(SECURE) {
        Some(rest) => (rest, true),
        None => (
            broker
                .strip_prefix("tcp://")
                .or_else(|| broker.strip_prefix("mqtt://"))
                .unwrap_or(broker),
            false,
        ),
    };
    if rest.is_empty() {
        return Err(HestiaError::config("missing broker"));
    }

    let addr = default_port(rest, 1883);
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| HestiaError::config(format!("invalid broker: {}", broker)))?;
    let port = port
        .parse()
        .map_err(|_| HestiaError::config(format!("invalid broker: {}", broker)))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');

    Ok((host.to_string(), port, secure))
}

pub struct Client {
    client: AsyncClient,
    broker: String,
    qos: QoS,
    shared: Arc<Shared>,
    inflight: Arc<Semaphore>,
    cancel: CancellationToken,
    logger: StructuredLogger,
}

impl Drop for Client {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Client {
    /// Connect to the broker; fails if the first connection attempt fails
    pub async fn connect(settings: &MqttSettings) -> Result<Arc<Self>> {
        let logger = get_logger("mqtt");
        let (host, port, secure) = parse_broker(&settings.broker)?;

        let id = if settings.client_id.is_empty() {
            client_id()
        } else {
            settings.client_id.clone()
        };

        let mut options = MqttOptions::new(&id, &host, port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_session(true);
        if !settings.user.is_empty() {
            options.set_credentials(&settings.user, &settings.password);
        }

        if secure {
            let client_auth = (!settings.client_cert.is_empty() && !settings.client_key.is_empty())
                .then(|| {
                    (
                        settings.client_cert.clone().into_bytes(),
                        settings.client_key.clone().into_bytes(),
                    )
                });
            let transport = if settings.ca_cert.is_empty() && client_auth.is_none() {
                Transport::tls_with_default_config()
            } else {
                Transport::tls_with_config(TlsConfiguration::Simple {
                    ca: settings.ca_cert.clone().into_bytes(),
                    alpn: None,
                    client_auth,
                })
            };
            options.set_transport(transport);
        }

        let broker = format!("{}:{}", host, port);
        logger.info(&format!("connecting {} at {}", id, broker));

        let (client, eventloop) = AsyncClient::new(options, 64);
        let shared = Arc::new(Shared::default());
        let cancel = CancellationToken::new();
        let (first_tx, first_rx) = oneshot::channel();

        tokio::spawn(run(
            eventloop,
            client.clone(),
            shared.clone(),
            cancel.clone(),
            first_tx,
            logger.clone(),
        ));

        let first = tokio::time::timeout(DEFAULT_TIMEOUT, first_rx).await;
        match first {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => {
                cancel.cancel();
                return Err(HestiaError::mqtt(format!("error connecting: {}", e)));
            }
            Ok(Err(_)) => {
                cancel.cancel();
                return Err(HestiaError::mqtt("error connecting: event loop stopped"));
            }
            Err(_) => {
                cancel.cancel();
                return Err(HestiaError::timeout(format!("connecting {}", broker)));
            }
        }

        Ok(Arc::new(Self {
            client,
            broker,
            qos: QoS::AtLeastOnce,
            shared,
            inflight: Arc::new(Semaphore::new(INFLIGHT_LIMIT)),
            cancel,
            logger,
        }))
    }

    pub fn broker(&self) -> &str {
        &self.broker
    }

    /// Publish asynchronously; errors are logged
    pub fn publish(&self, topic: &str, retained: bool, payload: String) {
        let client = self.client.clone();
        let inflight = self.inflight.clone();
        let logger = self.logger.clone();
        let topic = topic.to_string();
        let qos = self.qos;

        tokio::spawn(async move {
            let permit =
                match tokio::time::timeout(DEFAULT_TIMEOUT, inflight.acquire_owned()).await {
                    Ok(Ok(permit)) => permit,
                    _ => {
                        logger.error(&format!("send {}: timeout", topic));
                        return;
                    }
                };

            logger.trace(&format!("send {}: '{}'", topic, payload));
            let res = tokio::time::timeout(
                DEFAULT_TIMEOUT,
                client.publish(topic.as_str(), qos, retained, payload),
            )
            .await;
            match res {
                Ok(Ok(())) => {}
                Ok(Err(e)) => logger.error(&format!("send {}: {}", topic, e)),
                Err(_) => logger.error(&format!("send {}: timeout", topic)),
            }
            drop(permit);
        });
    }

    fn subscribe(&self, topic: &str) -> Result<oneshot::Receiver<bool>> {
        let (tx, rx) = oneshot::channel();
        let mut queued = self.shared.queued.lock().unwrap_or_else(|e| e.into_inner());
        queued.push_back(Some(tx));
        if let Err(e) = self.client.try_subscribe(topic, self.qos) {
            queued.pop_back();
            return Err(HestiaError::mqtt(format!("subscribe: {}: {}", topic, e)));
        }
        Ok(rx)
    }

    /// Attach a listener to `topic`, waiting for the broker to acknowledge
    pub async fn listen<F>(&self, topic: &str, callback: F) -> Result<()>
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        let callback: Callback = Arc::new(callback);
        self.shared
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(topic.to_string())
            .or_default()
            .push(callback.clone());

        let res = match self.subscribe(topic) {
            Ok(ack) => match tokio::time::timeout(DEFAULT_TIMEOUT, ack).await {
                Ok(Ok(true)) => Ok(()),
                Ok(Ok(false)) => Err(HestiaError::mqtt(format!("subscribe: {}: rejected", topic))),
                _ => Err(HestiaError::timeout(format!("subscribe: {}", topic))),
            },
            Err(e) => Err(e),
        };

        if res.is_err() {
            self.shared.forget(topic, &callback);
        }
        res
    }

    /// Number of callbacks attached to `topic`
    pub fn listeners(&self, topic: &str) -> usize {
        self.shared
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(topic)
            .map_or(0, Vec::len)
    }

    /// Listen on `<topic>/set`, clearing the retained payload after handling
    pub async fn listen_setter<F>(self: &Arc<Self>, topic: &str, callback: F) -> Result<()>
    where
        F: Fn(String) -> Result<()> + Send + Sync + 'static,
    {
        let topic = format!("{}/set", topic);
        let me = Arc::downgrade(self);
        let set_topic = topic.clone();
        self.listen(&topic, move |payload| {
            let Some(me) = me.upgrade() else { return };
            if let Err(e) = callback(payload) {
                me.logger.error(&format!("set {}: {}", set_topic, e));
            }
            me.publish(&set_topic, true, String::new());
        })
        .await
    }
}

async fn run(
    mut eventloop: EventLoop,
    client: AsyncClient,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    first: oneshot::Sender<std::result::Result<(), String>>,
    logger: StructuredLogger,
) {
    let mut first = Some(first);
    let mut connected = false;

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                connected = true;
                logger.debug("connected");
                if let Some(first) = first.take() {
                    let _ = first.send(Ok(()));
                }

                // clean sessions lose subscriptions on reconnect
                let mut queued = shared.queued.lock().unwrap_or_else(|e| e.into_inner());
                for topic in shared.topics() {
                    logger.debug(&format!("subscribe {}", topic));
                    if client.try_subscribe(topic.as_str(), QoS::AtLeastOnce).is_ok() {
                        queued.push_back(None);
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(msg))) => {
                let payload = String::from_utf8_lossy(&msg.payload).into_owned();
                logger.trace(&format!("recv {}: '{}'", msg.topic, payload));
                if payload.is_empty() {
                    continue;
                }
                for cb in shared.callbacks(&msg.topic) {
                    cb(payload.clone());
                }
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                let tx = shared
                    .pending
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&ack.pkid);
                if let Some(tx) = tx {
                    let granted = ack
                        .return_codes
                        .iter()
                        .all(|code| !matches!(code, SubscribeReasonCode::Failure));
                    let _ = tx.send(granted);
                }
            }
            Ok(Event::Outgoing(Outgoing::Subscribe(pkid))) => {
                let next = shared
                    .queued
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .pop_front()
                    .flatten();
                if let Some(tx) = next {
                    shared
                        .pending
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .insert(pkid, tx);
                }
            }
            Ok(_) => {}
            Err(e) => {
                if let Some(first) = first.take() {
                    let _ = first.send(Err(e.to_string()));
                    break;
                }
                if connected {
                    logger.error(&format!("connection lost: {}", e));
                    connected = false;
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                }
            }
        }
    }
}

static CLIENTS: Lazy<Mutex<HashMap<MqttSettings, Weak<Client>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Shared client for the given broker settings
pub async fn registered_client(settings: &MqttSettings) -> Result<Arc<Client>> {
    let mut clients = CLIENTS.lock().await;
    if let Some(client) = clients.get(settings).and_then(Weak::upgrade) {
        return Ok(client);
    }

    let client = Client::connect(settings).await?;
    clients.retain(|_, c| c.strong_count() > 0);
    clients.insert(settings.clone(), Arc::downgrade(&client));
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_matches() {
        assert!(topic_matches("a/b", "a/b"));
        assert!(!topic_matches("a/b", "a/c"));
        assert!(topic_matches("a/+/c", "a/b/c"));
        assert!(!topic_matches("a/+", "a/b/c"));
        assert!(topic_matches("a/#", "a/b/c"));
        assert!(topic_matches("#", "x"));
        assert!(!topic_matches("a/b/c", "a/b"));
    }

    #[test]
    fn test_parse_broker() {
        assert_eq!(
            parse_broker("localhost").unwrap(),
            ("localhost".to_string(), 1883, false)
        );
        assert_eq!(
            parse_broker("tls://broker:8883").unwrap(),
            ("broker".to_string(), 8883, true)
        );
        assert_eq!(
            parse_broker("tcp://10.0.0.1:1884").unwrap(),
            ("10.0.0.1".to_string(), 1884, false)
        );
        assert!(parse_broker("").is_err());
        assert!(parse_broker("tls://").is_err());
    }

    #[test]
    fn test_client_id() {
        assert!(client_id().starts_with("hestia-"));
    }

    #[test]
    fn test_callbacks_fan_out() {
        let shared = Shared::default();
        let hits = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        for filter in ["a/b", "a/+", "c"] {
            let hits = hits.clone();
            shared
                .listeners
                .lock()
                .unwrap()
                .entry(filter.to_string())
                .or_default()
                .push(Arc::new(move |_| {
                    hits.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                }));
        }
        for cb in shared.callbacks("a/b") {
            cb("1".into());
        }
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    async fn connect(broker: &broker::Broker) -> Arc<Client> {
        let settings = MqttSettings {
            broker: broker.addr().to_string(),
            ..Default::default()
        };
        Client::connect(&settings).await.unwrap()
    }

    async fn eventually<F: Fn() -> bool>(cond: F) -> bool {
        for _ in 0..100 {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_listen_resubscribes_after_reconnect() {
        let broker = broker::Broker::start().await;
        let client = connect(&broker).await;

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        client
            .listen("meter/power", move |p| {
                let _ = tx.send(p);
            })
            .await
            .unwrap();

        broker.publish("meter/power", "1500");
        assert_eq!(rx.recv().await.unwrap(), "1500");

        broker.disconnect_all();
        assert!(eventually(|| broker.connects() == 2 && broker.subscribers("meter/power") == 1).await);

        broker.publish("meter/power", "1600");
        let v = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
        assert_eq!(v.unwrap().unwrap(), "1600");
    }

    #[tokio::test]
    async fn test_rejected_subscription_detaches_listener() {
        let broker = broker::Broker::start().await;
        let client = connect(&broker).await;

        let err = client.listen("denied/topic", |_| {}).await.unwrap_err();
        assert!(err.to_string().contains("rejected"));
        assert_eq!(client.listeners("denied/topic"), 0);

        client.listen("meter/power", |_| {}).await.unwrap();
        client.listen("meter/power", |_| {}).await.unwrap();
        assert_eq!(client.listeners("meter/power"), 2);
    }

    #[tokio::test]
    async fn test_listen_setter_clears_retained_request() {
        let broker = broker::Broker::start().await;
        let client = connect(&broker).await;

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        client
            .listen_setter("wallbox/current", move |p| {
                let _ = tx.send(p);
                Ok(())
            })
            .await
            .unwrap();

        broker.publish("wallbox/current/set", "16");
        assert_eq!(rx.recv().await.unwrap(), "16");

        let cleared = broker::Published {
            topic: "wallbox/current/set".into(),
            payload: String::new(),
            retained: true,
        };
        assert!(eventually(|| broker.published().contains(&cleared)).await);
    }
}
