//! Minimal in-process MQTT 3.1.1 broker for tests
//!
//! Supports CONNECT, SUBSCRIBE (with retained delivery), PUBLISH at QoS 0/1,
//! UNSUBSCRIBE and PINGREQ. Filters starting with `denied` are refused.

use super::topic_matches;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub topic: String,
    pub payload: String,
    pub retained: bool,
}

struct Subscription {
    conn: usize,
    filter: String,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

#[derive(Default)]
struct State {
    next_conn: usize,
    connects: usize,
    subscriptions: Vec<Subscription>,
    retained: HashMap<String, String>,
    published: Vec<Published>,
    kick: CancellationToken,
}

#[derive(Clone)]
pub struct Broker {
    addr: String,
    state: Arc<Mutex<State>>,
}

impl Broker {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let state = Arc::new(Mutex::new(State::default()));

        let st = state.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let (conn, kick) = {
                    let mut s = st.lock().unwrap();
                    s.next_conn += 1;
                    (s.next_conn, s.kick.clone())
                };
                tokio::spawn(serve(stream, conn, kick, st.clone()));
            }
        });

        Self { addr, state }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Publish from the broker side to all matching subscribers
    pub fn publish(&self, topic: &str, payload: &str) {
        let packet = publish_packet(topic, payload.as_bytes());
        let s = self.state.lock().unwrap();
        for sub in s.subscriptions.iter().filter(|s| topic_matches(&s.filter, topic)) {
            let _ = sub.tx.send(packet.clone());
        }
    }

    /// Messages received from clients
    pub fn published(&self) -> Vec<Published> {
        self.state.lock().unwrap().published.clone()
    }

    pub fn retained(&self, topic: &str) -> Option<String> {
        self.state.lock().unwrap().retained.get(topic).cloned()
    }

    pub fn subscribers(&self, filter: &str) -> usize {
        let s = self.state.lock().unwrap();
        s.subscriptions.iter().filter(|s| s.filter == filter).count()
    }

    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    /// Drop every open client connection
    pub fn disconnect_all(&self) {
        let mut s = self.state.lock().unwrap();
        s.kick.cancel();
        s.kick = CancellationToken::new();
    }
}

fn remaining_length(mut n: usize, out: &mut Vec<u8>) {
    loop {
        let mut b = (n % 128) as u8;
        n /= 128;
        if n > 0 {
            b |= 0x80;
        }
        out.push(b);
        if n == 0 {
            return;
        }
    }
}

fn packet(header: u8, body: &[u8]) -> Vec<u8> {
    let mut out = vec![header];
    remaining_length(body.len(), &mut out);
    out.extend_from_slice(body);
    out
}

fn publish_packet(topic: &str, payload: &[u8]) -> Vec<u8> {
    let mut body = (topic.len() as u16).to_be_bytes().to_vec();
    body.extend_from_slice(topic.as_bytes());
    body.extend_from_slice(payload);
    packet(0x30, &body)
}

async fn read_packet<R: AsyncRead + Unpin>(r: &mut R) -> Option<(u8, Vec<u8>)> {
    let header = r.read_u8().await.ok()?;
    let (mut len, mut shift) = (0usize, 0);
    loop {
        let b = r.read_u8().await.ok()?;
        len |= usize::from(b & 0x7F) << shift;
        if b & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    let mut body = vec![0; len];
    r.read_exact(&mut body).await.ok()?;
    Some((header, body))
}

fn string_at(b: &[u8], at: usize) -> (String, usize) {
    let n = usize::from(u16::from_be_bytes([b[at], b[at + 1]]));
    let s = String::from_utf8_lossy(&b[at + 2..at + 2 + n]).into_owned();
    (s, at + 2 + n)
}

async fn serve(
    stream: tokio::net::TcpStream,
    conn: usize,
    kick: CancellationToken,
    state: Arc<Mutex<State>>,
) {
    let (mut rd, mut wr) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();

    let writer = tokio::spawn(async move {
        while let Some(p) = rx.recv().await {
            if wr.write_all(&p).await.is_err() {
                return;
            }
        }
    });

    loop {
        let next = tokio::select! {
            _ = kick.cancelled() => None,
            p = read_packet(&mut rd) => p,
        };
        let Some((header, body)) = next else { break };

        match header >> 4 {
            // CONNECT
            1 => {
                state.lock().unwrap().connects += 1;
                let _ = tx.send(vec![0x20, 0x02, 0x00, 0x00]);
            }
            // PUBLISH
            3 => {
                let retained = header & 0x01 != 0;
                let qos = (header >> 1) & 0x03;
                let (topic, mut at) = string_at(&body, 0);
                if qos > 0 {
                    let _ = tx.send(vec![0x40, 0x02, body[at], body[at + 1]]);
                    at += 2;
                }
                let payload = String::from_utf8_lossy(&body[at..]).into_owned();

                let mut s = state.lock().unwrap();
                if retained {
                    if payload.is_empty() {
                        s.retained.remove(&topic);
                    } else {
                        s.retained.insert(topic.clone(), payload.clone());
                    }
                }
                let fwd = publish_packet(&topic, payload.as_bytes());
                for sub in s.subscriptions.iter().filter(|s| topic_matches(&s.filter, &topic)) {
                    let _ = sub.tx.send(fwd.clone());
                }
                s.published.push(Published {
                    topic,
                    payload,
                    retained,
                });
            }
            // SUBSCRIBE
            8 => {
                let mut codes = Vec::new();
                let mut retained = Vec::new();
                let mut at = 2;
                let mut s = state.lock().unwrap();
                while at < body.len() {
                    let (filter, next) = string_at(&body, at);
                    at = next + 1;
                    if filter.starts_with("denied") {
                        codes.push(0x80);
                        continue;
                    }
                    codes.push(0x00);
                    for (topic, payload) in &s.retained {
                        if topic_matches(&filter, topic) {
                            retained.push(publish_packet(topic, payload.as_bytes()));
                        }
                    }
                    s.subscriptions.push(Subscription {
                        conn,
                        filter,
                        tx: tx.clone(),
                    });
                }
                drop(s);

                let mut ack = body[..2].to_vec();
                ack.extend(codes);
                let _ = tx.send(packet(0x90, &ack));
                for p in retained {
                    let _ = tx.send(p);
                }
            }
            // UNSUBSCRIBE
            10 => {
                let (filter, _) = string_at(&body, 2);
                state
                    .lock()
                    .unwrap()
                    .subscriptions
                    .retain(|s| !(s.conn == conn && s.filter == filter));
                let _ = tx.send(vec![0xB0, 0x02, body[0], body[1]]);
            }
            // PINGREQ
            12 => {
                let _ = tx.send(vec![0xD0, 0x00]);
            }
            // DISCONNECT
            14 => break,
            _ => {}
        }
    }

    state
        .lock()
        .unwrap()
        .subscriptions
        .retain(|s| s.conn != conn);
    writer.abort();
}
