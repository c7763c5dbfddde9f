//! Minimal SNMP client
//!
//! Encodes and decodes messages in BER and exchanges them over UDP. v1/v2c
//! use community strings, v3 the user-based security model in [`usm`]. Only
//! GET is issued by the client; response PDUs and the codec are public so
//! test agents can be built from the same pieces.

pub mod usm;

use crate::error::{HestiaError, Result};
use std::fmt;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::time::Instant;
use usm::{Keys, REPORTABLE_FLAG, ScopedData, ScopedPdu, SecurityParameters, User, V3Message};

const INTEGER: u8 = 0x02;
const OCTET_STRING: u8 = 0x04;
const NULL: u8 = 0x05;
const OBJECT_IDENTIFIER: u8 = 0x06;
const SEQUENCE: u8 = 0x30;
const IP_ADDRESS: u8 = 0x40;
const COUNTER32: u8 = 0x41;
const GAUGE32: u8 = 0x42;
const TIMETICKS: u8 = 0x43;
const COUNTER64: u8 = 0x46;
const NO_SUCH_OBJECT: u8 = 0x80;
const NO_SUCH_INSTANCE: u8 = 0x81;
const END_OF_MIB_VIEW: u8 = 0x82;

/// PDU tags
pub const GET_REQUEST: u8 = 0xA0;
pub const GET_RESPONSE: u8 = 0xA2;
pub const REPORT: u8 = 0xA8;

const MAX_DATAGRAM: usize = 65_507;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    V1,
    V2c,
}

impl Version {
    fn wire(self) -> i64 {
        match self {
            Version::V1 => 0,
            Version::V2c => 1,
        }
    }

    fn from_wire(v: i64) -> Result<Self> {
        match v {
            0 => Ok(Version::V1),
            1 => Ok(Version::V2c),
            other => Err(HestiaError::snmp(format!("unsupported version: {}", other))),
        }
    }
}

/// Variable binding value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    OctetString(Vec<u8>),
    Null,
    ObjectIdentifier(Vec<u32>),
    IpAddress([u8; 4]),
    Counter32(u32),
    Gauge32(u32),
    TimeTicks(u32),
    Counter64(u64),
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
}

impl Value {
    /// Textual form: octet strings as text, number types in decimal
    pub fn to_text(&self) -> Result<String> {
        match self {
            Value::Integer(v) => Ok(v.to_string()),
            Value::OctetString(b) => Ok(String::from_utf8_lossy(b).trim().to_string()),
            Value::Counter32(v) | Value::Gauge32(v) | Value::TimeTicks(v) => Ok(v.to_string()),
            Value::Counter64(v) => Ok(v.to_string()),
            Value::IpAddress(ip) => Ok(format!("{}.{}.{}.{}", ip[0], ip[1], ip[2], ip[3])),
            Value::ObjectIdentifier(oid) => Ok(format_oid(oid)),
            Value::Null => Err(HestiaError::snmp("null value")),
            Value::NoSuchObject => Err(HestiaError::snmp("no such object")),
            Value::NoSuchInstance => Err(HestiaError::snmp("no such instance")),
            Value::EndOfMibView => Err(HestiaError::snmp("end of mib view")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pdu {
    pub kind: u8,
    pub request_id: i32,
    pub error_status: i64,
    pub error_index: i64,
    pub varbinds: Vec<(Vec<u32>, Value)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub version: Version,
    pub community: Vec<u8>,
    pub pdu: Pdu,
}

/// Parse a dotted OID, with or without leading dot
pub fn parse_oid(s: &str) -> Result<Vec<u32>> {
    let trimmed = s.trim().trim_start_matches('.');
    let oid = trimmed
        .split('.')
        .map(|p| p.parse::<u32>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| HestiaError::config(format!("invalid oid: {}", s)))?;
    if oid.len() < 2 || oid[0] > 2 || (oid[0] < 2 && oid[1] >= 40) {
        return Err(HestiaError::config(format!("invalid oid: {}", s)));
    }
    Ok(oid)
}

pub fn format_oid(oid: &[u32]) -> String {
    oid.iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(".")
}

// encoding

fn push_length(out: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes = len.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        out.push(0x80 | (bytes.len() - skip) as u8);
        out.extend_from_slice(&bytes[skip..]);
    }
}

fn tlv(out: &mut Vec<u8>, tag: u8, body: &[u8]) {
    out.push(tag);
    push_length(out, body.len());
    out.extend_from_slice(body);
}

fn integer_body(v: i64) -> Vec<u8> {
    let bytes = v.to_be_bytes();
    let mut start = 0;
    // strip redundant sign bytes
    while start < 7 {
        let (b, next) = (bytes[start], bytes[start + 1]);
        if (b == 0x00 && next & 0x80 == 0) || (b == 0xFF && next & 0x80 != 0) {
            start += 1;
        } else {
            break;
        }
    }
    bytes[start..].to_vec()
}

fn unsigned_body(v: u64) -> Vec<u8> {
    let bytes = v.to_be_bytes();
    let skip = bytes.iter().take(7).take_while(|b| **b == 0).count();
    let mut body = bytes[skip..].to_vec();
    if body[0] & 0x80 != 0 {
        body.insert(0, 0);
    }
    body
}

fn oid_body(oid: &[u32]) -> Vec<u8> {
    let mut out = Vec::new();
    let (first, rest) = match oid {
        [a, b, rest @ ..] => (a * 40 + b, rest),
        [a] => (a * 40, &[][..]),
        [] => (0, &[][..]),
    };
    for arc in std::iter::once(&first).chain(rest) {
        let mut chunk = vec![(arc & 0x7F) as u8];
        let mut v = arc >> 7;
        while v > 0 {
            chunk.push(0x80 | (v & 0x7F) as u8);
            v >>= 7;
        }
        chunk.reverse();
        out.extend(chunk);
    }
    out
}

fn encode_value(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Integer(v) => tlv(out, INTEGER, &integer_body(*v)),
        Value::OctetString(b) => tlv(out, OCTET_STRING, b),
        Value::Null => tlv(out, NULL, &[]),
        Value::ObjectIdentifier(oid) => tlv(out, OBJECT_IDENTIFIER, &oid_body(oid)),
        Value::IpAddress(ip) => tlv(out, IP_ADDRESS, ip),
        Value::Counter32(v) => tlv(out, COUNTER32, &unsigned_body(u64::from(*v))),
        Value::Gauge32(v) => tlv(out, GAUGE32, &unsigned_body(u64::from(*v))),
        Value::TimeTicks(v) => tlv(out, TIMETICKS, &unsigned_body(u64::from(*v))),
        Value::Counter64(v) => tlv(out, COUNTER64, &unsigned_body(*v)),
        Value::NoSuchObject => tlv(out, NO_SUCH_OBJECT, &[]),
        Value::NoSuchInstance => tlv(out, NO_SUCH_INSTANCE, &[]),
        Value::EndOfMibView => tlv(out, END_OF_MIB_VIEW, &[]),
    }
}

impl Pdu {
    /// GET request for `oids`
    pub fn get(request_id: i32, oids: &[Vec<u32>]) -> Self {
        Pdu {
            kind: GET_REQUEST,
            request_id,
            error_status: 0,
            error_index: 0,
            varbinds: oids.iter().map(|o| (o.clone(), Value::Null)).collect(),
        }
    }
}

impl Message {
    /// GET request for `oids`
    pub fn get(version: Version, community: &str, request_id: i32, oids: &[Vec<u32>]) -> Self {
        Message {
            version,
            community: community.as_bytes().to_vec(),
            pdu: Pdu::get(request_id, oids),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut msg = Vec::new();
        tlv(&mut msg, INTEGER, &integer_body(self.version.wire()));
        tlv(&mut msg, OCTET_STRING, &self.community);
        msg.extend(encode_pdu(&self.pdu));

        let mut out = Vec::new();
        tlv(&mut out, SEQUENCE, &msg);
        out
    }

    pub fn decode(b: &[u8]) -> Result<Self> {
        let mut outer = Reader::new(b);
        let mut msg = Reader::new(outer.expect(SEQUENCE)?);

        let version = Version::from_wire(decode_integer(msg.expect(INTEGER)?)?)?;
        let community = msg.expect(OCTET_STRING)?.to_vec();

        let (kind, body) = msg.next()?;
        Ok(Message {
            version,
            community,
            pdu: decode_pdu(kind, body)?,
        })
    }
}

fn encode_pdu(pdu: &Pdu) -> Vec<u8> {
    let mut varbinds = Vec::new();
    for (oid, value) in &pdu.varbinds {
        let mut vb = Vec::new();
        tlv(&mut vb, OBJECT_IDENTIFIER, &oid_body(oid));
        encode_value(&mut vb, value);
        tlv(&mut varbinds, SEQUENCE, &vb);
    }

    let mut body = Vec::new();
    tlv(&mut body, INTEGER, &integer_body(i64::from(pdu.request_id)));
    tlv(&mut body, INTEGER, &integer_body(pdu.error_status));
    tlv(&mut body, INTEGER, &integer_body(pdu.error_index));
    tlv(&mut body, SEQUENCE, &varbinds);

    let mut out = Vec::new();
    tlv(&mut out, pdu.kind, &body);
    out
}

fn decode_pdu(kind: u8, body: &[u8]) -> Result<Pdu> {
    if kind & 0xE0 != 0xA0 {
        return Err(HestiaError::snmp(format!("unexpected pdu type: {:#x}", kind)));
    }
    let mut pdu = Reader::new(body);
    let request_id = decode_integer(pdu.expect(INTEGER)?)?;
    let error_status = decode_integer(pdu.expect(INTEGER)?)?;
    let error_index = decode_integer(pdu.expect(INTEGER)?)?;

    let mut list = Reader::new(pdu.expect(SEQUENCE)?);
    let mut varbinds = Vec::new();
    while !list.is_empty() {
        let mut vb = Reader::new(list.expect(SEQUENCE)?);
        let oid = decode_oid(vb.expect(OBJECT_IDENTIFIER)?)?;
        let (tag, body) = vb.next()?;
        varbinds.push((oid, decode_value(tag, body)?));
    }

    Ok(Pdu {
        kind,
        request_id: i32::try_from(request_id)
            .map_err(|_| HestiaError::snmp("request id out of range"))?,
        error_status,
        error_index,
        varbinds,
    })
}

// decoding

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() < n {
            return Err(HestiaError::snmp("truncated message"));
        }
        let (head, rest) = self.buf.split_at(n);
        self.buf = rest;
        Ok(head)
    }

    fn next(&mut self) -> Result<(u8, &'a [u8])> {
        let tag = self.take(1)?[0];
        if tag & 0x1F == 0x1F {
            return Err(HestiaError::snmp("unsupported tag"));
        }
        let first = self.take(1)?[0];
        let len = if first & 0x80 == 0 {
            usize::from(first)
        } else {
            let n = usize::from(first & 0x7F);
            if n == 0 || n > 4 {
                return Err(HestiaError::snmp("invalid length"));
            }
            self.take(n)?
                .iter()
                .fold(0usize, |acc, b| (acc << 8) | usize::from(*b))
        };
        Ok((tag, self.take(len)?))
    }

    fn expect(&mut self, tag: u8) -> Result<&'a [u8]> {
        let (got, body) = self.next()?;
        if got != tag {
            return Err(HestiaError::snmp(format!(
                "expected tag {:#x}, got {:#x}",
                tag, got
            )));
        }
        Ok(body)
    }
}

fn decode_integer(b: &[u8]) -> Result<i64> {
    if b.is_empty() || b.len() > 8 {
        return Err(HestiaError::snmp("invalid integer"));
    }
    let init: i64 = if b[0] & 0x80 != 0 { -1 } else { 0 };
    Ok(b.iter().fold(init, |acc, x| (acc << 8) | i64::from(*x)))
}

fn decode_unsigned(b: &[u8]) -> Result<u64> {
    let b = match b {
        [0, rest @ ..] if !rest.is_empty() => rest,
        b => b,
    };
    if b.is_empty() || b.len() > 8 {
        return Err(HestiaError::snmp("invalid unsigned"));
    }
    Ok(b.iter().fold(0u64, |acc, x| (acc << 8) | u64::from(*x)))
}

fn decode_oid(b: &[u8]) -> Result<Vec<u32>> {
    let mut arcs = Vec::new();
    let mut v: u32 = 0;
    for (i, byte) in b.iter().enumerate() {
        v = v
            .checked_mul(128)
            .ok_or_else(|| HestiaError::snmp("oid arc overflow"))?
            | u32::from(byte & 0x7F);
        if byte & 0x80 == 0 {
            if arcs.is_empty() {
                let first = (v / 40).min(2);
                arcs.push(first);
                arcs.push(v - first * 40);
            } else {
                arcs.push(v);
            }
            v = 0;
        } else if i == b.len() - 1 {
            return Err(HestiaError::snmp("truncated oid"));
        }
    }
    if arcs.is_empty() {
        return Err(HestiaError::snmp("empty oid"));
    }
    Ok(arcs)
}

fn decode_value(tag: u8, b: &[u8]) -> Result<Value> {
    let u32_of = |b: &[u8]| -> Result<u32> {
        u32::try_from(decode_unsigned(b)?).map_err(|_| HestiaError::snmp("value out of range"))
    };
    Ok(match tag {
        INTEGER => Value::Integer(decode_integer(b)?),
        OCTET_STRING => Value::OctetString(b.to_vec()),
        NULL => Value::Null,
        OBJECT_IDENTIFIER => Value::ObjectIdentifier(decode_oid(b)?),
        IP_ADDRESS => {
            let ip: [u8; 4] = b
                .try_into()
                .map_err(|_| HestiaError::snmp("invalid ip address"))?;
            Value::IpAddress(ip)
        }
        COUNTER32 => Value::Counter32(u32_of(b)?),
        GAUGE32 => Value::Gauge32(u32_of(b)?),
        TIMETICKS => Value::TimeTicks(u32_of(b)?),
        COUNTER64 => Value::Counter64(decode_unsigned(b)?),
        NO_SUCH_OBJECT => Value::NoSuchObject,
        NO_SUCH_INSTANCE => Value::NoSuchInstance,
        END_OF_MIB_VIEW => Value::EndOfMibView,
        other => return Err(HestiaError::snmp(format!("unsupported type: {:#x}", other))),
    })
}

/// usmStatsNotInTimeWindows
const NOT_IN_TIME_WINDOW: &[u32] = &[1, 3, 6, 1, 6, 3, 15, 1, 1, 2, 0];
/// usmStatsUnknownEngineIDs
const UNKNOWN_ENGINE_ID: &[u32] = &[1, 3, 6, 1, 6, 3, 15, 1, 1, 4, 0];

/// Credentials a [`Client`] sends with each request
#[derive(Debug, Clone)]
pub enum Security {
    Community { version: Version, community: String },
    Usm(User),
}

/// Authoritative engine learned by discovery
#[derive(Clone)]
struct Engine {
    id: Vec<u8>,
    boots: u32,
    time: u32,
    at: Instant,
    keys: Keys,
}

impl Engine {
    fn time(&self) -> u32 {
        let elapsed = u32::try_from(self.at.elapsed().as_secs()).unwrap_or(u32::MAX);
        self.time.saturating_add(elapsed)
    }
}

/// UDP client issuing GET requests
pub struct Client {
    socket: Mutex<UdpSocket>,
    security: Security,
    timeout: Duration,
    next_id: AtomicI32,
    salt: AtomicU64,
    engine: StdMutex<Option<Engine>>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("security", &self.security)
            .finish()
    }
}

fn poisoned<T>(_: T) -> HestiaError {
    HestiaError::snmp("engine state poisoned")
}

impl Client {
    pub async fn connect(addr: &str, security: Security, timeout: Duration) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(addr).await?;
        Ok(Self {
            socket: Mutex::new(socket),
            security,
            timeout,
            next_id: AtomicI32::new(rand::random::<u16>().into()),
            salt: AtomicU64::new(rand::random()),
            engine: StdMutex::new(None),
        })
    }

    /// GET `oids`, returning the bound values in response order
    pub async fn get(&self, oids: &[Vec<u32>]) -> Result<Vec<(Vec<u32>, Value)>> {
        let pdu = match &self.security {
            Security::Community { version, community } => {
                self.get_community(*version, community, oids).await?
            }
            Security::Usm(user) => self.get_usm(user, oids).await?,
        };

        if pdu.error_status != 0 {
            return Err(HestiaError::snmp(format!(
                "error status {} at index {}",
                pdu.error_status, pdu.error_index
            )));
        }
        Ok(pdu.varbinds)
    }

    fn request_id(&self) -> i32 {
        self.next_id.fetch_add(1, Ordering::Relaxed) & 0x7FFF_FFFF
    }

    /// Send `request` and wait for the first datagram `accept` claims
    async fn exchange<T, F>(&self, request: &[u8], accept: F) -> Result<T>
    where
        F: Fn(&[u8]) -> Option<Result<T>>,
    {
        let socket = self.socket.lock().await;
        socket.send(request).await?;

        let mut buf = vec![0u8; MAX_DATAGRAM];
        tokio::time::timeout(self.timeout, async {
            loop {
                let n = socket.recv(&mut buf).await?;
                // stale answers to earlier, timed out requests are skipped
                if let Some(res) = accept(&buf[..n]) {
                    return res;
                }
            }
        })
        .await
        .map_err(|_| HestiaError::timeout("snmp request timeout"))?
    }

    async fn get_community(
        &self,
        version: Version,
        community: &str,
        oids: &[Vec<u32>],
    ) -> Result<Pdu> {
        let id = self.request_id();
        let request = Message::get(version, community, id, oids).encode();
        let response = self
            .exchange(&request, |raw| match Message::decode(raw) {
                Ok(msg) if msg.pdu.request_id == id => Some(Ok(msg)),
                _ => None,
            })
            .await?;
        Ok(response.pdu)
    }

    async fn get_usm(&self, user: &User, oids: &[Vec<u32>]) -> Result<Pdu> {
        let mut resynced = false;
        loop {
            let known = self.engine.lock().map_err(poisoned)?.clone();
            let engine = match known {
                Some(engine) => engine,
                None => self.discover(user).await?,
            };

            let id = self.request_id();
            let request = V3Message {
                msg_id: id,
                max_size: MAX_DATAGRAM as i32,
                flags: user.flags() | REPORTABLE_FLAG,
                security: SecurityParameters {
                    engine_id: engine.id.clone(),
                    engine_boots: engine.boots,
                    engine_time: engine.time(),
                    user: user.name().as_bytes().to_vec(),
                    ..Default::default()
                },
                data: ScopedData::Plain(ScopedPdu {
                    context_engine_id: engine.id.clone(),
                    context_name: Vec::new(),
                    pdu: Pdu::get(id, oids),
                }),
            };
            let raw = engine
                .keys
                .seal(request, self.salt.fetch_add(1, Ordering::Relaxed))?;

            let response = self
                .exchange(&raw, |raw| match V3Message::decode(raw) {
                    Ok(msg) if msg.msg_id == id => Some(engine.keys.open(raw)),
                    _ => None,
                })
                .await?;

            let flags = response.flags;
            let security = response.security;
            let ScopedData::Plain(scoped) = response.data else {
                return Err(HestiaError::snmp("scoped pdu is encrypted"));
            };

            if scoped.pdu.kind == REPORT {
                let oid = scoped
                    .pdu
                    .varbinds
                    .first()
                    .map(|(oid, _)| oid.clone())
                    .unwrap_or_default();
                let stale = oid == NOT_IN_TIME_WINDOW || oid == UNKNOWN_ENGINE_ID;
                if stale && !resynced && !security.engine_id.is_empty() {
                    resynced = true;
                    self.learn(user, &security)?;
                    continue;
                }
                return Err(HestiaError::snmp(format!("report: {}", format_oid(&oid))));
            }

            if engine.keys.authenticated() && flags & usm::AUTH_FLAG == 0 {
                return Err(HestiaError::snmp("unauthenticated response"));
            }
            return Ok(scoped.pdu);
        }
    }

    /// Ask the agent for its engine id, boots and time
    async fn discover(&self, user: &User) -> Result<Engine> {
        let id = self.request_id();
        let request = V3Message {
            msg_id: id,
            max_size: MAX_DATAGRAM as i32,
            flags: REPORTABLE_FLAG,
            security: SecurityParameters::default(),
            data: ScopedData::Plain(ScopedPdu {
                context_engine_id: Vec::new(),
                context_name: Vec::new(),
                pdu: Pdu::get(id, &[]),
            }),
        };

        let response = self
            .exchange(&request.encode(), |raw| match V3Message::decode(raw) {
                Ok(msg) if msg.msg_id == id => Some(Ok(msg)),
                _ => None,
            })
            .await?;
        if response.security.engine_id.is_empty() {
            return Err(HestiaError::snmp("engine discovery failed"));
        }
        self.learn(user, &response.security)
    }

    fn learn(&self, user: &User, security: &SecurityParameters) -> Result<Engine> {
        let mut known = self.engine.lock().map_err(poisoned)?;
        let keys = match known.as_ref() {
            Some(e) if e.id == security.engine_id => e.keys.clone(),
            _ => user.localize(&security.engine_id),
        };
        let engine = Engine {
            id: security.engine_id.clone(),
            boots: security.engine_boots,
            time: security.engine_time,
            at: Instant::now(),
            keys,
        };
        *known = Some(engine.clone());
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_encoding() {
        assert_eq!(integer_body(0), vec![0x00]);
        assert_eq!(integer_body(127), vec![0x7F]);
        assert_eq!(integer_body(128), vec![0x00, 0x80]);
        assert_eq!(integer_body(-1), vec![0xFF]);
        assert_eq!(integer_body(-129), vec![0xFF, 0x7F]);
        for v in [0, 1, -1, 255, -32768, i64::from(i32::MAX), i64::MIN] {
            assert_eq!(decode_integer(&integer_body(v)).unwrap(), v);
        }
    }

    #[test]
    fn test_oid_encoding() {
        let oid = parse_oid(".1.3.6.1.2.1.1.3.0").unwrap();
        assert_eq!(oid_body(&oid), vec![0x2B, 6, 1, 2, 1, 1, 3, 0]);

        let oid = parse_oid("1.3.6.1.4.1.311.21").unwrap();
        assert_eq!(decode_oid(&oid_body(&oid)).unwrap(), oid);

        assert!(parse_oid("").is_err());
        assert!(parse_oid("1.x").is_err());
        assert!(parse_oid("3.1").is_err());
    }

    #[test]
    fn test_get_request_bytes() {
        let msg = Message::get(Version::V2c, "public", 1, &[parse_oid("1.3.6.1").unwrap()]);
        assert_eq!(
            msg.encode(),
            vec![
                0x30, 0x21, 0x02, 0x01, 0x01, 0x04, 0x06, b'p', b'u', b'b', b'l', b'i', b'c',
                0xA0, 0x14, 0x02, 0x01, 0x01, 0x02, 0x01, 0x00, 0x02, 0x01, 0x00, 0x30, 0x09,
                0x30, 0x07, 0x06, 0x03, 0x2B, 0x06, 0x01, 0x05, 0x00,
            ][..]
        );
    }

    #[test]
    fn test_response_decoding() {
        let mut msg = Message::get(Version::V1, "private", 42, &[parse_oid("1.3.6.1").unwrap()]);
        msg.pdu.kind = GET_RESPONSE;
        msg.pdu.varbinds[0].1 = Value::Gauge32(0x8000_0000);

        let decoded = Message::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.pdu.varbinds[0].1.to_text().unwrap(), "2147483648");
    }

    #[test]
    fn test_long_length() {
        let long = vec![b'x'; 300];
        let mut out = Vec::new();
        tlv(&mut out, OCTET_STRING, &long);
        assert_eq!(&out[..4], &[0x04, 0x82, 0x01, 0x2C]);

        let mut r = Reader::new(&out);
        assert_eq!(r.expect(OCTET_STRING).unwrap().len(), 300);
    }

    #[test]
    fn test_truncated_input() {
        assert!(Message::decode(&[0x30, 0x10, 0x02]).is_err());
        assert!(Message::decode(&[]).is_err());
    }

    #[test]
    fn test_value_text() {
        assert_eq!(
            Value::OctetString(b"567.8".to_vec()).to_text().unwrap(),
            "567.8"
        );
        assert_eq!(Value::Integer(-5).to_text().unwrap(), "-5");
        assert!(Value::NoSuchObject.to_text().is_err());
    }
}
