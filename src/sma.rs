//! SMA Speedwire energy meter listener
//!
//! Energy meters and home managers multicast a telegram per second. One
//! process-wide listener decodes them and keeps the latest telegram per
//! source address and per serial number.

use crate::error::{HestiaError, Result};
use crate::logging::get_logger;
use crate::util::Monitor;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;

pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 12, 255, 254);
pub const PORT: u16 = 9522;

const HEADER: &[u8; 4] = b"SMA\0";
const PROTOCOL_EMETER: u16 = 0x6069;
const DATA_START: usize = 28;

/// Telegram freshness; meters send every second
pub const TIMEOUT: Duration = Duration::from_secs(10);

/// Measurement selectable per plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Measurement {
    Power,
    ImportPower,
    ExportPower,
    Energy,
    ExportEnergy,
    Current(u8),
    Voltage(u8),
    PhasePower(u8),
    Frequency,
}

impl FromStr for Measurement {
    type Err = HestiaError;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.to_lowercase();
        let phase = |prefix: &str| {
            lower
                .strip_prefix(prefix)
                .and_then(|p| p.parse::<u8>().ok())
                .filter(|p| (1..=3).contains(p))
        };
        Ok(match lower.as_str() {
            "power" => Measurement::Power,
            "importpower" => Measurement::ImportPower,
            "exportpower" => Measurement::ExportPower,
            "energy" => Measurement::Energy,
            "exportenergy" => Measurement::ExportEnergy,
            "frequency" => Measurement::Frequency,
            _ => {
                if let Some(p) = phase("currentl") {
                    Measurement::Current(p)
                } else if let Some(p) = phase("voltagel") {
                    Measurement::Voltage(p)
                } else if let Some(p) = phase("powerl") {
                    Measurement::PhasePower(p)
                } else {
                    return Err(HestiaError::config(format!("invalid value: {}", s)));
                }
            }
        })
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Measurement::Current(p) => write!(f, "currentl{}", p),
            Measurement::Voltage(p) => write!(f, "voltagel{}", p),
            Measurement::PhasePower(p) => write!(f, "powerl{}", p),
            other => write!(f, "{}", format!("{:?}", other).to_lowercase()),
        }
    }
}

/// OBIS channel index and measurement type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Obis {
    pub index: u8,
    pub kind: u8,
}

const ACTUAL: u8 = 4;
const COUNTER: u8 = 8;

/// A decoded meter telegram
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Telegram {
    pub susy_id: u16,
    pub serial: u32,
    pub ticker: u32,
    pub values: HashMap<Obis, u64>,
}

impl Telegram {
    fn raw(&self, index: u8, kind: u8) -> f64 {
        self.values
            .get(&Obis { index, kind })
            .copied()
            .unwrap_or_default() as f64
    }

    // active power of an L channel pair in W; positive is import
    fn power_of(&self, import: u8, export: u8) -> f64 {
        (self.raw(import, ACTUAL) - self.raw(export, ACTUAL)) / 10.0
    }

    /// Value in W, kWh, A, V or Hz; `None` if the meter did not report it
    pub fn value(&self, m: Measurement) -> Option<f64> {
        let has = |index: u8, kind: u8| self.values.contains_key(&Obis { index, kind });
        let phase_base = |p: u8| 20 * p;

        match m {
            Measurement::Power => has(1, ACTUAL).then(|| self.power_of(1, 2)),
            Measurement::ImportPower => has(1, ACTUAL).then(|| self.raw(1, ACTUAL) / 10.0),
            Measurement::ExportPower => has(2, ACTUAL).then(|| self.raw(2, ACTUAL) / 10.0),
            Measurement::Energy => has(1, COUNTER).then(|| self.raw(1, COUNTER) / 3_600_000.0),
            Measurement::ExportEnergy => {
                has(2, COUNTER).then(|| self.raw(2, COUNTER) / 3_600_000.0)
            }
            Measurement::PhasePower(p) => {
                let b = phase_base(p);
                has(b + 1, ACTUAL).then(|| self.power_of(b + 1, b + 2))
            }
            Measurement::Current(p) => {
                let b = phase_base(p);
                // current follows the direction of the phase power
                has(b + 11, ACTUAL).then(|| {
                    let sign = if self.power_of(b + 1, b + 2) < 0.0 { -1.0 } else { 1.0 };
                    sign * self.raw(b + 11, ACTUAL) / 1000.0
                })
            }
            Measurement::Voltage(p) => {
                let b = phase_base(p);
                has(b + 12, ACTUAL).then(|| self.raw(b + 12, ACTUAL) / 1000.0)
            }
            Measurement::Frequency => has(14, ACTUAL).then(|| self.raw(14, ACTUAL) / 1000.0),
        }
    }
}

fn be16(b: &[u8], at: usize) -> Result<u16> {
    b.get(at..at + 2)
        .map(|s| u16::from_be_bytes([s[0], s[1]]))
        .ok_or_else(|| HestiaError::invalid("truncated telegram"))
}

fn be32(b: &[u8], at: usize) -> Result<u32> {
    b.get(at..at + 4)
        .map(|s| u32::from_be_bytes([s[0], s[1], s[2], s[3]]))
        .ok_or_else(|| HestiaError::invalid("truncated telegram"))
}

/// Decode an energy meter datagram
pub fn parse(b: &[u8]) -> Result<Telegram> {
    if b.len() < DATA_START || &b[..4] != HEADER {
        return Err(HestiaError::invalid("not a speedwire telegram"));
    }
    if be16(b, 16)? != PROTOCOL_EMETER {
        return Err(HestiaError::invalid("not an energy meter telegram"));
    }

    // data length counts from the protocol id
    let end = (16 + usize::from(be16(b, 12)?)).min(b.len());

    let mut t = Telegram {
        susy_id: be16(b, 18)?,
        serial: be32(b, 20)?,
        ticker: be32(b, 24)?,
        values: HashMap::new(),
    };

    let mut pos = DATA_START;
    while pos + 4 <= end {
        let (channel, index, kind) = (b[pos], b[pos + 1], b[pos + 2]);
        pos += 4;

        if channel == 0 && index == 0 && kind == 0 {
            break;
        }
        let len = match (channel, kind) {
            // software version
            (0x90, _) => 4,
            (_, ACTUAL) => 4,
            (_, COUNTER) => 8,
            _ => return Err(HestiaError::invalid(format!("unknown obis type: {}", kind))),
        };
        let raw = b
            .get(pos..pos + len)
            .ok_or_else(|| HestiaError::invalid("truncated telegram"))?;
        pos += len;

        if channel == 0x90 {
            continue;
        }
        let value = raw.iter().fold(0u64, |acc, x| (acc << 8) | u64::from(*x));
        t.values.insert(Obis { index, kind }, value);
    }

    Ok(t)
}

/// Device selector: source address or serial number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    Addr(IpAddr),
    Serial(u32),
}

/// Dispatches telegrams to per-device monitors
#[derive(Debug, Default)]
pub struct Listener {
    devices: Mutex<HashMap<Device, Arc<Monitor<Telegram>>>>,
}

static SHARED: OnceCell<Arc<Listener>> = OnceCell::new();

impl Listener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide listener joined to the speedwire multicast group
    pub async fn shared() -> Result<Arc<Listener>> {
        if let Some(l) = SHARED.get() {
            return Ok(l.clone());
        }

        let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, PORT))).await?;
        socket.join_multicast_v4(MULTICAST_GROUP, Ipv4Addr::UNSPECIFIED)?;

        let listener = Arc::new(Listener::new());
        // a concurrent caller may have won; its socket stays, ours is dropped
        match SHARED.try_insert(listener.clone()) {
            Ok(_) => {
                tokio::spawn(listener.clone().run(socket));
                Ok(listener)
            }
            Err((current, _)) => Ok(current.clone()),
        }
    }

    /// Monitor receiving telegrams of `device`
    pub fn device(&self, device: Device) -> Arc<Monitor<Telegram>> {
        let mut devices = self
            .devices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        devices
            .entry(device)
            .or_insert_with(|| Arc::new(Monitor::new(TIMEOUT)))
            .clone()
    }

    /// Route one datagram to the monitors of its sender
    pub fn dispatch(&self, src: IpAddr, b: &[u8]) -> Result<()> {
        let t = parse(b)?;
        let devices = self
            .devices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for key in [Device::Addr(src), Device::Serial(t.serial)] {
            if let Some(m) = devices.get(&key) {
                m.set(t.clone());
            }
        }
        Ok(())
    }

    async fn run(self: Arc<Self>, socket: UdpSocket) {
        let logger = get_logger("sma");
        let mut buf = vec![0u8; 1024];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((n, src)) => {
                    if let Err(e) = self.dispatch(src.ip(), &buf[..n]) {
                        logger.trace(&format!("{}: {}", src, e));
                    }
                }
                Err(e) => {
                    logger.error(&format!("receive: {}", e));
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a telegram with the given OBIS records
    pub(crate) fn telegram(serial: u32, records: &[(u8, u8, u64)]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&PROTOCOL_EMETER.to_be_bytes());
        data.extend_from_slice(&0x015Du16.to_be_bytes());
        data.extend_from_slice(&serial.to_be_bytes());
        data.extend_from_slice(&1234u32.to_be_bytes());
        for &(index, kind, value) in records {
            data.extend_from_slice(&[0, index, kind, 0]);
            match kind {
                ACTUAL => data.extend_from_slice(&(value as u32).to_be_bytes()),
                _ => data.extend_from_slice(&value.to_be_bytes()),
            }
        }
        data.extend_from_slice(&[0x90, 0, 0, 0, 2, 0, 0x12, 0x52]);

        let mut b = Vec::new();
        b.extend_from_slice(HEADER);
        b.extend_from_slice(&[0, 4, 0x02, 0xA0, 0, 0, 0, 1]);
        b.extend_from_slice(&(data.len() as u16).to_be_bytes());
        b.extend_from_slice(&[0, 0x10]);
        b.extend_from_slice(&data);
        b.extend_from_slice(&[0, 0, 0, 0]);
        b
    }

    #[test]
    fn test_parse() {
        let b = telegram(
            1_900_123_456,
            &[
                (1, ACTUAL, 12_345),
                (2, ACTUAL, 0),
                (1, COUNTER, 36_000_000_000),
                (21, ACTUAL, 0),
                (22, ACTUAL, 4_000),
                (31, ACTUAL, 1_750),
                (32, ACTUAL, 231_400),
                (14, ACTUAL, 49_980),
            ],
        );
        let t = parse(&b).unwrap();
        assert_eq!(t.serial, 1_900_123_456);
        assert_eq!(t.susy_id, 0x015D);
        assert_eq!(t.value(Measurement::Power), Some(1234.5));
        assert_eq!(t.value(Measurement::ExportPower), Some(0.0));
        assert_eq!(t.value(Measurement::Energy), Some(10_000.0));
        assert_eq!(t.value(Measurement::PhasePower(1)), Some(-400.0));
        assert_eq!(t.value(Measurement::Current(1)), Some(-1.75));
        assert_eq!(t.value(Measurement::Voltage(1)), Some(231.4));
        assert_eq!(t.value(Measurement::Frequency), Some(49.98));
        assert_eq!(t.value(Measurement::Voltage(2)), None);
    }

    #[test]
    fn test_reject_foreign() {
        assert!(parse(b"HTTP/1.1 200 OK\r\n\r\n0123456789").is_err());
        let mut b = telegram(1, &[]);
        b[16] = 0x60;
        b[17] = 0x65;
        assert!(parse(&b).is_err());
        assert!(parse(&telegram(1, &[(1, ACTUAL, 1)])[..30]).is_ok());
    }

    #[test]
    fn test_measurement_names() {
        for name in ["power", "importpower", "exportenergy", "currentl2", "voltageL3", "powerl1"] {
            let m: Measurement = name.parse().unwrap();
            assert_eq!(m.to_string(), name.to_lowercase());
        }
        assert!("currentl4".parse::<Measurement>().is_err());
        assert!("soc".parse::<Measurement>().is_err());
    }

    #[tokio::test]
    async fn test_dispatch() {
        let l = Listener::new();
        let by_ip = l.device(Device::Addr("192.168.1.40".parse().unwrap()));
        let by_serial = l.device(Device::Serial(77));

        l.dispatch(
            "192.168.1.40".parse().unwrap(),
            &telegram(12, &[(1, ACTUAL, 100)]),
        )
        .unwrap();
        assert_eq!(by_ip.get().await.unwrap().serial, 12);
        assert!(!by_serial.has_value());

        l.dispatch("10.0.0.1".parse().unwrap(), &telegram(77, &[])).unwrap();
        assert_eq!(by_serial.get().await.unwrap().serial, 77);
    }
}
