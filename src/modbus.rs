//! Modbus TCP/RTU client layer
//!
//! Physical connections are shared between every plugin addressing the same
//! endpoint. A [`Connection`] serializes requests on the shared transport,
//! applies the per-plugin unit id, timeout and inter-request delay, and drops
//! the underlying socket after an I/O failure so the next request reconnects.

pub mod register;
pub mod sunspec;

use crate::error::{HestiaError, Result};
use crate::logging::{StructuredLogger, get_logger};
use crate::util::{self, DEFAULT_TIMEOUT};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tokio_modbus::client::{Context as ModbusContext, Reader, Writer};
use tokio_modbus::prelude::{Slave, SlaveContext};

pub use register::{Encoding, FunctionCode, Register, RegisterOperation};

/// Value written to a coil to switch it on
pub const COIL_ON: u16 = 0xFF00;

/// Wire protocol of a physical connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Rtu,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => f.write_str("tcp"),
            Protocol::Rtu => f.write_str("rtu"),
        }
    }
}

/// Modbus connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Unit id
    pub id: u8,
    /// Index of the device in a chained SunSpec tree
    pub subdevice: usize,
    /// `host[:port]` for TCP and RTU-over-TCP
    pub uri: String,
    /// Serial device for RTU
    pub device: String,
    pub comset: String,
    pub baudrate: u32,
    pub udp: bool,
    /// RTU framing over TCP
    pub rtu: Option<bool>,
    #[serde(with = "util::duration")]
    pub timeout: Duration,
    #[serde(with = "util::duration")]
    pub delay: Duration,
    #[serde(rename = "connectdelay", with = "util::duration")]
    pub connect_delay: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            id: 1,
            subdevice: 0,
            uri: String::new(),
            device: String::new(),
            comset: "8N1".to_string(),
            baudrate: 0,
            udp: false,
            rtu: None,
            timeout: Duration::ZERO,
            delay: Duration::ZERO,
            connect_delay: Duration::ZERO,
        }
    }
}

impl Settings {
    /// Protocol selected by the settings
    pub fn protocol(&self) -> Protocol {
        if !self.device.is_empty() || self.rtu == Some(true) {
            Protocol::Rtu
        } else {
            Protocol::Tcp
        }
    }

    /// Key of the physical connection
    pub fn key(&self) -> String {
        if self.device.is_empty() {
            util::default_port(&self.uri, 502)
        } else {
            self.device.clone()
        }
    }

    fn validate(&self) -> Result<()> {
        if self.device.is_empty() == self.uri.is_empty() {
            return Err(HestiaError::config(
                "invalid modbus configuration: must have either uri or device",
            ));
        }
        if self.udp {
            return Err(HestiaError::config("modbus udp transport not supported"));
        }
        if !self.device.is_empty() && self.baudrate == 0 {
            return Err(HestiaError::config(
                "invalid modbus configuration: need baudrate and comset",
            ));
        }
        Ok(())
    }
}

/// Request-level access to a Modbus endpoint
#[async_trait::async_trait]
pub trait ModbusTransport: Send {
    async fn read_holding_registers(&mut self, slave: u8, addr: u16, count: u16)
    -> Result<Vec<u16>>;

    async fn read_input_registers(&mut self, slave: u8, addr: u16, count: u16) -> Result<Vec<u16>>;

    async fn read_coils(&mut self, slave: u8, addr: u16, count: u16) -> Result<Vec<bool>>;

    async fn write_single_coil(&mut self, slave: u8, addr: u16, on: bool) -> Result<()>;

    async fn write_single_register(&mut self, slave: u8, addr: u16, value: u16) -> Result<()>;

    async fn write_multiple_registers(&mut self, slave: u8, addr: u16, values: &[u16])
    -> Result<()>;
}

#[derive(Debug, Clone)]
enum Target {
    Tcp(String),
    RtuOverTcp(String),
    Serial {
        device: String,
        baudrate: u32,
        comset: String,
    },
}

/// Connection parameters, kept apart from the client so dialing only borrows `Sync` state
#[derive(Debug, Clone)]
struct Dialer {
    target: Target,
    connect_timeout: Duration,
    connect_delay: Duration,
    logger: StructuredLogger,
}

impl Dialer {
    async fn connect(&self) -> Result<ModbusContext> {
        let client = match &self.target {
            Target::Tcp(addr) => {
                let stream = self.dial(addr).await?;
                tokio_modbus::client::tcp::attach(stream)
            }
            Target::RtuOverTcp(addr) => {
                let stream = self.dial(addr).await?;
                tokio_modbus::client::rtu::attach(stream)
            }
            Target::Serial {
                device,
                baudrate,
                comset,
            } => open_serial(device, *baudrate, comset)?,
        };

        if !self.connect_delay.is_zero() {
            sleep(self.connect_delay).await;
        }
        Ok(client)
    }

    async fn dial(&self, addr: &str) -> Result<tokio::net::TcpStream> {
        self.logger
            .debug(&format!("Connecting to Modbus server at {}", addr));
        match timeout(self.connect_timeout, tokio::net::TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(HestiaError::modbus(format!(
                "Failed to connect to {}: {}",
                addr, e
            ))),
            Err(_) => Err(HestiaError::timeout(format!(
                "Connection timeout: {}",
                addr
            ))),
        }
    }
}

/// tokio-modbus backed transport with lazy (re)connect
pub struct TokioTransport {
    dialer: Dialer,
    client: Option<ModbusContext>,
}

impl TokioTransport {
    fn new(settings: &Settings) -> Result<Self> {
        let target = if !settings.device.is_empty() {
            let comset = match settings.comset.to_uppercase().as_str() {
                "8N1" | "8E1" | "8N2" => settings.comset.to_uppercase(),
                "80" => "8E1".to_string(),
                other => return Err(HestiaError::config(format!("invalid comset: {}", other))),
            };
            Target::Serial {
                device: settings.device.clone(),
                baudrate: settings.baudrate,
                comset,
            }
        } else if settings.protocol() == Protocol::Rtu {
            Target::RtuOverTcp(settings.key())
        } else {
            Target::Tcp(settings.key())
        };

        Ok(Self {
            dialer: Dialer {
                target,
                connect_timeout: DEFAULT_TIMEOUT,
                connect_delay: settings.connect_delay,
                logger: get_logger("modbus"),
            },
            client: None,
        })
    }

    async fn client(&mut self, slave: u8) -> Result<&mut ModbusContext> {
        if self.client.is_none() {
            self.client = Some(self.dialer.connect().await?);
        }
        let client = self
            .client
            .as_mut()
            .ok_or_else(|| HestiaError::modbus("Not connected to Modbus server"))?;
        client.set_slave(Slave(slave));
        Ok(client)
    }

    /// Flatten the nested tokio-modbus result, dropping the socket on I/O errors
    fn check<T>(
        &mut self,
        op: &str,
        res: std::result::Result<
            std::result::Result<T, tokio_modbus::ExceptionCode>,
            tokio_modbus::Error,
        >,
    ) -> Result<T> {
        match res {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(exception)) => Err(HestiaError::modbus(format!(
                "{}: exception {}",
                op, exception
            ))),
            Err(e) => {
                self.client = None;
                Err(HestiaError::modbus(format!("{}: {}", op, e)))
            }
        }
    }
}

#[cfg(feature = "serial")]
fn open_serial(device: &str, baudrate: u32, comset: &str) -> Result<ModbusContext> {
    use tokio_serial::{DataBits, Parity, SerialStream, StopBits};

    let (parity, stop_bits) = match comset {
        "8E1" => (Parity::Even, StopBits::One),
        "8N2" => (Parity::None, StopBits::Two),
        _ => (Parity::None, StopBits::One),
    };
    let builder = tokio_serial::new(device, baudrate)
        .data_bits(DataBits::Eight)
        .parity(parity)
        .stop_bits(stop_bits);
    let port = SerialStream::open(&builder)
        .map_err(|e| HestiaError::modbus(format!("Failed to open {}: {}", device, e)))?;
    Ok(tokio_modbus::client::rtu::attach(port))
}

#[cfg(not(feature = "serial"))]
fn open_serial(device: &str, _baudrate: u32, _comset: &str) -> Result<ModbusContext> {
    Err(HestiaError::unsupported_platform(format!(
        "modbus serial device {} (built without serial support)",
        device
    )))
}

#[async_trait::async_trait]
impl ModbusTransport for TokioTransport {
    async fn read_holding_registers(
        &mut self,
        slave: u8,
        addr: u16,
        count: u16,
    ) -> Result<Vec<u16>> {
        let res = self
            .client(slave)
            .await?
            .read_holding_registers(addr, count)
            .await;
        self.check("read holding registers", res)
    }

    async fn read_input_registers(&mut self, slave: u8, addr: u16, count: u16) -> Result<Vec<u16>> {
        let res = self
            .client(slave)
            .await?
            .read_input_registers(addr, count)
            .await;
        self.check("read input registers", res)
    }

    async fn read_coils(&mut self, slave: u8, addr: u16, count: u16) -> Result<Vec<bool>> {
        let res = self.client(slave).await?.read_coils(addr, count).await;
        self.check("read coils", res)
    }

    async fn write_single_coil(&mut self, slave: u8, addr: u16, on: bool) -> Result<()> {
        let res = self.client(slave).await?.write_single_coil(addr, on).await;
        self.check("write single coil", res)
    }

    async fn write_single_register(&mut self, slave: u8, addr: u16, value: u16) -> Result<()> {
        let res = self
            .client(slave)
            .await?
            .write_single_register(addr, value)
            .await;
        self.check("write single register", res)
    }

    async fn write_multiple_registers(
        &mut self,
        slave: u8,
        addr: u16,
        values: &[u16],
    ) -> Result<()> {
        let res = self
            .client(slave)
            .await?
            .write_multiple_registers(addr, values)
            .await;
        self.check("write multiple registers", res)
    }
}

/// A physical connection shared by every plugin addressing the same endpoint
pub struct PhysicalConnection {
    key: String,
    protocol: Protocol,
    transport: Mutex<Box<dyn ModbusTransport>>,
}

impl fmt::Debug for PhysicalConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhysicalConnection")
            .field("key", &self.key)
            .field("protocol", &self.protocol)
            .finish()
    }
}

impl PhysicalConnection {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }
}

static CONNECTIONS: Lazy<StdMutex<HashMap<String, Weak<PhysicalConnection>>>> =
    Lazy::new(|| StdMutex::new(HashMap::new()));

fn pool() -> Result<std::sync::MutexGuard<'static, HashMap<String, Weak<PhysicalConnection>>>> {
    CONNECTIONS
        .lock()
        .map_err(|_| HestiaError::modbus("connection registry poisoned"))
}

/// Look up or create the shared connection for `key`
fn registered_connection<F>(key: &str, protocol: Protocol, create: F) -> Result<Arc<PhysicalConnection>>
where
    F: FnOnce() -> Result<Box<dyn ModbusTransport>>,
{
    let mut connections = pool()?;

    if let Some(conn) = connections.get(key).and_then(Weak::upgrade) {
        if conn.protocol != protocol {
            return Err(HestiaError::config(format!(
                "connection already registered with different protocol: {}",
                key
            )));
        }
        return Ok(conn);
    }

    let conn = Arc::new(PhysicalConnection {
        key: key.to_string(),
        protocol,
        transport: Mutex::new(create()?),
    });
    connections.retain(|_, weak| weak.strong_count() > 0);
    connections.insert(key.to_string(), Arc::downgrade(&conn));
    Ok(conn)
}

/// Register a custom transport under `key`, e.g. a simulator
///
/// Plugins configured with a matching `uri` (or `device`) share it for as
/// long as the returned handle, or any plugin using it, is alive.
pub fn register_transport(
    key: &str,
    protocol: Protocol,
    transport: Box<dyn ModbusTransport>,
) -> Result<Arc<PhysicalConnection>> {
    registered_connection(key, protocol, move || Ok(transport))
}

/// Per-plugin view of a shared connection
#[derive(Clone)]
pub struct Connection {
    physical: Arc<PhysicalConnection>,
    slave: u8,
    timeout: Duration,
    delay: Duration,
    logger: StructuredLogger,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("physical", &self.physical)
            .field("slave", &self.slave)
            .finish()
    }
}

impl Connection {
    /// Open (or share) the connection described by `settings`
    pub fn open(settings: &Settings, logger: StructuredLogger) -> Result<Self> {
        settings.validate()?;
        let key = settings.key();
        let physical = registered_connection(&key, settings.protocol(), || {
            Ok(Box::new(TokioTransport::new(settings)?) as Box<dyn ModbusTransport>)
        })?;

        Ok(Self {
            physical,
            slave: settings.id,
            timeout: if settings.timeout.is_zero() {
                DEFAULT_TIMEOUT
            } else {
                settings.timeout
            },
            delay: settings.delay,
            logger,
        })
    }

    pub fn physical(&self) -> &Arc<PhysicalConnection> {
        &self.physical
    }

    pub fn slave(&self) -> u8 {
        self.slave
    }

    /// Same physical connection, different unit id
    pub fn with_slave(&self, slave: u8) -> Self {
        let mut conn = self.clone();
        conn.slave = slave;
        conn
    }

    async fn run<T, F>(&self, op: &str, f: F) -> Result<T>
    where
        F: for<'a> FnOnce(
            &'a mut Box<dyn ModbusTransport>,
            u8,
        ) -> futures::future::BoxFuture<'a, Result<T>>,
    {
        let mut transport = self.physical.transport.lock().await;
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        self.logger.trace(&format!(
            "{} on {} slave {}",
            op, self.physical.key, self.slave
        ));

        match timeout(self.timeout, f(&mut *transport, self.slave)).await {
            Ok(res) => res,
            Err(_) => Err(HestiaError::timeout(format!("{} timeout", op))),
        }
    }

    pub async fn read_holding_registers(&self, addr: u16, count: u16) -> Result<Vec<u16>> {
        self.run("read holding registers", move |t, slave| {
            t.read_holding_registers(slave, addr, count)
        })
        .await
    }

    pub async fn read_input_registers(&self, addr: u16, count: u16) -> Result<Vec<u16>> {
        self.run("read input registers", move |t, slave| {
            t.read_input_registers(slave, addr, count)
        })
        .await
    }

    pub async fn read_coils(&self, addr: u16, count: u16) -> Result<Vec<bool>> {
        self.run("read coils", move |t, slave| t.read_coils(slave, addr, count))
            .await
    }

    pub async fn write_single_coil(&self, addr: u16, value: u16) -> Result<()> {
        self.run("write single coil", move |t, slave| {
            t.write_single_coil(slave, addr, value == COIL_ON)
        })
        .await
    }

    pub async fn write_single_register(&self, addr: u16, value: u16) -> Result<()> {
        self.run("write single register", move |t, slave| {
            t.write_single_register(slave, addr, value)
        })
        .await
    }

    pub async fn write_multiple_registers(&self, addr: u16, values: Vec<u16>) -> Result<()> {
        self.run("write multiple registers", move |t, slave| {
            Box::pin(async move { t.write_multiple_registers(slave, addr, &values).await })
        })
        .await
    }

    /// Execute a read operation, returning big-endian bytes
    pub async fn read_bytes(&self, op: &RegisterOperation) -> Result<Vec<u8>> {
        match op.function {
            FunctionCode::ReadHoldingRegisters => {
                let regs = self.read_holding_registers(op.addr, op.length).await?;
                Ok(register::registers_to_bytes(&regs))
            }
            FunctionCode::ReadInputRegisters => {
                let regs = self.read_input_registers(op.addr, op.length).await?;
                Ok(register::registers_to_bytes(&regs))
            }
            FunctionCode::ReadCoils => {
                let coils = self.read_coils(op.addr, op.length).await?;
                Ok(coils.into_iter().map(u8::from).collect())
            }
            other => Err(HestiaError::modbus(format!(
                "invalid read function code: {:?}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex as StdMutex;

    /// Register map shared between clones
    #[derive(Clone, Default)]
    struct Fake {
        regs: Arc<StdMutex<BTreeMap<u16, u16>>>,
    }

    #[async_trait::async_trait]
    impl ModbusTransport for Fake {
        async fn read_holding_registers(
            &mut self,
            _slave: u8,
            addr: u16,
            count: u16,
        ) -> Result<Vec<u16>> {
            let regs = self.regs.lock().unwrap();
            Ok((addr..addr + count)
                .map(|a| regs.get(&a).copied().unwrap_or(0))
                .collect())
        }
        async fn read_input_registers(&mut self, s: u8, a: u16, c: u16) -> Result<Vec<u16>> {
            self.read_holding_registers(s, a, c).await
        }
        async fn read_coils(&mut self, _s: u8, _a: u16, c: u16) -> Result<Vec<bool>> {
            Ok(vec![true; c as usize])
        }
        async fn write_single_coil(&mut self, _s: u8, a: u16, on: bool) -> Result<()> {
            self.regs.lock().unwrap().insert(a, u16::from(on));
            Ok(())
        }
        async fn write_single_register(&mut self, _s: u8, a: u16, v: u16) -> Result<()> {
            self.regs.lock().unwrap().insert(a, v);
            Ok(())
        }
        async fn write_multiple_registers(&mut self, _s: u8, a: u16, v: &[u16]) -> Result<()> {
            let mut regs = self.regs.lock().unwrap();
            for (i, v) in v.iter().enumerate() {
                regs.insert(a + i as u16, *v);
            }
            Ok(())
        }
    }

    fn settings(uri: &str) -> Settings {
        Settings {
            uri: uri.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_settings() {
        let s = settings("10.0.0.1");
        assert_eq!(s.protocol(), Protocol::Tcp);
        assert_eq!(s.key(), "10.0.0.1:502");
        assert!(s.validate().is_ok());

        let s = Settings {
            rtu: Some(true),
            ..settings("10.0.0.1:8899")
        };
        assert_eq!(s.protocol(), Protocol::Rtu);

        assert!(Settings::default().validate().is_err());
        let s = Settings {
            device: "/dev/ttyUSB0".to_string(),
            ..settings("10.0.0.1")
        };
        assert!(s.validate().is_err());
        let s = Settings {
            device: "/dev/ttyUSB0".to_string(),
            ..Default::default()
        };
        assert!(s.validate().is_err());
    }

    #[tokio::test]
    async fn test_shared_connection() {
        let fake = Fake::default();
        let _handle =
            register_transport("test-shared:502", Protocol::Tcp, Box::new(fake.clone())).unwrap();

        let a = Connection::open(&settings("test-shared"), get_logger("test")).unwrap();
        let b = Connection::open(&settings("test-shared:502"), get_logger("test")).unwrap();
        assert!(Arc::ptr_eq(a.physical(), b.physical()));

        a.write_multiple_registers(10, vec![1, 2]).await.unwrap();
        assert_eq!(b.read_holding_registers(10, 2).await.unwrap(), vec![1, 2]);

        b.write_single_coil(20, COIL_ON).await.unwrap();
        assert_eq!(fake.regs.lock().unwrap()[&20], 1);
    }

    #[tokio::test]
    async fn test_protocol_mismatch() {
        let _handle =
            register_transport("test-proto:502", Protocol::Tcp, Box::new(Fake::default())).unwrap();
        let s = Settings {
            rtu: Some(true),
            ..settings("test-proto")
        };
        let err = Connection::open(&s, get_logger("test")).unwrap_err();
        assert!(err.to_string().contains("different protocol"));
    }

    #[tokio::test]
    async fn test_read_bytes() {
        let fake = Fake::default();
        fake.regs.lock().unwrap().insert(5, 0x4142);
        let _handle =
            register_transport("test-bytes:502", Protocol::Tcp, Box::new(fake)).unwrap();
        let conn = Connection::open(&settings("test-bytes"), get_logger("test")).unwrap();

        let op = Register {
            address: 5,
            kind: "holding".to_string(),
            encoding: "uint16".to_string(),
            ..Default::default()
        }
        .operation()
        .unwrap();
        assert_eq!(conn.read_bytes(&op).await.unwrap(), vec![0x41, 0x42]);

        let op = Register {
            address: 1,
            kind: "coil".to_string(),
            encoding: "bool8".to_string(),
            ..Default::default()
        }
        .operation()
        .unwrap();
        assert_eq!(conn.read_bytes(&op).await.unwrap(), vec![1]);
    }
}
