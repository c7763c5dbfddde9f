//! Modbus register plugin

use super::{
    BoolGetter, BoolSetter, BytesSetter, Context, FloatGetter, FloatSetter, Getter, IntGetter,
    IntSetter, Other, Plugin, Setter, StringGetter, decode_other, getter_fn, setter_fn,
};
use crate::error::{HestiaError, Result};
use crate::modbus::register::{self, FunctionCode, Register, RegisterOperation};
use crate::modbus::{COIL_ON, Connection, Settings as ConnectionSettings};
use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct Settings {
    #[serde(flatten)]
    connection: ConnectionSettings,
    register: Register,
    scale: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            connection: ConnectionSettings::default(),
            register: Register::default(),
            scale: 1.0,
        }
    }
}

pub struct Modbus {
    conn: Connection,
    op: RegisterOperation,
    scale: f64,
}

/// Build a modbus plugin; the register is resolved once here
pub async fn new_from_config(ctx: Context, other: Other) -> Result<Box<dyn Plugin>> {
    let cc: Settings = decode_other(&other)?;

    let op = cc.register.operation()?;
    let conn = Connection::open(&cc.connection, ctx.logger("modbus"))?;

    Ok(Box::new(Modbus {
        conn,
        op,
        scale: cc.scale,
    }))
}

impl Modbus {
    fn float(&self) -> Result<Getter<f64>> {
        if !self.op.function.is_read() {
            return Err(HestiaError::config(format!(
                "invalid read function code: {:?}",
                self.op.function
            )));
        }

        let conn = self.conn.clone();
        let op = self.op;
        let scale = self.scale;
        Ok(getter_fn(move || {
            let conn = conn.clone();
            async move {
                let b = conn
                    .read_bytes(&op)
                    .await
                    .map_err(|e| HestiaError::modbus(format!("read failed: {}", e)))?;
                Ok(scale * op.encoding.decode(&b)?)
            }
        }))
    }

    fn writer(&self) -> Result<Setter<f64>> {
        let conn = self.conn.clone();
        let op = self.op;
        let scale = self.scale;

        if op.function.is_read() {
            return Err(HestiaError::config(format!(
                "invalid write function code: {:?}",
                op.function
            )));
        }

        Ok(setter_fn(move |val: f64| {
            let conn = conn.clone();
            async move {
                let val = val * scale;
                match op.function {
                    FunctionCode::WriteSingleCoil => {
                        let v = if val != 0.0 { COIL_ON } else { 0 };
                        conn.write_single_coil(op.addr, v).await
                    }
                    FunctionCode::WriteSingleRegister => {
                        // wider encodings truncate to the low word
                        let word = match op.encoding.encode(val).as_slice() {
                            [w] => *w,
                            _ => val as i64 as u16,
                        };
                        conn.write_single_register(op.addr, word).await
                    }
                    FunctionCode::WriteMultipleRegisters => {
                        conn.write_multiple_registers(op.addr, op.encoding.encode(val))
                            .await
                    }
                    other => Err(HestiaError::modbus(format!(
                        "invalid func code: {:?}",
                        other
                    ))),
                }
            }
        }))
    }
}

#[async_trait]
impl FloatGetter for Modbus {
    async fn float_getter(&self) -> Result<Getter<f64>> {
        self.float()
    }
}

#[async_trait]
impl IntGetter for Modbus {
    async fn int_getter(&self) -> Result<Getter<i64>> {
        let g = self.float()?;
        Ok(getter_fn(move || {
            let g = g.clone();
            async move { Ok(g().await?.round() as i64) }
        }))
    }
}

#[async_trait]
impl BoolGetter for Modbus {
    async fn bool_getter(&self) -> Result<Getter<bool>> {
        let g = self.float()?;
        Ok(getter_fn(move || {
            let g = g.clone();
            async move { Ok(g().await? != 0.0) }
        }))
    }
}

#[async_trait]
impl StringGetter for Modbus {
    async fn string_getter(&self) -> Result<Getter<String>> {
        let conn = self.conn.clone();
        let op = self.op;
        Ok(getter_fn(move || {
            let conn = conn.clone();
            async move {
                let b = conn.read_bytes(&op).await?;
                Ok(register::decode_string(&b))
            }
        }))
    }
}

#[async_trait]
impl FloatSetter for Modbus {
    async fn float_setter(&self, _param: &str) -> Result<Setter<f64>> {
        self.writer()
    }
}

#[async_trait]
impl IntSetter for Modbus {
    async fn int_setter(&self, _param: &str) -> Result<Setter<i64>> {
        let set = self.writer()?;
        Ok(setter_fn(move |v: i64| set(v as f64)))
    }
}

#[async_trait]
impl BoolSetter for Modbus {
    async fn bool_setter(&self, param: &str) -> Result<Setter<bool>> {
        let set = self.int_setter(param).await?;
        Ok(setter_fn(move |v: bool| set(i64::from(v))))
    }
}

#[async_trait]
impl BytesSetter for Modbus {
    async fn bytes_setter(&self, _param: &str) -> Result<Setter<Vec<u8>>> {
        let conn = self.conn.clone();
        let op = self.op;
        Ok(setter_fn(move |b: Vec<u8>| {
            let conn = conn.clone();
            async move {
                match op.function {
                    FunctionCode::WriteMultipleRegisters => {
                        conn.write_multiple_registers(op.addr, register::bytes_to_registers(&b))
                            .await
                    }
                    other => Err(HestiaError::modbus(format!(
                        "invalid func code: {:?}",
                        other
                    ))),
                }
            }
        }))
    }
}

crate::impl_plugin!(
    Modbus,
    StringGetter,
    FloatGetter,
    IntGetter,
    BoolGetter,
    FloatSetter,
    IntSetter,
    BoolSetter,
    BytesSetter
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings() {
        let s: Settings = serde_yaml::from_str(
            "uri: 192.168.1.5\nid: 3\nregister:\n  address: 40083\n  type: holding\n  decode: int16\nscale: -1",
        )
        .unwrap();
        assert_eq!(s.connection.id, 3);
        assert_eq!(s.connection.uri, "192.168.1.5");
        assert_eq!(s.register.address, 40083);
        assert_eq!(s.scale, -1.0);
    }
}
