//! SMA energy meter plugin

use super::{Context, FloatGetter, Getter, IntGetter, Other, Plugin, decode_other, getter_fn};
use crate::error::{HestiaError, Result};
use crate::sma::{Device, Listener, Measurement, Telegram};
use crate::util::{Monitor, scalar};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct Settings {
    uri: String,
    #[serde(deserialize_with = "scalar::string")]
    serial: String,
    value: String,
    scale: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            uri: String::new(),
            serial: String::new(),
            value: String::new(),
            scale: 1.0,
        }
    }
}

pub struct Sma {
    monitor: Arc<Monitor<Telegram>>,
    value: Measurement,
    scale: f64,
}

fn device(cc: &Settings) -> Result<Device> {
    match (cc.uri.is_empty(), cc.serial.is_empty()) {
        (false, _) => cc
            .uri
            .parse()
            .map(Device::Addr)
            .map_err(|_| HestiaError::config(format!("invalid uri: {}", cc.uri))),
        (true, false) => cc
            .serial
            .parse()
            .map(Device::Serial)
            .map_err(|_| HestiaError::config(format!("invalid serial: {}", cc.serial))),
        (true, true) => Err(HestiaError::config("missing uri or serial")),
    }
}

/// Build an sma plugin on the shared speedwire listener
pub async fn new_from_config(ctx: Context, other: Other) -> Result<Box<dyn Plugin>> {
    let cc: Settings = decode_other(&other)?;

    let device = device(&cc)?;
    let value: Measurement = cc.value.parse()?;

    let listener = Listener::shared().await?;
    ctx.logger("sma")
        .debug(&format!("{:?} {}", device, value));

    Ok(Box::new(Sma {
        monitor: listener.device(device),
        value,
        scale: cc.scale,
    }))
}

#[async_trait]
impl FloatGetter for Sma {
    async fn float_getter(&self) -> Result<Getter<f64>> {
        let monitor = self.monitor.clone();
        let value = self.value;
        let scale = self.scale;
        Ok(getter_fn(move || {
            let monitor = monitor.clone();
            async move {
                let t = monitor.get().await?;
                let v = t.value(value).ok_or(HestiaError::NotAvailable)?;
                Ok(scale * v)
            }
        }))
    }
}

#[async_trait]
impl IntGetter for Sma {
    async fn int_getter(&self) -> Result<Getter<i64>> {
        let g = self.float_getter().await?;
        Ok(getter_fn(move || {
            let g = g.clone();
            async move { Ok(g().await?.round() as i64) }
        }))
    }
}

crate::impl_plugin!(Sma, FloatGetter, IntGetter);
