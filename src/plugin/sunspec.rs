//! SunSpec point plugin

use super::{
    Context, FloatGetter, FloatSetter, Getter, IntGetter, IntSetter, Other, Plugin, Setter,
    StringGetter, decode_other, getter_fn, setter_fn,
};
use crate::error::{HestiaError, Result};
use crate::modbus::sunspec::{self, PointRef, ResolvedPoint};
use crate::modbus::{Connection, Settings as ConnectionSettings};
use crate::util::scalar;
use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct Settings {
    #[serde(flatten)]
    connection: ConnectionSettings,
    #[serde(deserialize_with = "scalar::list")]
    value: Vec<String>,
    scale: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            connection: ConnectionSettings::default(),
            value: Vec::new(),
            scale: 1.0,
        }
    }
}

pub struct SunSpec {
    conn: Connection,
    point: PointRef,
    resolved: ResolvedPoint,
    scale: f64,
}

/// Build a sunspec plugin, resolving the first candidate point the device offers
pub async fn new_from_config(ctx: Context, other: Other) -> Result<Box<dyn Plugin>> {
    let cc: Settings = decode_other(&other)?;

    if cc.value.is_empty() {
        return Err(HestiaError::config("value is required"));
    }
    let candidates = cc
        .value
        .iter()
        .map(|v| v.parse::<PointRef>())
        .collect::<Result<Vec<_>>>()?;

    let logger = ctx.logger("sunspec");
    let conn = Connection::open(&cc.connection, logger.clone())?;

    let tree = sunspec::cached_tree(&conn).await?;
    let device = tree.get(cc.connection.subdevice).ok_or_else(|| {
        HestiaError::config(format!("subdevice {} not found", cc.connection.subdevice))
    })?;

    let (point, resolved) = candidates
        .into_iter()
        .find_map(|p| sunspec::resolve(device, &p).ok().map(|r| (p, r)))
        .ok_or_else(|| HestiaError::config("sunspec model not found"))?;
    logger.debug(&format!("resolved {} at {}", point, resolved.addr));

    Ok(Box::new(SunSpec {
        conn,
        point,
        resolved,
        scale: cc.scale,
    }))
}

impl SunSpec {
    fn float(&self) -> Getter<f64> {
        let conn = self.conn.clone();
        let resolved = self.resolved;
        let scale = self.scale;
        let ctx = Errors(self.point.clone());
        getter_fn(move || {
            let conn = conn.clone();
            let ctx = ctx.clone();
            async move {
                let v = sunspec::read_point(&conn, &resolved)
                    .await
                    .map_err(|e| ctx.wrap(e))?;
                Ok(scale * v)
            }
        })
    }
}

/// Prefixes errors with the point they concern
#[derive(Clone)]
struct Errors(PointRef);

impl Errors {
    fn wrap(&self, err: HestiaError) -> HestiaError {
        HestiaError::modbus(format!(
            "model {} block {} point {}: {}",
            self.0.model, self.0.block, self.0.point, err
        ))
    }
}

#[async_trait]
impl FloatGetter for SunSpec {
    async fn float_getter(&self) -> Result<Getter<f64>> {
        Ok(self.float())
    }
}

#[async_trait]
impl IntGetter for SunSpec {
    async fn int_getter(&self) -> Result<Getter<i64>> {
        let g = self.float();
        Ok(getter_fn(move || {
            let g = g.clone();
            async move { Ok(g().await?.round() as i64) }
        }))
    }
}

#[async_trait]
impl StringGetter for SunSpec {
    async fn string_getter(&self) -> Result<Getter<String>> {
        let conn = self.conn.clone();
        let resolved = self.resolved;
        let ctx = Errors(self.point.clone());
        Ok(getter_fn(move || {
            let conn = conn.clone();
            let ctx = ctx.clone();
            async move {
                sunspec::read_string(&conn, &resolved)
                    .await
                    .map_err(|e| ctx.wrap(e))
            }
        }))
    }
}

#[async_trait]
impl FloatSetter for SunSpec {
    async fn float_setter(&self, _param: &str) -> Result<Setter<f64>> {
        if self.resolved.kind != sunspec::PointType::Float32 {
            return Err(Errors(self.point.clone()).wrap(HestiaError::invalid(format!(
                "invalid point type: {}",
                self.resolved.kind
            ))));
        }

        let conn = self.conn.clone();
        let resolved = self.resolved;
        let scale = self.scale;
        let ctx = Errors(self.point.clone());
        Ok(setter_fn(move |v: f64| {
            let conn = conn.clone();
            let ctx = ctx.clone();
            async move {
                sunspec::write_float(&conn, &resolved, v * scale)
                    .await
                    .map_err(|e| ctx.wrap(e))
            }
        }))
    }
}

#[async_trait]
impl IntSetter for SunSpec {
    async fn int_setter(&self, _param: &str) -> Result<Setter<i64>> {
        let conn = self.conn.clone();
        let resolved = self.resolved;
        let scale = self.scale;
        let ctx = Errors(self.point.clone());
        Ok(setter_fn(move |v: i64| {
            let conn = conn.clone();
            let ctx = ctx.clone();
            async move {
                let v = (v as f64 * scale) as i64;
                sunspec::write_int(&conn, &resolved, v)
                    .await
                    .map_err(|e| ctx.wrap(e))
            }
        }))
    }
}

crate::impl_plugin!(
    SunSpec,
    StringGetter,
    FloatGetter,
    IntGetter,
    FloatSetter,
    IntSetter
);
