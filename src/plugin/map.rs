//! Discrete integer value mapping

use super::{
    Config, Context, Getter, IntGetter, IntSetter, OptionalConfig, Other, Plugin, Setter,
    decode_other, getter_fn, setter_fn,
};
use crate::error::{HestiaError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct Settings {
    values: BTreeMap<i64, i64>,
    get: Option<Config>,
    set: Option<Config>,
}

pub struct Map {
    ctx: Context,
    values: Arc<BTreeMap<i64, i64>>,
    get: Option<Config>,
    set: Option<Config>,
}

pub async fn new_from_config(ctx: Context, other: Other) -> Result<Box<dyn Plugin>> {
    let cc: Settings = decode_other(&other)?;

    if cc.values.is_empty() {
        return Err(HestiaError::config("missing values"));
    }

    Ok(Box::new(Map {
        ctx,
        values: Arc::new(cc.values),
        get: cc.get,
        set: cc.set,
    }))
}

#[async_trait]
impl IntGetter for Map {
    async fn int_getter(&self) -> Result<Getter<i64>> {
        let g = self
            .get
            .int_getter(&self.ctx)
            .await?
            .ok_or_else(|| HestiaError::config("missing get"))?;
        let values = self.values.clone();

        Ok(getter_fn(move || {
            let g = g.clone();
            let values = values.clone();
            async move {
                let v = g().await?;
                values.get(&v).copied().ok_or_else(|| HestiaError::not_found(v))
            }
        }))
    }
}

#[async_trait]
impl IntSetter for Map {
    async fn int_setter(&self, param: &str) -> Result<Setter<i64>> {
        let set = self
            .set
            .int_setter(&self.ctx, param)
            .await?
            .ok_or_else(|| HestiaError::config("missing set"))?;
        let values = self.values.clone();

        Ok(setter_fn(move |v: i64| {
            // reverse lookup: write the key mapping to `v`
            let key = values.iter().find(|(_, m)| **m == v).map(|(k, _)| *k);
            let set = set.clone();
            async move {
                let key = key.ok_or_else(|| HestiaError::not_found(v))?;
                set(key).await
            }
        }))
    }
}

crate::impl_plugin!(Map, IntGetter, IntSetter);
