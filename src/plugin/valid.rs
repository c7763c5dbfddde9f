//! Gate a value behind a validity flag

use super::{
    BoolGetter, Config, Context, FloatGetter, Getter, IntGetter, Other, Plugin, StringGetter,
    Typed, decode_other, getter_fn,
};
use crate::error::{HestiaError, Result};
use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
struct Settings {
    valid: Config,
    value: Config,
}

pub struct Valid {
    ctx: Context,
    valid: Config,
    value: Config,
}

pub async fn new_from_config(ctx: Context, other: Other) -> Result<Box<dyn Plugin>> {
    let cc: Settings = decode_other(&other)?;
    Ok(Box::new(Valid {
        ctx,
        valid: cc.valid,
        value: cc.value,
    }))
}

impl Valid {
    async fn gated<T: Typed>(&self) -> Result<Getter<T>> {
        let valid = self.valid.bool_getter(&self.ctx).await?;
        let value = T::getter(&self.value, &self.ctx).await?;

        Ok(getter_fn(move || {
            let valid = valid.clone();
            let value = value.clone();
            async move {
                if !valid().await? {
                    return Err(HestiaError::invalid("value not valid"));
                }
                value().await
            }
        }))
    }
}

#[async_trait]
impl StringGetter for Valid {
    async fn string_getter(&self) -> Result<Getter<String>> {
        self.gated().await
    }
}

#[async_trait]
impl FloatGetter for Valid {
    async fn float_getter(&self) -> Result<Getter<f64>> {
        self.gated().await
    }
}

#[async_trait]
impl IntGetter for Valid {
    async fn int_getter(&self) -> Result<Getter<i64>> {
        self.gated().await
    }
}

#[async_trait]
impl BoolGetter for Valid {
    async fn bool_getter(&self) -> Result<Getter<bool>> {
        self.gated().await
    }
}

crate::impl_plugin!(Valid, StringGetter, FloatGetter, IntGetter, BoolGetter);
