//! Ordered fan-out of a single write

use super::{
    BoolSetter, Config, Context, FloatSetter, IntSetter, Other, Plugin, Setter, StringSetter,
    Typed, decode_other, setter_fn,
};
use crate::error::{HestiaError, Result};
use async_trait::async_trait;
use futures::future::try_join_all;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize)]
struct Settings {
    set: Vec<Config>,
}

pub struct Sequence {
    ctx: Context,
    set: Vec<Config>,
}

pub async fn new_from_config(ctx: Context, other: Other) -> Result<Box<dyn Plugin>> {
    let cc: Settings = decode_other(&other)?;
    if cc.set.is_empty() {
        return Err(HestiaError::config("missing set"));
    }
    Ok(Box::new(Sequence { ctx, set: cc.set }))
}

impl Sequence {
    async fn sequence<T: Typed>(&self, param: &str) -> Result<Setter<T>> {
        let setters = try_join_all(self.set.iter().map(|cc| T::setter(cc, &self.ctx, param)))
            .await?;
        let setters = Arc::new(setters);

        Ok(setter_fn(move |v: T| {
            let setters = setters.clone();
            async move {
                // no rollback of earlier writes
                for set in setters.iter() {
                    set(v.clone()).await?;
                }
                Ok(())
            }
        }))
    }
}

#[async_trait]
impl IntSetter for Sequence {
    async fn int_setter(&self, param: &str) -> Result<Setter<i64>> {
        self.sequence(param).await
    }
}

#[async_trait]
impl FloatSetter for Sequence {
    async fn float_setter(&self, param: &str) -> Result<Setter<f64>> {
        self.sequence(param).await
    }
}

#[async_trait]
impl BoolSetter for Sequence {
    async fn bool_setter(&self, param: &str) -> Result<Setter<bool>> {
        self.sequence(param).await
    }
}

#[async_trait]
impl StringSetter for Sequence {
    async fn string_setter(&self, param: &str) -> Result<Setter<String>> {
        self.sequence(param).await
    }
}

crate::impl_plugin!(Sequence, IntSetter, FloatSetter, BoolSetter, StringSetter);
