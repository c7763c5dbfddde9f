//! Treat expected setter errors as success

use super::{
    BoolSetter, Config, Context, FloatSetter, IntSetter, Other, Plugin, Setter, StringSetter,
    Typed, decode_other, setter_fn,
};
use crate::error::{HestiaError, Result};
use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
struct Settings {
    error: String,
    set: Config,
}

pub struct Ignore {
    ctx: Context,
    prefix: String,
    set: Config,
}

pub async fn new_from_config(ctx: Context, other: Other) -> Result<Box<dyn Plugin>> {
    let cc: Settings = decode_other(&other)?;
    if cc.error.is_empty() {
        return Err(HestiaError::config("missing error"));
    }
    Ok(Box::new(Ignore {
        ctx,
        prefix: cc.error,
        set: cc.set,
    }))
}

impl Ignore {
    async fn ignoring<T: Typed>(&self, param: &str) -> Result<Setter<T>> {
        let set = T::setter(&self.set, &self.ctx, param).await?;
        let prefix = self.prefix.clone();
        let logger = self.ctx.logger("ignore");
        Ok(setter_fn(move |v: T| {
            let set = set.clone();
            let prefix = prefix.clone();
            let logger = logger.clone();
            async move {
                match set(v).await {
                    Err(e) if e.to_string().starts_with(&prefix) => {
                        logger.debug(&format!("ignoring: {}", e));
                        Ok(())
                    }
                    res => res,
                }
            }
        }))
    }
}

#[async_trait]
impl IntSetter for Ignore {
    async fn int_setter(&self, param: &str) -> Result<Setter<i64>> {
        self.ignoring(param).await
    }
}

#[async_trait]
impl FloatSetter for Ignore {
    async fn float_setter(&self, param: &str) -> Result<Setter<f64>> {
        self.ignoring(param).await
    }
}

#[async_trait]
impl BoolSetter for Ignore {
    async fn bool_setter(&self, param: &str) -> Result<Setter<bool>> {
        self.ignoring(param).await
    }
}

#[async_trait]
impl StringSetter for Ignore {
    async fn string_setter(&self, param: &str) -> Result<Setter<String>> {
        self.ignoring(param).await
    }
}

crate::impl_plugin!(Ignore, IntSetter, FloatSetter, BoolSetter, StringSetter);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::testutil::{Recorder, context};

    #[tokio::test]
    async fn test_prefix() {
        let rec = Recorder::default();
        let ctx = context(&[&rec]);

        let cc = Config::from_yaml("source: ignore\nerror: 'Error: rejected'\nset: {source: rec}")
            .unwrap();
        let set = cc.int_setter(&ctx, "").await.unwrap();
        rec.fail_on("1");
        assert!(set(1).await.is_ok());

        let cc = Config::from_yaml("source: ignore\nerror: 'not modified'\nset: {source: rec}")
            .unwrap();
        let set = cc.int_setter(&ctx, "").await.unwrap();
        assert!(set(1).await.is_err());
        assert!(set(2).await.is_ok());
    }
}
