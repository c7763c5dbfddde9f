//! Type conversion in front of a child setter

use super::{
    BytesSetter, Capability, Config, Context, FloatSetter, IntSetter, Other, Plugin, Setter,
    decode_other, setter_fn,
};
use crate::error::{HestiaError, Result};
use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Conversion {
    Float2Int,
    Int2Float,
    Int2Bytes,
}

#[derive(Debug, Clone, Deserialize)]
struct Settings {
    convert: Conversion,
    set: Config,
}

pub struct Convert {
    ctx: Context,
    conversion: Conversion,
    set: Config,
}

pub async fn new_from_config(ctx: Context, other: Other) -> Result<Box<dyn Plugin>> {
    let cc: Settings = decode_other(&other)?;
    Ok(Box::new(Convert {
        ctx,
        conversion: cc.convert,
        set: cc.set,
    }))
}

impl Convert {
    fn mismatch(&self, cap: Capability) -> HestiaError {
        HestiaError::invalid(format!("{:?} does not accept {}", self.conversion, cap).to_lowercase())
    }
}

#[async_trait]
impl FloatSetter for Convert {
    async fn float_setter(&self, param: &str) -> Result<Setter<f64>> {
        if self.conversion != Conversion::Float2Int {
            return Err(self.mismatch(Capability::FloatSetter));
        }
        let set = self.set.int_setter(&self.ctx, param).await?;
        Ok(setter_fn(move |v: f64| set(v as i64)))
    }
}

#[async_trait]
impl IntSetter for Convert {
    async fn int_setter(&self, param: &str) -> Result<Setter<i64>> {
        match self.conversion {
            Conversion::Int2Float => {
                let set = self.set.float_setter(&self.ctx, param).await?;
                Ok(setter_fn(move |v: i64| set(v as f64)))
            }
            Conversion::Int2Bytes => {
                let set = self.set.bytes_setter(&self.ctx, param).await?;
                Ok(setter_fn(move |v: i64| set(v.to_be_bytes().to_vec())))
            }
            Conversion::Float2Int => Err(self.mismatch(Capability::IntSetter)),
        }
    }
}

#[async_trait]
impl BytesSetter for Convert {
    async fn bytes_setter(&self, _param: &str) -> Result<Setter<Vec<u8>>> {
        Err(self.mismatch(Capability::BytesSetter))
    }
}

crate::impl_plugin!(Convert, FloatSetter, IntSetter, BytesSetter);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::testutil::{Recorder, context};

    #[tokio::test]
    async fn test_float2int() {
        let rec = Recorder::default();
        let ctx = context(&[&rec]);
        let cc = Config::from_yaml("source: convert\nconvert: float2int\nset: {source: rec}")
            .unwrap();

        let set = cc.float_setter(&ctx, "limit").await.unwrap();
        set(6.9).await.unwrap();
        assert_eq!(rec.writes(), vec!["limit=6"]);

        assert!(cc.int_setter(&ctx, "limit").await.is_err());
    }

    #[tokio::test]
    async fn test_int2bytes() {
        let rec = Recorder::default();
        let ctx = context(&[&rec]);
        let cc = Config::from_yaml("source: convert\nconvert: int2bytes\nset: {source: rec}")
            .unwrap();

        let set = cc.int_setter(&ctx, "").await.unwrap();
        set(258).await.unwrap();
        assert_eq!(rec.writes(), vec!["0000000000000102"]);
    }

    #[tokio::test]
    async fn test_unknown_conversion() {
        let ctx = context(&[]);
        let cc = Config::from_yaml("source: convert\nconvert: int2string\nset: {source: rec}")
            .unwrap();
        assert!(cc.int_setter(&ctx, "x").await.err().unwrap().is_setup());
    }
}
