//! Constant value plugin

use super::getter::parse_float;
use super::typed::{parse_bool, parse_int};
use super::{
    BoolGetter, FloatGetter, Getter, IntGetter, Other, Plugin, StringGetter, decode_other,
    getter_fn,
};
use crate::error::Result;
use crate::util::scalar;
use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct Settings {
    #[serde(deserialize_with = "scalar::string")]
    value: String,
}

pub struct Const {
    value: String,
}

/// Build a const plugin; the value is parsed per requested type
pub fn new_from_config(other: Other) -> Result<Box<dyn Plugin>> {
    let cc: Settings = decode_other(&other)?;
    Ok(Box::new(Const { value: cc.value }))
}

fn constant<T: Clone + Send + Sync + 'static>(v: T) -> Getter<T> {
    getter_fn(move || {
        let v = v.clone();
        async move { Ok(v) }
    })
}

#[async_trait]
impl StringGetter for Const {
    async fn string_getter(&self) -> Result<Getter<String>> {
        Ok(constant(self.value.clone()))
    }
}

#[async_trait]
impl FloatGetter for Const {
    async fn float_getter(&self) -> Result<Getter<f64>> {
        Ok(constant(parse_float(&self.value)?))
    }
}

#[async_trait]
impl IntGetter for Const {
    async fn int_getter(&self) -> Result<Getter<i64>> {
        Ok(constant(parse_int(&self.value)?))
    }
}

#[async_trait]
impl BoolGetter for Const {
    async fn bool_getter(&self) -> Result<Getter<bool>> {
        Ok(constant(parse_bool(&self.value)?))
    }
}

crate::impl_plugin!(Const, StringGetter, FloatGetter, IntGetter, BoolGetter);

#[cfg(test)]
mod tests {
    use super::*;

    fn plugin(yaml: &str) -> Box<dyn Plugin> {
        new_from_config(serde_yaml::from_str(yaml).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_types() {
        let p = plugin("value: 42");
        let i = p.as_int_getter().unwrap().int_getter().await.unwrap();
        assert_eq!(i().await.unwrap(), 42);
        let f = p.as_float_getter().unwrap().float_getter().await.unwrap();
        assert_eq!(f().await.unwrap(), 42.0);
        let s = p.as_string_getter().unwrap().string_getter().await.unwrap();
        assert_eq!(s().await.unwrap(), "42");
    }

    #[tokio::test]
    async fn test_parsed_lazily() {
        let p = plugin("value: 1.5");
        assert!(p.as_int_getter().unwrap().int_getter().await.is_err());
        assert!(p.as_bool_getter().unwrap().bool_getter().await.is_err());

        let p = plugin("value: true");
        let b = p.as_bool_getter().unwrap().bool_getter().await.unwrap();
        assert!(b().await.unwrap());
    }
}
