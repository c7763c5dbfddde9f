//! Configuration-driven plugin resolution

use super::{
    BoolGetter, BoolSetter, BytesSetter, Capability, Context, FloatGetter, FloatSetter, Getter,
    IntGetter, IntSetter, Plugin, Setter, StringGetter, StringSetter,
};
use crate::error::{HestiaError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Backend or operator specific settings; unknown keys are preserved
pub type Other = serde_yaml::Mapping;

/// Decode the settings of a plugin into its typed configuration
pub fn decode_other<T: DeserializeOwned>(other: &Other) -> Result<T> {
    serde_yaml::from_value(serde_yaml::Value::Mapping(other.clone()))
        .map_err(|e| HestiaError::config(e.to_string()))
}

/// A plugin configuration: the registry source plus its settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub source: String,

    #[serde(flatten)]
    pub other: Other,
}

macro_rules! getter {
    ($name:ident, $as:ident, $cap:ident, $t:ty) => {
        pub async fn $name(&self, ctx: &Context) -> Result<Getter<$t>> {
            let plugin = self.plugin(ctx).await?;
            let cap = plugin
                .$as()
                .ok_or_else(|| HestiaError::unsupported(self.source.clone(), Capability::$cap))?;
            cap.$name().await
        }
    };
}

macro_rules! setter {
    ($name:ident, $as:ident, $cap:ident, $t:ty) => {
        pub async fn $name(&self, ctx: &Context, param: &str) -> Result<Setter<$t>> {
            let plugin = self.plugin(ctx).await?;
            let cap = plugin
                .$as()
                .ok_or_else(|| HestiaError::unsupported(self.source.clone(), Capability::$cap))?;
            cap.$name(param).await
        }
    };
}

impl Config {
    pub fn new<S: Into<String>>(source: S, other: Other) -> Self {
        Self {
            source: source.into(),
            other,
        }
    }

    /// Build a config from YAML, mostly useful for nested configs in code
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Instantiate the configured plugin
    pub async fn plugin(&self, ctx: &Context) -> Result<Box<dyn Plugin>> {
        if self.source.is_empty() {
            return Err(HestiaError::MissingSource);
        }
        let factory = ctx.registry().get(&self.source)?;
        factory(ctx.clone(), self.other.clone()).await
    }

    getter!(string_getter, as_string_getter, StringGetter, String);
    getter!(float_getter, as_float_getter, FloatGetter, f64);
    getter!(int_getter, as_int_getter, IntGetter, i64);
    getter!(bool_getter, as_bool_getter, BoolGetter, bool);

    setter!(string_setter, as_string_setter, StringSetter, String);
    setter!(float_setter, as_float_setter, FloatSetter, f64);
    setter!(int_setter, as_int_setter, IntSetter, i64);
    setter!(bool_setter, as_bool_setter, BoolSetter, bool);
    setter!(bytes_setter, as_bytes_setter, BytesSetter, Vec<u8>);
}

/// Resolution of optional configs: an absent config yields no accessor
#[async_trait]
pub trait OptionalConfig {
    async fn string_getter(&self, ctx: &Context) -> Result<Option<Getter<String>>>;
    async fn float_getter(&self, ctx: &Context) -> Result<Option<Getter<f64>>>;
    async fn int_getter(&self, ctx: &Context) -> Result<Option<Getter<i64>>>;
    async fn bool_getter(&self, ctx: &Context) -> Result<Option<Getter<bool>>>;
    async fn string_setter(&self, ctx: &Context, param: &str) -> Result<Option<Setter<String>>>;
    async fn float_setter(&self, ctx: &Context, param: &str) -> Result<Option<Setter<f64>>>;
    async fn int_setter(&self, ctx: &Context, param: &str) -> Result<Option<Setter<i64>>>;
    async fn bool_setter(&self, ctx: &Context, param: &str) -> Result<Option<Setter<bool>>>;
    async fn bytes_setter(&self, ctx: &Context, param: &str) -> Result<Option<Setter<Vec<u8>>>>;
}

#[async_trait]
impl OptionalConfig for Option<Config> {
    async fn string_getter(&self, ctx: &Context) -> Result<Option<Getter<String>>> {
        match self {
            Some(cc) => cc.string_getter(ctx).await.map(Some),
            None => Ok(None),
        }
    }

    async fn float_getter(&self, ctx: &Context) -> Result<Option<Getter<f64>>> {
        match self {
            Some(cc) => cc.float_getter(ctx).await.map(Some),
            None => Ok(None),
        }
    }

    async fn int_getter(&self, ctx: &Context) -> Result<Option<Getter<i64>>> {
        match self {
            Some(cc) => cc.int_getter(ctx).await.map(Some),
            None => Ok(None),
        }
    }

    async fn bool_getter(&self, ctx: &Context) -> Result<Option<Getter<bool>>> {
        match self {
            Some(cc) => cc.bool_getter(ctx).await.map(Some),
            None => Ok(None),
        }
    }

    async fn string_setter(&self, ctx: &Context, param: &str) -> Result<Option<Setter<String>>> {
        match self {
            Some(cc) => cc.string_setter(ctx, param).await.map(Some),
            None => Ok(None),
        }
    }

    async fn float_setter(&self, ctx: &Context, param: &str) -> Result<Option<Setter<f64>>> {
        match self {
            Some(cc) => cc.float_setter(ctx, param).await.map(Some),
            None => Ok(None),
        }
    }

    async fn int_setter(&self, ctx: &Context, param: &str) -> Result<Option<Setter<i64>>> {
        match self {
            Some(cc) => cc.int_setter(ctx, param).await.map(Some),
            None => Ok(None),
        }
    }

    async fn bool_setter(&self, ctx: &Context, param: &str) -> Result<Option<Setter<bool>>> {
        match self {
            Some(cc) => cc.bool_setter(ctx, param).await.map(Some),
            None => Ok(None),
        }
    }

    async fn bytes_setter(&self, ctx: &Context, param: &str) -> Result<Option<Setter<Vec<u8>>>> {
        match self {
            Some(cc) => cc.bytes_setter(ctx, param).await.map(Some),
            None => Ok(None),
        }
    }
}
