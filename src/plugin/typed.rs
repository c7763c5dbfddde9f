//! Scalar types accessors can be resolved for
//!
//! Lets compositions such as `switch`, `sequence` or `watchdog` be written
//! once for every value type.

use super::getter::parse_float;
use super::{Config, Context, Getter, Setter};
use crate::error::{HestiaError, Result};
use async_trait::async_trait;
use std::fmt;

#[async_trait]
pub trait Typed: Clone + PartialEq + fmt::Display + Send + Sync + 'static {
    async fn getter(cc: &Config, ctx: &Context) -> Result<Getter<Self>>;

    async fn setter(cc: &Config, ctx: &Context, param: &str) -> Result<Setter<Self>>;

    /// Parse a configured scalar
    fn parse(s: &str) -> Result<Self>;
}

/// Parse `1`, `t`, `true`, `0`, `f`, `false` in any case
pub fn parse_bool(s: &str) -> Result<bool> {
    match s.trim().to_lowercase().as_str() {
        "1" | "t" | "true" => Ok(true),
        "0" | "f" | "false" => Ok(false),
        _ => Err(HestiaError::invalid(format!("not a bool: {}", s.trim()))),
    }
}

pub fn parse_int(s: &str) -> Result<i64> {
    s.trim()
        .parse()
        .map_err(|_| HestiaError::invalid(format!("not an int: {}", s.trim())))
}

macro_rules! typed {
    ($t:ty, $getter:ident, $setter:ident, $parse:expr) => {
        #[async_trait]
        impl Typed for $t {
            async fn getter(cc: &Config, ctx: &Context) -> Result<Getter<Self>> {
                cc.$getter(ctx).await
            }

            async fn setter(cc: &Config, ctx: &Context, param: &str) -> Result<Setter<Self>> {
                cc.$setter(ctx, param).await
            }

            fn parse(s: &str) -> Result<Self> {
                let parse: fn(&str) -> Result<Self> = $parse;
                parse(s)
            }
        }
    };
}

typed!(i64, int_getter, int_setter, parse_int);
typed!(f64, float_getter, float_setter, parse_float);
typed!(bool, bool_getter, bool_setter, parse_bool);
typed!(String, string_getter, string_setter, |s: &str| Ok(s.to_string()));
