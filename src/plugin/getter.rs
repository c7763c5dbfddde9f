//! Typed accessors derived from textual ones

use super::{Getter, getter_fn};
use crate::error::{HestiaError, Result};
use crate::util::truish;

/// Parse a float, rejecting NaN and infinities
pub fn parse_float(s: &str) -> Result<f64> {
    let v: f64 = s
        .trim()
        .parse()
        .map_err(|_| HestiaError::invalid(format!("not a number: {}", s.trim())))?;
    if !v.is_finite() {
        return Err(HestiaError::invalid(format!("not a number: {}", s.trim())));
    }
    Ok(v)
}

/// Float accessor multiplying the parsed value by `scale`
pub fn float(g: Getter<String>, scale: f64) -> Getter<f64> {
    getter_fn(move || {
        let g = g.clone();
        async move {
            let s = g().await?;
            Ok(parse_float(&s)? * scale)
        }
    })
}

/// Int accessor truncating the scaled float
pub fn int(g: Getter<String>, scale: f64) -> Getter<i64> {
    let f = float(g, scale);
    getter_fn(move || {
        let f = f.clone();
        async move { Ok(f().await? as i64) }
    })
}

/// Bool accessor accepting `true`, `on`, `1` and friends
pub fn bool(g: Getter<String>) -> Getter<bool> {
    getter_fn(move || {
        let g = g.clone();
        async move { Ok(truish(&g().await?)) }
    })
}

/// Derive float, int and bool getters from a `StringGetter` with a `scale` field
macro_rules! derive_typed_getters {
    ($ty:ty) => {
        #[async_trait::async_trait]
        impl $crate::plugin::FloatGetter for $ty {
            async fn float_getter(&self) -> $crate::error::Result<$crate::plugin::Getter<f64>> {
                let g = $crate::plugin::StringGetter::string_getter(self).await?;
                Ok($crate::plugin::getter::float(g, self.scale))
            }
        }

        #[async_trait::async_trait]
        impl $crate::plugin::IntGetter for $ty {
            async fn int_getter(&self) -> $crate::error::Result<$crate::plugin::Getter<i64>> {
                let g = $crate::plugin::StringGetter::string_getter(self).await?;
                Ok($crate::plugin::getter::int(g, self.scale))
            }
        }

        #[async_trait::async_trait]
        impl $crate::plugin::BoolGetter for $ty {
            async fn bool_getter(&self) -> $crate::error::Result<$crate::plugin::Getter<bool>> {
                let g = $crate::plugin::StringGetter::string_getter(self).await?;
                Ok($crate::plugin::getter::bool(g))
            }
        }
    };
}

pub(crate) use derive_typed_getters;
