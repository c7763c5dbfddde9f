//! Plugin runtime
//!
//! Plugins are built from a [`Config`] through the [`Registry`] and expose
//! any subset of the nine capabilities below. Each capability hands out an
//! accessor closure that is constructed once and called repeatedly.

use crate::error::Result;
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Implement [`Plugin`] for a type by listing the capabilities it provides
#[macro_export]
macro_rules! impl_plugin {
    ($ty:ty $(, $cap:ident)* $(,)?) => {
        impl $crate::plugin::Plugin for $ty {
            $( $crate::impl_plugin!(@as $cap); )*
        }
    };
    (@as StringGetter) => {
        fn as_string_getter(&self) -> Option<&dyn $crate::plugin::StringGetter> { Some(self) }
    };
    (@as FloatGetter) => {
        fn as_float_getter(&self) -> Option<&dyn $crate::plugin::FloatGetter> { Some(self) }
    };
    (@as IntGetter) => {
        fn as_int_getter(&self) -> Option<&dyn $crate::plugin::IntGetter> { Some(self) }
    };
    (@as BoolGetter) => {
        fn as_bool_getter(&self) -> Option<&dyn $crate::plugin::BoolGetter> { Some(self) }
    };
    (@as StringSetter) => {
        fn as_string_setter(&self) -> Option<&dyn $crate::plugin::StringSetter> { Some(self) }
    };
    (@as FloatSetter) => {
        fn as_float_setter(&self) -> Option<&dyn $crate::plugin::FloatSetter> { Some(self) }
    };
    (@as IntSetter) => {
        fn as_int_setter(&self) -> Option<&dyn $crate::plugin::IntSetter> { Some(self) }
    };
    (@as BoolSetter) => {
        fn as_bool_setter(&self) -> Option<&dyn $crate::plugin::BoolSetter> { Some(self) }
    };
    (@as BytesSetter) => {
        fn as_bytes_setter(&self) -> Option<&dyn $crate::plugin::BytesSetter> { Some(self) }
    };
}

pub mod config;
pub mod getter;
pub mod pipeline;
pub mod registry;
pub mod typed;

#[cfg(test)]
mod testutil;

// protocol backends
pub mod gpio;
pub mod http;
pub mod modbus;
pub mod mqtt;
pub mod script;
pub mod sma;
pub mod snmp;
pub mod socket;
pub mod sunspec;

// compositions
pub mod calc;
pub mod combined;
pub mod constant;
pub mod convert;
pub mod delta;
pub mod ignore;
pub mod map;
pub mod random;
pub mod sequence;
pub mod sleep;
pub mod switch;
pub mod timeseries;
pub mod valid;
pub mod watchdog;

pub use config::{Config, OptionalConfig, Other, decode_other};
pub use registry::{Context, Factory, Registry};
pub use typed::Typed;

/// Reusable read accessor
pub type Getter<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// Reusable write accessor
pub type Setter<T> = Arc<dyn Fn(T) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Wrap an async closure as a [`Getter`]
pub fn getter_fn<T, F, Fut>(f: F) -> Getter<T>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

/// Wrap an async closure as a [`Setter`]
pub fn setter_fn<T, F, Fut>(f: F) -> Setter<T>
where
    T: 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |v| f(v).boxed())
}

#[async_trait]
pub trait StringGetter: Send + Sync {
    async fn string_getter(&self) -> Result<Getter<String>>;
}

#[async_trait]
pub trait FloatGetter: Send + Sync {
    async fn float_getter(&self) -> Result<Getter<f64>>;
}

#[async_trait]
pub trait IntGetter: Send + Sync {
    async fn int_getter(&self) -> Result<Getter<i64>>;
}

#[async_trait]
pub trait BoolGetter: Send + Sync {
    async fn bool_getter(&self) -> Result<Getter<bool>>;
}

/// Setters receive the logical name of the written field as `param`
#[async_trait]
pub trait StringSetter: Send + Sync {
    async fn string_setter(&self, param: &str) -> Result<Setter<String>>;
}

#[async_trait]
pub trait FloatSetter: Send + Sync {
    async fn float_setter(&self, param: &str) -> Result<Setter<f64>>;
}

#[async_trait]
pub trait IntSetter: Send + Sync {
    async fn int_setter(&self, param: &str) -> Result<Setter<i64>>;
}

#[async_trait]
pub trait BoolSetter: Send + Sync {
    async fn bool_setter(&self, param: &str) -> Result<Setter<bool>>;
}

#[async_trait]
pub trait BytesSetter: Send + Sync {
    async fn bytes_setter(&self, param: &str) -> Result<Setter<Vec<u8>>>;
}

/// An instantiated plugin, identified only by the capabilities it offers
pub trait Plugin: Send + Sync {
    fn as_string_getter(&self) -> Option<&dyn StringGetter> {
        None
    }
    fn as_float_getter(&self) -> Option<&dyn FloatGetter> {
        None
    }
    fn as_int_getter(&self) -> Option<&dyn IntGetter> {
        None
    }
    fn as_bool_getter(&self) -> Option<&dyn BoolGetter> {
        None
    }
    fn as_string_setter(&self) -> Option<&dyn StringSetter> {
        None
    }
    fn as_float_setter(&self) -> Option<&dyn FloatSetter> {
        None
    }
    fn as_int_setter(&self) -> Option<&dyn IntSetter> {
        None
    }
    fn as_bool_setter(&self) -> Option<&dyn BoolSetter> {
        None
    }
    fn as_bytes_setter(&self) -> Option<&dyn BytesSetter> {
        None
    }
}

/// Capability names used in resolution errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    StringGetter,
    FloatGetter,
    IntGetter,
    BoolGetter,
    StringSetter,
    FloatSetter,
    IntSetter,
    BoolSetter,
    BytesSetter,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HestiaError;

    struct Fixed(i64);

    #[async_trait]
    impl IntGetter for Fixed {
        async fn int_getter(&self) -> Result<Getter<i64>> {
            let v = self.0;
            Ok(getter_fn(move || async move { Ok(v) }))
        }
    }

    crate::impl_plugin!(Fixed, IntGetter);

    #[tokio::test]
    async fn test_capability_accessors() {
        let p: Box<dyn Plugin> = Box::new(Fixed(7));
        assert!(p.as_float_getter().is_none());
        assert!(p.as_int_setter().is_none());

        let g = p.as_int_getter().unwrap().int_getter().await.unwrap();
        assert_eq!(g().await.unwrap(), 7);
        assert_eq!(g().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_setter_fn() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let s = seen.clone();
        let set: Setter<i64> = setter_fn(move |v| {
            let s = s.clone();
            async move {
                if v < 0 {
                    return Err(HestiaError::invalid("negative"));
                }
                s.lock().unwrap().push(v);
                Ok(())
            }
        });

        set(1).await.unwrap();
        assert!(set(-1).await.is_err());
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[test]
    fn test_capability_display() {
        assert_eq!(Capability::BytesSetter.to_string(), "BytesSetter");
    }
}
