//! Pure delay usable as a step in a sequence

use super::{
    BoolSetter, FloatSetter, IntSetter, Other, Plugin, Setter, StringSetter, decode_other,
    setter_fn,
};
use crate::error::Result;
use crate::util::duration;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
struct Settings {
    #[serde(with = "duration")]
    duration: Duration,
}

pub struct Sleep {
    duration: Duration,
}

pub fn new_from_config(other: Other) -> Result<Box<dyn Plugin>> {
    let cc: Settings = decode_other(&other)?;
    Ok(Box::new(Sleep {
        duration: cc.duration,
    }))
}

impl Sleep {
    fn sleeper<T: Send + 'static>(&self) -> Setter<T> {
        let d = self.duration;
        setter_fn(move |_: T| async move {
            tokio::time::sleep(d).await;
            Ok(())
        })
    }
}

#[async_trait]
impl IntSetter for Sleep {
    async fn int_setter(&self, _param: &str) -> Result<Setter<i64>> {
        Ok(self.sleeper())
    }
}

#[async_trait]
impl FloatSetter for Sleep {
    async fn float_setter(&self, _param: &str) -> Result<Setter<f64>> {
        Ok(self.sleeper())
    }
}

#[async_trait]
impl BoolSetter for Sleep {
    async fn bool_setter(&self, _param: &str) -> Result<Setter<bool>> {
        Ok(self.sleeper())
    }
}

#[async_trait]
impl StringSetter for Sleep {
    async fn string_setter(&self, _param: &str) -> Result<Setter<String>> {
        Ok(self.sleeper())
    }
}

crate::impl_plugin!(Sleep, IntSetter, FloatSetter, BoolSetter, StringSetter);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{Config, Context};
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_sleeps() {
        let ctx = Context::builtin().unwrap();
        let cc = Config::from_yaml("source: sleep\nduration: 2s").unwrap();
        let set = cc.int_setter(&ctx, "").await.unwrap();

        let start = Instant::now();
        set(1).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(2));
    }
}
