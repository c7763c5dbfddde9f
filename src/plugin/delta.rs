//! Forward the difference to the previously written total

use super::{
    Config, Context, FloatSetter, IntSetter, Other, Plugin, Setter, decode_other, setter_fn,
};
use crate::error::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::ops::Sub;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Deserialize)]
struct Settings {
    set: Config,
}

pub struct Delta {
    ctx: Context,
    set: Config,
}

pub async fn new_from_config(ctx: Context, other: Other) -> Result<Box<dyn Plugin>> {
    let cc: Settings = decode_other(&other)?;
    Ok(Box::new(Delta { ctx, set: cc.set }))
}

/// Setter writing `value - total` and committing `value` as total on success
fn delta<T>(set: Setter<T>) -> Setter<T>
where
    T: Sub<Output = T> + Copy + Default + Send + Sync + 'static,
{
    let total = Arc::new(Mutex::new(T::default()));
    setter_fn(move |v: T| {
        let set = set.clone();
        let total = total.clone();
        async move {
            // held across the write so concurrent writes see committed totals
            let mut total = total.lock().await;
            set(v - *total).await?;
            *total = v;
            Ok(())
        }
    })
}

#[async_trait]
impl FloatSetter for Delta {
    async fn float_setter(&self, param: &str) -> Result<Setter<f64>> {
        Ok(delta(self.set.float_setter(&self.ctx, param).await?))
    }
}

#[async_trait]
impl IntSetter for Delta {
    async fn int_setter(&self, param: &str) -> Result<Setter<i64>> {
        Ok(delta(self.set.int_setter(&self.ctx, param).await?))
    }
}

crate::impl_plugin!(Delta, FloatSetter, IntSetter);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::testutil::{Recorder, context};

    #[tokio::test]
    async fn test_commit_on_success() {
        let rec = Recorder::default();
        let ctx = context(&[&rec]);
        let cc = Config::from_yaml("source: delta\nset: {source: rec}").unwrap();
        let set = cc.int_setter(&ctx, "").await.unwrap();

        set(10).await.unwrap();
        set(15).await.unwrap();

        rec.fail_on("10");
        assert!(set(25).await.is_err());

        rec.fail_on("none");
        set(25).await.unwrap();

        assert_eq!(rec.writes(), vec!["10", "5", "10"]);
    }
}
