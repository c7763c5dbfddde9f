//! Random positive integers in front of a child setter

use super::{Config, Context, IntSetter, Other, Plugin, Setter, decode_other, setter_fn};
use crate::error::Result;
use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
struct Settings {
    set: Config,
}

pub struct Random {
    ctx: Context,
    set: Config,
}

pub async fn new_from_config(ctx: Context, other: Other) -> Result<Box<dyn Plugin>> {
    let cc: Settings = decode_other(&other)?;
    Ok(Box::new(Random { ctx, set: cc.set }))
}

#[async_trait]
impl IntSetter for Random {
    async fn int_setter(&self, param: &str) -> Result<Setter<i64>> {
        let set = self.set.int_setter(&self.ctx, param).await?;
        // the written value only triggers the write
        Ok(setter_fn(move |_: i64| {
            let v = rand::thread_rng().gen_range(1..=i64::MAX);
            set(v)
        }))
    }
}

crate::impl_plugin!(Random, IntSetter);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::testutil::{Recorder, context};

    #[tokio::test]
    async fn test_positive() {
        let rec = Recorder::default();
        let ctx = context(&[&rec]);
        let cc = Config::from_yaml("source: random\nset: {source: rec}").unwrap();
        let set = cc.int_setter(&ctx, "").await.unwrap();

        for _ in 0..10 {
            set(0).await.unwrap();
        }

        let writes = rec.writes();
        assert_eq!(writes.len(), 10);
        assert!(writes.iter().all(|w| w.parse::<i64>().unwrap() > 0));
    }
}
