//! Charger status from plugged and charging flags

use super::{Config, Context, Getter, Other, Plugin, StringGetter, decode_other, getter_fn};
use crate::error::Result;
use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
struct Settings {
    plugged: Config,
    charging: Config,
}

pub struct Combined {
    ctx: Context,
    plugged: Config,
    charging: Config,
}

pub async fn new_from_config(ctx: Context, other: Other) -> Result<Box<dyn Plugin>> {
    let cc: Settings = decode_other(&other)?;
    Ok(Box::new(Combined {
        ctx,
        plugged: cc.plugged,
        charging: cc.charging,
    }))
}

/// `C` when charging, `B` when only plugged, `A` otherwise
pub fn status(plugged: bool, charging: bool) -> &'static str {
    match (plugged, charging) {
        (_, true) => "C",
        (true, false) => "B",
        (false, false) => "A",
    }
}

#[async_trait]
impl StringGetter for Combined {
    async fn string_getter(&self) -> Result<Getter<String>> {
        let plugged = self.plugged.bool_getter(&self.ctx).await?;
        let charging = self.charging.bool_getter(&self.ctx).await?;

        Ok(getter_fn(move || {
            let plugged = plugged.clone();
            let charging = charging.clone();
            async move {
                let p = plugged().await?;
                let c = charging().await?;
                Ok(status(p, c).to_string())
            }
        }))
    }
}

crate::impl_plugin!(Combined, StringGetter);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status() {
        assert_eq!(status(false, false), "A");
        assert_eq!(status(true, false), "B");
        assert_eq!(status(true, true), "C");
        assert_eq!(status(false, true), "C");
    }

    #[tokio::test]
    async fn test_combined() {
        let ctx = Context::builtin().unwrap();
        let cc = Config::from_yaml(
            "source: combined\nplugged: {source: const, value: true}\ncharging: {source: const, value: false}",
        )
        .unwrap();
        let g = cc.string_getter(&ctx).await.unwrap();
        assert_eq!(g().await.unwrap(), "B");
    }
}
