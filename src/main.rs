use anyhow::{Context as _, Result};
use hestia::config::{Config, DeviceConfig, ValueKind};
use hestia::logging::{get_logger, init_logging};
use hestia::plugin::Context;
use tracing::{error, info};

/// Resolve a device and read its value once
async fn read(ctx: &Context, device: &DeviceConfig) -> hestia::Result<String> {
    let cc = &device.plugin;
    Ok(match device.kind {
        ValueKind::Float => {
            let g = cc.float_getter(ctx).await?;
            g().await?.to_string()
        }
        ValueKind::Int => {
            let g = cc.int_getter(ctx).await?;
            g().await?.to_string()
        }
        ValueKind::Bool => {
            let g = cc.bool_getter(ctx).await?;
            g().await?.to_string()
        }
        ValueKind::String => {
            let g = cc.string_getter(ctx).await?;
            g().await?
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path).with_context(|| format!("loading {}", path))?,
        None => Config::load().context("loading configuration")?,
    };
    config.validate()?;
    init_logging(&config.logging)?;

    let logger = get_logger("main");
    logger.info(&format!(
        "Hestia {} reading {} devices",
        env!("APP_VERSION"),
        config.devices.len()
    ));

    let mut ctx = Context::builtin()?;
    if let Some(mqtt) = &config.mqtt {
        ctx = ctx.with_mqtt(mqtt.clone());
    }

    let mut failed = 0;
    for (name, device) in &config.devices {
        let ctx = ctx.clone().with_device(name);
        match read(&ctx, device).await {
            Ok(value) => info!(device = %name, kind = %device.kind, "{}", value),
            Err(e) => {
                failed += 1;
                error!(device = %name, source = %device.plugin.source, "{}", e);
            }
        }
    }

    ctx.cancel_token().cancel();

    if failed > 0 {
        anyhow::bail!("{} of {} devices failed", failed, config.devices.len());
    }
    Ok(())
}
