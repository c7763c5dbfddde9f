//! Plugin factories and the context they are built in

use super::{Other, Plugin};
use crate::config::MqttSettings;
use crate::error::{HestiaError, Result};
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Builds a plugin from its settings
pub type Factory =
    Arc<dyn Fn(Context, Other) -> BoxFuture<'static, Result<Box<dyn Plugin>>> + Send + Sync>;

/// Name to factory lookup. Names are case-insensitive and registered once.
#[derive(Default, Clone)]
pub struct Registry {
    factories: HashMap<String, Factory>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("plugins", &self.names())
            .finish()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, name: &str, factory: Factory) -> Result<()> {
        let key = name.to_lowercase();
        if self.factories.contains_key(&key) {
            return Err(HestiaError::DuplicatePlugin { name: key });
        }
        self.factories.insert(key, factory);
        Ok(())
    }

    /// Register a factory that needs no context
    pub fn add<F>(&mut self, name: &str, factory: F) -> Result<()>
    where
        F: Fn(Other) -> Result<Box<dyn Plugin>> + Send + Sync + 'static,
    {
        let factory = Arc::new(factory);
        self.insert(
            name,
            Arc::new(move |_ctx, other| {
                let res = factory(other);
                async move { res }.boxed()
            }),
        )
    }

    /// Register a factory receiving the resolution context
    pub fn add_ctx<F, Fut>(&mut self, name: &str, factory: F) -> Result<()>
    where
        F: Fn(Context, Other) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Box<dyn Plugin>>> + Send + 'static,
    {
        self.insert(name, Arc::new(move |ctx, other| factory(ctx, other).boxed()))
    }

    pub fn get(&self, name: &str) -> Result<Factory> {
        self.factories
            .get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| HestiaError::unknown_source(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(&name.to_lowercase())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Registry with every built-in plugin
    pub fn builtin() -> Result<Self> {
        use super::*;

        let mut r = Self::new();

        r.add_ctx("calc", calc::new_from_config)?;
        r.add_ctx("combined", combined::new_from_config)?;
        r.add("const", constant::new_from_config)?;
        r.add_ctx("convert", convert::new_from_config)?;
        r.add_ctx("delta", delta::new_from_config)?;
        r.add_ctx("ignore", ignore::new_from_config)?;
        r.add_ctx("map", map::new_from_config)?;
        r.add_ctx("random", random::new_from_config)?;
        r.add_ctx("sequence", sequence::new_from_config)?;
        r.add("sleep", sleep::new_from_config)?;
        r.add_ctx("switch", switch::new_from_config)?;
        r.add("timeseries", timeseries::new_from_config)?;
        r.add_ctx("valid", valid::new_from_config)?;
        r.add_ctx("watchdog", watchdog::new_from_config)?;

        r.add_ctx("gpio", gpio::new_from_config)?;
        r.add_ctx("http", http::new_from_config)?;
        r.add_ctx("modbus", modbus::new_from_config)?;
        r.add_ctx("mqtt", mqtt::new_from_config)?;
        r.add_ctx("script", script::new_from_config)?;
        r.add_ctx("sma", sma::new_from_config)?;
        r.add_ctx("snmp", snmp::new_from_config)?;
        r.add_ctx("socket", socket::new_from_config)?;
        r.add_ctx("websocket", socket::new_from_config)?;
        r.add_ctx("sunspec", sunspec::new_from_config)?;

        Ok(r)
    }
}

/// Resolution context handed to every factory
#[derive(Clone)]
pub struct Context {
    registry: Arc<Registry>,
    cancel: CancellationToken,
    device: Option<String>,
    mqtt: Option<Arc<MqttSettings>>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("device", &self.device)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl Context {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            cancel: CancellationToken::new(),
            device: None,
            mqtt: None,
        }
    }

    /// Context over the built-in registry
    pub fn builtin() -> Result<Self> {
        Ok(Self::new(Arc::new(Registry::builtin()?)))
    }

    /// Background tasks of plugins built in this context stop with `cancel`
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_device(mut self, device: &str) -> Self {
        self.device = Some(device.to_string());
        self
    }

    /// Broker used by mqtt plugins without their own `broker`
    pub fn with_mqtt(mut self, settings: MqttSettings) -> Self {
        self.mqtt = Some(Arc::new(settings));
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }

    pub fn mqtt(&self) -> Option<&MqttSettings> {
        self.mqtt.as_deref()
    }

    /// Logger for `component` labelled with the device being resolved
    pub fn logger(&self, component: &str) -> StructuredLogger {
        let mut context = LogContext::new(component);
        if let Some(device) = &self.device {
            context = context.with_device(device);
        }
        get_logger_with_context(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{Config, IntGetter, getter_fn};
    use async_trait::async_trait;

    struct Answer;

    #[async_trait]
    impl IntGetter for Answer {
        async fn int_getter(&self) -> Result<crate::plugin::Getter<i64>> {
            Ok(getter_fn(|| async { Ok(42) }))
        }
    }

    crate::impl_plugin!(Answer, IntGetter);

    fn answer(_: Other) -> Result<Box<dyn Plugin>> {
        Ok(Box::new(Answer))
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut r = Registry::new();
        r.add("answer", answer).unwrap();
        let err = r.add("Answer", answer).unwrap_err();
        assert!(matches!(err, HestiaError::DuplicatePlugin { .. }));
    }

    #[test]
    fn test_builtin_registry() {
        let r = Registry::builtin().unwrap();
        for name in ["calc", "const", "http", "modbus", "watchdog", "switch", "snmp"] {
            assert!(r.contains(name), "{}", name);
        }
        assert!(!r.contains("go"));
    }

    #[tokio::test]
    async fn test_scoped_registry_resolution() {
        let mut r = Registry::new();
        r.add("answer", answer).unwrap();
        let ctx = Context::new(Arc::new(r));

        let cc = Config::new("ANSWER", Other::new());
        let g = cc.int_getter(&ctx).await.unwrap();
        assert_eq!(g().await.unwrap(), 42);

        let err = cc.float_getter(&ctx).await.err().unwrap();
        assert_eq!(
            err.to_string(),
            "ANSWER: plugin does not implement FloatGetter"
        );

        let err = Config::new("const", Other::new())
            .int_getter(&ctx)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, HestiaError::UnknownSource { .. }));
    }
}
