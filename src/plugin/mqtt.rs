//! MQTT topic plugin

use super::getter::derive_typed_getters;
use super::pipeline::{Pipeline, PipelineSettings};
use super::{
    BoolSetter, Context, FloatSetter, Getter, IntSetter, Other, Plugin, Setter, StringGetter,
    StringSetter, decode_other, getter_fn, setter_fn,
};
use crate::config::MqttSettings;
use crate::error::{HestiaError, Result};
use crate::logging::StructuredLogger;
use crate::mqtt::{Client, registered_client};
use crate::util::template::{self, Value};
use crate::util::{Monitor, duration};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct Settings {
    #[serde(flatten)]
    broker: MqttSettings,
    topic: String,
    payload: String,
    retained: bool,
    scale: f64,
    #[serde(with = "duration")]
    timeout: Duration,
    #[serde(flatten)]
    pipeline: PipelineSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            broker: MqttSettings::default(),
            topic: String::new(),
            payload: String::new(),
            retained: false,
            scale: 1.0,
            timeout: Duration::ZERO,
            pipeline: PipelineSettings::default(),
        }
    }
}

pub struct Mqtt {
    client: Arc<Client>,
    topic: String,
    payload: String,
    retained: bool,
    timeout: Duration,
    pipeline: Arc<Pipeline>,
    scale: f64,
    logger: StructuredLogger,
}

/// Build an mqtt plugin; the broker defaults to the one configured globally
pub async fn new_from_config(ctx: Context, other: Other) -> Result<Box<dyn Plugin>> {
    let cc: Settings = decode_other(&other)?;

    if cc.topic.is_empty() {
        return Err(HestiaError::config("missing topic"));
    }

    let broker = if cc.broker.broker.is_empty() {
        ctx.mqtt()
            .cloned()
            .ok_or_else(|| HestiaError::config("missing mqtt broker configuration"))?
    } else {
        cc.broker.clone()
    };

    let client = registered_client(&broker).await?;

    Ok(Box::new(Mqtt {
        client,
        topic: cc.topic,
        payload: cc.payload,
        retained: cc.retained,
        timeout: cc.timeout,
        pipeline: Arc::new(Pipeline::new(&cc.pipeline)?),
        scale: cc.scale,
        logger: ctx.logger("mqtt"),
    }))
}

impl Mqtt {
    fn publisher<T: Into<Value> + Send + 'static>(&self, param: &str) -> Setter<T> {
        let client = self.client.clone();
        let topic = self.topic.clone();
        let payload = if self.payload.is_empty() {
            format!("${{{}}}", param)
        } else {
            self.payload.clone()
        };
        let retained = self.retained;
        let param = param.to_string();

        setter_fn(move |v: T| {
            let value: Value = v.into();
            let rendered = template::render(&topic, Some((&param, &value)))
                .and_then(|t| Ok((t, template::render(&payload, Some((&param, &value)))?)));
            let client = client.clone();
            async move {
                let (topic, payload) = rendered?;
                client.publish(&topic, retained, payload);
                Ok(())
            }
        })
    }
}

#[async_trait]
impl StringGetter for Mqtt {
    async fn string_getter(&self) -> Result<Getter<String>> {
        let monitor = Arc::new(Monitor::new(self.timeout));

        let m = monitor.clone();
        self.client
            .listen(&self.topic, move |payload| m.set(payload))
            .await?;
        self.logger
            .debug(&format!("subscribed {} at {}", self.topic, self.client.broker()));

        let pipeline = self.pipeline.clone();
        Ok(getter_fn(move || {
            let monitor = monitor.clone();
            let pipeline = pipeline.clone();
            async move {
                let payload = monitor.get().await?;
                pipeline.process(payload.as_bytes())
            }
        }))
    }
}

derive_typed_getters!(Mqtt);

#[async_trait]
impl IntSetter for Mqtt {
    async fn int_setter(&self, param: &str) -> Result<Setter<i64>> {
        Ok(self.publisher(param))
    }
}

#[async_trait]
impl FloatSetter for Mqtt {
    async fn float_setter(&self, param: &str) -> Result<Setter<f64>> {
        Ok(self.publisher(param))
    }
}

#[async_trait]
impl StringSetter for Mqtt {
    async fn string_setter(&self, param: &str) -> Result<Setter<String>> {
        Ok(self.publisher(param))
    }
}

#[async_trait]
impl BoolSetter for Mqtt {
    async fn bool_setter(&self, param: &str) -> Result<Setter<bool>> {
        Ok(self.publisher(param))
    }
}

crate::impl_plugin!(
    Mqtt,
    StringGetter,
    FloatGetter,
    IntGetter,
    BoolGetter,
    StringSetter,
    FloatSetter,
    IntSetter,
    BoolSetter
);
