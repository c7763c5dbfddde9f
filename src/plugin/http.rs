//! HTTP request plugin

use super::getter::derive_typed_getters;
use super::pipeline::{Pipeline, PipelineSettings};
use super::{
    BoolSetter, Context, FloatSetter, Getter, IntSetter, Other, Plugin, Setter, StringGetter,
    StringSetter, decode_other, getter_fn, setter_fn,
};
use crate::error::{HestiaError, Result};
use crate::request::{AuthSettings, Helper, header_map};
use crate::util::template::{self, Value};
use crate::util::{Cached, DEFAULT_TIMEOUT, default_scheme, duration};
use async_trait::async_trait;
use reqwest::Method;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct Settings {
    uri: String,
    method: String,
    headers: BTreeMap<String, String>,
    body: String,
    #[serde(flatten)]
    pipeline: PipelineSettings,
    scale: f64,
    insecure: bool,
    auth: AuthSettings,
    #[serde(with = "duration")]
    timeout: Duration,
    #[serde(with = "duration")]
    cache: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            uri: String::new(),
            method: "GET".to_string(),
            headers: BTreeMap::new(),
            body: String::new(),
            pipeline: PipelineSettings::default(),
            scale: 1.0,
            insecure: false,
            auth: AuthSettings::default(),
            timeout: DEFAULT_TIMEOUT,
            cache: Duration::ZERO,
        }
    }
}

struct Inner {
    helper: Helper,
    url: String,
    method: Method,
    headers: HeaderMap,
    body: String,
    pipeline: Pipeline,
}

impl Inner {
    async fn request(&self, url: &str, body: &str) -> Result<Vec<u8>> {
        let url = default_scheme(url, "http");
        let body = (self.method != Method::GET).then_some(body);
        self.helper
            .do_body(&self.method, &url, &self.headers, body)
            .await
    }

    async fn fetch(&self) -> Result<Vec<u8>> {
        let url = template::render(&self.url, None)?;
        self.request(&url, &self.body).await
    }

    async fn set(&self, param: &str, value: Value) -> Result<()> {
        let url = template::render(&self.url, Some((param, &value)))?;
        let body = template::render(&self.body, Some((param, &value)))?;
        self.request(&url, &body).await.map(|_| ())
    }
}

pub struct Http {
    inner: Arc<Inner>,
    cached: Option<Arc<Cached<Vec<u8>>>>,
    scale: f64,
}

/// Build an http plugin from its settings
pub async fn new_from_config(ctx: Context, other: Other) -> Result<Box<dyn Plugin>> {
    let cc: Settings = decode_other(&other)?;

    if cc.uri.is_empty() {
        return Err(HestiaError::config("missing uri"));
    }

    let mut method = Method::from_bytes(cc.method.to_uppercase().as_bytes())
        .map_err(|_| HestiaError::config(format!("invalid method: {}", cc.method)))?;
    // a body turns the default GET into a POST
    if !cc.body.is_empty() && method == Method::GET {
        method = Method::POST;
    }

    let logger = ctx.logger("http");
    let helper = Helper::new(cc.timeout, cc.insecure, cc.auth.auth()?, logger)?;

    let inner = Arc::new(Inner {
        helper,
        url: cc.uri,
        method,
        headers: header_map(&cc.headers)?,
        body: cc.body,
        pipeline: Pipeline::new(&cc.pipeline)?,
    });

    // cached GETs share one in-flight request per plugin
    let cached = (!cc.cache.is_zero() && inner.method == Method::GET).then(|| {
        let inner = inner.clone();
        let fetch: Getter<Vec<u8>> = getter_fn(move || {
            let inner = inner.clone();
            async move { inner.fetch().await }
        });
        Arc::new(Cached::new(fetch, cc.cache))
    });

    Ok(Box::new(Http {
        inner,
        cached,
        scale: cc.scale,
    }))
}

#[async_trait]
impl StringGetter for Http {
    async fn string_getter(&self) -> Result<Getter<String>> {
        let inner = self.inner.clone();
        let cached = self.cached.clone();
        Ok(getter_fn(move || {
            let inner = inner.clone();
            let cached = cached.clone();
            async move {
                let b = match cached {
                    Some(c) => c.get().await?,
                    None => inner.fetch().await?,
                };
                inner.pipeline.process(&b)
            }
        }))
    }
}

derive_typed_getters!(Http);

macro_rules! http_setter {
    ($trait:ident, $name:ident, $t:ty) => {
        #[async_trait]
        impl $trait for Http {
            async fn $name(&self, param: &str) -> Result<Setter<$t>> {
                let inner = self.inner.clone();
                let param = param.to_string();
                Ok(setter_fn(move |v: $t| {
                    let inner = inner.clone();
                    let param = param.clone();
                    async move { inner.set(&param, Value::from(v)).await }
                }))
            }
        }
    };
}

http_setter!(IntSetter, int_setter, i64);
http_setter!(FloatSetter, float_setter, f64);
http_setter!(StringSetter, string_setter, String);
http_setter!(BoolSetter, bool_setter, bool);

crate::impl_plugin!(
    Http,
    StringGetter,
    FloatGetter,
    IntGetter,
    BoolGetter,
    StringSetter,
    FloatSetter,
    IntSetter,
    BoolSetter
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults() {
        let s: Settings = serde_yaml::from_str("uri: localhost/x").unwrap();
        assert_eq!(s.method, "GET");
        assert_eq!(s.scale, 1.0);
        assert_eq!(s.timeout, DEFAULT_TIMEOUT);
        assert!(s.cache.is_zero());

        let s: Settings =
            serde_yaml::from_str("uri: x\ncache: 5s\njq: .a\nauth:\n  type: basic\n  user: u")
                .unwrap();
        assert_eq!(s.cache, Duration::from_secs(5));
        assert_eq!(s.pipeline.jq, ".a");
        assert_eq!(s.auth.user, "u");
    }

    #[tokio::test]
    async fn test_missing_uri() {
        let ctx = Context::builtin().unwrap();
        let err = new_from_config(ctx, Other::new()).await.err().unwrap();
        assert_eq!(err.to_string(), "Configuration error: missing uri");
    }
}
