//! Recording setters for composition tests

use super::{
    BoolSetter, BytesSetter, Context, FloatSetter, IntSetter, Plugin, Registry, Setter,
    StringSetter, setter_fn,
};
use crate::error::{HestiaError, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// Records every write as text; writes of `fail` are rejected
#[derive(Default, Clone)]
pub struct Recorder {
    pub writes: Arc<Mutex<Vec<String>>>,
    pub fail: Arc<Mutex<Option<String>>>,
}

impl Recorder {
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }

    pub fn fail_on(&self, v: &str) {
        *self.fail.lock().unwrap() = Some(v.to_string());
    }

    fn setter<T: ToString + Send + 'static>(&self, param: &str) -> Setter<T> {
        let rec = self.clone();
        let param = param.to_string();
        setter_fn(move |v: T| {
            let s = v.to_string();
            let res = if rec.fail.lock().unwrap().as_deref() == Some(s.as_str()) {
                Err(HestiaError::generic(format!("rejected {}", s)))
            } else {
                rec.writes.lock().unwrap().push(if param.is_empty() {
                    s
                } else {
                    format!("{}={}", param, s)
                });
                Ok(())
            };
            async move { res }
        })
    }
}

#[async_trait]
impl IntSetter for Recorder {
    async fn int_setter(&self, param: &str) -> Result<Setter<i64>> {
        Ok(self.setter(param))
    }
}

#[async_trait]
impl FloatSetter for Recorder {
    async fn float_setter(&self, param: &str) -> Result<Setter<f64>> {
        Ok(self.setter(param))
    }
}

#[async_trait]
impl BoolSetter for Recorder {
    async fn bool_setter(&self, param: &str) -> Result<Setter<bool>> {
        Ok(self.setter(param))
    }
}

#[async_trait]
impl StringSetter for Recorder {
    async fn string_setter(&self, param: &str) -> Result<Setter<String>> {
        Ok(self.setter(param))
    }
}

#[async_trait]
impl BytesSetter for Recorder {
    async fn bytes_setter(&self, param: &str) -> Result<Setter<Vec<u8>>> {
        let set: Setter<String> = self.setter(param);
        Ok(setter_fn(move |b: Vec<u8>| set(hex::encode(b))))
    }
}

crate::impl_plugin!(
    Recorder,
    IntSetter,
    FloatSetter,
    BoolSetter,
    StringSetter,
    BytesSetter
);

/// Builtin context with recorders registered as `rec`, `rec2`, …
pub fn context(recorders: &[&Recorder]) -> Context {
    let mut r = Registry::builtin().unwrap();
    for (i, rec) in recorders.iter().enumerate() {
        let name = if i == 0 {
            "rec".to_string()
        } else {
            format!("rec{}", i + 1)
        };
        let rec = (*rec).clone();
        r.add(&name, move |_| Ok(Box::new(rec.clone()) as Box<dyn Plugin>))
            .unwrap();
    }
    Context::new(Arc::new(r))
}
