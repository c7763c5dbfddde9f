//! Dispatch writes by value to per-case setters

use super::{
    BoolSetter, Config, Context, FloatSetter, IntSetter, Other, Plugin, Setter, StringSetter,
    Typed, decode_other, setter_fn,
};
use crate::error::{HestiaError, Result};
use crate::util::scalar;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize)]
struct Case {
    #[serde(deserialize_with = "scalar::string")]
    case: String,
    set: Config,
}

#[derive(Debug, Clone, Deserialize)]
struct Settings {
    switch: Vec<Case>,
    default: Option<Config>,
}

pub struct Switch {
    ctx: Context,
    cases: Vec<Case>,
    default: Option<Config>,
}

pub async fn new_from_config(ctx: Context, other: Other) -> Result<Box<dyn Plugin>> {
    let cc: Settings = decode_other(&other)?;

    let mut seen = HashSet::new();
    for case in &cc.switch {
        if !seen.insert(case.case.as_str()) {
            return Err(HestiaError::config(format!("duplicate case: {}", case.case)));
        }
    }

    Ok(Box::new(Switch {
        ctx,
        cases: cc.switch,
        default: cc.default,
    }))
}

impl Switch {
    async fn switch<T: Typed>(&self, param: &str) -> Result<Setter<T>> {
        let mut cases = Vec::with_capacity(self.cases.len());
        for case in &self.cases {
            let value = T::parse(&case.case)?;
            // distinct spellings may still parse to the same value
            if cases.iter().any(|(c, _)| *c == value) {
                return Err(HestiaError::config(format!("duplicate case: {}", value)));
            }
            cases.push((value, T::setter(&case.set, &self.ctx, param).await?));
        }

        let default = match &self.default {
            Some(cc) => Some(T::setter(cc, &self.ctx, param).await?),
            None => None,
        };

        let cases = Arc::new(cases);
        Ok(setter_fn(move |v: T| {
            let set = cases
                .iter()
                .find(|(case, _)| *case == v)
                .map(|(_, set)| set.clone())
                .or_else(|| default.clone());
            async move {
                match set {
                    Some(set) => set(v).await,
                    None => Err(HestiaError::not_found(v)),
                }
            }
        }))
    }
}

#[async_trait]
impl IntSetter for Switch {
    async fn int_setter(&self, param: &str) -> Result<Setter<i64>> {
        self.switch(param).await
    }
}

#[async_trait]
impl FloatSetter for Switch {
    async fn float_setter(&self, param: &str) -> Result<Setter<f64>> {
        self.switch(param).await
    }
}

#[async_trait]
impl BoolSetter for Switch {
    async fn bool_setter(&self, param: &str) -> Result<Setter<bool>> {
        self.switch(param).await
    }
}

#[async_trait]
impl StringSetter for Switch {
    async fn string_setter(&self, param: &str) -> Result<Setter<String>> {
        self.switch(param).await
    }
}

crate::impl_plugin!(Switch, IntSetter, FloatSetter, BoolSetter, StringSetter);
