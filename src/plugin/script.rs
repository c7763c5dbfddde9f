//! Expression script plugin
//!
//! Each invocation evaluates the script in a fresh context so no state leaks
//! between calls. `in` transformations bind child getter values as
//! variables; `out` transformations forward the result to child setters.

use super::{
    BoolGetter, BoolSetter, Config, Context, FloatGetter, FloatSetter, Getter, IntGetter,
    IntSetter, Other, Plugin, Setter, StringGetter, StringSetter, decode_other, getter_fn,
    setter_fn,
};
use crate::config::ValueKind;
use crate::error::{HestiaError, Result};
use async_trait::async_trait;
use evalexpr::{ContextWithMutableVariables, HashMapContext, Value};
use futures::future::try_join_all;
use serde::Deserialize;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize)]
struct TransformationConfig {
    name: String,
    #[serde(default, rename = "type")]
    kind: ValueKind,
    config: Config,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct Settings {
    script: String,
    #[serde(rename = "in")]
    inputs: Vec<TransformationConfig>,
    #[serde(rename = "out")]
    outputs: Vec<TransformationConfig>,
}

enum Input {
    Int(Getter<i64>),
    Float(Getter<f64>),
    String(Getter<String>),
    Bool(Getter<bool>),
}

enum Output {
    Int(Setter<i64>),
    Float(Setter<f64>),
    String(Setter<String>),
    Bool(Setter<bool>),
}

struct Inner {
    script: String,
    inputs: Vec<(String, Input)>,
    outputs: Vec<Output>,
}

pub struct Script {
    inner: Arc<Inner>,
}

/// Build a script plugin, resolving all transformations up front
pub async fn new_from_config(ctx: Context, other: Other) -> Result<Box<dyn Plugin>> {
    let cc: Settings = decode_other(&other)?;

    if cc.script.trim().is_empty() {
        return Err(HestiaError::config("missing script"));
    }
    // fail on syntax errors at setup rather than on first use
    evalexpr::build_operator_tree(&cc.script)
        .map_err(|e| HestiaError::config(format!("script: {}", e)))?;

    let mut inputs = Vec::with_capacity(cc.inputs.len());
    for t in &cc.inputs {
        let input = match t.kind {
            ValueKind::Int => Input::Int(t.config.int_getter(&ctx).await?),
            ValueKind::Float => Input::Float(t.config.float_getter(&ctx).await?),
            ValueKind::String => Input::String(t.config.string_getter(&ctx).await?),
            ValueKind::Bool => Input::Bool(t.config.bool_getter(&ctx).await?),
        };
        inputs.push((t.name.clone(), input));
    }

    let mut outputs = Vec::with_capacity(cc.outputs.len());
    for t in &cc.outputs {
        let output = match t.kind {
            ValueKind::Int => Output::Int(t.config.int_setter(&ctx, &t.name).await?),
            ValueKind::Float => Output::Float(t.config.float_setter(&ctx, &t.name).await?),
            ValueKind::String => Output::String(t.config.string_setter(&ctx, &t.name).await?),
            ValueKind::Bool => Output::Bool(t.config.bool_setter(&ctx, &t.name).await?),
        };
        outputs.push(output);
    }

    Ok(Box::new(Script {
        inner: Arc::new(Inner {
            script: cc.script,
            inputs,
            outputs,
        }),
    }))
}

impl Input {
    async fn value(&self) -> Result<Value> {
        Ok(match self {
            Input::Int(g) => Value::Int(g().await?),
            Input::Float(g) => Value::Float(g().await?),
            Input::String(g) => Value::String(g().await?),
            Input::Bool(g) => Value::Boolean(g().await?),
        })
    }
}

impl Output {
    async fn apply(&self, value: &Value) -> Result<()> {
        match self {
            Output::Int(s) => s(as_int(value)?).await,
            Output::Float(s) => s(as_float(value)?).await,
            Output::String(s) => s(as_string(value)?).await,
            Output::Bool(s) => s(as_bool(value)?).await,
        }
    }
}

fn permanent(err: impl std::fmt::Display) -> HestiaError {
    HestiaError::permanent(format!("script: {}", err))
}

impl Inner {
    async fn context(&self) -> Result<HashMapContext> {
        let values = try_join_all(self.inputs.iter().map(|(_, input)| input.value())).await?;

        let mut ctx = HashMapContext::new();
        for ((name, _), value) in self.inputs.iter().zip(values) {
            ctx.set_value(name.clone(), value).map_err(permanent)?;
        }
        Ok(ctx)
    }

    fn evaluate(&self, mut ctx: HashMapContext) -> Result<Value> {
        guarded(|| evalexpr::eval_with_context_mut(&self.script, &mut ctx))
    }

    async fn get(&self) -> Result<Value> {
        let ctx = self.context().await?;
        self.evaluate(ctx)
    }

    async fn set(&self, param: &str, value: Value) -> Result<()> {
        let mut ctx = self.context().await?;
        ctx.set_value(param.to_string(), value).map_err(permanent)?;

        let res = self.evaluate(ctx)?;
        for output in &self.outputs {
            output.apply(&res).await?;
        }
        Ok(())
    }
}

fn as_int(v: &Value) -> Result<i64> {
    match v {
        Value::Int(i) => Ok(*i),
        Value::Float(f) if f.fract() == 0.0 => Ok(*f as i64),
        other => Err(HestiaError::invalid(format!("not an int: {}", other))),
    }
}

fn as_float(v: &Value) -> Result<f64> {
    match v {
        Value::Float(f) => Ok(*f),
        Value::Int(i) => Ok(*i as f64),
        other => Err(HestiaError::invalid(format!("not a float: {}", other))),
    }
}

fn as_string(v: &Value) -> Result<String> {
    match v {
        Value::String(s) => Ok(s.clone()),
        other => Err(HestiaError::invalid(format!("not a string: {}", other))),
    }
}

/// Run an evaluation, turning both errors and panics into permanent errors
fn guarded<F>(eval: F) -> Result<Value>
where
    F: FnOnce() -> evalexpr::EvalexprResult<Value>,
{
    match catch_unwind(AssertUnwindSafe(eval)) {
        Ok(Ok(Value::Empty)) => Err(permanent("missing result")),
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(permanent(e)),
        Err(panic) => {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_default();
            Err(permanent(format!("panic: {}", msg)))
        }
    }
}

fn as_bool(v: &Value) -> Result<bool> {
    match v {
        Value::Boolean(b) => Ok(*b),
        other => Err(HestiaError::invalid(format!("not a bool: {}", other))),
    }
}

macro_rules! script_getter {
    ($trait:ident, $method:ident, $t:ty, $conv:ident) => {
        #[async_trait]
        impl $trait for Script {
            async fn $method(&self) -> Result<Getter<$t>> {
                let inner = self.inner.clone();
                Ok(getter_fn(move || {
                    let inner = inner.clone();
                    async move { $conv(&inner.get().await?) }
                }))
            }
        }
    };
}

script_getter!(IntGetter, int_getter, i64, as_int);
script_getter!(FloatGetter, float_getter, f64, as_float);
script_getter!(StringGetter, string_getter, String, as_string);
script_getter!(BoolGetter, bool_getter, bool, as_bool);

macro_rules! script_setter {
    ($trait:ident, $method:ident, $t:ty, $variant:ident) => {
        #[async_trait]
        impl $trait for Script {
            async fn $method(&self, param: &str) -> Result<Setter<$t>> {
                let inner = self.inner.clone();
                let param = param.to_string();
                Ok(setter_fn(move |v: $t| {
                    let inner = inner.clone();
                    let param = param.clone();
                    async move { inner.set(&param, Value::$variant(v)).await }
                }))
            }
        }
    };
}

script_setter!(IntSetter, int_setter, i64, Int);
script_setter!(FloatSetter, float_setter, f64, Float);
script_setter!(StringSetter, string_setter, String, String);
script_setter!(BoolSetter, bool_setter, bool, Boolean);

crate::impl_plugin!(
    Script,
    StringGetter,
    FloatGetter,
    IntGetter,
    BoolGetter,
    StringSetter,
    FloatSetter,
    IntSetter,
    BoolSetter
);
