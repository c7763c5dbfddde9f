//! Arithmetic over child getters

use super::{
    Config, Context, FloatGetter, Getter, IntGetter, Other, Plugin, Typed, decode_other, getter_fn,
};
use crate::error::{HestiaError, Result};
use async_trait::async_trait;
use futures::future::try_join_all;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct Settings {
    add: Vec<Config>,
    mul: Vec<Config>,
    div: Vec<Config>,
    min: Vec<Config>,
    max: Vec<Config>,
    abs: Option<Config>,
    sign: Option<Config>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Add,
    Mul,
    Div,
    Min,
    Max,
    Abs,
    Sign,
}

pub struct Calc {
    ctx: Context,
    op: Op,
    operands: Vec<Config>,
}

/// Build a calc plugin; exactly one operation must be configured
pub async fn new_from_config(ctx: Context, other: Other) -> Result<Box<dyn Plugin>> {
    let cc: Settings = decode_other(&other)?;

    let candidates = [
        (Op::Add, cc.add),
        (Op::Mul, cc.mul),
        (Op::Div, cc.div),
        (Op::Min, cc.min),
        (Op::Max, cc.max),
        (Op::Abs, cc.abs.into_iter().collect()),
        (Op::Sign, cc.sign.into_iter().collect()),
    ];

    let mut configured = candidates.into_iter().filter(|(_, v)| !v.is_empty());
    let (op, operands) = match (configured.next(), configured.next()) {
        (Some(first), None) => first,
        _ => {
            return Err(HestiaError::config(
                "can only have either add, mul, div, min, max, abs or sign",
            ));
        }
    };

    Ok(Box::new(Calc { ctx, op, operands }))
}

/// Numeric operations shared by int and float calculations
trait Number: Typed + Copy + PartialOrd {
    const ZERO: Self;
    const ONE: Self;
    fn add(self, o: Self) -> Self;
    fn mul(self, o: Self) -> Self;
    fn div(self, o: Self) -> Self;
    fn neg(self) -> Self;
}

impl Number for f64 {
    const ZERO: Self = 0.0;
    const ONE: Self = 1.0;
    fn add(self, o: Self) -> Self {
        self + o
    }
    fn mul(self, o: Self) -> Self {
        self * o
    }
    fn div(self, o: Self) -> Self {
        self / o
    }
    fn neg(self) -> Self {
        -self
    }
}

impl Number for i64 {
    const ZERO: Self = 0;
    const ONE: Self = 1;
    fn add(self, o: Self) -> Self {
        self.wrapping_add(o)
    }
    fn mul(self, o: Self) -> Self {
        self.wrapping_mul(o)
    }
    fn div(self, o: Self) -> Self {
        self.wrapping_div(o)
    }
    fn neg(self) -> Self {
        self.wrapping_neg()
    }
}

fn apply<T: Number>(op: Op, values: &[T]) -> T {
    let Some((&first, rest)) = values.split_first() else {
        return T::ZERO;
    };

    match op {
        Op::Add => rest.iter().fold(first, |acc, &v| acc.add(v)),
        Op::Mul => rest.iter().fold(first, |acc, &v| acc.mul(v)),
        Op::Div => {
            let mut acc = first;
            for &v in rest {
                // zero in either place short-circuits instead of dividing
                if acc == T::ZERO || v == T::ZERO {
                    return T::ZERO;
                }
                acc = acc.div(v);
            }
            acc
        }
        Op::Min => rest
            .iter()
            .fold(first, |acc, &v| if v < acc { v } else { acc }),
        Op::Max => rest
            .iter()
            .fold(first, |acc, &v| if v > acc { v } else { acc }),
        Op::Abs => {
            if first < T::ZERO {
                first.neg()
            } else {
                first
            }
        }
        Op::Sign => {
            if first > T::ZERO {
                T::ONE
            } else if first < T::ZERO {
                T::ONE.neg()
            } else {
                T::ZERO
            }
        }
    }
}

impl Calc {
    async fn calc<T: Number>(&self) -> Result<Getter<T>> {
        let mut getters = Vec::with_capacity(self.operands.len());
        for cc in &self.operands {
            getters.push(T::getter(cc, &self.ctx).await?);
        }

        let op = self.op;
        Ok(getter_fn(move || {
            let getters = getters.clone();
            async move {
                let values = try_join_all(getters.iter().map(|g| g())).await?;
                Ok(apply(op, &values))
            }
        }))
    }
}

#[async_trait]
impl FloatGetter for Calc {
    async fn float_getter(&self) -> Result<Getter<f64>> {
        self.calc().await
    }
}

#[async_trait]
impl IntGetter for Calc {
    async fn int_getter(&self) -> Result<Getter<i64>> {
        self.calc().await
    }
}

crate::impl_plugin!(Calc, FloatGetter, IntGetter);
