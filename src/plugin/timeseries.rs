//! Synthetic hourly rate series for planning stand-ins

use super::{Getter, Other, Plugin, StringGetter, decode_other, getter_fn};
use crate::error::{HestiaError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Number of hourly slots produced
pub const SLOTS: usize = 48;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct Settings {
    value: Option<f64>,
    values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rate {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub value: f64,
}

pub struct Timeseries {
    values: Arc<Vec<f64>>,
}

pub fn new_from_config(other: Other) -> Result<Box<dyn Plugin>> {
    let cc: Settings = decode_other(&other)?;

    let values = match (cc.value, cc.values.is_empty()) {
        (Some(v), true) => vec![v],
        (None, false) => cc.values,
        (None, true) => return Err(HestiaError::config("missing value or values")),
        (Some(_), false) => return Err(HestiaError::config("can only have either value or values")),
    };

    Ok(Box::new(Timeseries {
        values: Arc::new(values),
    }))
}

/// Hourly slots starting at the current hour, cycling through `values`
pub fn rates(now: DateTime<Utc>, values: &[f64]) -> Vec<Rate> {
    let start = now.duration_trunc(Duration::hours(1)).unwrap_or(now);
    values
        .iter()
        .cycle()
        .take(SLOTS)
        .enumerate()
        .map(|(i, &value)| {
            let start = start + Duration::hours(i as i64);
            Rate {
                start,
                end: start + Duration::hours(1),
                value,
            }
        })
        .collect()
}

#[async_trait]
impl StringGetter for Timeseries {
    async fn string_getter(&self) -> Result<Getter<String>> {
        let values = self.values.clone();
        Ok(getter_fn(move || {
            let res = serde_json::to_string(&rates(Utc::now(), &values)).map_err(Into::into);
            async move { res }
        }))
    }
}

crate::impl_plugin!(Timeseries, StringGetter);
