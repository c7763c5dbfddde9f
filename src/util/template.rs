//! `${param}` and `${param:%fmt}` placeholders in request templates

use crate::error::{HestiaError, Result};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::fmt;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{\s*([\w.-]+)\s*(?::\s*([^}]*?)\s*)?\}").expect("valid placeholder pattern")
});

/// A value substituted into a template
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Str(v) => f.write_str(v),
        }
    }
}

impl Value {
    fn as_i64(&self) -> Result<i64> {
        match self {
            Value::Int(v) => Ok(*v),
            Value::Float(v) => Ok(*v as i64),
            Value::Bool(v) => Ok(i64::from(*v)),
            Value::Str(s) => s
                .trim()
                .parse()
                .map_err(|_| HestiaError::config(format!("not an integer: {}", s))),
        }
    }

    fn as_f64(&self) -> Result<f64> {
        match self {
            Value::Int(v) => Ok(*v as f64),
            Value::Float(v) => Ok(*v),
            Value::Bool(v) => Ok(f64::from(u8::from(*v))),
            Value::Str(s) => s
                .trim()
                .parse()
                .map_err(|_| HestiaError::config(format!("not a number: {}", s))),
        }
    }
}

/// Render `template`, substituting `param` with `value`.
///
/// Placeholder names match case-insensitively; a placeholder naming any
/// other parameter is an error. Without a parameter the template must not
/// contain placeholders.
pub fn render(template: &str, param: Option<(&str, &Value)>) -> Result<String> {
    let mut missing = None;
    let mut failed = None;

    let out = PLACEHOLDER.replace_all(template, |caps: &Captures<'_>| {
        let name = &caps[1];
        match param {
            Some((key, value)) if key.eq_ignore_ascii_case(name) => {
                match caps.get(2).map(|m| m.as_str()).filter(|s| !s.is_empty()) {
                    Some(spec) => format_value(spec, value).unwrap_or_else(|e| {
                        failed.get_or_insert(e);
                        String::new()
                    }),
                    None => value.to_string(),
                }
            }
            _ => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    if let Some(e) = failed {
        return Err(e);
    }
    if let Some(name) = missing {
        return Err(HestiaError::config(format!(
            "could not find value for ${{{}}}",
            name
        )));
    }
    Ok(out.into_owned())
}

/// Format a value with a printf-style verb (`%d`, `%05d`, `%x`, `%X`, `%.2f`, `%s`, `%v`)
pub fn format_value(spec: &str, value: &Value) -> Result<String> {
    let bad = || HestiaError::config(format!("invalid format: {}", spec));

    let body = spec.strip_prefix('%').ok_or_else(bad)?;
    let verb = body.chars().last().ok_or_else(bad)?;
    let flags = &body[..body.len() - verb.len_utf8()];

    let zero = flags.starts_with('0');
    let (width, precision) = match flags.trim_start_matches('0').split_once('.') {
        Some((w, p)) => (w, Some(p.parse::<usize>().map_err(|_| bad())?)),
        None => (flags.trim_start_matches('0'), None),
    };
    let width = if width.is_empty() {
        0
    } else {
        width.parse::<usize>().map_err(|_| bad())?
    };

    let s = match verb {
        'd' => {
            let v = value.as_i64()?;
            if zero {
                format!("{:0width$}", v, width = width)
            } else {
                format!("{:width$}", v, width = width)
            }
        }
        'x' => {
            let v = value.as_i64()?;
            if zero {
                format!("{:0width$x}", v, width = width)
            } else {
                format!("{:width$x}", v, width = width)
            }
        }
        'X' => {
            let v = value.as_i64()?;
            if zero {
                format!("{:0width$X}", v, width = width)
            } else {
                format!("{:width$X}", v, width = width)
            }
        }
        'f' => {
            let v = value.as_f64()?;
            let precision = precision.unwrap_or(6);
            if zero {
                format!("{:0width$.precision$}", v, width = width, precision = precision)
            } else {
                format!("{:width$.precision$}", v, width = width, precision = precision)
            }
        }
        's' | 'v' => format!("{:width$}", value.to_string(), width = width),
        _ => return Err(bad()),
    };

    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_plain() {
        let v = Value::from(16i64);
        assert_eq!(
            render("http://wb/set?amps=${maxcurrent}", Some(("maxcurrent", &v))).unwrap(),
            "http://wb/set?amps=16"
        );
        assert_eq!(render("static", None).unwrap(), "static");
    }

    #[test]
    fn test_render_formatted() {
        let v = Value::from(6.5f64);
        assert_eq!(
            render(r#"{"a":${Power:%.1f}}"#, Some(("power", &v))).unwrap(),
            r#"{"a":6.5}"#
        );
        let v = Value::from(255i64);
        assert_eq!(render("${v:%04X}", Some(("v", &v))).unwrap(), "00FF");
        assert_eq!(render("${v:%x}", Some(("v", &v))).unwrap(), "ff");
        assert_eq!(render("${v:%05d}", Some(("v", &v))).unwrap(), "00255");
    }

    #[test]
    fn test_render_unknown_placeholder() {
        let v = Value::from(true);
        assert!(render("${other}", Some(("enable", &v))).is_err());
        assert!(render("${enable}", None).is_err());
        assert!(render("${enable:%q}", Some(("enable", &v))).is_err());
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::from(20.0).to_string(), "20");
        assert_eq!(Value::from(false).to_string(), "false");
        assert_eq!(Value::from("x").to_string(), "x");
    }
}
