//! Scalars configured as strings, numbers or booleans
//!
//! Values such as watchdog `reset`, switch `case` or const `value` are kept
//! textual and parsed per requested type when an accessor is built.

use serde::{Deserialize, Deserializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum Raw {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    Str(String),
}

impl Raw {
    fn into_string(self) -> String {
        match self {
            Raw::Bool(b) => b.to_string(),
            Raw::Int(i) => i.to_string(),
            Raw::Uint(u) => u.to_string(),
            Raw::Float(f) => f.to_string(),
            Raw::Str(s) => s,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<Raw>),
    One(Raw),
}

/// Deserialize a scalar into its string form
pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(Raw::deserialize(d)?.into_string())
}

/// Deserialize an optional scalar into its string form
pub fn option<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<Raw>::deserialize(d)?.map(Raw::into_string))
}

/// Deserialize a scalar or a list of scalars into strings
pub fn list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    Ok(match Option::<OneOrMany>::deserialize(d)? {
        None => Vec::new(),
        Some(OneOrMany::One(raw)) => vec![raw.into_string()],
        Some(OneOrMany::Many(raws)) => raws.into_iter().map(Raw::into_string).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct S {
        #[serde(deserialize_with = "string")]
        value: String,
        #[serde(default, deserialize_with = "list")]
        reset: Vec<String>,
        #[serde(default, deserialize_with = "option")]
        initial: Option<String>,
    }

    #[test]
    fn test_scalars() {
        let s: S = serde_yaml::from_str("value: 1.5\nreset: 0\ninitial: true").unwrap();
        assert_eq!(s.value, "1.5");
        assert_eq!(s.reset, vec!["0"]);
        assert_eq!(s.initial.as_deref(), Some("true"));

        let s: S = serde_yaml::from_str("value: abc\nreset: [0, \"off\", false]").unwrap();
        assert_eq!(s.value, "abc");
        assert_eq!(s.reset, vec!["0", "off", "false"]);
        assert!(s.initial.is_none());
    }
}
