//! Post-processing of textual payloads: regex, jq path, hex unpack, numeric decode

use crate::error::{HestiaError, Result};
use crate::modbus::register::Encoding;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub regex: String,
    /// Returned when `regex` does not match
    pub default: String,
    pub jq: String,
    pub unpack: String,
    pub decode: String,
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    re: Option<Regex>,
    default: Option<String>,
    jq: Option<Vec<Segment>>,
    unpack: bool,
    decode: Option<Encoding>,
}

fn parse_path(path: &str) -> Result<Vec<Segment>> {
    let bad = || HestiaError::config(format!("invalid jq query: {}", path));

    let rest = path.trim().strip_prefix('.').ok_or_else(bad)?;
    let mut segments = Vec::new();
    let mut chars = rest.chars().peekable();
    let mut key = String::new();

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if !key.is_empty() {
                    segments.push(Segment::Key(std::mem::take(&mut key)));
                }
            }
            '[' => {
                if !key.is_empty() {
                    segments.push(Segment::Key(std::mem::take(&mut key)));
                }
                let mut idx = String::new();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some(d) => idx.push(d),
                        None => return Err(bad()),
                    }
                }
                let idx = idx.trim();
                match idx.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
                    Some(name) => segments.push(Segment::Key(name.to_string())),
                    None => segments.push(Segment::Index(idx.parse().map_err(|_| bad())?)),
                }
            }
            c if c.is_alphanumeric() || c == '_' || c == '-' => key.push(c),
            _ => return Err(bad()),
        }
    }
    if !key.is_empty() {
        segments.push(Segment::Key(key));
    }

    Ok(segments)
}

fn query(doc: &Value, path: &[Segment]) -> Result<String> {
    let mut cur = doc;
    for seg in path {
        cur = match (seg, cur) {
            (Segment::Key(k), Value::Object(m)) => m.get(k),
            (Segment::Index(i), Value::Array(a)) => a.get(*i),
            _ => None,
        }
        .ok_or_else(|| HestiaError::invalid("jq: no result"))?;
    }

    match cur {
        Value::Null => Err(HestiaError::invalid("jq: no result")),
        Value::String(s) => Ok(s.clone()),
        other => Ok(other.to_string()),
    }
}

impl Pipeline {
    pub fn new(settings: &PipelineSettings) -> Result<Self> {
        let mut p = Pipeline::default();

        if !settings.regex.is_empty() {
            let re = Regex::new(&settings.regex)
                .map_err(|e| HestiaError::config(format!("invalid regex: {}", e)))?;
            p.re = Some(re);
            if !settings.default.is_empty() {
                p.default = Some(settings.default.clone());
            }
        }

        if !settings.jq.is_empty() {
            p.jq = Some(parse_path(&settings.jq)?);
        }

        match settings.unpack.to_lowercase().as_str() {
            "" => {}
            "hex" => p.unpack = true,
            other => {
                return Err(HestiaError::config(format!("invalid unpack: {}", other)));
            }
        }

        if !settings.decode.is_empty() {
            p.decode = Some(Encoding::parse(&settings.decode, "")?);
        } else if p.unpack {
            return Err(HestiaError::config("unpack requires decode"));
        }

        Ok(p)
    }

    pub fn is_empty(&self) -> bool {
        self.re.is_none() && self.jq.is_none() && self.decode.is_none()
    }

    /// Run the configured steps over `input`
    pub fn process(&self, input: &[u8]) -> Result<String> {
        let mut text = String::from_utf8_lossy(input).into_owned();

        if let Some(re) = &self.re {
            text = match re.captures(&text) {
                Some(caps) => caps
                    .get(1)
                    .or_else(|| caps.get(0))
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default(),
                None => match &self.default {
                    Some(d) => d.clone(),
                    None => {
                        return Err(HestiaError::invalid(format!(
                            "regex did not match: {}",
                            text.trim()
                        )));
                    }
                },
            };
        }

        if let Some(path) = &self.jq {
            let doc: Value = serde_json::from_str(&text)?;
            text = query(&doc, path)?;
        }

        if let Some(enc) = self.decode {
            let bytes = if self.unpack {
                hex::decode(text.trim())
                    .map_err(|e| HestiaError::invalid(format!("unpack: {}", e)))?
            } else {
                text.into_bytes()
            };
            text = enc.decode(&bytes)?.to_string();
        }

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline(yaml: &str) -> Pipeline {
        let s: PipelineSettings = serde_yaml::from_str(yaml).unwrap();
        Pipeline::new(&s).unwrap()
    }

    #[test]
    fn test_regex_first_group() {
        let p = pipeline(r#"regex: 'power=(\d+)'"#);
        assert_eq!(p.process(b"temp=3 power=1500 W").unwrap(), "1500");
        assert!(p.process(b"nothing").is_err());

        let p = pipeline("regex: 'x=(\\d+)'\ndefault: '0'");
        assert_eq!(p.process(b"nothing").unwrap(), "0");
    }

    #[test]
    fn test_jq_paths() {
        let p = pipeline("jq: .data.meters[1].power");
        let body = br#"{"data":{"meters":[{"power":1},{"power":2.5}]}}"#;
        assert_eq!(p.process(body).unwrap(), "2.5");

        let p = pipeline("jq: .state");
        assert_eq!(p.process(br#"{"state":"charging"}"#).unwrap(), "charging");
        assert!(p.process(br#"{"other":1}"#).is_err());
        assert!(p.process(br#"{"state":null}"#).is_err());
    }

    #[test]
    fn test_parse_path() {
        assert_eq!(parse_path(".").unwrap(), vec![]);
        assert_eq!(
            parse_path(r#".a["b c"][2]"#).unwrap(),
            vec![
                Segment::Key("a".into()),
                Segment::Key("b c".into()),
                Segment::Index(2)
            ]
        );
        assert!(parse_path("a.b").is_err());
        assert!(parse_path(".a[").is_err());
        assert!(parse_path(".a | length").is_err());
    }

    #[test]
    fn test_unpack_decode() {
        let p = pipeline("unpack: hex\ndecode: int16");
        assert_eq!(p.process(b"FFFE").unwrap(), "-2");

        let p = pipeline("unpack: hex\ndecode: uint32");
        assert_eq!(p.process(b"00010000").unwrap(), "65536");
    }

    #[test]
    fn test_invalid_settings() {
        let s = PipelineSettings {
            unpack: "hex".into(),
            ..Default::default()
        };
        assert!(Pipeline::new(&s).is_err());

        let s = PipelineSettings {
            regex: "(".into(),
            ..Default::default()
        };
        assert!(Pipeline::new(&s).is_err());
    }
}
