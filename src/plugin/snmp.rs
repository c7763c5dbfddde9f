//! SNMP GET plugin

use super::getter::derive_typed_getters;
use super::{Context, Getter, Other, Plugin, StringGetter, decode_other, getter_fn};
use crate::error::{HestiaError, Result};
use crate::snmp::usm::{AuthProtocol, PrivProtocol, SecurityLevel, User};
use crate::snmp::{self, Client, Security, Version};
use crate::util::{DEFAULT_TIMEOUT, default_port, duration, scalar};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct AuthSettings {
    user: String,
    security_level: String,
    auth: String,
    auth_pass: String,
    #[serde(rename = "priv")]
    privacy: String,
    priv_pass: String,
}

impl AuthSettings {
    /// Resolve the v3 user; protocols are only required by the levels using them
    fn user(&self) -> Result<User> {
        let level = SecurityLevel::parse(&self.security_level)?;
        let auth = match level {
            SecurityLevel::NoAuthNoPriv => None,
            _ => Some((AuthProtocol::parse(&self.auth)?, self.auth_pass.as_str())),
        };
        let privacy = match level {
            SecurityLevel::AuthPriv => Some((
                PrivProtocol::parse(&self.privacy)?,
                self.priv_pass.as_str(),
            )),
            _ => None,
        };
        User::new(&self.user, level, auth, privacy)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct Settings {
    uri: String,
    #[serde(deserialize_with = "scalar::string")]
    version: String,
    community: String,
    auth: AuthSettings,
    oid: String,
    scale: f64,
    #[serde(with = "duration")]
    timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            uri: String::new(),
            version: "2c".to_string(),
            community: "public".to_string(),
            auth: AuthSettings::default(),
            oid: String::new(),
            scale: 1.0,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

pub struct Snmp {
    target: Option<(Arc<Client>, Vec<u32>)>,
    scale: f64,
}

/// Build an snmp plugin; an empty oid yields a constant zero
pub async fn new_from_config(ctx: Context, other: Other) -> Result<Box<dyn Plugin>> {
    let cc: Settings = decode_other(&other)?;

    let community = |version| Security::Community {
        version,
        community: cc.community.clone(),
    };
    let security = match cc.version.trim_start_matches(['v', 'V']) {
        "1" => community(Version::V1),
        "" | "2" | "2c" => community(Version::V2c),
        "3" => Security::Usm(cc.auth.user()?),
        other => return Err(HestiaError::config(format!("invalid snmp version: {}", other))),
    };

    if cc.oid.trim().is_empty() {
        return Ok(Box::new(Snmp {
            target: None,
            scale: cc.scale,
        }));
    }

    if cc.uri.is_empty() {
        return Err(HestiaError::config("missing uri"));
    }
    let oid = snmp::parse_oid(&cc.oid)?;

    let addr = default_port(&cc.uri, 161);
    ctx.logger("snmp")
        .debug(&format!("{} {} ({:?})", addr, cc.oid, security));
    let client = Client::connect(&addr, security, cc.timeout).await?;

    Ok(Box::new(Snmp {
        target: Some((Arc::new(client), oid)),
        scale: cc.scale,
    }))
}

#[async_trait]
impl StringGetter for Snmp {
    async fn string_getter(&self) -> Result<Getter<String>> {
        let Some((client, oid)) = self.target.clone() else {
            return Ok(getter_fn(|| async { Ok("0".to_string()) }));
        };

        Ok(getter_fn(move || {
            let client = client.clone();
            let oid = oid.clone();
            async move {
                let varbinds = client.get(std::slice::from_ref(&oid)).await?;
                let (_, value) = varbinds
                    .into_iter()
                    .next()
                    .ok_or_else(|| HestiaError::snmp("empty response"))?;
                value.to_text()
            }
        }))
    }
}

derive_typed_getters!(Snmp);

crate::impl_plugin!(Snmp, StringGetter, FloatGetter, IntGetter, BoolGetter);
