//! SNMPv3 user-based security model
//!
//! Message framing, key localization, HMAC authentication and DES/AES
//! privacy. Both sides of an exchange use [`Keys::seal`] and [`Keys::open`],
//! so a test agent can be built from the same pieces as the client.

use super::{
    INTEGER, OCTET_STRING, Pdu, Reader, SEQUENCE, decode_integer, decode_pdu, encode_pdu,
    integer_body, tlv,
};
use crate::error::{HestiaError, Result};
use aes::{Aes128, Aes192, Aes256};
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{
    AsyncStreamCipher, BlockCipher, BlockDecryptMut, BlockEncryptMut, KeyIvInit,
};
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use std::ops::Range;

/// `msgFlags` bits
pub const AUTH_FLAG: u8 = 0x01;
pub const PRIV_FLAG: u8 = 0x02;
pub const REPORTABLE_FLAG: u8 = 0x04;

const VERSION_3: i64 = 3;
const USM_SECURITY_MODEL: i64 = 3;
const PASSWORD_EXPANSION: usize = 1_048_576;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityLevel {
    NoAuthNoPriv,
    AuthNoPriv,
    AuthPriv,
}

impl SecurityLevel {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "" | "noauthnopriv" => Ok(SecurityLevel::NoAuthNoPriv),
            "authnopriv" => Ok(SecurityLevel::AuthNoPriv),
            "authpriv" => Ok(SecurityLevel::AuthPriv),
            _ => Err(HestiaError::config(format!("invalid security level: {}", s))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthProtocol {
    Md5,
    Sha,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl AuthProtocol {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "MD5" => Ok(AuthProtocol::Md5),
            "SHA" | "SHA1" => Ok(AuthProtocol::Sha),
            "SHA224" => Ok(AuthProtocol::Sha224),
            "SHA256" => Ok(AuthProtocol::Sha256),
            "SHA384" => Ok(AuthProtocol::Sha384),
            "SHA512" => Ok(AuthProtocol::Sha512),
            other => Err(HestiaError::config(format!("invalid auth protocol: {}", other))),
        }
    }

    /// Length of the truncated HMAC carried in `msgAuthenticationParameters`
    pub fn mac_len(self) -> usize {
        match self {
            AuthProtocol::Md5 | AuthProtocol::Sha => 12,
            AuthProtocol::Sha224 => 16,
            AuthProtocol::Sha256 => 24,
            AuthProtocol::Sha384 => 32,
            AuthProtocol::Sha512 => 48,
        }
    }

    fn digest(self, parts: &[&[u8]]) -> Vec<u8> {
        fn run<D: Digest>(parts: &[&[u8]]) -> Vec<u8> {
            let mut h = D::new();
            for p in parts {
                h.update(p);
            }
            h.finalize().to_vec()
        }

        match self {
            AuthProtocol::Md5 => run::<Md5>(parts),
            AuthProtocol::Sha => run::<Sha1>(parts),
            AuthProtocol::Sha224 => run::<Sha224>(parts),
            AuthProtocol::Sha256 => run::<Sha256>(parts),
            AuthProtocol::Sha384 => run::<Sha384>(parts),
            AuthProtocol::Sha512 => run::<Sha512>(parts),
        }
    }

    fn hmac(self, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        fn run<M: Mac + KeyInit>(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
            let mut mac = <M as Mac>::new_from_slice(key)
                .map_err(|_| HestiaError::snmp("invalid authentication key"))?;
            Mac::update(&mut mac, data);
            Ok(mac.finalize().into_bytes().to_vec())
        }

        match self {
            AuthProtocol::Md5 => run::<Hmac<Md5>>(key, data),
            AuthProtocol::Sha => run::<Hmac<Sha1>>(key, data),
            AuthProtocol::Sha224 => run::<Hmac<Sha224>>(key, data),
            AuthProtocol::Sha256 => run::<Hmac<Sha256>>(key, data),
            AuthProtocol::Sha384 => run::<Hmac<Sha384>>(key, data),
            AuthProtocol::Sha512 => run::<Hmac<Sha512>>(key, data),
        }
    }

    /// Password to master key: hash of the password repeated to 1 MiB
    pub fn password_to_key(self, password: &[u8]) -> Vec<u8> {
        let expanded: Vec<u8> = password
            .iter()
            .cycle()
            .take(PASSWORD_EXPANSION)
            .copied()
            .collect();
        self.digest(&[expanded.as_slice()])
    }

    /// Bind a master key to an authoritative engine
    pub fn localize(self, master: &[u8], engine_id: &[u8]) -> Vec<u8> {
        self.digest(&[master, engine_id, master])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivProtocol {
    Des,
    Aes,
    Aes192,
    Aes256,
    /// AES-192 with the key extension used by Cisco devices
    Aes192C,
    Aes256C,
}

impl PrivProtocol {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "DES" => Ok(PrivProtocol::Des),
            "AES" | "AES128" => Ok(PrivProtocol::Aes),
            "AES192" => Ok(PrivProtocol::Aes192),
            "AES256" => Ok(PrivProtocol::Aes256),
            "AES192C" => Ok(PrivProtocol::Aes192C),
            "AES256C" => Ok(PrivProtocol::Aes256C),
            other => Err(HestiaError::config(format!("invalid priv protocol: {}", other))),
        }
    }

    /// Localized key material needed, including the DES pre-IV
    fn key_len(self) -> usize {
        match self {
            PrivProtocol::Des | PrivProtocol::Aes => 16,
            PrivProtocol::Aes192 | PrivProtocol::Aes192C => 24,
            PrivProtocol::Aes256 | PrivProtocol::Aes256C => 32,
        }
    }

    fn localize(self, auth: AuthProtocol, master: &[u8], engine_id: &[u8]) -> Vec<u8> {
        let mut key = auth.localize(master, engine_id);
        match self {
            PrivProtocol::Aes192C | PrivProtocol::Aes256C => {
                while key.len() < self.key_len() {
                    let next = auth.localize(&auth.password_to_key(&key), engine_id);
                    key.extend(next);
                }
            }
            _ => {
                while key.len() < self.key_len() {
                    let next = auth.digest(&[key.as_slice()]);
                    key.extend(next);
                }
            }
        }
        key.truncate(self.key_len());
        key
    }

    fn encrypt(
        self,
        key: &[u8],
        boots: u32,
        time: u32,
        salt: u64,
        data: &[u8],
    ) -> Result<(Vec<u8>, Vec<u8>)> {
        let invalid = |_| HestiaError::snmp("invalid privacy key");
        match self {
            PrivProtocol::Des => {
                let mut params = boots.to_be_bytes().to_vec();
                params.extend_from_slice(&(salt as u32).to_be_bytes());
                let iv: Vec<u8> = key[8..16].iter().zip(&params).map(|(a, b)| a ^ b).collect();

                let mut buf = data.to_vec();
                buf.resize(data.len().div_ceil(8) * 8, 0);
                let len = buf.len();
                cbc::Encryptor::<des::Des>::new_from_slices(&key[..8], &iv)
                    .map_err(invalid)?
                    .encrypt_padded_mut::<NoPadding>(&mut buf, len)
                    .map_err(|_| HestiaError::snmp("des padding"))?;
                Ok((buf, params))
            }
            _ => {
                let params = salt.to_be_bytes().to_vec();
                let iv = aes_iv(boots, time, &params);
                let mut buf = data.to_vec();
                self.aes_cfb(key, &iv, &mut buf, true)?;
                Ok((buf, params))
            }
        }
    }

    fn decrypt(
        self,
        key: &[u8],
        boots: u32,
        time: u32,
        params: &[u8],
        data: &[u8],
    ) -> Result<Vec<u8>> {
        if params.len() != 8 {
            return Err(HestiaError::snmp("invalid privacy parameters"));
        }
        let mut buf = data.to_vec();
        match self {
            PrivProtocol::Des => {
                if buf.len() % 8 != 0 {
                    return Err(HestiaError::snmp("des ciphertext not block aligned"));
                }
                let iv: Vec<u8> = key[8..16].iter().zip(params).map(|(a, b)| a ^ b).collect();
                cbc::Decryptor::<des::Des>::new_from_slices(&key[..8], &iv)
                    .map_err(|_| HestiaError::snmp("invalid privacy key"))?
                    .decrypt_padded_mut::<NoPadding>(&mut buf)
                    .map_err(|_| HestiaError::snmp("des padding"))?;
            }
            _ => {
                let iv = aes_iv(boots, time, params);
                self.aes_cfb(key, &iv, &mut buf, false)?;
            }
        }
        Ok(buf)
    }

    fn aes_cfb(self, key: &[u8], iv: &[u8], buf: &mut [u8], encrypt: bool) -> Result<()> {
        fn run<C>(key: &[u8], iv: &[u8], buf: &mut [u8], encrypt: bool) -> Result<()>
        where
            C: BlockEncryptMut + BlockCipher + KeyInit,
        {
            let invalid = |_| HestiaError::snmp("invalid privacy key");
            if encrypt {
                cfb_mode::Encryptor::<C>::new_from_slices(key, iv)
                    .map_err(invalid)?
                    .encrypt(buf);
            } else {
                cfb_mode::Decryptor::<C>::new_from_slices(key, iv)
                    .map_err(invalid)?
                    .decrypt(buf);
            }
            Ok(())
        }

        match self {
            PrivProtocol::Aes => run::<Aes128>(key, iv, buf, encrypt),
            PrivProtocol::Aes192 | PrivProtocol::Aes192C => run::<Aes192>(key, iv, buf, encrypt),
            PrivProtocol::Aes256 | PrivProtocol::Aes256C => run::<Aes256>(key, iv, buf, encrypt),
            PrivProtocol::Des => Err(HestiaError::snmp("des is not a cfb cipher")),
        }
    }
}

fn aes_iv(boots: u32, time: u32, salt: &[u8]) -> Vec<u8> {
    let mut iv = boots.to_be_bytes().to_vec();
    iv.extend_from_slice(&time.to_be_bytes());
    iv.extend_from_slice(salt);
    iv
}

/// A configured USM user with its engine independent master keys
#[derive(Clone)]
pub struct User {
    name: String,
    auth: Option<(AuthProtocol, Vec<u8>)>,
    privacy: Option<(PrivProtocol, Vec<u8>)>,
}

impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User")
            .field("name", &self.name)
            .field("auth", &self.auth.as_ref().map(|(p, _)| p))
            .field("privacy", &self.privacy.as_ref().map(|(p, _)| p))
            .finish()
    }
}

impl User {
    pub fn new(
        name: &str,
        level: SecurityLevel,
        auth: Option<(AuthProtocol, &str)>,
        privacy: Option<(PrivProtocol, &str)>,
    ) -> Result<Self> {
        if name.is_empty() {
            return Err(HestiaError::config("snmp v3 requires auth.user"));
        }

        let auth = match level {
            SecurityLevel::NoAuthNoPriv => None,
            _ => {
                let (proto, pass) =
                    auth.ok_or_else(|| HestiaError::config("missing auth protocol"))?;
                if pass.is_empty() {
                    return Err(HestiaError::config("missing auth.authPass"));
                }
                Some((proto, proto.password_to_key(pass.as_bytes())))
            }
        };

        let privacy = match (level, &auth) {
            (SecurityLevel::AuthPriv, Some((proto, _))) => {
                let (cipher, pass) =
                    privacy.ok_or_else(|| HestiaError::config("missing priv protocol"))?;
                if pass.is_empty() {
                    return Err(HestiaError::config("missing auth.privPass"));
                }
                Some((cipher, proto.password_to_key(pass.as_bytes())))
            }
            _ => None,
        };

        Ok(Self {
            name: name.to_string(),
            auth,
            privacy,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Flags of messages sent by this user
    pub fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.auth.is_some() {
            flags |= AUTH_FLAG;
        }
        if self.privacy.is_some() {
            flags |= PRIV_FLAG;
        }
        flags
    }

    /// Keys for talking to the engine `engine_id`
    pub fn localize(&self, engine_id: &[u8]) -> Keys {
        let auth = self
            .auth
            .as_ref()
            .map(|(proto, master)| (*proto, proto.localize(master, engine_id)));
        let privacy = match (&self.privacy, &self.auth) {
            (Some((cipher, master)), Some((proto, _))) => {
                Some((*cipher, cipher.localize(*proto, master, engine_id)))
            }
            _ => None,
        };
        Keys { auth, privacy }
    }
}

/// Localized keys of one user at one authoritative engine
#[derive(Clone, Default)]
pub struct Keys {
    auth: Option<(AuthProtocol, Vec<u8>)>,
    privacy: Option<(PrivProtocol, Vec<u8>)>,
}

impl Keys {
    /// Encrypt and sign according to `msg.flags`; `salt` feeds the privacy IV
    pub fn seal(&self, mut msg: V3Message, salt: u64) -> Result<Vec<u8>> {
        if msg.flags & PRIV_FLAG != 0 {
            let (cipher, key) = self
                .privacy
                .as_ref()
                .ok_or_else(|| HestiaError::snmp("no privacy key"))?;
            let ScopedData::Plain(scoped) = &msg.data else {
                return Err(HestiaError::snmp("scoped pdu already encrypted"));
            };
            let (data, params) = cipher.encrypt(
                key,
                msg.security.engine_boots,
                msg.security.engine_time,
                salt,
                &scoped.encode(),
            )?;
            msg.data = ScopedData::Encrypted(data);
            msg.security.priv_params = params;
        }

        if msg.flags & AUTH_FLAG == 0 {
            return Ok(msg.encode());
        }

        let (proto, key) = self
            .auth
            .as_ref()
            .ok_or_else(|| HestiaError::snmp("no authentication key"))?;
        msg.security.auth_params = vec![0; proto.mac_len()];
        let mut raw = msg.encode();
        let range = auth_params_range(&raw)?;
        let mac = proto.hmac(key, &raw)?;
        raw[range].copy_from_slice(&mac[..proto.mac_len()]);
        Ok(raw)
    }

    /// Verify and decrypt a received message
    pub fn open(&self, raw: &[u8]) -> Result<V3Message> {
        let mut msg = V3Message::decode(raw)?;

        if msg.flags & AUTH_FLAG != 0 {
            let (proto, key) = self
                .auth
                .as_ref()
                .ok_or_else(|| HestiaError::snmp("unexpected authenticated message"))?;
            let range = auth_params_range(raw)?;
            if range.len() != proto.mac_len() {
                return Err(HestiaError::snmp("authentication failure"));
            }
            let mut zeroed = raw.to_vec();
            zeroed[range.clone()].fill(0);
            let mac = proto.hmac(key, &zeroed)?;
            // constant time compare of the truncated tag
            let diff = mac[..proto.mac_len()]
                .iter()
                .zip(&raw[range])
                .fold(0u8, |acc, (a, b)| acc | (a ^ b));
            if diff != 0 {
                return Err(HestiaError::snmp("authentication failure"));
            }
        }

        if let ScopedData::Encrypted(data) = &msg.data {
            if msg.flags & PRIV_FLAG == 0 {
                return Err(HestiaError::snmp("encrypted pdu without privacy flag"));
            }
            let (cipher, key) = self
                .privacy
                .as_ref()
                .ok_or_else(|| HestiaError::snmp("unexpected encrypted message"))?;
            let plain = cipher.decrypt(
                key,
                msg.security.engine_boots,
                msg.security.engine_time,
                &msg.security.priv_params,
                data,
            )?;
            msg.data = ScopedData::Plain(ScopedPdu::decode(&plain)?);
        }

        Ok(msg)
    }

    pub fn authenticated(&self) -> bool {
        self.auth.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SecurityParameters {
    pub engine_id: Vec<u8>,
    pub engine_boots: u32,
    pub engine_time: u32,
    pub user: Vec<u8>,
    pub auth_params: Vec<u8>,
    pub priv_params: Vec<u8>,
}

impl SecurityParameters {
    fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        tlv(&mut body, OCTET_STRING, &self.engine_id);
        tlv(&mut body, INTEGER, &integer_body(i64::from(self.engine_boots)));
        tlv(&mut body, INTEGER, &integer_body(i64::from(self.engine_time)));
        tlv(&mut body, OCTET_STRING, &self.user);
        tlv(&mut body, OCTET_STRING, &self.auth_params);
        tlv(&mut body, OCTET_STRING, &self.priv_params);

        let mut out = Vec::new();
        tlv(&mut out, SEQUENCE, &body);
        out
    }

    fn decode(b: &[u8]) -> Result<Self> {
        let mut outer = Reader::new(b);
        let mut r = Reader::new(outer.expect(SEQUENCE)?);
        let u32_of = |b: &[u8]| -> Result<u32> {
            u32::try_from(decode_integer(b)?).map_err(|_| HestiaError::snmp("value out of range"))
        };
        Ok(Self {
            engine_id: r.expect(OCTET_STRING)?.to_vec(),
            engine_boots: u32_of(r.expect(INTEGER)?)?,
            engine_time: u32_of(r.expect(INTEGER)?)?,
            user: r.expect(OCTET_STRING)?.to_vec(),
            auth_params: r.expect(OCTET_STRING)?.to_vec(),
            priv_params: r.expect(OCTET_STRING)?.to_vec(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScopedPdu {
    pub context_engine_id: Vec<u8>,
    pub context_name: Vec<u8>,
    pub pdu: Pdu,
}

impl ScopedPdu {
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        tlv(&mut body, OCTET_STRING, &self.context_engine_id);
        tlv(&mut body, OCTET_STRING, &self.context_name);
        body.extend(encode_pdu(&self.pdu));

        let mut out = Vec::new();
        tlv(&mut out, SEQUENCE, &body);
        out
    }

    /// Decode, ignoring trailing block cipher padding
    pub fn decode(b: &[u8]) -> Result<Self> {
        let mut outer = Reader::new(b);
        let mut r = Reader::new(outer.expect(SEQUENCE)?);
        let context_engine_id = r.expect(OCTET_STRING)?.to_vec();
        let context_name = r.expect(OCTET_STRING)?.to_vec();
        let (kind, body) = r.next()?;
        Ok(Self {
            context_engine_id,
            context_name,
            pdu: decode_pdu(kind, body)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScopedData {
    Plain(ScopedPdu),
    Encrypted(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct V3Message {
    pub msg_id: i32,
    pub max_size: i32,
    pub flags: u8,
    pub security: SecurityParameters,
    pub data: ScopedData,
}

impl V3Message {
    /// The plaintext scoped PDU; fails for messages that were not opened
    pub fn scoped(&self) -> Result<&ScopedPdu> {
        match &self.data {
            ScopedData::Plain(scoped) => Ok(scoped),
            ScopedData::Encrypted(_) => Err(HestiaError::snmp("scoped pdu is encrypted")),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut header = Vec::new();
        tlv(&mut header, INTEGER, &integer_body(i64::from(self.msg_id)));
        tlv(&mut header, INTEGER, &integer_body(i64::from(self.max_size)));
        tlv(&mut header, OCTET_STRING, &[self.flags]);
        tlv(&mut header, INTEGER, &integer_body(USM_SECURITY_MODEL));

        let mut body = Vec::new();
        tlv(&mut body, INTEGER, &integer_body(VERSION_3));
        tlv(&mut body, SEQUENCE, &header);
        tlv(&mut body, OCTET_STRING, &self.security.encode());
        match &self.data {
            ScopedData::Plain(scoped) => body.extend(scoped.encode()),
            ScopedData::Encrypted(data) => tlv(&mut body, OCTET_STRING, data),
        }

        let mut out = Vec::new();
        tlv(&mut out, SEQUENCE, &body);
        out
    }

    pub fn decode(b: &[u8]) -> Result<Self> {
        let mut outer = Reader::new(b);
        let mut msg = Reader::new(outer.expect(SEQUENCE)?);

        let version = decode_integer(msg.expect(INTEGER)?)?;
        if version != VERSION_3 {
            return Err(HestiaError::snmp(format!("unsupported version: {}", version)));
        }

        let mut header = Reader::new(msg.expect(SEQUENCE)?);
        let msg_id = i32::try_from(decode_integer(header.expect(INTEGER)?)?)
            .map_err(|_| HestiaError::snmp("message id out of range"))?;
        let max_size = i32::try_from(decode_integer(header.expect(INTEGER)?)?)
            .map_err(|_| HestiaError::snmp("max size out of range"))?;
        let flags = match header.expect(OCTET_STRING)? {
            [flags] => *flags,
            _ => return Err(HestiaError::snmp("invalid message flags")),
        };
        let model = decode_integer(header.expect(INTEGER)?)?;
        if model != USM_SECURITY_MODEL {
            return Err(HestiaError::snmp(format!("unsupported security model: {}", model)));
        }

        let security = SecurityParameters::decode(msg.expect(OCTET_STRING)?)?;

        let (tag, body) = msg.next()?;
        let data = match tag {
            OCTET_STRING => ScopedData::Encrypted(body.to_vec()),
            SEQUENCE => {
                let mut raw = Vec::new();
                tlv(&mut raw, SEQUENCE, body);
                ScopedData::Plain(ScopedPdu::decode(&raw)?)
            }
            other => {
                return Err(HestiaError::snmp(format!(
                    "unexpected scoped pdu tag: {:#x}",
                    other
                )));
            }
        };

        Ok(Self {
            msg_id,
            max_size,
            flags,
            security,
            data,
        })
    }
}

/// Byte range of `msgAuthenticationParameters` within an encoded message
fn auth_params_range(raw: &[u8]) -> Result<Range<usize>> {
    let mut outer = Reader::new(raw);
    let mut msg = Reader::new(outer.expect(SEQUENCE)?);
    msg.expect(INTEGER)?;
    msg.expect(SEQUENCE)?;

    let mut params = Reader::new(msg.expect(OCTET_STRING)?);
    let mut usm = Reader::new(params.expect(SEQUENCE)?);
    usm.expect(OCTET_STRING)?;
    usm.expect(INTEGER)?;
    usm.expect(INTEGER)?;
    usm.expect(OCTET_STRING)?;
    let auth = usm.expect(OCTET_STRING)?;

    let start = auth.as_ptr() as usize - raw.as_ptr() as usize;
    Ok(start..start + auth.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snmp::{GET_REQUEST, Value, parse_oid};

    fn message(flags: u8, engine_id: &[u8]) -> V3Message {
        V3Message {
            msg_id: 7,
            max_size: 65507,
            flags: flags | REPORTABLE_FLAG,
            security: SecurityParameters {
                engine_id: engine_id.to_vec(),
                engine_boots: 3,
                engine_time: 1200,
                user: b"hestia".to_vec(),
                ..Default::default()
            },
            data: ScopedData::Plain(ScopedPdu {
                context_engine_id: engine_id.to_vec(),
                context_name: Vec::new(),
                pdu: Pdu {
                    kind: GET_REQUEST,
                    request_id: 7,
                    error_status: 0,
                    error_index: 0,
                    varbinds: vec![(parse_oid("1.3.6.1.2.1.1.3.0").unwrap(), Value::Null)],
                },
            }),
        }
    }

    // RFC 3414 A.3.1 and A.3.2
    #[test]
    fn test_key_localization() {
        let engine = hex::decode("000000000000000000000002").unwrap();

        let md5 = AuthProtocol::Md5;
        let key = md5.localize(&md5.password_to_key(b"maplesyrup"), &engine);
        assert_eq!(hex::encode(key), "526f5eed9fcce26f8964c2930787d82b");

        let sha = AuthProtocol::Sha;
        let key = sha.localize(&sha.password_to_key(b"maplesyrup"), &engine);
        assert_eq!(hex::encode(key), "6695febc9288e36282235fc7151f128497b38f3f");
    }

    #[test]
    fn test_privacy_key_extension() {
        let engine = b"engine";
        let master = AuthProtocol::Sha.password_to_key(b"privpass");
        let base = AuthProtocol::Sha.localize(&master, engine);

        for cipher in [PrivProtocol::Aes192, PrivProtocol::Aes256C, PrivProtocol::Des] {
            let key = cipher.localize(AuthProtocol::Sha, &master, engine);
            assert_eq!(key.len(), cipher.key_len());
            assert_eq!(&key[..16], &base[..16]);
        }
    }

    #[test]
    fn test_seal_and_open() {
        let engine = b"\x80\x00\x1f\x88\x04hestia";
        for (auth, cipher) in [
            (AuthProtocol::Md5, PrivProtocol::Des),
            (AuthProtocol::Sha, PrivProtocol::Aes),
            (AuthProtocol::Sha256, PrivProtocol::Aes256),
            (AuthProtocol::Sha512, PrivProtocol::Aes192C),
        ] {
            let user = User::new(
                "hestia",
                SecurityLevel::AuthPriv,
                Some((auth, "authpass1")),
                Some((cipher, "privpass1")),
            )
            .unwrap();
            let keys = user.localize(engine);
            let msg = message(user.flags(), engine);

            let raw = keys.seal(msg.clone(), 42).unwrap();
            let range = auth_params_range(&raw).unwrap();
            assert_eq!(range.len(), auth.mac_len());

            let opened = keys.open(&raw).unwrap();
            assert_eq!(opened.scoped().unwrap(), msg.scoped().unwrap());
            assert_eq!(opened.security.priv_params.len(), 8);
        }
    }

    #[test]
    fn test_tampering_and_wrong_keys() {
        let engine = b"engine-a";
        let user = User::new(
            "hestia",
            SecurityLevel::AuthNoPriv,
            Some((AuthProtocol::Sha, "authpass1")),
            None,
        )
        .unwrap();
        let keys = user.localize(engine);
        let mut raw = keys.seal(message(user.flags(), engine), 0).unwrap();

        let other = User::new(
            "hestia",
            SecurityLevel::AuthNoPriv,
            Some((AuthProtocol::Sha, "different")),
            None,
        )
        .unwrap();
        assert!(other.localize(engine).open(&raw).is_err());

        let tag = auth_params_range(&raw).unwrap();
        raw[tag.start] ^= 0x01;
        let err = keys.open(&raw).unwrap_err();
        assert!(err.to_string().contains("authentication failure"));
    }

    #[test]
    fn test_user_validation() {
        assert!(User::new("", SecurityLevel::NoAuthNoPriv, None, None).is_err());
        assert!(User::new("u", SecurityLevel::AuthNoPriv, None, None).is_err());
        assert!(
            User::new("u", SecurityLevel::AuthNoPriv, Some((AuthProtocol::Md5, "")), None)
                .is_err()
        );
        assert!(
            User::new(
                "u",
                SecurityLevel::AuthPriv,
                Some((AuthProtocol::Md5, "x")),
                None
            )
            .is_err()
        );
        let user = User::new("u", SecurityLevel::NoAuthNoPriv, None, None).unwrap();
        assert_eq!(user.flags(), 0);
        assert!(!user.localize(b"e").authenticated());
        assert!(AuthProtocol::parse("crc").is_err());
        assert!(PrivProtocol::parse("3des").is_err());
        assert!(SecurityLevel::parse("authpriv").is_ok());
    }
}
