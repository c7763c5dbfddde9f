//! Register definitions and value encodings
//!
//! A [`Register`] from configuration resolves once into a
//! [`RegisterOperation`]: function code, address, register count and the
//! numeric [`Encoding`] used to turn raw register bytes into `f64` and back.

use crate::error::{HestiaError, Result};
use serde::{Deserialize, Serialize};

/// Register configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Register {
    pub address: u16,
    #[serde(rename = "type")]
    pub kind: String,
    /// Deprecated alias of `encoding`
    pub decode: String,
    pub encoding: String,
    pub bitmask: String,
}

/// Modbus function used by an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionCode {
    ReadHoldingRegisters,
    ReadInputRegisters,
    ReadCoils,
    WriteSingleRegister,
    WriteMultipleRegisters,
    WriteSingleCoil,
}

impl FunctionCode {
    pub fn is_read(self) -> bool {
        matches!(
            self,
            FunctionCode::ReadHoldingRegisters
                | FunctionCode::ReadInputRegisters
                | FunctionCode::ReadCoils
        )
    }
}

/// Numeric register encodings; `s` suffix means low word first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Bool8,
    Int16,
    Int16Nan,
    Uint16,
    Uint16Nan,
    Bool16(u16),
    Int32,
    Int32Nan,
    Int32s,
    Uint32,
    Uint32s,
    Uint32Nan,
    Float32,
    Float32s,
    Uint64,
    Uint64Nan,
    Float64,
}

/// A resolved register access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterOperation {
    pub function: FunctionCode,
    pub addr: u16,
    /// Number of registers (or coils)
    pub length: u16,
    pub encoding: Encoding,
}

impl Register {
    fn encoding_name(&self) -> &str {
        if self.encoding.is_empty() {
            &self.decode
        } else {
            &self.encoding
        }
    }

    /// Validate the configuration
    pub fn error(&self) -> Result<()> {
        if self.kind.is_empty() {
            return Err(HestiaError::config("register type is required"));
        }
        if self.decode.is_empty() && self.encoding.is_empty() {
            return Err(HestiaError::config("register encoding is required"));
        }
        if !self.decode.is_empty() && !self.encoding.is_empty() {
            return Err(HestiaError::config(
                "must not have decode when encoding is specified",
            ));
        }
        Ok(())
    }

    /// Resolve function code, length and encoding
    pub fn operation(&self) -> Result<RegisterOperation> {
        self.error()?;

        let function = match self.kind.to_lowercase().as_str() {
            "holding" => FunctionCode::ReadHoldingRegisters,
            "input" => FunctionCode::ReadInputRegisters,
            "coil" => FunctionCode::ReadCoils,
            "writesingle" | "writeholding" => FunctionCode::WriteSingleRegister,
            "writemultiple" | "writeholdings" => FunctionCode::WriteMultipleRegisters,
            "writecoil" => FunctionCode::WriteSingleCoil,
            other => {
                return Err(HestiaError::config(format!(
                    "invalid register type: {}",
                    other
                )));
            }
        };

        let encoding = Encoding::parse(self.encoding_name(), &self.bitmask)?;

        Ok(RegisterOperation {
            function,
            addr: self.address,
            length: encoding.registers(),
            encoding,
        })
    }
}

fn parse_mask(mask: &str) -> Result<u16> {
    let trimmed = mask.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.is_empty() {
        return Err(HestiaError::config("bool16 requires a bitmask"));
    }
    u16::from_str_radix(digits, 16)
        .map_err(|_| HestiaError::config(format!("invalid bitmask: {}", mask)))
}

fn finite(v: f64) -> f64 {
    if v.is_finite() { v } else { 0.0 }
}

impl Encoding {
    /// Parse an encoding name such as `int32s` or `ieee754`
    pub fn parse(name: &str, bitmask: &str) -> Result<Self> {
        let enc = match name.to_lowercase().as_str() {
            "bool8" => Encoding::Bool8,
            "int16" => Encoding::Int16,
            "int16nan" => Encoding::Int16Nan,
            "uint16" => Encoding::Uint16,
            "uint16nan" => Encoding::Uint16Nan,
            "bool16" => Encoding::Bool16(parse_mask(bitmask)?),
            "int32" => Encoding::Int32,
            "int32nan" => Encoding::Int32Nan,
            "int32s" => Encoding::Int32s,
            "uint32" => Encoding::Uint32,
            "uint32s" => Encoding::Uint32s,
            "uint32nan" => Encoding::Uint32Nan,
            "float32" | "ieee754" => Encoding::Float32,
            "float32s" | "ieee754s" => Encoding::Float32s,
            "uint64" => Encoding::Uint64,
            "uint64nan" => Encoding::Uint64Nan,
            "float64" => Encoding::Float64,
            other => {
                return Err(HestiaError::config(format!(
                    "invalid register encoding: {}",
                    other
                )));
            }
        };
        Ok(enc)
    }

    /// Number of 16 bit registers the encoding spans
    pub fn registers(self) -> u16 {
        match self {
            Encoding::Bool8
            | Encoding::Int16
            | Encoding::Int16Nan
            | Encoding::Uint16
            | Encoding::Uint16Nan
            | Encoding::Bool16(_) => 1,
            Encoding::Int32
            | Encoding::Int32Nan
            | Encoding::Int32s
            | Encoding::Uint32
            | Encoding::Uint32s
            | Encoding::Uint32Nan
            | Encoding::Float32
            | Encoding::Float32s => 2,
            Encoding::Uint64 | Encoding::Uint64Nan | Encoding::Float64 => 4,
        }
    }

    /// Decode big-endian register bytes; NaN, infinities and sentinels read as 0
    pub fn decode(self, b: &[u8]) -> Result<f64> {
        let need = match self {
            Encoding::Bool8 => 1,
            other => usize::from(other.registers()) * 2,
        };
        if b.len() < need {
            return Err(HestiaError::modbus(format!(
                "insufficient data: got {} bytes, need {}",
                b.len(),
                need
            )));
        }

        let u16_at = |i: usize| u16::from_be_bytes([b[i], b[i + 1]]);
        let u32_be = || u32::from_be_bytes([b[0], b[1], b[2], b[3]]);
        let u32_swapped = || u32::from_be_bytes([b[2], b[3], b[0], b[1]]);
        let u64_be = || u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]);

        let v = match self {
            Encoding::Bool8 => f64::from(u8::from(b[0] != 0)),
            Encoding::Int16 => f64::from(u16_at(0) as i16),
            Encoding::Int16Nan => match u16_at(0) {
                0x8000 | 0x7FFF => 0.0,
                v => f64::from(v as i16),
            },
            Encoding::Uint16 => f64::from(u16_at(0)),
            Encoding::Uint16Nan => match u16_at(0) {
                0xFFFF => 0.0,
                v => f64::from(v),
            },
            Encoding::Bool16(mask) => f64::from(u8::from(u16_at(0) & mask != 0)),
            Encoding::Int32 => f64::from(u32_be() as i32),
            Encoding::Int32Nan => match u32_be() {
                0x8000_0000 | 0x7FFF_FFFF => 0.0,
                v => f64::from(v as i32),
            },
            Encoding::Int32s => f64::from(u32_swapped() as i32),
            Encoding::Uint32 => f64::from(u32_be()),
            Encoding::Uint32s => f64::from(u32_swapped()),
            Encoding::Uint32Nan => match u32_be() {
                0xFFFF_FFFF => 0.0,
                v => f64::from(v),
            },
            Encoding::Float32 => f64::from(f32::from_bits(u32_be())),
            Encoding::Float32s => f64::from(f32::from_bits(u32_swapped())),
            Encoding::Uint64 => u64_be() as f64,
            Encoding::Uint64Nan => match u64_be() {
                u64::MAX => 0.0,
                v => v as f64,
            },
            Encoding::Float64 => f64::from_bits(u64_be()),
        };

        Ok(finite(v))
    }

    /// Encode a value into registers for multi-register writes
    pub fn encode(self, value: f64) -> Vec<u16> {
        let words32 = |v: u32, swapped: bool| {
            let (hi, lo) = ((v >> 16) as u16, v as u16);
            if swapped { vec![lo, hi] } else { vec![hi, lo] }
        };

        match self {
            Encoding::Bool8 | Encoding::Bool16(_) => vec![u16::from(value != 0.0)],
            Encoding::Int16 | Encoding::Int16Nan => vec![value as i16 as u16],
            Encoding::Uint16 | Encoding::Uint16Nan => vec![value as u16],
            Encoding::Int32 | Encoding::Int32Nan => words32(value as i32 as u32, false),
            Encoding::Int32s => words32(value as i32 as u32, true),
            Encoding::Uint32 | Encoding::Uint32Nan => words32(value as u32, false),
            Encoding::Uint32s => words32(value as u32, true),
            Encoding::Float32 => words32((value as f32).to_bits(), false),
            Encoding::Float32s => words32((value as f32).to_bits(), true),
            Encoding::Uint64 | Encoding::Uint64Nan => u64_words(value as u64),
            Encoding::Float64 => u64_words(value.to_bits()),
        }
    }
}

fn u64_words(v: u64) -> Vec<u16> {
    vec![(v >> 48) as u16, (v >> 32) as u16, (v >> 16) as u16, v as u16]
}

/// Flatten registers into big-endian bytes
pub fn registers_to_bytes(regs: &[u16]) -> Vec<u8> {
    regs.iter().flat_map(|r| r.to_be_bytes()).collect()
}

/// Pack big-endian bytes into registers; an odd trailing byte is zero padded
pub fn bytes_to_registers(b: &[u8]) -> Vec<u16> {
    b.chunks(2)
        .map(|c| u16::from_be_bytes([c[0], c.get(1).copied().unwrap_or(0)]))
        .collect()
}

/// Decode a string from registers, trimming NULs and whitespace
pub fn decode_string(b: &[u8]) -> String {
    String::from_utf8_lossy(b)
        .trim_matches('\0')
        .trim()
        .to_string()
}
