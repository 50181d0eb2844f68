//! # Wire Types
//!
//! The closed set of value types that can travel in a message payload.
//!
//! Payloads carry no type tags, so both sides must agree on the sequence of
//! [`WireType`]s. Adding a type means adding a variant here, and the exhaustive
//! matches in [`crate::core::message`] then refuse to compile until the
//! encoder and decoder handle it.

use crate::error::DecodeError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 64-bit identity of a session participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub u64);

impl PeerId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for PeerId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Three-component float vector.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Rotation quaternion, stored in (x, y, z, w) order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Quaternion {
    pub const IDENTITY: Quaternion = Quaternion::new(0.0, 0.0, 0.0, 1.0);

    pub const fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Supported payload types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WireType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    /// One byte, `1` for true
    Bool,
    /// i32 byte count followed by UTF-8 bytes
    String,
    /// i32 byte count followed by raw bytes
    Bytes,
    /// i32 element count followed by one byte per element
    Bools,
    /// Three f32 values
    Vector3,
    /// Four f32 values
    Quaternion,
    /// u64 session identity
    PeerId,
}

impl WireType {
    /// Every supported type, in tag order.
    pub const ALL: [WireType; 16] = [
        WireType::U8,
        WireType::I8,
        WireType::U16,
        WireType::I16,
        WireType::U32,
        WireType::I32,
        WireType::U64,
        WireType::I64,
        WireType::F32,
        WireType::Bool,
        WireType::String,
        WireType::Bytes,
        WireType::Bools,
        WireType::Vector3,
        WireType::Quaternion,
        WireType::PeerId,
    ];

    /// Get the stable identifier byte for this type
    pub fn tag(self) -> u8 {
        match self {
            WireType::U8 => 0x01,
            WireType::I8 => 0x02,
            WireType::U16 => 0x03,
            WireType::I16 => 0x04,
            WireType::U32 => 0x05,
            WireType::I32 => 0x06,
            WireType::U64 => 0x07,
            WireType::I64 => 0x08,
            WireType::F32 => 0x09,
            WireType::Bool => 0x0A,
            WireType::String => 0x0B,
            WireType::Bytes => 0x0C,
            WireType::Bools => 0x0D,
            WireType::Vector3 => 0x0E,
            WireType::Quaternion => 0x0F,
            WireType::PeerId => 0x10,
        }
    }

    /// Resolve a type from its identifier byte
    pub fn from_tag(tag: u8) -> Result<Self, DecodeError> {
        Self::ALL
            .into_iter()
            .find(|ty| ty.tag() == tag)
            .ok_or(DecodeError::UnsupportedType(tag))
    }

    /// Get human-readable name
    pub fn name(self) -> &'static str {
        match self {
            WireType::U8 => "byte",
            WireType::I8 => "sbyte",
            WireType::U16 => "ushort",
            WireType::I16 => "short",
            WireType::U32 => "uint",
            WireType::I32 => "int",
            WireType::U64 => "ulong",
            WireType::I64 => "long",
            WireType::F32 => "float",
            WireType::Bool => "bool",
            WireType::String => "string",
            WireType::Bytes => "byte[]",
            WireType::Bools => "bool[]",
            WireType::Vector3 => "Vector3",
            WireType::Quaternion => "Quaternion",
            WireType::PeerId => "PeerId",
        }
    }

    /// Encoded size in bytes, or `None` for length-prefixed types.
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            WireType::U8 | WireType::I8 | WireType::Bool => Some(1),
            WireType::U16 | WireType::I16 => Some(2),
            WireType::U32 | WireType::I32 | WireType::F32 => Some(4),
            WireType::U64 | WireType::I64 | WireType::PeerId => Some(8),
            WireType::Vector3 => Some(12),
            WireType::Quaternion => Some(16),
            WireType::String | WireType::Bytes | WireType::Bools => None,
        }
    }
}

impl fmt::Display for WireType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single payload value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F32(f32),
    Bool(bool),
    String(String),
    Bytes(Vec<u8>),
    Bools(Vec<bool>),
    Vector3(Vector3),
    Quaternion(Quaternion),
    PeerId(PeerId),
}

impl Value {
    /// The runtime type of this value
    pub fn wire_type(&self) -> WireType {
        match self {
            Value::U8(_) => WireType::U8,
            Value::I8(_) => WireType::I8,
            Value::U16(_) => WireType::U16,
            Value::I16(_) => WireType::I16,
            Value::U32(_) => WireType::U32,
            Value::I32(_) => WireType::I32,
            Value::U64(_) => WireType::U64,
            Value::I64(_) => WireType::I64,
            Value::F32(_) => WireType::F32,
            Value::Bool(_) => WireType::Bool,
            Value::String(_) => WireType::String,
            Value::Bytes(_) => WireType::Bytes,
            Value::Bools(_) => WireType::Bools,
            Value::Vector3(_) => WireType::Vector3,
            Value::Quaternion(_) => WireType::Quaternion,
            Value::PeerId(_) => WireType::PeerId,
        }
    }
}

/// Conversion from a borrowed [`Value`] into a concrete Rust type.
///
/// Returns `None` when the value holds a different variant; there is no
/// numeric widening.
pub trait FromValue: Sized {
    const WIRE_TYPE: WireType;

    fn from_value(value: &Value) -> Option<Self>;
}

macro_rules! impl_value_conversions {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }

            impl FromValue for $ty {
                const WIRE_TYPE: WireType = WireType::$variant;

                fn from_value(value: &Value) -> Option<Self> {
                    match value {
                        Value::$variant(v) => Some(v.clone()),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_value_conversions! {
    U8 => u8,
    I8 => i8,
    U16 => u16,
    I16 => i16,
    U32 => u32,
    I32 => i32,
    U64 => u64,
    I64 => i64,
    F32 => f32,
    Bool => bool,
    String => String,
    Bytes => Vec<u8>,
    Bools => Vec<bool>,
    Vector3 => Vector3,
    Quaternion => Quaternion,
    PeerId => PeerId,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}
