//! Field values and their wire encoding.
//!
//! Encoding is explicit and big-endian. The same (kind, value) always yields
//! the same bytes: struct members are written in declared order, floats by
//! their bit pattern.

use std::collections::BTreeMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::registry::{FieldDescriptor, FieldKind};

/// Declared wire encoding of a leaf field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WireEncoding {
    Bool,
    U8,
    U16,
    U32,
    U64,
    I32,
    F32,
    /// u32 length prefix followed by UTF-8 bytes.
    Str,
}

impl WireEncoding {
    pub fn name(&self) -> &'static str {
        match self {
            WireEncoding::Bool => "bool",
            WireEncoding::U8 => "u8",
            WireEncoding::U16 => "u16",
            WireEncoding::U32 => "u32",
            WireEncoding::U64 => "u64",
            WireEncoding::I32 => "i32",
            WireEncoding::F32 => "f32",
            WireEncoding::Str => "str",
        }
    }

    /// Fewest bytes a value of this encoding takes on the wire.
    pub fn min_width(&self) -> usize {
        match self {
            WireEncoding::Bool | WireEncoding::U8 => 1,
            WireEncoding::U16 => 2,
            WireEncoding::U32 | WireEncoding::I32 | WireEncoding::F32 | WireEncoding::Str => 4,
            WireEncoding::U64 => 8,
        }
    }
}

/// In-memory value of a field (or nested field).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Bool(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I32(i32),
    F32(f32),
    Str(String),
    List(Vec<FieldValue>),
    /// Members keyed by their field id.
    Struct(BTreeMap<u32, FieldValue>),
}

impl FieldValue {
    /// Builds a struct value from `(member id, value)` pairs.
    pub fn structure<I>(members: I) -> Self
    where
        I: IntoIterator<Item = (u32, FieldValue)>,
    {
        FieldValue::Struct(members.into_iter().collect())
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            FieldValue::Bool(_) => "bool",
            FieldValue::U8(_) => "u8",
            FieldValue::U16(_) => "u16",
            FieldValue::U32(_) => "u32",
            FieldValue::U64(_) => "u64",
            FieldValue::I32(_) => "i32",
            FieldValue::F32(_) => "f32",
            FieldValue::Str(_) => "str",
            FieldValue::List(_) => "list",
            FieldValue::Struct(_) => "struct",
        }
    }

    /// Walks nested segments (struct member ids, list indices).
    pub fn at(&self, segments: &[u32]) -> Option<&FieldValue> {
        let Some((first, rest)) = segments.split_first() else {
            return Some(self);
        };
        let child = match self {
            FieldValue::Struct(members) => members.get(first)?,
            FieldValue::List(items) => items.get(*first as usize)?,
            _ => return None,
        };
        child.at(rest)
    }

    /// Replaces the value at nested `segments`. Returns false if the slot
    /// does not exist.
    pub fn set_at(&mut self, segments: &[u32], value: FieldValue) -> bool {
        let Some((first, rest)) = segments.split_first() else {
            *self = value;
            return true;
        };
        let child = match self {
            FieldValue::Struct(members) => members.get_mut(first),
            FieldValue::List(items) => items.get_mut(*first as usize),
            _ => None,
        };
        match child {
            Some(child) => child.set_at(rest, value),
            None => false,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> Option<u8> {
        match self {
            FieldValue::U8(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u16(&self) -> Option<u16> {
        match self {
            FieldValue::U16(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            FieldValue::U32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            FieldValue::F32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[FieldValue]> {
        match self {
            FieldValue::List(v) => Some(v),
            _ => None,
        }
    }

    /// Member of a struct value by id.
    pub fn member(&self, id: u32) -> Option<&FieldValue> {
        match self {
            FieldValue::Struct(m) => m.get(&id),
            _ => None,
        }
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<u8> for FieldValue {
    fn from(v: u8) -> Self {
        FieldValue::U8(v)
    }
}

impl From<u16> for FieldValue {
    fn from(v: u16) -> Self {
        FieldValue::U16(v)
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        FieldValue::U32(v)
    }
}

impl From<f32> for FieldValue {
    fn from(v: f32) -> Self {
        FieldValue::F32(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Str(v)
    }
}

impl From<Vec<u32>> for FieldValue {
    fn from(v: Vec<u32>) -> Self {
        FieldValue::List(v.into_iter().map(FieldValue::U32).collect())
    }
}

/// Encode/decode failures. Callers attach the field path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("expected {expected}, found {found}")]
    Mismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("struct member {0} missing")]
    MissingMember(u32),

    #[error("struct member {0} not declared")]
    UndeclaredMember(u32),

    #[error("payload truncated")]
    Truncated,

    #[error("invalid bool byte {0:#04x}")]
    InvalidBool(u8),

    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    #[error("{0} trailing bytes")]
    Trailing(usize),

    #[error("length {0} exceeds remaining payload")]
    LengthOverflow(u32),
}

/// Encodes `value` per `kind` into a fresh buffer.
pub fn encode_value(kind: &FieldKind, value: &FieldValue) -> Result<Bytes, CodecError> {
    let mut out = BytesMut::new();
    write_value(kind, value, &mut out)?;
    Ok(out.freeze())
}

/// Decodes a whole payload; trailing bytes are an error.
pub fn decode_value(kind: &FieldKind, payload: &[u8]) -> Result<FieldValue, CodecError> {
    let mut buf = payload;
    let value = read_value(kind, &mut buf)?;
    if buf.has_remaining() {
        return Err(CodecError::Trailing(buf.remaining()));
    }
    Ok(value)
}

fn write_value(kind: &FieldKind, value: &FieldValue, out: &mut BytesMut) -> Result<(), CodecError> {
    match (kind, value) {
        (FieldKind::Leaf(enc), v) => write_leaf(*enc, v, out),
        (FieldKind::List(elem), FieldValue::List(items)) => {
            out.put_u32(items.len() as u32);
            for item in items {
                write_value(elem, item, out)?;
            }
            Ok(())
        }
        (FieldKind::Struct(members), FieldValue::Struct(values)) => {
            if let Some(extra) = values.keys().find(|k| !members.iter().any(|m| m.id == **k)) {
                return Err(CodecError::UndeclaredMember(*extra));
            }
            for member in members {
                let v = values
                    .get(&member.id)
                    .ok_or(CodecError::MissingMember(member.id))?;
                write_value(&member.kind, v, out)?;
            }
            Ok(())
        }
        (kind, v) => Err(CodecError::Mismatch {
            expected: kind.name(),
            found: v.kind_name(),
        }),
    }
}

fn write_leaf(enc: WireEncoding, value: &FieldValue, out: &mut BytesMut) -> Result<(), CodecError> {
    match (enc, value) {
        (WireEncoding::Bool, FieldValue::Bool(v)) => out.put_u8(u8::from(*v)),
        (WireEncoding::U8, FieldValue::U8(v)) => out.put_u8(*v),
        (WireEncoding::U16, FieldValue::U16(v)) => out.put_u16(*v),
        (WireEncoding::U32, FieldValue::U32(v)) => out.put_u32(*v),
        (WireEncoding::U64, FieldValue::U64(v)) => out.put_u64(*v),
        (WireEncoding::I32, FieldValue::I32(v)) => out.put_i32(*v),
        (WireEncoding::F32, FieldValue::F32(v)) => out.put_u32(v.to_bits()),
        (WireEncoding::Str, FieldValue::Str(s)) => {
            out.put_u32(s.len() as u32);
            out.put_slice(s.as_bytes());
        }
        (enc, v) => {
            return Err(CodecError::Mismatch {
                expected: enc.name(),
                found: v.kind_name(),
            })
        }
    }
    Ok(())
}

fn need(buf: &[u8], n: usize) -> Result<(), CodecError> {
    if buf.len() < n {
        Err(CodecError::Truncated)
    } else {
        Ok(())
    }
}

fn read_value(kind: &FieldKind, buf: &mut &[u8]) -> Result<FieldValue, CodecError> {
    match kind {
        FieldKind::Leaf(enc) => read_leaf(*enc, buf),
        FieldKind::List(elem) => {
            need(buf, 4)?;
            let count = buf.get_u32();
            let needed = (count as usize).saturating_mul(elem.min_width().max(1));
            if needed > buf.remaining() {
                return Err(CodecError::LengthOverflow(count));
            }
            let mut items = Vec::with_capacity(count as usize);
            for _ in 0..count {
                items.push(read_value(elem, buf)?);
            }
            Ok(FieldValue::List(items))
        }
        FieldKind::Struct(members) => read_members(members, buf),
    }
}

fn read_members(members: &[FieldDescriptor], buf: &mut &[u8]) -> Result<FieldValue, CodecError> {
    let mut values = BTreeMap::new();
    for member in members {
        values.insert(member.id, read_value(&member.kind, buf)?);
    }
    Ok(FieldValue::Struct(values))
}

fn read_leaf(enc: WireEncoding, buf: &mut &[u8]) -> Result<FieldValue, CodecError> {
    let v = match enc {
        WireEncoding::Bool => {
            need(buf, 1)?;
            match buf.get_u8() {
                0 => FieldValue::Bool(false),
                1 => FieldValue::Bool(true),
                other => return Err(CodecError::InvalidBool(other)),
            }
        }
        WireEncoding::U8 => {
            need(buf, 1)?;
            FieldValue::U8(buf.get_u8())
        }
        WireEncoding::U16 => {
            need(buf, 2)?;
            FieldValue::U16(buf.get_u16())
        }
        WireEncoding::U32 => {
            need(buf, 4)?;
            FieldValue::U32(buf.get_u32())
        }
        WireEncoding::U64 => {
            need(buf, 8)?;
            FieldValue::U64(buf.get_u64())
        }
        WireEncoding::I32 => {
            need(buf, 4)?;
            FieldValue::I32(buf.get_i32())
        }
        WireEncoding::F32 => {
            need(buf, 4)?;
            FieldValue::F32(f32::from_bits(buf.get_u32()))
        }
        WireEncoding::Str => {
            need(buf, 4)?;
            let len = buf.get_u32();
            if len as usize > buf.remaining() {
                return Err(CodecError::LengthOverflow(len));
            }
            let raw = buf.copy_to_bytes(len as usize);
            let s = std::str::from_utf8(&raw).map_err(|_| CodecError::InvalidUtf8)?;
            FieldValue::Str(s.to_string())
        }
    };
    Ok(v)
}
