//! Typed field values carried in a message body.

use bytes::Bytes;
use std::net::IpAddr;

/// On-wire type tags for the field table.
pub mod tag {
    pub const INT32: u8 = 0;
    pub const UCS2_STRING: u8 = 1;
    pub const INT64: u8 = 2;
    pub const INT16: u8 = 3;
    pub const BINARY: u8 = 4;
    pub const FLOAT: u8 = 5;
    pub const INET_ADDR: u8 = 6;
    pub const UTF8_STRING: u8 = 7;
}

/// Address family byte of an `InetAddr` field.
pub(crate) const FAMILY_INET: u8 = 0;
pub(crate) const FAMILY_INET6: u8 = 1;

/// A single typed value.
///
/// Strings are always held as Rust `String`; the codec decides the wire form.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Int16(u16),
    Int32(u32),
    Int64(u64),
    Float(f64),
    String(String),
    Binary(Bytes),
    /// Address plus prefix length in bits.
    InetAddr(IpAddr, u8),
}

impl FieldValue {
    /// Tag written when this value is encoded.
    pub fn wire_tag(&self) -> u8 {
        match self {
            FieldValue::Int16(_) => tag::INT16,
            FieldValue::Int32(_) => tag::INT32,
            FieldValue::Int64(_) => tag::INT64,
            FieldValue::Float(_) => tag::FLOAT,
            FieldValue::String(_) => tag::UTF8_STRING,
            FieldValue::Binary(_) => tag::BINARY,
            FieldValue::InetAddr(..) => tag::INET_ADDR,
        }
    }

    /// Encoded size of this field including its 6-byte id/type/flags prefix,
    /// before padding to the 8-byte boundary.
    pub(crate) fn encoded_len(&self) -> usize {
        match self {
            FieldValue::Int16(_) => 8,
            FieldValue::Int32(_) => 12,
            FieldValue::Int64(_) | FieldValue::Float(_) => 16,
            FieldValue::String(s) => 12 + s.len(),
            FieldValue::Binary(b) => 12 + b.len(),
            FieldValue::InetAddr(..) => 32,
        }
    }

    /// Integer view, widening narrower integer types.
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            FieldValue::Int16(v) => Some(u64::from(v)),
            FieldValue::Int32(v) => Some(u64::from(v)),
            FieldValue::Int64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            FieldValue::Binary(b) => Some(b),
            _ => None,
        }
    }
}

impl From<u16> for FieldValue {
    fn from(v: u16) -> Self {
        FieldValue::Int16(v)
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        FieldValue::Int32(v)
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::Int64(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

impl From<Bytes> for FieldValue {
    fn from(v: Bytes) -> Self {
        FieldValue::Binary(v)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(v: Vec<u8>) -> Self {
        FieldValue::Binary(Bytes::from(v))
    }
}

impl From<&[u8]> for FieldValue {
    fn from(v: &[u8]) -> Self {
        FieldValue::Binary(Bytes::copy_from_slice(v))
    }
}

impl From<IpAddr> for FieldValue {
    fn from(v: IpAddr) -> Self {
        let bits = match v {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        FieldValue::InetAddr(v, bits)
    }
}

/// One entry of a message's field table.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub id: u32,
    pub value: FieldValue,
}
