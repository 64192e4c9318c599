//! # Message
//!
//! The decoded, owned form of one NXCP frame.
//!
//! A message is an opcode, a request id, a set of flags and a body. The body is
//! normally an insertion-ordered field table, but a message may instead carry a
//! raw binary payload or a single 32-bit control word.
//!
//! ```rust
//! use nxcp::core::message::Message;
//!
//! let mut msg = Message::new(0x0001, 42);
//! msg.set(1, "admin");
//! msg.set(2, 7u32);
//! msg.set(1, "root");
//!
//! assert_eq!(msg.field_count(), 2);
//! assert_eq!(msg.get_str(1), Some("root"));
//! assert_eq!(msg.get_u32(2), Some(7));
//! ```

use crate::core::field::{Field, FieldValue};
use bitflags::bitflags;
use bytes::Bytes;
use std::net::IpAddr;

bitflags! {
    /// Header flag word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MessageFlags: u16 {
        const COMPRESSED = 0x0001;
        const END_OF_FILE = 0x0002;
        const DONT_ENCRYPT = 0x0004;
        const END_OF_SEQUENCE = 0x0008;
        const REVERSE_ORDER = 0x0010;
        const CONTROL = 0x0020;
        const BINARY = 0x0040;
        const STREAM = 0x0080;
    }
}

impl MessageFlags {
    /// Flags describing the body layout. Derived from [`Body`] on encode and
    /// never stored on a [`Message`].
    pub const LAYOUT: MessageFlags = MessageFlags::COMPRESSED
        .union(MessageFlags::CONTROL)
        .union(MessageFlags::BINARY);
}

/// Message body.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Fields(Vec<Field>),
    Binary(Bytes),
    Control(u32),
}

impl Default for Body {
    fn default() -> Self {
        Body::Fields(Vec::new())
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Message {
    opcode: u16,
    id: u32,
    flags: MessageFlags,
    body: Body,
}

impl Message {
    /// Creates an empty field message.
    pub fn new(opcode: u16, id: u32) -> Self {
        Self {
            opcode,
            id,
            flags: MessageFlags::empty(),
            body: Body::Fields(Vec::new()),
        }
    }

    /// Creates a message carrying a raw binary payload.
    pub fn binary(opcode: u16, id: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            id,
            flags: MessageFlags::empty(),
            body: Body::Binary(payload.into()),
        }
    }

    /// Creates a control message carrying a single 32-bit word.
    pub fn control(opcode: u16, id: u32, word: u32) -> Self {
        Self {
            opcode,
            id,
            flags: MessageFlags::empty(),
            body: Body::Control(word),
        }
    }

    pub(crate) fn from_parts(opcode: u16, id: u32, flags: MessageFlags, body: Body) -> Self {
        Self {
            opcode,
            id,
            flags: flags.difference(MessageFlags::LAYOUT),
            body,
        }
    }

    pub fn opcode(&self) -> u16 {
        self.opcode
    }

    pub fn set_opcode(&mut self, opcode: u16) {
        self.opcode = opcode;
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn set_id(&mut self, id: u32) {
        self.id = id;
    }

    /// Flags as set by the caller. Layout bits are reported by [`Message::wire_flags`].
    pub fn flags(&self) -> MessageFlags {
        self.flags
    }

    /// Flags as they appear in an uncompressed header.
    pub fn wire_flags(&self) -> MessageFlags {
        match self.body {
            Body::Fields(_) => self.flags,
            Body::Binary(_) => self.flags | MessageFlags::BINARY,
            Body::Control(_) => self.flags | MessageFlags::CONTROL,
        }
    }

    /// Sets or clears caller flags. Layout bits are ignored.
    pub fn set_flag(&mut self, flag: MessageFlags, on: bool) {
        self.flags.set(flag.difference(MessageFlags::LAYOUT), on);
    }

    pub fn with_flag(mut self, flag: MessageFlags) -> Self {
        self.set_flag(flag, true);
        self
    }

    pub fn has_flag(&self, flag: MessageFlags) -> bool {
        self.wire_flags().contains(flag)
    }

    pub fn is_end_of_sequence(&self) -> bool {
        self.flags.contains(MessageFlags::END_OF_SEQUENCE)
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn into_body(self) -> Body {
        self.body
    }

    /// Fields in insertion order. Empty for binary and control messages.
    pub fn fields(&self) -> &[Field] {
        match &self.body {
            Body::Fields(fields) => fields,
            _ => &[],
        }
    }

    pub fn field_count(&self) -> usize {
        self.fields().len()
    }

    pub fn binary_payload(&self) -> Option<&Bytes> {
        match &self.body {
            Body::Binary(b) => Some(b),
            _ => None,
        }
    }

    pub fn control_word(&self) -> Option<u32> {
        match self.body {
            Body::Control(w) => Some(w),
            _ => None,
        }
    }

    /// Sets a field, replacing an existing value with the same id in place.
    ///
    /// A binary or control message is turned into an empty field message first.
    pub fn set(&mut self, id: u32, value: impl Into<FieldValue>) {
        let value = value.into();
        if !matches!(self.body, Body::Fields(_)) {
            self.body = Body::Fields(Vec::new());
        }
        if let Body::Fields(fields) = &mut self.body {
            match fields.iter_mut().find(|f| f.id == id) {
                Some(existing) => existing.value = value,
                None => fields.push(Field { id, value }),
            }
        }
    }

    /// Builder form of [`Message::set`].
    pub fn with(mut self, id: u32, value: impl Into<FieldValue>) -> Self {
        self.set(id, value);
        self
    }

    pub fn remove(&mut self, id: u32) -> Option<FieldValue> {
        match &mut self.body {
            Body::Fields(fields) => {
                let pos = fields.iter().position(|f| f.id == id)?;
                Some(fields.remove(pos).value)
            }
            _ => None,
        }
    }

    pub fn contains(&self, id: u32) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: u32) -> Option<&FieldValue> {
        self.fields().iter().find(|f| f.id == id).map(|f| &f.value)
    }

    pub fn get_u64(&self, id: u32) -> Option<u64> {
        self.get(id)?.as_u64()
    }

    /// Integer field narrowed to 32 bits; `None` if it does not fit.
    pub fn get_u32(&self, id: u32) -> Option<u32> {
        self.get_u64(id).and_then(|v| u32::try_from(v).ok())
    }

    pub fn get_u16(&self, id: u32) -> Option<u16> {
        self.get_u64(id).and_then(|v| u16::try_from(v).ok())
    }

    pub fn get_bool(&self, id: u32) -> Option<bool> {
        self.get_u64(id).map(|v| v != 0)
    }

    pub fn get_f64(&self, id: u32) -> Option<f64> {
        match self.get(id)? {
            FieldValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_str(&self, id: u32) -> Option<&str> {
        self.get(id)?.as_str()
    }

    pub fn get_binary(&self, id: u32) -> Option<&Bytes> {
        self.get(id)?.as_bytes()
    }

    pub fn get_addr(&self, id: u32) -> Option<(IpAddr, u8)> {
        match self.get(id)? {
            FieldValue::InetAddr(addr, bits) => Some((*addr, *bits)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_replaces_in_place() {
        let mut msg = Message::new(1, 1);
        msg.set(10, 1u32);
        msg.set(20, "b");
        msg.set(10, 2u32);

        let ids: Vec<u32> = msg.fields().iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![10, 20]);
        assert_eq!(msg.get_u32(10), Some(2));
    }

    #[test]
    fn test_narrowing_getters() {
        let msg = Message::new(1, 1).with(1, u64::MAX).with(2, 300u32);
        assert_eq!(msg.get_u32(1), None);
        assert_eq!(msg.get_u64(1), Some(u64::MAX));
        assert_eq!(msg.get_u16(2), Some(300));
        assert_eq!(msg.get_bool(2), Some(true));
    }

    #[test]
    fn test_layout_flags_are_not_stored() {
        let mut msg = Message::binary(5, 9, vec![1, 2, 3]);
        msg.set_flag(MessageFlags::COMPRESSED | MessageFlags::END_OF_FILE, true);

        assert_eq!(msg.flags(), MessageFlags::END_OF_FILE);
        assert!(msg.has_flag(MessageFlags::BINARY));
        assert_eq!(msg.field_count(), 0);
        assert_eq!(msg.binary_payload().map(|b| b.len()), Some(3));
    }

    #[test]
    fn test_set_on_control_message_switches_body() {
        let mut msg = Message::control(3, 1, 0xDEAD);
        assert_eq!(msg.control_word(), Some(0xDEAD));
        msg.set(1, 1u16);
        assert_eq!(msg.control_word(), None);
        assert_eq!(msg.field_count(), 1);
    }

    #[test]
    fn test_remove() {
        let mut msg = Message::new(1, 1).with(1, 1u16).with(2, 2u16);
        assert_eq!(msg.remove(1), Some(FieldValue::Int16(1)));
        assert_eq!(msg.remove(1), None);
        assert!(msg.contains(2));
    }
}
