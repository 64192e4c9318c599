//! # Wire Codec
//!
//! Converts [`Message`] values to and from NXCP frames.
//!
//! ## Frame layout
//! ```text
//! [total_size:u32][opcode:u16][flags:u16][request_id:u32][field_count:u32] [field table]
//! ```
//! All integers are big-endian. `total_size` covers the header and is padded
//! to a multiple of 8. For `BINARY` messages the `field_count` slot holds the
//! payload length, for `CONTROL` messages it holds the control word.
//!
//! Each field starts with `id:u32, type:u8, flags:u8` and is padded with zeros
//! to the next 8-byte boundary.
//!
//! [`FrameCodec`] does the stream side: it slices complete frames out of a
//! byte stream using only the size word, so it works for plain frames and
//! encryption envelopes alike.

use crate::core::field::{tag, Field, FieldValue, FAMILY_INET, FAMILY_INET6};
use crate::core::message::{Body, Message, MessageFlags};
use crate::error::{FrameError, ProtocolError};
use crate::utils::compression;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tokio_util::codec::{Decoder, Encoder};

/// Size of the fixed frame header.
pub const HEADER_SIZE: usize = 16;

/// Default hard cap on a single frame.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

#[inline]
pub(crate) fn align8(n: usize) -> usize {
    (n + 7) & !7
}

#[inline]
fn pad_to_8(buf: &mut BytesMut, start: usize) {
    let written = buf.len() - start;
    buf.put_bytes(0, align8(written) - written);
}

fn encoded_body_len(msg: &Message) -> usize {
    match msg.body() {
        Body::Fields(fields) => fields.iter().map(|f| align8(f.value.encoded_len())).sum(),
        Body::Binary(payload) => align8(payload.len()),
        Body::Control(_) => 0,
    }
}

fn put_field(buf: &mut BytesMut, field: &Field) {
    let start = buf.len();
    buf.put_u32(field.id);
    buf.put_u8(field.value.wire_tag());
    buf.put_u8(0);

    match &field.value {
        FieldValue::Int16(v) => buf.put_u16(*v),
        FieldValue::Int32(v) => {
            buf.put_u16(0);
            buf.put_u32(*v);
        }
        FieldValue::Int64(v) => {
            buf.put_u16(0);
            buf.put_u64(*v);
        }
        FieldValue::Float(v) => {
            buf.put_u16(0);
            buf.put_u64(v.to_bits());
        }
        FieldValue::String(s) => {
            buf.put_u16(0);
            buf.put_u32(s.len() as u32);
            buf.put_slice(s.as_bytes());
        }
        FieldValue::Binary(b) => {
            buf.put_u16(0);
            buf.put_u32(b.len() as u32);
            buf.put_slice(b);
        }
        FieldValue::InetAddr(addr, bits) => {
            buf.put_u16(0);
            let mut raw = [0u8; 16];
            let family = match addr {
                IpAddr::V4(v4) => {
                    raw[..4].copy_from_slice(&v4.octets());
                    FAMILY_INET
                }
                IpAddr::V6(v6) => {
                    raw.copy_from_slice(&v6.octets());
                    FAMILY_INET6
                }
            };
            buf.put_slice(&raw);
            buf.put_u8(family);
            buf.put_u8(*bits);
        }
    }

    pad_to_8(buf, start);
}

fn put_body(buf: &mut BytesMut, body: &Body) {
    let start = buf.len();
    match body {
        Body::Fields(fields) => fields.iter().for_each(|f| put_field(buf, f)),
        Body::Binary(payload) => {
            buf.put_slice(payload);
            pad_to_8(buf, start);
        }
        Body::Control(_) => {}
    }
}

fn count_slot(body: &Body) -> u32 {
    match body {
        Body::Fields(fields) => fields.len() as u32,
        Body::Binary(payload) => payload.len() as u32,
        Body::Control(word) => *word,
    }
}

/// Encodes a message into a single uncompressed frame.
pub fn encode(msg: &Message) -> Bytes {
    encode_with(msg, false)
}

/// Encodes a message, compressing the body when `compress` is set and it pays off.
///
/// Compression applies only to bodies larger than
/// [`compression::COMPRESSION_THRESHOLD`] and only when the compressed form
/// is smaller. Control messages are never compressed.
pub fn encode_with(msg: &Message, compress: bool) -> Bytes {
    let body_len = encoded_body_len(msg);
    let mut body = BytesMut::with_capacity(body_len);
    put_body(&mut body, msg.body());

    let mut flags = msg.wire_flags();
    let compressed = if compress && !matches!(msg.body(), Body::Control(_)) {
        compression::maybe_compress(&body).and_then(|block| {
            let packed = align8(4 + block.len());
            // Only worth it if the padded result still beats the raw body.
            (packed < body.len()).then_some(block)
        })
    } else {
        None
    };

    let mut frame;
    match compressed {
        Some(block) => {
            flags |= MessageFlags::COMPRESSED;
            let total = HEADER_SIZE + align8(4 + block.len());
            frame = BytesMut::with_capacity(total);
            put_header(&mut frame, total, msg, flags);
            let start = frame.len();
            frame.put_u32(block.len() as u32);
            frame.put_slice(&block);
            pad_to_8(&mut frame, start);
        }
        None => {
            let total = HEADER_SIZE + body.len();
            frame = BytesMut::with_capacity(total);
            put_header(&mut frame, total, msg, flags);
            frame.put_slice(&body);
        }
    }

    frame.freeze()
}

fn put_header(frame: &mut BytesMut, total: usize, msg: &Message, flags: MessageFlags) {
    frame.put_u32(total as u32);
    frame.put_u16(msg.opcode());
    frame.put_u16(flags.bits());
    frame.put_u32(msg.id());
    frame.put_u32(count_slot(msg.body()));
}

/// Header fields of a frame, read without touching the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub total_size: u32,
    pub opcode: u16,
    pub flags: MessageFlags,
    pub request_id: u32,
    pub field_count: u32,
}

impl FrameHeader {
    /// Parses the first 16 bytes of `data`.
    pub fn parse(mut data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < HEADER_SIZE {
            return Err(FrameError::FrameTooSmall(data.len()));
        }
        Ok(Self {
            total_size: data.get_u32(),
            opcode: data.get_u16(),
            flags: MessageFlags::from_bits_retain(data.get_u16()),
            request_id: data.get_u32(),
            field_count: data.get_u32(),
        })
    }
}

/// Decodes one frame using the default size cap.
pub fn decode(data: &[u8]) -> Result<Message, FrameError> {
    decode_with_limit(data, DEFAULT_MAX_FRAME_SIZE)
}

/// Decodes one frame, rejecting any that declares more than `max_size` bytes.
///
/// Trailing bytes after the declared size are ignored.
pub fn decode_with_limit(data: &[u8], max_size: usize) -> Result<Message, FrameError> {
    let header = FrameHeader::parse(data)?;
    let declared = header.total_size as usize;

    if declared < HEADER_SIZE {
        return Err(FrameError::FrameTooSmall(declared));
    }
    if declared > max_size {
        return Err(FrameError::FrameTooLarge {
            size: declared,
            limit: max_size,
        });
    }
    if declared > data.len() {
        return Err(FrameError::FrameTruncated {
            declared,
            available: data.len(),
        });
    }

    let raw_body = &data[HEADER_SIZE..declared];
    let inflated;
    let body: &[u8] = if header.flags.contains(MessageFlags::COMPRESSED) {
        inflated = inflate(raw_body, max_size)?;
        &inflated
    } else {
        raw_body
    };

    let decoded = if header.flags.contains(MessageFlags::CONTROL) {
        Body::Control(header.field_count)
    } else if header.flags.contains(MessageFlags::BINARY) {
        let size = header.field_count as usize;
        if size > body.len() {
            return Err(FrameError::FieldTableTruncated(HEADER_SIZE));
        }
        Body::Binary(Bytes::copy_from_slice(&body[..size]))
    } else {
        Body::Fields(parse_fields(body, header.field_count)?)
    };

    Ok(Message::from_parts(
        header.opcode,
        header.request_id,
        header.flags,
        decoded,
    ))
}

fn inflate(body: &[u8], max_size: usize) -> Result<Vec<u8>, FrameError> {
    if body.len() < 4 {
        return Err(FrameError::FieldTableTruncated(HEADER_SIZE));
    }
    let block_len = u32::from_be_bytes([body[0], body[1], body[2], body[3]]) as usize;
    let block = body
        .get(4..)
        .and_then(|rest| rest.get(..block_len))
        .ok_or(FrameError::FieldTableTruncated(HEADER_SIZE + 4))?;
    compression::decompress(block, max_size).map_err(|_| FrameError::Decompression)
}

/// Bounds-checked reader over a field table. Offsets are reported relative
/// to the start of the frame.
struct FieldReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    fn err(&self) -> FrameError {
        FrameError::FieldTableTruncated(HEADER_SIZE + self.pos)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], FrameError> {
        let data = self.data;
        let end = self.pos.checked_add(n).ok_or_else(|| self.err())?;
        let slice = data.get(self.pos..end).ok_or_else(|| self.err())?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, FrameError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, FrameError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, FrameError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, FrameError> {
        let mut b = self.take(8)?;
        Ok(b.get_u64())
    }

    fn sized(&mut self) -> Result<&'a [u8], FrameError> {
        self.take(2)?;
        let len = self.u32()? as usize;
        self.take(len)
    }

    /// Skips to the next 8-byte boundary, tolerating an unpadded final field.
    fn realign(&mut self) {
        self.pos = align8(self.pos).min(self.data.len());
    }
}

fn parse_fields(body: &[u8], count: u32) -> Result<Vec<Field>, FrameError> {
    let count = count as usize;
    // Smallest field is 8 bytes; a larger count cannot fit.
    if count > body.len() / 8 + 1 {
        return Err(FrameError::FieldTableTruncated(HEADER_SIZE + body.len()));
    }

    let mut reader = FieldReader { data: body, pos: 0 };
    let mut fields = Vec::with_capacity(count);

    for _ in 0..count {
        let field_start = reader.pos;
        let id = reader.u32()?;
        let type_tag = reader.u8()?;
        let _flags = reader.u8()?;

        let value = match type_tag {
            tag::INT16 => FieldValue::Int16(reader.u16()?),
            tag::INT32 => {
                reader.take(2)?;
                FieldValue::Int32(reader.u32()?)
            }
            tag::INT64 => {
                reader.take(2)?;
                FieldValue::Int64(reader.u64()?)
            }
            tag::FLOAT => {
                reader.take(2)?;
                FieldValue::Float(f64::from_bits(reader.u64()?))
            }
            tag::UTF8_STRING => {
                let raw = reader.sized()?;
                FieldValue::String(String::from_utf8_lossy(raw).into_owned())
            }
            tag::UCS2_STRING => {
                let raw = reader.sized()?;
                let units = raw.chunks_exact(2).map(|c| u16::from_be_bytes([c[0], c[1]]));
                let text = char::decode_utf16(units)
                    .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
                    .collect();
                FieldValue::String(text)
            }
            tag::BINARY => FieldValue::Binary(Bytes::copy_from_slice(reader.sized()?)),
            tag::INET_ADDR => {
                reader.take(2)?;
                let raw = reader.take(16)?;
                let family = reader.u8()?;
                let bits = reader.u8()?;
                let addr = if family == FAMILY_INET6 {
                    let mut octets = [0u8; 16];
                    octets.copy_from_slice(raw);
                    IpAddr::V6(Ipv6Addr::from(octets))
                } else {
                    IpAddr::V4(Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3]))
                };
                FieldValue::InetAddr(addr, bits)
            }
            other => {
                return Err(FrameError::UnknownFieldType {
                    type_tag: other,
                    offset: HEADER_SIZE + field_start,
                })
            }
        };

        reader.realign();
        fields.push(Field { id, value });
    }

    Ok(fields)
}

/// Stream framing for NXCP connections.
///
/// Decoding yields each complete raw frame (plain or an encryption envelope)
/// as an owned buffer. Encoding accepts either pre-encoded frames or messages.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
    compress: bool,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            compress: false,
        }
    }

    /// Enables body compression for messages passed to the encoder.
    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 4 {
            return Ok(None);
        }

        let declared = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if declared < HEADER_SIZE {
            return Err(FrameError::FrameTooSmall(declared).into());
        }
        if declared > self.max_frame_size {
            return Err(FrameError::FrameTooLarge {
                size: declared,
                limit: self.max_frame_size,
            }
            .into());
        }

        if src.len() < declared {
            src.reserve(declared - src.len());
            return Ok(None);
        }

        Ok(Some(src.split_to(declared)))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if frame.len() > self.max_frame_size {
            return Err(FrameError::FrameTooLarge {
                size: frame.len(),
                limit: self.max_frame_size,
            }
            .into());
        }
        dst.extend_from_slice(&frame);
        Ok(())
    }
}

impl Encoder<Message> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, msg: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let frame = encode_with(&msg, self.compress);
        Encoder::<Bytes>::encode(self, frame, dst)
    }
}
