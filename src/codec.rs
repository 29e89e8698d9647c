//! Versioned binary framing primitives.
//!
//! Every encoded record in this crate carries a `(struct_v, compat_v,
//! length)` preamble (spec §9). `struct_v` is the format version the writer
//! used; `compat_v` is the oldest reader version that can still make sense
//! of the body. A reader refuses a frame whose `compat_v` is newer than the
//! version it was built to understand. The `length` lets a reader skip a
//! frame it doesn't support (or the unused tail of a frame it only partially
//! understands) without tracking every field by hand.
//!
//! This mirrors the magic/version-header idiom used by on-disk session
//! formats elsewhere in the ecosystem, scaled down to the two fields the
//! spec actually needs (no magic bytes — the object name already
//! disambiguates the payload).

use byteorder::{ReadBytesExt, WriteBytesExt, LE};

use crate::error::DecodeError;

/// Appends little-endian primitives and length-prefixed blobs to a `Vec<u8>`.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_u32(&mut self, v: u32) {
        // WriteBytesExt::write_u32 never fails on a Vec<u8>.
        self.buf.write_u32::<LE>(v).expect("vec write is infallible");
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.write_u64::<LE>(v).expect("vec write is infallible");
    }

    pub fn put_bytes_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// `u32` length followed by raw bytes.
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.put_u32(bytes.len() as u32);
        self.put_bytes_raw(bytes);
    }

    /// `u32` length followed by UTF-8 bytes.
    pub fn put_str(&mut self, s: &str) {
        self.put_bytes(s.as_bytes());
    }

    /// Writes a `(struct_v, compat_v, len)` preamble, runs `body`, then
    /// backpatches `len` with the body's actual size.
    pub fn encode_frame(&mut self, struct_v: u8, compat_v: u8, body: impl FnOnce(&mut Encoder)) {
        self.put_u8(struct_v);
        self.put_u8(compat_v);
        let len_pos = self.buf.len();
        self.put_u32(0);
        let start = self.buf.len();
        body(self);
        let written = (self.buf.len() - start) as u32;
        self.buf[len_pos..len_pos + 4].copy_from_slice(&written.to_le_bytes());
    }
}

/// A versioned frame's header, as read off the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub struct_v: u8,
    pub compat_v: u8,
    pub len: u32,
}

/// A cursor over an immutable byte slice with versioned-frame decoding.
#[derive(Debug, Clone, Copy)]
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn need(&self, n: usize) -> Result<(), DecodeError> {
        if self.remaining() < n {
            Err(DecodeError::UnexpectedEof {
                wanted: n,
                remaining: self.remaining(),
            })
        } else {
            Ok(())
        }
    }

    pub fn get_u8(&mut self) -> Result<u8, DecodeError> {
        self.need(1)?;
        let v = self.buf[self.pos];
        self.pos += 1;
        Ok(v)
    }

    pub fn get_u32(&mut self) -> Result<u32, DecodeError> {
        self.need(4)?;
        let mut slice = &self.buf[self.pos..self.pos + 4];
        let v = slice
            .read_u32::<LE>()
            .map_err(|_| DecodeError::UnexpectedEof {
                wanted: 4,
                remaining: self.remaining(),
            })?;
        self.pos += 4;
        Ok(v)
    }

    pub fn get_u64(&mut self) -> Result<u64, DecodeError> {
        self.need(8)?;
        let mut slice = &self.buf[self.pos..self.pos + 8];
        let v = slice
            .read_u64::<LE>()
            .map_err(|_| DecodeError::UnexpectedEof {
                wanted: 8,
                remaining: self.remaining(),
            })?;
        self.pos += 8;
        Ok(v)
    }

    /// Reads `n` raw bytes without interpreting them.
    pub fn get_bytes_raw(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        self.need(n)?;
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Reads a `u32` length followed by that many raw bytes.
    pub fn get_bytes(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.get_u32()? as usize;
        self.get_bytes_raw(len)
    }

    /// Reads a `u32`-length-prefixed UTF-8 string.
    pub fn get_str(&mut self) -> Result<String, DecodeError> {
        let bytes = self.get_bytes()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| DecodeError::MalformedValue(format!("invalid utf-8: {e}")))
    }

    /// Peeks the next `u64` without consuming it. Used by legacy-format
    /// sniffing, which must inspect the first word before deciding which
    /// decode path to commit to.
    pub fn peek_u64(&self) -> Result<u64, DecodeError> {
        let mut probe = *self;
        probe.get_u64()
    }

    /// Reads a `(struct_v, compat_v, len)` preamble and returns a bounded
    /// sub-decoder over exactly `len` bytes of body, advancing `self` past
    /// the whole frame (header + body) regardless of how much of the body
    /// the caller actually consumes.
    ///
    /// `compat_v_supported` is the oldest `struct_v` this decoder knows how
    /// to read; the frame is rejected if its own `compat_v` claims a reader
    /// needs to be newer than that.
    pub fn decode_frame(
        &mut self,
        compat_v_supported: u8,
    ) -> Result<(FrameHeader, Decoder<'a>), DecodeError> {
        let struct_v = self.get_u8()?;
        let compat_v = self.get_u8()?;
        let len = self.get_u32()?;
        if compat_v > compat_v_supported {
            return Err(DecodeError::UnsupportedVersion { struct_v, compat_v });
        }
        let body = self.get_bytes_raw(len as usize)?;
        Ok((
            FrameHeader {
                struct_v,
                compat_v,
                len,
            },
            Decoder::new(body),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trips_fields() {
        let mut enc = Encoder::new();
        enc.encode_frame(1, 1, |e| {
            e.put_u64(42);
            e.put_str("client.4567");
        });
        let bytes = enc.into_vec();

        let mut dec = Decoder::new(&bytes);
        let (header, mut body) = dec.decode_frame(1).expect("frame decodes");
        assert_eq!(header.struct_v, 1);
        assert_eq!(header.compat_v, 1);
        assert_eq!(body.get_u64().unwrap(), 42);
        assert_eq!(body.get_str().unwrap(), "client.4567");
        assert!(dec.is_empty());
    }

    #[test]
    fn frame_rejects_newer_compat_v() {
        let mut enc = Encoder::new();
        enc.encode_frame(3, 3, |e| e.put_u64(1));
        let bytes = enc.into_vec();
        let mut dec = Decoder::new(&bytes);
        let err = dec.decode_frame(1).unwrap_err();
        assert_eq!(
            err,
            DecodeError::UnsupportedVersion {
                struct_v: 3,
                compat_v: 3
            }
        );
    }

    #[test]
    fn truncated_buffer_is_unexpected_eof() {
        let mut dec = Decoder::new(&[1, 2, 3]);
        assert!(dec.get_u64().is_err());
    }

    #[test]
    fn peek_u64_does_not_advance() {
        let mut enc = Encoder::new();
        enc.put_u64(u64::MAX);
        enc.put_u64(7);
        let bytes = enc.into_vec();
        let dec = Decoder::new(&bytes);
        assert_eq!(dec.peek_u64().unwrap(), u64::MAX);
        let mut dec2 = dec;
        assert_eq!(dec2.get_u64().unwrap(), u64::MAX);
        assert_eq!(dec2.get_u64().unwrap(), 7);
    }
}
