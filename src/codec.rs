//! Big-endian wire encoding over a fixed buffer, and the matching cursor
//! decoder for record payloads. TLS frames everything as integers, registry
//! codepoints and length-prefixed vectors, so those are the only shapes here.

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Error, Result};

/// A registry codepoint with a fixed wire width (1 or 2 bytes).
pub trait Codepoint: Copy {
    const WIDTH: usize;

    fn code(self) -> u16;
    fn from_code(code: u16) -> Option<Self>;
}

/// Bounded writer. Every push fails with `BufferOverflow` once the underlying
/// buffer is exhausted; nothing is written past capacity.
pub struct Encoder<'a> {
    buf: &'a mut [u8],
    len: usize,
}

/// Position of a length prefix reserved by `begin_u16`/`begin_u24`, filled in
/// by the matching `end_*` call.
#[derive(Copy, Clone)]
pub struct Mark(usize);

impl<'a> Encoder<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Encoder { buf, len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn push(&mut self, bytes: &[u8]) -> Result<()> {
        if self.len + bytes.len() > self.buf.len() {
            return Err(Error::BufferOverflow);
        }
        self.buf[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
        Ok(())
    }

    pub fn push_u8(&mut self, v: u8) -> Result<()> {
        self.push(&[v])
    }

    pub fn push_u16(&mut self, v: u16) -> Result<()> {
        let mut b = [0; 2];
        BigEndian::write_u16(&mut b, v);
        self.push(&b)
    }

    pub fn push_u24(&mut self, v: u32) -> Result<()> {
        let mut b = [0; 3];
        BigEndian::write_u24(&mut b, v);
        self.push(&b)
    }

    pub fn push_enum<T: Codepoint>(&mut self, v: T) -> Result<()> {
        match T::WIDTH {
            1 => self.push_u8(v.code() as u8),
            _ => self.push_u16(v.code()),
        }
    }

    /// u16-length-prefixed vector of codepoints, in the given order.
    pub fn push_enum_list<T: Codepoint>(&mut self, items: &[T]) -> Result<()> {
        self.push_u16((items.len() * T::WIDTH) as u16)?;
        for item in items {
            self.push_enum(*item)?;
        }
        Ok(())
    }

    /// Reserves a u16 length prefix; `end_u16` backpatches it with the number
    /// of bytes pushed in between.
    pub fn begin_u16(&mut self) -> Result<Mark> {
        let mark = Mark(self.len);
        self.push_u16(0)?;
        Ok(mark)
    }

    pub fn end_u16(&mut self, mark: Mark) {
        let payload = self.len - mark.0 - 2;
        BigEndian::write_u16(&mut self.buf[mark.0..mark.0 + 2], payload as u16);
    }

    pub fn begin_u24(&mut self) -> Result<Mark> {
        let mark = Mark(self.len);
        self.push_u24(0)?;
        Ok(mark)
    }

    pub fn end_u24(&mut self, mark: Mark) {
        let payload = self.len - mark.0 - 3;
        BigEndian::write_u24(&mut self.buf[mark.0..mark.0 + 3], payload as u32);
    }

    pub fn push_opaque8(&mut self, bytes: &[u8]) -> Result<()> {
        self.push_u8(bytes.len() as u8)?;
        self.push(bytes)
    }

    pub fn push_opaque16(&mut self, bytes: &[u8]) -> Result<()> {
        self.push_u16(bytes.len() as u16)?;
        self.push(bytes)
    }

    pub fn push_opaque24(&mut self, bytes: &[u8]) -> Result<()> {
        self.push_u24(bytes.len() as u32)?;
        self.push(bytes)
    }

    /// A complete extension: codepoint plus u16-length-prefixed body.
    pub fn extension(&mut self, ext_type: u16, body: &[u8]) -> Result<()> {
        self.push_u16(ext_type)?;
        self.push_opaque16(body)
    }

    /// One KeyShareEntry: group codepoint plus length-prefixed public share.
    pub fn key_share_entry<G: Codepoint>(&mut self, group: G, public: &[u8]) -> Result<()> {
        self.push_enum(group)?;
        self.push_opaque16(public)
    }

    /// server_name extension body: a one-entry list with name type host_name.
    pub fn sni_host(&mut self, host: &str) -> Result<()> {
        let mark = self.begin_u16()?;
        self.push_u8(0)?; // host_name
        self.push_opaque16(host.as_bytes())?;
        self.end_u16(mark);
        Ok(())
    }
}

/// Cursor over a record payload. All reads fail with `DecodeError` when the
/// payload is shorter than the structure claims.
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Decoder { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::DecodeError);
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn array<const N: usize>(&mut self) -> Result<&'a [u8; N]> {
        let b = self.bytes(N)?;
        // length is checked above
        Ok(b.try_into().map_err(|_| Error::DecodeError)?)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        Ok(BigEndian::read_u16(self.bytes(2)?))
    }

    pub fn u24(&mut self) -> Result<u32> {
        Ok(BigEndian::read_u24(self.bytes(3)?))
    }

    /// Decodes a codepoint; an unknown value is a `DecodeError` since the
    /// caller asked for a typed field.
    pub fn decode_enum<T: Codepoint>(&mut self) -> Result<T> {
        let code = match T::WIDTH {
            1 => self.u8()? as u16,
            _ => self.u16()?,
        };
        T::from_code(code).ok_or(Error::DecodeError)
    }

    pub fn opaque8(&mut self) -> Result<&'a [u8]> {
        let n = self.u8()? as usize;
        self.bytes(n)
    }

    pub fn opaque16(&mut self) -> Result<&'a [u8]> {
        let n = self.u16()? as usize;
        self.bytes(n)
    }

    pub fn opaque24(&mut self) -> Result<&'a [u8]> {
        let n = self.u24()? as usize;
        self.bytes(n)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.bytes(n).map(|_| ())
    }

    pub fn expect_end(&self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::DecodeError)
        }
    }
}
