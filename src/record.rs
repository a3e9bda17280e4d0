//! Record framing: reads `header(5) || payload` frames out of the transport
//! into a fixed buffer, and reassembles handshake messages that span records.

use std::io;

use byteorder::{BigEndian, ByteOrder};
use log::trace;

use crate::codec::Codepoint;
use crate::error::{Error, Result};

pub const RECORD_HEADER_LEN: usize = 5;
/// Largest protected payload: 2^14 plaintext plus AEAD/CBC expansion.
pub const MAX_CIPHERTEXT_LEN: usize = 16384 + 256;
pub const MAX_PLAINTEXT_LEN: usize = 16384;

const READ_BUF_LEN: usize = RECORD_HEADER_LEN + MAX_CIPHERTEXT_LEN;

/// Upper bound on a reassembled handshake message (certificate chains are the
/// only multi-record messages seen in practice).
const MAX_HANDSHAKE_LEN: usize = 128 * 1024;

pub const LEGACY_VERSION_TLS10: u16 = 0x0301;
pub const LEGACY_VERSION_TLS12: u16 = 0x0303;

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ContentType {
    ChangeCipherSpec = 20,
    Alert = 21,
    Handshake = 22,
    ApplicationData = 23,
}

impl Codepoint for ContentType {
    const WIDTH: usize = 1;

    fn code(self) -> u16 {
        self as u16
    }

    fn from_code(code: u16) -> Option<Self> {
        match code {
            20 => Some(ContentType::ChangeCipherSpec),
            21 => Some(ContentType::Alert),
            22 => Some(ContentType::Handshake),
            23 => Some(ContentType::ApplicationData),
            _ => None,
        }
    }
}

/// One framed record, borrowed from the reader's buffer. `payload` is mutable
/// so ciphers can decrypt it in place; `payload_offset` locates it inside the
/// reader for callers that hand out plaintext slices later.
pub struct Record<'a> {
    pub content_type: ContentType,
    pub version: u16,
    pub header: [u8; RECORD_HEADER_LEN],
    pub payload: &'a mut [u8],
    pub payload_offset: usize,
}

/// Buffered record reader over a borrowed byte stream. Partial trailing bytes
/// are compacted to the buffer head before further reads, mirroring how the
/// buffer in a brontide machine is reused between messages.
pub struct RecordReader {
    buf: [u8; READ_BUF_LEN],
    start: usize,
    end: usize,
}

impl RecordReader {
    pub fn new() -> Self {
        RecordReader {
            buf: [0; READ_BUF_LEN],
            start: 0,
            end: 0,
        }
    }

    /// Returns the next complete record, or `None` when the transport reports
    /// end-of-stream exactly on a record boundary. EOF inside a record is an
    /// `EndOfStream` error.
    pub fn next<'a, S: io::Read>(&'a mut self, stream: &mut S) -> Result<Option<Record<'a>>> {
        loop {
            let buffered = self.end - self.start;
            if buffered >= RECORD_HEADER_LEN {
                let declared =
                    BigEndian::read_u16(&self.buf[self.start + 3..self.start + 5]) as usize;
                if declared > MAX_CIPHERTEXT_LEN {
                    return Err(Error::RecordOverflow);
                }
                if buffered >= RECORD_HEADER_LEN + declared {
                    return Ok(Some(self.take(declared)?));
                }
            }

            // need more bytes; make room at the tail first
            if self.end == READ_BUF_LEN {
                self.buf.copy_within(self.start..self.end, 0);
                self.end -= self.start;
                self.start = 0;
            }
            let n = stream.read(&mut self.buf[self.end..])?;
            if n == 0 {
                if buffered == 0 {
                    return Ok(None);
                }
                return Err(Error::EndOfStream);
            }
            self.end += n;
        }
    }

    fn take(&mut self, payload_len: usize) -> Result<Record<'_>> {
        let rec = self.start;
        self.start += RECORD_HEADER_LEN + payload_len;
        if self.start == self.end {
            // indices reset only; the record bytes stay put for this borrow
            self.start = 0;
            self.end = 0;
        }
        let rec_slice = &mut self.buf[rec..rec + RECORD_HEADER_LEN + payload_len];
        Self::view(rec_slice, rec)
    }

    fn view(rec_slice: &mut [u8], offset: usize) -> Result<Record<'_>> {
        let mut header = [0; RECORD_HEADER_LEN];
        header.copy_from_slice(&rec_slice[..RECORD_HEADER_LEN]);
        let content_type =
            ContentType::from_code(header[0] as u16).ok_or(Error::UnexpectedMessage)?;
        let version = BigEndian::read_u16(&header[1..3]);
        trace!(
            "record in: type {:?} version {:#06x} len {}",
            content_type,
            version,
            rec_slice.len() - RECORD_HEADER_LEN
        );
        Ok(Record {
            content_type,
            version,
            header,
            payload: &mut rec_slice[RECORD_HEADER_LEN..],
            payload_offset: offset + RECORD_HEADER_LEN,
        })
    }

    /// Re-borrows a plaintext window produced by an earlier in-place decrypt.
    pub(crate) fn window(&self, range: std::ops::Range<usize>) -> &[u8] {
        &self.buf[range]
    }
}

/// A handshake message reassembled by [`FragmentBuffer`]. `raw` covers the
/// four-byte header too, which is what transcripts consume.
pub struct HandshakeMessage<'a> {
    pub msg_type: u8,
    pub body: &'a [u8],
    pub raw: &'a [u8],
}

/// Accumulates decrypted record payloads and yields complete handshake
/// messages; a message whose header promises more bytes than are buffered
/// stays pending until the caller appends another record.
pub struct FragmentBuffer {
    buf: Vec<u8>,
    start: usize,
}

impl FragmentBuffer {
    pub fn new() -> Self {
        FragmentBuffer {
            buf: Vec::new(),
            start: 0,
        }
    }

    pub fn push(&mut self, payload: &[u8]) -> Result<()> {
        if self.buf.len() - self.start + payload.len() > MAX_HANDSHAKE_LEN {
            return Err(Error::BufferOverflow);
        }
        if self.start == self.buf.len() {
            self.buf.clear();
            self.start = 0;
        }
        self.buf.extend_from_slice(payload);
        Ok(())
    }

    /// Bytes buffered but not yet forming a complete message.
    pub fn has_partial(&self) -> bool {
        self.start < self.buf.len()
    }

    pub fn next_message(&mut self) -> Result<Option<HandshakeMessage<'_>>> {
        let pending = &self.buf[self.start..];
        if pending.len() < 4 {
            return Ok(None);
        }
        let body_len = BigEndian::read_u24(&pending[1..4]) as usize;
        if body_len > MAX_HANDSHAKE_LEN {
            return Err(Error::BufferOverflow);
        }
        if pending.len() < 4 + body_len {
            return Ok(None);
        }
        let raw = &self.buf[self.start..self.start + 4 + body_len];
        self.start += 4 + body_len;
        Ok(Some(HandshakeMessage {
            msg_type: raw[0],
            body: &raw[4..],
            raw,
        }))
    }
}

/// Writes a record header in front of `payload_len` payload bytes.
pub fn put_header(out: &mut Vec<u8>, content_type: ContentType, version: u16, payload_len: usize) {
    out.push(content_type as u8);
    let mut v = [0; 2];
    BigEndian::write_u16(&mut v, version);
    out.extend_from_slice(&v);
    let mut l = [0; 2];
    BigEndian::write_u16(&mut l, payload_len as u16);
    out.extend_from_slice(&l);
}
