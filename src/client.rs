//! Post-handshake record stream plus the configuration consumed by
//! `connect`. The session owns the application cipher and both sequence
//! counters; the transport stays borrowed for the whole lifetime and is never
//! opened or closed here.

use std::io::{Read, Write};
use std::ops::Range;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, trace};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::alert::{self, AlertDescription, AlertLevel};
use crate::cert::CertificatePolicy;
use crate::cipher::{Cipher, CipherSuite, DEFAULT_CIPHER_SUITES};
use crate::error::{Error, Result};
use crate::handshake::{self, Version, HS_KEY_UPDATE, HS_NEW_SESSION_TICKET};
use crate::record::{
    ContentType, FragmentBuffer, RecordReader, LEGACY_VERSION_TLS12, MAX_CIPHERTEXT_LEN,
    MAX_PLAINTEXT_LEN, RECORD_HEADER_LEN,
};

/// Negotiated parameters, populated on handshake success when a sink is
/// configured. Zero stands for "none": no group for RSA key transport, no
/// scheme when no signature was consumed.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
pub struct NegotiatedStats {
    pub version: u16,
    pub cipher_suite: u16,
    pub named_group: u16,
    pub signature_scheme: u16,
}

fn system_random(buf: &mut [u8]) {
    OsRng.fill_bytes(buf);
}

fn system_now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Handshake configuration. The random and clock sources are plain function
/// pointers so tests can pin both.
pub struct ClientConfig<'a, P: CertificatePolicy> {
    /// Server name, used for SNI and hostname verification.
    pub host: &'a str,
    /// Offer list, in preference order. Must not be empty.
    pub cipher_suites: &'a [CipherSuite],
    /// Drops the post-quantum hybrid group from the offer.
    pub disable_hybrid_kex: bool,
    /// X.509 parsing and trust decisions. A policy without anchors opts into
    /// an unverified chain: hostname and intra-chain signatures are still
    /// checked, trust is not established.
    pub policy: &'a P,
    pub stats: Option<&'a mut NegotiatedStats>,
    pub fill_random: fn(&mut [u8]),
    pub now_unix: fn() -> u64,
}

impl<'a, P: CertificatePolicy> ClientConfig<'a, P> {
    pub fn new(host: &'a str, policy: &'a P) -> Self {
        ClientConfig {
            host,
            cipher_suites: DEFAULT_CIPHER_SUITES,
            disable_hybrid_kex: false,
            policy,
            stats: None,
            fill_random: system_random,
            now_unix: system_now_unix,
        }
    }
}

/// Runs the handshake over `stream` and returns the protected session.
pub fn connect<'s, S, P>(stream: &'s mut S, mut config: ClientConfig<'_, P>) -> Result<Client<'s, S>>
where
    S: Read + Write,
    P: CertificatePolicy,
{
    let mut reader = RecordReader::new();
    let established = handshake::run(stream, &mut reader, &mut config)?;
    Ok(Client {
        stream,
        reader,
        cipher: established.cipher,
        version: established.version,
        client_seq: established.client_seq,
        server_seq: established.server_seq,
        write_buf: Vec::with_capacity(RECORD_HEADER_LEN + MAX_CIPHERTEXT_LEN),
        sent_close: false,
        received_close: false,
    })
}

/// An established session. `read` decrypts in place and hands out a slice
/// into the record buffer, valid until the next call.
pub struct Client<'s, S> {
    stream: &'s mut S,
    reader: RecordReader,
    cipher: Cipher,
    version: Version,
    client_seq: u64,
    server_seq: u64,
    write_buf: Vec<u8>,
    sent_close: bool,
    received_close: bool,
}

enum Step {
    Data(Range<usize>),
    Close,
    PostHandshake(Vec<u8>),
    Skip,
}

impl<'s, S: Read + Write> Client<'s, S> {
    /// Protocol version negotiated for this session (wire value).
    pub fn version(&self) -> u16 {
        self.version.wire()
    }

    /// Encrypts and sends `data`, fragmenting into maximum-size records.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        for chunk in data.chunks(MAX_PLAINTEXT_LEN) {
            self.cipher.encrypt(
                &mut self.write_buf,
                self.client_seq,
                ContentType::ApplicationData,
                chunk,
            )?;
            self.client_seq += 1;
            self.stream.write_all(&self.write_buf)?;
        }
        Ok(())
    }

    /// Returns the next application record, or `None` once the server closed
    /// the connection. Session tickets are skipped and key updates are
    /// answered without surfacing either to the caller.
    pub fn read(&mut self) -> Result<Option<&[u8]>> {
        loop {
            match self.step()? {
                Step::Data(range) => return Ok(Some(self.reader.window(range))),
                Step::Close => return Ok(None),
                Step::PostHandshake(data) => self.process_post_handshake(&data)?,
                Step::Skip => continue,
            }
        }
    }

    fn step(&mut self) -> Result<Step> {
        if self.received_close {
            return Ok(Step::Close);
        }
        let record = match self.reader.next(self.stream)? {
            Some(r) => r,
            None => {
                debug!("transport closed without close_notify");
                self.received_close = true;
                return Ok(Step::Close);
            }
        };
        if record.version != LEGACY_VERSION_TLS12 {
            return Err(Error::BadVersion);
        }

        let (content_type, range) = match (self.version, record.content_type) {
            // TLS 1.3 protects everything inside application_data records
            (Version::Tls13, ContentType::ApplicationData) => {
                let out = self
                    .cipher
                    .decrypt(self.server_seq, &record.header, record.payload)?;
                self.server_seq += 1;
                out
            }
            // a peer may still send a cleartext alert
            (Version::Tls13, ContentType::Alert) => {
                (ContentType::Alert, 0..record.payload.len())
            }
            (Version::Tls13, _) => return Err(Error::UnexpectedMessage),
            (Version::Tls12, ContentType::ChangeCipherSpec) => {
                return Err(Error::UnexpectedMessage)
            }
            (Version::Tls12, _) => {
                let out = self
                    .cipher
                    .decrypt(self.server_seq, &record.header, record.payload)?;
                self.server_seq += 1;
                out
            }
        };

        let plaintext = &record.payload[range.clone()];
        match content_type {
            ContentType::ApplicationData => {
                if plaintext.is_empty() {
                    return Ok(Step::Skip);
                }
                trace!("application record, {} bytes", plaintext.len());
                let offset = record.payload_offset;
                Ok(Step::Data(offset + range.start..offset + range.end))
            }
            ContentType::Alert => {
                let (_, description) = alert::parse(plaintext)?;
                if description == AlertDescription::CloseNotify {
                    debug!("close_notify received");
                    self.received_close = true;
                    Ok(Step::Close)
                } else {
                    Err(Error::AlertReceived(description))
                }
            }
            ContentType::Handshake => {
                if self.version == Version::Tls12 {
                    return Err(Error::UnexpectedMessage);
                }
                Ok(Step::PostHandshake(plaintext.to_vec()))
            }
            ContentType::ChangeCipherSpec => Err(Error::UnexpectedMessage),
        }
    }

    /// TLS 1.3 post-handshake traffic: session tickets are tolerated and
    /// dropped, key updates ratchet the receive keys and answer a request.
    fn process_post_handshake(&mut self, data: &[u8]) -> Result<()> {
        let mut frags = FragmentBuffer::new();
        frags.push(data)?;
        let mut updates = Vec::new();
        while let Some(msg) = frags.next_message()? {
            match msg.msg_type {
                HS_NEW_SESSION_TICKET => {
                    debug!("ignoring new_session_ticket ({} bytes)", msg.body.len());
                }
                HS_KEY_UPDATE => {
                    if msg.body.len() != 1 || msg.body[0] > 1 {
                        return Err(Error::DecodeError);
                    }
                    updates.push(msg.body[0] == 1);
                }
                _ => return Err(Error::UnexpectedMessage),
            }
        }
        if frags.has_partial() {
            return Err(Error::UnsupportedFragmentedHandshakeMessage);
        }
        for update_requested in updates {
            debug!("key_update received (request {})", update_requested);
            self.cipher.update_server_key()?;
            self.server_seq = 0;
            if update_requested {
                // our acknowledging key_update goes out under the old key,
                // then the send direction ratchets
                let msg = [HS_KEY_UPDATE, 0, 0, 1, 0];
                self.cipher.encrypt(
                    &mut self.write_buf,
                    self.client_seq,
                    ContentType::Handshake,
                    &msg,
                )?;
                self.stream.write_all(&self.write_buf)?;
                self.cipher.update_client_key()?;
                self.client_seq = 0;
            }
        }
        Ok(())
    }

    /// Sends an encrypted close_notify. The transport itself stays open; the
    /// caller owns it.
    pub fn close(&mut self) -> Result<()> {
        if self.sent_close {
            return Ok(());
        }
        let payload = [
            AlertLevel::Warning as u8,
            AlertDescription::CloseNotify.code(),
        ];
        self.cipher.encrypt(
            &mut self.write_buf,
            self.client_seq,
            ContentType::Alert,
            &payload,
        )?;
        self.client_seq += 1;
        self.stream.write_all(&self.write_buf)?;
        self.sent_close = true;
        debug!("close_notify sent");
        Ok(())
    }
}
