//! The client handshake state machine. One linear pass per connection: emit
//! ClientHello, parse the server flight, authenticate the peer, derive record
//! protection, exchange Finished. The TLS 1.2 and 1.3 paths share everything
//! through ServerHello and diverge after it.

#[cfg(test)]
mod test_flight;

use std::io;

use hex_literal::hex;
use log::debug;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::alert;
use crate::cert::{validate_chain, CertificatePolicy, PublicKeyMaterial};
use crate::cipher::{Cipher, CipherSuite, KeyExchange};
use crate::client::ClientConfig;
use crate::codec::{Codepoint, Decoder, Encoder};
use crate::error::{Error, Result};
use crate::keyshare::{KeyShares, NamedGroup, RsaPreMaster, MAX_SERVER_SHARE_LEN};
use crate::record::{
    put_header, ContentType, FragmentBuffer, RecordReader, LEGACY_VERSION_TLS10,
    LEGACY_VERSION_TLS12, RECORD_HEADER_LEN,
};
use crate::transcript::{
    finished_verify, key_material, master_secret, Transcript, CLIENT_FINISHED_LABEL,
    SERVER_FINISHED_LABEL, VERIFY_DATA_LEN,
};
use crate::verify::{self, SignatureScheme, OFFERED_SIGNATURE_SCHEMES};

pub(crate) const HS_CLIENT_HELLO: u8 = 1;
pub(crate) const HS_SERVER_HELLO: u8 = 2;
pub(crate) const HS_NEW_SESSION_TICKET: u8 = 4;
pub(crate) const HS_ENCRYPTED_EXTENSIONS: u8 = 8;
pub(crate) const HS_CERTIFICATE: u8 = 11;
pub(crate) const HS_SERVER_KEY_EXCHANGE: u8 = 12;
pub(crate) const HS_SERVER_HELLO_DONE: u8 = 14;
pub(crate) const HS_CERTIFICATE_VERIFY: u8 = 15;
pub(crate) const HS_CLIENT_KEY_EXCHANGE: u8 = 16;
pub(crate) const HS_FINISHED: u8 = 20;
pub(crate) const HS_KEY_UPDATE: u8 = 24;

pub(crate) const EXT_SERVER_NAME: u16 = 0;
pub(crate) const EXT_SUPPORTED_GROUPS: u16 = 10;
pub(crate) const EXT_EC_POINT_FORMATS: u16 = 11;
pub(crate) const EXT_SIGNATURE_ALGORITHMS: u16 = 13;
pub(crate) const EXT_SCT: u16 = 18;
pub(crate) const EXT_SUPPORTED_VERSIONS: u16 = 43;
pub(crate) const EXT_KEY_SHARE: u16 = 51;
pub(crate) const EXT_RENEGOTIATION_INFO: u16 = 0xff01;

pub(crate) const VERSION_TLS12: u16 = 0x0303;
pub(crate) const VERSION_TLS13: u16 = 0x0304;

/// ServerHello.random sentinel marking a HelloRetryRequest.
const HELLO_RETRY_SENTINEL: [u8; 32] =
    hex!("cf21ad74e59a6111be1d8c021e65b891c2a211167abb8c5e079e09e2c8a8339c");

const CLIENT_HELLO_CAPACITY: usize = 4096;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Version {
    Tls12,
    Tls13,
}

impl Version {
    pub fn wire(self) -> u16 {
        match self {
            Version::Tls12 => VERSION_TLS12,
            Version::Tls13 => VERSION_TLS13,
        }
    }
}

/// What the handshake hands to the session on success.
pub(crate) struct Established {
    pub cipher: Cipher,
    pub client_seq: u64,
    pub server_seq: u64,
    pub version: Version,
}

/// A received handshake message, detached from the record buffers.
struct RawMsg {
    typ: u8,
    raw: Vec<u8>,
}

impl RawMsg {
    fn body(&self) -> &[u8] {
        &self.raw[4..]
    }
}

pub(crate) fn run<S, P>(
    stream: &mut S,
    reader: &mut RecordReader,
    config: &mut ClientConfig<'_, P>,
) -> Result<Established>
where
    S: io::Read + io::Write,
    P: CertificatePolicy,
{
    Handshake::new(stream, reader, config)?.run()
}

struct Handshake<'a, 'c, S, P: CertificatePolicy> {
    stream: &'a mut S,
    reader: &'a mut RecordReader,
    config: &'a mut ClientConfig<'c, P>,

    transcript: Transcript,
    frags: FragmentBuffer,
    buf: Vec<u8>,

    client_random: [u8; 32],
    server_random: [u8; 32],
    shares: KeyShares,
    rsa_random: [u8; 46],

    offer_12: bool,
    offer_13: bool,
    groups: Vec<NamedGroup>,

    suite: Option<CipherSuite>,
    version: Version,
    group: Option<NamedGroup>,
    server_share: Vec<u8>,
    scheme: Option<SignatureScheme>,
}

impl<'a, 'c, S, P> Handshake<'a, 'c, S, P>
where
    S: io::Read + io::Write,
    P: CertificatePolicy,
{
    fn new(
        stream: &'a mut S,
        reader: &'a mut RecordReader,
        config: &'a mut ClientConfig<'c, P>,
    ) -> Result<Self> {
        if config.cipher_suites.is_empty() {
            return Err(Error::IllegalParameter);
        }
        let offer_13 = config.cipher_suites.iter().any(|s| s.is_tls13());
        let offer_12 = config.cipher_suites.iter().any(|s| !s.is_tls13());

        // one draw covers everything the handshake ever needs from the
        // random source: client_random, the keypair seed, the RSA pre-master
        let mut rnd = [0u8; 142];
        (config.fill_random)(&mut rnd);
        let mut client_random = [0u8; 32];
        client_random.copy_from_slice(&rnd[..32]);
        let mut seed = [0u8; 64];
        seed.copy_from_slice(&rnd[32..96]);
        let mut rsa_random = [0u8; 46];
        rsa_random.copy_from_slice(&rnd[96..142]);
        rnd.zeroize();

        let shares = KeyShares::generate(&seed)?;
        seed.zeroize();

        let mut groups = vec![
            NamedGroup::X25519,
            NamedGroup::Secp256r1,
            NamedGroup::Secp384r1,
        ];
        if !config.disable_hybrid_kex {
            groups.push(NamedGroup::X25519Kyber768);
        }

        Ok(Handshake {
            stream,
            reader,
            config,
            transcript: Transcript::new(),
            frags: FragmentBuffer::new(),
            buf: Vec::with_capacity(CLIENT_HELLO_CAPACITY),
            client_random,
            server_random: [0; 32],
            shares,
            rsa_random,
            offer_12,
            offer_13,
            groups,
            suite: None,
            version: Version::Tls12,
            group: None,
            server_share: Vec::new(),
            scheme: None,
        })
    }

    fn run(mut self) -> Result<Established> {
        self.send_client_hello()?;
        self.recv_server_hello()?;

        let established = match self.version {
            Version::Tls12 => self.run_12()?,
            Version::Tls13 => self.run_13()?,
        };

        if let Some(stats) = self.config.stats.as_deref_mut() {
            stats.version = established.version.wire();
            stats.cipher_suite = self.suite.map(|s| s as u16).unwrap_or(0);
            stats.named_group = self.group.map(|g| g as u16).unwrap_or(0);
            stats.signature_scheme = self.scheme.map(|s| s as u16).unwrap_or(0);
        }
        debug!(
            "handshake complete: {:?} with {:?}",
            established.version, self.suite
        );
        Ok(established)
    }

    // -- ClientHello ------------------------------------------------------

    fn send_client_hello(&mut self) -> Result<()> {
        self.buf.clear();
        self.buf.resize(CLIENT_HELLO_CAPACITY, 0);
        let mut enc = Encoder::new(&mut self.buf);

        enc.push_u8(ContentType::Handshake as u8)?;
        // the first record still advertises the lowest legacy version
        enc.push_u16(LEGACY_VERSION_TLS10)?;
        let record = enc.begin_u16()?;

        enc.push_u8(HS_CLIENT_HELLO)?;
        let message = enc.begin_u24()?;
        enc.push_u16(VERSION_TLS12)?;
        enc.push(&self.client_random)?;
        enc.push_u8(0)?; // legacy session id, empty
        enc.push_enum_list(self.config.cipher_suites)?;
        enc.push(&[1, 0])?; // null compression only

        let extensions = enc.begin_u16()?;

        enc.push_u16(EXT_SUPPORTED_VERSIONS)?;
        let ext = enc.begin_u16()?;
        let count = (self.offer_13 as u8 + self.offer_12 as u8) * 2;
        enc.push_u8(count)?;
        if self.offer_13 {
            enc.push_u16(VERSION_TLS13)?;
        }
        if self.offer_12 {
            enc.push_u16(VERSION_TLS12)?;
        }
        enc.end_u16(ext);

        enc.extension(EXT_EC_POINT_FORMATS, &[1, 0])?; // uncompressed
        enc.extension(EXT_RENEGOTIATION_INFO, &[0])?;
        enc.extension(EXT_SCT, &[])?;

        enc.push_u16(EXT_SIGNATURE_ALGORITHMS)?;
        let ext = enc.begin_u16()?;
        enc.push_enum_list(OFFERED_SIGNATURE_SCHEMES)?;
        enc.end_u16(ext);

        enc.push_u16(EXT_SUPPORTED_GROUPS)?;
        let ext = enc.begin_u16()?;
        enc.push_enum_list(&self.groups)?;
        enc.end_u16(ext);

        if self.offer_13 {
            enc.push_u16(EXT_KEY_SHARE)?;
            let ext = enc.begin_u16()?;
            let entries = enc.begin_u16()?;
            for group in &self.groups {
                enc.key_share_entry(*group, &self.shares.public_key(*group))?;
            }
            enc.end_u16(entries);
            enc.end_u16(ext);
        }

        enc.push_u16(EXT_SERVER_NAME)?;
        let ext = enc.begin_u16()?;
        enc.sni_host(self.config.host)?;
        enc.end_u16(ext);

        enc.end_u16(extensions);
        enc.end_u24(message);
        enc.end_u16(record);

        let len = enc.len();
        self.stream.write_all(&self.buf[..len])?;
        self.transcript.update(&self.buf[RECORD_HEADER_LEN..len]);
        debug!(
            "client hello sent for {} ({} suites, tls13 {})",
            self.config.host,
            self.config.cipher_suites.len(),
            self.offer_13,
        );
        Ok(())
    }

    // -- server flight plumbing -------------------------------------------

    /// Next handshake message from cleartext records. A message fragmented
    /// across cleartext records is not supported on the 1.2 path.
    fn next_plain(&mut self) -> Result<RawMsg> {
        loop {
            if let Some(msg) = self.frags.next_message()? {
                return Ok(RawMsg {
                    typ: msg.msg_type,
                    raw: msg.raw.to_vec(),
                });
            }
            if self.frags.has_partial() {
                return Err(Error::UnsupportedFragmentedHandshakeMessage);
            }
            let record = self
                .reader
                .next(self.stream)?
                .ok_or(Error::EndOfStream)?;
            if record.version != LEGACY_VERSION_TLS12 {
                return Err(Error::BadVersion);
            }
            match record.content_type {
                ContentType::Handshake => self.frags.push(record.payload)?,
                ContentType::Alert => return Err(alert::into_error(record.payload)),
                _ => return Err(Error::UnexpectedMessage),
            }
        }
    }

    /// Next handshake message from the protected server flight, fetching and
    /// decrypting further records whenever a message spans a record boundary.
    fn next_encrypted(&mut self, cipher: &Cipher, server_seq: &mut u64) -> Result<RawMsg> {
        loop {
            if let Some(msg) = self.frags.next_message()? {
                return Ok(RawMsg {
                    typ: msg.msg_type,
                    raw: msg.raw.to_vec(),
                });
            }
            let record = self
                .reader
                .next(self.stream)?
                .ok_or(Error::EndOfStream)?;
            if record.version != LEGACY_VERSION_TLS12 {
                return Err(Error::BadVersion);
            }
            match record.content_type {
                // middlebox-compatibility CCS, accepted and ignored
                ContentType::ChangeCipherSpec => continue,
                ContentType::ApplicationData => {
                    let (content_type, range) =
                        cipher.decrypt(*server_seq, &record.header, record.payload)?;
                    *server_seq += 1;
                    match content_type {
                        ContentType::Handshake => self.frags.push(&record.payload[range])?,
                        ContentType::Alert => {
                            return Err(alert::into_error(&record.payload[range]))
                        }
                        _ => return Err(Error::UnexpectedMessage),
                    }
                }
                ContentType::Alert => return Err(alert::into_error(record.payload)),
                _ => return Err(Error::UnexpectedMessage),
            }
        }
    }

    fn expect(&self, msg: &RawMsg, typ: u8) -> Result<()> {
        if msg.typ == typ {
            Ok(())
        } else {
            Err(Error::UnexpectedMessage)
        }
    }

    fn send_plain(&mut self, content_type: ContentType, payload: &[u8]) -> Result<()> {
        self.buf.clear();
        put_header(&mut self.buf, content_type, LEGACY_VERSION_TLS12, payload.len());
        self.buf.extend_from_slice(payload);
        self.stream.write_all(&self.buf)?;
        Ok(())
    }

    fn send_encrypted(
        &mut self,
        cipher: &Cipher,
        seq: u64,
        content_type: ContentType,
        payload: &[u8],
    ) -> Result<()> {
        let mut record = Vec::with_capacity(RECORD_HEADER_LEN + payload.len() + 64);
        cipher.encrypt(&mut record, seq, content_type, payload)?;
        self.stream.write_all(&record)?;
        Ok(())
    }

    // -- ServerHello ------------------------------------------------------

    fn recv_server_hello(&mut self) -> Result<()> {
        let msg = self.next_plain()?;
        self.expect(&msg, HS_SERVER_HELLO)?;
        self.parse_server_hello(msg.body())?;
        self.transcript.update(&msg.raw);

        let suite = match self.suite {
            Some(s) => s,
            None => return Err(Error::IllegalParameter),
        };
        self.transcript.select(suite.hash());
        debug!(
            "server hello: {:?}, version {:?}, group {:?}",
            suite, self.version, self.group
        );
        Ok(())
    }

    fn parse_server_hello(&mut self, body: &[u8]) -> Result<()> {
        let mut dec = Decoder::new(body);
        if dec.u16()? != VERSION_TLS12 {
            return Err(Error::BadVersion);
        }
        self.server_random = *dec.array::<32>()?;
        if self.server_random == HELLO_RETRY_SENTINEL {
            return Err(Error::ServerHelloRetryRequest);
        }
        // echoed legacy session id: accepted and ignored, no resumption
        let session_id = dec.opaque8()?;
        if session_id.len() > 32 {
            return Err(Error::DecodeError);
        }

        let suite_code = dec.u16()?;
        let suite = CipherSuite::from_code(suite_code).ok_or(Error::IllegalParameter)?;
        if !self.config.cipher_suites.contains(&suite) {
            return Err(Error::IllegalParameter);
        }
        self.suite = Some(suite);

        if dec.u8()? != 0 {
            return Err(Error::IllegalParameter);
        }

        if !dec.is_empty() {
            let mut exts = Decoder::new(dec.opaque16()?);
            while !exts.is_empty() {
                let ext_type = exts.u16()?;
                let ext_body = exts.opaque16()?;
                match ext_type {
                    EXT_SUPPORTED_VERSIONS => {
                        let mut d = Decoder::new(ext_body);
                        if d.u16()? != VERSION_TLS13 || !d.is_empty() || !self.offer_13 {
                            return Err(Error::BadVersion);
                        }
                        self.version = Version::Tls13;
                    }
                    EXT_KEY_SHARE => {
                        let mut d = Decoder::new(ext_body);
                        let group_code = d.u16()?;
                        let group =
                            NamedGroup::from_code(group_code).ok_or(Error::IllegalParameter)?;
                        if !self.groups.contains(&group) {
                            return Err(Error::IllegalParameter);
                        }
                        let share = d.opaque16()?;
                        if share.is_empty() || share.len() > MAX_SERVER_SHARE_LEN {
                            return Err(Error::IllegalParameter);
                        }
                        d.expect_end()?;
                        self.group = Some(group);
                        self.server_share = share.to_vec();
                    }
                    _ => {}
                }
            }
        }
        dec.expect_end()?;

        // the suite family must agree with the negotiated version
        if suite.is_tls13() != (self.version == Version::Tls13) {
            return Err(Error::IllegalParameter);
        }
        if self.version == Version::Tls12 && !self.offer_12 {
            return Err(Error::BadVersion);
        }
        Ok(())
    }

    // -- TLS 1.2 ----------------------------------------------------------

    fn run_12(&mut self) -> Result<Established> {
        let suite = self.suite.ok_or(Error::IllegalParameter)?;
        let algo = suite.hash();

        let msg = self.next_plain()?;
        self.expect(&msg, HS_CERTIFICATE)?;
        let server_key = self.process_certificate_12(&msg)?;
        self.transcript.update(&msg.raw);

        let mut server_pub = Vec::new();
        if suite.key_exchange() == KeyExchange::Ecdhe {
            let msg = self.next_plain()?;
            self.expect(&msg, HS_SERVER_KEY_EXCHANGE)?;
            server_pub = self.process_server_key_exchange(&msg, &server_key)?;
            self.transcript.update(&msg.raw);
        }

        let msg = self.next_plain()?;
        self.expect(&msg, HS_SERVER_HELLO_DONE)?;
        if !msg.body().is_empty() {
            return Err(Error::DecodeError);
        }
        self.transcript.update(&msg.raw);

        // client key exchange and the pre-master it commits to
        let mut pre_master;
        let mut cke_body = Vec::new();
        match suite.key_exchange() {
            KeyExchange::Ecdhe => {
                let group = self.group.ok_or(Error::IllegalParameter)?;
                pre_master = self.shares.shared_secret(group, &server_pub)?;
                let public = self.shares.public_key(group);
                cke_body.push(public.len() as u8);
                cke_body.extend_from_slice(&public);
            }
            KeyExchange::Rsa => {
                let (modulus, exponent) = match &server_key {
                    PublicKeyMaterial::Rsa { modulus, exponent } => (modulus, exponent),
                    _ => return Err(Error::BadSignatureScheme),
                };
                let pm = RsaPreMaster::new(&self.rsa_random);
                let wrapped = pm.encrypt(modulus, exponent, self.config.fill_random)?;
                pre_master = pm.secret().to_vec();
                cke_body.extend_from_slice(&(wrapped.len() as u16).to_be_bytes());
                cke_body.extend_from_slice(&wrapped);
            }
        }

        let mut cke = Vec::with_capacity(4 + cke_body.len());
        cke.push(HS_CLIENT_KEY_EXCHANGE);
        cke.extend_from_slice(&u24_bytes(cke_body.len()));
        cke.extend_from_slice(&cke_body);
        self.send_plain(ContentType::Handshake, &cke)?;
        self.transcript.update(&cke);

        let master = master_secret(algo, &pre_master, &self.client_random, &self.server_random);
        pre_master.zeroize();
        let material = key_material(
            algo,
            &master,
            &self.client_random,
            &self.server_random,
            suite.key_material_len(),
        );
        let cipher = Cipher::init_12(suite, &material, self.config.fill_random)?;

        self.send_plain(ContentType::ChangeCipherSpec, &[1])?;

        let verify_data = finished_verify(
            algo,
            &master,
            CLIENT_FINISHED_LABEL,
            &self.transcript.current(),
        );
        let mut finished = Vec::with_capacity(4 + VERIFY_DATA_LEN);
        finished.push(HS_FINISHED);
        finished.extend_from_slice(&u24_bytes(VERIFY_DATA_LEN));
        finished.extend_from_slice(&verify_data);
        self.transcript.update(&finished);
        self.send_encrypted(&cipher, 0, ContentType::Handshake, &finished)?;

        // server CCS, then its encrypted Finished under sequence zero
        let record = self
            .reader
            .next(self.stream)?
            .ok_or(Error::EndOfStream)?;
        match record.content_type {
            ContentType::ChangeCipherSpec => {}
            ContentType::Alert => return Err(alert::into_error(record.payload)),
            _ => return Err(Error::UnexpectedMessage),
        }

        let record = self
            .reader
            .next(self.stream)?
            .ok_or(Error::EndOfStream)?;
        if record.version != LEGACY_VERSION_TLS12 {
            return Err(Error::BadVersion);
        }
        if record.content_type == ContentType::Alert {
            return Err(alert::into_error(record.payload));
        }
        if record.content_type != ContentType::Handshake {
            return Err(Error::UnexpectedMessage);
        }
        let (content_type, range) = cipher.decrypt(0, &record.header, record.payload)?;
        if content_type != ContentType::Handshake {
            return Err(Error::UnexpectedMessage);
        }
        let plain = &record.payload[range];
        if plain.len() != 4 + VERIFY_DATA_LEN || plain[0] != HS_FINISHED {
            return Err(Error::UnexpectedMessage);
        }
        let expected = finished_verify(
            algo,
            &master,
            SERVER_FINISHED_LABEL,
            &self.transcript.current(),
        );
        if !bool::from(expected.ct_eq(&plain[4..])) {
            return Err(Error::DecryptError);
        }
        let server_finished = plain.to_vec();
        self.transcript.update(&server_finished);

        Ok(Established {
            cipher,
            client_seq: 1,
            server_seq: 1,
            version: Version::Tls12,
        })
    }

    fn process_certificate_12(&mut self, msg: &RawMsg) -> Result<PublicKeyMaterial> {
        let mut dec = Decoder::new(msg.body());
        let mut list = Decoder::new(dec.opaque24()?);
        dec.expect_end()?;
        let mut ders = Vec::new();
        while !list.is_empty() {
            ders.push(list.opaque24()?);
        }
        validate_chain(
            self.config.policy,
            self.config.host,
            (self.config.now_unix)(),
            &ders,
        )
    }

    fn process_server_key_exchange(
        &mut self,
        msg: &RawMsg,
        server_key: &PublicKeyMaterial,
    ) -> Result<Vec<u8>> {
        let mut dec = Decoder::new(msg.body());
        if dec.u8()? != 3 {
            // only named_curve is defined
            return Err(Error::IllegalParameter);
        }
        let group_code = dec.u16()?;
        let group = NamedGroup::from_code(group_code).ok_or(Error::IllegalParameter)?;
        if !self.groups.contains(&group) || group == NamedGroup::X25519Kyber768 {
            return Err(Error::IllegalParameter);
        }
        let server_pub = dec.opaque8()?;
        if server_pub.is_empty() {
            return Err(Error::IllegalParameter);
        }
        let scheme_code = dec.u16()?;
        let scheme = SignatureScheme::from_code(scheme_code)
            .ok_or(Error::UnknownSignatureScheme(scheme_code))?;
        let signature = dec.opaque16()?;
        dec.expect_end()?;

        // signed portion: both randoms then the named-curve parameters
        let mut signed = Vec::with_capacity(64 + 4 + 1 + server_pub.len());
        signed.extend_from_slice(&self.client_random);
        signed.extend_from_slice(&self.server_random);
        signed.push(3);
        signed.extend_from_slice(&group_code.to_be_bytes());
        signed.push(server_pub.len() as u8);
        signed.extend_from_slice(server_pub);

        verify::verify(scheme, server_key, &signed, signature)?;
        self.group = Some(group);
        self.scheme = Some(scheme);
        Ok(server_pub.to_vec())
    }

    // -- TLS 1.3 ----------------------------------------------------------

    fn run_13(&mut self) -> Result<Established> {
        let suite = self.suite.ok_or(Error::IllegalParameter)?;
        let group = self.group.ok_or(Error::IllegalParameter)?;
        if self.server_share.is_empty() {
            return Err(Error::IllegalParameter);
        }

        let mut shared = self.shares.shared_secret(group, &self.server_share)?;
        let hs_cipher = Cipher::init_13_handshake(suite, &shared, &self.transcript.current())?;
        shared.zeroize();
        let mut server_seq = 0u64;

        let msg = self.next_encrypted(&hs_cipher, &mut server_seq)?;
        self.expect(&msg, HS_ENCRYPTED_EXTENSIONS)?;
        let mut dec = Decoder::new(msg.body());
        dec.opaque16()?;
        dec.expect_end()?;
        self.transcript.update(&msg.raw);

        let msg = self.next_encrypted(&hs_cipher, &mut server_seq)?;
        self.expect(&msg, HS_CERTIFICATE)?;
        let server_key = self.process_certificate_13(&msg)?;
        self.transcript.update(&msg.raw);

        let msg = self.next_encrypted(&hs_cipher, &mut server_seq)?;
        self.expect(&msg, HS_CERTIFICATE_VERIFY)?;
        let transcript_hash = self.transcript.current();
        let mut dec = Decoder::new(msg.body());
        let scheme_code = dec.u16()?;
        let scheme = SignatureScheme::from_code(scheme_code)
            .ok_or(Error::UnknownSignatureScheme(scheme_code))?;
        let signature = dec.opaque16()?;
        dec.expect_end()?;
        let signed = verify::certificate_verify_message(&transcript_hash);
        verify::verify(scheme, &server_key, &signed, signature)?;
        self.scheme = Some(scheme);
        self.transcript.update(&msg.raw);

        let msg = self.next_encrypted(&hs_cipher, &mut server_seq)?;
        self.expect(&msg, HS_FINISHED)?;
        let expected = hs_cipher.server_finished_13(&self.transcript.current());
        if !bool::from(expected.as_slice().ct_eq(msg.body())) {
            return Err(Error::DecryptError);
        }
        self.transcript.update(&msg.raw);

        // nothing may trail the server Finished in the handshake flight
        if self.frags.next_message()?.is_some() || self.frags.has_partial() {
            return Err(Error::UnexpectedMessage);
        }

        let app_cipher = hs_cipher.init_13_application(&self.transcript.current())?;

        // cleartext CCS for middlebox compatibility, then our Finished under
        // the handshake keys
        self.send_plain(ContentType::ChangeCipherSpec, &[1])?;
        let verify_data = hs_cipher.client_finished_13(&self.transcript.current());
        let mut finished = Vec::with_capacity(4 + verify_data.len());
        finished.push(HS_FINISHED);
        finished.extend_from_slice(&u24_bytes(verify_data.len()));
        finished.extend_from_slice(&verify_data);
        self.transcript.update(&finished);
        self.send_encrypted(&hs_cipher, 0, ContentType::Handshake, &finished)?;

        Ok(Established {
            cipher: app_cipher,
            client_seq: 0,
            server_seq: 0,
            version: Version::Tls13,
        })
    }

    fn process_certificate_13(&mut self, msg: &RawMsg) -> Result<PublicKeyMaterial> {
        let mut dec = Decoder::new(msg.body());
        // certificate_request_context must be empty outside post-handshake
        if !dec.opaque8()?.is_empty() {
            return Err(Error::IllegalParameter);
        }
        let mut list = Decoder::new(dec.opaque24()?);
        dec.expect_end()?;
        let mut ders = Vec::new();
        while !list.is_empty() {
            ders.push(list.opaque24()?);
            // per-certificate extensions (OCSP, SCT) are not consumed here
            list.opaque16()?;
        }
        validate_chain(
            self.config.policy,
            self.config.host,
            (self.config.now_unix)(),
            &ders,
        )
    }
}

pub(crate) fn u24_bytes(len: usize) -> [u8; 3] {
    [(len >> 16) as u8, (len >> 8) as u8, len as u8]
}
