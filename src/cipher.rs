//! Record protection. `Cipher` is a tagged variant over the supported suites
//! so keys and state stay inline and `encrypt`/`decrypt` branch statically.
//! Sequence numbers belong to the caller; this module only turns them into
//! nonces and MAC inputs.

use std::ops::Range;

use aes_gcm::aead::generic_array::typenum::{U12, U16};
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadCore, AeadInPlace};
use aes_gcm::{Aes128Gcm, Aes256Gcm, KeyInit};
use chacha20poly1305::ChaCha20Poly1305;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::ConstantTimeEq;

use crate::codec::Codepoint;
use crate::error::{Error, Result};
use crate::record::{put_header, ContentType, LEGACY_VERSION_TLS12, RECORD_HEADER_LEN};
use crate::transcript::{
    finished_mac_13, next_traffic_secret, traffic_key_iv, HashAlgo, Schedule13,
};

const TAG_LEN: usize = 16;
const GCM_EXPLICIT_NONCE_LEN: usize = 8;
const CBC_BLOCK_LEN: usize = 16;
const CBC_MAC_LEN: usize = 20;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum KeyExchange {
    Ecdhe,
    Rsa,
}

#[repr(u16)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CipherSuite {
    // TLS 1.3
    Aes128GcmSha256 = 0x1301,
    Aes256GcmSha384 = 0x1302,
    ChaCha20Poly1305Sha256 = 0x1303,
    // TLS 1.2
    RsaAes128CbcSha = 0x002f,
    EcdheEcdsaAes128CbcSha = 0xc009,
    EcdheRsaAes128CbcSha = 0xc013,
    EcdheEcdsaAes128GcmSha256 = 0xc02b,
    EcdheEcdsaAes256GcmSha384 = 0xc02c,
    EcdheRsaAes128GcmSha256 = 0xc02f,
    EcdheRsaAes256GcmSha384 = 0xc030,
    EcdheRsaChaCha20Poly1305Sha256 = 0xcca8,
    EcdheEcdsaChaCha20Poly1305Sha256 = 0xcca9,
}

/// Preference order offered when the caller does not narrow the list.
pub const DEFAULT_CIPHER_SUITES: &[CipherSuite] = &[
    CipherSuite::Aes128GcmSha256,
    CipherSuite::Aes256GcmSha384,
    CipherSuite::ChaCha20Poly1305Sha256,
    CipherSuite::EcdheEcdsaAes128GcmSha256,
    CipherSuite::EcdheRsaAes128GcmSha256,
    CipherSuite::EcdheEcdsaAes256GcmSha384,
    CipherSuite::EcdheRsaAes256GcmSha384,
    CipherSuite::EcdheEcdsaChaCha20Poly1305Sha256,
    CipherSuite::EcdheRsaChaCha20Poly1305Sha256,
    CipherSuite::EcdheEcdsaAes128CbcSha,
    CipherSuite::EcdheRsaAes128CbcSha,
    CipherSuite::RsaAes128CbcSha,
];

impl Codepoint for CipherSuite {
    const WIDTH: usize = 2;

    fn code(self) -> u16 {
        self as u16
    }

    fn from_code(code: u16) -> Option<Self> {
        use self::CipherSuite::*;

        match code {
            0x1301 => Some(Aes128GcmSha256),
            0x1302 => Some(Aes256GcmSha384),
            0x1303 => Some(ChaCha20Poly1305Sha256),
            0x002f => Some(RsaAes128CbcSha),
            0xc009 => Some(EcdheEcdsaAes128CbcSha),
            0xc013 => Some(EcdheRsaAes128CbcSha),
            0xc02b => Some(EcdheEcdsaAes128GcmSha256),
            0xc02c => Some(EcdheEcdsaAes256GcmSha384),
            0xc02f => Some(EcdheRsaAes128GcmSha256),
            0xc030 => Some(EcdheRsaAes256GcmSha384),
            0xcca8 => Some(EcdheRsaChaCha20Poly1305Sha256),
            0xcca9 => Some(EcdheEcdsaChaCha20Poly1305Sha256),
            _ => None,
        }
    }
}

enum AeadKind {
    Aes128,
    Aes256,
    ChaCha,
}

impl CipherSuite {
    pub fn is_tls13(self) -> bool {
        matches!(
            self,
            CipherSuite::Aes128GcmSha256
                | CipherSuite::Aes256GcmSha384
                | CipherSuite::ChaCha20Poly1305Sha256
        )
    }

    /// Hash used by the suite's PRF (1.2) or HKDF and transcript (1.3).
    pub fn hash(self) -> HashAlgo {
        use self::CipherSuite::*;

        match self {
            Aes256GcmSha384 | EcdheEcdsaAes256GcmSha384 | EcdheRsaAes256GcmSha384 => {
                HashAlgo::Sha384
            }
            _ => HashAlgo::Sha256,
        }
    }

    pub fn key_exchange(self) -> KeyExchange {
        match self {
            CipherSuite::RsaAes128CbcSha => KeyExchange::Rsa,
            _ => KeyExchange::Ecdhe,
        }
    }

    fn aead_kind(self) -> Option<AeadKind> {
        use self::CipherSuite::*;

        match self {
            Aes128GcmSha256 | EcdheEcdsaAes128GcmSha256 | EcdheRsaAes128GcmSha256 => {
                Some(AeadKind::Aes128)
            }
            Aes256GcmSha384 | EcdheEcdsaAes256GcmSha384 | EcdheRsaAes256GcmSha384 => {
                Some(AeadKind::Aes256)
            }
            ChaCha20Poly1305Sha256
            | EcdheRsaChaCha20Poly1305Sha256
            | EcdheEcdsaChaCha20Poly1305Sha256 => Some(AeadKind::ChaCha),
            _ => None,
        }
    }

    fn key_len(self) -> usize {
        use self::CipherSuite::*;

        match self {
            Aes128GcmSha256 | EcdheEcdsaAes128GcmSha256 | EcdheRsaAes128GcmSha256
            | RsaAes128CbcSha | EcdheEcdsaAes128CbcSha | EcdheRsaAes128CbcSha => 16,
            _ => 32,
        }
    }

    fn fixed_iv_len(self) -> usize {
        use self::CipherSuite::*;

        match self {
            // GCM: 4-byte salt, the rest of the nonce is explicit per record
            EcdheEcdsaAes128GcmSha256 | EcdheRsaAes128GcmSha256 | EcdheEcdsaAes256GcmSha384
            | EcdheRsaAes256GcmSha384 => 4,
            EcdheRsaChaCha20Poly1305Sha256 | EcdheEcdsaChaCha20Poly1305Sha256 => 12,
            _ => 0,
        }
    }

    fn mac_key_len(self) -> usize {
        use self::CipherSuite::*;

        match self {
            RsaAes128CbcSha | EcdheEcdsaAes128CbcSha | EcdheRsaAes128CbcSha => CBC_MAC_LEN,
            _ => 0,
        }
    }

    /// Bytes of PRF output `init_12` consumes for this suite.
    pub fn key_material_len(self) -> usize {
        2 * (self.mac_key_len() + self.key_len() + self.fixed_iv_len())
    }
}

enum Aead {
    Aes128(Aes128Gcm),
    Aes256(Aes256Gcm),
    ChaCha(ChaCha20Poly1305),
}

fn seal_with<A>(aead: &A, nonce: &[u8; 12], aad: &[u8], buf: &mut [u8]) -> Result<[u8; TAG_LEN]>
where
    A: AeadInPlace + AeadCore<NonceSize = U12, TagSize = U16>,
{
    let tag = aead
        .encrypt_in_place_detached(GenericArray::from_slice(nonce), aad, buf)
        .map_err(|_| Error::DecryptError)?;
    let mut out = [0u8; TAG_LEN];
    out.copy_from_slice(&tag);
    Ok(out)
}

fn open_with<A>(aead: &A, nonce: &[u8; 12], aad: &[u8], buf: &mut [u8], tag: &[u8]) -> Result<()>
where
    A: AeadInPlace + AeadCore<NonceSize = U12, TagSize = U16>,
{
    aead.decrypt_in_place_detached(
        GenericArray::from_slice(nonce),
        aad,
        buf,
        GenericArray::from_slice(tag),
    )
    .map_err(|_| Error::BadRecordMac)
}

impl Aead {
    fn new(kind: &AeadKind, key: &[u8]) -> Result<Self> {
        Ok(match kind {
            AeadKind::Aes128 => Aead::Aes128(
                Aes128Gcm::new_from_slice(key).map_err(|_| Error::InvalidEncoding)?,
            ),
            AeadKind::Aes256 => Aead::Aes256(
                Aes256Gcm::new_from_slice(key).map_err(|_| Error::InvalidEncoding)?,
            ),
            AeadKind::ChaCha => Aead::ChaCha(
                ChaCha20Poly1305::new_from_slice(key).map_err(|_| Error::InvalidEncoding)?,
            ),
        })
    }

    fn seal(&self, nonce: &[u8; 12], aad: &[u8], buf: &mut [u8]) -> Result<[u8; TAG_LEN]> {
        match self {
            Aead::Aes128(a) => seal_with(a, nonce, aad, buf),
            Aead::Aes256(a) => seal_with(a, nonce, aad, buf),
            Aead::ChaCha(a) => seal_with(a, nonce, aad, buf),
        }
    }

    fn open(&self, nonce: &[u8; 12], aad: &[u8], buf: &mut [u8], tag: &[u8]) -> Result<()> {
        match self {
            Aead::Aes128(a) => open_with(a, nonce, aad, buf, tag),
            Aead::Aes256(a) => open_with(a, nonce, aad, buf, tag),
            Aead::ChaCha(a) => open_with(a, nonce, aad, buf, tag),
        }
    }
}

/// Per-record nonce for the xor construction shared by TLS 1.3 and the 1.2
/// ChaCha suites.
fn xor_nonce(iv: &[u8; 12], seq: u64) -> [u8; 12] {
    let mut nonce = *iv;
    for (dst, src) in nonce[4..].iter_mut().zip(seq.to_be_bytes()) {
        *dst ^= src;
    }
    nonce
}

/// TLS 1.2 additional data: seq, type, version, plaintext length.
fn aad_12(seq: u64, content_type: u8, len: usize) -> [u8; 13] {
    let mut aad = [0u8; 13];
    aad[..8].copy_from_slice(&seq.to_be_bytes());
    aad[8] = content_type;
    aad[9] = 0x03;
    aad[10] = 0x03;
    aad[11..].copy_from_slice(&(len as u16).to_be_bytes());
    aad
}

fn hmac_sha1(key: &[u8], parts: &[&[u8]]) -> [u8; CBC_MAC_LEN] {
    let mut mac = <Hmac<Sha1> as Mac>::new_from_slice(key)
        .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
    for part in parts {
        mac.update(part);
    }
    let mut out = [0u8; CBC_MAC_LEN];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

pub struct Cipher13 {
    suite: CipherSuite,
    client: Aead,
    server: Aead,
    client_iv: [u8; 12],
    server_iv: [u8; 12],
    client_secret: Vec<u8>,
    server_secret: Vec<u8>,
    /// Present only on the handshake-phase cipher; the application phase and
    /// Finished keys derive from it.
    schedule: Option<Schedule13>,
}

pub struct Gcm12 {
    client: Aead,
    server: Aead,
    client_salt: [u8; 4],
    server_salt: [u8; 4],
}

pub struct ChaCha12 {
    client: Aead,
    server: Aead,
    client_iv: [u8; 12],
    server_iv: [u8; 12],
}

pub struct Cbc12 {
    client_key: [u8; 16],
    server_key: [u8; 16],
    client_mac: [u8; CBC_MAC_LEN],
    server_mac: [u8; CBC_MAC_LEN],
    fill_random: fn(&mut [u8]),
}

pub enum Cipher {
    Tls13(Cipher13),
    Gcm12(Gcm12),
    ChaCha12(ChaCha12),
    Cbc12(Cbc12),
}

impl Cipher {
    /// TLS 1.2: splits the PRF key block into MAC keys, write keys and fixed
    /// IVs per the suite's schedule. CBC suites draw a fresh explicit IV from
    /// `fill_random` on every encrypt.
    pub fn init_12(
        suite: CipherSuite,
        key_material: &[u8],
        fill_random: fn(&mut [u8]),
    ) -> Result<Cipher> {
        if key_material.len() < suite.key_material_len() {
            return Err(Error::DecodeError);
        }
        let mac_len = suite.mac_key_len();
        let key_len = suite.key_len();
        let iv_len = suite.fixed_iv_len();
        let (client_mac, rest) = key_material.split_at(mac_len);
        let (server_mac, rest) = rest.split_at(mac_len);
        let (client_key, rest) = rest.split_at(key_len);
        let (server_key, rest) = rest.split_at(key_len);
        let (client_iv, rest) = rest.split_at(iv_len);
        let (server_iv, _) = rest.split_at(iv_len);

        match suite.aead_kind() {
            Some(kind @ (AeadKind::Aes128 | AeadKind::Aes256)) => {
                let mut c_salt = [0u8; 4];
                c_salt.copy_from_slice(client_iv);
                let mut s_salt = [0u8; 4];
                s_salt.copy_from_slice(server_iv);
                Ok(Cipher::Gcm12(Gcm12 {
                    client: Aead::new(&kind, client_key)?,
                    server: Aead::new(&kind, server_key)?,
                    client_salt: c_salt,
                    server_salt: s_salt,
                }))
            }
            Some(kind @ AeadKind::ChaCha) => {
                let mut c_iv = [0u8; 12];
                c_iv.copy_from_slice(client_iv);
                let mut s_iv = [0u8; 12];
                s_iv.copy_from_slice(server_iv);
                Ok(Cipher::ChaCha12(ChaCha12 {
                    client: Aead::new(&kind, client_key)?,
                    server: Aead::new(&kind, server_key)?,
                    client_iv: c_iv,
                    server_iv: s_iv,
                }))
            }
            None => {
                let mut cbc = Cbc12 {
                    client_key: [0; 16],
                    server_key: [0; 16],
                    client_mac: [0; CBC_MAC_LEN],
                    server_mac: [0; CBC_MAC_LEN],
                    fill_random,
                };
                cbc.client_key.copy_from_slice(client_key);
                cbc.server_key.copy_from_slice(server_key);
                cbc.client_mac.copy_from_slice(client_mac);
                cbc.server_mac.copy_from_slice(server_mac);
                Ok(Cipher::Cbc12(cbc))
            }
        }
    }

    /// TLS 1.3 handshake-phase cipher from the ECDHE/hybrid shared secret and
    /// the transcript hash through ServerHello.
    pub fn init_13_handshake(
        suite: CipherSuite,
        shared_secret: &[u8],
        hello_hash: &[u8],
    ) -> Result<Cipher> {
        let schedule = Schedule13::new(suite.hash(), shared_secret, hello_hash);
        let mut cipher = Self::from_secrets_13(
            suite,
            schedule.client_hs.clone(),
            schedule.server_hs.clone(),
        )?;
        if let Cipher::Tls13(c) = &mut cipher {
            c.schedule = Some(schedule);
        }
        Ok(cipher)
    }

    /// TLS 1.3 application-phase cipher, derived from the handshake cipher's
    /// schedule and the transcript hash through the server Finished.
    pub fn init_13_application(&self, finished_hash: &[u8]) -> Result<Cipher> {
        let c = self.tls13();
        let schedule = match &c.schedule {
            Some(s) => s,
            None => unreachable!("application keys derive from the handshake cipher"),
        };
        let (client_secret, server_secret) = schedule.application_secrets(finished_hash);
        Self::from_secrets_13(c.suite, client_secret, server_secret)
    }

    fn from_secrets_13(
        suite: CipherSuite,
        client_secret: Vec<u8>,
        server_secret: Vec<u8>,
    ) -> Result<Cipher> {
        let kind = match suite.aead_kind() {
            Some(kind) if suite.is_tls13() => kind,
            _ => return Err(Error::IllegalParameter),
        };
        let algo = suite.hash();
        let (client_key, client_iv) = traffic_key_iv(algo, &client_secret, suite.key_len());
        let (server_key, server_iv) = traffic_key_iv(algo, &server_secret, suite.key_len());
        Ok(Cipher::Tls13(Cipher13 {
            suite,
            client: Aead::new(&kind, &client_key)?,
            server: Aead::new(&kind, &server_key)?,
            client_iv,
            server_iv,
            client_secret,
            server_secret,
            schedule: None,
        }))
    }

    fn tls13(&self) -> &Cipher13 {
        match self {
            Cipher::Tls13(c) => c,
            _ => unreachable!("operation is TLS 1.3 only"),
        }
    }

    /// Finished verify data for the server direction (handshake cipher only).
    pub fn server_finished_13(&self, transcript_hash: &[u8]) -> Vec<u8> {
        let c = self.tls13();
        finished_mac_13(c.suite.hash(), &c.server_secret, transcript_hash)
    }

    pub fn client_finished_13(&self, transcript_hash: &[u8]) -> Vec<u8> {
        let c = self.tls13();
        finished_mac_13(c.suite.hash(), &c.client_secret, transcript_hash)
    }

    /// KeyUpdate ratchets. Callers reset the matching sequence counter.
    pub fn update_server_key(&mut self) -> Result<()> {
        self.update_direction(false)
    }

    pub fn update_client_key(&mut self) -> Result<()> {
        self.update_direction(true)
    }

    fn update_direction(&mut self, client: bool) -> Result<()> {
        let c = match self {
            Cipher::Tls13(c) => c,
            _ => return Err(Error::UnexpectedMessage),
        };
        let algo = c.suite.hash();
        let kind = match c.suite.aead_kind() {
            Some(kind) => kind,
            None => unreachable!("1.3 suites are all AEAD"),
        };
        let secret = if client {
            &mut c.client_secret
        } else {
            &mut c.server_secret
        };
        *secret = next_traffic_secret(algo, secret);
        let (key, iv) = traffic_key_iv(algo, secret, c.suite.key_len());
        if client {
            c.client = Aead::new(&kind, &key)?;
            c.client_iv = iv;
        } else {
            c.server = Aead::new(&kind, &key)?;
            c.server_iv = iv;
        }
        Ok(())
    }

    /// Builds `header || protected_payload` into `out` (cleared first).
    pub fn encrypt(
        &self,
        out: &mut Vec<u8>,
        seq: u64,
        content_type: ContentType,
        plaintext: &[u8],
    ) -> Result<()> {
        out.clear();
        match self {
            Cipher::Tls13(c) => {
                // inner plaintext carries the real type; the outer header
                // always advertises application_data
                let payload_len = plaintext.len() + 1 + TAG_LEN;
                put_header(
                    out,
                    ContentType::ApplicationData,
                    LEGACY_VERSION_TLS12,
                    payload_len,
                );
                out.extend_from_slice(plaintext);
                out.push(content_type as u8);
                let mut header = [0u8; RECORD_HEADER_LEN];
                header.copy_from_slice(&out[..RECORD_HEADER_LEN]);
                let nonce = xor_nonce(&c.client_iv, seq);
                let body = RECORD_HEADER_LEN..RECORD_HEADER_LEN + plaintext.len() + 1;
                let tag = c.client.seal(&nonce, &header, &mut out[body])?;
                out.extend_from_slice(&tag);
            }
            Cipher::Gcm12(c) => {
                let payload_len = GCM_EXPLICIT_NONCE_LEN + plaintext.len() + TAG_LEN;
                put_header(out, content_type, LEGACY_VERSION_TLS12, payload_len);
                let explicit = seq.to_be_bytes();
                out.extend_from_slice(&explicit);
                out.extend_from_slice(plaintext);
                let mut nonce = [0u8; 12];
                nonce[..4].copy_from_slice(&c.client_salt);
                nonce[4..].copy_from_slice(&explicit);
                let aad = aad_12(seq, content_type as u8, plaintext.len());
                let body = RECORD_HEADER_LEN + GCM_EXPLICIT_NONCE_LEN
                    ..RECORD_HEADER_LEN + GCM_EXPLICIT_NONCE_LEN + plaintext.len();
                let tag = c.client.seal(&nonce, &aad, &mut out[body])?;
                out.extend_from_slice(&tag);
            }
            Cipher::ChaCha12(c) => {
                let payload_len = plaintext.len() + TAG_LEN;
                put_header(out, content_type, LEGACY_VERSION_TLS12, payload_len);
                out.extend_from_slice(plaintext);
                let nonce = xor_nonce(&c.client_iv, seq);
                let aad = aad_12(seq, content_type as u8, plaintext.len());
                let body = RECORD_HEADER_LEN..RECORD_HEADER_LEN + plaintext.len();
                let tag = c.client.seal(&nonce, &aad, &mut out[body])?;
                out.extend_from_slice(&tag);
            }
            Cipher::Cbc12(c) => {
                let aad = aad_12(seq, content_type as u8, plaintext.len());
                let mac = hmac_sha1(&c.client_mac, &[&aad, plaintext]);
                let content_len = plaintext.len() + CBC_MAC_LEN;
                let pad_len = CBC_BLOCK_LEN - 1 - (content_len % CBC_BLOCK_LEN);
                let padded_len = content_len + pad_len + 1;
                put_header(
                    out,
                    content_type,
                    LEGACY_VERSION_TLS12,
                    CBC_BLOCK_LEN + padded_len,
                );
                let mut iv = [0u8; CBC_BLOCK_LEN];
                (c.fill_random)(&mut iv);
                out.extend_from_slice(&iv);
                out.extend_from_slice(plaintext);
                out.extend_from_slice(&mac);
                out.resize(out.len() + pad_len + 1, pad_len as u8);

                use aes::cipher::{block_padding::NoPadding, BlockEncryptMut, KeyIvInit};
                let start = RECORD_HEADER_LEN + CBC_BLOCK_LEN;
                cbc::Encryptor::<aes::Aes128>::new_from_slices(&c.client_key, &iv)
                    .map_err(|_| Error::InvalidEncoding)?
                    .encrypt_padded_mut::<NoPadding>(&mut out[start..], padded_len)
                    .map_err(|_| Error::InvalidEncoding)?;
            }
        }
        Ok(())
    }

    /// Decrypts a server record in place; the returned range locates the
    /// plaintext inside `payload`.
    pub fn decrypt(
        &self,
        seq: u64,
        header: &[u8; RECORD_HEADER_LEN],
        payload: &mut [u8],
    ) -> Result<(ContentType, Range<usize>)> {
        let outer = ContentType::from_code(header[0] as u16).ok_or(Error::UnexpectedMessage)?;
        match self {
            Cipher::Tls13(c) => {
                if payload.len() < TAG_LEN + 1 {
                    return Err(Error::DecodeError);
                }
                let body_len = payload.len() - TAG_LEN;
                let (body, tag) = payload.split_at_mut(body_len);
                let nonce = xor_nonce(&c.server_iv, seq);
                c.server.open(&nonce, header, body, tag)?;
                // the real content type is the last non-zero byte; the zeros
                // after it are padding
                let type_at = match body.iter().rposition(|&b| b != 0) {
                    Some(i) => i,
                    None => return Err(Error::UnexpectedMessage),
                };
                let content_type =
                    ContentType::from_code(body[type_at] as u16).ok_or(Error::UnexpectedMessage)?;
                Ok((content_type, 0..type_at))
            }
            Cipher::Gcm12(c) => {
                if payload.len() < GCM_EXPLICIT_NONCE_LEN + TAG_LEN {
                    return Err(Error::DecodeError);
                }
                let plain_len = payload.len() - GCM_EXPLICIT_NONCE_LEN - TAG_LEN;
                let mut nonce = [0u8; 12];
                nonce[..4].copy_from_slice(&c.server_salt);
                nonce[4..].copy_from_slice(&payload[..GCM_EXPLICIT_NONCE_LEN]);
                let aad = aad_12(seq, header[0], plain_len);
                let (body, tag) = payload[GCM_EXPLICIT_NONCE_LEN..].split_at_mut(plain_len);
                c.server.open(&nonce, &aad, body, tag)?;
                Ok((
                    outer,
                    GCM_EXPLICIT_NONCE_LEN..GCM_EXPLICIT_NONCE_LEN + plain_len,
                ))
            }
            Cipher::ChaCha12(c) => {
                if payload.len() < TAG_LEN {
                    return Err(Error::DecodeError);
                }
                let plain_len = payload.len() - TAG_LEN;
                let nonce = xor_nonce(&c.server_iv, seq);
                let aad = aad_12(seq, header[0], plain_len);
                let (body, tag) = payload.split_at_mut(plain_len);
                c.server.open(&nonce, &aad, body, tag)?;
                Ok((outer, 0..plain_len))
            }
            Cipher::Cbc12(c) => {
                if payload.len() < 2 * CBC_BLOCK_LEN
                    || (payload.len() - CBC_BLOCK_LEN) % CBC_BLOCK_LEN != 0
                {
                    return Err(Error::DecodeError);
                }
                let (iv, body) = payload.split_at_mut(CBC_BLOCK_LEN);

                use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, KeyIvInit};
                cbc::Decryptor::<aes::Aes128>::new_from_slices(&c.server_key, iv)
                    .map_err(|_| Error::InvalidEncoding)?
                    .decrypt_padded_mut::<NoPadding>(body)
                    .map_err(|_| Error::BadRecordMac)?;

                let pad_len = body[body.len() - 1] as usize;
                if pad_len + 1 + CBC_MAC_LEN > body.len() {
                    return Err(Error::BadRecordMac);
                }
                // all padding bytes must carry the pad length
                let mut pad_diff = 0u8;
                for &b in &body[body.len() - pad_len - 1..] {
                    pad_diff |= b ^ pad_len as u8;
                }
                if pad_diff != 0 {
                    return Err(Error::BadRecordMac);
                }
                let plain_len = body.len() - pad_len - 1 - CBC_MAC_LEN;
                let aad = aad_12(seq, header[0], plain_len);
                let expected = hmac_sha1(&c.server_mac, &[&aad, &body[..plain_len]]);
                let received = &body[plain_len..plain_len + CBC_MAC_LEN];
                if !bool::from(expected.ct_eq(received)) {
                    return Err(Error::BadRecordMac);
                }
                Ok((outer, CBC_BLOCK_LEN..CBC_BLOCK_LEN + plain_len))
            }
        }
    }

    /// Swaps the two directions so a test can act as the peer.
    #[cfg(test)]
    pub(crate) fn into_swapped(self) -> Cipher {
        match self {
            Cipher::Tls13(c) => Cipher::Tls13(Cipher13 {
                suite: c.suite,
                client: c.server,
                server: c.client,
                client_iv: c.server_iv,
                server_iv: c.client_iv,
                client_secret: c.server_secret,
                server_secret: c.client_secret,
                schedule: c.schedule,
            }),
            Cipher::Gcm12(c) => Cipher::Gcm12(Gcm12 {
                client: c.server,
                server: c.client,
                client_salt: c.server_salt,
                server_salt: c.client_salt,
            }),
            Cipher::ChaCha12(c) => Cipher::ChaCha12(ChaCha12 {
                client: c.server,
                server: c.client,
                client_iv: c.server_iv,
                server_iv: c.client_iv,
            }),
            Cipher::Cbc12(c) => Cipher::Cbc12(Cbc12 {
                client_key: c.server_key,
                server_key: c.client_key,
                client_mac: c.server_mac,
                server_mac: c.client_mac,
                fill_random: c.fill_random,
            }),
        }
    }
}
