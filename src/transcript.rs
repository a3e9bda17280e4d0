//! Running handshake transcript and the key derivations hanging off it: the
//! TLS 1.2 PRF (RFC 5246) and the TLS 1.3 HKDF schedule (RFC 8446).
//!
//! Both SHA-256 and SHA-384 states are fed until the server's suite choice
//! collapses the pair to one; 1.2 and 1.3 disagree on the hash and the choice
//! only lands with ServerHello.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha384};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HashAlgo {
    Sha256,
    Sha384,
}

impl HashAlgo {
    pub fn output_len(self) -> usize {
        match self {
            HashAlgo::Sha256 => 32,
            HashAlgo::Sha384 => 48,
        }
    }
}

enum Inner {
    Dual(Sha256, Sha384),
    Selected256(Sha256),
    Selected384(Sha384),
}

pub struct Transcript {
    inner: Inner,
}

impl Transcript {
    pub fn new() -> Self {
        Transcript {
            inner: Inner::Dual(Sha256::new(), Sha384::new()),
        }
    }

    /// Appends one handshake message (header included, record framing not).
    pub fn update(&mut self, bytes: &[u8]) {
        match &mut self.inner {
            Inner::Dual(h256, h384) => {
                h256.update(bytes);
                h384.update(bytes);
            }
            Inner::Selected256(h) => h.update(bytes),
            Inner::Selected384(h) => h.update(bytes),
        }
    }

    /// Discards the hash the negotiated suite does not use.
    pub fn select(&mut self, algo: HashAlgo) {
        let prev = std::mem::replace(&mut self.inner, Inner::Selected256(Sha256::new()));
        self.inner = match (prev, algo) {
            (Inner::Dual(h256, _), HashAlgo::Sha256) => Inner::Selected256(h256),
            (Inner::Dual(_, h384), HashAlgo::Sha384) => Inner::Selected384(h384),
            (selected, _) => selected,
        };
    }

    pub fn algo(&self) -> HashAlgo {
        match &self.inner {
            Inner::Selected256(_) => HashAlgo::Sha256,
            Inner::Selected384(_) => HashAlgo::Sha384,
            Inner::Dual(..) => unreachable!("transcript hash queried before suite selection"),
        }
    }

    /// Hash over everything appended so far; the running state is kept.
    pub fn current(&self) -> Vec<u8> {
        match &self.inner {
            Inner::Selected256(h) => h.clone().finalize().to_vec(),
            Inner::Selected384(h) => h.clone().finalize().to_vec(),
            Inner::Dual(..) => unreachable!("transcript hash queried before suite selection"),
        }
    }
}

pub(crate) fn hmac_hash(algo: HashAlgo, key: &[u8], parts: &[&[u8]]) -> Vec<u8> {
    match algo {
        HashAlgo::Sha256 => {
            let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
                .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
            for part in parts {
                mac.update(part);
            }
            mac.finalize().into_bytes().to_vec()
        }
        HashAlgo::Sha384 => {
            let mut mac = <Hmac<Sha384> as Mac>::new_from_slice(key)
                .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
            for part in parts {
                mac.update(part);
            }
            mac.finalize().into_bytes().to_vec()
        }
    }
}

// ---------------------------------------------------------------------------
// TLS 1.2 PRF (RFC 5246 section 5)

pub const MASTER_SECRET_LEN: usize = 48;
pub const VERIFY_DATA_LEN: usize = 12;

/// P_hash expansion of `secret` over `label || seed`, filling `out`.
pub fn prf(algo: HashAlgo, secret: &[u8], label: &[u8], seed: &[u8], out: &mut [u8]) {
    let mut a = hmac_hash(algo, secret, &[label, seed]);
    let mut filled = 0;
    while filled < out.len() {
        let block = hmac_hash(algo, secret, &[&a, label, seed]);
        let take = block.len().min(out.len() - filled);
        out[filled..filled + take].copy_from_slice(&block[..take]);
        filled += take;
        a = hmac_hash(algo, secret, &[&a]);
    }
}

pub fn master_secret(
    algo: HashAlgo,
    pre_master: &[u8],
    client_random: &[u8; 32],
    server_random: &[u8; 32],
) -> [u8; MASTER_SECRET_LEN] {
    let mut seed = [0u8; 64];
    seed[..32].copy_from_slice(client_random);
    seed[32..].copy_from_slice(server_random);
    let mut out = [0u8; MASTER_SECRET_LEN];
    prf(algo, pre_master, b"master secret", &seed, &mut out);
    out
}

/// Key block expansion; note the seed order flips to server_random first.
pub fn key_material(
    algo: HashAlgo,
    master: &[u8; MASTER_SECRET_LEN],
    client_random: &[u8; 32],
    server_random: &[u8; 32],
    len: usize,
) -> Vec<u8> {
    let mut seed = [0u8; 64];
    seed[..32].copy_from_slice(server_random);
    seed[32..].copy_from_slice(client_random);
    let mut out = vec![0u8; len];
    prf(algo, master, b"key expansion", &seed, &mut out);
    out
}

pub fn finished_verify(
    algo: HashAlgo,
    master: &[u8; MASTER_SECRET_LEN],
    label: &[u8],
    transcript_hash: &[u8],
) -> [u8; VERIFY_DATA_LEN] {
    let mut out = [0u8; VERIFY_DATA_LEN];
    prf(algo, master, label, transcript_hash, &mut out);
    out
}

pub const CLIENT_FINISHED_LABEL: &[u8] = b"client finished";
pub const SERVER_FINISHED_LABEL: &[u8] = b"server finished";

// ---------------------------------------------------------------------------
// TLS 1.3 key schedule (RFC 8446 section 7.1)

pub(crate) fn hkdf_extract(algo: HashAlgo, salt: &[u8], ikm: &[u8]) -> Vec<u8> {
    match algo {
        HashAlgo::Sha256 => Hkdf::<Sha256>::extract(Some(salt), ikm).0.to_vec(),
        HashAlgo::Sha384 => Hkdf::<Sha384>::extract(Some(salt), ikm).0.to_vec(),
    }
}

fn hkdf_expand(algo: HashAlgo, prk: &[u8], info: &[u8], out: &mut [u8]) {
    let expanded = match algo {
        HashAlgo::Sha256 => Hkdf::<Sha256>::from_prk(prk)
            .map_err(drop)
            .and_then(|hk| hk.expand(info, out).map_err(drop)),
        HashAlgo::Sha384 => Hkdf::<Sha384>::from_prk(prk)
            .map_err(drop)
            .and_then(|hk| hk.expand(info, out).map_err(drop)),
    };
    match expanded {
        Ok(()) => (),
        Err(()) => unreachable!("prk is one hash output and out fits 255 blocks"),
    }
}

/// HKDF-Expand-Label: the info block is `u16 length | "tls13 " + label |
/// context`, both strings length-prefixed with one byte.
pub fn hkdf_expand_label(
    algo: HashAlgo,
    secret: &[u8],
    label: &[u8],
    context: &[u8],
    out: &mut [u8],
) {
    let mut info = Vec::with_capacity(4 + 6 + label.len() + context.len());
    info.extend_from_slice(&(out.len() as u16).to_be_bytes());
    info.push((6 + label.len()) as u8);
    info.extend_from_slice(b"tls13 ");
    info.extend_from_slice(label);
    info.push(context.len() as u8);
    info.extend_from_slice(context);
    hkdf_expand(algo, secret, &info, out);
}

pub fn derive_secret(algo: HashAlgo, secret: &[u8], label: &[u8], context: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; algo.output_len()];
    hkdf_expand_label(algo, secret, label, context, &mut out);
    out
}

pub fn empty_hash(algo: HashAlgo) -> Vec<u8> {
    match algo {
        HashAlgo::Sha256 => Sha256::digest([]).to_vec(),
        HashAlgo::Sha384 => Sha384::digest([]).to_vec(),
    }
}

/// Secrets anchored at the handshake phase; the application phase and both
/// Finished keys derive from here.
pub struct Schedule13 {
    pub algo: HashAlgo,
    handshake_secret: Vec<u8>,
    pub client_hs: Vec<u8>,
    pub server_hs: Vec<u8>,
}

impl Schedule13 {
    pub fn new(algo: HashAlgo, shared_secret: &[u8], hello_hash: &[u8]) -> Self {
        let zeros = vec![0u8; algo.output_len()];
        let early = hkdf_extract(algo, &zeros, &zeros);
        let derived = derive_secret(algo, &early, b"derived", &empty_hash(algo));
        let handshake_secret = hkdf_extract(algo, &derived, shared_secret);
        let client_hs = derive_secret(algo, &handshake_secret, b"c hs traffic", hello_hash);
        let server_hs = derive_secret(algo, &handshake_secret, b"s hs traffic", hello_hash);
        Schedule13 {
            algo,
            handshake_secret,
            client_hs,
            server_hs,
        }
    }

    /// Application traffic secrets over the transcript through the server
    /// Finished.
    pub fn application_secrets(&self, finished_hash: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let algo = self.algo;
        let zeros = vec![0u8; algo.output_len()];
        let derived = derive_secret(algo, &self.handshake_secret, b"derived", &empty_hash(algo));
        let master = hkdf_extract(algo, &derived, &zeros);
        let client = derive_secret(algo, &master, b"c ap traffic", finished_hash);
        let server = derive_secret(algo, &master, b"s ap traffic", finished_hash);
        (client, server)
    }
}

/// Finished verify data: HMAC under the finished key expanded from the
/// direction's handshake traffic secret.
pub fn finished_mac_13(algo: HashAlgo, traffic_secret: &[u8], transcript_hash: &[u8]) -> Vec<u8> {
    let mut finished_key = vec![0u8; algo.output_len()];
    hkdf_expand_label(algo, traffic_secret, b"finished", &[], &mut finished_key);
    hmac_hash(algo, &finished_key, &[transcript_hash])
}

/// Record protection key and IV for one direction.
pub fn traffic_key_iv(algo: HashAlgo, secret: &[u8], key_len: usize) -> (Vec<u8>, [u8; 12]) {
    let mut key = vec![0u8; key_len];
    hkdf_expand_label(algo, secret, b"key", &[], &mut key);
    let mut iv = [0u8; 12];
    hkdf_expand_label(algo, secret, b"iv", &[], &mut iv);
    (key, iv)
}

/// KeyUpdate ratchet: application_traffic_secret_N+1.
pub fn next_traffic_secret(algo: HashAlgo, secret: &[u8]) -> Vec<u8> {
    let mut next = vec![0u8; algo.output_len()];
    hkdf_expand_label(algo, secret, b"traffic upd", &[], &mut next);
    next
}
