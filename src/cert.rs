//! Certificate chain processing. X.509 parsing and trust anchors live
//! outside the engine; they come in through `CertificatePolicy`, and the walk
//! here only enforces wire-order chain semantics: hostname on the leaf, each
//! link signed by a later certificate, non-chaining extras skipped, and an
//! optional anchor probe after every link.

use log::debug;

use crate::error::{Error, Result};

/// Certificate public key, already unwrapped from the SPKI by the caller's
/// X.509 library.
#[derive(Clone)]
pub enum PublicKeyMaterial {
    /// Uncompressed SEC1 point on secp256r1.
    EcdsaP256(Vec<u8>),
    /// Uncompressed SEC1 point on secp384r1.
    EcdsaP384(Vec<u8>),
    Ed25519([u8; 32]),
    Rsa {
        modulus: Vec<u8>,
        exponent: Vec<u8>,
    },
}

mod debug {
    use super::PublicKeyMaterial;

    use hex::encode;
    use std::fmt;

    impl fmt::Debug for PublicKeyMaterial {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            match self {
                PublicKeyMaterial::EcdsaP256(point) => {
                    write!(f, "EcdsaP256({})", encode(point))
                }
                PublicKeyMaterial::EcdsaP384(point) => {
                    write!(f, "EcdsaP384({})", encode(point))
                }
                PublicKeyMaterial::Ed25519(key) => write!(f, "Ed25519({})", encode(key)),
                PublicKeyMaterial::Rsa { modulus, exponent } => write!(
                    f,
                    "Rsa(modulus {} bytes, exponent {})",
                    modulus.len(),
                    encode(exponent),
                ),
            }
        }
    }
}

/// Trust anchor set. `verify` returns `CertificateIssuerNotFound` when no
/// anchor matches (the walk keeps going), any other error is fatal.
pub trait TrustStore<C> {
    fn verify(&self, cert: &C, now_unix_sec: u64) -> Result<()>;
}

/// The narrow interface to the caller's X.509 world. `verify_issued` returns
/// `CertificateIssuerMismatch` when `issuer` simply is not the child's
/// issuer; the chain walk skips such certificates rather than failing.
pub trait CertificatePolicy {
    type Cert;

    fn parse(&self, der: &[u8]) -> Result<Self::Cert>;
    fn valid_for_host(&self, cert: &Self::Cert, host: &str) -> bool;
    fn public_key(&self, cert: &Self::Cert) -> Result<PublicKeyMaterial>;
    fn verify_issued(&self, issuer: &Self::Cert, child: &Self::Cert) -> Result<()>;

    /// No anchors means the caller opted into an unverified chain: hostname
    /// and intra-chain signatures are still enforced, trust is not.
    fn anchors(&self) -> Option<&dyn TrustStore<Self::Cert>> {
        None
    }
}

/// Walks the server-supplied chain in wire order and returns the leaf's
/// public key for the subsequent signature checks.
pub(crate) fn validate_chain<P: CertificatePolicy>(
    policy: &P,
    host: &str,
    now_unix_sec: u64,
    ders: &[&[u8]],
) -> Result<PublicKeyMaterial> {
    let mut iter = ders.iter();
    let leaf_der = iter.next().ok_or(Error::DecodeError)?;
    let leaf = policy.parse(leaf_der)?;
    if !policy.valid_for_host(&leaf, host) {
        return Err(Error::HostnameMismatch);
    }
    let key = policy.public_key(&leaf)?;

    let anchors = policy.anchors();
    let mut anchored = probe_anchor(anchors, &leaf, now_unix_sec)?;

    let mut tail = leaf;
    for der in iter {
        let cert = policy.parse(der)?;
        match policy.verify_issued(&cert, &tail) {
            Ok(()) => {
                tail = cert;
                if !anchored {
                    anchored = probe_anchor(anchors, &tail, now_unix_sec)?;
                }
            }
            // an extra certificate that does not chain; tolerate and move on
            Err(Error::CertificateIssuerMismatch) => continue,
            Err(e) => return Err(e),
        }
    }

    if anchors.is_some() && !anchored {
        return Err(Error::CertificateIssuerNotFound);
    }
    debug!(
        "certificate chain accepted for {} ({} certificates, trust {})",
        host,
        ders.len(),
        if anchors.is_some() { "anchored" } else { "unchecked" },
    );
    Ok(key)
}

fn probe_anchor<C>(
    anchors: Option<&dyn TrustStore<C>>,
    cert: &C,
    now_unix_sec: u64,
) -> Result<bool> {
    match anchors {
        None => Ok(false),
        Some(store) => match store.verify(cert, now_unix_sec) {
            Ok(()) => Ok(true),
            Err(Error::CertificateIssuerNotFound) => Ok(false),
            Err(e) => Err(e),
        },
    }
}
