//! Server signature verification: CertificateVerify (TLS 1.3) and
//! ServerKeyExchange (TLS 1.2) signatures, dispatched on the advertised
//! scheme crossed with the certificate's key algorithm.

use p256::ecdsa::signature::hazmat::PrehashVerifier;
use p256::ecdsa::signature::Verifier;
use rsa::{BigUint, Pkcs1v15Sign, Pss, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::cert::PublicKeyMaterial;
use crate::codec::Codepoint;
use crate::error::{Error, Result};

#[repr(u16)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SignatureScheme {
    RsaPkcs1Sha1 = 0x0201,
    RsaPkcs1Sha256 = 0x0401,
    RsaPkcs1Sha384 = 0x0501,
    RsaPkcs1Sha512 = 0x0601,
    EcdsaSecp256r1Sha256 = 0x0403,
    EcdsaSecp384r1Sha384 = 0x0503,
    RsaPssRsaeSha256 = 0x0804,
    RsaPssRsaeSha384 = 0x0805,
    RsaPssRsaeSha512 = 0x0806,
    Ed25519 = 0x0807,
}

impl Codepoint for SignatureScheme {
    const WIDTH: usize = 2;

    fn code(self) -> u16 {
        self as u16
    }

    fn from_code(code: u16) -> Option<Self> {
        use self::SignatureScheme::*;

        match code {
            0x0201 => Some(RsaPkcs1Sha1),
            0x0401 => Some(RsaPkcs1Sha256),
            0x0501 => Some(RsaPkcs1Sha384),
            0x0601 => Some(RsaPkcs1Sha512),
            0x0403 => Some(EcdsaSecp256r1Sha256),
            0x0503 => Some(EcdsaSecp384r1Sha384),
            0x0804 => Some(RsaPssRsaeSha256),
            0x0805 => Some(RsaPssRsaeSha384),
            0x0806 => Some(RsaPssRsaeSha512),
            0x0807 => Some(Ed25519),
            _ => None,
        }
    }
}

/// Schemes advertised in signature_algorithms, in preference order.
pub const OFFERED_SIGNATURE_SCHEMES: &[SignatureScheme] = &[
    SignatureScheme::EcdsaSecp256r1Sha256,
    SignatureScheme::EcdsaSecp384r1Sha384,
    SignatureScheme::RsaPssRsaeSha256,
    SignatureScheme::RsaPssRsaeSha384,
    SignatureScheme::RsaPssRsaeSha512,
    SignatureScheme::Ed25519,
    SignatureScheme::RsaPkcs1Sha1,
    SignatureScheme::RsaPkcs1Sha256,
    SignatureScheme::RsaPkcs1Sha384,
];

fn message_digest(scheme: SignatureScheme, message: &[u8]) -> Vec<u8> {
    use self::SignatureScheme::*;

    match scheme {
        RsaPkcs1Sha1 => Sha1::digest(message).to_vec(),
        RsaPkcs1Sha256 | EcdsaSecp256r1Sha256 | RsaPssRsaeSha256 => {
            Sha256::digest(message).to_vec()
        }
        RsaPkcs1Sha384 | EcdsaSecp384r1Sha384 | RsaPssRsaeSha384 => {
            Sha384::digest(message).to_vec()
        }
        RsaPkcs1Sha512 | RsaPssRsaeSha512 => Sha512::digest(message).to_vec(),
        Ed25519 => Vec::new(),
    }
}

fn rsa_key(modulus: &[u8], exponent: &[u8]) -> Result<RsaPublicKey> {
    // DER integers may carry a leading zero pad
    let stripped: &[u8] = {
        let mut m = modulus;
        while m.first() == Some(&0) {
            m = &m[1..];
        }
        m
    };
    match stripped.len() {
        128 | 256 | 384 | 512 => (),
        n => return Err(Error::BadRsaSignatureBitCount(n)),
    }
    RsaPublicKey::new(
        BigUint::from_bytes_be(stripped),
        BigUint::from_bytes_be(exponent),
    )
    .map_err(|_| Error::InvalidEncoding)
}

/// Verifies `signature` over `message`. A scheme/key pairing that cannot
/// exist is `BadSignatureScheme`; a pairing that exists but does not verify
/// is `DecryptError`.
pub fn verify(
    scheme: SignatureScheme,
    key: &PublicKeyMaterial,
    message: &[u8],
    signature: &[u8],
) -> Result<()> {
    use self::SignatureScheme::*;

    match (scheme, key) {
        // cross-hash pairs are allowed: the certificate key picks the curve,
        // the scheme picks the digest
        (
            EcdsaSecp256r1Sha256 | EcdsaSecp384r1Sha384,
            PublicKeyMaterial::EcdsaP256(point),
        ) => {
            let vk = p256::ecdsa::VerifyingKey::from_sec1_bytes(point)
                .map_err(|_| Error::InvalidEncoding)?;
            let sig = p256::ecdsa::Signature::from_der(signature)
                .map_err(|_| Error::InvalidEncoding)?;
            vk.verify_prehash(&message_digest(scheme, message), &sig)
                .map_err(|_| Error::DecryptError)
        }
        (
            EcdsaSecp256r1Sha256 | EcdsaSecp384r1Sha384,
            PublicKeyMaterial::EcdsaP384(point),
        ) => {
            let vk = p384::ecdsa::VerifyingKey::from_sec1_bytes(point)
                .map_err(|_| Error::InvalidEncoding)?;
            let sig = p384::ecdsa::Signature::from_der(signature)
                .map_err(|_| Error::InvalidEncoding)?;
            vk.verify_prehash(&message_digest(scheme, message), &sig)
                .map_err(|_| Error::DecryptError)
        }
        (Ed25519, PublicKeyMaterial::Ed25519(pk)) => {
            let vk = ed25519_dalek::VerifyingKey::from_bytes(pk)
                .map_err(|_| Error::InvalidEncoding)?;
            let sig_bytes: &[u8; 64] =
                signature.try_into().map_err(|_| Error::InvalidEncoding)?;
            let sig = ed25519_dalek::Signature::from_bytes(sig_bytes);
            vk.verify(message, &sig).map_err(|_| Error::DecryptError)
        }
        (
            RsaPssRsaeSha256 | RsaPssRsaeSha384 | RsaPssRsaeSha512,
            PublicKeyMaterial::Rsa { modulus, exponent },
        ) => {
            let key = rsa_key(modulus, exponent)?;
            let padding = match scheme {
                RsaPssRsaeSha256 => Pss::new::<Sha256>(),
                RsaPssRsaeSha384 => Pss::new::<Sha384>(),
                _ => Pss::new::<Sha512>(),
            };
            key.verify(padding, &message_digest(scheme, message), signature)
                .map_err(|_| Error::DecryptError)
        }
        (
            RsaPkcs1Sha1 | RsaPkcs1Sha256 | RsaPkcs1Sha384 | RsaPkcs1Sha512,
            PublicKeyMaterial::Rsa { modulus, exponent },
        ) => {
            let key = rsa_key(modulus, exponent)?;
            let padding = match scheme {
                RsaPkcs1Sha1 => Pkcs1v15Sign::new::<Sha1>(),
                RsaPkcs1Sha256 => Pkcs1v15Sign::new::<Sha256>(),
                RsaPkcs1Sha384 => Pkcs1v15Sign::new::<Sha384>(),
                _ => Pkcs1v15Sign::new::<Sha512>(),
            };
            key.verify(padding, &message_digest(scheme, message), signature)
                .map_err(|_| Error::DecryptError)
        }
        _ => Err(Error::BadSignatureScheme),
    }
}

const CERTIFICATE_VERIFY_CONTEXT: &[u8] = b"TLS 1.3, server CertificateVerify";

/// The signed content for a TLS 1.3 server CertificateVerify: 64 spaces, the
/// context string, a zero separator, then the transcript hash.
pub fn certificate_verify_message(transcript_hash: &[u8]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(64 + CERTIFICATE_VERIFY_CONTEXT.len() + 1 + transcript_hash.len());
    msg.extend_from_slice(&[0x20; 64]);
    msg.extend_from_slice(CERTIFICATE_VERIFY_CONTEXT);
    msg.push(0x00);
    msg.extend_from_slice(transcript_hash);
    msg
}
