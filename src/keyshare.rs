//! Ephemeral key agreement material. All keypairs for the offered groups are
//! generated eagerly from one 64-byte seed so a fixed random source yields a
//! byte-identical ClientHello.

use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use x25519_dalek::{PublicKey as XPublicKey, StaticSecret as XSecret};
use zeroize::Zeroize;

use crate::codec::Codepoint;
use crate::error::{Error, Result};

pub const X25519_SHARE_LEN: usize = 32;
pub const KYBER_CIPHERTEXT_LEN: usize = pqc_kyber::KYBER_CIPHERTEXTBYTES;
/// Largest server share we accept: X25519 point plus a Kyber768 ciphertext.
pub const MAX_SERVER_SHARE_LEN: usize = X25519_SHARE_LEN + KYBER_CIPHERTEXT_LEN;

#[repr(u16)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NamedGroup {
    Secp256r1 = 0x0017,
    Secp384r1 = 0x0018,
    X25519 = 0x001d,
    /// X25519Kyber768Draft00 hybrid.
    X25519Kyber768 = 0x6399,
}

impl Codepoint for NamedGroup {
    const WIDTH: usize = 2;

    fn code(self) -> u16 {
        self as u16
    }

    fn from_code(code: u16) -> Option<Self> {
        match code {
            0x0017 => Some(NamedGroup::Secp256r1),
            0x0018 => Some(NamedGroup::Secp384r1),
            0x001d => Some(NamedGroup::X25519),
            0x6399 => Some(NamedGroup::X25519Kyber768),
            _ => None,
        }
    }
}

/// One keypair per offerable group, all derived from the handshake seed: the
/// X25519 scalar is the first seed half, the NIST curves and the Kyber768
/// keypair draw from a ChaCha20 DRBG over the second half.
pub struct KeyShares {
    x25519: XSecret,
    p256: p256::SecretKey,
    p384: p384::SecretKey,
    kyber: pqc_kyber::Keypair,
}

impl KeyShares {
    pub fn generate(seed: &[u8; 64]) -> Result<Self> {
        let mut x_bytes = [0u8; 32];
        x_bytes.copy_from_slice(&seed[..32]);
        let x25519 = XSecret::from(x_bytes);
        x_bytes.zeroize();

        let mut drbg_seed = [0u8; 32];
        drbg_seed.copy_from_slice(&seed[32..]);
        let mut rng = ChaCha20Rng::from_seed(drbg_seed);
        drbg_seed.zeroize();

        let p256 = p256::SecretKey::random(&mut rng);
        let p384 = p384::SecretKey::random(&mut rng);
        let kyber = pqc_kyber::keypair(&mut rng).map_err(|_| Error::DecryptFailure)?;

        Ok(KeyShares {
            x25519,
            p256,
            p384,
            kyber,
        })
    }

    /// The public share sent in key_share / ClientKeyExchange: raw for
    /// X25519, uncompressed SEC1 for the NIST curves, X25519 then Kyber768
    /// public key for the hybrid.
    pub fn public_key(&self, group: NamedGroup) -> Vec<u8> {
        match group {
            NamedGroup::X25519 => XPublicKey::from(&self.x25519).as_bytes().to_vec(),
            NamedGroup::Secp256r1 => self
                .p256
                .public_key()
                .to_encoded_point(false)
                .as_bytes()
                .to_vec(),
            NamedGroup::Secp384r1 => self
                .p384
                .public_key()
                .to_encoded_point(false)
                .as_bytes()
                .to_vec(),
            NamedGroup::X25519Kyber768 => {
                let mut share = XPublicKey::from(&self.x25519).as_bytes().to_vec();
                share.extend_from_slice(&self.kyber.public);
                share
            }
        }
    }

    /// Derives the pre-master / shared secret from the server's share.
    pub fn shared_secret(&self, group: NamedGroup, server_pub: &[u8]) -> Result<Vec<u8>> {
        match group {
            NamedGroup::X25519 => {
                let point: [u8; 32] = server_pub
                    .try_into()
                    .map_err(|_| Error::IllegalParameter)?;
                let shared = self.x25519.diffie_hellman(&XPublicKey::from(point));
                Ok(shared.as_bytes().to_vec())
            }
            NamedGroup::Secp256r1 => {
                let peer = p256::PublicKey::from_sec1_bytes(server_pub)
                    .map_err(|_| Error::IllegalParameter)?;
                let shared =
                    p256::ecdh::diffie_hellman(self.p256.to_nonzero_scalar(), peer.as_affine());
                Ok(shared.raw_secret_bytes().to_vec())
            }
            NamedGroup::Secp384r1 => {
                let peer = p384::PublicKey::from_sec1_bytes(server_pub)
                    .map_err(|_| Error::IllegalParameter)?;
                let shared =
                    p384::ecdh::diffie_hellman(self.p384.to_nonzero_scalar(), peer.as_affine());
                Ok(shared.raw_secret_bytes().to_vec())
            }
            NamedGroup::X25519Kyber768 => {
                if server_pub.len() != MAX_SERVER_SHARE_LEN {
                    return Err(Error::IllegalParameter);
                }
                let point: [u8; 32] = server_pub[..X25519_SHARE_LEN]
                    .try_into()
                    .map_err(|_| Error::IllegalParameter)?;
                let x_shared = self.x25519.diffie_hellman(&XPublicKey::from(point));
                let kem_shared =
                    pqc_kyber::decapsulate(&server_pub[X25519_SHARE_LEN..], &self.kyber.secret)
                        .map_err(|_| Error::DecryptFailure)?;
                let mut out = x_shared.as_bytes().to_vec();
                out.extend_from_slice(&kem_shared);
                Ok(out)
            }
        }
    }
}

impl Drop for KeyShares {
    fn drop(&mut self) {
        // the dalek and RustCrypto secrets scrub themselves
        self.kyber.secret.zeroize();
    }
}

/// TLS 1.2 RSA key transport: 48-byte pre-master of `{0x0303, random(46)}`.
/// The wire value is its PKCS#1 v1.5 encryption under the certificate key.
pub struct RsaPreMaster {
    bytes: [u8; 48],
}

impl RsaPreMaster {
    pub fn new(random: &[u8; 46]) -> Self {
        let mut bytes = [0u8; 48];
        bytes[0] = 0x03;
        bytes[1] = 0x03;
        bytes[2..].copy_from_slice(random);
        RsaPreMaster { bytes }
    }

    pub fn secret(&self) -> &[u8; 48] {
        &self.bytes
    }

    pub fn encrypt(
        &self,
        modulus: &[u8],
        exponent: &[u8],
        fill_random: fn(&mut [u8]),
    ) -> Result<Vec<u8>> {
        use rsa::{BigUint, Pkcs1v15Encrypt, RsaPublicKey};

        let key = RsaPublicKey::new(
            BigUint::from_bytes_be(modulus),
            BigUint::from_bytes_be(exponent),
        )
        .map_err(|_| Error::InvalidEncoding)?;

        let mut seed = [0u8; 32];
        fill_random(&mut seed);
        let mut rng = ChaCha20Rng::from_seed(seed);
        seed.zeroize();

        key.encrypt(&mut rng, Pkcs1v15Encrypt, &self.bytes)
            .map_err(|_| Error::InvalidEncoding)
    }
}

impl Drop for RsaPreMaster {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}
