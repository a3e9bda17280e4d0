//! A client-side TLS engine: dual-version (1.2/1.3) handshake state machine
//! and record layer over any blocking `Read + Write` transport.
//!
//! The crate negotiates version, cipher suite, key-agreement group and
//! signature scheme, authenticates the server through a caller-supplied
//! certificate policy, and then exposes a confidential byte stream:
//!
//! ```ignore
//! let policy = MyX509Policy::with_system_roots();
//! let mut tcp = TcpStream::connect(("example.net", 443))?;
//! let mut config = riptide::ClientConfig::new("example.net", &policy);
//! let mut session = riptide::connect(&mut tcp, config)?;
//! session.write(b"GET / HTTP/1.1\r\nHost: example.net\r\n\r\n")?;
//! while let Some(chunk) = session.read()? {
//!     /* ... */
//! }
//! session.close()?;
//! ```
//!
//! X.509 parsing, trust anchors and the transport are external collaborators;
//! everything cryptographic in between lives here.

#![forbid(unsafe_code)]

pub mod alert;
pub mod cert;
mod cipher;
mod client;
mod codec;
mod error;
mod handshake;
mod keyshare;
mod record;
mod transcript;
mod verify;

pub use cert::{CertificatePolicy, PublicKeyMaterial, TrustStore};
pub use cipher::{CipherSuite, KeyExchange, DEFAULT_CIPHER_SUITES};
pub use client::{connect, Client, ClientConfig, NegotiatedStats};
pub use error::{Error, Result};
pub use keyshare::NamedGroup;
pub use verify::SignatureScheme;
