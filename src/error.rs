use std::{error, fmt, io};

use crate::alert::AlertDescription;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    Io(io::Error),

    // protocol
    BadVersion,
    UnexpectedMessage,
    IllegalParameter,
    UnsupportedFragmentedHandshakeMessage,
    RecordOverflow,
    DecodeError,
    ServerHelloRetryRequest,

    // crypto
    BadRecordMac,
    DecryptError,
    DecryptFailure,
    BadSignatureScheme,
    UnknownSignatureScheme(u16),
    BadRsaSignatureBitCount(usize),
    InvalidEncoding,

    // pki
    CertificateIssuerNotFound,
    // recoverable inside chain processing, fatal if it escapes
    CertificateIssuerMismatch,
    CertificateSignatureInvalid,
    HostnameMismatch,

    // resource
    BufferOverflow,
    EndOfStream,

    // remote-initiated
    AlertReceived(AlertDescription),
    ServerSideClosure,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use self::Error::*;

        match self {
            Io(e) => write!(f, "io error: {}", e),
            BadVersion => write!(f, "unsupported or inconsistent protocol version"),
            UnexpectedMessage => write!(f, "message received out of order"),
            IllegalParameter => write!(f, "peer sent an illegal parameter"),
            UnsupportedFragmentedHandshakeMessage => {
                write!(f, "fragmented handshake message not supported here")
            }
            RecordOverflow => write!(f, "record length exceeds the permitted maximum"),
            DecodeError => write!(f, "malformed message"),
            ServerHelloRetryRequest => write!(f, "server requested a hello retry"),
            BadRecordMac => write!(f, "record failed authentication"),
            DecryptError => write!(f, "handshake payload failed verification"),
            DecryptFailure => write!(f, "key decapsulation failed"),
            BadSignatureScheme => {
                write!(f, "signature scheme does not match the certificate key")
            }
            UnknownSignatureScheme(code) => write!(f, "unknown signature scheme {:#06x}", code),
            BadRsaSignatureBitCount(n) => {
                write!(f, "unsupported rsa modulus length of {} bytes", n)
            }
            InvalidEncoding => write!(f, "cryptographic value has an invalid encoding"),
            CertificateIssuerNotFound => write!(f, "no trust anchor matched the chain"),
            CertificateIssuerMismatch => write!(f, "certificate was not signed by this issuer"),
            CertificateSignatureInvalid => write!(f, "certificate signature is invalid"),
            HostnameMismatch => write!(f, "certificate does not cover the requested host"),
            BufferOverflow => write!(f, "write exceeds buffer capacity"),
            EndOfStream => write!(f, "transport closed before a full record arrived"),
            AlertReceived(desc) => write!(f, "peer sent alert: {}", desc),
            ServerSideClosure => write!(f, "peer closed the connection"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}
