//! Full-flight scenarios against a scripted server on a TCP loopback: the
//! server side is driven byte-by-byte with the crate's own primitives so the
//! client path is exercised end to end, including defragmentation, session
//! ticket skipping and key updates.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};

use ed25519_dalek::{Signer, SigningKey};
use x25519_dalek::{PublicKey as XPublicKey, StaticSecret as XSecret};

use super::{u24_bytes, HELLO_RETRY_SENTINEL};
use crate::alert::AlertDescription;
use crate::cert::{CertificatePolicy, PublicKeyMaterial, TrustStore};
use crate::cipher::{Cipher, CipherSuite};
use crate::client::{connect, ClientConfig, NegotiatedStats};
use crate::codec::Decoder;
use crate::error::Error;
use crate::record::{put_header, ContentType, LEGACY_VERSION_TLS12, RECORD_HEADER_LEN};
use crate::transcript::{
    finished_verify, key_material, master_secret, HashAlgo, Transcript, CLIENT_FINISHED_LABEL,
    SERVER_FINISHED_LABEL,
};
use crate::verify;

const HOST: &str = "loop.test";

// ---------------------------------------------------------------------------
// test certificate policy: a "certificate" is ed25519 key || host

struct TestCert {
    key: [u8; 32],
    host: String,
}

struct TestPolicy {
    trust_everything: bool,
}

struct AcceptAll;

impl TrustStore<TestCert> for AcceptAll {
    fn verify(&self, _cert: &TestCert, _now: u64) -> crate::error::Result<()> {
        Ok(())
    }
}

impl CertificatePolicy for TestPolicy {
    type Cert = TestCert;

    fn parse(&self, der: &[u8]) -> crate::error::Result<TestCert> {
        if der.len() < 32 {
            return Err(Error::DecodeError);
        }
        Ok(TestCert {
            key: der[..32].try_into().map_err(|_| Error::DecodeError)?,
            host: String::from_utf8_lossy(&der[32..]).into_owned(),
        })
    }

    fn valid_for_host(&self, cert: &TestCert, host: &str) -> bool {
        cert.host == host
    }

    fn public_key(&self, cert: &TestCert) -> crate::error::Result<PublicKeyMaterial> {
        Ok(PublicKeyMaterial::Ed25519(cert.key))
    }

    fn verify_issued(&self, _issuer: &TestCert, _child: &TestCert) -> crate::error::Result<()> {
        Ok(())
    }

    fn anchors(&self) -> Option<&dyn TrustStore<TestCert>> {
        if self.trust_everything {
            Some(&AcceptAll)
        } else {
            None
        }
    }
}

fn fixed_random(buf: &mut [u8]) {
    for (i, b) in buf.iter_mut().enumerate() {
        *b = (i as u8).wrapping_mul(13).wrapping_add(7);
    }
}

fn fixed_now() -> u64 {
    1_750_000_000
}

fn test_config<'a>(
    policy: &'a TestPolicy,
    suites: &'a [CipherSuite],
    stats: Option<&'a mut NegotiatedStats>,
) -> ClientConfig<'a, TestPolicy> {
    let mut config = ClientConfig::new(HOST, policy);
    config.cipher_suites = suites;
    config.stats = stats;
    config.fill_random = fixed_random;
    config.now_unix = fixed_now;
    config
}

// ---------------------------------------------------------------------------
// wire helpers for the scripted server

fn read_record(sock: &mut TcpStream) -> ([u8; RECORD_HEADER_LEN], Vec<u8>) {
    let mut header = [0u8; RECORD_HEADER_LEN];
    sock.read_exact(&mut header).unwrap();
    let len = u16::from_be_bytes([header[3], header[4]]) as usize;
    let mut payload = vec![0u8; len];
    sock.read_exact(&mut payload).unwrap();
    (header, payload)
}

fn send_record(sock: &mut TcpStream, content_type: ContentType, payload: &[u8]) {
    let mut record = Vec::with_capacity(RECORD_HEADER_LEN + payload.len());
    put_header(&mut record, content_type, LEGACY_VERSION_TLS12, payload.len());
    record.extend_from_slice(payload);
    sock.write_all(&record).unwrap();
}

fn send_encrypted(
    sock: &mut TcpStream,
    cipher: &Cipher,
    seq: &mut u64,
    content_type: ContentType,
    payload: &[u8],
) {
    let mut record = Vec::new();
    cipher.encrypt(&mut record, *seq, content_type, payload).unwrap();
    *seq += 1;
    sock.write_all(&record).unwrap();
}

fn recv_encrypted(
    sock: &mut TcpStream,
    cipher: &Cipher,
    seq: &mut u64,
) -> (ContentType, Vec<u8>) {
    let (header, mut payload) = read_record(sock);
    let (content_type, range) = cipher.decrypt(*seq, &header, &mut payload).unwrap();
    *seq += 1;
    (content_type, payload[range].to_vec())
}

fn hs_msg(typ: u8, body: &[u8]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(4 + body.len());
    msg.push(typ);
    msg.extend_from_slice(&u24_bytes(body.len()));
    msg.extend_from_slice(body);
    msg
}

fn server_cert_der(signer: &SigningKey) -> Vec<u8> {
    let mut der = signer.verifying_key().to_bytes().to_vec();
    der.extend_from_slice(HOST.as_bytes());
    der
}

struct ParsedHello {
    random: [u8; 32],
    session_id: Vec<u8>,
    suites: Vec<u16>,
    ext_types: Vec<u16>,
    supported_versions: Vec<u16>,
    key_share_groups: Vec<u16>,
    x25519_share: Option<[u8; 32]>,
    sni: Option<String>,
}

fn parse_client_hello(payload: &[u8]) -> ParsedHello {
    assert_eq!(payload[0], super::HS_CLIENT_HELLO);
    let mut dec = Decoder::new(&payload[4..]);
    assert_eq!(dec.u16().unwrap(), 0x0303);
    let random = *dec.array::<32>().unwrap();
    let session_id = dec.opaque8().unwrap().to_vec();
    let mut suites = Vec::new();
    let mut suite_dec = Decoder::new(dec.opaque16().unwrap());
    while !suite_dec.is_empty() {
        suites.push(suite_dec.u16().unwrap());
    }
    assert_eq!(dec.opaque8().unwrap(), &[0]);

    let mut ext_types = Vec::new();
    let mut supported_versions = Vec::new();
    let mut key_share_groups = Vec::new();
    let mut x25519_share = None;
    let mut sni = None;
    let mut exts = Decoder::new(dec.opaque16().unwrap());
    dec.expect_end().unwrap();
    while !exts.is_empty() {
        let ext_type = exts.u16().unwrap();
        let body = exts.opaque16().unwrap();
        ext_types.push(ext_type);
        match ext_type {
            super::EXT_SUPPORTED_VERSIONS => {
                let mut d = Decoder::new(body);
                let mut list = Decoder::new(d.opaque8().unwrap());
                while !list.is_empty() {
                    supported_versions.push(list.u16().unwrap());
                }
            }
            super::EXT_KEY_SHARE => {
                let mut d = Decoder::new(body);
                let mut entries = Decoder::new(d.opaque16().unwrap());
                while !entries.is_empty() {
                    let group = entries.u16().unwrap();
                    let share = entries.opaque16().unwrap();
                    key_share_groups.push(group);
                    if group == 0x001d {
                        x25519_share = Some(share.try_into().unwrap());
                    }
                }
            }
            super::EXT_SERVER_NAME => {
                let mut d = Decoder::new(body);
                let mut list = Decoder::new(d.opaque16().unwrap());
                assert_eq!(list.u8().unwrap(), 0);
                sni = Some(String::from_utf8(list.opaque16().unwrap().to_vec()).unwrap());
            }
            _ => {}
        }
    }

    ParsedHello {
        random,
        session_id,
        suites,
        ext_types,
        supported_versions,
        key_share_groups,
        x25519_share,
        sni,
    }
}

// ---------------------------------------------------------------------------
// scripted TLS 1.3 server

#[derive(Default)]
struct Opts13 {
    hello_retry: bool,
    tamper_finished: bool,
    split_certificate: bool,
    send_ticket: bool,
    key_update: bool,
}

fn serve_13(listener: TcpListener, opts: Opts13) -> JoinHandle<()> {
    thread::spawn(move || {
        const SUITE: CipherSuite = CipherSuite::Aes128GcmSha256;
        let (mut sock, _) = listener.accept().unwrap();

        let (_, ch_payload) = read_record(&mut sock);
        let hello = parse_client_hello(&ch_payload);
        assert_eq!(hello.sni.as_deref(), Some(HOST));
        let mut transcript = Transcript::new();
        transcript.update(&ch_payload);

        let server_x = XSecret::from([9u8; 32]);
        let random: [u8; 32] = if opts.hello_retry {
            HELLO_RETRY_SENTINEL
        } else {
            [7u8; 32]
        };

        let mut sh_body = Vec::new();
        sh_body.extend_from_slice(&0x0303u16.to_be_bytes());
        sh_body.extend_from_slice(&random);
        sh_body.push(hello.session_id.len() as u8);
        sh_body.extend_from_slice(&hello.session_id);
        sh_body.extend_from_slice(&(SUITE as u16).to_be_bytes());
        sh_body.push(0);
        let mut exts = Vec::new();
        exts.extend_from_slice(&super::EXT_SUPPORTED_VERSIONS.to_be_bytes());
        exts.extend_from_slice(&2u16.to_be_bytes());
        exts.extend_from_slice(&super::VERSION_TLS13.to_be_bytes());
        exts.extend_from_slice(&super::EXT_KEY_SHARE.to_be_bytes());
        exts.extend_from_slice(&36u16.to_be_bytes());
        exts.extend_from_slice(&0x001du16.to_be_bytes());
        exts.extend_from_slice(&32u16.to_be_bytes());
        exts.extend_from_slice(XPublicKey::from(&server_x).as_bytes());
        sh_body.extend_from_slice(&(exts.len() as u16).to_be_bytes());
        sh_body.extend_from_slice(&exts);
        let sh = hs_msg(super::HS_SERVER_HELLO, &sh_body);
        send_record(&mut sock, ContentType::Handshake, &sh);
        if opts.hello_retry {
            return;
        }
        transcript.update(&sh);
        transcript.select(HashAlgo::Sha256);

        let client_share = hello.x25519_share.expect("client offered no x25519 share");
        let shared = server_x.diffie_hellman(&XPublicKey::from(client_share));
        let hello_hash = transcript.current();
        let hs_keys = Cipher::init_13_handshake(SUITE, shared.as_bytes(), &hello_hash).unwrap();
        let hs_wire = Cipher::init_13_handshake(SUITE, shared.as_bytes(), &hello_hash)
            .unwrap()
            .into_swapped();
        let mut send_seq = 0u64;
        let mut recv_seq = 0u64;

        // middlebox-compatibility CCS ahead of the protected flight
        send_record(&mut sock, ContentType::ChangeCipherSpec, &[1]);

        let ee = hs_msg(super::HS_ENCRYPTED_EXTENSIONS, &0u16.to_be_bytes());
        send_encrypted(&mut sock, &hs_wire, &mut send_seq, ContentType::Handshake, &ee);
        transcript.update(&ee);

        let signer = SigningKey::from_bytes(&[33u8; 32]);
        let cert_der = server_cert_der(&signer);
        let mut cert_body = vec![0u8]; // empty request context
        let mut entry = Vec::new();
        entry.extend_from_slice(&u24_bytes(cert_der.len()));
        entry.extend_from_slice(&cert_der);
        entry.extend_from_slice(&0u16.to_be_bytes());
        cert_body.extend_from_slice(&u24_bytes(entry.len()));
        cert_body.extend_from_slice(&entry);
        let cert = hs_msg(super::HS_CERTIFICATE, &cert_body);
        if opts.split_certificate {
            // one handshake message across two protected records
            let (left, right) = cert.split_at(cert.len() / 2);
            send_encrypted(&mut sock, &hs_wire, &mut send_seq, ContentType::Handshake, left);
            send_encrypted(&mut sock, &hs_wire, &mut send_seq, ContentType::Handshake, right);
        } else {
            send_encrypted(&mut sock, &hs_wire, &mut send_seq, ContentType::Handshake, &cert);
        }
        transcript.update(&cert);

        let signed = verify::certificate_verify_message(&transcript.current());
        let signature = signer.sign(&signed);
        let mut cv_body = 0x0807u16.to_be_bytes().to_vec();
        cv_body.extend_from_slice(&64u16.to_be_bytes());
        cv_body.extend_from_slice(&signature.to_bytes());
        let cv = hs_msg(super::HS_CERTIFICATE_VERIFY, &cv_body);
        send_encrypted(&mut sock, &hs_wire, &mut send_seq, ContentType::Handshake, &cv);
        transcript.update(&cv);

        let mut verify_data = hs_keys.server_finished_13(&transcript.current());
        if opts.tamper_finished {
            verify_data[0] ^= 1;
        }
        let fin = hs_msg(super::HS_FINISHED, &verify_data);
        send_encrypted(&mut sock, &hs_wire, &mut send_seq, ContentType::Handshake, &fin);
        if opts.tamper_finished {
            return;
        }
        transcript.update(&fin);

        let finished_hash = transcript.current();
        let app_wire = hs_keys
            .init_13_application(&finished_hash)
            .unwrap()
            .into_swapped();

        // client answers with compatibility CCS then its Finished
        loop {
            let (header, mut payload) = read_record(&mut sock);
            if header[0] == ContentType::ChangeCipherSpec as u8 {
                continue;
            }
            let (content_type, range) = hs_wire.decrypt(recv_seq, &header, &mut payload).unwrap();
            recv_seq += 1;
            assert_eq!(content_type, ContentType::Handshake);
            let client_fin = payload[range].to_vec();
            assert_eq!(client_fin[0], super::HS_FINISHED);
            let expected = hs_keys.client_finished_13(&transcript.current());
            assert_eq!(&client_fin[4..], expected.as_slice());
            break;
        }

        let mut app_wire = app_wire;
        let mut app_send = 0u64;
        let mut app_recv = 0u64;

        if opts.send_ticket {
            let ticket = hs_msg(super::HS_NEW_SESSION_TICKET, &[0xaa; 23]);
            send_encrypted(&mut sock, &app_wire, &mut app_send, ContentType::Handshake, &ticket);
        }

        // echo the first application record
        let (content_type, data) = recv_encrypted(&mut sock, &app_wire, &mut app_recv);
        assert_eq!(content_type, ContentType::ApplicationData);
        send_encrypted(&mut sock, &app_wire, &mut app_send, ContentType::ApplicationData, &data);

        if opts.key_update {
            // request an update, then ratchet our send direction
            let ku = hs_msg(super::HS_KEY_UPDATE, &[1]);
            send_encrypted(&mut sock, &app_wire, &mut app_send, ContentType::Handshake, &ku);
            app_wire.update_client_key().unwrap();
            app_send = 0;

            // the client's answering key_update arrives under its old key
            let (content_type, reply) = recv_encrypted(&mut sock, &app_wire, &mut app_recv);
            assert_eq!(content_type, ContentType::Handshake);
            assert_eq!(reply, hs_msg(super::HS_KEY_UPDATE, &[0]));
            app_wire.update_server_key().unwrap();
            app_recv = 0;

            send_encrypted(
                &mut sock,
                &app_wire,
                &mut app_send,
                ContentType::ApplicationData,
                b"post-update",
            );
        }

        // client close_notify, answered in kind
        let (content_type, alert) = recv_encrypted(&mut sock, &app_wire, &mut app_recv);
        assert_eq!(content_type, ContentType::Alert);
        assert_eq!(alert, vec![1, 0]);
        send_encrypted(&mut sock, &app_wire, &mut app_send, ContentType::Alert, &[1, 0]);
    })
}

// ---------------------------------------------------------------------------
// scripted TLS 1.2 server (ECDHE + CBC suite)

fn serve_12(listener: TcpListener) -> JoinHandle<()> {
    thread::spawn(move || {
        const SUITE: CipherSuite = CipherSuite::EcdheEcdsaAes128CbcSha;
        let (mut sock, _) = listener.accept().unwrap();

        let (_, ch_payload) = read_record(&mut sock);
        let hello = parse_client_hello(&ch_payload);
        let mut transcript = Transcript::new();
        transcript.update(&ch_payload);

        let server_random = [7u8; 32];
        let mut sh_body = Vec::new();
        sh_body.extend_from_slice(&0x0303u16.to_be_bytes());
        sh_body.extend_from_slice(&server_random);
        sh_body.push(0);
        sh_body.extend_from_slice(&(SUITE as u16).to_be_bytes());
        sh_body.push(0);
        let sh = hs_msg(super::HS_SERVER_HELLO, &sh_body);
        send_record(&mut sock, ContentType::Handshake, &sh);
        transcript.update(&sh);
        transcript.select(HashAlgo::Sha256);

        let signer = SigningKey::from_bytes(&[44u8; 32]);
        let cert_der = server_cert_der(&signer);
        let mut chain = Vec::new();
        chain.extend_from_slice(&u24_bytes(cert_der.len()));
        chain.extend_from_slice(&cert_der);
        let mut cert_body = Vec::new();
        cert_body.extend_from_slice(&u24_bytes(chain.len()));
        cert_body.extend_from_slice(&chain);
        let cert = hs_msg(super::HS_CERTIFICATE, &cert_body);
        send_record(&mut sock, ContentType::Handshake, &cert);
        transcript.update(&cert);

        let server_x = XSecret::from([5u8; 32]);
        let server_pub = XPublicKey::from(&server_x);
        let mut params = vec![3u8];
        params.extend_from_slice(&0x001du16.to_be_bytes());
        params.push(32);
        params.extend_from_slice(server_pub.as_bytes());
        let mut signed = hello.random.to_vec();
        signed.extend_from_slice(&server_random);
        signed.extend_from_slice(&params);
        let signature = signer.sign(&signed);
        let mut ske_body = params.clone();
        ske_body.extend_from_slice(&0x0807u16.to_be_bytes());
        ske_body.extend_from_slice(&64u16.to_be_bytes());
        ske_body.extend_from_slice(&signature.to_bytes());
        let ske = hs_msg(super::HS_SERVER_KEY_EXCHANGE, &ske_body);
        send_record(&mut sock, ContentType::Handshake, &ske);
        transcript.update(&ske);

        let done = hs_msg(super::HS_SERVER_HELLO_DONE, &[]);
        send_record(&mut sock, ContentType::Handshake, &done);
        transcript.update(&done);

        // ClientKeyExchange
        let (header, cke_payload) = read_record(&mut sock);
        assert_eq!(header[0], ContentType::Handshake as u8);
        assert_eq!(cke_payload[0], super::HS_CLIENT_KEY_EXCHANGE);
        transcript.update(&cke_payload);
        let mut dec = Decoder::new(&cke_payload[4..]);
        let client_pub: [u8; 32] = dec.opaque8().unwrap().try_into().unwrap();
        let shared = server_x.diffie_hellman(&XPublicKey::from(client_pub));

        let master = master_secret(
            HashAlgo::Sha256,
            shared.as_bytes(),
            &hello.random,
            &server_random,
        );
        let material = key_material(
            HashAlgo::Sha256,
            &master,
            &hello.random,
            &server_random,
            SUITE.key_material_len(),
        );
        let wire = Cipher::init_12(SUITE, &material, fixed_random)
            .unwrap()
            .into_swapped();

        // client CCS then its Finished under sequence zero
        let (header, _) = read_record(&mut sock);
        assert_eq!(header[0], ContentType::ChangeCipherSpec as u8);
        let mut recv_seq = 0u64;
        let (content_type, client_fin) = recv_encrypted(&mut sock, &wire, &mut recv_seq);
        assert_eq!(content_type, ContentType::Handshake);
        assert_eq!(client_fin[0], super::HS_FINISHED);
        let expected = finished_verify(
            HashAlgo::Sha256,
            &master,
            CLIENT_FINISHED_LABEL,
            &transcript.current(),
        );
        assert_eq!(&client_fin[4..], &expected);
        transcript.update(&client_fin);

        send_record(&mut sock, ContentType::ChangeCipherSpec, &[1]);
        let verify_data = finished_verify(
            HashAlgo::Sha256,
            &master,
            SERVER_FINISHED_LABEL,
            &transcript.current(),
        );
        let fin = hs_msg(super::HS_FINISHED, &verify_data);
        let mut send_seq = 0u64;
        send_encrypted(&mut sock, &wire, &mut send_seq, ContentType::Handshake, &fin);

        // echo one record, then answer the close
        let (content_type, data) = recv_encrypted(&mut sock, &wire, &mut recv_seq);
        assert_eq!(content_type, ContentType::ApplicationData);
        send_encrypted(&mut sock, &wire, &mut send_seq, ContentType::ApplicationData, &data);

        let (content_type, alert) = recv_encrypted(&mut sock, &wire, &mut recv_seq);
        assert_eq!(content_type, ContentType::Alert);
        assert_eq!(alert, vec![1, 0]);
        send_encrypted(&mut sock, &wire, &mut send_seq, ContentType::Alert, &[1, 0]);
    })
}

fn loopback() -> (TcpListener, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    // connect after spawning the acceptor; the OS backlog makes this safe in
    // either order
    let sock = TcpStream::connect(addr).unwrap();
    (listener, sock)
}

// ---------------------------------------------------------------------------
// the scenarios

#[test]
fn tls13_full_handshake_ticket_skip_and_echo() {
    let (listener, mut sock) = loopback();
    let server = serve_13(
        listener,
        Opts13 {
            split_certificate: true,
            send_ticket: true,
            ..Opts13::default()
        },
    );

    let policy = TestPolicy {
        trust_everything: true,
    };
    let mut stats = NegotiatedStats::default();
    let config = test_config(
        &policy,
        &[CipherSuite::Aes128GcmSha256],
        Some(&mut stats),
    );
    let mut session = connect(&mut sock, config).unwrap();
    assert_eq!(session.version(), 0x0304);

    session.write(b"hello riptide").unwrap();
    // the session ticket in front of the echo is skipped transparently
    let got = session.read().unwrap().unwrap().to_vec();
    assert_eq!(got, b"hello riptide");

    session.close().unwrap();
    assert!(session.read().unwrap().is_none());

    assert_eq!(
        stats,
        NegotiatedStats {
            version: 0x0304,
            cipher_suite: 0x1301,
            named_group: 0x001d,
            signature_scheme: 0x0807,
        }
    );
    server.join().unwrap();
}

#[test]
fn tls13_key_update_is_transparent() {
    let (listener, mut sock) = loopback();
    let server = serve_13(
        listener,
        Opts13 {
            key_update: true,
            ..Opts13::default()
        },
    );

    let policy = TestPolicy {
        trust_everything: false,
    };
    let config = test_config(&policy, &[CipherSuite::Aes128GcmSha256], None);
    let mut session = connect(&mut sock, config).unwrap();

    session.write(b"one").unwrap();
    assert_eq!(session.read().unwrap().unwrap(), b"one");
    // the server's key_update request is handled inside read()
    assert_eq!(session.read().unwrap().unwrap(), b"post-update");

    session.close().unwrap();
    server.join().unwrap();
}

#[test]
fn tls13_tampered_finished_is_rejected() {
    let (listener, mut sock) = loopback();
    let server = serve_13(
        listener,
        Opts13 {
            tamper_finished: true,
            ..Opts13::default()
        },
    );

    let policy = TestPolicy {
        trust_everything: false,
    };
    let config = test_config(&policy, &[CipherSuite::Aes128GcmSha256], None);
    assert!(matches!(
        connect(&mut sock, config),
        Err(Error::DecryptError)
    ));
    server.join().unwrap();
}

#[test]
fn hello_retry_request_is_surfaced() {
    let (listener, mut sock) = loopback();
    let server = serve_13(
        listener,
        Opts13 {
            hello_retry: true,
            ..Opts13::default()
        },
    );

    let policy = TestPolicy {
        trust_everything: false,
    };
    let config = test_config(&policy, &[CipherSuite::Aes128GcmSha256], None);
    assert!(matches!(
        connect(&mut sock, config),
        Err(Error::ServerHelloRetryRequest)
    ));
    server.join().unwrap();
}

#[test]
fn fatal_alert_during_handshake() {
    let (listener, mut sock) = loopback();
    let server = thread::spawn(move || {
        let (mut peer, _) = listener.accept().unwrap();
        let _ = read_record(&mut peer);
        send_record(&mut peer, ContentType::Alert, &[2, 40]);
    });

    let policy = TestPolicy {
        trust_everything: false,
    };
    let config = test_config(&policy, &[CipherSuite::Aes128GcmSha256], None);
    assert!(matches!(
        connect(&mut sock, config),
        Err(Error::AlertReceived(AlertDescription::HandshakeFailure))
    ));
    server.join().unwrap();
}

#[test]
fn tls12_full_handshake_and_echo() {
    let (listener, mut sock) = loopback();
    let server = serve_12(listener);

    let policy = TestPolicy {
        trust_everything: true,
    };
    let mut stats = NegotiatedStats::default();
    let config = test_config(
        &policy,
        &[
            CipherSuite::Aes128GcmSha256,
            CipherSuite::EcdheEcdsaAes128CbcSha,
        ],
        Some(&mut stats),
    );
    let mut session = connect(&mut sock, config).unwrap();
    assert_eq!(session.version(), 0x0303);

    session.write(b"ping").unwrap();
    assert_eq!(session.read().unwrap().unwrap(), b"ping");

    session.close().unwrap();
    assert!(session.read().unwrap().is_none());

    assert_eq!(
        stats,
        NegotiatedStats {
            version: 0x0303,
            cipher_suite: 0xc009,
            named_group: 0x001d,
            signature_scheme: 0x0807,
        }
    );
    server.join().unwrap();
}

// ---------------------------------------------------------------------------
// ClientHello shape, checked without a peer

struct Sink {
    sent: Vec<u8>,
}

impl Read for Sink {
    fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
        Ok(0)
    }
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.sent.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn captured_hello(suites: &[CipherSuite], disable_hybrid: bool) -> Vec<u8> {
    let policy = TestPolicy {
        trust_everything: false,
    };
    let mut config = test_config(&policy, suites, None);
    config.disable_hybrid_kex = disable_hybrid;
    let mut sink = Sink { sent: Vec::new() };
    let mut reader = crate::record::RecordReader::new();
    let mut handshake = super::Handshake::new(&mut sink, &mut reader, &mut config).unwrap();
    handshake.send_client_hello().unwrap();
    drop(handshake);
    sink.sent
}

#[test]
fn client_hello_is_deterministic() {
    let suites = [CipherSuite::Aes128GcmSha256, CipherSuite::EcdheRsaAes128GcmSha256];
    let first = captured_hello(&suites, false);
    let second = captured_hello(&suites, false);
    assert_eq!(first, second);
    assert_eq!(&first[..3], &[22, 0x03, 0x01]);
}

#[test]
fn client_hello_extension_order_and_contents() {
    let hello = captured_hello(
        &[CipherSuite::Aes128GcmSha256, CipherSuite::EcdheRsaAes128GcmSha256],
        false,
    );
    let parsed = parse_client_hello(&hello[RECORD_HEADER_LEN..]);

    assert_eq!(
        parsed.ext_types,
        vec![
            super::EXT_SUPPORTED_VERSIONS,
            super::EXT_EC_POINT_FORMATS,
            super::EXT_RENEGOTIATION_INFO,
            super::EXT_SCT,
            super::EXT_SIGNATURE_ALGORITHMS,
            super::EXT_SUPPORTED_GROUPS,
            super::EXT_KEY_SHARE,
            super::EXT_SERVER_NAME,
        ]
    );
    assert_eq!(parsed.supported_versions, vec![0x0304, 0x0303]);
    assert_eq!(parsed.suites, vec![0x1301, 0xc02f]);
    assert_eq!(parsed.key_share_groups, vec![0x001d, 0x0017, 0x0018, 0x6399]);
    assert_eq!(parsed.sni.as_deref(), Some(HOST));
    assert!(parsed.x25519_share.is_some());
    assert_eq!(parsed.session_id, Vec::<u8>::new());
    // deterministic random source fills the client random
    let mut expected_random = [0u8; 32];
    fixed_random(&mut expected_random);
    assert_eq!(parsed.random, expected_random);
}

#[test]
fn hybrid_group_can_be_disabled() {
    let hello = captured_hello(&[CipherSuite::Aes128GcmSha256], true);
    let parsed = parse_client_hello(&hello[RECORD_HEADER_LEN..]);
    assert_eq!(parsed.key_share_groups, vec![0x001d, 0x0017, 0x0018]);
}

#[test]
fn tls12_only_offer_has_no_key_share() {
    let hello = captured_hello(&[CipherSuite::EcdheRsaAes128GcmSha256], false);
    let parsed = parse_client_hello(&hello[RECORD_HEADER_LEN..]);
    assert!(!parsed.ext_types.contains(&super::EXT_KEY_SHARE));
    assert_eq!(parsed.supported_versions, vec![0x0303]);
}

#[test]
fn empty_suite_list_is_rejected() {
    let policy = TestPolicy {
        trust_everything: false,
    };
    let mut config = test_config(&policy, &[], None);
    let mut sink = Sink { sent: Vec::new() };
    let mut reader = crate::record::RecordReader::new();
    assert!(matches!(
        super::Handshake::new(&mut sink, &mut reader, &mut config),
        Err(Error::IllegalParameter)
    ));
}
