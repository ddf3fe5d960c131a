//! Plain-TCP / TLS transport used by the [`Runtime`](crate::runtime::Runtime).
//!
//! Grounded on a `StreamType`/`OwnedTlsStream` split (a plain `TcpStream`
//! vs. an owned `rustls::ClientConnection` wrapper), trimmed to the single
//! concern this crate needs: one duplex byte stream that can be upgraded
//! from plain to TLS in place after STARTTLS.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore};

use crate::error::{Error, Result};

struct OwnedTlsStream {
    conn: ClientConnection,
    sock: TcpStream,
}

impl Read for OwnedTlsStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        rustls::Stream::new(&mut self.conn, &mut self.sock).read(buf)
    }
}

impl Write for OwnedTlsStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        rustls::Stream::new(&mut self.conn, &mut self.sock).write(buf)
    }
    fn flush(&mut self) -> io::Result<()> {
        rustls::Stream::new(&mut self.conn, &mut self.sock).flush()
    }
}

enum Stream {
    Plain(TcpStream),
    Tls(OwnedTlsStream),
}

/// A single duplex connection to the host, optionally upgraded to TLS.
///
/// `stream` is `Option`-wrapped so `upgrade_to_tls` can `take()` the plain
/// socket out, consume it building the TLS connection, and put the result
/// back -- without ever needing a placeholder value to satisfy the borrow
/// checker in between.
pub struct Transport {
    stream: Option<Stream>,
    verify_cert: bool,
    ca_bundle_path: Option<std::path::PathBuf>,
}

impl Transport {
    /// Open a plain TCP connection to `host:port` within `connect_timeout`.
    pub fn connect(host: &str, port: u16, connect_timeout: Duration) -> Result<Self> {
        let addr = format!("{host}:{port}");
        let mut addrs = addr
            .to_socket_addrs_checked()
            .map_err(|e| Error::TransportLost { reason: e.to_string() })?;
        let socket_addr = addrs
            .next()
            .ok_or_else(|| Error::TransportLost { reason: format!("no address for {addr}") })?;
        let sock = TcpStream::connect_timeout(&socket_addr, connect_timeout)?;
        sock.set_nodelay(true).ok();
        Ok(Self { stream: Some(Stream::Plain(sock)), verify_cert: true, ca_bundle_path: None })
    }

    pub fn set_tls_policy(&mut self, verify_cert: bool, ca_bundle_path: Option<std::path::PathBuf>) {
        self.verify_cert = verify_cert;
        self.ca_bundle_path = ca_bundle_path;
    }

    pub fn set_read_timeout(&self, dur: Option<Duration>) -> Result<()> {
        match self.stream.as_ref() {
            Some(Stream::Plain(s)) => s.set_read_timeout(dur)?,
            Some(Stream::Tls(s)) => s.sock.set_read_timeout(dur)?,
            None => return Err(Error::TransportLost { reason: "no transport attached".into() }),
        }
        Ok(())
    }

    /// Upgrade an in-place plain connection to TLS, per the Telnet STARTTLS
    /// flow. Fails the session (`TlsNegotiationFailed`) on any handshake
    /// error.
    pub fn upgrade_to_tls(&mut self, server_name: &str) -> Result<()> {
        let sock = match self.stream.take() {
            Some(Stream::Plain(s)) => s,
            Some(tls @ Stream::Tls(_)) => {
                self.stream = Some(tls); // already upgraded; idempotent
                return Ok(());
            }
            None => return Err(Error::TransportLost { reason: "no transport attached".into() }),
        };
        let mut roots = RootCertStore::empty();
        roots.extend(rustls_native_certs::load_native_certs().certs);
        if let Some(path) = &self.ca_bundle_path {
            load_pem_bundle(&mut roots, path)?;
        }
        let config = if self.verify_cert {
            ClientConfig::builder().with_root_certificates(roots).with_no_client_auth()
        } else {
            ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoCertVerification))
                .with_no_client_auth()
        };
        let name = ServerName::try_from(server_name.to_string())
            .map_err(|e| Error::TlsNegotiationFailed { reason: e.to_string() })?;
        let conn = ClientConnection::new(Arc::new(config), name)
            .map_err(|e| Error::TlsNegotiationFailed { reason: e.to_string() })?;
        debug!("transport: TLS handshake established for {server_name}");
        self.stream = Some(Stream::Tls(OwnedTlsStream { conn, sock }));
        Ok(())
    }

    pub fn is_tls(&self) -> bool {
        matches!(self.stream, Some(Stream::Tls(_)))
    }
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.stream.as_mut() {
            Some(Stream::Plain(s)) => s.read(buf),
            Some(Stream::Tls(s)) => s.read(buf),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "no transport attached")),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.stream.as_mut() {
            Some(Stream::Plain(s)) => s.write(buf),
            Some(Stream::Tls(s)) => s.write(buf),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "no transport attached")),
        }
    }
    fn flush(&mut self) -> io::Result<()> {
        match self.stream.as_mut() {
            Some(Stream::Plain(s)) => s.flush(),
            Some(Stream::Tls(s)) => s.flush(),
            None => Ok(()),
        }
    }
}

fn load_pem_bundle(roots: &mut RootCertStore, path: &std::path::Path) -> Result<()> {
    let bytes = std::fs::read(path)?;
    let mut reader = std::io::Cursor::new(bytes);
    for cert in rustls_pemfile::certs(&mut reader) {
        let cert = cert.map_err(|e| Error::TlsNegotiationFailed { reason: e.to_string() })?;
        roots.add(cert).map_err(|e| Error::TlsNegotiationFailed { reason: e.to_string() })?;
    }
    Ok(())
}

#[derive(Debug)]
struct NoCertVerification;

impl rustls::client::danger::ServerCertVerifier for NoCertVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureVerified, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureVerified::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureVerified, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureVerified::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider().signature_verification_algorithms.supported_schemes()
    }
}

trait ToSocketAddrsChecked {
    fn to_socket_addrs_checked(&self) -> io::Result<std::vec::IntoIter<std::net::SocketAddr>>;
}

impl ToSocketAddrsChecked for str {
    fn to_socket_addrs_checked(&self) -> io::Result<std::vec::IntoIter<std::net::SocketAddr>> {
        use std::net::ToSocketAddrs;
        Ok(self.to_socket_addrs()?.collect::<Vec<_>>().into_iter())
    }
}
