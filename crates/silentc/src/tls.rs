use crate::error::SessionError;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use silent_common::fingerprint::{check_pin, fingerprint, format_fingerprint, PinStatus};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::{timeout_at, Instant};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

/// Produces a fresh, verified transport for each connection attempt.
pub trait Dialer: Send + Sync {
    /// Stream type handed to the session.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Opens a transport that is ready for application data.
    fn dial(&self) -> impl Future<Output = Result<Self::Stream, SessionError>> + Send;
}

/// Accepts any certificate chain but still checks handshake signatures.
///
/// Trust comes from the fingerprint pin, which is checked once the
/// handshake completes.
#[derive(Debug)]
struct PinnedCertVerifier {
    algorithms: WebPkiSupportedAlgorithms,
}

impl ServerCertVerifier for PinnedCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

/// Builds the rustls client configuration used for every attempt.
///
/// # Errors
///
/// Returns an error if the ring provider rejects the default protocol versions.
pub fn client_config() -> Result<rustls::ClientConfig, rustls::Error> {
    let provider = rustls::crypto::ring::default_provider();
    let verifier = PinnedCertVerifier {
        algorithms: provider.signature_verification_algorithms,
    };
    let config = rustls::ClientConfig::builder_with_provider(Arc::new(provider))
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();
    Ok(config)
}

/// Checks the peer's leaf certificate against an optional pin.
///
/// Returns the hex fingerprint of the presented certificate.
///
/// # Errors
///
/// [`SessionError::NoCertificate`] when the peer sent no certificate and
/// [`SessionError::FingerprintMismatch`] when a pin is set and differs.
pub fn verify_peer(
    certs: Option<&[CertificateDer<'_>]>,
    pin: Option<&str>,
) -> Result<String, SessionError> {
    let leaf = certs
        .and_then(|chain| chain.first())
        .ok_or(SessionError::NoCertificate)?;
    let actual = fingerprint(leaf.as_ref());

    match check_pin(&actual, pin)? {
        PinStatus::Verified => {
            info!(
                fingerprint = %format_fingerprint(&actual),
                "server certificate matches pinned fingerprint"
            );
        }
        PinStatus::Unpinned => {
            warn!(
                fingerprint = %actual,
                formatted = %format_fingerprint(&actual),
                "no fingerprint pinned, connection is open to interception; pin this value to verify future connections"
            );
        }
    }

    Ok(actual)
}

/// Dials the chat server over TCP + TLS and verifies its certificate pin.
#[derive(Clone)]
pub struct TlsDialer {
    host: String,
    port: u16,
    pin: Option<String>,
    timeout: Duration,
    connector: TlsConnector,
}

impl TlsDialer {
    /// Creates a dialer for `host:port`.
    ///
    /// `timeout` bounds the TCP connect and TLS handshake together.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS configuration cannot be built.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        pin: Option<String>,
        timeout: Duration,
    ) -> Result<Self, rustls::Error> {
        Ok(Self {
            host: host.into(),
            port,
            pin,
            timeout,
            connector: TlsConnector::from(Arc::new(client_config()?)),
        })
    }

    /// Target address as `host:port`.
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Dialer for TlsDialer {
    type Stream = TlsStream<TcpStream>;

    async fn dial(&self) -> Result<Self::Stream, SessionError> {
        let addr = self.addr();
        let deadline = Instant::now() + self.timeout;

        debug!(%addr, "dialing");
        let tcp = match timeout_at(deadline, TcpStream::connect(&addr)).await {
            Ok(Ok(tcp)) => tcp,
            Ok(Err(e)) => {
                return Err(SessionError::Dial {
                    addr,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(SessionError::Dial {
                    addr,
                    reason: "timed out".to_string(),
                })
            }
        };
        if let Err(e) = tcp.set_nodelay(true) {
            debug!(error = %e, "failed to set TCP_NODELAY");
        }

        let server_name = ServerName::try_from(self.host.clone())
            .map_err(|e| SessionError::Handshake(format!("invalid server name: {e}")))?;
        let tls = match timeout_at(deadline, self.connector.connect(server_name, tcp)).await {
            Ok(Ok(tls)) => tls,
            Ok(Err(e)) => return Err(SessionError::Handshake(e.to_string())),
            Err(_) => return Err(SessionError::Handshake("timed out".to_string())),
        };

        let (_, conn) = tls.get_ref();
        verify_peer(conn.peer_certificates(), self.pin.as_deref())?;

        Ok(tls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cert(bytes: &'static [u8]) -> CertificateDer<'static> {
        CertificateDer::from(bytes)
    }

    #[test]
    fn missing_certificate_is_rejected() {
        assert!(matches!(
            verify_peer(None, None),
            Err(SessionError::NoCertificate)
        ));
        assert!(matches!(
            verify_peer(Some(&[][..]), None),
            Err(SessionError::NoCertificate)
        ));
    }

    #[test]
    fn unpinned_peer_is_accepted_and_reported() {
        let chain = [cert(b"leaf"), cert(b"intermediate")];
        let fp = verify_peer(Some(&chain[..]), None).unwrap();
        assert_eq!(fp, fingerprint(b"leaf"));
    }

    #[test]
    fn matching_pin_is_accepted_in_any_case_and_format() {
        let chain = [cert(b"leaf")];
        let pin = format_fingerprint(&fingerprint(b"leaf")).to_uppercase();
        assert!(verify_peer(Some(&chain[..]), Some(&pin)).is_ok());
    }

    #[test]
    fn pin_mismatch_is_fatal_for_the_attempt() {
        let chain = [cert(b"leaf")];
        let pin = fingerprint(b"other");
        match verify_peer(Some(&chain[..]), Some(&pin)) {
            Err(SessionError::FingerprintMismatch(m)) => {
                assert_eq!(m.expected, pin);
                assert_eq!(m.actual, fingerprint(b"leaf"));
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
    }

    #[test]
    fn pin_is_checked_against_leaf_only() {
        let chain = [cert(b"leaf"), cert(b"intermediate")];
        let pin = fingerprint(b"intermediate");
        assert!(verify_peer(Some(&chain[..]), Some(&pin)).is_err());
    }

    #[test]
    fn client_config_builds_with_ring_provider() {
        assert!(client_config().is_ok());
    }

    #[tokio::test]
    async fn dial_refused_maps_to_dial_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let dialer = TlsDialer::new("127.0.0.1", port, None, Duration::from_secs(2)).unwrap();
        assert!(matches!(
            dialer.dial().await,
            Err(SessionError::Dial { .. })
        ));
    }

    #[tokio::test]
    async fn non_tls_peer_maps_to_handshake_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let _ = tokio::io::AsyncWriteExt::write_all(&mut sock, b"HTTP/1.0 400\r\n\r\n").await;
        });

        let dialer = TlsDialer::new("127.0.0.1", port, None, Duration::from_secs(2)).unwrap();
        assert!(matches!(
            dialer.dial().await,
            Err(SessionError::Handshake(_))
        ));
    }
}
