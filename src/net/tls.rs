//! TLS session encryption via the one-byte SSLRequest negotiation.
use std::sync::Arc;

use bytes::BytesMut;
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_rustls::{
    TlsConnector,
    rustls::{
        self, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
        client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        crypto::CryptoProvider,
    },
};

use super::{Socket, socket};
use crate::{
    Result,
    connection::{Config, ParseError, SslMode},
    error::ErrorKind,
    postgres::{ProtocolError, frontend},
};

/// Dial the configured endpoint and negotiate session encryption.
///
/// To initiate an SSL-encrypted connection, the frontend initially sends an
/// SSLRequest message rather than a StartupMessage. The server then responds
/// with a single byte containing S or N, indicating that it is willing or
/// unwilling to perform SSL, respectively.
///
/// On `'N'` the `prefer` mode continues in plaintext; `require` and the
/// `verify-*` modes fail before any StartupMessage is sent.
pub(crate) async fn establish(config: &Config) -> Result<Socket> {
    let mut socket = socket::dial(config.host.as_str(), config.port, config.connect_timeout).await?;

    if let SslMode::Disable | SslMode::Allow = config.ssl_mode {
        return Ok(Socket::plain(socket));
    }

    let mut buf = BytesMut::with_capacity(8);
    frontend::SslRequest.write(&mut buf);
    socket.write_all(&buf).await?;

    match socket.read_u8().await? {
        b'S' => {
            let server_name = ServerName::try_from(config.host.as_str().to_owned())
                .map_err(|_| ParseError::new("host is not a valid TLS server name"))?;
            let stream = connector(config.ssl_mode)
                .connect(server_name, socket)
                .await?;
            Ok(Socket::tls(stream))
        }
        b'N' if matches!(config.ssl_mode, SslMode::Prefer) => Ok(Socket::plain(socket)),
        b'N' => Err(ErrorKind::TlsRefused.into()),
        other => Err(ProtocolError::unexpected_phase(other, "ssl negotiation").into()),
    }
}

fn connector(mode: SslMode) -> TlsConnector {
    let config = match mode {
        // Chain validation against the webpki trust anchors; rustls verifies
        // the server name as part of it, which covers verify-full.
        SslMode::VerifyCa | SslMode::VerifyFull => {
            let roots = RootCertStore {
                roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
            };
            ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth()
        }
        // prefer/require only ask for session encryption, not authentication,
        // matching what libpq promises for those modes.
        _ => ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerification::new()))
            .with_no_client_auth(),
    };
    TlsConnector::from(Arc::new(config))
}

/// Accepts whatever certificate the server presents.
///
/// Signatures are still checked against the certificate, only the chain and
/// the server name are not.
#[derive(Debug)]
struct NoVerification(CryptoProvider);

impl NoVerification {
    fn new() -> Self {
        Self(rustls::crypto::aws_lc_rs::default_provider())
    }
}

impl ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
