//! SMTP client half: the connection from the proxy to the upstream relay.

use crate::proto::smtp::{Reply, parse_reply_line, read_line};
use crate::{Error, Result};
use bytes::BytesMut;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

/// Any bidirectional byte stream the client can drive, plain or TLS.
pub trait AsyncReadAndWrite: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncReadAndWrite for T {}

pub type BoxedStream = Box<dyn AsyncReadAndWrite>;

/// SMTP client connection to the upstream server
pub struct UpstreamClient {
    stream: Option<BoxedStream>,
    host: String,
    buf: BytesMut,
    capabilities: Vec<String>,
    tls: bool,
}

impl UpstreamClient {
    /// Dial `addr` (`host:port`) and read the 220 greeting.
    pub async fn connect(addr: &str) -> Result<(Self, Reply)> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let host = split_host(addr).to_string();
        let mut client = Self::with_stream(Box::new(stream), host);
        let greeting = client.expect_reply(220).await?;
        Ok((client, greeting))
    }

    /// Wrap an already connected stream. No greeting is read.
    pub fn with_stream(stream: BoxedStream, host: impl Into<String>) -> Self {
        Self {
            stream: Some(stream),
            host: host.into(),
            buf: BytesMut::with_capacity(1024),
            capabilities: Vec::new(),
            tls: false,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn is_tls(&self) -> bool {
        self.tls
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Extensions advertised in the last EHLO reply
    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities.iter().any(|c| {
            c.split_whitespace()
                .next()
                .is_some_and(|keyword| keyword.eq_ignore_ascii_case(name))
        })
    }

    /// Drop the connection. Further commands fail with [`Error::NotConnected`].
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        self.buf.clear();
    }

    /// Send EHLO, falling back to HELO if the server rejects it.
    pub async fn hello(&mut self, local_name: &str) -> Result<Reply> {
        match self.command(250, &format!("EHLO {local_name}")).await {
            Ok(reply) => {
                self.capabilities = reply.message.lines().skip(1).map(str::to_string).collect();
                Ok(reply)
            }
            Err(Error::Upstream { code, .. }) if (500..600).contains(&code) => {
                debug!("EHLO rejected with {}, trying HELO", code);
                self.capabilities.clear();
                self.command(250, &format!("HELO {local_name}")).await
            }
            Err(e) => Err(e),
        }
    }

    /// Issue STARTTLS and upgrade the connection on a 220 reply.
    ///
    /// The caller is expected to greet again afterwards.
    pub async fn starttls(&mut self, config: Arc<ClientConfig>) -> Result<Reply> {
        let reply = self.command(220, "STARTTLS").await?;

        let server_name = match self.host.parse::<IpAddr>() {
            Ok(ip) => ServerName::IpAddress(ip.into()),
            Err(_) => ServerName::try_from(self.host.clone())
                .map_err(|e| Error::Tls(format!("invalid server name {:?}: {e}", self.host)))?,
        };
        let stream = self.stream.take().ok_or(Error::NotConnected)?;
        let connector = TlsConnector::from(config);
        let tls_stream = connector
            .connect(server_name, stream)
            .await
            .map_err(|e| Error::Tls(format!("handshake with {} failed: {e}", self.host)))?;

        self.stream = Some(Box::new(tls_stream));
        self.buf.clear();
        self.capabilities.clear();
        self.tls = true;
        Ok(reply)
    }

    /// Send one command line and check the reply against `expect`
    /// (see [`Reply::matches`]).
    pub async fn command(&mut self, expect: u16, line: &str) -> Result<Reply> {
        self.write_raw(format!("{line}\r\n").as_bytes()).await?;
        self.expect_reply(expect).await
    }

    /// Send DATA and wait for the 354 go-ahead.
    pub async fn data(&mut self) -> Result<Reply> {
        self.command(354, "DATA").await
    }

    /// Read the reply that follows the end-of-data marker.
    pub async fn finish_data(&mut self) -> Result<Reply> {
        self.expect_reply(250).await
    }

    pub async fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
        stream.write_all(bytes).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn expect_reply(&mut self, expect: u16) -> Result<Reply> {
        let reply = self.read_reply().await?;
        if reply.matches(expect) {
            Ok(reply)
        } else {
            Err(Error::Upstream {
                code: reply.code,
                message: reply.message,
            })
        }
    }

    /// Read a complete reply, joining multi-line text with `\n`.
    pub async fn read_reply(&mut self) -> Result<Reply> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
        let mut code = None;
        let mut lines = Vec::new();
        loop {
            let raw = read_line(stream, &mut self.buf)
                .await?
                .ok_or_else(|| Error::Protocol("connection closed by upstream".to_string()))?;
            let line = String::from_utf8_lossy(&raw);
            let (line_code, continues, text) = parse_reply_line(&line)?;
            match code {
                None => code = Some(line_code),
                Some(c) if c != line_code => {
                    return Err(Error::Protocol(format!(
                        "reply code changed from {c} to {line_code} mid-reply"
                    )));
                }
                Some(_) => {}
            }
            lines.push(text.to_string());
            if !continues {
                break;
            }
        }
        Ok(Reply::new(code.unwrap_or_default(), lines.join("\n")))
    }
}

/// Host part of a `host:port` address, brackets removed from IPv6 literals.
pub fn split_host(addr: &str) -> &str {
    if let Some(rest) = addr.strip_prefix('[') {
        return rest.split(']').next().unwrap_or_default();
    }
    match addr.rsplit_once(':') {
        Some((host, _)) if !host.contains(':') => host,
        Some(_) => addr,
        None => addr,
    }
}

/// TLS settings for the upstream connection.
///
/// `insecure_skip_verify` accepts any certificate the server presents.
pub fn tls_client_config(insecure_skip_verify: bool) -> Arc<ClientConfig> {
    if insecure_skip_verify {
        return Arc::new(
            ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(danger::NoVerify))
                .with_no_client_auth(),
        );
    }
    let mut root_store = RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    Arc::new(
        ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    )
}

mod danger {
    use rustls::client::danger::{
        HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
    };
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, Error, SignatureScheme};

    #[derive(Debug)]
    pub struct NoVerify;

    impl ServerCertVerifier for NoVerify {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            vec![
                SignatureScheme::RSA_PKCS1_SHA256,
                SignatureScheme::RSA_PKCS1_SHA384,
                SignatureScheme::RSA_PKCS1_SHA512,
                SignatureScheme::ECDSA_NISTP256_SHA256,
                SignatureScheme::ECDSA_NISTP384_SHA384,
                SignatureScheme::ECDSA_NISTP521_SHA512,
                SignatureScheme::RSA_PSS_SHA256,
                SignatureScheme::RSA_PSS_SHA384,
                SignatureScheme::RSA_PSS_SHA512,
                SignatureScheme::ED25519,
            ]
        }
    }
}
