//! SMTP Tracking Proxy Server
//!
//! Accepts client connections, opens one upstream session per client, and
//! relays every command through it.

use crate::config::ProxyConfig;
use crate::proto::dot::unstuff_line;
use crate::proto::smtp::{self, Command, Reply, Response, ResponseCode, read_line};
use crate::session::{Backend, Session, SessionResult};
use bytes::BytesMut;
use rustls::pki_types::CertificateDer;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, trace, warn};

/// Extensions the proxy never advertises on behalf of the upstream
const HIDDEN_EXTENSIONS: &[&str] = &["STARTTLS", "CHUNKING"];

/// Server state
#[derive(Clone)]
pub struct Server {
    config: ProxyConfig,
    backend: Arc<Backend>,
    tls_acceptor: Option<TlsAcceptor>,
}

/// How a command loop ended
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Closed,
    StartTls,
}

impl Server {
    /// Create a new server. Downstream STARTTLS is offered when the config
    /// names a certificate and key.
    pub async fn new(config: ProxyConfig, backend: Arc<Backend>) -> anyhow::Result<Self> {
        let tls_acceptor = match config.tls_files() {
            Some((cert_file, key_file)) => Some(load_acceptor(cert_file, key_file).await?),
            None => None,
        };
        Ok(Self {
            config,
            backend,
            tls_acceptor,
        })
    }

    /// Run the server
    pub async fn run(&self) -> anyhow::Result<()> {
        let addr = self.config.bind_addr()?;
        let listener = TcpListener::bind(&addr).await?;
        info!("SMTP tracking proxy listening on {}", addr);
        info!("Hostname: {}, upstream: {}", self.config.hostname, self.config.upstream);
        if self.tls_acceptor.is_some() {
            info!("Downstream STARTTLS enabled");
        }

        loop {
            let (stream, addr) = listener.accept().await?;
            trace!("Connection from {}", addr);
            stream.set_nodelay(true)?;

            let server = Arc::new(self.clone());
            tokio::spawn(async move {
                if let Err(e) = server.handle_client(stream, addr.to_string()).await {
                    debug!("Client error from {}: {}", addr, e);
                }
            });
        }
    }

    /// Handle a client connection
    pub async fn handle_client<S>(self: Arc<Self>, mut stream: S, peer: String) -> anyhow::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut session = match self.backend.init().await {
            Ok(session) => session,
            Err(e) => {
                warn!("No upstream for client {}: {}", peer, e);
                stream
                    .write_all(Response::service_unavailable(&self.config.hostname).as_bytes())
                    .await?;
                return Ok(());
            }
        };

        stream
            .write_all(Response::greeting(&self.config.hostname).as_bytes())
            .await?;

        let mut buf = BytesMut::with_capacity(1024);
        if self.serve(&mut stream, &mut session, &mut buf, &peer, false).await? == Flow::Closed {
            return Ok(());
        }

        let Some(acceptor) = self.tls_acceptor.clone() else {
            return Ok(());
        };
        let mut tls_stream = acceptor.accept(stream).await?;
        debug!("TLS established with {}", peer);
        // Anything pipelined before the handshake is discarded
        buf.clear();
        self.serve(&mut tls_stream, &mut session, &mut buf, &peer, true)
            .await?;
        Ok(())
    }

    /// Command loop. Returns when the client leaves or a STARTTLS upgrade
    /// has been agreed.
    async fn serve<S>(
        &self,
        stream: &mut S,
        session: &mut Session,
        buf: &mut BytesMut,
        peer: &str,
        tls_active: bool,
    ) -> crate::Result<Flow>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            let Some(raw) = read_line(stream, buf).await? else {
                debug!("Client {} disconnected", peer);
                return Ok(Flow::Closed);
            };
            let line = String::from_utf8_lossy(&raw).into_owned();
            trace!("Client {}: {}", peer, line);

            let Some((command, _)) = smtp::parse_line(&line) else {
                continue;
            };
            let trimmed = line.trim();
            let (verb, arg) = trimmed
                .split_once(' ')
                .map(|(verb, arg)| (verb, arg.trim()))
                .unwrap_or((trimmed, ""));

            let reply = match command {
                Command::Ehlo | Command::Helo => match session.greet(&verb.to_ascii_uppercase()).await {
                    Ok((caps, _)) if command == Command::Ehlo => {
                        Response::ehlo(&self.config.hostname, &self.advertised(&caps, tls_active))
                    }
                    Ok(_) => Response::new(ResponseCode::OK, &self.config.hostname),
                    Err(e) => e.reply.to_wire(),
                },

                Command::StartTls if tls_active => Response::bad_sequence(),
                Command::StartTls if self.tls_acceptor.is_none() => Response::tls_unavailable(),
                Command::StartTls => match session.start_tls().await {
                    Ok(_) => {
                        stream.write_all(Response::starttls().as_bytes()).await?;
                        stream.flush().await?;
                        return Ok(Flow::StartTls);
                    }
                    Err(e) => e.reply.to_wire(),
                },

                Command::Auth => {
                    let mut result = session.auth(0, verb, arg).await;
                    loop {
                        match result {
                            Ok(challenge) if challenge.code == ResponseCode::AUTH_CONTINUE.0 => {
                                stream.write_all(challenge.to_wire().as_bytes()).await?;
                                let Some(answer) = read_line(stream, buf).await? else {
                                    return Ok(Flow::Closed);
                                };
                                let answer = String::from_utf8_lossy(&answer).into_owned();
                                result = session.auth(0, &answer, "").await;
                            }
                            other => break wire(other),
                        }
                    }
                }

                Command::Mail => wire(session.mail(250, verb, arg).await),
                Command::Rcpt => wire(session.rcpt(25, verb, arg).await),
                Command::Rset => wire(session.reset(250, verb, arg).await),

                Command::Quit => {
                    let reply = match session.quit(221, verb, arg).await {
                        Ok(reply) => reply.to_wire(),
                        Err(_) => Response::goodbye(&self.config.hostname),
                    };
                    stream.write_all(reply.as_bytes()).await?;
                    return Ok(Flow::Closed);
                }

                Command::Data => match session.data_command().await {
                    Ok((sink, go_ahead)) => {
                        stream.write_all(go_ahead.to_wire().as_bytes()).await?;
                        let Some(body) = read_body(stream, buf).await? else {
                            debug!("Client {} disconnected during DATA", peer);
                            return Ok(Flow::Closed);
                        };
                        wire(session.data(body.as_slice(), sink).await)
                    }
                    Err(e) => e.reply.to_wire(),
                },

                Command::Unknown => wire(session.unknown(0, verb, arg).await),
            };

            stream.write_all(reply.as_bytes()).await?;
            stream.flush().await?;

            if !session.is_connected() {
                info!("Upstream connection lost, closing client {}", peer);
                return Ok(Flow::Closed);
            }
        }
    }

    /// Upstream extensions as offered to the client
    fn advertised(&self, caps: &[String], tls_active: bool) -> Vec<String> {
        let keyword = |cap: &str| cap.split_whitespace().next().unwrap_or_default().to_ascii_uppercase();
        let upstream_tls = caps.iter().any(|c| keyword(c.as_str()) == "STARTTLS");
        let mut out: Vec<String> = caps
            .iter()
            .filter(|c| !HIDDEN_EXTENSIONS.contains(&keyword(c.as_str()).as_str()))
            .cloned()
            .collect();
        if self.tls_acceptor.is_some() && !tls_active && upstream_tls {
            out.push("STARTTLS".to_string());
        }
        out
    }
}

fn wire(result: SessionResult<Reply>) -> String {
    match result {
        Ok(reply) => reply.to_wire(),
        Err(e) => e.reply.to_wire(),
    }
}

/// Read a dot-terminated message body, undoing dot stuffing.
/// `None` means the client went away first.
async fn read_body<S: AsyncRead + Unpin>(
    stream: &mut S,
    buf: &mut BytesMut,
) -> crate::Result<Option<Vec<u8>>> {
    let mut body = Vec::new();
    loop {
        let Some(raw) = read_line(stream, buf).await? else {
            return Ok(None);
        };
        match unstuff_line(&raw) {
            Some(line) => {
                body.extend_from_slice(line);
                body.extend_from_slice(b"\r\n");
            }
            None => return Ok(Some(body)),
        }
    }
}

async fn load_acceptor(cert_file: &str, key_file: &str) -> anyhow::Result<TlsAcceptor> {
    let cert_pem = tokio::fs::read(cert_file).await?;
    let key_pem = tokio::fs::read(key_file).await?;

    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| anyhow::anyhow!("Failed to parse certificate {}", cert_file))?;

    let key = rustls_pemfile::private_key(&mut key_pem.as_slice())?
        .ok_or_else(|| anyhow::anyhow!("No private key found in {}", key_file))?;

    let tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    Ok(TlsAcceptor::from(Arc::new(tls_config)))
}

/// Run the server
pub async fn run_server(config: ProxyConfig, backend: Arc<Backend>) -> anyhow::Result<()> {
    let server = Server::new(config, backend).await?;
    server.run().await
}
