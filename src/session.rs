//! Per-connection proxy session.
//!
//! A [`Backend`] holds the proxy-wide settings and dials the upstream for each
//! accepted client. The resulting [`Session`] forwards commands one at a time
//! and runs the DATA body through the MIME walker before relaying it.

use crate::mime::mail_copy;
use crate::proto::dot::DotStuffer;
use crate::proto::smtp::{Reply, ResponseCode};
use crate::tracking::Wrapper;
use crate::upstream::{UpstreamClient, split_host, tls_client_config};
use crate::{Error, Result};
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

/// EHLO name used when the upstream address has no host part
const DEFAULT_HELO_HOST: &str = "smtpproxy.localhost";

/// Optional sink that receives a copy of every rewritten message body.
#[derive(Clone)]
pub struct DebugSink(Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>);

impl DebugSink {
    pub fn new(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self(Arc::new(Mutex::new(Box::new(writer))))
    }

    pub async fn mirror(&self, bytes: &[u8]) -> std::io::Result<()> {
        let mut writer = self.0.lock().await;
        writer.write_all(bytes).await?;
        writer.flush().await
    }
}

impl fmt::Debug for DebugSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DebugSink")
    }
}

/// Proxy-wide settings. Each session works on its own snapshot.
#[derive(Debug, Clone, Default)]
pub struct BackendSettings {
    /// Upstream `host:port`
    pub upstream: String,
    pub verbose: bool,
    /// Tracking configuration; `None` relays bodies unchanged
    pub wrapper: Option<Wrapper>,
    pub insecure_skip_verify: bool,
    pub debug_sink: Option<DebugSink>,
}

/// Shared proxy backend
#[derive(Debug)]
pub struct Backend {
    settings: RwLock<BackendSettings>,
}

impl Backend {
    pub fn new(settings: BackendSettings) -> Self {
        Self {
            settings: RwLock::new(settings),
        }
    }

    /// Applies to sessions created afterwards.
    pub async fn set_verbose(&self, verbose: bool) {
        self.settings.write().await.verbose = verbose;
    }

    /// Applies to sessions created afterwards.
    pub async fn set_wrapper(&self, wrapper: Option<Wrapper>) {
        self.settings.write().await.wrapper = wrapper;
    }

    pub async fn settings(&self) -> BackendSettings {
        self.settings.read().await.clone()
    }

    /// Connect to the upstream server and start a session.
    pub async fn init(&self) -> Result<Session> {
        let settings = self.settings().await;
        if settings.verbose {
            info!("---Connecting upstream");
        }
        match UpstreamClient::connect(&settings.upstream).await {
            Ok((upstream, greeting)) => {
                if settings.verbose {
                    info!("< Connection success {} {}", settings.upstream, greeting);
                }
                Ok(Session { settings, upstream })
            }
            Err(e) => {
                warn!("< Connection error {} {}", settings.upstream, e);
                Err(e)
            }
        }
    }
}

/// A failed session operation: the reply to relay to the client plus the
/// underlying error.
#[derive(Debug)]
pub struct SessionError {
    pub reply: Reply,
    pub source: Error,
}

impl From<Error> for SessionError {
    fn from(source: Error) -> Self {
        let reply = match &source {
            Error::Upstream { code, message } => Reply::new(*code, message.clone()),
            // No usable SMTP code from the upstream
            other => Reply::new(ResponseCode::INTERNAL_ERROR.0, other.to_string()),
        };
        Self { reply, source }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.source, self.reply.code)
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;

/// Handle for the body of an open DATA phase
#[derive(Debug, Default)]
pub struct DataSink {
    stuffer: DotStuffer,
    written: usize,
}

impl DataSink {
    async fn write(&mut self, upstream: &mut UpstreamClient, body: &[u8]) -> Result<()> {
        let mut out = Vec::with_capacity(body.len() + 64);
        self.stuffer.stuff(body, &mut out);
        upstream.write_raw(&out).await?;
        self.written += body.len();
        Ok(())
    }

    /// Send the end-of-data marker and read the final reply.
    async fn close(mut self, upstream: &mut UpstreamClient) -> Result<(usize, Reply)> {
        let mut out = Vec::with_capacity(5);
        self.stuffer.finish(&mut out);
        upstream.write_raw(&out).await?;
        let reply = upstream.finish_data().await?;
        Ok((self.written, reply))
    }
}

/// One client connection's view of the upstream
pub struct Session {
    settings: BackendSettings,
    upstream: UpstreamClient,
}

impl Session {
    pub fn settings(&self) -> &BackendSettings {
        &self.settings
    }

    pub fn is_connected(&self) -> bool {
        self.upstream.is_connected()
    }

    pub fn is_tls(&self) -> bool {
        self.upstream.is_tls()
    }

    fn cmd_twiddle(&self) -> &'static str {
        if self.upstream.is_tls() { "~>" } else { "->" }
    }

    fn resp_twiddle(&self) -> &'static str {
        if self.upstream.is_tls() { "<~" } else { "<-" }
    }

    /// Greet the upstream and report its capabilities.
    pub async fn greet(&mut self, helo_type: &str) -> SessionResult<(Vec<String>, Reply)> {
        if self.settings.verbose {
            info!("{} {}", self.cmd_twiddle(), helo_type);
        }
        let host = match split_host(&self.settings.upstream) {
            "" => DEFAULT_HELO_HOST,
            host => host,
        }
        .to_string();

        match self.upstream.hello(&host).await {
            Ok(reply) => {
                let caps = self.upstream.capabilities().to_vec();
                if self.settings.verbose {
                    info!("\t{} {} success", self.resp_twiddle(), helo_type);
                    info!("\tUpstream capabilities: {:?}", caps);
                }
                Ok((caps, reply))
            }
            Err(e) => {
                warn!("\t{} {} error {}", self.resp_twiddle(), helo_type, e);
                Err(e.into())
            }
        }
    }

    /// Upgrade the upstream connection with STARTTLS.
    pub async fn start_tls(&mut self) -> SessionResult<Reply> {
        if self.settings.verbose {
            info!("{} STARTTLS", self.cmd_twiddle());
        }
        let config = tls_client_config(self.settings.insecure_skip_verify);
        match self.upstream.starttls(config).await {
            Ok(reply) => {
                if self.settings.verbose {
                    info!("\t{} {}", self.resp_twiddle(), reply);
                }
                Ok(reply)
            }
            Err(e) => {
                let err = SessionError::from(e);
                warn!("\t{} {}", self.resp_twiddle(), err.reply);
                if matches!(err.source, Error::Tls(_)) {
                    // Handshake state is unknown, the stream can't be reused
                    self.upstream.close().await;
                }
                Err(err)
            }
        }
    }

    pub async fn auth(&mut self, expect: u16, cmd: &str, arg: &str) -> SessionResult<Reply> {
        self.passthru(expect, cmd, arg).await
    }

    pub async fn mail(&mut self, expect: u16, cmd: &str, arg: &str) -> SessionResult<Reply> {
        self.passthru(expect, cmd, arg).await
    }

    pub async fn rcpt(&mut self, expect: u16, cmd: &str, arg: &str) -> SessionResult<Reply> {
        self.passthru(expect, cmd, arg).await
    }

    pub async fn reset(&mut self, expect: u16, cmd: &str, arg: &str) -> SessionResult<Reply> {
        self.passthru(expect, cmd, arg).await
    }

    pub async fn quit(&mut self, expect: u16, cmd: &str, arg: &str) -> SessionResult<Reply> {
        self.passthru(expect, cmd, arg).await
    }

    pub async fn unknown(&mut self, expect: u16, cmd: &str, arg: &str) -> SessionResult<Reply> {
        self.passthru(expect, cmd, arg).await
    }

    /// Forward `cmd arg` upstream and return the reply, checked against
    /// `expect` (0 disables the check).
    pub async fn passthru(&mut self, expect: u16, cmd: &str, arg: &str) -> SessionResult<Reply> {
        if self.settings.verbose {
            info!("{} {} {}", self.cmd_twiddle(), cmd, arg);
        }
        let joined = if arg.is_empty() {
            cmd.to_string()
        } else {
            format!("{cmd} {arg}")
        };
        match self.upstream.command(expect, &joined).await {
            Ok(reply) => {
                if self.settings.verbose {
                    info!("\t{} {}", self.resp_twiddle(), reply);
                }
                Ok(reply)
            }
            Err(e) => {
                let err = SessionError::from(e);
                warn!(
                    "\t{} {} {} error {}",
                    self.resp_twiddle(),
                    cmd,
                    err.reply,
                    err.source
                );
                Err(err)
            }
        }
    }

    /// Send DATA upstream. On success the returned sink is handed back to
    /// [`Session::data`] along with the client's body.
    pub async fn data_command(&mut self) -> SessionResult<(DataSink, Reply)> {
        if self.settings.verbose {
            info!("{} DATA", self.cmd_twiddle());
        }
        match self.upstream.data().await {
            Ok(reply) => Ok((DataSink::default(), reply)),
            Err(e) => {
                warn!("\t{} DATA error {}", self.resp_twiddle(), e);
                Err(e.into())
            }
        }
    }

    /// Rewrite the message body and relay it upstream, returning the
    /// upstream's final reply.
    ///
    /// A failure part-way leaves the upstream in the middle of DATA, so the
    /// upstream connection is closed.
    pub async fn data<R: AsyncRead + Unpin>(
        &mut self,
        mut body: R,
        sink: DataSink,
    ) -> SessionResult<Reply> {
        let mut raw = Vec::new();
        if let Err(e) = body.read_to_end(&mut raw).await {
            return Err(self.abort_data("DATA read error", e.into()).await);
        }

        let mut rewritten = Vec::with_capacity(raw.len() + 1024);
        if let Err(e) = mail_copy(&mut rewritten, &raw, self.settings.wrapper.as_ref()) {
            return Err(self.abort_data("DATA MailCopy error", e).await);
        }

        if let Some(debug) = self.settings.debug_sink.clone() {
            if let Err(e) = debug.mirror(&rewritten).await {
                return Err(self.abort_data("upstreamDataDebug error", e.into()).await);
            }
        }

        let result = self.relay(sink, &rewritten).await;
        match result {
            Ok((count, reply)) => {
                if self.settings.verbose {
                    info!("\t{} DATA accepted, bytes written = {}", self.resp_twiddle(), count);
                } else {
                    info!("Message DATA upstream,{},{},{}", count, reply.code, reply.message);
                }
                Ok(reply)
            }
            Err(Error::Upstream { code, message }) => {
                // Upstream refused the message; the connection is still usable
                warn!("\t{} DATA rejected {} {}", self.resp_twiddle(), code, message);
                Err(Error::Upstream { code, message }.into())
            }
            Err(e) => Err(self.abort_data("DATA relay error", e).await),
        }
    }

    async fn relay(&mut self, mut sink: DataSink, body: &[u8]) -> Result<(usize, Reply)> {
        sink.write(&mut self.upstream, body).await?;
        sink.close(&mut self.upstream).await
    }

    async fn abort_data(&mut self, what: &str, e: Error) -> SessionError {
        warn!("\t{} {} {}", self.resp_twiddle(), what, e);
        self.upstream.close().await;
        SessionError {
            reply: Reply::new(ResponseCode::INTERNAL_ERROR.0, format!("{what}: {e}")),
            source: e,
        }
    }
}
