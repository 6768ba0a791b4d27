//! SMTP Engagement-Tracking Proxy
//!
//! Sits between a sending client and an upstream relay. Every SMTP command is
//! forwarded unchanged; the DATA body is rewritten on the way through so HTML
//! parts carry open-tracking pixels and click-wrapped links, and every message
//! gets a unique `X-Sp-Message-Id` header.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐      ┌──────────────────────────────┐      ┌──────────────┐
//! │   Sending   │─────▶│ server ─▶ session ─▶ upstream │─────▶│   Upstream   │
//! │   client    │ SMTP │             │                 │ SMTP │    relay     │
//! │             │◀─────│    mime ─▶ html ─▶ tracking   │◀─────│              │
//! └─────────────┘      └──────────────────────────────┘      └──────────────┘
//! ```

pub mod config;
pub mod html;
pub mod mime;
pub mod proto;
pub mod server;
pub mod session;
pub mod tracking;
pub mod upstream;

#[cfg(test)]
mod test_support;

// Re-export commonly used items
pub use config::{Config, ProxyConfig, TrackingConfig};
pub use proto::smtp::Reply;
pub use session::{Backend, BackendSettings, DebugSink, Session, SessionError};
pub use tracking::{MessageContext, Tracker, Wrapper, WrapperData};

use thiserror::Error;

/// Error types for the tracking proxy
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The upstream answered with a code other than the one expected.
    #[error("{code} {message}")]
    Upstream { code: u16, message: String },

    #[error("Upstream connection is closed")]
    NotConnected,

    /// Message shape the proxy refuses to rewrite (recipient count, bad address lists).
    #[error("{0}")]
    Recipients(String),

    #[error("Mail parse error: {0}")]
    MailParse(#[from] mailparse::MailParseError),

    #[error("Invalid link: {0}")]
    LinkFormat(String),

    #[error("Quoted-printable error: {0}")]
    QuotedPrintable(#[from] quoted_printable::QuotedPrintableError),

    #[error("Base64 error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

/// Result type for the tracking proxy
pub type Result<T> = std::result::Result<T, Error>;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
