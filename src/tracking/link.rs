//! Tracking link codec.
//!
//! A [`WrapperData`] record is serialised to JSON, zlib-compressed and
//! encoded with the URL-safe base64 alphabet, then appended as a single path
//! segment to the tracking base URL:
//!
//! ```text
//! https://track.example.com/eJyrVkrMSVWyUkpU0lEqSSzJSM...
//! ```

use crate::{Error, Result};
use base64::{Engine as _, engine::general_purpose::URL_SAFE};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use url::Url;

/// Tracking event kinds, carried in URLs as a single letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    InitialOpen,
    Open,
    Click,
}

impl Action {
    /// Letter used inside the encoded record
    pub fn code(self) -> &'static str {
        match self {
            Self::InitialOpen => "i",
            Self::Open => "o",
            Self::Click => "c",
        }
    }

    /// Event type name as reported downstream
    pub fn event_type(self) -> &'static str {
        match self {
            Self::InitialOpen => "initial_open",
            Self::Open => "open",
            Self::Click => "click",
        }
    }

    pub fn from_event_type(name: &str) -> Option<Self> {
        match name {
            "initial_open" => Some(Self::InitialOpen),
            "open" => Some(Self::Open),
            "click" => Some(Self::Click),
            _ => None,
        }
    }
}

/// Map the one-letter action code used in URLs to an event type.
///
/// Unknown letters give an empty string rather than an error.
pub fn action_to_type(code: &str) -> &'static str {
    match code {
        "i" => Action::InitialOpen.event_type(),
        "o" => Action::Open.event_type(),
        "c" => Action::Click.event_type(),
        _ => "",
    }
}

/// The record embedded in every tracking URL
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrapperData {
    /// "c" = click, "o" = open, "i" = initial open
    #[serde(rename = "act")]
    pub action: String,
    #[serde(rename = "t_url")]
    pub target_link_url: String,
    #[serde(rename = "msg_id")]
    pub message_id: String,
    #[serde(rename = "rcpt")]
    pub rcpt_to: String,
}

impl WrapperData {
    pub fn new(action: Action, target_link_url: &str, message_id: &str, rcpt_to: &str) -> Self {
        Self {
            action: action.code().to_string(),
            target_link_url: target_link_url.to_string(),
            message_id: message_id.to_string(),
            rcpt_to: rcpt_to.to_string(),
        }
    }

    /// Full event type name for the action letter, empty if unrecognised
    pub fn event_type(&self) -> &'static str {
        action_to_type(&self.action)
    }
}

/// Result of [`decode_link`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedLink {
    /// The decompressed JSON record, exactly as it was embedded
    pub json: Vec<u8>,
    pub data: WrapperData,
    /// `scheme://host[:port]` of the link
    pub tracking_domain: String,
}

/// Compress and encode raw bytes into a URL path segment.
pub fn encode_path(data: &[u8]) -> Result<String> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    // finish() flushes the trailing zlib block
    let compressed = encoder.finish()?;
    Ok(URL_SAFE.encode(compressed))
}

/// Reverse of [`encode_path`].
pub fn decode_path(segment: &str) -> Result<Vec<u8>> {
    let compressed = URL_SAFE.decode(segment.as_bytes())?;
    let mut decoder = ZlibDecoder::new(compressed.as_slice());
    let mut data = Vec::new();
    decoder.read_to_end(&mut data)?;
    Ok(data)
}

/// Build the tracking URL for `data` under `base`.
///
/// Exactly one `/` separates the base path from the encoded segment.
pub fn tracking_link(base: &Url, data: &WrapperData) -> Result<String> {
    let json = serde_json::to_vec(data)?;
    let segment = encode_path(&json)?;

    let mut link = base.clone();
    let path = format!("{}/{}", base.path().trim_end_matches('/'), segment);
    link.set_path(&path);
    link.set_query(None);
    link.set_fragment(None);
    Ok(link.to_string())
}

/// Decode a tracking URL back into its record and tracking domain.
///
/// The path must be exactly one segment below the root.
pub fn decode_link(link: &str) -> Result<DecodedLink> {
    let url = Url::parse(link)?;
    let host = url.host_str().unwrap_or_default();
    let tracking_domain = match url.port() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    };

    // Intermediaries may percent-encode the base64 padding
    let path = percent_decode_str(url.path())
        .decode_utf8()
        .map_err(|e| Error::LinkFormat(format!("path is not UTF-8: {e}")))?;
    let components: Vec<&str> = path.split('/').collect();
    let segment = match components.as_slice() {
        ["", segment] => *segment,
        _ => {
            return Err(Error::LinkFormat(format!(
                "expected a single path segment, got {:?}",
                url.path()
            )));
        }
    };

    let json = decode_path(segment)?;
    let data: WrapperData = serde_json::from_slice(&json)?;
    Ok(DecodedLink {
        json,
        data,
        tracking_domain,
    })
}

/// Build a single tracking link from scratch, naming the action by its
/// event type (`open`, `initial_open` or `click`).
///
/// Returns an empty string for a pixel whose flag is off, and the bare target
/// for a click when link tracking is off.
#[allow(clippy::too_many_arguments)]
pub fn encode_link(
    tracking_url: &str,
    action: &str,
    message_id: &str,
    rcpt_to: &str,
    target_link_url: &str,
    track_open: bool,
    track_initial_open: bool,
    track_link: bool,
) -> Result<String> {
    let wrapper = super::Wrapper::new(tracking_url, track_open, track_initial_open, track_link)?;
    let tracker = wrapper.tracker(super::MessageContext::new(message_id, rcpt_to));
    match Action::from_event_type(action) {
        Some(Action::Open) => Ok(tracker.pixel_url(Action::Open)),
        Some(Action::InitialOpen) => Ok(tracker.pixel_url(Action::InitialOpen)),
        Some(Action::Click) => Ok(tracker.wrap_url(target_link_url)),
        None => Err(Error::LinkFormat(format!("invalid action {action:?}"))),
    }
}
