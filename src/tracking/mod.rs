//! Engagement tracking configuration and per-message link generation.

pub mod link;

pub use link::{Action, DecodedLink, WrapperData, action_to_type, decode_link, encode_link};

use crate::{Error, Result};
use tracing::warn;
use url::Url;

/// Header carrying the unique per-message identifier
pub const MESSAGE_ID_HEADER: &str = "X-Sp-Message-Id";

/// Generate a unique message identifier.
///
/// Format: `0000` + Unix time (seconds) as 8 hex digits in reversed byte
/// order + the first 4 bytes of a fresh UUIDv4, 20 hex characters in all.
pub fn uniq_message_id() -> String {
    let now = time::OffsetDateTime::now_utc().unix_timestamp() as u32;
    let uuid = uuid::Uuid::new_v4();
    format!(
        "0000{}{}",
        hex::encode(now.to_le_bytes()),
        hex::encode(&uuid.as_bytes()[..4])
    )
}

/// Persistent tracking configuration, shared by every message a proxy handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wrapper {
    url: Url,
    track_open: bool,
    track_initial_open: bool,
    track_link: bool,
}

impl Wrapper {
    /// Create a wrapper for the given tracking base URL.
    ///
    /// The URL must be absolute and carry no query parameters.
    pub fn new(
        tracking_url: &str,
        track_open: bool,
        track_initial_open: bool,
        track_link: bool,
    ) -> Result<Self> {
        let url = Url::parse(tracking_url)?;
        if url.query().is_some_and(|q| !q.is_empty()) {
            return Err(Error::InvalidConfig(
                "can't have query parameters in the tracking URL".to_string(),
            ));
        }
        if url.cannot_be_a_base() || url.host_str().is_none() {
            return Err(Error::InvalidConfig(format!(
                "tracking URL {tracking_url:?} has no host"
            )));
        }
        Ok(Self {
            url,
            track_open,
            track_initial_open,
            track_link,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn track_open(&self) -> bool {
        self.track_open
    }

    pub fn track_initial_open(&self) -> bool {
        self.track_initial_open
    }

    pub fn track_link(&self) -> bool {
        self.track_link
    }

    /// Bind this configuration to one message.
    pub fn tracker(&self, context: MessageContext) -> Tracker<'_> {
        Tracker {
            wrapper: self,
            context,
        }
    }
}

/// Identity of the message currently being rewritten
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageContext {
    pub message_id: String,
    pub rcpt_to: String,
}

impl MessageContext {
    pub fn new(message_id: impl Into<String>, rcpt_to: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            rcpt_to: rcpt_to.into(),
        }
    }
}

/// A [`Wrapper`] bound to one message. Produces the pixels and wrapped links
/// that go into that message's HTML.
#[derive(Debug, Clone)]
pub struct Tracker<'a> {
    wrapper: &'a Wrapper,
    context: MessageContext,
}

impl Tracker<'_> {
    pub fn context(&self) -> &MessageContext {
        &self.context
    }

    /// Hidden pixel placed right after `<body>`, or empty when disabled.
    pub fn initial_open_pixel(&self) -> String {
        const PIXEL_PREFIX: &str = concat!(
            r#"<div style="color:transparent;visibility:hidden;opacity:0;font-size:0px;border:0;max-height:1px;width:1px;margin:0px;padding:0px"#,
            r#";border-width:0px!important;display:none!important;line-height:0px!important;"><img border="0" width="1" height="1" src=""#
        );
        const PIXEL_SUFFIX: &str = "\"/></div>\n";
        match self.pixel_url(Action::InitialOpen) {
            url if url.is_empty() => String::new(),
            url => format!("{PIXEL_PREFIX}{url}{PIXEL_SUFFIX}"),
        }
    }

    /// Pixel placed right before `</body>`, or empty when disabled.
    pub fn open_pixel(&self) -> String {
        const PIXEL_PREFIX: &str = r#"<img border="0" width="1" height="1" alt="" src=""#;
        const PIXEL_SUFFIX: &str = "\">\n";
        match self.pixel_url(Action::Open) {
            url if url.is_empty() => String::new(),
            url => format!("{PIXEL_PREFIX}{url}{PIXEL_SUFFIX}"),
        }
    }

    /// Tracking URL for an open pixel, empty when that pixel is disabled.
    pub fn pixel_url(&self, action: Action) -> String {
        let enabled = match action {
            Action::InitialOpen => self.wrapper.track_initial_open,
            Action::Open => self.wrapper.track_open,
            Action::Click => false,
        };
        if enabled {
            self.wrap(action, "").unwrap_or_default()
        } else {
            String::new()
        }
    }

    /// Click-wrap a link. The original URL comes back unchanged when link
    /// tracking is off or the link can't be encoded.
    pub fn wrap_url(&self, target: &str) -> String {
        if !self.wrapper.track_link {
            return target.to_string();
        }
        self.wrap(Action::Click, target)
            .unwrap_or_else(|| target.to_string())
    }

    fn wrap(&self, action: Action, target: &str) -> Option<String> {
        let data = WrapperData::new(
            action,
            target,
            &self.context.message_id,
            &self.context.rcpt_to,
        );
        match link::tracking_link(&self.wrapper.url, &data) {
            Ok(link) => Some(link),
            Err(e) => {
                warn!("Could not build tracking link for {:?}: {}", target, e);
                None
            }
        }
    }
}
