//! MIME walker: re-emits a message with tracking applied to its HTML parts.

use crate::html::track_html;
use crate::tracking::{MESSAGE_ID_HEADER, MessageContext, Tracker, Wrapper, uniq_message_id};
use crate::{Error, Result};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use mailparse::{MailAddr, MailHeaderMap, parse_headers};
use quoted_printable::ParseMode;
use std::io::Write;
use tracing::{debug, warn};

/// Line length used when re-encoding base64 bodies
const BASE64_LINE_LEN: usize = 76;

/// One top-level message header.
///
/// `raw_value` is re-emitted as received (folding and encoded words kept);
/// `value` is the decoded form used for address parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: String,
    pub raw_value: Vec<u8>,
    pub value: String,
}

impl HeaderField {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            name: name.into(),
            raw_value: value.clone().into_bytes(),
            value,
        }
    }

    fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// Parse the header block at the start of `src`. Returns the headers and the
/// offset of the body.
pub fn read_headers(src: &[u8]) -> Result<(Vec<HeaderField>, usize)> {
    let (headers, body_start) = parse_headers(src)?;
    let fields = headers
        .iter()
        .map(|h| HeaderField {
            name: h.get_key(),
            raw_value: h.get_value_raw().to_vec(),
            value: h.get_value(),
        })
        .collect();
    Ok((fields, body_start))
}

fn first_value<'h>(headers: &'h [HeaderField], name: &str) -> Option<&'h str> {
    headers.iter().find(|h| h.is(name)).map(|h| h.value.as_str())
}

/// Every mailbox named by the given header, with groups flattened.
fn addresses(headers: &[HeaderField], name: &str) -> Result<Vec<String>> {
    let mut out = Vec::new();
    for header in headers.iter().filter(|h| h.is(name)) {
        let list = mailparse::addrparse(&header.value).map_err(|e| {
            Error::Recipients(format!("can't parse {name} header {:?}: {e}", header.value))
        })?;
        for addr in list.iter() {
            match addr {
                MailAddr::Single(single) => out.push(single.addr.clone()),
                MailAddr::Group(group) => out.extend(group.addrs.iter().map(|s| s.addr.clone())),
            }
        }
    }
    Ok(out)
}

/// Inspect the top-level headers and derive the per-message context.
///
/// The message must have exactly one `To` recipient and no `Cc`/`Bcc`.
/// An existing message id header is reused; otherwise one is generated
/// and appended.
pub fn process_headers(headers: &mut Vec<HeaderField>) -> Result<MessageContext> {
    if first_value(headers, "To").is_none() {
        return Err(Error::Recipients("message has no To header".to_string()));
    }
    let to = addresses(headers, "To")?;
    let cc = addresses(headers, "Cc")?;
    let bcc = addresses(headers, "Bcc")?;

    let rcpt_to = match (to.as_slice(), cc.len() + bcc.len()) {
        ([single], 0) => single.clone(),
        _ => {
            return Err(Error::Recipients(format!(
                "tracking supports single-recipient messages only (to={}, cc={}, bcc={})",
                to.len(),
                cc.len(),
                bcc.len()
            )));
        }
    };

    let existing = headers
        .iter()
        .filter(|h| h.is(MESSAGE_ID_HEADER))
        .map(|h| h.value.trim())
        .find(|v| !v.is_empty())
        .map(str::to_string);
    let message_id = match existing {
        Some(id) => id,
        None => {
            headers.retain(|h| !h.is(MESSAGE_ID_HEADER));
            let id = uniq_message_id();
            headers.push(HeaderField::new(MESSAGE_ID_HEADER, id.clone()));
            id
        }
    };
    debug!("Message {} for {}", message_id, rcpt_to);
    Ok(MessageContext::new(message_id, rcpt_to))
}

/// Emit headers as `Name: value` lines followed by the blank separator line.
pub fn write_headers<W: Write + ?Sized>(dst: &mut W, headers: &[HeaderField]) -> Result<()> {
    for header in headers {
        dst.write_all(header.name.as_bytes())?;
        dst.write_all(b": ")?;
        dst.write_all(&header.raw_value)?;
        dst.write_all(b"\r\n")?;
    }
    dst.write_all(b"\r\n")?;
    Ok(())
}

/// Copy a message from `src` to `dst`, applying tracking when a wrapper is
/// configured. Without one the bytes are copied unchanged.
pub fn mail_copy<W: Write + ?Sized>(dst: &mut W, src: &[u8], wrapper: Option<&Wrapper>) -> Result<()> {
    let Some(wrapper) = wrapper else {
        dst.write_all(src)?;
        return Ok(());
    };

    let (mut headers, body_start) = read_headers(src)?;
    let context = process_headers(&mut headers)?;
    write_headers(dst, &headers)?;

    let content_type = first_value(&headers, "Content-Type").map(str::to_string);
    let cte = first_value(&headers, "Content-Transfer-Encoding").map(str::to_string);
    let tracker = wrapper.tracker(context);
    rewrite_part(
        dst,
        &src[body_start..],
        content_type.as_deref(),
        cte.as_deref(),
        &tracker,
    )
}

/// A parsed `Content-Type` value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaType {
    /// Lowercased `type/subtype`
    pub essence: String,
    pub boundary: Option<String>,
}

impl MediaType {
    /// Returns `None` unless the value starts with a well-formed
    /// `type/subtype` pair.
    pub fn parse(value: &str) -> Option<Self> {
        let essence = value.split(';').next().unwrap_or_default().trim();
        let (ty, subtype) = essence.split_once('/')?;
        let is_token = |s: &str| {
            !s.is_empty()
                && s.bytes().all(|b| {
                    b.is_ascii_graphic() && !b"()<>@,;:\\\"/[]?=".contains(&b)
                })
        };
        if !is_token(ty) || !is_token(subtype) {
            return None;
        }
        let parsed = mailparse::parse_content_type(value);
        Some(Self {
            essence: essence.to_ascii_lowercase(),
            boundary: parsed.params.get("boundary").cloned(),
        })
    }

    pub fn is_html(&self) -> bool {
        self.essence == "text/html"
    }

    pub fn is_multipart(&self) -> bool {
        self.essence.starts_with("multipart/")
    }
}

/// Rewrite one MIME part body according to its content type and transfer
/// encoding. Recurses into multipart containers.
pub fn rewrite_part<W: Write + ?Sized>(
    dst: &mut W,
    part: &[u8],
    content_type: Option<&str>,
    cte: Option<&str>,
    tracker: &Tracker<'_>,
) -> Result<()> {
    let Some(media) = content_type.and_then(MediaType::parse) else {
        dst.write_all(part)?;
        return Ok(());
    };

    if media.is_html() {
        let cte = cte.map(|c| c.trim().to_ascii_lowercase()).unwrap_or_default();
        match cte.as_str() {
            "base64" => rewrite_base64_html(dst, part, tracker),
            "quoted-printable" => rewrite_quoted_printable_html(dst, part, tracker),
            "" | "7bit" | "8bit" => {
                track_html(dst, part, tracker)?;
                Ok(())
            }
            other => {
                warn!("Don't know how to handle Content-Transfer-Encoding {:?}, passing through", other);
                dst.write_all(part)?;
                Ok(())
            }
        }
    } else if media.is_multipart() {
        match media.boundary.as_deref() {
            Some(boundary) if !boundary.is_empty() => {
                rewrite_multipart(dst, part, boundary, tracker)
            }
            _ => {
                warn!("{} part has no boundary, passing through", media.essence);
                dst.write_all(part)?;
                Ok(())
            }
        }
    } else {
        dst.write_all(part)?;
        Ok(())
    }
}

fn rewrite_base64_html<W: Write + ?Sized>(dst: &mut W, part: &[u8], tracker: &Tracker<'_>) -> Result<()> {
    let compact: Vec<u8> = part.iter().copied().filter(|b| !b.is_ascii_whitespace()).collect();
    let html = STANDARD.decode(&compact)?;

    let mut rewritten = Vec::with_capacity(html.len() + 1024);
    track_html(&mut rewritten, &html, tracker)?;

    let encoded = STANDARD.encode(&rewritten);
    for line in encoded.as_bytes().chunks(BASE64_LINE_LEN) {
        dst.write_all(line)?;
        dst.write_all(b"\r\n")?;
    }
    Ok(())
}

fn rewrite_quoted_printable_html<W: Write + ?Sized>(
    dst: &mut W,
    part: &[u8],
    tracker: &Tracker<'_>,
) -> Result<()> {
    let html = quoted_printable::decode(part, ParseMode::Robust)?;

    let mut rewritten = Vec::with_capacity(html.len() + 1024);
    track_html(&mut rewritten, &html, tracker)?;

    dst.write_all(&quoted_printable::encode(&rewritten))?;
    Ok(())
}

/// A boundary delimiter line found in a multipart body
struct Delimiter {
    /// Offset of the line ending that precedes the delimiter (equal to
    /// `start` for a delimiter on the first line)
    eol_start: usize,
    start: usize,
    /// Offset just past the delimiter line, including its line ending
    end: usize,
    close: bool,
}

fn find_delimiter(body: &[u8], from: usize, marker: &[u8]) -> Option<Delimiter> {
    let mut search = from;
    while let Some(rel) = body
        .get(search..)?
        .windows(marker.len())
        .position(|w| w == marker)
    {
        let start = search + rel;
        search = start + 1;
        if start != 0 && body[start - 1] != b'\n' {
            continue;
        }

        let after = start + marker.len();
        let close = body[after..].starts_with(b"--");
        let mut i = if close { after + 2 } else { after };
        while i < body.len() && (body[i] == b' ' || body[i] == b'\t') {
            i += 1;
        }
        let end = match &body[i..] {
            [] => i,
            [b'\r', b'\n', ..] => i + 2,
            [b'\n', ..] => i + 1,
            // Longer boundary that merely shares our prefix
            _ if !close => continue,
            // Epilogue text on the close line
            _ => i,
        };

        let eol_start = if start == 0 {
            0
        } else if start >= 2 && body[start - 2] == b'\r' {
            start - 2
        } else {
            start - 1
        };
        return Some(Delimiter {
            eol_start: eol_start.max(from),
            start,
            end,
            close,
        });
    }
    None
}

fn rewrite_multipart<W: Write + ?Sized>(
    dst: &mut W,
    body: &[u8],
    boundary: &str,
    tracker: &Tracker<'_>,
) -> Result<()> {
    let marker = format!("--{boundary}");
    let marker = marker.as_bytes();

    let Some(mut delim) = find_delimiter(body, 0, marker) else {
        warn!("Boundary {:?} not found in multipart body, passing through", boundary);
        dst.write_all(body)?;
        return Ok(());
    };
    // Preamble, kept as is
    dst.write_all(&body[..delim.start])?;

    while !delim.close {
        dst.write_all(&body[delim.start..delim.end])?;
        let part_start = delim.end;
        let next = find_delimiter(body, part_start, marker);
        let part_end = next.as_ref().map_or(body.len(), |d| d.eol_start);
        rewrite_sub_part(dst, &body[part_start..part_end], tracker)?;

        match next {
            Some(d) => {
                dst.write_all(&body[d.eol_start..d.start])?;
                delim = d;
            }
            None => {
                warn!("Multipart body ended without a close delimiter");
                dst.write_all(b"\r\n")?;
                dst.write_all(marker)?;
                dst.write_all(b"--\r\n")?;
                return Ok(());
            }
        }
    }
    // Close delimiter plus any epilogue
    dst.write_all(&body[delim.start..])?;
    Ok(())
}

fn rewrite_sub_part<W: Write + ?Sized>(dst: &mut W, part: &[u8], tracker: &Tracker<'_>) -> Result<()> {
    if part.starts_with(b"\r\n") || part.starts_with(b"\n") || part.is_empty() {
        // No headers: implicit text/plain
        dst.write_all(part)?;
        return Ok(());
    }
    let (headers, body_start) = parse_headers(part)?;
    let content_type = headers.get_first_value("Content-Type");
    let cte = headers.get_first_value("Content-Transfer-Encoding");

    dst.write_all(&part[..body_start])?;
    rewrite_part(
        dst,
        &part[body_start..],
        content_type.as_deref(),
        cte.as_deref(),
        tracker,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::decode_link;

    fn wrapper(open: bool, initial_open: bool, link: bool) -> Wrapper {
        Wrapper::new("https://track.example.com", open, initial_open, link).unwrap()
    }

    fn copy(src: &str, wrapper: Option<&Wrapper>) -> Result<String> {
        let mut out = Vec::new();
        mail_copy(&mut out, src.as_bytes(), wrapper)?;
        Ok(String::from_utf8(out).unwrap())
    }

    const SIMPLE_HTML: &str = "From: sender@example.com\r\n\
        To: Recipient <rcpt@example.com>\r\n\
        Subject: hello\r\n\
        Content-Type: text/html; charset=utf-8\r\n\
        \r\n\
        <html><body>hi <a href=\"http://x\">x</a></body></html>\r\n";

    fn message_id(out: &str) -> String {
        out.lines()
            .find_map(|l| l.strip_prefix("X-Sp-Message-Id: "))
            .unwrap()
            .to_string()
    }

    #[test]
    fn test_inactive_wrapper_is_exact_copy() {
        let weird = "not even\r\na message\r\n\r\n<a href=x>";
        assert_eq!(copy(weird, None).unwrap(), weird);
        assert_eq!(copy(SIMPLE_HTML, None).unwrap(), SIMPLE_HTML);
    }

    #[test]
    fn test_simple_html_message() {
        let w = wrapper(true, true, true);
        let out = copy(SIMPLE_HTML, Some(&w)).unwrap();

        let (headers, body) = out.split_once("\r\n\r\n").unwrap();
        let names: Vec<&str> = headers.lines().map(|l| l.split(':').next().unwrap()).collect();
        assert_eq!(names, vec!["From", "To", "Subject", "Content-Type", "X-Sp-Message-Id"]);
        let id = message_id(&out);
        assert_eq!(id.len(), 20);

        let tracker = w.tracker(MessageContext::new(id.clone(), "rcpt@example.com"));
        assert!(body.starts_with(&format!("<html><body>{}hi <a href=\"", tracker.initial_open_pixel())));
        assert!(body.ends_with(&format!("\">x</a>{}</body></html>\r\n", tracker.open_pixel())));

        let href = body.split("<a href=\"").nth(1).unwrap().split('"').next().unwrap();
        let decoded = decode_link(href).unwrap();
        assert_eq!(decoded.data.target_link_url, "http://x");
        assert_eq!(decoded.data.message_id, id);
        assert_eq!(decoded.data.rcpt_to, "rcpt@example.com");
    }

    #[test]
    fn test_all_flags_off_only_adds_id_header() {
        let out = copy(SIMPLE_HTML, Some(&wrapper(false, false, false))).unwrap();
        let (_, body) = out.split_once("\r\n\r\n").unwrap();
        let (_, original_body) = SIMPLE_HTML.split_once("\r\n\r\n").unwrap();
        assert_eq!(body, original_body);
        assert_eq!(message_id(&out).len(), 20);
    }

    #[test]
    fn test_existing_message_id_is_reused() {
        let src = "To: a@example.com\r\nX-Sp-Message-Id: 0000feedfacecafebeef\r\n\r\nbody";
        let out = copy(src, Some(&wrapper(true, true, true))).unwrap();
        assert_eq!(out.matches("X-Sp-Message-Id").count(), 1);
        assert_eq!(message_id(&out), "0000feedfacecafebeef");
        assert!(out.ends_with("\r\n\r\nbody"));
    }

    #[test]
    fn test_recipient_rules() {
        let w = wrapper(true, true, true);
        for src in [
            "To: a@example.com, b@example.com\r\n\r\nx",
            "To: a@example.com\r\nTo: b@example.com\r\n\r\nx",
            "To: a@example.com\r\nCc: c@example.com\r\n\r\nx",
            "To: a@example.com\r\nBcc: c@example.com\r\n\r\nx",
            "Subject: no recipients\r\n\r\nx",
        ] {
            assert!(
                matches!(copy(src, Some(&w)), Err(Error::Recipients(_))),
                "{src:?}"
            );
        }
        let group = "To: team: one@example.com;\r\n\r\nx";
        assert!(copy(group, Some(&w)).is_ok());
    }

    #[test]
    fn test_rejected_message_writes_nothing() {
        let mut out = Vec::new();
        let src = b"To: a@example.com, b@example.com\r\n\r\n<body></body>";
        assert!(mail_copy(&mut out, src, Some(&wrapper(true, true, true))).is_err());
        assert!(out.is_empty());
    }

    #[test]
    fn test_base64_html_is_rewritten_and_rewrapped() {
        let html = format!(
            "<html><body>{}<a href=\"http://x/long\">x</a></body></html>",
            "lorem ipsum ".repeat(20)
        );
        let encoded = STANDARD.encode(&html);
        let folded: Vec<&str> = encoded
            .as_bytes()
            .chunks(60)
            .map(|c| std::str::from_utf8(c).unwrap())
            .collect();
        let src = format!(
            "To: a@example.com\r\nContent-Type: text/html\r\nContent-Transfer-Encoding: base64\r\n\r\n{}\r\n",
            folded.join("\r\n")
        );

        let out = copy(&src, Some(&wrapper(true, true, true))).unwrap();
        let (_, body) = out.split_once("\r\n\r\n").unwrap();
        assert!(body.ends_with("\r\n"));
        let lines: Vec<&str> = body.trim_end_matches("\r\n").split("\r\n").collect();
        for line in &lines[..lines.len() - 1] {
            assert_eq!(line.len(), 76);
        }
        assert!(lines.last().unwrap().len() <= 76);

        let decoded = String::from_utf8(STANDARD.decode(lines.concat()).unwrap()).unwrap();
        assert!(decoded.starts_with("<html><body><div style="));
        assert!(decoded.contains("lorem ipsum lorem"));
        assert!(decoded.contains("<a href=\"https://track.example.com/"));
        assert!(decoded.ends_with("</body></html>"));
    }

    #[test]
    fn test_unknown_cte_passes_through() {
        let src = "To: a@example.com\r\nContent-Type: text/html\r\nContent-Transfer-Encoding: x-custom\r\n\r\n<body><a href=\"http://x\">x</a></body>";
        let out = copy(src, Some(&wrapper(true, true, true))).unwrap();
        assert!(out.ends_with("\r\n\r\n<body><a href=\"http://x\">x</a></body>"));
    }

    #[test]
    fn test_quoted_printable_html_part_is_tracked() {
        let src = "To: a@example.com\r\n\
            Content-Type: multipart/alternative; boundary=\"qp\"\r\n\
            \r\n\
            --qp\r\n\
            Content-Type: text/plain\r\n\
            \r\n\
            plain\r\n\
            --qp\r\n\
            Content-Type: text/html; charset=utf-8\r\n\
            Content-Transfer-Encoding: Quoted-Printable\r\n\
            \r\n\
            <html><body><a href=3D\"http://example.com/p?a=3D1\">caf=C3=A9</a></body></html>\r\n\
            --qp--\r\n";
        let out = copy(src, Some(&wrapper(true, true, true))).unwrap();
        let parsed = mailparse::parse_mail(out.as_bytes()).unwrap();
        assert_eq!(parsed.subparts.len(), 2);
        assert_eq!(parsed.subparts[0].get_body().unwrap().trim_end(), "plain");

        let html = parsed.subparts[1].get_body().unwrap();
        assert!(html.starts_with("<html><body><div style="));
        assert!(html.contains("caf\u{e9}</a>"));
        assert!(html.contains("<img border=\"0\" width=\"1\" height=\"1\" alt=\"\" src="));

        let href = html.split("<a href=\"").nth(1).unwrap().split('"').next().unwrap();
        let decoded = decode_link(href).unwrap();
        assert_eq!(decoded.data.target_link_url, "http://example.com/p?a=1");
        assert!(out.ends_with("\r\n--qp--\r\n"));
    }

    #[test]
    fn test_unparseable_content_type_passes_through() {
        let src = "To: a@example.com\r\nContent-Type: garbage\r\n\r\n<body><a href=\"http://x\">x</a></body>";
        let out = copy(src, Some(&wrapper(true, true, true))).unwrap();
        assert!(out.ends_with("\r\n\r\n<body><a href=\"http://x\">x</a></body>"));
    }

    const MULTIPART: &str = "To: a@example.com\r\n\
        MIME-Version: 1.0\r\n\
        Content-Type: multipart/alternative; boundary=\"b1\"\r\n\
        \r\n\
        This is a preamble.\r\n\
        --b1\r\n\
        Content-Type: text/plain\r\n\
        \r\n\
        plain <a href=\"http://x\">not html</a>\r\n\
        --b1\r\n\
        Content-Type: multipart/related; boundary=b2\r\n\
        \r\n\
        --b2\r\n\
        Content-Type: text/html\r\n\
        \r\n\
        <html><body><a href=\"http://y\">y</a></body></html>\r\n\
        --b2\r\n\
        Content-Type: image/gif\r\n\
        Content-Transfer-Encoding: base64\r\n\
        \r\n\
        R0lGODlhAQABAAAAACw=\r\n\
        --b2--\r\n\
        \r\n\
        --b1--\r\n\
        epilogue\r\n";

    #[test]
    fn test_multipart_structure_is_preserved() {
        let out = copy(MULTIPART, Some(&wrapper(true, true, true))).unwrap();
        let parsed = mailparse::parse_mail(out.as_bytes()).unwrap();

        assert_eq!(parsed.ctype.mimetype, "multipart/alternative");
        assert_eq!(parsed.subparts.len(), 2);
        assert_eq!(
            parsed.subparts[0].get_body().unwrap().trim_end(),
            "plain <a href=\"http://x\">not html</a>"
        );

        let related = &parsed.subparts[1];
        assert_eq!(related.ctype.mimetype, "multipart/related");
        assert_eq!(related.subparts.len(), 2);
        let html = related.subparts[0].get_body().unwrap();
        assert!(html.contains("<a href=\"https://track.example.com/"));
        assert!(html.contains("<img border=\"0\" width=\"1\" height=\"1\" alt=\"\" src="));
        assert_eq!(related.subparts[1].ctype.mimetype, "image/gif");
        assert_eq!(related.subparts[1].get_body_raw().unwrap(), b"GIF89a\x01\x00\x01\x00\x00\x00\x00,");

        assert!(out.contains("\r\n\r\nThis is a preamble.\r\n--b1\r\n"));
        assert!(out.ends_with("\r\n--b1--\r\nepilogue\r\n"));
    }

    #[test]
    fn test_multipart_without_html_is_unchanged() {
        let src = "To: a@example.com\r\n\
            X-Sp-Message-Id: 0000aaaaaaaabbbbbbbb\r\n\
            Content-Type: multipart/mixed; boundary=zz\r\n\
            \r\n\
            --zz\r\n\
            Content-Type: text/plain\r\n\
            \r\n\
            one\r\n\
            --zz\r\n\
            \r\n\
            no headers here\r\n\
            --zz--\r\n";
        assert_eq!(copy(src, Some(&wrapper(true, true, true))).unwrap(), src);
    }

    #[test]
    fn test_multipart_missing_close_gets_one() {
        let src = "To: a@example.com\r\n\
            X-Sp-Message-Id: 0000aaaaaaaabbbbbbbb\r\n\
            Content-Type: multipart/mixed; boundary=zz\r\n\
            \r\n\
            --zz\r\n\
            Content-Type: text/plain\r\n\
            \r\n\
            one";
        let out = copy(src, Some(&wrapper(true, true, true))).unwrap();
        assert!(out.ends_with("\r\n\r\none\r\n--zz--\r\n"));
    }

    #[test]
    fn test_boundary_prefix_is_not_a_delimiter() {
        let marker = b"--ab";
        let body = b"--abc\r\nx\r\n--ab\r\ny\r\n--ab--\r\n";
        let d = find_delimiter(body, 0, marker).unwrap();
        assert_eq!(d.start, 10);
        assert!(!d.close);
        let close = find_delimiter(body, d.end, marker).unwrap();
        assert!(close.close);
        assert_eq!(close.eol_start, 17);
    }

    #[test]
    fn test_media_type_parse() {
        let m = MediaType::parse("Multipart/Mixed; boundary=\"abc def\"").unwrap();
        assert_eq!(m.essence, "multipart/mixed");
        assert_eq!(m.boundary.as_deref(), Some("abc def"));
        assert!(MediaType::parse("text/html; charset=utf-8").unwrap().is_html());
        assert!(MediaType::parse("html").is_none());
        assert!(MediaType::parse("text/").is_none());
        assert!(MediaType::parse("").is_none());
    }
}
