//! Streaming HTML rewriter.
//!
//! [`Tokenizer`] splits an HTML document into tokens that borrow the raw
//! input; [`HtmlRewriter`] maps those tokens to output chunks. Only three
//! places change: `href` values of `<a>` tags are click-wrapped, the initial
//! open pixel goes right after `<body>`, and the open pixel right before
//! `</body>`. All other bytes are passed through untouched.

use crate::tracking::Tracker;
use std::borrow::Cow;
use std::collections::VecDeque;
use std::io::Write;
use std::ops::Range;

/// Elements whose content is text up to the matching end tag.
const RAW_TEXT_ELEMENTS: &[&str] = &[
    "iframe", "noembed", "noframes", "noscript", "script", "style", "textarea", "title", "xmp",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Text,
    StartTag,
    SelfClosingTag,
    EndTag,
    /// Comments, doctypes, processing instructions and other `<!`/`<?` markup
    Comment,
}

/// One attribute of a tag. `value` indexes into the token's raw bytes and
/// excludes any surrounding quotes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: Option<Range<usize>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub raw: &'a [u8],
    /// Lowercased tag name, empty for non-tag tokens
    pub name: String,
    pub attrs: Vec<Attribute>,
}

impl<'a> Token<'a> {
    fn other(kind: TokenKind, raw: &'a [u8]) -> Self {
        Self {
            kind,
            raw,
            name: String::new(),
            attrs: Vec::new(),
        }
    }

    pub fn attr_value(&self, attr: &Attribute) -> Option<&'a [u8]> {
        attr.value.clone().map(|r| &self.raw[r])
    }
}

struct TagScan {
    end: usize,
    name: String,
    attrs: Vec<Attribute>,
    self_closing: bool,
}

/// HTML tokenizer over a fully buffered document
pub struct Tokenizer<'a> {
    input: &'a [u8],
    pos: usize,
    raw_text_until: Option<String>,
}

impl<'a> Tokenizer<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self {
            input,
            pos: 0,
            raw_text_until: None,
        }
    }

    fn emit(&mut self, kind: TokenKind, end: usize) -> Token<'a> {
        let raw = &self.input[self.pos..end];
        self.pos = end;
        Token::other(kind, raw)
    }

    /// Text content of a raw-text element, up to its end tag.
    fn raw_text(&mut self, element: &str) -> Option<Token<'a>> {
        let closing = format!("</{element}");
        let rest = &self.input[self.pos..];
        let end = rest
            .windows(closing.len())
            .enumerate()
            .find(|(i, w)| {
                w.eq_ignore_ascii_case(closing.as_bytes())
                    && rest
                        .get(i + closing.len())
                        .is_none_or(|b| b.is_ascii_whitespace() || *b == b'/' || *b == b'>')
            })
            .map(|(i, _)| self.pos + i)
            .unwrap_or(self.input.len());
        (end > self.pos).then(|| self.emit(TokenKind::Text, end))
    }

    /// Does a `<` at `at` open some markup construct?
    fn markup_starts_at(&self, at: usize) -> bool {
        match self.input.get(at + 1) {
            Some(b) if b.is_ascii_alphabetic() => true,
            Some(b'!') | Some(b'?') => true,
            Some(b'/') => self.input.get(at + 2).is_some(),
            _ => false,
        }
    }

    fn find_from(&self, from: usize, needle: &[u8]) -> Option<usize> {
        self.input
            .get(from..)?
            .windows(needle.len())
            .position(|w| w == needle)
            .map(|i| from + i)
    }

    fn scan_tag(&self, name_start: usize) -> Option<TagScan> {
        let input = self.input;
        let start = self.pos;
        let is_space = |b: u8| b.is_ascii_whitespace();

        let mut i = name_start;
        while i < input.len() && !is_space(input[i]) && input[i] != b'/' && input[i] != b'>' {
            i += 1;
        }
        let name = String::from_utf8_lossy(&input[name_start..i]).to_ascii_lowercase();
        let mut attrs = Vec::new();

        loop {
            while i < input.len() && is_space(input[i]) {
                i += 1;
            }
            match input.get(i)? {
                b'>' => {
                    return Some(TagScan {
                        end: i + 1,
                        name,
                        attrs,
                        self_closing: false,
                    });
                }
                b'/' => {
                    i += 1;
                    if input.get(i) == Some(&b'>') {
                        return Some(TagScan {
                            end: i + 1,
                            name,
                            attrs,
                            self_closing: true,
                        });
                    }
                    continue;
                }
                _ => {}
            }

            let attr_start = i;
            while i < input.len()
                && !is_space(input[i])
                && input[i] != b'/'
                && input[i] != b'>'
                && (i == attr_start || input[i] != b'=')
            {
                i += 1;
            }
            let attr_name = String::from_utf8_lossy(&input[attr_start..i]).to_ascii_lowercase();

            let mut j = i;
            while j < input.len() && is_space(input[j]) {
                j += 1;
            }
            let mut value = None;
            if input.get(j) == Some(&b'=') {
                j += 1;
                while j < input.len() && is_space(input[j]) {
                    j += 1;
                }
                match *input.get(j)? {
                    quote @ (b'"' | b'\'') => {
                        let close = j + 1 + input[j + 1..].iter().position(|&b| b == quote)?;
                        value = Some(j + 1 - start..close - start);
                        i = close + 1;
                    }
                    _ => {
                        let value_start = j;
                        while j < input.len() && !is_space(input[j]) && input[j] != b'>' {
                            j += 1;
                        }
                        value = Some(value_start - start..j - start);
                        i = j;
                    }
                }
            }
            attrs.push(Attribute {
                name: attr_name,
                value,
            });
        }
    }

    fn tag(&mut self, kind: TokenKind, name_start: usize) -> Token<'a> {
        match self.scan_tag(name_start) {
            Some(scan) => {
                let kind = match kind {
                    TokenKind::StartTag if scan.self_closing => TokenKind::SelfClosingTag,
                    other => other,
                };
                if kind == TokenKind::StartTag && RAW_TEXT_ELEMENTS.contains(&scan.name.as_str()) {
                    self.raw_text_until = Some(scan.name.clone());
                }
                let mut token = self.emit(kind, scan.end);
                token.name = scan.name;
                token.attrs = scan.attrs;
                token
            }
            // Unterminated tag: keep the rest of the document as text
            None => self.emit(TokenKind::Text, self.input.len()),
        }
    }
}

impl<'a> Iterator for Tokenizer<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        if let Some(element) = self.raw_text_until.take() {
            if let Some(text) = self.raw_text(&element) {
                return Some(text);
            }
        }
        if self.pos >= self.input.len() {
            return None;
        }

        let input = self.input;
        let pos = self.pos;
        if input[pos] == b'<' && self.markup_starts_at(pos) {
            let token = match input[pos + 1] {
                b'!' if input[pos..].starts_with(b"<!--") => {
                    let end = if input[pos..].starts_with(b"<!-->") {
                        pos + 5
                    } else if input[pos..].starts_with(b"<!--->") {
                        pos + 6
                    } else {
                        self.find_from(pos + 4, b"-->")
                            .map(|i| i + 3)
                            .unwrap_or(input.len())
                    };
                    self.emit(TokenKind::Comment, end)
                }
                b'!' | b'?' => {
                    let end = self.find_from(pos, b">").map(|i| i + 1).unwrap_or(input.len());
                    self.emit(TokenKind::Comment, end)
                }
                b'/' if input[pos + 2].is_ascii_alphabetic() => self.tag(TokenKind::EndTag, pos + 2),
                b'/' => {
                    let end = self.find_from(pos, b">").map(|i| i + 1).unwrap_or(input.len());
                    self.emit(TokenKind::Comment, end)
                }
                _ => self.tag(TokenKind::StartTag, pos + 1),
            };
            return Some(token);
        }

        let mut end = pos + 1;
        while end < input.len() && !(input[end] == b'<' && self.markup_starts_at(end)) {
            end += 1;
        }
        Some(self.emit(TokenKind::Text, end))
    }
}

/// Decode the character references that commonly appear in URLs.
fn unescape_attr(value: &str) -> Cow<'_, str> {
    if !value.contains('&') {
        return Cow::Borrowed(value);
    }
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let decoded = rest.find(';').and_then(|semi| {
            let entity = &rest[1..semi];
            let ch = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|d| d.parse().ok()))
                    .and_then(char::from_u32),
            };
            ch.map(|c| (c, semi + 1))
        });
        match decoded {
            Some((c, len)) => {
                out.push(c);
                rest = &rest[len..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// Lazily rewrites a tokenized document into output chunks.
pub struct HtmlRewriter<'a, 't> {
    tokens: Tokenizer<'a>,
    tracker: &'t Tracker<'t>,
    pending: VecDeque<Cow<'a, [u8]>>,
}

impl<'a, 't> HtmlRewriter<'a, 't> {
    pub fn new(html: &'a [u8], tracker: &'t Tracker<'t>) -> Self {
        Self {
            tokens: Tokenizer::new(html),
            tracker,
            pending: VecDeque::new(),
        }
    }

    fn rewrite_anchor(&self, token: &Token<'a>) -> Cow<'a, [u8]> {
        let mut out: Option<Vec<u8>> = None;
        let mut copied = 0;
        for attr in token.attrs.iter().filter(|a| a.name == "href") {
            let Some(range) = attr.value.clone() else {
                continue;
            };
            let original = String::from_utf8_lossy(&token.raw[range.clone()]);
            let target = unescape_attr(&original);
            let wrapped = self.tracker.wrap_url(&target);
            if wrapped == target {
                continue;
            }
            let buf = out.get_or_insert_with(|| Vec::with_capacity(token.raw.len() + wrapped.len()));
            buf.extend_from_slice(&token.raw[copied..range.start]);
            buf.extend_from_slice(escape_attr(&wrapped).as_bytes());
            copied = range.end;
        }
        match out {
            Some(mut buf) => {
                buf.extend_from_slice(&token.raw[copied..]);
                Cow::Owned(buf)
            }
            None => Cow::Borrowed(token.raw),
        }
    }

    fn push_fragment(&mut self, fragment: String) {
        if !fragment.is_empty() {
            self.pending.push_back(Cow::Owned(fragment.into_bytes()));
        }
    }
}

impl<'a> Iterator for HtmlRewriter<'a, '_> {
    type Item = Cow<'a, [u8]>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(chunk) = self.pending.pop_front() {
            return Some(chunk);
        }
        let token = self.tokens.next()?;
        match (token.kind, token.name.as_str()) {
            (TokenKind::StartTag | TokenKind::SelfClosingTag, "a") => {
                return Some(self.rewrite_anchor(&token));
            }
            (TokenKind::StartTag, "body") => {
                self.pending.push_back(Cow::Borrowed(token.raw));
                let pixel = self.tracker.initial_open_pixel();
                self.push_fragment(pixel);
            }
            (TokenKind::EndTag, "body") => {
                let pixel = self.tracker.open_pixel();
                self.push_fragment(pixel);
                self.pending.push_back(Cow::Borrowed(token.raw));
            }
            _ => return Some(Cow::Borrowed(token.raw)),
        }
        self.pending.pop_front()
    }
}

/// Rewrite `html` into `w`, adding engagement tracking.
///
/// Returns the number of bytes written.
pub fn track_html<W: Write + ?Sized>(
    w: &mut W,
    html: &[u8],
    tracker: &Tracker<'_>,
) -> std::io::Result<usize> {
    let mut count = 0;
    for chunk in HtmlRewriter::new(html, tracker) {
        w.write_all(&chunk)?;
        count += chunk.len();
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::{MessageContext, Wrapper, decode_link};

    fn wrapper(open: bool, initial_open: bool, link: bool) -> Wrapper {
        Wrapper::new("https://track.example.com", open, initial_open, link).unwrap()
    }

    fn rewrite(html: &str, wrapper: &Wrapper) -> String {
        let tracker = wrapper.tracker(MessageContext::new("00001122334455667788", "rcpt@example.com"));
        let mut out = Vec::new();
        let n = track_html(&mut out, html.as_bytes(), &tracker).unwrap();
        assert_eq!(n, out.len());
        String::from_utf8(out).unwrap()
    }

    fn kinds(html: &str) -> Vec<(TokenKind, String)> {
        Tokenizer::new(html.as_bytes())
            .map(|t| (t.kind, String::from_utf8_lossy(t.raw).into_owned()))
            .collect()
    }

    #[test]
    fn test_tokens_cover_input_exactly() {
        let html = "<!DOCTYPE html>\n<html><!-- c <a href=x> --><body class='m' >a < b\
                    <br/><script>if (a<b) { x = '<a href=\"y\">'; }</script></body></html><unfinished";
        let joined: String = kinds(html).into_iter().map(|(_, raw)| raw).collect();
        assert_eq!(joined, html);
    }

    #[test]
    fn test_token_classification() {
        let tokens = kinds("<p>x</p><!-- c --><br/><a\nhref=\"u\">");
        let k: Vec<TokenKind> = tokens.iter().map(|(k, _)| *k).collect();
        assert_eq!(
            k,
            vec![
                TokenKind::StartTag,
                TokenKind::Text,
                TokenKind::EndTag,
                TokenKind::Comment,
                TokenKind::SelfClosingTag,
                TokenKind::StartTag,
            ]
        );
    }

    #[test]
    fn test_empty_comments_end_at_their_own_bracket() {
        let tokens = kinds("<!--><!---><body><a href=\"u\">");
        let k: Vec<TokenKind> = tokens.iter().map(|(k, _)| *k).collect();
        assert_eq!(
            k,
            vec![
                TokenKind::Comment,
                TokenKind::Comment,
                TokenKind::StartTag,
                TokenKind::StartTag,
            ]
        );
        assert_eq!(tokens[0].1, "<!-->");
        assert_eq!(tokens[1].1, "<!--->");

        let w = wrapper(true, true, true);
        let out = rewrite("<!--><html><body><a href=\"http://x\">l</a></body></html>", &w);
        assert!(out.starts_with("<!--><html><body><div style="));
        assert!(out.contains("<a href=\"https://"));
    }

    #[test]
    fn test_attribute_spans() {
        let html = br#"<a class=btn HREF = 'http://x/?a=1&amp;b=2' data-x="q>r" disabled>"#;
        let token = Tokenizer::new(html).next().unwrap();
        assert_eq!(token.name, "a");
        let names: Vec<&str> = token.attrs.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["class", "href", "data-x", "disabled"]);
        assert_eq!(token.attr_value(&token.attrs[0]).unwrap(), b"btn");
        assert_eq!(token.attr_value(&token.attrs[1]).unwrap(), b"http://x/?a=1&amp;b=2");
        assert_eq!(token.attr_value(&token.attrs[2]).unwrap(), b"q>r");
        assert!(token.attrs[3].value.is_none());
        assert_eq!(token.raw.len(), html.len());
    }

    #[test]
    fn test_full_rewrite() {
        let html = r#"<html><body>text<a href="http://x">l</a></body></html>"#;
        let w = wrapper(true, true, true);
        let out = rewrite(html, &w);

        let tracker = w.tracker(MessageContext::new("00001122334455667788", "rcpt@example.com"));
        let initial = tracker.initial_open_pixel();
        let open = tracker.open_pixel();
        assert_eq!(out.matches(initial.as_str()).count(), 1);
        assert_eq!(out.matches(open.as_str()).count(), 1);
        assert!(out.starts_with(&format!("<html><body>{initial}text<a href=\"")));
        assert!(out.ends_with(&format!("\">l</a>{open}</body></html>")));

        let href = out.split("<a href=\"").nth(1).unwrap().split('"').next().unwrap();
        let decoded = decode_link(href).unwrap();
        assert_eq!(decoded.data.action, "c");
        assert_eq!(decoded.data.target_link_url, "http://x");
        assert_eq!(decoded.data.rcpt_to, "rcpt@example.com");
    }

    #[test]
    fn test_flags_off_is_identity() {
        let html = "<html>\r\n<BODY bgcolor=white>\r\n<A HREF=http://x/ title='t'>x</A>\r\n</Body></html>";
        assert_eq!(rewrite(html, &wrapper(false, false, false)), html);
    }

    #[test]
    fn test_uppercase_and_unquoted_href() {
        let out = rewrite("<A TITLE=t HREF=http://x/a>go</A>", &wrapper(false, false, true));
        assert!(out.starts_with("<A TITLE=t HREF=https://track.example.com/"));
        assert!(out.ends_with(">go</A>"));
        let href = out["<A TITLE=t HREF=".len()..].split('>').next().unwrap();
        assert_eq!(decode_link(href).unwrap().data.target_link_url, "http://x/a");
    }

    #[test]
    fn test_entities_in_href_are_decoded_before_wrapping() {
        let out = rewrite(
            r#"<a href="http://x/?a=1&amp;b=2">x</a>"#,
            &wrapper(false, false, true),
        );
        let href = out.split('"').nth(1).unwrap();
        assert_eq!(decode_link(href).unwrap().data.target_link_url, "http://x/?a=1&b=2");
    }

    #[test]
    fn test_script_content_is_not_rewritten() {
        let html = r#"<body><script>var s = '<a href="http://x">';</script></body>"#;
        let out = rewrite(html, &wrapper(false, false, true));
        assert_eq!(out, html);
    }

    #[test]
    fn test_non_anchor_hrefs_untouched() {
        let html = r#"<link href="http://x/style.css"><area href="http://x/">"#;
        assert_eq!(rewrite(html, &wrapper(true, true, true)), html);
    }

    #[test]
    fn test_unescape_attr() {
        assert_eq!(unescape_attr("a&amp;b&lt;&#65;&#x42;&bogus;&"), "a&b<AB&bogus;&");
        assert_eq!(unescape_attr("plain"), "plain");
    }
}
