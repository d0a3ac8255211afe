const DIRECTIVE_MARKER: char = '#';
const BOM: char = '\u{FEFF}';

/// anything in the requested url that marks it as a playlist. extra dialects go here
const PLAYLIST_MARKERS: &[&str] = &[".m3u8"];

/// what the relay does with a fetched body, decided from the requested url alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// buffered, rewritten, sent whole
    Playlist,
    /// streamed through untouched
    Passthrough,
}

impl ResourceKind {
    pub fn classify(url: &str) -> Self {
        if PLAYLIST_MARKERS.iter().any(|marker| url.contains(marker)) {
            Self::Playlist
        } else {
            Self::Passthrough
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistLine<'a> {
    Blank,
    Directive(&'a str),
    Uri(&'a str),
}

impl<'a> PlaylistLine<'a> {
    pub fn classify(raw: &'a str) -> Self {
        let trimmed = raw.trim();

        if trimmed.is_empty() {
            Self::Blank
        } else if trimmed.starts_with(DIRECTIVE_MARKER) {
            Self::Directive(trimmed)
        } else {
            Self::Uri(trimmed)
        }
    }
}

/// everything up to and including the last `/`, empty if there isn't one
pub fn base_path(url: &str) -> &str {
    match url.rfind('/') {
        Some(idx) => &url[..=idx],
        None => "",
    }
}

/// `scheme://` where scheme follows rfc 3986 (alpha, then alnum / + / - / .)
pub fn has_scheme(uri: &str) -> bool {
    let Some((scheme, _)) = uri.split_once("://") else {
        return false;
    };

    let mut chars = scheme.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// url pointing back at the relay with `target` as its encoded `url` param
pub fn relay_reference(relay_prefix: &str, target: &str) -> String {
    let separator = if relay_prefix.contains('?') { '&' } else { '?' };
    format!(
        "{}{}url={}",
        relay_prefix,
        separator,
        urlencoding::encode(target)
    )
}

/// rewrites every uri line of a playlist so it routes back through the relay
///
/// the base path comes from the url the client asked for, never from a line that was already
/// rewritten, so relative lines only get resolved once. directives are left alone, including
/// the ones with `URI="..."` attributes
pub struct PlaylistRewriter<'a> {
    base_path: &'a str,
    relay_prefix: &'a str,
}

impl<'a> PlaylistRewriter<'a> {
    pub fn new(requested_url: &'a str, relay_prefix: &'a str) -> Self {
        Self {
            base_path: base_path(requested_url),
            relay_prefix,
        }
    }

    pub fn base_path(&self) -> &str {
        self.base_path
    }

    pub fn resolve(&self, uri: &str) -> String {
        if has_scheme(uri) {
            uri.to_string()
        } else {
            format!("{}{}", self.base_path, uri)
        }
    }

    pub fn rewrite_line(&self, raw: &str) -> String {
        match PlaylistLine::classify(raw) {
            PlaylistLine::Blank => String::new(),
            PlaylistLine::Directive(directive) => directive.to_string(),
            PlaylistLine::Uri(uri) => relay_reference(self.relay_prefix, &self.resolve(uri)),
        }
    }

    // split on '\n' and not lines() so a trailing newline survives the round trip. a leading
    // bom would otherwise glue itself to #EXTM3U and turn the header into a uri line
    pub fn rewrite(&self, text: &str) -> String {
        let text = text.strip_prefix(BOM).unwrap_or(text);

        text.split('\n')
            .map(|line| self.rewrite_line(line))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
