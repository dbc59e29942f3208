//! Link resolution and the audio-root security boundary.
//!
//! Every href found in a listing is resolved against the listing's own URL
//! and reduced to a path relative to the audio root. Links that leave the
//! root's origin or its path prefix are rejected.

use percent_encoding::percent_decode_str;
use reqwest::Url;
use thiserror::Error;

use crate::error::CrawlError;

/// `url::ParseError`, reached through reqwest's re-export of `Url`.
pub type UrlParseError = <Url as std::str::FromStr>::Err;

/// Why a link was not accepted. Only used for diagnostics; the crawler
/// skips every rejected link the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("not a resolvable URL")]
    Unparseable,
    #[error("different origin")]
    CrossOrigin,
    #[error("outside the audio root")]
    OutsideRoot,
}

impl Rejection {
    /// Rejections that point somewhere the listing should not send us,
    /// as opposed to links that simply aren't URLs.
    pub fn is_boundary(&self) -> bool {
        matches!(self, Rejection::CrossOrigin | Rejection::OutsideRoot)
    }
}

/// Origin plus path prefix under which crawling is permitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioRoot {
    url: Url,
}

impl AudioRoot {
    pub fn parse(input: &str) -> Result<Self, CrawlError> {
        let invalid = |reason: &str| CrawlError::InvalidRoot {
            url: input.to_string(),
            reason: reason.to_string(),
        };

        let mut url = Url::parse(input).map_err(|e| invalid(&e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid("scheme must be http or https"));
        }
        if url.host_str().is_none() {
            return Err(invalid("missing host"));
        }

        url.set_query(None);
        url.set_fragment(None);
        let mut path = decode_unreserved(url.path());
        if !path.ends_with('/') {
            path.push('/');
        }
        url.set_path(&path);
        Ok(Self { url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Absolute path prefix, always ending in `/`.
    pub fn prefix(&self) -> &str {
        self.url.path()
    }

    /// Whether `url` is on the root's origin and under its path prefix.
    pub fn contains(&self, url: &Url) -> bool {
        url.origin() == self.url.origin()
            && decode_unreserved(url.path()).starts_with(self.prefix())
    }

    /// Absolute URL for a root-relative path produced by [`normalize`].
    pub fn url_for(&self, rel: &str) -> Result<Url, UrlParseError> {
        // Concatenate instead of `join`: a relative path like `a:b.mp3`
        // would otherwise parse as a scheme.
        Url::parse(&format!("{}{}", self.url.as_str(), rel))
    }
}

/// Resolve `href` against `base` and reduce it to a root-relative path.
///
/// The query string is kept and the fragment dropped. A trailing `/`
/// survives, which is how directories are recognised later.
pub fn normalize(href: &str, base: &Url, root: &AudioRoot) -> Result<String, Rejection> {
    let resolved = base.join(href).map_err(|_| Rejection::Unparseable)?;

    if resolved.origin() != root.url.origin() {
        return Err(Rejection::CrossOrigin);
    }

    let path = decode_unreserved(resolved.path());
    let rel = path
        .strip_prefix(root.prefix())
        .ok_or(Rejection::OutsideRoot)?;

    let mut out = rel.to_string();
    if let Some(query) = resolved.query() {
        out.push('?');
        out.push_str(query);
    }
    Ok(out)
}

/// Key identifying a directory for cycle detection: absolute path plus query.
pub fn canonical_key(url: &Url) -> String {
    let path = decode_unreserved(url.path());
    match url.query() {
        Some(q) => format!("{}?{}", path, q),
        None => path,
    }
}

/// RFC 3986 §6.2.2 path normalization: escapes of unreserved characters
/// (`A-Z a-z 0-9 - . _ ~`) are decoded and every other escape gets
/// upper-case hex, so `%61/` and `a/` name the same directory.
fn decode_unreserved(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut rest = path;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let hex = rest
            .get(pos + 1..pos + 3)
            .filter(|h| h.bytes().all(|b| b.is_ascii_hexdigit()));
        match hex {
            Some(hex) => {
                let byte = percent_decode_str(&rest[pos..pos + 3])
                    .next()
                    .unwrap_or_default();
                if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
                    out.push(char::from(byte));
                } else {
                    out.push('%');
                    out.push_str(&hex.to_ascii_uppercase());
                }
                rest = &rest[pos + 3..];
            }
            None => {
                out.push('%');
                rest = &rest[pos + 1..];
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> AudioRoot {
        AudioRoot::parse("http://music.local:8000/audio/").unwrap()
    }

    fn base(rel: &str) -> Url {
        root().url_for(rel).unwrap()
    }

    #[test]
    fn root_gets_trailing_slash_and_loses_query() {
        let r = AudioRoot::parse("http://music.local/audio?sort=name#top").unwrap();
        assert_eq!(r.url().as_str(), "http://music.local/audio/");
        assert_eq!(r.prefix(), "/audio/");
    }

    #[test]
    fn root_must_be_http() {
        assert!(matches!(
            AudioRoot::parse("file:///srv/audio/"),
            Err(CrawlError::InvalidRoot { .. })
        ));
        assert!(AudioRoot::parse("not a url").is_err());
    }

    #[test]
    fn relative_links_resolve_against_listing() {
        let b = base("albums/");
        assert_eq!(normalize("one.mp3", &b, &root()), Ok("albums/one.mp3".into()));
        assert_eq!(normalize("live/", &b, &root()), Ok("albums/live/".into()));
        assert_eq!(
            normalize("/audio/top.ogg", &b, &root()),
            Ok("top.ogg".into())
        );
        assert_eq!(normalize("../", &b, &root()), Ok("".into()));
    }

    #[test]
    fn query_kept_fragment_dropped() {
        let b = base("");
        assert_eq!(
            normalize("song.mp3?dl=1#t=30", &b, &root()),
            Ok("song.mp3?dl=1".into())
        );
    }

    #[test]
    fn percent_encoding_is_preserved() {
        let b = base("");
        assert_eq!(
            normalize("My%20Song.flac", &b, &root()),
            Ok("My%20Song.flac".into())
        );
        assert_eq!(
            normalize("My Song.flac", &b, &root()),
            Ok("My%20Song.flac".into())
        );
    }

    #[test]
    fn escapes_are_rejected() {
        let b = base("albums/");
        assert_eq!(normalize("../../", &b, &root()), Err(Rejection::OutsideRoot));
        assert_eq!(normalize("/etc/passwd", &b, &root()), Err(Rejection::OutsideRoot));
        assert_eq!(
            normalize("%2e%2e/%2e%2e/secret.mp3", &b, &root()),
            Err(Rejection::OutsideRoot)
        );
        assert_eq!(normalize("/audio", &b, &root()), Err(Rejection::OutsideRoot));
        assert_eq!(
            normalize("/audiobooks/x.mp3", &b, &root()),
            Err(Rejection::OutsideRoot)
        );
    }

    #[test]
    fn other_origins_are_rejected() {
        let b = base("");
        for href in [
            "https://music.local:8000/audio/a.mp3",
            "http://music.local/audio/a.mp3",
            "http://evil.example/audio/a.mp3",
            "//evil.example/audio/a.mp3",
            "mailto:someone@music.local",
            "javascript:alert(1)",
        ] {
            assert_eq!(normalize(href, &b, &root()), Err(Rejection::CrossOrigin), "{href}");
        }
    }

    #[test]
    fn accepted_paths_never_leave_the_root() {
        let hrefs = [
            "a.mp3", "./b/", "../c.mp3", "../../d/", "/e.mp3", "/audio/../f.mp3",
            "g/../../h.mp3", "?C=N;O=D", "#frag", "%2E%2E/i.mp3", "j/%2e%2e/%2e%2e/k/",
            "http://music.local:8000/audio/l/", "http://music.local:8000/m.mp3",
            "", "/", "//music.local:8000/audio/n.wav",
        ];
        let r = root();
        for dir in ["", "x/", "x/y/z/"] {
            let b = base(dir);
            for href in hrefs {
                if let Ok(rel) = normalize(href, &b, &r) {
                    let abs = r.url_for(&rel).unwrap();
                    assert_eq!(abs.origin(), r.url().origin(), "{dir} + {href}");
                    assert!(abs.path().starts_with(r.prefix()), "{dir} + {href} -> {rel}");
                }
            }
        }
    }

    #[test]
    fn normalize_is_deterministic() {
        let b = base("x/");
        let first = normalize("../y/z.mp3?q=1", &b, &root());
        for _ in 0..10 {
            assert_eq!(normalize("../y/z.mp3?q=1", &b, &root()), first);
        }
    }

    #[test]
    fn canonical_key_includes_query() {
        let u = Url::parse("http://h/audio/a/?v=2#frag").unwrap();
        assert_eq!(canonical_key(&u), "/audio/a/?v=2");
        let u = Url::parse("http://h/audio/a/").unwrap();
        assert_eq!(canonical_key(&u), "/audio/a/");
    }

    #[test]
    fn unreserved_escapes_name_the_same_path() {
        let b = base("");
        assert_eq!(normalize("%53ong.mp3", &b, &root()), Ok("Song.mp3".into()));
        assert_eq!(normalize("%61/", &b, &root()), Ok("a/".into()));
        assert_eq!(normalize("%7e%2d%5F.ogg", &b, &root()), Ok("~-_.ogg".into()));
        assert_eq!(normalize("/%61udio/x.mp3", &b, &root()), Ok("x.mp3".into()));
        // Reserved characters and non-ASCII bytes stay escaped.
        assert_eq!(normalize("a%2fb.mp3", &b, &root()), Ok("a%2Fb.mp3".into()));
        assert_eq!(normalize("My%20Song.mp3", &b, &root()), Ok("My%20Song.mp3".into()));
        assert_eq!(normalize("caf%c3%a9.mp3", &b, &root()), Ok("caf%C3%A9.mp3".into()));
    }

    #[test]
    fn canonical_key_decodes_unreserved() {
        let escaped = Url::parse("http://h/audio/%61/?v=1").unwrap();
        let plain = Url::parse("http://h/audio/a/?v=1").unwrap();
        assert_eq!(canonical_key(&escaped), canonical_key(&plain));
    }

    #[test]
    fn root_prefix_is_canonical() {
        let r = AudioRoot::parse("http://music.local:8000/%61udio").unwrap();
        assert_eq!(r.prefix(), "/audio/");
        assert_eq!(r, root());
    }

    #[test]
    fn contains_checks_origin_and_prefix() {
        let r = root();
        assert!(r.contains(&Url::parse("http://music.local:8000/audio/a/").unwrap()));
        assert!(r.contains(&Url::parse("http://music.local:8000/%61udio/a/").unwrap()));
        assert!(!r.contains(&Url::parse("http://music.local:8000/private/").unwrap()));
        assert!(!r.contains(&Url::parse("http://evil.example:8000/audio/").unwrap()));
        assert!(!r.contains(&Url::parse("https://music.local:8000/audio/").unwrap()));
    }

    #[test]
    fn boundary_rejections() {
        assert!(Rejection::CrossOrigin.is_boundary());
        assert!(Rejection::OutsideRoot.is_boundary());
        assert!(!Rejection::Unparseable.is_boundary());
    }
}
