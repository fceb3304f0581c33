//! Film URI canonicalisation.
//!
//! Letterboxd links show up in several shapes: relative (`/film/x/`), plain
//! http, prefixed with a member (`/someone/film/x/`), with or without the
//! trailing slash, sometimes with a query or a trailing sub-path. All of them
//! collapse to `https://letterboxd.com/film/<slug>/`, which is the join key
//! between scraped watchlists and sheet rows.

use std::sync::LazyLock;

use regex::Regex;

pub const LETTERBOXD_ORIGIN: &str = "https://letterboxd.com";

static HTTP_SCHEME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^http://").expect("static regex"));
static MEMBER_FILM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^https://letterboxd\.com/[^/]+/film/").expect("static regex")
});
static FILM_SLUG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^https://letterboxd\.com/film/([^/?#]+)").expect("static regex")
});

/// Canonical form of a film URL. Empty input gives an empty string, which
/// callers treat as "no URI".
pub fn canonicalize(url: &str) -> String {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let mut u = if trimmed.starts_with('/') {
        format!("{LETTERBOXD_ORIGIN}{trimmed}")
    } else {
        trimmed.to_string()
    };
    u = HTTP_SCHEME.replace(&u, "https://").into_owned();
    u = MEMBER_FILM
        .replace(&u, "https://letterboxd.com/film/")
        .into_owned();

    if let Some(slug) = film_slug(&u) {
        return film_uri(slug);
    }

    // Not a Letterboxd film link: pass it through, slash-terminated.
    if !u.ends_with('/') {
        u.push('/');
    }
    u
}

/// Slug of an absolute `https://letterboxd.com/film/<slug>` URL.
pub fn film_slug(url: &str) -> Option<&str> {
    FILM_SLUG
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

pub fn film_uri(slug: &str) -> String {
    format!("{LETTERBOXD_ORIGIN}/film/{slug}/")
}

/// Trims, lowercases and strips leading `@`s. An empty result means no
/// usable username was given.
pub fn normalize_username(value: &str) -> String {
    value
        .trim()
        .to_lowercase()
        .trim_start_matches('@')
        .to_string()
}
