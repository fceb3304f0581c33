//! Film extraction from a watchlist page.
//!
//! A page references each film several times over: the poster's
//! `data-target-link`, its `data-film-slug`, and plain `href="/film/..."`
//! anchors. Any subset may be present, so three independent passes run over
//! the parsed document and their results are merged on the canonical URI.

use std::collections::HashSet;
use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

use crate::canonical::{LETTERBOXD_ORIGIN, canonicalize, film_slug, film_uri};

/// How far up the tree to look for a film's name/year container.
const HINT_ANCESTOR_DEPTH: usize = 3;

const YEAR_ATTRS: [&str; 3] = [
    "data-film-release-year",
    "data-release-year",
    "data-film-year",
];

static TARGET_LINK: LazyLock<Selector> =
    LazyLock::new(|| selector(r#"[data-target-link^="/film/"]"#));
static FILM_SLUG: LazyLock<Selector> = LazyLock::new(|| selector("[data-film-slug]"));
static FILM_HREF: LazyLock<Selector> = LazyLock::new(|| selector(r#"[href^="/film/"]"#));

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilmRecord {
    pub name: String,
    pub year: String,
    /// Link as found on the page, made absolute.
    pub letterboxd_uri: String,
    /// Canonical URI; the dedup and join key.
    pub film_uri: String,
}

impl FilmRecord {
    /// Canonical URI, falling back to the source link.
    pub fn uri(&self) -> &str {
        if self.film_uri.is_empty() {
            &self.letterboxd_uri
        } else {
            &self.film_uri
        }
    }
}

/// Extracts one record per distinct film, in first-seen order (all of pass
/// one, then pass two, then pass three).
pub fn parse_watchlist_page(html: &str) -> Vec<FilmRecord> {
    let doc = Html::parse_document(html);
    let mut found = Vec::new();

    for el in doc.select(&TARGET_LINK) {
        if let Some(path) = el.value().attr("data-target-link") {
            push_film(&mut found, el, path, format!("{LETTERBOXD_ORIGIN}{path}"));
        }
    }

    for el in doc.select(&FILM_SLUG) {
        let slug = el.value().attr("data-film-slug").unwrap_or_default().trim();
        if slug.is_empty() {
            continue;
        }
        let path = format!("/film/{slug}/");
        push_film(&mut found, el, &path, film_uri(slug));
    }

    for el in doc.select(&FILM_HREF) {
        if let Some(href) = el.value().attr("href") {
            push_film(&mut found, el, href, format!("{LETTERBOXD_ORIGIN}{href}"));
        }
    }

    let mut seen = HashSet::new();
    found.retain(|f: &FilmRecord| !f.film_uri.is_empty() && seen.insert(f.film_uri.clone()));
    found
}

fn push_film(out: &mut Vec<FilmRecord>, el: ElementRef<'_>, path: &str, source_uri: String) {
    let absolute = if path.starts_with("http") {
        path.to_string()
    } else if path.starts_with('/') {
        format!("{LETTERBOXD_ORIGIN}{path}")
    } else {
        format!("{LETTERBOXD_ORIGIN}/{path}")
    };

    let film_uri = canonicalize(&absolute);
    if film_uri.is_empty() {
        return;
    }

    let (name, year) = name_year_near(el);
    // Pages without a name attribute still get a readable title from the slug.
    let name = name.unwrap_or_else(|| match film_slug(&film_uri) {
        Some(slug) => slug.trim_end_matches('/').replace('-', " "),
        None => film_uri.clone(),
    });

    out.push(FilmRecord {
        name,
        year: year.unwrap_or_default(),
        letterboxd_uri: source_uri,
        film_uri,
    });
}

/// Looks for name and year hints on the element's own subtree first, then on
/// each enclosing element up to the poster's list item. Ancestors are only
/// searched when such an item is reached within `HINT_ANCESTOR_DEPTH`.
fn name_year_near(el: ElementRef<'_>) -> (Option<String>, Option<String>) {
    let mut name = None;
    let mut year = None;

    for scope in hint_scopes(el) {
        if name.is_none() {
            name = first_attr(scope, "data-film-name", |v| !v.is_empty())
                .or_else(|| first_attr(scope, "alt", |v| !v.is_empty()));
        }
        if year.is_none() {
            year = YEAR_ATTRS
                .iter()
                .find_map(|attr| first_attr(scope, attr, is_year));
        }
        if name.is_some() && year.is_some() {
            break;
        }
    }

    (name, year)
}

fn hint_scopes(el: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    let mut scopes = vec![el];
    if is_container(el) {
        return scopes;
    }
    for parent in el
        .ancestors()
        .filter_map(ElementRef::wrap)
        .take(HINT_ANCESTOR_DEPTH)
    {
        scopes.push(parent);
        if is_container(parent) {
            return scopes;
        }
    }
    // not inside a poster: neighbouring markup belongs to other films
    scopes.truncate(1);
    scopes
}

fn is_container(el: ElementRef<'_>) -> bool {
    matches!(el.value().name(), "li" | "article")
}

fn first_attr(scope: ElementRef<'_>, attr: &str, accept: impl Fn(&str) -> bool) -> Option<String> {
    std::iter::once(scope)
        .chain(scope.descendants().filter_map(ElementRef::wrap))
        .filter_map(|e| e.value().attr(attr))
        .map(str::trim)
        .find(|v| accept(v))
        .map(str::to_string)
}

fn is_year(v: &str) -> bool {
    v.len() == 4 && v.bytes().all(|b| b.is_ascii_digit())
}
