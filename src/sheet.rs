//! The film sheet feed and its intersection with scraped watchlists.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::canonical::canonicalize;
use crate::error::SheetError;
use crate::scrape::FilmRecord;

pub const SHEET_ID: &str = "1sP2Tkz00oTiVoACyCznYBOqTaUecUVbUKSQUWVsQDe4";
pub const WATCHLIST_SHEET: &str = "watchlist";

/// Rows shorter than this are not film entries.
const MIN_COLUMNS: usize = 7;

/// One film entry of the sheet. Column order is fixed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetRow {
    pub date: String,
    pub name: String,
    pub year: String,
    pub letterboxd_uri: String,
    pub film_uri: String,
    pub image: String,
    pub poster: String,
    pub genre: String,
    pub director: String,
    pub rating: String,
    pub review: String,
}

impl SheetRow {
    pub fn canonical_uri(&self) -> String {
        canonical_of(&self.film_uri, &self.letterboxd_uri)
    }
}

/// A film reference coming from outside the sheet: either a bare URI or
/// anything carrying `filmUri`/`letterboxdUri`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilmRef {
    Uri(String),
    #[serde(rename_all = "camelCase")]
    Film {
        #[serde(default)]
        film_uri: String,
        #[serde(default)]
        letterboxd_uri: String,
    },
}

impl FilmRef {
    pub fn canonical_uri(&self) -> String {
        match self {
            FilmRef::Uri(u) => canonicalize(u),
            FilmRef::Film {
                film_uri,
                letterboxd_uri,
            } => canonical_of(film_uri, letterboxd_uri),
        }
    }
}

impl From<String> for FilmRef {
    fn from(uri: String) -> Self {
        FilmRef::Uri(uri)
    }
}

impl From<&str> for FilmRef {
    fn from(uri: &str) -> Self {
        FilmRef::Uri(uri.to_string())
    }
}

impl From<&FilmRecord> for FilmRef {
    fn from(f: &FilmRecord) -> Self {
        FilmRef::Film {
            film_uri: f.film_uri.clone(),
            letterboxd_uri: f.letterboxd_uri.clone(),
        }
    }
}

fn canonical_of(film_uri: &str, letterboxd_uri: &str) -> String {
    if film_uri.trim().is_empty() {
        canonicalize(letterboxd_uri)
    } else {
        canonicalize(film_uri)
    }
}

/// CSV export URL of one sheet tab.
pub fn sheet_csv_url(sheet_id: &str, sheet_name: &str) -> String {
    let name: String = url::form_urlencoded::byte_serialize(sheet_name.as_bytes()).collect();
    format!("https://docs.google.com/spreadsheets/d/{sheet_id}/gviz/tq?tqx=out:csv&sheet={name}")
}

/// Parses the sheet export. The first row is the header; rows with fewer
/// than seven columns are skipped and missing trailing columns are empty.
pub fn parse_sheet_csv(text: &str) -> Result<Vec<SheetRow>, SheetError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.trim().as_bytes());

    let mut rows = Vec::new();
    for record in rdr.records() {
        let rec = record?;
        if rec.len() < MIN_COLUMNS {
            continue;
        }
        let col = |i: usize| rec.get(i).unwrap_or_default().to_string();
        rows.push(SheetRow {
            date: col(0),
            name: col(1),
            year: col(2),
            letterboxd_uri: col(3),
            film_uri: col(4),
            image: col(5),
            poster: col(6),
            genre: col(7),
            director: col(8),
            rating: col(9),
            review: col(10),
        });
    }
    Ok(rows)
}

#[async_trait]
pub trait SheetSource: Send + Sync {
    async fn fetch_csv(&self) -> Result<String, SheetError>;
}

/// Published Google Sheets tab fetched as CSV.
pub struct GoogleSheetSource {
    client: reqwest::Client,
    url: String,
}

impl GoogleSheetSource {
    pub fn new(sheet_id: &str, sheet_name: &str) -> Result<Self, SheetError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(25))
            .build()?;
        Ok(Self {
            client,
            url: sheet_csv_url(sheet_id, sheet_name),
        })
    }

    pub fn watchlist() -> Result<Self, SheetError> {
        Self::new(SHEET_ID, WATCHLIST_SHEET)
    }
}

#[async_trait]
impl SheetSource for GoogleSheetSource {
    async fn fetch_csv(&self) -> Result<String, SheetError> {
        let rsp = self.client.get(&self.url).send().await?;
        if !rsp.status().is_success() {
            return Err(SheetError::Status(rsp.status().as_u16()));
        }
        Ok(rsp.text().await?)
    }
}

/// Canonical URIs of the given references, blanks dropped.
pub fn uri_set<'a, I>(external: I) -> HashSet<String>
where
    I: IntoIterator<Item = &'a FilmRef>,
{
    external
        .into_iter()
        .map(FilmRef::canonical_uri)
        .filter(|u| !u.is_empty())
        .collect()
}

/// Rows whose canonical URI is in `uris`, in sheet order.
pub fn matching_rows(uris: &HashSet<String>, rows: Vec<SheetRow>) -> Vec<SheetRow> {
    rows.into_iter()
        .filter(|row| {
            let uri = row.canonical_uri();
            !uri.is_empty() && uris.contains(&uri)
        })
        .collect()
}

/// Sheet rows that also appear in `external`. An empty reference set
/// returns immediately without touching the sheet.
pub async fn intersect(
    external: &[FilmRef],
    sheet: &dyn SheetSource,
) -> Result<Vec<SheetRow>, SheetError> {
    let uris = uri_set(external);
    if uris.is_empty() {
        return Ok(Vec::new());
    }

    let rows = parse_sheet_csv(&sheet.fetch_csv().await?)?;
    let total = rows.len();
    let matched = matching_rows(&uris, rows);
    info!(
        "[watchlist] intersection: external URIs={}, sheet rows={}, matches={}",
        uris.len(),
        total,
        matched.len()
    );
    debug!(
        "[watchlist] matched URIs: {:?}",
        matched.iter().map(SheetRow::canonical_uri).collect::<Vec<_>>()
    );
    Ok(matched)
}

/// Newest first. Dates compare as text, which holds for ISO dates.
pub fn sort_by_date_desc(rows: &mut [SheetRow]) {
    rows.sort_by(|a, b| b.date.cmp(&a.date));
}

pub fn pick_random<T>(items: &[T]) -> Option<&T> {
    items.choose(&mut rand::rng())
}
