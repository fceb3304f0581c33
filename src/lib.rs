//! Letterboxd watchlist scraping and matching for a personal movie log.
//!
//! A public watchlist is scraped page by page, reduced to canonical film
//! URIs, cached per user, and intersected with the film sheet that feeds the
//! log.

pub mod cache;
pub mod canonical;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod fetch;
pub mod scrape;
pub mod search;
pub mod server;
pub mod sheet;

pub use cache::{Lookup, WatchlistCache, WatchlistService};
pub use canonical::{canonicalize, normalize_username};
pub use client::WatchlistClient;
pub use error::{LookupError, SheetError, WatchlistError};
pub use fetch::{FetchOptions, HttpPageFetcher, PageFetcher, fetch_watchlist, fetch_watchlist_uris};
pub use scrape::{FilmRecord, parse_watchlist_page};
pub use sheet::{FilmRef, SheetRow, intersect};
