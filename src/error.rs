use thiserror::Error;

/// Failures of a watchlist scrape.
#[derive(Debug, Error)]
pub enum WatchlistError {
    #[error("Username is required")]
    UsernameRequired,

    /// Non-OK status on the first watchlist page.
    #[error("Failed to fetch watchlist: HTTP {0}")]
    UpstreamStatus(u16),

    #[error("{0}")]
    Transport(String),
}

impl From<reqwest::Error> for WatchlistError {
    fn from(e: reqwest::Error) -> Self {
        WatchlistError::Transport(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum SheetError {
    #[error("sheet request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("sheet request failed: HTTP {0}")]
    Status(u16),

    #[error("malformed sheet csv: {0}")]
    Csv(#[from] csv::Error),
}

/// Client-side lookup failure. Cloneable so every joined caller of a
/// coalesced request receives the same outcome.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("Username is required")]
    UsernameRequired,

    #[error("{0}")]
    Api(String),

    #[error("Invalid response: expected array of URIs")]
    InvalidResponse,

    #[error("{0}")]
    Transport(String),
}
