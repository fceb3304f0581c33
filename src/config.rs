//! Command-line and environment configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cache::API_MAX_PAGES;
use crate::fetch::DEFAULT_MAX_PAGES;

#[derive(Debug, Clone, Parser)]
#[command(name = "ihavewatchit", version, about = "Movie-log API and static app server")]
pub struct ServerArgs {
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0")]
    pub bind: String,

    /// Directory holding the browser app.
    #[arg(long, env = "PUBLIC_DIR", default_value = "public")]
    pub public_dir: PathBuf,

    /// Page cap for API scrapes.
    #[arg(long, env = "WATCHLIST_MAX_PAGES", default_value_t = API_MAX_PAGES)]
    pub max_pages: i64,

    #[arg(long, env = "WATCHLIST_CACHE_TTL_SECS", default_value_t = 300)]
    pub cache_ttl_secs: u64,
}

impl ServerArgs {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

#[derive(Debug, Clone, Parser)]
#[command(
    name = "fetch_watchlist",
    version,
    about = "Fetch a Letterboxd user's public watchlist as JSON"
)]
pub struct FetchArgs {
    pub username: Option<String>,

    /// Maximum watchlist pages to read (1-50).
    #[arg(long, default_value_t = DEFAULT_MAX_PAGES as i64, allow_negative_numbers = true)]
    pub pages: i64,

    /// Write the JSON to this file instead of stdout.
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Emit full film records instead of URIs.
    #[arg(long)]
    pub full: bool,

    /// Progress diagnostics on stderr.
    #[arg(long)]
    pub log: bool,

    /// Keep only films that are also in the watchlist sheet.
    #[arg(long)]
    pub sheet: bool,

    /// Print one random entry instead of the whole list.
    #[arg(long)]
    pub pick: bool,
}

/// Installs the stderr fmt subscriber. `RUST_LOG` wins over `default_filter`.
pub fn init_tracing(default_filter: &str) {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flags() {
        let args = FetchArgs::try_parse_from([
            "fetch_watchlist",
            "moviefanx",
            "--pages",
            "3",
            "--out",
            "out/list.json",
            "--full",
            "--log",
        ])
        .unwrap();
        assert_eq!(args.username.as_deref(), Some("moviefanx"));
        assert_eq!(args.pages, 3);
        assert_eq!(args.out, Some(PathBuf::from("out/list.json")));
        assert!(args.full && args.log && !args.pick && !args.sheet);
    }

    #[test]
    fn cli_defaults() {
        let args = FetchArgs::try_parse_from(["fetch_watchlist"]).unwrap();
        assert_eq!(args.username, None);
        assert_eq!(args.pages, 15);
        assert!(!args.full);
    }

    #[test]
    fn server_defaults() {
        let args = ServerArgs::try_parse_from(["ihavewatchit", "--port", "3000"]).unwrap();
        assert_eq!(args.port, 3000);
        assert_eq!(args.max_pages, 20);
        assert_eq!(args.cache_ttl(), Duration::from_secs(300));
    }
}
