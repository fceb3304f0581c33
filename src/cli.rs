//! The `fetch_watchlist` command.

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::config::FetchArgs;
use crate::fetch::{FetchOptions, HttpPageFetcher, PageFetcher, fetch_watchlist, into_uris};
use crate::scrape::FilmRecord;
use crate::sheet::{
    FilmRef, GoogleSheetSource, SheetSource, intersect, pick_random, sort_by_date_desc,
};

const USAGE: &str = "Usage: fetch_watchlist <username> \
                     [--pages N] [--out file.json] [--full] [--log]";

/// Exit status for an argument error: 0 for `--help`/`--version`, 1 for
/// anything malformed.
pub fn usage_exit_code(err: &clap::Error) -> u8 {
    if err.use_stderr() { 1 } else { 0 }
}

pub async fn run(args: &FetchArgs) -> Result<()> {
    let username = args.username.as_deref().unwrap_or_default();
    if username.trim().is_empty() {
        bail!(USAGE);
    }

    let fetcher = HttpPageFetcher::new()?;
    let films = scrape(&fetcher, username, args).await?;
    let (json, count) = if args.sheet {
        let sheet = GoogleSheetSource::watchlist()?;
        render_matches(&films, &sheet, args.pick).await?
    } else {
        render_films(films, args)?
    };
    emit(&json, count, args.out.as_deref(), args.log).await
}

async fn scrape(
    fetcher: &dyn PageFetcher,
    username: &str,
    args: &FetchArgs,
) -> Result<Vec<FilmRecord>> {
    let opts = FetchOptions {
        max_pages: Some(args.pages),
        log: args.log,
        progress: None,
    };
    Ok(fetch_watchlist(fetcher, username, &opts).await?)
}

/// Pretty JSON for the scraped films plus the number of items it holds.
pub fn render_films(films: Vec<FilmRecord>, args: &FetchArgs) -> Result<(String, usize)> {
    if args.full {
        render(&films, args.pick)
    } else {
        render(&into_uris(films), args.pick)
    }
}

/// Sheet rows that are on the watchlist, newest first.
pub async fn render_matches(
    films: &[FilmRecord],
    sheet: &dyn SheetSource,
    pick: bool,
) -> Result<(String, usize)> {
    let refs: Vec<FilmRef> = films.iter().map(FilmRef::from).collect();
    let mut rows = intersect(&refs, sheet).await?;
    sort_by_date_desc(&mut rows);
    render(&rows, pick)
}

fn render<T: Serialize>(items: &[T], pick: bool) -> Result<(String, usize)> {
    let value = if pick {
        match pick_random(items) {
            Some(item) => serde_json::to_value(item)?,
            None => Value::Null,
        }
    } else {
        serde_json::to_value(items)?
    };
    let count = match &value {
        Value::Array(a) => a.len(),
        Value::Null => 0,
        _ => 1,
    };
    Ok((serde_json::to_string_pretty(&value)?, count))
}

/// Writes to `out` (creating parent directories) or prints to stdout.
pub async fn emit(json: &str, count: usize, out: Option<&Path>, log: bool) -> Result<()> {
    match out {
        Some(path) => {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(dir)
                    .await
                    .with_context(|| format!("creating {}", dir.display()))?;
            }
            tokio::fs::write(path, json)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            if log {
                info!("[fetch] wrote {} items to {}", count, path.display());
            }
            println!("Saved {} items to {}", count, path.display());
        }
        None => {
            if log {
                info!("[fetch] output {} items to stdout", count);
            }
            println!("{json}");
        }
    }
    Ok(())
}
