use std::sync::Arc;

use actix_web::middleware::NormalizePath;
use actix_web::{App, HttpServer, web};
use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use ihavewatchit::cache::{SystemClock, WatchlistCache, WatchlistService};
use ihavewatchit::config::{ServerArgs, init_tracing};
use ihavewatchit::fetch::HttpPageFetcher;
use ihavewatchit::server::{self, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("ihavewatchit=info");
    let args = ServerArgs::parse();

    let fetcher = HttpPageFetcher::new().context("building http client")?;
    let service = WatchlistService::new(
        Arc::new(fetcher),
        WatchlistCache::new(args.cache_ttl(), Arc::new(SystemClock)),
    )
    .with_max_pages(args.max_pages);
    let state = web::Data::new(AppState {
        service,
        public_dir: args.public_dir.clone(),
    });

    info!(
        "Server at http://{}:{} (static files from {})",
        args.bind,
        args.port,
        args.public_dir.display()
    );
    info!("GET /api/watchlist?user=<letterboxd_username> → array of film URIs");

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(server::cors_headers())
            .wrap(NormalizePath::trim())
            .configure(server::routes)
    })
    .bind((args.bind.as_str(), args.port))
    .with_context(|| format!("binding {}:{}", args.bind, args.port))?
    .run()
    .await
    .context("server stopped")
}
