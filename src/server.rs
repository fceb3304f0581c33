//! HTTP surface: the watchlist API, its SSE progress stream and the static
//! app.

use std::path::{Path, PathBuf};

use actix_web::http::header::CONTENT_TYPE;
use actix_web::middleware::DefaultHeaders;
use actix_web::{HttpRequest, HttpResponse, Responder, get, guard, web};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::warn;

use crate::cache::WatchlistService;
use crate::canonical::normalize_username;
use crate::error::WatchlistError;
use crate::fetch::FetchEvent;

pub struct AppState {
    pub service: WatchlistService,
    pub public_dir: PathBuf,
}

#[derive(Deserialize)]
struct WatchlistQuery {
    user: Option<String>,
}

impl WatchlistQuery {
    fn id(&self) -> String {
        normalize_username(self.user.as_deref().unwrap_or_default())
    }
}

/// CORS headers added to every response.
pub fn cors_headers() -> DefaultHeaders {
    DefaultHeaders::new()
        .add(("Access-Control-Allow-Origin", "*"))
        .add(("Access-Control-Allow-Methods", "GET, OPTIONS"))
        .add(("Access-Control-Allow-Headers", "Content-Type"))
}

/// Registers every route. Preflights are answered before path matching.
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/{tail:.*}")
            .guard(guard::Options())
            .to(preflight),
    )
    .service(api_index)
    .service(healthz)
    .service(watchlist)
    .service(watchlist_stream)
    .default_service(web::to(static_file));
}

async fn preflight() -> HttpResponse {
    HttpResponse::NoContent().finish()
}

fn user_required() -> HttpResponse {
    HttpResponse::BadRequest().json(json!({ "error": "user query param required" }))
}

fn error_response(e: &WatchlistError) -> HttpResponse {
    match e {
        WatchlistError::UsernameRequired => user_required(),
        other => HttpResponse::InternalServerError().json(json!({ "error": other.to_string() })),
    }
}

#[get("/api")]
async fn api_index() -> impl Responder {
    HttpResponse::Ok().json(json!({
        "name": "ihavewatchit",
        "endpoints": {
            "watchlist": "GET /api/watchlist?user=<letterboxd_username> → array of film URIs",
            "watchlist_stream": "GET /api/watchlist/stream?user=<letterboxd_username> → SSE progress (start, page, done, error)",
        },
    }))
}

#[get("/healthz")]
async fn healthz() -> impl Responder {
    HttpResponse::Ok().body("ok")
}

#[get("/api/watchlist")]
async fn watchlist(state: web::Data<AppState>, q: web::Query<WatchlistQuery>) -> HttpResponse {
    let id = q.id();
    if id.is_empty() {
        return user_required();
    }
    match state.service.lookup(&id).await {
        Ok(found) => HttpResponse::Ok().json(found.uris.as_slice()),
        Err(e) => {
            warn!("[fetch] {} failed: {}", id, e);
            error_response(&e)
        }
    }
}

// --------------
// SSE streaming
// --------------

fn sse_event(event: &str, data_json: &str) -> Bytes {
    let payload = format!("event: {}\ndata: {}\n\n", event, data_json);
    Bytes::from(payload)
}

fn progress_event(ev: &FetchEvent) -> Bytes {
    let name = match ev {
        FetchEvent::Start { .. } => "start",
        FetchEvent::Page { .. } => "page",
    };
    sse_event(name, &serde_json::to_string(ev).unwrap_or_default())
}

#[get("/api/watchlist/stream")]
async fn watchlist_stream(
    state: web::Data<AppState>,
    q: web::Query<WatchlistQuery>,
) -> HttpResponse {
    let id = q.id();
    if id.is_empty() {
        return user_required();
    }

    let (tx, mut rx) = mpsc::channel::<Bytes>(32);
    actix_web::rt::spawn(async move {
        let (progress_tx, mut progress_rx) = mpsc::channel::<FetchEvent>(32);
        let scrape = state.service.lookup_with_progress(&id, Some(progress_tx));
        let forward = async {
            while let Some(ev) = progress_rx.recv().await {
                let _ = tx.send(progress_event(&ev)).await;
            }
        };
        let (result, ()) = tokio::join!(scrape, forward);

        let last = match result {
            Ok(found) => sse_event(
                "done",
                &json!({
                    "count": found.uris.len(),
                    "cached": found.cached,
                    "uris": found.uris.as_slice(),
                })
                .to_string(),
            ),
            Err(e) => {
                warn!("[fetch] {} failed: {}", id, e);
                sse_event("error", &json!({ "error": e.to_string() }).to_string())
            }
        };
        let _ = tx.send(last).await;
    });

    let stream = async_stream::stream! {
        while let Some(chunk) = rx.recv().await {
            yield Ok::<Bytes, actix_web::Error>(chunk);
        }
    };

    HttpResponse::Ok()
        .insert_header(("Content-Type", "text/event-stream"))
        .insert_header(("Cache-Control", "no-cache"))
        .insert_header(("Connection", "keep-alive"))
        .streaming(stream)
}

// -------------------------
// Static app
// -------------------------

#[derive(Debug, PartialEq, Eq)]
pub enum StaticTarget {
    File(PathBuf),
    Forbidden,
}

/// Maps a request path into `root`. `..` sequences are dropped and
/// extensionless paths fall back to `index.html` so client-side routes load
/// the app.
pub fn resolve_static(root: &Path, request_path: &str) -> StaticTarget {
    let trimmed = request_path.trim_end_matches('/');
    if trimmed.is_empty() {
        return StaticTarget::File(root.join("index.html"));
    }

    let safe = trimmed
        .trim_start_matches('/')
        .replace("..", "")
        .trim_start_matches('/')
        .to_string();
    let file = if safe.contains('.') {
        root.join(&safe)
    } else {
        root.join("index.html")
    };

    if file.starts_with(root) {
        StaticTarget::File(file)
    } else {
        StaticTarget::Forbidden
    }
}

async fn static_file(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    let path = match resolve_static(&state.public_dir, req.path()) {
        StaticTarget::File(path) => path,
        StaticTarget::Forbidden => return HttpResponse::Forbidden().body("Forbidden"),
    };

    match tokio::fs::read(&path).await {
        Ok(content) => {
            let mime = mime_guess::from_path(&path).first_or_octet_stream();
            HttpResponse::Ok()
                .insert_header((CONTENT_TYPE, mime.to_string()))
                .body(content)
        }
        Err(_) => HttpResponse::NotFound().body("Not found"),
    }
}
