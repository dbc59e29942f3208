#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::header::LOCATION;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{Html, IntoResponse, Response};
use axum::Router;
use dirplay_core::Player;
use tokio::net::TcpListener;

/// A page served at an exact path-and-query.
pub struct Page {
    pub path: String,
    pub status: StatusCode,
    pub body: String,
    pub location: Option<String>,
}

pub fn ok(path: impl Into<String>, body: String) -> Page {
    Page {
        path: path.into(),
        status: StatusCode::OK,
        body,
        location: None,
    }
}

pub fn status(path: impl Into<String>, status: StatusCode) -> Page {
    Page {
        path: path.into(),
        status,
        body: String::new(),
        location: None,
    }
}

/// 307 to an absolute or server-relative `location`.
pub fn redirect(path: impl Into<String>, location: impl Into<String>) -> Page {
    Page {
        path: path.into(),
        status: StatusCode::TEMPORARY_REDIRECT,
        body: String::new(),
        location: Some(location.into()),
    }
}

/// Apache-style index page linking to `links`, including the usual
/// sort-order and parent-directory controls.
pub fn listing(links: &[&str]) -> String {
    let mut html = String::from(
        "<html><head><title>Index</title></head><body><h1>Index</h1>\n\
         <a href=\"?C=N;O=D\">Name</a> <a href=\"?C=M;O=A\">Last modified</a>\n\
         <a href=\"#content\">skip</a>\n<pre>\n",
    );
    for link in links {
        html.push_str(&format!("<a href=\"{link}\">{link}</a>\n"));
    }
    html.push_str("</pre></body></html>");
    html
}

#[derive(Default)]
struct ServerState {
    pages: HashMap<String, Page>,
    delay: Duration,
    hits: Mutex<HashMap<String, usize>>,
    cache_control: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

pub struct ListingServer {
    pub origin: String,
    state: Arc<ServerState>,
}

impl ListingServer {
    /// Audio root URL on this server, e.g. `http://127.0.0.1:PORT/audio/`.
    pub fn root(&self, prefix: &str) -> String {
        format!("{}{}", self.origin, prefix)
    }

    pub fn hits(&self, path: &str) -> usize {
        self.state
            .hits
            .lock()
            .unwrap()
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_hits(&self) -> usize {
        self.state.hits.lock().unwrap().values().sum()
    }

    pub fn cache_control_headers(&self) -> Vec<String> {
        self.state.cache_control.lock().unwrap().clone()
    }

    /// Most requests this server was handling at the same moment.
    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }
}

async fn serve_page(
    State(state): State<Arc<ServerState>>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let key = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string());

    *state.hits.lock().unwrap().entry(key.clone()).or_default() += 1;
    if let Some(v) = headers.get("cache-control").and_then(|v| v.to_str().ok()) {
        state.cache_control.lock().unwrap().push(v.to_string());
    }

    let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    state.max_in_flight.fetch_max(now, Ordering::SeqCst);
    if !state.delay.is_zero() {
        tokio::time::sleep(state.delay).await;
    }

    let response = match state.pages.get(&key) {
        Some(Page {
            status,
            location: Some(location),
            ..
        }) => (*status, [(LOCATION, location.clone())]).into_response(),
        Some(page) => (page.status, Html(page.body.clone())).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    };
    state.in_flight.fetch_sub(1, Ordering::SeqCst);
    response
}

pub async fn serve(pages: Vec<Page>) -> ListingServer {
    serve_with_delay(pages, Duration::ZERO).await
}

/// Like [`serve`], but every response waits `delay` first.
pub async fn serve_with_delay(pages: Vec<Page>, delay: Duration) -> ListingServer {
    let state = Arc::new(ServerState {
        pages: pages
            .into_iter()
            .map(|p| (p.path.clone(), p))
            .collect(),
        delay,
        ..Default::default()
    });

    let app = Router::new()
        .fallback(serve_page)
        .with_state(Arc::clone(&state));

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("test server");
    });

    ListingServer {
        origin: format!("http://{addr}"),
        state,
    }
}

/// Player that records what it was asked to do.
#[derive(Debug, Default)]
pub struct RecordingPlayer {
    pub source: Option<String>,
    pub playing: bool,
}

impl Player for RecordingPlayer {
    fn set_source(&mut self, path: &str) {
        self.source = Some(path.to_string());
    }

    fn play(&mut self) -> anyhow::Result<()> {
        self.playing = true;
        Ok(())
    }

    fn pause(&mut self) {
        self.playing = false;
    }

    fn reset_position(&mut self) {}
}
