pub mod broker;
pub mod debounce;
pub mod watcher;

use std::{
    convert::Infallible,
    future::Future,
    net::SocketAddr,
    path::{Path, PathBuf},
    pin::Pin,
    task::{self, Poll},
};

use anyhow::{Context, Result};
use axum::{
    Router,
    body::Body,
    extract::{
        Request, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{
        StatusCode, Uri,
        header::{CONTENT_LENGTH, CONTENT_TYPE},
    },
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use toastfront_core::Builder;
use tower::{Service, ServiceExt, util::MapRequest};
use tower_http::services::ServeDir;
use tracing::{debug, error, info, warn};

pub use broker::{ReloadBroker, ReloadEvent, Subscription};
pub use debounce::{DEBOUNCE_WINDOW, Debouncer};

/// Appended to every HTML response.
pub const LIVE_RELOAD_SCRIPT: &str = include_str!("livereload.html");

pub const LIVE_RELOAD_PATH: &str = "/__internal/livereload";

/// Configuration for the live development server
#[derive(Debug, Clone)]
pub struct LiveServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to serve on
    pub port: u16,
    /// Output directory to serve
    pub root: PathBuf,
    /// Page served, with a 404 status, for unknown paths
    pub redirect_404: Option<String>,
    /// Auto-open browser
    pub open: bool,
}

impl Default for LiveServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8100,
            root: PathBuf::from("build"),
            redirect_404: None,
            open: false,
        }
    }
}

/// Static file server with live reload.
pub struct LiveServer {
    config: LiveServerConfig,
    broker: ReloadBroker,
}

#[derive(Clone)]
struct AppState {
    broker: ReloadBroker,
}

impl LiveServer {
    pub fn new(config: LiveServerConfig) -> Self {
        Self {
            config,
            broker: ReloadBroker::new(),
        }
    }

    /// Broker whose events reach the connected browsers.
    pub fn broker(&self) -> ReloadBroker {
        self.broker.clone()
    }

    pub fn router(&self) -> Router {
        let state = AppState {
            broker: self.broker.clone(),
        };

        Router::new()
            .route(LIVE_RELOAD_PATH, get(livereload_handler))
            .fallback_service(self.static_files())
            .layer(middleware::from_fn(inject_livereload))
            .with_state(state)
    }

    /// Files from the output directory. Unknown paths retry as
    /// `<path>.html`, then fall back to the 404 page.
    fn static_files(&self) -> ServeDir<MapRequest<ServeDir<NotFound>, fn(Request) -> Request>> {
        let root = &self.config.root;
        let page = self
            .config
            .redirect_404
            .as_deref()
            .map(|page| root.join(page.trim_start_matches('/')));

        let with_extension = ServeDir::new(root)
            .fallback(NotFound { page })
            .map_request(with_html_extension::<Body> as fn(Request) -> Request);

        ServeDir::new(root)
            .append_index_html_on_directories(true)
            .fallback(with_extension)
    }

    /// Serve until the process is stopped.
    pub async fn run(self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .with_context(|| format!("invalid address {}:{}", self.config.host, self.config.port))?;

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("can't listen on {addr}"))?;

        let url = format!("http://{addr}");
        info!(url = %url, root = %self.config.root.display(), "serving");
        // Printed as-is so the address can be opened from the terminal.
        println!("Listening on {url}");

        if self.config.open {
            if let Err(e) = open::that(&url) {
                warn!(err = %e, "failed to open browser");
            }
        }

        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

/// Fallback for paths with no file: the configured 404 page or plain text.
#[derive(Clone)]
struct NotFound {
    page: Option<PathBuf>,
}

impl Service<Request> for NotFound {
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut task::Context<'_>) -> Poll<Result<(), Infallible>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _request: Request) -> Self::Future {
        let page = self.page.clone();
        Box::pin(async move { Ok(not_found(page).await) })
    }
}

async fn not_found(page: Option<PathBuf>) -> Response {
    if let Some(page) = page {
        match tokio::fs::read(&page).await {
            Ok(body) => {
                return (
                    StatusCode::NOT_FOUND,
                    [(CONTENT_TYPE, "text/html; charset=utf-8")],
                    body,
                )
                    .into_response();
            }
            Err(e) => warn!(file = %page.display(), err = %e, "can't read 404 page"),
        }
    }

    (StatusCode::NOT_FOUND, "404 page not found").into_response()
}

/// `/about` -> `/about.html`, for paths without an extension.
fn with_html_extension<B>(mut request: axum::http::Request<B>) -> axum::http::Request<B> {
    let path = request.uri().path();
    if path.ends_with('/') || Path::new(path).extension().is_some() {
        return request;
    }

    let rewritten = match request.uri().query() {
        Some(query) => format!("{path}.html?{query}"),
        None => format!("{path}.html"),
    };
    if let Ok(uri) = rewritten.parse::<Uri>() {
        *request.uri_mut() = uri;
    }
    request
}

async fn inject_livereload(request: Request, next: Next) -> Response {
    let response = next.run(request).await;

    let is_html = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("text/html"));
    let status = response.status();
    if !is_html || !(status == StatusCode::OK || status == StatusCode::NOT_FOUND) {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(err = %e, "could not live reload");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let mut html = Vec::with_capacity(bytes.len() + LIVE_RELOAD_SCRIPT.len());
    html.extend_from_slice(&bytes);
    html.extend_from_slice(LIVE_RELOAD_SCRIPT.as_bytes());

    parts.headers.remove(CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(html))
}

async fn livereload_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    debug!("live reload socket established");
    ws.on_upgrade(move |socket| wait_for_reload(socket, state.broker))
}

/// One reload per connection: wait for an event, send it, close.
async fn wait_for_reload(mut socket: WebSocket, broker: ReloadBroker) {
    let mut subscription = broker.subscribe();

    let reload = tokio::select! {
        event = subscription.recv() => event.is_some(),
        _ = client_gone(&mut socket) => false,
    };
    drop(subscription);

    if reload {
        if let Err(e) = socket.send(Message::Text("reload".into())).await {
            warn!(err = %e, "reload socket error");
        }
    }
    let _ = socket.send(Message::Close(None)).await;
}

async fn client_gone(socket: &mut WebSocket) {
    while let Some(Ok(message)) = socket.recv().await {
        if matches!(message, Message::Close(_)) {
            return;
        }
    }
}

/// Watch `source`, rebuild with `builder` after each burst of changes and
/// publish a reload on `broker` after every successful rebuild.
pub async fn watch_and_rebuild(source: PathBuf, build_dir: PathBuf, mut builder: Builder, broker: ReloadBroker) -> Result<()> {
    let (_watcher, changes) = watcher::watch(&source, Some(&build_dir))
        .with_context(|| format!("can't watch {}", source.display()))?;

    debounce::run(
        changes,
        Debouncer::default(),
        move || builder.build().map_err(anyhow::Error::from),
        broker,
    )
    .await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request as HttpRequest;

    fn site() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>home</h1>").unwrap();
        std::fs::write(dir.path().join("about.html"), "<h1>about</h1>").unwrap();
        std::fs::write(dir.path().join("404.html"), "<h1>lost</h1>").unwrap();
        std::fs::create_dir_all(dir.path().join("css")).unwrap();
        std::fs::write(dir.path().join("css/site.css"), "body{}").unwrap();
        dir
    }

    async fn get(router: Router, uri: &str) -> (StatusCode, String) {
        let response = router
            .oneshot(HttpRequest::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    fn server(root: &Path, redirect_404: Option<&str>) -> LiveServer {
        LiveServer::new(LiveServerConfig {
            root: root.to_path_buf(),
            redirect_404: redirect_404.map(String::from),
            ..LiveServerConfig::default()
        })
    }

    #[tokio::test]
    async fn test_html_gets_live_reload_script() {
        let dir = site();
        let (status, body) = get(server(dir.path(), None).router(), "/").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.starts_with("<h1>home</h1>"));
        assert!(body.ends_with(LIVE_RELOAD_SCRIPT));
    }

    #[tokio::test]
    async fn test_other_files_are_untouched() {
        let dir = site();
        let (status, body) = get(server(dir.path(), None).router(), "/css/site.css").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "body{}");
    }

    #[tokio::test]
    async fn test_html_extension_fallback() {
        let dir = site();
        let (status, body) = get(server(dir.path(), None).router(), "/about").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.starts_with("<h1>about</h1>"));
    }

    #[tokio::test]
    async fn test_unknown_paths() {
        let dir = site();

        let (status, body) = get(server(dir.path(), None).router(), "/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "404 page not found");

        let (status, body) = get(server(dir.path(), Some("/404.html")).router(), "/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.starts_with("<h1>lost</h1>"));
        assert!(body.ends_with(LIVE_RELOAD_SCRIPT));
    }

    #[test]
    fn test_with_html_extension() {
        let rewrite = |uri: &str| {
            with_html_extension(HttpRequest::get(uri).body(()).unwrap())
                .uri()
                .to_string()
        };

        assert_eq!(rewrite("/about"), "/about.html");
        assert_eq!(rewrite("/blog/post?x=1"), "/blog/post.html?x=1");
        assert_eq!(rewrite("/css/site.css"), "/css/site.css");
        assert_eq!(rewrite("/blog/"), "/blog/");
    }
}
