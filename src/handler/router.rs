//! Request dispatch module
//!
//! Adapts hyper requests to the preview dispatcher and renders its result as
//! an HTTP response. Every method is handled like GET.

use crate::config::AppState;
use crate::handler::dispatcher::{DispatchError, PreviewRequest, PreviewResponse};
use crate::http::{self, cache};
use crate::logger::{self, AccessLogEntry};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Request, Response, Version};
use percent_encoding::percent_decode_str;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

/// Main entry point for HTTP request handling
pub async fn handle_request<B>(
    req: Request<B>,
    state: Arc<AppState>,
    peer_addr: SocketAddr,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let started = Instant::now();
    let raw_path = req.uri().path();
    let if_none_match = req
        .headers()
        .get("if-none-match")
        .and_then(|v| v.to_str().ok());

    let response = match decode_path(raw_path) {
        Some(path_info) => {
            let outcome = state.dispatcher.dispatch(&PreviewRequest::new(path_info)).await;
            render(outcome, &state, if_none_match)
        }
        None => {
            logger::log_warning(&format!("Rejected request path: {raw_path}"));
            http::build_404_response(raw_path)
        }
    };

    if state.access_log {
        let mut entry = AccessLogEntry::new(
            peer_addr.ip().to_string(),
            req.method().to_string(),
            raw_path.to_string(),
        );
        entry.query = req.uri().query().map(ToString::to_string);
        entry.http_version = version_label(req.version()).to_string();
        entry.status = response.status().as_u16();
        entry.body_bytes = response_len(&response);
        entry.referer = header_value(&req, "referer");
        entry.user_agent = header_value(&req, "user-agent");
        entry.request_time_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
        logger::log_access(&entry, &state.config.logging.access_log_format);
    }

    Ok(response)
}

/// Percent-decode the URI path one segment at a time
///
/// `None` if a segment is not valid UTF-8 or decodes to a separator, so only
/// a literal `/` can end a directory path.
fn decode_path(raw: &str) -> Option<String> {
    let segments = raw
        .split('/')
        .map(|segment| percent_decode_str(segment).decode_utf8().ok())
        .collect::<Option<Vec<_>>>()?;
    if segments.iter().any(|segment| segment.contains('/')) {
        return None;
    }
    Some(segments.join("/"))
}

/// Turn a dispatcher outcome into an HTTP response
fn render(
    outcome: Result<PreviewResponse, DispatchError>,
    state: &AppState,
    if_none_match: Option<&str>,
) -> Response<Full<Bytes>> {
    let http_config = &state.config.http;
    match outcome {
        Ok(PreviewResponse::Static(file)) => {
            logger::log_debug(&format!("[Dispatch] Serving {}", file.path.display()));
            let etag = cache::generate_etag(&file.body);
            let policy = cache::CachePolicy::from_max_age(http_config.cache_max_age);
            if cache::check_etag_match(if_none_match, &etag) {
                return http::build_304_response(&etag, policy, &http_config.server_name);
            }
            http::build_file_response(
                file.body,
                file.content_type,
                &etag,
                policy,
                &http_config.server_name,
            )
        }
        Ok(PreviewResponse::NotFound(path)) => http::build_404_response(&path),
        Err(e) => {
            logger::log_error(&format!("Request failed: {e}"));
            http::build_500_response(&e)
        }
    }
}

fn header_value<B>(req: &Request<B>, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
}

fn response_len(resp: &Response<Full<Bytes>>) -> usize {
    resp.headers()
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

const fn version_label(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "0.9",
        Version::HTTP_10 => "1.0",
        Version::HTTP_2 => "2",
        Version::HTTP_3 => "3",
        _ => "1.1",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Overrides};
    use crate::config::RebuildMode;
    use crate::handler::builder::testing::FakeBuilder;
    use crate::handler::builder::BuildGate;
    use crate::handler::dispatcher::Dispatcher;
    use http_body_util::BodyExt;
    use tempfile::TempDir;

    fn config_for(dir: &TempDir) -> Config {
        let overrides = Overrides {
            site_root: Some(dir.path().to_path_buf()),
            disable_rebuild: true,
            ..Overrides::default()
        };
        let mut config = Config::load_from("does-not-exist/preview", &overrides).unwrap();
        config.logging.access_log = false;
        config
    }

    fn state_for(dir: &TempDir) -> Arc<AppState> {
        let config = config_for(dir);
        let dispatcher = Dispatcher::from_config(&config);
        Arc::new(AppState::new(&config, dispatcher))
    }

    fn rebuilding_state(dir: &TempDir, fake: &Arc<FakeBuilder>) -> Arc<AppState> {
        let dispatcher = Dispatcher::new(dir.path())
            .with_rebuild(BuildGate::new(fake.clone(), RebuildMode::Coalesce));
        Arc::new(AppState::new(&config_for(dir), dispatcher))
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    async fn get(state: &Arc<AppState>, uri: &str) -> Response<Full<Bytes>> {
        let req = Request::builder().uri(uri).body(()).unwrap();
        handle_request(req, Arc::clone(state), peer()).await.unwrap()
    }

    async fn body_of(resp: Response<Full<Bytes>>) -> Bytes {
        resp.into_body().collect().await.unwrap().to_bytes()
    }

    fn site(files: &[(&str, &str)]) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in files {
            std::fs::write(dir.path().join(name), content).unwrap();
        }
        dir
    }

    #[tokio::test]
    async fn test_root_serves_index() {
        let dir = site(&[("index.html", "<p>hi</p>")]);
        let state = state_for(&dir);

        let resp = get(&state, "/").await;
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers()["content-type"], "text/html; charset=utf-8");
        assert_eq!(resp.headers()["cache-control"], "no-cache");
        assert_eq!(resp.headers()["server"], "site-preview");
        assert!(resp.headers().contains_key("etag"));
        assert_eq!(body_of(resp).await, "<p>hi</p>");
    }

    #[tokio::test]
    async fn test_missing_file_is_404_with_path() {
        let dir = site(&[]);
        let state = state_for(&dir);

        let resp = get(&state, "/missing.css?v=2").await;
        assert_eq!(resp.status(), 404);
        assert_eq!(body_of(resp).await, "/missing.css");
    }

    #[tokio::test]
    async fn test_method_is_not_checked() {
        let dir = site(&[("data.json", "{}")]);
        let state = state_for(&dir);

        let req = Request::builder()
            .method("POST")
            .uri("/data.json")
            .body(())
            .unwrap();
        let resp = handle_request(req, state, peer()).await.unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers()["content-type"], "application/json");
    }

    #[tokio::test]
    async fn test_percent_encoded_path() {
        let dir = site(&[("my page.html", "spaced")]);
        let state = state_for(&dir);

        let resp = get(&state, "/my%20page.html").await;
        assert_eq!(resp.status(), 200);
        assert_eq!(body_of(resp).await, "spaced");

        // encoded dots are still traversal
        let resp = get(&state, "/%2e%2e/etc/passwd").await;
        assert_eq!(resp.status(), 404);
    }

    #[test]
    fn test_decode_path_by_segment() {
        assert_eq!(decode_path("/blog/my%20post/").as_deref(), Some("/blog/my post/"));
        assert_eq!(decode_path("/%2e%2e/x").as_deref(), Some("/../x"));
        assert_eq!(decode_path("/docs%2F"), None);
        assert_eq!(decode_path("/docs%2findex.html"), None);
        assert_eq!(decode_path("/%FF.html"), None);
    }

    #[tokio::test]
    async fn test_encoded_separator_is_not_a_directory() {
        let dir = site(&[]);
        std::fs::create_dir(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs/index.html"), "docs home").unwrap();
        let fake = Arc::new(FakeBuilder::new());
        let state = rebuilding_state(&dir, &fake);

        let resp = get(&state, "/docs%2F").await;
        assert_eq!(resp.status(), 404);
        assert_eq!(body_of(resp).await, "/docs%2F");
        assert_eq!(fake.runs(), 0);

        assert_eq!(get(&state, "/docs/").await.status(), 200);
        assert_eq!(fake.runs(), 1);
    }

    #[tokio::test]
    async fn test_etag_match_returns_304() {
        let dir = site(&[("app.js", "let a = 1;")]);
        let state = state_for(&dir);

        let first = get(&state, "/app.js").await;
        let etag = first.headers()["etag"].to_str().unwrap().to_string();

        let req = Request::builder()
            .uri("/app.js")
            .header("If-None-Match", &etag)
            .body(())
            .unwrap();
        let resp = handle_request(req, Arc::clone(&state), peer()).await.unwrap();
        assert_eq!(resp.status(), 304);
        assert_eq!(resp.headers()["etag"], etag.as_str());
    }

    #[tokio::test]
    async fn test_repeated_asset_fetch_is_identical() {
        let dir = site(&[("style.css", "h1{color:red}")]);
        let state = state_for(&dir);

        let a = body_of(get(&state, "/style.css").await).await;
        let b = body_of(get(&state, "/style.css").await).await;
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_html_request_serves_rebuilt_page() {
        let dir = site(&[("about.html", "old about")]);
        let page = dir.path().join("about.html");
        let fake = Arc::new(FakeBuilder::new().on_run(move || {
            std::fs::write(&page, "new about").unwrap();
        }));
        let state = rebuilding_state(&dir, &fake);

        let resp = get(&state, "/about.html").await;
        assert_eq!(resp.status(), 200);
        assert_eq!(body_of(resp).await, "new about");
        assert_eq!(fake.runs(), 1);

        // assets never trigger the build
        std::fs::write(dir.path().join("site.css"), "p{}").unwrap();
        assert_eq!(get(&state, "/site.css").await.status(), 200);
        assert_eq!(fake.runs(), 1);
    }

    #[tokio::test]
    async fn test_missing_build_tool_is_500() {
        let dir = site(&[("index.html", "home")]);
        let fake = Arc::new(FakeBuilder::new().failing_spawn());
        let state = rebuilding_state(&dir, &fake);

        let resp = get(&state, "/").await;
        assert_eq!(resp.status(), 500);
        let body = body_of(resp).await;
        assert!(String::from_utf8_lossy(&body).contains("fake-build"));
    }

    #[test]
    fn test_render_fault_is_500() {
        let dir = site(&[]);
        let state = state_for(&dir);
        let err = DispatchError::Read {
            path: "x.html".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let resp = render(Err(err), &state, None);
        assert_eq!(resp.status(), 500);
    }

    #[test]
    fn test_version_label() {
        assert_eq!(version_label(Version::HTTP_10), "1.0");
        assert_eq!(version_label(Version::HTTP_11), "1.1");
        assert_eq!(version_label(Version::HTTP_2), "2");
    }
}
