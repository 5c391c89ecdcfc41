//! HTTP dev server.
//!
//! Serves the built asset tree over HTTP. Every request maps the URL
//! path into the project package's serve directory and resolves it
//! through the build service, so a response always reflects every
//! source change the service had accepted before the request arrived.

use std::io;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use percent_encoding::percent_decode_str;
use tokio::net::TcpListener;

use crate::asset::AssetId;
use crate::config::Config;
use crate::graph::Resolved;
use crate::scheduler::BuildService;
use crate::watch::timestamp;

struct ServerState {
    service: Arc<BuildService>,
    package: String,
    serve_dir: String,
}

/// Build the request router for the dev server.
pub fn router(service: Arc<BuildService>, config: &Config) -> Router {
    let state = Arc::new(ServerState {
        service,
        package: config.project.name.clone(),
        serve_dir: config.project.serve_dir.clone(),
    });
    Router::new().fallback(handle_request).with_state(state)
}

/// Serve `router` on `listener` until the connection loop ends.
pub async fn serve(listener: TcpListener, router: Router) -> io::Result<()> {
    axum::serve(listener, router).await
}

async fn handle_request(
    State(state): State<Arc<ServerState>>,
    method: Method,
    uri: Uri,
) -> Response {
    let request_path = uri.path().to_string();
    if method != Method::GET {
        let response =
            (StatusCode::METHOD_NOT_ALLOWED, "Only GET is supported\n").into_response();
        log_request(&method, &request_path, response.status());
        return response;
    }

    let id = AssetId::new(&state.package, asset_path(&state.serve_dir, &request_path));
    let service = Arc::clone(&state.service);

    // The service call blocks on the scheduler thread.
    let resolved = tokio::task::spawn_blocking(move || service.resolve(id)).await;

    let response = match resolved {
        Ok(Some(Resolved::Available(asset))) => {
            let content_type = content_type_for(asset.id.extension());
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, content_type)],
                Body::from(asset.content.as_slice().to_vec()),
            )
                .into_response()
        }
        Ok(Some(Resolved::Error(error))) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Build error for {}:\n  {}\n", request_path, error),
        )
            .into_response(),
        Ok(Some(Resolved::NotFound)) => {
            (StatusCode::NOT_FOUND, format!("Not found: {}\n", request_path)).into_response()
        }
        // Service shut down or the blocking task was cancelled.
        Ok(None) | Err(_) => {
            (StatusCode::SERVICE_UNAVAILABLE, "Build service unavailable\n").into_response()
        }
    };
    log_request(&method, &request_path, response.status());
    response
}

fn log_request(method: &Method, path: &str, status: StatusCode) {
    println!("[{}] {} {} -> {}", timestamp(), method, path, status.as_u16());
}

/// Map a URL path into the serve directory. The path is
/// percent-decoded first so escaped names reach the right slot; the
/// root URL serves `index.html`.
fn asset_path(serve_dir: &str, request_path: &str) -> String {
    let decoded = percent_decode_str(request_path).decode_utf8_lossy();
    let trimmed = decoded.trim_start_matches('/');
    if trimmed.is_empty() {
        format!("{}/index.html", serve_dir)
    } else {
        format!("{}/{}", serve_dir, trimmed)
    }
}

/// Content type by file extension; everything unknown is served as
/// bytes.
fn content_type_for(extension: Option<&str>) -> &'static str {
    match extension {
        Some("html") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") => "text/javascript; charset=utf-8",
        Some("json") => "application/json",
        Some("txt") => "text/plain; charset=utf-8",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("wasm") => "application/wasm",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_url_maps_to_index_html() {
        assert_eq!(asset_path("web", "/"), "web/index.html");
        assert_eq!(asset_path("web", ""), "web/index.html");
    }

    #[test]
    fn test_url_path_maps_into_serve_dir() {
        assert_eq!(asset_path("web", "/app.js"), "web/app.js");
        assert_eq!(asset_path("web", "/sub/page.html"), "web/sub/page.html");
        assert_eq!(asset_path("public", "/a.txt"), "public/a.txt");
    }

    #[test]
    fn test_url_path_is_percent_decoded() {
        assert_eq!(asset_path("web", "/release%20notes.txt"), "web/release notes.txt");
        assert_eq!(asset_path("web", "/caf%C3%A9.html"), "web/café.html");
        assert_eq!(asset_path("web", "/plain.txt"), "web/plain.txt");
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for(Some("html")), "text/html; charset=utf-8");
        assert_eq!(content_type_for(Some("css")), "text/css; charset=utf-8");
        assert_eq!(content_type_for(Some("wasm")), "application/wasm");
        assert_eq!(content_type_for(Some("bin")), "application/octet-stream");
        assert_eq!(content_type_for(None), "application/octet-stream");
    }
}
