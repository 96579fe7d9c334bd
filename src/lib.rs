use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub mod api;
pub mod library;
pub mod startup_checks;
pub mod static_files;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub app: AppConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub static_files: StaticConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub name: String,
    pub log_level: String,
    /// Origin used for image locators. Derived from each request when unset.
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_file: PathBuf,
    pub image_directory: PathBuf,
    /// URL path under which `image_directory` is served.
    pub public_path: String,
    pub max_upload_bytes: u64,
    pub allowed_types: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StaticConfig {
    /// Built gallery client, served for any path not claimed by the API.
    pub directory: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_file: PathBuf::from("data/image.json"),
            image_directory: PathBuf::from("uploaded-images"),
            public_path: "/uploaded-images".to_string(),
            max_upload_bytes: 3 * 1024 * 1024,
            allowed_types: vec![
                "image/jpeg".to_string(),
                "image/jpg".to_string(),
                "image/png".to_string(),
            ],
        }
    }
}

impl Default for StaticConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("public"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
            app: AppConfig {
                name: "Snapshelf".to_string(),
                log_level: "info".to_string(),
                base_url: None,
            },
            storage: StorageConfig::default(),
            static_files: StaticConfig::default(),
        }
    }
}

use axum::{
    Router,
    extract::{DefaultBodyLimit, Path, State},
    http::{Method, Uri, header},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Room for multipart boundaries and the title field on top of the file.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub library: library::SharedLibrary,
    pub image_files: static_files::StaticFileHandler,
    pub client_files: static_files::StaticFileHandler,
    pub config: Config,
}

async fn image_file_handler(
    State(app_state): State<AppState>,
    Path(path): Path<String>,
) -> impl IntoResponse {
    app_state.image_files.serve(&path).await
}

async fn client_file_handler(
    State(app_state): State<AppState>,
    method: Method,
    uri: Uri,
) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return api::not_found();
    }

    let path = match uri.path().trim_start_matches('/') {
        "" => "index.html",
        path => path,
    };
    app_state.client_files.serve(path).await
}

pub async fn create_app(config: Config) -> Router {
    let library = Arc::new(library::ImageLibrary::new(config.storage.clone()));

    let image_files =
        static_files::StaticFileHandler::new(config.storage.image_directory.clone());
    let client_files = static_files::StaticFileHandler::new(config.static_files.directory.clone());

    let upload_limit = usize::try_from(config.storage.max_upload_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    let image_route = format!(
        "/{}/{{*path}}",
        config.storage.public_path.trim_matches('/')
    );

    let app_state = AppState {
        library,
        image_files,
        client_files,
        config: config.clone(),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route(
            "/api/image",
            axum::routing::get(api::list_images_handler)
                .post(api::upload_image_handler)
                .delete(api::delete_images_handler)
                .layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/health", axum::routing::get(api::health_handler))
        .route(&image_route, axum::routing::get(image_file_handler))
        .fallback(client_file_handler)
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(|request: &axum::http::Request<_>| {
                            let matched_path = request
                                .extensions()
                                .get::<axum::extract::MatchedPath>()
                                .map(|matched_path| matched_path.as_str());

                            tracing::info_span!(
                                "http_request",
                                method = %request.method(),
                                uri = %request.uri(),
                                matched_path,
                            )
                        })
                        .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
                            let content_length = request
                                .headers()
                                .get(header::CONTENT_LENGTH)
                                .and_then(|h| h.to_str().ok())
                                .unwrap_or("-");
                            let user_agent = request
                                .headers()
                                .get(header::USER_AGENT)
                                .and_then(|h| h.to_str().ok())
                                .unwrap_or("-");

                            tracing::info!(
                                target: "access_log",
                                method = %request.method(),
                                path = %request.uri().path(),
                                content_length = %content_length,
                                user_agent = %user_agent,
                                "request"
                            );
                        })
                        .on_response(
                            |response: &axum::http::Response<_>,
                             latency: std::time::Duration,
                             _span: &tracing::Span| {
                                tracing::info!(
                                    target: "access_log",
                                    status = %response.status(),
                                    latency_ms = %latency.as_millis(),
                                    "response"
                                );
                            },
                        ),
                )
                .layer(cors),
        )
        .with_state(app_state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_storage_defaults() {
        let config: Config = toml_edit::de::from_str(
            r#"
[server]
host = "0.0.0.0"
port = 8080

[app]
name = "Gallery"
log_level = "debug"
base_url = "https://gallery.example.com"

[storage]
image_directory = "/var/lib/gallery/images"
"#,
        )
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(
            config.app.base_url.as_deref(),
            Some("https://gallery.example.com")
        );
        assert_eq!(
            config.storage.image_directory,
            PathBuf::from("/var/lib/gallery/images")
        );
        assert_eq!(config.storage.data_file, PathBuf::from("data/image.json"));
        assert_eq!(config.storage.public_path, "/uploaded-images");
        assert_eq!(config.storage.max_upload_bytes, 3 * 1024 * 1024);
        assert_eq!(config.storage.allowed_types.len(), 3);
        assert_eq!(config.static_files.directory, PathBuf::from("public"));
    }
}
