use axum::{
    body::Body,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use std::{
    path::{Component, Path, PathBuf},
    time::UNIX_EPOCH,
};
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{debug, error};

/// Streams files out of one directory: uploaded images, or the built
/// gallery client.
#[derive(Clone)]
pub struct StaticFileHandler {
    pub root: PathBuf,
}

impl StaticFileHandler {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Joins a request path onto the root, refusing anything that could
    /// climb out of it.
    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return None;
        }
        Some(self.root.join(relative))
    }

    pub async fn serve(&self, path: &str) -> Response {
        let Some(file_path) = self.resolve(path) else {
            error!("Path traversal attempt: {:?}", path);
            return (StatusCode::FORBIDDEN, "Forbidden").into_response();
        };

        debug!("Attempting to serve file: {:?}", file_path);

        let metadata = match tokio::fs::metadata(&file_path).await {
            Ok(m) if m.is_file() => m,
            Ok(_) => return (StatusCode::NOT_FOUND, "File not found").into_response(),
            Err(e) => {
                debug!("Failed to get metadata for {:?}: {}", file_path, e);
                return (StatusCode::NOT_FOUND, "File not found").into_response();
            }
        };

        let file = match File::open(&file_path).await {
            Ok(file) => file,
            Err(e) => {
                debug!("Failed to open file {:?}: {}", file_path, e);
                return (StatusCode::NOT_FOUND, "File not found").into_response();
            }
        };

        let content_type = mime_guess::from_path(&file_path)
            .first_or_octet_stream()
            .to_string();

        // Uploaded images never change under a given name
        let cache_control = if content_type.starts_with("image/") {
            "public, max-age=31536000, immutable"
        } else if content_type.starts_with("text/html") {
            "no-cache"
        } else {
            "public, max-age=3600"
        };

        let mut response = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, content_type)
            .header(header::CONTENT_LENGTH, metadata.len())
            .header(header::CACHE_CONTROL, cache_control);

        if let Ok(modified) = metadata.modified()
            && let Ok(duration) = modified.duration_since(UNIX_EPOCH)
        {
            response = response.header(header::LAST_MODIFIED, httpdate::fmt_http_date(modified));

            let etag = format!("\"{}-{}\"", duration.as_secs(), metadata.len());
            response = response.header(header::ETAG, etag);
        }

        let body = Body::from_stream(ReaderStream::new(file));
        response
            .body(body)
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_rejects_traversal() {
        let handler = StaticFileHandler::new(PathBuf::from("/srv/images"));

        assert_eq!(
            handler.resolve("a.png"),
            Some(PathBuf::from("/srv/images/a.png"))
        );
        assert_eq!(
            handler.resolve("/nested/a.png"),
            Some(PathBuf::from("/srv/images/nested/a.png"))
        );
        assert_eq!(handler.resolve("../secret"), None);
        assert_eq!(handler.resolve("nested/../../secret"), None);
        assert_eq!(handler.resolve("./a.png"), None);
    }

    #[tokio::test]
    async fn test_serve_sets_headers() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("a.png"), b"not really a png").unwrap();
        let handler = StaticFileHandler::new(temp_dir.path().to_path_buf());

        let response = handler.serve("a.png").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "16");
        assert!(response.headers().contains_key(header::ETAG));
        assert!(response.headers().contains_key(header::LAST_MODIFIED));

        let missing = handler.serve("b.png").await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let forbidden = handler.serve("../a.png").await;
        assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);
    }
}
