use crate::{
    AppState, Config,
    library::{INVALID_IDS_MESSAGE, IncomingImage, LibraryError, parse_delete_ids},
};
use axum::{
    extract::{
        Multipart, State,
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
    },
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, warn};

/// Envelope shared by every JSON response.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    message: String,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: message.into(),
        }
    }
}

pub fn failure(status: StatusCode, message: impl Into<String>) -> Response {
    let body = ApiResponse::<()> {
        success: false,
        data: None,
        message: message.into(),
    };
    (status, Json(body)).into_response()
}

pub fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not found").into_response()
}

/// Client errors carry their own message; everything else is logged and
/// reported with the operation's generic message.
fn library_failure(err: LibraryError, operation: &str, generic_message: &str) -> Response {
    if err.is_client_error() {
        warn!("Rejected {} request: {}", operation, err);
        failure(StatusCode::BAD_REQUEST, err.to_string())
    } else {
        error!("Error during {}: {}", operation, err);
        failure(StatusCode::INTERNAL_SERVER_ERROR, generic_message)
    }
}

/// A multipart body that cannot be read is always a bad request. Bodies cut
/// off by the route limit are reported as an oversized file.
fn multipart_failure(err: MultipartError, headers: &HeaderMap, config: &Config) -> Response {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        let limit = config.storage.max_upload_bytes;
        let size = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|h| h.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or_else(|| limit.saturating_add(1));
        return library_failure(
            LibraryError::FileTooLarge { size, limit },
            "image upload",
            "Failed to upload image",
        );
    }

    warn!("Failed to read multipart upload: {}", err);
    failure(StatusCode::BAD_REQUEST, err.body_text())
}

/// Origin for image locators: the configured base URL, otherwise the scheme
/// and host the request arrived on.
pub fn request_origin(headers: &HeaderMap, config: &Config) -> String {
    if let Some(base_url) = &config.app.base_url {
        return base_url.trim_end_matches('/').to_string();
    }

    let first_value = |name: &str| {
        headers
            .get(name)
            .and_then(|h| h.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    let scheme = first_value("x-forwarded-proto").unwrap_or_else(|| "http".to_string());
    let host = first_value("x-forwarded-host")
        .or_else(|| first_value(header::HOST.as_str()))
        .unwrap_or_else(|| format!("localhost:{}", config.server.port));

    format!("{}://{}", scheme, host)
}

pub async fn list_images_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    let origin = request_origin(&headers, &app_state.config);

    match app_state.library.list(&origin).await {
        Ok(images) => Json(ApiResponse::ok(images, "Images retrieved successfully")).into_response(),
        Err(e) => library_failure(e, "image listing", "Failed to retrieve images"),
    }
}

pub async fn upload_image_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let mut incoming: Option<IncomingImage> = None;
    let mut title: Option<String> = None;

    // A body that is not multipart at all carries no file
    match multipart {
        Ok(mut multipart) => loop {
            let field = match multipart.next_field().await {
                Ok(Some(field)) => field,
                Ok(None) => break,
                Err(e) => return multipart_failure(e, &headers, &app_state.config),
            };

            let field_name = field.name().unwrap_or("").to_string();
            match field_name.as_str() {
                "image" => {
                    let original_name = field.file_name().unwrap_or("").to_string();
                    let mime_type = match field.content_type() {
                        Some(content_type) => content_type.to_string(),
                        None => mime_guess::from_path(&original_name)
                            .first_or_octet_stream()
                            .to_string(),
                    };

                    let bytes = match field.bytes().await {
                        Ok(bytes) => bytes,
                        Err(e) => return multipart_failure(e, &headers, &app_state.config),
                    };

                    // Browsers send an empty, unnamed part when no file was picked
                    if !original_name.is_empty() || !bytes.is_empty() {
                        incoming = Some(IncomingImage {
                            original_name,
                            mime_type,
                            bytes: bytes.to_vec(),
                        });
                    }
                }
                "fileTitle" => match field.text().await {
                    Ok(text) => title = Some(text),
                    Err(e) => return multipart_failure(e, &headers, &app_state.config),
                },
                _ => {}
            }
        },
        Err(rejection) => {
            warn!("Upload without multipart body: {}", rejection.body_text());
        }
    }

    let origin = request_origin(&headers, &app_state.config);

    match app_state
        .library
        .ingest(incoming, title.as_deref(), &origin)
        .await
    {
        Ok(image) => (
            StatusCode::CREATED,
            Json(ApiResponse::ok(image, "Image uploaded successfully")),
        )
            .into_response(),
        Err(e) => library_failure(e, "image upload", "Failed to upload image"),
    }
}

pub async fn delete_images_handler(
    State(app_state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    let body = match payload {
        Ok(Json(body)) => body,
        Err(rejection) => {
            warn!("Rejected delete request body: {}", rejection.body_text());
            return failure(StatusCode::BAD_REQUEST, INVALID_IDS_MESSAGE);
        }
    };

    let ids = match parse_delete_ids(&body) {
        Ok(ids) => ids,
        Err(e) => return library_failure(e, "image deletion", "Failed to delete images"),
    };

    match app_state.library.delete(&ids).await {
        Ok(outcome) => Json(ApiResponse::ok(outcome, "Images deleted successfully")).into_response(),
        Err(e) => library_failure(e, "image deletion", "Failed to delete images"),
    }
}

pub async fn health_handler() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_origin_prefers_configured_base_url() {
        let mut config = Config::default();
        config.app.base_url = Some("https://images.example.com/".to_string());

        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("internal:3000"));

        assert_eq!(
            request_origin(&headers, &config),
            "https://images.example.com"
        );
    }

    #[test]
    fn test_origin_from_request_headers() {
        let config = Config::default();

        let mut headers = HeaderMap::new();
        assert_eq!(request_origin(&headers, &config), "http://localhost:3000");

        headers.insert(header::HOST, HeaderValue::from_static("gallery.local:8080"));
        assert_eq!(request_origin(&headers, &config), "http://gallery.local:8080");

        headers.insert("x-forwarded-proto", HeaderValue::from_static("https, http"));
        headers.insert("x-forwarded-host", HeaderValue::from_static("photos.example.org"));
        assert_eq!(request_origin(&headers, &config), "https://photos.example.org");
    }

    #[test]
    fn test_envelope_shape() {
        let value = serde_json::to_value(ApiResponse::ok(vec![1, 2], "done")).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"success": true, "data": [1, 2], "message": "done"})
        );
    }
}
