use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

mod archive;
mod codec;
mod config;
mod models;

use codec::{CodecError, ImageCodec, ImageFormat};
use config::Config;
use models::{BatchCompressionRequest, ImageInfoResponse, DEFAULT_QUALITY};

struct AppState {
    codec: ImageCodec,
    max_batch_size: usize,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!("max image size: {} bytes", config.max_image_size);
    tracing::info!("max batch size: {} images", config.max_batch_size);
    tracing::info!("request timeout: {:?}", config.request_timeout);

    let app = router(&config);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .unwrap();
    tracing::info!("listening on {}", listener.local_addr().unwrap());
    axum::serve(listener, app).await.unwrap();
}

fn router(config: &Config) -> Router {
    let state = Arc::new(AppState {
        codec: ImageCodec::new(config.max_image_size),
        max_batch_size: config.max_batch_size,
    });

    Router::new()
        .route("/health", get(health))
        .route("/compress", post(compress))
        .route("/compress/batch", post(compress_batch))
        .route("/compress/info", post(image_info))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(config.request_timeout))
        .layer(DefaultBodyLimit::max(config.body_limit()))
        .with_state(state)
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn compress(State(state): State<Arc<AppState>>, mut multipart: Multipart) -> Response {
    let mut image_data: Option<Vec<u8>> = None;
    let mut quality = DEFAULT_QUALITY;
    let mut format = ImageFormat::Jpeg;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    format!("malformed multipart request: {e}"),
                )
            }
        };
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "image" => match field.bytes().await {
                Ok(bytes) => image_data = Some(bytes.to_vec()),
                Err(e) => {
                    return error_response(
                        StatusCode::BAD_REQUEST,
                        format!("failed to read image field: {e}"),
                    )
                }
            },
            "quality" => {
                let text = match field_text(field).await {
                    Ok(text) => text,
                    Err(response) => return response,
                };
                match text.trim().parse::<u8>() {
                    Ok(q) => quality = q,
                    Err(_) => {
                        return error_response(
                            StatusCode::BAD_REQUEST,
                            format!("quality must be an integer between 1 and 100, got {text:?}"),
                        )
                    }
                }
            }
            "format" => {
                let text = match field_text(field).await {
                    Ok(text) => text,
                    Err(response) => return response,
                };
                match text.trim().parse::<ImageFormat>() {
                    Ok(f) => format = f,
                    Err(e) => return codec_error_response(&e),
                }
            }
            _ => {}
        }
    }

    let Some(data) = image_data else {
        return error_response(StatusCode::BAD_REQUEST, "missing image field".to_string());
    };

    if let Err(e) = state.codec.validate(&data) {
        return codec_error_response(&e);
    }
    let compressed = match state.codec.compress(&data, quality, format) {
        Ok(bytes) => bytes,
        Err(e) => return codec_error_response(&e),
    };

    tracing::debug!(
        input = data.len(),
        output = compressed.len(),
        format = format.as_str(),
        "compressed image"
    );

    let filename = format!("compressed_{}.{}", Utc::now().timestamp(), format.as_str());
    download_response(compressed, "application/octet-stream", &filename)
}

async fn compress_batch(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BatchCompressionRequest>,
) -> Response {
    if req.images.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "batch contains no images".to_string(),
        );
    }
    // Fail fast before any decode work.
    if req.images.len() > state.max_batch_size {
        return error_response(
            StatusCode::BAD_REQUEST,
            format!(
                "batch size exceeded: {} images, maximum is {}",
                req.images.len(),
                state.max_batch_size
            ),
        );
    }

    let mut entries: Vec<(String, Vec<u8>)> = Vec::with_capacity(req.images.len());
    for (index, image) in req.images.iter().enumerate() {
        if let Err(e) = state.codec.validate(&image.data) {
            let (status, detail) = codec_error_parts(&e);
            return error_response(status, format!("image {}: {detail}", index + 1));
        }
        let compressed = match state.codec.compress(&image.data, req.quality, req.format) {
            Ok(bytes) => bytes,
            Err(e) => {
                let (status, detail) = codec_error_parts(&e);
                return error_response(status, format!("image {}: {detail}", index + 1));
            }
        };

        let filename = if image.filename.is_empty() {
            format!("image_{}.{}", index + 1, req.format.as_str())
        } else {
            image.filename.clone()
        };
        entries.push((filename, compressed));
    }

    let zip_data = match archive::bundle(&entries) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!("batch bundling failed: {e}");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };

    let filename = format!("compressed_batch_{}.zip", Utc::now().timestamp());
    download_response(zip_data, "application/zip", &filename)
}

async fn image_info(State(state): State<Arc<AppState>>, mut multipart: Multipart) -> Response {
    let mut image_data: Option<Vec<u8>> = None;
    let mut filename = String::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    format!("malformed multipart request: {e}"),
                )
            }
        };
        if field.name() == Some("image") {
            filename = field.file_name().unwrap_or("").to_string();
            match field.bytes().await {
                Ok(bytes) => image_data = Some(bytes.to_vec()),
                Err(e) => {
                    return error_response(
                        StatusCode::BAD_REQUEST,
                        format!("failed to read image field: {e}"),
                    )
                }
            }
        }
    }

    let Some(data) = image_data else {
        return error_response(StatusCode::BAD_REQUEST, "missing image field".to_string());
    };

    if let Err(e) = state.codec.validate(&data) {
        return codec_error_response(&e);
    }
    let info = match state.codec.info(&data) {
        Ok(info) => info,
        Err(e) => return codec_error_response(&e),
    };

    (
        StatusCode::OK,
        Json(ImageInfoResponse {
            filename,
            width: info.width,
            height: info.height,
            format: info.format,
            size: data.len(),
        }),
    )
        .into_response()
}

// ── Response helpers ─────────────────────────────────────────────────────────

async fn field_text(field: axum::extract::multipart::Field<'_>) -> Result<String, Response> {
    field.text().await.map_err(|e| {
        error_response(
            StatusCode::BAD_REQUEST,
            format!("failed to read form field: {e}"),
        )
    })
}

fn codec_error_parts(err: &CodecError) -> (StatusCode, String) {
    let status = match err {
        CodecError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        CodecError::UnsupportedFormat(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        CodecError::Encode { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        CodecError::EmptyData
        | CodecError::InvalidQuality(_)
        | CodecError::InvalidData
        | CodecError::Decode(_) => StatusCode::BAD_REQUEST,
    };
    (status, err.to_string())
}

fn codec_error_response(err: &CodecError) -> Response {
    let (status, detail) = codec_error_parts(err);
    error_response(status, detail)
}

fn error_response(status: StatusCode, detail: String) -> Response {
    (status, Json(json!({"detail": detail}))).into_response()
}

fn download_response(data: Vec<u8>, content_type: &str, filename: &str) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={filename}"),
            ),
        ],
        data,
    )
        .into_response()
}

// ── Route tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    use http_body_util::BodyExt;
    use std::io::Cursor;
    use tower::ServiceExt;

    const BOUNDARY: &str = "test-boundary";

    fn test_router() -> Router {
        router(&Config::default())
    }

    fn png_fixture(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 64])
        });
        let mut buf = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, image::ImageOutputFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    /// Build a multipart/form-data body. Parts with a filename are sent as
    /// binary file fields, the rest as plain text fields.
    fn multipart_body(parts: &[(&str, Option<&str>, &[u8])]) -> (String, Vec<u8>) {
        let mut body = Vec::new();
        for (name, filename, data) in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match filename {
                Some(filename) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                ),
            }
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        (format!("multipart/form-data; boundary={BOUNDARY}"), body)
    }

    async fn send(request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = test_router().oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body.to_vec())
    }

    fn multipart_request(uri: &str, parts: &[(&str, Option<&str>, &[u8])]) -> Request<Body> {
        let (content_type, body) = multipart_body(parts);
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(body))
            .unwrap()
    }

    fn json_request(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_service_and_version() {
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(request).await;
        assert_eq!(status, StatusCode::OK);

        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], env!("CARGO_PKG_NAME"));
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn compress_returns_requested_format() {
        let png = png_fixture(16, 16);
        let request = multipart_request(
            "/compress",
            &[
                ("image", Some("a.png"), &png),
                ("quality", None, b"75"),
                ("format", None, b"jpeg"),
            ],
        );
        let response = test_router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/octet-stream"
        );
        let disposition = response.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .to_string();
        assert!(disposition.starts_with("attachment; filename=compressed_"));
        assert!(disposition.ends_with(".jpeg"));

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[0..2], &[0xFF, 0xD8]);
    }

    #[tokio::test]
    async fn compress_defaults_to_jpeg_at_quality_80() {
        let png = png_fixture(16, 16);
        let request = multipart_request("/compress", &[("image", Some("a.png"), &png)]);
        let (status, body) = send(request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            image::guess_format(&body).unwrap(),
            image::ImageFormat::Jpeg
        );
    }

    #[tokio::test]
    async fn compress_missing_image_field_is_bad_request() {
        let request = multipart_request("/compress", &[("quality", None, b"80")]);
        let (status, body) = send(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["detail"], "missing image field");
    }

    #[tokio::test]
    async fn compress_unknown_format_is_unsupported_media_type() {
        let png = png_fixture(8, 8);
        let request = multipart_request(
            "/compress",
            &[("image", Some("a.png"), &png), ("format", None, b"tiff")],
        );
        let (status, _) = send(request).await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn compress_garbage_payload_is_bad_request() {
        let request = multipart_request("/compress", &[("image", Some("a.png"), b"not an image")]);
        let (status, _) = send(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn compress_out_of_range_quality_is_bad_request() {
        let png = png_fixture(8, 8);
        let request = multipart_request(
            "/compress",
            &[("image", Some("a.png"), &png), ("quality", None, b"101")],
        );
        let (status, _) = send(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn batch_returns_zip_with_sanitized_ordered_entries() {
        let png = BASE64.encode(png_fixture(8, 8));
        let request = json_request(
            "/compress/batch",
            json!({
                "images": [
                    {"filename": "first.png", "data": png},
                    {"filename": "../../etc/passwd", "data": png},
                    {"filename": "", "data": png},
                ],
                "quality": 60,
                "format": "png",
            }),
        );
        let response = test_router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/zip");

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let mut archive = zip::ZipArchive::new(Cursor::new(body.to_vec())).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert_eq!(names, vec!["first.png", "passwd", "image_3.png"]);
    }

    #[tokio::test]
    async fn batch_over_limit_fails_before_processing() {
        // Undecodable data after the first image: if the size check did not
        // fail fast, processing would report a decode error instead.
        let images: Vec<serde_json::Value> = (0..11)
            .map(|i| json!({"filename": format!("{i}.png"), "data": [0, 1, 2]}))
            .collect();
        let request = json_request("/compress/batch", json!({"images": images}));
        let (status, body) = send(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            body["detail"],
            "batch size exceeded: 11 images, maximum is 10"
        );
    }

    #[tokio::test]
    async fn batch_reports_failing_image_index() {
        let png = BASE64.encode(png_fixture(8, 8));
        let request = json_request(
            "/compress/batch",
            json!({
                "images": [
                    {"filename": "ok.png", "data": png},
                    {"filename": "bad.png", "data": [1, 2, 3]},
                ],
            }),
        );
        let (status, body) = send(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["detail"], "image 2: image data could not be decoded");
    }

    #[tokio::test]
    async fn batch_with_no_images_is_bad_request() {
        let request = json_request("/compress/batch", json!({"images": []}));
        let (status, _) = send(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn info_reports_dimensions_and_format() {
        let png = png_fixture(100, 50);
        let request = multipart_request("/compress/info", &[("image", Some("photo.png"), &png)]);
        let (status, body) = send(request).await;
        assert_eq!(status, StatusCode::OK);

        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["filename"], "photo.png");
        assert_eq!(body["width"], 100);
        assert_eq!(body["height"], 50);
        assert_eq!(body["format"], "png");
        assert_eq!(body["size"], png.len() as u64);
    }

    #[tokio::test]
    async fn info_on_empty_file_is_bad_request() {
        let request = multipart_request("/compress/info", &[("image", Some("a.png"), b"")]);
        let (status, _) = send(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
