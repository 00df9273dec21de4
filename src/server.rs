//! Upload/analyze/convert HTTP endpoints.

use crate::analyze::{analyze_html, Analysis};
use crate::archive::{find_main_html, prepare_input};
use crate::async_api::{ConversionJob, ConversionWorker};
use crate::geometry::detect_best_format;
use crate::{Error, TargetFormat, VideoConfig};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Largest accepted request body.
pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

const INDEX_HTML: &str = r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>HTML5 to Video</title></head>
<body>
<h1>HTML5 to Video</h1>
<form action="/convert" method="post" enctype="multipart/form-data">
  <p><input type="file" name="file" accept=".zip,.html,.htm" required></p>
  <p><label>Duration (s) <input type="number" name="duration" value="10" min="1" max="300"></label></p>
  <p><label>Format
    <select name="target_format">
      <option value="auto">Auto</option>
      <option value="square">1080x1080 (Square)</option>
      <option value="vertical">1080x1920 (Vertical)</option>
    </select></label></p>
  <p><button type="submit">Convert</button></p>
</form>
</body>
</html>
"#;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::UnsupportedInput(_)
            | Error::ArchiveError(_)
            | Error::UnsafePath(_)
            | Error::NoHtml
            | Error::ConfigError(_)
            | Error::Zip(_) => ApiError::BadRequest(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("request failed: {}", self);
        }
        (status, Json(ErrorResponse { error: self.to_string() })).into_response()
    }
}

/// Detected settings plus the recommended social format
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct AnalyzeResponse {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub duration: u32,
    pub auto_format: String,
    pub auto_width: u32,
    pub auto_height: u32,
}

impl From<&Analysis> for AnalyzeResponse {
    fn from(a: &Analysis) -> Self {
        let format = detect_best_format(crate::Viewport::new(a.width, a.height));
        Self {
            width: a.width,
            height: a.height,
            fps: a.fps,
            duration: a.duration,
            auto_format: format.name,
            auto_width: format.size.width,
            auto_height: format.size.height,
        }
    }
}

/// A multipart upload: the `file` part and any plain text fields
#[derive(Debug, Default)]
pub struct Upload {
    pub file_name: String,
    pub data: Vec<u8>,
    pub fields: HashMap<String, String>,
}

impl Upload {
    /// File name without extension, used for the download name.
    ///
    /// Quotes, backslashes and control characters are replaced so the name
    /// can sit inside a quoted `Content-Disposition` filename.
    pub fn stem(&self) -> String {
        let stem: String = Path::new(&self.file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .chars()
            .map(|c| if c == '"' || c == '\\' || c.is_control() { '_' } else { c })
            .collect();
        if stem.trim().is_empty() {
            "output".to_string()
        } else {
            stem
        }
    }
}

#[derive(Clone)]
struct AppState {
    worker: Arc<ConversionWorker>,
}

async fn read_upload(mut multipart: Multipart) -> ApiResult<Upload> {
    let mut upload = Upload::default();
    let mut has_file = false;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Malformed upload: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            upload.file_name = field.file_name().unwrap_or_default().to_string();
            upload.data = field
                .bytes()
                .await
                .map_err(|e| ApiError::bad_request(format!("Malformed upload: {}", e)))?
                .to_vec();
            has_file = true;
        } else {
            let value = field
                .text()
                .await
                .map_err(|e| ApiError::bad_request(format!("Malformed upload: {}", e)))?;
            upload.fields.insert(name, value);
        }
    }

    if !has_file {
        return Err(ApiError::bad_request("No file uploaded"));
    }
    if upload.file_name.is_empty() {
        return Err(ApiError::bad_request("No file selected"));
    }
    Ok(upload)
}

/// Write the uploaded bytes into `dir` as `upload.zip` or `index.html`.
pub fn stage_upload(file_name: &str, data: &[u8], dir: &Path) -> ApiResult<PathBuf> {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let staged = match extension.as_str() {
        "zip" => dir.join("upload.zip"),
        "html" | "htm" => dir.join("index.html"),
        _ => return Err(ApiError::bad_request("Invalid file type")),
    };
    std::fs::write(&staged, data).map_err(|e| ApiError::internal(format!("Failed to save upload: {}", e)))?;
    Ok(staged)
}

/// Extract (if needed) and analyze a staged upload.
pub fn analyze_staged(staged: &Path, work_dir: &Path) -> crate::Result<Analysis> {
    let root = prepare_input(staged, work_dir)?;
    let html = find_main_html(&root)?;
    analyze_html(html)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn analyze(multipart: Multipart) -> ApiResult<Json<AnalyzeResponse>> {
    let upload = read_upload(multipart).await?;

    let analysis = tokio::task::spawn_blocking(move || -> ApiResult<Analysis> {
        let dir = tempfile::tempdir().map_err(|e| ApiError::internal(e.to_string()))?;
        let staged = stage_upload(&upload.file_name, &upload.data, dir.path())?;
        Ok(analyze_staged(&staged, dir.path())?)
    })
    .await
    .map_err(|e| ApiError::internal(format!("Analysis task failed: {}", e)))??;

    Ok(Json(AnalyzeResponse::from(&analysis)))
}

fn parse_convert_fields(fields: &HashMap<String, String>) -> ApiResult<(u32, TargetFormat)> {
    let duration = match fields.get("duration").map(|s| s.trim()) {
        None | Some("") => 10,
        Some(v) => v.parse::<u32>().map_err(|_| ApiError::bad_request("Invalid parameters"))?,
    };
    let target_format = match fields.get("target_format") {
        None => TargetFormat::Auto,
        Some(v) => v.parse::<TargetFormat>().map_err(|_| ApiError::bad_request("Invalid parameters"))?,
    };
    Ok((duration, target_format))
}

async fn convert(State(state): State<AppState>, multipart: Multipart) -> ApiResult<Response> {
    let upload = read_upload(multipart).await?;
    let (duration, target_format) = parse_convert_fields(&upload.fields)?;
    let stem = upload.stem();

    let dir = tempfile::Builder::new()
        .prefix("html5_to_video_upload_")
        .tempdir()
        .map_err(|e| ApiError::internal(e.to_string()))?;
    let work = dir.path().to_path_buf();

    let (staged, analysis) = tokio::task::spawn_blocking(move || -> ApiResult<(PathBuf, Analysis)> {
        let staged = stage_upload(&upload.file_name, &upload.data, &work)?;
        let analysis = analyze_staged(&staged, &work.join("analyze"))?;
        Ok((staged, analysis))
    })
    .await
    .map_err(|e| ApiError::internal(format!("Analysis task failed: {}", e)))??;

    let config = VideoConfig {
        duration,
        animation_speed: 1.0,
        target_format,
        ..VideoConfig::from_analysis(&analysis)
    };
    config.validate()?;

    let output = dir.path().join(format!("{}.mp4", stem));
    let outcome = state
        .worker
        .convert(ConversionJob {
            input: staged,
            output: output.clone(),
            config,
        })
        .await?;
    if let Err(e) = outcome.result {
        for line in &outcome.transcript {
            log::debug!("{}", line);
        }
        return Err(ApiError::internal(format!("Conversion failed: {}", e)));
    }

    let bytes = tokio::fs::read(&output)
        .await
        .map_err(|e| ApiError::internal(format!("Conversion failed: {}", e)))?;
    drop(dir);

    let headers = [
        (header::CONTENT_TYPE, "video/mp4".to_string()),
        (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{}.mp4\"", stem)),
    ];
    Ok((headers, bytes).into_response())
}

/// Build the application router around a conversion worker.
pub fn router(worker: ConversionWorker) -> Router {
    let state = AppState {
        worker: Arc::new(worker),
    };
    Router::new()
        .route("/", get(index))
        .route("/analyze", post(analyze))
        .route("/convert", post(convert))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

/// Serve until the process is stopped.
pub async fn serve(host: &str, port: u16, worker: ConversionWorker) -> crate::Result<()> {
    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    log::info!("listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(worker)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn library_errors_map_to_status_codes() {
        assert_eq!(ApiError::from(Error::NoHtml).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::from(Error::UnsafePath("../x".into())).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(Error::EncodeFailed { exit_code: Some(1), stderr: String::new() }).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn staging_rejects_unknown_types() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            stage_upload("banner.gif", b"GIF89a", dir.path()),
            Err(ApiError::BadRequest(_))
        ));
        let staged = stage_upload("Banner.HTM", b"<html></html>", dir.path()).unwrap();
        assert!(staged.ends_with("index.html"));
    }

    #[test]
    fn staged_html_is_analyzed() {
        let dir = tempfile::tempdir().unwrap();
        let html = br#"<html><head><meta name="ad.size" content="width=300,height=250"></head>
            <body><script>gsap.to('#a', {duration: 4});</script></body></html>"#;
        let staged = stage_upload("ad.html", html, dir.path()).unwrap();
        let analysis = analyze_staged(&staged, &dir.path().join("work")).unwrap();
        let resp = AnalyzeResponse::from(&analysis);
        assert_eq!((resp.width, resp.height), (300, 250));
        assert_eq!(resp.auto_format, "1080x1080 (Square/Instagram)");
        assert_eq!((resp.auto_width, resp.auto_height), (1080, 1080));
    }

    #[test]
    fn convert_fields_have_defaults() {
        let fields = HashMap::new();
        assert_eq!(parse_convert_fields(&fields).unwrap(), (10, TargetFormat::Auto));

        let mut fields = HashMap::new();
        fields.insert("duration".to_string(), "abc".to_string());
        assert!(parse_convert_fields(&fields).is_err());

        let mut fields = HashMap::new();
        fields.insert("duration".to_string(), "6".to_string());
        fields.insert("target_format".to_string(), "vertical".to_string());
        assert_eq!(parse_convert_fields(&fields).unwrap(), (6, TargetFormat::Vertical));
    }

    #[test]
    fn download_name_uses_upload_stem() {
        let upload = Upload { file_name: "summer_sale.zip".into(), ..Default::default() };
        assert_eq!(upload.stem(), "summer_sale");
        assert_eq!(Upload::default().stem(), "output");
    }

    #[test]
    fn download_name_cannot_break_out_of_quotes() {
        let upload = Upload { file_name: "a\"b\r\nSet-Cookie: x.zip".into(), ..Default::default() };
        let stem = upload.stem();
        assert_eq!(stem, "a_b__Set-Cookie: x");
        let header = format!("attachment; filename=\"{}.mp4\"", stem);
        assert_eq!(header.matches('"').count(), 2);
        assert!(axum::http::HeaderValue::from_str(&header).is_ok());
    }
}
