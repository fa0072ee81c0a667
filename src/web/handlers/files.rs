//! File handlers: upload, download, list, delete.
//!
//! Each handler collects its input, then runs the admission pipeline on the
//! blocking pool since every operation walks or writes the filesystem.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{multipart::MultipartError, Multipart, Path, State},
    http::{header, StatusCode},
    response::Response,
    Json,
};

use crate::admission::{Denial, InvalidInput};
use crate::web::dto::{DeleteResponse, ListResponse, UploadResponse};
use crate::web::error::{ApiError, ErrorCode};
use crate::web::handlers::AppState;
use crate::web::middleware::Credential;

/// Multipart field holding the upload.
const FILE_FIELD: &str = "file";

/// Run a pipeline operation on the blocking pool.
async fn run_blocking<T, F>(op: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, Denial> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Blocking task failed");
            ApiError::internal("An internal error occurred")
        })?
        .map_err(ApiError::from)
}

fn multipart_error(e: MultipartError) -> ApiError {
    tracing::warn!(error = %e, "Failed to read multipart body");
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::new(ErrorCode::FileTooLarge, "Request body too large")
    } else {
        ApiError::bad_request("Invalid multipart data")
    }
}

/// `Content-Disposition` for a download: an ASCII fallback plus the RFC 5987
/// encoded name.
fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect();

    format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    )
}

/// POST /api/upload - Store a file for the authenticated client.
///
/// Request body: multipart/form-data with a `file` field.
pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    credential: Credential,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    // Unknown credentials are refused before the body is buffered
    let pipeline = state.pipeline.clone();
    let presented = credential.clone();
    run_blocking(move || pipeline.authenticate(presented.as_deref())).await?;

    let mut upload: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let content = field.bytes().await.map_err(multipart_error)?;
        upload = Some((filename, content.to_vec()));
        break;
    }

    let pipeline = state.pipeline.clone();
    let receipt = run_blocking(move || {
        let credential = credential.as_deref();
        match upload {
            Some((filename, content)) => {
                pipeline.upload(credential, &filename, &content, Instant::now())
            }
            None => Err(InvalidInput::MissingFile.into()),
        }
    })
    .await?;

    Ok((StatusCode::CREATED, Json(receipt.into())))
}

/// GET /api/download/:filename - Return one of the client's files.
pub async fn download_file(
    State(state): State<Arc<AppState>>,
    credential: Credential,
    Path(filename): Path<String>,
) -> Result<Response<Body>, ApiError> {
    let pipeline = state.pipeline.clone();
    let download = run_blocking(move || pipeline.download(credential.as_deref(), &filename)).await?;

    let content_type = mime_guess::from_path(&download.filename)
        .first_or_octet_stream()
        .to_string();

    Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition(&download.filename),
        )
        .header(header::CONTENT_LENGTH, download.content.len())
        .body(Body::from(download.content))
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to build download response");
            ApiError::internal("An internal error occurred")
        })
}

/// GET /api/list - List the client's files, newest first.
pub async fn list_files(
    State(state): State<Arc<AppState>>,
    credential: Credential,
) -> Result<Json<ListResponse>, ApiError> {
    let pipeline = state.pipeline.clone();
    let listing = run_blocking(move || pipeline.list(credential.as_deref())).await?;
    Ok(Json(listing.into()))
}

/// DELETE /api/delete/:filename - Remove one of the client's files.
pub async fn delete_file(
    State(state): State<Arc<AppState>>,
    credential: Credential,
    Path(filename): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let pipeline = state.pipeline.clone();
    let receipt = run_blocking(move || pipeline.delete(credential.as_deref(), &filename)).await?;
    Ok(Json(receipt.into()))
}
