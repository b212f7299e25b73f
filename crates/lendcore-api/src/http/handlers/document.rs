//! Document endpoints: salary-slip upload and sanction-letter download.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use lendcore_core::storage::DocumentExtractor;

use crate::http::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub session_id: String,
    #[serde(default = "default_document_type")]
    pub document_type: String,
    #[serde(default = "default_filename")]
    pub filename: String,
}

fn default_document_type() -> String {
    "salary_slip".to_string()
}

fn default_filename() -> String {
    "document.pdf".to_string()
}

fn mime_for(filename: &str) -> &'static str {
    match filename.rsplit('.').next().unwrap_or_default() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        _ => "application/octet-stream",
    }
}

/// POST /api/documents/upload?session_id=&document_type=&filename=
///
/// Stores the raw body under the uploads directory, runs the
/// text-extraction collaborator, and marks the session's document keys so
/// the document-upload stage can complete. A salary figure found in the
/// extracted text is folded back into the stored customer profile.
pub async fn upload_document(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    if body.is_empty() {
        return Err(ApiError::bad_request("EMPTY_FILE", "Uploaded file is empty"));
    }
    if query.filename.contains('/') || query.filename.contains("..") {
        return Err(ApiError::bad_request("INVALID_FILENAME", "Invalid filename"));
    }
    let sessions = state.sessions();
    if sessions.get_session_context(&query.session_id).await.is_none() {
        return Err(ApiError::SessionNotFound);
    }

    let documents_dir = state.uploads_dir.join("documents");
    tokio::fs::create_dir_all(&documents_dir)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let stored_name = format!(
        "{}_{}",
        &Uuid::new_v4().simple().to_string()[..8],
        query.filename
    );
    let path = documents_dir.join(&stored_name);
    tokio::fs::write(&path, &body)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let text = state
        .extractor
        .extract_text(&path, mime_for(&query.filename))
        .await
        .unwrap_or_default();
    let extracted_salary = net_salary_from(&text);

    sessions
        .add_session_data(
            &query.session_id,
            "salary_slip_uploaded",
            json!({
                "document_type": query.document_type,
                "filename": stored_name,
                "file_size": body.len(),
                "uploaded_at": Utc::now().to_rfc3339(),
            }),
        )
        .await?;
    sessions
        .add_session_data(&query.session_id, "document_processed", json!(!text.is_empty()))
        .await?;

    if let Some(salary) = extracted_salary {
        let mut profile = sessions
            .get_session_data(&query.session_id, "customer_profile")
            .await
            .unwrap_or(json!({}));
        if let Some(map) = profile.as_object_mut() {
            map.insert("salary".to_string(), json!(salary));
        }
        sessions
            .add_session_data(&query.session_id, "customer_profile", profile)
            .await?;
        tracing::info!(session_id = %query.session_id, salary, "extracted salary from document");
    }

    Ok(Json(json!({
        "success": true,
        "filename": stored_name,
        "file_size": body.len(),
        "document_type": query.document_type,
        "text_extracted": !text.is_empty(),
        "extracted_salary": extracted_salary,
        "message": "File uploaded successfully",
        "timestamp": Utc::now().to_rfc3339(),
    })))
}

/// Pull the net-salary figure out of extracted slip text.
fn net_salary_from(text: &str) -> Option<f64> {
    let line = text.lines().find(|l| l.to_lowercase().contains("net salary"))?;
    let digits: String = line
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    digits.parse().ok()
}

/// GET /api/documents/download/sanction-letter/{filename}
pub async fn download_sanction_letter(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if filename.contains('/') || filename.contains("..") {
        return Err(ApiError::bad_request("INVALID_FILENAME", "Invalid filename"));
    }

    let path = state.uploads_dir.join("sanction_letters").join(&filename);
    let bytes = tokio::fs::read(&path).await.map_err(|_| ApiError::FileNotFound)?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        bytes,
    ))
}
