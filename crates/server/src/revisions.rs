//! Revision submission and query endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use scrive_storage::RevisionMetadata;

use crate::{AppState, HttpError};

const PREVIEW_CHARS: usize = 100;

#[derive(Deserialize)]
pub struct RevisionSubmission {
    original_draft_id: String,
    revised_draft: Value,
    #[serde(default)]
    metadata: RevisionMetadata,
}

#[derive(Serialize)]
pub struct RevisionResponse {
    revision_id: String,
    original_draft_id: String,
    stored: bool,
    created_at: String,
}

/// `POST /api/revisions`: accept a revision from a rescan server or an
/// editing client. 404 when the original draft is unknown, 503 when
/// persistence is disabled.
pub async fn submit_revision(
    State(state): State<AppState>,
    Json(submission): Json<RevisionSubmission>,
) -> Result<(StatusCode, Json<RevisionResponse>), HttpError> {
    let db = state
        .store
        .as_deref()
        .ok_or_else(|| HttpError::ServiceUnavailable("draft persistence not enabled".into()))?;

    let revised_draft_json = serde_json::to_string(&submission.revised_draft)
        .map_err(|e| HttpError::BadRequest(format!("unserializable revised draft: {e}")))?;

    let revision_id = db.put_revision(
        &submission.original_draft_id,
        &revised_draft_json,
        &submission.metadata,
    )?;
    state.status.incr_revisions_stored();

    Ok((
        StatusCode::CREATED,
        Json(RevisionResponse {
            revision_id,
            original_draft_id: submission.original_draft_id,
            stored: true,
            created_at: Utc::now().to_rfc3339(),
        }),
    ))
}

/// `GET /api/revisions/{draft_id}`: the original draft plus all stored
/// revisions.
pub async fn get_revisions(
    State(state): State<AppState>,
    Path(draft_id): Path<String>,
) -> Result<Json<Value>, HttpError> {
    let db = state
        .store
        .as_deref()
        .ok_or_else(|| HttpError::ServiceUnavailable("draft persistence not enabled".into()))?;

    let Some(original) = db.get(&draft_id)? else {
        return Err(HttpError::NotFound(format!(
            "draft with id '{draft_id}' not found"
        )));
    };

    let revisions: Vec<Value> = db
        .list_revisions(&draft_id)?
        .into_iter()
        .map(|record| {
            let full_text = serde_json::from_str::<Value>(&record.revised_draft_json)
                .ok()
                .and_then(|v| v.get("full_text").and_then(|t| t.as_str()).map(String::from))
                .unwrap_or_default();
            let text_preview = if full_text.chars().count() > PREVIEW_CHARS {
                let truncated: String = full_text.chars().take(PREVIEW_CHARS).collect();
                format!("{truncated}...")
            } else {
                full_text.clone()
            };
            json!({
                "revision_id": record.revision_id,
                "created_at": record.created_at,
                "model": record.model,
                "source": record.source,
                "source_uri": record.source_uri,
                "text_preview": text_preview,
                "full_text": full_text,
            })
        })
        .collect();

    Ok(Json(json!({
        "draft_id": draft_id,
        "original_draft": original,
        "revisions": revisions,
    })))
}
