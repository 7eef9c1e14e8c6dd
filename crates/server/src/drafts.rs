//! Draft query endpoints.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use scrive_storage::{Database, SortOrder};

use crate::{parse_timestamp, AppState, HttpError};

fn store(state: &AppState) -> Result<&Database, HttpError> {
    state
        .store
        .as_deref()
        .ok_or_else(|| HttpError::ServiceUnavailable("draft persistence not enabled".into()))
}

#[derive(Deserialize)]
pub struct ListQuery {
    since: Option<String>,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
    #[serde(default = "default_order")]
    order: String,
    #[serde(default)]
    summary: bool,
}

fn default_limit() -> usize {
    100
}

fn default_order() -> String {
    "desc".to_string()
}

/// `GET /drafts?since=&limit=&offset=&order=&summary=`
pub async fn list_drafts(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, HttpError> {
    let db = store(&state)?;

    if query.limit == 0 || query.limit > scrive_storage::MAX_PAGE_LIMIT {
        return Err(HttpError::BadRequest(format!(
            "limit must be between 1 and {}",
            scrive_storage::MAX_PAGE_LIMIT
        )));
    }
    let order = SortOrder::parse(&query.order)
        .ok_or_else(|| HttpError::BadRequest("order must be 'asc' or 'desc'".into()))?;

    let (drafts, total) = match &query.since {
        Some(since) => {
            let since = parse_timestamp(since).map_err(HttpError::BadRequest)?;
            db.list_since(since, query.limit, query.offset, order)?
        }
        None => db.list_paginated(query.limit, query.offset, order)?,
    };

    let draft_values: Vec<Value> = if query.summary {
        drafts
            .iter()
            .map(|d| {
                json!({
                    "draft_id": d.draft_id,
                    "timestamp": d.timestamp,
                    "parent_draft_id": d.parent_draft_id,
                })
            })
            .collect()
    } else {
        drafts
            .iter()
            .map(|d| serde_json::to_value(d).unwrap_or(Value::Null))
            .collect()
    };

    Ok(Json(json!({
        "drafts": draft_values,
        "total": total,
        "limit": query.limit,
        "offset": query.offset,
        "has_more": query.offset + drafts.len() < total,
    })))
}

#[derive(Deserialize)]
pub struct FamilyQuery {
    #[serde(default)]
    include_parent: bool,
    #[serde(default)]
    include_children: bool,
}

/// `GET /drafts/{draft_id}?include_parent=&include_children=`
pub async fn get_draft(
    State(state): State<AppState>,
    Path(draft_id): Path<String>,
    Query(query): Query<FamilyQuery>,
) -> Result<Json<Value>, HttpError> {
    let db = store(&state)?;

    let found = db.get_with_family(&draft_id, query.include_parent, query.include_children)?;
    let Some((draft, parent, children)) = found else {
        return Err(HttpError::NotFound(format!(
            "draft with id '{draft_id}' not found"
        )));
    };

    let mut response = json!({ "draft": draft });
    let fields = response.as_object_mut().expect("response is an object");
    if query.include_parent {
        fields.insert("parent".into(), json!(parent));
    }
    if query.include_children {
        fields.insert("children".into(), json!(children));
    }
    Ok(Json(response))
}
