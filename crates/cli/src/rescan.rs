//! Revision publishing for rescan runs.
//!
//! A rescan re-transcribes recorded audio with a better model. Every draft
//! the local pipeline closes is matched against the target server's stored
//! drafts by time proximity and posted to `POST /api/revisions` with
//! `source = whisper_reprocess`. Drafts with no plausible original are
//! skipped with a warning.

use std::sync::Arc;

use scrive_events::{Draft, DraftEvent, Event, EventBus, EventClass};

/// Widest clock skew tolerated between a rescanned draft and its original.
const MATCH_WINDOW_SECONDS: f64 = 30.0;

pub fn spawn_revision_publisher(bus: Arc<EventBus>, target: String) {
    let (_id, mut rx) = bus.register([EventClass::DraftEnd].into_iter().collect(), 256);
    tokio::spawn(async move {
        let client = reqwest::Client::new();
        while let Some(event) = rx.recv().await {
            let Event::Draft(DraftEvent::End { draft, .. }) = event.as_ref() else {
                continue;
            };
            if let Err(error) = publish_revision(&client, &target, draft).await {
                tracing::warn!(%error, draft_id = %draft.draft_id, "failed to publish revision");
            }
        }
    });
}

async fn publish_revision(
    client: &reqwest::Client,
    target: &str,
    draft: &Draft,
) -> Result<(), String> {
    let original_id = find_original(client, target, draft).await?;
    let Some(original_id) = original_id else {
        tracing::warn!(draft_id = %draft.draft_id, "no original draft near rescan window, skipping");
        return Ok(());
    };

    let body = serde_json::json!({
        "original_draft_id": original_id,
        "revised_draft": draft,
        "metadata": {
            "source": "whisper_reprocess",
            "source_uri": target,
            "timestamp": draft.timestamp,
        },
    });
    let response = client
        .post(format!("{target}/api/revisions"))
        .json(&body)
        .send()
        .await
        .map_err(|e| e.to_string())?;
    if !response.status().is_success() {
        return Err(format!("revision rejected: {}", response.status()));
    }
    tracing::info!(%original_id, draft_id = %draft.draft_id, "revision published");
    Ok(())
}

/// Closest stored draft by timestamp within the match window.
async fn find_original(
    client: &reqwest::Client,
    target: &str,
    draft: &Draft,
) -> Result<Option<String>, String> {
    let since = draft.audio_start_time - MATCH_WINDOW_SECONDS;
    let url = format!(
        "{target}/drafts?since={since}&order=asc&limit=100&summary=true"
    );
    let response = client.get(&url).send().await.map_err(|e| e.to_string())?;
    if !response.status().is_success() {
        return Err(format!("draft listing failed: {}", response.status()));
    }
    let body: serde_json::Value = response.json().await.map_err(|e| e.to_string())?;

    let mut best: Option<(f64, String)> = None;
    for candidate in body["drafts"].as_array().into_iter().flatten() {
        let Some(id) = candidate["draft_id"].as_str() else {
            continue;
        };
        let Some(timestamp) = candidate["timestamp"].as_f64() else {
            continue;
        };
        let distance = (timestamp - draft.audio_start_time).abs();
        if distance > MATCH_WINDOW_SECONDS {
            continue;
        }
        if best.as_ref().map(|(d, _)| distance < *d).unwrap_or(true) {
            best = Some((distance, id.to_string()));
        }
    }
    Ok(best.map(|(_, id)| id))
}
