//! Shared pipeline counters with atomic fields for lock-free updates.
//!
//! Shared as `Arc<PipelineStatus>` and updated from the audio hot path
//! without locks; `/status` serves a [`snapshot`](PipelineStatus::snapshot).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct PipelineStatus {
    running: AtomicBool,
    frames_seen: AtomicU64,
    frames_dropped: AtomicU64,
    windows_submitted: AtomicU64,
    windows_transcribed: AtomicU64,
    transcriber_errors: AtomicU64,
    drafts_opened: AtomicU64,
    drafts_closed: AtomicU64,
    revisions_stored: AtomicU64,
}

impl PipelineStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn incr_frames_seen(&self) {
        self.frames_seen.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_frames_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Sources track their own drop counters; copy the latest value in.
    pub fn set_frames_dropped(&self, dropped: u64) {
        self.frames_dropped.store(dropped, Ordering::Relaxed);
    }

    pub fn incr_windows_submitted(&self) {
        self.windows_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_windows_transcribed(&self) {
        self.windows_transcribed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_transcriber_errors(&self) {
        self.transcriber_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_drafts_opened(&self) {
        self.drafts_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_drafts_closed(&self) {
        self.drafts_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_revisions_stored(&self) {
        self.revisions_stored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineStatusSnapshot {
        PipelineStatusSnapshot {
            running: self.running.load(Ordering::Relaxed),
            frames_seen: self.frames_seen.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            windows_submitted: self.windows_submitted.load(Ordering::Relaxed),
            windows_transcribed: self.windows_transcribed.load(Ordering::Relaxed),
            transcriber_errors: self.transcriber_errors.load(Ordering::Relaxed),
            drafts_opened: self.drafts_opened.load(Ordering::Relaxed),
            drafts_closed: self.drafts_closed.load(Ordering::Relaxed),
            revisions_stored: self.revisions_stored.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PipelineStatusSnapshot {
    pub running: bool,
    pub frames_seen: u64,
    pub frames_dropped: u64,
    pub windows_submitted: u64,
    pub windows_transcribed: u64,
    pub transcriber_errors: u64,
    pub drafts_opened: u64,
    pub drafts_closed: u64,
    pub revisions_stored: u64,
}
