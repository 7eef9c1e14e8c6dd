//! Channel-based transcription worker pool.
//!
//! Decouples audio ingestion from inference by running decoding on dedicated
//! threads. Scan windows enter a bounded request queue (a full queue
//! backpressures the submitter cooperatively); each worker owns one
//! transcriber and processes one window at a time. A collector thread
//! re-emits results in submission order, abandons windows that blow their
//! deadline, and restarts crashed workers up to the configured limit.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use crossbeam_channel as channel;
use scrive_events::{TextEvent, TextSegment};
use tokio::sync::mpsc;

use crate::{
    AudioWindow, Result, TranscribeError, Transcriber, TranscriberConfig, TranscriberFactory,
};

struct Job {
    seq: u64,
    window: AudioWindow,
}

struct Meta {
    seq: u64,
    deadline: Instant,
    start_time: f64,
    end_time: f64,
    source_id: String,
}

enum WorkerMessage {
    Done {
        seq: u64,
        segments: std::result::Result<Vec<TextSegment>, String>,
    },
    Crashed {
        seq: Option<u64>,
        message: String,
    },
}

/// Collector output, drained by the pipeline's text stage.
#[derive(Debug)]
pub enum WorkerOutput {
    Text(TextEvent),
    /// A window was abandoned (timeout, model error, or worker crash); the
    /// pipeline continues.
    SoftError(String),
    /// The pool is giving up (restarts exhausted); escalate.
    Fatal(String),
}

pub struct WorkerPool {
    request_tx: Option<channel::Sender<Job>>,
    meta_tx: Option<channel::Sender<Meta>>,
    next_seq: u64,
    timeout: Duration,
    collector: Option<std::thread::JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `config.workers` worker threads plus the ordering collector.
    /// Results are delivered on `output_tx`.
    pub fn spawn(
        factory: TranscriberFactory,
        config: &TranscriberConfig,
        output_tx: mpsc::Sender<WorkerOutput>,
    ) -> Self {
        let (request_tx, request_rx) = channel::bounded::<Job>(config.queue_depth.max(1));
        let (meta_tx, meta_rx) = channel::unbounded::<Meta>();
        let (result_tx, result_rx) = channel::unbounded::<WorkerMessage>();

        let workers = config.workers.max(1);
        for id in 0..workers {
            spawn_worker(id, factory.clone(), request_rx.clone(), result_tx.clone());
        }

        let max_restarts = config.max_restarts;
        let collector = std::thread::Builder::new()
            .name("transcribe-collector".into())
            .spawn(move || {
                collector_loop(
                    meta_rx,
                    result_rx,
                    request_rx,
                    result_tx,
                    factory,
                    output_tx,
                    max_restarts,
                );
            })
            .expect("failed to spawn collector thread");

        Self {
            request_tx: Some(request_tx),
            meta_tx: Some(meta_tx),
            next_seq: 0,
            timeout: config.timeout,
            collector: Some(collector),
        }
    }

    /// Submit one window. Blocks cooperatively while the request queue is
    /// full, which is what backpressures the scan stage.
    pub async fn submit(&mut self, window: AudioWindow) -> Result<()> {
        let seq = self.next_seq;
        self.next_seq += 1;

        let meta_tx = self.meta_tx.as_ref().ok_or(TranscribeError::PoolClosed)?;
        meta_tx
            .send(Meta {
                seq,
                deadline: Instant::now() + self.timeout,
                start_time: window.start_time,
                end_time: window.end_time,
                source_id: window.source_id.clone(),
            })
            .map_err(|_| TranscribeError::PoolClosed)?;

        let request_tx = self.request_tx.as_ref().ok_or(TranscribeError::PoolClosed)?;
        let mut job = Job { seq, window };
        loop {
            match request_tx.try_send(job) {
                Ok(()) => return Ok(()),
                Err(channel::TrySendError::Full(returned)) => {
                    job = returned;
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                Err(channel::TrySendError::Disconnected(_)) => {
                    return Err(TranscribeError::PoolClosed)
                }
            }
        }
    }

    pub fn submitted(&self) -> u64 {
        self.next_seq
    }

    /// Stop accepting work, let the workers drain the queue, and wait up to
    /// `grace` for the collector to emit what remains. In-flight windows
    /// past the grace period are abandoned.
    pub async fn graceful_shutdown(mut self, grace: Duration) {
        self.request_tx.take();
        self.meta_tx.take();
        let Some(collector) = self.collector.take() else {
            return;
        };
        let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
        std::thread::spawn(move || {
            let _ = collector.join();
            let _ = done_tx.send(());
        });
        if tokio::time::timeout(grace, done_rx).await.is_err() {
            tracing::warn!("transcriber shutdown grace expired, abandoning in-flight windows");
        }
    }
}

fn spawn_worker(
    id: usize,
    factory: TranscriberFactory,
    request_rx: channel::Receiver<Job>,
    result_tx: channel::Sender<WorkerMessage>,
) {
    let _ = std::thread::Builder::new()
        .name(format!("transcribe-worker-{id}"))
        .spawn(move || {
            let mut transcriber = match factory() {
                Ok(t) => t,
                Err(e) => {
                    let _ = result_tx.send(WorkerMessage::Crashed {
                        seq: None,
                        message: format!("transcriber init failed: {e}"),
                    });
                    return;
                }
            };
            tracing::debug!(worker = id, model = transcriber.model_name(), "worker ready");

            while let Ok(job) = request_rx.recv() {
                let started = Instant::now();
                let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    transcriber.transcribe(&job.window)
                }));
                match outcome {
                    Ok(Ok(segments)) => {
                        tracing::debug!(
                            worker = id,
                            seq = job.seq,
                            segments = segments.len(),
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "window transcribed"
                        );
                        let _ = result_tx.send(WorkerMessage::Done {
                            seq: job.seq,
                            segments: Ok(segments),
                        });
                    }
                    Ok(Err(e)) => {
                        let _ = result_tx.send(WorkerMessage::Done {
                            seq: job.seq,
                            segments: Err(e.to_string()),
                        });
                    }
                    Err(panic) => {
                        let message = panic
                            .downcast_ref::<&str>()
                            .map(|s| s.to_string())
                            .or_else(|| panic.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "worker panicked".into());
                        let _ = result_tx.send(WorkerMessage::Crashed {
                            seq: Some(job.seq),
                            message,
                        });
                        return;
                    }
                }
            }
        });
}

#[allow(clippy::too_many_arguments)]
fn collector_loop(
    meta_rx: channel::Receiver<Meta>,
    result_rx: channel::Receiver<WorkerMessage>,
    request_rx: channel::Receiver<Job>,
    result_tx: channel::Sender<WorkerMessage>,
    factory: TranscriberFactory,
    output_tx: mpsc::Sender<WorkerOutput>,
    max_restarts: u32,
) {
    let mut pending: HashMap<u64, std::result::Result<Vec<TextSegment>, String>> = HashMap::new();
    let mut crashes: u32 = 0;
    let mut restart_ids = 1000usize;

    'windows: while let Ok(meta) = meta_rx.recv() {
        loop {
            if let Some(result) = pending.remove(&meta.seq) {
                if !emit(&output_tx, &meta, result) {
                    return;
                }
                continue 'windows;
            }
            match result_rx.recv_deadline(meta.deadline) {
                Ok(WorkerMessage::Done { seq, segments }) => {
                    if seq == meta.seq {
                        if !emit(&output_tx, &meta, segments) {
                            return;
                        }
                        continue 'windows;
                    }
                    if seq > meta.seq {
                        pending.insert(seq, segments);
                    }
                    // seq < meta.seq: late result for an abandoned window.
                }
                Ok(WorkerMessage::Crashed { seq, message }) => {
                    crashes += 1;
                    tracing::error!(%message, crashes, "transcriber worker crashed");
                    if crashes > max_restarts {
                        let _ = output_tx.blocking_send(WorkerOutput::Fatal(
                            TranscribeError::RestartsExhausted(crashes).to_string(),
                        ));
                        return;
                    }
                    spawn_worker(
                        restart_ids,
                        factory.clone(),
                        request_rx.clone(),
                        result_tx.clone(),
                    );
                    restart_ids += 1;
                    if seq == Some(meta.seq) {
                        if output_tx
                            .blocking_send(WorkerOutput::SoftError(format!(
                                "window {} lost to worker crash: {message}",
                                meta.seq
                            )))
                            .is_err()
                        {
                            return;
                        }
                        continue 'windows;
                    }
                }
                Err(channel::RecvTimeoutError::Timeout) => {
                    tracing::warn!(seq = meta.seq, "window timed out, abandoning");
                    if output_tx
                        .blocking_send(WorkerOutput::SoftError(format!(
                            "window {} timed out",
                            meta.seq
                        )))
                        .is_err()
                    {
                        return;
                    }
                    continue 'windows;
                }
                Err(channel::RecvTimeoutError::Disconnected) => return,
            }
        }
    }
}

/// Emit one finished window in order. Returns false when the output side is
/// gone.
fn emit(
    output_tx: &mpsc::Sender<WorkerOutput>,
    meta: &Meta,
    result: std::result::Result<Vec<TextSegment>, String>,
) -> bool {
    match result {
        Ok(segments) => {
            if segments.is_empty() {
                tracing::debug!(seq = meta.seq, "window produced no text");
                return true;
            }
            let event = TextEvent::new(
                segments,
                meta.source_id.clone(),
                meta.start_time,
                meta.end_time,
            );
            output_tx.blocking_send(WorkerOutput::Text(event)).is_ok()
        }
        Err(message) => output_tx
            .blocking_send(WorkerOutput::SoftError(format!(
                "window {} failed: {message}",
                meta.seq
            )))
            .is_ok(),
    }
}
