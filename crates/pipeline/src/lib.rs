//! Pipeline orchestration: owns and wires every stage.
//!
//! The orchestrator is one cooperative loop on the tokio runtime: frames
//! from the source pass through the resampler and VAD gate, fan out on the
//! event bus, and accumulate into scan windows; finished windows go to the
//! transcription worker pool over a bounded queue, and its ordered text
//! output feeds the draft assembler. Draft events are persisted before they
//! are published. The only other execution contexts are the source's capture
//! thread and the pool's worker threads.
//!
//! Startup is bottom-up, shutdown the reverse: stop the source, drain the
//! resampler and gate, flush the scan buffer, wait out the worker pool with
//! a deadline, close the assembler with end-of-input, and mark the pipeline
//! stopped. Errors during shutdown are logged and do not prevent the
//! remaining steps.

mod error;

pub use error::PipelineError;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use scrive_audio::{AudioRing, AudioSource, Resampler};
use scrive_draft::{AssemblerConfig, DraftAssembler};
use scrive_events::{
    DraftEvent, Event, EventBus, PipelineStatus, StreamMarker, TextEvent,
};
use scrive_storage::{Database, DraftRecord, RevisionMetadata};
use scrive_transcribe::{
    ScanBuffer, TranscriberConfig, TranscriberFactory, WorkerOutput, WorkerPool,
};
use scrive_vad::{EnergyClassifier, SpeechClassifier, VadGate, VadGateConfig};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub vad: VadGateConfig,
    pub transcriber: TranscriberConfig,
    pub assembler: AssemblerConfig,
    /// Pre-roll ring retention; keep comfortably larger than the pad plus
    /// one scan window.
    pub ring_seconds: f64,
    /// Capacity of the source → orchestrator channel.
    pub channel_capacity: usize,
    /// Transcriber drain deadline at shutdown.
    pub shutdown_grace: Duration,
    /// Rescan mode: the gate passes the whole stream through as one speech
    /// region instead of classifying.
    pub rescan: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            vad: VadGateConfig::default(),
            transcriber: TranscriberConfig::default(),
            assembler: AssemblerConfig::default(),
            ring_seconds: 12.0,
            channel_capacity: 64,
            shutdown_grace: Duration::from_secs(3),
            rescan: false,
        }
    }
}

#[derive(Debug)]
enum Command {
    Pause,
    Resume,
    Shutdown,
}

/// Cloneable remote control for a running pipeline.
#[derive(Clone)]
pub struct PipelineControl {
    tx: mpsc::UnboundedSender<Command>,
}

impl PipelineControl {
    pub fn pause(&self) {
        let _ = self.tx.send(Command::Pause);
    }

    pub fn resume(&self) {
        let _ = self.tx.send(Command::Resume);
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    bus: Arc<EventBus>,
    status: Arc<PipelineStatus>,
    store: Option<Arc<Database>>,
    command_rx: mpsc::UnboundedReceiver<Command>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, store: Option<Arc<Database>>) -> (Self, PipelineControl) {
        let (tx, command_rx) = mpsc::unbounded_channel();
        (
            Self {
                config,
                bus: Arc::new(EventBus::new()),
                status: Arc::new(PipelineStatus::new()),
                store,
                command_rx,
            },
            PipelineControl { tx },
        )
    }

    pub fn bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    pub fn status(&self) -> Arc<PipelineStatus> {
        Arc::clone(&self.status)
    }

    /// Run until the source stops, shutdown is requested, or a fatal error
    /// escalates. Consumes the source for the session.
    pub async fn run(
        &mut self,
        mut source: Box<dyn AudioSource>,
        factory: TranscriberFactory,
        cancel: CancellationToken,
    ) -> Result<(), PipelineError> {
        let (source_tx, mut source_rx) = mpsc::channel::<Event>(self.config.channel_capacity);
        let (worker_tx, mut worker_rx) = mpsc::channel::<WorkerOutput>(self.config.channel_capacity);

        // The command receiver leaves `self` for the loop so stage calls can
        // borrow `self` freely inside the select arms.
        let (_closed_tx, closed_rx) = mpsc::unbounded_channel();
        let mut command_rx = std::mem::replace(&mut self.command_rx, closed_rx);
        let mut commands_open = true;

        let mut resampler = Resampler::new();
        let classifier: Box<dyn SpeechClassifier> = Box::new(EnergyClassifier::new(
            self.config.vad.threshold,
            self.config.vad.silence_ms,
        ));
        let mut gate = if self.config.rescan {
            VadGate::passthrough(classifier, self.config.vad)
        } else {
            VadGate::new(classifier, self.config.vad)
        };
        let mut ring = AudioRing::new(self.config.ring_seconds);
        let mut scan = ScanBuffer::new(&self.config.transcriber);
        let mut pool = WorkerPool::spawn(factory, &self.config.transcriber, worker_tx);
        let mut assembler = DraftAssembler::new(self.config.assembler.clone());

        source
            .start(source_tx)
            .map_err(|e| PipelineError::Device(e.to_string()))?;
        self.status.set_running(true);
        tracing::info!(source = source.source_id(), rescan = self.config.rescan, "pipeline started");

        let mut fatal: Option<PipelineError> = None;
        let mut worker_done = false;

        loop {
            tokio::select! {
                event = source_rx.recv() => {
                    let Some(event) = event else { break };
                    match self.ingest(event, &mut resampler, &mut gate, &mut ring, &mut scan, &mut pool).await {
                        Ok(saw_stop) => {
                            if saw_stop {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "stage error, escalating");
                            fatal.get_or_insert(e);
                            break;
                        }
                    }
                }
                output = worker_rx.recv(), if !worker_done => {
                    let Some(output) = output else {
                        worker_done = true;
                        continue;
                    };
                    if let Err(e) = self.handle_worker_output(output, &mut assembler).await {
                        tracing::error!(error = %e, "text stage error, escalating");
                        fatal.get_or_insert(e);
                        break;
                    }
                }
                command = command_rx.recv(), if commands_open => {
                    match command {
                        Some(Command::Pause) => source.pause(),
                        Some(Command::Resume) => source.resume(),
                        Some(Command::Shutdown) => break,
                        // The control handle went away; the session keeps
                        // running until the source stops or cancellation.
                        None => commands_open = false,
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }

        // Ordered teardown; failures here are logged, never skipped past.
        // The device is stopped off-loop because its capture thread may be
        // blocked on the full source channel that only drains below.
        self.status.set_frames_dropped(source.dropped_frames());
        let stopper = tokio::task::spawn_blocking(move || {
            source.stop();
        });
        self.drain_source(
            &mut source_rx,
            &mut resampler,
            &mut gate,
            &mut ring,
            &mut scan,
            &mut pool,
        )
        .await;
        let _ = stopper.await;

        pool.graceful_shutdown(self.config.shutdown_grace).await;
        while let Some(output) = worker_rx.recv().await {
            if let Err(e) = self.handle_worker_output(output, &mut assembler).await {
                tracing::warn!(error = %e, "error while draining transcriber output");
                fatal.get_or_insert(e);
            }
        }

        if let Some(final_draft) = assembler.end_of_input() {
            if let Err(e) = self.handle_draft_event(final_draft).await {
                tracing::warn!(error = %e, "error closing final draft");
                fatal.get_or_insert(e);
            }
        }

        self.status.set_running(false);
        tracing::info!("pipeline stopped");
        match fatal {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Push one source event through resampler → gate → bus → scan buffer.
    /// Returns true when the stream's `Stop` marker has been processed.
    async fn ingest(
        &self,
        event: Event,
        resampler: &mut Resampler,
        gate: &mut VadGate,
        ring: &mut AudioRing,
        scan: &mut ScanBuffer,
        pool: &mut WorkerPool,
    ) -> Result<bool, PipelineError> {
        let Some(event) = resampler
            .process(event)
            .map_err(|e| PipelineError::Format(e.to_string()))?
        else {
            return Ok(false);
        };

        let mut staged = Vec::with_capacity(3);
        gate.process(event, &mut staged)
            .map_err(|e| PipelineError::Classifier(e.to_string()))?;

        let mut saw_stop = false;
        for event in staged {
            if matches!(event, Event::Audio(_)) {
                self.status.incr_frames_seen();
            }
            if matches!(event, Event::Stream(StreamMarker::Stop { .. })) {
                saw_stop = true;
            }
            let shared = Arc::new(event);
            self.bus.publish_shared(Arc::clone(&shared));

            for window in scan.process(shared.as_ref(), ring) {
                self.status.incr_windows_submitted();
                pool.submit(window)
                    .await
                    .map_err(|e| PipelineError::Transcriber(e.to_string()))?;
            }
        }
        Ok(saw_stop)
    }

    /// Drain whatever the source channel still holds after the main loop.
    async fn drain_source(
        &self,
        source_rx: &mut mpsc::Receiver<Event>,
        resampler: &mut Resampler,
        gate: &mut VadGate,
        ring: &mut AudioRing,
        scan: &mut ScanBuffer,
        pool: &mut WorkerPool,
    ) {
        loop {
            let event = tokio::time::timeout(Duration::from_millis(250), source_rx.recv()).await;
            match event {
                Ok(Some(event)) => {
                    match self.ingest(event, resampler, gate, ring, scan, pool).await {
                        Ok(true) => break,
                        Ok(false) => {}
                        Err(e) => {
                            tracing::warn!(error = %e, "error while draining source");
                            break;
                        }
                    }
                }
                Ok(None) | Err(_) => break,
            }
        }
    }

    async fn handle_worker_output(
        &self,
        output: WorkerOutput,
        assembler: &mut DraftAssembler,
    ) -> Result<(), PipelineError> {
        match output {
            WorkerOutput::Text(text) => self.handle_text_event(text, assembler).await,
            WorkerOutput::SoftError(message) => {
                self.status.incr_transcriber_errors();
                tracing::warn!(%message, "transcriber soft error");
                Ok(())
            }
            WorkerOutput::Fatal(message) => {
                self.status.incr_transcriber_errors();
                Err(PipelineError::Transcriber(message))
            }
        }
    }

    async fn handle_text_event(
        &self,
        text: TextEvent,
        assembler: &mut DraftAssembler,
    ) -> Result<(), PipelineError> {
        self.status.incr_windows_transcribed();
        let drafts = assembler.on_text_event(&text);
        self.bus.publish(Event::Text(text));
        for draft_event in drafts {
            self.handle_draft_event(draft_event).await?;
        }
        Ok(())
    }

    /// Persist (when a store is attached) and then publish a draft event.
    async fn handle_draft_event(&self, event: DraftEvent) -> Result<(), PipelineError> {
        match &event {
            DraftEvent::Start { .. } => self.status.incr_drafts_opened(),
            DraftEvent::End { draft, .. } => {
                self.status.incr_drafts_closed();
                if let Some(store) = &self.store {
                    let store = Arc::clone(store);
                    let record = DraftRecord::from(draft);
                    tokio::task::spawn_blocking(move || store.put(&record))
                        .await
                        .map_err(|e| PipelineError::Storage(e.to_string()))?
                        .map_err(|e| PipelineError::Storage(e.to_string()))?;
                }
            }
            DraftEvent::Rescan {
                draft,
                revision_source,
                original_draft_id,
                ..
            } => {
                if let Some(store) = &self.store {
                    let store = Arc::clone(store);
                    let original = original_draft_id.to_string();
                    let json = serde_json::to_string(draft)
                        .map_err(|e| PipelineError::Storage(e.to_string()))?;
                    let metadata = RevisionMetadata {
                        source: Some(revision_source.as_str().to_string()),
                        ..RevisionMetadata::default()
                    };
                    let stored = tokio::task::spawn_blocking(move || {
                        store.put_revision(&original, &json, &metadata)
                    })
                    .await
                    .map_err(|e| PipelineError::Storage(e.to_string()))?;
                    match stored {
                        Ok(_) => self.status.incr_revisions_stored(),
                        Err(scrive_storage::StorageError::NotFound(what)) => {
                            tracing::warn!(%what, "rescan for unknown draft, revision dropped");
                        }
                        Err(e) => return Err(PipelineError::Storage(e.to_string())),
                    }
                }
            }
        }
        self.bus.publish(Event::Draft(event));
        Ok(())
    }
}
