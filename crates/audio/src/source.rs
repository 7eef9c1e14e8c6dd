//! Audio sources: device capture, WAV file replay, remote websocket streams.
//!
//! A source emits one `Start` marker, an unbounded run of frames, then one
//! `Stop`. Capture failures emit `Error` followed by `Stop`. Pause and
//! resume gate emission only; the underlying device keeps running and frames
//! arriving while paused are discarded.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use crossbeam_channel::{Receiver, Sender};
use scrive_events::{unix_now, AudioFrame, Event, StreamMarker};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{Result, CHUNK_SECONDS};

/// Consecutive dropped frames before an `Error` event is emitted on the
/// stream (the session keeps running).
const DROP_ERROR_THRESHOLD: u64 = 100;

/// Build a stream URI for a new source session.
pub fn create_source_id(kind: &str) -> String {
    format!("ase://local/scrive/audio_source/{kind}/{}", Uuid::new_v4())
}

/// Common contract for everything that can feed the pipeline.
///
/// `start` attaches the sink channel and begins emission; `stop` ends the
/// session (the `Stop` marker is emitted by the source itself). Both are
/// idempotent.
pub trait AudioSource: Send {
    fn start(&mut self, tx: mpsc::Sender<Event>) -> Result<()>;
    fn stop(&mut self);
    fn pause(&self);
    fn resume(&self);
    fn source_id(&self) -> &str;

    /// Frames discarded because the sink was backed up.
    fn dropped_frames(&self) -> u64 {
        0
    }
}

/// Emission-side state shared between a source facade and its worker.
struct Emitter {
    tx: mpsc::Sender<Event>,
    source_id: String,
    stream_start: f64,
    last_timestamp: f64,
    paused: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    consecutive_drops: u64,
}

impl Emitter {
    fn new(tx: mpsc::Sender<Event>, source_id: String, paused: Arc<AtomicBool>, dropped: Arc<AtomicU64>) -> Self {
        let stream_start = unix_now();
        Self {
            tx,
            source_id,
            stream_start,
            last_timestamp: stream_start,
            paused,
            dropped,
            consecutive_drops: 0,
        }
    }

    /// Markers must not be lost; block until there is room.
    fn emit_marker(&self, marker: StreamMarker) -> bool {
        self.tx.blocking_send(Event::Stream(marker)).is_ok()
    }

    /// Emit one frame, timestamped at handoff. Returns false once the sink
    /// is gone. Frames are discarded while paused, and dropped (with a
    /// counter) when the sink is backed up.
    fn emit_samples(&mut self, samples: Vec<f32>, sample_rate: u32, channels: u16) -> bool {
        if self.paused.load(Ordering::Relaxed) {
            return true;
        }
        // Timestamps are monotone non-decreasing within a session.
        let timestamp = unix_now().max(self.last_timestamp);
        self.last_timestamp = timestamp;

        let frame = AudioFrame::new(
            self.source_id.clone(),
            self.stream_start,
            timestamp,
            samples,
            sample_rate,
            channels,
        );
        match self.tx.try_send(Event::Audio(frame)) {
            Ok(()) => {
                self.consecutive_drops = 0;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                self.consecutive_drops += 1;
                if self.consecutive_drops == DROP_ERROR_THRESHOLD {
                    tracing::warn!(total, source = %self.source_id, "sink backed up, dropping frames");
                    let _ = self.tx.try_send(Event::Stream(StreamMarker::error(
                        self.source_id.clone(),
                        format!("dropped {total} frames: downstream backed up"),
                    )));
                }
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

// ── Microphone ───────────────────────────────────────────────────────────

enum DeviceMessage {
    Samples(Vec<f32>),
    Failed(String),
}

/// Default-input-device capture via cpal.
///
/// The cpal stream is not `Send`, so the device is opened and owned by a
/// dedicated capture thread; the audio callback hands sample blocks over a
/// crossbeam channel.
pub struct MicSource {
    source_id: String,
    device_id: Option<String>,
    paused: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MicSource {
    pub fn new(device_id: Option<String>) -> Self {
        Self {
            source_id: create_source_id("mic"),
            device_id,
            paused: Arc::new(AtomicBool::new(false)),
            dropped: Arc::new(AtomicU64::new(0)),
            stop_tx: None,
            thread: None,
        }
    }
}

impl AudioSource for MicSource {
    fn start(&mut self, tx: mpsc::Sender<Event>) -> Result<()> {
        if self.thread.is_some() {
            return Ok(());
        }
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let emitter = Emitter::new(
            tx,
            self.source_id.clone(),
            Arc::clone(&self.paused),
            Arc::clone(&self.dropped),
        );
        let device_id = self.device_id.clone();
        let thread = std::thread::Builder::new()
            .name("mic-source".into())
            .spawn(move || run_mic(device_id, emitter, stop_rx))
            .map_err(|e| crate::AudioError::StreamError(format!("spawn failed: {e}")))?;
        self.thread = Some(thread);
        self.stop_tx = Some(stop_tx);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
    }

    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for MicSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_mic(device_id: Option<String>, mut emitter: Emitter, stop_rx: Receiver<()>) {
    let host = cpal::default_host();
    let device = match device_id {
        Some(ref id) => host
            .input_devices()
            .ok()
            .and_then(|mut devices| devices.find(|d| d.name().ok().as_deref() == Some(id))),
        None => host.default_input_device(),
    };
    let Some(device) = device else {
        let wanted = device_id.unwrap_or_else(|| "default".into());
        tracing::error!(device = %wanted, "input device not found");
        emitter.emit_marker(StreamMarker::error(
            emitter.source_id.clone(),
            format!("input device not found: {wanted}"),
        ));
        emitter.emit_marker(StreamMarker::stop(emitter.source_id.clone()));
        return;
    };

    let config = match device.default_input_config() {
        Ok(config) => config,
        Err(e) => {
            emitter.emit_marker(StreamMarker::error(
                emitter.source_id.clone(),
                format!("failed to get input config: {e}"),
            ));
            emitter.emit_marker(StreamMarker::stop(emitter.source_id.clone()));
            return;
        }
    };

    let sample_rate = config.sample_rate().0;
    let channels = config.channels();
    let block_size = (sample_rate as f64 * CHUNK_SECONDS) as u32;

    let (data_tx, data_rx) = crossbeam_channel::unbounded::<DeviceMessage>();
    let error_tx = data_tx.clone();
    let on_error = move |err: cpal::StreamError| {
        let _ = error_tx.send(DeviceMessage::Failed(err.to_string()));
    };

    let stream = match config.sample_format() {
        SampleFormat::F32 => device.build_input_stream(
            &config.into(),
            move |data: &[f32], _| {
                let _ = data_tx.send(DeviceMessage::Samples(data.to_vec()));
            },
            on_error,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &config.into(),
            move |data: &[i16], _| {
                let float: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0).collect();
                let _ = data_tx.send(DeviceMessage::Samples(float));
            },
            on_error,
            None,
        ),
        format => {
            emitter.emit_marker(StreamMarker::error(
                emitter.source_id.clone(),
                format!("unsupported sample format: {format:?}"),
            ));
            emitter.emit_marker(StreamMarker::stop(emitter.source_id.clone()));
            return;
        }
    };
    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            emitter.emit_marker(StreamMarker::error(
                emitter.source_id.clone(),
                format!("failed to build stream: {e}"),
            ));
            emitter.emit_marker(StreamMarker::stop(emitter.source_id.clone()));
            return;
        }
    };
    if let Err(e) = stream.play() {
        emitter.emit_marker(StreamMarker::error(
            emitter.source_id.clone(),
            format!("failed to start stream: {e}"),
        ));
        emitter.emit_marker(StreamMarker::stop(emitter.source_id.clone()));
        return;
    }

    tracing::info!(sample_rate, channels, block_size, source = %emitter.source_id, "capture started");
    emitter.emit_marker(StreamMarker::start(
        emitter.source_id.clone(),
        sample_rate,
        channels,
        block_size,
    ));

    // Re-block arbitrary callback buffer sizes into the advertised cadence.
    let block_samples = block_size as usize * channels as usize;
    let mut pending: Vec<f32> = Vec::with_capacity(block_samples * 2);

    loop {
        crossbeam_channel::select! {
            recv(stop_rx) -> _ => break,
            recv(data_rx) -> msg => match msg {
                Ok(DeviceMessage::Samples(samples)) => {
                    pending.extend_from_slice(&samples);
                    while pending.len() >= block_samples {
                        let block: Vec<f32> = pending.drain(..block_samples).collect();
                        if !emitter.emit_samples(block, sample_rate, channels) {
                            drop(stream);
                            return;
                        }
                    }
                }
                Ok(DeviceMessage::Failed(message)) => {
                    tracing::error!(%message, "capture failed");
                    emitter.emit_marker(StreamMarker::error(emitter.source_id.clone(), message));
                    break;
                }
                Err(_) => break,
            },
        }
    }

    drop(stream);
    emitter.emit_marker(StreamMarker::stop(emitter.source_id.clone()));
    tracing::info!(source = %emitter.source_id, "capture stopped");
}

// ── WAV file replay ──────────────────────────────────────────────────────

/// Streams a WAV file as if it were a live capture session.
///
/// With `realtime` set, emission is paced to the file's own clock; rescan
/// runs disable pacing and push as fast as downstream accepts.
pub struct FileSource {
    source_id: String,
    path: std::path::PathBuf,
    realtime: bool,
    paused: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl FileSource {
    pub fn new(path: impl Into<std::path::PathBuf>, realtime: bool) -> Self {
        Self {
            source_id: create_source_id("file"),
            path: path.into(),
            realtime,
            paused: Arc::new(AtomicBool::new(false)),
            dropped: Arc::new(AtomicU64::new(0)),
            stop_tx: None,
            thread: None,
        }
    }
}

impl AudioSource for FileSource {
    fn start(&mut self, tx: mpsc::Sender<Event>) -> Result<()> {
        if self.thread.is_some() {
            return Ok(());
        }
        let reader = hound::WavReader::open(&self.path)?;
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let emitter = Emitter::new(
            tx,
            self.source_id.clone(),
            Arc::clone(&self.paused),
            Arc::clone(&self.dropped),
        );
        let realtime = self.realtime;
        let thread = std::thread::Builder::new()
            .name("file-source".into())
            .spawn(move || run_file(reader, emitter, stop_rx, realtime))
            .map_err(|e| crate::AudioError::StreamError(format!("spawn failed: {e}")))?;
        self.thread = Some(thread);
        self.stop_tx = Some(stop_tx);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
    }

    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for FileSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_file(
    mut reader: hound::WavReader<std::io::BufReader<std::fs::File>>,
    mut emitter: Emitter,
    stop_rx: Receiver<()>,
    realtime: bool,
) {
    let spec = reader.spec();
    let sample_rate = spec.sample_rate;
    let channels = spec.channels;
    let block_size = (sample_rate as f64 * CHUNK_SECONDS) as u32;
    let block_samples = block_size as usize * channels as usize;
    let block_duration = Duration::from_secs_f64(CHUNK_SECONDS);

    emitter.emit_marker(StreamMarker::start(
        emitter.source_id.clone(),
        sample_rate,
        channels,
        block_size,
    ));

    let samples: Box<dyn Iterator<Item = std::result::Result<f32, hound::Error>> + '_> =
        match spec.sample_format {
            hound::SampleFormat::Float => Box::new(reader.samples::<f32>()),
            hound::SampleFormat::Int => {
                let scale = 1.0 / (1i64 << (spec.bits_per_sample - 1)) as f32;
                Box::new(reader.samples::<i32>().map(move |s| s.map(|v| v as f32 * scale)))
            }
        };

    let mut block: Vec<f32> = Vec::with_capacity(block_samples);
    for sample in samples {
        if stop_rx.try_recv().is_ok() {
            emitter.emit_marker(StreamMarker::stop(emitter.source_id.clone()));
            return;
        }
        match sample {
            Ok(value) => {
                block.push(value);
                if block.len() == block_samples {
                    if !emitter.emit_samples(std::mem::take(&mut block), sample_rate, channels) {
                        return;
                    }
                    block.reserve(block_samples);
                    if realtime {
                        std::thread::sleep(block_duration);
                    }
                }
            }
            Err(e) => {
                emitter.emit_marker(StreamMarker::error(
                    emitter.source_id.clone(),
                    format!("file read error: {e}"),
                ));
                break;
            }
        }
    }
    if !block.is_empty() {
        emitter.emit_samples(block, sample_rate, channels);
    }
    emitter.emit_marker(StreamMarker::stop(emitter.source_id.clone()));
}

// ── Remote websocket ingestion ───────────────────────────────────────────

/// Consumes wire-format audio events from another server's `/events`
/// endpoint and replays them into the local pipeline.
pub struct RemoteSource {
    source_id: String,
    url: String,
    paused: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl RemoteSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            source_id: create_source_id("remote"),
            url: url.into(),
            paused: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }
}

impl AudioSource for RemoteSource {
    /// Must be called from within a tokio runtime.
    fn start(&mut self, tx: mpsc::Sender<Event>) -> Result<()> {
        if self.task.is_some() {
            return Ok(());
        }
        self.running.store(true, Ordering::Relaxed);
        let url = self.url.clone();
        let source_id = self.source_id.clone();
        let paused = Arc::clone(&self.paused);
        let running = Arc::clone(&self.running);
        self.task = Some(tokio::spawn(async move {
            run_remote(url, source_id, tx, paused, running).await;
        }));
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
    }

    fn source_id(&self) -> &str {
        &self.source_id
    }
}

async fn run_remote(
    url: String,
    source_id: String,
    tx: mpsc::Sender<Event>,
    paused: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
) {
    use futures::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message;

    let (mut ws, _) = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok(ok) => ok,
        Err(e) => {
            tracing::error!(%url, error = %e, "remote audio connect failed");
            let _ = tx
                .send(Event::Stream(StreamMarker::error(
                    source_id.clone(),
                    format!("connect failed: {e}"),
                )))
                .await;
            let _ = tx.send(Event::Stream(StreamMarker::stop(source_id))).await;
            return;
        }
    };

    let subscribe = serde_json::json!({
        "subscribe": ["AudioStart", "AudioStop", "AudioChunk", "AudioError"],
    });
    if ws.send(Message::Text(subscribe.to_string())).await.is_err() {
        let _ = tx.send(Event::Stream(StreamMarker::stop(source_id))).await;
        return;
    }
    tracing::info!(%url, "remote audio subscribed");

    while running.load(Ordering::Relaxed) {
        let Some(message) = ws.next().await else { break };
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };
        let Some(event) = decode_wire_event(&text, &source_id) else {
            continue;
        };
        if paused.load(Ordering::Relaxed) && matches!(event, Event::Audio(_)) {
            continue;
        }
        let is_stop = matches!(event, Event::Stream(StreamMarker::Stop { .. }));
        if tx.send(event).await.is_err() {
            return;
        }
        if is_stop {
            return;
        }
    }
    let _ = tx.send(Event::Stream(StreamMarker::stop(source_id))).await;
}

/// Decode one wire envelope back into a pipeline event. The remote
/// `source_id` is replaced with this session's id so downstream consumers
/// see a single coherent stream.
fn decode_wire_event(text: &str, source_id: &str) -> Option<Event> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let class = value.get("event_class")?.as_str()?;
    match class {
        "AudioChunk" => {
            let samples: Vec<f32> = value
                .get("data")?
                .as_array()?
                .iter()
                .filter_map(|v| v.as_f64().map(|f| f as f32))
                .collect();
            let mut frame = AudioFrame::new(
                source_id,
                value.get("stream_start").and_then(|v| v.as_f64()).unwrap_or(0.0),
                value.get("timestamp").and_then(|v| v.as_f64()).unwrap_or(0.0),
                samples,
                value.get("sample_rate").and_then(|v| v.as_u64()).unwrap_or(16000) as u32,
                value.get("channels").and_then(|v| v.as_u64()).unwrap_or(1) as u16,
            );
            frame.in_speech = false;
            Some(Event::Audio(frame))
        }
        "AudioStart" => Some(Event::Stream(StreamMarker::Start {
            source_id: source_id.to_string(),
            timestamp: value.get("timestamp").and_then(|v| v.as_f64()).unwrap_or(0.0),
            sample_rate: value.get("sample_rate").and_then(|v| v.as_u64()).unwrap_or(16000) as u32,
            channels: value.get("channels").and_then(|v| v.as_u64()).unwrap_or(1) as u16,
            block_size: value.get("block_size").and_then(|v| v.as_u64()).unwrap_or(480) as u32,
        })),
        "AudioStop" => Some(Event::Stream(StreamMarker::stop(source_id))),
        "AudioError" => Some(Event::Stream(StreamMarker::error(
            source_id,
            value
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("remote error")
                .to_string(),
        ))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_test_wav(path: &std::path::Path, seconds: f64) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        let total = (16000.0 * seconds) as usize;
        for i in 0..total {
            let t = i as f32 / 16000.0;
            let sample = (0.4 * (2.0 * std::f32::consts::PI * 440.0 * t).sin() * 32767.0) as i16;
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[tokio::test]
    async fn test_file_source_emits_start_frames_stop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_test_wav(&path, 0.3);

        let (tx, mut rx) = mpsc::channel(256);
        let mut source = FileSource::new(&path, false);
        source.start(tx).unwrap();

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        source.stop();

        assert!(matches!(
            events.first(),
            Some(Event::Stream(StreamMarker::Start { sample_rate: 16000, channels: 1, .. }))
        ));
        assert!(matches!(
            events.last(),
            Some(Event::Stream(StreamMarker::Stop { .. }))
        ));
        let frames = events
            .iter()
            .filter(|e| matches!(e, Event::Audio(_)))
            .count();
        // 0.3 s at 30 ms cadence.
        assert!((9..=10).contains(&frames), "got {frames} frames");
    }

    #[tokio::test]
    async fn test_file_source_timestamps_monotone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_test_wav(&path, 0.2);

        let (tx, mut rx) = mpsc::channel(256);
        let mut source = FileSource::new(&path, false);
        source.start(tx).unwrap();

        let mut last = 0.0f64;
        while let Some(event) = rx.recv().await {
            if let Event::Audio(frame) = event {
                assert!(frame.timestamp >= last);
                last = frame.timestamp;
            }
        }
        source.stop();
    }

    #[tokio::test]
    async fn test_paused_file_source_discards_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_test_wav(&path, 0.2);

        let (tx, mut rx) = mpsc::channel(256);
        let mut source = FileSource::new(&path, false);
        source.pause();
        source.start(tx).unwrap();

        let mut frames = 0;
        let mut saw_stop = false;
        while let Some(event) = rx.recv().await {
            match event {
                Event::Audio(_) => frames += 1,
                Event::Stream(StreamMarker::Stop { .. }) => saw_stop = true,
                _ => {}
            }
        }
        source.stop();
        assert_eq!(frames, 0);
        assert!(saw_stop);
    }

    #[test]
    fn test_missing_file_fails_synchronously() {
        let (tx, _rx) = mpsc::channel(4);
        let mut source = FileSource::new("/nonexistent/audio.wav", false);
        assert!(source.start(tx).is_err());
    }

    #[test]
    fn test_decode_wire_chunk() {
        let json = r#"{
            "event_class": "AudioChunk",
            "timestamp": 12.5,
            "stream_start": 10.0,
            "sample_rate": 16000,
            "channels": 1,
            "data": [0.1, -0.1, 0.2]
        }"#;
        let event = decode_wire_event(json, "local-id").unwrap();
        match event {
            Event::Audio(frame) => {
                assert_eq!(frame.source_id, "local-id");
                assert_eq!(frame.samples.len(), 3);
                assert!((frame.timestamp - 12.5).abs() < 1e-9);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_decode_ignores_unknown_class() {
        assert!(decode_wire_event(r#"{"event_class": "Text"}"#, "id").is_none());
        assert!(decode_wire_event("not json", "id").is_none());
    }

    #[test]
    fn test_source_id_shape() {
        let id = create_source_id("mic");
        assert!(id.starts_with("ase://local/scrive/audio_source/mic/"));
        assert_ne!(id, create_source_id("mic"));
    }
}
