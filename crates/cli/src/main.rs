//! `scrive`: real-time dictation pipeline with draft assembly.
//!
//! Runs the audio → VAD → transcription → draft pipeline, serves the
//! websocket event stream and draft REST API, and optionally replays audio
//! for rescan-based revisions.

mod rescan;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use scrive_audio::{AudioSource, FileSource, MicSource, RemoteSource};
use scrive_events::EventClass;
use scrive_pipeline::{Pipeline, PipelineConfig};
use scrive_server::{AppState, EventRouter};
use scrive_storage::Database;
use scrive_transcribe::{StubTranscriber, Transcriber, TranscriberFactory};

const EXIT_OK: i32 = 0;
const EXIT_FATAL: i32 = 1;
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser, Debug)]
#[command(name = "scrive", about = "Real-time dictation with draft assembly", version)]
struct Args {
    /// Path to the speech-recognition model.
    #[arg(long, default_value = "models/ggml-base.en.bin")]
    model: PathBuf,

    /// Directory holding the draft database.
    #[arg(long, default_value = "drafts")]
    output_dir: PathBuf,

    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(long, default_value_t = 9000)]
    port: u16,

    /// Ingest audio from a remote /events websocket instead of the
    /// microphone.
    #[arg(long)]
    audio_url: Option<String>,

    /// Replay a WAV file instead of capturing the microphone.
    #[arg(long)]
    input_file: Option<PathBuf>,

    /// Rescan mode: re-transcribe the audio source and publish revisions to
    /// this server's REST API.
    #[arg(long, value_name = "URL")]
    rescan: Option<String>,

    #[arg(long, default_value = "INFO", value_parser = ["DEBUG", "INFO", "WARNING", "ERROR"])]
    log_level: String,
}

fn init_tracing(level: &str) {
    // WARNING is the python-style spelling kept for operator muscle memory.
    let level = match level {
        "WARNING" => "warn",
        other => other,
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_lowercase()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// The ASR engine is pluggable behind the `Transcriber` trait; this binary
/// wires the scripted stub engine and logs the configured model path for
/// the real binding.
fn transcriber_factory(model: &std::path::Path) -> TranscriberFactory {
    if !model.exists() {
        tracing::warn!(model = %model.display(), "model file not found, transcribing with the stub engine");
    }
    Arc::new(|| Ok(Box::new(StubTranscriber::new()) as Box<dyn Transcriber>))
}

fn build_source(args: &Args) -> Box<dyn AudioSource> {
    if let Some(url) = &args.audio_url {
        Box::new(RemoteSource::new(url.clone()))
    } else if let Some(path) = &args.input_file {
        // Rescan runs push as fast as downstream accepts; live replays pace
        // to the file's own clock.
        Box::new(FileSource::new(path, args.rescan.is_none()))
    } else {
        Box::new(MicSource::new(None))
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let interrupted = Arc::new(AtomicBool::new(false));
    let code = match run(args, Arc::clone(&interrupted)).await {
        Ok(()) => {
            if interrupted.load(Ordering::Relaxed) {
                EXIT_INTERRUPTED
            } else {
                EXIT_OK
            }
        }
        Err(error) => {
            tracing::error!(%error, "fatal error");
            EXIT_FATAL
        }
    };
    std::process::exit(code);
}

async fn run(args: Args, interrupted: Arc<AtomicBool>) -> anyhow::Result<()> {
    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("creating output dir {}", args.output_dir.display()))?;
    let store = Arc::new(
        Database::open(&args.output_dir.join("drafts.db")).context("opening draft database")?,
    );

    let config = PipelineConfig {
        rescan: args.rescan.is_some(),
        ..PipelineConfig::default()
    };
    let (mut pipeline, control) = Pipeline::new(config, Some(Arc::clone(&store)));

    // Bridge the typed bus onto the websocket fan-out.
    let author_uri = format!("http://{}:{}/routes", args.host, args.port);
    let router = Arc::new(EventRouter::new(author_uri));
    {
        let bus = pipeline.bus();
        let all_classes = EventClass::ALL.into_iter().collect();
        let (_id, mut rx) = bus.register(all_classes, 1024);
        let router = Arc::clone(&router);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                router.publish(&event);
            }
        });
    }

    let state = AppState::new(
        Arc::clone(&router),
        Some(Arc::clone(&store)),
        pipeline.status(),
        args.model.display().to_string(),
    );
    let host = args.host.clone();
    let port = args.port;
    tokio::spawn(async move {
        if let Err(error) = scrive_server::serve(state, &host, port).await {
            tracing::error!(%error, "server failed");
        }
    });

    if let Some(target) = &args.rescan {
        rescan::spawn_revision_publisher(pipeline.bus(), target.clone());
    }

    // Ctrl-C initiates an orderly shutdown; the pipeline drains and exits.
    {
        let control = control.clone();
        let interrupted = Arc::clone(&interrupted);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, shutting down");
                interrupted.store(true, Ordering::Relaxed);
                control.shutdown();
            }
        });
    }

    let source = build_source(&args);
    let factory = transcriber_factory(&args.model);
    pipeline
        .run(source, factory, CancellationToken::new())
        .await
        .context("pipeline failed")?;
    Ok(())
}
