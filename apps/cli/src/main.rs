use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::{Parser, ValueEnum};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use narezka_core::{
    CacheStore, NarezkaConfig, Phase, Pipeline, WhisperBackend, WhisperModel,
};

/// CLI wrapper for WhisperBackend (needed for clap ValueEnum)
#[derive(Clone, Default, ValueEnum)]
enum CliBackend {
    #[default]
    Standard,
    Quantized,
}

impl From<CliBackend> for WhisperBackend {
    fn from(cli: CliBackend) -> Self {
        match cli {
            CliBackend::Standard => WhisperBackend::Standard,
            CliBackend::Quantized => WhisperBackend::Quantized,
        }
    }
}

#[derive(Clone, ValueEnum)]
enum CliModel {
    Base,
    Small,
    Medium,
    Large,
    LargeV3,
}

impl From<CliModel> for WhisperModel {
    fn from(cli: CliModel) -> Self {
        match cli {
            CliModel::Base => WhisperModel::Base,
            CliModel::Small => WhisperModel::Small,
            CliModel::Medium => WhisperModel::Medium,
            CliModel::Large => WhisperModel::Large,
            CliModel::LargeV3 => WhisperModel::LargeV3,
        }
    }
}

#[derive(Parser)]
#[command(name = "narezka")]
#[command(about = "Turn long-form videos into AI-generated cut lists")]
struct Cli {
    /// Path to the video file
    video: Option<PathBuf>,

    /// Force re-processing even if cached artifacts exist
    #[arg(short, long)]
    force: bool,

    /// Remove cached artifacts for this video before processing
    #[arg(long)]
    clear_cache: bool,

    /// Wipe the entire artifact cache and exit
    #[arg(long)]
    clear_all_cache: bool,

    /// Local whisper implementation
    #[arg(short, long, default_value = "standard")]
    backend: CliBackend,

    /// Pin the whisper model size instead of picking it from video length
    #[arg(short, long)]
    model: Option<CliModel>,

    /// Transcription language hint (e.g. "en", "ru"); auto-detected when omitted
    #[arg(short, long)]
    lang: Option<String>,

    /// Free GPU memory in MB; omit to run CPU-only
    #[arg(long)]
    gpu_free_mb: Option<u64>,

    /// Print the cut list as JSON instead of readable text
    #[arg(long)]
    json: bool,
}

fn create_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{bar:30.cyan/dim} {percent:>3}% {msg}")
            .unwrap(),
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

extern "C" fn whisper_log_callback(
    _level: u32,
    _message: *const std::ffi::c_char,
    _user_data: *mut std::ffi::c_void,
) {
    // silent
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    unsafe {
        whisper_rs::set_log_callback(Some(whisper_log_callback), std::ptr::null_mut());
    }

    let config = NarezkaConfig {
        backend: cli.backend.clone().into(),
        preferred_model: cli.model.clone().map(Into::into),
        language: cli.lang.clone(),
        gpu_free_mb: cli.gpu_free_mb,
        ..NarezkaConfig::default()
    };

    if cli.clear_all_cache {
        let cache = CacheStore::open(&config.cache_dir)?;
        cache.clear_all();
        println!("{} Cache cleared", style("✓").green().bold());
        return Ok(());
    }

    let Some(video) = cli.video else {
        eprintln!("{} a video path is required", style("Error:").red().bold());
        std::process::exit(1);
    };
    if !video.exists() {
        eprintln!(
            "{} video file not found: {}",
            style("Error:").red().bold(),
            video.display()
        );
        std::process::exit(1);
    }

    println!(
        "\n{}  {}\n",
        style("narezka").cyan().bold(),
        style("AI Cut Generator").dim()
    );

    let pipeline = Arc::new(Pipeline::new(config)?);

    if cli.clear_cache {
        let key = CacheStore::video_key(&video);
        pipeline.cache().clear_video(&key);
        println!("{} Cleared cached artifacts for this video", style("✓").green().bold());
    }

    let started = Instant::now();
    let mut handle = pipeline.spawn(video.clone(), cli.force);

    let bar = create_progress_bar();
    loop {
        tokio::select! {
            update = handle.progress.recv() => {
                match update {
                    Some(update) => {
                        bar.set_position(update.percent as u64);
                        if update.phase == Phase::Complete {
                            bar.set_message("Complete".to_string());
                        } else {
                            bar.set_message(update.message);
                        }
                    }
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                handle.cancel();
                bar.abandon_with_message("Cancelling...".to_string());
            }
        }
    }

    match handle.done.await {
        Ok(Ok(document)) => {
            bar.finish_and_clear();
            println!(
                "{} {} cuts in {:.1}s\n",
                style("✓").green().bold(),
                document.cuts.len(),
                started.elapsed().as_secs_f64()
            );
            println!("{}", style("─".repeat(60)).dim());
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&document)?);
            } else {
                println!("{}", document.to_readable());
            }
            Ok(())
        }
        Ok(Err(e)) => {
            bar.finish_and_clear();
            eprintln!("{} {}", style("Error:").red().bold(), e);
            std::process::exit(1);
        }
        Err(_) => {
            // sender dropped without a result: the run was cancelled
            eprintln!("\n{} processing cancelled", style("✗").yellow().bold());
            std::process::exit(130);
        }
    }
}
