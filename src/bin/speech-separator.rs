use clap::{Parser, Subcommand};
use speech_separation_core::{
    set_download_progress_callback, Backend, DirectorySink, Orchestrator, RequestOutcome,
    RequestState, SeparationService, Settings, StagingStrategy, SummaryRenderer, UploadedAsset,
};
use std::{fs, path::PathBuf, process, sync::Arc};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "speech-separator")]
#[command(about = "Separate overlapping speakers in a WAV recording", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML settings file
    #[arg(short, long, global = true, env = "SPEECH_SEP_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    backend: Option<Backend>,

    #[arg(long, global = true)]
    staging: Option<StagingStrategy>,

    #[arg(long, global = true)]
    model: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Separate {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Write the full render report as JSON
        #[arg(long)]
        report: Option<PathBuf>,

        #[arg(short, long)]
        quiet: bool,
    },

    /// Download and load the model once
    Prepare {
        #[arg(short, long)]
        quiet: bool,
    },

    /// Print the effective settings
    Config,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = load_settings(&cli).and_then(|settings| match cli.command {
        Commands::Separate {
            input,
            output,
            report,
            quiet,
        } => handle_separate(settings, input, output, report, quiet),
        Commands::Prepare { quiet } => handle_prepare(settings, quiet),
        Commands::Config => handle_config(&settings),
    });

    match result {
        Ok(()) => process::exit(0),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn load_settings(cli: &Cli) -> Result<Settings, Box<dyn std::error::Error>> {
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(backend) = cli.backend {
        settings.backend = backend;
    }
    if let Some(staging) = cli.staging {
        settings.staging = staging;
    }
    if let Some(model) = &cli.model {
        settings.model_id = model.clone();
    }
    settings.validate()?;
    Ok(settings)
}

fn handle_separate(
    settings: Settings,
    input: PathBuf,
    output: PathBuf,
    report: Option<PathBuf>,
    quiet: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if !input.exists() {
        return Err(format!("Input file not found: {}", input.display()).into());
    }

    let bytes = fs::read(&input)?;
    let name = input
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("upload.wav")
        .to_string();
    let mime = match input.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("wav") => "audio/wav",
        _ => "application/octet-stream",
    };
    let upload = UploadedAsset::new(name, mime, bytes);

    if !quiet {
        eprintln!("🎙️  Speech Separation");
        eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        eprintln!("File:   {}", upload.name);
        eprintln!("Size:   {} bytes", upload.size());
        eprintln!("Type:   {}", upload.mime_type);
        eprintln!("Model:  {}", settings.model_id);
        eprintln!("Output: {}", output.display());
        eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        eprintln!();
    }

    let settings = Arc::new(settings);
    let service = Arc::new(SeparationService::from_settings(Arc::clone(&settings))?);
    let mut orchestrator =
        Orchestrator::new(Arc::clone(&settings), service, Arc::new(SummaryRenderer::default()));
    if !quiet {
        orchestrator = orchestrator.with_observer(print_state);
    }

    let mut sink = DirectorySink::new(&output)?;
    let outcome = orchestrator.process(&upload, &mut sink);

    if let Some(path) = report {
        let file = fs::File::create(&path)?;
        serde_json::to_writer_pretty(file, &outcome)?;
    }

    if let RequestState::Failed { stage, kind, reason } = &outcome.state {
        return Err(format!("{kind} during {stage:?}: {reason}").into());
    }

    if quiet {
        for path in sink.written() {
            println!("{}", path.display());
        }
    } else {
        print_summary(&outcome, &sink);
    }

    Ok(())
}

fn print_state(state: &RequestState) {
    let line = match state {
        RequestState::Ingesting => "Reading audio file",
        RequestState::Separating => "Separating speech",
        RequestState::Rendering => "Analysing signals",
        RequestState::Offering => "Writing separated signals",
        _ => return,
    };
    eprintln!("⏳ {}", line);
}

fn print_summary(outcome: &RequestOutcome, sink: &DirectorySink) {
    eprintln!();
    eprintln!("✅ Speech separation complete!");
    eprintln!();

    let reports = outcome.original.iter().chain(outcome.separated.iter());
    for r in reports {
        eprintln!(
            "  {:<20} {:>8.2} s  peak {:.4}  ({} Hz, {} samples)",
            r.label, r.duration_secs, r.peak_amplitude, r.sample_rate, r.samples
        );
    }
    for failure in &outcome.render_failures {
        eprintln!("  ⚠️  {}: {}", failure.label, failure.reason);
    }

    eprintln!();
    eprintln!("Output files:");
    for path in sink.written() {
        eprintln!("  🔊 {}", path.display());
    }
}

fn handle_prepare(settings: Settings, quiet: bool) -> Result<(), Box<dyn std::error::Error>> {
    if !quiet {
        eprintln!("📦 Preparing model: {}", settings.model_id);
        eprintln!();

        set_download_progress_callback(|downloaded, total| {
            if total > 0 {
                let percent = (downloaded as f64 / total as f64 * 100.0).round() as u64;
                let downloaded_mb = downloaded as f64 / 1_000_000.0;
                let total_mb = total as f64 / 1_000_000.0;
                eprint!(
                    "\r📥 Downloading model: {:>3}% ({:.2} MB / {:.2} MB)",
                    percent, downloaded_mb, total_mb
                );
                if downloaded >= total {
                    eprintln!();
                }
            } else {
                eprint!("\r📥 Downloading model: {:.2} MB", downloaded as f64 / 1_000_000.0);
            }
        });
    }

    let service = SeparationService::from_settings(Arc::new(settings))?;
    service.warm_up()?;

    if !quiet {
        eprintln!("✅ Model prepared successfully!");
    }

    Ok(())
}

fn handle_config(settings: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    print!("{}", settings.to_toml_string()?);
    Ok(())
}
