use std::{
    path::PathBuf,
    process::ExitCode,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use clap::Parser;
use eyre::{self, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

use env_tracing_logger::LogOutputs;

use gaze_overlay::{
    GazeOverlayConfig, MarkerMatching, Progress, RenderControl, Rgb, Valid, overlay_gaze_on_video,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Input screen recording.
    #[arg(short, long)]
    video: Option<PathBuf>,

    /// Gaze archive (directory or zip of CSV tables) exported from the
    /// tracker data file.
    #[arg(short, long)]
    edf: Option<PathBuf>,

    /// Output video. Defaults to `<video_stem>_gaze.<ext>`.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Fixation marker color as "R,G,B".
    #[arg(long)]
    color: Option<Rgb>,

    /// Ring radius in pixels of a 250 ms fixation.
    #[arg(long)]
    radius: Option<f32>,

    /// Eye to draw, "left" or "right".
    #[arg(long)]
    eye: Option<String>,

    /// Token of the sync messages. Defaults to the video file stem.
    #[arg(long)]
    session_token: Option<String>,

    /// Fail unless both sync messages contain the session token.
    #[arg(long)]
    strict_markers: bool,

    /// Also draw the interpolated gaze position.
    #[arg(long)]
    gaze_point: bool,

    /// Encode with the hardware encoder reported by ffmpeg, if any.
    #[arg(long)]
    hardware_encoder: bool,

    /// Configuration TOML file. Other arguments override its values.
    #[arg(long)]
    config_toml: Option<PathBuf>,

    /// Print an example configuration TOML and exit.
    #[arg(long)]
    print_example_config_toml: bool,

    /// Disable showing progress
    #[arg(short, long, default_value_t)]
    no_progress: bool,

    /// Also write log messages to this file.
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn path_string(p: PathBuf) -> Result<String> {
    p.into_os_string()
        .into_string()
        .map_err(|p| eyre::eyre!("path \"{}\" is not UTF8", p.to_string_lossy()))
}

fn load_config(cli: &Cli) -> Result<Valid<GazeOverlayConfig>> {
    let (cfg, cfg_dir) = if let Some(config_toml) = &cli.config_toml {
        // Get directory of configuration file. Works if config_toml is
        // relative or absolute.
        let abs_cfg_path = config_toml
            .canonicalize()
            .with_context(|| format!("Reading config file \"{}\"", config_toml.display()))?;
        let cfg_dir = abs_cfg_path.parent().map(|p| p.to_path_buf());
        let cfg_str = std::fs::read_to_string(config_toml)
            .with_context(|| format!("Reading config file \"{}\"", config_toml.display()))?;
        let cfg: GazeOverlayConfig = toml::from_str(&cfg_str).with_context(|| {
            format!(
                "Parse error reading config toml file at \"{}\"",
                config_toml.display()
            )
        })?;
        (cfg, cfg_dir)
    } else {
        let (Some(video), Some(edf)) = (&cli.video, &cli.edf) else {
            eyre::bail!("--video and --edf are required unless --config-toml is given.");
        };
        let cfg = GazeOverlayConfig {
            input_video: path_string(video.clone())?,
            input_gaze_data: path_string(edf.clone())?,
            ..Default::default()
        };
        (cfg, None)
    };

    let mut cfg = cfg;
    if cli.config_toml.is_some() {
        if let Some(video) = &cli.video {
            cfg.input_video = path_string(video.clone())?;
        }
        if let Some(edf) = &cli.edf {
            cfg.input_gaze_data = path_string(edf.clone())?;
        }
    }
    if let Some(output) = &cli.output {
        cfg.output = Some(path_string(output.clone())?);
    }
    if let Some(color) = cli.color {
        cfg.style.fixation_color = color;
        cfg.style.gaze_point_color = color;
    }
    if let Some(radius) = cli.radius {
        cfg.style.fixation_radius = radius;
    }
    if let Some(eye) = &cli.eye {
        cfg.eye = eye.clone();
    }
    if let Some(token) = &cli.session_token {
        cfg.session_token = Some(token.clone());
    }
    if cli.strict_markers {
        cfg.marker_matching = MarkerMatching::Strict;
    }
    if cli.gaze_point {
        cfg.style.show_gaze_point = true;
    }
    if cli.hardware_encoder {
        cfg.encoder = Some(ffmpeg_writer::platform_hardware_encoder()?);
    }

    cfg.validate(cfg_dir.as_deref()).with_context(|| {
        match &cli.config_toml {
            Some(p) => format!("Validation error with config toml file at \"{}\"", p.display()),
            None => "Validation error with command line arguments".to_string(),
        }
    })
}

fn render_blocking(
    cfg: Valid<GazeOverlayConfig>,
    cancel: Arc<AtomicBool>,
    show_progress: bool,
) -> Result<PathBuf> {
    let pb = if show_progress {
        // Custom progress bar with space at right end to prevent obscuring last
        // digit with cursor.
        let style = ProgressStyle::with_template("Overlaying gaze {wide_bar} {pos}/{len} ETA: {eta} ")?;
        Some(ProgressBar::new(0).with_style(style))
    } else {
        None
    };
    let mut on_progress = |p: Progress| {
        if let Some(pb) = &pb {
            pb.set_length(p.total_frames.max(p.frames_done) as u64);
            pb.set_position(p.frames_done as u64);
        }
    };
    let control = RenderControl {
        progress: Some(&mut on_progress),
        cancel: Some(&*cancel),
    };
    let result = overlay_gaze_on_video(&cfg, control);
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    Ok(result?)
}

async fn run(cli: Cli) -> Result<()> {
    if cli.print_example_config_toml {
        let default_buf = toml::to_string_pretty(&GazeOverlayConfig::default())?;
        println!("{}", default_buf);
        return Ok(());
    }

    let cfg = load_config(&cli)?;
    let cfg_as_string = toml::to_string_pretty(cfg.valid())?;
    tracing::info!(
        "Generating output using the following configuration:\n\n```\n{}```\n",
        cfg_as_string
    );

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, stopping after the current frame.");
                cancel.store(true, Ordering::SeqCst);
            }
        });
    }

    let show_progress = !cli.no_progress;
    let output =
        tokio::task::spawn_blocking(move || render_blocking(cfg, cancel, show_progress)).await??;
    tracing::info!("Saved \"{}\".", output.display());
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    let log_outputs = LogOutputs {
        file: cli.log_file.clone(),
        ..Default::default()
    };
    let _log_guard = match log_outputs.install() {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error initializing logging: {e}");
            return ExitCode::from(1);
        }
    };
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("Error: {e:?}");
            ExitCode::from(1)
        }
    }
}
