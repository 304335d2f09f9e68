use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::Level;

use defectfuse::config::EngineConfig;
use defectfuse::core::cancel::CancelToken;
use defectfuse::core::identity::SystemIdentity;
use defectfuse::pipeline::{
    export_changes, export_fusion, load_candidates, run_changes, run_fusion, DetectionSet,
    SceneInput,
};
use defectfuse::telemetry::init_tracing;

#[derive(Parser, Debug)]
#[command(name = "defectfuse")]
#[command(version, about = "Visual/spectral defect fusion and temporal change detection", long_about = None)]
struct Cli {
    /// Engine configuration (TOML); built-in defaults when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit newline-delimited JSON logs
    #[arg(long, global = true)]
    json_logs: bool,

    /// Verbose logging (debug level) when RUST_LOG is unset
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fuse one scene's visual detections with its spectral evidence
    Fuse {
        /// Scene JSON (grids, visual detections, score maps, candidates)
        #[arg(long)]
        scene: PathBuf,

        /// Output directory (default: ./<scene_name>_fused)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Abort if fusion runs longer than this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Compare two detection sets from different times
    Changes {
        /// Earlier detections (fusion report or detection list)
        #[arg(long)]
        before: PathBuf,

        /// Later detections (fusion report or detection list)
        #[arg(long)]
        after: PathBuf,

        /// Candidates for corroboration (fusion report or candidate list)
        #[arg(long)]
        spectral: Option<PathBuf>,

        /// Overrides `change.iou_threshold`
        #[arg(long)]
        iou_threshold: Option<f64>,

        /// Output directory
        #[arg(short, long, default_value = "changes_output")]
        output: PathBuf,
    },

    /// Validate a configuration file and print the effective settings
    CheckConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    init_tracing(cli.json_logs, level);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Fuse {
            scene,
            output,
            timeout_secs,
        } => fuse_scene(&config, scene, output, timeout_secs),
        Commands::Changes {
            before,
            after,
            spectral,
            iou_threshold,
            output,
        } => compare(config, before, after, spectral, iou_threshold, output),
        Commands::CheckConfig => check_config(&config),
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path),
        None => Ok(EngineConfig::default()),
    }
}

fn fuse_scene(
    config: &EngineConfig,
    scene_path: PathBuf,
    output: Option<PathBuf>,
    timeout_secs: Option<u64>,
) -> Result<()> {
    if !scene_path.is_file() {
        anyhow::bail!("Scene file does not exist: {}", scene_path.display());
    }

    let output_dir = output.unwrap_or_else(|| {
        let stem = scene_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "scene".to_string());
        PathBuf::from(format!("{stem}_fused"))
    });

    println!("[*] Scene: {}", scene_path.display());
    println!("[*] Output: {}", output_dir.display());

    let scene = SceneInput::load(&scene_path)?;
    let cancel = match timeout_secs {
        Some(secs) => CancelToken::with_deadline(Instant::now() + Duration::from_secs(secs)),
        None => CancelToken::new(),
    };

    let run = run_fusion(scene, config, SystemIdentity, &cancel)
        .with_context(|| format!("Failed to fuse scene: {}", scene_path.display()))?;
    export_fusion(&run, &output_dir)
        .with_context(|| format!("Failed to export to: {}", output_dir.display()))?;

    let summary = &run.report.summary;
    println!(
        "[+] {} detection(s): {} fused, {} visual-only, {} spectral-only",
        summary.total, summary.fused, summary.visual_only, summary.spectral_only
    );
    println!("[✓] Done! Results saved to: {}", output_dir.display());
    Ok(())
}

fn compare(
    mut config: EngineConfig,
    before: PathBuf,
    after: PathBuf,
    spectral: Option<PathBuf>,
    iou_threshold: Option<f64>,
    output: PathBuf,
) -> Result<()> {
    if let Some(threshold) = iou_threshold {
        config.change.iou_threshold = threshold;
        config.validate().context("Invalid --iou-threshold")?;
    }

    let before_set = DetectionSet::load(&before)?.into_detections();
    let after_set = DetectionSet::load(&after)?.into_detections();
    let candidates = spectral.as_deref().map(load_candidates).transpose()?;

    println!(
        "[*] Comparing {} earlier and {} later detection(s)",
        before_set.len(),
        after_set.len()
    );

    let report = run_changes(
        before_set,
        after_set,
        candidates.as_deref(),
        &config,
        SystemIdentity,
    )?;
    export_changes(&report, &output)
        .with_context(|| format!("Failed to export to: {}", output.display()))?;

    let summary = &report.summary;
    println!(
        "[+] {} change(s): {} new damage, {} possible repair, {} infrastructure loss, {} deteriorated",
        summary.total,
        summary.new_damage,
        summary.possible_repair,
        summary.infrastructure_loss,
        summary.condition_deteriorated
    );
    if candidates.is_some() {
        println!("[+] {} corroborated by spectral candidates", summary.corroborated);
    }
    println!("[✓] Done! Results saved to: {}", output.display());
    Ok(())
}

fn check_config(config: &EngineConfig) -> Result<()> {
    config.validate()?;
    println!("[✓] Configuration is valid\n");
    print!("{}", config.to_toml_string()?);
    Ok(())
}
