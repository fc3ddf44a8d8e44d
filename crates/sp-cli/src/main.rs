//! shapeprod CLI

mod analysis;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use analysis::{AnalysisConfig, BuildOptions, read_analysis_config};
use sp_engine::{Era, Producer, SourceCache, build_file_list};

#[derive(Parser)]
#[command(name = "shapeprod")]
#[command(about = "shapeprod - Shape production for binned likelihood analyses")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct PlanArgs {
    /// Analysis configuration (YAML, or JSON by extension)
    #[arg(short, long)]
    config: PathBuf,

    /// Channels to process (default: all configured channels)
    #[arg(long, num_args = 1..)]
    channels: Vec<String>,

    /// Produce control plots instead of analysis categories
    #[arg(long)]
    control: bool,

    /// Register nominal shapes only
    #[arg(long)]
    skip_systematic_variations: bool,

    /// Directory relative input files are resolved against
    #[arg(long)]
    base_dir: Option<PathBuf>,
}

impl PlanArgs {
    fn options(&self) -> BuildOptions {
        BuildOptions {
            channels: self.channels.clone(),
            control: self.control,
            skip_systematic_variations: self.skip_systematic_variations,
            base_dir: self.base_dir.clone(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Produce all shapes of an analysis into one JSON shape file
    Produce {
        #[command(flatten)]
        plan: PlanArgs,

        /// Threads (0 = auto). Overrides the config.
        #[arg(long)]
        threads: Option<usize>,

        /// Output tag (`{tag}_shapes.json`). Overrides the config.
        #[arg(long)]
        tag: Option<String>,

        /// Output shape file. Defaults to `{tag}_shapes.json`.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List the shape keys a run would produce, without producing
    Plan {
        #[command(flatten)]
        plan: PlanArgs,

        /// Output file (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write input files and folders per estimation for one channel
    Filelist {
        /// Analysis configuration (YAML, or JSON by extension)
        #[arg(short, long)]
        config: PathBuf,

        /// Channel
        #[arg(long)]
        channel: String,

        /// Directory relative input files are resolved against
        #[arg(long)]
        base_dir: Option<PathBuf>,

        /// Output file (YAML). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print version
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.log_level).with_target(false).with_writer(std::io::stderr).init();

    match cli.command {
        Commands::Produce { plan, threads, tag, output } => cmd_produce(&plan, threads, tag, output),
        Commands::Plan { plan, output } => cmd_plan(&plan, output.as_ref()),
        Commands::Filelist { config, channel, base_dir, output } => {
            cmd_filelist(&config, &channel, base_dir.as_deref(), output.as_ref())
        }
        Commands::Version => {
            println!("shapeprod {}", sp_core::VERSION);
            Ok(())
        }
    }
}

fn load(config: &Path) -> Result<AnalysisConfig> {
    let cfg = read_analysis_config(config)?;
    tracing::info!(config = %config.display(), era = %cfg.era, analysis = %cfg.analysis, "loaded analysis");
    Ok(cfg)
}

fn cmd_produce(args: &PlanArgs, threads: Option<usize>, tag: Option<String>, output: Option<PathBuf>) -> Result<()> {
    let mut cfg = load(&args.config)?;
    if let Some(tag) = tag {
        cfg.tag = tag;
    }
    let output = output.unwrap_or_else(|| cfg.default_output());
    let plan = cfg.plan(&args.options())?;
    let registry = plan.registry.seal();

    let summary = Producer::new(&output).num_threads(threads.unwrap_or(cfg.threads)).produce(&registry)?;
    write_json(None, serde_json::to_value(&summary)?)
}

fn cmd_plan(args: &PlanArgs, output: Option<&PathBuf>) -> Result<()> {
    let cfg = load(&args.config)?;
    let registry = cfg.plan(&args.options())?.registry.seal();
    let keys: Vec<String> = registry.keys().map(|k| k.to_string()).collect();
    write_json(
        output,
        serde_json::json!({
            "n_requests": registry.len(),
            "keys": keys,
        }),
    )
}

fn cmd_filelist(config: &Path, channel: &str, base_dir: Option<&Path>, output: Option<&PathBuf>) -> Result<()> {
    let cfg = load(config)?;
    let era = Arc::new(Era::from_name(&cfg.era)?);
    let processes = cfg.process_map(channel, &era, &Arc::new(SourceCache::new()), base_dir)?;
    let list = build_file_list(&processes)?;
    let yaml = serde_yaml_ng::to_string(&list)?;
    if let Some(path) = output {
        std::fs::write(path, yaml)?;
    } else {
        print!("{}", yaml);
    }
    Ok(())
}

fn write_json(output: Option<&PathBuf>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}
