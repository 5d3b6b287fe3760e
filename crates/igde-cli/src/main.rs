use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use igde_core::SummaryUnitKind;
use igde_pipeline::{IgdePipeline, LoadOptions, PipelineConfig, PIPELINE_CONTRACT_VERSION};
use igde_store_sqlite::OverwritePolicy;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "cli.v1";
const LOG_ENV: &str = "IGDE_LOG";

#[derive(Debug, Parser)]
#[command(name = "igde")]
#[command(about = "Nevada iGDE database builder")]
struct Cli {
    #[arg(long, default_value = "./igde.yaml")]
    config: PathBuf,

    /// Destination database, overriding the config file.
    #[arg(long)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    Template {
        #[command(subcommand)]
        command: TemplateCommand,
    },
    Load(LoadArgs),
    Summarize(SummarizeArgs),
    StoryMap {
        #[command(subcommand)]
        command: StoryMapCommand,
    },
    Layer {
        #[command(subcommand)]
        command: LayerCommand,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
    IntegrityCheck,
    Backup(OutArgs),
    Export(OutArgs),
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct OutArgs {
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Args)]
struct OverwriteArgs {
    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

impl OverwriteArgs {
    fn policy(&self) -> OverwritePolicy {
        if self.overwrite {
            OverwritePolicy::Always
        } else {
            OverwritePolicy::Never
        }
    }
}

#[derive(Debug, Subcommand)]
enum TemplateCommand {
    Create(OverwriteArgs),
}

#[derive(Debug, Subcommand)]
enum StoryMapCommand {
    Publish(OverwriteArgs),
}

#[derive(Debug, Subcommand)]
enum LayerCommand {
    List,
    Show {
        #[arg(long)]
        name: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LayerArg {
    Sources,
    LakesPlayas,
    Rivers,
    Wetlands,
    Springs,
    Species,
    Phreatophytes,
}

#[derive(Debug, Args)]
struct LoadArgs {
    #[arg(value_enum)]
    layer: LayerArg,
    /// Append even when the same rows were already loaded.
    #[arg(long, default_value_t = false)]
    allow_duplicate: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum UnitArg {
    Hexagon,
    HydroBasin,
}

impl From<UnitArg> for SummaryUnitKind {
    fn from(value: UnitArg) -> Self {
        match value {
            UnitArg::Hexagon => Self::Hexagon,
            UnitArg::HydroBasin => Self::HydroBasin,
        }
    }
}

#[derive(Debug, Args)]
struct SummarizeArgs {
    #[arg(long, value_enum)]
    unit: UnitArg,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = PipelineConfig::load_or_default(&cli.config)
        .with_context(|| format!("failed to load config {}", cli.config.display()))?;
    if let Some(db) = &cli.db {
        config.database.clone_from(db);
        config.validate()?;
    }
    tracing::debug!(database = %config.database.display(), "resolved configuration");
    Ok(config)
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let pipeline = IgdePipeline::new(load_config(&cli)?);
    match cli.command {
        Command::Db { command } => run_db(command, &pipeline),
        Command::Template { command: TemplateCommand::Create(args) } => {
            let created = pipeline.create_template(args.policy())?;
            emit_json(serde_json::json!({
                "database": pipeline.config().database,
                "layers": created,
                "overwrite": args.overwrite
            }))
        }
        Command::Load(args) => run_load(&args, &pipeline),
        Command::Summarize(args) => {
            let summary = pipeline.summarize(args.unit.into())?;
            emit_json(serde_json::to_value(&summary).context("failed to serialize summary result")?)
        }
        Command::StoryMap { command: StoryMapCommand::Publish(args) } => {
            let published = pipeline.publish_story_map(args.policy())?;
            let value =
                serde_json::to_value(&published).context("failed to serialize publish summary")?;
            emit_json(value)
        }
        Command::Layer { command } => run_layer(command, &pipeline),
    }
}

fn run_db(command: DbCommand, pipeline: &IgdePipeline) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = pipeline.schema_status()?;
            emit_json(serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty(),
                "pipeline_contract_version": PIPELINE_CONTRACT_VERSION
            }))
        }
        DbCommand::Migrate(args) => {
            let result = pipeline.migrate(args.dry_run)?;
            emit_json(serde_json::to_value(&result).context("failed to serialize migrate result")?)
        }
        DbCommand::IntegrityCheck => {
            let report = pipeline.integrity_check()?;
            let healthy = report.is_healthy();
            let mut value =
                serde_json::to_value(&report).context("failed to serialize integrity report")?;
            if let Value::Object(object) = &mut value {
                object.insert("healthy".to_string(), Value::Bool(healthy));
            }
            emit_json(value)
        }
        DbCommand::Backup(args) => {
            pipeline.backup(&args.out)?;
            emit_json(serde_json::json!({
                "backup_path": args.out,
                "status": "ok"
            }))
        }
        DbCommand::Export(args) => {
            let manifest = pipeline.export(&args.out)?;
            let value =
                serde_json::to_value(&manifest).context("failed to serialize export manifest")?;
            emit_json(value)
        }
    }
}

fn run_load(args: &LoadArgs, pipeline: &IgdePipeline) -> Result<()> {
    let options = LoadOptions { allow_duplicate: args.allow_duplicate };
    let report = match args.layer {
        LayerArg::Sources => pipeline.load_sources(options),
        LayerArg::LakesPlayas => pipeline.load_lakes_playas(options),
        LayerArg::Rivers => pipeline.load_rivers(options),
        LayerArg::Wetlands => pipeline.load_wetlands(options),
        LayerArg::Springs => pipeline.load_springs(options),
        LayerArg::Species => pipeline.load_species(options),
        LayerArg::Phreatophytes => pipeline.load_phreatophytes(options),
    }?;
    let rows_appended = report.rows_appended();
    let mut value = serde_json::to_value(&report).context("failed to serialize pass report")?;
    if let Value::Object(object) = &mut value {
        object.insert("rows_appended".to_string(), Value::from(rows_appended));
    }
    emit_json(value)
}

fn run_layer(command: LayerCommand, pipeline: &IgdePipeline) -> Result<()> {
    match command {
        LayerCommand::List => {
            let layers = pipeline.list_layers()?;
            emit_json(serde_json::json!({ "layers": layers }))
        }
        LayerCommand::Show { name } => {
            let template = pipeline
                .layer_template(&name)?
                .ok_or_else(|| anyhow!("layer {name} does not exist"))?;
            let value =
                serde_json::to_value(&template).context("failed to serialize layer template")?;
            emit_json(value)
        }
    }
}
