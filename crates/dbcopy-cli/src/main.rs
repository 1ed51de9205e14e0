//! dbcopy - copy models between model stores and text files
//!
//! ## Commands
//!
//! - `export`: model store to a directory of JSON and CSV files, optionally zipped
//! - `import`: directory or zip archive to a model store
//! - `copy`: model store to model store
//!
//! Without an entity flag the whole model is copied. `--run*`, `--set` and
//! `--task` narrow the copy to one entity.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Args, Parser, Subcommand};
use tracing::{info, Level};

use dbcopy_core::{
    CodecConfig, CopyAborted, CopyOptions, CopyReport, DbSink, DbSource, EntitySink,
    ModelSelector, PortableSource, RunSelector, TextRepo,
};
use model_store::{StoreConfig, SurrealModelStore};

#[derive(Parser)]
#[command(name = "dbcopy")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Copy models, runs, worksets and tasks between model stores and text files", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines and a JSON report
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export from a model store into text files
    Export {
        /// Source store URL (default: DBCOPY_DB_URL)
        #[arg(long)]
        db: Option<String>,

        /// Output directory
        #[arg(long, default_value = ".")]
        dir: PathBuf,

        /// Also pack the output directory into this zip archive
        #[arg(long)]
        zip: Option<PathBuf>,

        #[command(flatten)]
        select: Select,

        #[command(flatten)]
        format: Format,
    },

    /// Import text files into a model store
    #[command(group(ArgGroup::new("input").required(true).args(["dir", "zip"])))]
    Import {
        /// Destination store URL (default: DBCOPY_DB_URL)
        #[arg(long)]
        to_db: Option<String>,

        /// Input directory
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Input zip archive
        #[arg(long)]
        zip: Option<PathBuf>,

        #[command(flatten)]
        select: Select,

        #[command(flatten)]
        format: Format,
    },

    /// Copy from one model store into another
    Copy {
        /// Source store URL (default: DBCOPY_DB_URL)
        #[arg(long)]
        db: Option<String>,

        /// Destination store URL
        #[arg(long)]
        to_db: String,

        #[command(flatten)]
        select: Select,

        #[command(flatten)]
        format: Format,
    },
}

/// Which model, and optionally which single entity, to copy.
#[derive(Args, Debug, Clone)]
#[command(group(ArgGroup::new("entity").multiple(false).args(["run", "run_digest", "run_first", "run_last", "set", "task"])))]
struct Select {
    /// Model name
    #[arg(short, long)]
    model: Option<String>,

    /// Model digest
    #[arg(long)]
    model_digest: Option<String>,

    /// Copy only the run with this name
    #[arg(long)]
    run: Option<String>,

    /// Copy only the run with this digest
    #[arg(long)]
    run_digest: Option<String>,

    /// Copy only the first run of the model
    #[arg(long)]
    run_first: bool,

    /// Copy only the last run of the model
    #[arg(long)]
    run_last: bool,

    /// Copy only this read-only workset
    #[arg(long)]
    set: Option<String>,

    /// Copy only this task, with the runs and worksets it references
    #[arg(long)]
    task: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum Target {
    Model,
    Run(RunSelector),
    Workset(String),
    Task(String),
}

impl Select {
    fn model_selector(&self) -> Result<ModelSelector> {
        if self.model.is_none() && self.model_digest.is_none() {
            bail!("either --model or --model-digest is required");
        }
        Ok(ModelSelector {
            name: self.model.clone(),
            digest: self.model_digest.clone(),
        })
    }

    fn target(&self) -> Target {
        if let Some(name) = &self.run {
            Target::Run(RunSelector::Name(name.clone()))
        } else if let Some(digest) = &self.run_digest {
            Target::Run(RunSelector::Digest(digest.clone()))
        } else if self.run_first {
            Target::Run(RunSelector::First)
        } else if self.run_last {
            Target::Run(RunSelector::Last)
        } else if let Some(name) = &self.set {
            Target::Workset(name.clone())
        } else if let Some(name) = &self.task {
            Target::Task(name.clone())
        } else {
            Target::Model
        }
    }
}

/// How values are written to and read from CSV.
#[derive(Args, Debug, Clone)]
struct Format {
    /// printf-style format of double values, e.g. %.15g (default: shortest round-trip)
    #[arg(long, default_value = "")]
    double_format: String,

    /// Encoding of input CSV files, e.g. windows-1252 (default: UTF-8)
    #[arg(long)]
    encoding: Option<String>,

    /// Write dimension items and keys as numeric ids
    #[arg(long)]
    id_csv: bool,

    /// Start CSV output with a UTF-8 byte-order mark
    #[arg(long)]
    utf8_bom: bool,

    /// Skip output table accumulators
    #[arg(long)]
    no_accumulators: bool,

    /// Skip microdata
    #[arg(long)]
    no_microdata: bool,

    /// Seconds between progress log lines
    #[arg(long, default_value_t = 5)]
    progress_secs: u64,
}

impl Format {
    fn options(&self) -> Result<CopyOptions> {
        let mut codec = CodecConfig::new()
            .with_double_format(&self.double_format)
            .context("Invalid --double-format")?
            .with_id_csv(self.id_csv)
            .with_utf8_bom(self.utf8_bom);
        if let Some(label) = &self.encoding {
            codec = codec.with_encoding(label).context("Invalid --encoding")?;
        }
        if self.no_accumulators {
            codec = codec.without_accumulators();
        }
        if self.no_microdata {
            codec = codec.without_microdata();
        }
        Ok(CopyOptions::new(codec).with_progress_interval(Duration::from_secs(self.progress_secs)))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    dbcopy_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Export {
            db,
            dir,
            zip,
            select,
            format,
        } => cmd_export(db.as_deref(), &dir, zip.as_deref(), &select, &format, cli.json).await,
        Commands::Import {
            to_db,
            dir,
            zip,
            select,
            format,
        } => {
            cmd_import(
                to_db.as_deref(),
                dir.as_deref(),
                zip.as_deref(),
                &select,
                &format,
                cli.json,
            )
            .await
        }
        Commands::Copy {
            db,
            to_db,
            select,
            format,
        } => cmd_copy(db.as_deref(), &to_db, &select, &format, cli.json).await,
    }
}

async fn open_store(url: Option<&str>) -> Result<SurrealModelStore> {
    let config = match url {
        Some(url) => StoreConfig::new(url),
        None => StoreConfig::from_env().map_err(anyhow::Error::msg)?,
    };
    SurrealModelStore::open(&config)
        .await
        .with_context(|| format!("Failed to open model store {}", config.endpoint))
}

/// Export a model, or one of its entities, into a text directory
async fn cmd_export(
    db: Option<&str>,
    dir: &Path,
    zip: Option<&Path>,
    select: &Select,
    format: &Format,
    json: bool,
) -> Result<()> {
    let opts = format.options()?;
    let store = open_store(db).await?;
    let repo = TextRepo::new(dir, opts.codec.clone());

    info!("Exporting into {:?}", dir);
    run_copy(&DbSource::new(&store), &repo, select, &opts, json).await?;

    if let Some(zip) = zip {
        let count = dbcopy_core::pack_dir(dir, zip)
            .with_context(|| format!("Failed to pack {:?}", dir))?;
        println!("Packed {} files into {:?}", count, zip);
    }
    Ok(())
}

/// Import a text directory or zip archive into a model store
async fn cmd_import(
    to_db: Option<&str>,
    dir: Option<&Path>,
    zip: Option<&Path>,
    select: &Select,
    format: &Format,
    json: bool,
) -> Result<()> {
    let opts = format.options()?;

    // held until the import is done
    let mut scratch = None;
    let root = match (dir, zip) {
        (Some(dir), None) => dir.to_path_buf(),
        (None, Some(zip)) => {
            let tmp = tempfile::tempdir().context("Failed to create unpack directory")?;
            let count = dbcopy_core::unpack(zip, tmp.path())
                .with_context(|| format!("Failed to unpack {:?}", zip))?;
            info!("Unpacked {} files from {:?}", count, zip);
            let root = tmp.path().to_path_buf();
            scratch = Some(tmp);
            root
        }
        _ => bail!("exactly one of --dir or --zip is required"),
    };

    let store = open_store(to_db).await?;
    let repo = TextRepo::new(root, opts.codec.clone());
    let result = run_copy(&repo, &DbSink::new(&store), select, &opts, json).await;
    drop(scratch);
    result
}

/// Copy between two model stores
async fn cmd_copy(
    db: Option<&str>,
    to_db: &str,
    select: &Select,
    format: &Format,
    json: bool,
) -> Result<()> {
    let opts = format.options()?;
    let source = open_store(db).await?;
    let dest = open_store(Some(to_db)).await?;
    run_copy(&DbSource::new(&source), &DbSink::new(&dest), select, &opts, json).await
}

async fn run_copy(
    source: &dyn PortableSource,
    sink: &dyn EntitySink,
    select: &Select,
    opts: &CopyOptions,
    json: bool,
) -> Result<()> {
    let model = select.model_selector()?;
    let result = match select.target() {
        Target::Model => dbcopy_core::copy_model(source, sink, &model, opts).await,
        Target::Run(run) => dbcopy_core::copy_run(source, sink, &model, &run, opts).await,
        Target::Workset(name) => {
            dbcopy_core::copy_workset(source, sink, &model, &name, opts).await
        }
        Target::Task(name) => dbcopy_core::copy_task(source, sink, &model, &name, opts).await,
    };

    match result {
        Ok(report) => print_report(&report, json),
        Err(CopyAborted {
            stage,
            report,
            error,
        }) => {
            print_report(&report, json)?;
            Err(anyhow::Error::new(error).context(format!("Copy aborted during {}", stage)))
        }
    }
}

fn print_report(report: &CopyReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    print!("{}", render_report(report));
    Ok(())
}

fn render_report(report: &CopyReport) -> String {
    let mut out = String::new();
    if let Some(model) = &report.model {
        out.push_str(&format!("model {}: {}\n", model.name, model.placement));
    }
    let groups = [
        ("run", &report.runs),
        ("workset", &report.worksets),
        ("task", &report.tasks),
    ];
    for (kind, outcomes) in groups {
        for outcome in outcomes {
            match outcome.dest_id {
                Some(id) => out.push_str(&format!(
                    "{} {}: {} (id {})\n",
                    kind, outcome.name, outcome.placement, id
                )),
                None => out.push_str(&format!("{} {}: {}\n", kind, outcome.name, outcome.placement)),
            }
        }
    }
    for warning in &report.warnings {
        out.push_str(&format!("warning: {}\n", warning));
    }
    out.push_str(&format!(
        "{} runs, {} worksets, {} tasks, {} warnings ({})\n",
        report.runs.len(),
        report.worksets.len(),
        report.tasks.len(),
        report.warnings.len(),
        report.stage
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("dbcopy").chain(args.iter().copied()))
    }

    fn select_of(cli: Cli) -> Select {
        match cli.command {
            Commands::Export { select, .. }
            | Commands::Import { select, .. }
            | Commands::Copy { select, .. } => select,
        }
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_export_defaults_to_whole_model() {
        let cli = parse(&["export", "--model", "M1"]).unwrap();
        let select = select_of(cli);
        assert_eq!(select.target(), Target::Model);
        assert_eq!(
            select.model_selector().unwrap(),
            ModelSelector::by_name("M1")
        );
    }

    #[test]
    fn test_entity_flags_map_to_targets() {
        let cases: [(&[&str], Target); 6] = [
            (&["--run", "R1"], Target::Run(RunSelector::Name("R1".into()))),
            (&["--run-digest", "rA"], Target::Run(RunSelector::Digest("rA".into()))),
            (&["--run-first"], Target::Run(RunSelector::First)),
            (&["--run-last"], Target::Run(RunSelector::Last)),
            (&["--set", "W1"], Target::Workset("W1".into())),
            (&["--task", "T1"], Target::Task("T1".into())),
        ];
        for (flags, expected) in cases {
            let mut args = vec!["copy", "--to-db", "mem://", "--model-digest", "d1"];
            args.extend_from_slice(flags);
            let select = select_of(parse(&args).unwrap());
            assert_eq!(select.target(), expected, "{flags:?}");
        }
    }

    #[test]
    fn test_entity_flags_are_exclusive() {
        assert!(parse(&["export", "--model", "M1", "--run", "R1", "--set", "W1"]).is_err());
    }

    #[test]
    fn test_import_needs_one_input() {
        assert!(parse(&["import", "--model", "M1"]).is_err());
        assert!(parse(&["import", "--model", "M1", "--dir", "a", "--zip", "b.zip"]).is_err());
        assert!(parse(&["import", "--model", "M1", "--zip", "b.zip"]).is_ok());
    }

    #[test]
    fn test_model_selector_required() {
        let select = select_of(parse(&["export", "--run-first"]).unwrap());
        assert!(select.model_selector().is_err());
    }

    #[test]
    fn test_format_flags_build_options() {
        let cli = parse(&[
            "export",
            "--model",
            "M1",
            "--double-format",
            "%.8g",
            "--encoding",
            "windows-1252",
            "--id-csv",
            "--no-microdata",
            "--progress-secs",
            "30",
        ])
        .unwrap();
        let Commands::Export { format, .. } = cli.command else {
            panic!("expected export");
        };
        let opts = format.options().unwrap();
        assert!(opts.codec.id_csv);
        assert!(opts.codec.no_microdata);
        assert!(!opts.codec.no_accumulators);
        assert_eq!(opts.codec.encoding.map(|e| e.name()), Some("windows-1252"));
        assert_eq!(opts.progress_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_bad_double_format_is_rejected() {
        let cli = parse(&["export", "--model", "M1", "--double-format", "%s"]).unwrap();
        let Commands::Export { format, .. } = cli.command else {
            panic!("expected export");
        };
        assert!(format.options().is_err());
    }

    // ------------------------------------------------------------------
    // End to end against in-memory stores
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_export_of_unknown_model_fails() {
        let store = SurrealModelStore::in_memory().await.expect("store");
        let dir = tempfile::tempdir().unwrap();
        let repo = TextRepo::new(dir.path(), CodecConfig::default());
        let select = select_of(parse(&["export", "--model", "nope"]).unwrap());

        let err = run_copy(
            &DbSource::new(&store),
            &repo,
            &select,
            &CopyOptions::default(),
            false,
        )
        .await
        .expect_err("unknown model");
        assert!(format!("{err:#}").contains("Copy aborted during init"));
    }
}
