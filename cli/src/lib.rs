use anyhow::{anyhow, Error, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use vtriples::config::CONFIG_FILE;
use vtriples::ingest::{self, Changeset};
use vtriples::{Controller, DiffStrategy, StoreConfig, StrategyConfig, StringTriple};

#[derive(Debug, Parser)]
#[command(name = "vtriples")]
#[command(about = "Versioned triple store")]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Verbose mode - sets the RUST_LOG level to info, defaults to warning level
    #[clap(long, short, action, default_value = "false", global = true)]
    verbose: bool,
    /// Debug mode - sets the RUST_LOG level to debug, defaults to warning level
    #[clap(long, action, default_value = "false", global = true)]
    debug: bool,
    /// Store directory; defaults to $VTRIPLES_DIR or the current directory
    #[clap(long, global = true)]
    store: Option<PathBuf>,
}

/// Triple pattern options shared by the query commands. Omitted components
/// are unbound.
#[derive(Debug, Clone, clap::Args)]
struct PatternArgs {
    /// Subject, in N-Triples form (e.g. `<http://example.org/s>`)
    #[clap(long, short = 's')]
    subject: Option<String>,
    /// Predicate, in N-Triples form
    #[clap(long, short = 'p')]
    predicate: Option<String>,
    /// Object, in N-Triples form
    #[clap(long, short = 'o')]
    object: Option<String>,
}

impl PatternArgs {
    fn pattern(&self) -> StringTriple {
        StringTriple::new(
            self.subject.clone().unwrap_or_default(),
            self.predicate.clone().unwrap_or_default(),
            self.object.clone().unwrap_or_default(),
        )
    }
}

/// Paging options shared by the query commands.
#[derive(Debug, Clone, clap::Args)]
struct PageArgs {
    /// Number of results to skip
    #[clap(long, default_value = "0")]
    offset: usize,
    /// Maximum number of results to print
    #[clap(long)]
    limit: Option<usize>,
    /// Print the number of results instead of the results
    #[clap(long, action, default_value = "false")]
    count: bool,
}

impl PageArgs {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(usize::MAX)
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DiffArg {
    Auto,
    Iterative,
    Direct,
}

impl From<DiffArg> for DiffStrategy {
    fn from(value: DiffArg) -> Self {
        match value {
            DiffArg::Auto => DiffStrategy::Auto,
            DiffArg::Iterative => DiffStrategy::Iterative,
            DiffArg::Direct => DiffStrategy::Direct,
        }
    }
}

#[derive(Debug, Subcommand)]
enum ConfigCommands {
    /// Set a configuration value.
    Set {
        /// The configuration key to set.
        key: String,
        /// The value to set for the key.
        value: String,
    },
    /// Get a configuration value.
    Get {
        /// The configuration key to get.
        key: String,
    },
    /// List all configuration values.
    List,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create a new store
    Init {
        /// Snapshot strategy: never, always, every[:N], size:R, time:R, change:T, aggregated:T, local:T
        #[clap(long, default_value = "never")]
        strategy: String,
        /// Number of patch trees kept in memory
        #[clap(long)]
        max_patch_trees: Option<usize>,
        /// Number of snapshots kept in memory
        #[clap(long)]
        max_snapshots: Option<usize>,
        /// Compress new snapshot files
        #[clap(long, action, default_value = "false")]
        zstd: bool,
        /// Replace the configuration of an existing store
        #[clap(long, action, default_value = "false")]
        overwrite: bool,
    },
    /// Prints the version of the vtriples binary
    Version,
    /// Commit a version from N-Triples files: `[+] added.nt ... - deleted.nt ...`
    Insert {
        /// Version id; defaults to one past the newest version
        #[clap(long)]
        id: Option<u64>,
        /// Ingest every numbered version directory under this path instead
        #[clap(long)]
        versions: Option<PathBuf>,
        /// Files, each group preceded by `+` (additions) or `-` (deletions)
        #[clap(trailing_var_arg = true, allow_hyphen_values = true)]
        files: Vec<String>,
    },
    /// Print the triples of one version
    Get {
        /// The version to materialize; defaults to the newest
        version: Option<u64>,
        #[command(flatten)]
        pattern: PatternArgs,
        #[command(flatten)]
        page: PageArgs,
    },
    /// Print the changes between two versions
    Delta {
        start: u64,
        end: u64,
        #[command(flatten)]
        pattern: PatternArgs,
        #[command(flatten)]
        page: PageArgs,
        /// How deltas across snapshots are computed
        #[clap(long, value_enum, default_value = "auto")]
        diff: DiffArg,
    },
    /// Print every matching triple with the versions containing it
    Versions {
        #[command(flatten)]
        pattern: PatternArgs,
        #[command(flatten)]
        page: PageArgs,
        /// Output JSON instead of text
        #[clap(long, action, default_value = "false")]
        json: bool,
    },
    /// Print per-version statistics
    Stats {
        /// Output JSON instead of text
        #[clap(long, action, default_value = "false")]
        json: bool,
    },
    /// Manage the store configuration.
    #[command(subcommand)]
    Config(ConfigCommands),
}

impl Commands {
    fn needs_write(&self) -> bool {
        matches!(self, Commands::Insert { .. })
    }
}

/// Store directory: `--store`, then `VTRIPLES_DIR`, then the current directory.
fn store_root(cli_store: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(store) = cli_store {
        return Ok(store);
    }
    if let Ok(dir) = std::env::var("VTRIPLES_DIR") {
        return Ok(PathBuf::from(dir));
    }
    Ok(std::env::current_dir()?)
}

fn require_store(root: &Path) -> Result<()> {
    if !root.join(CONFIG_FILE).exists() {
        return Err(anyhow!(
            "No store at {}. Use `vtriples init` to create one.",
            root.display()
        ));
    }
    Ok(())
}

fn handle_config_command(config_cmd: ConfigCommands, root: &Path) -> Result<()> {
    require_store(root)?;
    let config_path = root.join(CONFIG_FILE);
    let mut config = StoreConfig::load_or_default(root)?;

    match config_cmd {
        ConfigCommands::List => {
            config.print();
        }
        ConfigCommands::Get { key } => {
            let config_json = serde_json::to_value(&config)?;
            let object = config_json
                .as_object()
                .ok_or_else(|| anyhow!("Invalid config format: not a JSON object."))?;
            match object.get(&key) {
                Some(serde_json::Value::String(s)) => println!("{}", s),
                Some(value) if key == "strategy" => {
                    println!("{} ({})", config.strategy, value)
                }
                Some(value) => println!("{}", value),
                None => println!("Configuration key '{}' not set.", key),
            }
        }
        ConfigCommands::Set { key, value } => {
            let parse_usize = |v: &str| {
                v.parse::<usize>()
                    .map_err(|_| anyhow!("Invalid integer value for {}: {}", key, v))
            };
            match key.as_str() {
                "max_patch_trees" => config.max_patch_trees = parse_usize(&value)?,
                "max_snapshots" => config.max_snapshots = parse_usize(&value)?,
                "min_addition_count" => config.min_addition_count = parse_usize(&value)? as u64,
                "zstd" => {
                    config.zstd = value
                        .parse::<bool>()
                        .map_err(|_| anyhow!("Invalid boolean value for {}: {}", key, value))?
                }
                "strategy" => {
                    config.strategy = StrategyConfig::parse_short(&value).map_err(|e| anyhow!(e))?
                }
                _ => {
                    return Err(anyhow!(
                        "Setting configuration for '{}' is not supported.",
                        key
                    ));
                }
            }
            // reject values the store would refuse to open with
            StoreConfig::builder()
                .root(config.root.clone())
                .max_patch_trees(config.max_patch_trees)
                .max_snapshots(config.max_snapshots)
                .build()
                .map_err(|e| anyhow!("{e}"))?;
            config.save_to_file(&config_path)?;
            println!("Set {} to {}", key, value);
        }
    }
    Ok(())
}

fn init_store(
    root: &Path,
    strategy: &str,
    max_patch_trees: Option<usize>,
    max_snapshots: Option<usize>,
    zstd: bool,
    overwrite: bool,
) -> Result<()> {
    let config_path = root.join(CONFIG_FILE);
    if config_path.exists() && !overwrite {
        return Err(anyhow!(
            "A store already exists at {}. Use --overwrite to replace its configuration.",
            root.display()
        ));
    }
    let mut builder = StoreConfig::builder();
    builder
        .root(root.to_path_buf())
        .strategy(StrategyConfig::parse_short(strategy).map_err(|e| anyhow!(e))?)
        .zstd(zstd);
    if let Some(n) = max_patch_trees {
        builder.max_patch_trees(n);
    }
    if let Some(n) = max_snapshots {
        builder.max_snapshots(n);
    }
    let config = builder.build()?;
    std::fs::create_dir_all(root)?;
    config.save_to_file(&config_path)?;
    // opening once takes the lock and checks the directory is usable
    Controller::open(config.clone())?;
    println!("Initialized store at {}", root.display());
    if log::log_enabled!(log::Level::Info) {
        config.print();
    }
    Ok(())
}

fn insert(
    controller: &Controller,
    id: Option<u64>,
    versions: Option<PathBuf>,
    files: &[String],
) -> Result<()> {
    let reports = match versions {
        Some(dir) => ingest::ingest_versions(controller, &dir)?,
        None => {
            let changeset = Changeset::from_args(files)?;
            if changeset.is_empty() && id != Some(0) {
                return Err(anyhow!("No files given. Usage: insert [+] a.nt ... [- b.nt ...]"));
            }
            vec![ingest::insert(controller, id, &changeset)?]
        }
    };
    for report in reports {
        if !report.committed {
            return Err(anyhow!(
                "Version {} already records some of these changes; nothing was written.",
                report.patch_id
            ));
        }
        println!("Version {}", report.patch_id);
        println!("  Changes: {}", report.changes);
        println!("  Duration: {:.3}s", report.seconds);
    }
    Ok(())
}

pub fn run() -> Result<()> {
    init_logging();
    let cmd = Cli::parse();
    execute(cmd)
}

pub fn run_from_args<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    init_logging();
    let cmd = Cli::try_parse_from(args).map_err(Error::from)?;
    execute(cmd)
}

/// `VTRIPLES_LOG` overrides `RUST_LOG`.
fn init_logging() {
    if let Ok(log_level) = std::env::var("VTRIPLES_LOG") {
        std::env::set_var("RUST_LOG", log_level);
    }
}

fn execute(cmd: Cli) -> Result<()> {
    // CLI flags for verbosity take precedence. If nothing is set, we default to "warn".
    if cmd.debug {
        std::env::set_var("RUST_LOG", "debug");
    } else if cmd.verbose {
        std::env::set_var("RUST_LOG", "info");
    } else if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "warn");
    }
    let _ = env_logger::try_init();

    let root = store_root(cmd.store)?;
    info!("Store root: {}", root.display());

    let command = match cmd.command {
        Commands::Version => {
            println!("vtriples {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Commands::Init {
            strategy,
            max_patch_trees,
            max_snapshots,
            zstd,
            overwrite,
        } => {
            return init_store(&root, &strategy, max_patch_trees, max_snapshots, zstd, overwrite);
        }
        Commands::Config(config_cmd) => return handle_config_command(config_cmd, &root),
        command => command,
    };

    require_store(&root)?;
    let controller = Controller::open_path(&root, !command.needs_write())?;

    match command {
        Commands::Insert {
            id,
            versions,
            files,
        } => insert(&controller, id, versions, &files)?,
        Commands::Get {
            version,
            pattern,
            page,
        } => {
            let Some(version) = version.or(controller.get_max_patch_id()?) else {
                return Err(anyhow!("The store holds no versions yet."));
            };
            let pattern = pattern.pattern();
            if page.count {
                let (count, kind) = controller.get_version_materialized_count(&pattern, version)?;
                println!("{count} ({kind})");
            } else {
                let triples = controller
                    .get_version_materialized(&pattern, page.offset, version)?
                    .strings();
                for triple in triples.take(page.limit()) {
                    println!("{triple}");
                }
            }
        }
        Commands::Delta {
            start,
            end,
            pattern,
            page,
            diff,
        } => {
            let pattern = pattern.pattern();
            if page.count {
                let (count, kind) =
                    controller.get_delta_materialized_count(&pattern, start, end, diff.into())?;
                println!("{count} ({kind})");
            } else {
                let deltas = controller.get_delta_materialized(
                    &pattern,
                    page.offset,
                    start,
                    end,
                    diff.into(),
                )?;
                for delta in deltas.take(page.limit()) {
                    println!("{delta}");
                }
            }
        }
        Commands::Versions {
            pattern,
            page,
            json,
        } => {
            let pattern = pattern.pattern();
            if page.count {
                let (count, kind) = controller.get_version_count(&pattern)?;
                println!("{count} ({kind})");
            } else if json {
                let rows: Vec<serde_json::Value> = controller
                    .get_version(&pattern, page.offset)?
                    .take(page.limit())
                    .map(|tv| serde_json::json!({ "triple": tv.triple, "versions": tv.versions }))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                for tv in controller.get_version(&pattern, page.offset)?.take(page.limit()) {
                    println!("{tv}");
                }
            }
        }
        Commands::Stats { json } => {
            let Some(max) = controller.get_max_patch_id()? else {
                return Err(anyhow!("The store holds no versions yet."));
            };
            let rows = (0..=max)
                .map(|p| vtriples::stats::version_stats(&controller, p))
                .collect::<vtriples::Result<Vec<_>>>()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                println!("version,snapshot,triples,additions,deletions,change_ratio,growth_ratio");
                for row in rows {
                    println!(
                        "{},{},{},{},{},{:.4},{:.4}",
                        row.version,
                        row.snapshot,
                        row.triples,
                        row.additions,
                        row.deletions,
                        row.change_ratio,
                        row.growth_ratio
                    );
                }
            }
        }
        Commands::Version | Commands::Init { .. } | Commands::Config(_) => {}
    }
    Ok(())
}
