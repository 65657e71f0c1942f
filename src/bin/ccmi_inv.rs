use std::env;
use std::fs;
use std::process::ExitCode;
use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use ccmi_inventory::app::{App, ProgressSink, RunOptions, read_file_list};
use ccmi_inventory::config::{Config, ConfigLoader, ResolvedConfig};
use ccmi_inventory::domain::{ArchiveLayout, Protocol};
use ccmi_inventory::download::{FileFetcher, FtpFetcher, HttpAuth, HttpFetcher};
use ccmi_inventory::error::InventoryError;
use ccmi_inventory::ftp::{FtpCredentials, FtpLister, FtpSessionClient};
use ccmi_inventory::lister::{DirectoryLister, Retrying};
use ccmi_inventory::output::{JsonOutput, OutputMode, TextOutput};
use ccmi_inventory::store::Store;
use ccmi_inventory::thredds::{ThreddsHttpClient, ThreddsLister};

const TOKEN_ENV: &str = "CEDA_TOKEN";
const CERT_ENV: &str = "CEDA_CERT";
const FTP_PASSWORD_ENV: &str = "CEDA_FTP_PASSWORD";

#[derive(Parser)]
#[command(name = "ccmi-inv")]
#[command(about = "Inventory, search and download CCMI model output from the CEDA archive")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    /// Path to the JSON config (default: ./ccmi-inventory.json when present).
    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, global = true)]
    layout: Option<ArchiveLayout>,

    #[arg(long, global = true)]
    protocol: Option<Protocol>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Walk the archive and store an inventory snapshot")]
    Inventory(InventoryArgs),
    #[command(about = "List files matching the filter and write a search log")]
    Search(SearchArgs),
    #[command(about = "Download the files of a search log")]
    Download(DownloadArgs),
    #[command(about = "Inventory (or reuse one), search and download")]
    Run(RunArgs),
}

#[derive(Args, Clone, Default)]
struct FilterArgs {
    #[arg(long = "experiment")]
    experiments: Vec<String>,

    /// `<variable>_<table>`, e.g. `o3_AmonZ`.
    #[arg(long = "target")]
    targets: Vec<String>,
}

#[derive(Args, Clone, Default)]
struct DownloadTargetArgs {
    #[arg(long)]
    overwrite: bool,

    #[arg(long)]
    download_root: Option<String>,

    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct InventoryArgs {
    /// Number of levels to expand.
    #[arg(long)]
    depth: Option<usize>,
}

#[derive(Args)]
struct SearchArgs {
    #[command(flatten)]
    filter: FilterArgs,

    /// Snapshot to search instead of the live archive.
    #[arg(long)]
    inventory: Option<Utf8PathBuf>,

    /// Search the newest stored snapshot.
    #[arg(long, conflicts_with = "inventory")]
    latest: bool,
}

#[derive(Args)]
struct DownloadArgs {
    #[command(flatten)]
    target: DownloadTargetArgs,

    /// File list, one remote path per line (default: the latest search log).
    #[arg(long)]
    from: Option<Utf8PathBuf>,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    filter: FilterArgs,

    #[command(flatten)]
    target: DownloadTargetArgs,

    #[arg(long)]
    inventory: Option<Utf8PathBuf>,

    /// Reuse the newest stored snapshot instead of walking the archive again.
    #[arg(long, conflicts_with = "inventory")]
    reuse_latest: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<InventoryError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &InventoryError) -> u8 {
    match error {
        InventoryError::DownloadFailures { .. } => 4,
        InventoryError::RootListing { .. } | InventoryError::Http(_) | InventoryError::Ftp(_) => 3,
        InventoryError::MissingConfig
        | InventoryError::ConfigRead(_)
        | InventoryError::ConfigParse(_)
        | InventoryError::InvalidFilter(_)
        | InventoryError::InvalidLevel(_) => 2,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let mut config = ConfigLoader::load_or_default(cli.config.as_deref())?;
    if let Some(layout) = cli.layout {
        config.layout = Some(layout);
    }
    if let Some(protocol) = cli.protocol {
        config.protocol = Some(protocol);
    }

    match cli.command {
        Commands::Inventory(args) => {
            if args.depth.is_some() {
                config.inventory_depth = args.depth;
            }
            let app = build_app(ConfigLoader::resolve_config(config)?)?;
            run_inventory(&app, output_mode)
        }
        Commands::Search(args) => {
            apply_filter_args(&mut config, args.filter);
            let app = build_app(ConfigLoader::resolve_config(config)?)?;
            run_search(&app, args.inventory, args.latest, output_mode)
        }
        Commands::Download(args) => {
            apply_download_args(&mut config, &args.target);
            let app = build_app(ConfigLoader::resolve_config(config)?)?;
            run_download(&app, args.from, args.target.dry_run, output_mode)
        }
        Commands::Run(args) => {
            apply_filter_args(&mut config, args.filter);
            apply_download_args(&mut config, &args.target);
            let app = build_app(ConfigLoader::resolve_config(config)?)?;
            let options = RunOptions {
                inventory: args.inventory,
                reuse_latest: args.reuse_latest,
                dry_run: args.target.dry_run,
            };
            run_all(&app, options, output_mode)
        }
    }
}

fn apply_filter_args(config: &mut Config, args: FilterArgs) {
    if !args.experiments.is_empty() {
        config.experiments = args.experiments;
    }
    if !args.targets.is_empty() {
        config.targets = args.targets;
    }
}

fn apply_download_args(config: &mut Config, args: &DownloadTargetArgs) {
    if args.overwrite {
        config.overwrite_existing = Some(true);
    }
    if let Some(root) = &args.download_root {
        config.download_root = Some(root.clone());
    }
}

type CliApp = App<Box<dyn DirectoryLister>, Box<dyn FileFetcher>>;

fn build_app(config: ResolvedConfig) -> miette::Result<CliApp> {
    let store = match &config.state_dir {
        Some(dir) => Store::new_with_root(dir.clone()),
        None => Store::new()?,
    };
    store.ensure_root()?;

    let (lister, fetcher): (Box<dyn DirectoryLister>, Box<dyn FileFetcher>) = match config.protocol
    {
        Protocol::Thredds => {
            let catalog = ThreddsLister::new(ThreddsHttpClient::new()?, &config.root);
            let lister = Retrying::new(catalog, config.max_retries_per_listing)
                .with_delay(config.retry_delay);
            let fetcher = HttpFetcher::new(&config.download_base_url, http_auth()?)?;
            (Box::new(lister), Box::new(fetcher))
        }
        Protocol::Ftp => {
            let session = Arc::new(FtpSessionClient::new(FtpCredentials {
                host: config.ftp.host.clone(),
                user: config
                    .ftp
                    .user
                    .clone()
                    .unwrap_or_else(|| "anonymous".to_string()),
                password: env::var(FTP_PASSWORD_ENV).unwrap_or_default(),
            }));
            let lister = Retrying::new(
                FtpLister::new(Arc::clone(&session), &config.root),
                config.max_retries_per_listing,
            )
            .with_delay(config.retry_delay);
            (Box::new(lister), Box::new(FtpFetcher::new(session)))
        }
    };

    Ok(App::new(store, config, lister, fetcher))
}

fn http_auth() -> Result<HttpAuth, InventoryError> {
    let client_identity_pem = match env::var(CERT_ENV) {
        Ok(path) if !path.trim().is_empty() => Some(
            fs::read(path.trim())
                .map_err(|err| InventoryError::Http(format!("read {CERT_ENV} {path}: {err}")))?,
        ),
        _ => None,
    };
    Ok(HttpAuth {
        bearer_token: env::var(TOKEN_ENV).ok(),
        client_identity_pem,
    })
}

fn sink_for(output_mode: OutputMode) -> &'static dyn ProgressSink {
    match output_mode {
        OutputMode::Interactive => &TextOutput,
        OutputMode::NonInteractive => &JsonOutput,
    }
}

fn run_inventory(app: &CliApp, output_mode: OutputMode) -> miette::Result<()> {
    let (_tree, result) = app.inventory(sink_for(output_mode))?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_inventory(&result).into_diagnostic()?,
        OutputMode::Interactive => TextOutput::print_inventory(&result),
    }
    Ok(())
}

fn run_search(
    app: &CliApp,
    inventory: Option<Utf8PathBuf>,
    latest: bool,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let sink = sink_for(output_mode);
    let cached = if inventory.is_some() || latest {
        let loaded = app.load_inventory(inventory.as_deref(), sink)?;
        if loaded.is_none() {
            tracing::warn!("no stored inventory found; searching the live archive");
        }
        loaded.map(|(tree, _)| tree)
    } else {
        None
    };
    let result = app.search(cached.as_ref(), sink)?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_search(&result).into_diagnostic()?,
        OutputMode::Interactive => TextOutput::print_search(&result),
    }
    Ok(())
}

fn run_download(
    app: &CliApp,
    from: Option<Utf8PathBuf>,
    dry_run: bool,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let list_path = from.unwrap_or_else(|| {
        app.store()
            .latest_search_log_path(app.config().layout.label())
    });
    let files = read_file_list(&list_path)?;
    let result = app.download(&files, dry_run, sink_for(output_mode));
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_download(&result).into_diagnostic()?,
        OutputMode::Interactive => TextOutput::print_download(&result),
    }
    app.check_failures(&result)?;
    Ok(())
}

fn run_all(app: &CliApp, options: RunOptions, output_mode: OutputMode) -> miette::Result<()> {
    let result = app.run(options, sink_for(output_mode))?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_run(&result).into_diagnostic()?,
        OutputMode::Interactive => TextOutput::print_run(&result),
    }
    if let Some(download) = &result.download {
        app.check_failures(download)?;
    }
    Ok(())
}
