use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;

use clap::{Args, Parser, Subcommand};
use file_rotate::compression::Compression;
use file_rotate::suffix::AppendCount;
use file_rotate::{ContentLimit, FileRotate};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

use pmr_utils::app::{
    App, DeleteResult, InfoResult, ListResult, PopulateResult, PopulateStatus, ProgressSink,
    SyncResult,
};
use pmr_utils::client::{PmrClient, PmrHttpClient};
use pmr_utils::config::{AppConfig, ConfigLoader, ConfigOverrides, run_section_to_argv};
use pmr_utils::domain::{Selection, WorkspacePattern};
use pmr_utils::error::PmrError;
use pmr_utils::output::{JsonOutput, LogProgress};
use pmr_utils::store::Store;
use pmr_utils::vcs::{RepoCheckout, SystemGit};

#[derive(Parser)]
#[command(name = "pmr-utils")]
#[command(about = "Cache Physiome Model Repository workspace metadata and export it for OmicsDI")]
#[command(version, author)]
struct Cli {
    #[arg(short, long, global = true, help = "TOML config file with [global] and [run] tables")]
    config: Option<PathBuf>,

    #[arg(long, global = true, help = "PMR instance URL the cache is bound to")]
    pmr_instance: Option<String>,

    #[arg(long, global = true, help = "Cache folder")]
    cache_dir: Option<PathBuf>,

    #[arg(long, global = true)]
    log_level: Option<String>,

    #[arg(long, global = true, help = "Also write log output to this file, rotated at log_max_bytes keeping log_backup_count old files")]
    log_file: Option<PathBuf>,

    #[arg(long, global = true, help = "Shorthand for --log-level debug")]
    debug: bool,

    #[arg(long, global = true, help = "Print results as JSON")]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Fetch workspace metadata into the cache")]
    CacheWorkspace(CacheArgs),
    #[command(about = "Write the cached workspaces as an OmicsDI XML document")]
    OmicsdiExport(ExportArgs),
    #[command(about = "List cached workspaces")]
    List,
    #[command(about = "Show one cached workspace")]
    Info(HrefArgs),
    #[command(about = "Remove a workspace from the cache")]
    Delete(DeleteArgs),
    #[command(about = "Clone or update the repositories of cached workspaces")]
    SyncRepos(SyncArgs),
}

#[derive(Args)]
struct CacheArgs {
    #[arg(
        long,
        conflicts_with_all = &["workspace", "all"],
        required_unless_present_any = &["workspace", "all"],
        help = "Cache workspaces whose URL starts with a match of this regex"
    )]
    regex: Option<String>,

    #[arg(
        long,
        conflicts_with = "all",
        required_unless_present_any = &["regex", "all"],
        help = "Cache a single workspace URL"
    )]
    workspace: Option<String>,

    #[arg(
        long,
        required_unless_present_any = &["regex", "workspace"],
        help = "Cache every workspace listed by the instance"
    )]
    all: bool,

    #[arg(long, help = "Fetch again even when already cached")]
    force_refresh: bool,
}

#[derive(Args)]
struct ExportArgs {
    #[arg(short, long, help = "Output file (stdout when omitted)")]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct HrefArgs {
    href: String,
}

#[derive(Args)]
struct DeleteArgs {
    href: String,

    #[arg(long, help = "Also remove the workspace's repository folder")]
    delete_repo: bool,
}

#[derive(Args)]
struct SyncArgs {
    #[arg(long)]
    regex: Option<String>,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(pmr) = report.downcast_ref::<PmrError>() {
                return ExitCode::from(map_exit_code(pmr));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &PmrError) -> u8 {
    match error {
        PmrError::InstanceMismatch { .. } | PmrError::NotInitialised(_) => 1,
        PmrError::WorkspaceNotCached(_) => 2,
        PmrError::Http(_) | PmrError::Vcs(_) | PmrError::MissingTool(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<ExitCode> {
    let cli = replay_run_section(Cli::parse())?;

    let overrides = ConfigOverrides {
        pmr_instance: cli.pmr_instance.clone(),
        cache_dir: cli.cache_dir.clone(),
        log_level: if cli.debug {
            Some("debug".to_string())
        } else {
            cli.log_level.clone()
        },
        log_file: cli.log_file.clone(),
    };
    let config = ConfigLoader::resolve(cli.config.as_deref(), &overrides)?;
    init_logging(&config)?;
    tracing::debug!(config = ?config, "resolved configuration");

    let Some(command) = cli.command else {
        return Err(miette::Report::msg(
            "command required (try `pmr-utils --help`)",
        ));
    };

    let instance = config.instance()?;
    let store = Store::open_or_create(&config.cache_dir, &instance)?;
    tracing::info!("using {store}");

    let sink: &dyn ProgressSink = if cli.json { &JsonOutput } else { &LogProgress };

    match command {
        Commands::CacheWorkspace(args) => {
            let selection = Selection::from_flags(
                args.regex.as_deref(),
                args.workspace.as_deref(),
                args.all,
            )?;
            let client = PmrHttpClient::new()?;
            let app = App::new(store, client, NopGit);
            let result = app.populate(&selection, args.force_refresh, sink)?;
            if cli.json {
                JsonOutput::print_populate(&result).into_diagnostic()?;
            } else {
                print_populate_summary(&result);
            }
            if result.status == PopulateStatus::NoMatches {
                return Ok(ExitCode::from(2));
            }
        }
        Commands::OmicsdiExport(args) => {
            let app = App::new(store, NopClient, NopGit);
            let document = app.export(&config.submitter(), sink);
            write_export(&document, args.output.as_deref())?;
        }
        Commands::List => {
            let app = App::new(store, NopClient, NopGit);
            let result = app.list(sink);
            if cli.json {
                JsonOutput::print_list(&result).into_diagnostic()?;
            } else {
                print_list(&result);
            }
        }
        Commands::Info(args) => {
            let app = App::new(store, NopClient, NopGit);
            let result = app.info(&args.href)?;
            if cli.json {
                JsonOutput::print_info(&result).into_diagnostic()?;
            } else {
                print_info(&result).into_diagnostic()?;
            }
        }
        Commands::Delete(args) => {
            let app = App::new(store, NopClient, NopGit);
            let result = app.delete(&args.href, args.delete_repo, sink)?;
            if cli.json {
                JsonOutput::print_delete(&result).into_diagnostic()?;
            } else {
                print_delete(&result);
            }
        }
        Commands::SyncRepos(args) => {
            let pattern = args
                .regex
                .as_deref()
                .map(str::parse::<WorkspacePattern>)
                .transpose()?;
            let git = SystemGit::new();
            if !git.is_available() {
                return Err(PmrError::MissingTool("git".to_string()).into());
            }
            let app = App::new(store, NopClient, git);
            let result = app.sync_repos(pattern.as_ref(), sink);
            if cli.json {
                JsonOutput::print_sync(&result).into_diagnostic()?;
            } else {
                print_sync_summary(&result);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Re-parses the command line with the config file's `[run]` table appended
/// when no command was given.
fn replay_run_section(cli: Cli) -> miette::Result<Cli> {
    if cli.command.is_some() {
        return Ok(cli);
    }
    let Some(config_file) = cli.config.clone() else {
        return Ok(cli);
    };
    let Some(run) = ConfigLoader::run_section(&config_file)? else {
        return Ok(cli);
    };
    let replay = run_section_to_argv(&run);
    if replay.is_empty() {
        return Ok(cli);
    }
    let argv = std::env::args().chain(replay).collect::<Vec<_>>();
    Cli::try_parse_from(argv).into_diagnostic()
}

fn init_logging(config: &AppConfig) -> miette::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    match &config.log_file {
        Some(path) => {
            let file = rotating_log(path, config.log_max_bytes, config.log_backup_count)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(io::stderr.and(Mutex::new(file)))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(io::stderr)
                .init();
        }
    }
    Ok(())
}

/// Log file writer that moves `path` to `path.1` (shifting older files up)
/// once it reaches `max_bytes`, keeping at most `backups` old files.
fn rotating_log(
    path: &Path,
    max_bytes: u64,
    backups: usize,
) -> miette::Result<FileRotate<AppendCount>> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).into_diagnostic()?;
    }
    let limit = match usize::try_from(max_bytes) {
        Ok(bytes) if bytes > 0 => ContentLimit::Bytes(bytes),
        _ => ContentLimit::None,
    };
    Ok(FileRotate::new(
        path,
        AppendCount::new(backups),
        limit,
        Compression::None,
        #[cfg(unix)]
        None,
    ))
}

fn write_export(document: &str, output: Option<&Path>) -> miette::Result<()> {
    match output {
        Some(path) => {
            fs::write(path, document).into_diagnostic()?;
            tracing::info!(path = %path.display(), "OmicsDI export written");
        }
        None => {
            let mut stdout = io::stdout();
            stdout.write_all(document.as_bytes()).into_diagnostic()?;
        }
    }
    Ok(())
}

struct NopClient;

impl PmrClient for NopClient {
    fn fetch_json(&self, url: &str) -> Option<serde_json::Value> {
        tracing::debug!(url = %url, "network access not configured for this command");
        None
    }
}

struct NopGit;

impl RepoCheckout for NopGit {
    fn ensure_checked_out(&self, _url: &str, _path: &Path) -> Result<(), PmrError> {
        Err(PmrError::Vcs("git checkout not configured".to_string()))
    }
}

fn print_populate_summary(result: &PopulateResult) {
    let green = "\x1b[32m";
    let cyan = "\x1b[36m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    if result.status == PopulateStatus::NoMatches {
        println!("{red}no matching workspaces{reset}");
        return;
    }
    println!(
        "{cyan}PMR cache summary{reset}: {} fetched, {} already cached, {} failed",
        result.count("fetched"),
        result.count("cached"),
        result.count("failed")
    );
    for item in &result.items {
        let color = match item.action.as_str() {
            "fetched" => cyan,
            "cached" => green,
            _ => red,
        };
        match &item.error {
            Some(error) => println!("  {color}{:<8}{reset} {} ({error})", item.action, item.href),
            None => println!("  {color}{:<8}{reset} {}", item.action, item.href),
        }
    }
}

fn print_list(result: &ListResult) {
    println!("instance: {}", result.instance);
    for workspace in &result.workspaces {
        let cloned = if workspace.cloned { "cloned" } else { "-" };
        println!(
            "{}\t{}\t{}\t{}",
            workspace.id, workspace.title, cloned, workspace.href
        );
    }
    println!("{} workspaces", result.workspaces.len());
}

fn print_info(result: &InfoResult) -> Result<(), serde_json::Error> {
    let workspace = &result.workspace;
    println!("href:        {}", workspace.href);
    println!("id:          {}", workspace.id);
    println!("title:       {}", workspace.title);
    println!("owner:       {}", workspace.owner);
    println!("description: {}", workspace.description);
    println!("cached at:   {}", workspace.cached_at);
    match &result.repo_path {
        Some(path) => println!(
            "repository:  {path} ({})",
            if result.cloned { "cloned" } else { "not cloned" }
        ),
        None => println!("repository:  unavailable (id is not a folder name)"),
    }
    println!(
        "latest exposure:\n{}",
        serde_json::to_string_pretty(&workspace.latest_exposure)?
    );
    Ok(())
}

fn print_delete(result: &DeleteResult) {
    if result.deleted {
        println!("removed {}", result.href);
    } else {
        println!("{} was not cached", result.href);
    }
}

fn print_sync_summary(result: &SyncResult) {
    for item in &result.items {
        match &item.error {
            Some(error) => println!("{:<8} {} ({error})", item.action, item.href),
            None => println!("{:<8} {} -> {}", item.action, item.href, item.path),
        }
    }
    println!("{} repositories processed", result.items.len());
}
