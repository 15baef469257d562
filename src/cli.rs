use anyhow::{bail, Context, Result};
use linkdeploy::{
    config::AppConfig,
    driver::{DeployEvent, DeploySummary, Deployer, EntryReport, Phase},
    host::Host,
    instance::{InstanceHost, InstanceOptions},
    link::Outcome,
    logging,
    state::{state_file_for, StateStore},
    walker::VirtualTreeWalker,
    DeployConfig,
};
use serde::Serialize;
use std::{path::PathBuf, sync::Arc};

#[derive(Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "json" => Some(OutputFormat::Json),
            "text" => Some(OutputFormat::Text),
            _ => None,
        }
    }
}

#[derive(Default)]
struct GlobalOptions {
    format: Option<OutputFormat>,
    instance: Option<PathBuf>,
    profile: Option<String>,
    game: Option<PathBuf>,
    data_dir_name: Option<String>,
    symlink: Option<bool>,
    redirect_root: bool,
    prune_stale: bool,
    workers: Option<usize>,
    accept_risk: bool,
    verbose: bool,
}

impl GlobalOptions {
    fn format(&self) -> OutputFormat {
        self.format.unwrap_or(OutputFormat::Text)
    }
}

enum CliCommand {
    List,
    Deploy,
    State,
    Paths,
    Help,
    Version,
}

pub fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (global, tokens) = parse_global_options(&args)?;
    let command = parse_command(&tokens)?;
    match command {
        CliCommand::Help => {
            print_help();
            Ok(())
        }
        CliCommand::Version => {
            println!("linkdeploy v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        command => {
            let mut config = AppConfig::load_or_create()?;
            let _guard = logging::init_logging(&config.log_dir(), global.verbose);
            run_command(&mut config, command, &global)
        }
    }
}

fn parse_global_options(args: &[String]) -> Result<(GlobalOptions, Vec<String>)> {
    let mut options = GlobalOptions::default();
    let mut tokens = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => (flag, Some(value.to_string())),
            _ => (arg.as_str(), None),
        };
        let mut value = |name: &str| -> Result<String> {
            match inline.clone().or_else(|| iter.next().cloned()) {
                Some(value) => Ok(value),
                None => bail!("{name} requires a value"),
            }
        };
        match flag {
            "--format" => {
                let raw = value("--format")?;
                options.format = Some(
                    OutputFormat::parse(&raw)
                        .with_context(|| format!("Unknown format: {raw} (use json or text)"))?,
                );
            }
            "--instance" => options.instance = Some(PathBuf::from(value("--instance")?)),
            "--profile" => options.profile = Some(value("--profile")?),
            "--game" => options.game = Some(PathBuf::from(value("--game")?)),
            "--data-dir" => options.data_dir_name = Some(value("--data-dir")?),
            "--workers" => {
                let raw = value("--workers")?;
                let count = raw
                    .parse::<usize>()
                    .with_context(|| format!("invalid worker count: {raw}"))?;
                options.workers = Some(count);
            }
            "--symlink" => options.symlink = Some(true),
            "--hardlink" => options.symlink = Some(false),
            "--redirect-root" => options.redirect_root = true,
            "--prune-stale" => options.prune_stale = true,
            "--accept-risk" => options.accept_risk = true,
            "-v" | "--verbose" => options.verbose = true,
            _ => tokens.push(arg.to_string()),
        }
    }
    Ok((options, tokens))
}

fn parse_command(tokens: &[String]) -> Result<CliCommand> {
    let Some(head) = tokens.first() else {
        return Ok(CliCommand::Help);
    };
    let command = match head.as_str() {
        "list" => CliCommand::List,
        "deploy" => CliCommand::Deploy,
        "state" => CliCommand::State,
        "paths" => CliCommand::Paths,
        "help" | "--help" | "-h" => CliCommand::Help,
        "version" | "--version" | "-V" => CliCommand::Version,
        other => bail!("Unknown command: {other} (see 'linkdeploy help')"),
    };
    if let Some(extra) = tokens.get(1) {
        bail!("Unexpected argument: {extra}");
    }
    Ok(command)
}

fn run_command(config: &mut AppConfig, command: CliCommand, global: &GlobalOptions) -> Result<()> {
    match command {
        CliCommand::List => list_files(config, global),
        CliCommand::Deploy => deploy(config, global),
        CliCommand::State => show_state(config, global),
        CliCommand::Paths => show_paths(config, global),
        CliCommand::Help | CliCommand::Version => Ok(()),
    }
}

fn open_host(config: &AppConfig, global: &GlobalOptions) -> Result<InstanceHost> {
    let instance_dir = global
        .instance
        .clone()
        .or_else(|| config.instance_dir.clone())
        .map_or_else(std::env::current_dir, Ok)
        .context("resolve instance directory")?;
    InstanceHost::open(InstanceOptions {
        instance_dir,
        profile: global.profile.clone(),
        game_dir: global.game.clone(),
        data_dir_name: global
            .data_dir_name
            .clone()
            .unwrap_or_else(|| config.data_dir_name.clone()),
    })
}

fn merged_deploy_config(config: &AppConfig, global: &GlobalOptions) -> DeployConfig {
    let mut deploy = config.deploy.clone();
    if let Some(symlink) = global.symlink {
        deploy.symlink = symlink;
    }
    deploy.redirect_root_to_game_dir |= global.redirect_root;
    deploy.prune_stale |= global.prune_stale;
    if global.workers.is_some() {
        deploy.workers = global.workers;
    }
    deploy
}

fn list_files(config: &AppConfig, global: &GlobalOptions) -> Result<()> {
    let host = open_host(config, global)?;
    let files: Vec<_> = VirtualTreeWalker::new(&host).collect();
    match global.format() {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&files)?),
        OutputFormat::Text => {
            for file in &files {
                println!("{:<9} {}", file.category.label(), file.path);
            }
            println!("{} file(s) in profile {}", files.len(), host.profile());
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct DeployOutput {
    entries: Vec<EntryReport>,
    summary: Option<DeploySummary>,
}

fn deploy(config: &mut AppConfig, global: &GlobalOptions) -> Result<()> {
    let deploy_config = merged_deploy_config(config, global);
    if !config.accepted_risk {
        if !global.accept_risk {
            print_risk_note(&deploy_config);
            bail!("deployment not confirmed: rerun with --accept-risk");
        }
        config.accepted_risk = true;
        config.save()?;
    }

    let host = open_host(config, global)?;
    let state_path = state_file_for(&config.state_dir(), &host.roots().data);
    let format = global.format();
    if format == OutputFormat::Text {
        println!(
            "Deploying profile {} to {} using {}",
            host.profile(),
            host.roots().data.display(),
            deploy_config.link_mode().describe()
        );
    }

    let deployer = Deployer::new(Arc::new(host), deploy_config, state_path)?;
    let handle = deployer.begin_full();
    let mut output = DeployOutput {
        entries: Vec::new(),
        summary: None,
    };
    for event in handle.events().iter() {
        match event {
            DeployEvent::Phase(phase) => {
                if format == OutputFormat::Text {
                    if let Some(label) = phase_label(phase) {
                        println!("{label}");
                    }
                }
            }
            DeployEvent::Entry(report) => {
                let shown = global.verbose || report.outcome != Outcome::Skipped;
                if format == OutputFormat::Text && shown {
                    print_report(&report);
                }
                if format == OutputFormat::Json {
                    output.entries.push(report);
                }
            }
            DeployEvent::Warning(message) => eprintln!("warning: {message}"),
            DeployEvent::Finished(summary) => {
                output.summary = Some(summary);
                break;
            }
        }
    }
    let summary = handle.wait()?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        OutputFormat::Text => print_summary(&summary),
    }
    if summary.has_failures() {
        bail!("{} entries failed to deploy", summary.failed);
    }
    Ok(())
}

fn phase_label(phase: Phase) -> Option<&'static str> {
    match phase {
        Phase::Walking => Some("Populating list. Please wait..."),
        Phase::Executing => Some("Deploying links. Please wait..."),
        Phase::Done => Some("Finished deployment."),
        Phase::Canceled => Some("Deployment canceled."),
        Phase::Idle | Phase::Resolving | Phase::Persisting => None,
    }
}

fn print_report(report: &EntryReport) {
    match &report.detail {
        Some(detail) => println!(
            "{} {} ({detail})",
            report.virtual_path,
            report.outcome.label()
        ),
        None => println!("{} {}", report.virtual_path, report.outcome.label()),
    }
}

fn print_summary(summary: &DeploySummary) {
    println!(
        "{} linked, {} already deployed, {} skipped, {} failed, {} canceled",
        summary.linked, summary.already_deployed, summary.skipped, summary.failed, summary.canceled
    );
    if summary.removed > 0 {
        println!("{} stale link(s) removed", summary.removed);
    }
    if !summary.state_saved {
        println!("Deployment state was not saved; the next run starts without it.");
    }
}

fn print_risk_note(deploy: &DeployConfig) {
    println!(
        "Warning: this tool deploys your mod list into the game directory using {}.",
        deploy.link_mode().describe()
    );
    println!("Existing files are moved aside with a .mo2_original or .mo2_<timestamp> suffix.");
    println!("Stale links are only removed with --prune-stale.");
    println!("The game may still modify deployed mod files.");
}

#[derive(Serialize)]
struct StateItem<'a> {
    virtual_path: &'a str,
    target: &'a PathBuf,
    source: &'a PathBuf,
}

fn show_state(config: &AppConfig, global: &GlobalOptions) -> Result<()> {
    let host = open_host(config, global)?;
    let deploy_config = merged_deploy_config(config, global);
    let path = state_file_for(&config.state_dir(), &host.roots().data);
    let store = StateStore::load(&path, deploy_config.link_mode());
    let items: Vec<StateItem> = store
        .iter()
        .map(|(virtual_path, record)| StateItem {
            virtual_path,
            target: &record.target,
            source: &record.source,
        })
        .collect();
    match global.format() {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&items)?),
        OutputFormat::Text => {
            println!("State file: {}", store.path().display());
            for item in &items {
                println!("{} -> {}", item.virtual_path, item.source.display());
            }
            println!("{} deployed file(s)", items.len());
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct PathsOutput<'a> {
    config_dir: &'a std::path::Path,
    state_file: PathBuf,
    roots: &'a linkdeploy::HostRoots,
}

fn show_paths(config: &AppConfig, global: &GlobalOptions) -> Result<()> {
    let host = open_host(config, global)?;
    let output = PathsOutput {
        config_dir: config.base_dir(),
        state_file: state_file_for(&config.state_dir(), &host.roots().data),
        roots: host.roots(),
    };
    match global.format() {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        OutputFormat::Text => {
            println!("Config dir: {}", output.config_dir.display());
            println!("State file: {}", output.state_file.display());
            println!("Mods:       {}", output.roots.mods.display());
            println!("Overwrite:  {}", output.roots.overwrite.display());
            println!("Game:       {}", output.roots.game.display());
            println!("Data:       {}", output.roots.data.display());
        }
    }
    Ok(())
}

fn print_help() {
    println!("linkdeploy v{}", env!("CARGO_PKG_VERSION"));
    println!("Usage:");
    println!("  linkdeploy list                 List the files of the virtual overlay");
    println!("  linkdeploy deploy               Link the overlay into the game directory");
    println!("  linkdeploy state                Show what the last deployment recorded");
    println!("  linkdeploy paths                Show resolved directories");
    println!();
    println!("Options:");
    println!("  --instance <dir>                Mod manager instance directory");
    println!("  --profile <name>                Profile (default: selected profile)");
    println!("  --game <dir>                    Game directory (default: gamePath from ini)");
    println!("  --data-dir <name>               Data folder inside the game dir (default: Data)");
    println!("  --symlink | --hardlink          Link type (default: hardlink)");
    println!("  --redirect-root                 Send root/ files to the game directory");
    println!("  --prune-stale                   Remove links whose files left the overlay");
    println!("  --workers <n>                   Link worker threads");
    println!("  --accept-risk                   Confirm deploying into the game directory");
    println!("  --format <json|text>            Output format");
    println!("  -v, --verbose                   Debug logging, show skipped entries");
    println!("  -h, --help                      Show help");
    println!("  -V, --version                   Show version");
}
