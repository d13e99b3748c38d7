use std::path::Path;
use anyhow::{bail, Result};
use colored::Colorize;
use nodefetch::config::Config;
use nodefetch::finder::{BinaryFinder, FoundVia};
use nodefetch::global::utils::get_global_config_file;
use nodefetch::manager::{AcquisitionManager, Outcome};
use nodefetch::platform::current_platform;
use nodefetch::process::CancelToken;
use crate::cli::{NodefetchCommand, CLI};

pub fn execute(cli: CLI) -> Result<()> {
    match cli.command {
        NodefetchCommand::Init { force } => {
            execute_init(&cli.config, force)
        }
        NodefetchCommand::Acquire { name, force } => {
            execute_acquire(&cli.config, name, force)
        }
        NodefetchCommand::Watch => {
            execute_watch(&cli.config)
        }
        NodefetchCommand::Status => {
            execute_status(&cli.config)
        }
        NodefetchCommand::Platform => {
            execute_platform();
            Ok(())
        }
        NodefetchCommand::Find { root, binary } => {
            execute_find(&root, &binary)
        }
    }
}

fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        return Config::load(path);
    }
    match get_global_config_file() {
        Ok(global) if global.exists() => Config::load(global),
        _ => bail!("{} not found. Run `nodefetch init` to create one.", path.display()),
    }
}

pub fn execute_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display())
    }
    Config::default_template().save(path)?;
    println!("{} {}", "Created".green().bold(), path.display());
    Ok(())
}

pub fn execute_acquire(path: &Path, name: Option<String>, force: bool) -> Result<()> {
    let config = load_config(path)?;
    let mut manager = AcquisitionManager::new(&config, CancelToken::new())?;
    if let Some(name) = &name {
        if !manager.has_target(name) {
            bail!("Target not found: {}", name)
        }
    }

    let reports = manager.acquire_all(force, name.as_deref());
    let mut failed = 0;
    for report in &reports {
        match &report.result {
            Ok(Outcome::Installed(record)) => {
                println!(
                    "{} {} {} via {}",
                    "installed".green().bold(),
                    report.name,
                    record.version.as_deref().unwrap_or("(unknown version)"),
                    record.strategy
                );
            }
            Ok(Outcome::UpToDate { version }) => {
                println!("{} {} {}", "up to date".cyan(), report.name, version);
            }
            Ok(Outcome::Skipped { reason }) => {
                println!("{} {} ({})", "skipped".yellow(), report.name, reason);
            }
            Err(e) => {
                failed += 1;
                let label = if e.is_warning() { "warning".yellow().bold() } else { "failed".red().bold() };
                eprintln!("{} {}: {}", label, report.name, e);
            }
        }
    }
    if failed > 0 {
        bail!("{} of {} targets failed", failed, reports.len())
    }
    Ok(())
}

pub fn execute_watch(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || handler_token.cancel())?;

    let mut manager = AcquisitionManager::new(&config, cancel)?;
    manager.run();
    Ok(())
}

pub fn execute_status(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    let manager = AcquisitionManager::new(&config, CancelToken::new())?;
    println!("Binary directory: {}", manager.binary_dir().display());

    if config.targets.is_empty() {
        println!("No targets");
        return Ok(());
    }
    for entry in &config.targets {
        println!("{}", entry.name.bold());
        let Some(target) = manager.targets().iter().find(|t| t.name == entry.name) else {
            println!("   {}", "invalid configuration".red());
            continue;
        };
        let path = manager.binary_dir().join(&target.binary);
        if !path.is_file() {
            println!("   {}", "not installed".yellow());
            continue;
        }
        println!("   path: {}", path.display());
        match manager.state().get(&target.name) {
            Some(record) => {
                println!("   version: {}", record.version.as_deref().unwrap_or("unknown"));
                println!("   installed: {} via {}", record.installed_at.to_rfc3339(), record.strategy);
                println!("   sha256: {}", record.sha256);
            }
            None => {
                println!("   {}", "no install record".dimmed());
            }
        }
    }
    Ok(())
}

pub fn execute_platform() {
    let platform = current_platform();
    println!("{}", platform.to_string().bold());
    println!("   os aliases:   {}", platform.os_aliases.join(", "));
    println!("   arch aliases: {}", platform.arch_aliases.join(", "));
}

pub fn execute_find(root: &Path, binary: &str) -> Result<()> {
    let found = BinaryFinder::from_env().find_built_binary(root, binary)?;
    let via = match found.via {
        FoundVia::Convention => "conventional location",
        FoundVia::HeuristicScan => "heuristic scan",
    };
    println!("{} ({})", found.path.display(), via);
    Ok(())
}
