//! prop-editor - edit a privileged `key=value` property file.
//!
//! Loads the file (through `su` when it is not readable), applies one
//! change, and commits it with a backup and remount handling.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use log::LevelFilter;
use prop_editor::shell::CommandChannel;
use prop_editor::transaction::{discard_backup, Job, TransactionWorker};
use prop_editor::{AppContext, Outcome, PropertyStore, StoreConfig, TransactionResult};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "prop-editor")]
#[command(author, version, about, long_about = None)]
#[command(
    about = "Transactional editor for privileged property files",
    long_about = "Edits a key=value property file on a read-only system partition with a staged write, automatic backup and read-only restore."
)]
struct Cli {
    /// Configuration file (default: <temp>/prop-editor/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Property file to edit (overrides the configured target)
    #[arg(long, global = true)]
    file: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Also log debug records to the log file
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List properties
    List {
        /// Only show properties whose key or value contains this text
        #[arg(long)]
        filter: Option<String>,
    },

    /// Print the value of a property
    Get {
        /// Property key
        key: String,
    },

    /// Add or update a property and save
    Set {
        /// Property key
        key: String,

        /// Property value (kept verbatim)
        value: String,
    },

    /// Remove a property and save
    Remove {
        /// Property key
        key: String,
    },

    /// Put the backup back in place
    Restore,

    /// Delete the backup so the next save can create a new one
    DiscardBackup,

    /// Check whether superuser access is available
    CheckRoot,

    /// Show the mount state of the protected partition
    MountStatus,

    /// Reboot the device
    Reboot {
        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },
}

/// Exit code for failures that come with a diagnostic report.
const EXIT_REPORT: i32 = 2;

fn main() {
    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<i32> {
    let config_path = cli.config.unwrap_or_else(StoreConfig::default_path);
    let mut config = StoreConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    if let Some(file) = cli.file {
        config.target = file;
    }
    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let ctx = AppContext::init(config, Some(config_path), level)?;
    let result = dispatch(&ctx, cli.command, cli.json);
    ctx.shutdown();
    result
}

fn dispatch(ctx: &AppContext, command: Commands, json: bool) -> anyhow::Result<i32> {
    let target = ctx.config().target.clone();

    match command {
        Commands::List { filter } => cmd_list(ctx, &target, filter.as_deref(), json),
        Commands::Get { key } => cmd_get(ctx, &target, &key),
        Commands::Set { key, value } => cmd_edit(ctx, &target, json, |store| {
            store.insert(&key, &value)?;
            Ok(())
        }),
        Commands::Remove { key } => cmd_edit(ctx, &target, json, |store| {
            if store.remove(&key).is_none() {
                bail!("{} is not set", key);
            }
            Ok(())
        }),
        Commands::Restore => {
            let worker = ctx.spawn_worker()?;
            let (result, _) = run_job(
                &worker,
                Job::Restore {
                    destination: target.clone(),
                    store: None,
                },
            )?;
            Ok(finish(ctx, &target, &result, json))
        }
        Commands::DiscardBackup => {
            let result = discard_backup(ctx.channel(), ctx.config(), &target).into();
            Ok(finish(ctx, &target, &result, json))
        }
        Commands::CheckRoot => {
            let root = ctx.channel().has_root_access();
            if json {
                println!("{}", serde_json::json!({ "root": root }));
            } else if root {
                println!("Superuser access granted");
            } else {
                println!("No superuser access");
            }
            Ok(if root { 0 } else { 1 })
        }
        Commands::MountStatus => {
            let partition = &ctx.config().protected_partition;
            let state = ctx.mount_state(partition).map(|f| f.as_str());
            if json {
                println!(
                    "{}",
                    serde_json::json!({ "mount_point": partition, "flag": state })
                );
            } else {
                println!("{}: {}", partition.display(), state.unwrap_or("unknown"));
            }
            Ok(0)
        }
        Commands::Reboot { force } => cmd_reboot(ctx, force),
    }
}

fn run_job(
    worker: &TransactionWorker,
    job: Job,
) -> anyhow::Result<(TransactionResult, Option<PropertyStore>)> {
    worker
        .run(job)
        .context("transaction worker stopped unexpectedly")
}

fn load(
    ctx: &AppContext,
    worker: &TransactionWorker,
    target: &Path,
) -> anyhow::Result<Result<PropertyStore, TransactionResult>> {
    let (result, store) = run_job(
        worker,
        Job::Load {
            target: target.to_path_buf(),
            store: PropertyStore::new(),
        },
    )?;
    match (result.is_ok(), store) {
        (true, Some(store)) => Ok(Ok(store)),
        _ => {
            report_if_needed(ctx, target, &result);
            Ok(Err(result))
        }
    }
}

fn cmd_list(ctx: &AppContext, target: &Path, filter: Option<&str>, json: bool) -> anyhow::Result<i32> {
    let worker = ctx.spawn_worker()?;
    let store = match load(ctx, &worker, target)? {
        Ok(store) => store,
        Err(result) => return Ok(print_result(&result, json)),
    };

    let entries = match filter {
        Some(query) => store.search(query),
        None => store.iter().collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else if entries.is_empty() {
        println!("(no properties)");
    } else {
        for entry in entries {
            println!("{}={}", entry.key, entry.value);
        }
    }
    Ok(0)
}

fn cmd_get(ctx: &AppContext, target: &Path, key: &str) -> anyhow::Result<i32> {
    let worker = ctx.spawn_worker()?;
    let store = match load(ctx, &worker, target)? {
        Ok(store) => store,
        Err(result) => return Ok(print_result(&result, false)),
    };

    match store.get(key) {
        Some(value) => {
            println!("{}", value);
            Ok(0)
        }
        None => {
            eprintln!("{} is not set", key);
            Ok(1)
        }
    }
}

fn cmd_edit<F>(ctx: &AppContext, target: &Path, json: bool, edit: F) -> anyhow::Result<i32>
where
    F: FnOnce(&mut PropertyStore) -> anyhow::Result<()>,
{
    let worker = ctx.spawn_worker()?;
    let mut store = match load(ctx, &worker, target)? {
        Ok(store) => store,
        Err(result) => return Ok(print_result(&result, json)),
    };

    edit(&mut store)?;
    if !store.is_modified() {
        println!("Nothing to save");
        return Ok(0);
    }

    let (result, _) = run_job(
        &worker,
        Job::Save {
            destination: target.to_path_buf(),
            store,
        },
    )?;
    Ok(finish(ctx, target, &result, json))
}

fn cmd_reboot(ctx: &AppContext, force: bool) -> anyhow::Result<i32> {
    if !force {
        eprint!("Reboot the device now? [y/N] ");
        io::stderr().flush()?;
        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Aborted");
            return Ok(0);
        }
    }

    ctx.reboot()?;
    println!("Rebooting");
    Ok(0)
}

fn report_if_needed(ctx: &AppContext, target: &Path, result: &TransactionResult) {
    if result.outcome != Outcome::ErrorNeedsReport {
        return;
    }
    match ctx.write_report(target, result) {
        Ok(path) => eprintln!("A diagnostic report was written to {}", path.display()),
        Err(e) => eprintln!("Unable to write diagnostic report: {}", e),
    }
}

fn finish(ctx: &AppContext, target: &Path, result: &TransactionResult, json: bool) -> i32 {
    report_if_needed(ctx, target, result);
    print_result(result, json)
}

fn print_result(result: &TransactionResult, json: bool) -> i32 {
    if json {
        match serde_json::to_string(result) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("Error: {}", e),
        }
    } else if result.is_ok() {
        println!("{}", result.message);
    } else {
        eprintln!("Error: {}", result.message);
    }

    match result.outcome {
        Outcome::Ok => 0,
        Outcome::Error => 1,
        Outcome::ErrorNeedsReport => EXIT_REPORT,
    }
}
