mod commands;
mod logging;
mod progress;

use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands};
use disk_catalog_core::analysis::{summarize, SafetyClass, VolumeRole};
use disk_catalog_core::storage::models::VolumeInfo;
use disk_catalog_core::{AppConfig, Catalog, JobOutcome, VolumeEvent, VolumeState};
use dotenv::dotenv;
use progress::CliReporter;
use tracing::error;

/// Long enough for any realistic volume; jobs report progress meanwhile.
const JOB_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let _guard = logging::init_logger();

    let config = match disk_catalog_core::config::load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let args = Cli::parse();
    let Some(command) = args.command else {
        let _ = Cli::command().print_long_help();
        return Ok(());
    };

    if let Err(err) = run(command, &config) {
        eprintln!("{} {:#}", "error:".red().bold(), err);
        process::exit(1);
    }
    Ok(())
}

fn run(command: Commands, config: &AppConfig) -> anyhow::Result<()> {
    if let Commands::PrintConfig = command {
        println!("{}", toml::to_string_pretty(config)?);
        return Ok(());
    }

    let catalog = Catalog::open(config, Arc::new(CliReporter::new()))
        .with_context(|| format!("opening catalog at {}", config.database_path))?;

    match command {
        Commands::Index {
            path,
            volume_id,
            name,
            full,
        } => run_index(&catalog, &path, volume_id, name, full),
        Commands::Hash { volume_id, path } => run_hash(&catalog, &volume_id, &path),
        Commands::Search {
            text,
            limit,
            offset,
        } => run_search(&catalog, &text, limit, offset),
        Commands::Browse { volume_id, parent } => run_browse(&catalog, &volume_id, &parent),
        Commands::Duplicates { backups } => run_duplicates(&catalog, &backups),
        Commands::Volumes { mounted } => run_volumes(&catalog, &mounted),
        Commands::Exclude { volume_id } => {
            catalog.tracker().exclude_volume(&volume_id)?;
            println!("Volume {} excluded", volume_id.cyan());
            Ok(())
        }
        Commands::Include { volume_id } => {
            catalog.tracker().unexclude_volume(&volume_id)?;
            println!("Volume {} included", volume_id.cyan());
            Ok(())
        }
        Commands::DeleteVolume { volume_id, yes } => {
            let prompt = format!(
                "Are you SURE you want to delete volume {} and all of its records?",
                volume_id
            );
            if !yes && !prompt_confirm(&prompt, Some(false))? {
                return Ok(());
            }
            let removed = catalog.tracker().delete_volume(&volume_id)?;
            println!("Volume {} deleted ({} records)", volume_id.cyan(), removed);
            Ok(())
        }
        Commands::Settings {
            duplicate_detection,
            add_excluded_dir,
            add_excluded_extension,
            add_ignore_pattern,
        } => {
            let mut settings = catalog.settings();
            let before = settings.clone();
            if let Some(enabled) = duplicate_detection {
                settings.duplicate_detection_enabled = enabled;
            }
            settings.excluded_dirs.extend(add_excluded_dir);
            settings.excluded_extensions.extend(add_excluded_extension);
            settings.ignore_patterns.extend(add_ignore_pattern);
            if settings != before {
                catalog.update_settings(settings.clone())?;
            }
            println!("{}", toml::to_string_pretty(&settings)?);
            Ok(())
        }
        Commands::Recover => {
            catalog.store().recover()?;
            println!("Store recovered");
            Ok(())
        }
        Commands::PrintConfig => Ok(()),
    }
}

fn run_index(
    catalog: &Catalog,
    path: &Path,
    volume_id: Option<String>,
    name: Option<String>,
    full: bool,
) -> anyhow::Result<()> {
    let root = path
        .canonicalize()
        .with_context(|| format!("resolving {}", path.display()))?;
    let volume_id = volume_id.unwrap_or_else(|| root.to_string_lossy().into_owned());
    let name = name.unwrap_or_else(|| {
        root.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| volume_id.clone())
    });

    if full {
        catalog.store().upsert_volume(&VolumeInfo {
            id: volume_id.clone(),
            name,
            total_capacity: 0,
            available_capacity: 0,
        })?;
        catalog.coordinator().request_rebuild(&volume_id, &root)?;
    } else {
        // Attaching signals the coordinator, which picks FULL or DELTA.
        catalog.handle_volume_event(&VolumeEvent {
            volume_id: volume_id.clone(),
            name,
            mount_path: root.clone(),
            total_capacity: 0,
            available_capacity: 0,
            is_connected: true,
        })?;
        let excluded = catalog
            .store()
            .get_volume(&volume_id)?
            .map(|v| v.is_excluded)
            .unwrap_or(false);
        if excluded {
            println!("Volume {} is excluded, nothing to index", volume_id.cyan());
            return Ok(());
        }
    }

    if !catalog.coordinator().wait_idle(Some(&volume_id), JOB_TIMEOUT) {
        bail!("timed out waiting for {}", volume_id);
    }
    match catalog.coordinator().last_outcome(&volume_id) {
        Some(JobOutcome::Completed(summary)) => {
            println!(
                "{} entries on {}",
                summary.total_files.to_string().green(),
                volume_id.cyan()
            );
            Ok(())
        }
        Some(JobOutcome::Cancelled) => bail!("indexing of {} was cancelled", volume_id),
        Some(JobOutcome::Failed { message, .. }) => Err(anyhow!(message)),
        None => bail!("no indexing job ran for {}", volume_id),
    }
}

fn run_hash(catalog: &Catalog, volume_id: &str, path: &Path) -> anyhow::Result<()> {
    if !catalog.settings().duplicate_detection_enabled {
        println!("Duplicate detection is disabled");
        return Ok(());
    }
    catalog.coordinator().request_hash(volume_id, path)?;
    if !catalog.coordinator().wait_idle(Some(volume_id), JOB_TIMEOUT) {
        bail!("timed out waiting for {}", volume_id);
    }
    match catalog.coordinator().last_hash_outcome(volume_id) {
        Some(JobOutcome::Failed { message, .. }) => Err(anyhow!(message)),
        Some(JobOutcome::Cancelled) => bail!("hashing of {} was cancelled", volume_id),
        _ => Ok(()),
    }
}

fn run_search(catalog: &Catalog, text: &str, limit: i64, offset: i64) -> anyhow::Result<()> {
    let results = catalog.search(text, limit, offset)?;
    if results.is_empty() {
        println!("No matches for {}", text.yellow());
        return Ok(());
    }
    for result in results {
        let volume = if result.is_connected {
            result.volume_name.green()
        } else {
            result.volume_name.dimmed()
        };
        let kind = if result.is_directory { "dir " } else { "file" };
        println!(
            "{} [{}] {} ({} bytes)",
            kind,
            volume,
            result.relative_path,
            result.size
        );
    }
    Ok(())
}

fn run_browse(catalog: &Catalog, volume_id: &str, parent: &str) -> anyhow::Result<()> {
    for record in catalog.get_children(volume_id, parent)? {
        if record.is_directory {
            println!("{}/", record.name.blue().bold());
        } else {
            println!("{}  {}", record.name, record.size.to_string().dimmed());
        }
    }
    Ok(())
}

fn run_duplicates(catalog: &Catalog, backups: &[String]) -> anyhow::Result<()> {
    if !catalog.settings().duplicate_detection_enabled {
        println!("Duplicate detection is disabled");
        return Ok(());
    }
    let roles: HashMap<String, VolumeRole> = catalog
        .store()
        .list_volumes()?
        .into_iter()
        .map(|v| {
            let role = if backups.contains(&v.id) {
                VolumeRole::Backup
            } else {
                VolumeRole::Source
            };
            (v.id, role)
        })
        .collect();

    let groups = catalog.duplicate_groups(&roles)?;
    for group in &groups {
        let safety = match group.safety {
            SafetyClass::HasBackup => "backed up".green(),
            SafetyClass::RedundantSources => "redundant sources".yellow(),
            SafetyClass::BackupOnly => "backup only".cyan(),
            SafetyClass::Unclassified => "unclassified".dimmed(),
        };
        println!(
            "{} ({} bytes, {} copies, {:?}) {}",
            group.name.bold(),
            group.size,
            group.count(),
            group.match_kind,
            safety
        );
        for member in &group.members {
            println!("    [{}] {}", member.volume_name, member.relative_path);
        }
    }

    let summary = summarize(&groups);
    println!(
        "{} duplicate groups, {} files, {} bytes reclaimable",
        summary.groups.to_string().red(),
        summary.files.to_string().red(),
        summary.wasted_bytes.to_string().red()
    );
    Ok(())
}

fn run_volumes(catalog: &Catalog, mounted: &[String]) -> anyhow::Result<()> {
    let events = mounted
        .iter()
        .map(|arg| parse_mounted(arg))
        .collect::<anyhow::Result<Vec<_>>>()?;

    for status in catalog.tracker().load_volumes(&events)? {
        let state = match status.state {
            VolumeState::Online => "online".green(),
            VolumeState::Offline => "offline".dimmed(),
            VolumeState::New => "new".cyan(),
        };
        let excluded = if status.volume.is_excluded {
            " excluded".yellow().to_string()
        } else {
            String::new()
        };
        println!(
            "{} {} [{}{}] {} files, last scan {}",
            status.volume.id,
            status.volume.name.bold(),
            state,
            excluded,
            status.volume.file_count,
            status.volume.last_scan_at.as_deref().unwrap_or("never")
        );
    }

    if events.is_empty() {
        return Ok(());
    }
    if !catalog.coordinator().wait_idle(None, JOB_TIMEOUT) {
        bail!("timed out waiting for mounted volumes to index");
    }
    for event in &events {
        if let Some(JobOutcome::Failed { message, .. }) =
            catalog.coordinator().last_outcome(&event.volume_id)
        {
            eprintln!("{} {}: {}", "✗".red(), event.volume_id, message);
        }
    }
    Ok(())
}

fn parse_mounted(arg: &str) -> anyhow::Result<VolumeEvent> {
    let (id, path) = arg
        .split_once('=')
        .ok_or_else(|| anyhow!("expected ID=PATH, got {}", arg))?;
    let mount_path = PathBuf::from(path);
    let name = mount_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| id.to_string());
    Ok(VolumeEvent {
        volume_id: id.to_string(),
        name,
        mount_path,
        total_capacity: 0,
        available_capacity: 0,
        is_connected: true,
    })
}

fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
    let mut input = String::new();

    loop {
        input.clear();

        match default {
            Some(true) => print!("{} (Y/n): ", prompt),
            Some(false) | None => print!("{} (y/N): ", prompt),
        }
        io::stdout().flush()?;

        io::stdin().read_line(&mut input)?;

        match input.trim().to_uppercase().as_str() {
            "Y" => return Ok(true),
            "N" => return Ok(false),
            "" => match default {
                Some(default) => return Ok(default),
                None => continue,
            },
            _ => continue,
        }
    }
}
