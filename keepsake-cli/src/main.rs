/*!
Keepsake CLI - inspect and recover save slots in a file-backed keepsake store.

The CLI opens the store directly (without the in-memory fallback) so that an
unreadable directory is reported instead of silently hidden.
*/

use clap::{Parser, Subcommand};
use keepsake_core::{
    FileStore, KeepsakeConfig, KeyValueStore, LoadOptions, RecordHealth, RecoveryAction,
    SaveStore, Schema, StorageConfig,
};
use std::path::PathBuf;
use tabled::{Table, Tabled};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "keepsake")]
#[command(about = "CLI for keepsake save stores")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory holding the save entries
    #[arg(short, long, global = true, env = "KEEPSAKE_PATH", default_value = "./saves")]
    path: PathBuf,

    /// Key namespace the application saves under
    #[arg(short, long, global = true, default_value = keepsake_core::config::DEFAULT_NAMESPACE)]
    namespace: String,

    /// Schema file (JSON) used to validate and repair documents
    #[arg(long, global = true)]
    schema: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List all save slots
    List,
    /// Show details of a save slot
    Show {
        slot: String,
        /// Print the decoded document
        #[arg(short, long)]
        data: bool,
        /// Report damage instead of repairing the printed document
        #[arg(long, requires = "data")]
        strict: bool,
    },
    /// Check a slot's primary and backup records and suggest a recovery step
    Verify { slot: String },
    /// Show storage usage against the quota
    Info,
    /// Replace a slot's primary record with its backup
    Restore { slot: String },
    /// Delete a save slot and its backup
    Delete {
        slot: String,
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Tabled)]
struct SlotRow {
    #[tabled(rename = "Slot")]
    slot: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Saved")]
    saved: String,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Backup")]
    backup: String,
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let store = open_store(&cli)?;

    match cli.command {
        Commands::List => list_slots(&store)?,
        Commands::Show { slot, data, strict } => show_slot(&store, &slot, data, strict)?,
        Commands::Verify { slot } => verify_slot(&store, &slot)?,
        Commands::Info => show_info(&store)?,
        Commands::Restore { slot } => restore_slot(&store, &slot)?,
        Commands::Delete { slot, force } => delete_slot(&store, &slot, force)?,
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"))
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn open_store(cli: &Cli) -> Result<SaveStore<FileStore>, anyhow::Error> {
    let schema = match &cli.schema {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            Schema::from_json(&text)?
        }
        None => Schema::empty("0.0.0"),
    };

    let config = KeepsakeConfig {
        storage: StorageConfig {
            namespace: cli.namespace.clone(),
            ..StorageConfig::file(&cli.path)
        },
        ..KeepsakeConfig::default()
    };
    config.validate()?;

    info!("Opening {} (namespace '{}')", cli.path.display(), cli.namespace);
    Ok(SaveStore::with_config(
        FileStore::new(config.storage.resolved_base_path()),
        schema,
        &config,
    )?)
}

fn list_slots(store: &SaveStore<FileStore>) -> Result<(), anyhow::Error> {
    let rows = store
        .list_slots()?
        .into_iter()
        .map(|slot| slot_row(store, slot))
        .collect::<Result<Vec<_>, _>>()?;

    if rows.is_empty() {
        println!("No save slots found");
    } else {
        println!("{}", Table::new(rows));
    }

    Ok(())
}

fn slot_row<S: KeyValueStore>(store: &SaveStore<S>, slot: String) -> Result<SlotRow, anyhow::Error> {
    let diagnosis = store.diagnose(&slot)?;
    let (version, saved) = match &diagnosis.primary {
        RecordHealth::Intact {
            version, timestamp, ..
        } => (version.clone(), format_timestamp(*timestamp)),
        _ => ("-".to_string(), "-".to_string()),
    };
    let size = store
        .store()
        .get(&store.layout().primary(&slot))?
        .map(|raw| format_size(raw.len() as u64))
        .unwrap_or_else(|| "-".to_string());

    Ok(SlotRow {
        slot,
        version,
        saved,
        size,
        status: describe(&diagnosis.primary),
        backup: describe(&diagnosis.backup),
    })
}

fn show_slot(
    store: &SaveStore<FileStore>,
    slot: &str,
    data: bool,
    strict: bool,
) -> Result<(), anyhow::Error> {
    let record = match store.read_record(slot) {
        Ok(Some(record)) => record,
        Ok(None) => {
            println!("Slot '{slot}' not found");
            return Ok(());
        }
        Err(e) => {
            error!("Primary record of '{}' is unreadable: {}", slot, e);
            return Err(e.into());
        }
    };

    println!("Slot Details:");
    println!("  Slot: {slot}");
    println!("  Version: {}", record.version);
    println!("  Saved: {}", format_timestamp(record.timestamp));
    println!("  Checksum: {}", record.checksum);
    println!("  Compressed: {}", record.compressed);
    println!("  Payload Size: {}", format_size(record.payload.len() as u64));

    if data {
        let options = LoadOptions {
            repair: !strict,
            ..LoadOptions::default()
        };
        match store.try_load(slot, options) {
            Ok(Some(doc)) => println!("{}", serde_json::to_string_pretty(&doc)?),
            Ok(None) => println!("  Document unavailable"),
            Err(e) if e.is_recoverable() => {
                warn!("Document of '{}' is not usable as stored: {}", slot, e);
                println!("  Document unavailable: {e}");
                println!("  Run `keepsake verify {slot}` for recovery options");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}

fn verify_slot(store: &SaveStore<FileStore>, slot: &str) -> Result<(), anyhow::Error> {
    info!("Verifying slot: {}", slot);

    let diagnosis = store.diagnose(slot)?;
    println!("Primary: {}", describe(&diagnosis.primary));
    println!("Backup:  {}", describe(&diagnosis.backup));

    if let RecordHealth::Intact { corruption, .. } = &diagnosis.primary {
        for issue in &corruption.issues {
            println!("  - {issue}");
        }
    }

    match diagnosis.recommended {
        RecoveryAction::None => {
            println!("✓ Slot is healthy");
            Ok(())
        }
        action => {
            println!("✗ Recommended recovery: {}", describe_action(action));
            Err(anyhow::anyhow!("Slot '{slot}' needs recovery"))
        }
    }
}

fn show_info(store: &SaveStore<FileStore>) -> Result<(), anyhow::Error> {
    let info = store.get_storage_info()?;
    println!("Storage:");
    println!("  Location: {}", store.store().base_dir().display());
    println!("  Slots: {}", store.list_slots()?.len());
    println!("  Usage: {} of {}", format_size(info.usage), format_size(info.quota));
    println!("  Used: {:.1}%", info.usage_percent);
    println!("  Remaining: {}", format_size(info.remaining));
    if info.is_at_limit {
        println!("  ✗ At the hard limit; saves will be refused");
    } else if info.is_near_limit {
        println!("  ! Near the limit; stale backups will be evicted on the next save");
    }
    Ok(())
}

fn restore_slot(store: &SaveStore<FileStore>, slot: &str) -> Result<(), anyhow::Error> {
    if store.restore_from_backup(slot)? {
        println!("✓ Restored '{slot}' from its backup");
        Ok(())
    } else {
        Err(anyhow::anyhow!("No usable backup for '{slot}'"))
    }
}

fn delete_slot(store: &SaveStore<FileStore>, slot: &str, force: bool) -> Result<(), anyhow::Error> {
    if !force {
        print!("Are you sure you want to delete slot '{slot}' and its backup? (y/N): ");
        use std::io::{self, Write};
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().to_lowercase().starts_with('y') {
            println!("Deletion cancelled");
            return Ok(());
        }
    }

    store.delete(slot)?;
    println!("✓ Slot deleted successfully");
    Ok(())
}

fn describe(health: &RecordHealth) -> String {
    match health {
        RecordHealth::Missing => "missing".to_string(),
        RecordHealth::Damaged { reason } => format!("damaged ({reason})"),
        RecordHealth::Intact { valid: true, .. } => "ok".to_string(),
        RecordHealth::Intact { corruption, .. } => {
            format!("invalid ({} corruption)", corruption.severity)
        }
    }
}

fn describe_action(action: RecoveryAction) -> &'static str {
    match action {
        RecoveryAction::None => "none",
        RecoveryAction::Repair => "load with repair enabled",
        RecoveryAction::RestoreBackup => "restore from backup (keepsake restore <slot>)",
        RecoveryAction::RollbackSnapshot => "roll back to an in-session snapshot",
        RecoveryAction::Reset => "reset the slot; nothing recoverable remains",
    }
}

fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

fn format_timestamp(millis: i64) -> String {
    use chrono::{Local, TimeZone};

    match Local.timestamp_millis_opt(millis) {
        chrono::LocalResult::Single(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        _ => millis.to_string(),
    }
}
