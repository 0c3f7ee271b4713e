use anyhow::Result;
use backup_sync::config::{self, Config};
use backup_sync::managers::logging::{self, LoggingConfig};
use backup_sync::{StorageManager, SyncManager};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "backup-sync")]
#[command(about = "Cloud storage uploads and directory syncing for backups", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "~/backup-sync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all syncers or a specific syncer
    Sync {
        /// Specific syncer to run (defaults to all syncers)
        #[arg(short, long)]
        syncer: Option<String>,
    },

    /// Upload one file to a storage
    Upload {
        /// Storage name
        #[arg(short, long)]
        storage: String,

        /// File to upload
        file: PathBuf,

        /// Remote key (defaults to <storage path>/<file name>)
        #[arg(short, long)]
        key: Option<String>,
    },

    /// List remote objects
    List {
        /// Storage name
        #[arg(short, long)]
        storage: String,

        /// Key prefix, relative to the storage path
        #[arg(short, long, default_value = "")]
        prefix: String,

        /// Show size, hash and storage class
        #[arg(short, long)]
        long: bool,
    },

    /// Delete remote objects by key
    Delete {
        /// Storage name
        #[arg(short, long)]
        storage: String,

        /// Full remote keys, as printed by `list`
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Validate configuration file
    Validate,

    /// List configured storages and syncers
    Storages,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = config::expand_tilde(&cli.config);
    let config = config::load_config(&config_path)?;

    // Read-only commands log to the console only
    let _log_guard = match cli.command {
        Commands::Validate | Commands::Storages => {
            logging::init_console_logging();
            None
        }
        _ => Some(logging::init_logging(&LoggingConfig::from_global(&config.global))?),
    };

    match cli.command {
        Commands::Sync { syncer } => {
            let manager = SyncManager::new(config);
            let reports = if let Some(syncer_name) = syncer {
                println!("Running syncer: {}", syncer_name);
                manager.sync(&syncer_name)?
            } else {
                println!("Running all syncers...");
                manager.sync_all()?
            };

            for report in &reports {
                let summary = &report.summary;
                println!(
                    "{:?} -> '{}': {} transferred, {} unchanged, {} {}, {} skipped",
                    report.directory,
                    report.remote_base,
                    summary.transferred,
                    summary.unchanged,
                    if summary.mirror { summary.deleted } else { summary.orphaned },
                    if summary.mirror { "deleted" } else { "orphaned" },
                    summary.skipped
                );
            }
            println!("✓ Sync completed successfully");
        }

        Commands::Upload { storage, file, key } => {
            let manager = StorageManager::new(config);
            let key = manager.upload(&storage, &file, key.as_deref())?;
            println!("✓ Uploaded {:?} as '{}'", file, key);
        }

        Commands::List {
            storage,
            prefix,
            long,
        } => {
            let manager = StorageManager::new(config);
            let objects = manager.list(&storage, &prefix)?;
            for object in &objects {
                if long {
                    println!(
                        "{:>14}  {}  {:<12}  {}",
                        object.size(),
                        object.content_hash(),
                        object.storage_class().unwrap_or("-"),
                        object.key()
                    );
                } else {
                    println!("{}", object.key());
                }
            }
            if long {
                println!("Total: {} object(s)", objects.len());
            }
        }

        Commands::Delete { storage, keys } => {
            let manager = StorageManager::new(config);
            let deleted = manager.delete(&storage, &keys)?;
            println!("✓ Deleted {} object(s)", deleted);
        }

        Commands::Validate => {
            println!("Configuration is valid!");
            println!("Storages: {}", config.storages.len());
            println!("Syncers: {}", config.syncers.len());
        }

        Commands::Storages => print_storages(&config),
    }

    Ok(())
}

fn print_storages(config: &Config) {
    let mut storages: Vec<_> = config.storages.iter().collect();
    storages.sort_by(|a, b| a.0.cmp(b.0));

    println!("Configured storages:");
    for (name, storage) in storages {
        println!("  {} ({})", name, storage.storage_type());
        if !storage.description.is_empty() {
            println!("    Description: {}", storage.description);
        }
        if !storage.path.is_empty() {
            println!("    Path: {}", storage.path);
        }
    }

    let mut syncers: Vec<_> = config.syncers.iter().collect();
    syncers.sort_by(|a, b| a.0.cmp(b.0));

    println!();
    println!("Configured syncers:");
    for (name, syncer) in syncers {
        println!("  {}", name);
        println!("    Storage: {}", syncer.storage);
        println!("    Path: {}", syncer.path);
        println!("    Mirror: {}", syncer.mirror);
        println!("    Threads: {}", syncer.thread_count);
        for directory in &syncer.directories {
            println!("    Directory: {:?}", directory);
        }
    }
}
