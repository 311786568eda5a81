mod cli;

use anyhow::{anyhow, Result};
use clap::Parser;

use crate::cli::{Cli, Commands, ConfigArgs, ReceiptCommands, SnapshotCommands};
use msgvault::config::Config;
use msgvault::migration::{self, MigrationError, SnapshotManager};
use msgvault::paths::StorePaths;
use msgvault::receipts::PendingReceiptStore;
use msgvault::secret::KeystoreSecretProvider;
use msgvault::security::memory::SecurePassword;
use msgvault::{db::Db, logger};

const PASSWORD_ENV: &str = "MSGVAULT_PASSWORD";
const EXIT_FAILURE: i32 = 1;
const EXIT_UNSUPPORTED: i32 = 2;

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:#}");
        let code = match err.downcast_ref::<MigrationError>() {
            Some(e) if e.is_unsupported_version() => EXIT_UNSUPPORTED,
            _ => EXIT_FAILURE,
        };
        std::process::exit(code);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    logger::init(cli.debug);
    let paths = StorePaths::new(cli.store.as_deref())?;
    let config = Config::load(&paths)?;

    match cli.command {
        Commands::Migrate => cmd_migrate(&paths, &config),
        Commands::Status { json } => cmd_status(&paths, &config, json),
        Commands::Snapshots(args) => cmd_snapshots(&paths, args.command),
        Commands::Receipts(args) => cmd_receipts(&paths, &config, args.command),
        Commands::Config(args) => cmd_config(&paths, config, args),
    }
}

fn password() -> Result<SecurePassword> {
    SecurePassword::from_env(PASSWORD_ENV)
        .ok_or_else(|| anyhow!("Set {PASSWORD_ENV} to unlock the store"))
}

fn open(paths: &StorePaths, config: &Config) -> Result<Db> {
    let secrets = KeystoreSecretProvider::new(paths, password()?);
    Ok(migration::open_or_migrate(paths, &secrets, config)?)
}

fn cmd_migrate(paths: &StorePaths, config: &Config) -> Result<()> {
    let db = open(paths, config)?;
    println!(
        "Store at {} is at schema version {}",
        db.path().display(),
        db.persisted_version()?
    );
    Ok(())
}

fn cmd_status(paths: &StorePaths, config: &Config, json: bool) -> Result<()> {
    let secrets = KeystoreSecretProvider::new(paths, password()?);
    let status = migration::inspect(paths, &secrets, config)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    match status.persisted {
        Some(version) if version < status.minimum => println!(
            "Schema version {version} is older than the minimum supported {}",
            status.minimum
        ),
        Some(version) => println!(
            "Schema version {version} (current {}, {} pending)",
            status.current,
            status.pending()
        ),
        None => println!(
            "No store yet (current schema version {})",
            migration::current_schema_version()
        ),
    }
    Ok(())
}

fn cmd_snapshots(paths: &StorePaths, command: SnapshotCommands) -> Result<()> {
    let manager = SnapshotManager::new(paths.snapshots_dir.clone());
    match command {
        SnapshotCommands::List => {
            let snapshots = manager.list()?;
            if snapshots.is_empty() {
                println!("No snapshots.");
            }
            for snapshot in snapshots {
                println!(
                    "{}  v{} -> v{}  {}",
                    snapshot.created_at,
                    snapshot.from_version,
                    snapshot.to_version,
                    snapshot.dir.display()
                );
            }
        }
        SnapshotCommands::Verify => {
            let mut broken = 0;
            for snapshot in manager.list()? {
                let ok = manager.verify(&snapshot)?;
                if !ok {
                    broken += 1;
                }
                println!("{} {}", if ok { "OK " } else { "BAD" }, snapshot.dir.display());
            }
            if broken > 0 {
                return Err(anyhow!("{broken} snapshot(s) failed verification"));
            }
        }
        SnapshotCommands::Prune { keep } => {
            let removed = manager.prune(keep)?;
            println!("Removed {removed} snapshot(s)");
        }
    }
    Ok(())
}

fn cmd_receipts(paths: &StorePaths, config: &Config, command: ReceiptCommands) -> Result<()> {
    let db = open(paths, config)?;
    let receipts = PendingReceiptStore::new(&db);

    match command {
        ReceiptCommands::List { json } => {
            let all = receipts.get_all()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&all)?);
            } else {
                for r in all {
                    println!(
                        "{}  {}.{}  sent={} received={} thread={}",
                        r.id, r.author, r.device, r.sent_timestamp, r.received_timestamp, r.thread_id
                    );
                }
            }
        }
        ReceiptCommands::Add {
            author,
            device,
            sent,
            received,
            thread,
        } => {
            let receipt = receipts.insert(&author, device, sent, received, thread)?;
            println!("Stored pending receipt {}", receipt.id);
        }
        ReceiptCommands::Remove { author, sent } => {
            let found = receipts
                .get_all()?
                .into_iter()
                .find(|r| r.author == author && r.sent_timestamp == sent)
                .ok_or_else(|| anyhow!("No pending receipt from {author} sent at {sent}"))?;
            receipts.delete(&found)?;
            println!("Removed pending receipt {}", found.id);
        }
    }
    Ok(())
}

fn cmd_config(paths: &StorePaths, mut config: Config, args: ConfigArgs) -> Result<()> {
    let changed = args.snapshot_before_upgrade.is_some()
        || args.keep_snapshots.is_some()
        || args.busy_timeout_ms.is_some();

    if let Some(enabled) = args.snapshot_before_upgrade {
        config.snapshot_before_upgrade = enabled;
    }
    if let Some(keep) = args.keep_snapshots {
        config.keep_snapshots = keep;
    }
    if let Some(timeout) = args.busy_timeout_ms {
        config.busy_timeout_ms = timeout;
    }
    if changed {
        paths.ensure_base_dir()?;
        config.save(paths)?;
    }

    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
