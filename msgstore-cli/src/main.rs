use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use msgstore_core::logging::{init_logging_with_config, LogConfig, LogLevel};
use msgstore_core::storage::{rollback, CURRENT_SCHEMA_VERSION};
use msgstore_core::{
    migrate, open_pool, ChannelMessageStore, Config, GroupMessageStore, Lifecycle, Message,
    SqlitePool,
};
use serde_json::json;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "msgstore")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file; MSGSTORE_* variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database file, overriding the configuration
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Region to operate in, overriding the configuration
    #[arg(short, long)]
    region: Option<String>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<LogLevel>,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Apply pending schema migrations
    Init,
    /// Revert migrations down to a schema version
    Rollback {
        #[arg(long, default_value_t = 0)]
        to: i32,
    },
    /// Verify that every store table is reachable
    Check,
    /// Queue a text message on a channel
    Send {
        group: String,
        payload: String,
        #[arg(short, long)]
        priority: Option<i32>,
    },
    /// Claim messages from a channel
    Poll {
        group: String,
        #[arg(short = 'n', long, default_value_t = 1)]
        max: usize,
    },
    /// Drop every message queued on a channel
    Purge { group: String },
    /// Message and group counts for the region
    Stats {
        /// Also report the depth of this channel
        group: Option<String>,
    },
    /// List correlation groups in the region
    Groups,
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => Config::default(),
    };
    config.apply_env()?;

    if let Some(path) = &args.database {
        config.database.path = path.clone();
    }
    if let Some(region) = &args.region {
        config.store.region = region.clone();
    }
    if let Some(level) = args.log_level {
        config.logging.level = level.as_str().to_string();
    }
    if args.json_logs {
        config.logging.json_format = true;
    }

    config.validate()?;
    Ok(config)
}

fn message_json(message: &Message) -> serde_json::Value {
    let payload = match message.payload().as_text() {
        Some(text) => json!(text),
        None => json!({ "type": message.payload().type_name() }),
    };
    json!({
        "id": message.id().to_string(),
        "timestamp": message.timestamp(),
        "priority": message.priority(),
        "payload": payload,
    })
}

fn run(command: Command, config: &Config, pool: SqlitePool) -> Result<()> {
    let prefix = &config.store.table_prefix;

    match command {
        Command::Init => {
            let applied = migrate(&pool, prefix)?;
            info!(applied, version = CURRENT_SCHEMA_VERSION, "Schema up to date");
        }
        Command::Rollback { to } => {
            let reverted = rollback(&pool, prefix, to)?;
            info!(reverted, version = to, "Schema rolled back");
        }
        Command::Check => {
            ChannelMessageStore::new(pool.clone(), config.store.clone())?.check_schema()?;
            GroupMessageStore::new(pool, config.store.clone())?.check_schema()?;
            info!(prefix = %prefix, "All store tables reachable");
        }
        Command::Send {
            group,
            payload,
            priority,
        } => {
            let store = ChannelMessageStore::new(pool, config.store.clone())?;
            store.start()?;
            let message = match priority {
                Some(p) => Message::builder(payload).priority(p).build(),
                None => Message::new(payload),
            };
            store.add_message_to_group(group.as_str(), &message)?;
            println!("{}", message_json(&message));
            store.stop();
        }
        Command::Poll { group, max } => {
            let store = ChannelMessageStore::new(pool, config.store.clone())?;
            store.start()?;
            let mut polled = 0;
            while polled < max {
                let Some(message) = store.poll_message_from_group(group.as_str())? else {
                    break;
                };
                println!("{}", message_json(&message));
                polled += 1;
            }
            debug!(group = %group, polled, "Poll finished");
            store.stop();
        }
        Command::Purge { group } => {
            let store = ChannelMessageStore::new(pool, config.store.clone())?;
            let removed = store.remove_message_group(group.as_str())?;
            info!(group = %group, removed, "Channel purged");
        }
        Command::Stats { group } => {
            let channels = ChannelMessageStore::new(pool.clone(), config.store.clone())?;
            let groups = GroupMessageStore::new(pool, config.store.clone())?;
            let mut stats = json!({
                "region": config.store.region,
                "channel_messages": channels.message_count()?,
                "channels": channels.message_group_count()?,
                "group_messages": groups.message_count()?,
                "groups": groups.message_group_count()?,
            });
            if let Some(group) = group {
                stats["channel_depth"] = json!(channels.message_group_size(group.as_str())?);
            }
            println!("{}", stats);
        }
        Command::Groups => {
            let store = GroupMessageStore::new(pool, config.store.clone())?;
            for metadata in store.iter_groups() {
                let metadata = metadata?;
                let size = store.message_group_size(metadata.group_key)?;
                println!(
                    "{}",
                    json!({
                        "group_key": metadata.group_key.to_string(),
                        "size": size,
                        "complete": metadata.complete,
                        "last_released_sequence": metadata.last_released_sequence,
                        "created_date": metadata.created_date,
                        "updated_date": metadata.updated_date,
                        "condition": metadata.condition,
                    })
                );
            }
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    init_logging_with_config(LogConfig::from_config(&config.logging)?)?;

    debug!(
        database = %config.database.path.display(),
        region = %config.store.region,
        "msgstore CLI started"
    );

    let pool = open_pool(&config.database)?;
    run(args.command, &config, pool)
}
