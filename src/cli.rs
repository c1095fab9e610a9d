//! CLI interface for XFormat
//!
//! Provides command-line access to:
//! - Folding byte strings through the pipeline
//! - Packing files into `.x` containers and inspecting them
//! - Conversation and settings row stores
//!
//! Every invocation absorbs the saved symbol session from the store root
//! first and writes it back after any command that can register symbols, so
//! codes stay stable from one run to the next.

use crate::config::EngineConfig;
use crate::container::{list_containers, load_session, save_session, Container, SymbolSection};
use crate::pipeline::XContext;
use crate::store::{ConversationTable, SettingRow, SettingsTable};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

#[derive(Parser)]
#[command(name = "xformat")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Symbol-folding storage engine with container and row-store files")]
#[command(
    long_about = "XFormat - a symbol-folding storage engine\n\n\
    Payloads are padded to whole field-descriptor blocks, every distinct byte is registered\n\
    in a shared symbol map, and each byte is folded with its code into a one-way stored form.\n\n\
    Folded data lives in .x files under the store root:\n\
    • containers holding a payload and optionally the symbol table\n\
    • append-only conversation stores\n\
    • key-upsert settings stores\n\n\
    Examples:\n\
      xformat create \"hello\"\n\
      xformat pack -i notes.txt notes\n\
      xformat chat insert journal -p greet \"good morning\"\n\
      xformat settings set prefs theme dark"
)]
#[command(author = "XFormat Contributors")]
pub struct Cli {
    /// JSON engine configuration (widths, symbol limit, store root)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Store root directory, overriding the configuration
    #[arg(short, long, global = true, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Print extra details about each operation
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fold a byte string and print the stored form as hex
    #[command(
        long_about = "Fold a byte string and print the stored form as hex\n\n\
        The argument is padded to a whole number of blocks, its bytes are registered as\n\
        symbols, and every byte is folded with its code. Identical input always yields\n\
        identical output against the same session.\n\n\
        Example:\n\
          xformat create AB"
    )]
    Create {
        /// Bytes to fold
        #[arg(value_name = "DATA")]
        data: String,
    },

    /// Print the light output of a byte string as hex
    Output {
        /// Bytes to map through the symbol codes
        #[arg(value_name = "DATA")]
        data: String,
    },

    /// Fold a file into a named container
    #[command(
        long_about = "Fold a file into a named container\n\n\
        Writes <root>/<ID>.x atomically. The symbol table is embedded unless the\n\
        configuration disables it or --reference is given, in which case the container\n\
        refers to the shared session table.\n\n\
        Example:\n\
          xformat pack --input notes.txt notes"
    )]
    Pack {
        /// Container id
        #[arg(value_name = "ID")]
        id: String,

        /// File whose bytes become the payload
        #[arg(short, long, value_name = "FILE", help_heading = "Required")]
        input: PathBuf,

        /// Refer to the session symbol table instead of embedding it
        #[arg(long)]
        reference: bool,
    },

    /// Show a container's header details
    Inspect {
        /// Container id
        #[arg(value_name = "ID")]
        id: String,

        /// Also print the payload as hex
        #[arg(long)]
        payload: bool,
    },

    /// List the .x files in the store root
    List,

    /// Append-only conversation stores
    #[command(subcommand)]
    Chat(ChatCommand),

    /// Key-upsert settings stores
    #[command(subcommand)]
    Settings(SettingsCommand),
}

#[derive(Subcommand)]
pub enum ChatCommand {
    /// Append a row stamped with the current UTC time
    Insert {
        /// Store id
        store: String,

        /// Sentence to record
        sentence: String,

        /// Attachment reference
        #[arg(short, long, default_value = "")]
        attachment: String,

        /// Purpose word
        #[arg(short, long, default_value = "")]
        purpose: String,
    },

    /// Print every row in insertion order
    Read {
        /// Store id
        store: String,
    },
}

#[derive(Subcommand)]
pub enum SettingsCommand {
    /// Set the values stored under a key
    Set {
        store: String,
        key: String,
        values: Vec<String>,
    },

    /// Print the values stored under a key
    Get { store: String, key: String },

    /// Print every row
    Read { store: String },

    /// Print rows whose key starts with a prefix
    Find { store: String, prefix: String },
}

/// Run a parsed command line.
pub fn execute(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(root) = cli.root {
        config.store_root = root;
    }
    let root = config.store_root.clone();
    let ctx = XContext::from_config(&config)?;

    if load_session(&ctx, &root).context("loading symbol session")? {
        debug!(symbols = ctx.symbol_count(), "restored symbol session");
    }

    let registers = match cli.command {
        Commands::Create { data } => {
            let folded = ctx.create(data.as_bytes())?;
            println!("{}", hex(&folded));
            if cli.verbose {
                println!("  input: {} bytes, padded: {} bytes", data.len(), folded.len());
                println!("  symbols: {}", ctx.symbol_count());
            }
            true
        }

        Commands::Output { data } => {
            println!("{}", hex(&ctx.output(data.as_bytes())?));
            false
        }

        Commands::Pack {
            id,
            input,
            reference,
        } => {
            let data = fs::read(&input).with_context(|| format!("reading {}", input.display()))?;
            let mut container = Container::new(id, &ctx);
            container.set_payload(ctx.create(&data)?);
            let section = if reference || !config.embed_symbols {
                SymbolSection::Reference
            } else {
                SymbolSection::Embedded
            };
            let path = container.persist(&root, section)?;
            println!("Packed {} into {}", input.display(), path.display());
            if cli.verbose {
                println!("  payload: {} bytes", container.payload().len());
                println!("  symbol table: {section:?}");
            }
            true
        }

        Commands::Inspect { id, payload } => {
            let container = Container::load(&root, &id, &ctx)?;
            println!("Container: {}", container.id());
            println!("  widths: {:?}", container.descriptor().widths());
            println!("  block size: {} bytes", container.descriptor().block_size_bytes());
            println!("  payload: {} bytes", container.payload().len());
            println!("  symbols: {}", ctx.symbol_count());
            if payload {
                println!("  {}", hex(container.payload()));
            }
            // an embedded table may have added symbols
            true
        }

        Commands::List => {
            for id in list_containers(&root)? {
                println!("{id}");
            }
            false
        }

        Commands::Chat(ChatCommand::Insert {
            store,
            sentence,
            attachment,
            purpose,
        }) => {
            let table = ConversationTable::new(ctx.clone(), &root);
            table.insert_now(&store, attachment.as_bytes(), purpose.as_bytes(), sentence.as_bytes())?;
            if cli.verbose {
                println!("Appended to {}", table.path(&store).display());
            }
            true
        }

        Commands::Chat(ChatCommand::Read { store }) => {
            let table = ConversationTable::new(ctx.clone(), &root);
            for row in &table.read(&store)? {
                let row = row?;
                println!(
                    "{} {} {} {}",
                    hex(&row.timestamp),
                    hex(&row.attachment),
                    hex(&row.purpose),
                    hex(&row.sentence)
                );
            }
            false
        }

        Commands::Settings(command) => run_settings(&ctx, SettingsTable::new(ctx.clone(), &root), command)?,
    };

    if registers {
        save_session(&ctx, &root).context("saving symbol session")?;
    }
    Ok(())
}

fn run_settings(ctx: &XContext, table: SettingsTable, command: SettingsCommand) -> Result<bool> {
    match command {
        SettingsCommand::Set { store, key, values } => {
            table.update(&store, key.as_bytes(), values.iter().map(String::as_bytes))?;
            debug!(symbols = ctx.symbol_count(), "settings updated");
            Ok(true)
        }
        SettingsCommand::Get { store, key } => {
            let values = table.get(&store, key.as_bytes())?;
            println!("{}", values.iter().map(|v| hex(v)).collect::<Vec<_>>().join(" "));
            Ok(false)
        }
        SettingsCommand::Read { store } => {
            print_rows(&table.read(&store)?);
            Ok(false)
        }
        SettingsCommand::Find { store, prefix } => {
            print_rows(&table.find_prefix(&store, prefix.as_bytes())?);
            Ok(false)
        }
    }
}

fn print_rows(rows: &[SettingRow]) {
    for row in rows {
        let values: Vec<String> = row.values.iter().map(|v| hex(v)).collect();
        println!("{}: {}", hex(&row.key), values.join(" "));
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}
