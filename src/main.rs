//! patricia CLI - command line interface for patricia_db
//!
//! Each invocation opens the user and node stores, loads the tree named by
//! `--root` (or an empty tree), runs one command and closes the stores.
//! Mutating commands print the new root, which is passed back with `--root`
//! on the next call.

use anyhow::Context;
use clap::{Parser, Subcommand};
use patricia_db::{diff_roots, DiffEntry, Hash, MerkleTrie, StoreConfig, EMPTY_ROOT};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "patricia")]
#[command(about = "A content-addressed Merkle-Patricia trie over embedded stores")]
#[command(version)]
struct Cli {
    /// Directory of the user store (key to value)
    #[arg(long, default_value = "user.db")]
    user_store: PathBuf,

    /// Directory of the node store (node hash to node record)
    #[arg(long, default_value = "nodes.db")]
    node_store: PathBuf,

    /// Root hash of the tree to load (hex); an empty tree when omitted
    #[arg(short, long)]
    root: Option<String>,

    /// Output format (json or text)
    #[arg(short, long, default_value = "json")]
    format: OutputFormat,

    /// Store configuration file (JSON), applied to both stores
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is not set
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a value under a key
    Put {
        key: String,
        value: String,
    },

    /// Look up a key
    Get {
        key: String,
        /// Include the visited nodes in the output
        #[arg(long)]
        trace: bool,
    },

    /// Remove a key
    Delete {
        key: String,
    },

    /// Show the root hash
    Root,

    /// Dump the tree structure
    Print,

    /// List entries in key order
    List {
        /// Only keys starting with this prefix
        #[arg(short, long, default_value = "")]
        prefix: String,
    },

    /// Check every reachable node and report counts
    Verify,

    /// Compare the entries of two roots
    Diff {
        /// Old root hash (hex, or "empty")
        from: String,
        /// New root hash (hex, or "empty")
        to: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config = match &cli.config {
        Some(path) => StoreConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => StoreConfig::default(),
    };
    let root = match &cli.root {
        Some(root) => parse_root(root)?,
        None => EMPTY_ROOT,
    };

    let mut trie = MerkleTrie::open_with_config(
        root,
        &cli.user_store,
        config.clone(),
        &cli.node_store,
        config,
    )?;
    let result = run(&cli, &mut trie);
    trie.close_data_stores()?;
    result
}

fn run(cli: &Cli, trie: &mut MerkleTrie) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Put { key, value } => {
            trie.put(key.as_bytes(), value.as_bytes())?;
            output(
                cli.format,
                &serde_json::json!({
                    "status": "ok",
                    "key": key,
                    "root": trie.root_hash().to_hex()
                }),
            );
        }

        Commands::Get { key, trace } => {
            let (value, stack) = trie.get(key.as_bytes())?;
            let mut result = match value {
                Some(value) => serde_json::json!({
                    "key": key,
                    "value": String::from_utf8_lossy(&value)
                }),
                None => serde_json::json!({
                    "status": "error",
                    "message": format!("Key not found: {}", key)
                }),
            };
            if *trace {
                result["trace"] = stack
                    .iter()
                    .map(|entry| {
                        serde_json::json!({
                            "hash": entry.hash.to_hex(),
                            "matched": entry.matched.to_hex(),
                            "node": entry.node.to_string()
                        })
                    })
                    .collect();
            }
            output(cli.format, &result);
            if result.get("status").is_some() {
                trie.close_data_stores()?;
                std::process::exit(1);
            }
        }

        Commands::Delete { key } => {
            trie.delete(key.as_bytes())?;
            output(
                cli.format,
                &serde_json::json!({
                    "status": "ok",
                    "key": key,
                    "root": trie.root_hash().to_hex()
                }),
            );
        }

        Commands::Root => {
            output(
                cli.format,
                &serde_json::json!({
                    "root": trie.root_hash().to_hex(),
                    "empty": trie.is_empty()
                }),
            );
        }

        Commands::Print => {
            print!("{}", trie.print()?);
        }

        Commands::List { prefix } => {
            let entries = trie.list_prefix(prefix.as_bytes())?;
            let items: Vec<_> = entries
                .iter()
                .map(|(k, v)| {
                    serde_json::json!({
                        "key": String::from_utf8_lossy(k),
                        "value": String::from_utf8_lossy(v)
                    })
                })
                .collect();
            output(
                cli.format,
                &serde_json::json!({
                    "count": items.len(),
                    "entries": items
                }),
            );
        }

        Commands::Verify => {
            let stats = trie.verify()?;
            output(
                cli.format,
                &serde_json::json!({
                    "status": "ok",
                    "root": trie.root_hash().to_hex(),
                    "nodes": stats.nodes(),
                    "stats": stats
                }),
            );
        }

        Commands::Diff { from, to } => {
            let from_root = parse_root(from)?;
            let to_root = parse_root(to)?;
            let diff = diff_roots(&*trie, from_root, to_root)?;

            let entries: Vec<_> = diff
                .entries
                .iter()
                .map(|e| {
                    let change = match e {
                        DiffEntry::Added { .. } => "added",
                        DiffEntry::Removed { .. } => "removed",
                        DiffEntry::Modified { .. } => "modified",
                    };
                    serde_json::json!({
                        "key": String::from_utf8_lossy(e.key()),
                        "change": change
                    })
                })
                .collect();

            output(
                cli.format,
                &serde_json::json!({
                    "from": from_root.to_hex(),
                    "to": to_root.to_hex(),
                    "added": diff.added_count(),
                    "removed": diff.removed_count(),
                    "modified": diff.modified_count(),
                    "entries": entries
                }),
            );
        }
    }

    Ok(())
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_root(reference: &str) -> anyhow::Result<Hash> {
    if reference == "empty" {
        return Ok(EMPTY_ROOT);
    }
    Hash::from_hex(reference).map_err(|_| anyhow::anyhow!("Invalid root hash: {}", reference))
}

fn output(format: OutputFormat, value: &serde_json::Value) {
    let rendered = match format {
        OutputFormat::Json => serde_json::to_string(value),
        OutputFormat::Text => serde_json::to_string_pretty(value),
    };
    match rendered {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("failed to render output: {}", e),
    }
}
