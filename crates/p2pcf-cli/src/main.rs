//! p2pcf: peer-to-peer node CLI
//!
//! Identity:
//!   init [--name]        - create the node record and seal a fresh seed
//!   whoami               - show node id, public key and derivation counters
//!   passwd               - re-seal the seed under a new password
//!
//! Peers:
//!   peers                - list known peers
//!   handshake <target>   - print a signed handshake for <target>
//!   accept <msg.json>    - handle one received message and print the replies
//!
//! Files:
//!   send <file>          - chunk + encrypt into the work dir, print metadata
//!   receive <json>...    - feed received metadata/chunk messages
//!   status <file-id>     - show received and missing chunks
//!   assemble <file-id>   - verify and reassemble a completed transfer
//!
//! Messages are read from and written to JSON files ("-" means stdin).
//! Logs go to stderr so stdout stays machine-readable.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use p2pcf_core::config::P2pcfConfig;
use p2pcf_core::message::Message;
use p2pcf_crypto::{generate_file_key, FileKey};
use p2pcf_node::{generate_nonce, JsonNodeStore, Node, NodeStore};
use secrecy::SecretString;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::info;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "p2pcf", version, about = "p2pcf peer-to-peer node")]
struct Cli {
    /// Path to p2pcf.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "P2PCF_CONFIG",
        default_value = "~/.config/p2pcf/p2pcf.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides [log] level
    #[arg(long, env = "P2PCF_LOG")]
    log: Option<String>,

    /// Log format; overrides [log] format
    #[arg(long, env = "P2PCF_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new node identity
    Init {
        /// Display name (random if omitted)
        #[arg(long)]
        name: Option<String>,
    },

    /// Show this node's identity
    Whoami,

    /// List known peers as JSON
    Peers,

    /// Print a signed handshake addressed to <target>
    Handshake {
        /// Target node id
        target: String,

        /// Attach a random nonce
        #[arg(long)]
        nonce: bool,

        /// Handshake to an already known peer
        #[arg(long)]
        reconnect: bool,
    },

    /// Handle one received message and print its replies, one per line
    Accept {
        /// Message JSON file ("-" for stdin)
        message: PathBuf,
        /// Sender address
        #[arg(long)]
        ip: String,
        #[arg(long)]
        port: u16,
    },

    /// Chunk and encrypt a file for sending
    Send {
        file: PathBuf,
        #[arg(long)]
        file_id: Option<String>,
        /// Chunk size in bytes (default from [transfer])
        #[arg(long)]
        chunk_size: Option<usize>,
        /// Hex lock key wrapping the file key (random if omitted)
        #[arg(long)]
        lock_key_hex: Option<String>,
        /// Also write metadata.json and chunk-<i>.json into this directory
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Feed received file_metadata / file_chunk messages
    Receive {
        /// Message JSON files
        #[arg(required = true)]
        messages: Vec<PathBuf>,
        #[arg(long, default_value = "0.0.0.0")]
        ip: String,
        #[arg(long, default_value_t = 0)]
        port: u16,
    },

    /// Show which chunks of a transfer are on disk
    Status {
        file_id: String,
        #[arg(long)]
        total: u32,
    },

    /// Reassemble a fully received transfer
    Assemble {
        file_id: String,
        #[arg(long)]
        total: u32,
        /// Hex file key
        #[arg(long, required_unless_present = "lock_key_hex", conflicts_with = "lock_key_hex")]
        key_hex: Option<String>,
        /// Hex lock key; unwraps the file key from the announced metadata
        #[arg(long)]
        lock_key_hex: Option<String>,
        output: PathBuf,
    },

    /// Change the vault password
    Passwd,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let config = P2pcfConfig::load(&config_path)
        .with_context(|| format!("loading config: {}", config_path.display()))?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = cli.log_format.clone().unwrap_or(match config.log.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(&level, &format);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        node = %config.node_path().display(),
        "p2pcf starting"
    );

    match cli.command {
        Commands::Init { name } => cmd_init(&config, name),
        Commands::Whoami => cmd_whoami(&config),
        Commands::Peers => cmd_peers(&config),
        Commands::Handshake {
            target,
            nonce,
            reconnect,
        } => cmd_handshake(&config, &target, nonce, reconnect),
        Commands::Accept { message, ip, port } => cmd_accept(&config, &message, &ip, port),
        Commands::Send {
            file,
            file_id,
            chunk_size,
            lock_key_hex,
            out,
        } => cmd_send(
            &config,
            &file,
            file_id,
            chunk_size,
            lock_key_hex.as_deref(),
            out.as_deref(),
        ),
        Commands::Receive { messages, ip, port } => cmd_receive(&config, &messages, &ip, port),
        Commands::Status { file_id, total } => cmd_status(&config, &file_id, total),
        Commands::Assemble {
            file_id,
            total,
            key_hex,
            lock_key_hex,
            output,
        } => cmd_assemble(
            &config,
            &file_id,
            total,
            key_hex.as_deref(),
            lock_key_hex.as_deref(),
            &output,
        ),
        Commands::Passwd => cmd_passwd(&config),
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Expand `~` in path to the user's home directory
fn expand_tilde(path: &Path) -> PathBuf {
    match path.to_str().and_then(|s| s.strip_prefix("~/")) {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_default();
            PathBuf::from(home).join(rest)
        }
        None => path.to_path_buf(),
    }
}

/// Password from `$var`, or an interactive prompt.
fn read_password(var: &str, prompt: &str) -> Result<SecretString> {
    if let Ok(pw) = std::env::var(var) {
        return Ok(SecretString::from(pw));
    }
    let pw = rpassword::prompt_password(prompt).context("reading password")?;
    Ok(SecretString::from(pw))
}

/// Prompt twice unless `$var` is set.
fn read_new_password(var: &str, prompt: &str) -> Result<SecretString> {
    if let Ok(pw) = std::env::var(var) {
        return Ok(SecretString::from(pw));
    }
    let first = rpassword::prompt_password(prompt).context("reading password")?;
    let second = rpassword::prompt_password("Repeat password: ").context("reading password")?;
    if first != second {
        anyhow::bail!("passwords do not match");
    }
    if first.is_empty() {
        anyhow::bail!("password must not be empty");
    }
    Ok(SecretString::from(first))
}

fn node_store(config: &P2pcfConfig) -> Box<dyn NodeStore> {
    Box::new(JsonNodeStore::new(config.node_path()))
}

fn unlock(config: &P2pcfConfig) -> Result<Node> {
    let password = read_password("P2PCF_PASSWORD", "Node password: ")?;
    unlock_with(config, &password)
}

fn unlock_with(config: &P2pcfConfig, password: &SecretString) -> Result<Node> {
    Node::unlock(node_store(config), password, config)
        .with_context(|| format!("unlocking node record {}", config.node_path().display()))
}

fn read_message(path: &Path) -> Result<Message> {
    let json = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading message from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("reading message: {}", path.display()))?
    };
    Message::from_json(&json).with_context(|| format!("decoding message: {}", path.display()))
}

fn print_message(msg: &Message) -> Result<()> {
    println!("{}", msg.to_json().context("encoding message")?);
    Ok(())
}

fn parse_key(hex: &str, what: &str) -> Result<FileKey> {
    FileKey::from_hex(hex.trim()).with_context(|| format!("parsing {what}"))
}

fn make_progress_bar(total: u64, prefix: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .context("progress template")?
            .progress_chars("=>-"),
    );
    pb.set_prefix(prefix.to_string());
    Ok(pb)
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ── Identity ──────────────────────────────────────────────────────────────────

fn cmd_init(config: &P2pcfConfig, name: Option<String>) -> Result<()> {
    let password = read_new_password("P2PCF_PASSWORD", "New node password: ")?;
    let node = Node::create(node_store(config), name, &password, config)
        .with_context(|| format!("creating node record {}", config.node_path().display()))?;

    println!("node id:  {}", node.node_id());
    println!("name:     {}", node.display_name());
    println!("record:   {}", config.node_path().display());
    Ok(())
}

fn cmd_whoami(config: &P2pcfConfig) -> Result<()> {
    let node = unlock(config)?;
    let indices = node.indices();

    println!("node id:     {}", node.node_id());
    println!("name:        {}", node.display_name());
    println!("public key:  {}", node.master_public_key());
    println!("peers:       {}", node.peers().len());
    println!(
        "indices:     chat={} room={} file={} ephemeral={}",
        indices.chat, indices.room, indices.file, indices.ephemeral
    );
    println!("pending:     {}", node.pending_transfers().len());
    Ok(())
}

fn cmd_passwd(config: &P2pcfConfig) -> Result<()> {
    let old = read_password("P2PCF_PASSWORD", "Current password: ")?;
    let node = unlock_with(config, &old)?;
    let new = read_new_password("P2PCF_NEW_PASSWORD", "New password: ")?;
    node.change_password(&old, &new)
        .context("changing password")?;
    println!("password changed");
    Ok(())
}

// ── Peers ─────────────────────────────────────────────────────────────────────

fn cmd_peers(config: &P2pcfConfig) -> Result<()> {
    let node = unlock(config)?;
    let peers = node.peers();
    println!(
        "{}",
        serde_json::to_string_pretty(&peers).context("encoding peers")?
    );
    Ok(())
}

fn cmd_handshake(
    config: &P2pcfConfig,
    target: &str,
    nonce: bool,
    reconnect: bool,
) -> Result<()> {
    let node = unlock(config)?;
    let msg = if reconnect {
        node.initiate_reconnect(target)
    } else if nonce {
        node.initiate_with_nonce(target, &generate_nonce())
    } else {
        node.initiate_handshake(target)
    }
    .with_context(|| format!("building handshake for {target}"))?;

    print_message(&Message::Handshake(msg))
}

fn cmd_accept(config: &P2pcfConfig, path: &Path, ip: &str, port: u16) -> Result<()> {
    let node = unlock(config)?;
    let msg = read_message(path)?;
    let replies = node
        .handle(&msg, ip, port)
        .with_context(|| format!("handling {} from {ip}:{port}", msg.kind()))?;
    replies.iter().try_for_each(print_message)
}

// ── Files ─────────────────────────────────────────────────────────────────────

fn cmd_send(
    config: &P2pcfConfig,
    file: &Path,
    file_id: Option<String>,
    chunk_size: Option<usize>,
    lock_key_hex: Option<&str>,
    out: Option<&Path>,
) -> Result<()> {
    let node = unlock(config)?;
    let lock_key = match lock_key_hex {
        Some(hex) => parse_key(hex, "lock key")?,
        None => generate_file_key(),
    };
    let chunk_size = config.effective_chunk_size(chunk_size);
    let file_size = std::fs::metadata(file)
        .with_context(|| format!("reading: {}", file.display()))?
        .len();

    let pb = make_progress_bar(file_size.div_ceil(chunk_size as u64), "chunking")?;
    pb.set_message(fmt_bytes(file_size));
    let outgoing = node
        .prepare_send(file, file_id, chunk_size, &lock_key, |index, _| {
            pb.set_position(u64::from(index) + 1)
        })
        .with_context(|| format!("chunking {}", file.display()))?;
    pb.finish_and_clear();

    let metadata = Message::FileMetadata(outgoing.metadata.clone());
    if let Some(dir) = out {
        write_outgoing(&node, dir, &metadata, &outgoing.chunked)?;
    }

    eprintln!("file id:   {}", outgoing.chunked.file_id);
    eprintln!("chunks:    {}", outgoing.chunked.total_chunks);
    eprintln!("file key:  {}", hex::encode(outgoing.file_key.as_bytes()));
    eprintln!("lock key:  {}", hex::encode(lock_key.as_bytes()));
    print_message(&metadata)
}

fn write_outgoing(
    node: &Node,
    dir: &Path,
    metadata: &Message,
    chunked: &p2pcf_transfer::ChunkedFile,
) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    std::fs::write(dir.join("metadata.json"), metadata.to_json()?)
        .with_context(|| format!("writing metadata into {}", dir.display()))?;

    let chunker = node.transfers().chunker();
    for index in 0..chunked.total_chunks {
        let msg = chunker
            .build_chunk_message(&chunked.file_id, index, chunked.total_chunks)
            .with_context(|| format!("reading chunk {index}"))?;
        let path = dir.join(format!("chunk-{index}.json"));
        std::fs::write(&path, Message::FileChunk(msg).to_json()?)
            .with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(())
}

fn cmd_receive(config: &P2pcfConfig, paths: &[PathBuf], ip: &str, port: u16) -> Result<()> {
    let node = unlock(config)?;
    let mut last_ack = None;
    for path in paths {
        let msg = read_message(path)?;
        match &msg {
            Message::FileMetadata(_) | Message::FileChunk(_) => {}
            other => anyhow::bail!(
                "{}: expected file_metadata or file_chunk, got {}",
                path.display(),
                other.kind()
            ),
        }
        let replies = node
            .handle(&msg, ip, port)
            .with_context(|| format!("receiving {}", path.display()))?;
        if let Some(ack) = replies.into_iter().last() {
            last_ack = Some(ack);
        }
    }
    match last_ack {
        Some(ack) => print_message(&ack),
        None => Ok(()),
    }
}

fn cmd_status(config: &P2pcfConfig, file_id: &str, total: u32) -> Result<()> {
    let node = unlock(config)?;
    let (received, request) = node
        .transfers()
        .with_tracker(file_id, total, |t| Ok((t.received_count(), t.request_message())))
        .with_context(|| format!("opening transfer {file_id}"))?;

    if let Ok(pending) = node.pending_transfer(file_id) {
        eprintln!("file:      {} ({})", pending.file_name, fmt_bytes(pending.file_size));
    }
    eprintln!("received:  {received}/{total}");
    print_message(&Message::FileChunkRequest(request))
}

fn cmd_assemble(
    config: &P2pcfConfig,
    file_id: &str,
    total: u32,
    key_hex: Option<&str>,
    lock_key_hex: Option<&str>,
    output: &Path,
) -> Result<()> {
    let node = unlock(config)?;
    let file_key = match (key_hex, lock_key_hex) {
        (Some(hex), _) => parse_key(hex, "file key")?,
        (None, Some(hex)) => node
            .unlock_file_key(file_id, &parse_key(hex, "lock key")?)
            .context("unwrapping file key")?,
        (None, None) => anyhow::bail!("either --key-hex or --lock-key-hex is required"),
    };

    let bytes = if node.pending_transfer(file_id).is_ok() {
        node.complete_transfer(file_id, output, &file_key)
    } else {
        node.transfers()
            .with_tracker(file_id, total, |t| t.assemble_to(output, &file_key))
    }
    .with_context(|| format!("assembling {file_id} into {}", output.display()))?;

    eprintln!("wrote {} to {}", fmt_bytes(bytes), output.display());
    Ok(())
}
