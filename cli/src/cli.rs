use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "muzzle")]
#[command(version)]
#[command(about = "Sandboxed script engine speaking newline-delimited JSON over stdio")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to config file (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output (on stderr)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve load/describe/execute/unload/kill requests for many sessions
    Serve(ServeArgs),

    /// Serve describe/execute requests against one script compiled on first use
    Single(SingleArgs),
}

#[derive(Args)]
pub struct ServeArgs {
    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Args)]
pub struct SingleArgs {
    /// Script to run
    #[arg(long)]
    pub script: PathBuf,

    /// Source fragment evaluated before the script (can be repeated, kept in order)
    #[arg(long = "include")]
    pub includes: Vec<PathBuf>,

    /// JSON file holding an object of globals to inject
    #[arg(long)]
    pub variables: Option<PathBuf>,

    #[command(flatten)]
    pub common: CommonArgs,
}

/// Common arguments shared across subcommands
#[derive(Args)]
pub struct CommonArgs {
    // === Network ===
    /// Network policy applied to the granted function's requests
    #[arg(long, default_value = "deny", value_enum)]
    pub network: NetworkMode,

    /// Domain to allow (can be repeated, supports wildcards like *.example.com)
    #[arg(long = "allow-domain")]
    pub allow_domains: Vec<String>,

    /// Function allowed to use `fetch` while it runs
    #[arg(long)]
    pub grant_function: Option<String>,

    /// Never grant network access to any function
    #[arg(long, conflicts_with = "grant_function")]
    pub no_network_grant: bool,

    /// Timeout for a single fetch in seconds
    #[arg(long)]
    pub fetch_timeout_secs: Option<u64>,

    // === Capabilities ===
    /// Provide `console` to scripts
    #[arg(long, overrides_with = "no_console")]
    pub console: bool,

    #[arg(long, hide = true)]
    pub no_console: bool,

    /// Provide `setTimeout` / `clearTimeout` to scripts
    #[arg(long, overrides_with = "no_timers")]
    pub timers: bool,

    #[arg(long, hide = true)]
    pub no_timers: bool,

    /// Provide `TextEncoder` / `TextDecoder` to scripts
    #[arg(long, overrides_with = "no_text_codec")]
    pub text_codec: bool,

    #[arg(long, hide = true)]
    pub no_text_codec: bool,

    /// Built-in module `require` may load (can be repeated, replaces the default list)
    #[arg(long = "module")]
    pub modules: Vec<String>,

    /// Additional global to replace with a throwing stub (can be repeated)
    #[arg(long = "deny-global")]
    pub deny_globals: Vec<String>,

    // === Resource Limits ===
    /// Maximum heap size per session in bytes
    #[arg(long)]
    pub max_memory: Option<usize>,

    /// Maximum stack size per session in bytes
    #[arg(long)]
    pub max_stack: Option<usize>,

    /// Time limit for a single command in milliseconds
    #[arg(long)]
    pub max_execution_ms: Option<u64>,

    // === Transport ===
    /// Maximum size of one request line in bytes
    #[arg(long)]
    pub max_request_bytes: Option<usize>,
}

#[derive(ValueEnum, Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum NetworkMode {
    /// Deny all network access
    #[default]
    Deny,
    /// Allow all network access
    Allow,
    /// Allow only specified domains
    AllowList,
}
