use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "iam-audit")]
#[command(about = "Inventory and filter OCI IAM policy statements and dynamic groups")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// OCI config profile used to sign requests
    #[arg(long, global = true, env = "OCI_CLI_PROFILE", default_value = "DEFAULT")]
    pub profile: String,

    /// Authenticate as the instance principal instead of a config profile
    #[arg(long, global = true)]
    pub instance_principal: bool,

    /// Path to the OCI config file (default: ~/.oci/config)
    #[arg(long, global = true, env = "OCI_CLI_CONFIG_FILE")]
    pub oci_config: Option<PathBuf>,

    /// Concurrent compartment loads
    #[arg(long, global = true)]
    pub threads: Option<usize>,

    /// Serve API results from the local cache when present
    #[arg(long, global = true)]
    pub use_cache: bool,

    /// Only load the root compartment
    #[arg(long, global = true)]
    pub no_recurse: bool,

    /// Directory for JSON exports
    #[arg(long, global = true)]
    pub output_dir: Option<PathBuf>,

    /// Debug logging
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(short, long, global = true)]
    pub format: Option<OutputFormat>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List policy statements across the compartment tree
    Policies(PolicyArgs),
    /// List dynamic groups and their matching rules
    DynamicGroups(DynamicGroupArgs),
    /// Load policies and dynamic groups in one run
    Analyze(AnalyzeArgs),
    /// Manage CLI configuration
    Config(ConfigArgs),
}

#[derive(Args, Clone, Default)]
pub struct PolicyFilterArgs {
    /// Subject (group, dynamic-group, service, any-user)
    #[arg(short, long)]
    pub subject: Option<String>,

    /// Verb (inspect, read, use, manage)
    #[arg(short, long)]
    pub verb: Option<String>,

    /// Resource type or permission
    #[arg(short, long)]
    pub resource: Option<String>,

    /// Location (tenancy, compartment name)
    #[arg(short, long)]
    pub location: Option<String>,

    /// Compartment name or OCID; keeps its subtree
    #[arg(short = 'H', long)]
    pub hierarchy: Option<String>,

    /// Text of the where clause
    #[arg(short, long)]
    pub condition: Option<String>,

    /// Policy name
    #[arg(short, long)]
    pub policy_name: Option<String>,

    /// Anything in the statement text
    #[arg(short, long)]
    pub text: Option<String>,
}

#[derive(Args, Clone, Default)]
pub struct DynamicGroupFilterArgs {
    /// Identity domain
    #[arg(long)]
    pub domain: Option<String>,

    /// Dynamic group name
    #[arg(long)]
    pub name: Option<String>,

    /// OCID referenced by a matching rule
    #[arg(long)]
    pub ocid: Option<String>,

    /// Rule attribute or resource type (e.g. instance, fnfunc)
    #[arg(long = "type")]
    pub rule_type: Option<String>,
}

#[derive(Args)]
pub struct PolicyArgs {
    #[command(flatten)]
    pub filter: PolicyFilterArgs,

    /// Write the result to policyoutput-<tenancy>.json
    #[arg(short, long)]
    pub write_json: bool,
}

#[derive(Args)]
pub struct DynamicGroupArgs {
    #[command(flatten)]
    pub filter: DynamicGroupFilterArgs,

    /// Write the result to dynamicgroupoutput-<tenancy>.json
    #[arg(short, long)]
    pub write_json: bool,
}

#[derive(Args)]
pub struct AnalyzeArgs {
    #[command(flatten)]
    pub policy: PolicyFilterArgs,

    #[command(flatten)]
    pub dynamic_group: DynamicGroupFilterArgs,

    /// Write both exports
    #[arg(short, long)]
    pub write_json: bool,
}

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set(ConfigSetArgs),
}

#[derive(Args)]
pub struct ConfigSetArgs {
    /// Configuration key (threads, cache_dir, output_dir, max_retries, format)
    pub key: String,
    /// Configuration value
    pub value: String,
}
