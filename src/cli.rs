use crate::completion::CompletionKind;
use crate::env::Shell;
use crate::target::TargetFlags;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "gctl",
    version,
    about = "Navigate gardens, projects, seeds and shoots from your shell."
)]
pub struct CliArgs {
    /// Configuration file (default: $GCTL_HOME/gardenctl-v2.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Target the given garden cluster for this command only
    #[arg(long, global = true)]
    pub garden: Option<String>,

    /// Target the given project for this command only
    #[arg(long, global = true, conflicts_with = "seed")]
    pub project: Option<String>,

    /// Target the given seed cluster for this command only
    #[arg(long, global = true)]
    pub seed: Option<String>,

    /// Target the given shoot cluster for this command only
    #[arg(long, global = true)]
    pub shoot: Option<String>,

    /// Target the control plane of the shoot
    #[arg(long, global = true)]
    pub control_plane: bool,

    /// Confirm any access restrictions of the targeted shoot
    #[arg(long, global = true)]
    pub confirm_access_restriction: bool,

    /// tracing filter (for example: warn,gctl=debug)
    #[arg(long, global = true, default_value = "warn")]
    pub log_filter: String,

    /// Abort the command after this many seconds
    #[arg(long, global = true, default_value_t = 30, value_name = "SECONDS")]
    pub request_timeout: u64,

    #[command(subcommand)]
    pub command: Command,
}

impl CliArgs {
    pub fn target_flags(&self) -> TargetFlags {
        TargetFlags::new(
            self.garden.clone().unwrap_or_default(),
            self.project.clone().unwrap_or_default(),
            self.seed.clone().unwrap_or_default(),
            self.shoot.clone().unwrap_or_default(),
            self.control_plane,
        )
        .with_confirm_access_restriction(self.confirm_access_restriction)
    }
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    #[command(flatten)]
    Session(SessionCommand),

    /// Inspect the configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

/// Commands that read or change the target of the current session.
#[derive(Debug, Clone, Subcommand)]
pub enum SessionCommand {
    /// Set the target for subsequent commands of this session
    Target(TargetArgs),

    /// Generate a script that points KUBECONFIG at the targeted cluster
    KubectlEnv {
        shell: Shell,
        /// Generate the script to unset KUBECONFIG
        #[arg(short, long)]
        unset: bool,
    },

    /// Generate a script that configures the cloud provider CLI of the targeted shoot
    ProviderEnv {
        shell: Shell,
        /// Generate the script to reset the cloud provider CLI configuration
        #[arg(short, long)]
        unset: bool,
        /// Generate the script even if there are access restrictions to be confirmed
        #[arg(short, long)]
        force: bool,
    },

    /// Replace the ingress allow-list of one of your bastions
    SshPatch {
        /// Bastion to patch (default: your only bastion of the targeted shoot)
        bastion: Option<String>,
        /// Allowed source range, may be repeated
        #[arg(long = "cidr", value_name = "CIDR")]
        cidrs: Vec<String>,
    },

    #[command(name = "__complete", hide = true)]
    Complete {
        kind: CompletionKind,
        prefix: Option<String>,
    },
}

#[derive(Debug, Clone, Args)]
#[command(args_conflicts_with_subcommands = true)]
pub struct TargetArgs {
    #[command(subcommand)]
    pub command: Option<TargetCommand>,

    /// Name, path (garden/project/shoot) or configured pattern to target
    #[arg(value_name = "NAME_PATTERN")]
    pub pattern: Option<String>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum TargetCommand {
    /// Target a garden
    Garden { name: String },
    /// Target a project
    Project { name: String },
    /// Target a seed
    Seed { name: String },
    /// Target a shoot
    Shoot { name: String },
    /// Target the control plane of the targeted shoot
    ControlPlane,
    /// Unset a target level
    Unset { level: TargetLevel },
    /// Print the current target
    View,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TargetLevel {
    Garden,
    Project,
    Seed,
    Shoot,
    ControlPlane,
}

#[derive(Debug, Clone, Subcommand)]
pub enum ConfigCommand {
    /// Print the loaded configuration
    View,
}
