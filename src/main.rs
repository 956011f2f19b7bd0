mod access;
mod bastion;
mod cli;
mod client;
mod clock;
mod completion;
mod config;
mod env;
mod error;
mod factory;
mod gardener;
mod kubeconfig;
mod session;
mod target;

use anyhow::{Context, Result, anyhow};
use bastion::{BastionScope, SshPatchOptions};
use clap::Parser;
use cli::{
    CliArgs, Command, ConfigCommand, SessionCommand, TargetArgs, TargetCommand, TargetLevel,
};
use client::KubeClientFactory;
use clock::SystemClock;
use config::Config;
use env::ProviderEnvOptions;
use factory::Factory;
use session::{Session, resolve_session_id_from_env};
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_tracing(&args.log_filter)?;

    let timeout = Duration::from_secs(args.request_timeout.max(1));
    tokio::select! {
        result = run(args) => result,
        _ = tokio::signal::ctrl_c() => Err(anyhow!("interrupted")),
        _ = tokio::time::sleep(timeout) => {
            Err(anyhow!("command did not finish within {}s", timeout.as_secs()))
        }
    }
}

fn init_tracing(level_filter: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level_filter)
        .or_else(|_| EnvFilter::try_new("warn"))
        .context("failed to initialize tracing filter")?;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr)
        .try_init();

    Ok(())
}

async fn run(args: CliArgs) -> Result<()> {
    let config = Config::load(args.config.as_deref())?;
    let flags = args.target_flags();
    let command = match args.command {
        Command::Config {
            command: ConfigCommand::View,
        } => {
            print!("{}", config.to_yaml()?);
            return Ok(());
        }
        Command::Session(command) => command,
    };

    let session_id = resolve_session_id_from_env()?;
    let session = Session::create(&std::env::temp_dir(), &session_id)
        .context("failed to prepare session directory")?;
    debug!(session = session.id(), "session resolved");

    let factory = Factory::new(
        config,
        session,
        flags,
        Arc::new(KubeClientFactory),
        Arc::new(SystemClock),
    );
    execute(&factory, command).await
}

async fn execute(factory: &Factory, command: SessionCommand) -> Result<()> {
    match command {
        SessionCommand::Target(target) => execute_target(factory, target).await,
        SessionCommand::KubectlEnv { shell, unset } => {
            let script = env::kubectl_env(&factory.manager(), shell, unset).await?;
            println!("{script}");
            Ok(())
        }
        SessionCommand::ProviderEnv {
            shell,
            unset,
            force,
        } => {
            let options = ProviderEnvOptions {
                shell,
                unset,
                force,
            };
            let script = env::provider_env(&factory.manager(), options).await?;
            println!("{script}");
            Ok(())
        }
        SessionCommand::SshPatch { bastion, cidrs } => {
            let manager = factory.manager();
            let scope = BastionScope::for_current_target(&manager).await?;
            let mut options = SshPatchOptions::new(cidrs, bastion, factory.clock());
            if let Some(notice) = options.complete(&scope).await? {
                println!("{notice}");
            }
            options.validate()?;

            let patched = options.run(&scope).await?;
            println!(
                "Patched ingress of bastion {} to {}",
                patched.name(),
                patched.ingress_cidrs().join(", ")
            );
            if !patched.is_ready() {
                warn!(bastion = patched.name(), "bastion is not ready yet");
            }
            Ok(())
        }
        SessionCommand::Complete { kind, prefix } => {
            let manager = factory.file_manager();
            let clock = factory.clock();
            let prefix = prefix.unwrap_or_default();
            let flags = factory.target_flags();
            match completion::complete(&manager, flags, clock.as_ref(), kind, &prefix).await {
                Ok(suggestions) => {
                    for suggestion in suggestions {
                        println!("{suggestion}");
                    }
                }
                Err(error) => debug!(%error, "completion failed"),
            }
            Ok(())
        }
    }
}

async fn execute_target(factory: &Factory, args: TargetArgs) -> Result<()> {
    let manager = factory.manager();

    let Some(command) = args.command else {
        let pattern = args
            .pattern
            .context("either a NAME_PATTERN or a target subcommand is required")?;
        manager.target_match_pattern(&pattern).await?;
        let target = manager.current_target()?;
        println!("Successfully targeted {target}");
        return print_access_restrictions(&manager).await;
    };

    match command {
        TargetCommand::Garden { name } => {
            manager.target_garden(&name).await?;
            println!("Successfully targeted garden {name:?}");
        }
        TargetCommand::Project { name } => {
            manager.target_project(&name).await?;
            println!("Successfully targeted project {name:?}");
        }
        TargetCommand::Seed { name } => {
            manager.target_seed(&name).await?;
            println!("Successfully targeted seed {name:?}");
        }
        TargetCommand::Shoot { name } => {
            manager.target_shoot(&name).await?;
            println!("Successfully targeted shoot {name:?}");
            print_access_restrictions(&manager).await?;
        }
        TargetCommand::ControlPlane => {
            manager.target_control_plane().await?;
            let target = manager.current_target()?;
            println!(
                "Successfully targeted control plane of shoot {:?}",
                target.shoot_name()
            );
        }
        TargetCommand::Unset { level } => {
            let message = match level {
                TargetLevel::Garden => {
                    format!("garden {:?}", manager.unset_target_garden().await?)
                }
                TargetLevel::Project => {
                    format!("project {:?}", manager.unset_target_project().await?)
                }
                TargetLevel::Seed => format!("seed {:?}", manager.unset_target_seed().await?),
                TargetLevel::Shoot => format!("shoot {:?}", manager.unset_target_shoot().await?),
                TargetLevel::ControlPlane => {
                    manager.unset_target_control_plane().await?;
                    "control plane".to_string()
                }
            };
            println!("Successfully unset targeted {message}");
        }
        TargetCommand::View => {
            let target = manager.current_target()?;
            let raw = serde_yaml::to_string(&target).context("failed to render target")?;
            print!("{raw}");
        }
    }

    Ok(())
}

async fn print_access_restrictions(manager: &target::Manager) -> Result<()> {
    let target = manager.current_target()?;
    let messages = manager.access_restrictions(&target).await?;
    if !messages.is_empty() {
        println!("{messages}");
    }
    Ok(())
}
