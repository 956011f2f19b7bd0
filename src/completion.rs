use crate::bastion::{BastionScope, bastion_name_completions};
use crate::clock::Clock;
use crate::error::Result;
use crate::target::{Manager, Target, TargetFlags};
use clap::ValueEnum;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CompletionKind {
    Garden,
    Project,
    Seed,
    Shoot,
    Bastion,
}

/// Target to complete against: the persisted target with the flags typed
/// so far layered on top. Never written back.
pub fn completion_target(manager: &Manager, flags: &TargetFlags) -> Result<Target> {
    Ok(flags.completion_overlay(&manager.current_target()?))
}

/// Suggestions for `kind` starting with `prefix`.
///
/// `manager` must read the persisted target only; `flags` are the target
/// flags already present on the command line being completed.
pub async fn complete(
    manager: &Manager,
    flags: &TargetFlags,
    clock: &dyn Clock,
    kind: CompletionKind,
    prefix: &str,
) -> Result<Vec<String>> {
    let target = completion_target(manager, flags)?;
    debug!(?kind, %target, prefix, "completing");

    let names = match kind {
        CompletionKind::Garden => manager.garden_names()?,
        CompletionKind::Project => manager.project_names_for_target(&target).await?,
        CompletionKind::Seed => manager.seed_names_for_target(&target).await?,
        CompletionKind::Shoot => manager.shoot_names_for_target(&target).await?,
        CompletionKind::Bastion => {
            let scope = BastionScope::for_target(manager, &target).await?;
            return bastion_name_completions(&scope, clock, prefix).await;
        }
    };
    Ok(filter_by_prefix(names, prefix))
}

pub fn filter_by_prefix(names: Vec<String>, prefix: &str) -> Vec<String> {
    names
        .into_iter()
        .filter(|name| name.starts_with(prefix))
        .collect()
}
