//! `gerrit-relay sync`: provision groups, accounts and projects.

use std::path::Path;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Args;

use relay_daemon::logging;
use relay_sync::pipeline::{self, ProjectReport, SyncReport, SyncScope};
use relay_sync::project_sync::SourceSyncOutcome;
use relay_sync::{MirrorOutcome, Presence, SyncContext};

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Only this configured project (implies --skip-groups --skip-users).
    #[arg(long)]
    pub project: Option<String>,

    #[arg(long)]
    pub skip_groups: bool,

    #[arg(long)]
    pub skip_users: bool,

    #[arg(long, conflicts_with = "project")]
    pub skip_projects: bool,
}

impl SyncArgs {
    pub fn scope(&self) -> SyncScope {
        match &self.project {
            Some(name) => SyncScope::project(name.clone()),
            None => SyncScope {
                groups: !self.skip_groups,
                users: !self.skip_users,
                projects: !self.skip_projects,
                project: None,
            },
        }
    }

    pub fn run(self, config_path: &Path) -> Result<()> {
        let config = crate::load_config(config_path)?;
        logging::init_stderr(&config.logging.level);

        if let Some(name) = &self.project {
            if config.project(name).is_none() {
                bail!("project '{name}' is not in {}", config_path.display());
            }
        }

        let started = Instant::now();
        let ctx = SyncContext::system(config);
        let report = pipeline::run(&ctx, &self.scope()).context("sync failed")?;
        print_report(&report);
        println!("sync finished in {:.1}s", started.elapsed().as_secs_f64());

        if !report.failures.is_empty() {
            bail!("{} item(s) could not be provisioned", report.failures.len());
        }
        Ok(())
    }
}

pub(crate) fn presence(p: Presence) -> &'static str {
    match p {
        Presence::Created => "created",
        Presence::AlreadyPresent => "already exists",
    }
}

pub(crate) fn print_report(report: &SyncReport) {
    for (name, p) in &report.groups {
        println!("✓ group '{name}' {}", presence(*p));
    }
    for (name, p) in &report.users {
        println!("✓ user '{name}' {}", presence(*p));
    }
    for failure in &report.failures {
        println!("✗ {failure}");
    }
    for project in &report.projects {
        print_project(project);
    }
}

fn print_project(project: &ProjectReport) {
    println!("✓ project '{}'", project.name);
    if let Some(p) = project.created {
        println!("  ·  {}", presence(p));
    }
    match &project.config {
        Some(MirrorOutcome::Pushed { rewritten }) => {
            println!("  ✎  configuration pushed ({})", rewritten.join(", "))
        }
        Some(MirrorOutcome::AlreadyMirrored) => println!("  ·  configuration already mirrored"),
        None => {}
    }
    match &project.source {
        SourceSyncOutcome::Synced { stale, pruned } if *pruned => {
            println!("  ✎  source synced, {} stale ref(s) pruned", stale.len())
        }
        SourceSyncOutcome::Synced { stale, .. } => {
            println!("  ✎  source synced, {} stale ref(s) kept", stale.len())
        }
        SourceSyncOutcome::Skipped => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_flag_narrows_scope() {
        let args = SyncArgs {
            project: Some("nova".to_string()),
            skip_groups: false,
            skip_users: false,
            skip_projects: false,
        };
        assert_eq!(args.scope(), SyncScope::project("nova"));
    }

    #[test]
    fn skip_flags_disable_passes() {
        let args = SyncArgs {
            project: None,
            skip_groups: true,
            skip_users: false,
            skip_projects: true,
        };
        let scope = args.scope();
        assert!(!scope.groups && scope.users && !scope.projects);
    }
}
