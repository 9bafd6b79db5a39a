//! Shared provisioning entrypoint used by the CLI and the daemon.

use relay_core::{ConfigError, ProjectSpec};

use crate::config_mirror::{ConfigMirror, MirrorOutcome};
use crate::context::SyncContext;
use crate::error::SyncError;
use crate::project_sync::{sync_source, SourceSyncOutcome};
use crate::provision::{ensure_group, ensure_project_created, ensure_user, list_groups, Presence};
use crate::query::GroupEntry;

pub const ALL_PROJECTS: &str = "All-Projects";

/// What a provisioning run touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncScope {
    pub groups: bool,
    pub users: bool,
    pub projects: bool,
    /// Restrict the project pass to one configured project.
    pub project: Option<String>,
}

impl SyncScope {
    pub fn all() -> Self {
        Self {
            groups: true,
            users: true,
            projects: true,
            project: None,
        }
    }

    /// Only the project pass, for one project.
    pub fn project(name: impl Into<String>) -> Self {
        Self {
            groups: false,
            users: false,
            projects: true,
            project: Some(name.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectReport {
    pub name: String,
    pub created: Option<Presence>,
    pub config: Option<MirrorOutcome>,
    pub source: SourceSyncOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncReport {
    pub groups: Vec<(String, Presence)>,
    pub users: Vec<(String, Presence)>,
    pub projects: Vec<ProjectReport>,
    /// Groups or accounts that could not be created, with the reason.
    pub failures: Vec<String>,
}

/// Run the provisioning pipeline for a scope.
///
/// Group and account failures are collected in the report and do not stop
/// the run. A failing project aborts it.
pub fn run(ctx: &SyncContext, scope: &SyncScope) -> Result<SyncReport, SyncError> {
    let config = &ctx.config;
    let mut report = SyncReport::default();

    if scope.groups {
        for group in &config.groups {
            match ensure_group(ctx, group) {
                Ok(presence) => report.groups.push((group.name.clone(), presence)),
                Err(e) => {
                    tracing::error!(group = %group.name, error = %e, "unable to create group");
                    report.failures.push(format!("group {}: {e}", group.name));
                }
            }
        }
    }

    if scope.users {
        for user in &config.users {
            match ensure_user(ctx, user) {
                Ok(presence) => report.users.push((user.username.clone(), presence)),
                Err(e) => {
                    tracing::error!(user = %user.username, error = %e, "unable to create account");
                    report.failures.push(format!("user {}: {e}", user.username));
                }
            }
        }
    }

    if scope.projects {
        let selected: Vec<&ProjectSpec> = config
            .projects
            .iter()
            .filter(|p| scope.project.as_deref().map_or(true, |name| p.name == name))
            .collect();
        if let (Some(name), true) = (scope.project.as_deref(), selected.is_empty()) {
            tracing::error!(project = name, "project not in configuration");
        }

        let groups = if selected.iter().any(|p| p.config.is_some()) {
            list_groups(ctx)?
        } else {
            Vec::new()
        };
        for spec in selected {
            report.projects.push(ensure_project(ctx, spec, &groups)?);
        }
    }

    Ok(report)
}

/// Create the project if asked to, mirror its configuration, then sync its
/// source repository.
pub fn ensure_project(
    ctx: &SyncContext,
    spec: &ProjectSpec,
    groups: &[GroupEntry],
) -> Result<ProjectReport, SyncError> {
    tracing::info!(project = %spec.name, "ensuring project");
    let created = ensure_project_created(ctx, spec)?;
    let config = match &spec.config {
        Some(source) => Some(ConfigMirror::new(ctx).mirror(&spec.name, groups, source)?),
        None => None,
    };
    let source = sync_source(ctx, spec)?;
    Ok(ProjectReport {
        name: spec.name.clone(),
        created,
        config,
        source,
    })
}

/// Ensure groups and accounts, then mirror the site-wide `All-Projects`
/// configuration.
pub fn setup(ctx: &SyncContext) -> Result<(SyncReport, MirrorOutcome), SyncError> {
    let source = ctx
        .config
        .gerrit
        .all_projects_config
        .clone()
        .ok_or(ConfigError::Invalid {
            field: "gerrit.all-projects-config",
            reason: "setup needs a project.config source for All-Projects".to_string(),
        })?;

    let scope = SyncScope {
        projects: false,
        ..SyncScope::all()
    };
    let report = run(ctx, &scope)?;
    let groups = list_groups(ctx)?;
    let outcome = ConfigMirror::new(ctx).mirror(ALL_PROJECTS, &groups, &source)?;
    Ok((report, outcome))
}
