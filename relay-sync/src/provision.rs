//! Ensuring groups, accounts and projects exist on downstream.

use relay_core::{GroupSpec, ProjectSpec, UserSpec};

use crate::context::SyncContext;
use crate::error::SyncError;
use crate::query::{parse_groups, GroupEntry};
use crate::remote::{quote, CommandOutput};

/// Whether a failed create command failed only because the object exists.
pub fn is_already_exists(output: &CommandOutput) -> bool {
    output.status == 1 && output.output.contains("already exists")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Created,
    AlreadyPresent,
}

pub fn group_lookup_command(group: &GroupSpec) -> String {
    format!("gerrit ls-groups -q {} --verbose", quote(&group.name))
}

pub fn group_create_command(group: &GroupSpec) -> String {
    let mut command = format!("gerrit create-group {}", quote(&group.name));
    if let Some(description) = group.description.as_deref().filter(|d| !d.is_empty()) {
        command.push_str(&format!(" --description {}", quote(description)));
    }
    if let Some(owner) = group.owner.as_deref().filter(|o| !o.is_empty()) {
        command.push_str(&format!(" --owner {}", quote(owner)));
    }
    command
}

pub fn user_create_command(user: &UserSpec) -> String {
    let mut command = "gerrit create-account".to_string();
    let mut flag = |name: &str, value: &str| command.push_str(&format!(" --{name} {}", quote(value)));
    if let Some(key) = user.ssh_key.as_deref().filter(|v| !v.is_empty()) {
        flag("ssh-key", key);
    }
    for group in &user.groups {
        flag("group", group);
    }
    if let Some(full_name) = user.full_name.as_deref().filter(|v| !v.is_empty()) {
        flag("full-name", full_name);
    }
    if let Some(email) = user.email.as_deref().filter(|v| !v.is_empty()) {
        flag("email", email);
    }
    if let Some(password) = user.http_password.as_deref().filter(|v| !v.is_empty()) {
        flag("http-password", password);
    }
    command.push(' ');
    command.push_str(&quote(&user.username));
    command
}

pub fn project_create_command(project: &ProjectSpec) -> String {
    format!("gerrit create-project {}", quote(&project.name))
}

fn creation_failed(command: String, output: CommandOutput) -> SyncError {
    SyncError::Remote {
        command,
        status: output.status,
        output: output.output.trim_end().to_string(),
    }
}

/// Create `group` unless a lookup finds it.
pub fn ensure_group(ctx: &SyncContext, group: &GroupSpec) -> Result<Presence, SyncError> {
    let remote = &*ctx.downstream;
    tracing::info!(group = %group.name, "ensuring group is present");
    if ctx.remote.exec_once(remote, &group_lookup_command(group))?.success() {
        tracing::info!(group = %group.name, "group already exists");
        return Ok(Presence::AlreadyPresent);
    }

    let command = group_create_command(group);
    let output = ctx.remote.exec_once(remote, &command)?;
    if output.success() {
        tracing::info!(group = %group.name, "group created");
        Ok(Presence::Created)
    } else if is_already_exists(&output) {
        Ok(Presence::AlreadyPresent)
    } else {
        Err(creation_failed(command, output))
    }
}

pub fn ensure_user(ctx: &SyncContext, user: &UserSpec) -> Result<Presence, SyncError> {
    tracing::info!(user = %user.username, "ensuring account is present");
    let command = user_create_command(user);
    let output = ctx.remote.exec_once(&ctx.downstream, &command)?;
    if output.success() {
        tracing::info!(user = %user.username, "account created");
        Ok(Presence::Created)
    } else if is_already_exists(&output) {
        tracing::info!(user = %user.username, "account already exists");
        Ok(Presence::AlreadyPresent)
    } else {
        Err(creation_failed(command, output))
    }
}

/// Run `create-project` for projects marked `create`; `None` otherwise.
pub fn ensure_project_created(
    ctx: &SyncContext,
    project: &ProjectSpec,
) -> Result<Option<Presence>, SyncError> {
    if !project.create {
        return Ok(None);
    }
    let command = project_create_command(project);
    let output = ctx.remote.exec_once(&ctx.downstream, &command)?;
    if output.success() {
        tracing::info!(project = %project.name, "project created");
        Ok(Some(Presence::Created))
    } else if is_already_exists(&output) {
        tracing::debug!(project = %project.name, "project already exists");
        Ok(Some(Presence::AlreadyPresent))
    } else {
        Err(creation_failed(command, output))
    }
}

/// Every group visible on downstream.
pub fn list_groups(ctx: &SyncContext) -> Result<Vec<GroupEntry>, SyncError> {
    let output = ctx
        .remote
        .exec_once(&ctx.downstream, "gerrit ls-groups --verbose")?;
    if !output.success() {
        return Err(SyncError::Query {
            subject: "groups".to_string(),
            reason: output.output.trim_end().to_string(),
        });
    }
    Ok(parse_groups(&output.output))
}
