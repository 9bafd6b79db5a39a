//! Parsing of Gerrit query and listing output.

use serde::Deserialize;

use relay_core::numbers::{i32_lenient, opt_u64_lenient, u64_lenient};
use relay_core::{ChangeId, Vote};

use crate::error::SyncError;
use crate::remote::quote;

/// What a change query told us about one patchset.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChangeRecord {
    pub number: Option<u64>,
    /// Votes recorded on the requested patchset; empty when the patchset is
    /// not in the result.
    pub votes: Vec<Vote>,
}

pub fn change_query_command(change: &ChangeId) -> String {
    format!(
        "gerrit query change:{} --all-approvals limit:1 --format JSON",
        quote(&change.0)
    )
}

#[derive(Deserialize)]
struct QueryRow {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default, deserialize_with = "opt_u64_lenient")]
    number: Option<u64>,
    #[serde(rename = "patchSets", default)]
    patch_sets: Option<Vec<QueryPatchSet>>,
}

#[derive(Deserialize)]
struct QueryPatchSet {
    #[serde(deserialize_with = "u64_lenient")]
    number: u64,
    #[serde(default)]
    approvals: Vec<QueryApproval>,
}

#[derive(Deserialize)]
struct QueryApproval {
    #[serde(rename = "type")]
    label: String,
    #[serde(deserialize_with = "i32_lenient")]
    value: i32,
}

/// Parse `gerrit query --format JSON` output for `change`, keeping the votes
/// on `patchset`.
///
/// The first line is the change; a trailing `stats` row follows it. A result
/// whose first row is the stats row means the change was not found.
pub fn parse_change_record(
    output: &str,
    change: &ChangeId,
    patchset: u64,
) -> Result<ChangeRecord, SyncError> {
    let not_found = || SyncError::Query {
        subject: format!("change {change}"),
        reason: "no such change".to_string(),
    };

    let first = output
        .lines()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(not_found)?;
    let row: QueryRow = serde_json::from_str(first)?;
    if row.kind.as_deref() == Some("stats") {
        return Err(not_found());
    }

    let votes = row
        .patch_sets
        .unwrap_or_default()
        .into_iter()
        .find(|ps| ps.number == patchset)
        .map(|ps| {
            ps.approvals
                .into_iter()
                .map(|a| Vote::new(a.label, a.value))
                .collect()
        })
        .unwrap_or_default();

    Ok(ChangeRecord {
        number: row.number,
        votes,
    })
}

/// One row of `gerrit ls-groups --verbose`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupEntry {
    pub name: String,
    pub uuid: String,
    pub description: Option<String>,
    pub owner: String,
    pub owner_uuid: String,
}

/// Parse tab-separated `ls-groups --verbose` rows. Five columns means the
/// group has no description; rows with fewer columns are skipped.
pub fn parse_groups(output: &str) -> Vec<GroupEntry> {
    let mut groups = Vec::new();
    for line in output.lines() {
        let cols: Vec<&str> = line
            .split('\t')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .collect();
        let entry = match cols.as_slice() {
            [name, uuid, owner, owner_uuid, _visible] => GroupEntry {
                name: name.to_string(),
                uuid: uuid.to_string(),
                description: None,
                owner: owner.to_string(),
                owner_uuid: owner_uuid.to_string(),
            },
            [name, uuid, description, owner, owner_uuid, ..] => GroupEntry {
                name: name.to_string(),
                uuid: uuid.to_string(),
                description: Some(description.to_string()),
                owner: owner.to_string(),
                owner_uuid: owner_uuid.to_string(),
            },
            [] => continue,
            _ => {
                tracing::warn!(line, "skipping unrecognised ls-groups row");
                continue;
            }
        };
        groups.push(entry);
    }
    groups
}
