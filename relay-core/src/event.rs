//! Decoded `gerrit stream-events` records.
//!
//! Each line of the feed is one JSON object with a `type` discriminator.
//! Only the kinds the daemon acts on are modelled; everything else decodes
//! to [`Event::Other`]. Unknown fields inside a known kind are ignored since
//! Gerrit adds fields between releases.

use serde::Deserialize;

use crate::numbers::{opt_u64_lenient, u64_lenient};
use crate::types::{ChangeId, ProjectName};

/// One record from an event feed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "comment-added")]
    CommentAdded(CommentAdded),

    #[serde(rename = "ref-updated")]
    RefUpdated(RefUpdated),

    #[serde(other)]
    Other,
}

impl Event {
    /// Decode a single feed line.
    pub fn decode(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    /// Short kind name for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::CommentAdded(_) => "comment-added",
            Event::RefUpdated(_) => "ref-updated",
            Event::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommentAdded {
    #[serde(default)]
    pub comment: String,
    pub change: Change,
    #[serde(rename = "patchSet")]
    pub patch_set: PatchSet,
}

impl CommentAdded {
    /// First line of the comment, or `""` for an empty comment.
    pub fn first_line(&self) -> &str {
        self.comment.lines().next().unwrap_or("")
    }

    /// Whether the first comment line carries `token`.
    pub fn is_indicated(&self, token: &str) -> bool {
        self.first_line().contains(token)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Change {
    pub id: ChangeId,
    /// Numeric change number; present on real Gerrit feeds.
    #[serde(default, deserialize_with = "opt_u64_lenient")]
    pub number: Option<u64>,
    pub project: ProjectName,
    pub branch: String,
    #[serde(default)]
    pub topic: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PatchSet {
    #[serde(deserialize_with = "u64_lenient")]
    pub number: u64,
    pub revision: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RefUpdated {
    #[serde(rename = "refUpdate")]
    pub ref_update: RefUpdate,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RefUpdate {
    pub project: ProjectName,
    #[serde(rename = "refName", default)]
    pub ref_name: Option<String>,
    #[serde(rename = "oldRev", default)]
    pub old_rev: Option<String>,
    #[serde(rename = "newRev", default)]
    pub new_rev: Option<String>,
}
