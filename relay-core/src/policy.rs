//! Approval policy: Gerrit's "MaxWithBlock" function over the required labels.
//!
//! Evaluation is pure: callers fetch votes, hand them in, and discard the
//! result afterwards. Nothing here performs I/O.

use serde::{Deserialize, Serialize};

/// Token a reviewer puts on the first line of a comment to request mirroring.
pub const READY_TOKEN: &str = "Upstream-Ready+1";

/// A voting dimension with its configured score range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Label {
    pub name: String,
    pub min: i32,
    pub max: i32,
}

impl Label {
    pub fn new(name: impl Into<String>, min: i32, max: i32) -> Self {
        Self {
            name: name.into(),
            min,
            max,
        }
    }

    /// Max-with-block over the votes cast on this label.
    ///
    /// No votes fails. Any vote at or below `min` blocks regardless of the
    /// rest. Otherwise a vote at or above `max` passes; anything less fails.
    pub fn approved<I>(&self, values: I) -> bool
    where
        I: IntoIterator<Item = i32>,
    {
        let mut lowest: Option<i32> = None;
        let mut highest: Option<i32> = None;
        for value in values {
            lowest = Some(lowest.map_or(value, |l| l.min(value)));
            highest = Some(highest.map_or(value, |h| h.max(value)));
        }

        match (lowest, highest) {
            (Some(low), _) if low <= self.min => false,
            (_, Some(high)) => high >= self.max,
            _ => false,
        }
    }
}

/// One recorded vote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vote {
    pub label: String,
    pub value: i32,
}

impl Vote {
    pub fn new(label: impl Into<String>, value: i32) -> Self {
        Self {
            label: label.into(),
            value,
        }
    }
}

/// Result of evaluating every required label.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Assessment {
    /// Names of required labels that did not pass, in configuration order.
    pub unmet: Vec<String>,
}

impl Assessment {
    pub fn approved(&self) -> bool {
        self.unmet.is_empty()
    }
}

/// Evaluate each required label against `votes`. Votes on labels outside the
/// required set are ignored.
pub fn assess(required: &[Label], votes: &[Vote]) -> Assessment {
    let unmet = required
        .iter()
        .filter(|label| {
            let values = votes
                .iter()
                .filter(|vote| vote.label == label.name)
                .map(|vote| vote.value);
            !label.approved(values)
        })
        .map(|label| label.name.clone())
        .collect();
    Assessment { unmet }
}

/// Logical AND of [`Label::approved`] over `required`.
pub fn evaluate(required: &[Label], votes: &[Vote]) -> bool {
    assess(required, votes).approved()
}

/// Labels a change must satisfy before it is sent upstream.
pub fn default_labels() -> Vec<Label> {
    vec![
        Label::new("Code-Review", -2, 2),
        Label::new("Verified", -2, 2),
        Label::new("Workflow", -1, 1),
        Label::new("Upstream-Ready", -1, 1),
    ]
}
