//! User mutations and their queued form.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[cfg(feature = "ts")]
use ts_rs::TS;

use super::Coordinates;

/// A farm profile as edited in the simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct FarmProfile {
    pub farm_id: String,
    pub name: String,
    #[serde(default)]
    pub location: Option<Coordinates>,
    #[serde(flatten)]
    #[cfg_attr(feature = "ts", ts(skip))]
    pub extra: Map<String, Value>,
}

/// Crop state for one zone of a farm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct CropData {
    pub farm_id: String,
    pub zone_id: String,
    pub crop: String,
    #[serde(flatten)]
    #[cfg_attr(feature = "ts", ts(skip))]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct Achievement {
    pub achievement_id: String,
    pub unlocked_at: DateTime<Utc>,
    #[serde(flatten)]
    #[cfg_attr(feature = "ts", ts(skip))]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct Feedback {
    pub message: String,
    #[serde(default)]
    pub rating: Option<u8>,
    #[serde(flatten)]
    #[cfg_attr(feature = "ts", ts(skip))]
    pub extra: Map<String, Value>,
}

/// A user-initiated mutation.
///
/// The set is closed: adding a kind means every synchronizer and the
/// persistence mapping must handle it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum Operation {
    ProfileSave(FarmProfile),
    CropDataUpdate(CropData),
    AchievementUnlock(Achievement),
    FeedbackSubmit(Feedback),
}

/// Payload-free discriminant of an `Operation`, used for grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    ProfileSave,
    CropDataUpdate,
    AchievementUnlock,
    FeedbackSubmit,
}

impl OperationKind {
    pub const ALL: [OperationKind; 4] = [
        OperationKind::ProfileSave,
        OperationKind::CropDataUpdate,
        OperationKind::AchievementUnlock,
        OperationKind::FeedbackSubmit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::ProfileSave => "profile-save",
            OperationKind::CropDataUpdate => "crop-data-update",
            OperationKind::AchievementUnlock => "achievement-unlock",
            OperationKind::FeedbackSubmit => "feedback-submit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::ProfileSave(_) => OperationKind::ProfileSave,
            Operation::CropDataUpdate(_) => OperationKind::CropDataUpdate,
            Operation::AchievementUnlock(_) => OperationKind::AchievementUnlock,
            Operation::FeedbackSubmit(_) => OperationKind::FeedbackSubmit,
        }
    }

    /// Build an operation from a type name and a JSON payload.
    pub fn from_parts(kind: &str, payload: Value) -> serde_json::Result<Self> {
        serde_json::from_value(serde_json::json!({ "type": kind, "payload": payload }))
    }

    /// Location associated with the mutation, if any.
    pub fn coordinates(&self) -> Option<Coordinates> {
        match self {
            Operation::ProfileSave(profile) => profile.location,
            _ => None,
        }
    }
}

/// An operation waiting in the pending queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    /// Monotonic within one data directory.
    pub id: u64,
    pub operation: Operation,
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedOperation {
    pub fn kind(&self) -> OperationKind {
        self.operation.kind()
    }
}
