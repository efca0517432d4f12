//! Common types used throughout FitSync.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of record kinds that take part in synchronization.
///
/// Serialized as its payload key, so `WorkoutLog` is `"workoutLogs"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EntityKind {
    Exercise,
    Program,
    TrainingDay,
    WorkoutLog,
    PersonalRecord,
    Settings,
    OnboardingProfile,
    Achievement,
}

impl EntityKind {
    /// Every syncable kind, in the order export and import visit them.
    pub const ALL: [EntityKind; 8] = [
        EntityKind::Exercise,
        EntityKind::Program,
        EntityKind::TrainingDay,
        EntityKind::WorkoutLog,
        EntityKind::PersonalRecord,
        EntityKind::Settings,
        EntityKind::OnboardingProfile,
        EntityKind::Achievement,
    ];

    /// Key used for this kind in a sync payload.
    pub fn wire_name(&self) -> &'static str {
        match self {
            EntityKind::Exercise => "exercises",
            EntityKind::Program => "programs",
            EntityKind::TrainingDay => "trainingDays",
            EntityKind::WorkoutLog => "workoutLogs",
            EntityKind::PersonalRecord => "personalRecords",
            EntityKind::Settings => "settings",
            EntityKind::OnboardingProfile => "onboardingProfile",
            EntityKind::Achievement => "achievements",
        }
    }

    /// Name of the identifier field in this kind's record representation.
    ///
    /// Achievement unlocks are keyed by the achievement they unlock.
    pub fn id_field(&self) -> &'static str {
        match self {
            EntityKind::Achievement => "achievementId",
            _ => "id",
        }
    }

    /// Singleton kinds hold at most one record per user and travel as a
    /// single object rather than an array.
    pub fn is_singleton(&self) -> bool {
        matches!(self, EntityKind::Settings | EntityKind::OnboardingProfile)
    }

    /// Look up a kind by its payload key.
    pub fn from_wire_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.wire_name() == name)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.wire_name())
    }
}

impl FromStr for EntityKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::from_wire_name(s)
            .ok_or_else(|| crate::Error::InvalidInput(format!("Unknown entity kind: {}", s)))
    }
}

impl TryFrom<String> for EntityKind {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        value.parse()
    }
}

impl From<EntityKind> for String {
    fn from(kind: EntityKind) -> Self {
        kind.wire_name().to_string()
    }
}

/// Stable identifier of a synced record.
///
/// Identifiers are immutable once created and are the only join key
/// between the local and cloud stores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId(String);

impl EntityId {
    /// Create a new EntityId from a string.
    ///
    /// # Errors
    /// - Returns error if id is empty
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(crate::Error::InvalidInput(
                "EntityId cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for EntityId {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Random token identifying one local installation.
///
/// Attached to outbound writes for auditing only; never part of any
/// reconciliation decision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    /// Generate a fresh random device token.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wrap a previously persisted token.
    pub fn new(token: impl Into<String>) -> crate::Result<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(crate::Error::InvalidInput(
                "DeviceId cannot be empty".to_string(),
            ));
        }
        Ok(Self(token))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
