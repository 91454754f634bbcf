use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kinds of entity that take part in synchronization.
///
/// Each kind maps to one local table and one remote collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Task,
    Habit,
    WorkoutDay,
    JournalEntry,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Task,
        EntityKind::Habit,
        EntityKind::WorkoutDay,
        EntityKind::JournalEntry,
    ];

    /// Stable identifier used in the ledger table and in remote paths.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Task => "task",
            EntityKind::Habit => "habit",
            EntityKind::WorkoutDay => "workout_day",
            EntityKind::JournalEntry => "journal_entry",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "task" => Ok(EntityKind::Task),
            "habit" => Ok(EntityKind::Habit),
            "workout_day" => Ok(EntityKind::WorkoutDay),
            "journal_entry" => Ok(EntityKind::JournalEntry),
            _ => Err(format!(
                "Invalid entity kind '{}'. Valid options: task, habit, workout_day, journal_entry",
                s
            )),
        }
    }
}
