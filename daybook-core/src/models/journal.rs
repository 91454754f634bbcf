use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: Uuid,
    pub date: NaiveDate,
    pub title: String,
    pub body: String,
    /// Self-reported mood on a 1-5 scale.
    pub mood: Option<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JournalEntry {
    pub fn new(date: NaiveDate, title: impl Into<String>, body: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            date,
            title: title.into(),
            body: body.into(),
            mood: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_mood(mut self, mood: u8) -> Self {
        self.mood = Some(mood.clamp(1, 5));
        self
    }
}

impl fmt::Display for JournalEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} - {}", self.date, self.title)?;
        if let Some(mood) = self.mood {
            writeln!(f, "Mood: {}/5", mood)?;
        }
        writeln!(f, "\n{}", self.body)
    }
}
