use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exercise {
    pub name: String,
    pub sets: u32,
    pub reps: u32,
    pub weight_kg: Option<f64>,
}

impl Exercise {
    pub fn new(name: impl Into<String>, sets: u32, reps: u32) -> Self {
        Self {
            name: name.into(),
            sets,
            reps,
            weight_kg: None,
        }
    }

    pub fn with_weight(mut self, weight_kg: f64) -> Self {
        self.weight_kg = Some(weight_kg);
        self
    }
}

impl fmt::Display for Exercise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}x{}", self.name, self.sets, self.reps)?;
        if let Some(w) = self.weight_kg {
            write!(f, " @ {}kg", w)?;
        }
        Ok(())
    }
}

/// One training session on a given day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutDay {
    pub id: Uuid,
    pub date: NaiveDate,
    pub title: String,
    pub exercises: Vec<Exercise>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkoutDay {
    pub fn new(date: NaiveDate, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            date,
            title: title.into(),
            exercises: Vec::new(),
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_exercises(mut self, exercises: Vec<Exercise>) -> Self {
        self.exercises = exercises;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

impl fmt::Display for WorkoutDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Workout: {} - {}", self.date, self.title)?;
        writeln!(f, "{}", "=".repeat(30))?;
        for exercise in &self.exercises {
            writeln!(f, "  - {}", exercise)?;
        }
        if let Some(notes) = &self.notes {
            writeln!(f, "\nNotes: {}", notes)?;
        }
        Ok(())
    }
}
