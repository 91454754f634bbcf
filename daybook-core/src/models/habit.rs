use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    #[default]
    Daily,
    Weekly,
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frequency::Daily => write!(f, "daily"),
            Frequency::Weekly => write!(f, "weekly"),
        }
    }
}

impl FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            _ => Err(format!(
                "Invalid frequency '{}'. Valid options: daily, weekly",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Habit {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub frequency: Frequency,
    pub target_per_period: u32,
    pub archived: bool,
    /// Days on which the habit was checked in, kept sorted and unique.
    pub check_ins: Vec<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Habit {
    pub fn new(name: impl Into<String>, frequency: Frequency) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            frequency,
            target_per_period: 1,
            archived: false,
            check_ins: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_target(mut self, target_per_period: u32) -> Self {
        self.target_per_period = target_per_period;
        self
    }

    /// Records a check-in for `date`. Returns false if already checked in.
    pub fn check_in(&mut self, date: NaiveDate) -> bool {
        match self.check_ins.binary_search(&date) {
            Ok(_) => false,
            Err(pos) => {
                self.check_ins.insert(pos, date);
                self.updated_at = Utc::now();
                true
            }
        }
    }
}

impl fmt::Display for Habit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.name)?;
        writeln!(f, "{}", "=".repeat(self.name.len().max(5)))?;
        writeln!(f, "ID:        {}", self.id)?;
        writeln!(
            f,
            "Frequency: {} (target {})",
            self.frequency, self.target_per_period
        )?;
        if self.archived {
            writeln!(f, "Archived")?;
        }
        if let Some(desc) = &self.description {
            writeln!(f, "\n{}", desc)?;
        }
        if let Some(last) = self.check_ins.last() {
            writeln!(f, "Last check-in: {} ({} total)", last, self.check_ins.len())?;
        }
        Ok(())
    }
}
