use chrono::NaiveDate;
use clap::ValueEnum;
use uuid::Uuid;

mod config_cmd;
mod habit;
mod journal;
mod sync_cmd;
mod task;
mod workout;

pub use config_cmd::ConfigCommand;
pub use habit::HabitCommand;
pub use journal::JournalCommand;
pub use sync_cmd::SyncCommand;
pub use task::TaskCommand;
pub use workout::WorkoutCommand;

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

pub(crate) fn parse_id(value: &str) -> Result<Uuid, String> {
    Uuid::parse_str(value).map_err(|_| format!("Invalid ID '{}': expected a UUID", value))
}

/// Parse a date string, accepting "today" and YYYY-MM-DD.
pub(crate) fn parse_date(value: &str) -> Result<NaiveDate, String> {
    if value.eq_ignore_ascii_case("today") {
        return Ok(chrono::Local::now().date_naive());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| format!("Invalid date '{}'. Use YYYY-MM-DD or 'today'", value))
}

pub(crate) fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() > width {
        let cut: String = text.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date() {
        assert_eq!(
            parse_date("2025-01-15").unwrap(),
            NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()
        );
        assert!(parse_date("today").is_ok());
        assert!(parse_date("15/01/2025").is_err());
    }

    #[test]
    fn test_parse_id() {
        let id = Uuid::new_v4();
        assert_eq!(parse_id(&id.to_string()).unwrap(), id);
        assert!(parse_id("not-a-uuid").is_err());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a much longer title", 10), "a much ...");
    }
}
