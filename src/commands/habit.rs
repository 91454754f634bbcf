use clap::{Args, Subcommand};

use daybook_core::models::{Frequency, Habit};

use super::{parse_date, parse_id, truncate, OutputFormat};
use daybook::sync::SyncedRepository;

#[derive(Args)]
pub struct HabitCommand {
    #[command(subcommand)]
    pub command: HabitSubcommand,
}

#[derive(Subcommand)]
pub enum HabitSubcommand {
    /// Start tracking a new habit
    Add {
        /// Habit name
        name: String,

        /// How often: daily, weekly
        #[arg(long, default_value = "daily")]
        frequency: Frequency,

        /// Check-ins needed per period
        #[arg(long, default_value = "1")]
        target: u32,

        /// Description
        #[arg(long)]
        description: Option<String>,
    },

    /// List habits
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Include archived habits
        #[arg(long, short)]
        all: bool,

        /// Bypass the local cache and ask the server
        #[arg(long)]
        refresh: bool,
    },

    /// Show a habit's details
    Show {
        /// Habit ID
        id: String,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Bypass the local cache and ask the server
        #[arg(long)]
        refresh: bool,
    },

    /// Record a check-in
    CheckIn {
        /// Habit ID
        id: String,

        /// Date of the check-in (YYYY-MM-DD or "today")
        #[arg(long, short, default_value = "today")]
        date: String,
    },

    /// Archive a habit
    Archive {
        /// Habit ID
        id: String,

        /// Restore an archived habit instead
        #[arg(long)]
        undo: bool,
    },

    /// Delete a habit and its check-ins
    Delete {
        /// Habit ID
        id: String,
    },
}

impl HabitSubcommand {
    pub fn is_write(&self) -> bool {
        !matches!(self, HabitSubcommand::List { .. } | HabitSubcommand::Show { .. })
    }
}

impl HabitCommand {
    pub async fn run(&self, repo: &SyncedRepository) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            HabitSubcommand::Add {
                name,
                frequency,
                target,
                description,
            } => {
                if name.trim().is_empty() {
                    return Err("Habit name cannot be empty".into());
                }
                if *target == 0 {
                    return Err("Target must be at least 1".into());
                }

                let mut habit = Habit::new(name.trim(), *frequency).with_target(*target);
                if let Some(description) = description {
                    habit = habit.with_description(description);
                }

                let created = repo.save(habit).await?;
                println!("Created habit:");
                println!("{}", created);
                Ok(())
            }

            HabitSubcommand::List {
                format,
                all,
                refresh,
            } => {
                let habits: Vec<Habit> = repo
                    .list::<Habit>(*refresh)
                    .await?
                    .into_iter()
                    .filter(|h| *all || !h.archived)
                    .collect();

                if habits.is_empty() {
                    println!("No habits found");
                    return Ok(());
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&habits)?);
                    }
                    OutputFormat::Text => {
                        println!("{:<36}  {:<30}  {:<8}  LAST CHECK-IN", "ID", "NAME", "EVERY");
                        println!("{}", "-".repeat(95));
                        for habit in &habits {
                            let last = habit
                                .check_ins
                                .last()
                                .map(|d| d.to_string())
                                .unwrap_or_else(|| "-".to_string());
                            println!(
                                "{:<36}  {:<30}  {:<8}  {}",
                                habit.id,
                                truncate(&habit.name, 30),
                                habit.frequency,
                                last
                            );
                        }
                        println!("\nTotal: {} habit(s)", habits.len());
                    }
                }
                Ok(())
            }

            HabitSubcommand::Show {
                id,
                format,
                refresh,
            } => {
                let id = parse_id(id)?;
                match repo.get::<Habit>(id, *refresh).await? {
                    Some(habit) => {
                        match format {
                            OutputFormat::Json => {
                                println!("{}", serde_json::to_string_pretty(&habit)?);
                            }
                            OutputFormat::Text => {
                                println!("{}", habit);
                            }
                        }
                        Ok(())
                    }
                    None => Err(format!("Habit not found: {}", id).into()),
                }
            }

            HabitSubcommand::CheckIn { id, date } => {
                let id = parse_id(id)?;
                let date = parse_date(date)?;
                let mut habit = repo
                    .get::<Habit>(id, false)
                    .await?
                    .ok_or_else(|| format!("Habit not found: {}", id))?;

                if !habit.check_in(date) {
                    println!("Already checked in on {} for {}", date, habit.name);
                    return Ok(());
                }

                let habit = repo.save(habit).await?;
                println!("Checked in {} on {}", habit.name, date);
                Ok(())
            }

            HabitSubcommand::Archive { id, undo } => {
                let id = parse_id(id)?;
                let mut habit = repo
                    .get::<Habit>(id, false)
                    .await?
                    .ok_or_else(|| format!("Habit not found: {}", id))?;

                habit.archived = !undo;
                habit.updated_at = chrono::Utc::now();
                let habit = repo.save(habit).await?;
                if habit.archived {
                    println!("Archived: {}", habit.name);
                } else {
                    println!("Restored: {}", habit.name);
                }
                Ok(())
            }

            HabitSubcommand::Delete { id } => {
                let id = parse_id(id)?;
                if repo.delete::<Habit>(id).await? {
                    println!("Deleted habit {}", id);
                    Ok(())
                } else {
                    Err(format!("Habit not found: {}", id).into())
                }
            }
        }
    }
}
