use clap::{Args, Subcommand};

use daybook_core::models::{Exercise, WorkoutDay};

use super::{parse_date, parse_id, truncate, OutputFormat};
use daybook::sync::SyncedRepository;

#[derive(Args)]
pub struct WorkoutCommand {
    #[command(subcommand)]
    pub command: WorkoutSubcommand,
}

#[derive(Subcommand)]
pub enum WorkoutSubcommand {
    /// Log a workout
    Add {
        /// Workout title
        title: String,

        /// Date (YYYY-MM-DD or "today")
        #[arg(long, short, default_value = "today")]
        date: String,

        /// Exercise as NAME:SETSxREPS or NAME:SETSxREPS@KG (can be repeated)
        #[arg(long = "exercise", short = 'e', value_name = "EXERCISE")]
        exercises: Vec<String>,

        /// Notes
        #[arg(long)]
        notes: Option<String>,
    },

    /// List workouts
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Bypass the local cache and ask the server
        #[arg(long)]
        refresh: bool,
    },

    /// Show a workout's details
    Show {
        /// Workout ID
        id: String,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Bypass the local cache and ask the server
        #[arg(long)]
        refresh: bool,
    },

    /// Delete a workout
    Delete {
        /// Workout ID
        id: String,
    },
}

impl WorkoutSubcommand {
    pub fn is_write(&self) -> bool {
        !matches!(
            self,
            WorkoutSubcommand::List { .. } | WorkoutSubcommand::Show { .. }
        )
    }
}

/// Parse "Squat:5x5@100" into an exercise.
fn parse_exercise(value: &str) -> Result<Exercise, String> {
    let invalid = || {
        format!(
            "Invalid exercise '{}'. Use NAME:SETSxREPS or NAME:SETSxREPS@KG",
            value
        )
    };

    let (name, volume) = value.rsplit_once(':').ok_or_else(invalid)?;
    let name = name.trim();
    if name.is_empty() {
        return Err(invalid());
    }

    let (volume, weight) = match volume.split_once('@') {
        Some((volume, weight)) => {
            let weight = weight
                .trim()
                .trim_end_matches("kg")
                .parse::<f64>()
                .map_err(|_| invalid())?;
            (volume, Some(weight))
        }
        None => (volume, None),
    };

    let (sets, reps) = volume
        .trim()
        .to_lowercase()
        .split_once('x')
        .map(|(s, r)| (s.parse::<u32>(), r.parse::<u32>()))
        .ok_or_else(invalid)?;
    let exercise = Exercise::new(name, sets.map_err(|_| invalid())?, reps.map_err(|_| invalid())?);

    Ok(match weight {
        Some(weight) => exercise.with_weight(weight),
        None => exercise,
    })
}

impl WorkoutCommand {
    pub async fn run(&self, repo: &SyncedRepository) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            WorkoutSubcommand::Add {
                title,
                date,
                exercises,
                notes,
            } => {
                if title.trim().is_empty() {
                    return Err("Workout title cannot be empty".into());
                }

                let exercises = exercises
                    .iter()
                    .map(|e| parse_exercise(e))
                    .collect::<Result<Vec<_>, _>>()?;
                let mut workout = WorkoutDay::new(parse_date(date)?, title.trim()).with_exercises(exercises);
                if let Some(notes) = notes {
                    workout = workout.with_notes(notes);
                }

                let created = repo.save(workout).await?;
                println!("Logged workout:");
                println!("{}", created);
                Ok(())
            }

            WorkoutSubcommand::List { format, refresh } => {
                let workouts = repo.list::<WorkoutDay>(*refresh).await?;

                if workouts.is_empty() {
                    println!("No workouts found");
                    return Ok(());
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&workouts)?);
                    }
                    OutputFormat::Text => {
                        println!("{:<36}  {:<10}  {:<30}  EXERCISES", "ID", "DATE", "TITLE");
                        println!("{}", "-".repeat(95));
                        for workout in &workouts {
                            println!(
                                "{:<36}  {:<10}  {:<30}  {}",
                                workout.id,
                                workout.date,
                                truncate(&workout.title, 30),
                                workout.exercises.len()
                            );
                        }
                        println!("\nTotal: {} workout(s)", workouts.len());
                    }
                }
                Ok(())
            }

            WorkoutSubcommand::Show {
                id,
                format,
                refresh,
            } => {
                let id = parse_id(id)?;
                match repo.get::<WorkoutDay>(id, *refresh).await? {
                    Some(workout) => {
                        match format {
                            OutputFormat::Json => {
                                println!("{}", serde_json::to_string_pretty(&workout)?);
                            }
                            OutputFormat::Text => {
                                println!("{}", workout);
                            }
                        }
                        Ok(())
                    }
                    None => Err(format!("Workout not found: {}", id).into()),
                }
            }

            WorkoutSubcommand::Delete { id } => {
                let id = parse_id(id)?;
                if repo.delete::<WorkoutDay>(id).await? {
                    println!("Deleted workout {}", id);
                    Ok(())
                } else {
                    Err(format!("Workout not found: {}", id).into())
                }
            }
        }
    }
}
