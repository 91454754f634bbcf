use clap::{Args, Subcommand};

use daybook_core::models::{Priority, Task};

use super::{parse_date, parse_id, truncate, OutputFormat};
use daybook::sync::SyncedRepository;

#[derive(Args)]
pub struct TaskCommand {
    #[command(subcommand)]
    pub command: TaskSubcommand,
}

#[derive(Subcommand)]
pub enum TaskSubcommand {
    /// Add a new task
    Add {
        /// Task title
        title: String,

        /// Free-form notes
        #[arg(long)]
        notes: Option<String>,

        /// Due date (YYYY-MM-DD or "today")
        #[arg(long)]
        due: Option<String>,

        /// Priority: low, normal, high
        #[arg(long, short, default_value = "normal")]
        priority: Priority,
    },

    /// List tasks
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Include completed tasks
        #[arg(long, short)]
        all: bool,

        /// Bypass the local cache and ask the server
        #[arg(long)]
        refresh: bool,
    },

    /// Show a task's details
    Show {
        /// Task ID
        id: String,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Bypass the local cache and ask the server
        #[arg(long)]
        refresh: bool,
    },

    /// Update a task
    Update {
        /// Task ID
        id: String,

        /// New title
        #[arg(long)]
        title: Option<String>,

        /// New notes
        #[arg(long)]
        notes: Option<String>,

        /// New due date (YYYY-MM-DD or "today")
        #[arg(long)]
        due: Option<String>,

        /// New priority
        #[arg(long, short)]
        priority: Option<Priority>,
    },

    /// Mark a task as done
    Done {
        /// Task ID
        id: String,

        /// Mark as not done instead
        #[arg(long)]
        undo: bool,
    },

    /// Delete a task
    Delete {
        /// Task ID
        id: String,
    },
}

impl TaskSubcommand {
    pub fn is_write(&self) -> bool {
        !matches!(self, TaskSubcommand::List { .. } | TaskSubcommand::Show { .. })
    }
}

impl TaskCommand {
    pub async fn run(&self, repo: &SyncedRepository) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            TaskSubcommand::Add {
                title,
                notes,
                due,
                priority,
            } => {
                if title.trim().is_empty() {
                    return Err("Task title cannot be empty".into());
                }

                let mut task = Task::new(title.trim()).with_priority(*priority);
                if let Some(notes) = notes {
                    task = task.with_notes(notes);
                }
                if let Some(due) = due {
                    task = task.with_due_date(parse_date(due)?);
                }

                let created = repo.save(task).await?;
                println!("Created task:");
                println!("{}", created);
                Ok(())
            }

            TaskSubcommand::List {
                format,
                all,
                refresh,
            } => {
                let tasks: Vec<Task> = repo
                    .list::<Task>(*refresh)
                    .await?
                    .into_iter()
                    .filter(|t| *all || !t.completed)
                    .collect();

                if tasks.is_empty() {
                    println!("No tasks found");
                    return Ok(());
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&tasks)?);
                    }
                    OutputFormat::Text => {
                        println!("{:<36}  {:<3}  {:<30}  {:<10}  PRIORITY", "ID", "", "TITLE", "DUE");
                        println!("{}", "-".repeat(95));
                        for task in &tasks {
                            let mark = if task.completed { "[x]" } else { "[ ]" };
                            let due = task
                                .due_date
                                .map(|d| d.to_string())
                                .unwrap_or_default();
                            println!(
                                "{:<36}  {:<3}  {:<30}  {:<10}  {}",
                                task.id,
                                mark,
                                truncate(&task.title, 30),
                                due,
                                task.priority
                            );
                        }
                        println!("\nTotal: {} task(s)", tasks.len());
                    }
                }
                Ok(())
            }

            TaskSubcommand::Show {
                id,
                format,
                refresh,
            } => {
                let id = parse_id(id)?;
                match repo.get::<Task>(id, *refresh).await? {
                    Some(task) => {
                        match format {
                            OutputFormat::Json => {
                                println!("{}", serde_json::to_string_pretty(&task)?);
                            }
                            OutputFormat::Text => {
                                println!("{}", task);
                            }
                        }
                        Ok(())
                    }
                    None => Err(format!("Task not found: {}", id).into()),
                }
            }

            TaskSubcommand::Update {
                id,
                title,
                notes,
                due,
                priority,
            } => {
                let has_updates =
                    title.is_some() || notes.is_some() || due.is_some() || priority.is_some();
                if !has_updates {
                    return Err("Nothing to update. Provide at least one option.".into());
                }

                let id = parse_id(id)?;
                let mut task = repo
                    .get::<Task>(id, false)
                    .await?
                    .ok_or_else(|| format!("Task not found: {}", id))?;

                if let Some(title) = title {
                    if title.trim().is_empty() {
                        return Err("Task title cannot be empty".into());
                    }
                    task.title = title.trim().to_string();
                }
                if let Some(notes) = notes {
                    task.notes = Some(notes.clone());
                }
                if let Some(due) = due {
                    task.due_date = Some(parse_date(due)?);
                }
                if let Some(priority) = priority {
                    task.priority = *priority;
                }
                task.updated_at = chrono::Utc::now();

                let updated = repo.save(task).await?;
                println!("Updated task:");
                println!("{}", updated);
                Ok(())
            }

            TaskSubcommand::Done { id, undo } => {
                let id = parse_id(id)?;
                let mut task = repo
                    .get::<Task>(id, false)
                    .await?
                    .ok_or_else(|| format!("Task not found: {}", id))?;

                task.set_completed(!undo);
                let task = repo.save(task).await?;
                if task.completed {
                    println!("Completed: {}", task.title);
                } else {
                    println!("Reopened: {}", task.title);
                }
                Ok(())
            }

            TaskSubcommand::Delete { id } => {
                let id = parse_id(id)?;
                if repo.delete::<Task>(id).await? {
                    println!("Deleted task {}", id);
                    Ok(())
                } else {
                    Err(format!("Task not found: {}", id).into())
                }
            }
        }
    }
}
