use clap::{Args, Subcommand};

use daybook_core::models::JournalEntry;

use super::{parse_date, parse_id, truncate, OutputFormat};
use daybook::sync::SyncedRepository;

#[derive(Args)]
pub struct JournalCommand {
    #[command(subcommand)]
    pub command: JournalSubcommand,
}

#[derive(Subcommand)]
pub enum JournalSubcommand {
    /// Write a journal entry
    Add {
        /// Entry title
        title: String,

        /// Entry text
        #[arg(long, short)]
        body: String,

        /// Date (YYYY-MM-DD or "today")
        #[arg(long, short, default_value = "today")]
        date: String,

        /// Mood from 1 to 5
        #[arg(long, short, value_parser = clap::value_parser!(u8).range(1..=5))]
        mood: Option<u8>,
    },

    /// List journal entries
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Bypass the local cache and ask the server
        #[arg(long)]
        refresh: bool,
    },

    /// Show a journal entry
    Show {
        /// Entry ID
        id: String,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Bypass the local cache and ask the server
        #[arg(long)]
        refresh: bool,
    },

    /// Edit a journal entry
    Update {
        /// Entry ID
        id: String,

        /// New title
        #[arg(long)]
        title: Option<String>,

        /// New text
        #[arg(long, short)]
        body: Option<String>,

        /// New mood from 1 to 5
        #[arg(long, short, value_parser = clap::value_parser!(u8).range(1..=5))]
        mood: Option<u8>,
    },

    /// Delete a journal entry
    Delete {
        /// Entry ID
        id: String,
    },
}

impl JournalSubcommand {
    pub fn is_write(&self) -> bool {
        !matches!(
            self,
            JournalSubcommand::List { .. } | JournalSubcommand::Show { .. }
        )
    }
}

impl JournalCommand {
    pub async fn run(&self, repo: &SyncedRepository) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            JournalSubcommand::Add {
                title,
                body,
                date,
                mood,
            } => {
                if title.trim().is_empty() {
                    return Err("Entry title cannot be empty".into());
                }

                let mut entry = JournalEntry::new(parse_date(date)?, title.trim(), body.as_str());
                if let Some(mood) = mood {
                    entry = entry.with_mood(*mood);
                }

                let created = repo.save(entry).await?;
                println!("Saved entry:");
                println!("{}", created);
                Ok(())
            }

            JournalSubcommand::List { format, refresh } => {
                let entries = repo.list::<JournalEntry>(*refresh).await?;

                if entries.is_empty() {
                    println!("No journal entries found");
                    return Ok(());
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&entries)?);
                    }
                    OutputFormat::Text => {
                        println!("{:<36}  {:<10}  {:<4}  TITLE", "ID", "DATE", "MOOD");
                        println!("{}", "-".repeat(90));
                        for entry in &entries {
                            let mood = entry.mood.map(|m| m.to_string()).unwrap_or_default();
                            println!(
                                "{:<36}  {:<10}  {:<4}  {}",
                                entry.id,
                                entry.date,
                                mood,
                                truncate(&entry.title, 36)
                            );
                        }
                        println!("\nTotal: {} entry(ies)", entries.len());
                    }
                }
                Ok(())
            }

            JournalSubcommand::Show {
                id,
                format,
                refresh,
            } => {
                let id = parse_id(id)?;
                match repo.get::<JournalEntry>(id, *refresh).await? {
                    Some(entry) => {
                        match format {
                            OutputFormat::Json => {
                                println!("{}", serde_json::to_string_pretty(&entry)?);
                            }
                            OutputFormat::Text => {
                                println!("{}", entry);
                            }
                        }
                        Ok(())
                    }
                    None => Err(format!("Journal entry not found: {}", id).into()),
                }
            }

            JournalSubcommand::Update {
                id,
                title,
                body,
                mood,
            } => {
                if title.is_none() && body.is_none() && mood.is_none() {
                    return Err("Nothing to update. Provide at least one option.".into());
                }

                let id = parse_id(id)?;
                let mut entry = repo
                    .get::<JournalEntry>(id, false)
                    .await?
                    .ok_or_else(|| format!("Journal entry not found: {}", id))?;

                if let Some(title) = title {
                    if title.trim().is_empty() {
                        return Err("Entry title cannot be empty".into());
                    }
                    entry.title = title.trim().to_string();
                }
                if let Some(body) = body {
                    entry.body = body.clone();
                }
                if let Some(mood) = mood {
                    entry.mood = Some(*mood);
                }
                entry.updated_at = chrono::Utc::now();

                let updated = repo.save(entry).await?;
                println!("Updated entry:");
                println!("{}", updated);
                Ok(())
            }

            JournalSubcommand::Delete { id } => {
                let id = parse_id(id)?;
                if repo.delete::<JournalEntry>(id).await? {
                    println!("Deleted journal entry {}", id);
                    Ok(())
                } else {
                    Err(format!("Journal entry not found: {}", id).into())
                }
            }
        }
    }
}
