use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{ConfigCommand, HabitCommand, JournalCommand, SyncCommand, TaskCommand, WorkoutCommand};
use daybook::config::Config;
use daybook::db::init_db;
use daybook::sync::{try_auto_sync, SyncedRepository};

#[derive(Parser)]
#[command(name = "daybook")]
#[command(version)]
#[command(about = "Tasks, habits, workouts and a journal that work offline", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage tasks
    Task(TaskCommand),

    /// Track habits
    Habit(HabitCommand),

    /// Log workouts
    Workout(WorkoutCommand),

    /// Write journal entries
    Journal(JournalCommand),

    /// Synchronize with the server
    Sync(SyncCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

impl Commands {
    /// Feature commands that change data; auto-sync runs after these.
    fn is_write(&self) -> bool {
        match self {
            Commands::Task(cmd) => cmd.command.is_write(),
            Commands::Habit(cmd) => cmd.command.is_write(),
            Commands::Workout(cmd) => cmd.command.is_write(),
            Commands::Journal(cmd) => cmd.command.is_write(),
            Commands::Sync(_) | Commands::Config(_) => false,
        }
    }

    /// Feature commands that only read; auto-sync runs before these.
    fn is_read(&self) -> bool {
        match self {
            Commands::Task(_) | Commands::Habit(_) | Commands::Workout(_) | Commands::Journal(_) => {
                !self.is_write()
            }
            Commands::Sync(_) | Commands::Config(_) => false,
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "daybook=warn,daybook_core=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config)?;

    let Some(command) = cli.command else {
        println!("Use --help to see available commands");
        return Ok(());
    };

    if let Commands::Config(cmd) = &command {
        return cmd.run(&config);
    }

    let pool = init_db(&config.database_path.value).await?;

    if command.is_read() {
        try_auto_sync(&config, &pool).await;
    }

    let repo = SyncedRepository::new(pool.clone(), &config.sync);
    match &command {
        Commands::Task(cmd) => cmd.run(&repo).await?,
        Commands::Habit(cmd) => cmd.run(&repo).await?,
        Commands::Workout(cmd) => cmd.run(&repo).await?,
        Commands::Journal(cmd) => cmd.run(&repo).await?,
        Commands::Sync(cmd) => cmd.run(&pool, &config).await?,
        Commands::Config(_) => {}
    }

    if command.is_write() {
        try_auto_sync(&config, &pool).await;
    }

    Ok(())
}
