use clap::{Args, Subcommand};

use super::OutputFormat;
use daybook::config::Config;

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

impl ConfigCommand {
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(config)?);
                    }
                    OutputFormat::Text => {
                        println!("Configuration");
                        println!("=============\n");

                        if let Some(path) = &config.config_file {
                            println!("Config file: {}", path.display());
                        } else {
                            println!(
                                "Config file: {} (not found)",
                                Config::default_config_path().display()
                            );
                        }
                        println!();

                        println!("database_path: {}", config.database_path.value.display());
                        println!("  source: {}", config.database_path.source);
                        println!();

                        let sync = &config.sync;
                        println!(
                            "sync.server_url: {}",
                            sync.server_url.as_deref().unwrap_or("(not set)")
                        );
                        println!(
                            "sync.api_key: {}",
                            if sync.api_key.is_some() { "(set)" } else { "(not set)" }
                        );
                        println!("sync.auto_sync: {}", sync.auto_sync);
                        println!("sync.request_timeout_secs: {}", sync.request_timeout_secs);
                        match sync.cache_max_age_secs {
                            Some(secs) => println!("sync.cache_max_age_secs: {}", secs),
                            None => println!("sync.cache_max_age_secs: (always refresh)"),
                        }
                    }
                }
                Ok(())
            }
        }
    }
}
