pub mod process;

use std::{env, path::Path, path::PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use process::{kill_running_daemons, restart_daemon};
use tracing::level_filters::LevelFilter;

use crate::{
    config::{JsonSettingsStore, SettingsStore},
    engine::start_engine,
    utils::{
        dir::create_application_default_path,
        logging::{enable_logging, CLI_PREFIX},
    },
};

#[derive(Parser, Debug)]
#[command(name = "Focuslog", version, long_about = None)]
#[command(
    about = "Work time tracker attributing time to foreground windows",
    long_about = None
)]
struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(long, help = "Enable verbose logging")]
    log: bool,
}

#[derive(Subcommand, Debug)]
#[command(version, about, long_about = None)]
enum Commands {
    #[command(about = "Start the tracking daemon in the background")]
    Init {
        #[arg(
            long,
            help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
        )]
        dir: Option<PathBuf>,
        #[arg(long, help = "Project tag applied to logged entries")]
        project: Option<String>,
    },
    #[command(
        about = "Run the tracking engine directly in the current console. Used for creating a daemon internally and for debugging"
    )]
    Serve {
        #[arg(
            long,
            help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
        )]
        dir: Option<PathBuf>,
        #[arg(long, help = "Project tag applied to logged entries")]
        project: Option<String>,
    },
    #[command(about = "Stop a running daemon, flushing its open session")]
    Stop {},
    #[command(about = "Inspect or change settings")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    #[command(about = "Print the current settings")]
    Show,
    #[command(about = "Change settings. Only the given fields are touched")]
    Set {
        #[arg(long, help = "Minutes of work before a break reminder, 0 disables")]
        break_interval: Option<u32>,
        #[arg(long, help = "Turn break reminders on or off")]
        reminders: Option<bool>,
        #[arg(long, help = "Root directory for the daily work logs")]
        log_dir: Option<PathBuf>,
        #[arg(long, help = "Days to keep work logs, 0 keeps them forever")]
        retention_days: Option<u32>,
        #[arg(long, help = "Default project tag, empty string clears it")]
        project: Option<String>,
    },
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();

    let app_dir = create_application_default_path()?;
    let logging_level = if args.log {
        Some(LevelFilter::TRACE)
    } else {
        None
    };
    enable_logging(CLI_PREFIX, &app_dir, logging_level, args.log)?;

    match args.commands {
        Commands::Init { dir, project } => {
            restart_daemon(dir, project)?;
            Ok(())
        }
        Commands::Stop {} => {
            let process_name = env::current_exe().expect("Can't operate without an executable");
            kill_running_daemons(&process_name);
            Ok(())
        }
        Commands::Serve { dir, project } => {
            let dir = dir.map_or_else(create_application_default_path, Ok)?;
            start_engine(dir, project).await
        }
        Commands::Config { command } => process_config_command(command, &app_dir).await,
    }
}

async fn process_config_command(command: ConfigCommand, app_dir: &Path) -> Result<()> {
    let store = JsonSettingsStore::new(app_dir);
    match command {
        ConfigCommand::Show => {
            let settings = store.load().await?;
            println!("settings file:   {}", store.path().display());
            println!("break interval:  {} min", settings.break_interval_minutes);
            println!(
                "break reminders: {}",
                if settings.break_reminders_enabled {
                    "on"
                } else {
                    "off"
                }
            );
            println!("log directory:   {}", settings.log_directory.display());
            println!("retention:       {} days", settings.data_retention_days);
            println!(
                "default project: {}",
                settings.project_tag.as_deref().unwrap_or("-")
            );
        }
        ConfigCommand::Set {
            break_interval,
            reminders,
            log_dir,
            retention_days,
            project,
        } => {
            let mut settings = store.load().await?;
            if let Some(v) = break_interval {
                settings.break_interval_minutes = v;
            }
            if let Some(v) = reminders {
                settings.break_reminders_enabled = v;
            }
            if let Some(v) = log_dir {
                settings.log_directory = v;
            }
            if let Some(v) = retention_days {
                settings.data_retention_days = v;
            }
            if let Some(v) = project {
                settings.project_tag = if v.is_empty() { None } else { Some(v) };
            }
            store.save(&settings).await?;
            println!("Settings updated");
        }
    }
    Ok(())
}
