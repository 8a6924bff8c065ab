//! CLI module
//!
//! This module provides the command-line interface for taskrank. Every
//! command works directly on the local data file; `serve` exposes the same
//! list over HTTP.

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Utc};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use colored::{ColoredString, Colorize};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::api::{serve, ServerConfig};
use crate::controller::{ControllerError, TaskList};
use crate::models::{
    parse_due_date, Event, Notification, NotificationLevel, Task, TaskDraft, TaskId, Theme,
};
use crate::oracle::{GeminiBackend, OracleConfig, DEFAULT_ENDPOINT, DEFAULT_MODEL};
use crate::store::JsonFileStore;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON file holding tasks, preferences and the API key
    #[arg(long, env = "TASKRANK_DATA", default_value = "taskrank.json", global = true)]
    data_file: PathBuf,

    /// Base URL of the Gemini API
    #[arg(long, env = "TASKRANK_ENDPOINT", default_value = DEFAULT_ENDPOINT, global = true)]
    endpoint: String,

    /// Model used to score tasks
    #[arg(long, env = "TASKRANK_MODEL", default_value = DEFAULT_MODEL, global = true)]
    model: String,

    /// HTTP timeout for each scoring request, in seconds
    #[arg(long, env = "TASKRANK_TIMEOUT_SECS", default_value_t = 30, global = true)]
    timeout_secs: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the taskrank API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value_t = 3000)]
        port: u16,
    },

    /// Show the ranked task list
    List,

    /// Add a task and re-rank the list
    Add {
        /// Task name
        name: String,

        /// Free-form details
        #[arg(short, long)]
        details: Option<String>,

        /// Due date (RFC 3339, YYYY-MM-DDTHH:MM or YYYY-MM-DD, UTC)
        #[arg(long, value_parser = parse_due)]
        due: Option<DateTime<Utc>>,
    },

    /// Replace a task's name, details and due date, then re-rank
    Edit {
        /// Task id, as shown by `list`
        id: TaskId,

        /// New task name
        name: String,

        /// New details; omit to clear them
        #[arg(short, long)]
        details: Option<String>,

        /// New due date; omit to clear it
        #[arg(long, value_parser = parse_due)]
        due: Option<DateTime<Utc>>,
    },

    /// Delete a task and re-rank the rest
    Delete {
        /// Task id
        id: TaskId,
    },

    /// Mark a task done, or not done again
    Toggle {
        /// Task id
        id: TaskId,
    },

    /// Manage the Gemini API key
    Key {
        #[command(subcommand)]
        command: KeyCommands,
    },

    /// Manage the colour theme preference
    Theme {
        #[command(subcommand)]
        command: ThemeCommands,
    },

    /// Generate shell completions
    Completions {
        /// The shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum KeyCommands {
    /// Validate and store an API key
    Set {
        /// The 39 character key
        key: String,
    },

    /// Remove the stored key
    Clear,

    /// Show whether a key is stored
    Status,
}

#[derive(Subcommand)]
enum ThemeCommands {
    /// Show the saved theme
    Show,

    /// Save a theme
    Set {
        /// light or dark
        theme: Theme,
    },

    /// Switch between light and dark
    Toggle,
}

/// Parses a due date given on the command line
fn parse_due(raw: &str) -> Result<DateTime<Utc>, String> {
    parse_due_date(raw).ok_or_else(|| {
        format!(
            "invalid due date '{}', expected RFC 3339, YYYY-MM-DDTHH:MM or YYYY-MM-DD",
            raw.trim()
        )
    })
}

fn draft(name: &str, details: &Option<String>, due: &Option<DateTime<Utc>>) -> TaskDraft {
    TaskDraft {
        name: name.to_string(),
        details: details.clone(),
        due_date: *due,
    }
}

fn open_list(cli: &Cli) -> Result<TaskList, Box<dyn std::error::Error>> {
    let backend = GeminiBackend::new(OracleConfig {
        endpoint: cli.endpoint.clone(),
        model: cli.model.clone(),
        timeout: Duration::from_secs(cli.timeout_secs),
        ..OracleConfig::default()
    })?;
    tracing::debug!(data_file = %cli.data_file.display(), model = %cli.model, "opening task list");
    Ok(TaskList::new(
        Arc::new(JsonFileStore::new(&cli.data_file)),
        Arc::new(backend),
    ))
}

/// Run the CLI application
pub async fn run() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Completions { shell } => {
            // Generate completions for the specified shell
            let mut cmd = Cli::command();
            let bin_name = cmd.get_name().to_string();
            generate(*shell, &mut cmd, bin_name, &mut io::stdout());
            Ok(ExitCode::SUCCESS)
        }

        Commands::Serve { port } => {
            println!("Starting taskrank API server on port {}...", port);
            let list = Arc::new(open_list(&cli)?);
            let config = ServerConfig {
                address: ([127, 0, 0, 1], *port).into(),
            };
            serve(list, config).await?;
            Ok(ExitCode::SUCCESS)
        }

        command => {
            let list = open_list(&cli)?;
            let printer = tokio::spawn(print_events(list.subscribe()));

            let result = execute(command, &list).await;

            // Closing the channel lets the printer finish.
            drop(list);
            if let Some(tasks) = printer.await? {
                print_tasks(&tasks, Utc::now());
            }

            match result {
                Ok(true) => Ok(ExitCode::SUCCESS),
                Ok(false) => Ok(ExitCode::FAILURE),
                Err(e) => {
                    tracing::debug!(error = %e, "command failed");
                    Ok(ExitCode::FAILURE)
                }
            }
        }
    }
}

fn not_found(id: TaskId) -> bool {
    eprintln!("{}", format!("No task with id {}", id).yellow());
    false
}

/// Runs one list command; `Ok(false)` means the task id was unknown
async fn execute(command: &Commands, list: &TaskList) -> Result<bool, ControllerError> {
    match command {
        Commands::List => {
            list.load().await?;
        }

        Commands::Add { name, details, due } => {
            list.add(draft(name, details, due)).await?;
        }

        Commands::Edit {
            id,
            name,
            details,
            due,
        } => {
            if list.edit(*id, draft(name, details, due)).await?.is_none() {
                return Ok(not_found(*id));
            }
        }

        Commands::Delete { id } => {
            if list.delete(*id).await?.is_none() {
                return Ok(not_found(*id));
            }
        }

        Commands::Toggle { id } => {
            if list.toggle_complete(*id).await?.is_none() {
                return Ok(not_found(*id));
            }
        }

        Commands::Key { command } => match command {
            KeyCommands::Set { key } => list.set_credential(key).await?,
            KeyCommands::Clear => list.clear_credential().await?,
            KeyCommands::Status => {
                if list.has_credential().await? {
                    println!("API key: {}", "configured".green());
                } else {
                    println!("API key: {}", "not configured".yellow());
                }
            }
        },

        Commands::Theme { command } => match command {
            ThemeCommands::Show => match list.theme().await? {
                Some(theme) => println!("Theme: {}", theme),
                None => println!("Theme: not set (following the system preference)"),
            },
            ThemeCommands::Set { theme } => {
                list.set_theme(*theme).await?;
                println!("Theme set to {}", theme);
            }
            ThemeCommands::Toggle => {
                let theme = list.toggle_theme(Theme::Light).await?;
                println!("Theme set to {}", theme);
            }
        },

        Commands::Serve { .. } | Commands::Completions { .. } => {}
    }
    Ok(true)
}

/// Prints notifications as they arrive and returns the last rendered list
async fn print_events(mut events: broadcast::Receiver<Event>) -> Option<Vec<Task>> {
    let mut last_render = None;
    loop {
        match events.recv().await {
            Ok(Event::Notify(notification)) => print_notification(&notification),
            Ok(Event::Busy(true)) => println!("{}", "Re-ranking tasks...".dimmed()),
            Ok(Event::Busy(false)) => {}
            Ok(Event::Render(tasks)) => last_render = Some(tasks),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "missed events while printing");
            }
            Err(RecvError::Closed) => break,
        }
    }
    last_render
}

fn print_notification(notification: &Notification) {
    let message = notification.message.as_str();
    match notification.level {
        NotificationLevel::Info => println!("{}", message.blue()),
        NotificationLevel::Success => println!("{}", message.green()),
        NotificationLevel::Warning => eprintln!("{}", message.yellow()),
        NotificationLevel::Error => eprintln!("{}", message.red().bold()),
    }
}

fn priority_badge(priority: u8) -> ColoredString {
    let badge = format!("[{:>2}]", priority);
    match priority {
        8..=10 => badge.red().bold(),
        5..=7 => badge.yellow(),
        _ => badge.green(),
    }
}

/// Short due date, with the year only when it differs from `now`'s
fn describe_due(due: DateTime<Utc>, now: DateTime<Utc>) -> String {
    if due.year() == now.year() {
        due.format("%b %-d %-I:%M %p").to_string()
    } else {
        due.format("%b %-d, %Y %-I:%M %p").to_string()
    }
}

fn print_tasks(tasks: &[Task], now: DateTime<Utc>) {
    if tasks.is_empty() {
        println!("No tasks yet. Add one with 'taskrank add <name>'");
        return;
    }

    for task in tasks {
        let check = if task.is_completed() { "[x]" } else { "[ ]" };
        let name = if task.is_completed() {
            task.name().dimmed().strikethrough()
        } else {
            task.name().bold()
        };
        println!(
            "{} {} {} {}",
            priority_badge(task.priority()),
            check,
            name,
            format!("(id: {})", task.id()).dimmed()
        );

        if let Some(details) = task.details() {
            println!("         {}", details.dimmed());
        }
        if let Some(due) = task.due_date() {
            let line = format!("due {}", describe_due(due, now));
            if task.is_overdue(now) && !task.is_completed() {
                println!("         {} {}", line.red(), "overdue".red().bold());
            } else {
                println!("         {}", line.dimmed());
            }
        }
    }
}
