use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use petcare_core::{Interval, ScheduleKind, compute_next, parse_local_to_utc, parse_timezone, to_local_minute};
use tracing_subscriber::EnvFilter;

mod auth;
mod config;
mod schedule_cmd;
mod state;

use schedule_cmd::ScheduleCommand;

#[derive(Parser, Debug)]
#[command(name = "petcare", version, about = "Pet routine and medication schedules")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write or print ~/.petcare/config.toml
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Manage the API token in ~/.petcare/auth.json
    Auth {
        #[command(subcommand)]
        command: AuthCommand,
    },

    /// Care routines (walks, grooming, feeding)
    Routines {
        #[command(subcommand)]
        command: ScheduleCommand,
    },

    /// Medications and doses
    Medications {
        #[command(subcommand)]
        command: ScheduleCommand,
    },

    /// Compute the next due time offline
    Next {
        /// Declared start, "YYYY-MM-DD HH:MM"
        #[arg(long)]
        start: String,

        /// Interval, e.g. "2 days", "3w", "every month"
        #[arg(long)]
        every: String,

        /// Reference time, "YYYY-MM-DD HH:MM" (default: now)
        #[arg(long)]
        now: Option<String>,

        /// IANA timezone (default: schedule.timezone from config)
        #[arg(long)]
        tz: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Write the default config if none exists
    Init,
    /// Print the effective config
    Show,
}

#[derive(Subcommand, Debug)]
enum AuthCommand {
    /// Store an API token (prompts when --token is omitted)
    SetToken {
        #[arg(long)]
        token: Option<String>,
    },
    /// Forget the stored token
    Clear,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("PETCARE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Config { command } => match command {
            ConfigCommand::Init => config::init_config()?,
            ConfigCommand::Show => config::show_config()?,
        },

        Command::Auth { command } => match command {
            AuthCommand::SetToken { token } => auth::set_token(token)?,
            AuthCommand::Clear => auth::clear_token()?,
        },

        Command::Routines { command } => schedule_cmd::run(ScheduleKind::Routine, command).await?,

        Command::Medications { command } => {
            schedule_cmd::run(ScheduleKind::Medication, command).await?
        }

        Command::Next {
            start,
            every,
            now,
            tz,
        } => next(&start, &every, now.as_deref(), tz)?,
    }

    Ok(())
}

fn next(start: &str, every: &str, now: Option<&str>, tz: Option<String>) -> Result<()> {
    let tz_name = match tz {
        Some(tz) => tz,
        None => config::load_config()?.schedule.timezone,
    };
    let tz = parse_timezone(&tz_name).with_context(|| format!("timezone {tz_name:?}"))?;

    let interval: Interval = every.parse().with_context(|| format!("interval {every:?}"))?;
    let start = parse_local_to_utc(start, tz)?;
    let now = match now {
        Some(raw) => parse_local_to_utc(raw, tz)?,
        None => Utc::now(),
    };

    let occ = compute_next(start, interval, now);
    println!("interval: {interval}");
    match occ.effective_last {
        Some(last) => println!("last:     {}", to_local_minute(last, tz)),
        None => println!("last:     (not started)"),
    }
    println!("next:     {}", to_local_minute(occ.next_due, tz));
    Ok(())
}
