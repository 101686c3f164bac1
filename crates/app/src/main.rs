use std::fmt;

use services::{AppServices, Beat, Clock, Config, TickOutcome, ViewOutcome};
use study_core::model::{
    ActivityKey, Difficulty, PathId, PathKey, ResourceId, TopicDefinition, UserId,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingFlag { flag: &'static str },
    UnknownArg(String),
    UnknownCommand(String),
    InvalidNumber { flag: &'static str, raw: String },
    InvalidDbUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingFlag { flag } => write!(f, "{flag} is required for this command"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::UnknownCommand(cmd) => write!(f, "unknown subcommand: {cmd}"),
            ArgsError::InvalidNumber { flag, raw } => write!(f, "invalid {flag} value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn parse_number(value: String, flag: &'static str) -> Result<u64, ArgsError> {
    value
        .trim()
        .parse()
        .map_err(|_| ArgsError::InvalidNumber { flag, raw: value })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Seed,
    View,
    Heartbeat,
    Progress,
    Report,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "seed" => Some(Self::Seed),
            "view" => Some(Self::View),
            "heartbeat" => Some(Self::Heartbeat),
            "progress" => Some(Self::Progress),
            "report" => Some(Self::Report),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct Args {
    db_url: Option<String>,
    user: u64,
    path: Option<u64>,
    topic: Option<String>,
    resource: Option<String>,
    beats: u32,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut parsed = Self {
            user: 1,
            beats: 1,
            ..Self::default()
        };

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    parsed.db_url = Some(normalize_sqlite_url(value));
                }
                "--user" => parsed.user = parse_number(require_value(args, "--user")?, "--user")?,
                "--path" => {
                    parsed.path = Some(parse_number(require_value(args, "--path")?, "--path")?);
                }
                "--topic" => parsed.topic = Some(require_value(args, "--topic")?),
                "--resource" => parsed.resource = Some(require_value(args, "--resource")?),
                "--beats" => {
                    let value = require_value(args, "--beats")?;
                    parsed.beats = value
                        .trim()
                        .parse()
                        .map_err(|_| ArgsError::InvalidNumber {
                            flag: "--beats",
                            raw: value.clone(),
                        })?;
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }
        Ok(parsed)
    }

    fn user_id(&self) -> UserId {
        UserId::new(self.user)
    }

    fn path_key(&self) -> Result<PathKey, ArgsError> {
        let path = self.path.ok_or(ArgsError::MissingFlag { flag: "--path" })?;
        Ok(PathKey::new(self.user_id(), PathId::new(path)))
    }

    fn activity_key(&self) -> Result<ActivityKey, ArgsError> {
        let path = self.path_key()?;
        let topic = self
            .topic
            .clone()
            .ok_or(ArgsError::MissingFlag { flag: "--topic" })?;
        Ok(ActivityKey::new(path.user_id, path.path_id, topic.as_str()))
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  study seed      [--db <url>] [--user <id>]");
    eprintln!("  study view      --path <id> --topic <name> --resource <id> [--user <id>]");
    eprintln!("  study heartbeat --path <id> --topic <name> [--beats <n>] [--user <id>]");
    eprintln!("  study progress  --path <id> [--user <id>]");
    eprintln!("  study report    [--user <id>]");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db sqlite://study.sqlite3  --user 1  --beats 1");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  LEARN_DB_URL, LEARN_HEARTBEAT_SECS, LEARN_RETRY_MAX_ATTEMPTS,");
    eprintln!("  LEARN_AI_API_KEY, RUST_LOG");
}

fn normalize_sqlite_url(raw: String) -> String {
    let trimmed = raw.trim().to_string();
    if trimmed == "sqlite::memory:"
        || trimmed.starts_with("sqlite://")
        || trimmed.starts_with("sqlite:file:")
    {
        return trimmed;
    }

    let path_str = trimmed.strip_prefix("sqlite:").unwrap_or(trimmed.as_str());
    let path = std::path::Path::new(path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

/// Create the database file so the pool can open it.
fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    let Some(path) = db_url.strip_prefix("sqlite://") else {
        return Ok(());
    };
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv = std::env::args().skip(1);
    let cmd = match argv.next() {
        None => {
            print_usage();
            return Ok(());
        }
        Some(first) if first == "--help" || first == "-h" => {
            print_usage();
            return Ok(());
        }
        Some(first) => Command::from_arg(&first).ok_or_else(|| {
            print_usage();
            ArgsError::UnknownCommand(first)
        })?,
    };
    let args = Args::parse(&mut argv).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let mut config = Config::from_env()?;
    if let Some(db_url) = &args.db_url {
        config.database_url.clone_from(db_url);
    }
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    prepare_sqlite_file(&config.database_url)?;
    let app = AppServices::new_sqlite(&config, Clock::System).await?;
    info!(db = %config.database_url, ?cmd, "study tracker ready");

    match cmd {
        Command::Seed => seed(&app, &args).await,
        Command::View => view(&app, &args).await,
        Command::Heartbeat => heartbeat(&app, &args).await,
        Command::Progress => progress(&app, &args).await,
        Command::Report => report(&app, &args).await,
    }
}

async fn seed(app: &AppServices, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let resources = |names: &[&str]| -> Vec<ResourceId> {
        names.iter().map(|n| ResourceId::new(*n)).collect()
    };
    let topics = vec![
        TopicDefinition::new(
            "Ownership",
            resources(&["book-ch4", "rustlings-move", "video-ownership"]),
        ),
        TopicDefinition::new("Lifetimes", resources(&["book-ch10-3", "nomicon-lifetimes"])),
        TopicDefinition::new("Traits", resources(&["book-ch10-2", "rust-by-example-traits"])),
    ];
    let path_id = app
        .paths()
        .create_path(args.user_id(), "Rust", Difficulty::Beginner, topics)
        .await?;
    println!("Seeded path {path_id} for user {}", args.user);
    Ok(())
}

async fn view(app: &AppServices, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let key = args.activity_key()?;
    let resource = args
        .resource
        .clone()
        .ok_or(ArgsError::MissingFlag { flag: "--resource" })?;
    let report = app.views().view(&key, &ResourceId::new(resource)).await?;
    match report.outcome {
        ViewOutcome::Marked { version } => println!("Marked viewed (version {version})"),
        ViewOutcome::AlreadyMarked => println!("Already viewed"),
    }
    if let Some(refresh) = report.progress {
        println!(
            "Path: {:.2}%{}",
            refresh.report.path_progress * 100.0,
            if refresh.persisted { ", saved" } else { "" }
        );
    }
    Ok(())
}

async fn heartbeat(app: &AppServices, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let key = args.activity_key()?;
    let timer = app.timer();
    let interval = timer.heartbeat().interval().to_std()?;
    let mut session = timer.init(key).await?;

    for beat in 0..args.beats {
        if beat > 0 {
            tokio::time::sleep(interval).await;
        }
        let tick = match timer.beat(&mut session, Clock::System.now()).await? {
            Beat::Ticked(tick) => tick,
            Beat::Conflicted {
                attempts,
                user_minutes,
            } => {
                warn!(key = %session.key(), attempts, "heartbeat lost the write race");
                println!(
                    "beat {}: not recorded (conflict), total {user_minutes:.2} min",
                    beat + 1
                );
                continue;
            }
        };
        let label = match tick.outcome {
            TickOutcome::Recorded => "recorded",
            TickOutcome::Coalesced => "coalesced",
        };
        println!(
            "beat {}: {label}, topic {:.2} min, total {:.2} min",
            beat + 1,
            tick.topic_minutes,
            tick.user_minutes
        );
    }
    Ok(())
}

async fn progress(app: &AppServices, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let refresh = app.progress().refresh(&args.path_key()?).await?;
    let report = &refresh.report;
    for topic in &report.topics {
        let average = topic
            .assessment_average
            .map_or_else(|| "-".to_string(), |a| format!("{a:.2}"));
        println!(
            "{:<20} resources {:>5.1}%  assessment {average:>5}  {}",
            topic.name.as_str(),
            topic.resource_progress * 100.0,
            if topic.complete { "complete" } else { "" }
        );
    }
    println!(
        "Path: {:.2}% ({}/{} topics, {}/{} resources){}",
        report.path_progress * 100.0,
        report.completed_topics,
        report.total_topics(),
        report.viewed_resources,
        report.total_resources,
        if refresh.persisted { ", saved" } else { "" }
    );
    Ok(())
}

async fn report(app: &AppServices, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let summary = app.analytics().summary(args.user_id()).await?;
    println!("Total study time: {:.2} min", summary.total_minutes);
    for entry in &summary.topic_minutes {
        println!("  path {} / {}: {:.2} min", entry.path_id, entry.topic, entry.minutes);
    }
    for line in &summary.recommendations {
        println!("- {line}");
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
