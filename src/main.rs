use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use mailwarden::cache::CachePolicyRegistry;
use mailwarden::error::{user_message, ErrorClassifier, Sanitizer};
use mailwarden::logging::{init_logging, LogLevel, LoggingConfig};
use mailwarden::retry::RetryConfig;
use mailwarden::settings::Settings;

#[derive(Parser, Debug)]
#[command(name = "mailwarden")]
#[command(version)]
#[command(about = "Diagnostics for the mail client's remote-operation layer")]
struct Cli {
    /// Suppress all output except errors
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(long, short, action = ArgAction::Count, global = true, conflicts_with = "quiet")]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Classify a failure message and show what the user would see
    Classify {
        /// The raw failure message
        message: String,

        /// HTTP status the failure came with
        #[arg(long, value_name = "CODE")]
        status: Option<u16>,

        /// Print the normalized error as JSON
        #[arg(long)]
        json: bool,
    },
    /// Scrub URLs, credentials and paths from a message
    Sanitize {
        /// The message to scrub
        message: String,

        /// Maximum output length in characters
        #[arg(long, value_name = "CHARS")]
        max_len: Option<usize>,
    },
    /// Print the retry delay schedule
    Backoff {
        /// Settings file to read the retry section from
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Number of delays to print (defaults to max_retries)
        #[arg(long)]
        attempts: Option<u32>,
    },
    /// Look up cache retention and staleness for a resource key
    CachePolicy {
        /// Key segments, e.g. `mail messages`. Lists every entry when empty.
        segments: Vec<String>,
    },
    /// Load and validate a settings file
    CheckConfig {
        /// Path to the settings file
        #[arg(default_value = "mailwarden.toml")]
        path: PathBuf,
    },
}

/// Exit codes for commands that validate input
mod exit_codes {
    use std::process::ExitCode;

    pub fn invalid() -> ExitCode {
        ExitCode::from(1)
    }
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let logging = if cli.quiet {
        LoggingConfig::new().with_level(LogLevel::Error)
    } else {
        LoggingConfig::from_verbosity(cli.verbose)
    };
    init_logging(logging.with_timestamps(false))
        .map_err(|err| err as Box<dyn std::error::Error>)?;

    match cli.command {
        Commands::Classify {
            message,
            status,
            json,
        } => run_classify(&message, status, json),
        Commands::Sanitize { message, max_len } => {
            let sanitizer = match max_len {
                Some(max_len) => Sanitizer::new().with_max_len(max_len),
                None => Sanitizer::new(),
            };
            println!("{}", sanitizer.sanitize(&message));
            Ok(ExitCode::SUCCESS)
        }
        Commands::Backoff { config, attempts } => run_backoff(config, attempts),
        Commands::CachePolicy { segments } => {
            run_cache_policy(&segments);
            Ok(ExitCode::SUCCESS)
        }
        Commands::CheckConfig { path } => run_check_config(path, cli.quiet),
    }
}

fn run_classify(
    message: &str,
    status: Option<u16>,
    json: bool,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let classifier = ErrorClassifier::new();
    let error = match status {
        Some(status) => classifier.classify_status(status, message),
        None => classifier.classify_message(message),
    };
    let shown = user_message(&error, &Sanitizer::new());

    if json {
        let output = serde_json::json!({
            "error": error,
            "user_message": shown,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("kind:         {}", error.kind());
        println!("retryable:    {}", error.is_retryable());
        match error.status_code() {
            Some(code) => println!("status:       {}", code),
            None => println!("status:       -"),
        }
        println!("user message: {}", shown);
    }
    Ok(ExitCode::SUCCESS)
}

fn run_backoff(
    config: Option<PathBuf>,
    attempts: Option<u32>,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let retry = match config {
        Some(path) => Settings::load(path)?.retry,
        None => RetryConfig::default(),
    };

    let count = attempts.unwrap_or(retry.max_retries);
    let mut total_ms: u64 = 0;
    for attempt in 0..count {
        let delay_ms = mailwarden::millis(retry.delay_for_attempt(attempt));
        total_ms = total_ms.saturating_add(delay_ms);
        println!("retry {:>2}: {:>6}ms", attempt + 1, delay_ms);
    }
    println!("total:    {:>6}ms over {} calls", total_ms, count + 1);
    Ok(ExitCode::SUCCESS)
}

fn run_cache_policy(segments: &[String]) {
    let registry = CachePolicyRegistry::standard();

    if segments.is_empty() {
        for entry in registry.entries() {
            println!(
                "{:<16} ttl={:<10} stale_after={}ms",
                entry.key.to_string(),
                entry.ttl.to_string(),
                entry.stale_after.as_millis()
            );
        }
        return;
    }

    let segments: Vec<&str> = segments.iter().map(String::as_str).collect();
    let matched = registry
        .policy_for(&segments)
        .map(|entry| entry.key.to_string())
        .unwrap_or_else(|| "default".to_string());

    println!("key:         {}", segments.join("/"));
    println!("matched:     {}", matched);
    println!("ttl:         {}", registry.ttl_for(&segments));
    println!("stale after: {}ms", registry.stale_after(&segments).as_millis());
}

fn run_check_config(path: PathBuf, quiet: bool) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let settings = match Settings::load(&path) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("error: {}", err);
            return Ok(exit_codes::invalid());
        }
    };

    if !quiet {
        println!("{}: ok", path.display());
        println!("environment: {:?}", settings.environment);
        println!(
            "retry: max_retries={} initial_delay_ms={} max_delay_ms={} multiplier={}",
            settings.retry.max_retries,
            settings.retry.initial_delay_ms,
            settings.retry.max_delay_ms,
            settings.retry.backoff_multiplier
        );
        for name in settings.rate_limit_names() {
            if let Some(limit) = settings.rate_limit(name) {
                println!(
                    "rate limit {}: {} per {}ms",
                    name, limit.max_requests, limit.window_ms
                );
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}
