//! Portcullis CLI - signing secret generation and configuration checks
//!
//! Operator tool for preparing and checking a deployment: generate signing
//! secrets, try passwords against the policy, and validate the environment
//! configuration before starting a service.

use std::io::{self, BufRead, IsTerminal};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::Colorize;
use thiserror::Error;
use tracing::debug;

use portcullis::config::{ConfigError, PortcullisConfig};
use portcullis::observability::{self, LogFormat, ObservabilityConfig};
use portcullis::parse::format_duration;
use portcullis::password::{estimate_strength, PasswordPolicy, DEFAULT_MIN_LENGTH};
use portcullis::signing_secret::{calculate_entropy, SigningSecretPolicy};

/// Portcullis - authentication and session security tooling
#[derive(Parser)]
#[command(name = "portcullis")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a fresh signing secret
    GenSecret {
        /// Secret length in characters
        #[arg(short, long, default_value_t = 64)]
        length: usize,

        /// Require the strict policy (64+ chars, 128 bits, full diversity)
        #[arg(long)]
        strict: bool,
    },

    /// Check a password against the password policy (read from stdin)
    CheckPassword {
        /// Minimum length to enforce
        #[arg(long, env = "PORTCULLIS_PASSWORD_MIN_LENGTH", default_value_t = DEFAULT_MIN_LENGTH)]
        min_length: usize,
    },

    /// Load PORTCULLIS_* variables and validate them
    CheckConfig {
        /// Apply the strict signing-secret policy
        #[arg(long)]
        strict: bool,
    },
}

/// CLI error types
#[derive(Error, Debug)]
enum CliError {
    #[error("Configuration invalid: {0}")]
    Config(#[from] ConfigError),

    #[error("Password rejected: {0}")]
    WeakPassword(String),

    #[error("Failed to read input: {0}")]
    Io(#[from] io::Error),

    #[error("Generated secret did not meet the policy: {0}")]
    Generation(String),
}

type Result<T> = std::result::Result<T, CliError>;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_filter = if cli.verbose { "portcullis=debug" } else { "warn" };
    let _ = observability::init(
        &ObservabilityConfig::builder()
            .log_format(LogFormat::Compact)
            .log_filter(log_filter)
            .build(),
    );

    let result = match cli.command {
        Commands::GenSecret { length, strict } => cmd_gen_secret(length, strict),
        Commands::CheckPassword { min_length } => cmd_check_password(min_length),
        Commands::CheckConfig { strict } => cmd_check_config(strict),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error(&e.to_string());
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Command Implementations
// =============================================================================

fn cmd_gen_secret(length: usize, strict: bool) -> Result<()> {
    let mut policy = if strict {
        SigningSecretPolicy::strict()
    } else {
        SigningSecretPolicy::default()
    };
    policy.min_length = policy.min_length.max(length);

    let secret = policy.generate();
    policy
        .validate(&secret)
        .map_err(|e| CliError::Generation(e.to_string()))?;

    debug!(
        length = secret.chars().count(),
        entropy_bits = calculate_entropy(&secret),
        "Generated signing secret"
    );
    println!("{}", secret);
    Ok(())
}

fn cmd_check_password(min_length: usize) -> Result<()> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        info("Enter password, then press Enter:");
    }

    let mut password = String::new();
    stdin.lock().read_line(&mut password)?;
    let password = password.trim_end_matches(['\r', '\n']);

    let policy = PasswordPolicy::builder().min_length(min_length).build();
    let strength = estimate_strength(password);

    match policy.validate(password) {
        Ok(()) => {
            success(&format!("Password accepted (strength: {})", strength));
            Ok(())
        }
        Err(rule) => {
            warning(&format!("Strength: {}", strength));
            Err(CliError::WeakPassword(rule.to_string()))
        }
    }
}

fn cmd_check_config(strict: bool) -> Result<()> {
    let mut config = PortcullisConfig::from_env()?;
    if strict {
        config.signing_secret_policy = SigningSecretPolicy::strict();
    }
    config.validate()?;

    header("Configuration");
    field("issuer", &config.token.issuer);
    field("access token lifetime", &format_duration(config.token.access_ttl));
    field("refresh token lifetime", &format_duration(config.token.refresh_ttl));
    field(
        "lockout",
        &format!(
            "{} failures, {}",
            config.lockout.threshold,
            format_duration(config.lockout.lockout_duration)
        ),
    );
    for action in portcullis::RateLimitAction::ALL {
        let policy = config.rate_limits.for_action(action);
        field(
            &format!("{} rate limit", action),
            &format!("{}/{}", policy.max_attempts, format_duration(policy.window)),
        );
    }
    field("bcrypt cost", &config.hashing.cost.to_string());
    field("password minimum length", &config.password.min_length.to_string());
    field(
        "revocation failure policy",
        &format!("{:?}", config.revocation_failure_policy),
    );

    println!();
    success("Configuration valid");
    Ok(())
}

// =============================================================================
// Output
// =============================================================================

fn success(msg: &str) {
    println!("{} {}", "✓".green().bold(), msg);
}

fn error(msg: &str) {
    eprintln!("{} {}", "✗".red().bold(), msg);
}

fn warning(msg: &str) {
    println!("{} {}", "⚠".yellow().bold(), msg);
}

fn info(msg: &str) {
    println!("{} {}", "ℹ".blue().bold(), msg);
}

fn header(msg: &str) {
    println!("\n{}", msg.bold().underline());
}

fn field(name: &str, value: &str) {
    println!("  {:<28} {}", format!("{}:", name).dimmed(), value);
}
