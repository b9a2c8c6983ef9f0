//! Growth CLI - operate the referral growth store from the shell
//!
//! Every subcommand is one independent request against the configured
//! database. Results are printed to stdout as JSON; logs go to stderr.
//!
//! ## Usage
//!
//! ```bash
//! growth_cli migrate
//! growth_cli click <code> <ip> <user_agent> [session_id] [landing_url]
//! growth_cli award <signup_id> <source> <source_id> <amount>
//! growth_cli complete-profile <signup_id>
//! growth_cli qualify <signup_id>
//! growth_cli leaderboard <weekly|all_time> [limit] [--creators]
//! growth_cli rank <signup_id> <weekly|all_time> [--creators]
//! growth_cli summary <signup_id>
//! growth_cli position <signup_id>
//! ```
//!
//! ## Environment Variables
//!
//! - `GROWTH_DB_PATH` - SQLite database path (default: /var/lib/waitlist/growth.db)
//! - `GROWTH_SCHEMA_DIR` - Migrations directory (default: embedded schema)
//! - `GROWTH_HASH_KEY` - Secret for IP / user-agent digests
//! - `GROWTH_LEADERBOARD_LIMIT` - Default leaderboard size (default: 25)
//! - `RUST_LOG` - Log level (default: info)

use dotenv::dotenv;
use log::info;
use serde_json::{json, Value};
use std::str::FromStr;
use waitlist_growth::config::GrowthConfig;
use waitlist_growth::growth::{
    ClickInput, Eligibility, GrowthError, GrowthResult, GrowthService, Period, PointsSource,
    SignupId,
};

const USAGE: &str = "Usage: growth_cli <migrate|click|award|complete-profile|qualify|leaderboard|rank|summary|position> [args...]";

#[derive(Debug)]
enum Command {
    Migrate,
    Click(ClickInput),
    Award {
        signup_id: SignupId,
        source: PointsSource,
        source_id: String,
        amount: i64,
    },
    CompleteProfile(SignupId),
    Qualify(SignupId),
    Leaderboard {
        period: Period,
        limit: Option<usize>,
        eligibility: Eligibility,
    },
    Rank {
        signup_id: SignupId,
        period: Period,
        eligibility: Eligibility,
    },
    Summary(SignupId),
    Position(SignupId),
}

impl Command {
    fn from_args(args: &[String]) -> Result<Self, Box<dyn std::error::Error>> {
        // `--creators` may appear anywhere; everything else is positional
        let eligibility = if args.iter().any(|a| a == "--creators") {
            Eligibility::Creators
        } else {
            Eligibility::AnyReferrer
        };
        let positional: Vec<&str> = args
            .iter()
            .map(String::as_str)
            .filter(|a| *a != "--creators")
            .collect();

        let (name, rest) = positional.split_first().ok_or(USAGE)?;
        let arg = |i: usize, what: &str| nth_arg(rest, i, what, name);

        let command = match *name {
            "migrate" => Command::Migrate,
            "click" => Command::Click(ClickInput {
                referral_code: arg(0, "code")?.to_string(),
                raw_ip: Some(arg(1, "ip")?.to_string()),
                raw_user_agent: Some(arg(2, "user_agent")?.to_string()),
                session_id: rest.get(3).map(|s| s.to_string()),
                landing_url: rest.get(4).map(|s| s.to_string()),
            }),
            "award" => Command::Award {
                signup_id: parse_id(arg(0, "signup_id")?)?,
                source: PointsSource::from(arg(1, "source")?),
                source_id: arg(2, "source_id")?.to_string(),
                amount: {
                    let raw = arg(3, "amount")?;
                    raw.parse().map_err(|_| format!("Invalid amount: {}", raw))?
                },
            },
            "complete-profile" => Command::CompleteProfile(parse_id(arg(0, "signup_id")?)?),
            "qualify" => Command::Qualify(parse_id(arg(0, "signup_id")?)?),
            "leaderboard" => Command::Leaderboard {
                period: Period::from_str(arg(0, "period")?)?,
                limit: match rest.get(1) {
                    Some(raw) => Some(raw.parse().map_err(|_| format!("Invalid limit: {}", raw))?),
                    None => None,
                },
                eligibility,
            },
            "rank" => Command::Rank {
                signup_id: parse_id(arg(0, "signup_id")?)?,
                period: Period::from_str(arg(1, "period")?)?,
                eligibility,
            },
            "summary" => Command::Summary(parse_id(arg(0, "signup_id")?)?),
            "position" => Command::Position(parse_id(arg(0, "signup_id")?)?),
            other => return Err(format!("Unknown command `{}`. {}", other, USAGE).into()),
        };

        Ok(command)
    }
}

fn nth_arg<'a>(rest: &[&'a str], i: usize, what: &str, command: &str) -> Result<&'a str, String> {
    rest.get(i)
        .copied()
        .ok_or_else(|| format!("Missing <{}> for `{}`. {}", what, command, USAGE))
}

fn parse_id(raw: &str) -> Result<SignupId, GrowthError> {
    raw.parse()
        .map_err(|_| GrowthError::InvalidInput(format!("invalid signup id: {}", raw)))
}

fn execute(service: &GrowthService, command: Command, default_limit: usize) -> GrowthResult<Value> {
    let output = match command {
        Command::Migrate => json!({ "migrated": true }),
        Command::Click(input) => json!(service.record_click(&input)?),
        Command::Award {
            signup_id,
            source,
            source_id,
            amount,
        } => json!(service.award(signup_id, &source, &source_id, amount)?),
        Command::CompleteProfile(signup_id) => json!(service.complete_profile(signup_id)?),
        Command::Qualify(signup_id) => json!(service.qualify_on_profile_completion(signup_id)?),
        Command::Leaderboard {
            period,
            limit,
            eligibility,
        } => json!(service.leaderboard(period, eligibility, limit.unwrap_or(default_limit))?),
        Command::Rank {
            signup_id,
            period,
            eligibility,
        } => json!({
            "signup_id": signup_id,
            "period": period,
            "rank": service.rank_for(signup_id, period, eligibility)?,
        }),
        Command::Summary(signup_id) => json!(service.summarize(signup_id)?),
        Command::Position(signup_id) => json!(service.position(signup_id)?),
    };
    Ok(output)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = Command::from_args(&args)?;
    let config = GrowthConfig::from_env();

    info!("🔧 Opening growth store: {}", config.db_path);

    // rusqlite is blocking; keep it off the async worker threads
    let output = tokio::task::spawn_blocking(move || -> GrowthResult<Value> {
        let service = GrowthService::from_config(&config)?;
        execute(&service, command, config.leaderboard_limit)
    })
    .await??;

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
