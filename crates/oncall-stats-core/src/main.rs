//! On-Call Stats CLI
//!
//! Command-line interface for alert lifecycle statistics.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::info;

use oncall_stats::collector::StatisticsCaptureService;
use oncall_stats::db::{PgStatisticsStore, PostgresPool, StatisticsStore};
use oncall_stats::models::{
    GroupBy, PeriodType, ResolvedAlertsRequest, RuleConfig, StatisticsRequest,
};
use oncall_stats::query::StatisticsQueryService;
use oncall_stats::rules::RuleEngine;
use oncall_stats::Config;

/// On-Call Stats - alert lifecycle statistics
#[derive(Parser)]
#[command(name = "oncall-stats")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "ONCALL_STATS_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,

    /// Check database connectivity
    Health,

    /// Validate and test on-call rules
    Rules {
        #[command(subcommand)]
        command: RulesCommands,
    },

    /// Aggregate statistics over a fired-time range
    Stats {
        /// Requesting user
        #[arg(long)]
        user: String,

        /// Range start (RFC 3339)
        #[arg(long)]
        from: DateTime<Utc>,

        /// Range end (RFC 3339)
        #[arg(long)]
        to: DateTime<Utc>,

        /// Grouping dimension
        #[arg(long, value_enum, default_value = "overall")]
        group_by: GroupByArg,

        /// Period granularity for period grouping
        #[arg(long, value_enum, default_value = "day")]
        period: PeriodArg,

        /// Narrow to the user's active on-call rules
        #[arg(long)]
        apply_rules: bool,

        /// Fired time-of-day window, e.g. 22:00-06:00
        #[arg(long)]
        time_of_day: Option<String>,

        /// Maximum alert-name groups
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Recently resolved alerts
    Resolved {
        /// Requesting user
        #[arg(long)]
        user: Option<String>,

        /// Time range (e.g., "1h", "24h", "7d")
        #[arg(long, default_value = "24h")]
        last: String,

        /// Severity filter (repeatable)
        #[arg(long)]
        severity: Vec<String>,

        /// Team filter (repeatable)
        #[arg(long)]
        team: Vec<String>,

        /// Free text search
        #[arg(long)]
        search: Option<String>,

        /// Include hidden alerts
        #[arg(long)]
        include_hidden: bool,

        /// Include alerts silenced upstream
        #[arg(long)]
        include_silenced: bool,

        /// Maximum number of results
        #[arg(long, default_value = "100")]
        limit: usize,

        /// Results to skip
        #[arg(long, default_value = "0")]
        offset: usize,
    },

    /// Occurrences of one alert
    History {
        /// Alert fingerprint
        fingerprint: String,

        /// Maximum number of results
        #[arg(long, default_value = "50")]
        limit: usize,
    },

    /// Compute and store rollups
    Rollup {
        /// Period granularity
        #[arg(long, value_enum, default_value = "day")]
        period: PeriodArg,

        /// Time range
        #[arg(long, default_value = "7d")]
        last: String,
    },

    /// Delete occurrences older than the retention period
    Purge,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum RulesCommands {
    /// Validate a rule config file (JSON)
    Validate {
        /// Rule config file
        file: PathBuf,
    },

    /// Run a rule config against stored history without saving it
    Test {
        /// Requesting user
        #[arg(long)]
        user: String,

        /// Number of sample matches to return
        #[arg(long, default_value = "10")]
        sample_size: usize,

        /// Rule config file
        file: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum GroupByArg {
    Overall,
    Severity,
    Team,
    AlertName,
    Period,
}

impl From<GroupByArg> for GroupBy {
    fn from(arg: GroupByArg) -> Self {
        match arg {
            GroupByArg::Overall => GroupBy::Overall,
            GroupByArg::Severity => GroupBy::Severity,
            GroupByArg::Team => GroupBy::Team,
            GroupByArg::AlertName => GroupBy::AlertName,
            GroupByArg::Period => GroupBy::Period,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PeriodArg {
    Hour,
    Day,
    Week,
    Month,
}

impl From<PeriodArg> for PeriodType {
    fn from(arg: PeriodArg) -> Self {
        match arg {
            PeriodArg::Hour => PeriodType::Hour,
            PeriodArg::Day => PeriodType::Day,
            PeriodArg::Week => PeriodType::Week,
            PeriodArg::Month => PeriodType::Month,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config, cli.verbose);

    let result = match cli.command {
        Commands::Migrate => run_migrate(&config).await,
        Commands::Health => run_health(&config).await,
        Commands::Rules { command } => run_rules(&config, command).await,
        Commands::Stats {
            user,
            from,
            to,
            group_by,
            period,
            apply_rules,
            time_of_day,
            limit,
        } => {
            let mut request = StatisticsRequest::new(user, from, to).group_by(group_by.into());
            request.period_type = period.into();
            request.apply_on_call_rules = apply_rules;
            request.limit = limit;
            if let Some(window) = time_of_day.as_deref() {
                match window.split_once('-') {
                    Some((start, end)) => request = request.time_of_day(start, end),
                    None => {
                        eprintln!("Error: --time-of-day must look like HH:MM-HH:MM");
                        return ExitCode::FAILURE;
                    }
                }
            }
            run_stats(&config, request).await
        }
        Commands::Resolved {
            user,
            last,
            severity,
            team,
            search,
            include_hidden,
            include_silenced,
            limit,
            offset,
        } => match since(&last) {
            Ok(start) => {
                let request = ResolvedAlertsRequest {
                    user_id: user,
                    start_date: Some(start),
                    end_date: Some(Utc::now()),
                    severities: severity,
                    teams: team,
                    search,
                    include_hidden,
                    include_silenced,
                    limit: Some(limit),
                    offset,
                    ..ResolvedAlertsRequest::default()
                };
                run_resolved(&config, request).await
            }
            Err(e) => Err(e),
        },
        Commands::History { fingerprint, limit } => run_history(&config, &fingerprint, limit).await,
        Commands::Rollup { period, last } => run_rollup(&config, period.into(), &last).await,
        Commands::Purge => run_purge(&config).await,
        Commands::Completions { shell } => {
            generate_completions(shell);
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(config: &Config, verbose: bool) {
    let level = if verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    if config.logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

async fn connect(config: &Config) -> anyhow::Result<(PostgresPool, Arc<dyn StatisticsStore>)> {
    let pool = PostgresPool::new(&config.database)
        .await
        .context("connect to database")?;
    let store: Arc<dyn StatisticsStore> = Arc::new(PgStatisticsStore::new(&pool));
    Ok((pool, store))
}

fn since(last: &str) -> anyhow::Result<DateTime<Utc>> {
    let duration = humantime::parse_duration(last)
        .with_context(|| format!("invalid duration: {last}"))?;
    let duration = chrono::Duration::from_std(duration).context("duration out of range")?;
    Ok(Utc::now() - duration)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_rule_config(path: &Path) -> anyhow::Result<RuleConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read rule file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse rule file {}", path.display()))
}

async fn run_migrate(config: &Config) -> anyhow::Result<()> {
    let (pool, _) = connect(config).await?;
    info!("Running migrations...");
    pool.migrate().await?;
    info!("Migrations complete");
    Ok(())
}

async fn run_health(config: &Config) -> anyhow::Result<()> {
    let (pool, _) = connect(config).await?;
    pool.health_check().await?;
    print_json(&serde_json::json!({ "database": "ok" }))
}

async fn run_rules(config: &Config, command: RulesCommands) -> anyhow::Result<()> {
    match command {
        RulesCommands::Validate { file } => {
            let rule = read_rule_config(&file)?;
            let compiled = RuleEngine::validate_rule(&rule)?;
            print_json(&serde_json::json!({
                "valid": true,
                "logic": rule.logic,
                "criteria": compiled.criteria.len(),
            }))
        }
        RulesCommands::Test {
            user,
            sample_size,
            file,
        } => {
            let rule = read_rule_config(&file)?;
            let (_, store) = connect(config).await?;
            let result = RuleEngine::new(store)
                .test_rule(&user, &rule, sample_size)
                .await?;
            print_json(&result)
        }
    }
}

async fn run_stats(config: &Config, request: StatisticsRequest) -> anyhow::Result<()> {
    let (_, store) = connect(config).await?;
    let service = StatisticsQueryService::with_config(store, &config.statistics);
    let response = service.query_statistics(&request).await?;
    print_json(&response)
}

async fn run_resolved(config: &Config, request: ResolvedAlertsRequest) -> anyhow::Result<()> {
    let (_, store) = connect(config).await?;
    let service = StatisticsQueryService::with_config(store, &config.statistics);
    let response = service.query_resolved_alerts(&request).await?;
    print_json(&response)
}

async fn run_history(config: &Config, fingerprint: &str, limit: usize) -> anyhow::Result<()> {
    let (_, store) = connect(config).await?;
    let capture = StatisticsCaptureService::new(store);
    let history = capture.history(fingerprint, Some(limit)).await?;
    print_json(&history)
}

async fn run_rollup(config: &Config, period: PeriodType, last: &str) -> anyhow::Result<()> {
    let start = since(last)?;
    let (_, store) = connect(config).await?;
    let service = StatisticsQueryService::with_config(store, &config.statistics);
    let rollups = service.compute_rollups(period, start, Utc::now()).await?;
    print_json(&serde_json::json!({ "computed": rollups.len() }))
}

async fn run_purge(config: &Config) -> anyhow::Result<()> {
    let (_, store) = connect(config).await?;
    let capture =
        StatisticsCaptureService::new(store).with_retention_days(config.statistics.retention_days);
    let deleted = capture.purge_expired().await?;
    print_json(&serde_json::json!({ "deleted": deleted }))
}

fn generate_completions(shell: clap_complete::Shell) {
    use clap::CommandFactory;
    use clap_complete::generate;

    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "oncall-stats", &mut std::io::stdout());
}
