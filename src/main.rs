use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{ArgGroup, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod analysis;
mod churn;
mod classify;
mod client;
mod config;
mod cycle;
mod models;
mod payload;
mod report;
mod risk;
mod timeline;

use analysis::{AnalysisSettings, AnalysisSnapshot, AnalysisStore, BatchRequest, TicketRef};
use client::{HistorySource, ProxyClient};
use config::Settings;
use payload::ResolutionMetrics;
use report::{CycleTimes, SortKey};
use risk::RiskThresholds;

#[derive(Parser)]
#[command(name = "workflow-health")]
#[command(about = "Aging, churn and cycle-time analytics for tracker tickets", long_about = None)]
struct Cli {
    /// Proxy base URL (overrides WORKFLOW_HEALTH_PROXY_URL)
    #[arg(long, global = true)]
    proxy_url: Option<String>,
    /// Churn score at which a ticket is flagged (overrides WORKFLOW_HEALTH_CHURN_THRESHOLD)
    #[arg(long, global = true)]
    churn_threshold: Option<u32>,
    /// Maximum concurrent history requests (overrides WORKFLOW_HEALTH_CONCURRENCY)
    #[arg(long, global = true)]
    concurrency: Option<usize>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify the proxy can reach the tracker
    Check,
    /// List boards visible to the proxy credentials
    Boards,
    /// List sprints for a board
    Sprints {
        #[arg(long)]
        board: String,
    },
    /// Show the aging thresholds in effect
    Thresholds,
    /// Analyze every ticket on a board or sprint
    #[command(group(
        ArgGroup::new("only")
            .args(["aging_only", "churn_only"])
            .multiple(false)
    ))]
    Analyze {
        #[arg(long)]
        board: String,
        #[arg(long)]
        sprint: Option<u64>,
        #[arg(long)]
        aging_only: bool,
        #[arg(long)]
        churn_only: bool,
        #[arg(long, value_enum, default_value_t = SortKey::Risk)]
        sort: SortKey,
        #[arg(long, default_value_t = 50)]
        limit: usize,
        /// Also write the full result set as CSV
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Show the status timeline and analysis for one ticket
    Ticket { key: String },
    /// Generate a markdown report
    Report {
        #[arg(long)]
        board: String,
        #[arg(long)]
        sprint: Option<u64>,
        #[arg(long, default_value = "workflow-health.md")]
        out: PathBuf,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();
}

async fn load_thresholds(client: &ProxyClient) -> RiskThresholds {
    let mut thresholds = RiskThresholds::default();
    match client.aging_thresholds().await {
        Ok(overrides) => {
            tracing::debug!(?overrides, "loaded aging thresholds from proxy");
            thresholds.merge(overrides);
        }
        Err(err) => tracing::warn!(error = %err, "using default aging thresholds"),
    }
    thresholds
}

/// One full fetch cycle: search, metrics, then per-ticket histories.
async fn fetch_cycle(
    client: &ProxyClient,
    settings: &Settings,
    store: &mut AnalysisStore,
    board: &str,
    sprint: Option<u64>,
) -> anyhow::Result<Option<ResolutionMetrics>> {
    let analysis_settings = AnalysisSettings {
        thresholds: load_thresholds(client).await,
        churn_threshold: settings.churn_threshold,
    };

    let issues = client
        .search_issues(Some(board), sprint)
        .await
        .with_context(|| format!("failed to search tickets for board {board}"))?;

    let metrics = match client.resolution_metrics(Some(board), sprint).await {
        Ok(metrics) => Some(metrics),
        Err(err) => {
            tracing::warn!(error = %err, "resolution metrics unavailable, computing locally");
            None
        }
    };

    let token = store.begin_cycle();
    let tickets = issues
        .iter()
        .map(|issue| TicketRef {
            key: issue.key.clone(),
            status: issue.status().map(str::to_string),
        })
        .collect();

    let snapshot = analysis::run_batch(
        client,
        BatchRequest {
            tickets,
            concurrency: settings.concurrency,
            token,
            tracker: store.tracker(),
            settings: &analysis_settings,
            metrics: metrics.as_ref(),
            now: Utc::now(),
        },
    )
    .await;

    anyhow::ensure!(store.install(snapshot), "fetch cycle was superseded");
    Ok(metrics)
}

fn current_snapshot(store: &AnalysisStore) -> anyhow::Result<&AnalysisSnapshot> {
    store.snapshot().context("no analysis results for the current fetch cycle")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let mut settings = Settings::from_env()?;
    if let Some(url) = cli.proxy_url {
        settings.proxy_url = url.trim_end_matches('/').to_string();
    }
    if let Some(threshold) = cli.churn_threshold {
        settings.churn_threshold = threshold;
    }
    if let Some(concurrency) = cli.concurrency {
        anyhow::ensure!(concurrency > 0, "--concurrency must be at least 1");
        settings.concurrency = concurrency;
    }

    let client = ProxyClient::new(&settings.proxy_url, settings.timeout)
        .context("failed to build proxy client")?;

    match cli.command {
        Commands::Check => {
            let config = client
                .config()
                .await
                .with_context(|| format!("could not reach the proxy at {}", settings.proxy_url))?;
            client
                .server_info()
                .await
                .context("proxy is up but the tracker rejected the connection")?;
            println!(
                "Connected to {} through {}.",
                config.jira_url.as_deref().unwrap_or("the tracker"),
                settings.proxy_url
            );
        }
        Commands::Boards => {
            let boards = client.boards().await.context("failed to list boards")?;
            if boards.is_empty() {
                println!("No boards found.");
                return Ok(());
            }
            for board in boards {
                println!(
                    "- {} (id {}, {}, project {})",
                    board.name,
                    board.id,
                    board.kind.as_deref().unwrap_or("unknown type"),
                    board
                        .location
                        .project_key
                        .as_deref()
                        .or(board.location.name.as_deref())
                        .unwrap_or("-")
                );
            }
        }
        Commands::Sprints { board } => {
            let list = client
                .sprints(&board)
                .await
                .with_context(|| format!("failed to list sprints for {board}"))?;
            if list.sprints.is_empty() {
                println!("{}", list.message.as_deref().unwrap_or("No sprints found."));
                return Ok(());
            }
            for sprint in list.sprints {
                println!(
                    "- {} (id {}, {}) {} .. {}{}",
                    sprint.name,
                    sprint.id,
                    sprint.state.as_deref().unwrap_or("unknown"),
                    sprint.start_date.as_deref().unwrap_or("?"),
                    sprint.end_date.as_deref().unwrap_or("?"),
                    sprint
                        .board_name
                        .as_deref()
                        .map(|name| format!(" on {name}"))
                        .unwrap_or_default()
                );
            }
        }
        Commands::Thresholds => {
            let thresholds = load_thresholds(&client).await;
            println!("Aging thresholds (unlisted statuses use 72 hours):");
            for (label, hours) in thresholds.entries() {
                println!("- {}: {} hours ({})", label, hours, report::format_duration(*hours));
            }
        }
        Commands::Analyze {
            board,
            sprint,
            aging_only,
            churn_only,
            sort,
            limit,
            csv,
        } => {
            let mut store = AnalysisStore::default();
            fetch_cycle(&client, &settings, &mut store, &board, sprint).await?;
            let snapshot = current_snapshot(&store)?;

            if snapshot.tickets.is_empty() {
                println!("No tickets found for this board.");
                return Ok(());
            }

            let mut tickets: Vec<_> = snapshot
                .tickets
                .values()
                .filter(|ticket| !aging_only || ticket.is_aging())
                .filter(|ticket| !churn_only || ticket.is_churn())
                .collect();
            report::sort_tickets(&mut tickets, sort);

            if let Some(path) = csv {
                let written = report::write_csv(&path, &tickets)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                println!("Wrote {written} tickets to {}.", path.display());
            }

            println!(
                "{} tickets analyzed: {} aging, {} churning, {} without history.",
                snapshot.tickets.len(),
                snapshot.aging_count(),
                snapshot.churn_count(),
                snapshot.omitted.len()
            );
            let shown = tickets.len().min(limit);
            print!("{}", report::render_table(&tickets[..shown]));
        }
        Commands::Ticket { key } => {
            let payload = client
                .issue_history(&key)
                .await
                .with_context(|| format!("failed to fetch history for {key}"))?;
            let analysis_settings = AnalysisSettings {
                thresholds: load_thresholds(&client).await,
                churn_threshold: settings.churn_threshold,
            };
            let now = Utc::now();
            let ticket = analysis::analyze_payload(&key, payload, None, None, now, &analysis_settings)
                .with_context(|| format!("history for {key} has no current status"))?;
            let timeline = timeline::status_timeline(&ticket.history, now);
            print!("{}", report::render_ticket_detail(&ticket, &timeline));
        }
        Commands::Report { board, sprint, out } => {
            let mut store = AnalysisStore::default();
            let metrics = fetch_cycle(&client, &settings, &mut store, &board, sprint).await?;
            let snapshot = current_snapshot(&store)?;

            let local;
            let cycle_times = match metrics.as_ref() {
                Some(metrics) => CycleTimes::Backend(metrics),
                None => {
                    let tickets: Vec<_> = snapshot.tickets.values().cloned().collect();
                    local = cycle::stage_metrics(&tickets);
                    CycleTimes::Local(&local)
                }
            };

            let scope = match sprint {
                Some(sprint) => format!("{board} sprint {sprint}"),
                None => board.clone(),
            };
            let report = report::build_report(&scope, snapshot, &cycle_times);
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
