use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod error;
mod evidence;
mod models;
mod orchestrator;
mod planner;
mod report;
mod repository;
mod risk;
mod trend;

use models::{GeoType, TimeType};
use orchestrator::{DashboardOrchestrator, RunRequest};
use planner::RoundRobinPlanner;
use repository::{
    parse_signal_payload, CsvSignalRepository, EpidataRepository, SignalQuery, SignalRepository,
};
use trend::TrendParams;

#[derive(Parser)]
#[command(name = "epiwatch")]
#[command(about = "Rising-trend surveillance over epidemiological signals", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch one signal and cache it as CSV
    Fetch {
        #[arg(long)]
        signal: String,
        #[arg(long, default_value = "20200201")]
        start: String,
        #[arg(long, default_value = "20220201")]
        end: String,
        #[arg(long, default_value = "day")]
        time_type: String,
        #[arg(long, default_value = "state")]
        geo_type: String,
        #[arg(long, value_delimiter = ',')]
        geo: Vec<String>,
        #[arg(long, default_value = "data")]
        cache_dir: PathBuf,
    },
    /// Detect rising trends in a cached series
    Detect {
        #[arg(long)]
        signal: String,
        #[arg(long, default_value = "data")]
        cache_dir: PathBuf,
        #[arg(long, default_value_t = 7)]
        window_size: usize,
        #[arg(long, default_value_t = 0.01)]
        min_log_slope: f64,
        #[arg(long)]
        no_smooth: bool,
    },
    /// Run the full orchestration and write the situation report
    Dashboard {
        #[arg(long, default_value = "20200201")]
        start: String,
        #[arg(long, default_value = "20220201")]
        end: String,
        #[arg(long, default_value = "day")]
        time_type: String,
        #[arg(long, default_value = "state")]
        geo_type: String,
        #[arg(long, value_delimiter = ',')]
        geo: Vec<String>,
        #[arg(long, value_delimiter = ',')]
        signals: Vec<String>,
        #[arg(long, default_value_t = orchestrator::DEFAULT_MAX_ITERATIONS)]
        max_iterations: usize,
        #[arg(long)]
        deadline_secs: Option<u64>,
        /// Serve signals from a CSV cache directory instead of the API
        #[arg(long)]
        offline: Option<PathBuf>,
        #[arg(long, default_value = "report.json")]
        out: PathBuf,
        #[arg(long)]
        markdown: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let base_url = std::env::var("EPIDATA_BASE_URL")
        .unwrap_or_else(|_| repository::DEFAULT_BASE_URL.to_string());

    match cli.command {
        Commands::Fetch {
            signal,
            start,
            end,
            time_type,
            geo_type,
            geo,
            cache_dir,
        } => {
            let query = SignalQuery {
                signal,
                time_type: parse_time_type(&time_type)?,
                geo_type: parse_geo_type(&geo_type)?,
                geo_values: geo,
                start_time: start,
                end_time: end,
            };
            let repo = EpidataRepository::new(base_url);
            let payload = repo
                .fetch(&query)
                .await
                .with_context(|| format!("failed to fetch {}", query.signal))?;
            let series = parse_signal_payload(&payload)
                .with_context(|| format!("failed to parse payload for {}", query.signal))?;
            let path = repository::write_series_csv(&series, &cache_dir)?;
            println!(
                "Cached {} points of {} to {}.",
                series.points.len(),
                series.signal_name,
                path.display()
            );
        }
        Commands::Detect {
            signal,
            cache_dir,
            window_size,
            min_log_slope,
            no_smooth,
        } => {
            let query = SignalQuery {
                signal: signal.clone(),
                time_type: TimeType::Day,
                geo_type: GeoType::State,
                geo_values: Vec::new(),
                start_time: String::new(),
                end_time: String::new(),
            };
            let repo = CsvSignalRepository::new(cache_dir);
            let payload = repo
                .fetch(&query)
                .await
                .with_context(|| format!("no cached series for {signal}"))?;
            let series = parse_signal_payload(&payload)
                .with_context(|| format!("failed to parse cached series for {signal}"))?;
            let params = TrendParams {
                window_size,
                min_log_slope,
                smooth: !no_smooth,
                ..TrendParams::default()
            };
            let result = trend::detect(&series, &params);
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Dashboard {
            start,
            end,
            time_type,
            geo_type,
            geo,
            signals,
            max_iterations,
            deadline_secs,
            offline,
            out,
            markdown,
        } => {
            let request = RunRequest {
                start_time: start,
                end_time: end,
                time_type: parse_time_type(&time_type)?,
                geo_type: parse_geo_type(&geo_type)?,
                geo_values: geo,
                focus_signals: signals,
                max_iterations,
                deadline: deadline_secs.map(Duration::from_secs),
                ..RunRequest::default()
            };

            let repo: Arc<dyn SignalRepository> = match offline {
                Some(dir) => Arc::new(CsvSignalRepository::new(dir)),
                None => Arc::new(EpidataRepository::new(base_url)),
            };
            let planner = RoundRobinPlanner::new(request.focus_signals.clone(), 2);
            let orchestrator = DashboardOrchestrator::new(repo, Box::new(planner));

            let dashboard = orchestrator.run(&request).await;

            std::fs::write(&out, serde_json::to_string_pretty(&dashboard)?)?;
            println!("Report written to {}.", out.display());
            if let Some(markdown_path) = markdown {
                std::fs::write(&markdown_path, report::render_markdown(&dashboard))?;
                println!("Markdown summary written to {}.", markdown_path.display());
            }
            if let Some(error) = &dashboard.error {
                println!("Run finished with errors: {error}");
            }
        }
    }

    Ok(())
}

fn parse_time_type(raw: &str) -> anyhow::Result<TimeType> {
    match raw {
        "day" => Ok(TimeType::Day),
        "week" => Ok(TimeType::Week),
        other => anyhow::bail!("unsupported time type {other:?}, expected day or week"),
    }
}

fn parse_geo_type(raw: &str) -> anyhow::Result<GeoType> {
    match raw {
        "state" => Ok(GeoType::State),
        "county" => Ok(GeoType::County),
        "nation" => Ok(GeoType::Nation),
        other => anyhow::bail!("unsupported geo type {other:?}, expected state, county or nation"),
    }
}
