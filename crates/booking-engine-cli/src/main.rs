use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;

use booking_engine::temporal::parse_rfc3339;
use booking_engine::{
    BookingError, EngineConfig, ErrorView, OccurrenceView, RecurrenceId, ResourceId, ServiceId,
    SlotView, TimeInterval,
};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod scenario;

use scenario::Scenario;

#[derive(Parser)]
#[command(
    name = "booking",
    version,
    about = "Query availability and recurring series from a scenario file"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List bookable slots for a service, best first
    Slots {
        /// Scenario JSON (store snapshot plus optional "config")
        #[arg(long)]
        scenario: PathBuf,
        #[arg(long)]
        service: String,
        /// Candidate resource; repeat for "any of these"
        #[arg(long = "resource", required = true)]
        resources: Vec<String>,
        /// Range start (RFC 3339)
        #[arg(long)]
        from: String,
        /// Range end (RFC 3339)
        #[arg(long)]
        to: String,
        /// Minutes between candidate starts; defaults to the scenario config
        #[arg(long)]
        granularity: Option<u32>,
        /// Pin "now" (RFC 3339); slots before it are dropped
        #[arg(long)]
        now: Option<String>,
    },
    /// Expand the remaining occurrences of a stored series
    Expand {
        #[arg(long)]
        scenario: PathBuf,
        /// Series id (UUID)
        #[arg(long)]
        series: String,
        /// Maximum occurrences; defaults to max_series_occurrences
        #[arg(long)]
        cap: Option<usize>,
    },
    /// Validate an engine config file and print it with defaults filled in
    CheckConfig { file: PathBuf },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli.command) {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            let view = match err.downcast_ref::<BookingError>() {
                Some(booking) => ErrorView::from(booking),
                None => ErrorView {
                    kind: "cli".to_string(),
                    message: format!("{err:#}"),
                    retryable: false,
                    conflicting_appointment_ids: Vec::new(),
                },
            };
            match serde_json::to_string_pretty(&view) {
                Ok(json) => eprintln!("{json}"),
                Err(_) => eprintln!("error: {err:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands) -> anyhow::Result<String> {
    match command {
        Commands::Slots {
            scenario,
            service,
            resources,
            from,
            to,
            granularity,
            now,
        } => {
            let range = TimeInterval::new(parse_rfc3339(&from)?, parse_rfc3339(&to)?)?;
            let now = now.as_deref().map(parse_rfc3339).transpose()?;
            let coordinator = Scenario::load(&scenario)?.into_coordinator(now)?;
            let granularity = granularity.unwrap_or(coordinator.config().granularity_minutes);
            let candidates: Vec<ResourceId> = resources.into_iter().map(ResourceId::new).collect();

            let slots = coordinator.find_slots_with_granularity(
                &ServiceId::new(service),
                &candidates,
                &range,
                granularity,
            )?;
            debug!(slots = slots.len(), "found slots");
            let views: Vec<SlotView> = slots.iter().map(SlotView::from).collect();
            Ok(serde_json::to_string_pretty(&views)?)
        }
        Commands::Expand {
            scenario,
            series,
            cap,
        } => {
            let id = RecurrenceId::from_str(&series)?;
            let coordinator = Scenario::load(&scenario)?.into_coordinator(None)?;
            let cap = cap.unwrap_or(coordinator.config().max_series_occurrences);
            let timezone = coordinator.series(id)?.timezone;
            let views: Vec<OccurrenceView> = coordinator
                .expand_series(id, cap)?
                .iter()
                .map(|o| OccurrenceView::new(o, &timezone))
                .collect();
            Ok(serde_json::to_string_pretty(&views)?)
        }
        Commands::CheckConfig { file } => {
            let config = EngineConfig::from_file(&file)?;
            Ok(serde_json::to_string_pretty(&config)?)
        }
    }
}
