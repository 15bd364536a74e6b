use std::time::Duration;

use rama::{
    error::{BoxError, ErrorContext as _},
    graceful::ShutdownGuard,
    http::StatusCode,
    rt::Executor,
    telemetry::tracing,
};

use clap::Args;
use tokio::{
    sync::mpsc::{self, Receiver},
    time::{Instant, MissedTickBehavior},
};

use crate::config::{
    ClientConfig, ConfigError, ExecutorConfig, Scenario, TargetUrl, parse_duration,
};

mod arrivals;
mod check;
mod executor;
mod metrics;
mod pool;
mod probe;
mod tasks;

pub mod client;
pub mod reporter;

use self::{
    check::{Check, Checks},
    metrics::{Metrics, RunSummary},
    probe::{Probe, ProbeTarget},
    reporter::*,
};

const REPORT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Args)]
/// run the load generator against a target
pub struct RunCommand {
    /// URL of the target, e.g. `http://127.0.0.1:8080/`
    #[arg(long, value_name = "URL", env = "TARGET_URL")]
    target: Option<String>,

    /// record every iteration as failed instead of exiting
    /// when the target is missing or invalid
    #[arg(long, default_value_t = false)]
    lenient_target: bool,

    #[arg(long)]
    /// Scenario to run,
    /// manually defined parameters overwrite scenario parameters.
    scenario: Option<Scenario>,

    #[clap(flatten)]
    config: Option<ClientConfig>,

    /// per request timeout (including reading the body)
    #[arg(long, value_name = "DURATION", default_value = "60s", value_parser = parse_duration)]
    timeout: Duration,

    /// how long in-flight iterations are awaited once the run duration expired
    #[arg(long, value_name = "DURATION", default_value = "30s", value_parser = parse_duration)]
    graceful_stop: Duration,

    /// status code a response is expected to have
    #[arg(long, value_name = "CODE", default_value_t = 200)]
    expect_status: u16,

    /// report json lines instead of a human-friendly format
    #[arg(long, default_value_t = false)]
    json: bool,

    /// also report a json line per iteration (requires `--json`)
    #[arg(long, default_value_t = false, requires = "json")]
    json_events: bool,

    /// exit with an error when the check pass rate ends below this ratio
    #[arg(long, value_name = "RATIO")]
    min_pass_rate: Option<f64>,
}

pub async fn exec(guard: ShutdownGuard, args: RunCommand) -> Result<(), BoxError> {
    let target = match TargetUrl::resolve(args.target.as_deref()) {
        Ok(target) => {
            tracing::info!(url.full = %target, "target ready");
            ProbeTarget::Url(target.into_uri())
        }
        Err(err) if args.lenient_target => {
            tracing::warn!("unusable target, every iteration will fail: {err}");
            ProbeTarget::Unusable(err.to_string().into())
        }
        Err(err) => return Err(err.into()),
    };

    if let Some(ratio) = args.min_pass_rate
        && !(0.0..=1.0).contains(&ratio)
    {
        return Err(ConfigError::MinPassRateOutOfRange(ratio).into());
    }

    let merged_cfg = merge_client_cfg(args.scenario, args.config);
    let executor_cfg = ExecutorConfig::try_from_client_config(&merged_cfg)?;

    let expected_status = StatusCode::from_u16(args.expect_status)
        .context("parse expected status code")
        .with_context_debug_field("status", || args.expect_status)?;
    let checks = Checks::new([Check::status_is(expected_status)]);

    tracing::info!(
        executor = ?executor_cfg.kind(),
        duration = ?executor_cfg.duration(),
        max_concurrency = executor_cfg.max_concurrency(),
        timeout = ?args.timeout,
        graceful_stop = ?args.graceful_stop,
        "run config ready",
    );

    let client = self::client::new_http_client(
        Executor::graceful(guard.clone()),
        executor_cfg.max_concurrency(),
    )
    .context("create HTTP(S) client")?;
    let probe = Probe::new(client, target, checks.clone(), args.timeout);

    let reporter: Box<dyn Reporter> = if args.json {
        Box::new(JsonlReporter::new(REPORT_INTERVAL, args.json_events))
    } else {
        Box::new(HumanReporter::new(REPORT_INTERVAL))
    };
    let metrics = Metrics::try_new(checks)?;

    let (event_tx, event_rx) = mpsc::channel(executor_cfg.max_concurrency().max(1) * 8);
    let report_handle = tokio::spawn(report_worker(reporter, metrics, event_rx));

    let start = Instant::now();
    let executor_report =
        executor::run(guard, executor_cfg, probe, event_tx, args.graceful_stop).await;

    let (mut reporter, metrics) = report_handle.await.context("join report worker")?;
    let summary = metrics.into_summary(start.elapsed(), executor_report);
    reporter.finish(&summary);

    enforce_min_pass_rate(&summary, args.min_pass_rate)
}

fn enforce_min_pass_rate(summary: &RunSummary, min_pass_rate: Option<f64>) -> Result<(), BoxError> {
    let Some(min) = min_pass_rate else {
        return Ok(());
    };

    let rate = summary.check_pass_rate().unwrap_or_default();
    if rate < min {
        return Err(BoxError::from(format!(
            "check pass rate {:.2}% is below the required {:.2}%",
            rate * 100.,
            min * 100.
        )));
    }

    tracing::info!("check pass rate {:.2}% meets the required {:.2}%", rate * 100., min * 100.);
    Ok(())
}

/// Fold iteration events into the run aggregate until all senders are gone.
async fn report_worker(
    mut reporter: Box<dyn Reporter>,
    mut metrics: Metrics,
    mut event_rx: Receiver<IterationEvent>,
) -> (Box<dyn Reporter>, Metrics) {
    let start = Instant::now();

    let mut ticker = tokio::time::interval_at(start + REPORT_INTERVAL, REPORT_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            maybe_ev = event_rx.recv() => {
                let Some(ev) = maybe_ev else {
                    tracing::debug!("exit report worker: event senders closed");
                    break;
                };
                metrics.record(&ev);
                reporter.on_event(&ev, start.elapsed());
            }

            _ = ticker.tick() => {
                let window = metrics.take_window();
                reporter.on_tick(start.elapsed(), &window, metrics.total());
            }
        }
    }

    (reporter, metrics)
}

fn merge_client_cfg(scenario: Option<Scenario>, config: Option<ClientConfig>) -> ClientConfig {
    let scenario_cfg = match scenario {
        Some(s) => {
            tracing::info!("use scenario to define base config: {s:?}");
            s.client_config()
        }
        None => {
            let s = Scenario::default();
            tracing::info!("no scenario defined, use default scenario as base config: {s:?}");
            s.client_config()
        }
    };

    let overwrite_cfg = config.unwrap_or_default();

    macro_rules! merge_config {
        ($scenario:ident, $overwrite:ident, {$($property:ident),+ $(,)?}) => {
            ClientConfig {
                $(
                    $property: if let Some(value) = $overwrite.$property {
                        tracing::info!("property '{}': use overwrite: {value:?}", stringify!($property));
                        Some(value)
                    } else if let Some(value) = $scenario.$property {
                        tracing::info!("property '{}': use scenario: {value:?}", stringify!($property));
                        Some(value)
                    } else {
                        tracing::debug!("property '{}': undefined", stringify!($property));
                        None
                    },
                )+
            }
        };
    }

    merge_config!(
        scenario_cfg, overwrite_cfg,
        {
            executor,
            rate,
            time_unit,
            duration,
            pre_allocated_workers,
            max_workers,
            workers,
            pause,
            burst_size,
            jitter,
        }
    )
}
