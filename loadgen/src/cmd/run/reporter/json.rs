use std::{
    io::{Stdout, Write},
    time::Duration,
};

use rama::telemetry::tracing;

use super::{Counters, IterationEvent, Reporter};
use crate::cmd::run::metrics::RunSummary;

/// Writes one JSON object per line: `event` (opt-in), `summary` per tick and a `final` line.
pub struct JsonlReporter<W = Stdout> {
    interval: Duration,
    emit_events: bool,
    out: W,
}

impl JsonlReporter {
    pub fn new(interval: Duration, emit_events: bool) -> Self {
        Self::with_writer(interval, emit_events, std::io::stdout())
    }
}

impl<W: Write> JsonlReporter<W> {
    pub fn with_writer(interval: Duration, emit_events: bool, out: W) -> Self {
        Self {
            interval,
            emit_events,
            out,
        }
    }

    fn write_line(&mut self, line: &serde_json::Value) -> std::io::Result<()> {
        writeln!(self.out, "{line}")
    }
}

fn counters_json(c: &Counters) -> serde_json::Value {
    serde_json::json!({
        "iterations": c.iterations,
        "checks_passed": c.checks_passed,
        "checks_failed": c.checks_failed,
        "http_fail": c.http_fail,
        "other_fail": c.other_fail,
        "dropped": c.dropped,
    })
}

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.
}

impl<W: Write + Send + 'static> Reporter for JsonlReporter<W> {
    fn on_event(&mut self, ev: &IterationEvent, elapsed: Duration) {
        if !self.emit_events {
            return;
        }

        let line = match ev {
            IterationEvent::Finished {
                index,
                worker,
                result,
            } => {
                let (status, failure) = match &result.outcome {
                    Ok(record) => (Some(record.status.as_u16()), None),
                    Err(failure) => (None, Some(failure.kind.as_str())),
                };
                serde_json::json!({
                    "type": "event",
                    "t_ms": elapsed.as_millis(),
                    "index": index,
                    "worker": worker,
                    "latency_ms": ms(result.latency()),
                    "status": status,
                    "failure": failure,
                    "checks": result.checks,
                })
            }
            IterationEvent::Dropped { index } => serde_json::json!({
                "type": "dropped",
                "t_ms": elapsed.as_millis(),
                "index": index,
            }),
        };
        if let Err(err) = self.write_line(&line) {
            tracing::debug!("failed to write event line: {err}");
        }
    }

    fn on_tick(&mut self, now: Duration, window: &Counters, total: &Counters) {
        let interval_secs = self.interval.as_secs_f64();
        let rate = if interval_secs == 0. {
            0.
        } else {
            window.iterations as f64 / interval_secs
        };

        let line = serde_json::json!({
            "type": "summary",
            "t_ms": now.as_millis(),
            "interval_ms": self.interval.as_millis(),
            "rate": rate,
            "interval": counters_json(window),
            "total": counters_json(total),
        });
        if let Err(err) = self.write_line(&line) {
            tracing::debug!("failed to write summary line: {err}");
        }
    }

    fn finish(&mut self, s: &RunSummary) {
        let checks: Vec<_> = s
            .checks
            .iter()
            .map(|c| {
                serde_json::json!({
                    "name": c.name,
                    "passes": c.passes,
                    "fails": c.fails,
                    "pass_rate": c.pass_rate(),
                })
            })
            .collect();
        let statuses: serde_json::Map<_, _> = s
            .statuses
            .iter()
            .map(|(status, count)| (status.to_string(), (*count).into()))
            .collect();
        let failures: serde_json::Map<_, _> = s
            .failures
            .iter()
            .map(|(kind, count)| (kind.to_string(), (*count).into()))
            .collect();
        let l = &s.latency;

        let line = serde_json::json!({
            "type": "final",
            "elapsed_ms": ms(s.elapsed),
            "checks": checks,
            "check_pass_rate": s.check_pass_rate(),
            "iterations": s.iterations,
            "iteration_rate": s.iteration_rate(),
            "dropped_iterations": s.dropped_iterations,
            "interrupted_iterations": s.interrupted_iterations,
            "http_reqs": s.http_reqs,
            "http_req_failed": s.http_req_failed,
            "http_req_failed_rate": s.http_req_failed_rate(),
            "http_req_duration_ms": {
                "count": l.count,
                "min": ms(l.min),
                "avg": ms(l.avg),
                "med": ms(l.med),
                "p90": ms(l.p90),
                "p95": ms(l.p95),
                "p99": ms(l.p99),
                "max": ms(l.max),
            },
            "statuses": statuses,
            "failures": failures,
            "data_received": s.bytes_received,
            "workers_max": s.peak_workers,
        });
        if let Err(err) = self.write_line(&line) {
            tracing::warn!("failed to write final line: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use rama::http::StatusCode;

    use super::*;
    use crate::cmd::run::{
        probe::FailureKind,
        reporter::{
            human::tests::{ClosedPipe, summary},
            tests::{failed, finished},
        },
    };

    fn lines(out: Vec<u8>) -> Vec<serde_json::Value> {
        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_events_are_opt_in() {
        let mut reporter = JsonlReporter::with_writer(Duration::from_secs(1), false, Vec::new());
        reporter.on_event(&finished(0, StatusCode::OK), Duration::from_millis(3));
        assert!(reporter.out.is_empty());

        let mut reporter = JsonlReporter::with_writer(Duration::from_secs(1), true, Vec::new());
        reporter.on_event(&finished(0, StatusCode::OK), Duration::from_millis(3));
        reporter.on_event(&failed(1, FailureKind::Timeout), Duration::from_millis(4));
        reporter.on_event(&IterationEvent::Dropped { index: 2 }, Duration::from_millis(5));

        let lines = lines(reporter.out);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["type"], "event");
        assert_eq!(lines[0]["status"], 200);
        assert_eq!(lines[0]["checks"], serde_json::json!([true]));
        assert_eq!(lines[1]["failure"], "timeout");
        assert_eq!(lines[1]["status"], serde_json::Value::Null);
        assert_eq!(lines[2]["type"], "dropped");
        assert_eq!(lines[2]["index"], 2);
    }

    #[test]
    fn test_final_line() {
        let mut reporter = JsonlReporter::with_writer(Duration::from_secs(1), false, Vec::new());
        reporter.finish(&summary(3, 1));

        let lines = lines(reporter.out);
        assert_eq!(lines.len(), 1);

        let line = &lines[0];
        assert_eq!(line["type"], "final");
        assert_eq!(line["checks"][0]["name"], "status is 200");
        assert_eq!(line["checks"][0]["passes"], 3);
        assert_eq!(line["check_pass_rate"], 0.75);
        assert_eq!(line["statuses"]["503"], 1);
        assert_eq!(line["dropped_iterations"], 1);
    }

    #[test]
    fn test_summary_line() {
        let mut reporter = JsonlReporter::with_writer(Duration::from_millis(500), false, Vec::new());
        let window = Counters {
            iterations: 5,
            checks_passed: 5,
            ..Default::default()
        };
        reporter.on_tick(Duration::from_secs(1), &window, &window);

        let lines = lines(reporter.out);
        assert_eq!(lines[0]["type"], "summary");
        assert_eq!(lines[0]["rate"], 10.0);
        assert_eq!(lines[0]["total"]["iterations"], 5);
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_lost_final_line_is_logged() {
        let mut reporter = JsonlReporter::with_writer(Duration::from_secs(1), false, ClosedPipe);
        reporter.finish(&summary(1, 0));
        assert!(logs_contain("failed to write final line"));
    }
}
