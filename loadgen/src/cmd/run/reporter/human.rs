use std::{
    io::{Stdout, Write},
    time::Duration,
};

use rama::telemetry::tracing;

use super::{Counters, IterationEvent, Reporter};
use crate::cmd::run::metrics::RunSummary;

pub struct HumanReporter<W = Stdout> {
    interval: Duration,
    out: W,
}

impl HumanReporter {
    pub fn new(interval: Duration) -> Self {
        Self::with_writer(interval, std::io::stdout())
    }
}

impl<W: Write> HumanReporter<W> {
    pub fn with_writer(interval: Duration, out: W) -> Self {
        Self { interval, out }
    }

    fn write_summary(&mut self, s: &RunSummary) -> std::io::Result<()> {
        let out = &mut self.out;
        writeln!(out)?;

        for check in &s.checks {
            let mark = if check.fails == 0 { '✓' } else { '✗' };
            writeln!(out, "     {mark} {}", check.name)?;
            if check.fails > 0 {
                writeln!(
                    out,
                    "      ↳  {}% ✓ {} ✗ {}",
                    percent(check.pass_rate()),
                    check.passes,
                    check.fails
                )?;
            }
        }
        writeln!(out)?;

        let (passes, fails) = s
            .checks
            .iter()
            .fold((0, 0), |(p, f), c| (p + c.passes, f + c.fails));
        metric(
            out,
            "checks",
            format_args!("{}% ✓ {passes} ✗ {fails}", percent(s.check_pass_rate())),
        )?;
        metric(out, "data_received", format_args!("{} B", s.bytes_received))?;

        let l = &s.latency;
        metric(
            out,
            "http_req_duration",
            format_args!(
                "avg={:?} min={:?} med={:?} max={:?} p(90)={:?} p(95)={:?} p(99)={:?}",
                l.avg, l.min, l.med, l.max, l.p90, l.p95, l.p99
            ),
        )?;
        metric(
            out,
            "http_req_failed",
            format_args!(
                "{}% ✓ {} ✗ {}",
                percent(s.http_req_failed_rate()),
                s.http_req_failed,
                s.http_reqs - s.http_req_failed
            ),
        )?;
        metric(
            out,
            "http_reqs",
            format_args!("{} {:.1}/s", s.http_reqs, s.http_req_rate()),
        )?;
        for (status, count) in &s.statuses {
            metric(out, &format!("  status {status}"), format_args!("{count}"))?;
        }
        for (kind, count) in &s.failures {
            metric(out, &format!("  failure {kind}"), format_args!("{count}"))?;
        }
        metric(
            out,
            "iterations",
            format_args!("{} {:.1}/s", s.iterations, s.iteration_rate()),
        )?;
        metric(out, "dropped_iterations", format_args!("{}", s.dropped_iterations))?;
        metric(
            out,
            "interrupted_iterations",
            format_args!("{}", s.interrupted_iterations),
        )?;
        metric(out, "workers_max", format_args!("{}", s.peak_workers))?;
        metric(out, "elapsed", format_args!("{:.1}s", s.elapsed.as_secs_f64()))?;

        out.flush()
    }
}

fn metric(out: &mut impl Write, name: &str, value: std::fmt::Arguments<'_>) -> std::io::Result<()> {
    writeln!(out, "     {name:.<28}: {value}")
}

fn percent(rate: Option<f64>) -> String {
    format!("{:.2}", rate.unwrap_or_default() * 100.)
}

impl<W: Write + Send + 'static> Reporter for HumanReporter<W> {
    fn on_event(&mut self, _ev: &IterationEvent, _elapsed: Duration) {}

    fn on_tick(&mut self, now: Duration, window: &Counters, total: &Counters) {
        let interval_secs = self.interval.as_secs_f64();
        let rate = if interval_secs == 0. {
            0.
        } else {
            window.iterations as f64 / interval_secs
        };

        if let Err(err) = writeln!(
            self.out,
            "t={:.1}s rate={:.1}/s checks_ok={} checks_fail={} http_fail={} other_fail={} dropped={} total_iterations={} total_checks_fail={}",
            now.as_secs_f64(),
            rate,
            window.checks_passed,
            window.checks_failed,
            window.http_fail,
            window.other_fail,
            window.dropped,
            total.iterations,
            total.checks_failed,
        ) {
            tracing::debug!("failed to write progress line: {err}");
        }
    }

    fn finish(&mut self, summary: &RunSummary) {
        if let Err(err) = self.write_summary(summary) {
            tracing::warn!("failed to write run summary: {err}");
        }
    }
}

#[cfg(test)]
pub(super) mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::cmd::run::metrics::{CheckSummary, LatencyStats};

    /// Writer of a stdout whose reader went away.
    pub(in crate::cmd::run) struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    pub(in crate::cmd::run) fn summary(passes: u64, fails: u64) -> RunSummary {
        RunSummary {
            elapsed: Duration::from_secs(2),
            iterations: passes + fails,
            dropped_iterations: 1,
            interrupted_iterations: 0,
            http_reqs: passes + fails,
            http_req_failed: fails,
            statuses: BTreeMap::from([(200, passes), (503, fails)]),
            failures: BTreeMap::new(),
            checks: vec![CheckSummary {
                name: "status is 200".to_owned(),
                passes,
                fails,
            }],
            latency: LatencyStats::default(),
            bytes_received: 10,
            peak_workers: 2,
        }
    }

    fn render(summary: &RunSummary) -> String {
        let mut reporter = HumanReporter::with_writer(Duration::from_secs(1), Vec::new());
        reporter.finish(summary);
        String::from_utf8(reporter.out).unwrap()
    }

    #[test]
    fn test_summary_marks_passing_check() {
        let out = render(&summary(4, 0));
        assert!(out.contains("✓ status is 200"), "{out}");
        assert!(out.contains("100.00% ✓ 4 ✗ 0"), "{out}");
        assert!(out.contains("dropped_iterations"), "{out}");
    }

    #[test]
    fn test_summary_marks_failing_check() {
        let out = render(&summary(1, 3));
        assert!(out.contains("✗ status is 200"), "{out}");
        assert!(out.contains("25.00% ✓ 1 ✗ 3"), "{out}");
        assert!(out.contains("status 503"), "{out}");
    }

    #[test]
    fn test_tick_line() {
        let mut reporter = HumanReporter::with_writer(Duration::from_secs(2), Vec::new());
        let window = Counters {
            iterations: 10,
            checks_passed: 9,
            checks_failed: 1,
            ..Default::default()
        };
        reporter.on_tick(Duration::from_secs(2), &window, &window);

        let out = String::from_utf8(reporter.out).unwrap();
        assert!(out.starts_with("t=2.0s rate=5.0/s checks_ok=9 checks_fail=1"), "{out}");
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_lost_summary_is_logged() {
        let mut reporter = HumanReporter::with_writer(Duration::from_secs(1), ClosedPipe);
        reporter.finish(&summary(1, 0));
        assert!(logs_contain("failed to write run summary"));
    }
}
