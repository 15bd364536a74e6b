use std::sync::Arc;

use rama::http::StatusCode;

use super::probe::ResponseRecord;

/// A named boolean assertion evaluated against a single response.
#[derive(Debug, Clone)]
pub struct Check {
    name: Arc<str>,
    predicate: Predicate,
}

#[derive(Debug, Clone, Copy)]
enum Predicate {
    StatusIs(StatusCode),
}

impl Check {
    /// Passes when the response status equals `status`.
    pub fn status_is(status: StatusCode) -> Self {
        Self {
            name: format!("status is {}", status.as_u16()).into(),
            predicate: Predicate::StatusIs(status),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Evaluate the check, a missing response never passes.
    pub fn evaluate(&self, record: Option<&ResponseRecord>) -> bool {
        let Some(record) = record else {
            return false;
        };
        match self.predicate {
            Predicate::StatusIs(status) => record.status == status,
        }
    }
}

/// Ordered, cheap to clone, set of checks.
#[derive(Debug, Clone)]
pub struct Checks(Arc<[Check]>);

impl Checks {
    pub fn new(checks: impl IntoIterator<Item = Check>) -> Self {
        Self(checks.into_iter().collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Check> {
        self.0.iter()
    }

    /// Results are returned in the same order as the checks.
    pub fn evaluate(&self, record: Option<&ResponseRecord>) -> Vec<bool> {
        self.0.iter().map(|check| check.evaluate(record)).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn record(status: StatusCode) -> ResponseRecord {
        ResponseRecord {
            status,
            latency: Duration::from_millis(1),
            bytes_received: 0,
        }
    }

    #[test]
    fn test_status_is_check() {
        let check = Check::status_is(StatusCode::OK);
        assert_eq!(check.name(), "status is 200");

        for (input, expected) in [
            (Some(record(StatusCode::OK)), true),
            (Some(record(StatusCode::NO_CONTENT)), false),
            (Some(record(StatusCode::NOT_FOUND)), false),
            (Some(record(StatusCode::INTERNAL_SERVER_ERROR)), false),
            (None, false),
        ] {
            assert_eq!(check.evaluate(input.as_ref()), expected, "input: {input:?}");
        }
    }

    #[test]
    fn test_checks_preserve_order() {
        let checks = Checks::new([
            Check::status_is(StatusCode::OK),
            Check::status_is(StatusCode::SERVICE_UNAVAILABLE),
        ]);
        assert_eq!(checks.len(), 2);

        let names: Vec<_> = checks.iter().map(Check::name).collect();
        assert_eq!(names, ["status is 200", "status is 503"]);

        let results = checks.evaluate(Some(&record(StatusCode::SERVICE_UNAVAILABLE)));
        assert_eq!(results, [false, true]);

        let results = checks.evaluate(None);
        assert_eq!(results, [false, false]);
    }
}
