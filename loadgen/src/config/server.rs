use std::fmt;

/// Echo server behavior configuration.
/// This models processing cost and instability of a backend.
#[derive(Debug, Clone, clap::Args, Default)]
pub struct ServerConfig {
    /// Base processing time before responding.
    #[arg(long, value_name = "SECONDS")]
    pub base_latency: Option<f64>,

    /// Random delay added to (or removed from) base_latency.
    /// Models IO waits and backend variability.
    #[arg(long = "latency-jitter", value_name = "SECONDS")]
    pub jitter: Option<f64>,

    /// Probability of returning an internal server error.
    #[arg(long, value_name = "RATIO")]
    pub error_rate: Option<f32>,

    /// Status code used for all non-error responses.
    #[arg(long, value_name = "CODE")]
    pub status: Option<u16>,
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ServerConfigError> {
        if let Some(latency) = self.base_latency
            && !(latency.is_finite() && latency >= 0.)
        {
            return Err(ServerConfigError::NegativeLatency(latency));
        }
        if let Some(jitter) = self.jitter
            && !(jitter.is_finite() && jitter >= 0.)
        {
            return Err(ServerConfigError::NegativeLatency(jitter));
        }
        if let Some(rate) = self.error_rate
            && !(0.0..=1.0).contains(&rate)
        {
            return Err(ServerConfigError::ErrorRateOutOfRange(rate));
        }
        if let Some(status) = self.status
            && !(100..=999).contains(&status)
        {
            return Err(ServerConfigError::InvalidStatus(status));
        }
        Ok(())
    }
}

#[derive(Debug)]
#[cfg_attr(test, derive(PartialEq))]
pub enum ServerConfigError {
    NegativeLatency(f64),
    ErrorRateOutOfRange(f32),
    InvalidStatus(u16),
}

impl fmt::Display for ServerConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NegativeLatency(v) => {
                write!(f, "ServerConfigError: latency ({v}) has to be a positive number")
            }
            Self::ErrorRateOutOfRange(v) => {
                write!(f, "ServerConfigError: error rate ({v}) has to be within [0, 1]")
            }
            Self::InvalidStatus(v) => write!(f, "ServerConfigError: invalid status code ({v})"),
        }
    }
}

impl std::error::Error for ServerConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_server_config() {
        for (cfg, expected) in [
            (ServerConfig::default(), None),
            (
                ServerConfig {
                    base_latency: Some(0.02),
                    jitter: Some(0.01),
                    error_rate: Some(0.05),
                    status: Some(200),
                },
                None,
            ),
            (
                ServerConfig {
                    base_latency: Some(-1.),
                    ..Default::default()
                },
                Some(ServerConfigError::NegativeLatency(-1.)),
            ),
            (
                ServerConfig {
                    error_rate: Some(1.5),
                    ..Default::default()
                },
                Some(ServerConfigError::ErrorRateOutOfRange(1.5)),
            ),
            (
                ServerConfig {
                    status: Some(42),
                    ..Default::default()
                },
                Some(ServerConfigError::InvalidStatus(42)),
            ),
        ] {
            match (cfg.validate(), expected) {
                (Ok(()), None) => (),
                (Err(err), Some(expected)) => assert_eq!(err, expected, "cfg: {cfg:?}"),
                (result, expected) => {
                    panic!("cfg = {cfg:?}, unexpected result '{result:?}', expected: '{expected:?}'")
                }
            }
        }
    }
}
