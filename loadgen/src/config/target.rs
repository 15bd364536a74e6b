use std::{fmt, str::FromStr};

use rama::http::Uri;

/// Validated URL of the target to probe.
///
/// Only absolute `http` and `https` URLs are accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetUrl(Uri);

impl TargetUrl {
    /// Resolve the target from its raw (cli or environment) value.
    pub fn resolve(raw: Option<&str>) -> Result<Self, TargetUrlError> {
        raw.ok_or(TargetUrlError::Missing)?.parse()
    }

    pub fn into_uri(self) -> Uri {
        self.0
    }
}

impl fmt::Display for TargetUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TargetUrl {
    type Err = TargetUrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(TargetUrlError::Empty);
        }

        let uri: Uri = s
            .parse()
            .map_err(|err| TargetUrlError::Invalid(format!("{err}")))?;

        match uri.scheme_str() {
            Some(scheme) if scheme.eq_ignore_ascii_case("http") => (),
            Some(scheme) if scheme.eq_ignore_ascii_case("https") => (),
            Some(scheme) => return Err(TargetUrlError::UnsupportedScheme(scheme.to_owned())),
            None => return Err(TargetUrlError::MissingScheme),
        }

        if uri.host().is_none_or(str::is_empty) {
            return Err(TargetUrlError::MissingHost);
        }

        Ok(Self(uri))
    }
}

#[derive(Debug, Clone)]
#[cfg_attr(test, derive(PartialEq, Eq))]
pub enum TargetUrlError {
    Missing,
    Empty,
    Invalid(String),
    MissingScheme,
    UnsupportedScheme(String),
    MissingHost,
}

impl fmt::Display for TargetUrlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(
                f,
                "TargetUrlError: no target defined (set the {} env variable or use --target)",
                crate::utils::env::TARGET_URL_ENV_KEY,
            ),
            Self::Empty => write!(f, "TargetUrlError: empty target url"),
            Self::Invalid(reason) => write!(f, "TargetUrlError: invalid url: {reason}"),
            Self::MissingScheme => {
                write!(f, "TargetUrlError: url has no scheme (expected http or https)")
            }
            Self::UnsupportedScheme(scheme) => write!(
                f,
                "TargetUrlError: unsupported scheme '{scheme}' (expected http or https)"
            ),
            Self::MissingHost => write!(f, "TargetUrlError: url has no host"),
        }
    }
}

impl std::error::Error for TargetUrlError {}
