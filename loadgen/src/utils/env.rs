pub const fn project_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}

pub const fn server_identifier() -> &'static str {
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"))
}

/// Name of the environment variable holding the URL to probe.
pub const TARGET_URL_ENV_KEY: &str = "TARGET_URL";
