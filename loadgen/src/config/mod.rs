mod client;
mod executor;
mod scenario;
mod server;
mod target;

pub use self::{
    client::{ClientConfig, parse_duration},
    executor::{
        ArrivalRateConfig, ConfigError, ConstantWorkersConfig, ExecutorConfig, ExecutorKind,
    },
    scenario::Scenario,
    server::{ServerConfig, ServerConfigError},
    target::{TargetUrl, TargetUrlError},
};
