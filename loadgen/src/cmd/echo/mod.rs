use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use rama::{
    Layer as _,
    error::{BoxError, ErrorContext as _},
    graceful::ShutdownGuard,
    http::{
        HeaderValue,
        layer::{required_header::AddRequiredResponseHeadersLayer, trace::TraceLayer},
        server::HttpServer,
    },
    net::{address::SocketAddress, socket::Interface},
    rt::Executor,
    tcp::server::TcpListener,
    telemetry::tracing,
};

use clap::Args;

use crate::{
    config::{Scenario, ServerConfig},
    utils,
};

mod svc;

use self::svc::EchoHttpServer;

#[derive(Debug, Clone, Args)]
/// run the echo target server
pub struct EchoCommand {
    #[clap(flatten)]
    pub config: Option<ServerConfig>,

    #[arg(long)]
    /// Scenario to run,
    /// manually defined parameters overwrite scenario parameters.
    pub scenario: Option<Scenario>,

    /// network interface to bind to
    #[arg(
        long,
        short = 'b',
        value_name = "INTERFACE",
        default_value = "127.0.0.1:9001"
    )]
    pub bind: Interface,

    /// directory to write the bound socket address to (as `echo.addr.txt`)
    #[arg(long, value_name = "DIR")]
    pub data: Option<PathBuf>,
}

pub async fn exec(guard: ShutdownGuard, args: EchoCommand) -> Result<(), BoxError> {
    let merged_cfg = merge_server_cfg(args.scenario, args.config);
    merged_cfg.validate()?;

    let exec = Executor::graceful(guard);
    let tcp_listener = TcpListener::bind(args.bind, exec.clone())
        .await
        .context("bind echo http server")?;

    let http_svc = (
        TraceLayer::new_for_http(),
        AddRequiredResponseHeadersLayer::new()
            .with_server_header_value(HeaderValue::from_static(utils::env::server_identifier())),
    )
        .into_layer(EchoHttpServer::new(&merged_cfg));

    let http_server = HttpServer::auto(exec).service(Arc::new(http_svc));

    let server_addr = tcp_listener
        .local_addr()
        .context("get bound address for echo http server")?;
    tracing::info!("echo http server bound to: {server_addr}");

    if let Some(dir) = args.data.as_deref() {
        tokio::fs::create_dir_all(dir)
            .await
            .context("create data directory")
            .with_context_debug_field("path", || dir.to_owned())?;
        write_server_socket_address_as_file(dir, "echo", server_addr.into()).await?;
    }

    tcp_listener.serve(http_server).await;

    Ok(())
}

async fn write_server_socket_address_as_file(
    dir: &Path,
    name: &str,
    addr: SocketAddress,
) -> Result<(), BoxError> {
    let path = dir.join(format!("{name}.addr.txt"));
    tokio::fs::write(&path, addr.to_string())
        .await
        .context("write server's socket address to file")
        .context_field("address", addr)
        .with_context_debug_field("path", || path.to_owned())
}

fn merge_server_cfg(scenario: Option<Scenario>, config: Option<ServerConfig>) -> ServerConfig {
    let scenario_cfg = scenario
        .map(|s| {
            tracing::info!("use scenario to define base config: {s:?}");
            s.server_config()
        })
        .unwrap_or_else(|| {
            tracing::info!("no scenario defined, use default as base config");
            Default::default()
        });

    let overwrite_cfg = config.unwrap_or_default();

    macro_rules! merge_config {
        ($scenario:ident, $overwrite:ident, {$($property:ident),+ $(,)?}) => {
            ServerConfig {
                $(
                    $property: if let Some(value) = $overwrite.$property {
                        tracing::info!("property '{}': use overwrite: {value}", stringify!($property));
                        Some(value)
                    } else if let Some(value) = $scenario.$property {
                        tracing::info!("property '{}': use scenario: {value}", stringify!($property));
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
            base_latency,
            jitter,
            error_rate,
            status,
        }
    )
}
