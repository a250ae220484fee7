use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::Parser;
use opentelemetry_otlp::WithExportConfig;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::GovernorLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use fleet_domain::config::{Config, CorsConfig, ObservabilityConfig};
use fleet_gateway::cli::{Cli, Command, ConfigCommand};
use fleet_gateway::rate_limit::McpConnectionKeyExtractor;
use fleet_gateway::{api, bootstrap, cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let parsed = Cli::parse();

    match parsed.command {
        None | Some(Command::Serve) => {
            let (config, _config_path) = cli::load_config()?;
            init_tracing(&config.observability);
            run_server(Arc::new(config)).await
        }
        Some(Command::Doctor) => {
            let (config, config_path) = cli::load_config()?;
            let passed = cli::doctor::run(&config, &config_path).await?;
            if !passed {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = cli::load_config()?;
            if !cli::config::validate(&config, &config_path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _config_path) = cli::load_config()?;
            cli::config::show(&config);
            Ok(())
        }
    }
}

/// Structured JSON logging always; additionally exports spans to an OTLP
/// collector when `config.observability.otlp_endpoint` is set.
fn init_tracing(observability: &ObservabilityConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,fleet_gateway=debug"));
    let fmt_layer = tracing_subscriber::fmt::layer().json();
    let registry = tracing_subscriber::registry().with(env_filter).with(fmt_layer);

    let Some(endpoint) = &observability.otlp_endpoint else {
        registry.init();
        return;
    };

    let resource = opentelemetry_sdk::Resource::new(vec![opentelemetry::KeyValue::new(
        "service.name",
        observability.service_name.clone(),
    )]);

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint.clone())
        .build();

    match exporter {
        Ok(exporter) => {
            let provider = opentelemetry_sdk::trace::TracerProvider::builder()
                .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
                .with_resource(resource)
                .with_sampler(opentelemetry_sdk::trace::Sampler::TraceIdRatioBased(
                    observability.sample_rate,
                ))
                .build();
            opentelemetry::global::set_tracer_provider(provider.clone());
            let tracer = opentelemetry::trace::TracerProvider::tracer(&provider, observability.service_name.clone());
            let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
            registry.with(otel_layer).init();
        }
        Err(err) => {
            registry.init();
            tracing::warn!(error = %err, endpoint = %endpoint, "failed to configure OTLP exporter, continuing with local logs only");
        }
    }
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("fleet-gateway starting");

    let state = bootstrap::build_app_state(config.clone()).await?;
    bootstrap::spawn_background_tasks(&state);

    let cors_layer = build_cors_layer(&config.server.cors);
    let max_concurrent = std::env::var("FLEET_MAX_CONCURRENT_REQUESTS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(256);
    tracing::info!(max_concurrent, "concurrency limit set");

    let rl = &config.rate_limit;

    // Each budget is expressed as N requests per window; tower_governor
    // wants a per-second rate plus a burst, so the whole window's budget is
    // taken as one burst — a client idle for the whole window can still use
    // its full allowance in one go rather than being throttled to a steady
    // trickle.
    let register_governor = GovernorLayer {
        config: Arc::new(
            GovernorConfigBuilder::default()
                .per_second((3600 / rl.register_per_hour.max(1) as u64).max(1))
                .burst_size(rl.register_per_hour.max(1))
                .finish()
                .expect("register_per_hour must be > 0"),
        ),
    };
    let token_governor = GovernorLayer {
        config: Arc::new(
            GovernorConfigBuilder::default()
                .per_second((60 / rl.token_per_min.max(1) as u64).max(1))
                .burst_size(rl.token_per_min.max(1))
                .finish()
                .expect("token_per_min must be > 0"),
        ),
    };
    let mcp_ip_governor = GovernorLayer {
        config: Arc::new(
            GovernorConfigBuilder::default()
                .per_second((60 / rl.mcp_per_min_ip.max(1) as u64).max(1))
                .burst_size(rl.mcp_per_min_ip.max(1))
                .finish()
                .expect("mcp_per_min_ip must be > 0"),
        ),
    };
    let mcp_conn_governor = GovernorLayer {
        config: Arc::new(
            GovernorConfigBuilder::default()
                .key_extractor(McpConnectionKeyExtractor)
                .per_second((60 / rl.mcp_per_min_connection.max(1) as u64).max(1))
                .burst_size(rl.mcp_per_min_connection.max(1))
                .finish()
                .expect("mcp_per_min_connection must be > 0"),
        ),
    };
    tracing::info!(
        register_per_hour = rl.register_per_hour,
        token_per_min = rl.token_per_min,
        mcp_per_min_ip = rl.mcp_per_min_ip,
        mcp_per_min_connection = rl.mcp_per_min_connection,
        "rate limits enabled"
    );

    let app = api::rest_router()
        .merge(api::oauth_register_router().layer(register_governor))
        .merge(api::oauth_token_router().layer(token_governor))
        .merge(api::mcp_router().layer(mcp_ip_governor).layer(mcp_conn_governor))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(cors_layer)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent))
        .with_state(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;

    tracing::info!(addr = %addr, "fleet-gateway listening");

    axum::serve(listener, app).await.context("axum server error")?;

    Ok(())
}

/// Build a [`CorsLayer`] from the configured allowed origins.
///
/// Origins may contain a trailing `*` wildcard for the port segment (e.g.
/// `http://localhost:*`). These expand into a predicate matching any port
/// on that host. A literal `"*"` allows all origins.
fn build_cors_layer(cors: &CorsConfig) -> CorsLayer {
    use axum::http::header;

    if cors.allowed_origins.len() == 1 && cors.allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    }

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();

    for origin in &cors.allowed_origins {
        if origin.ends_with(":*") {
            wildcard_prefixes.push(origin.trim_end_matches('*').to_owned());
        } else if let Ok(hv) = origin.parse::<HeaderValue>() {
            exact.push(hv);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if wildcard_prefixes.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            let origin_str = origin.to_str().unwrap_or("");
            if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
                return true;
            }
            wildcard_prefixes.iter().any(|prefix| {
                origin_str
                    .strip_prefix(prefix.as_str())
                    .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
            })
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}
