use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use boxflow_agent::AgentSender;
use boxflow_agent::protocol::Priority;
use boxflow_api::model::PipelineContext;
use boxflow_api::profile::FullProfile;
use boxflow_api::trace;
use boxflow_engine::bootstrap;
use boxflow_engine::config::BoxflowConfig;
use boxflow_engine::export::ExportManager;

// Exit codes: 0 success, 1 user/input error, 2 pipeline failure,
// 3 IPC/agent failure.
const EXIT_INPUT: i32 = 1;
const EXIT_PIPELINE: i32 = 2;
const EXIT_AGENT: i32 = 3;

#[derive(Parser)]
#[command(name = "boxflow", about = "Subscription processing engine for proxy client configs")]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(long, default_value = "boxflow.toml", env = "BOXFLOW_CONFIG")]
    config: String,

    /// Override the subscription URL from the config file.
    #[arg(long)]
    url: Option<String>,

    /// Override the output file path.
    #[arg(long)]
    output: Option<String>,

    /// Debug level (0-2).
    #[arg(long, default_value_t = 0)]
    debug: u8,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let code = trace::with_trace_id(None, run(cli)).await;
    if code != 0 {
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> i32 {
    tracing::info!(config = %cli.config, "loading configuration");
    let mut config = match BoxflowConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load config");
            return EXIT_INPUT;
        }
    };
    if let Some(url) = cli.url {
        config.source.url = url;
    }
    if let Some(output) = cli.output {
        config.export.output = output;
    }

    let profile = match load_profile(config.profile.as_deref()) {
        Ok(p) => p,
        Err(code) => return code,
    };

    let registry = bootstrap::default_registry();
    let coordinator = match bootstrap::default_coordinator(registry.clone()) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to assemble pipeline");
            return EXIT_INPUT;
        }
    };

    let source = config.source.to_source();
    let mut ctx = PipelineContext::new().with_mode(config.mode);
    ctx.debug_level = cli.debug;

    // Ctrl+C cancels at the next stage boundary.
    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, cancelling run");
            cancel_on_signal.cancel();
        }
    });

    let result = coordinator
        .get_servers(&source, &mut ctx, profile.as_ref(), &cancel)
        .await;
    for error in &result.errors {
        tracing::warn!(trace_id = %ctx.trace_id, stage = %error.stage, "{error}");
    }
    if !result.success {
        tracing::error!(trace_id = %ctx.trace_id, "subscription processing failed");
        return EXIT_PIPELINE;
    }
    tracing::info!(
        trace_id = %ctx.trace_id,
        servers = result.artifact.len(),
        "subscription processed"
    );

    let mut manager = ExportManager::new(registry)
        .with_format(config.export.format.clone())
        .with_options(boxflow_api::exporter::ExportOptions {
            version: config.export.version.clone(),
            skip_version_check: config.export.skip_version_check,
        });
    if let Some(client) = profile.as_ref().and_then(FullProfile::client_profile) {
        manager = manager.with_client_profile(client);
    }

    let mut export_ctx = result.context.clone();
    let document = match manager.export(&result.artifact, &[], &[], &mut export_ctx, profile.as_ref())
    {
        Ok(doc) => doc,
        Err(e) => {
            tracing::error!(trace_id = %ctx.trace_id, error = %e, "export failed");
            return EXIT_PIPELINE;
        }
    };

    let rendered = match serde_json::to_string_pretty(&document) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "config serialization failed");
            return EXIT_PIPELINE;
        }
    };
    if let Err(e) = tokio::fs::write(&config.export.output, rendered).await {
        tracing::error!(path = %config.export.output, error = %e, "cannot write output file");
        return EXIT_INPUT;
    }
    tracing::info!(path = %config.export.output, "configuration written");

    // Agent notification is independent of subscription processing;
    // failures surface through the exit code only when notify is on.
    if config.agent.notify {
        let mut sender = AgentSender::new(
            &config.agent.socket,
            Duration::from_secs(config.agent.connect_timeout_secs),
        );
        let event = serde_json::json!({
            "subscription_url": source.url,
            "servers_count": result.artifact.len(),
            "output_file": config.export.output,
        });
        match sender.send_event("subscription_updated", event, Priority::Normal).await {
            Ok(response) if response.is_success() => {
                tracing::info!(socket = %config.agent.socket, "agent notified");
            }
            Ok(_) => {
                tracing::error!(socket = %config.agent.socket, "agent rejected the event");
                return EXIT_AGENT;
            }
            Err(e) => {
                tracing::error!(socket = %config.agent.socket, error = %e, "agent notification failed");
                return EXIT_AGENT;
            }
        }
    }

    0
}

fn load_profile(path: Option<&str>) -> Result<Option<FullProfile>, i32> {
    let Some(path) = path else {
        return Ok(None);
    };
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::error!(path, error = %e, "cannot read profile");
            return Err(EXIT_INPUT);
        }
    };
    let profile: FullProfile = match serde_json::from_slice(&raw) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(path, error = %e, "invalid profile document");
            return Err(EXIT_INPUT);
        }
    };
    if let Err(e) = profile.validate() {
        tracing::error!(path, error = %e, "profile failed validation");
        return Err(EXIT_INPUT);
    }
    Ok(Some(profile))
}
