use acelink::{
    init_logging_with, AceController, JsonVariableStore, LogFormat, NoopHooks, SerialConnector,
    BUILD_DATE, VERSION,
};
use acelink_settings::{default_config_path, ensure_config_dir, load_or_default};
use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

fn usage() -> ! {
    eprintln!("usage: acelink [--json-logs] [--list-ports] [CONFIG]");
    std::process::exit(2);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config_path = None;
    let mut log_format = LogFormat::Pretty;
    let mut list_only = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--json-logs" => log_format = LogFormat::Json,
            "--list-ports" => list_only = true,
            "-h" | "--help" => usage(),
            _ if arg.starts_with('-') => usage(),
            _ => config_path = Some(PathBuf::from(arg)),
        }
    }

    init_logging_with(log_format)?;
    tracing::info!("acelink {} (built {})", VERSION, BUILD_DATE);

    if list_only {
        for port in acelink::list_ports()? {
            println!("{}\t{}", port.port_name, port.description);
        }
        return Ok(());
    }

    let config_path = config_path.unwrap_or_else(default_config_path);
    let config = load_or_default(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let config_dir = ensure_config_dir().context("creating config directory")?;
    tracing::debug!("Config directory {}", config_dir.display());
    let variables = JsonVariableStore::open_default().context("opening variable store")?;
    tracing::info!("Variables stored in {}", variables.path().display());

    let controller = AceController::new(
        config.clone(),
        Arc::new(SerialConnector::from_config(&config)),
        Arc::new(NoopHooks),
        Arc::new(variables),
    );

    let mut events = controller.events().receiver();
    let logger = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => tracing::info!(category = ?event.category(), "{}", event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Event log lagged, {} events skipped", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    if let Err(e) = controller.start().await {
        tracing::warn!("{}; retrying in the background", e);
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    controller.disconnect();
    logger.abort();
    Ok(())
}
