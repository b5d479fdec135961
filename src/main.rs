use anyhow::Context as _;
use warden::arguments::CliArgs;
use warden::logger::{self, LogTag};
use warden::shutdown::{self, Shutdown};
use warden::{AppContext, Configs};

/// Main entry point for warden
///
/// Builds the service context, starts the background daemons (healing
/// loop, stats flush) and runs until Ctrl-C. The trading collaborators
/// link against the library and receive the same context; this binary is
/// the standalone safety core.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let raw_args: Vec<String> = std::env::args().collect();
    let cli = CliArgs::parse_filtered(&raw_args);

    if let Some(dir) = &cli.data_dir {
        warden::paths::set_base_directory(dir.clone());
    }

    // Directories must exist before the logger opens its daily file
    warden::paths::ensure_all_directories()
        .map_err(|e| anyhow::anyhow!(e))
        .context("creating data directories")?;
    logger::init(&raw_args, Some(warden::paths::get_logs_directory()));

    logger::info(LogTag::System, "Warden starting up");

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(warden::paths::get_config_path);
    let configs = Configs::load(&config_path).context("loading configuration")?;

    let context = AppContext::build(configs).context("building service context")?;

    let shutdown = Shutdown::new();
    shutdown::install_ctrlc_handler(&shutdown).context("installing signal handler")?;

    let handles = context.start(&shutdown);
    logger::info(
        LogTag::System,
        &format!(
            "Warden running ({} rate-limited venues); Ctrl-C to stop",
            context.rate_limiters.venues().count()
        ),
    );

    shutdown.wait().await;
    logger::info(LogTag::System, "Shutdown requested, stopping services");

    for handle in handles {
        if let Err(e) = handle.await {
            logger::warning(LogTag::System, &format!("Task ended abnormally: {}", e));
        }
    }

    logger::info(LogTag::System, "Warden stopped");
    logger::flush();
    Ok(())
}
