//! junai-agents — supervisor entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Load config
//!   3. Init logger once
//!   4. Build collaborators (persistence, capabilities, gateways)
//!   5. Spawn every enabled agent
//!   6. Spawn Ctrl-C → shutdown signal watcher
//!   7. Start inbound adapters
//!   8. Wait for the shutdown token, then drain-and-stop

use std::time::Duration;

use tracing::info;

use junai_agents::config::{self, Config};
use junai_agents::error::AppError;
use junai_agents::logger;
use junai_agents::services::SystemContext;
use junai_agents::subsystems::agents;
use junai_agents::supervisor::{AgentSystem, adapters};

/// How long blocking tasks (stdin readers) get after the agents have stopped.
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

fn main() {
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to start runtime: {e}");
            std::process::exit(1);
        }
    };

    let result = runtime.block_on(run());
    // A pending stdin read would otherwise hold the process open.
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // Load .env if present; the file is optional.
    let _ = dotenvy::dotenv();

    let config = config::load()?;
    logger::init(&config.log_level, false, config.log_file.as_deref())?;

    info!(
        system_name = %config.system_name,
        log_level = %config.log_level,
        owner = config.owner_id.as_deref().unwrap_or("-"),
        request_timeout_ms = config.bus.request_timeout.as_millis() as u64,
        "config loaded"
    );

    let context = SystemContext::from_config(&config)?;
    let mut system = AgentSystem::new(context, config.bus.clone());

    for agent in agents::build(&config) {
        system.spawn(agent)?;
    }

    let shutdown = system.shutdown_token();

    // Ctrl-C cancels the token so every drain loop winds down.
    let ctrlc_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received — initiating shutdown");
            ctrlc_token.cancel();
        }
    });

    let adapter_tasks = adapters::start(&config, &system)?;
    print_startup_summary(&config, &system);

    shutdown.cancelled().await;
    system.shutdown().await;

    for task in adapter_tasks {
        task.abort();
    }

    if config.stdio_adapter {
        use std::io::Write as _;
        println!("\nBye :) ...");
        let _ = std::io::stdout().flush();
    }
    Ok(())
}

fn print_startup_summary(config: &Config, system: &AgentSystem) {
    let agents = system
        .snapshot()
        .into_iter()
        .filter(|info| !info.status.is_client())
        .map(|info| info.name)
        .collect::<Vec<_>>();
    let gateways = config.gateways.keys().cloned().collect::<Vec<_>>();
    let list = |items: &[String]| if items.is_empty() { "none".to_string() } else { items.join(", ") };

    eprintln!("{} (pid {})", config.system_name, std::process::id());
    eprintln!("  owner:    {}", config.owner_id.as_deref().unwrap_or("not authenticated"));
    eprintln!("  agents:   {}", list(&agents));
    eprintln!("  gateways: {}", list(&gateways));
    eprintln!("  stdio:    {}", if config.stdio_adapter { "enabled (/help for commands)" } else { "disabled" });
}
