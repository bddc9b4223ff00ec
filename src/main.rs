//! redprobe - entry point
//!
//! Usage: redprobe <target-url> [--principal <id>] [--degraded]

use std::sync::Arc;

use redprobe::{
    ActivityMonitor, ClaudeBackend, ConcurrencyGovernor, Config, ExecutionSupervisor,
    ScanController,
};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 || args.iter().any(|a| a == "--help" || a == "-h") {
        println!("redprobe v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: redprobe <target-url> [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --principal <id>  Governance identity (default: \"default\")");
        println!("  --degraded        Skip isolation, run tools as direct children");
        println!("  --help, -h        Show this help");
        println!();
        println!("Environment variables:");
        println!("  ANTHROPIC_API_KEY        Planner/analyst API key (optional)");
        println!("  REDPROBE_MODEL           Model for planning and analysis");
        println!("  REDPROBE_MAX_PROCESSES   Concurrent executions per principal");
        println!("  REDPROBE_MAX_STEPS       Hard ceiling on steps per run");
        return Ok(());
    }

    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let target = args[1].clone();
    let principal = args
        .iter()
        .position(|a| a == "--principal")
        .and_then(|i| args.get(i + 1))
        .cloned()
        .unwrap_or_else(|| "default".to_string());

    let mut config = Config::from_env();
    if args.iter().any(|a| a == "--degraded") {
        config.force_degraded = true;
    }

    info!("redprobe v{}", env!("CARGO_PKG_VERSION"));

    let backend = ClaudeBackend::from_config(&config).map(Arc::new);
    let planner = backend
        .clone()
        .map(|b| b as Arc<dyn redprobe::PlannerBackend>);
    let analyst = backend.map(|b| b as Arc<dyn redprobe::AnalystBackend>);

    let governor = ConcurrencyGovernor::new(config.max_processes_per_principal);
    let monitor = ActivityMonitor::new();
    let supervisor = Arc::new(ExecutionSupervisor::detect(config.clone()).await);

    let controller = ScanController::new(
        config,
        governor,
        monitor,
        supervisor,
        planner,
        analyst,
    );

    let report = controller.run(&target, &principal).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
