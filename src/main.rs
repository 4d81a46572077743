use parametric_sim::{
    optimize_parameters_with, validate_result, AppConfig, SimulationController, StatusKind,
};
use portable_atomic::{AtomicU64, Ordering};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cfg = match AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("config error: {e}");
            std::process::exit(1);
        }
    };

    let probe = cfg.engine.memory_probe();
    let params = optimize_parameters_with(&cfg.params, probe.as_ref());

    tracing::info!(
        initial_price = params.initial_price,
        volatility = params.volatility,
        drift = params.drift,
        days = params.time_horizon,
        simulations = params.num_simulations,
        trigger = params.trigger_threshold,
        jumps = cfg.engine.use_jumps,
        seed = ?cfg.engine.seed,
        "parametric_sim starting"
    );

    let controller = SimulationController::with_memory_probe(probe);

    // Log at most once per 10%
    let last_decile = AtomicU64::new(u64::MAX);
    controller.on_progress(move |p| {
        let decile = (p.progress / 10.0).floor() as u64;
        if last_decile.swap(decile, Ordering::Relaxed) != decile {
            tracing::info!(
                progress = p.progress.round(),
                stage = %p.stage,
                eta_ms = p.estimated_time_remaining,
                "progress"
            );
        }
    });
    controller.on_status_change(|e| match e.status {
        StatusKind::Error => tracing::warn!(
            status = %e.status,
            kind = e.error_kind.unwrap_or("unknown"),
            error = e.error.as_deref().unwrap_or(""),
            "status changed"
        ),
        _ => tracing::info!(status = %e.status, elapsed_ms = e.elapsed_time, "status changed"),
    });

    // Ctrl-C cancels the run cooperatively
    let cancel_handle = controller.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, canceling");
            if let Err(e) = cancel_handle.cancel() {
                tracing::debug!(error = %e, "nothing to cancel");
            }
        }
    });

    let result = controller.start_simulation(params, &cfg.engine).await;
    controller.cleanup();

    let result = match result {
        Ok(r) => r,
        Err(e) if e.is_canceled() => {
            tracing::warn!("{e}");
            std::process::exit(130);
        }
        Err(e) => {
            tracing::error!(kind = e.kind(), "simulation failed: {e}");
            std::process::exit(1);
        }
    };

    if !validate_result(&result, &params) {
        tracing::error!("simulation result failed validation");
        std::process::exit(1);
    }

    match serde_json::to_string_pretty(&result.summary()) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            tracing::error!("failed to serialize summary: {e}");
            std::process::exit(1);
        }
    }
}
