use std::path::Path;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, warn};

use orbit_core::{OrbitConfig, SessionState, TemplateRenderer};
use orbit_drivers::command_drivers;
use orbit_lifecycle::{
    LifecycleError, LifecycleSession, LifecycleSettings, Orchestrator, Plan, new_session_id,
};

use super::{Exit, Format, open_store, print_teardown, remove_session_dir, session_dir};

pub async fn run(state_dir: &Path, config_path: &Path, format: Format) -> anyhow::Result<Exit> {
    let config = OrbitConfig::from_file(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let base_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));

    let store = open_store(state_dir)?;
    // Rendered commands outlive this process, so they get an absolute path.
    let state_dir = std::path::absolute(state_dir)
        .with_context(|| format!("resolving state directory {}", state_dir.display()))?;

    // Render everything before the session exists, so a template error
    // leaves nothing behind.
    let session_id = new_session_id(&config.session.name);
    let plan = Plan::from_config(
        &config,
        base_dir,
        &session_id,
        &session_dir(&state_dir, &session_id),
        &TemplateRenderer::new(),
    )
    .context("rendering resource templates")?;

    let mut session = LifecycleSession::create(store, &session_id, &config.session.name)?;
    let orchestrator = Orchestrator::new(command_drivers(), LifecycleSettings::from_config(&config));

    // Only the first Ctrl-C is handled; later ones are swallowed so the
    // teardown it triggers runs to completion.
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling provisioning");
            let _ = cancel_tx.send(true);
        }
    });

    match orchestrator.provision(&mut session, &plan, cancel_rx).await {
        Ok(endpoints) => {
            match format {
                Format::Json => println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "session": session.id(),
                        "state": session.state(),
                        "endpoints": endpoints,
                    }))?
                ),
                Format::Text => {
                    println!("✓ session {} is {}", session.id(), session.state());
                    for (name, address) in &endpoints {
                        println!("  {name} = {address}");
                    }
                    println!("run `orbit down --session {}` when done", session.id());
                }
            }
            Ok(Exit::Success)
        }
        Err(LifecycleError::Aborted { cause, teardown }) => {
            error!(session = %session.id(), error = %cause, "provisioning aborted");
            if session.state() == SessionState::Destroyed {
                remove_session_dir(&state_dir, session.id());
            }
            match format {
                Format::Json => println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "session": session.id(),
                        "state": session.state(),
                        "error": cause.to_string(),
                        "teardown": teardown,
                    }))?
                ),
                Format::Text => {
                    println!("✗ session {} failed: {cause}", session.id());
                    print_teardown(&teardown);
                }
            }
            if teardown.is_clean() {
                Ok(Exit::ProvisionFailed)
            } else {
                Ok(Exit::Leaked)
            }
        }
        Err(e) => Err(e).with_context(|| format!("provisioning session {session_id}")),
    }
}
