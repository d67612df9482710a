use std::path::Path;

use anyhow::Context;
use tracing::info;

use orbit_core::{OrbitConfig, SessionState};
use orbit_drivers::command_drivers;
use orbit_lifecycle::{LifecycleSession, LifecycleSettings, Orchestrator};

use super::{Exit, Format, open_store, print_teardown, remove_session_dir};

pub async fn run(
    state_dir: &Path,
    session_id: Option<&str>,
    config_path: &Path,
    format: Format,
) -> anyhow::Result<Exit> {
    let settings = if config_path.exists() {
        let config = OrbitConfig::from_file(config_path)
            .with_context(|| format!("loading {}", config_path.display()))?;
        LifecycleSettings::from_config(&config)
    } else {
        LifecycleSettings::default()
    };

    let store = open_store(state_dir)?;
    let session_id = match session_id {
        Some(id) => id.to_string(),
        None => match store.latest_open_session()? {
            Some(meta) => meta.id,
            None => {
                info!("no open session to tear down");
                println!("nothing to tear down");
                return Ok(Exit::Success);
            }
        },
    };

    let mut session = LifecycleSession::recover(store, &session_id)?;
    let orchestrator = Orchestrator::new(command_drivers(), settings);
    let report = orchestrator
        .teardown(&mut session)
        .await
        .with_context(|| format!("tearing down session {session_id}"))?;
    if session.state() == SessionState::Destroyed {
        remove_session_dir(state_dir, session.id());
    }

    match format {
        Format::Json => println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "session": session.id(),
                "state": session.state(),
                "teardown": report,
            }))?
        ),
        Format::Text => {
            println!("session {} is {}", session.id(), session.state());
            print_teardown(&report);
        }
    }

    Ok(if report.is_clean() { Exit::Success } else { Exit::Leaked })
}
