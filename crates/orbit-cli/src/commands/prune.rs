use std::path::Path;

use tracing::info;

use super::{Exit, Format, open_store, remove_session_dir};

/// Forget DESTROYED sessions and remove their scratch directories.
pub fn run(state_dir: &Path, format: Format) -> anyhow::Result<Exit> {
    let store = open_store(state_dir)?;
    let pruned = store.prune_destroyed()?;
    for session_id in &pruned {
        remove_session_dir(state_dir, session_id);
    }
    info!(pruned = pruned.len(), "sessions pruned");

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&pruned)?),
        Format::Text => {
            if pruned.is_empty() {
                println!("nothing to prune");
            }
            for session_id in &pruned {
                println!("✓ pruned {session_id}");
            }
        }
    }
    Ok(Exit::Success)
}
