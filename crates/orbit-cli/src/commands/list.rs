use std::path::Path;

use super::{Exit, Format, open_store};

pub fn run(state_dir: &Path, format: Format) -> anyhow::Result<Exit> {
    let store = open_store(state_dir)?;
    let sessions = store.list_sessions()?;

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&sessions)?),
        Format::Text => {
            if sessions.is_empty() {
                println!("no sessions");
            }
            for meta in &sessions {
                let leaks = if meta.leaks.is_empty() {
                    String::new()
                } else {
                    format!("  ({} leaked)", meta.leaks.len())
                };
                println!("{:<40} {:<13} {}{leaks}", meta.id, meta.state.label(), meta.created_at);
            }
        }
    }
    Ok(Exit::Success)
}
