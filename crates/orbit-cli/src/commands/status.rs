use std::path::Path;

use orbit_lifecycle::LifecycleSession;

use super::{Exit, Format, UsageError, open_store};

pub async fn run(state_dir: &Path, session_id: Option<&str>, format: Format) -> anyhow::Result<Exit> {
    let store = open_store(state_dir)?;
    let session_id = match session_id {
        Some(id) => id.to_string(),
        None => match store.list_sessions()?.pop() {
            Some(meta) => meta.id,
            None => return Err(UsageError("no sessions recorded yet".to_string()).into()),
        },
    };

    let session = LifecycleSession::recover(store, &session_id)?;
    let meta = session.meta();
    let records = session.snapshot().await;

    match format {
        Format::Json => {
            let resources: Vec<_> = (1u64..)
                .zip(&records)
                .map(|(ordinal, record)| {
                    serde_json::json!({
                        "ordinal": ordinal,
                        "id": record.id,
                        "kind": record.kind,
                        "created_at": record.created_at,
                        "destroyed_at": record.destroyed_at,
                        "depends_on": record.depends_on,
                        "provider_handle": record.provider_handle,
                    })
                })
                .collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "session": meta,
                    "resources": resources,
                }))?
            );
        }
        Format::Text => {
            println!("session   {} ({})", meta.id, meta.name);
            println!("state     {}", meta.state);
            println!("created   {}", meta.created_at);
            println!("updated   {}", meta.updated_at);

            println!("resources ({}):", records.len());
            for (ordinal, record) in (1u64..).zip(&records) {
                let state = match record.destroyed_at {
                    Some(at) => format!("destroyed at {at}"),
                    None => "live".to_string(),
                };
                let deps = if record.depends_on.is_empty() {
                    "-".to_string()
                } else {
                    record.depends_on.iter().cloned().collect::<Vec<_>>().join(", ")
                };
                println!(
                    "  #{ordinal:<3} {:<16} {:<16} {:<24} deps: {deps}",
                    record.id, record.kind, state
                );
            }

            if !meta.endpoints.is_empty() {
                println!("endpoints:");
                for (name, address) in &meta.endpoints {
                    println!("  {name} = {address}");
                }
            }
            if !meta.leaks.is_empty() {
                println!("leaks:");
                for leak in &meta.leaks {
                    println!(
                        "  {} ({}) {}: {}",
                        leak.resource_id,
                        leak.kind,
                        leak.result.label(),
                        leak.reason
                    );
                }
            }
        }
    }
    Ok(Exit::Success)
}
