use std::path::Path;

use anyhow::Context;

use orbit_core::{OrbitConfig, config::SCAFFOLD_TEMPLATES};

use super::{Exit, UsageError};

pub fn run(config_path: &Path, name: &str, project: &str, force: bool) -> anyhow::Result<Exit> {
    let base_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));

    let mut files = vec![(
        config_path.to_path_buf(),
        OrbitConfig::scaffold(name, project).to_toml_string()?,
    )];
    files.extend(
        SCAFFOLD_TEMPLATES
            .iter()
            .map(|(rel, content)| (base_dir.join(rel), content.to_string())),
    );

    if !force {
        if let Some((existing, _)) = files.iter().find(|(path, _)| path.exists()) {
            return Err(UsageError(format!(
                "{} already exists (use --force to overwrite)",
                existing.display()
            ))
            .into());
        }
    }

    for (path, content) in &files {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        std::fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;
        println!("✓ Generated {}", path.display());
    }
    Ok(Exit::Success)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_a_loadable_scaffold() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("orbit.toml");

        assert_eq!(run(&config_path, "demo", "proj-1", false).unwrap(), Exit::Success);

        let config = OrbitConfig::from_file(&config_path).unwrap();
        assert_eq!(config.session.name, "demo");
        assert_eq!(config.cluster.project, "proj-1");
        for (rel, _) in SCAFFOLD_TEMPLATES {
            assert!(dir.path().join(rel).exists(), "{rel} missing");
        }
    }

    #[test]
    fn refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("orbit.toml");
        std::fs::write(&config_path, "# mine").unwrap();

        let err = run(&config_path, "demo", "proj-1", false).unwrap_err();
        assert!(err.is::<UsageError>());
        assert_eq!(std::fs::read_to_string(&config_path).unwrap(), "# mine");

        run(&config_path, "demo", "proj-1", true).unwrap();
        assert!(OrbitConfig::from_file(&config_path).is_ok());
    }
}
