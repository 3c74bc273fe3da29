//! Dependency resolution: parse imports, install, maintain remappings.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use crate::errors::ToolResult;
use crate::process::run_with_timeout;

/// Install timeout per dependency.
const INSTALL_TIMEOUT_SECS: u64 = 120;

/// One declared dependency with its toolchain coordinates.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Dependency {
    /// Import prefix as written in the source, e.g. `@openzeppelin/contracts`.
    pub prefix: String,
    /// Repository slug passed to `forge install`.
    pub package: String,
    /// Pinned version tag.
    pub version: String,
    /// Remapping line for `remappings.txt`.
    pub remapping: String,
}

/// Outcome of a resolution pass.
#[derive(Debug, Clone, Default)]
pub struct ResolutionOutcome {
    pub dependencies: Vec<Dependency>,
    pub installed: Vec<String>,
    pub remappings_updated: bool,
}

/// Resolves a source file's dependencies into an installed, remapped
/// project. Idempotent: resolving twice changes nothing.
#[async_trait]
pub trait DependencyResolver: Send + Sync {
    async fn resolve(&self, source: &str, project_dir: &Path) -> ToolResult<ResolutionOutcome>;
}

/// Map an import prefix to its package coordinates. Unknown prefixes are
/// left for the compiler to complain about.
fn known_dependency(prefix: &str) -> Option<Dependency> {
    match prefix {
        "@openzeppelin/contracts" => Some(Dependency {
            prefix: prefix.to_string(),
            package: "OpenZeppelin/openzeppelin-contracts".to_string(),
            version: "v5.0.2".to_string(),
            remapping: "@openzeppelin/contracts/=lib/openzeppelin-contracts/contracts/"
                .to_string(),
        }),
        "@openzeppelin/contracts-upgradeable" => Some(Dependency {
            prefix: prefix.to_string(),
            package: "OpenZeppelin/openzeppelin-contracts-upgradeable".to_string(),
            version: "v5.0.2".to_string(),
            remapping:
                "@openzeppelin/contracts-upgradeable/=lib/openzeppelin-contracts-upgradeable/contracts/"
                    .to_string(),
        }),
        "solmate" => Some(Dependency {
            prefix: prefix.to_string(),
            package: "transmissions11/solmate".to_string(),
            version: "v6".to_string(),
            remapping: "solmate/=lib/solmate/src/".to_string(),
        }),
        _ => None,
    }
}

/// Parse the dependency prefixes declared by a source file.
pub fn parse_imports(source: &str) -> Vec<Dependency> {
    let re = Regex::new(r#"import\s+(?:\{[^}]*\}\s+from\s+)?["']([^"']+)["']"#)
        .expect("static regex");

    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut dependencies = Vec::new();

    for caps in re.captures_iter(source) {
        let import_path = &caps[1];
        // Relative imports resolve inside the project.
        if import_path.starts_with("./") || import_path.starts_with("../") {
            continue;
        }
        let prefix = if import_path.starts_with('@') {
            import_path.split('/').take(2).collect::<Vec<_>>().join("/")
        } else {
            import_path
                .split('/')
                .next()
                .unwrap_or(import_path)
                .to_string()
        };
        if !seen.insert(prefix.clone()) {
            continue;
        }
        if let Some(dependency) = known_dependency(&prefix) {
            dependencies.push(dependency);
        } else {
            tracing::debug!(prefix, "Unknown import prefix; leaving to the compiler");
        }
    }

    dependencies
}

/// Foundry-backed resolver using `forge install` and `remappings.txt`.
pub struct ForgeDependencyResolver;

impl ForgeDependencyResolver {
    /// Merge remapping lines into `remappings.txt`, sorted and deduplicated.
    fn update_remappings(project_dir: &Path, dependencies: &[Dependency]) -> ToolResult<bool> {
        if dependencies.is_empty() {
            return Ok(false);
        }
        let path = project_dir.join("remappings.txt");
        let existing = std::fs::read_to_string(&path).unwrap_or_default();

        let mut lines: BTreeSet<String> = existing
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();

        let before = lines.len();
        for dependency in dependencies {
            lines.insert(dependency.remapping.clone());
        }
        if lines.len() == before && path.exists() {
            return Ok(false);
        }

        let mut content: String = lines.into_iter().collect::<Vec<_>>().join("\n");
        content.push('\n');
        std::fs::write(&path, content)?;
        Ok(true)
    }

    fn already_installed(project_dir: &Path, dependency: &Dependency) -> bool {
        let lib_name = dependency
            .package
            .rsplit('/')
            .next()
            .unwrap_or(&dependency.package);
        project_dir.join("lib").join(lib_name).exists()
    }
}

#[async_trait]
impl DependencyResolver for ForgeDependencyResolver {
    async fn resolve(&self, source: &str, project_dir: &Path) -> ToolResult<ResolutionOutcome> {
        let dependencies = parse_imports(source);
        let mut installed = Vec::new();

        for dependency in &dependencies {
            if Self::already_installed(project_dir, dependency) {
                tracing::debug!(package = %dependency.package, "Dependency already installed");
                continue;
            }

            let spec = format!("{}@{}", dependency.package, dependency.version);
            let output = run_with_timeout(
                "forge",
                &["install", &spec, "--no-git"],
                Some(project_dir),
                Duration::from_secs(INSTALL_TIMEOUT_SECS),
            )
            .await?;

            if output.success() {
                tracing::info!(package = %spec, "Installed dependency");
                installed.push(spec);
            } else {
                tracing::warn!(package = %spec, stderr = %output.stderr, "Dependency install failed");
            }
        }

        let remappings_updated = Self::update_remappings(project_dir, &dependencies)?;

        Ok(ResolutionOutcome {
            dependencies,
            installed,
            remappings_updated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"
        pragma solidity ^0.8.24;
        import "@openzeppelin/contracts/token/ERC20/ERC20.sol";
        import {Ownable} from "@openzeppelin/contracts/access/Ownable.sol";
        import "./interfaces/IThing.sol";
        import "solmate/tokens/ERC721.sol";
    "#;

    #[test]
    fn test_parse_imports_dedups_prefixes() {
        let deps = parse_imports(SOURCE);
        let prefixes: Vec<&str> = deps.iter().map(|d| d.prefix.as_str()).collect();
        assert_eq!(prefixes, vec!["@openzeppelin/contracts", "solmate"]);
    }

    #[test]
    fn test_relative_imports_skipped() {
        let deps = parse_imports("import \"./local/Thing.sol\";");
        assert!(deps.is_empty());
    }

    #[test]
    fn test_remappings_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let deps = parse_imports(SOURCE);

        let first = ForgeDependencyResolver::update_remappings(dir.path(), &deps).unwrap();
        assert!(first);
        let content = std::fs::read_to_string(dir.path().join("remappings.txt")).unwrap();
        assert!(content.contains("@openzeppelin/contracts/=lib/openzeppelin-contracts/contracts/"));

        // Second pass changes nothing.
        let second = ForgeDependencyResolver::update_remappings(dir.path(), &deps).unwrap();
        assert!(!second);
        let again = std::fs::read_to_string(dir.path().join("remappings.txt")).unwrap();
        assert_eq!(content, again);
    }
}
