//! Python source tree discovery via `pyproject.toml`.
//!
//! The builder stage turns the tree into a wheel with a PEP 517 frontend,
//! so the tree must carry a `[build-system]` table. Runtime dependencies
//! come from `[project].dependencies` and are normalized (sorted and
//! deduplicated) so two discoveries of the same tree compare equal.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Metadata extracted from the application's `pyproject.toml`.
///
/// # Examples
///
/// ```no_run
/// use slipway_core::PythonProject;
/// use std::path::Path;
///
/// let project = PythonProject::discover(Path::new(".")).unwrap();
/// println!("Packaging {} v{}", project.name, project.version);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PythonProject {
    /// Distribution name from `[project].name`
    pub name: String,
    /// Declared version, or `0.0.0` when the version is dynamic
    pub version: String,
    /// Declared runtime requirements, sorted and deduplicated
    pub dependencies: Vec<String>,
    /// `[build-system].requires`, in declaration order
    pub build_requires: Vec<String>,
    /// Absolute path of the source tree
    pub root: PathBuf,
}

#[derive(Deserialize)]
struct PyProjectToml {
    #[serde(rename = "build-system")]
    build_system: Option<BuildSystemSection>,
    project: Option<ProjectSection>,
}

#[derive(Deserialize)]
struct BuildSystemSection {
    #[serde(default)]
    requires: Vec<String>,
}

#[derive(Deserialize)]
struct ProjectSection {
    name: Option<String>,
    version: Option<String>,
    #[serde(default)]
    dependencies: Vec<String>,
}

impl PythonProject {
    /// Discover the Python project rooted at `project_dir`.
    ///
    /// # Errors
    ///
    /// - [`Error::ManifestMissing`](crate::Error::ManifestMissing) if there is no `pyproject.toml`
    /// - [`Error::MissingBuildSystem`](crate::Error::MissingBuildSystem) if it has no `[build-system]`
    /// - [`Error::MissingProjectName`](crate::Error::MissingProjectName) if `[project].name` is absent
    pub fn discover(project_dir: &Path) -> crate::Result<Self> {
        let manifest_path = project_dir.join("pyproject.toml");
        if !manifest_path.is_file() {
            return Err(crate::Error::ManifestMissing {
                dir: project_dir.to_path_buf(),
            });
        }
        tracing::debug!(path = %manifest_path.display(), "reading pyproject.toml");

        let content =
            std::fs::read_to_string(&manifest_path).map_err(|e| crate::Error::ManifestRead {
                path: manifest_path.clone(),
                source: e,
            })?;
        let parsed: PyProjectToml =
            toml::from_str(&content).map_err(|e| crate::Error::ManifestParse {
                path: manifest_path.clone(),
                source: e,
            })?;

        let build_system = parsed
            .build_system
            .ok_or_else(|| crate::Error::MissingBuildSystem {
                path: manifest_path.clone(),
            })?;

        let project = parsed
            .project
            .ok_or_else(|| crate::Error::MissingProjectName {
                path: manifest_path.clone(),
            })?;
        let name = project
            .name
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| crate::Error::MissingProjectName {
                path: manifest_path.clone(),
            })?;

        let root = project_dir
            .canonicalize()
            .map_err(|e| crate::Error::ProjectDirResolve {
                path: project_dir.to_path_buf(),
                source: e,
            })?;

        let discovered = Self {
            name,
            version: project.version.unwrap_or_else(|| "0.0.0".to_owned()),
            dependencies: normalize_requirements(project.dependencies),
            build_requires: build_system.requires,
            root,
        };

        tracing::debug!(
            name = %discovered.name,
            version = %discovered.version,
            dependencies = discovered.dependencies.len(),
            "python project discovered"
        );

        Ok(discovered)
    }

    /// Importable package name: `my-app` and `My.App` both become `my_app`.
    pub fn import_name(&self) -> String {
        self.name
            .chars()
            .map(|c| match c {
                '-' | '.' => '_',
                other => other.to_ascii_lowercase(),
            })
            .collect()
    }

    /// Default entry module, `<import_name>.manage`.
    pub fn default_entry_module(&self) -> String {
        format!("{}.manage", self.import_name())
    }

    /// Requirements that do not pin an exact version with `==`.
    pub fn unpinned_dependencies(&self) -> Vec<&str> {
        self.dependencies
            .iter()
            .map(String::as_str)
            .filter(|req| !is_pinned(req))
            .collect()
    }

    /// Fail with [`Error::UnpinnedDependencies`](crate::Error::UnpinnedDependencies)
    /// when any requirement is unpinned.
    pub fn ensure_pinned(&self) -> crate::Result<()> {
        let unpinned = self.unpinned_dependencies();
        if unpinned.is_empty() {
            Ok(())
        } else {
            Err(crate::Error::UnpinnedDependencies {
                requirements: unpinned.into_iter().map(str::to_owned).collect(),
            })
        }
    }

    /// Whether `module` (dotted path) exists in the source tree, either in a
    /// `src/` layout or a flat layout.
    pub fn has_module(&self, module: &str) -> bool {
        let relative: PathBuf = module.split('.').collect();
        [self.root.join("src"), self.root.clone()].iter().any(|base| {
            let candidate = base.join(&relative);
            candidate.with_extension("py").is_file() || candidate.join("__init__.py").is_file()
        })
    }

    /// Fail with [`Error::EntryModuleMissing`](crate::Error::EntryModuleMissing)
    /// when `module` is not part of the tree.
    pub fn ensure_module(&self, module: &str) -> crate::Result<()> {
        if self.has_module(module) {
            Ok(())
        } else {
            Err(crate::Error::EntryModuleMissing {
                module: module.to_owned(),
                dir: self.root.clone(),
            })
        }
    }
}

/// Trim, collapse inner whitespace, sort and deduplicate.
fn normalize_requirements(requirements: Vec<String>) -> Vec<String> {
    let mut normalized: Vec<String> = requirements
        .into_iter()
        .map(|r| r.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|r| !r.is_empty())
        .collect();
    normalized.sort();
    normalized.dedup();
    normalized
}

/// A requirement is pinned when its version specifier is a single `==`
/// clause without wildcards. Environment markers after `;` are ignored.
fn is_pinned(requirement: &str) -> bool {
    let spec = requirement.split(';').next().unwrap_or(requirement);
    let Some((_, version)) = spec.split_once("==") else {
        return false;
    };
    let version = version.trim();
    !version.is_empty() && !version.starts_with('=') && !version.contains(['*', ',', '<', '>'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pinned_requirements() {
        assert!(is_pinned("asyncpg==0.29.0"));
        assert!(is_pinned("asyncpg == 0.29.0"));
        assert!(is_pinned("psutil==5.9.8; sys_platform == 'linux'"));
    }

    #[test]
    fn unpinned_requirements() {
        assert!(!is_pinned("asyncpg"));
        assert!(!is_pinned("asyncpg>=0.29"));
        assert!(!is_pinned("asyncpg==0.*"));
        assert!(!is_pinned("asyncpg===0.29.0"));
        assert!(!is_pinned("asyncpg==0.29,<1"));
        assert!(!is_pinned("psutil; sys_platform == 'linux'"));
    }

    #[test]
    fn normalize_sorts_and_dedups() {
        let reqs = vec![
            "psutil==5.9.8".to_owned(),
            "  asyncpg==0.29.0 ".to_owned(),
            "psutil==5.9.8".to_owned(),
            String::new(),
        ];
        assert_eq!(
            normalize_requirements(reqs),
            vec!["asyncpg==0.29.0", "psutil==5.9.8"]
        );
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn requirement() -> impl Strategy<Value = String> {
            ("[a-z][a-z0-9-]{0,12}", "[0-9]{1,2}\\.[0-9]{1,2}", any::<bool>()).prop_map(
                |(name, version, pinned)| {
                    if pinned {
                        format!("{name}=={version}")
                    } else {
                        format!("{name}>={version}")
                    }
                },
            )
        }

        proptest! {
            #[test]
            fn normalization_ignores_declaration_order(
                mut reqs in proptest::collection::vec(requirement(), 0..8),
            ) {
                let forward = normalize_requirements(reqs.clone());
                reqs.reverse();
                let backward = normalize_requirements(reqs);
                prop_assert_eq!(forward, backward);
            }

            #[test]
            fn normalization_is_idempotent(
                reqs in proptest::collection::vec(requirement(), 0..8),
            ) {
                let once = normalize_requirements(reqs);
                let twice = normalize_requirements(once.clone());
                prop_assert_eq!(once, twice);
            }

            #[test]
            fn generated_pins_are_recognized(req in requirement()) {
                prop_assert_eq!(is_pinned(&req), req.contains("=="));
            }
        }
    }
}
