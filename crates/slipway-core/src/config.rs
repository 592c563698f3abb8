use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// slipway.toml configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlipwayConfig {
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub builder: BuilderConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub image: ImageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectConfig {
    /// Project name (defaults to pyproject.toml `[project].name`)
    pub name: Option<String>,
    /// Working directory of the application inside the image
    #[serde(default = "default_app_root")]
    pub app_root: PathBuf,
    /// Log directory, must live beneath `app_root`
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Module started with `python -m` (defaults to `<import_name>.manage`)
    pub entry_module: Option<String>,
    /// Interpreter used by both stages: build tool, installer, and entry point
    #[serde(default = "default_python")]
    pub python: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuilderConfig {
    /// Image hosting the build tooling
    #[serde(default = "default_python_image")]
    pub image: String,
    /// PyPI distribution invoked as `python -m <build_tool>`
    #[serde(default = "default_build_tool")]
    pub build_tool: String,
    #[serde(default = "default_build_tool_version")]
    pub build_tool_version: String,
    /// Directory in the builder stage that receives the wheel
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,
    /// Refuse to build when a declared dependency has no exact `==` pin
    #[serde(default)]
    pub require_pinned: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Minimal base image for the final environment
    #[serde(default = "default_python_image")]
    pub image: String,
    /// Shared libraries required by native dependencies, installed via apt-get
    #[serde(default = "default_system_packages")]
    pub system_packages: Vec<String>,
    /// Where the transferred artifact is staged before installation
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_identity_name")]
    pub name: String,
    #[serde(default = "default_identity_id")]
    pub uid: u32,
    #[serde(default = "default_identity_id")]
    pub gid: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageConfig {
    /// Image reference for the release stage (defaults to `<name>:<version>`)
    pub tag: Option<String>,
    /// OCI labels applied to the release stage
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: None,
            app_root: default_app_root(),
            log_dir: default_log_dir(),
            entry_module: None,
            python: default_python(),
        }
    }
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            image: default_python_image(),
            build_tool: default_build_tool(),
            build_tool_version: default_build_tool_version(),
            artifact_dir: default_artifact_dir(),
            require_pinned: false,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            image: default_python_image(),
            system_packages: default_system_packages(),
            staging_dir: default_staging_dir(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            name: default_identity_name(),
            uid: default_identity_id(),
            gid: default_identity_id(),
        }
    }
}

impl SlipwayConfig {
    /// Load from slipway.toml at the given path, or return defaults if not found.
    pub fn load(project_dir: &Path) -> crate::Result<Self> {
        let config_path = project_dir.join("slipway.toml");
        if config_path.exists() {
            tracing::debug!(path = %config_path.display(), "loading config");
            let content =
                std::fs::read_to_string(&config_path).map_err(|e| crate::Error::ConfigLoad {
                    path: config_path.clone(),
                    source: e,
                })?;
            toml::from_str(&content).map_err(|e| crate::Error::ConfigParse {
                path: config_path,
                source: e,
            })
        } else {
            Ok(Self::default())
        }
    }

    /// Reject configurations that would produce an image violating the
    /// hardening invariants.
    pub fn validate(&self) -> crate::Result<()> {
        let identity = &self.identity;
        if identity.uid == 0 || identity.gid == 0 || identity.name == "root" {
            return Err(crate::Error::PrivilegedIdentity {
                name: identity.name.clone(),
                uid: identity.uid,
                gid: identity.gid,
            });
        }
        if !is_valid_identity_name(&identity.name) {
            return Err(crate::Error::InvalidConfig {
                section: "identity",
                field: "name",
                value: identity.name.clone(),
                reason: "must match [a-z_][a-z0-9_-]{0,31}",
            });
        }

        require_absolute("project", "app_root", &self.project.app_root)?;
        require_absolute("project", "log_dir", &self.project.log_dir)?;
        require_absolute("builder", "artifact_dir", &self.builder.artifact_dir)?;
        require_absolute("runtime", "staging_dir", &self.runtime.staging_dir)?;

        if self.project.log_dir == self.project.app_root
            || !self.project.log_dir.starts_with(&self.project.app_root)
        {
            return Err(crate::Error::InvalidConfig {
                section: "project",
                field: "log_dir",
                value: self.project.log_dir.display().to_string(),
                reason: "must be a directory beneath app_root",
            });
        }
        if self.runtime.staging_dir.starts_with(&self.project.app_root) {
            return Err(crate::Error::InvalidConfig {
                section: "runtime",
                field: "staging_dir",
                value: self.runtime.staging_dir.display().to_string(),
                reason: "must not live inside app_root",
            });
        }
        if self.runtime.staging_dir == Path::new("/") {
            return Err(crate::Error::InvalidConfig {
                section: "runtime",
                field: "staging_dir",
                value: "/".to_owned(),
                reason: "the staging directory is removed after installation",
            });
        }

        require_non_empty("builder", "image", &self.builder.image)?;
        require_non_empty("builder", "build_tool", &self.builder.build_tool)?;
        require_non_empty("runtime", "image", &self.runtime.image)?;
        require_non_empty("project", "python", &self.project.python)?;

        if let Some(pkg) = self
            .runtime
            .system_packages
            .iter()
            .find(|p| p.is_empty() || p.contains(char::is_whitespace))
        {
            return Err(crate::Error::InvalidConfig {
                section: "runtime",
                field: "system_packages",
                value: pkg.clone(),
                reason: "package names must be non-empty and contain no whitespace",
            });
        }

        Ok(())
    }
}

/// Image paths end up in mount options, `WORKDIR` and shell commands, so they
/// must be absolute, already normalized, and free of whitespace, quotes and
/// commas. Containment checks compare components lexically, which only holds
/// when no `.` or `..` segment is present.
fn require_absolute(section: &'static str, field: &'static str, path: &Path) -> crate::Result<()> {
    let value = path.display().to_string();
    let reason = if !path.is_absolute() {
        "must be an absolute path"
    } else if value.split('/').any(|segment| segment == "." || segment == "..") {
        "must not contain `.` or `..` segments"
    } else if value.contains(|c: char| c.is_whitespace() || matches!(c, '\'' | '"' | ',')) {
        "must not contain whitespace, quotes or commas"
    } else {
        return Ok(());
    };
    Err(crate::Error::InvalidConfig {
        section,
        field,
        value,
        reason,
    })
}

fn require_non_empty(section: &'static str, field: &'static str, value: &str) -> crate::Result<()> {
    if value.trim().is_empty() {
        Err(crate::Error::InvalidConfig {
            section,
            field,
            value: value.to_owned(),
            reason: "must not be empty",
        })
    } else {
        Ok(())
    }
}

/// Portable `useradd` name: `[a-z_][a-z0-9_-]{0,31}`
fn is_valid_identity_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() <= 32
        && (first.is_ascii_lowercase() || first == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

fn default_app_root() -> PathBuf {
    PathBuf::from("/app")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/app/logs")
}

fn default_python() -> String {
    "python".to_owned()
}

fn default_python_image() -> String {
    "python:3.12-slim".to_owned()
}

fn default_build_tool() -> String {
    "build".to_owned()
}

fn default_build_tool_version() -> String {
    "1.2.2".to_owned()
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from("/build/dist")
}

fn default_system_packages() -> Vec<String> {
    vec!["libpq5".to_owned()]
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("/tmp/dist")
}

fn default_identity_name() -> String {
    "databaser".to_owned()
}

fn default_identity_id() -> u32 {
    10001
}
