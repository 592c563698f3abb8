use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to load config from {path}")]
    ConfigLoad {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config at {path}")]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid [{section}].{field} = {value:?}: {reason}")]
    InvalidConfig {
        section: &'static str,
        field: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error(
        "application identity '{name}' ({uid}:{gid}) is administrative; the image must run as a non-root principal"
    )]
    PrivilegedIdentity { name: String, uid: u32, gid: u32 },

    // ── Python project discovery ──
    #[error("no pyproject.toml in {dir}; the source tree must declare its own build manifest")]
    ManifestMissing { dir: PathBuf },

    #[error("failed to resolve project directory {path}")]
    ProjectDirResolve {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to read {path}")]
    ManifestRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}")]
    ManifestParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("{path} has no [build-system] table; slipway cannot build a wheel from it")]
    MissingBuildSystem { path: PathBuf },

    #[error("{path} has no [project].name")]
    MissingProjectName { path: PathBuf },

    #[error(
        "entry module '{module}' not found under {dir} (looked in src/ and the project root)"
    )]
    EntryModuleMissing { module: String, dir: PathBuf },

    #[error("dependencies are not pinned with '==': {}", requirements.join(", "))]
    UnpinnedDependencies { requirements: Vec<String> },
}
