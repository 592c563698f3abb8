//! Typed model of the two-stage image pipeline.
//!
//! ```text
//! SourceSnapshot → Built → ArtifactStaged → Installed → DeEscalated → Running
//! ```
//!
//! Every transition consumes the previous [`Pipeline`] value, so a stage can
//! only be entered once and never re-entered. Steps that need administrative
//! privileges (installing packages, creating the identity) are methods on the
//! states before [`DeEscalated`]; the de-escalated pipeline only offers
//! [`Pipeline::launch`], which yields the immutable [`ImageDefinition`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use slipway_core::{BuilderConfig, PythonProject, RuntimeConfig, SlipwayConfig};

/// Named stages of the rendered Dockerfile, in build order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildTarget {
    /// Ephemeral stage holding the build tooling and the source snapshot
    Builder,
    /// Runtime base with the artifact and its dependencies installed
    Runtime,
    /// Runtime stage after privilege de-escalation, carrying the entry point
    Release,
}

impl BuildTarget {
    pub const ALL: [BuildTarget; 3] = [Self::Builder, Self::Runtime, Self::Release];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Builder => "builder",
            Self::Runtime => "runtime",
            Self::Release => "release",
        }
    }
}

impl fmt::Display for BuildTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the pipeline is, for logging and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PipelineState {
    SourceSnapshot,
    Built,
    ArtifactStaged,
    Installed,
    DeEscalated,
    Running,
}

impl PipelineState {
    /// Steps up to and including `Installed` run as the administrative user.
    pub fn is_privileged(self) -> bool {
        self < Self::DeEscalated
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SourceSnapshot => "source-snapshot",
            Self::Built => "built",
            Self::ArtifactStaged => "artifact-staged",
            Self::Installed => "installed",
            Self::DeEscalated => "de-escalated",
            Self::Running => "running",
        };
        f.write_str(name)
    }
}

/// Effective execution identity. There is no transition back to `Privileged`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Privilege {
    Privileged,
    DeEscalated(ApplicationIdentity),
}

impl Privilege {
    /// Switch to `identity`. Once de-escalated the identity is kept as is.
    #[must_use]
    pub fn de_escalate(self, identity: ApplicationIdentity) -> Self {
        match self {
            Self::Privileged => Self::DeEscalated(identity),
            already @ Self::DeEscalated(_) => already,
        }
    }

    pub fn is_privileged(&self) -> bool {
        matches!(self, Self::Privileged)
    }
}

// ── Stage values ──

/// Build tooling and the command that turns the snapshot into one wheel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuilderStage {
    pub image: String,
    pub build_tool: String,
    pub build_tool_version: String,
    pub artifact_dir: PathBuf,
}

impl BuilderStage {
    pub fn from_config(config: &BuilderConfig) -> Self {
        Self {
            image: config.image.clone(),
            build_tool: config.build_tool.clone(),
            build_tool_version: config.build_tool_version.clone(),
            artifact_dir: config.artifact_dir.clone(),
        }
    }

    /// Extract the single output handle. Nothing else leaves the builder.
    fn produce(&self) -> BuildArtifact {
        BuildArtifact {
            dir: self.artifact_dir.clone(),
        }
    }
}

/// Handle to the one wheel the builder stage leaves in its artifact directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildArtifact {
    dir: PathBuf,
}

impl BuildArtifact {
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// The only channel from the builder stage into the runtime base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactTransfer {
    pub from: BuildTarget,
    pub artifact: BuildArtifact,
    pub staging_dir: PathBuf,
}

impl ArtifactTransfer {
    /// Glob matching the wheel at the runtime's mount point.
    pub fn staged_pattern(&self) -> String {
        format!("{}/*.whl", self.staging_dir.display())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeBase {
    pub image: String,
    pub system_packages: Vec<String>,
}

impl RuntimeBase {
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self {
            image: config.image.clone(),
            system_packages: config.system_packages.clone(),
        }
    }
}

/// Installs the staged artifact with its transitive dependencies. The
/// staging directory exists only for the duration of the install step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyInstaller {
    pub python: String,
    pub staging_dir: PathBuf,
}

/// Non-root principal the application runs as.
///
/// Fields are private: the only constructor rejects administrative ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationIdentity {
    name: String,
    uid: u32,
    gid: u32,
}

impl ApplicationIdentity {
    pub fn new(name: impl Into<String>, uid: u32, gid: u32) -> slipway_core::Result<Self> {
        let name = name.into();
        if uid == 0 || gid == 0 || name == "root" {
            return Err(slipway_core::Error::PrivilegedIdentity { name, uid, gid });
        }
        Ok(Self { name, uid, gid })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn gid(&self) -> u32 {
        self.gid
    }

    /// `uid:gid`, the form used by `USER` and `chown`.
    pub fn user_spec(&self) -> String {
        format!("{}:{}", self.uid, self.gid)
    }
}

/// Directories handed to the application identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    pub app_root: PathBuf,
    pub log_dir: PathBuf,
}

/// Fixed process invocation: `<python> -m <module>`, no shell, no arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    argv: Vec<String>,
}

impl EntryPoint {
    pub fn python_module(python: &str, module: &str) -> Self {
        Self {
            argv: vec![python.to_owned(), "-m".to_owned(), module.to_owned()],
        }
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// The dotted module path started by this entry point.
    pub fn module(&self) -> &str {
        &self.argv[2]
    }
}

// ── Typestate ──

pub struct SourceSnapshot;

pub struct Built {
    builder: BuilderStage,
    artifact: BuildArtifact,
}

pub struct ArtifactStaged {
    builder: BuilderStage,
    transfer: ArtifactTransfer,
}

pub struct Installed {
    builder: BuilderStage,
    transfer: ArtifactTransfer,
    runtime: RuntimeBase,
    installer: DependencyInstaller,
}

pub struct DeEscalated {
    builder: BuilderStage,
    transfer: ArtifactTransfer,
    runtime: RuntimeBase,
    installer: DependencyInstaller,
    identity: ApplicationIdentity,
    paths: AppPaths,
}

/// Marker for pipeline states.
pub trait Stage: sealed::Sealed {
    const STATE: PipelineState;
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::SourceSnapshot {}
    impl Sealed for super::Built {}
    impl Sealed for super::ArtifactStaged {}
    impl Sealed for super::Installed {}
    impl Sealed for super::DeEscalated {}
}

impl Stage for SourceSnapshot {
    const STATE: PipelineState = PipelineState::SourceSnapshot;
}
impl Stage for Built {
    const STATE: PipelineState = PipelineState::Built;
}
impl Stage for ArtifactStaged {
    const STATE: PipelineState = PipelineState::ArtifactStaged;
}
impl Stage for Installed {
    const STATE: PipelineState = PipelineState::Installed;
}
impl Stage for DeEscalated {
    const STATE: PipelineState = PipelineState::DeEscalated;
}

/// Image pipeline in state `S`.
pub struct Pipeline<S: Stage> {
    name: String,
    version: String,
    state: S,
}

impl<S: Stage> Pipeline<S> {
    pub fn state(&self) -> PipelineState {
        S::STATE
    }

    fn into_next<T: Stage>(self, step: impl FnOnce(S) -> T) -> Pipeline<T> {
        let next = step(self.state);
        tracing::debug!(
            project = %self.name,
            from = %S::STATE,
            to = %T::STATE,
            "pipeline transition"
        );
        Pipeline {
            name: self.name,
            version: self.version,
            state: next,
        }
    }
}

impl Pipeline<SourceSnapshot> {
    pub fn new(project: &PythonProject) -> Self {
        Self {
            name: project.name.clone(),
            version: project.version.clone(),
            state: SourceSnapshot,
        }
    }

    pub fn build(self, builder: BuilderStage) -> Pipeline<Built> {
        self.into_next(|SourceSnapshot| {
            let artifact = builder.produce();
            Built { builder, artifact }
        })
    }
}

impl Pipeline<Built> {
    pub fn artifact(&self) -> &BuildArtifact {
        &self.state.artifact
    }

    /// Move the artifact handle, and only it, to `staging_dir` in the runtime.
    pub fn transfer(self, staging_dir: &Path) -> Pipeline<ArtifactStaged> {
        self.into_next(|Built { builder, artifact }| ArtifactStaged {
            builder,
            transfer: ArtifactTransfer {
                from: BuildTarget::Builder,
                artifact,
                staging_dir: staging_dir.to_path_buf(),
            },
        })
    }
}

impl Pipeline<ArtifactStaged> {
    pub fn install(self, runtime: RuntimeBase, python: &str) -> Pipeline<Installed> {
        self.into_next(|ArtifactStaged { builder, transfer }| {
            let installer = DependencyInstaller {
                python: python.to_owned(),
                staging_dir: transfer.staging_dir.clone(),
            };
            Installed {
                builder,
                transfer,
                runtime,
                installer,
            }
        })
    }
}

impl Pipeline<Installed> {
    /// Last privileged step: create the identity and hand it the app paths.
    pub fn de_escalate(self, identity: ApplicationIdentity, paths: AppPaths) -> Pipeline<DeEscalated> {
        tracing::debug!(
            identity = %identity.name(),
            uid = identity.uid(),
            gid = identity.gid(),
            "de-escalating"
        );
        self.into_next(
            |Installed {
                 builder,
                 transfer,
                 runtime,
                 installer,
             }| DeEscalated {
                builder,
                transfer,
                runtime,
                installer,
                identity,
                paths,
            },
        )
    }
}

impl Pipeline<DeEscalated> {
    pub fn privilege(&self) -> Privilege {
        Privilege::Privileged.de_escalate(self.state.identity.clone())
    }

    pub fn launch(self, entry_point: EntryPoint) -> ImageDefinition {
        let DeEscalated {
            builder,
            transfer,
            runtime,
            installer,
            identity,
            paths,
        } = self.state;
        tracing::debug!(
            project = %self.name,
            entry_point = ?entry_point.argv(),
            "pipeline defined"
        );
        ImageDefinition {
            tag: default_tag(&self.name, &self.version),
            distribution: self.name.clone(),
            name: self.name,
            version: self.version,
            builder,
            transfer,
            runtime,
            installer,
            identity,
            paths,
            entry_point,
            labels: BTreeMap::new(),
        }
    }
}

// ── Result ──

/// Complete, immutable description of the image: the `Running` state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDefinition {
    /// Image name; defaults to the distribution name.
    pub name: String,
    /// Distribution name of the installed wheel, as declared in `pyproject.toml`.
    pub distribution: String,
    pub version: String,
    pub tag: String,
    pub builder: BuilderStage,
    pub transfer: ArtifactTransfer,
    pub runtime: RuntimeBase,
    pub installer: DependencyInstaller,
    pub identity: ApplicationIdentity,
    pub paths: AppPaths,
    pub entry_point: EntryPoint,
    pub labels: BTreeMap<String, String>,
}

impl ImageDefinition {
    /// Validate `config` and run the whole pipeline for `project`.
    pub fn from_config(project: &PythonProject, config: &SlipwayConfig) -> slipway_core::Result<Self> {
        config.validate()?;

        let identity = ApplicationIdentity::new(
            config.identity.name.clone(),
            config.identity.uid,
            config.identity.gid,
        )?;
        let entry_module = config
            .project
            .entry_module
            .clone()
            .unwrap_or_else(|| project.default_entry_module());
        let name = config
            .project
            .name
            .clone()
            .unwrap_or_else(|| project.name.clone());

        let mut definition = Pipeline::new(project)
            .build(BuilderStage::from_config(&config.builder))
            .transfer(&config.runtime.staging_dir)
            .install(RuntimeBase::from_config(&config.runtime), &config.project.python)
            .de_escalate(
                identity,
                AppPaths {
                    app_root: config.project.app_root.clone(),
                    log_dir: config.project.log_dir.clone(),
                },
            )
            .launch(EntryPoint::python_module(&config.project.python, &entry_module));

        definition.tag = config
            .image
            .tag
            .clone()
            .unwrap_or_else(|| default_tag(&name, &project.version));
        definition.name = name;
        definition.labels = config.image.labels.clone();

        Ok(definition)
    }

    pub fn state(&self) -> PipelineState {
        PipelineState::Running
    }

    pub fn privilege(&self) -> Privilege {
        Privilege::DeEscalated(self.identity.clone())
    }

    /// Labels for the release stage: OCI title and version, then user labels
    /// (which override the defaults).
    pub fn release_labels(&self) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::from([
            (
                "org.opencontainers.image.title".to_owned(),
                self.name.clone(),
            ),
            (
                "org.opencontainers.image.version".to_owned(),
                self.version.clone(),
            ),
        ]);
        labels.extend(self.labels.clone());
        labels
    }
}

/// `<name>:<version>`, lowercased because image references must be.
fn default_tag(name: &str, version: &str) -> String {
    let version = version.replace('+', "-");
    format!("{}:{version}", name.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> PythonProject {
        PythonProject {
            name: "databaser".to_owned(),
            version: "0.7.2".to_owned(),
            dependencies: vec!["asyncpg==0.29.0".to_owned()],
            build_requires: vec!["setuptools".to_owned()],
            root: PathBuf::from("/src/databaser"),
        }
    }

    #[test]
    fn states_advance_in_order() {
        let config = SlipwayConfig::default();
        let pipeline = Pipeline::new(&project());
        assert_eq!(pipeline.state(), PipelineState::SourceSnapshot);

        let pipeline = pipeline.build(BuilderStage::from_config(&config.builder));
        assert_eq!(pipeline.state(), PipelineState::Built);
        assert_eq!(pipeline.artifact().dir(), Path::new("/build/dist"));

        let pipeline = pipeline.transfer(&config.runtime.staging_dir);
        assert_eq!(pipeline.state(), PipelineState::ArtifactStaged);

        let pipeline = pipeline.install(RuntimeBase::from_config(&config.runtime), "python");
        assert_eq!(pipeline.state(), PipelineState::Installed);
        assert!(pipeline.state().is_privileged());

        let identity = ApplicationIdentity::new("databaser", 10001, 10001).unwrap();
        let pipeline = pipeline.de_escalate(
            identity.clone(),
            AppPaths {
                app_root: PathBuf::from("/app"),
                log_dir: PathBuf::from("/app/logs"),
            },
        );
        assert_eq!(pipeline.state(), PipelineState::DeEscalated);
        assert!(!pipeline.state().is_privileged());
        assert_eq!(pipeline.privilege(), Privilege::DeEscalated(identity));

        let image = pipeline.launch(EntryPoint::python_module("python", "databaser.manage"));
        assert_eq!(image.state(), PipelineState::Running);
        assert_eq!(image.tag, "databaser:0.7.2");
    }

    #[test]
    fn state_ordering_matches_pipeline() {
        let states = [
            PipelineState::SourceSnapshot,
            PipelineState::Built,
            PipelineState::ArtifactStaged,
            PipelineState::Installed,
            PipelineState::DeEscalated,
            PipelineState::Running,
        ];
        assert!(states.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(
            states.iter().filter(|s| s.is_privileged()).count(),
            4,
            "only the states before de-escalation are privileged"
        );
    }

    #[test]
    fn privilege_never_returns_to_privileged() {
        let app = ApplicationIdentity::new("databaser", 10001, 10001).unwrap();
        let other = ApplicationIdentity::new("other", 20000, 20000).unwrap();

        let privilege = Privilege::Privileged.de_escalate(app.clone());
        assert!(!privilege.is_privileged());

        let privilege = privilege.de_escalate(other);
        assert_eq!(privilege, Privilege::DeEscalated(app));
    }

    #[test]
    fn identity_rejects_administrative_ids() {
        assert!(ApplicationIdentity::new("databaser", 0, 10001).is_err());
        assert!(ApplicationIdentity::new("databaser", 10001, 0).is_err());
        assert!(ApplicationIdentity::new("root", 10001, 10001).is_err());
        let identity = ApplicationIdentity::new("databaser", 10001, 10002).unwrap();
        assert_eq!(identity.user_spec(), "10001:10002");
    }

    #[test]
    fn transfer_carries_only_the_artifact() {
        let config = SlipwayConfig::default();
        let image = ImageDefinition::from_config(&project(), &config).unwrap();

        assert_eq!(image.transfer.from, BuildTarget::Builder);
        assert_eq!(image.transfer.artifact.dir(), Path::new("/build/dist"));
        assert_eq!(image.transfer.staged_pattern(), "/tmp/dist/*.whl");
        assert_eq!(image.installer.staging_dir, image.transfer.staging_dir);
    }

    #[test]
    fn from_config_defaults_entry_module() {
        let image = ImageDefinition::from_config(&project(), &SlipwayConfig::default()).unwrap();
        assert_eq!(
            image.entry_point.argv(),
            ["python", "-m", "databaser.manage"]
        );
        assert_eq!(image.entry_point.module(), "databaser.manage");
        assert_eq!(image.privilege(), Privilege::DeEscalated(image.identity.clone()));
    }

    #[test]
    fn from_config_applies_overrides() {
        let mut config = SlipwayConfig::default();
        config.project.name = Some("DB-Tool".to_owned());
        config.project.entry_module = Some("databaser.cli".to_owned());
        config.project.python = "python3".to_owned();
        config
            .image
            .labels
            .insert("org.opencontainers.image.version".to_owned(), "custom".to_owned());

        let image = ImageDefinition::from_config(&project(), &config).unwrap();
        assert_eq!(image.name, "DB-Tool");
        assert_eq!(image.distribution, "databaser");
        assert_eq!(image.tag, "db-tool:0.7.2");
        assert_eq!(image.entry_point.argv(), ["python3", "-m", "databaser.cli"]);
        assert_eq!(
            image.release_labels()["org.opencontainers.image.version"],
            "custom"
        );
        assert_eq!(
            image.release_labels()["org.opencontainers.image.title"],
            "DB-Tool"
        );
    }

    #[test]
    fn from_config_uses_explicit_tag() {
        let mut config = SlipwayConfig::default();
        config.image.tag = Some("registry.local/databaser:rc1".to_owned());
        let image = ImageDefinition::from_config(&project(), &config).unwrap();
        assert_eq!(image.tag, "registry.local/databaser:rc1");
    }

    #[test]
    fn from_config_rejects_invalid_config() {
        let mut config = SlipwayConfig::default();
        config.identity.uid = 0;
        assert!(ImageDefinition::from_config(&project(), &config).is_err());
    }

    #[test]
    fn default_tag_sanitizes_local_versions() {
        assert_eq!(default_tag("Databaser", "1.0+local"), "databaser:1.0-local");
    }

    #[test]
    fn build_targets_in_order() {
        let names: Vec<_> = BuildTarget::ALL.iter().map(|t| t.to_string()).collect();
        assert_eq!(names, ["builder", "runtime", "release"]);
    }
}
