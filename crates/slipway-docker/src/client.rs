use crate::docker::DockerError;
use crate::executor::{DockerExecutor, RealExecutor};
use crate::report::{CheckResult, DoctorReport, VerifyReport};
use serde::Deserialize;
use slipway_build::{BuildTarget, ImageDefinition};
use std::path::Path;

/// Docker operations client, parameterized over the executor for testability.
pub struct DockerClient<E: DockerExecutor = RealExecutor> {
    executor: E,
}

impl DockerClient<RealExecutor> {
    pub fn new() -> Self {
        Self {
            executor: RealExecutor,
        }
    }
}

impl Default for DockerClient<RealExecutor> {
    fn default() -> Self {
        Self::new()
    }
}

/// Flags forwarded to every `docker build` invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    /// Rebuild each stage without reusing cached layers.
    pub no_cache: bool,
    /// Re-pull the base images of the builder and runtime stages.
    pub pull: bool,
    /// Capture build output instead of streaming it to the terminal.
    pub capture: bool,
}

/// Result of a completed staged build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    pub tag: String,
    pub stages: Vec<BuildTarget>,
    /// Concatenated build output when [`BuildOptions::capture`] is set.
    pub output: Option<String>,
}

impl<E: DockerExecutor> DockerClient<E> {
    pub fn with_executor(executor: E) -> Self {
        Self { executor }
    }

    // ── Build ──

    /// Build the bundle up to and including `target`.
    ///
    /// Returns captured output when `options.capture` is set.
    pub async fn build_stage(
        &self,
        bundle_dir: &Path,
        target: BuildTarget,
        tag: Option<&str>,
        options: BuildOptions,
    ) -> Result<Option<String>, PipelineError> {
        let args = build_args(bundle_dir, target, tag, options)?;

        tracing::info!(%target, ?tag, "docker build");
        let result = if options.capture {
            self.executor.exec(&args).await.map(Some)
        } else {
            self.executor.exec_streaming(&args).await.map(|()| None)
        };

        result.map_err(|source| PipelineError::at(target, source))
    }

    /// Build every stage in order, tagging only the final release image.
    ///
    /// A failing stage aborts the run; no tag is produced unless the
    /// release stage completes.
    pub async fn run_pipeline(
        &self,
        bundle_dir: &Path,
        tag: &str,
        options: BuildOptions,
    ) -> Result<BuildOutcome, PipelineError> {
        let mut stages = Vec::with_capacity(BuildTarget::ALL.len());
        let mut captured: Vec<String> = Vec::new();

        for target in BuildTarget::ALL {
            let stage_tag = (target == BuildTarget::Release).then_some(tag);
            if let Some(output) = self
                .build_stage(bundle_dir, target, stage_tag, options)
                .await?
            {
                captured.push(output);
            }
            stages.push(target);
        }

        tracing::info!(tag, "image built");
        Ok(BuildOutcome {
            tag: tag.to_owned(),
            stages,
            output: options.capture.then(|| captured.concat()),
        })
    }

    // ── Verify ──

    /// Inspect a built image and check it against its definition.
    ///
    /// Fails only when the image cannot be inspected at all; every
    /// individual check is recorded in the report.
    pub async fn verify(
        &self,
        tag: &str,
        image: &ImageDefinition,
    ) -> Result<VerifyReport, VerifyError> {
        let inspect = self
            .executor
            .exec(&args([
                "image",
                "inspect",
                "--format",
                "{{json .Config}}",
                tag,
            ]))
            .await
            .map_err(|source| VerifyError::Inspect {
                tag: tag.to_owned(),
                source,
            })?;
        let config: InspectedConfig =
            serde_json::from_str(inspect.trim()).map_err(|source| VerifyError::Parse {
                tag: tag.to_owned(),
                source,
            })?;

        Ok(VerifyReport {
            configured_user: check_configured_user(&config, image),
            entry_point: check_entry_point(&config, image),
            working_dir: check_working_dir(&config, image),
            staging_removed: self.check_staging_removed(tag, image).await,
            installed_surface: self.check_installed_surface(tag, image).await,
            runtime_identity: self.check_runtime_identity(tag, image).await,
            ownership: self.check_ownership(tag, image).await,
            log_dir_writable: self.check_log_dir_writable(tag, image).await,
        })
    }

    /// Run `argv` inside a throwaway container as the image's configured user.
    async fn run_in(&self, tag: &str, argv: &[&str]) -> Result<String, DockerError> {
        let Some((program, rest)) = argv.split_first() else {
            return Ok(String::new());
        };
        let mut args = vec![
            "run".to_owned(),
            "--rm".to_owned(),
            "--network".to_owned(),
            "none".to_owned(),
            "--entrypoint".to_owned(),
            (*program).to_owned(),
            tag.to_owned(),
        ];
        args.extend(rest.iter().map(|a| (*a).to_owned()));
        self.executor.exec(&args).await
    }

    async fn check_staging_removed(&self, tag: &str, image: &ImageDefinition) -> CheckResult {
        let staging = image.installer.staging_dir.display().to_string();
        let script = format!("if [ -e '{staging}' ]; then echo present; else echo absent; fi");
        match self.run_in(tag, &["sh", "-c", script.as_str()]).await {
            Ok(out) if out.trim() == "absent" => CheckResult::ok(&format!("{staging} absent")),
            Ok(_) => CheckResult::fail(&format!("{staging} still present")),
            Err(e) => CheckResult::fail(&e.to_string()),
        }
    }

    async fn check_installed_surface(&self, tag: &str, image: &ImageDefinition) -> CheckResult {
        let python = image.installer.python.as_str();
        let listing = match self
            .run_in(tag, &[python, "-m", "pip", "list", "--format=json"])
            .await
        {
            Ok(out) => out,
            Err(e) => return CheckResult::fail(&e.to_string()),
        };
        let packages: Vec<InstalledPackage> = match serde_json::from_str(listing.trim()) {
            Ok(p) => p,
            Err(e) => return CheckResult::fail(&format!("unreadable pip list: {e}")),
        };

        let installed = |name: &str| {
            let wanted = normalize_distribution(name);
            packages
                .iter()
                .find(|p| normalize_distribution(&p.name) == wanted)
        };

        if let Some(tool) = installed(&image.builder.build_tool) {
            return CheckResult::fail(&format!(
                "build tool {} {} present in runtime",
                tool.name, tool.version
            ));
        }
        match installed(&image.distribution) {
            Some(app) => CheckResult::ok(&format!("{} {}", app.name, app.version)),
            None => CheckResult::fail(&format!("{} not installed", image.distribution)),
        }
    }

    async fn check_runtime_identity(&self, tag: &str, image: &ImageDefinition) -> CheckResult {
        let uid = match self.run_in(tag, &["id", "-u"]).await {
            Ok(out) => out.trim().to_owned(),
            Err(e) => return CheckResult::fail(&e.to_string()),
        };
        let expected = image.identity.uid().to_string();
        if uid == "0" {
            CheckResult::fail("process runs as root")
        } else if uid != expected {
            CheckResult::fail(&format!("uid {uid}, expected {expected}"))
        } else {
            CheckResult::ok(&format!("uid {uid} ({})", image.identity.name()))
        }
    }

    async fn check_ownership(&self, tag: &str, image: &ImageDefinition) -> CheckResult {
        let app_root = image.paths.app_root.display().to_string();
        let log_dir = image.paths.log_dir.display().to_string();
        let uid = image.identity.uid().to_string();
        let gid = image.identity.gid().to_string();
        let argv = [
            "find",
            app_root.as_str(),
            log_dir.as_str(),
            "(",
            "!",
            "-user",
            uid.as_str(),
            "-o",
            "!",
            "-group",
            gid.as_str(),
            ")",
            "-print",
        ];
        match self.run_in(tag, &argv).await {
            Ok(out) if out.trim().is_empty() => {
                CheckResult::ok(&format!("{app_root} {log_dir} owned by {uid}:{gid}"))
            }
            Ok(out) => {
                let foreign: Vec<&str> = out.lines().collect();
                let shown = foreign.iter().take(5).copied().collect::<Vec<_>>().join(" ");
                let more = foreign.len().saturating_sub(5);
                let suffix = if more > 0 {
                    format!(" (+{more} more)")
                } else {
                    String::new()
                };
                CheckResult::fail(&format!(
                    "{} path(s) not owned by {uid}:{gid}: {shown}{suffix}",
                    foreign.len()
                ))
            }
            Err(e) => CheckResult::fail(&e.to_string()),
        }
    }

    async fn check_log_dir_writable(&self, tag: &str, image: &ImageDefinition) -> CheckResult {
        let log_dir = image.paths.log_dir.display().to_string();
        let probe = format!("{log_dir}/.slipway-write-probe");
        let script = format!("touch '{probe}' && rm -f '{probe}' && echo writable");
        match self.run_in(tag, &["sh", "-c", script.as_str()]).await {
            Ok(out) if out.trim() == "writable" => CheckResult::ok(&log_dir),
            Ok(_) => CheckResult::fail(&format!("{log_dir} not writable")),
            Err(e) => CheckResult::fail(&e.to_string()),
        }
    }

    // ── Doctor ──

    /// Run all diagnostic checks without early return.
    /// Returns a report with pass/fail for each check item.
    pub async fn doctor(&self) -> DoctorReport {
        let mut report = DoctorReport::default();

        match self
            .executor
            .exec(&args(["version", "--format", "{{.Client.Version}}"]))
            .await
        {
            Ok(v) => report.docker = CheckResult::ok(v.trim()),
            Err(e) => report.docker = CheckResult::fail(&e.to_string()),
        }

        match self
            .executor
            .exec(&args(["info", "--format", "{{.ServerVersion}}"]))
            .await
        {
            Ok(v) if !v.trim().is_empty() => report.daemon = CheckResult::ok(v.trim()),
            Ok(_) => report.daemon = CheckResult::fail("daemon reported no version"),
            Err(_) => report.daemon = CheckResult::fail("daemon not reachable"),
        }

        match self.executor.exec(&args(["buildx", "version"])).await {
            Ok(v) => {
                let line = v.lines().next().unwrap_or_default().trim();
                report.buildx = CheckResult::ok(line);
            }
            Err(_) => {
                report.buildx = CheckResult::fail("buildx not available; staged targets need BuildKit")
            }
        }

        report
    }
}

// ── Helpers ──

fn args<const N: usize>(a: [&str; N]) -> Vec<String> {
    a.iter().map(|s| (*s).to_owned()).collect()
}

fn build_args(
    bundle_dir: &Path,
    target: BuildTarget,
    tag: Option<&str>,
    options: BuildOptions,
) -> Result<Vec<String>, PipelineError> {
    let bundle_str = bundle_dir
        .to_str()
        .ok_or_else(|| PipelineError::InvalidPath(bundle_dir.to_path_buf()))?;
    let dockerfile = bundle_dir.join("Dockerfile");
    let dockerfile_str = dockerfile
        .to_str()
        .ok_or_else(|| PipelineError::InvalidPath(dockerfile.clone()))?;

    let mut args = args(["build", "--target", target.as_str(), "--file", dockerfile_str]);
    // Each pass rebuilds only its own stage; earlier stages reuse the
    // layers produced by the previous pass.
    if options.no_cache {
        args.extend(["--no-cache-filter".to_owned(), target.as_str().to_owned()]);
    }
    if options.pull && target != BuildTarget::Release {
        args.push("--pull".to_owned());
    }
    if let Some(tag) = tag {
        args.extend(["--tag".to_owned(), tag.to_owned()]);
    }
    args.push(bundle_str.to_owned());
    Ok(args)
}

/// PEP 503 name normalization.
fn normalize_distribution(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_separator = false;
    for c in name.chars() {
        if matches!(c, '-' | '_' | '.') {
            if !in_separator {
                out.push('-');
            }
            in_separator = true;
        } else {
            out.push(c.to_ascii_lowercase());
            in_separator = false;
        }
    }
    out
}

fn check_configured_user(config: &InspectedConfig, image: &ImageDefinition) -> CheckResult {
    let expected = image.identity.user_spec();
    match config.user.as_deref() {
        None | Some("") => CheckResult::fail("no USER set; image runs as root"),
        Some(user) if is_root_user(user) => CheckResult::fail(&format!("USER {user} is root")),
        Some(user) if user == expected => CheckResult::ok(user),
        Some(user) => CheckResult::fail(&format!("USER {user}, expected {expected}")),
    }
}

fn is_root_user(user: &str) -> bool {
    let account = user.split(':').next().unwrap_or(user);
    account == "0" || account == "root"
}

fn check_entry_point(config: &InspectedConfig, image: &ImageDefinition) -> CheckResult {
    let expected = image.entry_point.argv();
    let actual = config.entrypoint.as_deref().unwrap_or_default();
    if actual != expected {
        return CheckResult::fail(&format!("entrypoint {actual:?}, expected {expected:?}"));
    }
    match config.cmd.as_deref() {
        Some(cmd) if !cmd.is_empty() => {
            CheckResult::fail(&format!("unexpected CMD {cmd:?} alongside entrypoint"))
        }
        _ => CheckResult::ok(&actual.join(" ")),
    }
}

fn check_working_dir(config: &InspectedConfig, image: &ImageDefinition) -> CheckResult {
    let expected = image.paths.app_root.display().to_string();
    match config.working_dir.as_deref() {
        Some(dir) if dir == expected => CheckResult::ok(dir),
        Some(dir) => CheckResult::fail(&format!("{dir:?}, expected {expected}")),
        None => CheckResult::fail(&format!("unset, expected {expected}")),
    }
}

/// Subset of `docker image inspect` `.Config` that verification reads.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedConfig {
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    entrypoint: Option<Vec<String>>,
    #[serde(default)]
    cmd: Option<Vec<String>>,
    #[serde(default)]
    working_dir: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InstalledPackage {
    name: String,
    version: String,
}

// ── Error types ──

/// Failure of a staged build, classified by the stage that broke.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("bundle path is not valid UTF-8: {0}")]
    InvalidPath(std::path::PathBuf),

    #[error("builder stage failed: the wheel could not be built")]
    Build { source: DockerError },

    #[error("runtime stage failed: system packages or the wheel could not be installed")]
    Install { source: DockerError },

    #[error("release stage failed: the application identity could not be set up")]
    PrivilegeSetup { source: DockerError },
}

impl PipelineError {
    fn at(target: BuildTarget, source: DockerError) -> Self {
        match target {
            BuildTarget::Builder => Self::Build { source },
            BuildTarget::Runtime => Self::Install { source },
            BuildTarget::Release => Self::PrivilegeSetup { source },
        }
    }

    /// Stage whose build failed, if any.
    pub fn target(&self) -> Option<BuildTarget> {
        match self {
            Self::InvalidPath(_) => None,
            Self::Build { .. } => Some(BuildTarget::Builder),
            Self::Install { .. } => Some(BuildTarget::Runtime),
            Self::PrivilegeSetup { .. } => Some(BuildTarget::Release),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("image {tag} could not be inspected; build it first")]
    Inspect { tag: String, source: DockerError },

    #[error("unexpected inspect output for {tag}")]
    Parse {
        tag: String,
        source: serde_json::Error,
    },
}
