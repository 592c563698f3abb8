use std::path::{Path, PathBuf};

use crate::pipeline::BuildTarget;

/// Location of the ejected Dockerfile.
pub fn ejected_path(project_dir: &Path) -> PathBuf {
    project_dir.join(".slipway").join("Dockerfile")
}

/// Writes the rendered Dockerfile to `.slipway/Dockerfile`.
///
/// After ejecting, `slipway build` uses that file instead of generating one.
pub fn eject(project_dir: &Path, dockerfile_content: &str) -> Result<PathBuf, EjectError> {
    let slipway_dir = project_dir.join(".slipway");
    std::fs::create_dir_all(&slipway_dir).map_err(|e| EjectError::CreateDir {
        path: slipway_dir.clone(),
        source: e,
    })?;

    let dockerfile_path = ejected_path(project_dir);
    if dockerfile_path.exists() {
        return Err(EjectError::AlreadyEjected(dockerfile_path));
    }

    std::fs::write(&dockerfile_path, dockerfile_content).map_err(|e| EjectError::Write {
        path: dockerfile_path.clone(),
        source: e,
    })?;

    Ok(dockerfile_path)
}

/// Check if the project has an ejected Dockerfile.
pub fn is_ejected(project_dir: &Path) -> bool {
    ejected_path(project_dir).exists()
}

/// Load ejected Dockerfile content.
pub fn load_ejected_dockerfile(project_dir: &Path) -> Result<String, EjectError> {
    let path = ejected_path(project_dir);
    std::fs::read_to_string(&path).map_err(|e| EjectError::Read { path, source: e })
}

/// Checks that an ejected Dockerfile still has the shape `slipway build`
/// depends on: all three named stages, and a release stage that ends as a
/// non-root user with an exec-form entry point.
///
/// This is structural only. Everything else is up to `slipway verify`.
pub fn check_ejected_dockerfile(path: &Path, content: &str) -> Result<(), EjectError> {
    let stages = parse_stages(content);

    for target in BuildTarget::ALL {
        if !stages.iter().any(|s| s.name.as_deref() == Some(target.as_str())) {
            return Err(EjectError::MissingStage {
                path: path.to_path_buf(),
                stage: target,
            });
        }
    }

    let release = stages
        .iter()
        .rev()
        .find(|s| s.name.as_deref() == Some(BuildTarget::Release.as_str()))
        .ok_or_else(|| EjectError::MissingStage {
            path: path.to_path_buf(),
            stage: BuildTarget::Release,
        })?;

    let user = release.last("USER").unwrap_or_default();
    let account = user.split(':').next().unwrap_or_default();
    if account.is_empty() || account == "0" || account == "root" {
        return Err(EjectError::RunsAsRoot {
            path: path.to_path_buf(),
        });
    }

    match release.last("ENTRYPOINT") {
        Some(entry) if entry.starts_with('[') => Ok(()),
        _ => Err(EjectError::ShellFormEntryPoint {
            path: path.to_path_buf(),
        }),
    }
}

struct Stage<'a> {
    name: Option<String>,
    instructions: Vec<(String, &'a str)>,
}

impl<'a> Stage<'a> {
    /// Arguments of the last `keyword` instruction in this stage.
    fn last(&self, keyword: &str) -> Option<&'a str> {
        self.instructions
            .iter()
            .rev()
            .find(|(k, _)| k == keyword)
            .map(|(_, args)| *args)
    }
}

/// Splits a Dockerfile into stages, skipping comments and continuation lines.
fn parse_stages(content: &str) -> Vec<Stage<'_>> {
    let mut stages: Vec<Stage<'_>> = Vec::new();
    let mut continued = false;

    for line in content.lines() {
        let trimmed = line.trim();
        let is_continuation = continued;
        continued = trimmed.ends_with('\\');
        if is_continuation || trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let (keyword, args) = trimmed
            .split_once(char::is_whitespace)
            .map_or((trimmed, ""), |(k, a)| (k, a.trim()));
        let keyword = keyword.to_ascii_uppercase();

        if keyword == "FROM" {
            let name = args
                .split_whitespace()
                .skip_while(|w| !w.eq_ignore_ascii_case("as"))
                .nth(1)
                .map(str::to_ascii_lowercase);
            stages.push(Stage {
                name,
                instructions: Vec::new(),
            });
        } else if let Some(stage) = stages.last_mut() {
            stage.instructions.push((keyword, args));
        }
    }

    stages
}

#[derive(Debug, thiserror::Error)]
pub enum EjectError {
    #[error("failed to create .slipway directory at {path}")]
    CreateDir {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("Dockerfile already ejected at {0}; edit it directly or delete it to re-eject")]
    AlreadyEjected(std::path::PathBuf),
    #[error("failed to write {path}")]
    Write {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("{path} has no `FROM ... AS {stage}` stage; slipway builds each stage with --target")]
    MissingStage {
        path: std::path::PathBuf,
        stage: BuildTarget,
    },
    #[error("release stage of {path} does not switch to a non-root USER")]
    RunsAsRoot { path: std::path::PathBuf },
    #[error("release stage of {path} needs an exec-form ENTRYPOINT [\"...\"]")]
    ShellFormEntryPoint { path: std::path::PathBuf },
    #[error("failed to read ejected Dockerfile at {path}")]
    Read {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
}
