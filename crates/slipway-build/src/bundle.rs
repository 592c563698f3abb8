use std::path::{Path, PathBuf};
use std::process::Command;

/// Directory (relative to the project) that receives the source snapshot.
pub const BUNDLE_DIR: &str = ".slipway-bundle";

/// Files/directories that slipway always excludes from bundles,
/// regardless of .gitignore content.
const SLIPWAY_EXCLUDES: &[&str] = &[BUNDLE_DIR, ".slipway", ".git"];

/// Build context patterns that never belong in the builder stage.
const DOCKERIGNORE: &str = "\
.git
.venv
**/__pycache__
**/*.py[cod]
*.egg-info
dist/
";

/// Bundles project files as the immutable source snapshot for the builder stage.
///
/// Uses `git ls-files` to respect `.gitignore`, then copies all tracked
/// and untracked-but-not-ignored files into `.slipway-bundle/`.
/// The generated Dockerfile and a `.dockerignore` are written into the bundle.
pub fn create_bundle(project_dir: &Path, dockerfile_content: &str) -> Result<PathBuf, BundleError> {
    let bundle_dir = project_dir.join(BUNDLE_DIR);

    // Clean previous bundle
    if bundle_dir.exists() {
        std::fs::remove_dir_all(&bundle_dir).map_err(|e| BundleError::Cleanup {
            path: bundle_dir.clone(),
            source: e,
        })?;
    }
    std::fs::create_dir_all(&bundle_dir).map_err(|e| BundleError::Create {
        path: bundle_dir.clone(),
        source: e,
    })?;

    let files = git_ls_files(project_dir)?;
    let mut copied = 0usize;

    for relative_path in &files {
        if SLIPWAY_EXCLUDES
            .iter()
            .any(|ex| relative_path.starts_with(ex))
        {
            continue;
        }

        let src = project_dir.join(relative_path);
        // Deleted-but-tracked files are still listed by git
        if !src.is_file() {
            tracing::debug!(path = %relative_path.display(), "skipping missing file");
            continue;
        }
        let dst = bundle_dir.join(relative_path);

        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BundleError::Create {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::copy(&src, &dst).map_err(|e| BundleError::CopyFile {
            path: src,
            source: e,
        })?;
        copied += 1;
    }

    write_file(&bundle_dir.join("Dockerfile"), dockerfile_content)?;
    write_file(&bundle_dir.join(".dockerignore"), DOCKERIGNORE)?;

    tracing::info!(
        files = copied,
        path = %bundle_dir.display(),
        "source snapshot bundled"
    );

    Ok(bundle_dir)
}

fn write_file(path: &Path, content: &str) -> Result<(), BundleError> {
    std::fs::write(path, content).map_err(|e| BundleError::Write {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Returns the list of files git considers part of the project:
/// tracked files + untracked files that are not .gitignored.
fn git_ls_files(project_dir: &Path) -> Result<Vec<PathBuf>, BundleError> {
    let output = Command::new("git")
        .args(["ls-files", "--cached", "--others", "--exclude-standard"])
        .current_dir(project_dir)
        .output()
        .map_err(|e| BundleError::GitCommand {
            detail: "failed to execute git ls-files".to_owned(),
            source: e,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(BundleError::GitFailed {
            detail: format!(
                "git ls-files exited with {}: {}",
                output.status,
                stderr.trim()
            ),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let files: Vec<PathBuf> = stdout
        .lines()
        .filter(|line| !line.is_empty())
        .map(PathBuf::from)
        .collect();

    Ok(files)
}

/// Checks whether the git working tree has uncommitted changes.
///
/// The bundle directory itself is not counted.
pub fn is_dirty(project_dir: &Path) -> Result<bool, BundleError> {
    let exclude_bundle = format!(":(exclude){BUNDLE_DIR}");
    let output = Command::new("git")
        .args(["status", "--porcelain", "--", ".", exclude_bundle.as_str()])
        .current_dir(project_dir)
        .output()
        .map_err(|e| BundleError::GitCommand {
            detail: "failed to execute git status".to_owned(),
            source: e,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(BundleError::GitFailed {
            detail: format!(
                "git status exited with {}: {}",
                output.status,
                stderr.trim()
            ),
        });
    }

    Ok(!output.stdout.is_empty())
}

#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error("failed to clean up bundle directory {path}")]
    Cleanup {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("failed to create directory {path}")]
    Create {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("failed to copy file {path}")]
    CopyFile {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write {path}")]
    Write {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("git command failed: {detail}")]
    GitCommand {
        detail: String,
        source: std::io::Error,
    },
    #[error("git failed: {detail}")]
    GitFailed { detail: String },
}
