use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

fn slipway() -> assert_cmd::Command {
    cargo_bin_cmd!("slipway")
}

const PYPROJECT: &str = r#"[build-system]
requires = ["setuptools>=68"]
build-backend = "setuptools.build_meta"

[project]
name = "databaser"
version = "0.7.2"
dependencies = ["asyncpg==0.29.0", "psutil==5.9.8"]
"#;

/// Write a minimal src-layout Python project with a `databaser.manage` module.
fn python_project(dir: &Path) {
    std::fs::write(dir.join("pyproject.toml"), PYPROJECT).unwrap();
    std::fs::create_dir_all(dir.join("src/databaser")).unwrap();
    std::fs::write(dir.join("src/databaser/__init__.py"), "").unwrap();
    std::fs::write(dir.join("src/databaser/manage.py"), "print('hi')\n").unwrap();
}

fn git(dir: &Path, args: &[&str]) {
    let output = std::process::Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(output.status.success(), "git {args:?} failed: {output:?}");
}

// ── Help / Version ──

#[test]
fn shows_help() {
    slipway()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("hardened two-stage container images"));
}

#[test]
fn shows_version() {
    slipway()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("slipway"));
}

#[test]
fn build_help_lists_flags() {
    slipway()
        .args(["build", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--allow-dirty"))
        .stdout(predicate::str::contains("--no-cache"))
        .stdout(predicate::str::contains("--tag"));
}

// ── Init Command ──

#[test]
fn init_creates_config_and_ignores_bundle() {
    let tmp = TempDir::new().unwrap();
    python_project(tmp.path());

    slipway()
        .current_dir(tmp.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created slipway.toml"));

    let config = std::fs::read_to_string(tmp.path().join("slipway.toml")).unwrap();
    assert!(config.contains("[identity]"));
    let gitignore = std::fs::read_to_string(tmp.path().join(".gitignore")).unwrap();
    assert!(gitignore.lines().any(|l| l == ".slipway-bundle/"));
}

#[test]
fn init_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    python_project(tmp.path());
    std::fs::write(tmp.path().join(".gitignore"), ".venv/").unwrap();

    slipway().current_dir(tmp.path()).arg("init").assert().success();
    slipway()
        .current_dir(tmp.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("already initialized"));

    let gitignore = std::fs::read_to_string(tmp.path().join(".gitignore")).unwrap();
    assert_eq!(gitignore, ".venv/\n.slipway-bundle/\n");
}

#[test]
fn init_requires_pyproject() {
    let tmp = TempDir::new().unwrap();

    slipway()
        .current_dir(tmp.path())
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("pyproject.toml not found"));
}

// ── Render Command ──

#[test]
fn render_prints_three_stage_dockerfile() {
    let tmp = TempDir::new().unwrap();
    python_project(tmp.path());

    slipway()
        .current_dir(tmp.path())
        .arg("render")
        .assert()
        .success()
        .stdout(predicate::str::contains("AS builder"))
        .stdout(predicate::str::contains(
            "--mount=type=bind,from=builder,source=/build/dist,target=/tmp/dist",
        ))
        .stdout(predicate::str::contains("USER 10001:10001"))
        .stdout(predicate::str::contains(
            r#"ENTRYPOINT ["python", "-m", "databaser.manage"]"#,
        ));
}

#[test]
fn render_honors_slipway_toml() {
    let tmp = TempDir::new().unwrap();
    python_project(tmp.path());
    std::fs::write(
        tmp.path().join("slipway.toml"),
        "[identity]\nname = \"svc\"\nuid = 2000\ngid = 2000\n\n[runtime]\nsystem_packages = [\"libpq5\", \"tini\"]\n",
    )
    .unwrap();

    slipway()
        .current_dir(tmp.path())
        .arg("render")
        .assert()
        .success()
        .stdout(predicate::str::contains("USER 2000:2000"))
        .stdout(predicate::str::contains("--no-install-recommends libpq5 tini"));
}

#[test]
fn render_rejects_root_identity() {
    let tmp = TempDir::new().unwrap();
    python_project(tmp.path());
    std::fs::write(
        tmp.path().join("slipway.toml"),
        "[identity]\nname = \"root\"\nuid = 0\ngid = 0\n",
    )
    .unwrap();

    slipway()
        .current_dir(tmp.path())
        .arg("render")
        .assert()
        .failure()
        .stderr(predicate::str::contains("non-root"));
}

#[test]
fn render_fails_without_build_system() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(
        tmp.path().join("pyproject.toml"),
        "[project]\nname = \"databaser\"\n",
    )
    .unwrap();

    slipway()
        .current_dir(tmp.path())
        .arg("render")
        .assert()
        .failure()
        .stderr(predicate::str::contains("[build-system]"));
}

// ── Eject Command ──

#[test]
fn eject_creates_dockerfile_in_slipway_dir() {
    let tmp = TempDir::new().unwrap();
    python_project(tmp.path());

    slipway()
        .current_dir(tmp.path())
        .arg("eject")
        .assert()
        .success()
        .stdout(predicate::str::contains("Ejected"));

    let dockerfile = std::fs::read_to_string(tmp.path().join(".slipway/Dockerfile")).unwrap();
    assert!(dockerfile.contains("FROM runtime AS release"));
    assert!(dockerfile.contains("databaser.manage"));
}

#[test]
fn eject_fails_on_second_run() {
    let tmp = TempDir::new().unwrap();
    python_project(tmp.path());

    slipway().current_dir(tmp.path()).arg("eject").assert().success();

    slipway()
        .current_dir(tmp.path())
        .arg("eject")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already ejected"));
}

// ── Build Command (stops before docker) ──

#[test]
fn build_fails_without_pyproject() {
    let tmp = TempDir::new().unwrap();

    slipway()
        .current_dir(tmp.path())
        .args(["build", "--allow-dirty"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no pyproject.toml"));
}

#[test]
fn build_fails_on_non_git_directory() {
    let tmp = TempDir::new().unwrap();
    python_project(tmp.path());

    slipway()
        .current_dir(tmp.path())
        .arg("build")
        .assert()
        .failure()
        .stderr(predicate::str::contains("git"));
}

#[test]
fn build_dirty_repo_blocked_without_flag() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();
    python_project(dir);

    git(dir, &["init"]);
    git(dir, &["config", "user.email", "t@t.com"]);
    git(dir, &["config", "user.name", "T"]);
    git(dir, &["add", "."]);
    git(dir, &["commit", "-m", "init"]);

    std::fs::write(dir.join("src/databaser/manage.py"), "print('dirty')\n").unwrap();

    slipway()
        .current_dir(dir)
        .arg("build")
        .assert()
        .failure()
        .stderr(predicate::str::contains("uncommitted changes"));
}

#[test]
fn build_fails_when_entry_module_missing() {
    let tmp = TempDir::new().unwrap();
    python_project(tmp.path());
    std::fs::remove_file(tmp.path().join("src/databaser/manage.py")).unwrap();

    slipway()
        .current_dir(tmp.path())
        .args(["build", "--allow-dirty"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("entry module 'databaser.manage' not found"));
}

#[test]
fn build_enforces_pins_when_required() {
    let tmp = TempDir::new().unwrap();
    python_project(tmp.path());
    std::fs::write(
        tmp.path().join("pyproject.toml"),
        PYPROJECT.replace("psutil==5.9.8", "psutil>=5"),
    )
    .unwrap();
    std::fs::write(
        tmp.path().join("slipway.toml"),
        "[builder]\nrequire_pinned = true\n",
    )
    .unwrap();

    slipway()
        .current_dir(tmp.path())
        .args(["build", "--allow-dirty"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("psutil>=5"));
}

#[test]
fn build_rejects_ejected_dockerfile_missing_a_stage() {
    let tmp = TempDir::new().unwrap();
    python_project(tmp.path());

    slipway().current_dir(tmp.path()).arg("eject").assert().success();
    let path = tmp.path().join(".slipway/Dockerfile");
    let edited = std::fs::read_to_string(&path)
        .unwrap()
        .replace(" AS runtime", "");
    std::fs::write(&path, edited).unwrap();

    slipway()
        .current_dir(tmp.path())
        .args(["build", "--allow-dirty"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("AS runtime"));
}

#[test]
fn build_rejects_ejected_dockerfile_running_as_root() {
    let tmp = TempDir::new().unwrap();
    python_project(tmp.path());

    slipway().current_dir(tmp.path()).arg("eject").assert().success();
    let path = tmp.path().join(".slipway/Dockerfile");
    let edited = std::fs::read_to_string(&path)
        .unwrap()
        .replace("USER 10001:10001", "USER root");
    std::fs::write(&path, edited).unwrap();

    slipway()
        .current_dir(tmp.path())
        .args(["build", "--allow-dirty"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("non-root USER"));
}
