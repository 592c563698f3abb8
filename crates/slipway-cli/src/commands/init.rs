use slipway_build::bundle::BUNDLE_DIR;
use std::io::Write;
use std::path::Path;

const SLIPWAY_TOML: &str = r#"[project]
# name = "databaser"
# entry_module = "databaser.manage"
# app_root = "/app"
# log_dir = "/app/logs"

[builder]
# image = "python:3.12-slim"
# build_tool_version = "1.2.2"
# require_pinned = false

[runtime]
# image = "python:3.12-slim"
# system_packages = ["libpq5"]

[identity]
# name = "databaser"
# uid = 10001
# gid = 10001

[image]
# tag = "databaser:latest"
"#;

/// Initialize Slipway in an existing Python project.
pub async fn init_project() -> anyhow::Result<()> {
    // Must be inside a Python project
    if !Path::new("pyproject.toml").exists() {
        anyhow::bail!("pyproject.toml not found. Run this command from a Python project root.");
    }

    let mut created = Vec::new();

    let slipway_toml_path = Path::new("slipway.toml");
    if slipway_toml_path.exists() {
        eprintln!("slipway.toml already exists, skipping");
    } else {
        std::fs::write(slipway_toml_path, SLIPWAY_TOML)?;
        created.push("slipway.toml");
    }

    if ignore_bundle(Path::new(".gitignore"))? {
        created.push(".gitignore entry");
    }

    if created.is_empty() {
        println!("Nothing to create: already initialized.");
    } else {
        for f in &created {
            println!("Created {f}");
        }
    }

    println!();
    println!("Next steps:");
    println!();
    println!("  1. Review slipway.toml (identity, system packages, entry module)");
    println!("  2. Check your toolchain:  slipway doctor");
    println!("  3. Build the image:       slipway build");
    println!("  4. Verify the result:     slipway verify");

    Ok(())
}

/// Append the bundle directory to `.gitignore` unless already listed.
/// Returns whether the file changed.
fn ignore_bundle(gitignore: &Path) -> anyhow::Result<bool> {
    let entry = format!("{BUNDLE_DIR}/");
    let existing = match std::fs::read_to_string(gitignore) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };
    if existing
        .lines()
        .any(|l| l.trim() == entry || l.trim() == BUNDLE_DIR)
    {
        return Ok(false);
    }

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(gitignore)?;
    if !existing.is_empty() && !existing.ends_with('\n') {
        writeln!(file)?;
    }
    writeln!(file, "{entry}")?;
    Ok(true)
}
