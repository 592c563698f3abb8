use slipway_core::{PythonProject, SlipwayConfig};
use slipway_docker::{CheckResult, DockerClient};
use std::path::Path;

pub async fn doctor() -> anyhow::Result<()> {
    let project_dir = Path::new(".");
    let client = DockerClient::new();
    let mut report = client.doctor().await;

    report.config_file = if project_dir.join("slipway.toml").exists() {
        match SlipwayConfig::load(project_dir).and_then(|c| c.validate()) {
            Ok(()) => CheckResult::ok("Found"),
            Err(e) => CheckResult::fail(&e.to_string()),
        }
    } else {
        CheckResult::ok("Not found, using defaults")
    };

    report.project = match PythonProject::discover(project_dir) {
        Ok(project) => CheckResult::ok(&format!("{} {}", project.name, project.version)),
        Err(e) => CheckResult::fail(&e.to_string()),
    };

    println!();
    println!("{report}");

    if !report.all_passed() {
        anyhow::bail!("some checks failed; see above for details");
    }

    Ok(())
}
