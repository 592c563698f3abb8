mod build;
mod doctor;
mod eject;
mod init;
mod render;
mod verify;

use slipway_build::ImageDefinition;
use slipway_build::dockerfile::DockerfileGenerator;
use slipway_core::{PythonProject, SlipwayConfig};
use std::path::Path;

pub use build::{BuildRequest, build};
pub use doctor::doctor;
pub use eject::eject;
pub use init::init_project;
pub use render::render;
pub use verify::verify;

/// Configuration, project, and the image definition derived from both.
pub(crate) struct Resolved {
    pub config: SlipwayConfig,
    pub project: PythonProject,
    pub image: ImageDefinition,
}

/// Load `slipway.toml`, discover the Python project, and run the pipeline.
pub(crate) fn resolve(project_dir: &Path) -> anyhow::Result<Resolved> {
    let config = SlipwayConfig::load(project_dir)?;
    let project = PythonProject::discover(project_dir)?;
    let image = ImageDefinition::from_config(&project, &config)?;
    Ok(Resolved {
        config,
        project,
        image,
    })
}

pub(crate) fn render_dockerfile(image: &ImageDefinition) -> String {
    DockerfileGenerator::new(image).render()
}
