use slipway_build::{bundle, eject as eject_mod};
use slipway_docker::{BuildOptions, DockerClient};
use std::path::PathBuf;

pub struct BuildRequest {
    pub allow_dirty: bool,
    pub no_cache: bool,
    pub pull: bool,
    pub tag: Option<String>,
}

/// Execute the full build pipeline.
pub async fn build(request: BuildRequest) -> anyhow::Result<()> {
    let project_dir = PathBuf::from(".");

    // Dirty check: refuse to build uncommitted changes unless --allow-dirty
    if !request.allow_dirty && bundle::is_dirty(&project_dir)? {
        anyhow::bail!(
            "uncommitted changes detected.\n\
             Commit your changes, or use `slipway build --allow-dirty` to build anyway."
        );
    }

    // Load configuration and derive the image definition
    let super::Resolved {
        config,
        project,
        image,
    } = super::resolve(&project_dir)?;

    project.ensure_module(image.entry_point.module())?;

    if config.builder.require_pinned {
        project.ensure_pinned()?;
    } else {
        let unpinned = project.unpinned_dependencies();
        if !unpinned.is_empty() {
            tracing::warn!(
                ?unpinned,
                "dependencies without an exact pin; the image may not be reproducible"
            );
        }
    }

    // Determine Dockerfile content
    let dockerfile_content = if eject_mod::is_ejected(&project_dir) {
        println!("Using ejected Dockerfile from .slipway/Dockerfile");
        let content = eject_mod::load_ejected_dockerfile(&project_dir)?;
        eject_mod::check_ejected_dockerfile(&eject_mod::ejected_path(&project_dir), &content)?;
        tracing::warn!(
            "building from a hand-edited Dockerfile; run `slipway verify` to check the hardening guarantees"
        );
        content
    } else {
        super::render_dockerfile(&image)
    };

    // Bundle source
    println!("Bundling source...");
    let bundle_dir = bundle::create_bundle(&project_dir, &dockerfile_content)?;

    // Staged docker builds
    let tag = request.tag.unwrap_or_else(|| image.tag.clone());
    println!("Building {tag} (builder → runtime → release)...");
    let client = DockerClient::new();
    let outcome = client
        .run_pipeline(
            &bundle_dir,
            &tag,
            BuildOptions {
                no_cache: request.no_cache,
                pull: request.pull,
                capture: false,
            },
        )
        .await?;

    println!();
    println!("Built: {}", outcome.tag);
    println!(
        "Runs as {} ({}) with entry point: {}",
        image.identity.name(),
        image.identity.user_spec(),
        image.entry_point.argv().join(" ")
    );

    Ok(())
}
