use std::path::PathBuf;

pub async fn eject() -> anyhow::Result<()> {
    let project_dir = PathBuf::from(".");
    let resolved = super::resolve(&project_dir)?;
    let dockerfile = super::render_dockerfile(&resolved.image);

    slipway_build::eject::eject(&project_dir, &dockerfile)?;

    println!("Ejected build config to .slipway/Dockerfile");
    println!("You can now edit it directly. slipway build will use this file.");
    Ok(())
}
