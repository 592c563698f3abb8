use std::path::Path;

/// Print the Dockerfile `slipway build` would generate.
pub async fn render() -> anyhow::Result<()> {
    let resolved = super::resolve(Path::new("."))?;
    print!("{}", super::render_dockerfile(&resolved.image));
    Ok(())
}
