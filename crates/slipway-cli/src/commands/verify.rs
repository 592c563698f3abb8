use slipway_docker::DockerClient;
use std::path::Path;

/// Inspect a built release image and report each hardening check.
pub async fn verify(tag: Option<String>) -> anyhow::Result<()> {
    let resolved = super::resolve(Path::new("."))?;
    let tag = tag.unwrap_or_else(|| resolved.image.tag.clone());

    println!("Verifying {tag}...");
    let client = DockerClient::new();
    let report = client.verify(&tag, &resolved.image).await?;

    println!();
    println!("{report}");

    if !report.all_passed() {
        anyhow::bail!("image {tag} failed verification");
    }

    Ok(())
}
