mod commands;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "slipway",
    about = "Build hardened two-stage container images for Python applications"
)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add slipway.toml to an existing Python project
    Init,
    /// Print the generated Dockerfile
    Render,
    /// Eject Dockerfile for manual customization
    Eject,
    /// Build the builder, runtime, and release stages
    Build(BuildArgs),
    /// Check a built image for the hardening guarantees
    Verify {
        /// Image to inspect (default: [image].tag or <name>:<version>)
        #[arg(long)]
        tag: Option<String>,
    },
    /// Check the local Docker toolchain and project layout
    Doctor,
}

#[derive(Args)]
struct BuildArgs {
    /// Allow building with uncommitted changes
    #[arg(long)]
    allow_dirty: bool,
    /// Rebuild every stage without the layer cache
    #[arg(long)]
    no_cache: bool,
    /// Always pull newer base images
    #[arg(long)]
    pull: bool,
    /// Tag for the release image (default: [image].tag or <name>:<version>)
    #[arg(long)]
    tag: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => commands::init_project().await?,
        Commands::Render => commands::render().await?,
        Commands::Eject => commands::eject().await?,
        Commands::Build(args) => {
            commands::build(commands::BuildRequest {
                allow_dirty: args.allow_dirty,
                no_cache: args.no_cache,
                pull: args.pull,
                tag: args.tag,
            })
            .await?
        }
        Commands::Verify { tag } => commands::verify(tag).await?,
        Commands::Doctor => commands::doctor().await?,
    }

    Ok(())
}
