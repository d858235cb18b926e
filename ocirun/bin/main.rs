use clap::Parser;
use ocirun::{
    cli::{OcirunArgs, OcirunSubcommand},
    config::{PortPair, DEFAULT_ARCHITECTURE, DEFAULT_ARTIFACTS_DIR, DEFAULT_OS},
    oci::{self, Platform, Reference, RegistryClient},
    runtime::{self, RunRequest},
    OcirunResult,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = run().await {
        eprintln!("error: {e:?}");
        std::process::exit(1);
    }
}

async fn run() -> OcirunResult<()> {
    let args = OcirunArgs::parse();

    match args.subcommand {
        OcirunSubcommand::Pull {
            reference,
            architecture,
            os_type,
        } => pull(&reference, architecture, os_type).await,
        OcirunSubcommand::List => list(),
        OcirunSubcommand::Run {
            reference,
            ports,
            name,
            command,
        } => run_container(&reference, ports, name, command).await,
    }
}

async fn pull(
    reference: &str,
    architecture: Option<String>,
    os_type: Option<String>,
) -> OcirunResult<()> {
    let reference: Reference = reference.parse()?;
    let platform = Platform {
        os: os_type.unwrap_or_else(|| DEFAULT_OS.to_string()),
        architecture: architecture.unwrap_or_else(|| DEFAULT_ARCHITECTURE.to_string()),
    };

    let client = RegistryClient::new(DEFAULT_ARTIFACTS_DIR.clone());
    let image_dir = client.pull(&reference, &platform).await?;

    println!("pulled {reference} into {}", image_dir.display());
    Ok(())
}

fn list() -> OcirunResult<()> {
    let images = oci::list(&DEFAULT_ARTIFACTS_DIR)?;
    for image in images {
        let size_mb = image.size_bytes as f64 / 1_048_576.0;
        println!("{}:{} ({size_mb:.1} MB)", image.repository, image.tag);
        println!("  Path: {}", image.path.display());
    }
    Ok(())
}

async fn run_container(
    reference: &str,
    ports: Vec<PortPair>,
    name: Option<String>,
    command: Vec<String>,
) -> OcirunResult<()> {
    let reference: Reference = reference.parse()?;
    let request = RunRequest {
        command,
        ports,
        name,
    };

    let exit_code = runtime::run(&DEFAULT_ARTIFACTS_DIR, &reference, request).await?;
    std::process::exit(exit_code);
}
