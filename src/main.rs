use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use ocipress::logging::init_logging;
use ocipress::resolve::FilenameOptions;
use ocipress::resource::{
    dry_resolve, BuildResourceConfig, BuildResourceState, Provider, ProviderConfig, ResolveResourceConfig,
};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ocipress", version)]
#[command(about = "Build Go import paths into OCI images and resolve ko:// references in manifests")]
struct Cli {
    /// Default repository to publish to
    #[arg(long, global = true)]
    repo: Option<String>,

    /// Registry credentials as username:password
    #[arg(long, global = true, env = "OCIPRESS_BASIC_AUTH", hide_env_values = true)]
    basic_auth: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true, env = "OCIPRESS_LOG_JSON")]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Default)]
struct BuildFlags {
    /// Platforms to build, comma separated, or "all"
    #[arg(long, value_delimiter = ',')]
    platform: Vec<String>,

    /// Base image to build on
    #[arg(long)]
    base_image: Option<String>,

    /// SBOM flavour: spdx, cyclonedx, go.version-m or none
    #[arg(long)]
    sbom: Option<String>,

    #[arg(long, short = 'C')]
    working_dir: Option<PathBuf>,

    /// Tags to apply, comma separated
    #[arg(long, short = 't', value_delimiter = ',')]
    tags: Vec<String>,

    /// Publish to exactly this repository
    #[arg(long)]
    image_repo: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build and publish one import path
    Build {
        importpath: String,

        #[command(flatten)]
        flags: BuildFlags,

        #[arg(long)]
        ldflags: Vec<String>,

        /// Extra environment for the compiler, KEY=VALUE
        #[arg(long)]
        env: Vec<String>,

        /// Go toolchain to use
        #[arg(long, env = "KO_GO_PATH")]
        go_binary: Option<PathBuf>,

        /// Build without -trimpath
        #[arg(long)]
        no_trimpath: bool,

        /// Report name:tag@digest when exactly one tag is given
        #[arg(long)]
        tag_reference: bool,

        /// Only report the reference a publish would produce
        #[arg(long)]
        read: bool,
    },
    /// Build every ko:// reference in the manifests and rewrite them
    Resolve {
        #[arg(short = 'f', long = "filename", required = true)]
        filenames: Vec<String>,

        #[arg(short = 'R', long)]
        recursive: bool,

        #[arg(short = 'l', long)]
        selector: Option<String>,

        /// Push images; with false only the references are computed
        #[arg(long, action = ArgAction::Set, default_value_t = true)]
        push: bool,

        #[command(flatten)]
        flags: BuildFlags,
    },
    /// Rewrite ko:// references to bare import paths without building
    DryResolve {
        #[arg(short = 'f', long = "filename", required = true)]
        filenames: Vec<String>,

        #[arg(short = 'R', long)]
        recursive: bool,

        #[arg(short = 'l', long, default_value = "")]
        selector: String,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let provider_config = ProviderConfig {
        repo: cli.repo,
        docker_repo: None,
        basic_auth: cli.basic_auth,
    };

    match cli.command {
        Commands::Build {
            importpath,
            flags,
            ldflags,
            env,
            go_binary,
            no_trimpath,
            tag_reference,
            read,
        } => {
            let provider = Provider::configure(&provider_config).context("configuring provider")?;
            let config = BuildResourceConfig {
                importpath,
                working_dir: flags.working_dir,
                platforms: flags.platform,
                base_image: flags.base_image,
                sbom: flags.sbom,
                repo: flags.image_repo,
                tags: flags.tags,
                ldflags,
                env,
                go_binary_path: go_binary,
                trimpath: no_trimpath.then_some(false),
                tag_reference,
            };
            if read {
                let outcome = provider.read_build(&config, &BuildResourceState::default()).await?;
                for diagnostic in &outcome.diagnostics {
                    tracing::warn!(summary = %diagnostic.summary, detail = %diagnostic.detail, "Diagnostic");
                }
                print_json(&outcome.state)
            } else {
                print_json(&provider.create_build(&config).await?)
            }
        }
        Commands::Resolve {
            filenames,
            recursive,
            selector,
            push,
            flags,
        } => {
            let provider = Provider::configure(&provider_config).context("configuring provider")?;
            let config = ResolveResourceConfig {
                filenames,
                recursive,
                selector,
                platforms: flags.platform,
                sbom: flags.sbom,
                base_image: flags.base_image,
                working_dir: flags.working_dir,
                repo: flags.image_repo,
                tags: flags.tags,
                push: Some(push),
            };
            print_json(&provider.create_resolve(&config).await?)
        }
        Commands::DryResolve {
            filenames,
            recursive,
            selector,
        } => {
            let files = FilenameOptions { filenames, recursive };
            print_json(&dry_resolve(&files, &selector).await?)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Err(e) = init_logging(cli.json_logs) {
        eprintln!("failed to initialise logging: {}", e);
    }

    tokio::select! {
        result = run(cli) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, abandoning in-flight work");
            anyhow::bail!("interrupted")
        }
    }
}
