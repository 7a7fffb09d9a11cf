use anyhow::Context;
use clap::{ArgAction, Parser};
use dockerfile2llbjson::{
    BuildArgs, CompileOptions, ImageMetaResolver, OfflineResolver, Platform, RegistryResolver,
    compile, parse_build_arg, to_json, write_artifact,
};
use std::io::Read;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

pub type Result<T> = anyhow::Result<T>;

/// Reads a Dockerfile on stdin and writes its build graph as JSON.
#[derive(Parser)]
#[command(name = "dockerfile2llbjson")]
#[command(about = "Compile a Dockerfile (stdin) into a JSON list of build operations", long_about = None)]
struct Cli {
    /// Output file (default: stdout)
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Indent the JSON output
    #[arg(short = 'p', long)]
    pretty: bool,

    /// More logging on stderr (-v debug, -vv trace)
    #[arg(short = 'v', long, action = ArgAction::Count)]
    verbose: u8,

    /// Build argument override, key=value (repeatable; later values win)
    #[arg(short = 'b', long = "build-arg", value_name = "KEY=VALUE", value_parser = parse_build_arg_flag)]
    build_args: Vec<(String, String)>,

    /// Resolve base images without network access
    #[arg(long)]
    offline: bool,

    /// Stage to build (default: last stage)
    #[arg(long)]
    target: Option<String>,

    /// Target platform, os/arch[/variant]
    #[arg(long, default_value = "linux/amd64", value_parser = parse_platform_flag)]
    platform: Platform,
}

fn parse_build_arg_flag(raw: &str) -> std::result::Result<(String, String), String> {
    parse_build_arg(raw).map_err(|e| e.to_string())
}

fn parse_platform_flag(raw: &str) -> std::result::Result<Platform, String> {
    Platform::parse(raw).map_err(|e| e.to_string())
}

fn init_logging(verbose: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match verbose {
            0 => "warn",
            1 => "debug",
            _ => "trace",
        })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // 1) Build arguments, in command-line order.
    let build_args: BuildArgs = cli.build_args.into_iter().collect();

    // 2) Read the whole Dockerfile from stdin.
    let mut instructions = Vec::new();
    std::io::stdin()
        .read_to_end(&mut instructions)
        .context("failed to read Dockerfile from stdin")?;

    // 3) Compile.
    let resolver: Box<dyn ImageMetaResolver> = if cli.offline {
        Box::new(OfflineResolver::new())
    } else {
        Box::new(RegistryResolver::from_env())
    };
    let opts = CompileOptions {
        target: cli.target,
        platform: cli.platform,
    };
    let nodes = compile(
        &instructions,
        &build_args.to_overrides(),
        resolver.as_ref(),
        &opts,
    )
    .context("failed to compile Dockerfile")?;

    // 4) Serialize and write.
    let bytes = to_json(&nodes, cli.pretty).context("failed to serialize build graph")?;
    write_artifact(cli.output.as_deref(), &bytes).with_context(|| match &cli.output {
        Some(path) => format!("failed to write {}", path.display()),
        None => "failed to write to stdout".to_string(),
    })?;

    Ok(())
}
