use clap::{Parser, ValueEnum};
use harmony::{
    Backend, BuildDriver, BuildOptions, BuildSummary, ClangClBackend, Manifest, MsvcBackend,
};
use std::{path::PathBuf, process::ExitCode};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Build driver for C++20 module projects.
#[derive(Debug, Parser)]
#[command(name = "harmony", version)]
struct Cli {
    /// Path to the target manifest
    #[arg(default_value = "harmony.json")]
    manifest: PathBuf,

    /// Toolchain backend to drive
    #[arg(long, value_enum, default_value = "msvc")]
    backend: BackendKind,

    /// Directory derived artifacts are written to
    #[arg(long, default_value = harmony::compile::BUILD_DIR)]
    build_dir: PathBuf,

    /// Recompile everything, ignoring up-to-date artifacts
    #[arg(long)]
    no_cache: bool,

    /// Cross-check the in-house scanner against the toolchain's dependency scan
    #[arg(long)]
    verify_scan: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BackendKind {
    Msvc,
    ClangCl,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> harmony::Result<BuildSummary> {
    let manifest = Manifest::read(&cli.manifest)?;
    let root = match cli.manifest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let backend: Box<dyn Backend> = match cli.backend {
        BackendKind::Msvc => Box::new(MsvcBackend::new(&cli.build_dir)),
        BackendKind::ClangCl => Box::new(ClangClBackend::new(&cli.build_dir)),
    };
    let options = BuildOptions {
        build_dir: cli.build_dir,
        no_cache: cli.no_cache,
        verify_scan: cli.verify_scan,
    };

    BuildDriver::new(&manifest, &root, backend.as_ref(), options).build()
}
