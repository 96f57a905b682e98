#![allow(missing_docs)]

//! `oskernel` — inspect and validate ObjectStack package manifests.
//!
//! One-shot subcommands over manifest files: platform-compatibility
//! validation, namespace extraction, and install-order resolution for a
//! directory of packages.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use semver::Version;

use objectstack_kernel::config::KernelConfig;
use objectstack_kernel::logging;
use objectstack_kernel::package::{NamespaceResolver, PackageManifest};
use objectstack_kernel::resolver::{resolve_order, GraphNode};

#[derive(Parser)]
#[command(name = "oskernel", version, about = "ObjectStack kernel tooling")]
struct Cli {
    /// Path to kernel.toml (defaults to ./kernel.toml, then built-ins).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a manifest against the host platform and print what it
    /// declares.
    Validate {
        /// Manifest file (JSON).
        manifest: PathBuf,
        /// Override the host platform version from the config.
        #[arg(long)]
        platform: Option<String>,
    },
    /// Print the namespaces a manifest would claim.
    Namespaces {
        /// Manifest file (JSON).
        manifest: PathBuf,
    },
    /// Resolve an install order for every `*.json` manifest in a
    /// directory. Dependencies must resolve within the directory.
    Order {
        /// Directory of manifest files.
        dir: PathBuf,
    },
}

fn main() -> Result<()> {
    logging::init_cli();
    let cli = Cli::parse();
    let config = KernelConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Validate { manifest, platform } => {
            let host = match platform {
                Some(raw) => Version::parse(&raw)
                    .with_context(|| format!("invalid --platform '{raw}'"))?,
                None => config.platform_version()?,
            };
            validate(&manifest, &host)
        }
        Command::Namespaces { manifest } => namespaces(&manifest),
        Command::Order { dir } => order(&dir),
    }
}

fn validate(path: &Path, host: &Version) -> Result<()> {
    let manifest = PackageManifest::from_path(path)?;

    if let Err(mismatch) = manifest.check_platform(host) {
        bail!("{}: {mismatch}", path.display());
    }

    println!("manifest: {}", path.display());
    if let Some(name) = &manifest.name {
        println!("name: {name}");
    }
    if let Some(version) = &manifest.version {
        println!("version: {version}");
    }
    println!("platform: compatible with {host}");

    let mut dependencies: Vec<&String> = manifest.dependencies.keys().collect();
    dependencies.sort();
    println!("dependencies: {}", dependencies.len());
    for dep in dependencies {
        println!("  {dep} {}", manifest.dependencies[dep]);
    }

    let claimed = NamespaceResolver::extract_namespaces(&manifest);
    println!("namespaces: {}", claimed.len());
    for namespace in claimed {
        println!("  {namespace}");
    }
    Ok(())
}

fn namespaces(path: &Path) -> Result<()> {
    let manifest = PackageManifest::from_path(path)?;
    for namespace in NamespaceResolver::extract_namespaces(&manifest) {
        println!("{namespace}");
    }
    Ok(())
}

fn order(dir: &Path) -> Result<()> {
    let mut nodes = Vec::new();
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("json"))
        .collect();
    entries.sort();

    for path in &entries {
        let manifest = PackageManifest::from_path(path)?;
        let name = manifest.name.clone().unwrap_or_else(|| {
            path.file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("unnamed")
                .to_owned()
        });
        let mut deps: Vec<String> = manifest.dependencies.keys().cloned().collect();
        deps.sort();
        nodes.push(GraphNode::new(name, deps));
    }

    if nodes.is_empty() {
        bail!("no manifest files in {}", dir.display());
    }

    let order = resolve_order(&nodes)?;
    for (index, name) in order.iter().enumerate() {
        println!("{}. {name}", index + 1);
    }
    Ok(())
}
