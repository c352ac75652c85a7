//! Inspect command - validate a local package stream and show what it installs

use console::style;
use semver::Version;
use std::path::Path;
use xpkg_core::PackageContents;

use crate::error::{CliError, Result};

/// Parse and validate the stream at `path`
pub fn load(path: &Path, platform: Option<&str>) -> Result<PackageContents> {
    let text = std::fs::read_to_string(path).map_err(|e| CliError::Io {
        message: format!("{}: {}", path.display(), e),
    })?;
    let contents = PackageContents::parse(&text)?;

    if let Some(platform) = platform {
        let platform = Version::parse(platform.trim_start_matches('v'))
            .map_err(|e| CliError::config(format!("invalid platform version: {}", e)))?;
        contents.check_platform(&platform)?;
    }
    Ok(contents)
}

pub fn run(path: &Path, platform: Option<&str>) -> Result<()> {
    let contents = load(path, platform)?;
    let meta = &contents.meta;

    println!("{} {}", style(meta.kind).cyan().bold(), meta.name);
    println!();

    if let Some(version) = &meta.platform_version {
        println!("  {}: {}", style("Platform").dim(), version);
    }
    if let Some(family) = meta.family() {
        println!("  {}: {}", style("Family").dim(), family);
    }
    if let Some(controller) = &meta.controller {
        println!(
            "  {}: {}",
            style("Controller").dim(),
            controller.image.as_deref().unwrap_or("<package image>")
        );
        if controller.webhooks {
            println!("  {}: yes", style("Webhooks").dim());
        }
        if !controller.permission_requests.is_empty() {
            println!(
                "  {}: {} rule(s)",
                style("Permission requests").dim(),
                controller.permission_requests.len()
            );
        }
    }
    println!();

    println!("{}:", style("Dependencies").bold());
    if contents.dependencies.is_empty() {
        println!("  {}", style("none").dim());
    }
    for dep in &contents.dependencies {
        println!("  {:<14} {:<48} {}", dep.kind, dep.source, dep.constraint);
    }
    println!();

    println!("{}:", style("Objects").bold());
    for object in &contents.objects {
        println!("  {:<30} {}", object.kind, object.name);
    }

    println!();
    println!(
        "{} {} object(s), {} dependency(ies)",
        style("✓").green().bold(),
        contents.objects.len(),
        contents.dependencies.len()
    );
    Ok(())
}
