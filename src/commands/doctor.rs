use anyhow::Result;
use std::path::Path;
use std::process::Command;

use crate::config;
use crate::config::model::ServiceDescriptor;

/// Check that what the config needs is actually present on this machine:
/// the container engine (when a container is configured) and every service's
/// working directory.
pub fn run(config_file: Option<&Path>) -> Result<()> {
    println!("appstack doctor");
    println!("===============");
    println!();

    let config_path = config::resolve_config(config_file)?;
    let (config, _source) = config::load_config(&config_path)?;
    let base = config_path.parent().unwrap_or_else(|| Path::new("."));

    let mut all_ok = true;

    if let Some(container) = &config.container {
        match Command::new(&container.engine).arg("--version").output() {
            Ok(output) if output.status.success() => {
                let version = String::from_utf8_lossy(&output.stdout);
                let version = version.trim();
                println!("  [ok] {:<16} {}", container.engine, version);
            }
            _ => {
                println!("  [!!] {:<16} not found", container.engine);
                all_ok = false;
            }
        }
    }

    for svc in &config.services {
        let descriptor = ServiceDescriptor::from_config(svc, base);
        if descriptor.working_dir.is_dir() {
            println!(
                "  [ok] {:<16} {}",
                svc.name,
                descriptor.working_dir.display()
            );
        } else {
            println!(
                "  [!!] {:<16} working directory missing: {}",
                svc.name,
                descriptor.working_dir.display()
            );
            if svc.required {
                all_ok = false;
            }
        }
    }

    println!();
    if all_ok {
        println!("All checks passed.");
    } else {
        println!("Some checks failed. Required services will not start until they are fixed.");
    }

    Ok(())
}
