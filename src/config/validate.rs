// The miette/thiserror derive macros generate code that triggers false
// positive unused_assignments warnings on enum variant fields.
#![allow(unused_assignments)]

use std::collections::BTreeMap;

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

use crate::config::model::StackConfig;

// ---------------------------------------------------------------------------
// ConfigDiagnostic — miette-powered validation error
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigDiagnostic {
    #[error("service name `{name}` is declared more than once")]
    #[diagnostic(code(appstack::duplicate_service_name))]
    DuplicateServiceName {
        #[source_code]
        src: NamedSource<String>,
        #[label("second declaration of `{name}`")]
        span: SourceSpan,
        name: String,
    },

    #[error("service `{service}` has an empty command")]
    #[diagnostic(code(appstack::empty_command))]
    EmptyCommand {
        #[source_code]
        src: NamedSource<String>,
        #[label("command is empty")]
        span: SourceSpan,
        service: String,
    },

    #[error("service `{service}` has port 0")]
    #[diagnostic(
        code(appstack::invalid_port),
        help("port 0 cannot be health-checked; give the service a concrete port")
    )]
    InvalidPort {
        #[source_code]
        src: NamedSource<String>,
        #[label("invalid port")]
        span: SourceSpan,
        service: String,
    },

    #[error("port {port} is used by multiple services: {services:?}")]
    #[diagnostic(code(appstack::duplicate_port))]
    DuplicatePort {
        #[source_code]
        src: NamedSource<String>,
        #[label("duplicate port")]
        span: SourceSpan,
        port: u16,
        services: Vec<String>,
    },

    #[error("service `{service}` has health path `{path}` which does not start with `/`")]
    #[diagnostic(
        code(appstack::invalid_health_path),
        help("the health path is appended to http://localhost:<port>")
    )]
    InvalidHealthPath {
        #[source_code]
        src: NamedSource<String>,
        #[label("must start with `/`")]
        span: SourceSpan,
        service: String,
        path: String,
    },

    #[error("container `{name}` has an empty image")]
    #[diagnostic(code(appstack::empty_image))]
    EmptyImage {
        #[source_code]
        src: NamedSource<String>,
        #[label("image is empty")]
        span: SourceSpan,
        name: String,
    },
}

// ---------------------------------------------------------------------------
// Source span helpers
// ---------------------------------------------------------------------------

/// Byte span of the Nth occurrence of `name = "<value>"` in the source.
fn find_name_span(source: &str, value: &str, occurrence: usize) -> SourceSpan {
    let needle = format!("\"{}\"", value);
    let mut seen = 0usize;
    let mut from = 0usize;
    while let Some(rel) = source[from..].find(&needle) {
        let pos = from + rel;
        if seen == occurrence {
            return (pos + 1, value.len()).into();
        }
        seen += 1;
        from = pos + needle.len();
    }
    (0, 0).into()
}

/// Byte span of a field's value inside the block that declares `name`.
/// Falls back to the name itself when the field is not present in the source
/// (e.g. it was filled in by a serde default).
fn find_field_span(source: &str, name: &str, field: &str) -> SourceSpan {
    let anchor = format!("\"{}\"", name);
    let Some(block_start) = source.find(&anchor) else {
        return (0, 0).into();
    };
    let after = &source[block_start..];
    let prefix = format!("{} =", field);
    if let Some(rel) = after.find(&prefix) {
        let val_start = block_start + rel + prefix.len();
        let rest = &source[val_start..];
        let trimmed = rest.trim_start();
        let offset = val_start + (rest.len() - trimmed.len());
        let len = trimmed.find('\n').unwrap_or(trimmed.len());
        return (offset, len).into();
    }
    (block_start + 1, name.len()).into()
}

// ---------------------------------------------------------------------------
// Main validation function
// ---------------------------------------------------------------------------

pub fn validate(
    config: &StackConfig,
    source: &str,
    filename: &str,
) -> Result<(), Vec<ConfigDiagnostic>> {
    let mut errors = Vec::new();
    let src = NamedSource::new(filename, source.to_string());

    // Duplicate service names (the container name shares the namespace).
    let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
    for svc in &config.services {
        *seen.entry(svc.name.as_str()).or_default() += 1;
    }
    if let Some(container) = &config.container {
        *seen.entry(container.name.as_str()).or_default() += 1;
    }
    for (name, count) in &seen {
        if *count > 1 {
            errors.push(ConfigDiagnostic::DuplicateServiceName {
                src: src.clone(),
                span: find_name_span(source, name, 1),
                name: name.to_string(),
            });
        }
    }

    // Per-service checks.
    for svc in &config.services {
        if svc.command.trim().is_empty() {
            errors.push(ConfigDiagnostic::EmptyCommand {
                src: src.clone(),
                span: find_field_span(source, &svc.name, "command"),
                service: svc.name.clone(),
            });
        }
        if svc.port == 0 {
            errors.push(ConfigDiagnostic::InvalidPort {
                src: src.clone(),
                span: find_field_span(source, &svc.name, "port"),
                service: svc.name.clone(),
            });
        }
        if !svc.health_path.starts_with('/') {
            errors.push(ConfigDiagnostic::InvalidHealthPath {
                src: src.clone(),
                span: find_field_span(source, &svc.name, "health_path"),
                service: svc.name.clone(),
                path: svc.health_path.clone(),
            });
        }
    }

    // Port collisions across services and the container's host port.
    let mut by_port: BTreeMap<u16, Vec<String>> = BTreeMap::new();
    for svc in &config.services {
        by_port.entry(svc.port).or_default().push(svc.name.clone());
    }
    if let Some(container) = &config.container {
        by_port
            .entry(container.port)
            .or_default()
            .push(container.name.clone());
    }
    for (port, services) in by_port {
        if port != 0 && services.len() > 1 {
            errors.push(ConfigDiagnostic::DuplicatePort {
                src: src.clone(),
                span: find_field_span(source, &services[0], "port"),
                port,
                services,
            });
        }
    }

    // Container checks.
    if let Some(container) = &config.container {
        if container.image.trim().is_empty() {
            errors.push(ConfigDiagnostic::EmptyImage {
                src: src.clone(),
                span: find_field_span(source, &container.name, "image"),
                name: container.name.clone(),
            });
        }
        if !container.health_path.starts_with('/') {
            errors.push(ConfigDiagnostic::InvalidHealthPath {
                src: src.clone(),
                span: find_field_span(source, &container.name, "health_path"),
                service: container.name.clone(),
                path: container.health_path.clone(),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> StackConfig {
        toml::from_str(toml).unwrap()
    }

    fn check(toml: &str) -> Result<(), Vec<ConfigDiagnostic>> {
        validate(&parse(toml), toml, "appstack.toml")
    }

    const VALID: &str = r#"
[app]
name = "demo"

[[service]]
name = "backend"
path = "backend"
command = "./server"
port = 3000

[[service]]
name = "frontend"
path = "frontend"
command = "node"
port = 3004
"#;

    #[test]
    fn valid_config_passes() {
        assert!(check(VALID).is_ok());
    }

    #[test]
    fn duplicate_name_rejected() {
        let toml = r#"
[app]
name = "demo"

[[service]]
name = "api"
path = "a"
command = "run"
port = 3000

[[service]]
name = "api"
path = "b"
command = "run"
port = 3001
"#;
        let errors = check(toml).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigDiagnostic::DuplicateServiceName { name, .. } if name == "api")));
    }

    #[test]
    fn empty_command_rejected() {
        let toml = r#"
[app]
name = "demo"

[[service]]
name = "api"
path = "a"
command = ""
port = 3000
"#;
        let errors = check(toml).unwrap_err();
        assert!(matches!(
            errors[0],
            ConfigDiagnostic::EmptyCommand { .. }
        ));
    }

    #[test]
    fn duplicate_port_rejected() {
        let toml = r#"
[app]
name = "demo"

[[service]]
name = "api"
path = "a"
command = "run"
port = 3000

[container]
name = "imaging"
image = "img:latest"
port = 3000
container_port = 3000
"#;
        let errors = check(toml).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigDiagnostic::DuplicatePort { port: 3000, .. })));
    }

    #[test]
    fn health_path_must_be_rooted() {
        let toml = r#"
[app]
name = "demo"

[[service]]
name = "api"
path = "a"
command = "run"
port = 3000
health_path = "health"
"#;
        let errors = check(toml).unwrap_err();
        assert!(matches!(
            errors[0],
            ConfigDiagnostic::InvalidHealthPath { .. }
        ));
    }

    #[test]
    fn container_empty_image_rejected() {
        let toml = r#"
[app]
name = "demo"

[container]
name = "imaging"
image = ""
port = 3001
container_port = 3000
"#;
        let errors = check(toml).unwrap_err();
        assert!(matches!(errors[0], ConfigDiagnostic::EmptyImage { .. }));
    }

    #[test]
    fn name_span_points_at_second_occurrence() {
        let source = "name = \"api\"\nname = \"api\"\n";
        let span = find_name_span(source, "api", 1);
        assert_eq!(span.offset(), source.rfind("api").unwrap());
        assert_eq!(span.len(), 3);
    }
}
