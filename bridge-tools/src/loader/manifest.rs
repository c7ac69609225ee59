//! Manifest schema for tool modules.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bridge_primitives::ToolName;
use serde::Deserialize;
use serde_json::Value;

use super::LoadFailure;
use super::command::CommandTool;
use super::template::TemplateTool;
use crate::descriptor::{InvocationMode, ToolDescriptor, ToolSource};
use crate::schema::{ParameterSchema, ParameterSpec, ValueType};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ModuleManifest {
    #[serde(default, rename = "tool")]
    tools: Vec<ToolEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ToolEntry {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default = "any_type")]
    returns: ValueType,
    #[serde(default)]
    streaming: bool,
    timeout_secs: Option<u64>,
    #[serde(default)]
    parameters: Vec<ParameterEntry>,
    handler: HandlerEntry,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ParameterEntry {
    name: String,
    #[serde(rename = "type")]
    value_type: ValueType,
    required: Option<bool>,
    default: Option<Value>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum HandlerEntry {
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
    Template {
        text: String,
    },
}

const fn any_type() -> ValueType {
    ValueType::Any
}

/// Reads, parses and validates one module file.
pub(super) fn load_module(path: &Path) -> Result<Vec<ToolDescriptor>, LoadFailure> {
    let contents = std::fs::read_to_string(path)?;
    let manifest: ModuleManifest = toml::from_str(&contents)?;
    if manifest.tools.is_empty() {
        return Err(LoadFailure::NoTools);
    }

    let module_dir = path.parent().unwrap_or_else(|| Path::new("."));
    manifest
        .tools
        .into_iter()
        .map(|entry| {
            let tool = entry.name.clone();
            entry
                .into_descriptor(path, module_dir)
                .map_err(|reason| LoadFailure::InvalidTool { tool, reason })
        })
        .collect()
}

impl ToolEntry {
    fn into_descriptor(self, path: &Path, module_dir: &Path) -> Result<ToolDescriptor, String> {
        let name = ToolName::new(self.name).map_err(|err| err.to_string())?;

        let specs = self
            .parameters
            .into_iter()
            .map(ParameterEntry::into_spec)
            .collect::<Result<Vec<_>, _>>()?;
        let parameters = ParameterSchema::new(specs).map_err(|err| err.to_string())?;

        let mode = if self.streaming {
            InvocationMode::Streaming
        } else {
            InvocationMode::Synchronous
        };

        let mut builder = ToolDescriptor::builder(name)
            .description(self.description)
            .returns(self.returns)
            .mode(mode)
            .source(ToolSource::Manifest(path.to_path_buf()));

        if let Some(secs) = self.timeout_secs {
            if secs == 0 {
                return Err("timeout_secs must be greater than zero".into());
            }
            builder = builder.timeout(Duration::from_secs(secs));
        }

        let descriptor = match self.handler {
            HandlerEntry::Template { text } => {
                if !matches!(self.returns, ValueType::String | ValueType::Any) {
                    return Err(format!(
                        "template tools return strings, not {}",
                        self.returns
                    ));
                }
                let template = TemplateTool::parse(&text, mode);
                if let Some(unknown) = template
                    .placeholders()
                    .find(|placeholder| parameters.get(placeholder).is_none())
                {
                    return Err(format!(
                        "template references undeclared parameter `{unknown}`"
                    ));
                }
                builder.parameters(parameters).build(template)
            }
            HandlerEntry::Command { program, args, env } => {
                let program = resolve_program(&program, module_dir)?;
                let command = CommandTool::new(program, module_dir.to_path_buf())
                    .args(args)
                    .envs(env)
                    .mode(mode)
                    .returns(self.returns);
                builder.parameters(parameters).build(command)
            }
        };

        Ok(descriptor)
    }
}

impl ParameterEntry {
    fn into_spec(self) -> Result<ParameterSpec, String> {
        let mut spec = ParameterSpec::new(self.name, self.value_type);
        match (self.required, self.default) {
            (Some(true), Some(_)) => {
                return Err(format!(
                    "required parameter `{}` cannot declare a default",
                    spec.name()
                ));
            }
            (_, Some(default)) => spec = spec.with_default(default),
            (Some(false), None) => spec = spec.optional(),
            (Some(true) | None, None) => {}
        }
        if let Some(description) = self.description {
            spec = spec.with_description(description);
        }
        Ok(spec)
    }
}

/// Bare program names are looked up on `PATH` at spawn time; anything with a
/// path component is resolved against the module directory and must exist.
fn resolve_program(program: &str, module_dir: &Path) -> Result<PathBuf, String> {
    if program.trim().is_empty() {
        return Err("command program cannot be empty".into());
    }

    let candidate = Path::new(program);
    if candidate.components().count() == 1 && !candidate.is_absolute() {
        return Ok(candidate.to_path_buf());
    }

    let resolved = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        module_dir.join(candidate)
    };
    if resolved.is_file() {
        Ok(resolved)
    } else {
        Err(format!("command program `{}` not found", resolved.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(contents: &str) -> Result<Vec<ToolDescriptor>, LoadFailure> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("module.toml");
        std::fs::write(&path, contents).unwrap();
        load_module(&path)
    }

    fn reason(result: Result<Vec<ToolDescriptor>, LoadFailure>) -> String {
        match result {
            Err(LoadFailure::InvalidTool { reason, .. }) => reason,
            other => panic!("expected invalid tool, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_fields() {
        let err = parse(
            r#"
[[tool]]
name = "x"
colour = "blue"
[tool.handler]
kind = "template"
text = "x"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, LoadFailure::Parse(_)));
    }

    #[test]
    fn rejects_required_parameter_with_default() {
        let reason = reason(parse(
            r#"
[[tool]]
name = "x"
[[tool.parameters]]
name = "n"
type = "integer"
required = true
default = 3
[tool.handler]
kind = "template"
text = "{n}"
"#,
        ));
        assert!(reason.contains("cannot declare a default"), "{reason}");
    }

    #[test]
    fn rejects_default_of_wrong_type() {
        let reason = reason(parse(
            r#"
[[tool]]
name = "x"
[[tool.parameters]]
name = "n"
type = "integer"
default = "three"
[tool.handler]
kind = "template"
text = "{n}"
"#,
        ));
        assert!(reason.contains("default for parameter `n`"), "{reason}");
    }

    #[test]
    fn rejects_zero_timeout_and_non_string_template() {
        let zero = reason(parse(
            r#"
[[tool]]
name = "x"
timeout_secs = 0
[tool.handler]
kind = "template"
text = "x"
"#,
        ));
        assert!(zero.contains("timeout_secs"), "{zero}");

        let typed = reason(parse(
            r#"
[[tool]]
name = "x"
returns = "integer"
[tool.handler]
kind = "template"
text = "1"
"#,
        ));
        assert!(typed.contains("template tools return strings"), "{typed}");
    }

    #[test]
    fn parses_parameter_flags() {
        let descriptors = parse(
            r#"
[[tool]]
name = "search"
description = "Search things"
streaming = true
timeout_secs = 5
[[tool.parameters]]
name = "query"
type = "string"
[[tool.parameters]]
name = "limit"
type = "integer"
default = 10
[[tool.parameters]]
name = "filter"
type = "object"
required = false
[tool.handler]
kind = "command"
program = "cat"
"#,
        )
        .unwrap();

        let descriptor = &descriptors[0];
        assert_eq!(descriptor.mode(), InvocationMode::Streaming);
        assert_eq!(descriptor.timeout(), Some(Duration::from_secs(5)));

        let params: Vec<_> = descriptor.parameters().iter().collect();
        assert!(params[0].is_required());
        assert!(!params[1].is_required());
        assert_eq!(params[1].default_value(), Some(&serde_json::json!(10)));
        assert!(!params[2].is_required());
        assert!(params[2].default_value().is_none());
    }

    #[test]
    fn bare_program_names_are_not_resolved() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(resolve_program("sh", dir.path()).unwrap(), PathBuf::from("sh"));
        assert!(resolve_program("./sh", dir.path()).is_err());
        assert!(resolve_program(" ", dir.path()).is_err());
    }
}
