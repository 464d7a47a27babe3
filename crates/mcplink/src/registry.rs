//! Capability registry and name normalization.
//!
//! Servers name things in whatever style they like (`getWeather`, `read-file`,
//! `HTTPServer`). The registry indexes every tool, resource and prompt under both
//! its original name and a normalized snake_case identifier, and resolves a
//! caller-supplied name to exactly one capability.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::protocol::{PromptDefinition, ResourceDefinition, ToolDefinition};

/// Normalize a server-supplied name to a snake_case identifier.
///
/// Separators (`-`, `.`, `/`, `:`, whitespace, `_`) collapse to a single `_`,
/// camelCase and acronym boundaries get an `_`, and the result is lowercase
/// with no leading or trailing `_`.
pub fn normalize_name(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if matches!(c, '-' | '.' | '/' | ':' | '_') || c.is_whitespace() {
            if !out.ends_with('_') {
                out.push('_');
            }
            continue;
        }

        if c.is_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            let boundary = prev.is_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_uppercase() && next_is_lower);
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
        }

        out.extend(c.to_lowercase());
    }

    out.trim_matches('_').to_string()
}

/// The three kinds of capability a server can expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityKind {
    Tool,
    Resource,
    Prompt,
}

impl std::fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tool => write!(f, "tool"),
            Self::Resource => write!(f, "resource"),
            Self::Prompt => write!(f, "prompt"),
        }
    }
}

/// One parameter from a tool's input schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub type_name: String,
    pub required: bool,
    pub default: Option<Value>,
    pub description: Option<String>,
}

impl ToolDefinition {
    /// Parameters declared by the input schema, in declaration order.
    pub fn parameters(&self) -> Vec<Parameter> {
        let required: Vec<&str> = self
            .input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let Some(properties) = self.input_schema.get("properties").and_then(Value::as_object)
        else {
            return Vec::new();
        };

        properties
            .iter()
            .map(|(name, schema)| Parameter {
                name: name.clone(),
                type_name: schema
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("any")
                    .to_string(),
                required: required.contains(&name.as_str()),
                default: schema.get("default").cloned(),
                description: schema
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            })
            .collect()
    }
}

/// A name resolved to exactly one capability.
#[derive(Debug, Clone, Copy)]
pub enum Resolved<'a> {
    Tool(&'a ToolDefinition),
    Resource(&'a ResourceDefinition),
    Prompt(&'a PromptDefinition),
}

impl Resolved<'_> {
    pub fn kind(&self) -> CapabilityKind {
        match self {
            Resolved::Tool(_) => CapabilityKind::Tool,
            Resolved::Resource(_) => CapabilityKind::Resource,
            Resolved::Prompt(_) => CapabilityKind::Prompt,
        }
    }

    /// Name as the server spells it.
    pub fn name(&self) -> &str {
        match self {
            Resolved::Tool(t) => &t.name,
            Resolved::Resource(r) => &r.name,
            Resolved::Prompt(p) => &p.name,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    kind: CapabilityKind,
    index: usize,
}

/// Immutable index over one server's capabilities, built once after the handshake.
#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    tools: Vec<ToolDefinition>,
    resources: Vec<ResourceDefinition>,
    prompts: Vec<PromptDefinition>,
    by_name: HashMap<String, Slot>,
    by_normalized: HashMap<String, Slot>,
    by_uri: HashMap<String, usize>,
}

impl CapabilityRegistry {
    /// Index the listings. Two capabilities whose names normalize to the same
    /// identifier are rejected, whatever their kinds.
    pub fn build(
        tools: Vec<ToolDefinition>,
        resources: Vec<ResourceDefinition>,
        prompts: Vec<PromptDefinition>,
    ) -> Result<Self> {
        let mut registry = Self {
            tools,
            resources,
            prompts,
            ..Self::default()
        };

        let names: Vec<(String, Slot)> = registry
            .tools
            .iter()
            .enumerate()
            .map(|(index, t)| (t.name.clone(), Slot { kind: CapabilityKind::Tool, index }))
            .chain(registry.resources.iter().enumerate().map(|(index, r)| {
                (r.name.clone(), Slot { kind: CapabilityKind::Resource, index })
            }))
            .chain(registry.prompts.iter().enumerate().map(|(index, p)| {
                (p.name.clone(), Slot { kind: CapabilityKind::Prompt, index })
            }))
            .collect();

        for (name, slot) in names {
            let normalized = normalize_name(&name);
            if let Some(existing) = registry.by_normalized.get(&normalized) {
                return Err(Error::NameCollision {
                    normalized,
                    first: registry.name_of(*existing).to_string(),
                    second: name,
                });
            }
            registry.by_normalized.insert(normalized, slot);
            registry.by_name.insert(name, slot);
        }

        for (index, resource) in registry.resources.iter().enumerate() {
            registry.by_uri.entry(resource.uri.clone()).or_insert(index);
        }

        Ok(registry)
    }

    fn name_of(&self, slot: Slot) -> &str {
        match slot.kind {
            CapabilityKind::Tool => &self.tools[slot.index].name,
            CapabilityKind::Resource => &self.resources[slot.index].name,
            CapabilityKind::Prompt => &self.prompts[slot.index].name,
        }
    }

    fn get(&self, slot: Slot) -> Resolved<'_> {
        match slot.kind {
            CapabilityKind::Tool => Resolved::Tool(&self.tools[slot.index]),
            CapabilityKind::Resource => Resolved::Resource(&self.resources[slot.index]),
            CapabilityKind::Prompt => Resolved::Prompt(&self.prompts[slot.index]),
        }
    }

    /// Resolve a caller-supplied name: exact name first, then normalized name,
    /// then resource URI.
    pub fn resolve(&self, name: &str) -> Result<Resolved<'_>> {
        if let Some(slot) = self.by_name.get(name) {
            return Ok(self.get(*slot));
        }
        if let Some(slot) = self.by_normalized.get(&normalize_name(name)) {
            return Ok(self.get(*slot));
        }
        if let Some(index) = self.by_uri.get(name) {
            return Ok(Resolved::Resource(&self.resources[*index]));
        }
        Err(Error::CapabilityNotFound {
            name: name.to_string(),
            available: self.available_names(),
        })
    }

    /// Every capability name: tools, then resources, then prompts.
    pub fn available_names(&self) -> Vec<String> {
        self.tools
            .iter()
            .map(|t| t.name.clone())
            .chain(self.resources.iter().map(|r| r.name.clone()))
            .chain(self.prompts.iter().map(|p| p.name.clone()))
            .collect()
    }

    pub fn tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    pub fn resources(&self) -> &[ResourceDefinition] {
        &self.resources
    }

    pub fn prompts(&self) -> &[PromptDefinition] {
        &self.prompts
    }

    pub fn len(&self) -> usize {
        self.tools.len() + self.resources.len() + self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            description: None,
            input_schema: json!({"type": "object"}),
        }
    }

    fn resource(name: &str, uri: &str) -> ResourceDefinition {
        ResourceDefinition {
            uri: uri.to_string(),
            name: name.to_string(),
            description: None,
            mime_type: None,
        }
    }

    fn prompt(name: &str) -> PromptDefinition {
        PromptDefinition {
            name: name.to_string(),
            description: None,
            arguments: vec![],
        }
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("getWeather"), "get_weather");
        assert_eq!(normalize_name("read-file"), "read_file");
        assert_eq!(normalize_name("HTTPServer"), "http_server");
        assert_eq!(normalize_name("fs.read/all"), "fs_read_all");
        assert_eq!(normalize_name("already_snake"), "already_snake");
        assert_eq!(normalize_name("__private--x__"), "private_x");
        assert_eq!(normalize_name("v2Api"), "v2_api");
        assert_eq!(normalize_name("list files"), "list_files");
        assert_eq!(normalize_name("ABC"), "abc");
    }

    #[test]
    fn test_resolve_by_original_normalized_and_uri() {
        let registry = CapabilityRegistry::build(
            vec![tool("getWeather")],
            vec![resource("readme", "file:///README.md")],
            vec![prompt("code-review")],
        )
        .unwrap();

        assert_eq!(registry.resolve("getWeather").unwrap().name(), "getWeather");
        assert_eq!(registry.resolve("get_weather").unwrap().name(), "getWeather");
        assert_eq!(
            registry.resolve("code_review").unwrap().kind(),
            CapabilityKind::Prompt
        );
        assert_eq!(
            registry.resolve("file:///README.md").unwrap().kind(),
            CapabilityKind::Resource
        );
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_resolve_unknown_lists_available() {
        let registry =
            CapabilityRegistry::build(vec![tool("echo"), tool("add")], vec![], vec![prompt("p")])
                .unwrap();

        match registry.resolve("subtract").unwrap_err() {
            Error::CapabilityNotFound { name, available } => {
                assert_eq!(name, "subtract");
                assert_eq!(available, vec!["echo", "add", "p"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_collision_across_kinds_is_rejected() {
        let err = CapabilityRegistry::build(
            vec![tool("getWeather")],
            vec![],
            vec![prompt("get-weather")],
        )
        .unwrap_err();

        match err {
            Error::NameCollision {
                normalized,
                first,
                second,
            } => {
                assert_eq!(normalized, "get_weather");
                assert_eq!(first, "getWeather");
                assert_eq!(second, "get-weather");
            }
            other => panic!("unexpected error: {other}"),
        }

        assert!(CapabilityRegistry::build(vec![tool("a"), tool("a")], vec![], vec![]).is_err());
    }

    #[test]
    fn test_tool_parameters() {
        let def = ToolDefinition {
            name: "search".to_string(),
            description: Some("Search files".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Text to find"},
                    "limit": {"type": "integer", "default": 10}
                },
                "required": ["query"]
            }),
        };

        let params = def.parameters();
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].name, "query");
        assert!(params[0].required);
        assert_eq!(params[0].description.as_deref(), Some("Text to find"));
        assert_eq!(params[1].type_name, "integer");
        assert!(!params[1].required);
        assert_eq!(params[1].default, Some(json!(10)));

        assert!(tool("bare").parameters().is_empty());
    }
}
