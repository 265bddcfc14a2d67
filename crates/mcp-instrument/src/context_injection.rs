//! Intent-field injection for tool schemas and arguments
//!
//! Tool schemas published to clients get one extra string property (by default
//! `context`) asking the caller to explain why it is invoking the tool. When the
//! tool is called, the value is extracted for telemetry and stripped from the
//! arguments, so the real handler never sees it.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::collections::BTreeMap;
use tracing::debug;

/// Default name of the injected property
pub const DEFAULT_PARAMETER_NAME: &str = "context";

/// Default description of the injected property
pub const DEFAULT_DESCRIPTION: &str =
    "Explain why you are calling this tool and what you are trying to accomplish.";

/// Intent-field injection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextInjectionConfig {
    /// Inject the property into schemas
    pub enabled: bool,
    /// Description shown to the caller
    pub description: String,
    /// Add the property to the schema's required list
    pub required: bool,
    /// Property name used for injection, extraction and stripping
    pub parameter_name: String,
}

impl Default for ContextInjectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            description: DEFAULT_DESCRIPTION.to_string(),
            required: false,
            parameter_name: DEFAULT_PARAMETER_NAME.to_string(),
        }
    }
}

impl ContextInjectionConfig {
    /// Injection turned off
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Set the property name
    #[must_use]
    pub fn parameter_name(mut self, name: impl Into<String>) -> Self {
        self.parameter_name = name.into();
        self
    }

    /// Set the property description
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Mark the property as required
    #[must_use]
    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }
}

/// JSON schema describing a tool's input object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInputSchema {
    /// Schema type, always "object" for tool inputs
    #[serde(rename = "type", default = "object_type")]
    pub schema_type: String,
    /// Property definitions
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, PropertySchema>,
    /// Required property names
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    /// Remaining schema keywords (`additionalProperties`, `$schema`, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn object_type() -> String {
    "object".to_string()
}

impl Default for ToolInputSchema {
    fn default() -> Self {
        Self {
            schema_type: object_type(),
            properties: BTreeMap::new(),
            required: Vec::new(),
            extra: Map::new(),
        }
    }
}

impl ToolInputSchema {
    /// Add a property
    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, property: PropertySchema) -> Self {
        self.properties.insert(name.into(), property);
        self
    }

    /// Mark a property as required
    #[must_use]
    pub fn with_required(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.required.contains(&name) {
            self.required.push(name);
        }
        self
    }
}

/// Schema of a single property
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PropertySchema {
    /// JSON type of the property
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub property_type: Option<String>,
    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Remaining keywords (`enum`, `items`, `default`, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PropertySchema {
    /// A string property with a description
    #[must_use]
    pub fn string(description: impl Into<String>) -> Self {
        Self {
            property_type: Some("string".to_string()),
            description: Some(description.into()),
            extra: Map::new(),
        }
    }
}

/// Arguments after intent extraction
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedArguments {
    /// Extracted intent, if the caller supplied a string value
    pub context: Option<String>,
    /// Arguments with the intent property removed
    pub cleaned_args: Value,
}

/// Injects the intent property into schemas and pulls it out of arguments
#[derive(Debug, Default)]
pub struct ContextInjector {
    config: RwLock<ContextInjectionConfig>,
}

impl ContextInjector {
    /// Create an injector with the given configuration
    #[must_use]
    pub fn new(config: ContextInjectionConfig) -> Self {
        Self {
            config: RwLock::new(config),
        }
    }

    /// Snapshot of the current configuration
    #[must_use]
    pub fn config(&self) -> ContextInjectionConfig {
        self.config.read().clone()
    }

    /// Replace the configuration for all subsequent processing
    pub fn update_config(&self, config: ContextInjectionConfig) {
        debug!(
            enabled = config.enabled,
            parameter_name = %config.parameter_name,
            "Context injection configuration updated"
        );
        *self.config.write() = config;
    }

    /// Add the intent property to a tool schema
    ///
    /// Disabled injection hands the input back borrowed. A missing schema becomes a
    /// minimal object schema carrying only the injected property. The input is
    /// never modified.
    #[must_use]
    pub fn inject_into_schema<'a>(
        &self,
        schema: Option<&'a ToolInputSchema>,
    ) -> Option<Cow<'a, ToolInputSchema>> {
        let config = self.config.read();
        if !config.enabled {
            return schema.map(Cow::Borrowed);
        }

        let mut injected = schema.cloned().unwrap_or_default();
        injected.properties.insert(
            config.parameter_name.clone(),
            PropertySchema::string(config.description.clone()),
        );
        if config.required && !injected.required.contains(&config.parameter_name) {
            injected.required.push(config.parameter_name.clone());
        }

        Some(Cow::Owned(injected))
    }

    /// Inject into every `inputSchema` of a `tools/list` result payload
    ///
    /// Schemas that do not deserialize as object schemas are left untouched.
    pub fn inject_into_tool_list(&self, result: &mut Value) {
        if !self.config.read().enabled {
            return;
        }

        let Some(tools) = result.get_mut("tools").and_then(Value::as_array_mut) else {
            return;
        };

        for tool in tools {
            let Some(raw) = tool.get("inputSchema") else {
                continue;
            };
            let schema = match serde_json::from_value::<ToolInputSchema>(raw.clone()) {
                Ok(schema) => schema,
                Err(e) => {
                    debug!(error = %e, "Skipping tool schema that is not an object schema");
                    continue;
                }
            };
            if let Some(Cow::Owned(injected)) = self.inject_into_schema(Some(&schema))
                && let Ok(value) = serde_json::to_value(injected)
                && let Some(slot) = tool.get_mut("inputSchema")
            {
                *slot = value;
            }
        }
    }

    /// Extract the named property when it holds a string
    #[must_use]
    pub fn extract_from_args(args: &Value, parameter_name: &str) -> Option<String> {
        args.get(parameter_name)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Copy of `args` without the named property; non-objects are returned as-is
    #[must_use]
    pub fn strip_from_args(args: &Value, parameter_name: &str) -> Value {
        match args {
            Value::Object(map) => Value::Object(
                map.iter()
                    .filter(|(key, _)| key.as_str() != parameter_name)
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Extract then strip the intent using the configured property name
    #[must_use]
    pub fn process_tool_arguments(&self, tool_name: &str, args: &Value) -> ProcessedArguments {
        let parameter_name = self.config.read().parameter_name.clone();
        let context = Self::extract_from_args(args, &parameter_name);
        let cleaned_args = Self::strip_from_args(args, &parameter_name);

        debug!(
            tool = tool_name,
            has_context = context.is_some(),
            "Processed tool arguments"
        );

        ProcessedArguments {
            context,
            cleaned_args,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::json;

    fn search_schema() -> ToolInputSchema {
        ToolInputSchema::default()
            .with_property("query", PropertySchema::string("Search terms"))
            .with_required("query")
    }

    #[test]
    fn test_disabled_injection_is_identity() {
        let injector = ContextInjector::new(ContextInjectionConfig::disabled());
        let schema = search_schema();

        match injector.inject_into_schema(Some(&schema)) {
            Some(Cow::Borrowed(returned)) => assert!(std::ptr::eq(returned, &schema)),
            other => panic!("expected borrowed schema, got {other:?}"),
        }
        assert!(injector.inject_into_schema(None).is_none());
    }

    #[test]
    fn test_injection_adds_one_property_without_mutating_input() {
        let injector = ContextInjector::default();
        let schema = search_schema();
        let before = schema.clone();

        let injected = injector
            .inject_into_schema(Some(&schema))
            .map(Cow::into_owned)
            .unwrap_or_default();

        assert_eq!(schema, before);
        assert_eq!(injected.properties.len(), schema.properties.len() + 1);
        let property = &injected.properties[DEFAULT_PARAMETER_NAME];
        assert_eq!(property.property_type.as_deref(), Some("string"));
        assert_eq!(injected.required, vec!["query".to_string()]);
    }

    #[test]
    fn test_required_injection_never_duplicates() {
        let injector = ContextInjector::new(ContextInjectionConfig::default().required(true));
        let schema = search_schema().with_required("context");

        let injected = injector
            .inject_into_schema(Some(&schema))
            .map(Cow::into_owned)
            .unwrap_or_default();

        assert_eq!(injected.required, vec!["query".to_string(), "context".to_string()]);
    }

    #[test]
    fn test_missing_schema_gets_minimal_schema() {
        let injector = ContextInjector::new(ContextInjectionConfig::default().required(true));
        let injected = injector
            .inject_into_schema(None)
            .map(Cow::into_owned)
            .unwrap_or_default();

        assert_eq!(injected.schema_type, "object");
        assert_eq!(injected.properties.len(), 1);
        assert_eq!(injected.required, vec!["context".to_string()]);
    }

    #[test]
    fn test_extract_only_strings() {
        assert_eq!(
            ContextInjector::extract_from_args(&json!({"context": "why"}), "context"),
            Some("why".to_string())
        );
        assert_eq!(ContextInjector::extract_from_args(&json!({"context": 7}), "context"), None);
        assert_eq!(ContextInjector::extract_from_args(&json!({"context": null}), "context"), None);
        assert_eq!(ContextInjector::extract_from_args(&json!("context"), "context"), None);
    }

    #[test]
    fn test_strip_leaves_non_objects_alone() {
        assert_eq!(ContextInjector::strip_from_args(&json!([1, 2]), "context"), json!([1, 2]));
        assert_eq!(ContextInjector::strip_from_args(&Value::Null, "context"), Value::Null);
    }

    #[test]
    fn test_process_tool_arguments() {
        let injector = ContextInjector::default();
        let args = json!({"query": "x", "context": "because"});

        let processed = injector.process_tool_arguments("search", &args);
        assert_eq!(processed.context.as_deref(), Some("because"));
        assert_eq!(processed.cleaned_args, json!({"query": "x"}));
        // Input untouched
        assert_eq!(args["context"], "because");
    }

    #[test]
    fn test_update_config_changes_parameter_name() {
        let injector = ContextInjector::default();
        injector.update_config(ContextInjectionConfig::default().parameter_name("reason"));

        let processed = injector.process_tool_arguments("t", &json!({"reason": "r", "context": "c"}));
        assert_eq!(processed.context.as_deref(), Some("r"));
        assert_eq!(processed.cleaned_args, json!({"context": "c"}));

        let injected = injector
            .inject_into_schema(None)
            .map(Cow::into_owned)
            .unwrap_or_default();
        assert!(injected.properties.contains_key("reason"));
    }

    #[test]
    fn test_inject_into_tool_list() {
        let injector = ContextInjector::default();
        let mut result = json!({
            "tools": [
                {"name": "search", "inputSchema": {"type": "object", "properties": {"q": {"type": "string"}}, "additionalProperties": false}},
                {"name": "odd", "inputSchema": "not a schema"},
                {"name": "bare"}
            ]
        });

        injector.inject_into_tool_list(&mut result);

        let search = &result["tools"][0]["inputSchema"];
        assert_eq!(search["properties"]["context"]["type"], "string");
        assert_eq!(search["additionalProperties"], false);
        assert_eq!(result["tools"][1]["inputSchema"], "not a schema");
        assert!(result["tools"][2].get("inputSchema").is_none());
    }

    #[test]
    fn test_schema_serde_preserves_unknown_keywords() {
        let raw = json!({
            "type": "object",
            "properties": {"n": {"type": "integer", "minimum": 0}},
            "required": ["n"],
            "$schema": "http://json-schema.org/draft-07/schema#"
        });
        let schema: ToolInputSchema = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(schema.properties["n"].extra["minimum"], 0);
        assert_eq!(serde_json::to_value(&schema).unwrap(), raw);
    }

    proptest! {
        #[test]
        fn prop_strip_removes_context(
            keys in proptest::collection::btree_map("[a-z]{1,8}", "[a-z]{0,8}", 0..6),
            intent in ".{0,40}",
        ) {
            let mut map: Map<String, Value> = keys
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect();
            map.insert("context".to_string(), Value::String(intent.clone()));
            let args = Value::Object(map);

            let stripped = ContextInjector::strip_from_args(&args, "context");
            prop_assert_eq!(ContextInjector::extract_from_args(&stripped, "context"), None);

            let processed = ContextInjector::default().process_tool_arguments("tool", &args);
            prop_assert_eq!(processed.context, Some(intent));
            prop_assert_eq!(processed.cleaned_args.as_object().map(Map::len), args.as_object().map(|m| m.len() - 1));
        }
    }
}
