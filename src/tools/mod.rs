//! Capability registry and the built-in capabilities.
//!
//! A capability is an external action a strategy may invoke mid-reasoning
//! (web search, task list, clock, ...). Capabilities describe themselves
//! with a [`CapabilityDescriptor`] and are executed through the
//! [`CapabilityRegistry`], which never lets a fault escape: unknown names,
//! bad arguments, errors and panics all come back as a failed
//! [`CapabilityOutcome`].

mod clock;
mod tasks;
mod web;

pub use clock::CurrentTime;
pub use tasks::{CreateTask, ListTasks, TaskList};
pub use web::{FetchUrl, WebSearch};

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::RwLock;

use crate::config::CapabilityConfig;

/// Arguments passed to a capability.
pub type Arguments = Map<String, Value>;

/// Declared type of a capability parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParameterKind {
    fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        }
    }

    /// Accept `value` as this kind, coercing the loose encodings generators
    /// tend to produce (`"5"` for 5, `5` for `"5"`, `"true"` for true).
    fn coerce(&self, value: Value) -> Result<Value, String> {
        match (self, value) {
            (Self::String, Value::String(s)) => Ok(Value::String(s)),
            (Self::String, v @ (Value::Number(_) | Value::Bool(_))) => {
                Ok(Value::String(v.to_string()))
            }
            (Self::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(Value::Number(n)),
            (Self::Integer, Value::Number(n)) => n
                .as_f64()
                .filter(|f| f.fract() == 0.0 && (i64::MIN as f64..i64::MAX as f64).contains(f))
                .map(|f| json!(f as i64))
                .ok_or_else(|| format!("expected integer, got {}", n)),
            (Self::Integer, Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(|i| json!(i))
                .map_err(|_| format!("expected integer, got \"{}\"", s)),
            (Self::Number, Value::Number(n)) => Ok(Value::Number(n)),
            (Self::Number, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map(|f| json!(f))
                .map_err(|_| format!("expected number, got \"{}\"", s)),
            (Self::Boolean, Value::Bool(b)) => Ok(Value::Bool(b)),
            (Self::Boolean, Value::String(s)) => match s.trim().to_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(Value::Bool(true)),
                "false" | "no" | "0" => Ok(Value::Bool(false)),
                _ => Err(format!("expected boolean, got \"{}\"", s)),
            },
            (Self::Object, v @ Value::Object(_)) => Ok(v),
            (Self::Array, v @ Value::Array(_)) => Ok(v),
            (kind, other) => Err(format!("expected {}, got {}", kind.as_str(), other)),
        }
    }
}

/// One declared parameter of a capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub kind: ParameterKind,
    pub description: String,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParameterSpec {
    /// A required parameter.
    pub fn required(name: &str, kind: ParameterKind, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            description: description.to_string(),
            required: true,
            default: None,
        }
    }

    /// An optional parameter, filled with `default` when absent.
    pub fn optional(name: &str, kind: ParameterKind, description: &str, default: Option<Value>) -> Self {
        Self {
            name: name.to_string(),
            kind,
            description: description.to_string(),
            required: false,
            default,
        }
    }
}

/// Immutable description of a registered capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParameterSpec>,
}

impl CapabilityDescriptor {
    fn of(capability: &dyn Capability) -> Self {
        Self {
            name: capability.name().to_string(),
            description: capability.description().to_string(),
            parameters: capability.parameters(),
        }
    }

    /// JSON-schema style rendering of the parameter list.
    pub fn to_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .parameters
            .iter()
            .map(|p| {
                let mut prop = json!({
                    "type": p.kind.as_str(),
                    "description": p.description,
                });
                if let Some(default) = &p.default {
                    prop["default"] = default.clone();
                }
                (p.name.clone(), prop)
            })
            .collect();
        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        json!({
            "name": self.name,
            "description": self.description,
            "parameters": {
                "type": "object",
                "properties": properties,
                "required": required,
            }
        })
    }

    /// Check `arguments` against the declared parameters.
    ///
    /// Missing required parameters are an error; missing optional ones take
    /// their default. Undeclared arguments are dropped.
    pub fn validate_arguments(&self, mut arguments: Arguments) -> Result<Arguments, String> {
        let mut validated = Arguments::new();
        for param in &self.parameters {
            match arguments.remove(&param.name).filter(|v| !v.is_null()) {
                Some(value) => {
                    let value = param.kind.coerce(value).map_err(|e| {
                        format!(
                            "Invalid parameter '{}' for capability '{}': {}",
                            param.name, self.name, e
                        )
                    })?;
                    validated.insert(param.name.clone(), value);
                }
                None if param.required => {
                    return Err(format!(
                        "Required parameter '{}' is missing for capability '{}'",
                        param.name, self.name
                    ));
                }
                None => {
                    if let Some(default) = &param.default {
                        validated.insert(param.name.clone(), default.clone());
                    }
                }
            }
        }
        if !arguments.is_empty() {
            tracing::debug!(
                "Ignoring undeclared arguments for {}: {:?}",
                self.name,
                arguments.keys().collect::<Vec<_>>()
            );
        }
        Ok(validated)
    }
}

/// Result of invoking a capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityOutcome {
    pub success: bool,
    /// Scalar, list of records, or null.
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl CapabilityOutcome {
    pub fn success(data: Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
            metadata: Map::new(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Value::Null,
            error: Some(error.into()),
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

/// An external action strategies can invoke.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Unique, stable identifier (snake_case). This is what the generator names.
    fn name(&self) -> &str;

    /// What the capability does, shown to the generator.
    fn description(&self) -> &str;

    /// Ordered parameter list.
    fn parameters(&self) -> Vec<ParameterSpec>;

    /// Execute with already-validated arguments.
    async fn execute(&self, args: Arguments) -> anyhow::Result<CapabilityOutcome>;
}

#[derive(Clone)]
struct Entry {
    descriptor: CapabilityDescriptor,
    handle: Arc<dyn Capability>,
}

/// Live mapping from capability name to descriptor and handle.
///
/// Reads (`list`, `describe_all`, `invoke`) may run concurrently; `register`
/// takes the write lock. Duplicate registrations replace the earlier one
/// with a warning (last registration wins).
pub struct CapabilityRegistry {
    entries: RwLock<HashMap<String, Entry>>,
}

impl CapabilityRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Create a registry populated with the built-in capabilities enabled in `config`.
    pub async fn with_builtin(config: &CapabilityConfig) -> Self {
        let registry = Self::new();
        register_builtin(&registry, config).await;
        registry
    }

    /// Add a capability. Replaces (and warns about) an existing one with the same name.
    pub async fn register(&self, capability: Arc<dyn Capability>) {
        let descriptor = CapabilityDescriptor::of(capability.as_ref());
        let name = descriptor.name.clone();
        let previous = self.entries.write().await.insert(
            name.clone(),
            Entry {
                descriptor,
                handle: capability,
            },
        );
        if previous.is_some() {
            tracing::warn!("Capability '{}' already registered, overwriting", name);
        } else {
            tracing::info!("Registered capability: {}", name);
        }
    }

    /// Registered capability names, sorted.
    pub async fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Name → description for every registered capability.
    pub async fn describe_all(&self) -> BTreeMap<String, String> {
        self.entries
            .read()
            .await
            .values()
            .map(|e| (e.descriptor.name.clone(), e.descriptor.description.clone()))
            .collect()
    }

    /// Full descriptors, sorted by name.
    pub async fn descriptors(&self) -> Vec<CapabilityDescriptor> {
        let mut descriptors: Vec<CapabilityDescriptor> = self
            .entries
            .read()
            .await
            .values()
            .map(|e| e.descriptor.clone())
            .collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    /// The "available capabilities" block shown to the generator.
    pub async fn catalog(&self) -> String {
        let descriptors = self.descriptors().await;
        if descriptors.is_empty() {
            return "(no capabilities available)".to_string();
        }
        descriptors
            .iter()
            .map(|d| {
                let params = d
                    .parameters
                    .iter()
                    .map(|p| {
                        let mut s = format!("{}: {}", p.name, p.kind.as_str());
                        if p.required {
                            s.push_str(", required");
                        } else if let Some(default) = &p.default {
                            s.push_str(&format!(" = {}", default));
                        }
                        s
                    })
                    .collect::<Vec<_>>()
                    .join("; ");
                if params.is_empty() {
                    format!("- {}: {}", d.name, d.description)
                } else {
                    format!("- {}: {} (params: {})", d.name, d.description, params)
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.entries.read().await.contains_key(name)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Remove every registered capability.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
        tracing::info!("Capability registry cleared");
    }

    /// Invoke a capability by name. Never fails: every fault is folded into
    /// a `success: false` outcome.
    pub async fn invoke(&self, name: &str, arguments: Arguments) -> CapabilityOutcome {
        // Clone out of the map so the read lock is not held across execution.
        let entry = self.entries.read().await.get(name).cloned();
        let Some(entry) = entry else {
            tracing::warn!("Capability '{}' not found", name);
            return CapabilityOutcome::failure(format!("Capability '{}' not found", name))
                .with_metadata("capability", json!(name))
                .with_metadata("error_type", json!("not_found"));
        };

        let validated = match entry.descriptor.validate_arguments(arguments) {
            Ok(args) => args,
            Err(message) => {
                tracing::warn!("{}", message);
                return CapabilityOutcome::failure(message)
                    .with_metadata("capability", json!(name))
                    .with_metadata("error_type", json!("invalid_arguments"));
            }
        };

        let shown = Value::Object(validated.clone());
        tracing::info!("Invoking capability {} with {}", name, shown);
        match AssertUnwindSafe(entry.handle.execute(validated))
            .catch_unwind()
            .await
        {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                tracing::warn!("Capability '{}' failed: {}", name, e);
                CapabilityOutcome::failure(format!("Capability '{}' failed: {}", name, e))
                    .with_metadata("capability", json!(name))
                    .with_metadata("error_type", json!("execution_error"))
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!("Capability '{}' panicked: {}", name, message);
                CapabilityOutcome::failure(format!("Capability '{}' panicked: {}", name, message))
                    .with_metadata("capability", json!(name))
                    .with_metadata("error_type", json!("panic"))
            }
        }
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Wire the built-in capabilities into `registry`.
///
/// Discovery is explicit: every capability the binary ships is listed here.
pub async fn register_builtin(registry: &CapabilityRegistry, config: &CapabilityConfig) {
    registry.register(Arc::new(CurrentTime)).await;

    if config.enable_web_search {
        registry.register(Arc::new(WebSearch::new())).await;
        registry.register(Arc::new(FetchUrl::new())).await;
    }

    if config.enable_tasks {
        let tasks = TaskList::new();
        registry.register(Arc::new(CreateTask::new(tasks.clone()))).await;
        registry.register(Arc::new(ListTasks::new(tasks))).await;
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Capability doubles shared by the strategy tests.

    use std::sync::Mutex;

    use super::*;

    /// Records every invocation and answers with a fixed outcome.
    pub struct RecordingCapability {
        name: String,
        outcome: CapabilityOutcome,
        calls: Mutex<Vec<Arguments>>,
    }

    impl RecordingCapability {
        pub fn new(name: &str, outcome: CapabilityOutcome) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                outcome,
                calls: Mutex::new(Vec::new()),
            })
        }

        pub fn calls(&self) -> Vec<Arguments> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Capability for RecordingCapability {
        fn name(&self) -> &str {
            &self.name
        }

        fn description(&self) -> &str {
            "Records calls for tests"
        }

        fn parameters(&self) -> Vec<ParameterSpec> {
            vec![ParameterSpec::optional(
                "query",
                ParameterKind::String,
                "Anything",
                None,
            )]
        }

        async fn execute(&self, args: Arguments) -> anyhow::Result<CapabilityOutcome> {
            self.calls.lock().unwrap().push(args);
            Ok(self.outcome.clone())
        }
    }
}
