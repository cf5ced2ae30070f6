//! Procedure registry: the set of tools a server exposes.
//!
//! Procedures are registered explicitly at startup through
//! [`ProcedureRegistryBuilder`]. Once built, the registry is immutable and is
//! shared between request handlers through an `Arc` without locking.

use crate::error::{McpError, Result};
use crate::protocol::ToolDescriptor;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// Domain error raised by a procedure, e.g. division by zero.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ToolError(pub String);

impl ToolError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// JSON type accepted for a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Integer,
    Number,
    String,
    Boolean,
}

impl ParamKind {
    fn as_str(&self) -> &'static str {
        match self {
            ParamKind::Integer => "integer",
            ParamKind::Number => "number",
            ParamKind::String => "string",
            ParamKind::Boolean => "boolean",
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamKind::Integer => as_integer(value).is_some(),
            ParamKind::Number => value.is_number(),
            ParamKind::String => value.is_string(),
            ParamKind::Boolean => value.is_boolean(),
        }
    }
}

/// Integer value of `value`, also for floats with no fractional part
/// (`15.0`) that fit in an `i64`.
fn as_integer(value: &Value) -> Option<i64> {
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    let f = value.as_f64()?;
    // i64::MAX rounds up to 2^63 as f64, so the upper bound is exclusive.
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

#[derive(Debug, Clone)]
struct ParamSpec {
    name: String,
    kind: ParamKind,
    required: bool,
}

/// Parameter schema of a procedure: a flat object of typed fields.
#[derive(Debug, Clone, Default)]
pub struct ParamSchema {
    params: Vec<ParamSpec>,
}

impl ParamSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a required parameter.
    pub fn required(mut self, name: impl Into<String>, kind: ParamKind) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            kind,
            required: true,
        });
        self
    }

    /// Add an optional parameter.
    pub fn optional(mut self, name: impl Into<String>, kind: ParamKind) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            kind,
            required: false,
        });
        self
    }

    /// Check `arguments` against the schema.
    ///
    /// A missing argument object counts as empty. Unknown keys are ignored.
    pub fn validate(&self, arguments: &Value) -> Result<()> {
        let empty = Map::new();
        let object = match arguments {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => {
                return Err(McpError::InvalidArguments {
                    message: format!("expected an object, got {}", other),
                })
            }
        };

        for param in &self.params {
            match object.get(&param.name) {
                None | Some(Value::Null) if param.required => {
                    return Err(McpError::InvalidArguments {
                        message: format!("missing required argument '{}'", param.name),
                    });
                }
                Some(value) if !value.is_null() && !param.kind.accepts(value) => {
                    return Err(McpError::InvalidArguments {
                        message: format!(
                            "argument '{}' must be of type {}, got {}",
                            param.name,
                            param.kind.as_str(),
                            value
                        ),
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Rewrite integer-valued floats of `Integer` parameters as integers so
    /// they decode into integer fields.
    pub fn normalize(&self, mut arguments: Value) -> Value {
        if let Value::Object(object) = &mut arguments {
            for param in self.params.iter().filter(|p| p.kind == ParamKind::Integer) {
                if let Some(value) = object.get_mut(&param.name) {
                    if let Some(n) = as_integer(value) {
                        *value = Value::from(n);
                    }
                }
            }
        }
        arguments
    }

    /// JSON Schema rendering used by `tools/list`.
    pub fn to_json_schema(&self, tool_name: &str) -> Value {
        let mut properties = Map::new();
        for param in &self.params {
            properties.insert(
                param.name.clone(),
                json!({ "title": title_case(&param.name), "type": param.kind.as_str() }),
            );
        }
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        json!({
            "type": "object",
            "title": format!("{}Arguments", tool_name),
            "properties": properties,
            "required": required,
        })
    }
}

fn title_case(name: &str) -> String {
    name.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Callable side of a procedure.
#[async_trait]
pub trait ToolHandler: Send + Sync + 'static {
    /// Run the procedure with already-validated arguments.
    async fn call(&self, arguments: Value) -> std::result::Result<Value, ToolError>;
}

struct TypedFn<F, A, R> {
    f: F,
    _marker: PhantomData<fn(A) -> R>,
}

#[async_trait]
impl<F, A, R> ToolHandler for TypedFn<F, A, R>
where
    F: Fn(A) -> std::result::Result<R, ToolError> + Send + Sync + 'static,
    A: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
{
    async fn call(&self, arguments: Value) -> std::result::Result<Value, ToolError> {
        let args = decode_args(arguments)?;
        let value = (self.f)(args)?;
        encode_value(value)
    }
}

struct TypedAsyncFn<F, A, R> {
    f: F,
    _marker: PhantomData<fn(A) -> R>,
}

#[async_trait]
impl<F, Fut, A, R> ToolHandler for TypedAsyncFn<F, A, R>
where
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<R, ToolError>> + Send + 'static,
    A: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
{
    async fn call(&self, arguments: Value) -> std::result::Result<Value, ToolError> {
        let args = decode_args(arguments)?;
        let value = (self.f)(args).await?;
        encode_value(value)
    }
}

fn decode_args<A: DeserializeOwned>(arguments: Value) -> std::result::Result<A, ToolError> {
    let arguments = if arguments.is_null() {
        Value::Object(Map::new())
    } else {
        arguments
    };
    serde_json::from_value(arguments)
        .map_err(|e| ToolError::new(format!("Invalid arguments: {}", e)))
}

fn encode_value<R: Serialize + 'static>(value: R) -> std::result::Result<Value, ToolError> {
    // serde_json turns NaN and infinities into `null`.
    let any: &dyn Any = &value;
    let non_finite = match (any.downcast_ref::<f64>(), any.downcast_ref::<f32>()) {
        (Some(f), _) => !f.is_finite(),
        (_, Some(f)) => !f.is_finite(),
        _ => false,
    };
    if non_finite {
        return Err(ToolError::new("Result is not a finite number"));
    }
    serde_json::to_value(value).map_err(|e| ToolError::new(format!("Unserializable result: {}", e)))
}

/// A named, schema-checked callable.
pub struct Procedure {
    name: String,
    description: String,
    schema: ParamSchema,
    handler: Arc<dyn ToolHandler>,
}

impl std::fmt::Debug for Procedure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Procedure")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

impl Procedure {
    /// Wrap an arbitrary handler.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: ParamSchema,
        handler: impl ToolHandler,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            handler: Arc::new(handler),
        }
    }

    /// Register a synchronous typed function.
    ///
    /// Arguments are deserialized into `A` and the return value serialized
    /// from `R`.
    pub fn from_fn<F, A, R>(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: ParamSchema,
        f: F,
    ) -> Self
    where
        F: Fn(A) -> std::result::Result<R, ToolError> + Send + Sync + 'static,
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
    {
        Self::new(
            name,
            description,
            schema,
            TypedFn {
                f,
                _marker: PhantomData,
            },
        )
    }

    /// Register an async typed function.
    pub fn from_async_fn<F, Fut, A, R>(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: ParamSchema,
        f: F,
    ) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, ToolError>> + Send + 'static,
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
    {
        Self::new(
            name,
            description,
            schema,
            TypedAsyncFn {
                f,
                _marker: PhantomData,
            },
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn schema(&self) -> &ParamSchema {
        &self.schema
    }

    /// Check arguments against this procedure's schema.
    pub fn validate(&self, arguments: &Value) -> Result<()> {
        self.schema.validate(arguments)
    }

    /// Execute the procedure.
    pub async fn invoke(&self, arguments: Value) -> std::result::Result<Value, ToolError> {
        self.handler.call(self.schema.normalize(arguments)).await
    }

    pub fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.schema.to_json_schema(&self.name),
        }
    }
}

/// Immutable name → procedure table.
#[derive(Debug, Default)]
pub struct ProcedureRegistry {
    procedures: Vec<Arc<Procedure>>,
    index: HashMap<String, usize>,
}

impl ProcedureRegistry {
    pub fn builder() -> ProcedureRegistryBuilder {
        ProcedureRegistryBuilder::default()
    }

    /// Look up a procedure by name.
    pub fn get(&self, name: &str) -> Option<Arc<Procedure>> {
        self.index.get(name).map(|&i| self.procedures[i].clone())
    }

    /// Descriptors in registration order.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.procedures.iter().map(|p| p.descriptor()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.procedures.iter().map(|p| p.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.procedures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty()
    }
}

/// Collects procedures and rejects duplicate names at build time.
#[derive(Default)]
pub struct ProcedureRegistryBuilder {
    procedures: Vec<Procedure>,
}

impl ProcedureRegistryBuilder {
    pub fn procedure(mut self, procedure: Procedure) -> Self {
        self.procedures.push(procedure);
        self
    }

    pub fn build(self) -> Result<ProcedureRegistry> {
        let mut registry = ProcedureRegistry::default();
        for procedure in self.procedures {
            if registry.index.contains_key(procedure.name()) {
                return Err(McpError::DuplicateProcedure {
                    name: procedure.name().to_string(),
                });
            }
            registry
                .index
                .insert(procedure.name().to_string(), registry.procedures.len());
            registry.procedures.push(Arc::new(procedure));
        }
        Ok(registry)
    }
}
