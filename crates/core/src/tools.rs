//! Tool Dispatch Registry
//!
//! The registry maps a tool name to an asynchronous handler. It is built once
//! at startup from a list of declarations and is read-only afterwards, so a
//! single instance can be shared by every session behind an `Arc`.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::{collections::HashMap, fmt, future::Future, marker::PhantomData, sync::Arc};

/// A failure reported by a tool handler.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ToolError {
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("{0}")]
    Failed(String),
}

/// A problem with the declarations a registry is built from.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("tool name must not be empty")]
    EmptyName,
    #[error("tool `{0}` is declared more than once")]
    Duplicate(String),
}

/// The public description of a tool, as announced to the voice provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the parameters object.
    pub input_schema: Value,
}

/// Executes one tool.
///
/// Handlers are invoked concurrently, possibly several at once for the same
/// session, and must not assume any ordering between calls.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Runs the tool for `session_id` with already-parsed `parameters`.
    ///
    /// # Returns
    ///
    /// The value to report back to the provider, or a descriptive error.
    async fn call(&self, session_id: &str, parameters: Value) -> Result<Value, ToolError>;
}

/// A tool as it is declared at startup: its spec plus the code that runs it.
pub struct ToolDeclaration {
    pub spec: ToolSpec,
    pub handler: Arc<dyn ToolHandler>,
}

impl ToolDeclaration {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: impl ToolHandler + 'static,
    ) -> Self {
        Self {
            spec: ToolSpec {
                name: name.into(),
                description: description.into(),
                input_schema,
            },
            handler: Arc::new(handler),
        }
    }

    /// Declares a tool whose parameters are described by a typed struct.
    ///
    /// The input schema is derived from `A`, and the raw parameters are
    /// deserialized into `A` before `f` runs; a mismatch is reported as
    /// [`ToolError::InvalidParameters`] without calling `f`.
    pub fn typed<A, F, Fut>(name: impl Into<String>, description: impl Into<String>, f: F) -> Self
    where
        A: DeserializeOwned + JsonSchema + Send + 'static,
        F: Fn(String, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        let input_schema = Value::from(schemars::schema_for!(A));
        Self::new(
            name,
            description,
            input_schema,
            TypedHandler {
                f,
                _args: PhantomData,
            },
        )
    }
}

struct TypedHandler<A, F> {
    f: F,
    _args: PhantomData<fn() -> A>,
}

#[async_trait]
impl<A, F, Fut> ToolHandler for TypedHandler<A, F>
where
    A: DeserializeOwned + Send + 'static,
    F: Fn(String, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
{
    async fn call(&self, session_id: &str, parameters: Value) -> Result<Value, ToolError> {
        let args: A = serde_json::from_value(parameters)
            .map_err(|e| ToolError::InvalidParameters(e.to_string()))?;
        (self.f)(session_id.to_string(), args).await
    }
}

/// An immutable name → handler map.
#[derive(Default)]
pub struct ToolRegistry {
    declarations: Vec<ToolDeclaration>,
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Builds the registry, rejecting empty and duplicate names.
    pub fn build(
        declarations: impl IntoIterator<Item = ToolDeclaration>,
    ) -> Result<Self, RegistryError> {
        let mut registry = Self::default();
        for declaration in declarations {
            let name = declaration.spec.name.clone();
            if name.is_empty() {
                return Err(RegistryError::EmptyName);
            }
            if registry.by_name.contains_key(&name) {
                return Err(RegistryError::Duplicate(name));
            }
            registry
                .by_name
                .insert(name, registry.declarations.len());
            registry.declarations.push(declaration);
        }
        Ok(registry)
    }

    /// Case-sensitive exact-match lookup.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.by_name
            .get(name)
            .map(|&index| self.declarations[index].handler.clone())
    }

    /// Specs in declaration order.
    pub fn specs(&self) -> impl Iterator<Item = &ToolSpec> {
        self.declarations.iter().map(|d| &d.spec)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.declarations.len()
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.declarations.iter().map(|d| &d.spec.name))
            .finish()
    }
}
