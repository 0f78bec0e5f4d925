//! Tool descriptors, catalogs and tool call errors.

mod error;
mod executor;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use toolloop_model::ModelTool;

pub use error::{Error, ErrorKind};
pub(crate) use executor::Executor;

/// The result of a tool call: the server's payload, or why it failed.
pub type ToolResult = Result<Value, Error>;

/// Describes a tool exposed by a tool server.
///
/// Tools are discovered at runtime, so this is plain data rather than a
/// type per tool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// The name, unique within a catalog.
    pub name: String,
    /// Free-text description shown to the model.
    pub description: String,
    /// JSON schema of the accepted arguments.
    pub input_schema: Value,
}

impl ToolDescriptor {
    /// Returns the definition passed to the model provider.
    #[inline]
    pub fn definition(&self) -> ModelTool {
        ModelTool {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.input_schema.clone(),
        }
    }
}

/// The set of tools discovered from a tool server for one session.
#[derive(Clone, Debug, Default)]
pub struct ToolCatalog {
    tools: Vec<ToolDescriptor>,
    index: HashMap<String, usize>,
}

impl ToolCatalog {
    /// Builds a catalog, keeping the server's listing order.
    ///
    /// Fails with a description of the first offending entry if a name is
    /// empty or listed twice.
    pub fn new(tools: Vec<ToolDescriptor>) -> Result<Self, String> {
        let mut index = HashMap::with_capacity(tools.len());
        for (idx, tool) in tools.iter().enumerate() {
            if tool.name.is_empty() {
                return Err(format!("tool #{idx} has an empty name"));
            }
            if index.insert(tool.name.clone(), idx).is_some() {
                return Err(format!("tool `{}` is listed twice", tool.name));
            }
        }
        Ok(Self { tools, index })
    }

    /// Looks up a tool by name.
    #[inline]
    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.index.get(name).map(|&idx| &self.tools[idx])
    }

    /// Returns `true` if the catalog has a tool with this name.
    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Iterates the tools in listing order.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.iter()
    }

    /// Returns the tools as a slice, in listing order.
    #[inline]
    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    /// Returns the number of tools.
    #[inline]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns `true` if the server exposes no tools.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Returns the definitions passed to the model provider.
    #[inline]
    pub fn definitions(&self) -> Vec<ModelTool> {
        self.tools.iter().map(ToolDescriptor::definition).collect()
    }
}
