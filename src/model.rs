//! Serde form of a compiled graph and the registry that maps its factory
//! names to code.
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::config::RuntimeConfig;
use crate::error::{ModelError, WiringError};
use crate::filter::FilterFactory;
use crate::node::{Cell, CellContext, CellFactory, HandlerCell};
use crate::runtime::Runtime;
use crate::scaffold::{FilterDescriptor, NodeDescriptor, scaffold_with};
use crate::tx::Tx;

/// Graph as produced by the model compiler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GraphModel {
    #[serde(default)]
    pub nodes: Vec<NodeModel>,
    #[serde(default)]
    pub filters: Vec<FilterModel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NodeModel {
    pub name: String,
    pub uid: String,
    /// Key in the [`CellRegistry`].
    pub factory: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub sx: Value,
    #[serde(default)]
    pub dx: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FilterModel {
    pub name: String,
    pub uid: String,
    /// Key in the [`CellRegistry`]. Broadcasts when absent.
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub table: Vec<String>,
}

/// Name -> factory lookup for models.
#[derive(Clone, Default)]
pub struct CellRegistry {
    cells: HashMap<String, CellFactory>,
    filters: HashMap<String, FilterFactory>,
}

impl CellRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cell(mut self, name: &str, factory: CellFactory) -> Self {
        self.cells.insert(name.to_string(), factory);
        self
    }

    pub fn with_filter(mut self, name: &str, factory: FilterFactory) -> Self {
        self.filters.insert(name.to_string(), factory);
        self
    }

    pub fn cell(&self, name: &str) -> Option<CellFactory> {
        self.cells.get(name).cloned()
    }

    pub fn filter(&self, name: &str) -> Option<FilterFactory> {
        self.filters.get(name).cloned()
    }
}

impl std::fmt::Debug for CellRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut cells: Vec<&String> = self.cells.keys().collect();
        let mut filters: Vec<&String> = self.filters.keys().collect();
        cells.sort();
        filters.sort();
        f.debug_struct("CellRegistry")
            .field("cells", &cells)
            .field("filters", &filters)
            .finish()
    }
}

impl GraphModel {
    pub fn from_json_str(raw: &str) -> Result<Self, ModelError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let raw = fs::read_to_string(path)?;
        let model = Self::from_json_str(&raw)?;
        info!(
            "loaded model {} ({} nodes, {} filters)",
            path.display(),
            model.nodes.len(),
            model.filters.len()
        );
        Ok(model)
    }

    /// JSON schema of the model format.
    pub fn schema() -> Result<Value, ModelError> {
        Ok(serde_json::to_value(schema_for!(GraphModel))?)
    }

    /// Builds a runtime, looking every factory up in `registry`.
    pub fn scaffold(
        &self,
        registry: &CellRegistry,
        config: RuntimeConfig,
    ) -> Result<Runtime, ModelError> {
        let nodes = self
            .nodes
            .iter()
            .map(|node| {
                let factory =
                    registry
                        .cell(&node.factory)
                        .ok_or_else(|| ModelError::UnknownFactory {
                            node: node.name.clone(),
                            factory: node.factory.clone(),
                        })?;
                Ok(node.descriptor(factory))
            })
            .collect::<Result<Vec<_>, ModelError>>()?;

        let filters = self
            .filters
            .iter()
            .map(|filter| {
                let factory = match &filter.filter {
                    Some(name) => Some(registry.filter(name).ok_or_else(|| {
                        ModelError::UnknownFilter {
                            node: filter.name.clone(),
                            filter: name.clone(),
                        }
                    })?),
                    None => None,
                };
                Ok(filter.descriptor(factory))
            })
            .collect::<Result<Vec<_>, ModelError>>()?;

        Ok(scaffold_with(nodes, filters, config))
    }

    /// Parses and resolves the wiring with inert cells. No factory runs.
    pub fn check(&self) -> Vec<WiringError> {
        let inert: CellFactory = Arc::new(|_tx: &mut Tx<'_>, _ctx: &CellContext<'_>| {
            Ok(Box::new(HandlerCell::new(())) as Box<dyn Cell>)
        });
        let nodes = self
            .nodes
            .iter()
            .map(|node| node.descriptor(Arc::clone(&inert)))
            .collect();
        let filters = self.filters.iter().map(|f| f.descriptor(None)).collect();
        scaffold_with(nodes, filters, RuntimeConfig::default())
            .wiring_issues()
            .to_vec()
    }
}

impl NodeModel {
    fn descriptor(&self, factory: CellFactory) -> NodeDescriptor {
        NodeDescriptor {
            name: self.name.clone(),
            uid: self.uid.clone(),
            factory,
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
            sx: self.sx.clone(),
            dx: self.dx.clone(),
        }
    }
}

impl FilterModel {
    fn descriptor(&self, filter: Option<FilterFactory>) -> FilterDescriptor {
        FilterDescriptor {
            name: self.name.clone(),
            uid: self.uid.clone(),
            filter,
            table: self.table.clone(),
        }
    }
}
