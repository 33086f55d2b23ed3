//! Builds a runtime from node and filter descriptors: actors first, then
//! the uid directory, then target resolution.
use serde_json::Value;
use tracing::info;

use crate::config::RuntimeConfig;
use crate::filter::{FilterFactory, RuntimeFilter};
use crate::node::{CellFactory, RuntimeNode};
use crate::runtime::{Actor, Runtime};

/// Everything needed to build one node.
#[derive(Clone)]
pub struct NodeDescriptor {
    pub name: String,
    pub uid: String,
    pub factory: CellFactory,
    /// `-> pin` / `=> pin`
    pub inputs: Vec<String>,
    /// `pin -> target @ node (uid)` and friends.
    pub outputs: Vec<String>,
    pub sx: Value,
    pub dx: Value,
}

impl NodeDescriptor {
    pub fn new(name: &str, uid: &str, factory: CellFactory) -> Self {
        Self {
            name: name.to_string(),
            uid: uid.to_string(),
            factory,
            inputs: Vec::new(),
            outputs: Vec::new(),
            sx: Value::Null,
            dx: Value::Null,
        }
    }

    pub fn inputs(mut self, inputs: &[&str]) -> Self {
        self.inputs = inputs.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn outputs(mut self, outputs: &[&str]) -> Self {
        self.outputs = outputs.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn sx(mut self, sx: Value) -> Self {
        self.sx = sx;
        self
    }

    pub fn dx(mut self, dx: Value) -> Self {
        self.dx = dx;
        self
    }
}

impl std::fmt::Debug for NodeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeDescriptor")
            .field("name", &self.name)
            .field("uid", &self.uid)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish_non_exhaustive()
    }
}

/// Everything needed to build one filter. Without a `filter` factory the
/// filter broadcasts.
#[derive(Clone)]
pub struct FilterDescriptor {
    pub name: String,
    pub uid: String,
    pub filter: Option<FilterFactory>,
    /// `selector: "target" "target" ...`
    pub table: Vec<String>,
}

impl FilterDescriptor {
    pub fn new(name: &str, uid: &str) -> Self {
        Self {
            name: name.to_string(),
            uid: uid.to_string(),
            filter: None,
            table: Vec::new(),
        }
    }

    pub fn filter(mut self, filter: FilterFactory) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn table(mut self, table: &[&str]) -> Self {
        self.table = table.iter().map(|s| s.to_string()).collect();
        self
    }
}

impl std::fmt::Debug for FilterDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterDescriptor")
            .field("name", &self.name)
            .field("uid", &self.uid)
            .field("table", &self.table)
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

/// [`scaffold_with`] using the default configuration.
pub fn scaffold(nodes: Vec<NodeDescriptor>, filters: Vec<FilterDescriptor>) -> Runtime {
    scaffold_with(nodes, filters, RuntimeConfig::default())
}

/// Builds every actor, resolves every target and returns the runtime,
/// not yet started. Wiring problems are logged and collected in
/// [`Runtime::wiring_issues`]; they never abort the build.
pub fn scaffold_with(
    nodes: Vec<NodeDescriptor>,
    filters: Vec<FilterDescriptor>,
    config: RuntimeConfig,
) -> Runtime {
    let mut actors = Vec::with_capacity(nodes.len() + filters.len());
    let mut issues = Vec::new();

    // 1) actors, nodes before filters
    for desc in nodes {
        let (node, found) = RuntimeNode::new(desc);
        issues.extend(found);
        actors.push(Actor::Node(node));
    }
    for desc in filters {
        let (filter, found) = RuntimeFilter::new(desc);
        issues.extend(found);
        actors.push(Actor::Filter(filter));
    }

    // 2) directory + resolution
    let mut runtime = Runtime::new(actors, config).with_build_issues(issues);
    let unresolved = runtime.resolve().len();

    info!(
        "scaffolded {} actors with {unresolved} wiring issues",
        runtime.actors().len()
    );
    runtime
}
