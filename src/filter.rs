use std::fmt;
use std::mem;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error};

use crate::address::Directory;
use crate::error::WiringError;
use crate::node::{CellContext, Target};
use crate::scaffold::FilterDescriptor;
use crate::wiring::parse_scope;

/// Which of a scope's targets get the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Broadcast to every live target.
    All,
    One(String),
    /// Named targets, delivered in this order.
    Many(Vec<String>),
    Nothing,
}

impl From<&str> for Selection {
    fn from(name: &str) -> Self {
        Selection::One(name.to_string())
    }
}

impl From<Vec<String>> for Selection {
    fn from(names: Vec<String>) -> Self {
        Selection::Many(names)
    }
}

impl From<Option<String>> for Selection {
    fn from(name: Option<String>) -> Self {
        name.map_or(Selection::Nothing, Selection::One)
    }
}

/// Routing decision for messages arriving on a filter scope.
pub trait FilterCell {
    /// `names` are the live targets of the scope, in declaration order.
    fn filter(&mut self, names: &[&str], pin: &str, param: &Value) -> Selection {
        let _ = (names, pin, param);
        Selection::All
    }
}

/// Filter without a cell: every scope broadcasts.
#[derive(Debug, Default, Clone, Copy)]
pub struct Broadcast;

impl FilterCell for Broadcast {}

impl<F> FilterCell for F
where
    F: FnMut(&[&str], &str, &Value) -> Selection,
{
    fn filter(&mut self, names: &[&str], pin: &str, param: &Value) -> Selection {
        self(names, pin, param)
    }
}

pub type FilterFactory = Arc<dyn Fn(&CellContext<'_>) -> anyhow::Result<Box<dyn FilterCell>>>;

/// A filter scope with resolved targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub selector: String,
    pub targets: Vec<Target>,
}

pub struct RuntimeFilter {
    name: String,
    uid: String,
    factory: Option<FilterFactory>,
    scope_table: Vec<Scope>,
    cell: Option<Box<dyn FilterCell>>,
}

impl RuntimeFilter {
    pub fn new(desc: FilterDescriptor) -> (Self, Vec<WiringError>) {
        let mut issues = Vec::new();
        let scope_table = desc
            .table
            .iter()
            .filter_map(|raw| match parse_scope(raw) {
                Some(scope) => Some(Scope {
                    targets: scope
                        .targets
                        .iter()
                        .map(|spec| Target::from_spec(spec, true))
                        .collect(),
                    selector: scope.selector,
                }),
                None => {
                    let issue = WiringError::Malformed {
                        actor: desc.name.clone(),
                        decl: raw.clone(),
                    };
                    error!("{issue}");
                    issues.push(issue);
                    None
                }
            })
            .collect();

        let filter = Self {
            name: desc.name,
            uid: desc.uid,
            factory: desc.filter,
            scope_table,
            cell: None,
        };
        (filter, issues)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn scopes(&self) -> &[Scope] {
        &self.scope_table
    }

    pub fn has_cell(&self) -> bool {
        self.cell.is_some()
    }

    pub(crate) fn selectors(&self) -> Vec<String> {
        self.scope_table.iter().map(|s| s.selector.clone()).collect()
    }

    pub(crate) fn make_cell(&mut self) {
        let Some(factory) = self.factory.as_ref() else {
            self.cell = None;
            return;
        };
        let sx = Value::Null;
        let ctx = CellContext {
            name: &self.name,
            uid: &self.uid,
            sx: &sx,
            dx: &sx,
        };
        self.cell = match factory(&ctx) {
            Ok(cell) => Some(cell),
            Err(err) => {
                error!("{}: filter factory failed, broadcasting: {err:#}", self.name);
                None
            }
        };
    }

    pub(crate) fn resolve_uids(&mut self, dir: &Directory) -> Vec<WiringError> {
        let mut issues = Vec::new();
        for scope in &mut self.scope_table {
            for target in &mut scope.targets {
                if let Err(err) = target.resolve(&self.name, dir) {
                    error!("{err}");
                    issues.push(err);
                }
            }
        }
        issues
    }

    /// The targets of scope `idx` that should receive a message arriving
    /// on `pin`, in delivery order.
    pub(crate) fn route(&mut self, idx: usize, pin: &str, param: &Value) -> Vec<Target> {
        let Some(scope) = self.scope_table.get(idx) else {
            error!("{}: message for scope {idx} which does not exist", self.name);
            return Vec::new();
        };
        let live: Vec<&Target> = scope.targets.iter().filter(|t| t.is_resolved()).collect();

        let selection = match self.cell.as_mut() {
            Some(cell) => {
                let names: Vec<&str> = live.iter().map(|t| t.name()).collect();
                cell.filter(&names, pin, param)
            }
            None => Selection::All,
        };

        match selection {
            Selection::All => live.into_iter().cloned().collect(),
            Selection::Nothing => Vec::new(),
            Selection::One(name) => pick(&self.name, &live, std::slice::from_ref(&name)),
            Selection::Many(names) => pick(&self.name, &live, &names),
        }
    }
}

/// Each live target is picked at most once, however often it is named.
fn pick(filter: &str, live: &[&Target], names: &[String]) -> Vec<Target> {
    let mut taken = vec![false; live.len()];
    names
        .iter()
        .filter_map(|name| {
            let Some(idx) = live.iter().position(|t| t.matches(name)) else {
                debug!("{filter}: selected `{name}` is not a live target");
                return None;
            };
            if mem::replace(&mut taken[idx], true) {
                debug!("{filter}: `{name}` selected more than once");
                return None;
            }
            Some(live[idx].clone())
        })
        .collect()
}

impl fmt::Debug for RuntimeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeFilter")
            .field("name", &self.name)
            .field("uid", &self.uid)
            .field("scopes", &self.scope_table)
            .field("has_cell", &self.cell.is_some())
            .finish()
    }
}
