use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, warn};

use crate::address::{ActorId, Directory, Hix};
use crate::error::WiringError;
use crate::message::Message;
use crate::runtime::Scheduler;
use crate::scaffold::NodeDescriptor;
use crate::tx::Tx;
use crate::wiring::{InputPin, TargetSpec, parse_input, parse_output, pin_to_handler};

/// What a factory gets to look at while building a cell.
#[derive(Debug, Clone, Copy)]
pub struct CellContext<'a> {
    pub name: &'a str,
    pub uid: &'a str,
    /// Static settings from the model.
    pub sx: &'a Value,
    /// Opaque editor extension data, passed through untouched.
    pub dx: &'a Value,
}

/// The live object behind a node.
///
/// A cell answers for a set of handler keys. For an input declared as
/// `-> node comment` the runtime first asks for the literal declaration
/// and then for `onNodeComment`; the first key the cell handles is bound
/// once, when the cell is made.
pub trait Cell {
    fn handles(&self, key: &str) -> bool;

    fn handle(&mut self, key: &str, param: Value, tx: &mut Tx<'_>) -> anyhow::Result<()>;
}

pub type CellFactory = Arc<dyn Fn(&mut Tx<'_>, &CellContext<'_>) -> anyhow::Result<Box<dyn Cell>>>;

type HandlerFn<S> = Box<dyn FnMut(&mut S, Value, &mut Tx<'_>) -> anyhow::Result<()>>;

/// A cell assembled from a state value and an explicit key -> handler map.
///
/// ```rust,ignore
/// let cell = HandlerCell::new(0u32)
///     .on("onPing", |count, _param, tx| {
///         *count += 1;
///         tx.send("pong", json!(*count));
///         Ok(())
///     });
/// ```
pub struct HandlerCell<S> {
    state: S,
    handlers: HashMap<String, HandlerFn<S>>,
}

impl<S> HandlerCell<S> {
    pub fn new(state: S) -> Self {
        Self {
            state,
            handlers: HashMap::new(),
        }
    }

    pub fn on<F>(mut self, key: &str, handler: F) -> Self
    where
        F: FnMut(&mut S, Value, &mut Tx<'_>) -> anyhow::Result<()> + 'static,
    {
        self.handlers.insert(key.to_string(), Box::new(handler));
        self
    }

    pub fn state(&self) -> &S {
        &self.state
    }
}

impl<S> Cell for HandlerCell<S> {
    fn handles(&self, key: &str) -> bool {
        self.handlers.contains_key(key)
    }

    fn handle(&mut self, key: &str, param: Value, tx: &mut Tx<'_>) -> anyhow::Result<()> {
        match self.handlers.get_mut(key) {
            Some(handler) => handler(&mut self.state, param, tx),
            None => Ok(()),
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for HandlerCell<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&String> = self.handlers.keys().collect();
        keys.sort();
        f.debug_struct("HandlerCell")
            .field("state", &self.state)
            .field("handlers", &keys)
            .finish()
    }
}

/// Input table row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RxEntry {
    pub pin: String,
    pub channel: bool,
    pub(crate) handler: Option<String>,
}

impl RxEntry {
    pub fn declaration(&self) -> String {
        InputPin {
            pin: self.pin.clone(),
            channel: self.channel,
        }
        .declaration()
    }

    /// Handler key bound by `make_cell`, `None` when the cell has no match.
    pub fn handler(&self) -> Option<&str> {
        self.handler.as_deref()
    }

    pub fn is_bound(&self) -> bool {
        self.handler.is_some()
    }
}

/// A statically wired destination. Built from the wiring text, resolved
/// once against the directory and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub uid: String,
    pub node: String,
    pub pin: String,
    pub channel: bool,
    declared_channel: bool,
    pub(crate) actor: Option<ActorId>,
    pub(crate) actor_name: Option<String>,
    pub(crate) hix: Option<Hix>,
}

impl Target {
    pub(crate) fn from_spec(spec: &TargetSpec, channel: bool) -> Self {
        Self {
            uid: spec.uid.clone(),
            node: spec.node.clone(),
            pin: spec.pin.clone(),
            channel,
            declared_channel: channel,
            actor: None,
            actor_name: None,
            hix: None,
        }
    }

    pub fn actor(&self) -> Option<ActorId> {
        self.actor
    }

    pub fn hix(&self) -> Option<Hix> {
        self.hix
    }

    /// Name of the resolved actor, or the declared node name before
    /// resolution.
    pub fn name(&self) -> &str {
        self.actor_name.as_deref().unwrap_or(&self.node)
    }

    pub fn is_resolved(&self) -> bool {
        self.actor.is_some() && self.hix.is_some()
    }

    pub(crate) fn matches(&self, name: &str) -> bool {
        self.name().eq_ignore_ascii_case(name)
    }

    pub(crate) fn resolve(&mut self, owner: &str, dir: &Directory) -> Result<(), WiringError> {
        let Some(entry) = dir.get(&self.uid) else {
            self.actor = None;
            self.actor_name = None;
            self.hix = None;
            self.channel = false;
            return Err(WiringError::UnresolvedUid {
                actor: owner.to_string(),
                node: self.node.clone(),
                uid: self.uid.clone(),
            });
        };
        self.actor = Some(entry.id);
        self.actor_name = Some(entry.name.clone());
        match entry.route_to(&self.pin) {
            Some((hix, accepts_reply)) => {
                self.hix = Some(hix);
                self.channel = self.declared_channel && accepts_reply;
                Ok(())
            }
            None => {
                self.hix = None;
                self.channel = false;
                Err(WiringError::UnknownPin {
                    actor: owner.to_string(),
                    node: entry.name.clone(),
                    pin: self.pin.clone(),
                })
            }
        }
    }
}

/// Output table row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxEntry {
    pub pin: String,
    pub channel: bool,
    pub targets: Vec<Target>,
}

pub struct RuntimeNode {
    name: String,
    uid: String,
    factory: CellFactory,
    rx_table: Vec<RxEntry>,
    tx_table: Vec<TxEntry>,
    sx: Value,
    dx: Value,
    cell: Option<Box<dyn Cell>>,
}

impl RuntimeNode {
    /// Builds the rx/tx tables. Declarations that do not parse are left out
    /// and reported.
    pub fn new(desc: NodeDescriptor) -> (Self, Vec<WiringError>) {
        let mut issues = Vec::new();

        let rx_table = desc
            .inputs
            .iter()
            .filter_map(|decl| match parse_input(decl) {
                Some(input) => Some(RxEntry {
                    pin: input.pin,
                    channel: input.channel,
                    handler: None,
                }),
                None => {
                    issues.push(WiringError::Malformed {
                        actor: desc.name.clone(),
                        decl: decl.clone(),
                    });
                    None
                }
            })
            .collect();

        let tx_table = desc
            .outputs
            .iter()
            .filter_map(|decl| match parse_output(decl) {
                Some(output) => Some(TxEntry {
                    targets: output
                        .targets
                        .iter()
                        .map(|spec| Target::from_spec(spec, output.channel))
                        .collect(),
                    pin: output.pin,
                    channel: output.channel,
                }),
                None => {
                    issues.push(WiringError::Malformed {
                        actor: desc.name.clone(),
                        decl: decl.clone(),
                    });
                    None
                }
            })
            .collect();

        for issue in &issues {
            error!("{issue}");
        }

        let node = Self {
            name: desc.name,
            uid: desc.uid,
            factory: desc.factory,
            rx_table,
            tx_table,
            sx: desc.sx,
            dx: desc.dx,
            cell: None,
        };
        (node, issues)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn inputs(&self) -> &[RxEntry] {
        &self.rx_table
    }

    pub fn outputs(&self) -> &[TxEntry] {
        &self.tx_table
    }

    pub fn output(&self, pin: &str) -> Option<&TxEntry> {
        self.tx_table.iter().find(|tx| tx.pin == pin)
    }

    pub fn has_cell(&self) -> bool {
        self.cell.is_some()
    }

    pub(crate) fn input_pins(&self) -> Vec<InputPin> {
        self.rx_table
            .iter()
            .map(|rx| InputPin {
                pin: rx.pin.clone(),
                channel: rx.channel,
            })
            .collect()
    }

    pub(crate) fn tx_surface<'a>(
        &'a self,
        id: ActorId,
        sched: &'a mut Scheduler,
        current: Option<&'a Message>,
    ) -> Tx<'a> {
        Tx::new(id, &self.name, &self.tx_table, sched, current)
    }

    /// Runs the factory and binds every input to a handler key of the new
    /// cell.
    pub(crate) fn make_cell(&mut self, id: ActorId, sched: &mut Scheduler) {
        let factory = Arc::clone(&self.factory);
        let ctx = CellContext {
            name: &self.name,
            uid: &self.uid,
            sx: &self.sx,
            dx: &self.dx,
        };
        let mut tx = Tx::new(id, &self.name, &self.tx_table, sched, None);
        let cell = match factory(&mut tx, &ctx) {
            Ok(cell) => Some(cell),
            Err(err) => {
                error!("{}: factory failed: {err:#}", self.name);
                None
            }
        };

        for rx in &mut self.rx_table {
            rx.handler = cell.as_deref().and_then(|cell| {
                let literal = rx.declaration();
                if cell.handles(&literal) {
                    return Some(literal);
                }
                let method = pin_to_handler(&rx.pin);
                cell.handles(&method).then_some(method)
            });
            if rx.handler.is_none() {
                debug!("{}: no handler for `{}`", self.name, rx.declaration());
            }
        }
        self.cell = cell;
    }

    pub(crate) fn resolve_uids(&mut self, dir: &Directory) -> Vec<WiringError> {
        let mut issues = Vec::new();
        for tx in &mut self.tx_table {
            for target in &mut tx.targets {
                if let Err(err) = target.resolve(&self.name, dir) {
                    error!("{err}");
                    issues.push(err);
                }
            }
        }
        issues
    }

    /// Runs the handler bound to rx slot `idx`. Inputs without a handler
    /// log a warning and drop the message.
    pub(crate) fn deliver(&mut self, idx: usize, msg: &Message, sched: &mut Scheduler) {
        let Some(rx) = self.rx_table.get(idx) else {
            error!("{}: message for rx slot {idx} which does not exist", self.name);
            return;
        };
        let (Some(cell), Some(key)) = (self.cell.as_mut(), rx.handler.as_deref()) else {
            warn!(
                "{}: no handler for input `{}`, message ignored",
                self.name,
                rx.declaration()
            );
            return;
        };
        let mut tx = Tx::new(msg.dest, &self.name, &self.tx_table, sched, Some(msg));
        if let Err(err) = cell.handle(key, msg.param.clone(), &mut tx) {
            error!("{}: handler `{key}` failed: {err:#}", self.name);
        }
    }
}

impl fmt::Debug for RuntimeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeNode")
            .field("name", &self.name)
            .field("uid", &self.uid)
            .field("inputs", &self.rx_table)
            .field("outputs", &self.tx_table)
            .field("has_cell", &self.cell.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{DirectoryEntry, Tables};
    use serde_json::json;

    fn descriptor(inputs: &[&str], outputs: &[&str]) -> NodeDescriptor {
        NodeDescriptor::new("A", "a", Arc::new(|_tx: &mut Tx<'_>, _ctx: &CellContext<'_>| {
            Ok(Box::new(HandlerCell::new(())) as Box<dyn Cell>)
        }))
        .inputs(inputs)
        .outputs(outputs)
    }

    fn directory() -> Directory {
        let mut dir = Directory::default();
        dir.insert(
            "b",
            DirectoryEntry {
                id: ActorId(1),
                name: "B".into(),
                tables: Tables::Inputs(vec![
                    InputPin { pin: "pong".into(), channel: false },
                    InputPin { pin: "ask".into(), channel: true },
                ]),
            },
        );
        dir
    }

    #[test]
    fn builds_tables_and_reports_malformed_declarations() {
        let (node, issues) = RuntimeNode::new(descriptor(
            &["-> go", "=> ask", "nonsense"],
            &["ping -> pong @ B (b)", "-> nope"],
        ));
        assert_eq!(node.inputs().len(), 2);
        assert!(node.inputs()[1].channel);
        assert_eq!(node.outputs().len(), 1);
        assert_eq!(issues.len(), 2);
        assert!(matches!(&issues[0], WiringError::Malformed { decl, .. } if decl == "nonsense"));
    }

    #[test]
    fn resolves_targets_and_is_idempotent() {
        let (mut node, _) = RuntimeNode::new(descriptor(
            &[],
            &["ping -> pong @ B (b)", "ask => ask @ B (b)", "lost -> x @ Gone (zz)"],
        ));
        let dir = directory();
        let issues = node.resolve_uids(&dir);
        assert_eq!(issues.len(), 1);
        assert!(matches!(&issues[0], WiringError::UnresolvedUid { uid, .. } if uid == "zz"));

        let first = node.outputs().to_vec();
        assert_eq!(first[0].targets[0].hix(), Some(Hix::Handler(0)));
        assert!(!first[0].targets[0].channel);
        assert_eq!(first[1].targets[0].hix(), Some(Hix::Handler(1)));
        assert!(first[1].targets[0].channel);
        assert_eq!(first[2].targets[0].actor(), None);

        node.resolve_uids(&dir);
        assert_eq!(node.outputs(), first.as_slice());
    }

    #[test]
    fn channel_needs_a_reply_capable_input() {
        let (mut node, _) = RuntimeNode::new(descriptor(&[], &["ask => pong @ B (b)"]));
        node.resolve_uids(&directory());
        let target = &node.outputs()[0].targets[0];
        assert!(target.is_resolved());
        assert!(!target.channel);
    }

    #[test]
    fn unknown_destination_pin_is_reported() {
        let (mut node, _) = RuntimeNode::new(descriptor(&[], &["ping -> missing @ B (b)"]));
        let issues = node.resolve_uids(&directory());
        assert!(matches!(&issues[0], WiringError::UnknownPin { pin, .. } if pin == "missing"));
        assert!(!node.outputs()[0].targets[0].is_resolved());
    }

    #[test]
    fn make_cell_binds_literal_then_camel_case() {
        let factory: CellFactory = Arc::new(|_tx: &mut Tx<'_>, _ctx: &CellContext<'_>| {
            let cell = HandlerCell::new(())
                .on("=> ask", |_, _, _| Ok(()))
                .on("onNodeComment", |_, _, _| Ok(()));
            Ok(Box::new(cell) as Box<dyn Cell>)
        });
        let desc = NodeDescriptor::new("A", "a", factory).inputs(&["=> ask", "-> node comment", "-> other"]);
        let (mut node, _) = RuntimeNode::new(desc);
        let mut sched = Scheduler::default();
        node.make_cell(ActorId(0), &mut sched);

        assert!(node.has_cell());
        assert_eq!(node.inputs()[0].handler(), Some("=> ask"));
        assert_eq!(node.inputs()[1].handler(), Some("onNodeComment"));
        assert!(!node.inputs()[2].is_bound());
    }

    #[test]
    fn failing_factory_leaves_every_input_unbound() {
        let factory: CellFactory =
            Arc::new(|_tx: &mut Tx<'_>, _ctx: &CellContext<'_>| Err::<Box<dyn Cell>, _>(anyhow::anyhow!("boom")));
        let desc = NodeDescriptor::new("A", "a", factory).inputs(&["-> go"]);
        let (mut node, _) = RuntimeNode::new(desc);
        let mut sched = Scheduler::default();
        node.make_cell(ActorId(0), &mut sched);

        assert!(!node.has_cell());
        assert!(!node.inputs()[0].is_bound());
        // Delivering to it must not panic.
        let msg = Message::new(ActorId(0), ActorId(0), Hix::Handler(0), "go", json!(1));
        node.deliver(0, &msg, &mut sched);
    }

    #[test]
    fn factory_sees_settings() {
        let factory: CellFactory = Arc::new(|_tx: &mut Tx<'_>, ctx: &CellContext<'_>| {
            anyhow::ensure!(ctx.sx["size"] == json!(3), "unexpected settings {}", ctx.sx);
            anyhow::ensure!(ctx.uid == "a");
            Ok(Box::new(HandlerCell::new(())) as Box<dyn Cell>)
        });
        let desc = NodeDescriptor::new("A", "a", factory).sx(json!({"size": 3}));
        let (mut node, _) = RuntimeNode::new(desc);
        node.make_cell(ActorId(0), &mut Scheduler::default());
        assert!(node.has_cell());
    }
}
