//! The scheduler: a double-buffered message queue drained one batch per
//! tick, an adaptive tick delay and the run state machine.
//!
//! ```text
//! start ──> Running ──halt──> Halted ──resume──> Running
//!              │                 │
//!              └──────stop───────┴──> Stopped (pending requests rejected)
//! ```
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::address::{ActorId, Directory, DirectoryEntry, Hix, Tables};
use crate::config::RuntimeConfig;
use crate::error::{ReplyError, WiringError};
use crate::filter::RuntimeFilter;
use crate::message::{Message, NO_REF};
use crate::node::{RuntimeNode, TxEntry};
use crate::resolve_queue::{Reply, ReplyHandle, ResolveQueue};

/// Lifecycle of a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Halted,
    Stopped,
}

/// Tick pacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Regime {
    Fast,
    Slow,
}

pub enum Actor {
    Node(RuntimeNode),
    Filter(RuntimeFilter),
}

impl Actor {
    pub fn name(&self) -> &str {
        match self {
            Actor::Node(node) => node.name(),
            Actor::Filter(filter) => filter.name(),
        }
    }

    pub fn uid(&self) -> &str {
        match self {
            Actor::Node(node) => node.uid(),
            Actor::Filter(filter) => filter.uid(),
        }
    }

    pub fn as_node(&self) -> Option<&RuntimeNode> {
        match self {
            Actor::Node(node) => Some(node),
            Actor::Filter(_) => None,
        }
    }

    pub fn as_filter(&self) -> Option<&RuntimeFilter> {
        match self {
            Actor::Filter(filter) => Some(filter),
            Actor::Node(_) => None,
        }
    }

    fn directory_entry(&self, id: ActorId) -> DirectoryEntry {
        let tables = match self {
            Actor::Node(node) => Tables::Inputs(node.input_pins()),
            Actor::Filter(filter) => Tables::Scopes(filter.selectors()),
        };
        DirectoryEntry {
            id,
            name: self.name().to_string(),
            tables,
        }
    }

    fn resolve_uids(&mut self, dir: &Directory) -> Vec<WiringError> {
        match self {
            Actor::Node(node) => node.resolve_uids(dir),
            Actor::Filter(filter) => filter.resolve_uids(dir),
        }
    }
}

impl std::fmt::Debug for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Actor::Node(node) => std::fmt::Debug::fmt(node, f),
            Actor::Filter(filter) => std::fmt::Debug::fmt(filter, f),
        }
    }
}

/// Queue plus outstanding requests. Everything a handler may touch
/// besides its own tables.
#[derive(Debug)]
pub struct Scheduler {
    queue: Vec<Message>,
    spare: Vec<Message>,
    resolve: ResolveQueue,
    default_timeout: Duration,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(RuntimeConfig::default().default_timeout())
    }
}

impl Scheduler {
    pub(crate) fn new(default_timeout: Duration) -> Self {
        Self {
            queue: Vec::new(),
            spare: Vec::new(),
            resolve: ResolveQueue::new(),
            default_timeout,
        }
    }

    pub(crate) fn enqueue(&mut self, msg: Message) {
        trace!(
            "queue {} -> {} {:?} `{}`",
            msg.from, msg.dest, msg.hix, msg.pin
        );
        self.queue.push(msg);
    }

    /// Swaps the queue with the spare buffer and hands out the batch.
    fn take_batch(&mut self) -> Vec<Message> {
        let batch = mem::replace(&mut self.queue, mem::take(&mut self.spare));
        debug_assert!(self.queue.is_empty());
        batch
    }

    fn recycle(&mut self, mut batch: Vec<Message>) {
        batch.clear();
        self.spare = batch;
    }

    fn clear(&mut self) {
        self.queue.clear();
        self.spare.clear();
    }

    fn timeout_or_default(&self, timeout: Duration) -> Duration {
        if timeout.is_zero() {
            self.default_timeout
        } else {
            timeout
        }
    }

    pub(crate) fn send_from(
        &mut self,
        from: ActorId,
        output: &TxEntry,
        only: Option<&str>,
        param: Value,
    ) -> usize {
        let mut count = 0;
        for target in live_targets(output, only) {
            let (Some(dest), Some(hix)) = (target.actor, target.hix) else {
                continue;
            };
            self.enqueue(Message::new(from, dest, hix, &target.pin, param.clone()));
            count += 1;
        }
        count
    }

    pub(crate) fn request_from(
        &mut self,
        from: ActorId,
        output: &TxEntry,
        only: Option<&str>,
        param: Value,
        timeout: Duration,
    ) -> ReplyHandle {
        let live: Vec<_> = live_targets(output, only).collect();
        if live.is_empty() {
            warn!("request on `{}` has no live targets", output.pin);
            return ReplyHandle::rejected(ReplyError::NotConnected {
                pin: output.pin.clone(),
            });
        }
        let channels = live.iter().filter(|t| t.channel).count();
        if channels == 0 {
            warn!("request on `{}` has no reply-capable target", output.pin);
            return ReplyHandle::rejected(ReplyError::NoChannel {
                pin: output.pin.clone(),
            });
        }

        let tx_ref = self.resolve.next_tx_ref();
        let duration = self.timeout_or_default(timeout);
        let handle = self.resolve.add(tx_ref, channels, duration);
        for target in live {
            let (Some(dest), Some(hix)) = (target.actor, target.hix) else {
                continue;
            };
            let msg = Message::new(from, dest, hix, &target.pin, param.clone());
            self.enqueue(if target.channel {
                msg.with_tx_ref(tx_ref)
            } else {
                msg
            });
        }
        handle
    }

    pub(crate) fn reply(&mut self, from: ActorId, to: &Message, param: Value) {
        self.enqueue(
            Message::new(from, to.from, Hix::Reply, &to.pin, param).with_rx_ref(to.tx_ref),
        );
    }

    /// Reply that carries a fresh request of its own, answered through
    /// `Tx::reply_to`.
    pub(crate) fn reply_expecting(
        &mut self,
        from: ActorId,
        to: &Message,
        param: Value,
        timeout: Duration,
    ) -> ReplyHandle {
        let follow_up = self.resolve.next_tx_ref();
        let duration = self.timeout_or_default(timeout);
        let handle = self.resolve.add(follow_up, 1, duration);
        self.enqueue(
            Message::new(from, to.from, Hix::Reply, &to.pin, param)
                .with_rx_ref(to.tx_ref)
                .with_tx_ref(follow_up),
        );
        handle
    }

    pub(crate) fn answer(&mut self, from: ActorId, reply: &Reply, param: Value) {
        self.enqueue(
            Message::new(from, reply.responder, Hix::Reply, &reply.pin, param)
                .with_rx_ref(reply.follow_up),
        );
    }
}

fn live_targets<'t>(
    output: &'t TxEntry,
    only: Option<&'t str>,
) -> impl Iterator<Item = &'t crate::node::Target> + 't {
    output
        .targets
        .iter()
        .filter(move |t| t.is_resolved() && only.is_none_or(|name| t.matches(name)))
}

/// Clonable switch for a runtime that is driven by [`Runtime::run`].
#[derive(Debug, Clone)]
pub struct RuntimeControl {
    state: Arc<watch::Sender<RunState>>,
}

impl RuntimeControl {
    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    pub fn halt(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == RunState::Running {
                *state = RunState::Halted;
                true
            } else {
                false
            }
        })
    }

    pub fn resume(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == RunState::Halted {
                *state = RunState::Running;
                true
            } else {
                false
            }
        })
    }

    pub fn stop(&self) {
        self.state.send_replace(RunState::Stopped);
    }
}

#[derive(Debug)]
pub struct Runtime {
    actors: Vec<Actor>,
    sched: Scheduler,
    config: RuntimeConfig,
    control: RuntimeControl,
    idle_ticks: u32,
    regime: Regime,
    build_issues: Vec<WiringError>,
    issues: Vec<WiringError>,
    cleaned_up: bool,
}

impl Runtime {
    pub(crate) fn new(actors: Vec<Actor>, config: RuntimeConfig) -> Self {
        let (state, _) = watch::channel(RunState::Idle);
        Self {
            actors,
            sched: Scheduler::new(config.default_timeout()),
            config,
            control: RuntimeControl {
                state: Arc::new(state),
            },
            idle_ticks: 0,
            regime: Regime::Fast,
            build_issues: Vec::new(),
            issues: Vec::new(),
            cleaned_up: true,
        }
    }

    /// Resolves every target against a fresh uid directory. Safe to run
    /// more than once; the result only depends on the actor list.
    pub fn resolve(&mut self) -> &[WiringError] {
        let mut issues = self.build_issues.clone();
        let mut dir = Directory::default();
        for (idx, actor) in self.actors.iter().enumerate() {
            if !dir.insert(actor.uid(), actor.directory_entry(ActorId(idx))) {
                let issue = WiringError::DuplicateUid {
                    uid: actor.uid().to_string(),
                    name: actor.name().to_string(),
                };
                error!("{issue}");
                issues.push(issue);
            }
        }
        for actor in &mut self.actors {
            issues.extend(actor.resolve_uids(&dir));
        }
        self.issues = issues;
        &self.issues
    }

    /// Parse problems found while building the actors. Kept in front of
    /// the resolution issues.
    pub(crate) fn with_build_issues(mut self, issues: Vec<WiringError>) -> Self {
        self.build_issues = issues;
        self
    }

    pub fn wiring_issues(&self) -> &[WiringError] {
        &self.issues
    }

    pub fn actors(&self) -> &[Actor] {
        &self.actors
    }

    pub fn actor_id(&self, uid: &str) -> Option<ActorId> {
        self.actors
            .iter()
            .position(|a| a.uid() == uid)
            .map(ActorId)
    }

    pub fn node(&self, uid: &str) -> Option<&RuntimeNode> {
        self.actors.iter().find(|a| a.uid() == uid)?.as_node()
    }

    pub fn filter(&self, uid: &str) -> Option<&RuntimeFilter> {
        self.actors.iter().find(|a| a.uid() == uid)?.as_filter()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn control(&self) -> RuntimeControl {
        self.control.clone()
    }

    pub fn state(&self) -> RunState {
        self.control.state()
    }

    pub fn regime(&self) -> Regime {
        self.regime
    }

    pub fn idle_ticks(&self) -> u32 {
        self.idle_ticks
    }

    pub fn schedule_delay(&self) -> Duration {
        match self.regime {
            Regime::Fast => self.config.min_delay(),
            Regime::Slow => self.config.max_delay(),
        }
    }

    /// Messages waiting for the next tick.
    pub fn queued(&self) -> usize {
        self.sched.queue.len()
    }

    /// Requests still waiting for at least one reply.
    pub fn pending_requests(&self) -> usize {
        self.sched.resolve.len()
    }

    /// Clears the queues, builds every cell and starts ticking. Cells may
    /// send from their factory; those messages run on the first tick.
    ///
    /// Requests still pending from before the start are rejected with
    /// `Stopped`, since their messages are gone.
    pub fn start(&mut self) {
        // 1) fresh queues
        let pending = self.sched.resolve.len();
        if pending > 0 {
            warn!("restart rejects {pending} pending requests");
            self.sched
                .resolve
                .reject_all(|tx_ref| ReplyError::Stopped { tx_ref });
        }
        self.sched.clear();
        self.idle_ticks = 0;
        self.regime = Regime::Fast;
        self.cleaned_up = false;

        // 2) cells
        for (idx, actor) in self.actors.iter_mut().enumerate() {
            match actor {
                Actor::Node(node) => node.make_cell(ActorId(idx), &mut self.sched),
                Actor::Filter(filter) => filter.make_cell(),
            }
        }

        // 3) run
        self.control.state.send_replace(RunState::Running);
        info!(
            "runtime started with {} actors, {} queued",
            self.actors.len(),
            self.sched.queue.len()
        );
    }

    /// Pauses ticking. Queued messages and pending requests are kept.
    pub fn halt(&mut self) -> bool {
        let halted = self.control.halt();
        if halted {
            info!("runtime halted, {} queued", self.queued());
        }
        halted
    }

    /// Counterpart of [`Runtime::halt`].
    pub fn resume(&mut self) -> bool {
        let resumed = self.control.resume();
        if resumed {
            info!("runtime resumed");
        }
        resumed
    }

    /// Drops queued messages and rejects every pending request.
    pub fn stop(&mut self) {
        self.control.stop();
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.cleaned_up {
            return;
        }
        self.cleaned_up = true;
        let dropped = self.sched.queue.len();
        let pending = self.sched.resolve.len();
        self.sched.clear();
        self.sched
            .resolve
            .reject_all(|tx_ref| ReplyError::Stopped { tx_ref });
        info!("runtime stopped, dropped {dropped} queued messages and {pending} pending requests");
    }

    /// Sends `param` on output `pin` of node `uid`, as if its cell had
    /// sent it. Returns the number of queued messages.
    pub fn post(&mut self, uid: &str, pin: &str, param: Value) -> usize {
        let Some(id) = self.node_id(uid) else {
            return 0;
        };
        let Actor::Node(node) = &self.actors[id.0] else {
            return 0;
        };
        node.tx_surface(id, &mut self.sched, None).send(pin, param)
    }

    /// Requests on output `pin` of node `uid`. Replies settle the returned
    /// handle without running any handler of that node.
    pub fn request_as(
        &mut self,
        uid: &str,
        pin: &str,
        param: Value,
        timeout: Duration,
    ) -> ReplyHandle {
        let not_connected = || {
            ReplyHandle::rejected(ReplyError::NotConnected {
                pin: pin.to_string(),
            })
        };
        let Some(id) = self.node_id(uid) else {
            return not_connected();
        };
        let Actor::Node(node) = &self.actors[id.0] else {
            return not_connected();
        };
        node.tx_surface(id, &mut self.sched, None)
            .request(pin, param, timeout)
    }

    /// Queues `param` straight to input `pin` of node `uid`, with no sender
    /// in the graph.
    pub fn inject(&mut self, uid: &str, pin: &str, param: Value) -> bool {
        let Some(id) = self.node_id(uid) else {
            return false;
        };
        let Some((hix, _)) = self.actors[id.0].directory_entry(id).route_to(pin) else {
            warn!("{} has no input `{pin}`", self.actors[id.0].name());
            return false;
        };
        self.sched.enqueue(Message::new(id, id, hix, pin, param));
        true
    }

    fn node_id(&self, uid: &str) -> Option<ActorId> {
        match self.actor_id(uid) {
            Some(id) if self.actors[id.0].as_node().is_some() => Some(id),
            Some(_) => {
                warn!("`{uid}` is a filter, not a node");
                None
            }
            None => {
                warn!("no actor with uid `{uid}`");
                None
            }
        }
    }

    /// Runs one batch. Returns the number of messages dispatched.
    pub fn tick(&mut self) -> usize {
        match self.state() {
            RunState::Running => {}
            RunState::Stopped => {
                self.shutdown();
                return 0;
            }
            RunState::Idle | RunState::Halted => return 0,
        }

        if self.sched.queue.is_empty() {
            self.idle_tick();
            return 0;
        }

        self.idle_ticks = 0;
        if self.regime == Regime::Slow {
            debug!("work arrived, back to fast ticks");
            self.regime = Regime::Fast;
        }

        let batch = self.sched.take_batch();
        let count = batch.len();
        for msg in &batch {
            self.dispatch(msg);
        }
        self.sched.recycle(batch);
        trace!("tick dispatched {count} messages");
        count
    }

    fn idle_tick(&mut self) {
        self.idle_ticks = self.idle_ticks.saturating_add(1);
        if self.regime == Regime::Fast && self.idle_ticks >= self.config.idle_threshold {
            debug!("{} idle ticks, slowing down", self.idle_ticks);
            self.regime = Regime::Slow;
        }
        let expired = self.sched.resolve.sweep(Instant::now());
        if expired > 0 {
            debug!("{expired} requests timed out");
        }
    }

    fn dispatch(&mut self, msg: &Message) {
        match msg.hix {
            Hix::Handler(idx) => self.deliver(idx, msg),
            Hix::Reply => self.settle(msg),
            Hix::Router(idx) => self.route(idx, msg),
        }
    }

    fn deliver(&mut self, idx: usize, msg: &Message) {
        match self.actors.get_mut(msg.dest.0) {
            Some(Actor::Node(node)) => node.deliver(idx, msg, &mut self.sched),
            Some(Actor::Filter(filter)) => {
                error!("{}: handler message for a filter", filter.name());
            }
            None => error!("message for unknown actor {}", msg.dest),
        }
    }

    fn settle(&mut self, msg: &Message) {
        let from = self
            .actors
            .get(msg.from.0)
            .map(|a| a.name().to_string())
            .unwrap_or_default();
        let reply = Reply {
            from,
            pin: msg.pin.clone(),
            param: msg.param.clone(),
            responder: msg.from,
            follow_up: msg.tx_ref,
        };
        self.sched.resolve.trigger(msg.rx_ref, reply);
    }

    fn route(&mut self, idx: usize, msg: &Message) {
        let chosen = match self.actors.get_mut(msg.dest.0) {
            Some(Actor::Filter(filter)) => filter.route(idx, &msg.pin, &msg.param),
            Some(Actor::Node(node)) => {
                error!("{}: router message for a node", node.name());
                return;
            }
            None => {
                error!("message for unknown actor {}", msg.dest);
                return;
            }
        };

        if msg.tx_ref != NO_REF {
            let channels = chosen.iter().filter(|t| t.channel).count() as isize;
            self.sched
                .resolve
                .change_promise_handler(msg.tx_ref, channels - 1);
        }

        for target in chosen {
            let (Some(dest), Some(hix)) = (target.actor, target.hix) else {
                continue;
            };
            let mut forward = Message::new(msg.from, dest, hix, &target.pin, msg.param.clone());
            if target.channel {
                forward = forward.with_tx_ref(msg.tx_ref);
            }
            match hix {
                // Handlers behind a filter run in the same tick.
                Hix::Handler(rx) => self.deliver(rx, &forward),
                _ => self.sched.enqueue(forward),
            }
        }
    }

    /// Ticks until stopped, sleeping `schedule_delay()` between ticks and
    /// parking while halted.
    pub async fn run(&mut self) {
        if self.state() == RunState::Idle {
            self.start();
        }
        let mut state = self.control.state.subscribe();
        loop {
            let current = *state.borrow_and_update();
            match current {
                RunState::Stopped => {
                    self.shutdown();
                    break;
                }
                RunState::Halted | RunState::Idle => {
                    if state.changed().await.is_err() {
                        break;
                    }
                }
                RunState::Running => {
                    self.tick();
                    tokio::select! {
                        _ = tokio::time::sleep(self.schedule_delay()) => {}
                        changed = state.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        }
        info!("runtime loop finished");
    }
}
