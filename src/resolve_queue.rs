//! Outstanding request/reply transactions.
//!
//! ```text
//! request:  Tx::request -> ResolveQueue::add(tx_ref, n)      -> ReplyHandle (n slots)
//! reply:    REPLY item  -> ResolveQueue::trigger(rx_ref)     -> next pending slot resolved
//! router:   fan-out != 1 -> ResolveQueue::change_promise_handler(tx_ref, delta)
//! idle:     ResolveQueue::sweep(now)                         -> pending slots rejected
//! ```
//!
//! The runtime side holds a `PromiseHandler`, the requester holds a
//! `ReplyHandle`. Both look at the same `watch` channel of slots, so the
//! requester can poll between ticks or await from a task.
use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::address::ActorId;
use crate::error::ReplyError;
use crate::message::{NO_REF, TxRef};

/// One answer to a request.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Name of the responding actor.
    pub from: String,
    /// Pin the request arrived on at the responder.
    pub pin: String,
    pub param: Value,
    pub(crate) responder: ActorId,
    pub(crate) follow_up: TxRef,
}

impl Reply {
    /// The responder continued the conversation with `next` and waits for
    /// an answer through `Tx::reply_to`.
    pub fn expects_answer(&self) -> bool {
        self.follow_up != NO_REF
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    Pending,
    Resolved(Reply),
    Rejected(ReplyError),
}

impl Slot {
    pub fn is_pending(&self) -> bool {
        matches!(self, Slot::Pending)
    }

    pub fn is_settled(&self) -> bool {
        !self.is_pending()
    }

    pub fn result(&self) -> Option<Result<Reply, ReplyError>> {
        match self {
            Slot::Pending => None,
            Slot::Resolved(reply) => Some(Ok(reply.clone())),
            Slot::Rejected(err) => Some(Err(err.clone())),
        }
    }
}

/// Runtime side of a pending request: N slots fed by one reply stream.
#[derive(Debug)]
pub struct PromiseHandler {
    tx_ref: TxRef,
    slots: watch::Sender<Vec<Slot>>,
}

impl PromiseHandler {
    pub fn new(tx_ref: TxRef, count: usize) -> (Self, ReplyHandle) {
        let (slots, rx) = watch::channel(vec![Slot::Pending; count]);
        (Self { tx_ref, slots }, ReplyHandle { tx_ref, slots: rx })
    }

    pub fn tx_ref(&self) -> TxRef {
        self.tx_ref
    }

    pub fn pending(&self) -> usize {
        self.slots.borrow().iter().filter(|s| s.is_pending()).count()
    }

    /// Settles the first pending slot. Returns false when none is left.
    pub fn resolve_next(&self, reply: Reply) -> bool {
        self.slots.send_if_modified(move |slots| {
            match slots.iter_mut().find(|s| s.is_pending()) {
                Some(slot) => {
                    *slot = Slot::Resolved(reply);
                    true
                }
                None => false,
            }
        })
    }

    pub fn reject_pending(&self, err: &ReplyError) -> usize {
        let mut rejected = 0;
        self.slots.send_if_modified(|slots| {
            for slot in slots.iter_mut().filter(|s| s.is_pending()) {
                *slot = Slot::Rejected(err.clone());
                rejected += 1;
            }
            rejected > 0
        });
        rejected
    }

    /// Grows by `delta` pending slots, or cancels `-delta` of the
    /// still-pending slots, latest first.
    pub fn change_expected(&self, delta: isize) {
        let tx_ref = self.tx_ref;
        self.slots.send_if_modified(|slots| {
            if delta > 0 {
                slots.extend(std::iter::repeat_n(Slot::Pending, delta as usize));
                return true;
            }
            let mut to_cancel = delta.unsigned_abs();
            let mut changed = false;
            for slot in slots.iter_mut().rev() {
                if to_cancel == 0 {
                    break;
                }
                if slot.is_pending() {
                    *slot = Slot::Rejected(ReplyError::Cancelled { tx_ref });
                    to_cancel -= 1;
                    changed = true;
                }
            }
            changed
        });
    }
}

/// Requester side of a pending request.
#[derive(Debug, Clone)]
pub struct ReplyHandle {
    tx_ref: TxRef,
    slots: watch::Receiver<Vec<Slot>>,
}

impl ReplyHandle {
    /// A handle that is already rejected, for requests that never left
    /// the sender.
    pub(crate) fn rejected(err: ReplyError) -> Self {
        let (_, slots) = watch::channel(vec![Slot::Rejected(err)]);
        Self { tx_ref: NO_REF, slots }
    }

    pub fn tx_ref(&self) -> TxRef {
        self.tx_ref
    }

    pub fn len(&self) -> usize {
        self.slots.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn slots(&self) -> Vec<Slot> {
        self.slots.borrow().clone()
    }

    pub fn slot(&self, index: usize) -> Option<Slot> {
        self.slots.borrow().get(index).cloned()
    }

    pub fn pending(&self) -> usize {
        self.slots.borrow().iter().filter(|s| s.is_pending()).count()
    }

    pub fn is_settled(&self) -> bool {
        self.pending() == 0
    }

    /// The outcome of the first slot, if it is settled already.
    pub fn try_first(&self) -> Option<Result<Reply, ReplyError>> {
        self.slots.borrow().first().and_then(Slot::result)
    }

    pub async fn first(&mut self) -> Result<Reply, ReplyError> {
        self.settled(0).await
    }

    /// Waits until slot `index` settles. A slot that can no longer settle
    /// (runtime dropped, index out of range) comes back as `Abandoned`.
    pub async fn settled(&mut self, index: usize) -> Result<Reply, ReplyError> {
        let abandoned = ReplyError::Abandoned { tx_ref: self.tx_ref };
        let outcome = match self
            .slots
            .wait_for(|slots| slots.get(index).is_none_or(Slot::is_settled))
            .await
        {
            Ok(slots) => slots.get(index).and_then(Slot::result),
            Err(_) => None,
        };
        match outcome {
            Some(result) => result,
            None => self
                .slots
                .borrow()
                .get(index)
                .and_then(Slot::result)
                .unwrap_or(Err(abandoned)),
        }
    }

    /// Waits for every slot, in slot order.
    pub async fn all(&mut self) -> Vec<Result<Reply, ReplyError>> {
        let tx_ref = self.tx_ref;
        let _ = self
            .slots
            .wait_for(|slots| slots.iter().all(Slot::is_settled))
            .await;
        self.slots
            .borrow()
            .iter()
            .map(|s| s.result().unwrap_or(Err(ReplyError::Abandoned { tx_ref })))
            .collect()
    }
}

#[derive(Debug)]
struct PendingRequest {
    handler: PromiseHandler,
    start: Instant,
    duration: Duration,
}

/// txRef -> pending request. Entries leave when their last slot settles or
/// when a sweep finds them past their deadline.
#[derive(Debug, Default)]
pub struct ResolveQueue {
    entries: HashMap<TxRef, PendingRequest>,
    last_ref: TxRef,
}

impl ResolveQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_tx_ref(&mut self) -> TxRef {
        self.last_ref = self.last_ref.wrapping_add(1);
        if self.last_ref == NO_REF {
            self.last_ref = 1;
        }
        self.last_ref
    }

    pub fn add(&mut self, tx_ref: TxRef, count: usize, duration: Duration) -> ReplyHandle {
        let (handler, handle) = PromiseHandler::new(tx_ref, count);
        self.entries.insert(
            tx_ref,
            PendingRequest {
                handler,
                start: Instant::now(),
                duration,
            },
        );
        handle
    }

    /// Feeds one reply to the request `rx_ref`.
    pub fn trigger(&mut self, rx_ref: TxRef, reply: Reply) -> bool {
        let Some(entry) = self.entries.get(&rx_ref) else {
            debug!("dropping late reply from {} for request {}", reply.from, rx_ref);
            return false;
        };
        let accepted = entry.handler.resolve_next(reply);
        if entry.handler.pending() == 0 {
            self.entries.remove(&rx_ref);
        }
        accepted
    }

    /// Reconciles the expected reply count of `tx_ref` with a fan-out
    /// decided after the request was sent.
    pub fn change_promise_handler(&mut self, tx_ref: TxRef, delta: isize) {
        if delta == 0 {
            return;
        }
        let Some(entry) = self.entries.get(&tx_ref) else {
            return;
        };
        debug!("request {tx_ref}: expected replies change by {delta}");
        entry.handler.change_expected(delta);
        if entry.handler.pending() == 0 {
            self.entries.remove(&tx_ref);
        }
    }

    /// Rejects and removes every request past its deadline.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let expired: Vec<TxRef> = self
            .entries
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.start) >= entry.duration)
            .map(|(tx_ref, _)| *tx_ref)
            .collect();

        for tx_ref in &expired {
            if let Some(entry) = self.entries.remove(tx_ref) {
                let err = ReplyError::Timeout {
                    tx_ref: *tx_ref,
                    duration: entry.duration,
                };
                warn!("{err}");
                entry.handler.reject_pending(&err);
            }
        }
        expired.len()
    }

    /// Rejects every outstanding request, e.g. when the runtime stops.
    pub fn reject_all(&mut self, reason: impl Fn(TxRef) -> ReplyError) {
        for (tx_ref, entry) in self.entries.drain() {
            entry.handler.reject_pending(&reason(tx_ref));
        }
    }

    /// Pending slot count of `tx_ref`, if it is still outstanding.
    pub fn pending(&self, tx_ref: TxRef) -> Option<usize> {
        self.entries.get(&tx_ref).map(|e| e.handler.pending())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reply(from: &str, param: Value) -> Reply {
        Reply {
            from: from.into(),
            pin: "ask".into(),
            param,
            responder: ActorId(1),
            follow_up: NO_REF,
        }
    }

    #[test]
    fn tx_refs_are_never_zero() {
        let mut queue = ResolveQueue::new();
        assert_eq!(queue.next_tx_ref(), 1);
        queue.last_ref = TxRef::MAX;
        assert_eq!(queue.next_tx_ref(), 1);
    }

    #[test]
    fn replies_fill_slots_in_arrival_order() {
        let mut queue = ResolveQueue::new();
        let tx_ref = queue.next_tx_ref();
        let handle = queue.add(tx_ref, 2, Duration::from_secs(1));

        assert!(queue.trigger(tx_ref, reply("B", json!(1))));
        assert_eq!(handle.try_first().unwrap().unwrap().from, "B");
        assert_eq!(handle.slot(1), Some(Slot::Pending));
        assert_eq!(queue.pending(tx_ref), Some(1));

        assert!(queue.trigger(tx_ref, reply("C", json!(2))));
        assert!(handle.is_settled());
        assert!(queue.is_empty());
        assert!(!queue.trigger(tx_ref, reply("D", json!(3))));
    }

    #[test]
    fn growing_adds_pending_slots() {
        let mut queue = ResolveQueue::new();
        let tx_ref = queue.next_tx_ref();
        let handle = queue.add(tx_ref, 1, Duration::from_secs(1));

        queue.change_promise_handler(tx_ref, 2);
        assert_eq!(handle.len(), 3);
        assert_eq!(queue.pending(tx_ref), Some(3));
    }

    #[test]
    fn shrinking_cancels_latest_pending_slots() {
        let mut queue = ResolveQueue::new();
        let tx_ref = queue.next_tx_ref();
        let handle = queue.add(tx_ref, 3, Duration::from_secs(1));
        queue.trigger(tx_ref, reply("B", json!("b")));

        queue.change_promise_handler(tx_ref, -1);
        let slots = handle.slots();
        assert!(matches!(slots[0], Slot::Resolved(_)));
        assert_eq!(slots[1], Slot::Pending);
        assert_eq!(slots[2], Slot::Rejected(ReplyError::Cancelled { tx_ref }));

        queue.change_promise_handler(tx_ref, -1);
        assert!(handle.is_settled());
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_rejects_expired_requests() {
        let mut queue = ResolveQueue::new();
        let short = queue.next_tx_ref();
        let long = queue.next_tx_ref();
        let short_handle = queue.add(short, 2, Duration::from_millis(10));
        let long_handle = queue.add(long, 1, Duration::from_secs(5));
        queue.trigger(short, reply("B", json!(null)));

        tokio::time::advance(Duration::from_millis(20)).await;
        assert_eq!(queue.sweep(Instant::now()), 1);

        let slots = short_handle.slots();
        assert!(matches!(slots[0], Slot::Resolved(_)));
        assert_eq!(
            slots[1],
            Slot::Rejected(ReplyError::Timeout { tx_ref: short, duration: Duration::from_millis(10) })
        );
        assert!(!long_handle.is_settled());
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn awaiting_a_handle() {
        let mut queue = ResolveQueue::new();
        let tx_ref = queue.next_tx_ref();
        let mut handle = queue.add(tx_ref, 2, Duration::from_secs(1));
        let mut waiter = handle.clone();

        queue.trigger(tx_ref, reply("B", json!("first")));
        assert_eq!(waiter.first().await.unwrap().param, json!("first"));

        queue.reject_all(|tx_ref| ReplyError::Stopped { tx_ref });
        let all = handle.all().await;
        assert!(all[0].is_ok());
        assert_eq!(all[1], Err(ReplyError::Stopped { tx_ref }));
    }

    #[tokio::test]
    async fn dropped_queue_abandons_waiters() {
        let mut queue = ResolveQueue::new();
        let tx_ref = queue.next_tx_ref();
        let mut handle = queue.add(tx_ref, 1, Duration::from_secs(1));
        drop(queue);
        assert_eq!(handle.first().await, Err(ReplyError::Abandoned { tx_ref }));
        assert_eq!(handle.settled(4).await, Err(ReplyError::Abandoned { tx_ref }));
    }

    #[tokio::test]
    async fn rejected_handles_settle_immediately() {
        let mut handle = ReplyHandle::rejected(ReplyError::NoChannel { pin: "ask".into() });
        assert!(handle.is_settled());
        assert_eq!(handle.first().await, Err(ReplyError::NoChannel { pin: "ask".into() }));
    }
}
