//! The surface a handler uses to talk to the rest of the graph.
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::address::ActorId;
use crate::error::{ReplyError, TxError};
use crate::message::Message;
use crate::node::TxEntry;
use crate::resolve_queue::{Reply, ReplyHandle};
use crate::runtime::Scheduler;

/// Borrowed view of one actor's output table plus the scheduler queue.
/// Handed to a cell for the duration of one handler call.
pub struct Tx<'a> {
    actor: ActorId,
    name: &'a str,
    outputs: &'a [TxEntry],
    sched: &'a mut Scheduler,
    current: Option<&'a Message>,
    only: Option<&'a str>,
}

impl<'a> Tx<'a> {
    pub(crate) fn new(
        actor: ActorId,
        name: &'a str,
        outputs: &'a [TxEntry],
        sched: &'a mut Scheduler,
        current: Option<&'a Message>,
    ) -> Self {
        Self {
            actor,
            name,
            outputs,
            sched,
            current,
            only: None,
        }
    }

    /// Name of the actor this handler runs for.
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn actor(&self) -> ActorId {
        self.actor
    }

    /// Pin of the message being handled.
    pub fn pin(&self) -> Option<&str> {
        self.current.map(|msg| msg.pin())
    }

    pub fn message(&self) -> Option<&Message> {
        self.current
    }

    /// Whether the message being handled expects an answer.
    pub fn expects_reply(&self) -> bool {
        self.current.is_some_and(|msg| msg.expects_reply())
    }

    fn output(&self, pin: &str) -> Option<&'a TxEntry> {
        self.outputs.iter().find(|tx| tx.pin == pin)
    }

    /// Fire-and-forget to every live target of `pin`. Returns how many
    /// messages were queued.
    pub fn send(&mut self, pin: &str, param: Value) -> usize {
        let Some(output) = self.output(pin) else {
            warn!("{}: send on undeclared output `{pin}`", self.name);
            return 0;
        };
        let count = self.sched.send_from(self.actor, output, self.only, param);
        if count == 0 {
            debug!("{}: `{pin}` has no live targets", self.name);
        }
        count
    }

    /// Sends `param` on `pin` and returns a handle with one slot per
    /// reply-capable target. A zero timeout uses the runtime default.
    pub fn request(&mut self, pin: &str, param: Value, timeout: Duration) -> ReplyHandle {
        let Some(output) = self.output(pin) else {
            warn!("{}: request on undeclared output `{pin}`", self.name);
            return ReplyHandle::rejected(ReplyError::NoSuchOutputPin {
                pin: pin.to_string(),
            });
        };
        self.sched
            .request_from(self.actor, output, self.only, param, timeout)
    }

    /// Answers the message being handled.
    pub fn reply(&mut self, param: Value) -> Result<(), TxError> {
        let msg = self.requesting_message()?;
        self.sched.reply(self.actor, msg, param);
        Ok(())
    }

    /// Answers the message being handled and waits for the requester to
    /// answer back through [`Tx::reply_to`].
    pub fn next(&mut self, param: Value, timeout: Duration) -> Result<ReplyHandle, TxError> {
        let msg = self.requesting_message()?;
        Ok(self.sched.reply_expecting(self.actor, msg, param, timeout))
    }

    /// Answers a reply produced by [`Tx::next`] on the other side.
    pub fn reply_to(&mut self, reply: &Reply, param: Value) -> Result<(), TxError> {
        if !reply.expects_answer() {
            return Err(TxError::NoFollowUp {
                from: reply.from.clone(),
            });
        }
        self.sched.answer(self.actor, reply, param);
        Ok(())
    }

    /// Puts the message being handled back on the queue for the next tick.
    pub fn reschedule(&mut self) -> Result<(), TxError> {
        let msg = self.current.ok_or(TxError::NoMessage)?;
        self.sched.enqueue(msg.clone());
        Ok(())
    }

    /// Narrows sends and requests to the target called `name`
    /// (case-insensitive).
    pub fn select<'s>(&'s mut self, name: &'s str) -> Tx<'s> {
        Tx {
            actor: self.actor,
            name: self.name,
            outputs: self.outputs,
            sched: &mut *self.sched,
            current: self.current,
            only: Some(name),
        }
    }

    fn requesting_message(&self) -> Result<&'a Message, TxError> {
        let msg = self.current.ok_or(TxError::NoMessage)?;
        if !msg.expects_reply() {
            return Err(TxError::NoReplyExpected {
                pin: msg.pin().to_string(),
            });
        }
        Ok(msg)
    }
}
