use serde_json::Value;

use crate::address::{ActorId, Hix};

/// Correlates a request with its replies. `0` means "none".
pub type TxRef = u64;

pub const NO_REF: TxRef = 0;

/// One queue item. Consumed exactly once by the tick that dispatches it,
/// unless its handler reschedules it.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub(crate) from: ActorId,
    pub(crate) tx_ref: TxRef,
    pub(crate) dest: ActorId,
    pub(crate) rx_ref: TxRef,
    pub(crate) hix: Hix,
    pub(crate) pin: String,
    pub(crate) param: Value,
}

impl Message {
    pub(crate) fn new(from: ActorId, dest: ActorId, hix: Hix, pin: &str, param: Value) -> Self {
        Self {
            from,
            tx_ref: NO_REF,
            dest,
            rx_ref: NO_REF,
            hix,
            pin: pin.to_string(),
            param,
        }
    }

    pub(crate) fn with_tx_ref(mut self, tx_ref: TxRef) -> Self {
        self.tx_ref = tx_ref;
        self
    }

    pub(crate) fn with_rx_ref(mut self, rx_ref: TxRef) -> Self {
        self.rx_ref = rx_ref;
        self
    }

    pub fn from(&self) -> ActorId {
        self.from
    }

    pub fn dest(&self) -> ActorId {
        self.dest
    }

    pub fn hix(&self) -> Hix {
        self.hix
    }

    pub fn pin(&self) -> &str {
        &self.pin
    }

    pub fn param(&self) -> &Value {
        &self.param
    }

    pub fn tx_ref(&self) -> TxRef {
        self.tx_ref
    }

    pub fn rx_ref(&self) -> TxRef {
        self.rx_ref
    }

    /// The sender waits for an answer to this message.
    pub fn expects_reply(&self) -> bool {
        self.tx_ref != NO_REF
    }

    pub fn is_reply(&self) -> bool {
        self.rx_ref != NO_REF
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_creation() {
        let msg = Message::new(ActorId(0), ActorId(1), Hix::Handler(2), "ping", json!({"n": 1}));
        assert_eq!(msg.pin(), "ping");
        assert_eq!(msg.param(), &json!({"n": 1}));
        assert!(!msg.expects_reply());
        assert!(!msg.is_reply());
    }

    #[test]
    fn test_request_and_reply_refs() {
        let request = Message::new(ActorId(0), ActorId(1), Hix::Handler(0), "ask", json!(null))
            .with_tx_ref(7);
        assert!(request.expects_reply());

        let reply = Message::new(ActorId(1), request.from(), Hix::Reply, "ask", json!("yes"))
            .with_rx_ref(request.tx_ref());
        assert!(reply.is_reply());
        assert_eq!(reply.rx_ref(), 7);
        assert_eq!(reply.dest(), ActorId(0));
    }
}
