use std::time::Duration;

use thiserror::Error;

use crate::message::TxRef;

/// Why a reply slot was rejected. Every runtime-time failure of a request
/// reaches the requesting handler through one of these, never as a panic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplyError {
    #[error("output pin `{pin}` is not connected")]
    NotConnected { pin: String },

    #[error("no such output pin `{pin}`")]
    NoSuchOutputPin { pin: String },

    #[error("no reply-capable target on output pin `{pin}`")]
    NoChannel { pin: String },

    #[error("no reply to request {tx_ref} within {duration:?}")]
    Timeout { tx_ref: TxRef, duration: Duration },

    #[error("request {tx_ref} no longer expects this reply")]
    Cancelled { tx_ref: TxRef },

    #[error("runtime stopped before request {tx_ref} was answered")]
    Stopped { tx_ref: TxRef },

    #[error("reply slot of request {tx_ref} was abandoned")]
    Abandoned { tx_ref: TxRef },
}

/// Problems found while building and resolving the graph. These are logged
/// and collected; the runtime keeps going with the affected links dead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WiringError {
    #[error("{actor}: cannot parse pin declaration `{decl}`")]
    Malformed { actor: String, decl: String },

    #[error("{actor}: target `{node}` with uid `{uid}` does not exist")]
    UnresolvedUid {
        actor: String,
        node: String,
        uid: String,
    },

    #[error("{actor}: `{node}` has no input or scope named `{pin}`")]
    UnknownPin {
        actor: String,
        node: String,
        pin: String,
    },

    #[error("duplicate uid `{uid}` ({name}), keeping the first actor")]
    DuplicateUid { uid: String, name: String },
}

/// Misuse of the tx surface from inside a handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxError {
    #[error("not handling a message")]
    NoMessage,

    #[error("message on `{pin}` does not expect a reply")]
    NoReplyExpected { pin: String },

    #[error("reply from `{from}` does not accept an answer")]
    NoFollowUp { from: String },
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("could not read model: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid model: {0}")]
    Json(#[from] serde_json::Error),

    #[error("node `{node}` uses unknown factory `{factory}`")]
    UnknownFactory { node: String, factory: String },

    #[error("filter `{node}` uses unknown filter `{filter}`")]
    UnknownFilter { node: String, filter: String },
}
