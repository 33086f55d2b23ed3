//! Destination addressing: actor ids, the packed handler index and the uid
//! directory used to resolve textual targets into direct references.
use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::wiring::InputPin;

/// Position of an actor in its runtime's actor list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorId(pub(crate) usize);

impl ActorId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

const KIND_SHIFT: u32 = 28;
const INDEX_MASK: u32 = (1 << KIND_SHIFT) - 1;

pub const HANDLER: u32 = 1;
pub const REPLY: u32 = 2;
pub const ROUTER: u32 = 3;

/// Where a queued message goes once it reaches its destination actor:
/// an rx table slot, the reply path, or a filter scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Hix {
    Handler(usize),
    Reply,
    Router(usize),
}

impl Hix {
    pub fn kind(&self) -> u32 {
        match self {
            Hix::Handler(_) => HANDLER,
            Hix::Reply => REPLY,
            Hix::Router(_) => ROUTER,
        }
    }

    pub fn index(&self) -> Option<usize> {
        match self {
            Hix::Handler(idx) | Hix::Router(idx) => Some(*idx),
            Hix::Reply => None,
        }
    }

    /// Top 4 bits kind, low 28 bits table index.
    pub fn pack(&self) -> u32 {
        let idx = self.index().unwrap_or(0) as u32;
        debug_assert!(idx <= INDEX_MASK, "table index {idx} does not fit in a hix");
        (self.kind() << KIND_SHIFT) | (idx & INDEX_MASK)
    }

    pub fn unpack(packed: u32) -> Option<Hix> {
        let idx = (packed & INDEX_MASK) as usize;
        match packed >> KIND_SHIFT {
            HANDLER => Some(Hix::Handler(idx)),
            REPLY => Some(Hix::Reply),
            ROUTER => Some(Hix::Router(idx)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Tables {
    Inputs(Vec<InputPin>),
    Scopes(Vec<String>),
}

#[derive(Debug, Clone)]
pub(crate) struct DirectoryEntry {
    pub id: ActorId,
    pub name: String,
    pub tables: Tables,
}

impl DirectoryEntry {
    /// The hix for `pin` on this actor and whether the destination can
    /// answer a request arriving there.
    pub fn route_to(&self, pin: &str) -> Option<(Hix, bool)> {
        match &self.tables {
            Tables::Inputs(inputs) => inputs
                .iter()
                .position(|rx| rx.pin == pin)
                .map(|idx| (Hix::Handler(idx), inputs[idx].channel)),
            Tables::Scopes(selectors) => selectors
                .iter()
                .position(|s| s == pin)
                .map(|idx| (Hix::Router(idx), true)),
        }
    }
}

/// Read-only snapshot of every actor's uid, name and destination tables,
/// taken once the actor list is complete.
#[derive(Debug, Default)]
pub(crate) struct Directory {
    by_uid: HashMap<String, DirectoryEntry>,
}

impl Directory {
    pub fn insert(&mut self, uid: &str, entry: DirectoryEntry) -> bool {
        if self.by_uid.contains_key(uid) {
            return false;
        }
        self.by_uid.insert(uid.to_string(), entry);
        true
    }

    pub fn get(&self, uid: &str) -> Option<&DirectoryEntry> {
        self.by_uid.get(uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hix_packs_kind_in_top_bits() {
        assert_eq!(Hix::Handler(5).pack(), 0x1000_0005);
        assert_eq!(Hix::Reply.pack(), 0x2000_0000);
        assert_eq!(Hix::Router(0x0FFF_FFFF).pack(), 0x3FFF_FFFF);
    }

    #[test]
    fn hix_unpack_rejects_unknown_kinds() {
        for hix in [Hix::Handler(3), Hix::Reply, Hix::Router(17)] {
            assert_eq!(Hix::unpack(hix.pack()), Some(hix));
        }
        assert_eq!(Hix::unpack(0x0000_0001), None);
        assert_eq!(Hix::unpack(0x4000_0001), None);
    }

    #[test]
    fn directory_routes_inputs_and_scopes() {
        let mut dir = Directory::default();
        let node = DirectoryEntry {
            id: ActorId(0),
            name: "B".into(),
            tables: Tables::Inputs(vec![
                InputPin { pin: "pong".into(), channel: false },
                InputPin { pin: "ask".into(), channel: true },
            ]),
        };
        let filter = DirectoryEntry {
            id: ActorId(1),
            name: "F".into(),
            tables: Tables::Scopes(vec!["route".into()]),
        };
        assert!(dir.insert("b", node.clone()));
        assert!(dir.insert("f", filter));
        assert!(!dir.insert("b", node));

        assert_eq!(dir.get("b").unwrap().route_to("ask"), Some((Hix::Handler(1), true)));
        assert_eq!(dir.get("b").unwrap().route_to("pong"), Some((Hix::Handler(0), false)));
        assert_eq!(dir.get("f").unwrap().route_to("route"), Some((Hix::Router(0), true)));
        assert_eq!(dir.get("f").unwrap().route_to("other"), None);
        assert!(dir.get("missing").is_none());
    }
}
