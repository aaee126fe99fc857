//! Rate-shift events: the variable-dimension part of the model state.
//!
//! Mirrors the C++ `BranchEvent` (`model.cpp`): each event carries its own
//! regime parameters so that the branch history can look up "the event
//! currently governing this point on the tree" and read rates straight off
//! it. Diversification and trait-model parameters are kept on
//! the same event type rather than splitting into parallel hierarchies,
//! since a run only ever uses one of the two parameter blocks.

use crate::tree::NodeId;

/// Stable handle into the event arena held by [`crate::model::Model`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(pub u32);

/// Regime parameters for the piecewise birth-death (speciation/extinction)
/// likelihood.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DiversificationParams {
    pub lambda_init: f64,
    pub lambda_shift: f64,
    pub mu_init: f64,
    pub mu_shift: f64,
}

/// Regime parameters for the Brownian-motion-with-shifts trait likelihood,
/// model.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TraitParams {
    pub beta_init: f64,
    pub beta_shift: f64,
}

/// The parameter block an event carries. A run is configured for one
/// likelihood model or the other, never both.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Regime {
    Diversification(DiversificationParams),
    Trait(TraitParams),
}

impl Regime {
    pub fn as_diversification(&self) -> Option<&DiversificationParams> {
        match self {
            Regime::Diversification(p) => Some(p),
            Regime::Trait(_) => None,
        }
    }

    pub fn as_trait(&self) -> Option<&TraitParams> {
        match self {
            Regime::Trait(p) => Some(p),
            Regime::Diversification(_) => None,
        }
    }
}

/// A single rate-shift event, attached to a point on the tree.
#[derive(Clone, Debug, PartialEq)]
pub struct BranchEvent {
    /// The node whose inbound branch this event sits on. For the root
    /// event this is the tree's root node (it has no inbound branch; its
    /// `map_time` is meaningless and never consulted).
    pub attach_node: NodeId,
    /// Cumulative map position of the event on its branch.
    pub map_time: f64,
    pub regime: Regime,
    /// Whether this event's rates are allowed to vary through time. Always
    /// true in the current kernel set: no proposal flips it, but the field
    /// exists so a future kernel can.
    pub is_time_variable: bool,
}

impl BranchEvent {
    pub fn new_root(attach_node: NodeId, regime: Regime) -> Self {
        BranchEvent {
            attach_node,
            map_time: 0.0,
            regime,
            is_time_variable: true,
        }
    }
}

/// The `Model`-owned arena of all live events, including the root event.
/// Slots are reused after removal so ids stay dense-ish without ever being
/// reassigned while still live; iteration walks slots in index order, which
/// is the stable ordered structure the event set needs to be
/// (reproducible generation-to-generation for a fixed RNG stream).
#[derive(Clone, Debug, Default)]
pub struct EventArena {
    slots: Vec<Option<BranchEvent>>,
    free: Vec<u32>,
}

impl EventArena {
    pub fn new() -> Self {
        EventArena::default()
    }

    pub fn insert(&mut self, event: BranchEvent) -> EventId {
        if let Some(idx) = self.free.pop() {
            self.slots[idx as usize] = Some(event);
            EventId(idx)
        } else {
            self.slots.push(Some(event));
            EventId((self.slots.len() - 1) as u32)
        }
    }

    pub fn remove(&mut self, id: EventId) -> BranchEvent {
        let slot = self.slots[id.0 as usize]
            .take()
            .expect("removed an EventId that was not live");
        self.free.push(id.0);
        slot
    }

    pub fn get(&self, id: EventId) -> &BranchEvent {
        self.slots[id.0 as usize]
            .as_ref()
            .expect("looked up an EventId that is not live")
    }

    pub fn get_mut(&mut self, id: EventId) -> &mut BranchEvent {
        self.slots[id.0 as usize]
            .as_mut()
            .expect("looked up an EventId that is not live")
    }

    /// Every live event except `root_event`, in stable index order.
    pub fn non_root_ids(&self, root_event: EventId) -> Vec<EventId> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|_| EventId(i as u32)))
            .filter(|&id| id != root_event)
            .collect()
    }

    pub fn count_non_root(&self, root_event: EventId) -> usize {
        self.non_root_ids(root_event).len()
    }
}
