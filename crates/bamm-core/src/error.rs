use crate::tree::NodeId;
use thiserror::Error;

/// Internal-logic-bug class of failure: these indicate a
/// broken invariant in the core itself, not a problem with user input or a
/// proposal that should simply be rejected. The driver treats all of these
/// as fatal.
#[derive(Debug, Error, PartialEq)]
pub enum ModelError {
    #[error("forward-propagation reached node {0:?} with no parent below the root")]
    OrphanNodeBelowRoot(NodeId),

    #[error("event {0:?} referenced a node not present in the tree arena")]
    UnknownNode(NodeId),

    #[error("attempted to detach event {0:?} from a branch history that did not contain it")]
    EventNotOnBranch(crate::event::EventId),

    #[error("attempted to delete the sentinel root event")]
    CannotDeleteRootEvent,

    #[error("the event set is empty; no event available to choose")]
    NoEventsAvailable,
}
