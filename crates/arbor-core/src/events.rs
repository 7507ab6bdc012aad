//! # Forest Events
//!
//! Change notifications published by the forest to its collaborators
//! (renderers, UI, scripting). Subscribers receive owned [`ForestEvent`]
//! values over a channel and filter them by [`EventKind`].
//!
//! ## Batching
//!
//! Bulk operations suspend delivery. Events raised while suspended are not
//! sent one by one; when the outermost suspension ends a single
//! [`ForestEvent::Batch`] summarizing the suppressed kinds is published.

use crate::{Coordinate, NodeId, SynapseId, TreeId};
use std::collections::BTreeSet;
use std::sync::mpsc::{Receiver, Sender, channel};

/// Every notification the forest can publish.
#[derive(Debug, Clone, PartialEq)]
pub enum ForestEvent {
    // =========================================================================
    // TREES
    // =========================================================================
    TreeAdded(TreeId),
    TreeChanged(TreeId),
    TreeRemoved(TreeId),
    /// All nodes of `absorbed` were moved into `survivor`, which stays.
    TreesMerged { survivor: TreeId, absorbed: TreeId },

    // =========================================================================
    // NODES & SEGMENTS
    // =========================================================================
    NodeAdded(NodeId),
    NodeChanged(NodeId),
    NodeRemoved(NodeId),
    SegmentAdded { source: NodeId, target: NodeId },
    SegmentRemoved { source: NodeId, target: NodeId },

    // =========================================================================
    // SELECTION
    // =========================================================================
    NodeSelectionChanged,
    TreeSelectionChanged,
    ActiveNodeChanged(Option<NodeId>),
    ActiveTreeChanged(Option<TreeId>),
    PositionLockChanged(Option<Coordinate>),

    // =========================================================================
    // BRANCH STACK
    // =========================================================================
    BranchPushed(NodeId),
    BranchPopped(NodeId),

    // =========================================================================
    // PROPERTIES & SYNAPSES
    // =========================================================================
    PropertyCatalogChanged,
    SynapseAdded(SynapseId),
    SynapseRemoved(SynapseId),

    // =========================================================================
    // LIFECYCLE
    // =========================================================================
    /// The forest was cleared or replaced wholesale (e.g. by a fresh load).
    Reset,
    /// Aggregate of everything suppressed during a bulk operation.
    Batch {
        kinds: BTreeSet<EventKind>,
        suppressed: usize,
    },
}

/// Coarse topic of an event, used for subscription filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventKind {
    Tree,
    Node,
    Segment,
    Selection,
    Branch,
    Property,
    Synapse,
    Lifecycle,
}

impl ForestEvent {
    /// Topic of this event.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::TreeAdded(_)
            | Self::TreeChanged(_)
            | Self::TreeRemoved(_)
            | Self::TreesMerged { .. } => EventKind::Tree,
            Self::NodeAdded(_) | Self::NodeChanged(_) | Self::NodeRemoved(_) => EventKind::Node,
            Self::SegmentAdded { .. } | Self::SegmentRemoved { .. } => EventKind::Segment,
            Self::NodeSelectionChanged
            | Self::TreeSelectionChanged
            | Self::ActiveNodeChanged(_)
            | Self::ActiveTreeChanged(_)
            | Self::PositionLockChanged(_) => EventKind::Selection,
            Self::BranchPushed(_) | Self::BranchPopped(_) => EventKind::Branch,
            Self::PropertyCatalogChanged => EventKind::Property,
            Self::SynapseAdded(_) | Self::SynapseRemoved(_) => EventKind::Synapse,
            Self::Reset | Self::Batch { .. } => EventKind::Lifecycle,
        }
    }
}

/// Which event kinds a subscriber wants. An empty filter accepts everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    kinds: BTreeSet<EventKind>,
}

impl EventFilter {
    /// Accept every kind.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Accept only the given kinds (lifecycle events are always delivered).
    #[must_use]
    pub fn only(kinds: impl IntoIterator<Item = EventKind>) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn accepts(&self, event: &ForestEvent) -> bool {
        if self.kinds.is_empty() {
            return true;
        }
        match event {
            ForestEvent::Reset => true,
            ForestEvent::Batch { kinds, .. } => kinds.iter().any(|k| self.kinds.contains(k)),
            other => self.kinds.contains(&other.kind()),
        }
    }
}

struct Subscriber {
    filter: EventFilter,
    sender: Sender<ForestEvent>,
}

/// Publishes events to subscribers and implements the batching discipline.
#[derive(Default)]
pub struct Notifier {
    subscribers: Vec<Subscriber>,
    suspended: usize,
    pending_kinds: BTreeSet<EventKind>,
    pending_count: usize,
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("subscribers", &self.subscriber_count())
            .field("suspended", &self.suspended)
            .field("pending_count", &self.pending_count)
            .finish()
    }
}

/// Subscriptions belong to one forest instance; a copy starts without any.
impl Clone for Notifier {
    fn clone(&self) -> Self {
        Self::default()
    }
}

impl Notifier {
    /// Register a subscriber and return its receiving end.
    pub fn subscribe(&mut self, filter: EventFilter) -> Receiver<ForestEvent> {
        let (sender, receiver) = channel();
        self.subscribers.push(Subscriber { filter, sender });
        receiver
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Publish an event, or record it for the aggregate if delivery is suspended.
    pub fn publish(&mut self, event: ForestEvent) {
        if self.suspended > 0 {
            self.pending_kinds.insert(event.kind());
            self.pending_count += 1;
            return;
        }
        self.deliver(&event);
    }

    /// Suspend delivery. Suspensions nest.
    pub fn suspend(&mut self) {
        self.suspended += 1;
    }

    /// End one suspension; the outermost one flushes the aggregate event.
    pub fn resume(&mut self) {
        self.suspended = self.suspended.saturating_sub(1);
        if self.suspended > 0 || self.pending_count == 0 {
            return;
        }
        let kinds = std::mem::take(&mut self.pending_kinds);
        let suppressed = std::mem::take(&mut self.pending_count);
        self.deliver(&ForestEvent::Batch { kinds, suppressed });
    }

    fn deliver(&mut self, event: &ForestEvent) {
        // Subscribers whose receiver was dropped are pruned on send failure.
        self.subscribers.retain(|subscriber| {
            if !subscriber.filter.accepts(event) {
                return true;
            }
            subscriber.sender.send(event.clone()).is_ok()
        });
    }
}

// =============================================================================
// TESTS
// =============================================================================
