//! # Synapse Registry
//!
//! A synapse relates a pre-synaptic node, a post-synaptic node and the tree
//! annotating the synaptic cleft. The relation is held here; participants
//! only carry its ID plus mirrored properties naming the cleft tree.

use crate::events::ForestEvent;
use crate::forest::Forest;
use crate::primitives::{POST_SYNAPSE_PROPERTY, PRE_SYNAPSE_PROPERTY, SYNAPTIC_CLEFT_PROPERTY};
use crate::{ArborError, EntityKind, NodeId, Properties, PropertyValue, SynapseId, TreeId};

/// Pre-synaptic node, post-synaptic node and cleft tree of one synapse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Synapse {
    pub(crate) id: SynapseId,
    pub(crate) cleft: TreeId,
    pub(crate) pre: Option<NodeId>,
    pub(crate) post: Option<NodeId>,
}

impl Synapse {
    #[must_use]
    pub fn id(&self) -> SynapseId {
        self.id
    }

    #[must_use]
    pub fn cleft(&self) -> TreeId {
        self.cleft
    }

    /// The pre-synaptic node, `None` once it was deleted.
    #[must_use]
    pub fn pre(&self) -> Option<NodeId> {
        self.pre
    }

    #[must_use]
    pub fn post(&self) -> Option<NodeId> {
        self.post
    }
}

impl Forest {
    #[must_use]
    pub fn find_synapse_by_id(&self, id: SynapseId) -> Option<&Synapse> {
        self.synapses.get(&id)
    }

    /// Relate `pre` and `post` through a cleft tree.
    ///
    /// Without `cleft` a new tree is created for it. Nodes and trees take
    /// part in at most one synapse.
    pub fn add_synapse(
        &mut self,
        pre: NodeId,
        post: NodeId,
        cleft: Option<TreeId>,
    ) -> Result<SynapseId, ArborError> {
        if pre == post {
            return Err(ArborError::InvariantViolation(format!(
                "node {} cannot be pre- and post-synaptic at once",
                pre
            )));
        }
        self.link_synapse(Some(pre), Some(post), cleft)
    }

    /// Create a synapse with any subset of participants.
    pub(crate) fn link_synapse(
        &mut self,
        pre: Option<NodeId>,
        post: Option<NodeId>,
        cleft: Option<TreeId>,
    ) -> Result<SynapseId, ArborError> {
        for node in pre.iter().chain(post.iter()) {
            let record = self
                .find_node_by_id(*node)
                .ok_or(ArborError::missing_node(*node))?;
            if record.is_synaptic_node() {
                return Err(ArborError::InvariantViolation(format!(
                    "node {} already takes part in a synapse",
                    node
                )));
            }
        }
        if let Some(cleft) = cleft {
            let tree = self
                .find_tree_by_id(cleft)
                .ok_or(ArborError::missing_tree(cleft))?;
            if tree.is_synaptic_cleft() {
                return Err(ArborError::InvariantViolation(format!(
                    "tree {} already annotates a synaptic cleft",
                    cleft
                )));
            }
        }

        let cleft = match cleft {
            Some(cleft) => cleft,
            None => self.add_tree(None, None, Properties::new())?,
        };
        let id = self.allocate_synapse_id();

        let tree = self.tree_mut(cleft)?;
        tree.is_synaptic_cleft = true;
        tree.synapse = Some(id);
        tree.properties.insert(
            SYNAPTIC_CLEFT_PROPERTY.to_string(),
            PropertyValue::text("true"),
        );
        let mirror = PropertyValue::Number(cleft.0 as f64);
        for (node, property) in [(pre, PRE_SYNAPSE_PROPERTY), (post, POST_SYNAPSE_PROPERTY)] {
            if let Some(node) = node {
                let node = self.node_mut(node)?;
                node.is_synaptic_node = true;
                node.synapse = Some(id);
                node.properties.insert(property.to_string(), mirror.clone());
            }
        }

        self.synapses.insert(
            id,
            Synapse {
                id,
                cleft,
                pre,
                post,
            },
        );
        self.notifier.publish(ForestEvent::SynapseAdded(id));
        Ok(id)
    }

    /// Dissolve a synapse. Its cleft tree and nodes stay in the forest.
    pub fn del_synapse(&mut self, id: SynapseId) -> Result<(), ArborError> {
        if !self.synapses.contains_key(&id) {
            return Err(ArborError::InvalidReference {
                kind: EntityKind::Synapse,
                id: id.0,
            });
        }
        self.detach_synapse(id);
        Ok(())
    }

    /// Remove a synapse record and its mirrors. Missing participants are skipped.
    pub(crate) fn detach_synapse(&mut self, id: SynapseId) {
        let Some(synapse) = self.synapses.remove(&id) else {
            return;
        };
        if let Some(tree) = self.trees.get_mut(&synapse.cleft) {
            tree.is_synaptic_cleft = false;
            tree.synapse = None;
            tree.properties.remove(SYNAPTIC_CLEFT_PROPERTY);
        }
        for node in synapse.pre.iter().chain(synapse.post.iter()) {
            self.clear_synaptic_node(*node);
        }
        self.notifier.publish(ForestEvent::SynapseRemoved(id));
    }

    /// Forget `node` as a participant of `id`.
    pub(crate) fn unlink_synaptic_node(&mut self, id: SynapseId, node: NodeId) {
        if let Some(synapse) = self.synapses.get_mut(&id) {
            if synapse.pre == Some(node) {
                synapse.pre = None;
            }
            if synapse.post == Some(node) {
                synapse.post = None;
            }
        }
        self.clear_synaptic_node(node);
    }

    fn clear_synaptic_node(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.is_synaptic_node = false;
            node.synapse = None;
            node.properties.remove(PRE_SYNAPSE_PROPERTY);
            node.properties.remove(POST_SYNAPSE_PROPERTY);
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
