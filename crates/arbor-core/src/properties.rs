//! # Property Store
//!
//! Free-form properties of trees and nodes, and the forest-wide catalog that
//! classifies every property name as numeric or textual.
//!
//! The reserved names in [`crate::primitives`] (the comment and the synapse
//! mirrors) are managed by the forest and never cataloged.

use crate::events::ForestEvent;
use crate::forest::Forest;
use crate::primitives::{COMMENT_PROPERTY, is_reserved_property};
use crate::{ArborError, EntityRef, Properties, PropertyValue};
use std::collections::BTreeSet;

// =============================================================================
// CATALOG
// =============================================================================

/// Names of every property in use, split by value type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyCatalog {
    numeric: BTreeSet<String>,
    textual: BTreeSet<String>,
}

impl PropertyCatalog {
    /// Numeric property names in ascending order.
    pub fn numeric(&self) -> impl Iterator<Item = &str> {
        self.numeric.iter().map(String::as_str)
    }

    /// Textual property names in ascending order.
    pub fn textual(&self) -> impl Iterator<Item = &str> {
        self.textual.iter().map(String::as_str)
    }

    #[must_use]
    pub fn is_numeric(&self, name: &str) -> bool {
        self.numeric.contains(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.numeric.contains(name) || self.textual.contains(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.numeric.len() + self.textual.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.numeric.is_empty() && self.textual.is_empty()
    }

    /// Record `name` with the given type. Existing entries keep their type.
    ///
    /// Returns `true` if the name was not cataloged before.
    pub(crate) fn register(&mut self, name: &str, numeric: bool) -> bool {
        if is_reserved_property(name) || self.contains(name) {
            return false;
        }
        if numeric {
            self.numeric.insert(name.to_string())
        } else {
            self.textual.insert(name.to_string())
        }
    }

    /// Catalog the names of an incoming property map and coerce its values
    /// to the cataloged types.
    ///
    /// Numeric names keep text values that fail to parse.
    pub(crate) fn admit(&mut self, properties: Properties) -> Properties {
        properties
            .into_iter()
            .map(|(name, value)| {
                if is_reserved_property(&name) {
                    return (name, value);
                }
                self.register(&name, value.is_numeric());
                let value = self.coerce(&name, value);
                (name, value)
            })
            .collect()
    }

    fn coerce(&self, name: &str, value: PropertyValue) -> PropertyValue {
        if self.numeric.contains(name) {
            match value.as_number() {
                Some(number) => PropertyValue::Number(number),
                None => value,
            }
        } else {
            match value {
                PropertyValue::Number(n) => PropertyValue::Text(n.to_string()),
                text => text,
            }
        }
    }

    fn mark_numeric(&mut self, name: &str) {
        self.textual.remove(name);
        self.numeric.insert(name.to_string());
    }
}

// =============================================================================
// FOREST OPERATIONS
// =============================================================================

impl Forest {
    #[must_use]
    pub fn property_catalog(&self) -> &PropertyCatalog {
        &self.catalog
    }

    /// Properties of a tree or node.
    pub fn properties(&self, entity: EntityRef) -> Result<&Properties, ArborError> {
        match entity {
            EntityRef::Tree(id) => self
                .find_tree_by_id(id)
                .map(|tree| tree.properties())
                .ok_or(ArborError::missing_tree(id)),
            EntityRef::Node(id) => self
                .find_node_by_id(id)
                .map(|node| node.properties())
                .ok_or(ArborError::missing_node(id)),
        }
    }

    /// The comment of a tree or node, empty if none.
    pub fn comment(&self, entity: EntityRef) -> Result<&str, ArborError> {
        Ok(self
            .properties(entity)?
            .get(COMMENT_PROPERTY)
            .and_then(PropertyValue::as_str)
            .unwrap_or(""))
    }

    /// Set the comment of a tree or node. An empty text removes it.
    ///
    /// Commenting the active node re-evaluates comment locking.
    pub fn set_comment(&mut self, entity: EntityRef, text: &str) -> Result<(), ArborError> {
        let properties = self.properties_mut(entity)?;
        if text.is_empty() {
            properties.remove(COMMENT_PROPERTY);
        } else {
            properties.insert(COMMENT_PROPERTY.to_string(), PropertyValue::text(text));
        }
        self.publish_changed(entity);

        if let EntityRef::Node(id) = entity {
            if self.active_node() == Some(id) {
                self.apply_comment_lock(id);
            }
        }
        Ok(())
    }

    /// Set one free-form property, cataloging its name on first use.
    ///
    /// The comment is routed through [`Forest::set_comment`]; the synapse
    /// mirrors cannot be written directly.
    pub fn set_property(
        &mut self,
        entity: EntityRef,
        name: &str,
        value: PropertyValue,
    ) -> Result<(), ArborError> {
        if name == COMMENT_PROPERTY {
            return self.set_comment(entity, &value.to_string());
        }
        if is_reserved_property(name) {
            return Err(ArborError::InvariantViolation(format!(
                "property '{}' is managed by the synapse registry",
                name
            )));
        }
        self.properties(entity)?;
        let known = self.catalog.contains(name);
        let mut admitted = self
            .catalog
            .admit(Properties::from([(name.to_string(), value)]));
        let properties = self.properties_mut(entity)?;
        properties.append(&mut admitted);
        self.publish_changed(entity);
        if !known {
            self.notifier.publish(ForestEvent::PropertyCatalogChanged);
        }
        Ok(())
    }

    /// Remove one property. Returns the old value, if any.
    pub fn remove_property(
        &mut self,
        entity: EntityRef,
        name: &str,
    ) -> Result<Option<PropertyValue>, ArborError> {
        if is_reserved_property(name) && name != COMMENT_PROPERTY {
            return Err(ArborError::InvariantViolation(format!(
                "property '{}' is managed by the synapse registry",
                name
            )));
        }
        let removed = self.properties_mut(entity)?.remove(name);
        if removed.is_some() {
            self.publish_changed(entity);
        }
        Ok(removed)
    }

    /// Catalog a property name ahead of use.
    ///
    /// Returns `true` if the name was new. Reserved names are ignored.
    pub fn register_property(&mut self, name: &str, numeric: bool) -> bool {
        let added = self.catalog.register(name, numeric);
        if added {
            self.notifier.publish(ForestEvent::PropertyCatalogChanged);
        }
        added
    }

    /// Convert a textual property to numeric on every tree and node.
    ///
    /// Either every value parses and all are converted, or nothing changes.
    /// Returns the number of values converted.
    pub fn convert_to_numeric(&mut self, name: &str) -> Result<usize, ArborError> {
        if is_reserved_property(name) {
            return Err(ArborError::PropertyConversion {
                name: name.to_string(),
                reason: "reserved property".to_string(),
            });
        }
        if self.catalog.is_numeric(name) {
            return Err(ArborError::PropertyConversion {
                name: name.to_string(),
                reason: "already numeric".to_string(),
            });
        }

        let tree_values = self.trees.values().filter_map(|t| t.properties.get(name));
        let node_values = self.nodes.values().filter_map(|n| n.properties.get(name));
        if let Some(bad) = tree_values
            .chain(node_values)
            .find(|value| value.as_number().is_none())
        {
            return Err(ArborError::PropertyConversion {
                name: name.to_string(),
                reason: format!("'{}' is not a number", bad),
            });
        }

        let mut converted = 0;
        let maps = self
            .trees
            .values_mut()
            .map(|tree| &mut tree.properties)
            .chain(self.nodes.values_mut().map(|node| &mut node.properties));
        for properties in maps {
            if let Some(value) = properties.get_mut(name) {
                if let Some(number) = value.as_number() {
                    *value = PropertyValue::Number(number);
                    converted += 1;
                }
            }
        }
        self.catalog.mark_numeric(name);
        self.notifier.publish(ForestEvent::PropertyCatalogChanged);
        tracing::debug!(property = name, converted, "property converted to numeric");
        Ok(converted)
    }

    pub(crate) fn properties_mut(
        &mut self,
        entity: EntityRef,
    ) -> Result<&mut Properties, ArborError> {
        match entity {
            EntityRef::Tree(id) => Ok(&mut self.tree_mut(id)?.properties),
            EntityRef::Node(id) => Ok(&mut self.node_mut(id)?.properties),
        }
    }

    pub(crate) fn publish_changed(&mut self, entity: EntityRef) {
        let event = match entity {
            EntityRef::Tree(id) => ForestEvent::TreeChanged(id),
            EntityRef::Node(id) => ForestEvent::NodeChanged(id),
        };
        self.notifier.publish(event);
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forest::NodeSpec;
    use crate::{Coordinate, NodeId, TreeId};

    fn forest_with_nodes(count: usize) -> (Forest, TreeId, Vec<NodeId>) {
        let mut forest = Forest::new();
        let tree = forest
            .add_tree(None, None, Properties::new())
            .expect("tree");
        let nodes = (0..count)
            .map(|i| {
                forest
                    .add_node(NodeSpec::new(tree, Coordinate::new(i as i32, 0, 0)))
                    .expect("node")
            })
            .collect();
        (forest, tree, nodes)
    }

    #[test]
    fn empty_comment_removes_it() {
        let (mut forest, _, nodes) = forest_with_nodes(1);
        let node = EntityRef::Node(nodes[0]);
        forest.set_comment(node, "branch").expect("set");
        assert_eq!(forest.comment(node).expect("get"), "branch");

        forest.set_comment(node, "").expect("clear");
        assert_eq!(forest.comment(node).expect("get"), "");
        assert!(!forest.properties(node).expect("props").contains_key("comment"));
    }

    #[test]
    fn remove_property_returns_old_value() {
        let (mut forest, _, nodes) = forest_with_nodes(1);
        let node = EntityRef::Node(nodes[0]);
        forest
            .set_property(node, "size", PropertyValue::Number(4.0))
            .expect("set");

        let removed = forest.remove_property(node, "size").expect("remove");

        assert_eq!(removed, Some(PropertyValue::Number(4.0)));
        assert_eq!(forest.remove_property(node, "size").expect("again"), None);
        assert!(forest.remove_property(node, "postSynapse").is_err());
    }

    #[test]
    fn comment_never_enters_catalog() {
        let (mut forest, tree, _) = forest_with_nodes(0);
        forest
            .set_comment(EntityRef::Tree(tree), "axon")
            .expect("set");
        assert!(forest.property_catalog().is_empty());
    }

    #[test]
    fn first_use_catalogs_by_value_type() {
        let (mut forest, tree, nodes) = forest_with_nodes(1);
        forest
            .set_property(EntityRef::Node(nodes[0]), "size", PropertyValue::Number(4.0))
            .expect("set");
        forest
            .set_property(EntityRef::Tree(tree), "celltype", PropertyValue::text("granule"))
            .expect("set");

        let catalog = forest.property_catalog();
        assert!(catalog.is_numeric("size"));
        assert_eq!(catalog.textual().collect::<Vec<_>>(), vec!["celltype"]);
    }

    #[test]
    fn failed_write_leaves_catalog_untouched() {
        let (mut forest, _, _) = forest_with_nodes(1);
        let rx = forest.subscribe(crate::events::EventFilter::all());

        let result = forest.set_property(
            EntityRef::Node(NodeId(999)),
            "celltype",
            PropertyValue::text("granule"),
        );

        assert!(matches!(result, Err(ArborError::InvalidReference { .. })));
        assert!(!forest.property_catalog().contains("celltype"));
        assert!(forest.property_catalog().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn synapse_mirrors_are_not_writable() {
        let (mut forest, _, nodes) = forest_with_nodes(1);
        let result = forest.set_property(
            EntityRef::Node(nodes[0]),
            "preSynapse",
            PropertyValue::Number(1.0),
        );
        assert!(matches!(result, Err(ArborError::InvariantViolation(_))));
    }

    #[test]
    fn convert_to_numeric_converts_everywhere() {
        let (mut forest, tree, nodes) = forest_with_nodes(2);
        forest
            .set_property(EntityRef::Node(nodes[0]), "depth", PropertyValue::text("1.5"))
            .expect("set");
        forest
            .set_property(EntityRef::Node(nodes[1]), "depth", PropertyValue::text("7"))
            .expect("set");
        forest
            .set_property(EntityRef::Tree(tree), "depth", PropertyValue::text(" 3 "))
            .expect("set");

        let converted = forest.convert_to_numeric("depth").expect("convert");

        assert_eq!(converted, 3);
        assert!(forest.property_catalog().is_numeric("depth"));
        let value = forest
            .properties(EntityRef::Node(nodes[0]))
            .expect("props")
            .get("depth")
            .cloned();
        assert_eq!(value, Some(PropertyValue::Number(1.5)));
    }

    #[test]
    fn convert_to_numeric_is_all_or_nothing() {
        let (mut forest, _, nodes) = forest_with_nodes(2);
        forest
            .set_property(EntityRef::Node(nodes[0]), "label", PropertyValue::text("12"))
            .expect("set");
        forest
            .set_property(EntityRef::Node(nodes[1]), "label", PropertyValue::text("twelve"))
            .expect("set");

        let result = forest.convert_to_numeric("label");

        assert!(matches!(result, Err(ArborError::PropertyConversion { .. })));
        assert!(!forest.property_catalog().is_numeric("label"));
        let first = forest
            .properties(EntityRef::Node(nodes[0]))
            .expect("props")
            .get("label")
            .cloned();
        assert_eq!(first, Some(PropertyValue::text("12")));
    }

    #[test]
    fn convert_already_numeric_fails() {
        let (mut forest, _, _) = forest_with_nodes(0);
        forest.register_property("volume", true);
        assert!(matches!(
            forest.convert_to_numeric("volume"),
            Err(ArborError::PropertyConversion { .. })
        ));
    }

    #[test]
    fn numeric_names_coerce_parsable_text() {
        let (mut forest, _, nodes) = forest_with_nodes(1);
        assert!(forest.register_property("volume", true));
        assert!(!forest.register_property("volume", false));
        forest
            .set_property(EntityRef::Node(nodes[0]), "volume", PropertyValue::text("2.25"))
            .expect("set");
        let value = forest
            .properties(EntityRef::Node(nodes[0]))
            .expect("props")
            .get("volume")
            .cloned();
        assert_eq!(value, Some(PropertyValue::Number(2.25)));
    }
}
