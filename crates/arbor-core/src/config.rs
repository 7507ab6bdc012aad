//! # Forest Configuration
//!
//! User-tunable settings of a [`crate::Forest`]. Every field has a default so a
//! partial TOML file (read by the app layer) is enough.

use crate::{ArborError, Coordinate, FloatCoordinate};
use serde::{Deserialize, Serialize};

/// Read-only dataset facts supplied by the voxel subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DatasetBounds {
    /// Exclusive upper corner of the dataset; positions are clamped below it.
    pub boundary: Coordinate,
    /// Highest magnification available; larger node magnifications are capped.
    pub highest_magnification: u32,
}

/// Settings of a forest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestConfig {
    /// Physical size of one voxel along each axis.
    pub scale: FloatCoordinate,
    /// Radius used when a node is created or loaded without a valid one.
    pub default_node_radius: f32,
    /// Radius (physical units) around a locked anchor inside which nodes may be placed.
    pub lock_radius: f32,
    /// Lock the position to nodes whose comment contains `locking_comment`.
    pub enable_comment_locking: bool,
    pub locking_comment: String,
    /// Write documents with 0-based coordinates instead of the legacy 1-based ones.
    pub zero_based_coordinates: bool,
    pub dataset: Option<DatasetBounds>,
    pub experiment_name: String,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            scale: FloatCoordinate::default(),
            default_node_radius: 1.5,
            lock_radius: 100.0,
            enable_comment_locking: false,
            locking_comment: "seed".to_string(),
            zero_based_coordinates: false,
            dataset: None,
            experiment_name: String::new(),
        }
    }
}

impl ForestConfig {
    /// Reject settings that would break node invariants later on.
    pub fn validate(&self) -> Result<(), ArborError> {
        if self.default_node_radius.is_nan() || self.default_node_radius <= 0.0 {
            return Err(ArborError::ConfigError(format!(
                "default_node_radius must be positive, got {}",
                self.default_node_radius
            )));
        }
        if self.lock_radius.is_nan() || self.lock_radius < 0.0 {
            return Err(ArborError::ConfigError(format!(
                "lock_radius must not be negative, got {}",
                self.lock_radius
            )));
        }
        let s = self.scale;
        if [s.x, s.y, s.z].iter().any(|v| v.is_nan() || *v <= 0.0) {
            return Err(ArborError::ConfigError(
                "scale must be positive on every axis".to_string(),
            ));
        }
        if let Some(dataset) = self.dataset {
            if dataset.highest_magnification == 0 {
                return Err(ArborError::ConfigError(
                    "dataset.highest_magnification must be at least 1".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Origin offset written to documents: 0 for 0-based, 1 for legacy 1-based.
    #[must_use]
    pub const fn document_origin(&self) -> i32 {
        if self.zero_based_coordinates { 0 } else { 1 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(ForestConfig::default().validate().is_ok());
    }

    #[test]
    fn non_positive_radius_rejected() {
        let config = ForestConfig {
            default_node_radius: 0.0,
            ..ForestConfig::default()
        };
        assert!(matches!(config.validate(), Err(ArborError::ConfigError(_))));
    }

    #[test]
    fn legacy_origin_is_one_based() {
        assert_eq!(ForestConfig::default().document_origin(), 1);
        let zero = ForestConfig {
            zero_based_coordinates: true,
            ..ForestConfig::default()
        };
        assert_eq!(zero.document_origin(), 0);
    }
}
