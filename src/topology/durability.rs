//! Volume Durability
//!
//! Redundancy policy of a volume. The wire form keeps the active parameters
//! under a sub-object named after the tag:
//!
//! ```json
//! {"type": "replicate", "replicate": {"replica": 3}}
//! {"type": "disperse", "disperse": {"data": 4, "redundancy": 2}}
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

pub const DURABILITY_STRING_REPLICATE: &str = "replicate";
pub const DURABILITY_STRING_EC: &str = "disperse";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaDurability {
    pub replica: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisperseDurability {
    pub data: u32,
    pub redundancy: u32,
}

/// Redundancy policy applied to a volume's bricks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Durability {
    /// Every chunk stored on `replica` bricks on distinct nodes
    Replicate { replicate: ReplicaDurability },
    /// Erasure coded over `data + redundancy` fragments
    Disperse { disperse: DisperseDurability },
}

impl Default for Durability {
    fn default() -> Self {
        Durability::replicate(3)
    }
}

impl Durability {
    pub fn replicate(replica: u32) -> Self {
        Durability::Replicate {
            replicate: ReplicaDurability { replica },
        }
    }

    pub fn disperse(data: u32, redundancy: u32) -> Self {
        Durability::Disperse {
            disperse: DisperseDurability { data, redundancy },
        }
    }

    /// Wire tag of the active variant
    pub fn label(&self) -> &'static str {
        match self {
            Durability::Replicate { .. } => DURABILITY_STRING_REPLICATE,
            Durability::Disperse { .. } => DURABILITY_STRING_EC,
        }
    }

    /// Number of bricks that make up one replica or disperse set
    pub fn brick_set_size(&self) -> usize {
        match self {
            Durability::Replicate { replicate } => replicate.replica as usize,
            Durability::Disperse { disperse } => {
                (disperse.data as usize).saturating_add(disperse.redundancy as usize)
            }
        }
    }

    /// Nodes needed so that every brick of a set lands on a different node
    pub fn min_nodes(&self) -> usize {
        self.brick_set_size()
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Durability::Replicate { replicate } => {
                if replicate.replica == 0 {
                    return Err(Error::InvalidDurability(
                        "replica count must be at least 1".into(),
                    ));
                }
            }
            Durability::Disperse { disperse } => {
                if disperse.data == 0 || disperse.redundancy == 0 {
                    return Err(Error::InvalidDurability(format!(
                        "disperse needs data and redundancy fragments, got {}+{}",
                        disperse.data, disperse.redundancy
                    )));
                }
                if disperse.data.checked_add(disperse.redundancy).is_none() {
                    return Err(Error::InvalidDurability(format!(
                        "disperse set of {}+{} fragments is too large",
                        disperse.data, disperse.redundancy
                    )));
                }
                if disperse.redundancy >= disperse.data {
                    return Err(Error::InvalidDurability(format!(
                        "disperse redundancy {} must be less than data {}",
                        disperse.redundancy, disperse.data
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn test_wire_format() {
        let d = Durability::disperse(4, 2);
        assert_eq!(
            serde_json::to_value(d).unwrap(),
            json!({"type": "disperse", "disperse": {"data": 4, "redundancy": 2}})
        );

        let parsed: Durability =
            serde_json::from_value(json!({"type": "replicate", "replicate": {"replica": 2}})).unwrap();
        assert_eq!(parsed, Durability::replicate(2));
    }

    #[test]
    fn test_inactive_parameters_are_dropped() {
        let parsed: Durability = serde_json::from_value(json!({
            "type": "replicate",
            "replicate": {"replica": 3},
            "disperse": {"data": 4, "redundancy": 2}
        }))
        .unwrap();
        assert_eq!(parsed, Durability::replicate(3));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let parsed = serde_json::from_value::<Durability>(json!({"type": "stripe"}));
        assert!(parsed.is_err());
    }

    #[test]
    fn test_set_sizes() {
        assert_eq!(Durability::replicate(3).brick_set_size(), 3);
        assert_eq!(Durability::disperse(4, 2).brick_set_size(), 6);
        assert_eq!(Durability::disperse(8, 3).min_nodes(), 11);
        assert_eq!(Durability::default(), Durability::replicate(3));
    }

    #[test]
    fn test_validate() {
        assert!(Durability::replicate(1).validate().is_ok());
        assert!(Durability::disperse(4, 2).validate().is_ok());
        assert_matches!(Durability::replicate(0).validate(), Err(Error::InvalidDurability(_)));
        assert_matches!(Durability::disperse(0, 1).validate(), Err(Error::InvalidDurability(_)));
        assert_matches!(Durability::disperse(4, 0).validate(), Err(Error::InvalidDurability(_)));
        assert_matches!(Durability::disperse(2, 2).validate(), Err(Error::InvalidDurability(_)));
    }

    #[test]
    fn test_oversized_disperse_set() {
        let parsed: Durability = serde_json::from_value(json!({
            "type": "disperse",
            "disperse": {"data": u32::MAX, "redundancy": 1}
        }))
        .unwrap();

        assert_matches!(parsed.validate(), Err(Error::InvalidDurability(_)));
        assert!(parsed.brick_set_size() > u32::MAX as usize || parsed.brick_set_size() == usize::MAX);
        assert!(parsed.min_nodes() > 0);
    }
}
