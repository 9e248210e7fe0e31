use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::foundation::error::{TesseraError, TesseraResult};
use crate::tiles::priority::TreePriority;

/// Settings shared by the main-side host, the impl-side host and the proxy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerTreeSettings {
    /// Deferred raster: commits activate, then tiles are prepared before drawing.
    pub impl_side_painting: bool,
    /// Create the built-in frame scheduler once the host client is ready.
    pub single_thread_proxy_scheduler: bool,
    /// Scheduling mode used by prepare-tiles.
    pub tree_priority: TreePriority,
    /// Tiles scheduled per prepare-tiles pass.
    pub max_tiles_for_prepare: usize,
    /// Memory limit handed to the contents texture manager at each main frame.
    pub max_memory_bytes: u64,
    /// Backings with a priority value above this are dropped first under pressure.
    pub priority_cutoff: u32,
    pub bytes_per_tile: u64,
}

impl Default for LayerTreeSettings {
    fn default() -> Self {
        Self {
            impl_side_painting: true,
            single_thread_proxy_scheduler: true,
            tree_priority: TreePriority::SmoothnessTakesPriority,
            max_tiles_for_prepare: 256,
            max_memory_bytes: 64 * 1024 * 1024,
            priority_cutoff: 2,
            bytes_per_tile: 256 * 256 * 4,
        }
    }
}

impl LayerTreeSettings {
    pub fn validate(&self) -> TesseraResult<()> {
        if self.max_tiles_for_prepare == 0 {
            return Err(TesseraError::validation(
                "max_tiles_for_prepare must be > 0",
            ));
        }
        if self.bytes_per_tile == 0 {
            return Err(TesseraError::validation("bytes_per_tile must be > 0"));
        }
        if self.max_memory_bytes < self.bytes_per_tile {
            return Err(TesseraError::validation(
                "max_memory_bytes must fit at least one tile",
            ));
        }
        Ok(())
    }

    pub fn from_json_str(s: &str) -> TesseraResult<Self> {
        let settings: Self = serde_json::from_str(s)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_path(path: impl AsRef<Path>) -> TesseraResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            TesseraError::validation(format!("read settings '{}': {e}", path.display()))
        })?;
        Self::from_json_str(&text)
    }

    /// Tiles the memory budget can hold.
    pub fn memory_budget_in_tiles(&self) -> u64 {
        self.max_memory_bytes / self.bytes_per_tile.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let s = LayerTreeSettings::from_json_str(r#"{ "impl_side_painting": false }"#).unwrap();
        assert!(!s.impl_side_painting);
        assert!(s.single_thread_proxy_scheduler);
        assert_eq!(s.tree_priority, TreePriority::SmoothnessTakesPriority);
        assert_eq!(s.max_tiles_for_prepare, 256);
    }

    #[test]
    fn zero_budget_is_rejected() {
        let err = LayerTreeSettings::from_json_str(r#"{ "max_tiles_for_prepare": 0 }"#)
            .unwrap_err();
        assert!(matches!(err, TesseraError::Validation(_)));
    }

    #[test]
    fn memory_budget_counts_whole_tiles() {
        let s = LayerTreeSettings {
            max_memory_bytes: 10 * 262_144 + 5,
            ..LayerTreeSettings::default()
        };
        assert_eq!(s.memory_budget_in_tiles(), 10);
    }
}
