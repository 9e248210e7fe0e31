use serde::{Deserialize, Serialize};

/// Which of the two competing layer trees a tile, iterator or priority belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhichTree {
    /// The tree currently driving the displayed frame.
    Active,
    /// The tree being prepared for activation.
    Pending,
}

impl WhichTree {
    pub(crate) const fn index(self) -> usize {
        match self {
            Self::Active => 0,
            Self::Pending => 1,
        }
    }

    /// The other tree.
    pub const fn twin(self) -> Self {
        match self {
            Self::Active => Self::Pending,
            Self::Pending => Self::Active,
        }
    }
}

/// Coarse urgency class of a tile. Declaration order is urgency order: `Now` is the most urgent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityBin {
    /// Visible now.
    Now,
    /// Likely visible soon (prepaint).
    Soon,
    /// Everything else.
    Eventually,
}

/// Resolution class of the tiling a tile belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TileResolution {
    /// The ideal high-resolution tiling.
    High,
    /// The ideal low-resolution tiling.
    Low,
    /// Any other tiling (kept around while the ideal one fills in).
    NonIdeal,
}

impl TileResolution {
    /// `true` for the two ideal resolutions.
    pub const fn is_ideal(self) -> bool {
        !matches!(self, Self::NonIdeal)
    }
}

/// Global scheduling mode deciding how active and pending work compete.
///
/// Fixed for the lifetime of one [`RasterTilePriorityQueue`](crate::RasterTilePriorityQueue)
/// build.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreePriority {
    /// Both trees compete on their own tile priorities.
    SamePriorityForBothTrees,
    /// Keep the displayed tree smooth; pending work only preempts low-urgency active work.
    #[default]
    SmoothnessTakesPriority,
    /// Always favor the pending tree.
    NewContentTakesPriority,
}

impl TreePriority {
    /// Low-resolution tiles are preferred over high-resolution ones in smoothness mode.
    pub const fn prioritizes_low_res(self) -> bool {
        matches!(self, Self::SmoothnessTakesPriority)
    }
}

/// Priority of one tile on one tree.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TilePriority {
    pub priority_bin: PriorityBin,
    pub resolution: TileResolution,
    /// Distance in layer space from the visible rect; `0.0` when visible.
    #[serde(default)]
    pub distance_to_visible: f32,
}

impl Default for TilePriority {
    fn default() -> Self {
        Self {
            priority_bin: PriorityBin::Eventually,
            resolution: TileResolution::NonIdeal,
            distance_to_visible: f32::INFINITY,
        }
    }
}

impl TilePriority {
    pub const fn new(
        priority_bin: PriorityBin,
        resolution: TileResolution,
        distance_to_visible: f32,
    ) -> Self {
        Self {
            priority_bin,
            resolution,
            distance_to_visible,
        }
    }

    /// Total order over tile priorities: more urgent bin first, then closer to the visible rect.
    pub fn is_higher_priority_than(&self, other: &Self) -> bool {
        if self.priority_bin != other.priority_bin {
            return self.priority_bin < other.priority_bin;
        }
        self.distance_to_visible < other.distance_to_visible
    }

    /// Merge the active and pending records into one priority for
    /// [`TreePriority::SamePriorityForBothTrees`].
    pub fn combine(active: &Self, pending: &Self) -> Self {
        let resolution = if active.resolution == TileResolution::High
            || pending.resolution == TileResolution::High
        {
            TileResolution::High
        } else if active.resolution == TileResolution::Low
            || pending.resolution == TileResolution::Low
        {
            TileResolution::Low
        } else {
            TileResolution::NonIdeal
        };

        let (priority_bin, distance_to_visible) =
            match active.priority_bin.cmp(&pending.priority_bin) {
                std::cmp::Ordering::Less => (active.priority_bin, active.distance_to_visible),
                std::cmp::Ordering::Greater => (pending.priority_bin, pending.distance_to_visible),
                std::cmp::Ordering::Equal => (
                    active.priority_bin,
                    active.distance_to_visible.min(pending.distance_to_visible),
                ),
            };

        Self {
            priority_bin,
            resolution,
            distance_to_visible,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(bin: PriorityBin, res: TileResolution, d: f32) -> TilePriority {
        TilePriority::new(bin, res, d)
    }

    #[test]
    fn bin_dominates_distance() {
        let now_far = p(PriorityBin::Now, TileResolution::High, 500.0);
        let soon_near = p(PriorityBin::Soon, TileResolution::High, 0.0);
        assert!(now_far.is_higher_priority_than(&soon_near));
        assert!(!soon_near.is_higher_priority_than(&now_far));
    }

    #[test]
    fn equal_priorities_are_not_higher_than_each_other() {
        let a = p(PriorityBin::Soon, TileResolution::Low, 3.0);
        assert!(!a.is_higher_priority_than(&a));
    }

    #[test]
    fn combine_takes_most_urgent_bin_and_best_resolution() {
        let active = p(PriorityBin::Eventually, TileResolution::Low, 10.0);
        let pending = p(PriorityBin::Now, TileResolution::NonIdeal, 2.0);
        let c = TilePriority::combine(&active, &pending);
        assert_eq!(c.priority_bin, PriorityBin::Now);
        assert_eq!(c.resolution, TileResolution::Low);
        assert_eq!(c.distance_to_visible, 2.0);

        let same_bin = TilePriority::combine(
            &p(PriorityBin::Soon, TileResolution::High, 7.0),
            &p(PriorityBin::Soon, TileResolution::Low, 4.0),
        );
        assert_eq!(same_bin.resolution, TileResolution::High);
        assert_eq!(same_bin.distance_to_visible, 4.0);
    }

    #[test]
    fn tree_priority_serde_names() {
        let t: TreePriority = serde_json::from_str("\"new_content_takes_priority\"").unwrap();
        assert_eq!(t, TreePriority::NewContentTakesPriority);
        assert!(TreePriority::SmoothnessTakesPriority.prioritizes_low_res());
        assert!(!TreePriority::SamePriorityForBothTrees.prioritizes_low_res());
    }
}
