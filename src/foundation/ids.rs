/// Identity of a layer, stable across the active and pending trees.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct LayerId(pub u32);

/// Identity of a tile object. A shared tile keeps one id on both trees.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct TileId(pub u64);

/// Monotonic main-side commit counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct SourceFrameNumber(pub u64);

impl SourceFrameNumber {
    pub(crate) fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

/// Monotonic impl-side counter of frames handed to the output surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct CompositorFrameNumber(pub u64);

impl CompositorFrameNumber {
    pub(crate) fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

/// Allocates fresh [`TileId`]s.
#[derive(Debug, Default, Clone)]
pub(crate) struct TileIdAllocator {
    next: u64,
}

impl TileIdAllocator {
    pub(crate) fn starting_at(next: u64) -> Self {
        Self { next }
    }

    pub(crate) fn allocate(&mut self) -> TileId {
        let id = TileId(self.next);
        self.next = self.next.saturating_add(1);
        id
    }
}
