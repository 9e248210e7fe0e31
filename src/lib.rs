//! Tessera schedules tile rasterization and drives compositor frames on a single thread.
//!
//! Two halves:
//!
//! - Tile scheduling: per-tree raster queues are merged pairwise ([`PairedTilingSetQueue`]) and
//!   globally ([`RasterTilePriorityQueue`]) under a [`TreePriority`] policy.
//! - Frame production: [`SingleThreadProxy`] runs begin-main-frame, commit, activation,
//!   prepare-tiles, draw and swap between a main-role [`LayerTreeHost`] and an impl-role
//!   [`LayerTreeHostImpl`], optionally paced by a [`Scheduler`].
#![forbid(unsafe_code)]

mod foundation;

pub mod host;
pub mod host_impl;
pub mod proxy;
pub mod scene;
pub mod scheduler;
pub mod settings;
pub mod tiles;

pub use crate::foundation::error::{TesseraError, TesseraResult};
pub use crate::foundation::ids::{CompositorFrameNumber, LayerId, SourceFrameNumber, TileId};

pub use crate::host::resources::{PrioritizedResourceManager, ResourceUpdateQueue};
pub use crate::host::swap_promise::{DidNotSwapReason, SwapPromise};
pub use crate::host::{AnimationEvent, HostLayer, LayerTreeHost, LayerTreeHostClient};
pub use crate::host_impl::frame::{CompositorFrame, DrawQuad, DrawResult, FrameData};
pub use crate::host_impl::output_surface::{HeadlessOutputSurface, OutputSurface};
pub use crate::host_impl::{ImplNotification, LayerTreeHostImpl};
pub use crate::proxy::{
    BeginMainFrameOutcome, NullSingleThreadClient, ProxyOptions, ProxyState, SingleThreadClient,
    SingleThreadProxy,
};
pub use crate::scene::{LayerTreeImpl, PictureLayerImpl, Scene, SceneFile, layer_pairs};
pub use crate::scheduler::begin_frame::BeginFrameArgs;
pub use crate::scheduler::{CommitEarlyOutReason, FrameScheduler, ScheduledAction, Scheduler};
pub use crate::settings::LayerTreeSettings;
pub use crate::tiles::manager::{InlineRasterWorker, PrepareTilesReport, RasterWorker, TileManager};
pub use crate::tiles::paired_queue::{LayerPair, PairedTilingSetQueue};
pub use crate::tiles::priority::{
    PriorityBin, TilePriority, TileResolution, TreePriority, WhichTree,
};
pub use crate::tiles::priority_queue::RasterTilePriorityQueue;
pub use crate::tiles::raster_queue::{
    RasterSource, RasterTraversal, SortedRasterQueue, TilingSetRasterQueue,
};
pub use crate::tiles::tile::{Tile, TileSpec};
