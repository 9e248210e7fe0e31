pub mod manager;
pub mod paired_queue;
pub mod priority;
pub mod priority_queue;
pub mod raster_queue;
pub mod tile;
pub mod tree_priority;
