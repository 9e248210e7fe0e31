//! The single-threaded frame state machine and its supporting pieces.

pub mod roles;
pub mod single_thread;
pub mod tasks;
pub mod timing;

pub use single_thread::{
    BeginMainFrameOutcome, NullSingleThreadClient, ProxyOptions, ProxyState, SingleThreadClient,
    SingleThreadProxy,
};
