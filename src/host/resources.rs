use std::collections::BTreeMap;

use serde::Serialize;

use crate::foundation::ids::LayerId;
use crate::host_impl::LayerTreeHostImpl;

/// Content of one layer that has to be uploaded at the next commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ResourceUpload {
    pub layer: LayerId,
    pub tiles: usize,
}

/// Uploads collected while updating layers on the main side.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceUpdateQueue {
    uploads: Vec<ResourceUpload>,
}

impl ResourceUpdateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, upload: ResourceUpload) {
        self.uploads.push(upload);
    }

    pub fn is_empty(&self) -> bool {
        self.uploads.is_empty()
    }

    pub fn len(&self) -> usize {
        self.uploads.len()
    }

    pub fn uploads(&self) -> &[ResourceUpload] {
        &self.uploads
    }

    pub fn total_tiles(&self) -> usize {
        self.uploads.iter().map(|u| u.tiles).sum()
    }
}

/// Applies a [`ResourceUpdateQueue`] to the impl side during commit.
#[derive(Debug)]
pub struct ResourceUpdateController {
    queue: ResourceUpdateQueue,
}

impl ResourceUpdateController {
    pub fn new(queue: ResourceUpdateQueue) -> Self {
        Self { queue }
    }

    /// Flush every queued upload. Returns the number of tile resources uploaded.
    pub fn finalize(self, host_impl: &mut LayerTreeHostImpl) -> usize {
        let uploaded = self.queue.total_tiles();
        host_impl.record_uploaded_resources(uploaded);
        uploaded
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Backing {
    pub layer: LayerId,
    /// Lower is more important.
    pub priority: u32,
    pub evicted: bool,
}

/// Contents texture budget for the non-deferred raster path.
///
/// Layers request textures at a priority during the main frame; at commit the requests are
/// pushed onto backings, which the impl side may evict under memory pressure.
#[derive(Clone, Debug)]
pub struct PrioritizedResourceManager {
    bytes_per_backing: u64,
    max_memory_limit_bytes: u64,
    external_priority_cutoff: u32,
    requests: BTreeMap<LayerId, (u32, usize)>,
    backings: Vec<Backing>,
}

impl PrioritizedResourceManager {
    pub fn new(bytes_per_backing: u64, max_memory_limit_bytes: u64, priority_cutoff: u32) -> Self {
        Self {
            bytes_per_backing,
            max_memory_limit_bytes,
            external_priority_cutoff: priority_cutoff,
            requests: BTreeMap::new(),
            backings: Vec::new(),
        }
    }

    pub fn set_max_memory_limit_bytes(&mut self, bytes: u64) {
        self.max_memory_limit_bytes = bytes;
    }

    pub fn max_memory_limit_bytes(&self) -> u64 {
        self.max_memory_limit_bytes
    }

    pub fn set_external_priority_cutoff(&mut self, cutoff: u32) {
        self.external_priority_cutoff = cutoff;
    }

    pub fn external_priority_cutoff(&self) -> u32 {
        self.external_priority_cutoff
    }

    pub fn request_textures(&mut self, layer: LayerId, priority: u32, count: usize) {
        self.requests.insert(layer, (priority, count));
    }

    pub fn clear_requests(&mut self) {
        self.requests.clear();
    }

    pub fn backings(&self) -> &[Backing] {
        &self.backings
    }

    pub fn memory_use_bytes(&self) -> u64 {
        self.backings
            .iter()
            .filter(|b| !b.evicted)
            .count() as u64
            * self.bytes_per_backing
    }

    /// Turn the current requests into backings, most important first, within the memory limit
    /// and priority cutoff.
    pub fn push_texture_priorities_to_backings(&mut self) {
        let mut requests: Vec<_> = self
            .requests
            .iter()
            .map(|(layer, &(priority, count))| (priority, *layer, count))
            .collect();
        requests.sort();

        let capacity = self.max_memory_limit_bytes / self.bytes_per_backing.max(1);
        self.backings.clear();
        'outer: for (priority, layer, count) in requests {
            if priority > self.external_priority_cutoff {
                continue;
            }
            for _ in 0..count {
                if self.backings.len() as u64 >= capacity {
                    break 'outer;
                }
                self.backings.push(Backing {
                    layer,
                    priority,
                    evicted: false,
                });
            }
        }
    }

    /// Drop backings the impl side evicted. Returns how many were removed.
    pub fn unlink_and_clear_evicted_backings(&mut self) -> usize {
        let before = self.backings.len();
        self.backings.retain(|b| !b.evicted);
        before - self.backings.len()
    }

    /// Evict backings above `priority_cutoff`, then the least important ones until memory use fits
    /// `limit_bytes`. Returns `true` if anything was evicted.
    pub fn reduce_memory_on_impl_thread(&mut self, limit_bytes: u64, priority_cutoff: u32) -> bool {
        let mut evicted_any = false;
        for backing in self.backings.iter_mut().filter(|b| !b.evicted) {
            if backing.priority > priority_cutoff {
                backing.evicted = true;
                evicted_any = true;
            }
        }

        let mut order: Vec<usize> = (0..self.backings.len()).collect();
        order.sort_by_key(|&i| std::cmp::Reverse(self.backings[i].priority));
        for i in order {
            if self.memory_use_bytes() <= limit_bytes {
                break;
            }
            if !self.backings[i].evicted {
                self.backings[i].evicted = true;
                evicted_any = true;
            }
        }
        evicted_any
    }

    /// Release every backing (output surface going away).
    pub fn delete_contents_textures(&mut self) {
        self.backings.clear();
    }
}
