// State cache (component D).  A fixed number of shards, each
// holding the projection nodes whose cgroup path hashes to that shard.
// Readers (find) may traverse a shard in parallel; inserts and pruning take
// that shard's lock exclusively.  This replaces proc_cpuview.c's
// singly-linked `cg_proc_stat_head` buckets with a `Vec` behind an
// `RwLock` -- the linked list itself is not load-bearing, and a sharded map
// is an acceptable modernization as long as the shard count (100) is
// preserved.
//
// Lock ordering: bucket lock, then node mutex, never the reverse and never
// two bucket locks at once.

use crate::cgroup_adapter::CgroupAdapter;
use crate::usage::CpuSample;

use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

pub const BUCKET_COUNT: usize = 100;
const PRUNE_INTERVAL: Duration = Duration::from_secs(10);

/// The mutable state of one cached cgroup's projection, guarded by a mutex
/// private to the node.
pub struct NodeState {
    pub usage: Vec<CpuSample>,
    pub view: Vec<CpuSample>,
    pub cpu_count: usize,
}

impl NodeState {
    fn new(first_sample: &[CpuSample]) -> Self {
        NodeState {
            usage: first_sample.to_vec(),
            view: vec![CpuSample::default(); first_sample.len()],
            cpu_count: first_sample.len(),
        }
    }

    /// Grow both arrays to `nproc`, preserving existing entries and zeroing
    /// new ones.  `cpu_count` never shrinks.
    pub fn ensure_capacity(&mut self, nproc: usize) {
        if nproc <= self.cpu_count {
            return;
        }
        self.usage.resize(nproc, CpuSample::default());
        self.view.resize(nproc, CpuSample::default());
        self.cpu_count = nproc;
    }

    /// Reset detection: zero both arrays and reseed
    /// `usage` from `new_sample`.
    pub fn reset(&mut self, new_sample: &[CpuSample]) {
        tracing::debug!("resetting projection node, cgroup re-created with same path");
        let n = self.cpu_count;
        self.usage = new_sample.to_vec();
        self.usage.resize(n, CpuSample::default());
        self.view = vec![CpuSample::default(); n];
    }
}

pub struct ProjectionNode {
    pub cgroup_path: String,
    state: Mutex<NodeState>,
}

impl ProjectionNode {
    fn new(cgroup_path: String, first_sample: &[CpuSample]) -> Self {
        ProjectionNode {
            cgroup_path,
            state: Mutex::new(NodeState::new(first_sample)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

struct BucketState {
    entries: Vec<Arc<ProjectionNode>>,
    last_pruned: Instant,
}

pub struct Cache {
    buckets: Vec<RwLock<BucketState>>,
}

fn hash_path(path: &str) -> u64 {
    // FNV-1a: deterministic, well-dispersed, no extra dependency - same
    // spirit as sonar reaching for the simplest correct tool rather than
    // pulling in a hashing crate for a 100-way shard.
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET;
    for byte in path.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

impl Cache {
    pub fn new() -> Self {
        Cache::with_bucket_count(BUCKET_COUNT)
    }

    pub fn with_bucket_count(count: usize) -> Self {
        let mut buckets = Vec::with_capacity(count);
        for _ in 0..count {
            buckets.push(RwLock::new(BucketState {
                entries: Vec::new(),
                last_pruned: Instant::now(),
            }));
        }
        Cache { buckets }
    }

    fn bucket_index(&self, path: &str) -> usize {
        (hash_path(path) % self.buckets.len() as u64) as usize
    }

    /// Find the node for `cgroup`, or create and insert one seeded from
    /// `first_sample` if absent.  On a miss, opportunistically prunes dead
    /// nodes across every shard.
    pub fn find_or_create(
        &self,
        cgroup: &str,
        first_sample: &[CpuSample],
        adapter: &dyn CgroupAdapter,
    ) -> Arc<ProjectionNode> {
        let idx = self.bucket_index(cgroup);

        {
            let bucket = self.buckets[idx].read().unwrap_or_else(|p| p.into_inner());
            if let Some(node) = bucket.entries.iter().find(|n| n.cgroup_path == cgroup) {
                return Arc::clone(node);
            }
        }

        let new_node = Arc::new(ProjectionNode::new(cgroup.to_string(), first_sample));

        let created = {
            let mut bucket = self.buckets[idx].write().unwrap_or_else(|p| p.into_inner());
            // Re-check: another thread may have inserted the same path while
            // we built new_node without holding the write lock.
            if let Some(existing) = bucket.entries.iter().find(|n| n.cgroup_path == cgroup) {
                Arc::clone(existing)
            } else {
                tracing::debug!(cgroup, cpu_count = first_sample.len(), "new projection node");
                bucket.entries.push(Arc::clone(&new_node));
                new_node
            }
        };

        self.prune_all(adapter);
        created
    }

    /// Prune every shard independently: each shard checks its own
    /// last-pruned timestamp and, if stale, drops nodes whose cgroup no
    /// longer has a `cpu.shares` file.
    ///
    /// The C source instead `return`s out of the whole sweep the moment one
    /// shard turns out to be fresh, so a fresh shard 0 starves every other
    /// shard's pruning for that call. Here shards are pruned independently.
    pub fn prune_all(&self, adapter: &dyn CgroupAdapter) {
        let now = Instant::now();
        for bucket_lock in &self.buckets {
            let mut bucket = bucket_lock.write().unwrap_or_else(|p| p.into_inner());
            if now.duration_since(bucket.last_pruned) < PRUNE_INTERVAL {
                continue;
            }
            bucket.entries.retain(|node| {
                let alive = adapter.controller_file_exists("cpu", &node.cgroup_path, "cpu.shares");
                if !alive {
                    tracing::debug!(cgroup = %node.cgroup_path, "pruning dead projection node");
                }
                alive
            });
            bucket.last_pruned = now;
        }
    }

    #[cfg(test)]
    pub fn node_count(&self) -> usize {
        self.buckets
            .iter()
            .map(|b| b.read().unwrap().entries.len())
            .sum()
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}
