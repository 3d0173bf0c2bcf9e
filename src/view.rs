// Facade tying the cgroup adapter, the PID resolver, and the state cache
// together behind the two operations a dispatcher actually calls: render a
// cgroup's /proc/stat view, and render its /proc/cpuinfo view. Grounded on
// realsystem.rs's RealSystemBuilder/RealSystem split: a builder assembles the
// collaborators (defaulting the ones with a real implementation, here the
// cgroup adapter) and freezes into an immutable facade.

use crate::cache::Cache;
use crate::cgroup_adapter::{CgroupAdapter, RealCgroupAdapter};
use crate::cpuinfo::{self, CpuInfoHandle};
use crate::error::CoreError;
use crate::projection;
use crate::resolver::{NoPidCgroupResolver, PidCgroupResolver};

use std::sync::Arc;

pub struct CpuViewBuilder {
    adapter: Option<Arc<dyn CgroupAdapter>>,
    resolver: Option<Arc<dyn PidCgroupResolver>>,
}

impl CpuViewBuilder {
    pub fn with_adapter(self, adapter: Arc<dyn CgroupAdapter>) -> Self {
        CpuViewBuilder {
            adapter: Some(adapter),
            ..self
        }
    }

    pub fn with_resolver(self, resolver: Arc<dyn PidCgroupResolver>) -> Self {
        CpuViewBuilder {
            resolver: Some(resolver),
            ..self
        }
    }

    pub fn freeze(self) -> CpuView {
        CpuView {
            cache: Cache::new(),
            adapter: self
                .adapter
                .unwrap_or_else(|| Arc::new(RealCgroupAdapter::new())),
            resolver: self
                .resolver
                .unwrap_or_else(|| Arc::new(NoPidCgroupResolver::new())),
        }
    }
}

pub struct CpuView {
    cache: Cache,
    adapter: Arc<dyn CgroupAdapter>,
    resolver: Arc<dyn PidCgroupResolver>,
}

impl CpuView {
    pub fn new() -> CpuViewBuilder {
        CpuViewBuilder {
            adapter: None,
            resolver: None,
        }
    }

    /// Render `cgroup`'s /proc/stat view (components A, B, C, D, E).
    pub fn render_stat(
        &self,
        cgroup: &str,
        host_stat: &str,
        out: &mut [u8],
    ) -> Result<usize, CoreError> {
        projection::render_proc_stat(&self.cache, self.adapter.as_ref(), cgroup, host_stat, out)
    }

    /// Render `cgroup`'s /proc/cpuinfo view (components A, F). Does not
    /// touch the state cache: cpuinfo filtering is stateless across reads.
    pub fn render_cpuinfo(
        &self,
        cgroup: &str,
        host_cpuinfo: &str,
        out: &mut [u8],
    ) -> Result<usize, CoreError> {
        cpuinfo::render_cpuinfo(self.adapter.as_ref(), cgroup, host_cpuinfo, out)
    }

    /// Resolve `pid` to a cgroup via the configured resolver, then render
    /// its cpuinfo view.
    pub fn render_cpuinfo_for_pid(
        &self,
        pid: u32,
        host_cpuinfo: &str,
        out: &mut [u8],
    ) -> Result<usize, CoreError> {
        let cgroup = self.cgroup_for_pid(pid)?;
        self.render_cpuinfo(&cgroup, host_cpuinfo, out)
    }

    /// Open a per-open-file cpuinfo render cache for `pid`'s cgroup.
    pub fn open_cpuinfo_for_pid(
        &self,
        pid: u32,
        host_cpuinfo: &str,
    ) -> Result<CpuInfoHandle, CoreError> {
        let cgroup = self.cgroup_for_pid(pid)?;
        CpuInfoHandle::open(self.adapter.as_ref(), &cgroup, host_cpuinfo)
    }

    fn cgroup_for_pid(&self, pid: u32) -> Result<String, CoreError> {
        self.resolver
            .resolve(pid)
            .ok_or_else(|| CoreError::parse("pid resolver", format!("no cgroup known for pid {pid}")))
    }
}
