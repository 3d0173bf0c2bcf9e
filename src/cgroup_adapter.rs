// Abstraction over the cgroup controller hierarchy, so that the projection
// engine can be tested without a real cgroup filesystem.  Mirrors the split
// in sonar's procfsapi.rs: a trait implemented once for the real filesystem
// (RealCgroupAdapter, here) and once for a test double (MockCgroupAdapter, in
// mock_cgroup.rs).
//
// The real implementation is supplied here because a complete crate has to
// have one, but callers embedding this core in a dispatcher are free to
// supply their own.

use crate::error::CoreError;
use std::fs;
use std::path::PathBuf;

pub trait CgroupAdapter: Send + Sync {
    /// Read `<mount>/<controller>/<cgroup>/<file>` and return its contents.
    fn read_controller_file(
        &self,
        controller: &str,
        cgroup: &str,
        file: &str,
    ) -> Result<String, CoreError>;

    /// True iff `<mount>/<controller>/<cgroup>/<file>` exists.  Used only as
    /// a liveness probe for pruning.
    fn controller_file_exists(&self, controller: &str, cgroup: &str, file: &str) -> bool;

    /// Host online logical CPU count.
    fn nproc_online(&self) -> usize;

    /// Host configured logical CPU count (may exceed online, e.g. hotplug).
    fn nproc_configured(&self) -> usize;

    /// USER_HZ, i.e. `sysconf(_SC_CLK_TCK)`.
    fn clock_ticks_per_sec(&self) -> u64;
}

pub struct RealCgroupAdapter {
    mount_root: PathBuf,
}

impl RealCgroupAdapter {
    pub fn new() -> Self {
        Self::with_mount_root("/sys/fs/cgroup")
    }

    pub fn with_mount_root(root: impl Into<PathBuf>) -> Self {
        RealCgroupAdapter {
            mount_root: root.into(),
        }
    }

    fn controller_path(&self, controller: &str, cgroup: &str, file: &str) -> PathBuf {
        let cgroup = cgroup.trim_start_matches('/');
        self.mount_root.join(controller).join(cgroup).join(file)
    }
}

impl Default for RealCgroupAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl CgroupAdapter for RealCgroupAdapter {
    fn read_controller_file(
        &self,
        controller: &str,
        cgroup: &str,
        file: &str,
    ) -> Result<String, CoreError> {
        let path = self.controller_path(controller, cgroup, file);
        fs::read_to_string(&path).map_err(|e| CoreError::not_readable(path.display().to_string(), e))
    }

    fn controller_file_exists(&self, controller: &str, cgroup: &str, file: &str) -> bool {
        self.controller_path(controller, cgroup, file).exists()
    }

    fn nproc_online(&self) -> usize {
        let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
        if n > 0 {
            n as usize
        } else {
            0
        }
    }

    fn nproc_configured(&self) -> usize {
        let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_CONF) };
        if n > 0 {
            n as usize
        } else {
            0
        }
    }

    fn clock_ticks_per_sec(&self) -> u64 {
        let hz = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        if hz > 0 {
            hz as u64
        } else {
            0
        }
    }
}
