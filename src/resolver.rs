// PID->cgroup resolver: used by the cpuinfo handler to find the calling
// process's cgroup path before the cpuinfo renderer can filter against its
// cpuset. This crate owns only the seam; resolving a real pid to a real
// cgroup path is the dispatcher's job (it already knows which cgroup
// namespace a request arrived through), so there is no "real" implementation
// here, only the trait and a test double, mirroring how jobsapi.rs's
// JobManager ships a no-op alongside the trait rather than a concrete
// job-queue implementation.

pub trait PidCgroupResolver {
    /// Resolve a PID to the cgroup path that should be used to answer its
    /// cpuinfo/stat reads. `None` if the PID is not known, e.g. it has
    /// already exited.
    fn resolve(&self, pid: u32) -> Option<String>;
}

pub struct NoPidCgroupResolver {}

impl NoPidCgroupResolver {
    pub fn new() -> Self {
        NoPidCgroupResolver {}
    }
}

impl Default for NoPidCgroupResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl PidCgroupResolver for NoPidCgroupResolver {
    fn resolve(&self, _pid: u32) -> Option<String> {
        None
    }
}

#[cfg(test)]
pub struct MockPidCgroupResolver {
    mapping: std::collections::HashMap<u32, String>,
}

#[cfg(test)]
impl MockPidCgroupResolver {
    pub fn new() -> Self {
        MockPidCgroupResolver {
            mapping: std::collections::HashMap::new(),
        }
    }

    pub fn with_mapping(mut self, pid: u32, cgroup: impl Into<String>) -> Self {
        self.mapping.insert(pid, cgroup.into());
        self
    }
}

#[cfg(test)]
impl PidCgroupResolver for MockPidCgroupResolver {
    fn resolve(&self, pid: u32) -> Option<String> {
        self.mapping.get(&pid).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_resolver_always_returns_none() {
        let resolver = NoPidCgroupResolver::new();
        assert_eq!(resolver.resolve(1234), None);
    }

    #[test]
    fn mock_resolver_returns_configured_mapping() {
        let resolver = MockPidCgroupResolver::new().with_mapping(42, "/user.slice/foo");
        assert_eq!(resolver.resolve(42), Some("/user.slice/foo".to_string()));
        assert_eq!(resolver.resolve(7), None);
    }
}
