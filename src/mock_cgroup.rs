// MockCgroupAdapter is used for testing, it is instantiated with the values
// we want it to return.  Mirrors sonar's mockfs.rs / mocksystem.rs builder
// pattern.

#![cfg(test)]

use crate::cgroup_adapter::CgroupAdapter;
use crate::error::CoreError;
use std::collections::HashMap;
use std::io;

pub struct MockCgroupAdapter {
    files: HashMap<(String, String, String), String>,
    existing: HashMap<(String, String, String), bool>,
    nproc_online: usize,
    nproc_configured: usize,
    clock_ticks_per_sec: u64,
}

pub struct Builder {
    inner: MockCgroupAdapter,
}

impl Builder {
    pub fn new() -> Self {
        Builder {
            inner: MockCgroupAdapter {
                files: HashMap::new(),
                existing: HashMap::new(),
                nproc_online: 1,
                nproc_configured: 1,
                clock_ticks_per_sec: 100,
            },
        }
    }

    pub fn with_file(
        mut self,
        controller: &str,
        cgroup: &str,
        file: &str,
        contents: impl Into<String>,
    ) -> Self {
        self.inner.files.insert(
            (controller.to_string(), cgroup.to_string(), file.to_string()),
            contents.into(),
        );
        self.inner.existing.insert(
            (controller.to_string(), cgroup.to_string(), file.to_string()),
            true,
        );
        self
    }

    /// Mark a file as existing (for `cpu.shares` liveness probes) without
    /// giving it readable contents.
    pub fn with_existing(mut self, controller: &str, cgroup: &str, file: &str) -> Self {
        self.inner.existing.insert(
            (controller.to_string(), cgroup.to_string(), file.to_string()),
            true,
        );
        self
    }

    pub fn without_file(mut self, controller: &str, cgroup: &str, file: &str) -> Self {
        self.inner.existing.insert(
            (controller.to_string(), cgroup.to_string(), file.to_string()),
            false,
        );
        self
    }

    pub fn with_nproc_online(mut self, n: usize) -> Self {
        self.inner.nproc_online = n;
        self
    }

    pub fn with_nproc_configured(mut self, n: usize) -> Self {
        self.inner.nproc_configured = n;
        self
    }

    pub fn with_clock_ticks_per_sec(mut self, hz: u64) -> Self {
        self.inner.clock_ticks_per_sec = hz;
        self
    }

    pub fn build(self) -> MockCgroupAdapter {
        self.inner
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl CgroupAdapter for MockCgroupAdapter {
    fn read_controller_file(
        &self,
        controller: &str,
        cgroup: &str,
        file: &str,
    ) -> Result<String, CoreError> {
        let key = (controller.to_string(), cgroup.to_string(), file.to_string());
        match self.files.get(&key) {
            Some(s) => Ok(s.clone()),
            None => Err(CoreError::not_readable(
                format!("{controller}/{cgroup}/{file}"),
                io::Error::new(io::ErrorKind::NotFound, "no such mock file"),
            )),
        }
    }

    fn controller_file_exists(&self, controller: &str, cgroup: &str, file: &str) -> bool {
        let key = (controller.to_string(), cgroup.to_string(), file.to_string());
        *self.existing.get(&key).unwrap_or(&false)
    }

    fn nproc_online(&self) -> usize {
        self.nproc_online
    }

    fn nproc_configured(&self) -> usize {
        self.nproc_configured
    }

    fn clock_ticks_per_sec(&self) -> u64 {
        self.clock_ticks_per_sec
    }
}
