// /proc/cpuinfo renderer (component F).  Filters the host's
// cpuinfo records by cpuset membership, renumbers surviving records to a
// zero-based consecutive index, and caps at max_cpus.  Unlike the /proc/stat
// renderer this one is stateless across reads except for the per-open-file
// render cache (CpuInfoHandle) that lets a dispatcher satisfy offset-based
// reads without re-rendering.
//
// Grounded on proc_cpuview.c's proc_cpuinfo_read/is_processor_line/
// cpuline_in_cpuset.

use crate::cgroup_adapter::CgroupAdapter;
use crate::error::CoreError;
use crate::quota;

use std::fmt::Write as _;

const S390_TOKEN: &str = "IBM/S390";

fn extract_processor_number(rest: &str) -> Option<usize> {
    let after_colon = rest.split_once(':')?.1;
    after_colon.trim().parse::<usize>().ok()
}

fn render_x86(host: &str, cpuset: &[usize], max_cpus: usize) -> String {
    let mut out = String::new();
    let mut new_index = 0usize;
    let mut printing = false;
    let mut capped = false;

    for line in host.lines() {
        if let Some(rest) = line.strip_prefix("processor") {
            if capped {
                break;
            }
            match extract_processor_number(rest) {
                Some(num) if quota::cpu_visible(num, cpuset) => {
                    let _ = write!(out, "processor\t: {new_index}\n");
                    printing = true;
                    new_index += 1;
                    if max_cpus > 0 && new_index == max_cpus {
                        capped = true;
                    }
                }
                _ => printing = false,
            }
            continue;
        }
        if printing {
            out.push_str(line);
            out.push('\n');
        }
    }

    out
}

fn render_s390(host: &str, cpuset: &[usize], max_cpus: usize) -> String {
    let mut body = String::new();
    let mut new_index = 0usize;

    for line in host.lines() {
        if max_cpus > 0 && new_index == max_cpus {
            break;
        }
        let Some(rest) = line.strip_prefix("processor ") else {
            continue;
        };
        let Some((num_str, remainder)) = rest.split_once(':') else {
            continue;
        };
        let Ok(num) = num_str.trim().parse::<usize>() else {
            continue;
        };
        if !quota::cpu_visible(num, cpuset) {
            continue;
        }
        let _ = write!(body, "processor {new_index}:{remainder}\n");
        new_index += 1;
    }

    let mut out = String::new();
    let _ = write!(out, "vendor_id       : {S390_TOKEN}\n# processors    : {new_index}\n");
    out.push_str(&body);
    out
}

fn render(host_cpuinfo: &str, cpuset: &[usize], max_cpus: usize) -> String {
    let first_line = host_cpuinfo.lines().next().unwrap_or("");
    if first_line.contains(S390_TOKEN) {
        render_s390(host_cpuinfo, cpuset, max_cpus)
    } else {
        render_x86(host_cpuinfo, cpuset, max_cpus)
    }
}

/// Render the per-cgroup cpuinfo view into `out`. A view that
/// would not fit `out` is a fatal error for this call, matching the
/// /proc/stat renderer's contract.
pub fn render_cpuinfo(
    adapter: &dyn CgroupAdapter,
    cgroup: &str,
    host_cpuinfo: &str,
    out: &mut [u8],
) -> Result<usize, CoreError> {
    let cpuset = quota::read_cpuset(adapter, cgroup);
    let max_cpus = quota::max_cpu_count(adapter, cgroup);
    let text = render(host_cpuinfo, &cpuset, max_cpus);

    let bytes = text.as_bytes();
    if bytes.len() > out.len() {
        tracing::error!(
            cgroup,
            rendered = bytes.len(),
            capacity = out.len(),
            "proc/cpuinfo view does not fit the output buffer"
        );
        return Err(CoreError::BufferTruncation {
            what: "proc/cpuinfo".to_string(),
        });
    }
    out[..bytes.len()].copy_from_slice(bytes);
    Ok(bytes.len())
}

/// Per-open-file cache of a rendered cpuinfo buffer: render
/// once on open, then serve offset-based reads out of the cached bytes.
pub struct CpuInfoHandle {
    rendered: Vec<u8>,
}

impl CpuInfoHandle {
    pub fn open(
        adapter: &dyn CgroupAdapter,
        cgroup: &str,
        host_cpuinfo: &str,
    ) -> Result<Self, CoreError> {
        let cpuset = quota::read_cpuset(adapter, cgroup);
        let max_cpus = quota::max_cpu_count(adapter, cgroup);
        let text = render(host_cpuinfo, &cpuset, max_cpus);
        Ok(CpuInfoHandle {
            rendered: text.into_bytes(),
        })
    }

    pub fn len(&self) -> usize {
        self.rendered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rendered.is_empty()
    }

    /// Copy up to `buf.len()` bytes starting at `offset` into `buf`,
    /// returning the number of bytes copied (0 once `offset >= len()`).
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        if offset >= self.rendered.len() {
            return 0;
        }
        let available = &self.rendered[offset..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        n
    }
}
