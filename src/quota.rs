// Quota resolver (component A).  Translates a cgroup's CPU
// bandwidth control (cfs_quota_us / cfs_period_us) and cpuset mask into the
// two numbers the rest of the engine needs: an integer CPU cap and a
// fractional "exact" entitlement.
//
// Grounded on proc_cpuview.c's max_cpu_count/exact_cpu_count/
// read_cpu_cfs_param; the cpuset range parser below is written in the style
// of sonar's nodelist.rs hand-rolled scanner.

use crate::cgroup_adapter::CgroupAdapter;

/// Parse a cpuset range string like "0-3,6,8-9" into a sorted, deduplicated
/// list of CPU indices.  Malformed fragments are skipped rather than
/// propagated as an error: the cpuset controller is a best-effort input here,
/// and a partially-garbled mask should still degrade to "fewer visible CPUs"
/// rather than failing the whole read.
pub fn parse_cpuset(s: &str) -> Vec<usize> {
    let mut cpus = Vec::new();
    for fragment in s.trim().split(',') {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            continue;
        }
        if let Some((lo, hi)) = fragment.split_once('-') {
            if let (Ok(lo), Ok(hi)) = (lo.trim().parse::<usize>(), hi.trim().parse::<usize>()) {
                if lo <= hi {
                    cpus.extend(lo..=hi);
                }
            }
        } else if let Ok(cpu) = fragment.parse::<usize>() {
            cpus.push(cpu);
        }
    }
    cpus.sort_unstable();
    cpus.dedup();
    cpus
}

pub fn cpu_in_cpuset(cpu: usize, cpuset: &[usize]) -> bool {
    cpuset.binary_search(&cpu).is_ok()
}

/// Like `cpu_in_cpuset`, but an empty cpuset (not set, or unreadable) means
/// "no restriction known" rather than "nothing is visible" - used by both the
/// projection engine's host-stat pass and the cpuinfo renderer, which see an
/// empty cpuset for cgroups that simply never had one written.
pub fn cpu_visible(cpu: usize, cpuset: &[usize]) -> bool {
    cpuset.is_empty() || cpu_in_cpuset(cpu, cpuset)
}

pub(crate) fn read_cpuset(adapter: &dyn CgroupAdapter, cgroup: &str) -> Vec<usize> {
    adapter
        .read_controller_file("cpuset", cgroup, "cpuset.cpus")
        .map(|s| parse_cpuset(&s))
        .unwrap_or_default()
}

fn read_cfs_param(adapter: &dyn CgroupAdapter, cgroup: &str, file: &str) -> Option<i64> {
    adapter
        .read_controller_file("cpu", cgroup, file)
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
}

/// `max_cpu_count(cg) -> integer >= 0`.
pub fn max_cpu_count(adapter: &dyn CgroupAdapter, cgroup: &str) -> usize {
    let nproc = adapter.nproc_online();
    let cpuset = read_cpuset(adapter, cgroup);
    let nset = cpuset.len();

    let quota = read_cfs_param(adapter, cgroup, "cpu.cfs_quota_us");
    let period = read_cfs_param(adapter, cgroup, "cpu.cfs_period_us");

    let (q, p) = match (quota, period) {
        (Some(q), Some(p)) if q > 0 && p > 0 => (q, p),
        _ => return if nset > 0 { nset } else { 0 },
    };

    let mut r = (q / p) as usize;
    if q % p > 0 {
        r += 1;
    }

    if r > nproc {
        r = nproc;
    }

    if nset > 0 && nset < r {
        r = nset;
    }

    r
}

/// `exact_cpu_count(cg) -> real >= 0`.  The cpuset is *not*
/// applied here; the difference between this value and `max_cpu_count` is the
/// fractional slack the projection engine removes from idle time.
pub fn exact_cpu_count(adapter: &dyn CgroupAdapter, cgroup: &str) -> f64 {
    let nproc = adapter.nproc_online();
    let quota = read_cfs_param(adapter, cgroup, "cpu.cfs_quota_us");
    let period = read_cfs_param(adapter, cgroup, "cpu.cfs_period_us");

    let (q, p) = match (quota, period) {
        (Some(q), Some(p)) if q > 0 && p > 0 => (q, p),
        _ => return 0.0,
    };

    (q as f64 / p as f64).min(nproc as f64)
}
