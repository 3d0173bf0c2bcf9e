// Projection engine (component C).  This is the heart of the
// crate: it turns a cgroup's raw cumulative CPU-tick counters into a
// per-cgroup view of host /proc/stat, redistributing the surplus ticks from
// CPUs the cgroup can't see onto the CPUs it can, with a fractional-quota
// idle correction on top.
//
// Grounded on proc_cpuview.c's cpuview_proc_stat / diff_cpu_usage /
// add_cpu_usage.  The host-stat pass below (marking online/offline and
// deriving an idle baseline) is grounded on the same file's read loop over
// the real /proc/stat.

use crate::cache::Cache;
use crate::cgroup_adapter::CgroupAdapter;
use crate::error::CoreError;
use crate::quota;
use crate::usage::{self, CpuSample};

use std::fmt::Write as _;

/// Parsed tail of one `cpuN ...` line from host /proc/stat.
struct HostCpuLine {
    idx: usize,
    fields: [u64; 10],
    has_all_fields: bool,
}

fn parse_host_cpu_line(line: &str) -> Option<HostCpuLine> {
    let rest = line.strip_prefix("cpu")?;
    let idx_end = rest.find(char::is_whitespace).unwrap_or(rest.len());
    let idx_str = &rest[..idx_end];
    if idx_str.is_empty() || idx_str.len() > 9 || !idx_str.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let idx: usize = idx_str.parse().ok()?;

    let mut fields = [0u64; 10];
    let mut has_all_fields = true;
    let mut n = 0;
    for (i, tok) in rest[idx_end..].split_ascii_whitespace().enumerate() {
        if i >= 10 {
            break;
        }
        match tok.parse::<u64>() {
            Ok(v) => fields[i] = v,
            Err(_) => {
                has_all_fields = false;
                break;
            }
        }
        n = i + 1;
    }
    if n < 10 {
        has_all_fields = false;
    }

    Some(HostCpuLine { idx, fields, has_all_fields })
}

/// True for the leading aggregate `cpu  <...>` line (note the lack of a
/// trailing index), as opposed to a per-CPU `cpuN ...` line or an unrelated
/// line. The caller must skip this line rather than treat it as the start of
/// the tail: real /proc/stat, and every cpuN line in it, is preceded by
/// exactly one of these.
fn is_aggregate_cpu_line(line: &str) -> bool {
    line.strip_prefix("cpu")
        .is_some_and(|rest| rest.starts_with(|c: char| c.is_whitespace()))
}

/// Host-stat pass: walk the `cpuN` lines of host
/// /proc/stat, mark each slot of `cg_cpu_usage` online/offline against the
/// cgroup's cpuset, and derive an idle baseline from the host's own
/// accounting. Returns the number of `cpuN` lines observed and the first
/// line that was not a `cpuN` line (if any), so the caller can retain it and
/// everything after it verbatim.
fn annotate_from_host_stat<'a>(
    host_stat: &'a str,
    cpuset: &[usize],
    cg_cpu_usage: &mut [CpuSample],
) -> (usize, Option<&'a str>, std::str::Lines<'a>) {
    let mut lines = host_stat.lines();
    let mut cpu_cnt = 0usize;
    // -1 sentinel: no cpuN line processed yet.
    let mut curcpu: i64 = -1;

    let tail_head = loop {
        let Some(line) = lines.next() else {
            break None;
        };
        let Some(parsed) = parse_host_cpu_line(line) else {
            if is_aggregate_cpu_line(line) {
                continue;
            }
            break Some(line);
        };

        if parsed.idx >= cg_cpu_usage.len() {
            continue;
        }

        curcpu += 1;
        cpu_cnt += 1;
        let physcpu = parsed.idx as i64;

        if !quota::cpu_visible(parsed.idx, cpuset) {
            let lo = curcpu.max(0) as usize;
            let hi = (physcpu as usize).min(cg_cpu_usage.len() - 1);
            for i in lo..=hi {
                cg_cpu_usage[i].online = false;
            }
            continue;
        }

        if curcpu < physcpu {
            let lo = curcpu.max(0) as usize;
            let hi = (physcpu as usize).min(cg_cpu_usage.len());
            for i in lo..hi {
                cg_cpu_usage[i].online = false;
            }
            curcpu = physcpu;
        }

        let slot = curcpu as usize;
        if slot >= cg_cpu_usage.len() {
            continue;
        }
        cg_cpu_usage[slot].online = true;

        if !parsed.has_all_fields {
            continue;
        }
        let f = parsed.fields;
        let all_used: u64 = f[0] + f[1] + f[2] + f[4] + f[5] + f[6] + f[7] + f[8] + f[9];
        let host_idle = f[3];
        let cg_used = cg_cpu_usage[slot].user + cg_cpu_usage[slot].system;
        if all_used >= cg_used {
            cg_cpu_usage[slot].idle = host_idle + (all_used - cg_used);
        } else {
            tracing::debug!(
                cpu = slot,
                all_used,
                cg_used,
                "host CPU accounted less total time than the cgroup alone; using host idle as-is"
            );
            cg_cpu_usage[slot].idle = host_idle;
        }
    };

    (cpu_cnt, tail_head, lines)
}

/// Render the per-cgroup /proc/stat view into `out`, returning the number of
/// bytes written.  `host_stat` is the verbatim contents of the host's own
/// /proc/stat.  A view that would not fit in `out` is a fatal error for this
/// call rather than a partial write.
pub fn render_proc_stat(
    cache: &Cache,
    adapter: &dyn CgroupAdapter,
    cgroup: &str,
    host_stat: &str,
    out: &mut [u8],
) -> Result<usize, CoreError> {
    let nproc_conf = adapter.nproc_configured();
    let cpuset = quota::read_cpuset(adapter, cgroup);
    let mut cg_cpu_usage = usage::read_cgroup_usage(adapter, cgroup, nproc_conf)?;

    let (cpu_cnt, tail_head, rest_lines) =
        annotate_from_host_stat(host_stat, &cpuset, &mut cg_cpu_usage);

    let mut max_cpus = quota::max_cpu_count(adapter, cgroup);
    if max_cpus > cpu_cnt {
        max_cpus = cpu_cnt;
    }

    let node = cache.find_or_create(cgroup, &cg_cpu_usage, adapter);
    let mut node_state = node.lock();
    node_state.ensure_capacity(nproc_conf);
    let nproc = node_state.cpu_count;
    // cg_cpu_usage may be shorter than the node's array if a previous call
    // saw a larger nproc_conf; pad it out so index math below stays in
    // bounds. It never shrinks back.
    if cg_cpu_usage.len() < nproc {
        cg_cpu_usage.resize(nproc, CpuSample::default());
    }

    // Reset detection: only the first online CPU is examined, reset or not,
    // then the scan stops -- this mirrors the source's loop, which breaks
    // unconditionally after the first online index regardless of whether the
    // reset condition held.
    for i in 0..nproc {
        if !cg_cpu_usage[i].online {
            continue;
        }
        if cg_cpu_usage[i].user < node_state.usage[i].user {
            node_state.reset(&cg_cpu_usage);
        }
        break;
    }

    // Diff against the previous sample.
    let mut diff = vec![CpuSample::default(); nproc];
    let mut total_sum: u64 = 0;
    for i in 0..nproc {
        if !cg_cpu_usage[i].online {
            continue;
        }
        let old = node_state.usage[i];
        let new = cg_cpu_usage[i];
        diff[i].user = new.user.saturating_sub(old.user);
        diff[i].system = new.system.saturating_sub(old.system);
        diff[i].idle = new.idle.saturating_sub(old.idle);
        total_sum += diff[i].user + diff[i].system + diff[i].idle;
    }
    for i in 0..nproc {
        node_state.usage[i].online = cg_cpu_usage[i].online;
        node_state.usage[i].user += diff[i].user;
        node_state.usage[i].system += diff[i].system;
        node_state.usage[i].idle += diff[i].idle;
    }

    let mut user_sum: u64 = 0;
    let mut system_sum: u64 = 0;
    let mut idle_sum: u64 = 0;
    let render_idx: Vec<usize>;

    if max_cpus > 0 {
        // Visible-CPU selection and surplus collection (step 6).
        let mut visible_idx = Vec::with_capacity(max_cpus);
        let mut user_surplus: u64 = 0;
        let mut system_surplus: u64 = 0;
        let mut slot = 0usize;
        for i in 0..nproc {
            if !cg_cpu_usage[i].online {
                continue;
            }
            if slot < max_cpus {
                visible_idx.push(i);
            } else {
                user_surplus += diff[i].user;
                system_surplus += diff[i].system;
            }
            slot += 1;
        }

        // Threshold and surplus redistribution (steps 7-8).
        let threshold = if cpu_cnt > 0 {
            (total_sum / cpu_cnt as u64) * max_cpus as u64
        } else {
            0
        };

        for &i in &visible_idx {
            if diff[i].user + diff[i].system < threshold {
                let mut free = threshold - diff[i].user - diff[i].system;
                if free > diff[i].idle {
                    free = diff[i].idle;
                }
                let add = free.min(user_surplus);
                diff[i].user += add;
                diff[i].idle -= add;
                user_surplus -= add;
            }
            if diff[i].user + diff[i].system < threshold {
                let mut free = threshold - diff[i].user - diff[i].system;
                if free > diff[i].idle {
                    free = diff[i].idle;
                }
                let add = free.min(system_surplus);
                diff[i].system += add;
                diff[i].idle -= add;
                system_surplus -= add;
            }
        }
        if user_surplus > 0 || system_surplus > 0 {
            tracing::debug!(
                cgroup,
                user_surplus,
                system_surplus,
                "surplus left over after redistribution to visible CPUs"
            );
        }

        // View accumulation (step 8).
        let mut diff_user_total: u64 = 0;
        let mut diff_system_total: u64 = 0;
        let mut diff_idle_total: u64 = 0;
        let mut max_diff_idle: u64 = 0;
        let mut max_diff_idx = visible_idx.first().copied().unwrap_or(0);
        for &i in &visible_idx {
            node_state.view[i].user += diff[i].user;
            node_state.view[i].system += diff[i].system;
            node_state.view[i].idle += diff[i].idle;
            user_sum += node_state.view[i].user;
            system_sum += node_state.view[i].system;
            idle_sum += node_state.view[i].idle;
            diff_user_total += diff[i].user;
            diff_system_total += diff[i].system;
            diff_idle_total += diff[i].idle;
            if diff[i].idle > max_diff_idle {
                max_diff_idle = diff[i].idle;
                max_diff_idx = i;
            }
        }

        // Fractional-quota idle correction (step 9).
        let exact = quota::exact_cpu_count(adapter, cgroup);
        if exact > 0.0 && exact < max_cpus as f64 {
            let total = diff_user_total + diff_system_total + diff_idle_total;
            let delta = (total as f64 * (1.0 - exact / max_cpus as f64)).round() as u64;
            idle_sum = idle_sum.saturating_sub(delta);
            node_state.view[max_diff_idx].idle = node_state.view[max_diff_idx].idle.saturating_sub(delta);
        }

        render_idx = visible_idx;
    } else {
        // No quota: pass the cumulative usage through unchanged (step 10).
        let mut idx = Vec::new();
        for i in 0..nproc {
            if !cg_cpu_usage[i].online {
                continue;
            }
            node_state.view[i] = node_state.usage[i];
            user_sum += node_state.view[i].user;
            system_sum += node_state.view[i].system;
            idle_sum += node_state.view[i].idle;
            idx.push(i);
        }
        render_idx = idx;
    }

    // Render (step 11).
    let mut text = String::new();
    let _ = write!(text, "cpu  {user_sum} 0 {system_sum} {idle_sum} 0 0 0 0 0 0\n");
    for (slot, &i) in render_idx.iter().enumerate() {
        let v = node_state.view[i];
        let _ = write!(text, "cpu{slot} {} 0 {} {} 0 0 0 0 0 0\n", v.user, v.system, v.idle);
    }
    if let Some(line) = tail_head {
        text.push_str(line);
        text.push('\n');
    }
    for line in rest_lines {
        text.push_str(line);
        text.push('\n');
    }

    let bytes = text.as_bytes();
    if bytes.len() > out.len() {
        tracing::error!(
            cgroup,
            rendered = bytes.len(),
            capacity = out.len(),
            "proc/stat view does not fit the output buffer"
        );
        return Err(CoreError::BufferTruncation {
            what: "proc/stat".to_string(),
        });
    }
    out[..bytes.len()].copy_from_slice(bytes);
    Ok(bytes.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_cgroup::Builder;

    fn render(
        cache: &Cache,
        adapter: &dyn CgroupAdapter,
        cgroup: &str,
        host_stat: &str,
    ) -> String {
        let mut buf = vec![0u8; 8192];
        let n = render_proc_stat(cache, adapter, cgroup, host_stat, &mut buf).unwrap();
        String::from_utf8(buf[..n].to_vec()).unwrap()
    }

    // S1: no quota, two online host CPUs. The view in the no-quota branch is
    // a pass-through of the node's cumulative counters, so a node has to be
    // created with a baseline read before a second read shows a nonzero
    // delta (the very first read after creation always diffs to zero).
    #[test]
    fn s1_no_quota_two_cpus() {
        let cache = Cache::new();
        let host = "cpu  0 0 0 0 0 0 0 0 0 0\n\
                    cpu0 0 0 0 1000 0 0 0 0 0 0\n\
                    cpu1 0 0 0 1000 0 0 0 0 0 0\n\
                    intr 0\n";
        let baseline = Builder::new()
            .with_file("cpu", "/c", "cpu.cfs_quota_us", "-1")
            .with_file("cpu", "/c", "cpu.cfs_period_us", "100000")
            .with_file("cpuacct", "/c", "cpuacct.usage_all", "cpu user system\n0 0 0\n1 0 0\n")
            .with_nproc_online(2)
            .with_nproc_configured(2)
            .with_clock_ticks_per_sec(100)
            .build();
        render(&cache, &baseline, "/c", host);

        let adapter = Builder::new()
            .with_file("cpu", "/c", "cpu.cfs_quota_us", "-1")
            .with_file("cpu", "/c", "cpu.cfs_period_us", "100000")
            .with_file(
                "cpuacct",
                "/c",
                "cpuacct.usage_all",
                "cpu user system\n0 120000000 30000000\n1 100000000 20000000\n",
            )
            .with_nproc_online(2)
            .with_nproc_configured(2)
            .with_clock_ticks_per_sec(100)
            .build();
        let host2 = "cpu  0 0 0 0 0 0 0 0 0 0\n\
                    cpu0 0 0 0 9000 0 0 0 0 0 0\n\
                    cpu1 0 0 0 9500 0 0 0 0 0 0\n\
                    intr 0\n";
        let out = render(&cache, &adapter, "/c", host2);
        let first = out.lines().next().unwrap();
        // user: 12+10=22 ticks, system: 3+2=5 ticks (all cumulative, so the
        // pass-through view equals the running total, not the delta alone).
        assert_eq!(first, "cpu  22 0 5 18500 0 0 0 0 0 0");
    }

    // S2: quota caps visibility to 1 CPU out of 4. Each CPU's diff this
    // interval is (100 user, 50 system, 150 idle) ticks; threshold works out
    // to 300, and CPU0 fills from 150 to its 300 threshold by pulling 150
    // surplus user ticks out of its own idle before saturating.
    #[test]
    fn s2_quota_one_cpu_of_four() {
        let cache = Cache::new();
        let host_zero = "cpu  0 0 0 0 0 0 0 0 0 0\n\
                    cpu0 0 0 0 0 0 0 0 0 0 0\n\
                    cpu1 0 0 0 0 0 0 0 0 0 0\n\
                    cpu2 0 0 0 0 0 0 0 0 0 0\n\
                    cpu3 0 0 0 0 0 0 0 0 0 0\n";
        let baseline = Builder::new()
            .with_file("cpu", "/c", "cpu.cfs_quota_us", "100000")
            .with_file("cpu", "/c", "cpu.cfs_period_us", "100000")
            .with_file("cpuset", "/c", "cpuset.cpus", "0-3")
            .with_file(
                "cpuacct",
                "/c",
                "cpuacct.usage_all",
                "cpu user system\n0 0 0\n1 0 0\n2 0 0\n3 0 0\n",
            )
            .with_nproc_online(4)
            .with_nproc_configured(4)
            .with_clock_ticks_per_sec(100)
            .build();
        render(&cache, &baseline, "/c", host_zero);

        let adapter = Builder::new()
            .with_file("cpu", "/c", "cpu.cfs_quota_us", "100000")
            .with_file("cpu", "/c", "cpu.cfs_period_us", "100000")
            .with_file("cpuset", "/c", "cpuset.cpus", "0-3")
            .with_file(
                "cpuacct",
                "/c",
                "cpuacct.usage_all",
                "cpu user system\n\
                 0 1000000000 500000000\n\
                 1 1000000000 500000000\n\
                 2 1000000000 500000000\n\
                 3 1000000000 500000000\n",
            )
            .with_nproc_online(4)
            .with_nproc_configured(4)
            .with_clock_ticks_per_sec(100)
            .build();
        let host = "cpu  0 0 0 0 0 0 0 0 0 0\n\
                    cpu0 0 0 0 150 0 0 0 0 0 0\n\
                    cpu1 0 0 0 150 0 0 0 0 0 0\n\
                    cpu2 0 0 0 150 0 0 0 0 0 0\n\
                    cpu3 0 0 0 150 0 0 0 0 0 0\n";
        let out = render(&cache, &adapter, "/c", host);
        let first = out.lines().next().unwrap();
        assert_eq!(first, "cpu  250 0 50 0 0 0 0 0 0 0");
    }

    // S3: fractional quota of 1.5 CPUs visible as 2; the correction step
    // trims idle time proportionally to the shortfall between exact and
    // max_cpus.
    #[test]
    fn s3_fractional_quota_idle_correction() {
        let cache = Cache::new();
        let adapter_spec = || {
            Builder::new()
                .with_file("cpu", "/c", "cpu.cfs_quota_us", "150000")
                .with_file("cpu", "/c", "cpu.cfs_period_us", "100000")
                .with_nproc_online(2)
                .with_nproc_configured(2)
                .with_clock_ticks_per_sec(100)
        };
        let baseline = adapter_spec()
            .with_file("cpuacct", "/c", "cpuacct.usage_all", "cpu user system\n0 0 0\n1 0 0\n")
            .build();
        let host_baseline = "cpu  0 0 0 0 0 0 0 0 0 0\n\
                    cpu0 0 0 0 0 0 0 0 0 0 0\n\
                    cpu1 0 0 0 0 0 0 0 0 0 0\n";
        render(&cache, &baseline, "/c", host_baseline);

        let adapter = adapter_spec()
            .with_file("cpuacct", "/c", "cpuacct.usage_all", "cpu user system\n0 0 0\n1 0 0\n")
            .build();
        let host = "cpu  0 0 0 0 0 0 0 0 0 0\n\
                    cpu0 0 0 0 3500 0 0 0 0 0 0\n\
                    cpu1 0 0 0 3500 0 0 0 0 0 0\n";
        let out = render(&cache, &adapter, "/c", host);
        // total diff = 7000 idle ticks, exact=1.5, max_cpus=2:
        // delta = round(7000 * (1 - 1.5/2)) = round(1750) = 1750.
        let first = out.lines().next().unwrap();
        assert_eq!(first, "cpu  0 0 0 5250 0 0 0 0 0 0");
    }

    // S4: a cgroup re-created with the same path shows lower cumulative
    // counters than the cache remembers; the node resets rather than
    // underflowing the diff.
    #[test]
    fn s4_reset_on_lower_counters() {
        let adapter = Builder::new()
            .with_file("cpu", "/c", "cpu.cfs_quota_us", "-1")
            .with_file("cpu", "/c", "cpu.cfs_period_us", "100000")
            .with_file(
                "cpuacct",
                "/c",
                "cpuacct.usage_all",
                "cpu user system\n0 900000000 0\n",
            )
            .with_nproc_online(1)
            .with_nproc_configured(1)
            .with_clock_ticks_per_sec(100)
            .build();
        let cache = Cache::new();
        let host = "cpu  0 0 0 0 0 0 0 0 0 0\ncpu0 0 0 0 1000 0 0 0 0 0 0\n";
        let _ = render(&cache, &adapter, "/c", host);

        let adapter2 = Builder::new()
            .with_file("cpu", "/c", "cpu.cfs_quota_us", "-1")
            .with_file("cpu", "/c", "cpu.cfs_period_us", "100000")
            .with_file(
                "cpuacct",
                "/c",
                "cpuacct.usage_all",
                "cpu user system\n0 100000000 0\n",
            )
            .with_nproc_online(1)
            .with_nproc_configured(1)
            .with_clock_ticks_per_sec(100)
            .build();
        let out = render(&cache, &adapter2, "/c", host);
        let first = out.lines().next().unwrap();
        // The reset reseeds `usage` from the new (lower) cumulative reading
        // itself, so the post-reset view shows that reading verbatim (10
        // ticks), not a diff against the pre-reset state.
        assert_eq!(first, "cpu  10 0 0 1000 0 0 0 0 0 0");
    }

    #[test]
    fn retains_non_cpu_lines_verbatim() {
        let adapter = Builder::new()
            .with_file("cpu", "/c", "cpu.cfs_quota_us", "-1")
            .with_file("cpu", "/c", "cpu.cfs_period_us", "100000")
            .with_file("cpuacct", "/c", "cpuacct.usage_all", "cpu user system\n0 0 0\n")
            .with_nproc_online(1)
            .with_nproc_configured(1)
            .with_clock_ticks_per_sec(100)
            .build();
        let cache = Cache::new();
        let host = "cpu  0 0 0 0 0 0 0 0 0 0\ncpu0 0 0 0 10 0 0 0 0 0 0\nintr 12345 0 0\nctxt 999\n";
        let out = render(&cache, &adapter, "/c", host);
        assert!(out.contains("intr 12345 0 0\n"));
        assert!(out.contains("ctxt 999\n"));
    }

    // The leading aggregate `cpu  ...` line must be skipped rather than
    // mistaken for the end of the cpuN lines -- otherwise cpu_cnt stays 0,
    // no slot is ever marked online, and cpu0 never shows up in the view.
    #[test]
    fn leading_aggregate_line_does_not_truncate_the_cpu_scan() {
        let adapter = Builder::new()
            .with_file("cpu", "/c", "cpu.cfs_quota_us", "-1")
            .with_file("cpu", "/c", "cpu.cfs_period_us", "100000")
            .with_file("cpuacct", "/c", "cpuacct.usage_all", "cpu user system\n0 0 0\n")
            .with_nproc_online(1)
            .with_nproc_configured(1)
            .with_clock_ticks_per_sec(100)
            .build();
        let cache = Cache::new();
        let host = "cpu  0 0 0 0 0 0 0 0 0 0\ncpu0 0 0 0 10 0 0 0 0 0 0\n";
        let out = render(&cache, &adapter, "/c", host);
        assert!(out.lines().any(|l| l.starts_with("cpu0 ")));
    }

    #[test]
    fn oversized_view_is_a_buffer_truncation_error() {
        let adapter = Builder::new()
            .with_file("cpu", "/c", "cpu.cfs_quota_us", "-1")
            .with_file("cpu", "/c", "cpu.cfs_period_us", "100000")
            .with_file("cpuacct", "/c", "cpuacct.usage_all", "cpu user system\n0 0 0\n")
            .with_nproc_online(1)
            .with_nproc_configured(1)
            .with_clock_ticks_per_sec(100)
            .build();
        let cache = Cache::new();
        let host = "cpu  0 0 0 0 0 0 0 0 0 0\ncpu0 0 0 0 10 0 0 0 0 0 0\n";
        let mut tiny = [0u8; 4];
        let err = render_proc_stat(&cache, &adapter, "/c", host, &mut tiny).unwrap_err();
        assert!(matches!(err, CoreError::BufferTruncation { .. }));
    }
}
