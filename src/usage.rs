// Usage reader (component B).  Produces a per-host-CPU array of raw
// user/system ticks for one cgroup, falling back from cpuacct.usage_all to
// cpuacct.usage_percpu when the former is absent.
//
// Grounded on proc_cpuview.c's read_cpuacct_usage_all, with one deliberate
// change: nanosecond-to-tick conversion uses exact integer arithmetic, not
// the source's floating-point conversion.

use crate::cgroup_adapter::CgroupAdapter;
use crate::error::CoreError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuSample {
    pub user: u64,
    pub system: u64,
    pub idle: u64,
    pub online: bool,
}

fn ns_to_ticks(ns: u64, hz: u64) -> u64 {
    // Order matters for determinism: multiply before dividing, same as the
    // kernel's own jiffy conversions, to avoid losing precision to integer
    // truncation on the division.
    ((ns as u128) * (hz as u128) / 1_000_000_000u128) as u64
}

/// Read `cpuacct.usage_all` (or, if absent, `cpuacct.usage_percpu`) for
/// `cgroup` and return a per-CPU array of length `nproc_conf`.  Rows for CPUs
/// not mentioned in the source file stay zeroed.
pub fn read_cgroup_usage(
    adapter: &dyn CgroupAdapter,
    cgroup: &str,
    nproc_conf: usize,
) -> Result<Vec<CpuSample>, CoreError> {
    let hz = adapter.clock_ticks_per_sec();
    let mut samples = vec![CpuSample::default(); nproc_conf];

    match adapter.read_controller_file("cpuacct", cgroup, "cpuacct.usage_all") {
        Ok(text) => parse_usage_all(&text, hz, &mut samples)?,
        Err(_) => {
            let text = adapter.read_controller_file("cpuacct", cgroup, "cpuacct.usage_percpu")?;
            parse_usage_percpu(&text, hz, &mut samples)?;
        }
    }

    Ok(samples)
}

fn parse_usage_all(text: &str, hz: u64, samples: &mut [CpuSample]) -> Result<(), CoreError> {
    let mut lines = text.lines();
    let header = lines.next().ok_or_else(|| {
        CoreError::parse("cpuacct.usage_all", "empty file, expected header line")
    })?;
    if header.split_ascii_whitespace().collect::<Vec<_>>() != ["cpu", "user", "system"] {
        return Err(CoreError::parse(
            "cpuacct.usage_all",
            format!("unexpected header: {header}"),
        ));
    }

    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_ascii_whitespace().collect();
        if fields.len() != 3 {
            return Err(CoreError::parse(
                "cpuacct.usage_all",
                format!("expected 3 fields: {line}"),
            ));
        }
        let idx: usize = fields[0]
            .parse()
            .map_err(|_| CoreError::parse("cpuacct.usage_all", format!("bad cpu index: {line}")))?;
        let user_ns: u64 = fields[1]
            .parse()
            .map_err(|_| CoreError::parse("cpuacct.usage_all", format!("bad user value: {line}")))?;
        let system_ns: u64 = fields[2]
            .parse()
            .map_err(|_| CoreError::parse("cpuacct.usage_all", format!("bad system value: {line}")))?;

        if idx < samples.len() {
            samples[idx].user = ns_to_ticks(user_ns, hz);
            samples[idx].system = ns_to_ticks(system_ns, hz);
        }
    }

    Ok(())
}

fn parse_usage_percpu(text: &str, hz: u64, samples: &mut [CpuSample]) -> Result<(), CoreError> {
    for (idx, field) in text.split_ascii_whitespace().enumerate() {
        let user_ns: u64 = field
            .parse()
            .map_err(|_| CoreError::parse("cpuacct.usage_percpu", format!("bad value: {field}")))?;
        if idx < samples.len() {
            samples[idx].user = ns_to_ticks(user_ns, hz);
            samples[idx].system = 0;
        }
    }
    Ok(())
}
