//! Host load and memory for the telemetry report

use tracing::debug;

/// One sample of the host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SystemStats {
    /// One-minute load as a percentage of the CPUs, capped at 100
    pub cpu: u8,
    /// Available memory in MiB
    pub free_mem: u16,
}

/// CPU percentage from `/proc/loadavg`
pub fn parse_loadavg(content: &str, cpus: usize) -> Option<u8> {
    let load: f32 = content.split_whitespace().next()?.parse().ok()?;
    let percent = load * 100.0 / cpus.max(1) as f32;
    Some(percent.clamp(0.0, 100.0).round() as u8)
}

/// Available memory in MiB from `/proc/meminfo`.
///
/// Falls back to `MemFree` on kernels without `MemAvailable`.
pub fn parse_meminfo(content: &str) -> Option<u16> {
    let field = |name: &str| {
        content.lines().find_map(|line| {
            let rest = line.strip_prefix(name)?.strip_prefix(':')?;
            rest.split_whitespace().next()?.parse::<u64>().ok()
        })
    };
    let kib = field("MemAvailable").or_else(|| field("MemFree"))?;
    Some((kib / 1024).min(u16::MAX as u64) as u16)
}

/// Read the host. Unreadable files report zero.
pub async fn sample() -> SystemStats {
    let cpus = std::thread::available_parallelism().map_or(1, |n| n.get());

    let cpu = match tokio::fs::read_to_string("/proc/loadavg").await {
        Ok(content) => parse_loadavg(&content, cpus),
        Err(e) => {
            debug!("Cannot read /proc/loadavg: {}", e);
            None
        }
    };
    let free_mem = match tokio::fs::read_to_string("/proc/meminfo").await {
        Ok(content) => parse_meminfo(&content),
        Err(e) => {
            debug!("Cannot read /proc/meminfo: {}", e);
            None
        }
    };

    SystemStats {
        cpu: cpu.unwrap_or(0),
        free_mem: free_mem.unwrap_or(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_loadavg() {
        assert_eq!(parse_loadavg("0.42 0.30 0.25 1/123 4567\n", 1), Some(42));
        assert_eq!(parse_loadavg("1.00 0.30 0.25 1/123 4567\n", 4), Some(25));
        assert_eq!(parse_loadavg("3.50 2.00 1.00 2/99 1\n", 1), Some(100));
        assert_eq!(parse_loadavg("", 1), None);
    }

    #[test]
    fn test_parse_meminfo() {
        let meminfo = "MemTotal:         499536 kB\n\
                       MemFree:           20480 kB\n\
                       MemAvailable:     262144 kB\n";
        assert_eq!(parse_meminfo(meminfo), Some(256));

        let old_kernel = "MemTotal:  499536 kB\nMemFree:   20480 kB\n";
        assert_eq!(parse_meminfo(old_kernel), Some(20));

        assert_eq!(parse_meminfo("garbage"), None);
    }
}
