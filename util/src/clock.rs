use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

/// Current UTC time as whole seconds since the epoch.
pub fn now_ts() -> i64 {
    Utc::now().timestamp()
}

/// Hands out run codes that are unique within this process and
/// (in practice) across hosts: `<utc timestamp>.<pid>.<sequence>`.
#[derive(Debug, Default)]
pub struct RunCodes {
    seq: AtomicU64,
}

impl RunCodes {
    pub const fn new() -> Self {
        Self {
            seq: AtomicU64::new(0),
        }
    }

    /// Get the next run code.
    pub fn next(&self) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        format!(
            "{}.{}.{}",
            Utc::now().format("%Y%m%d-%H%M%S%.6f"),
            std::process::id(),
            seq
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_run_codes_are_distinct() {
        let codes = RunCodes::new();
        let a = codes.next();
        let b = codes.next();
        assert_ne!(a, b);
        assert!(a.ends_with(".1"));
        assert!(b.ends_with(".2"));
        assert!(a.contains(&std::process::id().to_string()));
    }

    #[test]
    fn test_now_ts_is_recent() {
        // 2020-01-01T00:00:00Z
        assert!(now_ts() > 1_577_836_800);
    }
}
