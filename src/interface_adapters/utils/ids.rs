use std::sync::atomic::{AtomicU64, Ordering};

/// Returns a process-unique connection id.
///
/// Connection ids only need to be unique within this process; uniqueness
/// across restarts is carried by the session ids instead.
pub fn next_conn_id() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}
