use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static JOB_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a process-local job id.
///
/// Mixes wall-clock nanos, process id, a hash of the current thread id and an
/// atomic counter, so ids minted in a tight loop stay distinct.
pub fn new_job_id() -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let now_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let mut thread_hasher = DefaultHasher::new();
    std::thread::current().id().hash(&mut thread_hasher);
    let thread_hash = thread_hasher.finish() as u128;
    let pid = std::process::id() as u128;
    let counter = JOB_COUNTER.fetch_add(1, Ordering::Relaxed) as u128;

    let mixed = now_nanos ^ (pid << 32) ^ thread_hash ^ (counter << 96) ^ counter;
    format!("job-{:032x}", mixed)
}

/// Stable id for a declaration found by the syntax fallback extractor.
pub fn syntax_symbol_id(path: &str, name: &str, kind: &str, line: u32) -> String {
    let key = format!("{path}:{name}:{kind}:{line}");
    let hash = blake3::hash(key.as_bytes());
    format!("syn-{}", &hash.to_hex()[..16])
}

/// Project id derived from the canonical repository root.
pub fn generate_project_id(repo_root: &str) -> String {
    let canonical =
        std::fs::canonicalize(repo_root).unwrap_or_else(|_| std::path::PathBuf::from(repo_root));
    let hash = blake3::hash(canonical.to_string_lossy().as_bytes());
    hash.to_hex()[..16].to_string()
}
