//! File reads that tolerate a writer still holding the file

use overachiever_core::{OverachieverError, Result};
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            delay: Duration::from_millis(100),
        }
    }
}

/// Read a file as text, retrying transient failures
pub async fn read_all_text(path: &Path, policy: RetryPolicy) -> Result<String> {
    read_with_retry(path, policy, |p| async move { tokio::fs::read_to_string(p).await }).await
}

/// Retry loop behind [`read_all_text`], with the read itself injectable
pub async fn read_with_retry<F, Fut>(path: &Path, policy: RetryPolicy, mut read: F) -> Result<String>
where
    F: FnMut(PathBuf) -> Fut,
    Fut: Future<Output = io::Result<String>>,
{
    let mut attempt = 1;
    loop {
        match read(path.to_path_buf()).await {
            Ok(content) => return Ok(content),
            Err(e) if attempt < policy.max_retries && is_transient(&e) => {
                debug!("Read of {} failed ({}), attempt {}/{}", path.display(), e, attempt, policy.max_retries);
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
            Err(e) => return Err(OverachieverError::io(path, e)),
        }
    }
}

/// Failures a concurrent writer can cause: locks, sharing violations, and
/// half-written UTF-8
pub fn is_transient(err: &io::Error) -> bool {
    if matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut | io::ErrorKind::InvalidData
    ) {
        return true;
    }
    // ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
    #[cfg(windows)]
    if matches!(err.raw_os_error(), Some(32) | Some(33)) {
        return true;
    }
    false
}
