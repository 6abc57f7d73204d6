//! Groups of lthreads

use super::LThread;
use crate::error::LThreadError;
use crate::value::Value;
use parking_lot::Mutex;
use std::sync::Arc;

/// Set of lthreads waited for or cancelled together
#[derive(Debug, Default)]
pub struct LThreadGroup {
    threads: Mutex<Vec<Arc<LThread>>>,
}

impl LThreadGroup {
    /// Empty group
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an lthread. An lthread can be added only once.
    pub fn add(&self, lthread: Arc<LThread>) -> Result<(), LThreadError> {
        let mut threads = self.threads.lock();
        if threads.iter().any(|t| Arc::ptr_eq(t, &lthread)) {
            return Err(LThreadError::Spawn(format!(
                "lthread {} is already in the group",
                lthread.id()
            )));
        }
        threads.push(lthread);
        Ok(())
    }

    /// Number of lthreads
    pub fn len(&self) -> usize {
        self.threads.lock().len()
    }

    /// Whether the group is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for every lthread, in insertion order, and return the list of
    /// their results. Stops at the first failure.
    pub fn wait_all_results(&self) -> Result<Value, LThreadError> {
        let threads = self.threads.lock().clone();
        let mut results = Vec::with_capacity(threads.len());
        for lthread in threads {
            results.push(lthread.wait_result()?);
        }
        Ok(Value::list(results))
    }

    /// Cancel every lthread
    pub fn cancel_all(&self) {
        for lthread in self.threads.lock().iter() {
            lthread.cancel();
        }
    }
}
