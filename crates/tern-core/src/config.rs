//! Runtime configuration and well-known constants

use std::time::Duration;

/// Name of the wall-clock execution time limit
pub const EXECUTION_TOTAL_LIMIT_NAME: &str = "execution/total-time";

/// Name of the CPU time limit
pub const EXECUTION_CPU_TIME_LIMIT_NAME: &str = "execution/cpu-time";

/// Name of the limit on the number of lthreads running at the same time
pub const THREADS_SIMULTANEOUS_INSTANCES_LIMIT_NAME: &str = "lthreads/simul-instances";

/// Interval between two updates of every token bucket
pub const TOKEN_BUCKET_TICK_INTERVAL: Duration = Duration::from_millis(1);

/// Token counts are stored multiplied by this factor (ticks per second)
pub const TOKEN_BUCKET_CAPACITY_SCALE: i64 = 1_000;

/// Largest accepted limit value
pub const MAX_LIMIT_VALUE: i64 = i64::MAX / TOKEN_BUCKET_CAPACITY_SCALE;

/// Maximum depth of `share_or_clone` deep copies
pub const MAX_CLONING_DEPTH: usize = 10;

/// Deadline for running the done hooks of a context
pub const DONE_HOOKS_DEADLINE: Duration = Duration::from_secs(1);

/// VM configuration options
#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Number of value slots of the operand stack
    pub stack_size: usize,
    /// Maximum number of call frames, the module frame included
    pub max_frames: usize,
    /// How long a stream iteration waits for an element before checking
    /// for cancellation again
    pub stream_wait_timeout: Duration,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            stack_size: 200,
            max_frames: 20,
            stream_wait_timeout: Duration::from_millis(10),
        }
    }
}

impl VmConfig {
    /// Set the operand stack size
    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }

    /// Set the maximum number of call frames
    pub fn with_max_frames(mut self, max_frames: usize) -> Self {
        self.max_frames = max_frames;
        self
    }

    /// Set the stream polling timeout
    pub fn with_stream_wait_timeout(mut self, timeout: Duration) -> Self {
        self.stream_wait_timeout = timeout;
        self
    }
}
