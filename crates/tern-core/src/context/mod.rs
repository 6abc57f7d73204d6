//! Execution contexts
//!
//! A [`Context`] carries what a unit of execution is allowed to do
//! (permissions), how much it may consume (limiters) and whether it must
//! stop (cancellation). Contexts form a tree: a child never has more rights
//! than its parent, shares its parent's token buckets and is cancelled with
//! it.
//!
//! Cancellation is either ungraceful ([`Context::cancel`]) or graceful
//! ([`Context::cancel_gracefully`]), the latter running the registered
//! teardown tasks first. Once a context is done its limiters are released
//! and its done hooks run on a separate thread.

pub mod permissions;

pub use permissions::{Permission, PermissionKind};

use crate::config::{DONE_HOOKS_DEADLINE, EXECUTION_CPU_TIME_LIMIT_NAME};
use crate::error::{CancellationCause, ContextError};
use crate::limits::{Limit, Limiter};
use crate::state::GlobalState;
use crate::value::{share_or_clone, Pattern, PatternNamespace, Value};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier of a context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    fn next() -> Self {
        ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// Progress of the graceful teardown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TeardownStatus {
    /// No graceful teardown was requested
    NeverStarted = 0,
    /// Teardown tasks are running
    TearingDown = 1,
    /// Every teardown task ran without error
    TornDown = 2,
    /// At least one teardown task failed
    TornDownWithErrors = 3,
    /// The context was cancelled before the teardown ended
    TornDownWithCancellation = 4,
}

impl TeardownStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => TeardownStatus::TearingDown,
            2 => TeardownStatus::TornDown,
            3 => TeardownStatus::TornDownWithErrors,
            4 => TeardownStatus::TornDownWithCancellation,
            _ => TeardownStatus::NeverStarted,
        }
    }
}

/// Error returned by teardown tasks and done hooks
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Task run by [`Context::cancel_gracefully`] before the context is cancelled
pub type TeardownTask = Box<dyn FnOnce(&Context) -> Result<(), HookError> + Send>;

/// Hook run once the context is done
pub type DoneHook = Box<dyn FnOnce(DoneHookInfo) -> Result<(), HookError> + Send>;

/// Argument of done hooks
#[derive(Debug, Clone, Copy)]
pub struct DoneHookInfo {
    /// Hooks should return before this instant
    pub deadline: Instant,
    /// Outcome of the graceful teardown
    pub teardown_status: TeardownStatus,
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration of a new context
#[derive(Debug, Clone, Default)]
pub struct ContextConfig {
    /// Granted permissions
    pub permissions: Vec<Permission>,
    /// Forbidden permissions, they override granted ones
    pub forbidden_permissions: Vec<Permission>,
    /// Limits, limits of the parent not listed here are inherited
    pub limits: Vec<Limit>,
    /// Initial token counts of root limiters, by limit name
    pub limit_tokens: FxHashMap<String, i64>,
    /// Host aliases, the parent's are inherited
    pub host_aliases: Vec<(String, Value)>,
    /// Parent context
    pub parent: Option<Arc<Context>>,
    /// Do not run done hooks
    pub disable_done_hooks: bool,
}

impl ContextConfig {
    /// Empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the granted permissions
    pub fn with_permissions(mut self, permissions: Vec<Permission>) -> Self {
        self.permissions = permissions;
        self
    }

    /// Set the forbidden permissions
    pub fn with_forbidden_permissions(mut self, permissions: Vec<Permission>) -> Self {
        self.forbidden_permissions = permissions;
        self
    }

    /// Set the limits
    pub fn with_limits(mut self, limits: Vec<Limit>) -> Self {
        self.limits = limits;
        self
    }

    /// Set the initial token count of a root limiter
    pub fn with_limit_tokens(mut self, name: impl Into<String>, tokens: i64) -> Self {
        self.limit_tokens.insert(name.into(), tokens);
        self
    }

    /// Add a host alias
    pub fn with_host_alias(mut self, name: impl Into<String>, host: Value) -> Self {
        self.host_aliases.push((name.into(), host));
        self
    }

    /// Set the parent context
    pub fn with_parent(mut self, parent: Arc<Context>) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Check that the configuration only restricts its parent: every
    /// permission is held by the parent, no limit is looser than the
    /// parent's and no host alias shadows one of the parent's.
    pub fn check(&self) -> Result<(), ContextError> {
        let Some(parent) = &self.parent else {
            return Ok(());
        };

        for permission in &self.permissions {
            if !parent.has_permission(permission) {
                return Err(ContextError::InvalidChildConfig(format!(
                    "parent of context should at least have permission {}",
                    permission
                )));
            }
        }

        for limit in &self.limits {
            if let Some(parent_limiter) = parent.limiters.get(&limit.name) {
                if !parent_limiter.limit().less_restrictive_than(limit) {
                    return Err(ContextError::InvalidChildConfig(format!(
                        "parent of context has a more restrictive limit '{}'",
                        limit.name
                    )));
                }
            }
        }

        for (name, _) in &self.host_aliases {
            if parent.resolve_host_alias(name).is_some() {
                return Err(ContextError::InvalidChildConfig(format!(
                    "host alias @{} is already defined in the parent context",
                    name
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Context
// =============================================================================

#[derive(Default)]
struct ContextData {
    granted: Vec<Permission>,
    forbidden: Vec<Permission>,
    named_patterns: FxHashMap<String, Arc<Pattern>>,
    pattern_namespaces: FxHashMap<String, Arc<PatternNamespace>>,
    host_aliases: FxHashMap<String, Value>,
    user_data: FxHashMap<String, Value>,
}

/// An execution context
pub struct Context {
    id: ContextId,
    this: Weak<Context>,
    parent: Option<Arc<Context>>,
    children: Mutex<Vec<Weak<Context>>>,
    started_at: Instant,

    done: AtomicBool,
    cause: Mutex<Option<CancellationCause>>,
    done_sender: Mutex<Option<Sender<()>>>,
    done_receiver: Receiver<()>,

    teardown_status: AtomicU8,
    teardown_tasks: Mutex<Vec<TeardownTask>>,
    done_hooks: Mutex<Option<Vec<DoneHook>>>,
    disable_done_hooks: bool,
    torn_down_sender: Mutex<Option<Sender<()>>>,
    torn_down_receiver: Receiver<()>,

    limiters: FxHashMap<String, Limiter>,
    data: RwLock<ContextData>,
    state: OnceCell<Weak<GlobalState>>,
}

impl Context {
    /// Create a context. Child contexts are checked against their parent.
    pub fn new(config: ContextConfig) -> Result<Arc<Context>, ContextError> {
        if config.parent.is_some() {
            config.check()?;
            if !config.limit_tokens.is_empty() {
                return Err(ContextError::InvalidChildConfig(
                    "limit tokens cannot be set for a child context".to_string(),
                ));
            }
        }

        let mut limiters: FxHashMap<String, Limiter> = FxHashMap::default();
        for limit in &config.limits {
            if limiters.contains_key(&limit.name) {
                return Err(ContextError::DuplicateLimit(limit.name.clone()));
            }
            let parent_limiter = config.parent.as_ref().and_then(|p| p.limiters.get(&limit.name));
            let limiter = match parent_limiter {
                Some(parent_limiter) => parent_limiter.child_with_limit(limit.clone()),
                None => Limiter::new(limit.clone(), config.limit_tokens.get(&limit.name).copied()),
            };
            limiters.insert(limit.name.clone(), limiter);
        }

        let mut host_aliases: FxHashMap<String, Value> = config.host_aliases.iter().cloned().collect();
        if let Some(parent) = &config.parent {
            for (name, limiter) in &parent.limiters {
                if !limiters.contains_key(name) {
                    limiters.insert(name.clone(), limiter.child());
                }
            }
            for (name, host) in parent.host_aliases() {
                host_aliases.entry(name).or_insert(host);
            }
        }

        let (done_sender, done_receiver) = channel::bounded(0);
        let (torn_down_sender, torn_down_receiver) = channel::bounded(0);
        let data = ContextData {
            granted: config.permissions.clone(),
            forbidden: config.forbidden_permissions.clone(),
            host_aliases,
            ..Default::default()
        };

        let ctx = Arc::new_cyclic(|this| Context {
            id: ContextId::next(),
            this: this.clone(),
            parent: config.parent.clone(),
            children: Mutex::new(Vec::new()),
            started_at: Instant::now(),
            done: AtomicBool::new(false),
            cause: Mutex::new(None),
            done_sender: Mutex::new(Some(done_sender)),
            done_receiver,
            teardown_status: AtomicU8::new(TeardownStatus::NeverStarted as u8),
            teardown_tasks: Mutex::new(Vec::new()),
            done_hooks: Mutex::new(Some(Vec::new())),
            disable_done_hooks: config.disable_done_hooks,
            torn_down_sender: Mutex::new(Some(torn_down_sender)),
            torn_down_receiver,
            limiters,
            data: RwLock::new(data),
            state: OnceCell::new(),
        });

        for limiter in ctx.limiters.values() {
            limiter.set_context_if_not_child(&ctx);
        }

        match &ctx.parent {
            Some(parent) => {
                let mut children = parent.children.lock();
                children.retain(|child| child.strong_count() > 0);
                children.push(Arc::downgrade(&ctx));
                drop(children);
                debug!(context = %ctx.id, parent = %parent.id, "child context created");
                if parent.is_done() {
                    ctx.cancel_with(CancellationCause::ParentCancelled);
                }
            }
            None => debug!(context = %ctx.id, "context created"),
        }
        Ok(ctx)
    }

    /// Identifier
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Parent context
    pub fn parent(&self) -> Option<&Arc<Context>> {
        self.parent.as_ref()
    }

    /// Time elapsed since creation
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    // =========================================================================
    // Cancellation
    // =========================================================================

    /// Whether the context is cancelled
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// The cancellation error, `None` while the context is running
    pub fn err(&self) -> Option<ContextError> {
        if !self.is_done() {
            return None;
        }
        let cause = self.cause.lock().clone().unwrap_or(CancellationCause::Explicit);
        Some(ContextError::Cancelled(cause))
    }

    fn cancelled_error(&self) -> ContextError {
        self.err()
            .unwrap_or(ContextError::Cancelled(CancellationCause::Explicit))
    }

    /// Disconnected once the context is done, usable in `select!`
    pub fn done_receiver(&self) -> &Receiver<()> {
        &self.done_receiver
    }

    /// Block until the context is done or `timeout` elapses. Returns whether
    /// the context is done.
    pub fn wait_done(&self, timeout: Duration) -> bool {
        matches!(
            self.done_receiver.recv_timeout(timeout),
            Err(RecvTimeoutError::Disconnected)
        )
    }

    /// Block until the limiters are released and the done hooks ran, or
    /// `timeout` elapses. Returns whether the teardown completed.
    pub fn wait_torn_down(&self, timeout: Duration) -> bool {
        matches!(
            self.torn_down_receiver.recv_timeout(timeout),
            Err(RecvTimeoutError::Disconnected)
        )
    }

    /// Status of the graceful teardown
    pub fn teardown_status(&self) -> TeardownStatus {
        TeardownStatus::from_u8(self.teardown_status.load(Ordering::Acquire))
    }

    /// Cancel the context and its descendants immediately
    pub fn cancel(&self) {
        self.cancel_with(CancellationCause::Explicit);
    }

    /// Run the teardown tasks, then cancel the context
    pub fn cancel_gracefully(&self) {
        self.cancel_gracefully_with(CancellationCause::Explicit);
    }

    /// [`Context::cancel_gracefully`] with a specific cause. Ignored if the
    /// context is done or a graceful teardown already started.
    pub fn cancel_gracefully_with(&self, cause: CancellationCause) {
        if self.is_done() {
            return;
        }
        if self
            .teardown_status
            .compare_exchange(
                TeardownStatus::NeverStarted as u8,
                TeardownStatus::TearingDown as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }

        debug!(context = %self.id, cause = %cause, "graceful teardown started");
        let tasks = std::mem::take(&mut *self.teardown_tasks.lock());
        let mut failed = false;
        let mut interrupted = false;

        for task in tasks {
            if self.is_done() {
                interrupted = true;
                break;
            }
            match panic::catch_unwind(AssertUnwindSafe(|| task(self))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(context = %self.id, error = %err, "graceful teardown task failed");
                    failed = true;
                }
                Err(_) => {
                    warn!(context = %self.id, "graceful teardown task panicked");
                    failed = true;
                }
            }
        }

        let status = if interrupted || self.is_done() {
            TeardownStatus::TornDownWithCancellation
        } else if failed {
            TeardownStatus::TornDownWithErrors
        } else {
            TeardownStatus::TornDown
        };
        self.teardown_status.store(status as u8, Ordering::Release);
        debug!(context = %self.id, status = ?status, "graceful teardown finished");

        self.cancel_with(cause);
    }

    pub(crate) fn cancel_with(&self, cause: CancellationCause) {
        {
            let mut current = self.cause.lock();
            if current.is_some() {
                return;
            }
            *current = Some(cause.clone());
            self.done.store(true, Ordering::Release);
        }

        let _ = self.teardown_status.compare_exchange(
            TeardownStatus::TearingDown as u8,
            TeardownStatus::TornDownWithCancellation as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.done_sender.lock().take();
        debug!(context = %self.id, cause = %cause, "context cancelled");

        let children: Vec<Arc<Context>> = self
            .children
            .lock()
            .drain(..)
            .filter_map(|child| child.upgrade())
            .collect();
        for child in children {
            child.cancel_with(CancellationCause::ParentCancelled);
        }

        self.spawn_teardown();
    }

    fn spawn_teardown(&self) {
        let Some(this) = self.this.upgrade() else {
            self.tear_down();
            return;
        };
        let spawned = thread::Builder::new()
            .name(format!("{}-teardown", self.id))
            .spawn(move || this.tear_down());
        if let Err(err) = spawned {
            warn!(context = %self.id, error = %err, "failed to spawn teardown thread");
            self.tear_down();
        }
    }

    fn tear_down(&self) {
        for limiter in self.limiters.values() {
            limiter.destroy();
        }

        let hooks = self.done_hooks.lock().take().unwrap_or_default();
        if !self.disable_done_hooks {
            let info = DoneHookInfo {
                deadline: Instant::now() + DONE_HOOKS_DEADLINE,
                teardown_status: self.teardown_status(),
            };
            for hook in hooks {
                if Instant::now() > info.deadline {
                    warn!(context = %self.id, "done hooks deadline exceeded, skipping remaining hooks");
                    break;
                }
                self.run_done_hook(hook, info);
            }
        }

        self.torn_down_sender.lock().take();
        trace!(context = %self.id, "context torn down");
    }

    fn run_done_hook(&self, hook: DoneHook, info: DoneHookInfo) {
        match panic::catch_unwind(AssertUnwindSafe(|| hook(info))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(context = %self.id, error = %err, "done hook failed"),
            Err(_) => warn!(context = %self.id, "done hook panicked"),
        }
    }

    /// Register a task run by the graceful teardown, in registration order
    pub fn on_graceful_teardown(&self, task: TeardownTask) {
        self.teardown_tasks.lock().push(task);
    }

    /// Register a hook run once the context is done. The hook runs
    /// immediately if the done hooks already ran.
    pub fn on_done(&self, hook: DoneHook) {
        let mut hooks = self.done_hooks.lock();
        match hooks.as_mut() {
            Some(hooks) => hooks.push(hook),
            None => {
                drop(hooks);
                if !self.disable_done_hooks {
                    let info = DoneHookInfo {
                        deadline: Instant::now() + DONE_HOOKS_DEADLINE,
                        teardown_status: self.teardown_status(),
                    };
                    self.run_done_hook(hook, info);
                }
            }
        }
    }

    // =========================================================================
    // Permissions
    // =========================================================================

    /// Whether the permission is granted and not forbidden
    pub fn has_permission(&self, permission: &Permission) -> bool {
        let data = self.data.read();
        if data.forbidden.iter().any(|f| f.includes(permission)) {
            return false;
        }
        data.granted.iter().any(|g| g.includes(permission))
    }

    /// Fail if the context is done or the permission is not granted
    pub fn check_has_permission(&self, permission: &Permission) -> Result<(), ContextError> {
        if let Some(err) = self.err() {
            return Err(err);
        }
        if !self.has_permission(permission) {
            return Err(ContextError::NotAllowed(permission.clone()));
        }
        Ok(())
    }

    /// Granted permissions
    pub fn granted_permissions(&self) -> Vec<Permission> {
        self.data.read().granted.clone()
    }

    /// Forbidden permissions
    pub fn forbidden_permissions(&self) -> Vec<Permission> {
        self.data.read().forbidden.clone()
    }

    /// Remove the granted permissions included by `dropped` and forbid them
    pub fn drop_permissions(&self, dropped: &[Permission]) {
        let mut data = self.data.write();
        data.granted
            .retain(|granted| !dropped.iter().any(|d| d.includes(granted)));
        data.forbidden.extend(dropped.iter().cloned());
        debug!(context = %self.id, count = dropped.len(), "permissions dropped");
    }

    /// Child context with the same permissions and limits
    pub fn bound_child(self: &Arc<Self>) -> Result<Arc<Context>, ContextError> {
        self.child_without(&[])
    }

    /// Child context with the same limits, without the permissions
    /// included by `removed`
    pub fn child_without(self: &Arc<Self>, removed: &[Permission]) -> Result<Arc<Context>, ContextError> {
        let (granted, mut forbidden) = {
            let data = self.data.read();
            (data.granted.clone(), data.forbidden.clone())
        };
        forbidden.extend(removed.iter().cloned());
        let permissions = granted
            .into_iter()
            .filter(|granted| !removed.iter().any(|r| r.includes(granted)))
            .collect();

        Context::new(ContextConfig {
            permissions,
            forbidden_permissions: forbidden,
            limits: self.limits(),
            parent: Some(self.clone()),
            disable_done_hooks: self.disable_done_hooks,
            ..Default::default()
        })
    }

    // =========================================================================
    // Limits
    // =========================================================================

    /// Limits of the context
    pub fn limits(&self) -> Vec<Limit> {
        self.limiters.values().map(|l| l.limit().clone()).collect()
    }

    /// Limiter of a limit
    pub fn limiter(&self, name: &str) -> Option<&Limiter> {
        self.limiters.get(name)
    }

    fn limiter_or_err(&self, name: &str) -> Result<&Limiter, ContextError> {
        self.limiters
            .get(name)
            .ok_or_else(|| ContextError::LimitNotDeclared(name.to_string()))
    }

    /// Take `count` tokens of a limit; rates block until tokens are
    /// available or the context is done. CPU time is not counted while
    /// waiting.
    pub fn take(&self, name: &str, count: i64) -> Result<(), ContextError> {
        if let Some(err) = self.err() {
            return Err(err);
        }
        let limiter = self.limiter_or_err(name)?;
        let taken = self.do_io(|| limiter.take(count, Some(&self.done_receiver)))?;
        if !taken {
            return Err(self.cancelled_error());
        }
        Ok(())
    }

    /// Give back tokens of a limit
    pub fn give_back(&self, name: &str, count: i64) -> Result<(), ContextError> {
        if let Some(err) = self.err() {
            return Err(err);
        }
        self.limiter_or_err(name)?.give_back(count);
        Ok(())
    }

    /// Available tokens of a limit
    pub fn available(&self, name: &str) -> Result<i64, ContextError> {
        Ok(self.limiter_or_err(name)?.available())
    }

    /// Stop counting CPU time until the guard is dropped. Nested guards
    /// are no-ops.
    pub fn pause_cpu_accounting(&self) -> CpuPauseGuard<'_> {
        let limiter = self
            .limiters
            .get(EXECUTION_CPU_TIME_LIMIT_NAME)
            .filter(|limiter| limiter.pause_decrementation_if_not_paused());
        CpuPauseGuard { limiter }
    }

    /// Stop counting CPU time for good
    pub fn definitely_stop_cpu_accounting(&self) {
        if let Some(limiter) = self.limiters.get(EXECUTION_CPU_TIME_LIMIT_NAME) {
            limiter.definitely_stop_decrementation();
        }
    }

    /// Run a blocking operation without counting CPU time
    pub fn do_io<T>(&self, f: impl FnOnce() -> T) -> T {
        let _paused = self.pause_cpu_accounting();
        f()
    }

    /// Sleep without counting CPU time. Fails if the context gets done.
    pub fn sleep(&self, duration: Duration) -> Result<(), ContextError> {
        let _paused = self.pause_cpu_accounting();
        match self.done_receiver.recv_timeout(duration) {
            Err(RecvTimeoutError::Timeout) => Ok(()),
            _ => Err(self.cancelled_error()),
        }
    }

    // =========================================================================
    // Patterns & host aliases
    // =========================================================================

    /// Define a named pattern
    pub fn add_named_pattern(&self, name: &str, pattern: Arc<Pattern>) -> Result<(), ContextError> {
        let mut data = self.data.write();
        if data.named_patterns.contains_key(name) {
            return Err(ContextError::DuplicatePatternDefinition(name.to_string()));
        }
        data.named_patterns.insert(name.to_string(), pattern);
        Ok(())
    }

    /// Resolve a named pattern, looking up the ancestors
    pub fn resolve_named_pattern(&self, name: &str) -> Option<Arc<Pattern>> {
        if let Some(pattern) = self.data.read().named_patterns.get(name) {
            return Some(pattern.clone());
        }
        self.parent.as_ref()?.resolve_named_pattern(name)
    }

    /// Define a pattern namespace
    pub fn add_pattern_namespace(
        &self,
        name: &str,
        namespace: Arc<PatternNamespace>,
    ) -> Result<(), ContextError> {
        let mut data = self.data.write();
        if data.pattern_namespaces.contains_key(name) {
            return Err(ContextError::DuplicateNamespaceDefinition(name.to_string()));
        }
        data.pattern_namespaces.insert(name.to_string(), namespace);
        Ok(())
    }

    /// Resolve a pattern namespace, looking up the ancestors
    pub fn resolve_pattern_namespace(&self, name: &str) -> Option<Arc<PatternNamespace>> {
        if let Some(namespace) = self.data.read().pattern_namespaces.get(name) {
            return Some(namespace.clone());
        }
        self.parent.as_ref()?.resolve_pattern_namespace(name)
    }

    /// Define a host alias
    pub fn add_host_alias(&self, name: &str, host: Value) -> Result<(), ContextError> {
        let mut data = self.data.write();
        if data.host_aliases.contains_key(name) {
            return Err(ContextError::DuplicateHostAlias(name.to_string()));
        }
        data.host_aliases.insert(name.to_string(), host);
        Ok(())
    }

    /// Resolve a host alias
    pub fn resolve_host_alias(&self, name: &str) -> Option<Value> {
        self.data.read().host_aliases.get(name).cloned()
    }

    /// Every host alias
    pub fn host_aliases(&self) -> Vec<(String, Value)> {
        self.data
            .read()
            .host_aliases
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    // =========================================================================
    // User data
    // =========================================================================

    /// Store host data. The value is shared or cloned for the closest state.
    pub fn put_user_data(&self, key: &str, value: Value) -> Result<(), ContextError> {
        let state = self.closest_state().ok_or(ContextError::NoState)?;
        let value = share_or_clone(&value, &state)?;

        let mut data = self.data.write();
        if data.user_data.contains_key(key) {
            return Err(ContextError::DuplicateUserData(key.to_string()));
        }
        data.user_data.insert(key.to_string(), value);
        Ok(())
    }

    /// Resolve host data, looking up the ancestors
    pub fn resolve_user_data(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.data.read().user_data.get(key) {
            return Some(value.clone());
        }
        self.parent.as_ref()?.resolve_user_data(key)
    }

    // =========================================================================
    // State
    // =========================================================================

    /// Associate the context with its state. Every limiter starts counting
    /// the state. Only the first call has an effect.
    pub(crate) fn set_closest_state(&self, state: &Arc<GlobalState>) {
        if self.state.set(Arc::downgrade(state)).is_err() {
            return;
        }
        for limiter in self.limiters.values() {
            limiter.set_state_once(state.id());
        }
    }

    /// State of this context or of the closest ancestor having one
    pub fn closest_state(&self) -> Option<Arc<GlobalState>> {
        if let Some(state) = self.state.get().and_then(Weak::upgrade) {
            return Some(state);
        }
        self.parent.as_ref()?.closest_state()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("parent", &self.parent.as_ref().map(|p| p.id))
            .field("done", &self.is_done())
            .field("limits", &self.limiters.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Resumes CPU time accounting on drop
#[must_use]
pub struct CpuPauseGuard<'a> {
    limiter: Option<&'a Limiter>,
}

impl Drop for CpuPauseGuard<'_> {
    fn drop(&mut self) {
        if let Some(limiter) = self.limiter.take() {
            if let Err(err) = limiter.resume_decrementation() {
                trace!(error = %err, "failed to resume CPU time accounting");
            }
        }
    }
}
