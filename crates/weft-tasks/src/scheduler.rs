//! Task scheduler: registration, collision handling and bounded async dispatch

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, instrument, warn};

use weft_core::{Config, Resource};

use crate::collision::{CollisionDetectionResult, CollisionDetector, DetectionContext};
use crate::error::{Result, SchedulerError, ValidationError};
use crate::execution::{ExecutionStatus, ResourceAllocation, TaskExecution};
use crate::handler::{ExecutionContext, HandlerRegistry, ProgressSink};
use crate::planner::{self, ExecutionPlan};
use crate::reporter::{ReporterRegistry, SchedulerEvent, TaskReporter};
use crate::resolver::{CollisionResolver, Resolution, ResolverSettings, ResourceAllocationStrategy};
use crate::resources::ResourcePool;
use crate::task::{Task, TaskId};
use crate::workload::AgentWorkload;

/// Options for the task scheduler
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Maximum executions holding a slot at once
    pub max_parallel_tasks: usize,
    /// Whether `add_task` dispatches ready tasks immediately
    pub auto_dispatch: bool,
    /// Running tasks per agent before new work counts as overload
    pub max_tasks_per_agent: usize,
    /// How long a serialized submission waits for its conflicts
    pub serialize_timeout: Duration,
    /// Collision resolver tunables
    pub resolver: ResolverSettings,
    /// Resources seeded into the pool
    pub resources: Vec<Resource>,
}

impl SchedulerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_parallel_tasks: config.scheduler.max_parallel_tasks,
            auto_dispatch: config.scheduler.auto_dispatch,
            max_tasks_per_agent: config.agents.max_concurrent_tasks,
            serialize_timeout: Duration::from_secs(config.collision.serialize_timeout_secs),
            resolver: ResolverSettings::from_config(config),
            resources: config.resources.clone(),
        }
    }
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Builder for [`TaskScheduler`]
pub struct SchedulerBuilder {
    options: SchedulerOptions,
    handlers: HandlerRegistry,
    reporters: ReporterRegistry,
    allocation: Option<Arc<dyn ResourceAllocationStrategy>>,
}

impl SchedulerBuilder {
    /// Handlers used to execute tasks (placeholders by default)
    pub fn handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    /// Replace the reporter registry
    pub fn reporters(mut self, reporters: ReporterRegistry) -> Self {
        self.reporters = reporters;
        self
    }

    /// Add one reporter to the registry
    pub fn reporter<R: TaskReporter + 'static>(mut self, reporter: R) -> Self {
        self.reporters.register(reporter);
        self
    }

    /// Strategy applied to resource-allocation collisions
    pub fn allocation_strategy(mut self, strategy: Arc<dyn ResourceAllocationStrategy>) -> Self {
        self.allocation = Some(strategy);
        self
    }

    pub fn build(self) -> Result<TaskScheduler> {
        let pool = ResourcePool::with_resources(self.options.resources.iter().cloned())?;

        let mut resolver = CollisionResolver::new(self.options.resolver.clone());
        if let Some(strategy) = self.allocation {
            resolver = resolver.with_allocation_strategy(strategy);
        }

        let (completions, _) = watch::channel(0u64);
        let inner = Inner {
            slots: Arc::new(Semaphore::new(self.options.max_parallel_tasks.max(1))),
            detector: CollisionDetector::new(self.options.max_tasks_per_agent),
            resolver,
            handlers: self.handlers,
            reporters: self.reporters,
            completions,
            state: Mutex::new(SchedulerState {
                pool,
                ..SchedulerState::default()
            }),
            options: self.options,
        };

        Ok(TaskScheduler {
            inner: Arc::new(inner),
        })
    }
}

/// Mutable scheduler state. Guarded by one mutex that is never held across an
/// `.await`.
#[derive(Default)]
struct SchedulerState {
    tasks: HashMap<TaskId, Task>,
    /// Latest execution per task
    executions: HashMap<TaskId, TaskExecution>,
    /// Superseded attempts, oldest first
    history: HashMap<TaskId, Vec<TaskExecution>>,
    /// Cancellation signal for each non-terminal execution
    cancel_signals: HashMap<TaskId, watch::Sender<bool>>,
    pool: ResourcePool,
    workload: AgentWorkload,
}

impl SchedulerState {
    fn check_registrable(&self, task: &Task) -> std::result::Result<(), ValidationError> {
        if self.tasks.contains_key(&task.id) {
            return Err(ValidationError::DuplicateTask(task.id.clone()));
        }
        if let Some(missing) = task
            .required_resources
            .iter()
            .find(|r| !self.pool.contains(&r.name))
        {
            return Err(ValidationError::UnknownResource {
                task: task.id.clone(),
                resource: missing.name.clone(),
            });
        }
        Ok(())
    }

    fn in_flight(&self) -> Vec<&Task> {
        self.executions
            .values()
            .filter(|e| e.status.is_active())
            .filter_map(|e| self.tasks.get(&e.task_id))
            .collect()
    }

    fn unmet_dependencies(&self, task: &Task) -> Vec<TaskId> {
        task.dependencies
            .iter()
            .filter(|dep| {
                self.executions.get(*dep).map(|e| e.status) != Some(ExecutionStatus::Completed)
            })
            .cloned()
            .collect()
    }

    /// Create a queued execution, moving any previous attempt to history
    fn queue_execution(&mut self, id: &TaskId) -> (u32, watch::Receiver<bool>) {
        let attempt = match self.executions.remove(id) {
            Some(previous) => {
                let attempt = previous.attempt + 1;
                self.history.entry(id.clone()).or_default().push(previous);
                attempt
            }
            None => 1,
        };
        self.executions
            .insert(id.clone(), TaskExecution::queued(id.clone(), attempt));

        let (tx, rx) = watch::channel(false);
        self.cancel_signals.insert(id.clone(), tx);
        (attempt, rx)
    }

    fn settled(&self, ids: &[TaskId]) -> bool {
        ids.iter()
            .all(|id| self.executions.get(id).map_or(true, TaskExecution::is_terminal))
    }
}

enum Start {
    Run(Vec<ResourceAllocation>),
    /// An exclusive resource is held elsewhere; stay queued
    Blocked(TaskId),
    Fail(String),
    Skip,
}

enum Submission {
    Registered,
    Split(Vec<Task>),
}

enum Step {
    Wait(Vec<TaskId>),
    Split(Vec<Task>),
    Registered(Option<Dispatch>),
}

/// A queued execution ready to be spawned
struct Dispatch {
    task: Task,
    attempt: u32,
    cancel: watch::Receiver<bool>,
    /// Slot taken at dispatch time, if any
    permit: Option<OwnedSemaphorePermit>,
}

struct Inner {
    options: SchedulerOptions,
    state: Mutex<SchedulerState>,
    slots: Arc<Semaphore>,
    detector: CollisionDetector,
    resolver: CollisionResolver,
    handlers: HandlerRegistry,
    reporters: ReporterRegistry,
    /// Bumped on every terminal transition
    completions: watch::Sender<u64>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: SchedulerEvent) {
        self.reporters.broadcast(&event);
    }

    fn detect(&self, state: &SchedulerState, task: &Task) -> CollisionDetectionResult {
        let ctx = DetectionContext {
            tasks: &state.tasks,
            in_flight: state.in_flight(),
            pool: &state.pool,
            workload: &state.workload,
        };
        self.detector.detect(task, &ctx)
    }

    fn spawn_execution(self: &Arc<Self>, dispatch: Dispatch) {
        tokio::spawn(Arc::clone(self).run_execution(dispatch));
    }

    /// Queue an execution for a registered task whose dependencies are
    /// complete, provided a slot is free.
    ///
    /// Tasks carrying a scheduled delay take their slot after the delay.
    fn prepare_dispatch(&self, state: &mut SchedulerState, id: &TaskId) -> Option<Dispatch> {
        let task = state.tasks.get(id)?;
        if state.executions.contains_key(id) || !state.unmet_dependencies(task).is_empty() {
            return None;
        }
        let task = task.clone();

        let permit = if task.metadata.scheduled_delay.is_some() {
            if self.slots.available_permits() == 0 {
                debug!(task_id = %id, "no free slot, leaving task for batch execution");
                return None;
            }
            None
        } else {
            match Arc::clone(&self.slots).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    debug!(task_id = %id, "no free slot, leaving task for batch execution");
                    return None;
                }
            }
        };

        let (attempt, cancel) = state.queue_execution(id);
        Some(Dispatch {
            task,
            attempt,
            cancel,
            permit,
        })
    }

    async fn wait_until_settled(&self, ids: &[TaskId]) {
        let mut completions = self.completions.subscribe();
        loop {
            if self.lock().settled(ids) {
                return;
            }
            if completions.changed().await.is_err() {
                return;
            }
        }
    }

    async fn run_execution(self: Arc<Self>, dispatch: Dispatch) {
        let Dispatch {
            task,
            attempt,
            cancel,
            mut permit,
        } = dispatch;

        if let Some(delay) = task.metadata.scheduled_delay {
            debug!(task_id = %task.id, delay_ms = delay.as_millis() as u64, "honoring scheduled delay");
            tokio::time::sleep(delay).await;
        }

        let (allocations, _permit) = loop {
            // Subscribed before the attempt so a release in between is not missed
            let mut completions = self.completions.subscribe();
            let slot = match permit.take() {
                Some(slot) => slot,
                None => match Arc::clone(&self.slots).acquire_owned().await {
                    Ok(slot) => slot,
                    Err(_) => {
                        self.finish(&task, attempt, Err("scheduler is shutting down".to_string()));
                        return;
                    }
                },
            };

            match self.start(&task, attempt) {
                Start::Run(allocations) => break (allocations, slot),
                Start::Skip => return,
                Start::Fail(reason) => {
                    self.finish(&task, attempt, Err(reason));
                    return;
                }
                Start::Blocked(holder) => {
                    debug!(task_id = %task.id, holder = %holder, "exclusive resource busy, waiting");
                    drop(slot);
                    if completions.changed().await.is_err() {
                        return;
                    }
                }
            }
        };

        self.emit(SchedulerEvent::TaskStarted {
            id: task.id.clone(),
            attempt,
            agent_id: task.agent_id.clone(),
        });
        if !allocations.is_empty() {
            self.emit(SchedulerEvent::ResourceAllocated {
                id: task.id.clone(),
                allocations,
            });
        }

        let outcome = self.invoke_handler(&task, attempt, cancel).await;
        self.finish(&task, attempt, outcome);
    }

    /// Move a queued execution to running, committing resources and workload
    fn start(&self, task: &Task, attempt: u32) -> Start {
        let mut guard = self.lock();
        let state = &mut *guard;

        let unmet = state.unmet_dependencies(task);
        let Some(execution) = state.executions.get_mut(&task.id) else {
            return Start::Skip;
        };
        if execution.attempt != attempt || execution.status != ExecutionStatus::Queued {
            return Start::Skip;
        }
        if !unmet.is_empty() {
            let names: Vec<&str> = unmet.iter().map(TaskId::as_str).collect();
            return Start::Fail(format!("dependencies did not complete: {}", names.join(", ")));
        }

        let allocations = match state.pool.allocate(&task.id, &task.required_resources) {
            Ok(allocations) => allocations,
            Err(SchedulerError::ResourceBusy { holder, .. }) => return Start::Blocked(holder),
            Err(e) => return Start::Fail(e.to_string()),
        };
        execution.transition(ExecutionStatus::Running);
        execution.resource_usage = allocations.clone();
        if let Some(agent) = &task.agent_id {
            state.workload.increment(agent);
        }
        Start::Run(allocations)
    }

    async fn invoke_handler(
        self: &Arc<Self>,
        task: &Task,
        attempt: u32,
        cancel: watch::Receiver<bool>,
    ) -> std::result::Result<serde_json::Value, String> {
        let Some(handler) = self.handlers.get(task.task_type) else {
            return Err(format!("no handler registered for task type '{}'", task.task_type));
        };

        let sink: Arc<dyn ProgressSink> = Arc::clone(self) as Arc<dyn ProgressSink>;
        let ctx = ExecutionContext::new(task.id.clone(), attempt, cancel, sink);
        let task = task.clone();

        // Run on its own task so a panicking handler surfaces as a JoinError
        match tokio::spawn(async move { handler.execute(&task, &ctx).await }).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) => Err(describe_join_error(e)),
        }
    }

    /// Record the outcome of an attempt and release what it holds.
    ///
    /// Executions that were already cancelled are left untouched.
    fn finish(&self, task: &Task, attempt: u32, outcome: std::result::Result<serde_json::Value, String>) {
        let mut events = Vec::new();
        {
            let mut guard = self.lock();
            let state = &mut *guard;

            let Some(execution) = state.executions.get_mut(&task.id) else {
                return;
            };
            if execution.attempt != attempt || execution.is_terminal() {
                return;
            }

            let was_active = execution.status.is_active();
            match outcome {
                Ok(value) => {
                    execution.transition(ExecutionStatus::Completed);
                    execution.progress = 100;
                    execution.result = Some(value);
                }
                Err(error) => {
                    execution.transition(ExecutionStatus::Failed);
                    execution.error = Some(error);
                }
            }
            let duration = execution.elapsed();
            let terminal = match execution.status {
                ExecutionStatus::Completed => SchedulerEvent::TaskCompleted {
                    id: task.id.clone(),
                    attempt,
                    duration,
                },
                _ => SchedulerEvent::TaskFailed {
                    id: task.id.clone(),
                    attempt,
                    duration,
                    error: execution.error.clone().unwrap_or_default(),
                },
            };

            let released = state.pool.release(&task.id);
            if was_active {
                if let Some(agent) = &task.agent_id {
                    state.workload.decrement(agent);
                }
            }
            state.cancel_signals.remove(&task.id);

            if !released.is_empty() {
                events.push(SchedulerEvent::ResourceReleased {
                    id: task.id.clone(),
                    allocations: released,
                });
            }
            events.push(terminal);
        }

        for event in events {
            self.emit(event);
        }
        self.completions.send_modify(|n| *n += 1);
    }
}

impl ProgressSink for Inner {
    fn report_progress(&self, task_id: &TaskId, attempt: u32, progress: u8) {
        let progress = progress.min(100);
        let updated = {
            let mut state = self.lock();
            match state.executions.get_mut(task_id) {
                Some(execution)
                    if execution.attempt == attempt
                        && execution.status == ExecutionStatus::Running
                        && progress > execution.progress =>
                {
                    execution.progress = progress;
                    true
                }
                _ => false,
            }
        };

        if updated {
            self.emit(SchedulerEvent::TaskProgress {
                id: task_id.clone(),
                attempt,
                progress,
            });
        }
    }
}

fn describe_join_error(err: JoinError) -> String {
    if !err.is_panic() {
        return format!("handler aborted: {err}");
    }
    let payload = err.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("handler panicked: {message}")
}

/// Concurrent task scheduler.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<Inner>,
}

impl TaskScheduler {
    pub fn builder(options: SchedulerOptions) -> SchedulerBuilder {
        SchedulerBuilder {
            options,
            handlers: HandlerRegistry::with_placeholders(1.0),
            reporters: ReporterRegistry::new(),
            allocation: None,
        }
    }

    /// Scheduler with placeholder handlers and tracing output
    pub fn new(options: SchedulerOptions) -> Result<Self> {
        Self::builder(options).build()
    }

    pub fn options(&self) -> &SchedulerOptions {
        &self.inner.options
    }

    /// Validate, check for collisions, resolve and register a task.
    ///
    /// Ready tasks are dispatched right away when auto dispatch is on and a
    /// slot is free. A serialized submission re-runs detection once its
    /// conflicts settle. A task split by the resolver is replaced by its subtasks;
    /// the returned id is always the one submitted.
    #[instrument(skip_all, fields(task_id = %task.id))]
    pub async fn add_task(&self, task: Task) -> Result<TaskId> {
        let submitted = task.id.clone();
        let mut pending = VecDeque::from([task]);

        while let Some(task) = pending.pop_front() {
            if let Submission::Split(subtasks) = self.submit(task).await? {
                pending.extend(subtasks);
            }
        }
        Ok(submitted)
    }

    async fn submit(&self, mut task: Task) -> Result<Submission> {
        task.validate()?;

        loop {
            let mut events = Vec::new();
            let step = self.decide(&mut task, &mut events);
            for event in events {
                self.inner.emit(event);
            }

            match step? {
                Step::Wait(conflicting) => self.wait_for_conflicts(&task.id, &conflicting).await?,
                Step::Split(subtasks) => return Ok(Submission::Split(subtasks)),
                Step::Registered(dispatch) => {
                    if let Some(dispatch) = dispatch {
                        self.inner.spawn_execution(dispatch);
                    }
                    return Ok(Submission::Registered);
                }
            }
        }
    }

    /// Detect and resolve against the current state. A task that may proceed
    /// is registered and queued for dispatch under the same lock, so no other
    /// submission can slip in between the check and the registration.
    fn decide(&self, task: &mut Task, events: &mut Vec<SchedulerEvent>) -> Result<Step> {
        let mut guard = self.inner.lock();
        let state = &mut *guard;

        state.check_registrable(task)?;
        let detection = self.inner.detect(state, task);
        let resolution = self
            .inner
            .resolver
            .handle_collision(task, &detection, &state.pool, &state.workload);

        if detection.has_collision {
            if let Some(collision_type) = detection.collision_type {
                events.push(SchedulerEvent::CollisionDetected {
                    id: task.id.clone(),
                    collision_type,
                    severity: detection.severity,
                    conflicting: detection.conflicting_tasks.clone(),
                });
            }
        }
        let resolution = resolution?;
        if let Some(recommendation) = detection.recommendation {
            events.push(SchedulerEvent::CollisionResolved {
                id: task.id.clone(),
                recommendation,
                outcome: resolution.to_string(),
            });
        }

        match resolution {
            Resolution::WaitFor(conflicting) => Ok(Step::Wait(conflicting)),
            Resolution::Split(subtasks) => Ok(Step::Split(subtasks)),
            _ => {
                let id = task.id.clone();
                events.push(SchedulerEvent::TaskAdded {
                    id: id.clone(),
                    task_type: task.task_type,
                    priority: task.priority,
                });
                state.tasks.insert(id.clone(), task.clone());

                let dispatch = if self.inner.options.auto_dispatch {
                    self.inner.prepare_dispatch(state, &id)
                } else {
                    None
                };
                Ok(Step::Registered(dispatch))
            }
        }
    }

    async fn wait_for_conflicts(&self, id: &TaskId, conflicting: &[TaskId]) -> Result<()> {
        let timeout = self.inner.options.serialize_timeout;
        info!(task_id = %id, waiting_on = conflicting.len(), "serializing behind conflicting tasks");

        tokio::time::timeout(timeout, self.inner.wait_until_settled(conflicting))
            .await
            .map_err(|_| SchedulerError::SerializeTimeout {
                task: id.clone(),
                timeout,
                waiting_on: conflicting.to_vec(),
            })
    }

    /// Plan `task_ids` into batches and run them batch by batch.
    ///
    /// In-flight tasks are awaited, completed tasks are reported as they are
    /// and failed or cancelled tasks are retried. Task failures never abort
    /// the run; only planning errors are returned.
    #[instrument(skip_all, fields(tasks = task_ids.len()))]
    pub async fn execute_parallel(&self, task_ids: &[TaskId]) -> Result<HashMap<TaskId, TaskExecution>> {
        let started = Instant::now();
        let plan = self.create_execution_plan(task_ids)?;
        let mut results = HashMap::new();

        for (index, batch) in plan.batches.iter().enumerate() {
            self.inner.emit(SchedulerEvent::BatchStarted {
                batch: index,
                task_count: batch.len(),
            });

            let mut waiting = Vec::new();
            {
                let mut state = self.inner.lock();
                for id in batch {
                    let status = state.executions.get(id).map(|e| e.status);
                    match status {
                        Some(ExecutionStatus::Completed) => {}
                        Some(status) if !status.is_terminal() => waiting.push(id.clone()),
                        _ => {
                            let Some(task) = state.tasks.get(id).cloned() else {
                                continue;
                            };
                            let (attempt, cancel) = state.queue_execution(id);
                            if attempt > 1 {
                                info!(task_id = %id, attempt, "retrying task");
                            }
                            self.inner.spawn_execution(Dispatch {
                                task,
                                attempt,
                                cancel,
                                permit: None,
                            });
                            waiting.push(id.clone());
                        }
                    }
                }
            }

            self.inner.wait_until_settled(&waiting).await;

            let state = self.inner.lock();
            for id in batch {
                if let Some(execution) = state.executions.get(id) {
                    results.insert(id.clone(), execution.clone());
                }
            }
        }

        let count = |status: ExecutionStatus| results.values().filter(|e| e.status == status).count();
        self.inner.emit(SchedulerEvent::PlanCompleted {
            total: results.len(),
            succeeded: count(ExecutionStatus::Completed),
            failed: count(ExecutionStatus::Failed),
            cancelled: count(ExecutionStatus::Cancelled),
            duration: started.elapsed(),
        });

        Ok(results)
    }

    /// Partition registered tasks into dependency-ordered, resource-safe batches
    pub fn create_execution_plan(&self, task_ids: &[TaskId]) -> Result<ExecutionPlan> {
        let state = self.inner.lock();
        planner::create_execution_plan(task_ids, &state.tasks, &state.pool)
    }

    /// Check a task against the current in-flight work without submitting it
    pub fn detect_collisions(&self, task: &Task) -> CollisionDetectionResult {
        let state = self.inner.lock();
        self.inner.detect(&state, task)
    }

    /// Cancel a queued, running or paused execution. Resources are released
    /// immediately; the handler is signalled but not interrupted.
    pub fn cancel_task(&self, id: &TaskId) -> bool {
        let mut events = Vec::new();
        {
            let mut guard = self.inner.lock();
            let state = &mut *guard;

            let Some(execution) = state.executions.get_mut(id) else {
                return false;
            };
            let was_active = execution.status.is_active();
            if !execution.transition(ExecutionStatus::Cancelled) {
                return false;
            }
            let attempt = execution.attempt;

            let released = state.pool.release(id);
            if was_active {
                if let Some(agent) = state.tasks.get(id).and_then(|t| t.agent_id.as_deref()) {
                    state.workload.decrement(agent);
                }
            }
            if let Some(signal) = state.cancel_signals.remove(id) {
                signal.send_replace(true);
            }

            if !released.is_empty() {
                events.push(SchedulerEvent::ResourceReleased {
                    id: id.clone(),
                    allocations: released,
                });
            }
            events.push(SchedulerEvent::TaskCancelled {
                id: id.clone(),
                attempt,
            });
        }

        info!(task_id = %id, "task cancelled");
        for event in events {
            self.inner.emit(event);
        }
        self.inner.completions.send_modify(|n| *n += 1);
        true
    }

    /// Pause a running execution. Progress reports are ignored until resumed.
    pub fn pause_task(&self, id: &TaskId) -> bool {
        let paused = self.transition(id, ExecutionStatus::Running, ExecutionStatus::Paused);
        if paused {
            self.inner.emit(SchedulerEvent::TaskPaused { id: id.clone() });
        }
        paused
    }

    /// Resume a paused execution
    pub fn resume_task(&self, id: &TaskId) -> bool {
        let resumed = self.transition(id, ExecutionStatus::Paused, ExecutionStatus::Running);
        if resumed {
            self.inner.emit(SchedulerEvent::TaskResumed { id: id.clone() });
        }
        resumed
    }

    fn transition(&self, id: &TaskId, from: ExecutionStatus, to: ExecutionStatus) -> bool {
        let mut state = self.inner.lock();
        match state.executions.get_mut(id) {
            Some(execution) if execution.status == from => execution.transition(to),
            _ => false,
        }
    }

    /// Latest execution of a task
    pub fn get_execution_status(&self, id: &TaskId) -> Option<TaskExecution> {
        self.inner.lock().executions.get(id).cloned()
    }

    /// Every attempt of a task, oldest first
    pub fn execution_history(&self, id: &TaskId) -> Vec<TaskExecution> {
        let state = self.inner.lock();
        state
            .history
            .get(id)
            .into_iter()
            .flatten()
            .chain(state.executions.get(id))
            .cloned()
            .collect()
    }

    /// Utilization per resource, in percent of capacity
    pub fn get_resource_utilization(&self) -> BTreeMap<String, f64> {
        self.inner.lock().pool.utilization()
    }

    /// Running tasks per agent
    pub fn get_agent_workload(&self) -> BTreeMap<String, usize> {
        self.inner.lock().workload.snapshot()
    }

    /// A registered task
    pub fn task(&self, id: &TaskId) -> Option<Task> {
        self.inner.lock().tasks.get(id).cloned()
    }

    /// Ids of all registered tasks, sorted
    pub fn task_ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.inner.lock().tasks.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Forget tasks whose latest execution is terminal and that no unfinished
    /// task depends on. Returns how many were evicted.
    pub fn cleanup_finished(&self) -> usize {
        let mut guard = self.inner.lock();
        let state = &mut *guard;

        let finished: HashSet<TaskId> = state
            .executions
            .values()
            .filter(|e| e.is_terminal())
            .map(|e| e.task_id.clone())
            .collect();
        let needed: HashSet<TaskId> = state
            .tasks
            .values()
            .filter(|t| !finished.contains(&t.id))
            .flat_map(|t| t.dependencies.iter().cloned())
            .collect();

        let evicted: Vec<TaskId> = finished.into_iter().filter(|id| !needed.contains(id)).collect();
        for id in &evicted {
            state.tasks.remove(id);
            state.executions.remove(id);
            state.history.remove(id);
            state.cancel_signals.remove(id);
        }

        if !evicted.is_empty() {
            debug!(count = evicted.len(), "evicted finished tasks");
        }
        evicted.len()
    }

    /// Emit a resource snapshot every `interval` until the handle is aborted or
    /// the scheduler is dropped
    pub fn spawn_resource_monitor(&self, interval: Duration) -> JoinHandle<()> {
        let inner = Arc::downgrade(&self.inner);
        let interval = interval.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                let snapshot = {
                    let state = inner.lock();
                    SchedulerEvent::ResourceSnapshot {
                        utilization: state.pool.utilization(),
                        workload: state.workload.snapshot(),
                    }
                };
                inner.emit(snapshot);
            }
            warn!("resource monitor stopped: scheduler dropped");
        })
    }
}

impl std::fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("options", &self.inner.options)
            .field("handlers", &self.inner.handlers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use crate::collision::{CollisionType, Recommendation, Severity};
    use crate::error::HandlerError;
    use crate::handler::TaskHandler;
    use crate::reporter::CollectingReporter;
    use crate::task::{SdlcPhase, TaskType};

    fn request(name: &str) -> Resource {
        let declared = weft_core::config::default_resources()
            .into_iter()
            .find(|r| r.name == name)
            .unwrap();
        Resource {
            capacity: 1,
            exclusive: false,
            ..declared
        }
    }

    fn task(id: &str, task_type: TaskType, resource: &str, ms: u64) -> Task {
        Task::new(id, format!("Task {id}"), task_type, Duration::from_millis(ms))
            .with_resource(request(resource))
    }

    fn manual() -> SchedulerOptions {
        SchedulerOptions {
            auto_dispatch: false,
            ..SchedulerOptions::default()
        }
    }

    fn build(options: SchedulerOptions, handlers: HandlerRegistry) -> (TaskScheduler, Arc<CollectingReporter>) {
        let collector = Arc::new(CollectingReporter::default());
        let mut reporters = ReporterRegistry::empty();
        reporters.register_arc(collector.clone());
        let scheduler = TaskScheduler::builder(options)
            .handlers(handlers)
            .reporters(reporters)
            .build()
            .unwrap();
        (scheduler, collector)
    }

    fn ids(names: &[&str]) -> Vec<TaskId> {
        names.iter().map(|n| TaskId::new(*n)).collect()
    }

    fn status(s: &TaskScheduler, id: &str) -> Option<ExecutionStatus> {
        s.get_execution_status(&TaskId::new(id)).map(|e| e.status)
    }

    async fn until_running(s: &TaskScheduler, id: &str) {
        for _ in 0..100 {
            if status(s, id) == Some(ExecutionStatus::Running) {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("task {id} never started");
    }

    fn position(events: &[SchedulerEvent], pred: impl Fn(&SchedulerEvent) -> bool) -> usize {
        events.iter().position(pred).unwrap()
    }

    struct FailingHandler(TaskType);

    #[async_trait]
    impl TaskHandler for FailingHandler {
        fn task_type(&self) -> TaskType {
            self.0
        }

        async fn execute(&self, task: &Task, _ctx: &ExecutionContext) -> std::result::Result<serde_json::Value, HandlerError> {
            Err(HandlerError::failed(format!("{} exploded", task.id)))
        }
    }

    struct PanickingHandler;

    #[async_trait]
    impl TaskHandler for PanickingHandler {
        fn task_type(&self) -> TaskType {
            TaskType::Security
        }

        async fn execute(&self, _task: &Task, _ctx: &ExecutionContext) -> std::result::Result<serde_json::Value, HandlerError> {
            panic!("boom");
        }
    }

    /// Fails on the first call, succeeds afterwards
    #[derive(Default)]
    struct FlakyHandler(AtomicUsize);

    #[async_trait]
    impl TaskHandler for FlakyHandler {
        fn task_type(&self) -> TaskType {
            TaskType::Deployment
        }

        async fn execute(&self, _task: &Task, _ctx: &ExecutionContext) -> std::result::Result<serde_json::Value, HandlerError> {
            if self.0.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(HandlerError::failed("transient"))
            } else {
                Ok(json!({ "deployed": true }))
            }
        }
    }

    /// Records calls and peak concurrency
    #[derive(Clone, Default)]
    struct CountingHandler {
        calls: Arc<AtomicUsize>,
        current: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TaskHandler for CountingHandler {
        fn task_type(&self) -> TaskType {
            TaskType::Analysis
        }

        async fn execute(&self, _task: &Task, _ctx: &ExecutionContext) -> std::result::Result<serde_json::Value, HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(json!(null))
        }
    }

    #[tokio::test]
    async fn test_add_task_validation() {
        let (s, _) = build(manual(), HandlerRegistry::with_placeholders(0.0));

        let err = s.add_task(task("", TaskType::Build, "cpu-cores", 10)).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Validation(ValidationError::EmptyId)));

        let unknown = Task::new("a", "A", TaskType::Build, Duration::from_millis(10))
            .with_resource(Resource::shared(weft_core::ResourceType::Network, "uplink", 1));
        let err = s.add_task(unknown).await.unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::Validation(ValidationError::UnknownResource { .. })
        ));

        s.add_task(task("a", TaskType::Build, "cpu-cores", 10)).await.unwrap();
        let err = s.add_task(task("a", TaskType::Build, "cpu-cores", 10)).await.unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::Validation(ValidationError::DuplicateTask(_))
        ));
        assert_eq!(s.task_ids(), ids(&["a"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exclusive_resource_conflict_serializes() {
        let (s, events) = build(SchedulerOptions::default(), HandlerRegistry::with_placeholders(1.0));

        s.add_task(task("t1", TaskType::Build, "build-pipeline", 1000)).await.unwrap();
        until_running(&s, "t1").await;
        assert_eq!(s.get_resource_utilization()["build-pipeline"], 100.0);

        let t2 = task("t2", TaskType::Build, "build-pipeline", 1000);
        let detection = s.detect_collisions(&t2);
        assert_eq!(detection.collision_type, Some(CollisionType::ResourceConflict));
        assert_eq!(detection.severity, Severity::Error);
        assert_eq!(detection.recommendation, Some(Recommendation::Serialize));
        assert_eq!(detection.conflicting_tasks, ids(&["t1"]));

        s.add_task(t2).await.unwrap();
        assert_eq!(status(&s, "t1"), Some(ExecutionStatus::Completed));
        assert!(s.task(&TaskId::new("t2")).is_some());

        let kinds = events.kinds();
        assert!(kinds.contains(&"collision_detected"));
        assert!(kinds.contains(&"collision_resolved"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_serialize_timeout() {
        let options = SchedulerOptions {
            serialize_timeout: Duration::from_secs(1),
            ..SchedulerOptions::default()
        };
        let (s, _) = build(options, HandlerRegistry::with_placeholders(1.0));

        s.add_task(task("t1", TaskType::Build, "build-pipeline", 60_000)).await.unwrap();
        until_running(&s, "t1").await;

        let err = s
            .add_task(task("t2", TaskType::Build, "build-pipeline", 10))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::SerializeTimeout { waiting_on, .. } if waiting_on == ids(&["t1"])));
        assert!(s.task(&TaskId::new("t2")).is_none());
    }

    #[tokio::test]
    async fn test_dependency_cycle_is_rejected() {
        let (s, events) = build(manual(), HandlerRegistry::with_placeholders(0.0));

        s.add_task(task("a", TaskType::Build, "cpu-cores", 10).with_dependency("b"))
            .await
            .unwrap();
        let err = s
            .add_task(task("b", TaskType::Build, "cpu-cores", 10).with_dependency("a"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SchedulerError::CriticalCollision {
                collision_type: CollisionType::DependencyCycle,
                severity: Severity::Critical,
                ..
            }
        ));
        assert!(s.task(&TaskId::new("b")).is_none());
        assert_eq!(events.events_for(&TaskId::new("b")).len(), 1);

        let err = s
            .add_task(task("c", TaskType::Build, "cpu-cores", 10).with_dependency("c"))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::CriticalCollision { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sdlc_violation_reschedules() {
        let options = SchedulerOptions {
            resolver: ResolverSettings {
                base_delay: Duration::from_millis(10),
                ..ResolverSettings::default()
            },
            ..SchedulerOptions::default()
        };
        let (s, _) = build(options, HandlerRegistry::with_placeholders(1.0));

        s.add_task(task("qa", TaskType::Testing, "test-env", 60_000).with_phase(SdlcPhase::Testing))
            .await
            .unwrap();
        until_running(&s, "qa").await;

        s.add_task(task("impl", TaskType::Development, "cpu-cores", 10)).await.unwrap();
        let delayed = s.task(&TaskId::new("impl")).unwrap();
        // 10ms x error(3) x one conflicting task
        assert_eq!(delayed.metadata.scheduled_delay, Some(Duration::from_millis(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_delay_is_honored_before_running() {
        let options = SchedulerOptions {
            resolver: ResolverSettings {
                base_delay: Duration::from_millis(10),
                ..ResolverSettings::default()
            },
            ..SchedulerOptions::default()
        };
        let (s, events) = build(options, HandlerRegistry::with_placeholders(1.0));

        s.add_task(task("qa", TaskType::Testing, "test-env", 60_000).with_phase(SdlcPhase::Testing))
            .await
            .unwrap();
        until_running(&s, "qa").await;

        s.add_task(task("impl", TaskType::Development, "cpu-cores", 10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(status(&s, "impl"), Some(ExecutionStatus::Queued));
        assert!(events.events_for(&TaskId::new("impl")).iter().all(|e| e.kind() != "task_started"));

        tokio::time::sleep(Duration::from_millis(15)).await;
        assert!(matches!(
            status(&s, "impl"),
            Some(ExecutionStatus::Running | ExecutionStatus::Completed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_delay_does_not_hold_a_slot() {
        let options = SchedulerOptions {
            max_parallel_tasks: 2,
            resolver: ResolverSettings {
                base_delay: Duration::from_millis(100),
                ..ResolverSettings::default()
            },
            ..SchedulerOptions::default()
        };
        let (s, _) = build(options, HandlerRegistry::with_placeholders(1.0));

        s.add_task(task("qa", TaskType::Testing, "test-env", 60_000).with_phase(SdlcPhase::Testing))
            .await
            .unwrap();
        until_running(&s, "qa").await;
        assert_eq!(s.inner.slots.available_permits(), 1);

        s.add_task(task("impl", TaskType::Development, "cpu-cores", 10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(status(&s, "impl"), Some(ExecutionStatus::Queued));
        assert_eq!(s.inner.slots.available_permits(), 1);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(status(&s, "impl"), Some(ExecutionStatus::Completed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_serialized_submissions_share_exclusive_resource() {
        let (s, _) = build(SchedulerOptions::default(), HandlerRegistry::with_placeholders(1.0));

        s.add_task(task("t1", TaskType::Build, "build-pipeline", 1000)).await.unwrap();
        until_running(&s, "t1").await;

        let submissions: Vec<_> = ["t2", "t3"]
            .into_iter()
            .map(|id| {
                let s = s.clone();
                tokio::spawn(async move { s.add_task(task(id, TaskType::Build, "build-pipeline", 1000)).await })
            })
            .collect();

        let all = ["t1", "t2", "t3"];
        let mut peak: f64 = 0.0;
        for _ in 0..1000 {
            peak = peak.max(s.get_resource_utilization()["build-pipeline"]);
            let active = all
                .iter()
                .filter(|id| status(&s, id).is_some_and(|st| st.is_active()))
                .count();
            assert!(active <= 1, "{active} tasks hold build-pipeline at once");
            if all.iter().all(|id| status(&s, id) == Some(ExecutionStatus::Completed)) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        for submission in submissions {
            submission.await.unwrap().unwrap();
        }
        assert!(peak <= 100.0, "build-pipeline peaked at {peak}%");
        for id in all {
            assert_eq!(status(&s, id), Some(ExecutionStatus::Completed), "{id}");
        }
        assert_eq!(s.get_resource_utilization()["build-pipeline"], 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_waits_for_exclusive_holder() {
        let (s, events) = build(SchedulerOptions::default(), HandlerRegistry::with_placeholders(1.0));

        s.add_task(task("holder", TaskType::Build, "build-pipeline", 1000)).await.unwrap();
        until_running(&s, "holder").await;

        // Registered directly so no collision check runs for it
        s.inner
            .lock()
            .tasks
            .insert(TaskId::new("late"), task("late", TaskType::Build, "build-pipeline", 10));

        let results = s.execute_parallel(&ids(&["late"])).await.unwrap();
        assert_eq!(results[&TaskId::new("late")].status, ExecutionStatus::Completed);
        assert_eq!(status(&s, "holder"), Some(ExecutionStatus::Completed));

        let events = events.events();
        let holder_done = position(&events, |e| {
            matches!(e, SchedulerEvent::TaskCompleted { id, .. } if id.as_str() == "holder")
        });
        let late_started = position(&events, |e| {
            matches!(e, SchedulerEvent::TaskStarted { id, .. } if id.as_str() == "late")
        });
        assert!(holder_done < late_started);
    }

    fn overload_options(pool: &[&str]) -> SchedulerOptions {
        SchedulerOptions {
            max_tasks_per_agent: 3,
            resolver: ResolverSettings {
                agent_pool: pool.iter().map(|a| a.to_string()).collect(),
                ..ResolverSettings::default()
            },
            ..SchedulerOptions::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_agent_overload_reassigns() {
        let (s, _) = build(overload_options(&["a1", "a2"]), HandlerRegistry::with_placeholders(1.0));

        for id in ["w1", "w2", "w3"] {
            s.add_task(task(id, TaskType::Development, "cpu-cores", 60_000).with_agent("a1"))
                .await
                .unwrap();
            until_running(&s, id).await;
        }
        assert_eq!(s.get_agent_workload()["a1"], 3);

        let fourth = task("w4", TaskType::Development, "cpu-cores", 60_000).with_agent("a1");
        assert_eq!(
            s.detect_collisions(&fourth).collision_type,
            Some(CollisionType::AgentOverload)
        );
        s.add_task(fourth).await.unwrap();

        assert_eq!(s.task(&TaskId::new("w4")).unwrap().agent_id.as_deref(), Some("a2"));
        until_running(&s, "w4").await;
        assert_eq!(s.get_agent_workload()["a1"], 3);
        assert_eq!(s.get_agent_workload()["a2"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_agent_overload_without_alternative() {
        let (s, _) = build(overload_options(&["a1"]), HandlerRegistry::with_placeholders(1.0));

        for id in ["w1", "w2", "w3"] {
            s.add_task(task(id, TaskType::Development, "cpu-cores", 60_000).with_agent("a1"))
                .await
                .unwrap();
            until_running(&s, id).await;
        }

        let fourth = task("w4", TaskType::Development, "cpu-cores", 60_000).with_agent("a1");
        assert!(s.detect_collisions(&fourth).has_collision);
        s.add_task(fourth).await.unwrap();
        assert_eq!(s.task(&TaskId::new("w4")).unwrap().agent_id.as_deref(), Some("a1"));
    }

    #[tokio::test]
    async fn test_failure_does_not_abort_siblings() {
        let mut handlers = HandlerRegistry::with_placeholders(0.0);
        handlers.register(FailingHandler(TaskType::Testing));
        let (s, events) = build(manual(), handlers);

        s.add_task(task("t1", TaskType::Build, "cpu-cores", 10)).await.unwrap();
        s.add_task(task("t2", TaskType::Testing, "test-env", 10)).await.unwrap();
        s.add_task(task("t3", TaskType::Analysis, "cpu-cores", 10)).await.unwrap();

        let results = s.execute_parallel(&ids(&["t1", "t2", "t3"])).await.unwrap();
        assert_eq!(results[&TaskId::new("t1")].status, ExecutionStatus::Completed);
        assert_eq!(results[&TaskId::new("t2")].status, ExecutionStatus::Failed);
        assert_eq!(results[&TaskId::new("t3")].status, ExecutionStatus::Completed);
        assert_eq!(results[&TaskId::new("t2")].error.as_deref(), Some("t2 exploded"));
        assert_eq!(results[&TaskId::new("t1")].progress, 100);

        assert!(s.get_resource_utilization().values().all(|u| *u == 0.0));
        assert!(events.events().iter().any(|e| matches!(
            e,
            SchedulerEvent::PlanCompleted { succeeded: 2, failed: 1, .. }
        )));
    }

    #[tokio::test]
    async fn test_build_pipeline_scenario() {
        let (s, collector) = build(manual(), HandlerRegistry::with_placeholders(0.0));

        s.add_task(task("A", TaskType::Build, "build-pipeline", 100)).await.unwrap();
        s.add_task(task("B", TaskType::Build, "build-pipeline", 100)).await.unwrap();
        s.add_task(task("C", TaskType::Testing, "test-env", 100).with_dependency("A"))
            .await
            .unwrap();

        let all = ids(&["A", "B", "C"]);
        let plan = s.create_execution_plan(&all).unwrap();
        let batch = |id: &str| plan.batch_of(&TaskId::new(id)).unwrap();
        assert_ne!(batch("A"), batch("B"));
        assert!(batch("C") > batch("A"));

        let results = s.execute_parallel(&all).await.unwrap();
        assert!(results.values().all(|e| e.status == ExecutionStatus::Completed));

        let events = collector.events();
        let a_done = position(&events, |e| {
            matches!(e, SchedulerEvent::TaskCompleted { id, .. } if id.as_str() == "A")
        });
        let c_started = position(&events, |e| {
            matches!(e, SchedulerEvent::TaskStarted { id, .. } if id.as_str() == "C")
        });
        assert!(a_done < c_started);
    }

    #[tokio::test]
    async fn test_dependency_failure_skips_handler() {
        let counter = CountingHandler::default();
        let mut handlers = HandlerRegistry::with_placeholders(0.0);
        handlers.register(FailingHandler(TaskType::Build));
        handlers.register(counter.clone());
        let (s, _) = build(manual(), handlers);

        s.add_task(task("a", TaskType::Build, "cpu-cores", 10)).await.unwrap();
        s.add_task(task("b", TaskType::Analysis, "cpu-cores", 10).with_dependency("a"))
            .await
            .unwrap();

        let results = s.execute_parallel(&ids(&["a", "b"])).await.unwrap();
        let b = &results[&TaskId::new("b")];
        assert_eq!(b.status, ExecutionStatus::Failed);
        assert!(b.error.as_deref().unwrap().contains("dependencies did not complete: a"));
        assert_eq!(counter.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_task_is_retried() {
        let mut handlers = HandlerRegistry::with_placeholders(0.0);
        handlers.register(FlakyHandler::default());
        let (s, _) = build(manual(), handlers);
        let id = TaskId::new("ship");

        s.add_task(task("ship", TaskType::Deployment, "test-env", 10)).await.unwrap();

        let first = s.execute_parallel(&[id.clone()]).await.unwrap();
        assert_eq!(first[&id].status, ExecutionStatus::Failed);
        assert_eq!(first[&id].attempt, 1);

        let second = s.execute_parallel(&[id.clone()]).await.unwrap();
        assert_eq!(second[&id].status, ExecutionStatus::Completed);
        assert_eq!(second[&id].attempt, 2);

        let third = s.execute_parallel(&[id.clone()]).await.unwrap();
        assert_eq!(third[&id].attempt, 2, "completed tasks are not re-run");

        let history = s.execution_history(&id);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, ExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn test_handler_panic_is_captured() {
        let mut handlers = HandlerRegistry::with_placeholders(0.0);
        handlers.register(PanickingHandler);
        let (s, _) = build(manual(), handlers);
        let id = TaskId::new("scan");

        s.add_task(task("scan", TaskType::Security, "build-pipeline", 10)).await.unwrap();
        let results = s.execute_parallel(&[id.clone()]).await.unwrap();

        assert_eq!(results[&id].status, ExecutionStatus::Failed);
        assert!(results[&id].error.as_deref().unwrap().contains("boom"));
        assert_eq!(s.get_resource_utilization()["build-pipeline"], 0.0);
    }

    #[tokio::test]
    async fn test_missing_handler_fails_task() {
        let (s, _) = build(manual(), HandlerRegistry::new());
        let id = TaskId::new("doc");

        s.add_task(task("doc", TaskType::Documentation, "cpu-cores", 10)).await.unwrap();
        let results = s.execute_parallel(&[id.clone()]).await.unwrap();
        assert!(results[&id].error.as_deref().unwrap().contains("no handler registered"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_releases_resources() {
        let (s, events) = build(SchedulerOptions::default(), HandlerRegistry::with_placeholders(1.0));
        let id = TaskId::new("long");

        s.add_task(task("long", TaskType::Build, "build-pipeline", 60_000).with_agent("developer"))
            .await
            .unwrap();
        until_running(&s, "long").await;
        assert_eq!(s.get_agent_workload()["developer"], 1);

        assert!(s.cancel_task(&id));
        assert_eq!(status(&s, "long"), Some(ExecutionStatus::Cancelled));
        assert_eq!(s.get_resource_utilization()["build-pipeline"], 0.0);
        assert_eq!(s.get_agent_workload()["developer"], 0);

        assert!(!s.cancel_task(&id));
        assert!(!s.cancel_task(&TaskId::new("ghost")));

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(status(&s, "long"), Some(ExecutionStatus::Cancelled));
        assert!(!events.kinds().contains(&"task_failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_and_resume() {
        let (s, _) = build(SchedulerOptions::default(), HandlerRegistry::with_placeholders(1.0));
        let id = TaskId::new("job");

        s.add_task(task("job", TaskType::Analysis, "cpu-cores", 1000)).await.unwrap();
        until_running(&s, "job").await;

        assert!(s.pause_task(&id));
        assert!(!s.pause_task(&id));
        assert_eq!(status(&s, "job"), Some(ExecutionStatus::Paused));

        // the placeholder reports 25% here, which is ignored while paused
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(s.get_execution_status(&id).unwrap().progress, 0);
        assert_eq!(s.get_resource_utilization()["cpu-cores"], 12.5);

        assert!(s.resume_task(&id));
        assert!(!s.resume_task(&id));

        let results = s.execute_parallel(&[id.clone()]).await.unwrap();
        assert_eq!(results[&id].status, ExecutionStatus::Completed);
        assert_eq!(results[&id].progress, 100);
        assert!(!s.pause_task(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_is_monotonic() {
        let (s, events) = build(SchedulerOptions::default(), HandlerRegistry::with_placeholders(1.0));
        let id = TaskId::new("job");

        s.add_task(task("job", TaskType::Analysis, "cpu-cores", 60_000)).await.unwrap();
        until_running(&s, "job").await;

        s.inner.report_progress(&id, 1, 40);
        s.inner.report_progress(&id, 1, 30);
        assert_eq!(s.get_execution_status(&id).unwrap().progress, 40);

        s.inner.report_progress(&id, 1, 250);
        assert_eq!(s.get_execution_status(&id).unwrap().progress, 100);

        s.inner.report_progress(&id, 2, 100);
        let progress_events = events
            .events_for(&id)
            .into_iter()
            .filter(|e| matches!(e, SchedulerEvent::TaskProgress { .. }))
            .count();
        assert_eq!(progress_events, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallelism_is_bounded() {
        let counter = CountingHandler::default();
        let mut handlers = HandlerRegistry::new();
        handlers.register(counter.clone());
        let options = SchedulerOptions {
            max_parallel_tasks: 2,
            ..manual()
        };
        let (s, _) = build(options, handlers);

        let names = ["p1", "p2", "p3", "p4", "p5"];
        for id in names {
            s.add_task(task(id, TaskType::Analysis, "cpu-cores", 10)).await.unwrap();
        }
        let results = s.execute_parallel(&ids(&names)).await.unwrap();

        assert!(results.values().all(|e| e.status == ExecutionStatus::Completed));
        assert_eq!(counter.calls.load(Ordering::SeqCst), 5);
        assert_eq!(counter.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_execute_unknown_task_fails() {
        let (s, _) = build(manual(), HandlerRegistry::with_placeholders(0.0));
        let err = s.execute_parallel(&ids(&["nope"])).await.unwrap_err();
        assert!(matches!(err, SchedulerError::UnknownTask(_)));
    }

    #[tokio::test]
    async fn test_cleanup_finished() {
        let (s, _) = build(manual(), HandlerRegistry::with_placeholders(0.0));

        s.add_task(task("a", TaskType::Build, "cpu-cores", 10)).await.unwrap();
        s.execute_parallel(&ids(&["a"])).await.unwrap();
        s.add_task(task("b", TaskType::Testing, "test-env", 10).with_dependency("a"))
            .await
            .unwrap();

        assert_eq!(s.cleanup_finished(), 0, "a is still needed by b");

        s.execute_parallel(&ids(&["b"])).await.unwrap();
        assert_eq!(s.cleanup_finished(), 2);
        assert!(s.task_ids().is_empty());
        assert!(s.execution_history(&TaskId::new("a")).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resource_monitor_emits_snapshots() {
        let (s, events) = build(manual(), HandlerRegistry::with_placeholders(0.0));

        let monitor = s.spawn_resource_monitor(Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(350)).await;
        monitor.abort();

        let snapshots = events
            .events()
            .into_iter()
            .filter(|e| matches!(e, SchedulerEvent::ResourceSnapshot { .. }))
            .count();
        assert!(snapshots >= 3);
    }

    #[tokio::test]
    async fn test_auto_dispatch_waits_for_dependencies() {
        let (s, _) = build(SchedulerOptions::default(), HandlerRegistry::with_placeholders(0.0));

        s.add_task(task("a", TaskType::Build, "cpu-cores", 10)).await.unwrap();
        s.add_task(task("b", TaskType::Testing, "test-env", 10).with_dependency("a"))
            .await
            .unwrap();

        assert!(status(&s, "a").is_some());
        assert!(status(&s, "b").is_none());

        let results = s.execute_parallel(&ids(&["a", "b"])).await.unwrap();
        assert!(results.values().all(|e| e.status == ExecutionStatus::Completed));
    }
}
