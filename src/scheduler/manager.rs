//! Task manager: dispatch, pipeline driver, timer driver.
//!
//! # Responsibilities
//! - Match inbound requests and create their tasks
//! - Drive each task through PRE / WORKER / POST rounds and upstream calls
//! - Hand WORKER stages to the pool, PRE and POST run on the I/O thread
//! - Sweep expired suspensions and fire periodic tasks on a fixed poll
//!
//! # Design Decisions
//! - A task is moved by value to whichever thread runs its current stage,
//!   so no stage of one task can run concurrently with another
//! - Failures detected here (timeouts, saturation, upstream errors) become
//!   `EngineError`, which fixes the status code and leaves the body empty
//! - A panicking stage is that task's `Status::Error`, nothing more

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{HeaderMap, Method, StatusCode};
use bytes::Bytes;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::config::SupernodeConfig;
use crate::context::GlobalContext;
use crate::error::EngineError;
use crate::observability::metrics;
use crate::routing::{HandlerTriad, Router};
use crate::scheduler::periodic::{DueTick, PeriodicId, PeriodicRegistry, PeriodicTask};
use crate::scheduler::pool::{Job, PoolError, WorkerPool};
use crate::scheduler::suspend::{deadline_after, SuspendKind, SuspendTable};
use crate::task::{Input, Stage, Status, Task};
use crate::upstream::Forwarder;

/// A parsed request as delivered by the transport.
#[derive(Debug, Clone, Default)]
pub struct InboundRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// What the transport should do with a finished request.
#[derive(Debug)]
pub enum Outcome {
    Respond {
        status: StatusCode,
        headers: HeaderMap,
        body: Vec<u8>,
    },
    /// Close the connection without writing a response.
    Drop,
}

impl Outcome {
    fn empty(status: StatusCode) -> Self {
        Outcome::Respond {
            status,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Outcome::Respond { status, .. } => Some(*status),
            Outcome::Drop => None,
        }
    }
}

struct Inner {
    config: Arc<SupernodeConfig>,
    router: Router,
    global: Arc<GlobalContext>,
    pool: WorkerPool,
    suspended: SuspendTable,
    periodic: PeriodicRegistry,
    forwarder: Forwarder,
}

/// Owns the router, worker pool, timers and upstream client.
#[derive(Clone)]
pub struct Manager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("routes", &self.inner.router.len())
            .field("pool", &self.inner.pool)
            .field("periodic", &self.inner.periodic.len())
            .finish()
    }
}

impl Manager {
    /// Build a manager around `router`, compiling it if needed.
    pub fn new(config: SupernodeConfig, mut router: Router) -> Result<Self, EngineError> {
        if !router.is_compiled() {
            router.compile()?;
        }
        let pool = WorkerPool::new(config.workers.workers_count, config.workers.worker_queue_len)?;
        let forwarder = Forwarder::new(&config.upstream)?;

        tracing::info!(
            routes = router.len(),
            workers = pool.size(),
            queue_len = pool.queue_len(),
            upstream = %config.upstream.cryptonode_rpc_address,
            "Manager initialized"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config: Arc::new(config),
                router,
                global: Arc::new(GlobalContext::new()),
                pool,
                suspended: SuspendTable::new(),
                periodic: PeriodicRegistry::new(),
                forwarder,
            }),
        })
    }

    pub fn config(&self) -> &SupernodeConfig {
        &self.inner.config
    }

    pub fn global(&self) -> Arc<GlobalContext> {
        Arc::clone(&self.inner.global)
    }

    pub fn add_periodic_task(&self, triad: HandlerTriad, interval: Duration) -> PeriodicId {
        self.add_periodic(PeriodicTask::new(triad, interval))
    }

    pub fn add_periodic(&self, task: PeriodicTask) -> PeriodicId {
        self.inner.periodic.register(task, self.global())
    }

    pub fn is_periodic_registered(&self, id: PeriodicId) -> bool {
        self.inner.periodic.contains(id)
    }

    /// Tasks currently waiting in the queue or on the upstream.
    pub fn suspended_count(&self) -> usize {
        self.inner.suspended.len()
    }

    /// Spawn the timer driver. It runs until `shutdown` fires.
    pub fn start(&self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let manager = self.clone();
        let poll = self.inner.config.workers.timer_poll_interval();
        tokio::spawn(async move {
            tracing::info!(poll_ms = poll.as_millis() as u64, "Timer driver starting");
            let mut ticker = time::interval(poll);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => manager.on_timer(Instant::now()),
                    _ = shutdown.recv() => {
                        tracing::info!("Timer driver received shutdown signal, exiting loop");
                        break;
                    }
                }
            }
        })
    }

    /// Drop periodic tasks and join the worker threads.
    pub fn shutdown(&self) {
        self.inner.periodic.clear();
        self.inner.pool.shutdown();
    }

    fn on_timer(&self, now: Instant) {
        self.inner.suspended.expire(now);
        for tick in self.inner.periodic.take_due(now) {
            tokio::spawn(self.clone().run_periodic(tick));
        }
    }

    /// Route `request`, run its pipeline, and report what to send back.
    pub async fn dispatch(&self, request: InboundRequest) -> Outcome {
        let start = Instant::now();
        let method = request.method.clone();

        let matched = match self.inner.router.match_route(&request.path, &request.method) {
            Ok(m) => m,
            Err(e) => {
                let err = EngineError::from(e);
                tracing::debug!(method = %method, path = %request.path, error = %err, "No route");
                let outcome = Outcome::empty(err.status_code());
                record(&method, &outcome, start);
                return outcome;
            }
        };

        let input = Input {
            method: request.method,
            path: request.path,
            headers: request.headers,
            body: request.body,
        };
        let lifetime = self
            .inner
            .config
            .server
            .connection_timeout()
            .saturating_add(self.inner.forwarder.timeout());
        let task = Task::new(matched.triad, matched.vars, input, self.global())
            .with_deadline(deadline_after(start, lifetime));
        let task_id = task.id();
        tracing::debug!(task_id = %task_id, route = %matched.pattern, "Task created");

        let outcome = match self.drive(task).await {
            Ok(task) => {
                tracing::debug!(
                    task_id = %task_id,
                    route = %matched.pattern,
                    stage = %task.stage(),
                    rounds = task.rounds(),
                    "Task finished"
                );
                into_outcome(task)
            }
            Err(e) => {
                tracing::warn!(task_id = %task_id, route = %matched.pattern, error = %e, "Task failed");
                Outcome::empty(e.status_code())
            }
        };
        record(&method, &outcome, start);
        outcome
    }

    async fn drive(&self, mut task: Task) -> Result<Task, EngineError> {
        loop {
            if task.stage() != Stage::Post && !task.stage().is_terminal() && task.is_expired(Instant::now()) {
                metrics::record_timeout("task");
                tracing::warn!(task_id = %task.id(), stage = %task.stage(), rounds = task.rounds(), "Task deadline passed");
                task.expire();
                return Err(EngineError::DeadlineExceeded);
            }
            match task.stage() {
                Stage::Pre | Stage::Post => {
                    let status = run_guarded(&mut task);
                    task.advance(status);
                }
                Stage::Worker => {
                    let deadline = deadline_after(Instant::now(), self.inner.config.server.connection_timeout());
                    let (done, status) = self.run_worker(task, deadline).await?;
                    task = done;
                    task.advance(status);
                }
                Stage::Upstream => {
                    let reply = self.forward(&mut task).await?;
                    task.resume(reply);
                }
                Stage::Done | Stage::Error | Stage::Drop => return Ok(task),
            }
        }
    }

    /// Run the WORKER stage of `task`, on the pool unless it is inline.
    /// `deadline`, capped by the task deadline, bounds the time spent
    /// waiting in the queue.
    async fn run_worker(&self, mut task: Task, deadline: Instant) -> Result<(Task, Status), EngineError> {
        if self.inner.pool.is_inline() {
            let status = run_guarded(&mut task);
            return Ok((task, status));
        }

        let id = task.id();
        let deadline = task.suspend_until(deadline);
        let mut expired = self.inner.suspended.suspend(id, deadline, SuspendKind::Queue);
        let (done_tx, done_rx) = oneshot::channel();
        let inner = Arc::clone(&self.inner);

        let job: Job = Box::new(move || {
            let mut task = task;
            let claimed = inner.suspended.resume(id);
            if !claimed || task.is_expired(Instant::now()) {
                if claimed {
                    metrics::record_timeout("queue");
                }
                tracing::debug!(task_id = %id, "Task expired in queue, skipping");
                return;
            }
            task.clear_suspension();
            let status = run_guarded(&mut task);
            let _ = done_tx.send((task, status));
        });

        if let Err(e) = self.inner.pool.submit(job) {
            self.inner.suspended.resume(id);
            if e == PoolError::Saturated {
                metrics::record_queue_rejection();
                tracing::warn!(task_id = %id, "Worker queue saturated, rejecting task");
            }
            return Err(e.into());
        }

        tokio::select! {
            biased;
            Ok(()) = &mut expired => Err(EngineError::QueueTimeout),
            done = done_rx => done.map_err(|_| EngineError::QueueTimeout),
        }
    }

    /// Send the task's output upstream and wait for the reply or the deadline.
    async fn forward(&self, task: &mut Task) -> Result<Bytes, EngineError> {
        let deadline = task.mark_forward_pending(deadline_after(Instant::now(), self.inner.forwarder.timeout()));
        let id = task.id();
        let output = task.take_output();
        tracing::debug!(
            task_id = %id,
            uri = %self.inner.forwarder.target_uri(&output),
            multicast = output.multicast.is_some(),
            "Forwarding to upstream"
        );

        let mut expired = self.inner.suspended.suspend(id, deadline, SuspendKind::Upstream);
        tokio::select! {
            biased;
            Ok(()) = &mut expired => Err(EngineError::UpstreamTimeout),
            result = self.inner.forwarder.forward(output) => {
                let claimed = self.inner.suspended.resume(id);
                task.clear_suspension();
                match result {
                    Ok(reply) if claimed => Ok(reply),
                    Ok(_) => Err(EngineError::UpstreamTimeout),
                    Err(e) => Err(e.into()),
                }
            }
        }
    }

    async fn run_periodic(self, tick: DueTick) {
        metrics::record_periodic_tick();
        let DueTick {
            id,
            spec,
            mut task,
            reply,
        } = tick;
        let tick_start = Instant::now();
        match reply {
            Some(reply) => task.resume(reply),
            None => task.rearm(),
        }
        task.set_deadline(deadline_after(tick_start, spec.interval().saturating_add(self.inner.forwarder.timeout())));

        let mut followed_up = false;
        let mut held_reply = None;
        loop {
            if task.stage() != Stage::Post && !task.stage().is_terminal() && task.is_expired(Instant::now()) {
                metrics::record_timeout("task");
                tracing::warn!(periodic = %id, stage = %task.stage(), "Periodic tick deadline passed");
                task.expire();
                task.record_worker_status(Status::Error);
                break;
            }
            match task.stage() {
                Stage::Pre | Stage::Post => {
                    let status = run_guarded(&mut task);
                    task.advance(status);
                }
                Stage::Worker => {
                    let deadline = deadline_after(Instant::now(), spec.interval());
                    let (done, status) = match self.run_worker(task, deadline).await {
                        Ok(done) => done,
                        Err(e) => {
                            tracing::warn!(periodic = %id, error = %e, "Periodic tick lost in the worker queue");
                            let mut fresh = spec.fresh_task(self.global());
                            fresh.record_worker_status(Status::Error);
                            self.inner.periodic.finish(id, fresh, None);
                            return;
                        }
                    };
                    task = done;
                    task.advance(status);
                    match status {
                        Status::Stop => {
                            self.inner.periodic.deregister(id);
                            return;
                        }
                        // No result this tick: skip POST and the output.
                        Status::None => break,
                        _ => {}
                    }
                }
                Stage::Upstream => match self.forward(&mut task).await {
                    Ok(reply) if spec.follows_up() && !followed_up => {
                        followed_up = true;
                        task.resume(reply);
                    }
                    Ok(reply) => {
                        held_reply = Some(reply);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(periodic = %id, error = %e, "Periodic forward failed");
                        task.record_worker_status(Status::Error);
                        break;
                    }
                },
                Stage::Done | Stage::Error | Stage::Drop => break,
            }
        }
        tracing::trace!(periodic = %id, last_status = %task.last_status(), "Periodic tick finished");
        self.inner.periodic.finish(id, task, held_reply);
    }
}

fn run_guarded(task: &mut Task) -> Status {
    let stage = task.stage();
    catch_unwind(AssertUnwindSafe(|| task.run_stage())).unwrap_or_else(|_| {
        tracing::error!(%stage, "Handler panicked");
        Status::Error
    })
}

fn into_outcome(mut task: Task) -> Outcome {
    let default_status = match task.stage() {
        Stage::Drop => return Outcome::Drop,
        Stage::Done => StatusCode::OK,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let output = task.take_output();
    Outcome::Respond {
        status: output.status.unwrap_or(default_status),
        headers: output.headers,
        body: output.body,
    }
}

fn record(method: &Method, outcome: &Outcome, start: Instant) {
    match outcome.status() {
        Some(status) => metrics::record_request(method.as_str(), status.as_str(), start),
        None => metrics::record_request(method.as_str(), "drop", start),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::routing::{Methods, Vars};
    use crate::task::Output;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config(workers: usize) -> SupernodeConfig {
        let mut config = SupernodeConfig::default();
        config.workers.workers_count = workers;
        config.workers.worker_queue_len = 4;
        config.workers.timer_poll_interval_ms = 10;
        config
    }

    fn request(method: Method, path: &str, body: &'static str) -> InboundRequest {
        InboundRequest {
            method,
            path: path.to_string(),
            headers: HeaderMap::new(),
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    fn append(ch: char) -> impl Fn(&Vars, &Input, &mut Context, &mut Output) -> Status + Send + Sync {
        move |_, input, _, output| {
            let mut s = input.body_str().unwrap_or_default().to_string();
            s.push(ch);
            output.set_body(s);
            Status::Ok
        }
    }

    fn body_of(outcome: Outcome) -> (StatusCode, Vec<u8>) {
        match outcome {
            Outcome::Respond { status, body, .. } => (status, body),
            Outcome::Drop => panic!("unexpected drop"),
        }
    }

    #[tokio::test]
    async fn pipeline_runs_on_pool_and_inline() {
        for workers in [0, 2] {
            let mut router = Router::new();
            router.add_route(
                "/run/{id}",
                Methods::POST,
                HandlerTriad::new(append('2')).with_pre(append('1')).with_post(append('3')),
            );
            let manager = Manager::new(config(workers), router).unwrap();
            let (status, body) = body_of(manager.dispatch(request(Method::POST, "/run/7", "0")).await);
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, b"0123");
            manager.shutdown();
        }
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let manager = Manager::new(config(0), Router::new()).unwrap();
        let outcome = manager.dispatch(request(Method::GET, "/nope", "")).await;
        assert_eq!(outcome.status(), Some(StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn worker_drop_becomes_outcome_drop() {
        let mut router = Router::new();
        router.add_route(
            "/drop",
            Methods::GET,
            HandlerTriad::new(|_: &Vars, _: &Input, _: &mut Context, _: &mut Output| Status::Drop),
        );
        let manager = Manager::new(config(1), router).unwrap();
        assert!(matches!(
            manager.dispatch(request(Method::GET, "/drop", "")).await,
            Outcome::Drop
        ));
        manager.shutdown();
    }

    #[tokio::test]
    async fn error_keeps_stage_body_and_status_override() {
        let mut router = Router::new();
        router.add_route(
            "/bad",
            Methods::POST,
            HandlerTriad::new(|_: &Vars, _: &Input, _: &mut Context, o: &mut Output| {
                o.set_body(r#"{"code":-32602,"message":"bad params"}"#);
                o.status = Some(StatusCode::BAD_REQUEST);
                Status::Error
            }),
        );
        let manager = Manager::new(config(1), router).unwrap();
        let (status, body) = body_of(manager.dispatch(request(Method::POST, "/bad", "")).await);
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, br#"{"code":-32602,"message":"bad params"}"#);
        manager.shutdown();
    }

    #[tokio::test]
    async fn panicking_worker_is_500_and_pool_survives() {
        let mut router = Router::new();
        router.add_route(
            "/panic",
            Methods::GET,
            HandlerTriad::new(|_: &Vars, _: &Input, _: &mut Context, _: &mut Output| -> Status {
                panic!("handler bug")
            }),
        );
        router.add_route("/ok", Methods::GET, HandlerTriad::new(append('!')));
        let manager = Manager::new(config(1), router).unwrap();

        let outcome = manager.dispatch(request(Method::GET, "/panic", "")).await;
        assert_eq!(outcome.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
        let (status, body) = body_of(manager.dispatch(request(Method::GET, "/ok", "")).await);
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"!");
        manager.shutdown();
    }

    #[tokio::test]
    async fn huge_configured_timeouts_do_not_overflow_deadlines() {
        let mut config = config(1);
        config.server.http_connection_timeout = 1e19;
        config.upstream.upstream_request_timeout = 1e19;
        let mut router = Router::new();
        router.add_route(
            "/run",
            Methods::POST,
            HandlerTriad::new(append('2')).with_pre(append('1')).with_post(append('3')),
        );
        let manager = Manager::new(config, router).unwrap();

        let (status, body) = body_of(manager.dispatch(request(Method::POST, "/run", "0")).await);
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"0123");
        manager.shutdown();
    }

    #[tokio::test]
    async fn worker_skips_task_claimed_after_its_deadline() {
        let mut config = config(1);
        config.server.http_connection_timeout = 0.2;
        config.workers.worker_queue_len = 2;
        let mut router = Router::new();
        router.add_route(
            "/slow",
            Methods::GET,
            HandlerTriad::new(|_: &Vars, _: &Input, _: &mut Context, o: &mut Output| {
                std::thread::sleep(Duration::from_millis(500));
                o.set_body("late");
                Status::Ok
            }),
        );
        let manager = Manager::new(config, router).unwrap();

        // No timer driver: only the worker's own check can expire the task.
        let first = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.dispatch(request(Method::GET, "/slow", "")).await })
        };
        time::sleep(Duration::from_millis(50)).await;
        let start = Instant::now();
        let (status, body) = body_of(manager.dispatch(request(Method::GET, "/slow", "")).await);

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(200));
        assert_eq!(manager.suspended_count(), 0);
        assert_eq!(first.await.unwrap().status(), Some(StatusCode::OK));
        manager.shutdown();
    }

    #[tokio::test]
    async fn periodic_stop_ends_ticks() {
        let manager = Manager::new(config(1), Router::new()).unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let id = manager.add_periodic_task(
            HandlerTriad::new(move |_: &Vars, _: &Input, _: &mut Context, _: &mut Output| {
                if counter.fetch_add(1, Ordering::SeqCst) + 1 >= 3 {
                    Status::Stop
                } else {
                    Status::Ok
                }
            }),
            Duration::from_millis(20),
        );

        let shutdown = broadcast::channel(1);
        let driver = manager.start(shutdown.1);
        time::sleep(Duration::from_millis(400)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 3);
        assert!(!manager.is_periodic_registered(id));

        shutdown.0.send(()).unwrap();
        driver.await.unwrap();
        manager.shutdown();
    }

    #[tokio::test]
    async fn periodic_last_status_carries_between_ticks() {
        let manager = Manager::new(config(0), Router::new()).unwrap();
        let seen = manager.global();
        seen.set("seen", String::new());
        let log = manager.global();
        manager.add_periodic_task(
            HandlerTriad::new(move |_: &Vars, _: &Input, ctx: &mut Context, _: &mut Output| {
                let tag = match ctx.last_status() {
                    Status::None => 'n',
                    Status::Ok => 'o',
                    _ => '?',
                };
                log.apply::<String, _>("seen", |s| s.push(tag)).unwrap();
                Status::Ok
            }),
            Duration::from_millis(20),
        );

        let shutdown = broadcast::channel(1);
        let driver = manager.start(shutdown.1);
        time::sleep(Duration::from_millis(150)).await;
        shutdown.0.send(()).unwrap();
        driver.await.unwrap();

        let seen: String = seen.get("seen").unwrap();
        assert!(seen.starts_with("no"), "{seen}");
        assert!(seen[1..].chars().all(|c| c == 'o'), "{seen}");
    }
}
