//! The daemon loop: two event feeds, a scheduler and a worker pool.

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use relay_core::{CommentAdded, Event, ProjectName, RelayConfig};
use relay_sync::pipeline::{self, SyncScope};
use relay_sync::{PropagationPipeline, SyncContext};

use crate::context::AppContext;
use crate::error::{io_err, DaemonError};
use crate::ingest::{EventIngestor, SshStreamConnector, RECONNECT_DELAY};
use crate::log_rotation::RotationPolicy;
use crate::logging;
use crate::pool::{Job, WorkerPool};
use crate::scheduler::Scheduler;

/// Which service an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feed {
    Downstream,
    Upstream,
}

impl Feed {
    pub fn name(self) -> &'static str {
        match self {
            Feed::Downstream => "downstream",
            Feed::Upstream => "upstream",
        }
    }
}

/// What to do with one event.
#[derive(Debug)]
pub enum Dispatch {
    Now(Job),
    Later(Instant, Job),
    Ignore,
}

/// Route an event to a job.
///
/// Downstream comments become propagation jobs when mirroring to upstream
/// is enabled. Upstream ref updates for configured projects become project
/// syncs, deferred by `daemon.delay`, when syncing is enabled. Everything
/// else is ignored.
pub fn route(ctx: &AppContext, feed: Feed, event: Event, now: Instant) -> Dispatch {
    let daemon = &ctx.config().daemon;
    match (feed, event) {
        (Feed::Downstream, Event::CommentAdded(comment)) if daemon.upstream => {
            Dispatch::Now(propagation_job(ctx, comment))
        }
        (Feed::Upstream, Event::RefUpdated(update)) if daemon.sync => {
            let project = update.ref_update.project;
            if ctx.config().project(project.as_str()).is_none() {
                tracing::debug!(project = %project, "ref update for unmanaged project");
                return Dispatch::Ignore;
            }
            let at = now + daemon.schedule_delay();
            tracing::info!(
                project = %project,
                delay_s = daemon.delay,
                "project sync scheduled"
            );
            Dispatch::Later(at, sync_job(ctx, project))
        }
        (_, event) => {
            tracing::trace!(feed = feed.name(), kind = event.kind(), "event ignored");
            Dispatch::Ignore
        }
    }
}

fn propagation_job(ctx: &AppContext, comment: CommentAdded) -> Job {
    let sync = ctx.sync.clone();
    let change = comment.change.id.clone();
    let key = format!("change:{change}");
    Job::new(format!("propagate {change}"), move || {
        let outcome = PropagationPipeline::new(sync).run(&comment)?;
        tracing::debug!(change = %change, outcome = ?outcome, "propagation done");
        Ok(())
    })
    .keyed(key)
}

fn sync_job(ctx: &AppContext, project: ProjectName) -> Job {
    let sync = ctx.sync.clone();
    let key = format!("project:{project}");
    Job::new(format!("sync {project}"), move || {
        pipeline::run(&sync, &SyncScope::project(project.as_str())).map(drop)
    })
    .keyed(key)
}

/// Run the daemon until `ctx.token` is cancelled.
pub async fn run(ctx: AppContext) -> Result<(), DaemonError> {
    let config = ctx.config().clone();
    let daemon = &config.daemon;
    let idle = daemon.idle_sleep();
    let token = ctx.token.clone();

    let pool = WorkerPool::start(daemon.numthreads, idle, &token);
    let mut feeds: Vec<(Feed, EventIngestor)> = Vec::new();
    if daemon.upstream {
        let connector = SshStreamConnector::new((*ctx.sync.downstream).clone());
        let ingestor = EventIngestor::start(Feed::Downstream.name(), connector, &token, RECONNECT_DELAY);
        feeds.push((Feed::Downstream, ingestor));
    }
    if daemon.sync {
        let connector = SshStreamConnector::new((*ctx.sync.upstream).clone());
        let ingestor = EventIngestor::start(Feed::Upstream.name(), connector, &token, RECONNECT_DELAY);
        feeds.push((Feed::Upstream, ingestor));
    }
    tracing::info!(
        workers = daemon.numthreads,
        upstream = daemon.upstream,
        sync = daemon.sync,
        "daemon started"
    );

    let mut scheduler = Scheduler::new();
    let result = event_loop(&ctx, &pool, &mut feeds, &mut scheduler).await;

    token.cancel();
    for (_, ingestor) in feeds {
        ingestor.stop().await;
    }
    pool.shutdown().await;
    if !scheduler.is_empty() {
        tracing::info!(pending = scheduler.len(), "discarding scheduled jobs");
    }
    tracing::info!("daemon stopped");
    result
}

async fn event_loop(
    ctx: &AppContext,
    pool: &WorkerPool,
    feeds: &mut [(Feed, EventIngestor)],
    scheduler: &mut Scheduler<Job>,
) -> Result<(), DaemonError> {
    let idle = ctx.config().daemon.idle_sleep();
    loop {
        if ctx.token.is_cancelled() {
            return Ok(());
        }
        let mut actionable = false;

        let now = Instant::now();
        while let Some(job) = scheduler.due(now) {
            pool.submit(job)?;
            actionable = true;
        }

        for (feed, ingestor) in feeds.iter_mut() {
            if let Some(event) = ingestor.poll() {
                actionable = true;
                match route(ctx, *feed, event, Instant::now()) {
                    Dispatch::Now(job) => pool.submit(job)?,
                    Dispatch::Later(at, job) => scheduler.schedule(at, job),
                    Dispatch::Ignore => {}
                }
            }
        }

        if !actionable {
            tokio::select! {
                _ = ctx.token.cancelled() => return Ok(()),
                _ = tokio::time::sleep(idle) => {}
            }
        }
    }
}

/// Cancel `token` on SIGINT or SIGTERM.
pub fn spawn_signal_listener(token: CancellationToken) -> JoinHandle<Result<(), DaemonError>> {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut terminate = signal(SignalKind::terminate()).map_err(|e| io_err("SIGTERM handler", e))?;
        let mut interrupt = signal(SignalKind::interrupt()).map_err(|e| io_err("SIGINT handler", e))?;
        tokio::select! {
            _ = token.cancelled() => {}
            _ = terminate.recv() => {
                tracing::info!("received SIGTERM, shutting down");
                token.cancel();
            }
            _ = interrupt.recv() => {
                tracing::info!("received SIGINT, shutting down");
                token.cancel();
            }
        }
        Ok(())
    })
}

/// Validate `config`, set up file logging, then run the daemon on a fresh
/// multi-thread runtime until a signal arrives.
pub fn start_blocking(config: RelayConfig) -> Result<(), DaemonError> {
    config.validate_for_daemon()?;
    logging::init_file(&config.logging)?;
    let log_file = config.logging.file.clone();
    let rotation_policy = RotationPolicy::from_config(&config.logging);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;

    runtime.block_on(async move {
        let ctx = AppContext::new(SyncContext::system(config));
        let signals = spawn_signal_listener(ctx.token.clone());
        let rotation = tokio::spawn(logging::rotation_task(
            log_file,
            rotation_policy,
            ctx.token.clone(),
        ));

        let result = run(ctx.clone()).await;
        ctx.token.cancel();

        handle_join("signal_listener", signals.await)?;
        if let Err(err) = rotation.await {
            tracing::warn!(error = %err, "log rotation task failed");
        }
        result
    })
}

fn handle_join(
    task: &'static str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Join {
            task,
            reason: err.to_string(),
        }),
    }
}
