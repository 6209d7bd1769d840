//! Async runtime shell around a [`LacEngine`].
//!
//! Three tasks share the engine behind a mutex: the timer walk, the link
//! monitor and the command server. The lock is never held across an await
//! point, and link sampling, which may block, runs on the blocking pool
//! outside it.

use crate::config::TimingConfig;
use crate::control::{LacCommand, LacResponse};
use crate::datapath::{Collect, DataPath};
use crate::driver::LinkDriver;
use crate::engine::LacEngine;
use crate::error::{LacError, LacResult};
use crate::input::RxDisposition;
use crate::link::NetdevEvent;
use lac_types::LinkInfo;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Depth of the command queue.
const COMMAND_QUEUE_DEPTH: usize = 64;

type CommandReply = oneshot::Sender<LacResult<LacResponse>>;

/// Spawns the daemon tasks.
pub struct LacDaemon;

impl LacDaemon {
    /// Moves `engine` into the runtime and starts the timer walk, link
    /// monitor and command server. Must be called within a tokio runtime.
    pub fn spawn(engine: LacEngine, timing: &TimingConfig) -> DaemonHandle {
        let driver = engine.driver.clone();
        let datapath = engine.datapath();
        let engine = Arc::new(Mutex::new(engine));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);

        let tasks = vec![
            tokio::spawn(run_ticker(
                engine.clone(),
                timing.tick_interval(),
                shutdown_rx.clone(),
            )),
            tokio::spawn(run_link_monitor(
                engine.clone(),
                driver,
                timing.tick_interval(),
                timing.link_check_interval(),
                shutdown_rx.clone(),
            )),
            tokio::spawn(run_command_server(engine.clone(), command_rx, shutdown_rx)),
        ];

        info!(
            tick_ms = timing.tick_interval_ms,
            link_check_secs = timing.link_check_interval_secs,
            "lacd tasks started"
        );
        DaemonHandle {
            engine,
            datapath,
            commands: command_tx,
            shutdown: shutdown_tx,
            tasks,
        }
    }
}

/// Handle to a running daemon.
pub struct DaemonHandle {
    engine: Arc<Mutex<LacEngine>>,
    datapath: Arc<DataPath>,
    commands: mpsc::Sender<(LacCommand, CommandReply)>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl DaemonHandle {
    /// Sends a command to the command server and waits for its reply.
    pub async fn command(&self, command: LacCommand) -> LacResult<LacResponse> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send((command, reply_tx))
            .await
            .map_err(|_| LacError::Shutdown)?;
        reply_rx.await.map_err(|_| LacError::Shutdown)?
    }

    /// Entry point for frames received on a physical link. Data frames stay
    /// on the lock-free path; slow-protocols frames go to the engine.
    pub fn receive_frame(&self, link: &str, frame: &[u8]) -> Collect {
        let collect = self.datapath.receive(link, frame);
        if collect == Collect::Control {
            let disposition = self.engine.lock().receive_control(link, frame);
            if disposition != RxDisposition::Consumed {
                debug!(link, ?disposition, "control frame not consumed");
            }
        }
        collect
    }

    /// Sends a frame out of an aggregator; returns the link used.
    pub fn transmit(&self, aggregator: &str, frame: &[u8]) -> Option<String> {
        self.datapath.transmit(aggregator, frame)
    }

    pub fn netdev_event(&self, link: &str, event: NetdevEvent) -> LacResult<()> {
        self.engine.lock().handle_netdev_event(link, event)
    }

    pub fn datapath(&self) -> Arc<DataPath> {
        self.datapath.clone()
    }

    /// Shared engine, for inspection. Do not hold the guard across awaits.
    pub fn engine(&self) -> Arc<Mutex<LacEngine>> {
        self.engine.clone()
    }

    /// Signals every task to stop and waits for them.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "lacd task ended abnormally");
            }
        }
        info!("lacd tasks stopped");
    }
}

async fn run_ticker(
    engine: Arc<Mutex<LacEngine>>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = interval.tick() => engine.lock().global_tick(),
            _ = shutdown.changed() => break,
        }
    }
}

async fn run_link_monitor(
    engine: Arc<Mutex<LacEngine>>,
    driver: Arc<dyn LinkDriver>,
    poll: Duration,
    sweep: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut requested = tokio::time::interval(poll);
    requested.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut full = tokio::time::interval(sweep);
    full.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let targets = tokio::select! {
            _ = requested.tick() => engine.lock().take_link_checks(),
            _ = full.tick() => engine.lock().link_targets(),
            _ = shutdown.changed() => break,
        };
        if targets.is_empty() {
            continue;
        }

        let samples = sample_links(driver.clone(), targets).await;
        let mut locked = engine.lock();
        for (port_no, link, sample) in samples {
            locked.apply_link_check(port_no, &link, sample);
        }
    }
}

/// Queries link state on the blocking pool. Each sample keeps the link it
/// was taken from, since the port may be rebound before it is applied.
async fn sample_links(
    driver: Arc<dyn LinkDriver>,
    targets: Vec<(u16, String)>,
) -> Vec<(u16, String, LinkInfo)> {
    let sampled = tokio::task::spawn_blocking(move || {
        targets
            .into_iter()
            .filter_map(|(port_no, link)| {
                let info = driver.link_info(&link)?;
                Some((port_no, link, info))
            })
            .collect::<Vec<_>>()
    })
    .await;
    match sampled {
        Ok(samples) => samples,
        Err(e) => {
            warn!(error = %e, "link sampling failed");
            Vec::new()
        }
    }
}

async fn run_command_server(
    engine: Arc<Mutex<LacEngine>>,
    mut commands: mpsc::Receiver<(LacCommand, CommandReply)>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            request = commands.recv() => {
                let Some((command, reply)) = request else {
                    break;
                };
                debug!(?command, "control command");
                let result = engine.lock().dispatch(command);
                if let Err(e) = &result {
                    debug!(error = %e, "control command failed");
                }
                let _ = reply.send(result);
            }
            _ = shutdown.changed() => break,
        }
    }
}
