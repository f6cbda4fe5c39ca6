mod spawn;
mod state;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::cron::Cron;
use crate::error::{AppResult, RunnerError, TransportError};
use crate::heartbeat::HeartBeat;
use crate::ident;
use crate::message::{HatchOrder, Message, kind};
use crate::scheduler::Scheduler;
use crate::shutdown;
use crate::stats::{StatsRecorder, StatsService};
use crate::transport::{Transport, TransportEvent, TransportSender};

pub use state::State;
use state::StateCell;

enum Flow {
    Continue,
    Quit,
    Fatal(crate::error::AppError),
}

/// The worker runtime: owns the lifecycle state machine, reacts to
/// coordinator frames, hatches virtual clients, and wires the stats
/// aggregator to the transport.
///
/// One worker per process: construct it, register prototypes, then hand the
/// current task to [`Worker::run`] until the coordinator quits it.
pub struct Worker {
    config: WorkerConfig,
    node_id: String,
    state: Arc<StateCell>,
    actual_clients: Arc<AtomicU64>,
    prototypes: Vec<Box<dyn Cron>>,
    started: bool,
}

impl Worker {
    /// Build a worker from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: WorkerConfig) -> AppResult<Self> {
        config.validate()?;
        let node_id = ident::build_node_id(config.random_seed);
        Ok(Self {
            config,
            node_id,
            state: Arc::new(StateCell::new(State::Idle)),
            actual_clients: Arc::new(AtomicU64::new(0)),
            prototypes: Vec::new(),
            started: false,
        })
    }

    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.state.load()
    }

    /// Store the task prototypes and become ready for coordinator
    /// instructions. Repeated registrations are ignored.
    pub fn register(&mut self, prototypes: Vec<Box<dyn Cron>>) {
        if self.started {
            debug!("Ignoring repeated register call");
            return;
        }
        self.prototypes = prototypes;
        self.started = true;
        self.state.store(State::Ready);
    }

    /// Connect to the coordinator and process frames until a `quit`, a
    /// process signal, or a fatal error.
    ///
    /// # Errors
    ///
    /// Returns an error if no prototypes were registered, if the initial
    /// connect fails, or if the coordinator hatches while the swarm is
    /// already live.
    pub async fn run(mut self) -> AppResult<()> {
        if !self.started {
            return Err(RunnerError::NotRegistered.into());
        }

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let transport = match Transport::connect(self.config.master_addr(), events_tx).await {
            Ok(transport) => transport,
            Err(err) => {
                error!("Failed to initialize transport: {}", err);
                return Err(err);
            }
        };
        let sender = transport.sender();

        let stats = self.start_stats(&sender);
        let recorder = stats.recorder();
        let scheduler = Arc::new(Scheduler::new(&self.config, stats.recorder()));

        let (shutdown_tx, mut shutdown_rx) = shutdown::shutdown_channel();
        let signal_handle = shutdown::setup_signal_shutdown_handler(&shutdown_tx);

        let mut heartbeat: Option<HeartBeat> = None;
        let mut hatch_task: Option<JoinHandle<()>> = None;

        let outcome = loop {
            tokio::select! {
                maybe_event = events_rx.recv() => {
                    let event = match maybe_event {
                        Some(event) => event,
                        None => break Err(TransportError::EventChannelClosed.into()),
                    };
                    match event {
                        TransportEvent::Connected => {
                            info!("Ready!");
                            sender.send(Message::control(kind::CLIENT_READY, &self.node_id));
                            if heartbeat.is_none() {
                                heartbeat =
                                    Some(HeartBeat::start(sender.clone(), self.node_id.clone()));
                            }
                        }
                        TransportEvent::Disconnected(err) => {
                            warn!("Lost coordinator connection: {}", err);
                        }
                        TransportEvent::Frame(frame) => {
                            let flow = self
                                .on_frame(frame, &sender, &recorder, &scheduler, &mut hatch_task)
                                .await;
                            match flow {
                                Flow::Continue => {}
                                Flow::Quit => break Ok(()),
                                Flow::Fatal(err) => break Err(err),
                            }
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    warn!("Shutdown signal received");
                    break Ok(());
                }
            }
        };

        if let Some(hatch) = hatch_task.take() {
            hatch.abort();
        }
        self.dispose(&sender, &scheduler).await;
        if let Some(heartbeat) = heartbeat.take() {
            heartbeat.dispose();
        }
        stats.dispose();
        signal_handle.abort();
        drop(sender);
        transport.dispose().await;

        outcome
    }

    fn start_stats(&self, sender: &TransportSender) -> StatsService {
        let state = self.state.clone();
        let actual_clients = self.actual_clients.clone();
        let sender = sender.clone();
        let node_id = self.node_id.clone();
        StatsService::start(
            Duration::from_millis(self.config.stat_interval_ms),
            Box::new(move |snapshot| {
                let current = state.load();
                if current != State::Hatching && current != State::Running {
                    return;
                }
                debug!("Sending report in state {}", current.as_str());
                let payload = snapshot.into_payload(actual_clients.load(Ordering::Acquire));
                sender.send(Message::new(kind::STATS, Some(payload), &node_id));
            }),
        )
    }

    async fn on_frame(
        &mut self,
        frame: Message,
        sender: &TransportSender,
        recorder: &StatsRecorder,
        scheduler: &Arc<Scheduler>,
        hatch_task: &mut Option<JoinHandle<()>>,
    ) -> Flow {
        match frame.kind.as_str() {
            kind::HATCH => self.on_hatch(&frame, sender, recorder, scheduler, hatch_task),
            kind::STOP => {
                self.on_stop(sender, scheduler).await;
                Flow::Continue
            }
            kind::QUIT => {
                info!("Got `quit` message from coordinator, shutting down...");
                Flow::Quit
            }
            other => {
                debug!("Ignoring unrecognized `{}` frame", other);
                Flow::Continue
            }
        }
    }

    fn on_hatch(
        &mut self,
        frame: &Message,
        sender: &TransportSender,
        recorder: &StatsRecorder,
        scheduler: &Arc<Scheduler>,
        hatch_task: &mut Option<JoinHandle<()>>,
    ) -> Flow {
        let order = match HatchOrder::from_payload(frame.data.as_ref()) {
            Ok(order) => order,
            Err(err) => {
                warn!("Ignoring malformed `hatch` frame: {}", err);
                return Flow::Continue;
            }
        };

        let current = self.state.load();
        if current != State::Ready && current != State::Stopped {
            error!(
                "Received `hatch` in state {}. Terminating now...",
                current.as_str()
            );
            return Flow::Fatal(
                RunnerError::IllegalHatch {
                    state: current.as_str(),
                }
                .into(),
            );
        }

        info!(
            "Start hatching: num_clients={} hatch_rate={}",
            order.num_clients, order.hatch_rate
        );
        sender.send(Message::control(kind::HATCHING, &self.node_id));
        recorder.clear_all();
        self.actual_clients.store(0, Ordering::Release);
        self.state.store(State::Hatching);

        let templates: Vec<Box<dyn Cron>> = self
            .prototypes
            .iter()
            .map(|prototype| prototype.clone_cron())
            .collect();
        *hatch_task = Some(tokio::spawn(spawn::run_hatch(spawn::HatchContext {
            templates,
            num_clients: order.num_clients,
            hatch_rate: order.hatch_rate,
            scheduler: scheduler.clone(),
            state: self.state.clone(),
            actual_clients: self.actual_clients.clone(),
            sender: sender.clone(),
            node_id: self.node_id.clone(),
        })));
        Flow::Continue
    }

    async fn on_stop(&mut self, sender: &TransportSender, scheduler: &Scheduler) {
        let current = self.state.load();
        if current != State::Hatching && current != State::Running {
            debug!("Ignoring `stop` in state {}", current.as_str());
            return;
        }
        info!("Received `stop` from coordinator, stopping all clients");
        self.state.store(State::Stopped);
        scheduler.stop().await;

        sender.send(Message::control(kind::CLIENT_STOPPED, &self.node_id));
        sender.send(Message::control(kind::CLIENT_READY, &self.node_id));
    }

    async fn dispose(&mut self, sender: &TransportSender, scheduler: &Scheduler) {
        if self.state.load() == State::Stopped {
            return;
        }
        warn!("Disposing...");
        info!("Quitting...");
        sender.send(Message::control(kind::QUIT, &self.node_id));
        self.state.store(State::Stopped);

        for prototype in &mut self.prototypes {
            prototype.dispose();
        }
        scheduler.dispose().await;
        info!("Bye bye!");
    }
}
