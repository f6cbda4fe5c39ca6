mod io;

use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult, TransportError};
use crate::message::Message;

/// Frames queued for delivery before senders start dropping.
const OUTBOUND_BUFFER: usize = 1024;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const DISPOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Notifications delivered, in order, to the transport's consumer.
#[derive(Debug)]
pub(crate) enum TransportEvent {
    /// The connection became usable; emitted again after every reconnect.
    Connected,
    /// One inbound frame from the coordinator.
    Frame(Message),
    /// The connection dropped; the supervisor is already reconnecting.
    Disconnected(AppError),
}

/// Cloneable handle for queuing outbound frames. Sends never block; a full
/// or closed buffer logs and drops the frame.
#[derive(Clone)]
pub(crate) struct TransportSender {
    tx: mpsc::Sender<Message>,
}

impl TransportSender {
    pub(crate) fn send(&self, frame: Message) {
        match self.tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(frame)) => {
                warn!("Outbound buffer full, dropping `{}` frame", frame.kind);
            }
            Err(TrySendError::Closed(frame)) => {
                debug!("Transport closed, dropping `{}` frame", frame.kind);
            }
        }
    }
}

/// A durable bidirectional pipe to the coordinator.
///
/// The initial connect is fatal on failure; afterwards a supervisor task
/// owns the connection, reconnecting with a fixed delay and re-emitting
/// [`TransportEvent::Connected`] each time the pipe becomes usable again.
pub(crate) struct Transport {
    sender: TransportSender,
    supervisor: JoinHandle<()>,
}

impl Transport {
    /// Establish the initial connection and spawn the supervisor.
    ///
    /// # Errors
    ///
    /// Returns an error if the coordinator is unreachable at startup.
    pub(crate) async fn connect(
        addr: String,
        events_tx: mpsc::UnboundedSender<TransportEvent>,
    ) -> AppResult<Self> {
        let stream = TcpStream::connect(&addr).await.map_err(|err| {
            AppError::transport(TransportError::Connection {
                addr: addr.clone(),
                source: err,
            })
        })?;
        info!("Connected to coordinator {}", addr);

        let (out_tx, out_rx) = mpsc::channel::<Message>(OUTBOUND_BUFFER);
        let supervisor = tokio::spawn(supervise(addr, stream, out_rx, events_tx));

        Ok(Self {
            sender: TransportSender { tx: out_tx },
            supervisor,
        })
    }

    pub(crate) fn sender(&self) -> TransportSender {
        self.sender.clone()
    }

    /// Flush best-effort and release the connection.
    ///
    /// Queued frames are drained by the writer once every sender handle is
    /// gone; the supervisor is aborted if that takes longer than the grace
    /// period.
    pub(crate) async fn dispose(self) {
        let Transport {
            sender,
            mut supervisor,
        } = self;
        drop(sender);
        if tokio::time::timeout(DISPOSE_TIMEOUT, &mut supervisor)
            .await
            .is_err()
        {
            debug!("Transport supervisor outlived dispose grace, aborting");
            supervisor.abort();
        }
    }
}

async fn supervise(
    addr: String,
    first: TcpStream,
    mut out_rx: mpsc::Receiver<Message>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
) {
    let mut stream = Some(first);
    loop {
        let connection = match stream.take() {
            Some(connection) => connection,
            None => match TcpStream::connect(&addr).await {
                Ok(connection) => {
                    info!("Reconnected to coordinator {}", addr);
                    connection
                }
                Err(err) => {
                    warn!("Reconnect to {} failed: {}", addr, err);
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    continue;
                }
            },
        };

        if events_tx.send(TransportEvent::Connected).is_err() {
            return;
        }

        let (read_half, write_half) = connection.into_split();
        match run_connection(read_half, write_half, &mut out_rx, &events_tx).await {
            Some(err) => {
                if events_tx.send(TransportEvent::Disconnected(err)).is_err() {
                    return;
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
            // Outbound channel closed: the worker is disposing.
            None => return,
        }
    }
}

/// Pump one live connection: a dedicated reader task forwards inbound
/// frames in order while this future drains the outbound queue. Returns
/// the error that broke the connection, or `None` when the outbound
/// channel closed and the transport should shut down.
async fn run_connection(
    read_half: OwnedReadHalf,
    mut write_half: OwnedWriteHalf,
    out_rx: &mut mpsc::Receiver<Message>,
    events_tx: &mpsc::UnboundedSender<TransportEvent>,
) -> Option<AppError> {
    let (dead_tx, mut dead_rx) = oneshot::channel::<AppError>();
    let events = events_tx.clone();
    let reader_task = tokio::spawn(async move {
        let mut reader = BufReader::new(read_half);
        loop {
            match io::read_frame(&mut reader).await {
                Ok(frame) => {
                    if events.send(TransportEvent::Frame(frame)).is_err() {
                        return;
                    }
                }
                Err(err) => {
                    drop(dead_tx.send(err));
                    return;
                }
            }
        }
    });

    let result = loop {
        tokio::select! {
            death = &mut dead_rx => {
                break match death {
                    Ok(err) => Some(err),
                    // Reader exited because the event consumer is gone.
                    Err(_) => None,
                };
            }
            outbound = out_rx.recv() => match outbound {
                Some(frame) => {
                    if let Err(err) = io::write_frame(&mut write_half, &frame).await {
                        warn!("Failed to send `{}` frame: {}", frame.kind, err);
                        break Some(err);
                    }
                }
                None => break None,
            },
        }
    };
    reader_task.abort();
    result
}
