//! Polling reader task and the session that controls it
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::types::*;
use crate::serial::framer::{FramerConfig, LineFramer};
use crate::serial::sender::send_request;
use crate::serial::{ConnectionParams, PortInfo, Result, SendRequest, SerialError, Transport};
use crate::sink::Sink;

pub struct SerialSessionBuilder<T: Transport> {
    pub transport: T,
    pub sink: Arc<dyn Sink>,
    pub policy: PollPolicy,
    pub framer: FramerConfig,
    pub command_capacity: usize,
}

impl<T: Transport> SerialSessionBuilder<T> {
    pub fn new(transport: T, sink: Arc<dyn Sink>) -> Self {
        Self { transport, sink, policy: PollPolicy::default(), framer: FramerConfig::default(), command_capacity: 64 }
    }

    pub fn policy(mut self, policy: PollPolicy) -> Self { self.policy = policy; self }

    pub fn framer(mut self, framer: FramerConfig) -> Self { self.framer = framer; self }

    pub fn command_capacity(mut self, capacity: usize) -> Self { self.command_capacity = capacity.max(1); self }

    /// Build a stopped session
    pub fn build(self) -> SerialSession<T> {
        let (metrics_tx, _metrics_rx) = watch::channel(MetricsSnapshot::default());
        SerialSession {
            idle: Some((self.transport, LineFramer::new(self.framer))),
            running: None,
            sink: self.sink,
            policy: self.policy,
            command_capacity: self.command_capacity,
            metrics_tx: Arc::new(metrics_tx),
        }
    }
}

struct RunningReader<T> {
    cmd_tx: mpsc::Sender<SerialCommand>,
    join: JoinHandle<Option<(T, LineFramer)>>,
}

/// Control surface over one serial connection.
///
/// While running, the transport and framer live inside the reader task and
/// every request is queued to it, so reads and writes never interleave.
pub struct SerialSession<T: Transport> {
    idle: Option<(T, LineFramer)>,
    running: Option<RunningReader<T>>,
    sink: Arc<dyn Sink>,
    policy: PollPolicy,
    command_capacity: usize,
    metrics_tx: Arc<watch::Sender<MetricsSnapshot>>,
}

impl<T: Transport> SerialSession<T> {
    pub fn state(&self) -> ReaderState {
        if self.running.is_some() { ReaderState::Running } else { ReaderState::Stopped }
    }

    pub fn policy(&self) -> &PollPolicy { &self.policy }

    pub fn metrics(&self) -> MetricsSnapshot { self.metrics_tx.borrow().clone() }

    pub fn metrics_receiver(&self) -> watch::Receiver<MetricsSnapshot> { self.metrics_tx.subscribe() }

    /// The transport, available only while stopped
    pub fn transport(&self) -> Option<&T> { self.idle.as_ref().map(|(t, _)| t) }

    pub fn list_ports(&self) -> Result<Vec<PortInfo>> { crate::serial::list_ports() }

    /// Spawn the reader task. Must be called inside a tokio runtime.
    pub fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Ok(());
        }
        let (transport, framer) = self.idle.take().ok_or(SerialError::TransportLost)?;
        let (cmd_tx, cmd_rx) = mpsc::channel(self.command_capacity);
        let join = tokio::spawn(reader_task(transport, framer, cmd_rx, self.sink.clone(), self.policy.clone(), self.metrics_tx.clone()));
        self.running = Some(RunningReader { cmd_tx, join });
        log::debug!("Reader started");
        Ok(())
    }

    /// Stop the reader task and close the transport.
    ///
    /// Waits at most `PollPolicy::stop_timeout`. On timeout the task is
    /// aborted and the transport is dropped once its pending call returns.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(RunningReader { cmd_tx, mut join }) = self.running.take() else { return Ok(()) };
        let bound = self.policy.stop_timeout;

        let outcome = tokio::time::timeout(bound, async {
            let _ = cmd_tx.send(SerialCommand::Shutdown).await;
            drop(cmd_tx);
            (&mut join).await
        })
        .await;

        match outcome {
            Ok(Ok(Some((transport, framer)))) => {
                self.idle = Some((transport, framer));
                log::debug!("Reader stopped");
                Ok(())
            }
            Ok(Ok(None)) => {
                log::error!("Reader task lost the transport");
                self.sink.on_status(false, "Reader failed: transport call panicked");
                Err(SerialError::ReaderFailed("transport call panicked".to_string()))
            }
            Ok(Err(e)) => {
                log::error!("Reader task failed: {}", e);
                self.sink.on_status(false, &format!("Reader failed: {}", e));
                Err(SerialError::ReaderFailed(e.to_string()))
            }
            Err(_) => {
                join.abort();
                log::error!("Reader did not stop within {:?}, aborted", bound);
                self.sink.on_status(false, &format!("Reader did not stop within {:?}", bound));
                Err(SerialError::ReaderStopTimeout(bound))
            }
        }
    }

    /// Open a port, starting the reader first if needed
    pub async fn connect(&mut self, params: ConnectionParams) -> Result<()> {
        self.start()?;
        self.request(|responder| SerialCommand::Connect { params, responder }).await
    }

    pub async fn disconnect(&self) -> Result<()> {
        if self.running.is_none() {
            return Ok(());
        }
        self.request(|responder| SerialCommand::Disconnect { responder }).await
    }

    /// Send one request, returning the number of bytes written
    pub async fn send(&self, request: SendRequest) -> Result<usize> {
        if self.running.is_none() {
            // Validate input first so malformed hex is reported as such
            request.encode()?;
            return Err(SerialError::NotConnected);
        }
        self.request(|responder| SerialCommand::Send { request, responder }).await
    }

    async fn request<R>(&self, make: impl FnOnce(oneshot::Sender<Result<R>>) -> SerialCommand) -> Result<R> {
        let running = self.running.as_ref().ok_or(SerialError::ReaderNotRunning)?;
        let (tx, rx) = oneshot::channel();
        running.cmd_tx.send(make(tx)).await.map_err(|_| SerialError::ChannelClosed)?;
        rx.await.map_err(|_| SerialError::ChannelClosed)?
    }
}

/// State owned by the reader task. It moves onto the blocking pool for every
/// transport call and comes back when the call returns.
struct ReaderCore<T> {
    transport: T,
    framer: LineFramer,
    sink: Arc<dyn Sink>,
    policy: PollPolicy,
    metrics: MetricsSnapshot,
    metrics_tx: Arc<watch::Sender<MetricsSnapshot>>,
}

/// Run `op` on the blocking pool so a stalled port never holds an async
/// worker. `None` means the call panicked and the core is gone.
async fn on_blocking_pool<T, R, F>(mut core: ReaderCore<T>, op: F) -> Option<(ReaderCore<T>, R)>
where
    T: Transport,
    R: Send + 'static,
    F: FnOnce(&mut ReaderCore<T>) -> R + Send + 'static,
{
    let handle = tokio::task::spawn_blocking(move || {
        let out = op(&mut core);
        (core, out)
    });
    match handle.await {
        Ok(done) => Some(done),
        Err(e) => {
            log::error!("Transport call failed: {}", e);
            None
        }
    }
}

pub(crate) async fn reader_task<T: Transport>(
    transport: T,
    framer: LineFramer,
    mut cmd_rx: mpsc::Receiver<SerialCommand>,
    sink: Arc<dyn Sink>,
    policy: PollPolicy,
    metrics_tx: Arc<watch::Sender<MetricsSnapshot>>,
) -> Option<(T, LineFramer)> {
    use tokio::select;
    use tokio::time::sleep;

    let metrics = metrics_tx.borrow().clone();
    let mut core = ReaderCore { transport, framer, sink, policy, metrics, metrics_tx };
    let mut delay = Duration::ZERO;

    loop {
        select! {
            biased;
            maybe_cmd = cmd_rx.recv() => {
                match maybe_cmd {
                    Some(SerialCommand::Shutdown) | None => break,
                    Some(cmd) => {
                        let (next, ()) = on_blocking_pool(core, move |core| core.handle_command(cmd)).await?;
                        core = next;
                        delay = Duration::ZERO;
                    }
                }
            },
            _ = sleep(delay) => {
                let (next, wait) = on_blocking_pool(core, |core| core.poll_once()).await?;
                core = next;
                delay = wait;
            }
        }
    }

    let (core, ()) = on_blocking_pool(core, |core| core.shut_down()).await?;
    Some((core.transport, core.framer))
}

impl<T: Transport> ReaderCore<T> {
    fn publish(&self) {
        self.metrics_tx.send_replace(self.metrics.clone());
    }

    /// Drain whatever the transport has queued and return the wait before the next poll
    fn poll_once(&mut self) -> Duration {
        let policy = &self.policy;
        if !self.transport.is_open() {
            return policy.poll_interval_idle;
        }

        let chunk = match self.transport.bytes_available() {
            Ok(0) => return policy.poll_interval_connected,
            Ok(_) => self.transport.read_available(),
            Err(e) => Err(e),
        };

        match chunk {
            Ok(bytes) if bytes.is_empty() => policy.poll_interval_connected,
            Ok(bytes) => {
                let metrics = &mut self.metrics;
                metrics.bytes_received += bytes.len() as u64;
                for record in self.framer.feed(&bytes) {
                    self.sink.on_record(&record);
                }
                let stats = self.framer.take_stats();
                metrics.text_lines += stats.text_lines;
                metrics.hex_records += stats.hex_records;
                metrics.forced_flushes += stats.forced_flushes;
                metrics.utf8_decode_errors += stats.decode_errors;
                let wait = policy.poll_interval_connected;
                self.publish();
                wait
            }
            Err(e) => {
                let msg = format!("Receive error: {}", e);
                let wait = policy.backoff_on_error;
                log::warn!("{}; retrying in {:?}", msg, wait);
                self.metrics.read_errors += 1;
                self.metrics.last_error = Some(msg.clone());
                self.publish();
                self.sink.on_status(self.transport.is_open(), &msg);
                wait
            }
        }
    }

    fn handle_command(&mut self, cmd: SerialCommand) {
        match cmd {
            SerialCommand::Connect { params, responder } => {
                let result = self.transport.open(&params);
                match &result {
                    Ok(()) => {
                        self.framer.reset();
                        self.metrics.connected_port = Some(params.port_name.clone());
                        self.sink.on_status(true, &format!("Connected: {} ({})", params.port_name, params.framing()));
                    }
                    Err(e) => {
                        // Report whatever the transport is actually doing now
                        let still_open = self.transport.is_open();
                        if !still_open {
                            self.framer.reset();
                        }
                        self.metrics.connected_port = self.transport.port_name().filter(|_| still_open).map(str::to_string);
                        self.metrics.last_error = Some(e.to_string());
                        log::warn!("Connection to {} failed: {}", params.port_name, e);
                        self.sink.on_status(still_open, &format!("Connection failed: {}", e));
                    }
                }
                self.publish();
                let _ = responder.send(result);
            }
            SerialCommand::Disconnect { responder } => {
                self.close_port();
                self.publish();
                let _ = responder.send(Ok(()));
            }
            SerialCommand::Send { request, responder } => {
                let result = send_request(&mut self.transport, &request, self.sink.as_ref());
                match &result {
                    Ok(written) => self.metrics.bytes_sent += *written as u64,
                    Err(e) => {
                        log::debug!("Send failed: {}", e);
                        self.metrics.last_error = Some(e.to_string());
                    }
                }
                self.publish();
                let _ = responder.send(result);
            }
            SerialCommand::Shutdown => {}
        }
    }

    fn close_port(&mut self) {
        if self.transport.is_open() {
            let port = self.transport.port_name().unwrap_or_default().to_string();
            self.transport.close();
            self.framer.reset();
            self.metrics.connected_port = None;
            self.sink.on_status(false, &format!("Disconnected: {}", port));
        }
    }

    fn shut_down(&mut self) {
        self.close_port();
        self.framer.reset();
        self.metrics.connected_port = None;
        self.publish();
    }
}
