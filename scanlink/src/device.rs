//! Device session
//!
//! One `DeviceSession` exists per connected scanner. It owns the transport
//! link through a background task that writes commands, reassembles inbound
//! frames, matches responses to outstanding requests by correlation token,
//! and publishes unsolicited notifications to the dispatcher.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use scanlink_core::{
    Command, DecodedFrame, FrameBuffer, Opcode, Response, ResultCode, SessionState, TokenGenerator,
};
use scanlink_transport::{Connector, LinkReader, LinkWriter};
use scanlink_types::{ScannerId, ScannerIdentity};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, trace, warn};

use crate::config::SessionConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{ConnectError, SendError};
use crate::event::{Event, SessionSnapshot};

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// The host asked for the disconnect
    Requested,

    /// The link failed or the scanner closed it
    TransportLost,

    /// Too many consecutive malformed frames
    Desync,
}

/// Sent to the session manager when a session task finishes
#[derive(Debug, Clone, Copy)]
pub(crate) struct SessionNotice {
    pub id: ScannerId,
    pub generation: u64,
    pub reason: TerminationReason,
}

pub(crate) enum SessionRequest {
    Send {
        command: Command,
        reply: oneshot::Sender<Response>,
    },
    Disconnect {
        done: oneshot::Sender<()>,
    },
}

/// Pending response to a command
///
/// Always resolves: with the scanner's response, with a synthetic
/// `ResponseTimeout` once the deadline passes, or with `Cancelled` when the
/// session ends first.
#[derive(Debug)]
pub struct ResponseHandle {
    opcode: Opcode,
    token: u16,
    rx: oneshot::Receiver<Response>,
}

impl ResponseHandle {
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Correlation token assigned to the command
    pub fn token(&self) -> u16 {
        self.token
    }

    pub async fn wait(self) -> Response {
        let Self { opcode, token, rx } = self;
        rx.await
            .unwrap_or_else(|_| Response::synthetic(opcode, token, ResultCode::Cancelled))
    }
}

/// Session with one scanner
///
/// A session is used once: after it terminates, reconnecting the same
/// scanner requires a fresh instance so no pending request or deadline
/// leaks across connections.
///
/// # Examples
///
/// ```no_run
/// use bytes::Bytes;
/// use scanlink::{DeviceSession, Dispatcher, SessionConfig};
/// use scanlink_core::Opcode;
/// use scanlink_transport::TcpConnector;
/// use scanlink_types::{ConnectionType, ScannerId, ScannerIdentity, ScannerModel};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let id = ScannerId::new(1)?;
///     let connector = TcpConnector::new().with_route(id, "192.168.1.40:5000");
///     let identity = ScannerIdentity::new(id, ScannerModel::Cs4070, ConnectionType::Ble);
///
///     let dispatcher = Dispatcher::new(64);
///     let mut session = DeviceSession::new(identity, SessionConfig::default(), dispatcher);
///     session.connect(&connector).await?;
///     session.start_streaming();
///
///     let response = session.execute(Opcode::AttrGetAll, Bytes::new()).await?;
///     println!("{}", response.result);
///
///     session.disconnect().await;
///     Ok(())
/// }
/// ```
pub struct DeviceSession {
    identity: ScannerIdentity,
    generation: u64,
    config: SessionConfig,
    tokens: TokenGenerator,
    state: Arc<Mutex<SessionState>>,
    requests: Option<mpsc::Sender<SessionRequest>>,
    gate: Option<oneshot::Sender<()>>,
    dispatcher: Dispatcher,
    notices: Option<mpsc::UnboundedSender<SessionNotice>>,
    established_at: Option<DateTime<Utc>>,
    task: Option<JoinHandle<()>>,
}

impl DeviceSession {
    pub fn new(identity: ScannerIdentity, config: SessionConfig, dispatcher: Dispatcher) -> Self {
        Self {
            identity,
            generation: 0,
            config,
            tokens: TokenGenerator::new(),
            state: Arc::new(Mutex::new(SessionState::Idle)),
            requests: None,
            gate: None,
            dispatcher,
            notices: None,
            established_at: None,
            task: None,
        }
    }

    /// Report termination to the session manager, tagged with `generation`
    pub(crate) fn with_notices(
        mut self,
        notices: mpsc::UnboundedSender<SessionNotice>,
        generation: u64,
    ) -> Self {
        self.notices = Some(notices);
        self.generation = generation;
        self
    }

    /// Fresh session replacing this one after it was lost
    ///
    /// The new instance starts in `Reconnecting` and inherits only the
    /// configuration and event routing; `identity` is the rediscovered one.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` unless this session has terminated.
    pub(crate) fn successor(
        &self,
        identity: ScannerIdentity,
        generation: u64,
    ) -> scanlink_core::Result<Self> {
        let state = self.state().transition(SessionState::Reconnecting)?;
        trace!("{}: {:?} -> {:?}", identity.id, self.state(), state);

        let mut session = Self::new(identity, self.config.clone(), self.dispatcher.clone());
        session.state = Arc::new(Mutex::new(state));
        session.notices = self.notices.clone();
        session.generation = generation;
        Ok(session)
    }

    pub fn identity(&self) -> &ScannerIdentity {
        &self.identity
    }

    pub fn id(&self) -> ScannerId {
        self.identity.id
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            identity: self.identity,
            state: self.state(),
            established_at: self.established_at.unwrap_or_else(Utc::now),
        }
    }

    /// Open the transport and start the session task
    ///
    /// The handshake is bounded by the configured connect timeout. Inbound
    /// frames are held back until `start_streaming` is called, so the
    /// caller can announce the session before any of its data events.
    ///
    /// # Errors
    ///
    /// - `InvalidState` unless the session is fresh
    /// - `Timeout` if the handshake does not complete in time
    /// - `Rejected` or `TransportUnavailable` as reported by the transport
    pub async fn connect(&mut self, connector: &dyn Connector) -> Result<(), ConnectError> {
        let current = self.state();
        if !matches!(current, SessionState::Idle | SessionState::Reconnecting) {
            return Err(ConnectError::InvalidState(current));
        }

        self.advance(SessionState::Connecting);
        info!("Connecting to {}...", self.identity);

        let link = match timeout(self.config.connect_timeout, connector.open(&self.identity)).await
        {
            Ok(Ok(link)) => link,
            Ok(Err(e)) => {
                warn!("Connection to {} failed: {}", self.identity, e);
                self.advance(SessionState::Terminated);
                return Err(e.into());
            }
            Err(_) => {
                warn!(
                    "Connection to {} timed out after {:?}",
                    self.identity, self.config.connect_timeout
                );
                self.advance(SessionState::Terminated);
                return Err(ConnectError::Timeout);
            }
        };

        let (reader, writer) = link.split();
        let (inbound_tx, inbound_rx) = mpsc::channel(self.config.inbound_queue_capacity);
        let (request_tx, request_rx) = mpsc::channel(self.config.command_queue_capacity);
        let (gate_tx, gate_rx) = oneshot::channel();

        let reader = tokio::spawn(read_loop(reader, inbound_tx));

        self.advance(SessionState::Active);
        self.established_at = Some(Utc::now());

        let task = SessionTask {
            identity: self.identity,
            generation: self.generation,
            config: self.config.clone(),
            state: Arc::clone(&self.state),
            requests: request_rx,
            inbound: inbound_rx,
            gate: gate_rx,
            streaming: false,
            reader,
            writer,
            buffer: FrameBuffer::new(),
            pending: HashMap::new(),
            malformed: 0,
            dispatcher: self.dispatcher.clone(),
            notices: self.notices.clone(),
        };

        self.task = Some(tokio::spawn(task.run()));
        self.requests = Some(request_tx);
        self.gate = Some(gate_tx);

        info!("Connected to {}", self.identity);
        Ok(())
    }

    /// Begin decoding inbound frames
    pub fn start_streaming(&mut self) {
        if let Some(gate) = self.gate.take() {
            let _ = gate.send(());
        }
    }

    /// Queue a command without waiting for its response
    ///
    /// Multiple commands may be outstanding at once; responses are matched
    /// by correlation token, not arrival order.
    ///
    /// # Errors
    ///
    /// - `NotActive` unless the session is active
    /// - `QueueFull` if the command queue is at capacity
    pub fn send(
        &self,
        opcode: Opcode,
        payload: impl Into<Bytes>,
    ) -> Result<ResponseHandle, SendError> {
        if !self.is_active() {
            return Err(SendError::NotActive);
        }
        let requests = self.requests.as_ref().ok_or(SendError::NotActive)?;

        let token = self.tokens.next_token();
        let command = Command::new(opcode, token, payload);
        let (reply, rx) = oneshot::channel();

        requests
            .try_send(SessionRequest::Send { command, reply })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SendError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => SendError::NotActive,
            })?;

        trace!("Queued {} (token={}) for {}", opcode, token, self.identity.id);
        Ok(ResponseHandle { opcode, token, rx })
    }

    /// Send a command and wait for its response
    pub async fn execute(
        &self,
        opcode: Opcode,
        payload: impl Into<Bytes>,
    ) -> Result<Response, SendError> {
        Ok(self.send(opcode, payload)?.wait().await)
    }

    /// End the session
    ///
    /// Outstanding requests resolve with `Cancelled` immediately. Safe to
    /// call more than once; the session is `Terminated` afterwards.
    pub async fn disconnect(&mut self) {
        self.gate.take();

        let Some(requests) = self.requests.take() else {
            if matches!(self.state(), SessionState::Idle | SessionState::Reconnecting) {
                self.advance(SessionState::Terminated);
            }
            return;
        };

        debug!("Disconnecting from {}", self.identity);

        let (done_tx, done_rx) = oneshot::channel();
        let drained = timeout(self.config.disconnect_timeout, async {
            requests
                .send(SessionRequest::Disconnect { done: done_tx })
                .await
                .is_ok()
                && done_rx.await.is_ok()
        })
        .await
        .unwrap_or(false);

        if !drained {
            // Task is gone or stuck
            if let Some(task) = self.task.take() {
                task.abort();
            }
            let mut state = self.state.lock();
            if !state.is_terminated() {
                warn!("Session with {} did not drain, aborted", self.identity);
                *state = SessionState::Terminated;
            }
        }
        self.task = None;
    }

    fn advance(&self, next: SessionState) {
        advance(&self.state, &self.identity, next);
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        if self.is_active() {
            warn!("Session with {} dropped while active", self.identity);
        }
    }
}

fn advance(state: &Mutex<SessionState>, identity: &ScannerIdentity, next: SessionState) {
    let mut current = state.lock();
    match current.transition(next) {
        Ok(next) => {
            trace!("{}: {:?} -> {:?}", identity.id, *current, next);
            *current = next;
        }
        Err(e) => warn!("{}: {}", identity.id, e),
    }
}

async fn read_loop(
    mut reader: Box<dyn LinkReader>,
    inbound: mpsc::Sender<scanlink_transport::Result<BytesMut>>,
) {
    loop {
        let chunk = reader.read().await;
        let failed = chunk.is_err();
        if inbound.send(chunk).await.is_err() || failed {
            break;
        }
    }
}

struct Pending {
    opcode: Opcode,
    deadline: Instant,
    reply: oneshot::Sender<Response>,
}

struct SessionTask {
    identity: ScannerIdentity,
    generation: u64,
    config: SessionConfig,
    state: Arc<Mutex<SessionState>>,
    requests: mpsc::Receiver<SessionRequest>,
    inbound: mpsc::Receiver<scanlink_transport::Result<BytesMut>>,
    gate: oneshot::Receiver<()>,
    streaming: bool,
    reader: JoinHandle<()>,
    writer: Box<dyn LinkWriter>,
    buffer: FrameBuffer,
    pending: HashMap<u16, Pending>,
    malformed: u32,
    dispatcher: Dispatcher,
    notices: Option<mpsc::UnboundedSender<SessionNotice>>,
}

impl Drop for SessionTask {
    fn drop(&mut self) {
        // Dropping a JoinHandle detaches; the reader must release its half
        self.reader.abort();
    }
}

impl SessionTask {
    async fn run(mut self) {
        let mut acks = Vec::new();

        let reason = loop {
            let deadline = self.next_deadline();

            tokio::select! {
                biased;

                request = self.requests.recv() => match request {
                    Some(SessionRequest::Send { command, reply }) => {
                        if let Err(reason) = self.dispatch(command, reply).await {
                            break reason;
                        }
                    }
                    Some(SessionRequest::Disconnect { done }) => {
                        acks.push(done);
                        break TerminationReason::Requested;
                    }
                    None => break TerminationReason::Requested,
                },

                _ = &mut self.gate, if !self.streaming => {
                    self.streaming = true;
                }

                chunk = self.inbound.recv(), if self.streaming => match chunk {
                    Some(Ok(bytes)) => {
                        if let Err(reason) = self.on_bytes(&bytes) {
                            break reason;
                        }
                    }
                    Some(Err(e)) => {
                        warn!("Link to {} lost: {}", self.identity, e);
                        break TerminationReason::TransportLost;
                    }
                    None => break TerminationReason::TransportLost,
                },

                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.expire_overdue();
                }
            }
        };

        self.shutdown(reason, acks).await;
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|pending| pending.deadline).min()
    }

    async fn dispatch(
        &mut self,
        command: Command,
        reply: oneshot::Sender<Response>,
    ) -> Result<(), TerminationReason> {
        let opcode = command.opcode;
        let token = command.token;

        if opcode.is_reserved() {
            debug!("{} is reserved, answering locally", opcode);
            let _ = reply.send(Response::synthetic(opcode, token, ResultCode::OpcodeNotSupported));
            return Ok(());
        }

        if self.pending.contains_key(&token) {
            warn!(
                "Token {} still outstanding on {}, rejecting {}",
                token, self.identity.id, opcode
            );
            let _ = reply.send(Response::synthetic(opcode, token, ResultCode::InvalidParams));
            return Ok(());
        }

        let frame = match command.encode() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Cannot encode {}: {}", command, e);
                let _ = reply.send(Response::synthetic(opcode, token, ResultCode::InvalidParams));
                return Ok(());
            }
        };

        debug!(
            "-> {} {} ({} bytes)",
            self.identity.id,
            command,
            frame.len()
        );
        trace!("Frame bytes: {}", hex::encode(&frame[..frame.len().min(32)]));

        self.pending.insert(
            token,
            Pending {
                opcode,
                deadline: Instant::now() + self.config.response_timeout,
                reply,
            },
        );

        match timeout(self.config.response_timeout, self.writer.write(&frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!("Write to {} failed: {}", self.identity, e);
                Err(TerminationReason::TransportLost)
            }
            Err(_) => {
                warn!("Write to {} stalled", self.identity);
                Err(TerminationReason::TransportLost)
            }
        }
    }

    fn on_bytes(&mut self, bytes: &[u8]) -> Result<(), TerminationReason> {
        trace!("<- {} {} bytes", self.identity.id, bytes.len());
        self.buffer.extend(bytes);

        while let Some(frame) = self.buffer.next_frame() {
            match frame {
                Ok(DecodedFrame::Response(response)) => {
                    self.malformed = 0;
                    self.resolve(response);
                }
                Ok(DecodedFrame::Notification(notification)) => {
                    self.malformed = 0;
                    trace!("{} notification {}", self.identity.id, notification.opcode());
                    self.dispatcher
                        .publish(Event::from_notification(self.identity.id, notification));
                }
                Err(e) if e.is_malformed() => {
                    self.malformed += 1;
                    warn!(
                        "Malformed frame from {} ({}/{}): {}",
                        self.identity.id,
                        self.malformed,
                        self.config.max_consecutive_malformed,
                        e
                    );
                    if self.malformed >= self.config.max_consecutive_malformed {
                        self.buffer.clear();
                        return Err(TerminationReason::Desync);
                    }
                }
                Err(e) => {
                    self.malformed = 0;
                    warn!("Dropping frame from {}: {}", self.identity.id, e);
                }
            }
        }

        Ok(())
    }

    fn resolve(&mut self, response: Response) {
        match self.pending.remove(&response.token) {
            Some(pending) => {
                if pending.opcode != response.opcode {
                    warn!(
                        "Response token {} answers {} but {} was sent",
                        response.token, response.opcode, pending.opcode
                    );
                }
                debug!(
                    "<- {} {} (token={}) {}",
                    self.identity.id, response.opcode, response.token, response.result
                );
                let _ = pending.reply.send(response);
            }
            None => debug!(
                "Dropping response with unknown token {} from {}",
                response.token, self.identity.id
            ),
        }
    }

    fn expire_overdue(&mut self) {
        let now = Instant::now();
        let overdue: Vec<u16> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.deadline <= now)
            .map(|(token, _)| *token)
            .collect();

        for token in overdue {
            if let Some(pending) = self.pending.remove(&token) {
                debug!("{} (token={}) timed out on {}", pending.opcode, token, self.identity.id);
                let _ = pending
                    .reply
                    .send(Response::synthetic(pending.opcode, token, ResultCode::ResponseTimeout));
            }
        }
    }

    async fn shutdown(mut self, reason: TerminationReason, mut acks: Vec<oneshot::Sender<()>>) {
        advance(&self.state, &self.identity, SessionState::Disconnecting);

        for (token, pending) in self.pending.drain() {
            let _ = pending
                .reply
                .send(Response::synthetic(pending.opcode, token, ResultCode::Cancelled));
        }

        self.requests.close();
        while let Ok(request) = self.requests.try_recv() {
            match request {
                SessionRequest::Send { command, reply } => {
                    let _ = reply.send(Response::synthetic(
                        command.opcode,
                        command.token,
                        ResultCode::Cancelled,
                    ));
                }
                SessionRequest::Disconnect { done } => acks.push(done),
            }
        }

        self.reader.abort();
        match timeout(self.config.disconnect_timeout, self.writer.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Closing link to {}: {}", self.identity, e),
            Err(_) => debug!("Closing link to {} timed out", self.identity),
        }

        advance(&self.state, &self.identity, SessionState::Terminated);
        info!("Session with {} terminated ({:?})", self.identity, reason);

        if let Some(notices) = &self.notices {
            let _ = notices.send(SessionNotice {
                id: self.identity.id,
                generation: self.generation,
                reason,
            });
        }
        for done in acks {
            let _ = done.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use scanlink_core::{Notification, HEADER_SIZE};
    use scanlink_transport::{MemoryConnector, PeerListener};
    use scanlink_types::{ConnectionType, ScannerModel};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn identity(id: u16) -> ScannerIdentity {
        ScannerIdentity::new(ScannerId::new(id).unwrap(), ScannerModel::Ds8178, ConnectionType::Ble)
    }

    async fn read_command(stream: &mut DuplexStream) -> Command {
        let mut header = [0u8; HEADER_SIZE];
        stream.read_exact(&mut header).await.unwrap();
        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        let mut frame = header.to_vec();
        frame.resize(HEADER_SIZE + length, 0);
        stream.read_exact(&mut frame[HEADER_SIZE..]).await.unwrap();
        Command::decode(Bytes::from(frame)).unwrap()
    }

    async fn respond(stream: &mut DuplexStream, command: &Command, payload: &[u8]) {
        let response =
            Response::new(command.opcode, command.token, ResultCode::Success, payload.to_vec());
        stream.write_all(&response.encode().unwrap()).await.unwrap();
    }

    async fn connected(
        config: SessionConfig,
    ) -> (DeviceSession, DuplexStream, Dispatcher, PeerListener, MemoryConnector) {
        let connector = MemoryConnector::new();
        let mut listener = connector.listen(identity(1).id);
        let dispatcher = Dispatcher::new(16);

        let mut session = DeviceSession::new(identity(1), config, dispatcher.clone());
        session.connect(&connector).await.unwrap();
        session.start_streaming();
        let scanner = listener.accept().await.unwrap();

        (session, scanner, dispatcher, listener, connector)
    }

    #[tokio::test]
    async fn test_send_requires_active_session() {
        let session = DeviceSession::new(identity(1), SessionConfig::default(), Dispatcher::new(4));
        assert_eq!(
            session.send(Opcode::PullTrigger, Bytes::new()).unwrap_err(),
            SendError::NotActive
        );
    }

    #[tokio::test]
    async fn test_responses_matched_by_token() {
        let (session, mut scanner, _dispatcher, _listener, _connector) =
            connected(SessionConfig::default()).await;

        let first = session.send(Opcode::AttrGet, vec![0x00, 0x01]).unwrap();
        let second = session.send(Opcode::AttrGetAll, Bytes::new()).unwrap();

        let a = read_command(&mut scanner).await;
        let b = read_command(&mut scanner).await;
        assert_eq!(a.token, first.token());
        assert_eq!(b.token, second.token());

        // Answer out of order
        respond(&mut scanner, &b, b"all").await;
        respond(&mut scanner, &a, b"one").await;

        assert_eq!(first.wait().await.payload, Bytes::from_static(b"one"));
        assert_eq!(second.wait().await.payload, Bytes::from_static(b"all"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_produces_single_timeout() {
        let config = SessionConfig::default().with_response_timeout(Duration::from_secs(2));
        let (session, mut scanner, _dispatcher, _listener, _connector) = connected(config).await;

        let handle = session.send(Opcode::CaptureImage, Bytes::new()).unwrap();
        let command = read_command(&mut scanner).await;

        let response = handle.wait().await;
        assert_eq!(response.result, ResultCode::ResponseTimeout);
        assert_eq!(response.token, command.token);

        // A late response is dropped and the session stays usable
        respond(&mut scanner, &command, &[]).await;
        let next = session.send(Opcode::ScanEnable, Bytes::new()).unwrap();
        let command = read_command(&mut scanner).await;
        respond(&mut scanner, &command, &[]).await;
        assert_eq!(next.wait().await.result, ResultCode::Success);
    }

    #[tokio::test]
    async fn test_reserved_opcode_answered_locally() {
        let (session, mut scanner, _dispatcher, _listener, _connector) =
            connected(SessionConfig::default()).await;

        let response = session.execute(Opcode::UpdateFirmware, vec![1, 2, 3]).await.unwrap();
        assert_eq!(response.result, ResultCode::OpcodeNotSupported);

        let handle = session.send(Opcode::PullTrigger, Bytes::new()).unwrap();
        let command = read_command(&mut scanner).await;
        assert_eq!(command.opcode, Opcode::PullTrigger);
        respond(&mut scanner, &command, &[]).await;
        assert!(handle.wait().await.is_success());
    }

    #[tokio::test]
    async fn test_disconnect_cancels_pending() {
        let (mut session, mut scanner, _dispatcher, _listener, _connector) =
            connected(SessionConfig::default()).await;

        let handle = session.send(Opcode::CaptureVideo, Bytes::new()).unwrap();
        read_command(&mut scanner).await;

        session.disconnect().await;
        assert_eq!(session.state(), SessionState::Terminated);
        assert_eq!(handle.wait().await.result, ResultCode::Cancelled);

        session.disconnect().await;
        assert_eq!(session.state(), SessionState::Terminated);
        assert_eq!(
            session.send(Opcode::PullTrigger, Bytes::new()).unwrap_err(),
            SendError::NotActive
        );
    }

    #[tokio::test]
    async fn test_stalled_disconnect_releases_transport() {
        let connector = MemoryConnector::new().with_pipe_size(8);
        let mut listener = connector.listen(identity(1).id);
        let config = SessionConfig::default()
            .with_response_timeout(Duration::from_secs(30))
            .with_disconnect_timeout(Duration::from_millis(100));

        let mut session = DeviceSession::new(identity(1), config, Dispatcher::new(4));
        session.connect(&connector).await.unwrap();
        session.start_streaming();
        let mut scanner = listener.accept().await.unwrap();

        // Scanner never reads, so the write blocks the session task
        let stalled = session.send(Opcode::AttrSet, vec![0u8; 4096]).unwrap();
        tokio::task::yield_now().await;

        session.disconnect().await;
        assert_eq!(session.state(), SessionState::Terminated);
        assert_eq!(stalled.wait().await.result, ResultCode::Cancelled);

        let mut drained = Vec::new();
        let eof = tokio::time::timeout(Duration::from_secs(5), scanner.read_to_end(&mut drained))
            .await
            .expect("link still open after disconnect");
        assert!(eof.is_ok());
    }

    #[tokio::test]
    async fn test_successor_starts_reconnecting() {
        let connector = MemoryConnector::new();
        let mut listener = connector.listen(identity(5).id);
        let (notices_tx, mut notices_rx) = mpsc::unbounded_channel();

        let fresh = DeviceSession::new(identity(5), SessionConfig::default(), Dispatcher::new(4))
            .with_notices(notices_tx, 1);
        assert!(matches!(
            fresh.successor(identity(5), 2),
            Err(scanlink_core::Error::InvalidTransition {
                from: SessionState::Idle,
                to: SessionState::Reconnecting,
            })
        ));

        let mut lost = fresh;
        lost.connect(&connector).await.unwrap();
        lost.start_streaming();
        drop(listener.accept().await.unwrap());
        assert_eq!(notices_rx.recv().await.unwrap().reason, TerminationReason::TransportLost);

        let mut next = lost.successor(identity(5), 2).unwrap();
        assert_eq!(next.state(), SessionState::Reconnecting);
        assert_eq!(next.generation(), 2);

        next.connect(&connector).await.unwrap();
        assert_eq!(next.state(), SessionState::Active);
        let _scanner = listener.accept().await.unwrap();
        next.disconnect().await;
    }

    #[tokio::test]
    async fn test_notifications_published() {
        let (_session, mut scanner, dispatcher, _listener, _connector) =
            connected(SessionConfig::default()).await;

        let notification = Notification::Barcode {
            barcode_type: 3,
            data: Bytes::from_static(b"0123456789"),
        };
        scanner.write_all(&notification.encode().unwrap()).await.unwrap();

        assert_eq!(
            dispatcher.next().await,
            Some(Event::BarcodeData {
                scanner_id: identity(1).id,
                barcode_type: 3,
                data: Bytes::from_static(b"0123456789"),
            })
        );
    }

    #[tokio::test]
    async fn test_consecutive_malformed_frames_force_disconnect() {
        let connector = MemoryConnector::new();
        let mut listener = connector.listen(identity(1).id);
        let dispatcher = Dispatcher::new(16);
        let (notices_tx, mut notices_rx) = mpsc::unbounded_channel();

        let mut session = DeviceSession::new(identity(1), SessionConfig::default(), dispatcher)
            .with_notices(notices_tx, 4);
        session.connect(&connector).await.unwrap();
        session.start_streaming();
        let mut scanner = listener.accept().await.unwrap();

        let pending = session.send(Opcode::AttrGetAll, Bytes::new()).unwrap();
        read_command(&mut scanner).await;

        // Response frame with no result byte, three times
        let malformed = [0x13, 0x88, 0x00, 0x63, 0x00, 0x00];
        // An unknown opcode in between resets the count
        let unknown = [0x7F, 0xFF, 0x00, 0x01, 0x00, 0x00];
        scanner.write_all(&malformed).await.unwrap();
        scanner.write_all(&malformed).await.unwrap();
        scanner.write_all(&unknown).await.unwrap();
        for _ in 0..3 {
            scanner.write_all(&malformed).await.unwrap();
        }

        let notice = notices_rx.recv().await.unwrap();
        assert_eq!(notice.reason, TerminationReason::Desync);
        assert_eq!(notice.generation, 4);
        assert_eq!(session.state(), SessionState::Terminated);
        assert_eq!(pending.wait().await.result, ResultCode::Cancelled);
    }

    #[tokio::test]
    async fn test_transport_loss_terminates_session() {
        let connector = MemoryConnector::new();
        let mut listener = connector.listen(identity(2).id);
        let (notices_tx, mut notices_rx) = mpsc::unbounded_channel();

        let mut session =
            DeviceSession::new(identity(2), SessionConfig::default(), Dispatcher::new(4))
                .with_notices(notices_tx, 1);
        session.connect(&connector).await.unwrap();
        session.start_streaming();

        drop(listener.accept().await.unwrap());

        let notice = notices_rx.recv().await.unwrap();
        assert_eq!(notice.reason, TerminationReason::TransportLost);
        assert!(session.state().is_terminated());
    }

    #[tokio::test]
    async fn test_rejected_connect() {
        let connector = MemoryConnector::new();
        let _listener = connector.listen(identity(3).id);
        connector.reject(identity(3).id, "pairing refused");

        let mut session =
            DeviceSession::new(identity(3), SessionConfig::default(), Dispatcher::new(4));
        assert_eq!(
            session.connect(&connector).await.unwrap_err(),
            ConnectError::Rejected("pairing refused".into())
        );
        assert_eq!(session.state(), SessionState::Terminated);
        assert!(matches!(
            session.connect(&connector).await.unwrap_err(),
            ConnectError::InvalidState(SessionState::Terminated)
        ));
    }
}
