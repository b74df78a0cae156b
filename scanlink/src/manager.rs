//! Session manager
//!
//! Owns the available and active scanner sets. All mutations happen on the
//! manager task in response to serialized messages: host requests,
//! discovery announcements, connect outcomes and session notices. Nothing
//! outside the task touches the maps.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use scanlink_core::Opcode;
use scanlink_transport::Connector;
use scanlink_types::{AvailableScanner, OperatingMode, ScannerId, ScannerIdentity};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use crate::config::ManagerConfig;
use crate::device::{DeviceSession, ResponseHandle, SessionNotice, TerminationReason};
use crate::discovery::DiscoveryEvent;
use crate::dispatcher::Dispatcher;
use crate::error::{ConnectError, EstablishError, ExecuteError, TerminateError};
use crate::event::{Event, SessionSnapshot};

type Reply<T> = oneshot::Sender<T>;

pub(crate) enum ManagerRequest {
    SetOperatingMode {
        mode: OperatingMode,
        reply: Reply<()>,
    },
    EnableDiscovery {
        enable: bool,
        reply: Reply<()>,
    },
    ListAvailable {
        reply: Reply<Vec<AvailableScanner>>,
    },
    ListActive {
        reply: Reply<Vec<SessionSnapshot>>,
    },
    Establish {
        id: ScannerId,
        reply: Reply<Result<(), EstablishError>>,
    },
    Terminate {
        id: ScannerId,
        reply: Reply<Result<(), TerminateError>>,
    },
    SetAutoReestablish {
        scope: Option<ScannerId>,
        enable: bool,
        reply: Reply<()>,
    },
    Execute {
        id: ScannerId,
        opcode: Opcode,
        payload: Bytes,
        reply: Reply<Result<ResponseHandle, ExecuteError>>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

struct ConnectOutcome {
    id: ScannerId,
    generation: u64,
    result: Result<DeviceSession, ConnectError>,
}

enum ActiveEntry {
    Connecting {
        identity: ScannerIdentity,
        generation: u64,
        waiter: Option<Reply<Result<(), EstablishError>>>,
    },
    Active(DeviceSession),
}

impl ActiveEntry {
    fn identity(&self) -> &ScannerIdentity {
        match self {
            Self::Connecting { identity, .. } => identity,
            Self::Active(session) => session.identity(),
        }
    }
}

pub(crate) struct SessionManager {
    config: ManagerConfig,
    mode: OperatingMode,
    discovery_enabled: bool,
    auto_reestablish: bool,
    auto_overrides: HashMap<ScannerId, bool>,

    available: HashMap<ScannerId, AvailableScanner>,
    active: HashMap<ScannerId, ActiveEntry>,
    /// Last discovery record of scanners that are in the active set
    present: HashMap<ScannerId, AvailableScanner>,
    /// Lost sessions whose scanners reconnect on rediscovery
    awaiting_reestablish: HashMap<ScannerId, DeviceSession>,
    next_generation: u64,

    connector: Arc<dyn Connector>,
    dispatcher: Dispatcher,

    requests: mpsc::Receiver<ManagerRequest>,
    discovery: mpsc::UnboundedReceiver<DiscoveryEvent>,
    notices_tx: mpsc::UnboundedSender<SessionNotice>,
    notices: mpsc::UnboundedReceiver<SessionNotice>,
    outcomes_tx: mpsc::UnboundedSender<ConnectOutcome>,
    outcomes: mpsc::UnboundedReceiver<ConnectOutcome>,
}

impl SessionManager {
    pub(crate) fn new(
        config: ManagerConfig,
        connector: Arc<dyn Connector>,
        dispatcher: Dispatcher,
        requests: mpsc::Receiver<ManagerRequest>,
        discovery: mpsc::UnboundedReceiver<DiscoveryEvent>,
    ) -> Self {
        let (notices_tx, notices) = mpsc::unbounded_channel();
        let (outcomes_tx, outcomes) = mpsc::unbounded_channel();

        Self {
            mode: config.operating_mode,
            discovery_enabled: config.discovery_enabled,
            auto_reestablish: config.auto_reestablish,
            config,
            auto_overrides: HashMap::new(),
            available: HashMap::new(),
            active: HashMap::new(),
            present: HashMap::new(),
            awaiting_reestablish: HashMap::new(),
            next_generation: 0,
            connector,
            dispatcher,
            requests,
            discovery,
            notices_tx,
            notices,
            outcomes_tx,
            outcomes,
        }
    }

    pub(crate) async fn run(mut self) {
        info!(
            "Session manager started (mode={:?}, discovery={})",
            self.mode, self.discovery_enabled
        );

        loop {
            tokio::select! {
                biased;

                Some(outcome) = self.outcomes.recv() => self.on_connect_outcome(outcome),

                Some(notice) = self.notices.recv() => self.on_session_ended(notice),

                Some(event) = self.discovery.recv() => self.on_discovery(event),

                request = self.requests.recv() => match request {
                    Some(request) => {
                        if self.handle(request).await {
                            break;
                        }
                    }
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
            }
        }

        self.dispatcher.close();
        info!("Session manager stopped");
    }

    /// Apply one host request, returning `true` once the manager should stop
    async fn handle(&mut self, request: ManagerRequest) -> bool {
        match request {
            ManagerRequest::SetOperatingMode { mode, reply } => {
                self.set_operating_mode(mode);
                let _ = reply.send(());
            }
            ManagerRequest::EnableDiscovery { enable, reply } => {
                info!("Discovery {}", if enable { "enabled" } else { "disabled" });
                self.discovery_enabled = enable;
                let _ = reply.send(());
            }
            ManagerRequest::ListAvailable { reply } => {
                let mut scanners: Vec<_> = self.available.values().cloned().collect();
                scanners.sort_by_key(|scanner| scanner.id());
                let _ = reply.send(scanners);
            }
            ManagerRequest::ListActive { reply } => {
                let mut sessions: Vec<_> = self
                    .active
                    .values()
                    .filter_map(|entry| match entry {
                        ActiveEntry::Active(session) => Some(session.snapshot()),
                        ActiveEntry::Connecting { .. } => None,
                    })
                    .collect();
                sessions.sort_by_key(|snapshot| snapshot.id());
                let _ = reply.send(sessions);
            }
            ManagerRequest::Establish { id, reply } => self.establish(id, reply),
            ManagerRequest::Terminate { id, reply } => {
                let result = self.terminate(id).await;
                let _ = reply.send(result);
            }
            ManagerRequest::SetAutoReestablish {
                scope,
                enable,
                reply,
            } => {
                self.set_auto_reestablish(scope, enable);
                let _ = reply.send(());
            }
            ManagerRequest::Execute {
                id,
                opcode,
                payload,
                reply,
            } => {
                let result = match self.active.get(&id) {
                    Some(ActiveEntry::Active(session)) => {
                        session.send(opcode, payload).map_err(ExecuteError::from)
                    }
                    _ => Err(ExecuteError::ScannerNotActive(id)),
                };
                let _ = reply.send(result);
            }
            ManagerRequest::Shutdown { reply } => {
                self.shutdown().await;
                let _ = reply.send(());
                return true;
            }
        }
        false
    }

    fn set_operating_mode(&mut self, mode: OperatingMode) {
        info!("Operating mode {:?} -> {:?}", self.mode, mode);
        self.mode = mode;

        let mut pruned: Vec<ScannerId> = self
            .available
            .values()
            .filter(|scanner| !mode.admits(scanner.identity.connection_type))
            .map(|scanner| scanner.id())
            .collect();
        pruned.sort();

        for id in pruned {
            self.available.remove(&id);
            debug!("{} no longer admitted", id);
            self.dispatcher.publish(Event::ScannerDisappeared(id));
        }
    }

    fn set_auto_reestablish(&mut self, scope: Option<ScannerId>, enable: bool) {
        match scope {
            Some(id) => {
                debug!("Auto-reestablish for {}: {}", id, enable);
                self.auto_overrides.insert(id, enable);
            }
            None => {
                info!("Auto-reestablish: {}", enable);
                self.auto_reestablish = enable;
            }
        }

        let disabled: Vec<ScannerId> = self
            .awaiting_reestablish
            .keys()
            .copied()
            .filter(|id| !self.reestablishes(*id))
            .collect();
        for id in disabled {
            self.awaiting_reestablish.remove(&id);
        }
    }

    fn reestablishes(&self, id: ScannerId) -> bool {
        self.auto_overrides
            .get(&id)
            .copied()
            .unwrap_or(self.auto_reestablish)
    }

    fn establish(&mut self, id: ScannerId, reply: Reply<Result<(), EstablishError>>) {
        if self.active.contains_key(&id) {
            debug!("{} already has a session", id);
            let _ = reply.send(Err(EstablishError::ScannerNotAvailable(id)));
            return;
        }

        match self.available.remove(&id) {
            Some(scanner) => {
                self.awaiting_reestablish.remove(&id);
                self.begin_establish(scanner, Some(reply), None);
            }
            None => {
                let _ = reply.send(Err(EstablishError::ScannerNotAvailable(id)));
            }
        }
    }

    fn begin_establish(
        &mut self,
        scanner: AvailableScanner,
        waiter: Option<Reply<Result<(), EstablishError>>>,
        lost: Option<DeviceSession>,
    ) {
        let id = scanner.id();
        let identity = scanner.identity;

        self.next_generation += 1;
        let generation = self.next_generation;

        let mut session = match lost.map(|lost| lost.successor(identity, generation)) {
            Some(Ok(session)) => session,
            other => {
                if let Some(Err(e)) = other {
                    warn!("Cannot reestablish {}: {}", id, e);
                }
                DeviceSession::new(identity, self.config.session.clone(), self.dispatcher.clone())
                    .with_notices(self.notices_tx.clone(), generation)
            }
        };

        self.present.insert(id, scanner);
        self.active.insert(
            id,
            ActiveEntry::Connecting {
                identity,
                generation,
                waiter,
            },
        );

        let connector = Arc::clone(&self.connector);
        let outcomes = self.outcomes_tx.clone();
        tokio::spawn(async move {
            let result = match session.connect(connector.as_ref()).await {
                Ok(()) => Ok(session),
                Err(e) => Err(e),
            };
            let _ = outcomes.send(ConnectOutcome {
                id,
                generation,
                result,
            });
        });
    }

    fn on_connect_outcome(&mut self, outcome: ConnectOutcome) {
        let ConnectOutcome {
            id,
            generation,
            result,
        } = outcome;

        let current = matches!(
            self.active.get(&id),
            Some(ActiveEntry::Connecting { generation: g, .. }) if *g == generation
        );
        if !current {
            trace!("Discarding stale connect outcome for {}", id);
            if let Ok(mut session) = result {
                tokio::spawn(async move { session.disconnect().await });
            }
            return;
        }

        let waiter = match self.active.remove(&id) {
            Some(ActiveEntry::Connecting { waiter, .. }) => waiter,
            _ => None,
        };

        match result {
            Ok(mut session) => {
                info!("Session established with {}", session.identity());
                self.dispatcher
                    .publish(Event::SessionEstablished(session.snapshot()));
                session.start_streaming();
                self.active.insert(id, ActiveEntry::Active(session));
                if let Some(waiter) = waiter {
                    let _ = waiter.send(Ok(()));
                }
            }
            Err(e) => {
                warn!("Establishing session with {} failed: {}", id, e);
                match self.present.remove(&id) {
                    Some(scanner) if self.mode.admits(scanner.identity.connection_type) => {
                        self.available.insert(id, scanner);
                    }
                    _ => {
                        self.dispatcher.publish(Event::ScannerDisappeared(id));
                    }
                }
                if let Some(waiter) = waiter {
                    let _ = waiter.send(Err(e.into()));
                }
            }
        }
    }

    fn on_session_ended(&mut self, notice: SessionNotice) {
        let current = matches!(
            self.active.get(&notice.id),
            Some(ActiveEntry::Active(session)) if session.generation() == notice.generation
        );
        if !current {
            trace!("Ignoring notice for retired session {}", notice.id);
            return;
        }

        let Some(ActiveEntry::Active(lost)) = self.active.remove(&notice.id) else {
            return;
        };
        self.present.remove(&notice.id);
        warn!("Session with {} lost ({:?})", notice.id, notice.reason);
        self.dispatcher.publish(Event::SessionTerminated(notice.id));

        if notice.reason != TerminationReason::Requested && self.reestablishes(notice.id) {
            debug!("{} will be reestablished when rediscovered", notice.id);
            self.awaiting_reestablish.insert(notice.id, lost);
        }
    }

    fn on_discovery(&mut self, event: DiscoveryEvent) {
        match event {
            DiscoveryEvent::Appeared(scanner) => self.on_appeared(scanner),
            DiscoveryEvent::Disappeared(id) => self.on_disappeared(id),
        }
    }

    fn on_appeared(&mut self, scanner: AvailableScanner) {
        let id = scanner.id();

        if let Some(entry) = self.active.get(&id) {
            if entry.identity().connection_type == scanner.identity.connection_type {
                self.present.insert(id, scanner);
            } else {
                debug!(
                    "Ignoring {} over {} while a session over {} exists",
                    id,
                    scanner.identity.connection_type,
                    entry.identity().connection_type
                );
            }
            return;
        }

        if !self.discovery_enabled {
            trace!("Discovery disabled, ignoring {}", scanner);
            return;
        }
        if !self.mode.admits(scanner.identity.connection_type) {
            trace!("{} not admitted in {:?}", scanner, self.mode);
            return;
        }

        if let Some(lost) = self.awaiting_reestablish.remove(&id) {
            info!("{} rediscovered, reestablishing session", id);
            self.dispatcher.publish(Event::ScannerAppeared(scanner.clone()));
            self.begin_establish(scanner, None, Some(lost));
            return;
        }

        if self.available.insert(id, scanner.clone()).is_none() {
            debug!("Scanner appeared: {}", scanner);
            self.dispatcher.publish(Event::ScannerAppeared(scanner));
        }
    }

    fn on_disappeared(&mut self, id: ScannerId) {
        if self.active.contains_key(&id) {
            // Session stays up until the transport reports loss
            self.present.remove(&id);
            debug!("{} out of discovery range, session kept", id);
            return;
        }

        if self.available.remove(&id).is_some() {
            debug!("Scanner disappeared: {}", id);
            self.dispatcher.publish(Event::ScannerDisappeared(id));
        }
    }

    async fn terminate(&mut self, id: ScannerId) -> Result<(), TerminateError> {
        let mut session = match self.active.remove(&id) {
            Some(ActiveEntry::Active(session)) => session,
            Some(connecting) => {
                self.active.insert(id, connecting);
                return Err(TerminateError::ScannerNotActive(id));
            }
            None => return Err(TerminateError::ScannerNotActive(id)),
        };

        info!("Terminating session with {}", id);
        session.disconnect().await;
        self.awaiting_reestablish.remove(&id);
        self.dispatcher.publish(Event::SessionTerminated(id));

        if let Some(scanner) = self.present.remove(&id) {
            if self.mode.admits(scanner.identity.connection_type) {
                self.available.insert(id, scanner.clone());
                self.dispatcher.publish(Event::ScannerAppeared(scanner));
            }
        }

        Ok(())
    }

    async fn shutdown(&mut self) {
        info!("Shutting down {} session(s)", self.active.len());

        let mut ids: Vec<ScannerId> = self.active.keys().copied().collect();
        ids.sort();

        for id in ids {
            match self.active.remove(&id) {
                Some(ActiveEntry::Active(mut session)) => {
                    session.disconnect().await;
                    self.dispatcher.publish(Event::SessionTerminated(id));
                }
                Some(ActiveEntry::Connecting { waiter, .. }) => {
                    if let Some(waiter) = waiter {
                        let _ = waiter.send(Err(EstablishError::ScannerNotAvailable(id)));
                    }
                }
                None => {}
            }
        }

        self.present.clear();
        self.awaiting_reestablish.clear();
    }
}
