//! Link lifecycle for a single sensor peripheral.
//!
//! [`LinkMachine`] is a pure reducer: it consumes [`LinkEvent`]s from one
//! serialized stream and answers with the [`LinkCommand`]s the radio driver
//! must carry out. It never touches the radio itself, so the whole lifecycle
//! can be driven from tests with synthetic events.
//!
//! Every operation issued for a connection carries the [`SessionId`] it was
//! issued under. Once a session is torn down, results tagged with its id are
//! stale and ignored.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::assembler::ReadingAssembler;
use crate::decode::{ByteOrder, decode_value};
use crate::error::LinkError;
use crate::gatt::{self, SENSOR_SERVICE};
use crate::models::SensorReading;

pub type SessionId = u64;

/// Minimum delay before retrying a scan that failed to start.
pub const SCAN_RETRY_FLOOR: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Scanning,
    Connecting,
    DiscoveringServices,
    DiscoveringCharacteristics,
    Subscribing,
    Active,
}

/// One discovered instance of a service. A peripheral may expose the same
/// service UUID more than once; `index` tells the instances apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceHandle {
    pub uuid: Uuid,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent<P> {
    AdapterState {
        powered: bool,
    },
    Advertisement {
        peripheral: P,
        services: Vec<Uuid>,
    },
    ScanFailed(String),
    Connected {
        session: SessionId,
    },
    ServicesDiscovered {
        session: SessionId,
        services: Vec<ServiceHandle>,
    },
    CharacteristicsDiscovered {
        session: SessionId,
        service: ServiceHandle,
        characteristics: Vec<Uuid>,
    },
    SubscribeFailed {
        session: SessionId,
        service: ServiceHandle,
        characteristic: Uuid,
        reason: String,
    },
    Notification {
        session: SessionId,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    /// A connect, discovery or subscribe step failed or timed out.
    Failed {
        session: SessionId,
        error: LinkError,
    },
    Disconnected {
        peripheral: P,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkCommand<P> {
    StartScan {
        service: Uuid,
        delay: Duration,
    },
    StopScan,
    Connect {
        session: SessionId,
        peripheral: P,
    },
    DiscoverServices {
        session: SessionId,
    },
    DiscoverCharacteristics {
        session: SessionId,
        service: ServiceHandle,
    },
    Subscribe {
        session: SessionId,
        service: ServiceHandle,
        characteristic: Uuid,
    },
    Teardown {
        session: SessionId,
        peripheral: P,
    },
    Publish(SensorReading),
}

#[derive(Debug, Clone)]
pub struct LinkSession<P> {
    pub id: SessionId,
    pub peripheral: P,
    /// Set once the connection is established; disconnects before that are
    /// reported by the connect step itself.
    pub connected: bool,
    pub services: Vec<ServiceHandle>,
    pub subscribed: HashSet<(ServiceHandle, Uuid)>,
}

impl<P> LinkSession<P> {
    fn new(id: SessionId, peripheral: P) -> Self {
        Self {
            id,
            peripheral,
            connected: false,
            services: Vec::new(),
            subscribed: HashSet::new(),
        }
    }
}

/// Bounded exponential delay between rescans. A zero base rescans immediately.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            attempt: 0,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self
            .base
            .saturating_mul(1u32 << self.attempt.min(16))
            .min(self.max);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub service: Uuid,
    pub byte_order: ByteOrder,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            service: SENSOR_SERVICE,
            byte_order: ByteOrder::Native,
            backoff_base: Duration::ZERO,
            backoff_max: Duration::from_secs(30),
        }
    }
}

pub struct LinkMachine<P> {
    config: LinkConfig,
    state: LinkState,
    session: Option<LinkSession<P>>,
    next_session: SessionId,
    /// Peripheral we disconnected ourselves; its disconnect event belongs to
    /// the torn-down session, not to whatever session is live when it lands.
    pending_disconnect: Option<P>,
    backoff: Backoff,
    assembler: ReadingAssembler,
}

impl<P> LinkMachine<P>
where
    P: Clone + PartialEq + fmt::Debug,
{
    pub fn new(config: LinkConfig) -> Self {
        let backoff = Backoff::new(config.backoff_base, config.backoff_max);
        Self {
            config,
            state: LinkState::Idle,
            session: None,
            next_session: 1,
            pending_disconnect: None,
            backoff,
            assembler: ReadingAssembler::new(),
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn session(&self) -> Option<&LinkSession<P>> {
        self.session.as_ref()
    }

    pub fn snapshot(&self) -> SensorReading {
        self.assembler.snapshot()
    }

    pub fn handle(&mut self, event: LinkEvent<P>) -> Vec<LinkCommand<P>> {
        let mut commands = Vec::new();
        match event {
            LinkEvent::AdapterState { powered: true } => {
                if self.state == LinkState::Idle {
                    info!("adapter powered on, scanning for {}", self.config.service);
                    self.transition(LinkState::Scanning);
                    commands.push(self.start_scan(Duration::ZERO));
                }
            }
            LinkEvent::AdapterState { powered: false } => {
                warn!(
                    "{}",
                    LinkError::AdapterUnavailable("adapter is not powered on".into())
                );
                if let Some(session) = self.session.take() {
                    commands.push(LinkCommand::Teardown {
                        session: session.id,
                        peripheral: session.peripheral,
                    });
                } else if self.state == LinkState::Scanning {
                    commands.push(LinkCommand::StopScan);
                }
                self.pending_disconnect = None;
                self.transition(LinkState::Idle);
            }
            LinkEvent::Advertisement {
                peripheral,
                services,
            } => {
                if self.state != LinkState::Scanning || !services.contains(&self.config.service) {
                    return commands;
                }
                let id = self.next_session;
                self.next_session += 1;
                info!(session = id, ?peripheral, "found sensor, connecting");
                self.session = Some(LinkSession::new(id, peripheral.clone()));
                self.transition(LinkState::Connecting);
                commands.push(LinkCommand::StopScan);
                commands.push(LinkCommand::Connect {
                    session: id,
                    peripheral,
                });
            }
            LinkEvent::ScanFailed(reason) => {
                if self.state == LinkState::Scanning {
                    warn!("{}", LinkError::DiscoveryFailure(reason));
                    let delay = self.backoff.next_delay().max(SCAN_RETRY_FLOOR);
                    commands.push(self.start_scan(delay));
                }
            }
            LinkEvent::Connected { session } => {
                if self.is_live(session) && self.state == LinkState::Connecting {
                    if let Some(s) = self.session.as_mut() {
                        s.connected = true;
                    }
                    self.transition(LinkState::DiscoveringServices);
                    commands.push(LinkCommand::DiscoverServices { session });
                }
            }
            LinkEvent::ServicesDiscovered { session, services } => {
                if !self.is_live(session) || self.state != LinkState::DiscoveringServices {
                    return commands;
                }
                let targets: Vec<ServiceHandle> = services
                    .into_iter()
                    .filter(|s| s.uuid == self.config.service)
                    .collect();
                if targets.is_empty() {
                    self.lose_link(
                        LinkError::DiscoveryFailure(format!(
                            "peripheral does not expose service {}",
                            self.config.service
                        )),
                        true,
                        &mut commands,
                    );
                    return commands;
                }
                self.transition(LinkState::DiscoveringCharacteristics);
                for service in &targets {
                    commands.push(LinkCommand::DiscoverCharacteristics {
                        session,
                        service: *service,
                    });
                }
                if let Some(s) = self.session.as_mut() {
                    s.services = targets;
                }
            }
            LinkEvent::CharacteristicsDiscovered {
                session,
                service,
                characteristics,
            } => {
                if !self.is_live(session)
                    || !matches!(
                        self.state,
                        LinkState::DiscoveringCharacteristics | LinkState::Active
                    )
                {
                    return commands;
                }
                let Some(s) = self.session.as_mut() else {
                    return commands;
                };
                if !s.services.contains(&service) {
                    return commands;
                }
                // Subscribe to everything; unknown characteristics are
                // filtered when their notifications arrive.
                for characteristic in characteristics {
                    if s.subscribed.insert((service, characteristic)) {
                        commands.push(LinkCommand::Subscribe {
                            session,
                            service,
                            characteristic,
                        });
                    }
                }
                if self.state != LinkState::Active {
                    self.transition(LinkState::Subscribing);
                    self.transition(LinkState::Active);
                }
            }
            LinkEvent::SubscribeFailed {
                session,
                service,
                characteristic,
                reason,
            } => {
                if let Some(s) = self.session.as_mut().filter(|s| s.id == session) {
                    warn!(%characteristic, service = service.index, "subscribe failed: {reason}");
                    s.subscribed.remove(&(service, characteristic));
                }
            }
            LinkEvent::Notification {
                session,
                characteristic,
                value,
            } => {
                if !self.is_live(session) {
                    debug!(session, %characteristic, "dropping notification from stale session");
                    return commands;
                }
                let Some(field) = gatt::route(characteristic) else {
                    debug!(%characteristic, "dropping notification from unknown characteristic");
                    return commands;
                };
                match decode_value(&value, self.config.byte_order) {
                    Ok(v) => {
                        debug!(%field, value = v, "field update");
                        self.assembler.apply_update(field, v);
                        self.backoff.reset();
                        commands.push(LinkCommand::Publish(self.assembler.snapshot()));
                    }
                    Err(e) => warn!(%field, "{e}"),
                }
            }
            LinkEvent::Failed { session, error } => {
                if self.is_live(session) {
                    self.lose_link(error, true, &mut commands);
                } else {
                    debug!(session, "ignoring failure from stale session: {error}");
                }
            }
            LinkEvent::Disconnected { peripheral } => {
                if self.pending_disconnect.as_ref() == Some(&peripheral) {
                    self.pending_disconnect = None;
                    debug!(?peripheral, "disconnect from torn-down session");
                    return commands;
                }
                let ours = self
                    .session
                    .as_ref()
                    .is_some_and(|s| s.connected && s.peripheral == peripheral);
                if ours {
                    self.lose_link(
                        LinkError::LinkLost(format!("{peripheral:?} disconnected")),
                        false,
                        &mut commands,
                    );
                }
            }
        }
        commands
    }

    fn is_live(&self, session: SessionId) -> bool {
        self.session.as_ref().is_some_and(|s| s.id == session)
    }

    fn start_scan(&self, delay: Duration) -> LinkCommand<P> {
        LinkCommand::StartScan {
            service: self.config.service,
            delay,
        }
    }

    /// Tear the session down and scan again. `expect_disconnect` is false when
    /// the peripheral is already gone, so no disconnect event will follow.
    fn lose_link(
        &mut self,
        error: LinkError,
        expect_disconnect: bool,
        commands: &mut Vec<LinkCommand<P>>,
    ) {
        warn!("{error}");
        if let Some(session) = self.session.take() {
            if expect_disconnect && session.connected {
                self.pending_disconnect = Some(session.peripheral.clone());
            }
            commands.push(LinkCommand::Teardown {
                session: session.id,
                peripheral: session.peripheral,
            });
        }
        self.transition(LinkState::Scanning);
        let delay = self.backoff.next_delay();
        commands.push(self.start_scan(delay));
    }

    fn transition(&mut self, to: LinkState) {
        if self.state != to {
            info!(from = ?self.state, to = ?to, "link state");
            self.state = to;
        }
    }
}
