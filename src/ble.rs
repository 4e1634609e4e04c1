//! btleplug binding for the link state machine.
//!
//! Adapter and peripheral callbacks are turned into [`LinkEvent`]s on a
//! single channel; the run loop feeds them to the [`LinkMachine`] one at a
//! time and carries out the commands it returns. Radio operations run on
//! spawned tasks and report back through the same channel, tagged with the
//! session they were started for.

use anyhow::Result;
use btleplug::api::{
    Central, CentralEvent, CentralState, Manager as _, Peripheral as _, ScanFilter,
    ValueNotification,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::{Stream, StreamExt};
use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::LinkError;
use crate::link::{LinkCommand, LinkEvent, LinkMachine, ServiceHandle, SessionId};
use crate::models::SensorReading;

type Event = LinkEvent<PeripheralId>;
type Command = LinkCommand<PeripheralId>;

struct Connection {
    session: SessionId,
    peripheral: Peripheral,
    // dropping this stops the notification pump
    _stop: oneshot::Sender<()>,
}

pub struct SensorLink {
    adapter: Adapter,
    step_timeout: Option<Duration>,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    connection: Option<Connection>,
    scan_task: Option<JoinHandle<()>>,
}

impl SensorLink {
    pub async fn open(adapter_index: usize, step_timeout: Option<Duration>) -> Result<Self> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;
        let adapter = adapters.into_iter().nth(adapter_index).ok_or_else(|| {
            LinkError::AdapterUnavailable(format!("no Bluetooth adapter at index {adapter_index}"))
        })?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Self {
            adapter,
            step_timeout,
            events_tx,
            events_rx,
            connection: None,
            scan_task: None,
        })
    }

    /// Drive `machine` until `shutdown` resolves, publishing every snapshot
    /// it produces into `readings`.
    pub async fn run<F>(
        mut self,
        mut machine: LinkMachine<PeripheralId>,
        readings: watch::Sender<SensorReading>,
        shutdown: F,
    ) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.spawn_central_events().await?;

        let powered = match self.adapter.adapter_state().await {
            Ok(state) => matches!(state, CentralState::PoweredOn),
            Err(e) => {
                warn!("{}", LinkError::AdapterUnavailable(e.to_string()));
                false
            }
        };
        self.send(LinkEvent::AdapterState { powered });

        tokio::pin!(shutdown);
        loop {
            let event = tokio::select! {
                _ = &mut shutdown => break,
                event = self.events_rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            for command in machine.handle(event) {
                self.execute(command, &readings).await;
            }
        }

        self.close().await;
        Ok(())
    }

    fn send(&self, event: Event) {
        // the receiver lives in self, so this only fails during teardown
        let _ = self.events_tx.send(event);
    }

    async fn spawn_central_events(&self) -> Result<()> {
        let mut events = self.adapter.events().await?;
        let adapter = self.adapter.clone();
        let tx = self.events_tx.clone();

        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let mapped = match event {
                    CentralEvent::StateUpdate(state) => Some(LinkEvent::AdapterState {
                        powered: matches!(state, CentralState::PoweredOn),
                    }),
                    CentralEvent::ServicesAdvertisement { id, services } => {
                        Some(LinkEvent::Advertisement {
                            peripheral: id,
                            services,
                        })
                    }
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                        advertised_services(&adapter, &id)
                            .await
                            .map(|services| LinkEvent::Advertisement {
                                peripheral: id,
                                services,
                            })
                    }
                    CentralEvent::DeviceDisconnected(id) => {
                        Some(LinkEvent::Disconnected { peripheral: id })
                    }
                    _ => None,
                };
                if let Some(event) = mapped
                    && tx.send(event).is_err()
                {
                    break;
                }
            }
        });
        Ok(())
    }

    async fn execute(&mut self, command: Command, readings: &watch::Sender<SensorReading>) {
        match command {
            LinkCommand::StartScan { service, delay } => self.start_scan(service, delay),
            LinkCommand::StopScan => {
                if let Some(task) = self.scan_task.take() {
                    task.abort();
                }
                if let Err(e) = self.adapter.stop_scan().await {
                    warn!("stopping scan: {e}");
                }
            }
            LinkCommand::Connect {
                session,
                peripheral,
            } => self.connect(session, peripheral).await,
            LinkCommand::DiscoverServices { session } => self.discover_services(session),
            LinkCommand::DiscoverCharacteristics { session, service } => {
                self.discover_characteristics(session, service)
            }
            LinkCommand::Subscribe {
                session,
                service,
                characteristic,
            } => self.subscribe(session, service, characteristic),
            LinkCommand::Teardown { session, .. } => self.teardown(session),
            LinkCommand::Publish(reading) => {
                readings.send_replace(reading);
            }
        }
    }

    fn start_scan(&mut self, service: Uuid, delay: Duration) {
        if let Some(task) = self.scan_task.take() {
            task.abort();
        }
        let adapter = self.adapter.clone();
        let tx = self.events_tx.clone();
        self.scan_task = Some(tokio::spawn(async move {
            if !delay.is_zero() {
                info!("rescanning in {delay:?}");
                sleep(delay).await;
            }
            let filter = ScanFilter {
                services: vec![service],
            };
            if let Err(e) = adapter.start_scan(filter).await {
                let _ = tx.send(LinkEvent::ScanFailed(e.to_string()));
            }
        }));
    }

    async fn connect(&mut self, session: SessionId, id: PeripheralId) {
        let peripheral = match self.adapter.peripheral(&id).await {
            Ok(p) => p,
            Err(e) => {
                self.send(LinkEvent::Failed {
                    session,
                    error: LinkError::LinkLost(format!("peripheral lookup failed: {e}")),
                });
                return;
            }
        };
        let (stop_tx, stop_rx) = oneshot::channel();
        self.connection = Some(Connection {
            session,
            peripheral: peripheral.clone(),
            _stop: stop_tx,
        });

        let limit = self.step_timeout;
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            if let Err(reason) = step(limit, "connect", peripheral.connect()).await {
                let _ = tx.send(LinkEvent::Failed {
                    session,
                    error: LinkError::LinkLost(reason),
                });
                return;
            }
            match peripheral.notifications().await {
                Ok(stream) => {
                    tokio::spawn(pump_notifications(session, stream, stop_rx, tx.clone()));
                    let _ = tx.send(LinkEvent::Connected { session });
                }
                Err(e) => {
                    let _ = tx.send(LinkEvent::Failed {
                        session,
                        error: LinkError::LinkLost(format!("notification stream: {e}")),
                    });
                }
            }
        });
    }

    fn live_peripheral(&self, session: SessionId) -> Option<Peripheral> {
        self.connection
            .as_ref()
            .filter(|c| c.session == session)
            .map(|c| c.peripheral.clone())
    }

    fn discover_services(&self, session: SessionId) {
        let Some(peripheral) = self.live_peripheral(session) else {
            return;
        };
        let limit = self.step_timeout;
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let event = match step(limit, "service discovery", peripheral.discover_services()).await
            {
                Ok(()) => {
                    let services = peripheral
                        .services()
                        .iter()
                        .enumerate()
                        .map(|(index, s)| ServiceHandle {
                            uuid: s.uuid,
                            index,
                        })
                        .collect();
                    LinkEvent::ServicesDiscovered { session, services }
                }
                Err(reason) => LinkEvent::Failed {
                    session,
                    error: LinkError::DiscoveryFailure(reason),
                },
            };
            let _ = tx.send(event);
        });
    }

    /// btleplug discovers characteristics together with services, so this
    /// only reads them back from the cached service table.
    fn discover_characteristics(&self, session: SessionId, service: ServiceHandle) {
        let Some(peripheral) = self.live_peripheral(session) else {
            return;
        };
        let event = match peripheral.services().iter().nth(service.index) {
            Some(s) if s.uuid == service.uuid => LinkEvent::CharacteristicsDiscovered {
                session,
                service,
                characteristics: s.characteristics.iter().map(|c| c.uuid).collect(),
            },
            _ => LinkEvent::Failed {
                session,
                error: LinkError::DiscoveryFailure(format!(
                    "service {} #{} vanished",
                    service.uuid, service.index
                )),
            },
        };
        self.send(event);
    }

    fn subscribe(&self, session: SessionId, service: ServiceHandle, characteristic: Uuid) {
        let Some(peripheral) = self.live_peripheral(session) else {
            return;
        };
        let found = peripheral
            .services()
            .iter()
            .nth(service.index)
            .and_then(|s| s.characteristics.iter().find(|c| c.uuid == characteristic))
            .cloned();
        let Some(found) = found else {
            self.send(LinkEvent::SubscribeFailed {
                session,
                service,
                characteristic,
                reason: "characteristic not found".into(),
            });
            return;
        };

        let limit = self.step_timeout;
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            match step(limit, "subscribe", peripheral.subscribe(&found)).await {
                Ok(()) => debug!(%characteristic, "subscribed"),
                Err(reason) => {
                    let _ = tx.send(LinkEvent::SubscribeFailed {
                        session,
                        service,
                        characteristic,
                        reason,
                    });
                }
            }
        });
    }

    fn teardown(&mut self, session: SessionId) {
        let Some(connection) = self.connection.take_if(|c| c.session == session) else {
            return;
        };
        debug!(session, "tearing down session");
        tokio::spawn(async move {
            if let Err(e) = connection.peripheral.disconnect().await {
                debug!("disconnect after link loss: {e}");
            }
        });
    }

    async fn close(&mut self) {
        if let Some(task) = self.scan_task.take() {
            task.abort();
        }
        if let Err(e) = self.adapter.stop_scan().await {
            debug!("stopping scan on shutdown: {e}");
        }
        if let Some(connection) = self.connection.take()
            && let Err(e) = connection.peripheral.disconnect().await
        {
            warn!("disconnecting on shutdown: {e}");
        }
    }
}

async fn advertised_services(adapter: &Adapter, id: &PeripheralId) -> Option<Vec<Uuid>> {
    let peripheral = adapter.peripheral(id).await.ok()?;
    let props = peripheral.properties().await.ok()??;
    Some(props.services)
}

async fn step<T>(
    limit: Option<Duration>,
    what: &str,
    fut: impl Future<Output = btleplug::Result<T>>,
) -> Result<T, String> {
    let result = match limit {
        Some(limit) => timeout(limit, fut)
            .await
            .map_err(|_| format!("{what} timed out after {limit:?}"))?,
        None => fut.await,
    };
    result.map_err(|e| format!("{what} failed: {e}"))
}

async fn pump_notifications<S>(
    session: SessionId,
    mut stream: S,
    mut stop: oneshot::Receiver<()>,
    tx: mpsc::UnboundedSender<Event>,
) where
    S: Stream<Item = ValueNotification> + Unpin,
{
    loop {
        tokio::select! {
            _ = &mut stop => break,
            notification = stream.next() => {
                let Some(notification) = notification else {
                    // the stream ends with the connection; report it against
                    // this session in case the adapter's disconnect event was
                    // taken for an earlier teardown
                    let _ = tx.send(LinkEvent::Failed {
                        session,
                        error: LinkError::LinkLost("notification stream ended".into()),
                    });
                    break;
                };
                let event = LinkEvent::Notification {
                    session,
                    characteristic: notification.uuid,
                    value: notification.value,
                };
                if tx.send(event).is_err() {
                    break;
                }
            }
        }
    }
    debug!(session, "notification pump stopped");
}
