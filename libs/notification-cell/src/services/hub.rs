//! The notification hub: one task owns the connection registry.
//!
//! Callers hold a cloneable [`NotificationHub`] handle and talk to the
//! [`HubActor`] over a bounded mailbox. Register, unregister and publish are
//! all applied by the actor, in mailbox order, so the registry never needs a
//! lock. Fan-out uses `try_send` on each connection's private buffer; the
//! actor never waits on a client.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_config::HubSettings;
use shared_models::auth::UserRole;

use crate::error::HubError;
use crate::models::{Audience, HubSnapshot, Notification};

/// Serialized frame queued for one connection.
pub type EncodedFrame = Arc<str>;

/// What a successful [`NotificationHub::register`] hands back to the
/// connection: its id within the hub and the receiving end of its buffer.
#[derive(Debug)]
pub struct Registration {
    pub connection_id: Uuid,
    pub outbound: mpsc::Receiver<EncodedFrame>,
}

enum HubCommand {
    Register {
        identity: Uuid,
        role: UserRole,
        connection_id: Uuid,
        outbound: mpsc::Sender<EncodedFrame>,
        respond_to: oneshot::Sender<()>,
    },
    Unregister {
        identity: Uuid,
        connection_id: Option<Uuid>,
    },
    Publish {
        audience: Audience,
        frame: EncodedFrame,
    },
    /// Several deliveries for the price of one mailbox slot.
    PublishMany {
        frames: Vec<(Audience, EncodedFrame)>,
    },
    Snapshot {
        respond_to: oneshot::Sender<HubSnapshot>,
    },
    IsConnected {
        identity: Uuid,
        respond_to: oneshot::Sender<bool>,
    },
}

/// Handle to the hub actor. Cheap to clone.
#[derive(Clone)]
pub struct NotificationHub {
    sender: mpsc::Sender<HubCommand>,
    settings: HubSettings,
}

impl NotificationHub {
    /// Spawns the actor and returns its handle. The actor stops once every
    /// handle has been dropped.
    pub fn spawn(settings: HubSettings) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(settings.mailbox_capacity.max(1));

        let actor = HubActor {
            receiver,
            connections: HashMap::new(),
            roles: HashMap::new(),
        };
        let task = tokio::spawn(actor.run());

        (Self { sender, settings }, task)
    }

    pub fn settings(&self) -> &HubSettings {
        &self.settings
    }

    /// Registers `identity`, superseding any live connection it already has.
    /// Returns once the actor has applied the registration.
    pub async fn register(&self, identity: Uuid, role: UserRole) -> Result<Registration, HubError> {
        let (outbound_tx, outbound_rx) =
            mpsc::channel(self.settings.connection_buffer_capacity.max(1));
        let connection_id = Uuid::new_v4();
        let (respond_to, ack) = oneshot::channel();

        self.sender
            .send(HubCommand::Register {
                identity,
                role,
                connection_id,
                outbound: outbound_tx,
                respond_to,
            })
            .await
            .map_err(|_| HubError::HubUnavailable)?;

        ack.await.map_err(|_| HubError::HubUnavailable)?;

        Ok(Registration {
            connection_id,
            outbound: outbound_rx,
        })
    }

    /// Removes whatever connection `identity` currently has.
    pub async fn unregister(&self, identity: Uuid) -> Result<(), HubError> {
        self.sender
            .send(HubCommand::Unregister {
                identity,
                connection_id: None,
            })
            .await
            .map_err(|_| HubError::HubUnavailable)
    }

    /// Removes `identity` only if `connection_id` is still its live
    /// connection; a superseded connection's teardown must not evict its
    /// replacement.
    pub async fn unregister_connection(&self, identity: Uuid, connection_id: Uuid) {
        let command = HubCommand::Unregister {
            identity,
            connection_id: Some(connection_id),
        };
        if self.sender.send(command).await.is_err() {
            debug!("Hub already stopped while releasing connection {}", connection_id);
        }
    }

    /// Fire-and-forget fan-out. Failures are logged here and never reach
    /// the caller.
    pub fn publish(&self, audience: Audience, notification: &Notification) {
        let Some(frame) = encode(notification) else {
            return;
        };
        self.submit(HubCommand::Publish { audience, frame }, &notification.event_type);
    }

    /// Publishes a batch as a single mailbox command, so a long fan-out
    /// cannot crowd out the events queued behind it.
    pub fn publish_many<I>(&self, batch: I)
    where
        I: IntoIterator<Item = (Audience, Notification)>,
    {
        let frames: Vec<(Audience, EncodedFrame)> = batch
            .into_iter()
            .filter_map(|(audience, notification)| {
                encode(&notification).map(|frame| (audience, frame))
            })
            .collect();
        if frames.is_empty() {
            return;
        }

        let what = format!("batch of {}", frames.len());
        self.submit(HubCommand::PublishMany { frames }, &what);
    }

    fn submit(&self, command: HubCommand, what: &str) {
        match self.sender.try_send(command) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    "{}: hub mailbox full, {} notification dropped",
                    HubError::MailboxFull,
                    what
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("{}: {} notification dropped", HubError::HubUnavailable, what);
            }
        }
    }

    pub fn send_to_user(&self, identity: Uuid, notification: &Notification) {
        self.publish(Audience::Identity(identity), notification);
    }

    pub fn broadcast_to_role(&self, role: UserRole, notification: &Notification) {
        self.publish(Audience::Role(role), notification);
    }

    pub fn broadcast(&self, notification: &Notification) {
        self.publish(Audience::All, notification);
    }

    pub async fn snapshot(&self) -> Result<HubSnapshot, HubError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(HubCommand::Snapshot { respond_to })
            .await
            .map_err(|_| HubError::HubUnavailable)?;
        response.await.map_err(|_| HubError::HubUnavailable)
    }

    pub async fn is_connected(&self, identity: Uuid) -> bool {
        let (respond_to, response) = oneshot::channel();
        if self
            .sender
            .send(HubCommand::IsConnected { identity, respond_to })
            .await
            .is_err()
        {
            return false;
        }
        response.await.unwrap_or(false)
    }
}

fn encode(notification: &Notification) -> Option<EncodedFrame> {
    match notification.to_frame() {
        Ok(frame) => Some(frame),
        Err(e) => {
            warn!("Dropping {} notification: {}", notification.event_type, e);
            None
        }
    }
}

struct ConnectionEntry {
    connection_id: Uuid,
    role: UserRole,
    outbound: mpsc::Sender<EncodedFrame>,
    connected_at: DateTime<Utc>,
}

/// Owns `identity -> connection` and `role -> identities`. Only this task
/// ever touches either map.
pub struct HubActor {
    receiver: mpsc::Receiver<HubCommand>,
    connections: HashMap<Uuid, ConnectionEntry>,
    roles: HashMap<UserRole, HashSet<Uuid>>,
}

impl HubActor {
    #[instrument(skip_all, name = "notification_hub")]
    async fn run(mut self) {
        info!("Notification hub started");

        while let Some(command) = self.receiver.recv().await {
            match command {
                HubCommand::Register {
                    identity,
                    role,
                    connection_id,
                    outbound,
                    respond_to,
                } => {
                    self.register(identity, role, connection_id, outbound);
                    let _ = respond_to.send(());
                }
                HubCommand::Unregister {
                    identity,
                    connection_id,
                } => self.unregister(identity, connection_id),
                HubCommand::Publish { audience, frame } => self.publish(&audience, frame),
                HubCommand::PublishMany { frames } => {
                    for (audience, frame) in frames {
                        self.publish(&audience, frame);
                    }
                }
                HubCommand::Snapshot { respond_to } => {
                    let _ = respond_to.send(self.snapshot());
                }
                HubCommand::IsConnected {
                    identity,
                    respond_to,
                } => {
                    let _ = respond_to.send(self.connections.contains_key(&identity));
                }
            }
        }

        info!(
            "Notification hub stopped with {} connections open",
            self.connections.len()
        );
    }

    fn register(
        &mut self,
        identity: Uuid,
        role: UserRole,
        connection_id: Uuid,
        outbound: mpsc::Sender<EncodedFrame>,
    ) {
        if let Some(previous) = self.remove(identity) {
            info!(
                "Connection {} for {} superseded by {} (was open since {})",
                previous.connection_id, identity, connection_id, previous.connected_at
            );
        }

        self.roles.entry(role).or_default().insert(identity);
        self.connections.insert(
            identity,
            ConnectionEntry {
                connection_id,
                role,
                outbound,
                connected_at: Utc::now(),
            },
        );

        info!("Client connected: {} ({})", identity, role);
    }

    fn unregister(&mut self, identity: Uuid, connection_id: Option<Uuid>) {
        let is_current = match (self.connections.get(&identity), connection_id) {
            (Some(entry), Some(expected)) => entry.connection_id == expected,
            (Some(_), None) => true,
            (None, _) => false,
        };

        if !is_current {
            debug!("Ignoring stale unregister for {}", identity);
            return;
        }

        if self.remove(identity).is_some() {
            info!("Client disconnected: {}", identity);
        }
    }

    fn publish(&mut self, audience: &Audience, frame: EncodedFrame) {
        let targets: Vec<Uuid> = match audience {
            Audience::All => self.connections.keys().copied().collect(),
            Audience::Role(role) => self
                .roles
                .get(role)
                .map(|ids| ids.iter().copied().collect())
                .unwrap_or_default(),
            Audience::Identity(identity) => {
                if self.connections.contains_key(identity) {
                    vec![*identity]
                } else {
                    debug!("No live connection for {}, notification skipped", identity);
                    Vec::new()
                }
            }
        };

        let mut evicted = Vec::new();
        for identity in targets {
            let Some(entry) = self.connections.get(&identity) else {
                continue;
            };

            match entry.outbound.try_send(frame.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    let err = HubError::DeliveryFailed {
                        identity,
                        reason: "outbound buffer full".to_string(),
                    };
                    warn!("{}; disconnecting slow client", err);
                    evicted.push(identity);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!("Writer for {} already gone", identity);
                    evicted.push(identity);
                }
            }
        }

        for identity in evicted {
            self.remove(identity);
        }
    }

    /// Drops the entry and its sender, which closes the buffer and lets the
    /// writer task finish.
    fn remove(&mut self, identity: Uuid) -> Option<ConnectionEntry> {
        let entry = self.connections.remove(&identity)?;
        if let Some(members) = self.roles.get_mut(&entry.role) {
            members.remove(&identity);
            if members.is_empty() {
                self.roles.remove(&entry.role);
            }
        }
        Some(entry)
    }

    fn snapshot(&self) -> HubSnapshot {
        HubSnapshot {
            connections: self.connections.len(),
            by_role: self
                .roles
                .iter()
                .map(|(role, members)| (*role, members.len()))
                .collect(),
        }
    }
}
