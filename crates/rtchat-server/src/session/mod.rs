//! Per-connection session runtime.
//!
//! A [`ConnectionSession`] owns one [`SessionMachine`] and performs the
//! effects it asks for against the hub. Every method takes `&mut self`, so
//! one session handles its own inputs strictly one at a time; concurrency
//! comes from running many sessions side by side.

pub mod machine;

use std::sync::Arc;

use metrics::{counter, gauge};
use rtchat_core::{ChatError, ChatEvent, ConnectionId, GroupId, UserId};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::connection::Connection;
use crate::hub::ChatHub;
use crate::metrics::{CONNECTIONS_ACTIVE, CONNECTIONS_TOTAL, MALFORMED_INPUT_TOTAL};
pub use machine::{Effect, Input, SessionMachine, SessionState};

pub struct ConnectionSession {
    hub: Arc<ChatHub>,
    machine: SessionMachine,
    /// Rendered payloads for this session's client.
    outbound: mpsc::Sender<String>,
    connection: Option<Arc<Connection>>,
    /// Presence was recorded for this connection and must be released.
    online: bool,
    /// Counted in the active-connections gauge.
    counted: bool,
}

impl ConnectionSession {
    pub fn new(
        hub: Arc<ChatHub>,
        user_id: UserId,
        group_id: GroupId,
        outbound: mpsc::Sender<String>,
    ) -> Self {
        Self {
            hub,
            machine: SessionMachine::new(user_id, group_id),
            outbound,
            connection: None,
            online: false,
            counted: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.machine.state()
    }

    pub fn user_id(&self) -> &UserId {
        self.machine.user_id()
    }

    pub fn group_id(&self) -> &GroupId {
        self.machine.group_id()
    }

    pub fn connection_id(&self) -> Option<&ConnectionId> {
        self.connection.as_ref().map(|c| &c.id)
    }

    /// Admit, subscribe and mark online. Returns the inbox the bus
    /// delivers this connection's events into.
    ///
    /// Rejection (`NotFound`, `Forbidden`) leaves no trace in the registry
    /// or the online set. A failure after subscribing is rolled back.
    #[instrument(skip(self), fields(user_id = %self.user_id(), group_id = %self.group_id()))]
    pub async fn connect(&mut self) -> Result<mpsc::Receiver<ChatEvent>, ChatError> {
        let admit = self.machine.step(Input::Connect)?;
        for effect in admit {
            if let Err(e) = self.apply(effect).await {
                let _ = self.machine.step(Input::Rejected)?;
                debug!(error = %e, "connection rejected");
                return Err(e);
            }
        }

        let (tx, rx) = mpsc::channel(self.hub.config().inbox_capacity.max(1));
        let connection = Arc::new(Connection::new(
            self.user_id().clone(),
            self.group_id().clone(),
            tx,
        ));
        self.connection = Some(connection.clone());

        let register = self.machine.step(Input::Admitted)?;
        for effect in register {
            if let Err(e) = self.apply(effect).await {
                warn!(error = %e, "registration failed, rolling back");
                self.release().await;
                return Err(e);
            }
        }

        counter!(CONNECTIONS_TOTAL).increment(1);
        gauge!(CONNECTIONS_ACTIVE).increment(1.0);
        self.counted = true;
        info!(connection_id = %connection.id, "connected");
        Ok(rx)
    }

    /// Handle one text frame from the client: persist it and publish a
    /// `MessageCreated` event to the group.
    #[instrument(skip(self, raw), fields(user_id = %self.user_id(), group_id = %self.group_id()))]
    pub async fn receive(&mut self, raw: &str) -> Result<(), ChatError> {
        let effects = match self.machine.step(Input::Receive(raw)) {
            Ok(effects) => effects,
            Err(e) => {
                if matches!(e, ChatError::MalformedInput(_)) {
                    counter!(MALFORMED_INPUT_TOTAL).increment(1);
                }
                return Err(e);
            }
        };
        for effect in effects {
            self.apply(effect).await?;
        }
        Ok(())
    }

    /// Handle one event delivered by the bus.
    pub async fn on_event(&mut self, event: ChatEvent) -> Result<(), ChatError> {
        for effect in self.machine.step(Input::Event(event))? {
            self.apply(effect).await?;
        }
        Ok(())
    }

    /// Unsubscribe and release presence. Every cleanup step runs even if an
    /// earlier one fails; the first failure is returned.
    #[instrument(skip(self), fields(user_id = %self.user_id(), group_id = %self.group_id()))]
    pub async fn disconnect(&mut self) -> Result<(), ChatError> {
        let effects = self.machine.step(Input::Disconnect)?;

        let mut first_error = None;
        for effect in effects {
            if let Err(e) = self.apply(effect).await {
                warn!(error = %e, "cleanup step failed");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        if let Some(connection) = self.connection.take() {
            connection.close();
            info!(
                connection_id = %connection.id,
                age_ms = connection.age().as_millis() as u64,
                dropped = connection.drop_count(),
                "disconnected"
            );
        }
        if self.counted {
            self.counted = false;
            gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
        }

        first_error.map_or(Ok(()), Err)
    }

    // Undo a partial registration.
    async fn release(&mut self) {
        if let Err(e) = self.disconnect().await {
            warn!(error = %e, "rollback incomplete");
        }
    }

    async fn apply(&mut self, effect: Effect) -> Result<(), ChatError> {
        let user = self.machine.user_id().clone();
        let group = self.machine.group_id().clone();

        match effect {
            Effect::Admit => self.hub.admit(&user, &group).map(|_| ()),
            Effect::Subscribe => {
                let connection = self.connection()?;
                let _ = self.hub.registry().subscribe(&group, connection);
                Ok(())
            }
            Effect::MarkOnline => {
                let changed = self.hub.presence().mark_online(&group, &user).await?;
                self.online = true;
                if !changed {
                    // The set did not change, so nothing was announced; this
                    // connection still needs the current count.
                    let connection = self.connection()?;
                    self.hub.presence().send_count_to(&connection).await?;
                }
                Ok(())
            }
            Effect::Persist { body } => {
                let _ = self.hub.post_message(&user, &group, &body).await?;
                Ok(())
            }
            Effect::RenderMessage(message_id) => {
                match self.hub.store().get_message(message_id) {
                    Ok(message) => {
                        let payload = self.hub.renderer().render_message(&message, &user);
                        self.send(payload).await;
                    }
                    Err(ChatError::NotFound(_)) => {
                        warn!(%message_id, "message vanished before delivery, dropping");
                    }
                    Err(e) => warn!(%message_id, error = %e, "message fetch failed, dropping"),
                }
                Ok(())
            }
            Effect::SendPresence(online_count) => {
                let payload = self.hub.renderer().render_presence(online_count);
                self.send(payload).await;
                Ok(())
            }
            Effect::Unsubscribe => {
                if let Some(connection) = &self.connection {
                    connection.close();
                    let _ = self.hub.registry().unsubscribe(&group, &connection.id);
                }
                Ok(())
            }
            Effect::MarkOffline => {
                if self.online {
                    self.online = false;
                    let _ = self.hub.presence().mark_offline(&group, &user).await?;
                }
                Ok(())
            }
        }
    }

    fn connection(&self) -> Result<Arc<Connection>, ChatError> {
        self.connection.clone().ok_or(ChatError::InvalidState {
            operation: "register",
            state: self.state().as_str(),
        })
    }

    async fn send(&self, payload: String) {
        if self.outbound.send(payload).await.is_err() {
            debug!(user_id = %self.user_id(), "client writer gone, payload dropped");
        }
    }
}
