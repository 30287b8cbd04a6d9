//! Connection lifecycle as a pure state machine.
//!
//! [`SessionMachine::step`] consumes an [`Input`] and returns the
//! [`Effect`]s the runtime must perform, in order. It performs no I/O.

use rtchat_core::{ChatError, ChatEvent, GroupId, MessageId, UserId};
use serde::Deserialize;

/// The only client message type.
pub const NEW_MESSAGE: &str = "new_message";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Created, `connect` not yet called.
    Idle,
    /// Admission and registration in progress.
    Connecting,
    Active,
    /// Terminal. A new session is needed to reconnect.
    Disconnected,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Disconnected => "disconnected",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Input<'a> {
    Connect,
    /// Group exists and the user may join it.
    Admitted,
    Rejected,
    /// Raw text frame from the client.
    Receive(&'a str),
    /// Event delivered by the bus.
    Event(ChatEvent),
    Disconnect,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    /// Check group existence and access.
    Admit,
    Subscribe,
    MarkOnline,
    /// Store a message from this session's user and publish it.
    Persist { body: String },
    /// Fetch the message and send it rendered to this client.
    RenderMessage(MessageId),
    SendPresence(i64),
    Unsubscribe,
    MarkOffline,
}

#[derive(Deserialize)]
struct IncomingMessage {
    #[serde(rename = "type")]
    kind: Option<String>,
    body: Option<String>,
}

/// Extract the message body from a client frame.
///
/// The frame must be a JSON object with a non-empty string `body`; a
/// `type` field, when present, must be `new_message`.
pub fn parse_body(raw: &str) -> Result<String, ChatError> {
    let incoming: IncomingMessage = serde_json::from_str(raw)
        .map_err(|e| ChatError::MalformedInput(format!("invalid message: {e}")))?;
    if let Some(kind) = incoming.kind.as_deref() {
        if kind != NEW_MESSAGE {
            return Err(ChatError::MalformedInput(format!(
                "unknown message type: {kind}"
            )));
        }
    }
    match incoming.body {
        Some(body) if !body.is_empty() => Ok(body),
        Some(_) => Err(ChatError::MalformedInput("body is empty".into())),
        None => Err(ChatError::MalformedInput("missing body".into())),
    }
}

#[derive(Debug)]
pub struct SessionMachine {
    state: SessionState,
    user_id: UserId,
    group_id: GroupId,
}

impl SessionMachine {
    pub fn new(user_id: UserId, group_id: GroupId) -> Self {
        Self {
            state: SessionState::Idle,
            user_id,
            group_id,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn group_id(&self) -> &GroupId {
        &self.group_id
    }

    /// Apply `input`. On error the state is unchanged.
    pub fn step(&mut self, input: Input<'_>) -> Result<Vec<Effect>, ChatError> {
        use SessionState::*;

        match (self.state, input) {
            (Idle, Input::Connect) => {
                self.state = Connecting;
                Ok(vec![Effect::Admit])
            }
            (Connecting, Input::Admitted) => {
                self.state = Active;
                Ok(vec![Effect::Subscribe, Effect::MarkOnline])
            }
            (Connecting, Input::Rejected) => {
                self.state = Disconnected;
                Ok(Vec::new())
            }
            (Active, Input::Receive(raw)) => {
                let body = parse_body(raw)?;
                Ok(vec![Effect::Persist { body }])
            }
            (Active, Input::Event(event)) => Ok(vec![match event {
                ChatEvent::MessageCreated { message_id, .. } => Effect::RenderMessage(message_id),
                ChatEvent::OnlineCount { online_count, .. } => Effect::SendPresence(online_count),
            }]),
            // At most one in-flight event can arrive after close; drop it.
            (Disconnected, Input::Event(_)) => Ok(Vec::new()),
            (Active, Input::Disconnect) => {
                self.state = Disconnected;
                Ok(vec![Effect::Unsubscribe, Effect::MarkOffline])
            }
            (Connecting, Input::Disconnect) => {
                self.state = Disconnected;
                Ok(Vec::new())
            }
            (state, input) => Err(ChatError::InvalidState {
                operation: input_name(&input),
                state: state.as_str(),
            }),
        }
    }
}

fn input_name(input: &Input<'_>) -> &'static str {
    match input {
        Input::Connect => "connect",
        Input::Admitted => "admit",
        Input::Rejected => "reject",
        Input::Receive(_) => "receive",
        Input::Event(_) => "deliver",
        Input::Disconnect => "disconnect",
    }
}
