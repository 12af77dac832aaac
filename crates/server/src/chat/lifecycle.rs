//! Connection lifecycle
//!
//! One [`Session`] per transport connection, moving through
//! `Connecting -> Active -> Closed`. The session owns registry updates and
//! presence broadcasts for its connection and dispatches inbound events to
//! the router and the typing relay. It is transport-agnostic: events come
//! in through [`Session::handle`] and leave through the connection's
//! outbound queue.

use crate::chat::events::{
    ChatHistory, ErrorKind, HistoryRequest, InboundEvent, MessageAck, MessageError,
    OutboundEvent, SendMessage, SigninSuccess, UserOffline, UsersList,
};
use crate::chat::presence::{ConnectionEntry, ConnectionHandle, ConnectionId};
use crate::chat::router::{RouteError, RouteOutcome};
use crate::core::auth::SigninClaim;
use crate::core::config::AppState;
use crate::core::models::{PresenceStatus, PresenceView};
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport is up, no verified identity yet.
    Connecting,
    /// Signed in as `user_id`.
    Active { user_id: String },
    Closed,
}

pub struct Session {
    id: ConnectionId,
    state: AppState,
    outbox: mpsc::Sender<OutboundEvent>,
    token: Option<String>,
    phase: ConnectionState,
    presence_feed: Option<JoinHandle<()>>,
}

impl Session {
    /// `token` is whatever credential the transport captured at connect time.
    pub fn new(
        state: AppState,
        outbox: mpsc::Sender<OutboundEvent>,
        token: Option<String>,
    ) -> Self {
        let id = ConnectionId::new();
        debug!(connection = %id, "connection opened");
        Self {
            id,
            state,
            outbox,
            token,
            phase: ConnectionState::Connecting,
            presence_feed: None,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn phase(&self) -> &ConnectionState {
        &self.phase
    }

    fn user_id(&self) -> Option<&str> {
        match &self.phase {
            ConnectionState::Active { user_id } => Some(user_id.as_str()),
            _ => None,
        }
    }

    /// Direct replies wait for queue space; only a closed connection loses them.
    async fn reply(&self, event: OutboundEvent) {
        if self.outbox.send(event).await.is_err() {
            warn!(connection = %self.id, "connection closed before reply was queued");
        }
    }

    async fn reply_error(&self, error: MessageError) {
        self.reply(OutboundEvent::MessageError(error)).await;
    }

    /// Report a frame that could not be parsed.
    pub async fn reject_malformed(&self, reason: impl Into<String>) {
        self.reply_error(MessageError::new(ErrorKind::ValidationError, reason))
            .await;
    }

    pub async fn handle(&mut self, event: InboundEvent) {
        debug!(connection = %self.id, event = event.name(), "inbound event");

        let active_user = match &self.phase {
            ConnectionState::Closed => return,
            ConnectionState::Connecting => None,
            ConnectionState::Active { user_id } => Some(user_id.clone()),
        };

        let Some(user_id) = active_user else {
            match event {
                InboundEvent::Signin(claim) => self.signin(claim).await,
                other => self.reply_error(MessageError::new(
                    ErrorKind::Unauthenticated,
                    format!("sign in before {}", other.name()),
                ))
                .await,
            }
            return;
        };

        match event {
            InboundEvent::Signin(_) => self.reply_error(MessageError::new(
                ErrorKind::ValidationError,
                "connection is already signed in",
            ))
            .await,
            InboundEvent::SendMessage(send) => self.send_message(&user_id, send).await,
            InboundEvent::Typing(target) => {
                self.state.typing.notify(&user_id, &target.receiver_id, true);
            }
            InboundEvent::StopTyping(target) => {
                self.state.typing.notify(&user_id, &target.receiver_id, false);
            }
            InboundEvent::StatusChange(change) => {
                self.change_status(&user_id, change.new_status).await
            }
            InboundEvent::GetUsersList => self.reply(OutboundEvent::UsersList(UsersList {
                users: self.state.registry.views(),
            }))
            .await,
            InboundEvent::RequestChatHistory(request) => {
                self.send_history(&user_id, request).await
            }
        }
    }

    async fn signin(&mut self, claim: SigninClaim) {
        let user = match self
            .state
            .auth
            .verify_signin(self.token.as_deref(), &claim)
            .await
        {
            Ok(user) => user,
            Err(e) => {
                warn!(connection = %self.id, user = %claim.user_id, "sign-in rejected: {}", e);
                self.reply_error(MessageError::new(ErrorKind::Unauthenticated, e.to_string()))
                    .await;
                return;
            }
        };

        // Subscribe before publishing so this connection sees its own online event.
        self.presence_feed = Some(self.state.hub.forward_to(self.outbox.clone()));

        let handle = ConnectionHandle::new(self.id, self.outbox.clone());
        let entry = ConnectionEntry::new(&user.user_id, handle, &user.display_name, &user.email);
        let view = entry.view();

        if let Some(previous) = self.state.registry.register(entry) {
            info!(
                user = %user.user_id,
                previous = %previous.handle.id(),
                connection = %self.id,
                "sign-in superseded an earlier connection"
            );
        }
        self.phase = ConnectionState::Active {
            user_id: user.user_id.clone(),
        };
        info!(user = %user.user_id, connection = %self.id, "user signed in");

        let users = self.state.registry.views();
        self.reply(OutboundEvent::SigninSuccess(SigninSuccess {
            user: view.clone(),
            users: users.clone(),
        }))
        .await;
        self.state.hub.publish(OutboundEvent::UserStatusChange(view));
        self.state
            .hub
            .publish(OutboundEvent::UsersListUpdated(UsersList { users }));
    }

    async fn send_message(&self, user_id: &str, send: SendMessage) {
        let message_id = send.message_id.clone();

        if !send.sender.is_empty() && send.sender != user_id {
            self.reply_error(
                RouteError::Validation(format!("sender must be {}", user_id))
                    .to_wire(message_id),
            )
            .await;
            return;
        }

        match self.state.router.route(send).await {
            Ok(RouteOutcome::Delivered(message)) => {
                self.reply(OutboundEvent::MessageSent(MessageAck {
                    message_id: message.message_id,
                    receiver_id: message.receiver_id,
                    timestamp: message.created_at,
                }))
                .await;
            }
            Ok(RouteOutcome::QueuedOffline(message)) => {
                self.reply(OutboundEvent::ReceiverOffline(MessageAck {
                    message_id: message.message_id,
                    receiver_id: message.receiver_id,
                    timestamp: message.created_at,
                }))
                .await;
            }
            Err(e) => {
                debug!(connection = %self.id, "send rejected: {}", e);
                self.reply_error(e.to_wire(message_id)).await;
            }
        }
    }

    async fn change_status(&self, user_id: &str, status: PresenceStatus) {
        if status == PresenceStatus::Offline {
            self.reply_error(MessageError::new(
                ErrorKind::ValidationError,
                "offline is not a settable status; disconnect instead",
            ))
            .await;
            return;
        }

        let Some(entry) = self.state.registry.update_status(user_id, self.id, status) else {
            debug!(user = %user_id, connection = %self.id, "status change from superseded connection ignored");
            return;
        };

        info!(user = %user_id, status = ?status, "status changed");
        self.state
            .hub
            .publish(OutboundEvent::UserStatusChange(entry.view()));
        self.state.hub.publish(OutboundEvent::UsersListUpdated(UsersList {
            users: self.state.registry.views(),
        }));
    }

    async fn send_history(&self, user_id: &str, request: HistoryRequest) {
        if let Some(requested) = request.user_id.as_deref() {
            if !requested.is_empty() && requested != user_id {
                self.reply_error(MessageError::new(
                    ErrorKind::ValidationError,
                    "history can only be requested for the signed-in user",
                ))
                .await;
                return;
            }
        }
        if request.other_user_id.trim().is_empty() {
            self.reply_error(MessageError::new(
                ErrorKind::ValidationError,
                "otherUserId is required",
            ))
            .await;
            return;
        }

        let page = self.state.config.page(request.limit, request.offset);
        match self
            .state
            .log
            .history(user_id, &request.other_user_id, page)
            .await
        {
            Ok(messages) => self.reply(OutboundEvent::ChatHistory(ChatHistory {
                user_id: user_id.to_string(),
                other_user_id: request.other_user_id,
                messages,
            }))
            .await,
            Err(e) => {
                error!(user = %user_id, "history query failed: {}", e);
                self.reply_error(MessageError::new(
                    ErrorKind::PersistenceFailure,
                    "chat history is unavailable",
                ))
                .await;
            }
        }
    }

    /// Tear the connection down. Safe to call more than once.
    pub async fn close(&mut self) {
        if let Some(feed) = self.presence_feed.take() {
            feed.abort();
        }

        let previous = std::mem::replace(&mut self.phase, ConnectionState::Closed);
        let ConnectionState::Active { user_id } = previous else {
            debug!(connection = %self.id, "connection closed before sign-in");
            return;
        };

        if self.state.registry.remove(&user_id, self.id) {
            info!(user = %user_id, connection = %self.id, "user went offline");
            self.state.hub.publish(OutboundEvent::UserOffline(UserOffline {
                user_id,
                last_seen_at: Utc::now(),
            }));
            self.state.hub.publish(OutboundEvent::UsersListUpdated(UsersList {
                users: self.state.registry.views(),
            }));
        } else {
            // A newer connection owns the entry; the user is still online.
            debug!(user = %user_id, connection = %self.id, "presence race lost, offline not broadcast");
        }
    }

    /// Presence view of this session's user, if it still owns the registry entry.
    pub fn presence(&self) -> Option<PresenceView> {
        let user_id = self.user_id()?;
        self.state
            .registry
            .lookup(user_id)
            .filter(|entry| entry.handle.id() == self.id)
            .map(|entry| entry.view())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(feed) = self.presence_feed.take() {
            feed.abort();
        }
    }
}
