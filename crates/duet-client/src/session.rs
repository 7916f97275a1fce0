//! The client event loop.
//!
//! One task owns the [`ChatState`]. It selects over user commands, event
//! channel updates and finished REST calls; REST calls are spawned so that
//! none of them blocks event processing, and their results come back through
//! a channel tagged with the user they were made for.

use std::future::Future;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use duet_shared::protocol::{RegisterUserRequest, SendMessageRequest, SidebarSummary};
use duet_shared::{ChatError, Message, MessageId, MessageView, UserId, UserProfile};

use crate::api::ChatApi;
use crate::commands::Command;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::events::Notice;
use crate::socket::{EventSocket, SocketUpdate, SocketUpdateKind};
use crate::state::{ChatState, Effect};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug)]
enum Completion {
    Conversation {
        other: UserId,
        result: Result<Vec<Message>, ChatError>,
    },
    Sidebar {
        request: u64,
        result: Result<SidebarSummary, ChatError>,
    },
    Sent(Result<MessageView, ChatError>),
    Deleted {
        message_id: MessageId,
        result: Result<(), ChatError>,
    },
    MarkedSeen {
        message_id: MessageId,
        result: Result<(), ChatError>,
    },
    ProfileSaved(Result<(UserProfile, String), ChatError>),
}

#[derive(Debug)]
struct Tagged {
    owner: UserId,
    completion: Completion,
}

pub struct ChatSession {
    config: ClientConfig,
    api: ChatApi,
    socket: EventSocket,
    state: ChatState,
    socket_tx: mpsc::Sender<SocketUpdate>,
    socket_rx: mpsc::Receiver<SocketUpdate>,
    done_tx: mpsc::Sender<Tagged>,
    done_rx: mpsc::Receiver<Tagged>,
}

impl ChatSession {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let user = config
            .user_id
            .ok_or_else(|| ClientError::Config("DUET_USER_ID is not set".into()))?;
        let api = ChatApi::new(&config, user)?;
        let (socket_tx, socket_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (done_tx, done_rx) = mpsc::channel(CHANNEL_CAPACITY);

        Ok(Self {
            config,
            api,
            socket: EventSocket::new(),
            state: ChatState::new(user),
            socket_tx,
            socket_rx,
            done_tx,
            done_rx,
        })
    }

    pub fn state(&self) -> &ChatState {
        &self.state
    }

    /// Run until `commands` closes or [`Command::Quit`] arrives. `render` is
    /// called after every step with the state and the notices raised by it.
    pub async fn run<F>(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut render: F,
    ) -> Result<(), ClientError>
    where
        F: FnMut(&ChatState, Vec<Notice>),
    {
        let me = self.state.me();
        self.switch_user(me);
        let notices = self.state.take_notices();
        render(&self.state, notices);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    None | Some(Command::Quit) => break,
                    Some(command) => self.handle_command(command),
                },
                Some(update) = self.socket_rx.recv() => self.handle_socket(update),
                Some(done) = self.done_rx.recv() => self.handle_completion(done),
            }
            let notices = self.state.take_notices();
            render(&self.state, notices);
        }

        self.socket.disconnect();
        info!("Chat session ended");
        Ok(())
    }

    /// Become `user`: fresh state, fresh event channel, fresh sidebar.
    fn switch_user(&mut self, user: UserId) {
        info!(user = %user, "Starting chat session");
        self.api.set_user(user);
        self.state.reset_session(user);
        self.socket
            .connect(self.config.socket_url(user), self.socket_tx.clone());
        self.run_effects(vec![Effect::FetchSidebar]);
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Open(user) => {
                let effects = self.state.select(user);
                self.run_effects(effects);
            }
            Command::Close => self.state.close(),
            Command::Send { text, image } => {
                let Some(other) = self.state.selected() else {
                    self.state
                        .notify(Notice::info("Open a conversation first with /open <user id>"));
                    return;
                };
                let request = SendMessageRequest { text, image };
                self.spawn(move |api| async move {
                    Completion::Sent(
                        api.send(other, &request)
                            .await
                            .map_err(ClientError::into_chat),
                    )
                });
            }
            Command::Delete(message_id) => {
                self.spawn(move |api| async move {
                    Completion::Deleted {
                        message_id,
                        result: api.delete(message_id).await.map_err(ClientError::into_chat),
                    }
                });
            }
            Command::Refresh => {
                let mut effects = vec![Effect::FetchSidebar];
                if let Some(other) = self.state.selected() {
                    effects.push(Effect::FetchConversation(other));
                }
                self.run_effects(effects);
            }
            Command::Register { full_name } => {
                let request = RegisterUserRequest {
                    full_name,
                    bio: String::new(),
                    profile_pic: None,
                };
                self.spawn(move |api| async move {
                    Completion::ProfileSaved(
                        api.sync_user(&request)
                            .await
                            .map(|user| (user, "Registered".to_string()))
                            .map_err(ClientError::into_chat),
                    )
                });
            }
            Command::UpdateProfile(request) => {
                self.spawn(move |api| async move {
                    Completion::ProfileSaved(
                        api.update_profile(&request)
                            .await
                            .map(|resp| (resp.user, resp.message))
                            .map_err(ClientError::into_chat),
                    )
                });
            }
            Command::SwitchUser(user) => self.switch_user(user),
            Command::Quit => {}
        }
    }

    fn handle_socket(&mut self, update: SocketUpdate) {
        if !self.socket.is_current(update.generation) {
            debug!(generation = update.generation, "Dropping update from old connection");
            return;
        }

        match update.kind {
            SocketUpdateKind::Connected => {
                self.socket.set_connected(true);
                // Pushes may have been missed while disconnected.
                let mut effects = vec![Effect::FetchSidebar];
                if let Some(other) = self.state.selected() {
                    effects.push(Effect::FetchConversation(other));
                }
                self.run_effects(effects);
            }
            SocketUpdateKind::Event(event) => {
                let effects = self.state.apply_event(event);
                self.run_effects(effects);
            }
            SocketUpdateKind::Disconnected(reason) => {
                debug!(reason = %reason, "Event channel lost");
                if self.socket.is_connected() {
                    self.state.notify(Notice::error(&ChatError::Connectivity(
                        "Live updates paused, reconnecting".into(),
                    )));
                }
                self.socket.set_connected(false);
            }
        }
    }

    fn handle_completion(&mut self, done: Tagged) {
        if done.owner != self.state.me() {
            debug!(owner = %done.owner, "Dropping result for previous user");
            return;
        }

        let effects = match done.completion {
            Completion::Conversation { other, result } => {
                self.state.conversation_loaded(other, result)
            }
            Completion::Sidebar { request, result } => self.state.sidebar_loaded(request, result),
            Completion::Sent(result) => self.state.message_sent(result),
            Completion::Deleted { message_id, result } => {
                let channel_up = self.socket.is_connected();
                self.state.message_deleted(message_id, result, channel_up)
            }
            Completion::MarkedSeen { message_id, result } => {
                if let Err(e) = result {
                    warn!(msg_id = %message_id, error = %e, "Mark seen failed");
                }
                Vec::new()
            }
            Completion::ProfileSaved(result) => {
                self.state.profile_saved(result);
                Vec::new()
            }
        };
        self.run_effects(effects);
    }

    fn run_effects(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::FetchConversation(other) => self.spawn(move |api| async move {
                    Completion::Conversation {
                        other,
                        result: api.conversation(other).await.map_err(ClientError::into_chat),
                    }
                }),
                Effect::MarkSeen(message_id) => self.spawn(move |api| async move {
                    Completion::MarkedSeen {
                        message_id,
                        result: api.mark_seen(message_id).await.map_err(ClientError::into_chat),
                    }
                }),
                Effect::FetchSidebar => {
                    let request = self.state.sidebar_requested();
                    self.spawn(move |api| async move {
                        Completion::Sidebar {
                            request,
                            result: api.sidebar_summary().await.map_err(ClientError::into_chat),
                        }
                    })
                }
            }
        }
    }

    /// Run a REST call in the background and feed its result back into the loop.
    fn spawn<F, Fut>(&self, job: F)
    where
        F: FnOnce(ChatApi) -> Fut,
        Fut: Future<Output = Completion> + Send + 'static,
    {
        let api = self.api.clone();
        let owner = api.user();
        let done = self.done_tx.clone();
        let fut = job(api);
        tokio::spawn(async move {
            let completion = fut.await;
            if done.send(Tagged { owner, completion }).await.is_err() {
                debug!("Session ended before a request finished");
            }
        });
    }
}
