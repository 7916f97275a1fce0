//! Client chat state.
//!
//! [`ChatState`] is a pure reducer: every REST completion and socket event is
//! fed through one of its methods, which mutates the state and returns the
//! [`Effect`]s the session must perform. Nothing here does I/O, so the
//! reconciliation rules can be tested directly.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use duet_shared::protocol::{DeleteMessage, MessageSeen, ProfileUpdated, ServerEvent, SidebarSummary};
use duet_shared::{ChatError, LastMessage, Message, MessageId, MessageView, UserId, UserProfile};

use crate::events::{Notice, NoticeKind, NoticeQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NoConversation,
    Loading,
    Ready,
}

/// Work the session performs on behalf of the reducer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    FetchConversation(UserId),
    MarkSeen(MessageId),
    FetchSidebar,
}

/// Messages applied after the last sidebar snapshot; bounded so a server
/// that never answers cannot grow it forever.
const MAX_PENDING_MESSAGES: usize = 256;

#[derive(Debug)]
pub struct ChatState {
    me: UserId,
    phase: Phase,
    selected: Option<UserId>,
    users: Vec<UserProfile>,
    /// Visible list of the selected conversation, oldest first.
    messages: Vec<Message>,
    visible_ids: HashSet<MessageId>,
    last_messages: HashMap<UserId, LastMessage>,
    unseen: HashMap<UserId, u32>,
    online: HashSet<UserId>,
    /// Ids of messages already applied this session, from fetches or pushes.
    seen_ids: HashSet<MessageId>,
    /// Ids deleted this session. A response issued before the delete must
    /// not bring them back.
    deleted_ids: HashSet<MessageId>,
    /// Messages applied locally that no sidebar snapshot has covered yet.
    pending: Vec<Message>,
    /// Last sidebar request handed out, and the newest one applied.
    sidebar_requested: u64,
    sidebar_applied: u64,
    notices: NoticeQueue,
    sidebar_revision: u64,
}

impl ChatState {
    pub fn new(me: UserId) -> Self {
        Self {
            me,
            phase: Phase::NoConversation,
            selected: None,
            users: Vec::new(),
            messages: Vec::new(),
            visible_ids: HashSet::new(),
            last_messages: HashMap::new(),
            unseen: HashMap::new(),
            online: HashSet::new(),
            seen_ids: HashSet::new(),
            deleted_ids: HashSet::new(),
            pending: Vec::new(),
            sidebar_requested: 0,
            sidebar_applied: 0,
            notices: NoticeQueue::default(),
            sidebar_revision: 0,
        }
    }

    pub fn me(&self) -> UserId {
        self.me
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn selected(&self) -> Option<UserId> {
        self.selected
    }

    pub fn users(&self) -> &[UserProfile] {
        &self.users
    }

    pub fn user(&self, id: UserId) -> Option<&UserProfile> {
        self.users.iter().find(|u| u.id == id)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last_message(&self, counterpart: UserId) -> Option<&LastMessage> {
        self.last_messages.get(&counterpart)
    }

    pub fn unseen(&self, counterpart: UserId) -> u32 {
        self.unseen.get(&counterpart).copied().unwrap_or(0)
    }

    pub fn is_online(&self, user: UserId) -> bool {
        self.online.contains(&user)
    }

    /// Bumped whenever the contact list or its previews are replaced.
    pub fn sidebar_revision(&self) -> u64 {
        self.sidebar_revision
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        self.notices.drain()
    }

    pub fn notify(&mut self, notice: Notice) {
        self.notices.push(notice);
    }

    /// Start over as `me`: a new identity or a new event channel. All
    /// per-session dedup state is dropped.
    pub fn reset_session(&mut self, me: UserId) {
        // Request numbers keep counting so answers to the old session's
        // requests still read as stale.
        let requested = self.sidebar_requested;
        *self = Self::new(me);
        self.sidebar_requested = requested;
        self.sidebar_applied = requested;
    }

    /// Number the next sidebar request. Pass it back to
    /// [`sidebar_loaded`](Self::sidebar_loaded) with the response.
    pub fn sidebar_requested(&mut self) -> u64 {
        self.sidebar_requested += 1;
        self.sidebar_requested
    }

    // -----------------------------------------------------------------------
    // User actions
    // -----------------------------------------------------------------------

    /// Open the conversation with `user`. Its unseen counter is cleared
    /// right away.
    pub fn select(&mut self, user: UserId) -> Vec<Effect> {
        self.selected = Some(user);
        self.phase = Phase::Loading;
        self.messages.clear();
        self.visible_ids.clear();
        self.unseen.remove(&user);
        vec![Effect::FetchConversation(user)]
    }

    pub fn close(&mut self) {
        self.selected = None;
        self.phase = Phase::NoConversation;
        self.messages.clear();
        self.visible_ids.clear();
    }

    // -----------------------------------------------------------------------
    // REST completions
    // -----------------------------------------------------------------------

    pub fn conversation_loaded(
        &mut self,
        other: UserId,
        result: Result<Vec<Message>, ChatError>,
    ) -> Vec<Effect> {
        if self.selected != Some(other) {
            debug!(other = %other, "Discarding stale conversation response");
            return Vec::new();
        }
        self.phase = Phase::Ready;

        let fetched = match result {
            Ok(fetched) => fetched,
            Err(e) => {
                self.notices.push(Notice::error(&e));
                return Vec::new();
            }
        };

        // Pushes that arrived while loading are kept; the fetch wins on
        // overlap since it carries the server's seen flags.
        let pushed = std::mem::take(&mut self.messages);
        self.visible_ids.clear();
        for message in fetched.into_iter().chain(pushed) {
            if self.deleted_ids.contains(&message.id) {
                continue;
            }
            self.seen_ids.insert(message.id);
            if self.visible_ids.insert(message.id) {
                self.messages.push(message);
            }
        }
        self.messages.sort_by_key(|m| m.created_at);

        // The server marked everything from `other` as seen before replying.
        let me = self.me;
        let seen: Vec<MessageId> = self
            .messages
            .iter()
            .filter(|m| m.sender_id == other && m.receiver_id == me && m.seen)
            .map(|m| m.id)
            .collect();
        for id in seen {
            self.mark_preview_seen(id);
        }
        self.unseen.remove(&other);

        Vec::new()
    }

    /// Apply sidebar response number `request`.
    ///
    /// The snapshot may predate messages already applied here: those are
    /// replayed on top of it. Responses older than one already applied are
    /// dropped.
    pub fn sidebar_loaded(
        &mut self,
        request: u64,
        result: Result<SidebarSummary, ChatError>,
    ) -> Vec<Effect> {
        if request <= self.sidebar_applied {
            debug!(request, applied = self.sidebar_applied, "Discarding stale sidebar response");
            return Vec::new();
        }

        let summary = match result {
            Ok(summary) => summary,
            Err(e) => {
                self.notices.push(Notice::error(&e));
                return Vec::new();
            }
        };
        self.sidebar_applied = request;

        let local = std::mem::replace(&mut self.last_messages, summary.last_messages);
        self.users = summary.users;
        self.unseen = summary.unseen_messages;

        // A preview of a message deleted here is older than the delete
        // push, which already set the right one.
        let deleted: Vec<UserId> = self
            .last_messages
            .iter()
            .filter(|(_, last)| self.deleted_ids.contains(&last.message_id))
            .map(|(counterpart, _)| *counterpart)
            .collect();
        for counterpart in deleted {
            match local.get(&counterpart) {
                Some(last) => {
                    self.last_messages.insert(counterpart, last.clone());
                }
                None => {
                    self.last_messages.remove(&counterpart);
                }
            }
        }

        let me = self.me;
        let mut pending = std::mem::take(&mut self.pending);
        pending.sort_by_key(|m| (m.created_at, m.id));
        for message in pending {
            let counterpart = message.counterpart(me);
            let covered = self.last_messages.get(&counterpart).is_some_and(|last| {
                last.message_id == message.id
                    || (last.created_at, last.message_id) > (message.created_at, message.id)
            });
            if covered {
                continue;
            }

            if message.sender_id != me && !message.seen && self.selected != Some(counterpart) {
                *self.unseen.entry(counterpart).or_insert(0) += 1;
            }
            self.last_messages
                .insert(counterpart, LastMessage::from(&message));
            self.pending.push(message);
        }

        if let Some(open) = self.selected {
            self.unseen.remove(&open);
        }
        self.sidebar_revision += 1;
        Vec::new()
    }

    pub fn message_sent(&mut self, result: Result<MessageView, ChatError>) -> Vec<Effect> {
        match result {
            Ok(view) => self.apply_new_message(view, false),
            Err(e) => {
                self.notices.push(Notice::error(&e));
                Vec::new()
            }
        }
    }

    /// The server accepted a delete. The `deleteMessage` push carries the new
    /// preview; without a live channel the sidebar is refetched instead.
    pub fn message_deleted(
        &mut self,
        message_id: MessageId,
        result: Result<(), ChatError>,
        channel_up: bool,
    ) -> Vec<Effect> {
        match result {
            Ok(()) => {
                self.remove_visible(message_id);
                if channel_up {
                    Vec::new()
                } else {
                    vec![Effect::FetchSidebar]
                }
            }
            Err(e) => {
                self.notices.push(Notice::error(&e));
                Vec::new()
            }
        }
    }

    pub fn profile_saved(&mut self, result: Result<(UserProfile, String), ChatError>) {
        match result {
            Ok((user, message)) => {
                self.apply_profile(ProfileUpdated::from(&user));
                self.notices.push(Notice::info(message));
            }
            Err(e) => self.notices.push(Notice::error(&e)),
        }
    }

    // -----------------------------------------------------------------------
    // Socket events
    // -----------------------------------------------------------------------

    pub fn apply_event(&mut self, event: ServerEvent) -> Vec<Effect> {
        match event {
            ServerEvent::OnlineUsers(users) => {
                self.online = users.into_iter().collect();
                Vec::new()
            }
            ServerEvent::NewMessage(view) => self.apply_new_message(view, true),
            ServerEvent::MessageSeen(seen) => {
                self.apply_seen(seen);
                Vec::new()
            }
            ServerEvent::DeleteMessage(deleted) => self.apply_delete(deleted),
            ServerEvent::MessageDeleted(deleted) => {
                self.remove_visible(deleted.message_id);
                Vec::new()
            }
            ServerEvent::UserProfileUpdated(profile) => {
                self.apply_profile(profile);
                Vec::new()
            }
        }
    }

    fn apply_new_message(&mut self, view: MessageView, pushed: bool) -> Vec<Effect> {
        let message = view.message;
        if !message.involves(self.me) {
            debug!(msg_id = %message.id, "Ignoring message for another user");
            return Vec::new();
        }
        if self.deleted_ids.contains(&message.id) || !self.seen_ids.insert(message.id) {
            debug!(msg_id = %message.id, "Duplicate message dropped");
            return Vec::new();
        }

        let counterpart = message.counterpart(self.me);
        let incoming = message.sender_id != self.me;
        let mut effects = Vec::new();

        if !self.users.iter().any(|u| u.id == counterpart) && counterpart != self.me {
            effects.push(Effect::FetchSidebar);
        }

        if self.selected == Some(counterpart) {
            if incoming && pushed {
                effects.push(Effect::MarkSeen(message.id));
            }
        } else if incoming {
            *self.unseen.entry(counterpart).or_insert(0) += 1;
            let preview = if message.text.is_empty() {
                "sent an image".to_string()
            } else {
                message.text.clone()
            };
            self.notices.push(Notice {
                kind: NoticeKind::NewMessage,
                text: format!("{}: {preview}", view.sender.full_name),
            });
        }

        self.last_messages
            .insert(counterpart, LastMessage::from(&message));
        self.record_pending(&message);
        if self.selected == Some(counterpart) && self.visible_ids.insert(message.id) {
            self.messages.push(message);
        }
        effects
    }

    fn apply_seen(&mut self, seen: MessageSeen) {
        for message in self.messages.iter_mut().filter(|m| m.id == seen.message_id) {
            message.seen = true;
        }
        self.mark_preview_seen(seen.message_id);
    }

    fn mark_preview_seen(&mut self, message_id: MessageId) {
        for message in self.pending.iter_mut().filter(|m| m.id == message_id) {
            message.seen = true;
        }
        for last in self
            .last_messages
            .values_mut()
            .filter(|l| l.message_id == message_id)
        {
            last.seen = true;
        }
    }

    fn apply_delete(&mut self, deleted: DeleteMessage) -> Vec<Effect> {
        self.remove_visible(deleted.message_id);

        let conversation = deleted.conversation_id;
        match deleted.new_last_message {
            Some(last) => {
                self.last_messages
                    .insert(conversation, LastMessage::from(&last));
            }
            None => {
                self.last_messages.remove(&conversation);
            }
        }

        // An unread message may have been removed; only the server knows.
        if self.selected != Some(conversation) && self.unseen(conversation) > 0 {
            vec![Effect::FetchSidebar]
        } else {
            Vec::new()
        }
    }

    fn record_pending(&mut self, message: &Message) {
        if self.pending.len() >= MAX_PENDING_MESSAGES {
            warn!("Too many messages since the last sidebar snapshot, forgetting the oldest");
            self.pending.remove(0);
        }
        self.pending.push(message.clone());
    }

    /// Forget a deleted message everywhere except the previews, which the
    /// server tells us how to fix.
    fn remove_visible(&mut self, message_id: MessageId) {
        self.deleted_ids.insert(message_id);
        self.pending.retain(|m| m.id != message_id);
        if self.visible_ids.remove(&message_id) {
            self.messages.retain(|m| m.id != message_id);
        }
    }

    fn apply_profile(&mut self, profile: ProfileUpdated) {
        match self.users.iter_mut().find(|u| u.id == profile.user_id) {
            Some(user) => {
                user.full_name = profile.full_name;
                user.profile_pic = profile.profile_pic;
                user.bio = profile.bio;
            }
            None if profile.user_id != self.me => {
                self.users.push(UserProfile {
                    id: profile.user_id,
                    full_name: profile.full_name,
                    profile_pic: profile.profile_pic,
                    bio: profile.bio,
                    last_seen: None,
                });
            }
            None => {}
        }
    }
}
