//! Message orchestration: store writes, image uploads and the events that
//! follow them.
//!
//! Every operation takes the authenticated caller explicitly. Pushes are
//! fire-and-forget; the returned values are what the REST layer answers with.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use duet_shared::models::has_content;
use duet_shared::protocol::{
    DeleteMessage, MessageDeleted, MessageSeen, ProfileUpdated, RegisterUserRequest,
    SendMessageRequest, ServerEvent, SidebarSummary, UpdateProfileRequest, UsersResponse,
};
use duet_shared::{ChatError, LastMessage, Message, MessageId, MessageView, UserId, UserProfile};
use duet_store::models::{ImageRef, NewMessage};
use duet_store::{Database, StoreError};

use crate::error::ServerError;
use crate::events::EventHub;
use crate::media::{upload_data_uri, ImageStore};

const UPLOAD_FAILED: &str =
    "Failed to upload image. Please try again with a smaller image or check your connection.";
const PROFILE_UPDATED: &str = "Profile updated successfully";
const PROFILE_UPDATED_WITHOUT_PICTURE: &str =
    "Profile updated, but the profile picture could not be uploaded";

#[derive(Clone)]
pub struct MessageService {
    db: Arc<Mutex<Database>>,
    hub: EventHub,
    images: Arc<dyn ImageStore>,
    upload_timeout: Duration,
}

impl MessageService {
    pub fn new(
        db: Arc<Mutex<Database>>,
        hub: EventHub,
        images: Arc<dyn ImageStore>,
        upload_timeout: Duration,
    ) -> Self {
        Self {
            db,
            hub,
            images,
            upload_timeout,
        }
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    /// Run `f` against the database. The lock is never held across an await.
    fn with_db<T>(
        &self,
        f: impl FnOnce(&Database) -> Result<T, StoreError>,
    ) -> Result<T, ServerError> {
        let db = self
            .db
            .lock()
            .map_err(|_| ServerError::Internal("database lock poisoned".into()))?;
        Ok(f(&db)?)
    }

    /// Create a message from `sender` to `receiver` and push it to both.
    pub async fn send(
        &self,
        sender: UserId,
        receiver: UserId,
        req: SendMessageRequest,
    ) -> Result<MessageView, ServerError> {
        let text = req.text.trim().to_string();
        let image_uri = req.image.filter(|uri| !uri.trim().is_empty());
        if !has_content(&text, image_uri.as_deref()) {
            return Err(ChatError::Validation("Cannot send empty message".into()).into());
        }

        let (sender_profile, receiver_profile) = self
            .with_db(|db| Ok((db.get_user(sender)?, db.get_user(receiver)?)))
            .map_err(user_not_found)?;

        let image = match image_uri {
            Some(uri) => match upload_data_uri(self.images.as_ref(), &uri, self.upload_timeout)
                .await
            {
                Ok(stored) => Some(ImageRef {
                    url: stored.url,
                    public_id: stored.public_id,
                }),
                Err(e) if text.is_empty() => {
                    warn!(sender = %sender, error = %e, "image upload failed, nothing left to send");
                    return Err(ChatError::Dependency(UPLOAD_FAILED.into()).into());
                }
                Err(e) => {
                    warn!(sender = %sender, error = %e, "image upload failed, sending text only");
                    None
                }
            },
            None => None,
        };

        let uploaded = image.as_ref().map(|img| img.public_id.clone());
        let created = self.with_db(|db| {
            db.create_message(NewMessage {
                sender_id: sender,
                receiver_id: receiver,
                text,
                image,
            })
        });
        let stored = match created {
            Ok(stored) => stored,
            Err(e) => {
                if let Some(public_id) = uploaded {
                    self.destroy_image(&public_id).await;
                }
                return Err(e);
            }
        };

        let view = MessageView {
            message: stored.message,
            sender: (&sender_profile).into(),
            receiver: (&receiver_profile).into(),
        };

        self.hub
            .emit_to(receiver, ServerEvent::NewMessage(view.clone()))
            .await;
        if sender != receiver {
            self.hub
                .emit_to(sender, ServerEvent::NewMessage(view.clone()))
                .await;
        }

        info!(msg_id = %view.message.id, sender = %sender, receiver = %receiver, "message sent");
        Ok(view)
    }

    /// Every message between `me` and `other`, oldest first.
    ///
    /// Messages `other` sent to `me` are marked seen before returning, and
    /// `other` gets a `messageSeen` event for each one that changed.
    pub async fn fetch_conversation(
        &self,
        me: UserId,
        other: UserId,
    ) -> Result<Vec<Message>, ServerError> {
        let (mut messages, newly_seen) = self.with_db(|db| {
            let messages = db.list_conversation(me, other, None)?;
            let newly_seen = db.mark_conversation_seen(other, me)?;
            Ok((messages, newly_seen))
        })?;

        for message in messages.iter_mut() {
            if newly_seen.contains(&message.id) {
                message.seen = true;
            }
        }

        for message_id in &newly_seen {
            self.hub
                .emit_to(
                    other,
                    ServerEvent::MessageSeen(MessageSeen {
                        message_id: *message_id,
                        seen_by: me,
                        chat_id: other,
                    }),
                )
                .await;
        }

        debug!(
            user = %me,
            other = %other,
            count = messages.len(),
            newly_seen = newly_seen.len(),
            "conversation fetched"
        );
        Ok(messages)
    }

    /// Mark one message seen on behalf of its receiver.
    ///
    /// The sender is notified even when the message was already seen.
    pub async fn mark_seen(&self, me: UserId, message_id: MessageId) -> Result<(), ServerError> {
        let message = self.with_db(|db| {
            let stored = db.get_message(message_id)?;
            if stored.message.receiver_id == me {
                db.mark_seen(&[message_id])?;
            }
            Ok(stored.message)
        })?;

        if message.receiver_id != me {
            return Err(ChatError::Authorization("Not authorized".into()).into());
        }

        self.hub
            .emit_to(
                message.sender_id,
                ServerEvent::MessageSeen(MessageSeen {
                    message_id,
                    seen_by: me,
                    chat_id: message.sender_id,
                }),
            )
            .await;
        Ok(())
    }

    /// Delete a message `me` sent and tell both participants what their
    /// conversation preview should now show.
    pub async fn delete(&self, me: UserId, message_id: MessageId) -> Result<(), ServerError> {
        let (stored, new_last) = self.with_db(|db| {
            let stored = db.delete_message(message_id, me)?;
            let m = &stored.message;
            let new_last = db.last_message_between(m.sender_id, m.receiver_id)?;
            Ok((stored, new_last))
        })?;

        if let Some(public_id) = &stored.image_public_id {
            self.destroy_image(public_id).await;
        }

        let (sender, receiver) = (stored.message.sender_id, stored.message.receiver_id);
        let notice = |conversation_id| {
            ServerEvent::DeleteMessage(DeleteMessage {
                message_id,
                conversation_id,
                new_last_message: new_last.clone(),
            })
        };
        self.hub.emit_to(sender, notice(receiver)).await;
        if receiver != sender {
            self.hub.emit_to(receiver, notice(sender)).await;
        }
        self.hub
            .broadcast(ServerEvent::MessageDeleted(MessageDeleted { message_id }))
            .await;

        info!(msg_id = %message_id, user = %me, "message deleted");
        Ok(())
    }

    /// Contacts of `me` with their conversation previews and unseen counts,
    /// read under one lock so all three agree.
    pub fn sidebar_summary(&self, me: UserId) -> Result<SidebarSummary, ServerError> {
        self.with_db(|db| {
            let users = db.list_users_except(me)?;
            let last_messages = db
                .last_message_per_counterpart(me)?
                .iter()
                .map(|(counterpart, message)| (*counterpart, LastMessage::from(message)))
                .collect();
            let unseen_messages = db.unseen_counts_for(me)?;
            Ok(SidebarSummary {
                success: true,
                users,
                last_messages,
                unseen_messages,
            })
        })
    }

    /// Contacts of `me` with unseen counts only.
    pub fn users_with_unseen(&self, me: UserId) -> Result<UsersResponse, ServerError> {
        self.with_db(|db| {
            Ok(UsersResponse {
                success: true,
                users: db.list_users_except(me)?,
                unseen_messages: db.unseen_counts_for(me)?,
            })
        })
    }

    /// Create or refresh the caller's directory entry.
    pub async fn register_user(
        &self,
        me: UserId,
        req: RegisterUserRequest,
    ) -> Result<UserProfile, ServerError> {
        let full_name = req.full_name.trim().to_string();
        if full_name.is_empty() {
            return Err(ChatError::Validation("Full name is required".into()).into());
        }

        let user = self.with_db(|db| {
            let last_seen = match db.get_user(me) {
                Ok(existing) => existing.last_seen,
                Err(StoreError::NotFound) => None,
                Err(e) => return Err(e),
            };
            let user = UserProfile {
                id: me,
                full_name,
                profile_pic: req.profile_pic.filter(|pic| !pic.trim().is_empty()),
                bio: req.bio.trim().to_string(),
                last_seen,
            };
            db.upsert_user(&user)?;
            Ok(user)
        })?;

        self.hub
            .broadcast(ServerEvent::UserProfileUpdated(ProfileUpdated::from(&user)))
            .await;

        info!(user = %me, "user registered");
        Ok(user)
    }

    /// Update the caller's profile and broadcast it.
    ///
    /// A failed avatar upload still saves name and bio; the returned message
    /// says so.
    pub async fn update_profile(
        &self,
        me: UserId,
        req: UpdateProfileRequest,
    ) -> Result<(UserProfile, String), ServerError> {
        let full_name = req.full_name.trim().to_string();
        if full_name.is_empty() {
            return Err(ChatError::Validation("Full name is required".into()).into());
        }

        let mut message = PROFILE_UPDATED;
        let mut profile_pic = None;
        if let Some(uri) = req.profile_pic.filter(|uri| !uri.trim().is_empty()) {
            match upload_data_uri(self.images.as_ref(), &uri, self.upload_timeout).await {
                Ok(stored) => profile_pic = Some(stored.url),
                Err(e) => {
                    warn!(user = %me, error = %e, "avatar upload failed, keeping previous picture");
                    message = PROFILE_UPDATED_WITHOUT_PICTURE;
                }
            }
        }

        let bio = req.bio.trim().to_string();
        let user = self
            .with_db(|db| db.update_profile(me, &full_name, &bio, profile_pic.as_deref()))
            .map_err(user_not_found)?;

        self.hub
            .broadcast(ServerEvent::UserProfileUpdated(ProfileUpdated::from(&user)))
            .await;

        info!(user = %me, "profile updated");
        Ok((user, message.to_string()))
    }

    /// Record that `user` just went offline. Failures are only logged.
    pub fn touch_last_seen(&self, user: UserId) {
        match self.with_db(|db| db.touch_last_seen(user, Utc::now())) {
            Ok(true) => {}
            Ok(false) => debug!(user = %user, "last seen not recorded for unknown user"),
            Err(e) => warn!(user = %user, error = %e, "failed to record last seen"),
        }
    }

    async fn destroy_image(&self, public_id: &str) {
        if let Err(e) = self.images.destroy(public_id).await {
            warn!(image = %public_id, error = %e, "image cleanup failed");
        }
    }
}

fn user_not_found(e: ServerError) -> ServerError {
    match e {
        ServerError::Chat(ChatError::NotFound(_)) => {
            ChatError::NotFound("User not found".into()).into()
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::StoredImage;
    use crate::presence::ConnectionHandle;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    const PNG: &str = "data:image/png;base64,aGVsbG8=";

    /// Keeps uploads in memory and records deletions.
    #[derive(Default)]
    struct MemoryImages {
        destroyed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ImageStore for MemoryImages {
        async fn upload(&self, _: &[u8], _: &str) -> Result<StoredImage, ServerError> {
            let public_id = format!("{}.png", uuid::Uuid::new_v4());
            Ok(StoredImage {
                url: format!("http://localhost:5000/media/{public_id}"),
                public_id,
            })
        }

        async fn destroy(&self, public_id: &str) -> Result<(), ServerError> {
            self.destroyed.lock().unwrap().push(public_id.to_string());
            Ok(())
        }
    }

    struct BrokenImages;

    #[async_trait]
    impl ImageStore for BrokenImages {
        async fn upload(&self, _: &[u8], _: &str) -> Result<StoredImage, ServerError> {
            Err(ServerError::MediaStorage("unreachable".into()))
        }

        async fn destroy(&self, _: &str) -> Result<(), ServerError> {
            Err(ServerError::MediaStorage("unreachable".into()))
        }
    }

    fn service_with(images: Arc<dyn ImageStore>) -> (MessageService, UserId, UserId) {
        let db = Database::open_in_memory().unwrap();
        let x = profile("Xavier");
        let y = profile("Yasmin");
        db.upsert_user(&x).unwrap();
        db.upsert_user(&y).unwrap();
        let service = MessageService::new(
            Arc::new(Mutex::new(db)),
            EventHub::default(),
            images,
            Duration::from_secs(5),
        );
        (service, x.id, y.id)
    }

    fn service() -> (MessageService, UserId, UserId) {
        service_with(Arc::new(MemoryImages::default()))
    }

    fn profile(name: &str) -> UserProfile {
        UserProfile {
            id: UserId::new(),
            full_name: name.into(),
            profile_pic: None,
            bio: String::new(),
            last_seen: None,
        }
    }

    fn text(t: &str) -> SendMessageRequest {
        SendMessageRequest {
            text: t.into(),
            image: None,
        }
    }

    async fn online(service: &MessageService, user: UserId) -> mpsc::Receiver<ServerEvent> {
        let (handle, mut rx) = ConnectionHandle::channel(64);
        service.hub().connect(user, handle).await;
        drain(&mut rx);
        rx
    }

    fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if !matches!(event, ServerEvent::OnlineUsers(_)) {
                events.push(event);
            }
        }
        events
    }

    #[tokio::test]
    async fn test_hello_is_seen_end_to_end() {
        let (service, x, y) = service();
        let mut x_rx = online(&service, x).await;
        let mut y_rx = online(&service, y).await;

        let sent = service.send(x, y, text("hello")).await.unwrap();
        assert_eq!(sent.sender.full_name, "Xavier");
        assert!(matches!(&drain(&mut y_rx)[..], [ServerEvent::NewMessage(v)] if v.message.id == sent.message.id));
        assert_eq!(drain(&mut x_rx).len(), 1);

        let sidebar = service.sidebar_summary(y).unwrap();
        let preview = &sidebar.last_messages[&x];
        assert_eq!(preview.text, "hello");
        assert!(!preview.seen);
        assert_eq!(sidebar.unseen_messages.get(&x), Some(&1));

        let messages = service.fetch_conversation(y, x).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].seen);

        let events = drain(&mut x_rx);
        assert_eq!(
            events,
            vec![ServerEvent::MessageSeen(MessageSeen {
                message_id: sent.message.id,
                seen_by: y,
                chat_id: x,
            })]
        );
        let sidebar = service.sidebar_summary(y).unwrap();
        assert_eq!(sidebar.unseen_messages.get(&x), None);
        assert!(sidebar.last_messages[&x].seen);
    }

    #[tokio::test]
    async fn test_refetch_does_not_reemit_seen() {
        let (service, x, y) = service();
        let mut x_rx = online(&service, x).await;
        service.send(x, y, text("one")).await.unwrap();
        service.fetch_conversation(y, x).await.unwrap();
        drain(&mut x_rx);

        service.fetch_conversation(y, x).await.unwrap();
        assert!(drain(&mut x_rx).is_empty());
    }

    #[tokio::test]
    async fn test_empty_message_is_rejected() {
        let (service, x, y) = service();
        let err = service.send(x, y, text("   ")).await.unwrap_err();
        assert!(matches!(err, ServerError::Chat(ChatError::Validation(_))));
    }

    #[tokio::test]
    async fn test_unknown_receiver_is_not_found() {
        let (service, x, _) = service();
        let err = service.send(x, UserId::new(), text("hi")).await.unwrap_err();
        assert!(matches!(err, ServerError::Chat(ChatError::NotFound(m)) if m == "User not found"));
    }

    #[tokio::test]
    async fn test_failed_upload_degrades_to_text() {
        let (service, x, y) = service_with(Arc::new(BrokenImages));
        let sent = service
            .send(
                x,
                y,
                SendMessageRequest {
                    text: "look".into(),
                    image: Some(PNG.into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(sent.message.text, "look");
        assert!(sent.message.image.is_none());

        let err = service
            .send(
                x,
                y,
                SendMessageRequest {
                    text: String::new(),
                    image: Some(PNG.into()),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Chat(ChatError::Dependency(m)) if m == UPLOAD_FAILED));
    }

    #[tokio::test]
    async fn test_mark_seen_is_receiver_only_and_always_notifies() {
        let (service, x, y) = service();
        let mut x_rx = online(&service, x).await;
        let sent = service.send(x, y, text("ping")).await.unwrap();
        drain(&mut x_rx);

        let err = service.mark_seen(x, sent.message.id).await.unwrap_err();
        assert!(matches!(err, ServerError::Chat(ChatError::Authorization(_))));

        service.mark_seen(y, sent.message.id).await.unwrap();
        service.mark_seen(y, sent.message.id).await.unwrap();
        let events = drain(&mut x_rx);
        assert_eq!(events.len(), 2);
        assert!(events
            .iter()
            .all(|e| matches!(e, ServerEvent::MessageSeen(s) if s.message_id == sent.message.id)));

        let err = service.mark_seen(y, MessageId::new()).await.unwrap_err();
        assert!(matches!(err, ServerError::Chat(ChatError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_tailors_payload_per_participant() {
        let images = Arc::new(MemoryImages::default());
        let (service, x, y) = service_with(images.clone());
        let mut x_rx = online(&service, x).await;
        let mut y_rx = online(&service, y).await;

        let first = service.send(x, y, text("first")).await.unwrap();
        let second = service
            .send(
                x,
                y,
                SendMessageRequest {
                    text: String::new(),
                    image: Some(PNG.into()),
                },
            )
            .await
            .unwrap();
        drain(&mut x_rx);
        drain(&mut y_rx);

        let err = service.delete(y, second.message.id).await.unwrap_err();
        assert!(matches!(err, ServerError::Chat(ChatError::Authorization(_))));

        service.delete(x, second.message.id).await.unwrap();
        assert_eq!(images.destroyed.lock().unwrap().len(), 1);

        let expect = |conversation_id| {
            vec![
                ServerEvent::DeleteMessage(DeleteMessage {
                    message_id: second.message.id,
                    conversation_id,
                    new_last_message: Some(first.message.clone()),
                }),
                ServerEvent::MessageDeleted(MessageDeleted {
                    message_id: second.message.id,
                }),
            ]
        };
        assert_eq!(drain(&mut x_rx), expect(y));
        assert_eq!(drain(&mut y_rx), expect(x));
    }

    #[tokio::test]
    async fn test_deleting_last_message_clears_previews() {
        let (service, x, y) = service_with(Arc::new(BrokenImages));
        let mut y_rx = online(&service, y).await;
        let only = service.send(x, y, text("only")).await.unwrap();
        drain(&mut y_rx);

        service.delete(x, only.message.id).await.unwrap();
        assert!(matches!(
            &drain(&mut y_rx)[0],
            ServerEvent::DeleteMessage(d) if d.new_last_message.is_none()
        ));
        assert!(service.sidebar_summary(x).unwrap().last_messages.is_empty());
        assert!(service.sidebar_summary(y).unwrap().last_messages.is_empty());
    }

    #[tokio::test]
    async fn test_profile_update_broadcasts_even_when_avatar_fails() {
        let (service, x, y) = service_with(Arc::new(BrokenImages));
        let mut y_rx = online(&service, y).await;

        let (user, message) = service
            .update_profile(
                x,
                UpdateProfileRequest {
                    full_name: "Xavier B.".into(),
                    bio: "hi".into(),
                    profile_pic: Some(PNG.into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(user.full_name, "Xavier B.");
        assert_eq!(message, PROFILE_UPDATED_WITHOUT_PICTURE);
        assert_eq!(
            drain(&mut y_rx),
            vec![ServerEvent::UserProfileUpdated(ProfileUpdated::from(&user))]
        );

        let err = service
            .update_profile(
                x,
                UpdateProfileRequest {
                    full_name: " ".into(),
                    bio: String::new(),
                    profile_pic: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Chat(ChatError::Validation(_))));
    }

    #[tokio::test]
    async fn test_registered_users_can_message() {
        let (service, x, _) = service();
        let zoe = UserId::new();
        let user = service
            .register_user(
                zoe,
                RegisterUserRequest {
                    full_name: " Zoe ".into(),
                    bio: String::new(),
                    profile_pic: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(user.full_name, "Zoe");

        let sent = service.send(x, zoe, text("welcome")).await.unwrap();
        assert_eq!(sent.receiver.full_name, "Zoe");
        assert_eq!(service.sidebar_summary(zoe).unwrap().users.len(), 2);
    }

    #[tokio::test]
    async fn test_users_listing_carries_unseen_counts() {
        let (service, x, y) = service();
        service.send(x, y, text("a")).await.unwrap();
        service.send(x, y, text("b")).await.unwrap();

        let listing = service.users_with_unseen(y).unwrap();
        assert_eq!(listing.users.len(), 1);
        assert_eq!(listing.users[0].id, x);
        assert_eq!(listing.unseen_messages.get(&x), Some(&2));
    }

    #[tokio::test]
    async fn test_last_seen_is_touched() {
        let (service, x, _) = service();
        service.touch_last_seen(x);
        service.touch_last_seen(UserId::new());
        let user = service.with_db(|db| db.get_user(x)).unwrap();
        assert!(user.last_seen.is_some());
    }
}
