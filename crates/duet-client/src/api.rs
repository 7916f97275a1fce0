//! REST client for the chat server.

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use duet_shared::constants::USER_ID_HEADER;
use duet_shared::protocol::{
    ConversationResponse, FailureResponse, RegisterUserRequest, SendMessageRequest,
    SendMessageResponse, SidebarSummary, SuccessResponse, UpdateProfileRequest,
    UpdateProfileResponse, UserResponse,
};
use duet_shared::{ChatError, Message, MessageId, MessageView, UserId, UserProfile};

use crate::config::ClientConfig;
use crate::error::ClientError;

/// Calls the REST routes on behalf of one user. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ChatApi {
    http: Client,
    base_url: String,
    user: UserId,
}

impl ChatApi {
    pub fn new(config: &ClientConfig, user: UserId) -> Result<Self, ClientError> {
        let http = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            http,
            base_url: config.server_url.clone(),
            user,
        })
    }

    pub fn user(&self) -> UserId {
        self.user
    }

    /// Act as another user from now on. Clones made earlier keep the old one.
    pub fn set_user(&mut self, user: UserId) {
        self.user = user;
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{path}", self.base_url)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header(USER_ID_HEADER, self.user.to_string())
    }

    /// Send a request and decode the success body, or turn the failure body
    /// into a [`ChatError`].
    async fn execute<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ClientError> {
        let resp = self.authed(builder).send().await?;
        let status = resp.status();

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(failure(status, &body).into());
        }

        Ok(resp.json::<T>().await?)
    }

    /// Messages with `other`, oldest first. The server marks the ones `other`
    /// sent as seen.
    pub async fn conversation(&self, other: UserId) -> Result<Vec<Message>, ClientError> {
        let resp: ConversationResponse = self
            .execute(self.http.get(self.url(&format!("/messages/conversation/{other}"))))
            .await?;
        debug!(other = %other, count = resp.messages.len(), "Fetched conversation");
        Ok(resp.messages)
    }

    pub async fn mark_seen(&self, message_id: MessageId) -> Result<(), ClientError> {
        let _: SuccessResponse = self
            .execute(self.http.get(self.url(&format!("/messages/mark/{message_id}"))))
            .await?;
        Ok(())
    }

    pub async fn send(
        &self,
        other: UserId,
        request: &SendMessageRequest,
    ) -> Result<MessageView, ClientError> {
        let resp: SendMessageResponse = self
            .execute(
                self.http
                    .post(self.url(&format!("/messages/send/{other}")))
                    .json(request),
            )
            .await?;
        Ok(resp.new_message)
    }

    pub async fn delete(&self, message_id: MessageId) -> Result<(), ClientError> {
        let _: SuccessResponse = self
            .execute(
                self.http
                    .delete(self.url(&format!("/messages/delete/{message_id}"))),
            )
            .await?;
        Ok(())
    }

    pub async fn sidebar_summary(&self) -> Result<SidebarSummary, ClientError> {
        self.execute(self.http.get(self.url("/messages/sidebar-summary")))
            .await
    }

    pub async fn sync_user(&self, request: &RegisterUserRequest) -> Result<UserProfile, ClientError> {
        let resp: UserResponse = self
            .execute(self.http.post(self.url("/auth/sync-user")).json(request))
            .await?;
        Ok(resp.user)
    }

    pub async fn update_profile(
        &self,
        request: &UpdateProfileRequest,
    ) -> Result<UpdateProfileResponse, ClientError> {
        self.execute(self.http.put(self.url("/auth/update-profile")).json(request))
            .await
    }
}

/// Map a failed response to the shared taxonomy, keeping the server's
/// message when the body carries one.
fn failure(status: StatusCode, body: &str) -> ChatError {
    let message = serde_json::from_str::<FailureResponse>(body)
        .map(|f| f.message)
        .unwrap_or_else(|_| {
            status
                .canonical_reason()
                .unwrap_or("Request failed")
                .to_string()
        });
    ChatError::from_status(status.as_u16(), message)
}
