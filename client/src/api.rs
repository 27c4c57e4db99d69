#[cfg(test)]
#[path = "api_test.rs"]
mod tests;

use std::time;

use eyre::{Context, Result, bail};
use log::debug;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use chatbridge_models::wire::{
    AdminSessionInfo, AdminSessionListResponse, ApiKeyCreateResponse, ApiKeyInfo,
    ApiKeyListResponse, MessageInfo, MessageListResponse, SessionCreateOptions,
    SessionCreateResponse, SessionInfo, SessionListResponse, SessionTitleResponse,
};
use chatbridge_models::{ApiConnection, Kind, Message, Role, StreamHandlers};

use crate::stream::run_stream;

const SESSION_HEADER: &str = "X-Session-Id";
const ADMIN_HEADER: &str = "X-Admin-Key";
const DEFAULT_MODEL: &str = "claude";

/// Stateless request wrapper bound to one `(base_url, api_key)` pair.
/// Non-2xx responses fail with `HTTP <status>: <body>`; no retries happen
/// at this layer.
#[derive(Debug, Clone)]
pub struct BackendClient {
    base_url: String,
    api_key: String,
    model: String,
    timeout: Option<time::Duration>,
    client: reqwest::Client,
}

impl BackendClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: time::Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Connectivity and auth probe. Transport errors are swallowed; only a
    /// 2xx on the session list counts as reachable.
    pub async fn test_connection(&self) -> bool {
        let req = self.get(&format!("{}/api/sessions", self.base_url), None);
        match req.send().await {
            Ok(res) => res.status().is_success(),
            Err(err) => {
                debug!("connection test failed: {}", err);
                false
            }
        }
    }

    pub async fn create_session(&self, options: &SessionCreateOptions) -> Result<String> {
        let res = self
            .post(&format!("{}/api/sessions", self.base_url), None)
            .json(options)
            .send()
            .await
            .wrap_err("creating session")?;
        let res: SessionCreateResponse = check(res).await?.json().await.wrap_err(
            "parsing session create response",
        )?;
        Ok(res.session_id)
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionInfo>> {
        let res = self
            .get(&format!("{}/api/sessions", self.base_url), None)
            .send()
            .await
            .wrap_err("listing sessions")?;
        let res: SessionListResponse = check(res)
            .await?
            .json()
            .await
            .wrap_err("parsing session list response")?;
        Ok(res.sessions)
    }

    pub async fn list_messages(&self, session_id: &str) -> Result<Vec<MessageInfo>> {
        let res = self
            .get(
                &format!("{}/api/sessions/{}/messages", self.base_url, session_id),
                None,
            )
            .send()
            .await
            .wrap_err("listing messages")?;
        let res: MessageListResponse = check(res)
            .await?
            .json()
            .await
            .wrap_err("parsing message list response")?;
        Ok(res.messages)
    }

    /// Renames a session server side, returning the canonical title.
    pub async fn update_session_title(&self, session_id: &str, title: &str) -> Result<String> {
        let res = self
            .client
            .patch(format!("{}/api/sessions/{}", self.base_url, session_id))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "title": title }))
            .send()
            .await
            .wrap_err("renaming session")?;
        let res: SessionTitleResponse = check(res)
            .await?
            .json()
            .await
            .wrap_err("parsing rename response")?;
        Ok(res.title)
    }

    /// Best-effort interrupt of the in-flight turn. The response body is
    /// ignored.
    pub async fn interrupt(&self, session_id: &str) -> Result<()> {
        let res = self
            .post(&format!("{}/api/interrupt", self.base_url), Some(session_id))
            .send()
            .await
            .wrap_err("interrupting session")?;
        check(res).await?;
        Ok(())
    }

    pub async fn admin_list_sessions(&self, admin_key: &str) -> Result<Vec<AdminSessionInfo>> {
        let res = self
            .client
            .get(format!("{}/api/admin/sessions", self.base_url))
            .header(ADMIN_HEADER, admin_key)
            .send()
            .await
            .wrap_err("listing admin sessions")?;
        let res: AdminSessionListResponse = check(res)
            .await?
            .json()
            .await
            .wrap_err("parsing admin session list response")?;
        Ok(res.sessions)
    }

    pub async fn admin_list_messages(
        &self,
        admin_key: &str,
        session_id: &str,
    ) -> Result<Vec<MessageInfo>> {
        let res = self
            .client
            .get(format!(
                "{}/api/admin/sessions/{}/messages",
                self.base_url, session_id
            ))
            .header(ADMIN_HEADER, admin_key)
            .send()
            .await
            .wrap_err("listing admin messages")?;
        let res: MessageListResponse = check(res)
            .await?
            .json()
            .await
            .wrap_err("parsing admin message list response")?;
        Ok(res.messages)
    }

    pub async fn admin_list_api_keys(&self, admin_key: &str) -> Result<Vec<ApiKeyInfo>> {
        let res = self
            .client
            .get(format!("{}/api/admin/apikeys", self.base_url))
            .header(ADMIN_HEADER, admin_key)
            .send()
            .await
            .wrap_err("listing api keys")?;
        let res: ApiKeyListResponse = check(res)
            .await?
            .json()
            .await
            .wrap_err("parsing api key list response")?;
        Ok(res.api_keys)
    }

    pub async fn admin_create_api_key(
        &self,
        admin_key: &str,
        expires_at: Option<&str>,
    ) -> Result<ApiKeyCreateResponse> {
        let mut req = self
            .client
            .post(format!("{}/api/admin/apikeys", self.base_url))
            .header(ADMIN_HEADER, admin_key);
        // Body and content type are omitted entirely when no expiry is set.
        if let Some(expires_at) = expires_at {
            req = req.json(&serde_json::json!({ "expires_at": expires_at }));
        }
        let res = req.send().await.wrap_err("creating api key")?;
        let res: ApiKeyCreateResponse = check(res)
            .await?
            .json()
            .await
            .wrap_err("parsing api key create response")?;
        Ok(res)
    }

    pub async fn admin_revoke_api_key(&self, admin_key: &str, api_key_id: &str) -> Result<()> {
        let res = self
            .client
            .post(format!(
                "{}/api/admin/apikeys/{}/revoke",
                self.base_url, api_key_id
            ))
            .header(ADMIN_HEADER, admin_key)
            .send()
            .await
            .wrap_err("revoking api key")?;
        check(res).await?;
        Ok(())
    }

    /// Opens the streaming completion for one turn and drives it to
    /// completion through `handlers`. Only plain `message`-kind entries are
    /// replayed to the model; status, tool and result entries never leave
    /// the client.
    pub async fn stream_chat(
        &self,
        session_id: &str,
        messages: &[Message],
        handlers: &mut dyn StreamHandlers,
        cancel: CancellationToken,
    ) -> Result<()> {
        let payload = CompletionRequest {
            model: self.model.clone(),
            stream: true,
            messages: messages
                .iter()
                .filter(|msg| msg.kind() == Kind::Message)
                .map(|msg| MessageRequest {
                    role: msg.role(),
                    content: msg.content().to_string(),
                })
                .collect(),
        };

        debug!(
            "opening chat stream: session={} messages={}",
            session_id,
            payload.messages.len()
        );

        let request = self
            .post(&format!("{}/v1/chat/completions", self.base_url), Some(session_id))
            .json(&payload)
            .send();
        // Cancellation must also abort a request still waiting for response
        // headers, not just an open body.
        let res = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("completion request aborted before a response arrived");
                return Ok(());
            }
            res = request => res.wrap_err("sending completion request")?,
        };
        let res = check(res).await?;
        if cancel.is_cancelled() {
            return Ok(());
        }

        run_stream(res, handlers, cancel).await;
        Ok(())
    }

    fn get(&self, url: &str, session_id: Option<&str>) -> reqwest::RequestBuilder {
        self.request(self.client.get(url), session_id)
    }

    fn post(&self, url: &str, session_id: Option<&str>) -> reqwest::RequestBuilder {
        self.request(self.client.post(url), session_id)
    }

    fn request(
        &self,
        mut req: reqwest::RequestBuilder,
        session_id: Option<&str>,
    ) -> reqwest::RequestBuilder {
        req = req.bearer_auth(&self.api_key);
        if let Some(session_id) = session_id {
            req = req.header(SESSION_HEADER, session_id);
        }
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }
        req
    }
}

impl From<&ApiConnection> for BackendClient {
    fn from(connection: &ApiConnection) -> Self {
        Self::new(connection.base_url(), connection.api_key())
    }
}

async fn check(res: reqwest::Response) -> Result<reqwest::Response> {
    if res.status().is_success() {
        return Ok(res);
    }
    let status = res.status().as_u16();
    let body = res.text().await.unwrap_or_default();
    bail!("HTTP {}: {}", status, body)
}

#[derive(Debug, Clone, Serialize)]
struct MessageRequest {
    role: Role,
    content: String,
}

#[derive(Debug, Clone, Serialize)]
struct CompletionRequest {
    model: String,
    stream: bool,
    messages: Vec<MessageRequest>,
}
