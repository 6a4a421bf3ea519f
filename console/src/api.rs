//! REST client for the mail-assistant backend.
//!
//! Every call carries the session token both as the `jwt-token` cookie and as
//! a bearer header. List endpoints tolerate `null` and empty bodies, which the
//! backend produces for users with no rows.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, COOKIE, LOCATION};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use shared_types::{
    Context, ContextRequest, Notification, SpamEmail, Task, TaskRequest, UpdateUserRequest, User,
    SESSION_COOKIE,
};
use tracing::debug;
use url::Url;

use crate::config::Config;
use crate::error::{ConsoleError, Result};

#[derive(Debug, Clone)]
pub struct ApiClient {
    base: Url,
    token: Option<String>,
    http: reqwest::Client,
    /// Same timeout as `http`, but reports redirects instead of following them
    login_http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let base = Url::parse(base_url)?;
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let login_http = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            base,
            token,
            http,
            login_http,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.base_url, config.token.clone(), config.request_timeout)
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base.join(path)?)
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let url = self.endpoint(path)?;
        debug!(%method, %url, "api request");
        let mut builder = self.http.request(method, url);
        if let Some(token) = &self.token {
            builder = builder
                .header(COOKIE, format!("{SESSION_COOKIE}={token}"))
                .header(AUTHORIZATION, format!("Bearer {token}"));
        }
        Ok(builder)
    }

    // ------------------------------------------------------------------
    // Tasks
    // ------------------------------------------------------------------

    pub async fn list_tasks(&self) -> Result<Vec<Task>> {
        let response = self.request(Method::GET, "/api/tasks")?.send().await?;
        read_list(response).await
    }

    pub async fn get_task(&self, id: &str) -> Result<Task> {
        let response = self
            .request(Method::GET, &format!("/api/tasks/{id}"))?
            .send()
            .await?;
        read_one(response).await
    }

    pub async fn create_task(&self, request: &TaskRequest) -> Result<Task> {
        let response = self
            .request(Method::POST, "/api/tasks")?
            .json(request)
            .send()
            .await?;
        read_one(response).await
    }

    /// `POST /api/tasks/:id`; used to attach context to an existing task.
    pub async fn update_task(&self, id: &str, request: &TaskRequest) -> Result<()> {
        let response = self
            .request(Method::POST, &format!("/api/tasks/{id}"))?
            .json(request)
            .send()
            .await?;
        expect_success(response).await
    }

    pub async fn delete_task(&self, id: &str) -> Result<()> {
        let response = self
            .request(Method::DELETE, &format!("/api/tasks/{id}"))?
            .send()
            .await?;
        expect_success(response).await
    }

    // ------------------------------------------------------------------
    // Contexts
    // ------------------------------------------------------------------

    pub async fn list_contexts(&self) -> Result<Vec<Context>> {
        let response = self.request(Method::GET, "/api/contexts")?.send().await?;
        read_list(response).await
    }

    pub async fn create_context(&self, request: &ContextRequest) -> Result<Context> {
        let response = self
            .request(Method::POST, "/api/contexts")?
            .json(request)
            .send()
            .await?;
        read_one(response).await
    }

    pub async fn update_context(&self, id: &str, request: &ContextRequest) -> Result<()> {
        let response = self
            .request(Method::POST, &format!("/api/contexts/{id}"))?
            .json(request)
            .send()
            .await?;
        expect_success(response).await
    }

    pub async fn delete_context(&self, id: &str) -> Result<()> {
        let response = self
            .request(Method::DELETE, &format!("/api/contexts/{id}"))?
            .send()
            .await?;
        expect_success(response).await
    }

    // ------------------------------------------------------------------
    // Spam queue
    // ------------------------------------------------------------------

    pub async fn list_spams(&self) -> Result<Vec<SpamEmail>> {
        let response = self.request(Method::GET, "/api/spams")?.send().await?;
        read_list(response).await
    }

    pub async fn delete_spam(&self, id: &str) -> Result<()> {
        let response = self
            .request(Method::DELETE, &format!("/api/spams/{id}"))?
            .send()
            .await?;
        expect_success(response).await
    }

    /// Move a falsely flagged email back to the inbox.
    pub async fn move_spam_back(&self, id: &str) -> Result<()> {
        let response = self
            .request(Method::POST, &format!("/api/spams/{id}/moveback"))?
            .send()
            .await?;
        expect_success(response).await
    }

    // ------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------

    pub async fn list_messages(&self, task_id: Option<&str>) -> Result<Vec<Notification>> {
        let mut builder = self.request(Method::GET, "/api/messages")?;
        if let Some(task_id) = task_id {
            builder = builder.query(&[("taskId", task_id)]);
        }
        let response = builder.send().await?;
        read_list(response).await
    }

    pub async fn mark_message_read(&self, id: &str) -> Result<()> {
        let response = self
            .request(Method::POST, &format!("/api/messages/{id}"))?
            .send()
            .await?;
        expect_success(response).await
    }

    // ------------------------------------------------------------------
    // Account
    // ------------------------------------------------------------------

    pub async fn me(&self) -> Result<User> {
        let response = self.request(Method::GET, "/api/me")?.send().await?;
        read_one(response).await
    }

    pub async fn update_me(&self, request: &UpdateUserRequest) -> Result<()> {
        let response = self
            .request(Method::POST, "/api/me")?
            .json(request)
            .send()
            .await?;
        expect_success(response).await
    }

    /// Resolve where `/api/login` sends the browser.
    ///
    /// Falls back to the login endpoint itself when the backend does not answer
    /// with a redirect.
    pub async fn login_redirect(&self) -> Result<Url> {
        let login = self.endpoint("/api/login")?;
        let response = self.login_http.get(login.clone()).send().await?;
        if response.status().is_redirection() {
            if let Some(location) = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
            {
                return Ok(login.join(location)?);
            }
        }
        Ok(login)
    }
}

async fn describe_http_error(response: Response) -> ConsoleError {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return ConsoleError::Unauthorized;
    }

    let body = response.text().await.unwrap_or_default();
    let message = if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string()
    } else if let Ok(json) = serde_json::from_str::<serde_json::Value>(&body) {
        json.get("error")
            .or_else(|| json.get("message"))
            .and_then(|v| v.as_str())
            .map(ToString::to_string)
            .unwrap_or_else(|| body.trim().to_string())
    } else {
        body.trim().to_string()
    };

    ConsoleError::Http {
        status: status.as_u16(),
        message,
    }
}

async fn expect_success(response: Response) -> Result<()> {
    if !response.status().is_success() {
        return Err(describe_http_error(response).await);
    }
    Ok(())
}

async fn read_one<T: DeserializeOwned>(response: Response) -> Result<T> {
    if !response.status().is_success() {
        return Err(describe_http_error(response).await);
    }
    let status = response.status().as_u16();
    let body = response.text().await?;
    if body.trim().is_empty() {
        return Err(ConsoleError::Http {
            status,
            message: "empty response body".to_string(),
        });
    }
    Ok(serde_json::from_str(&body)?)
}

async fn read_list<T: DeserializeOwned>(response: Response) -> Result<Vec<T>> {
    if !response.status().is_success() {
        return Err(describe_http_error(response).await);
    }
    let body = response.text().await?;
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str::<Option<Vec<T>>>(&body)?.unwrap_or_default())
}
