//! REST client for the hosted backend.
//!
//! Talks to the PostgREST endpoint (`/rest/v1`) for the profile table and to
//! the GoTrue endpoint (`/auth/v1`) for identity. One client serves both
//! roles so the access token obtained at sign-in authorizes table calls.

use std::sync::RwLock;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

use crate::auth::{AuthProvider, AuthSession, AuthUser, SignUpOutcome};
use crate::error::{GateError, Result};
use crate::remote::{ProfileRow, ProfileStore, ProgressUpdate, PROFILE_TABLE};

pub struct SupabaseClient {
    http: reqwest::Client,
    base_url: Url,
    anon_key: String,
    access_token: RwLock<Option<String>>,
}

/// Error body shapes used by both endpoints.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

impl SupabaseClient {
    pub fn new(base_url: &str, anon_key: impl Into<String>) -> Result<Self> {
        // A trailing slash keeps `join` from dropping the last path segment.
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalized)
            .map_err(|e| GateError::Config(format!("Failed to parse backend URL: {}", e)))?;

        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            anon_key: anon_key.into(),
            access_token: RwLock::new(None),
        })
    }

    fn set_access_token(&self, token: Option<String>) {
        *self.access_token.write().unwrap_or_else(|e| e.into_inner()) = token;
    }

    fn bearer(&self) -> String {
        self.access_token
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .unwrap_or_else(|| self.anon_key.clone())
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| GateError::Config(format!("Failed to build URL for {}: {}", path, e)))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http
            .request(method, url)
            .header("apikey", &self.anon_key)
            .bearer_auth(self.bearer())
    }

    /// Table URL filtered on one column, e.g. `users_profile?username=eq.bob`
    fn table_filter(&self, column: &str, value: &str, select: &str) -> Result<Url> {
        self.endpoint(&format!(
            "rest/v1/{}?{}=eq.{}&select={}",
            PROFILE_TABLE,
            column,
            urlencoding::encode(value),
            select
        ))
    }

    async fn read_error(resp: Response) -> (u16, String) {
        let status = resp.status().as_u16();
        let text = resp.text().await.unwrap_or_default();
        let body: ErrorBody = serde_json::from_str(&text).unwrap_or_default();
        let message = body
            .message
            .or(body.msg)
            .or(body.error_description)
            .unwrap_or(text);
        (status, message)
    }

    async fn rest_json<T: DeserializeOwned>(resp: Response) -> Result<T> {
        if !resp.status().is_success() {
            let (status, message) = Self::read_error(resp).await;
            return Err(GateError::Server { status, message });
        }
        resp.json()
            .await
            .map_err(|e| GateError::Decode(format!("profile response: {}", e)))
    }

    async fn auth_json<T: DeserializeOwned>(resp: Response) -> Result<T> {
        if !resp.status().is_success() {
            let (status, message) = Self::read_error(resp).await;
            return Err(GateError::Auth(format!("{} ({})", message, status)));
        }
        resp.json()
            .await
            .map_err(|e| GateError::Decode(format!("auth response: {}", e)))
    }

    async fn first_row(&self, column: &str, value: &str) -> Result<Option<ProfileRow>> {
        let url = self.table_filter(column, value, "*")?;
        let resp = self.request(Method::GET, url).send().await?;
        let rows: Vec<ProfileRow> = Self::rest_json(resp).await?;
        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl ProfileStore for SupabaseClient {
    async fn fetch_profile(&self, id: &str) -> Result<Option<ProfileRow>> {
        self.first_row("id", id).await
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<ProfileRow>> {
        self.first_row("username", username).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<ProfileRow>> {
        self.first_row("email", email).await
    }

    async fn insert_profile(&self, row: &ProfileRow) -> Result<()> {
        let url = self.endpoint(&format!("rest/v1/{}", PROFILE_TABLE))?;
        let resp = self
            .request(Method::POST, url)
            .header("Prefer", "return=minimal")
            .json(&[row])
            .send()
            .await?;

        if !resp.status().is_success() {
            let (status, message) = Self::read_error(resp).await;
            return Err(GateError::Server { status, message });
        }
        Ok(())
    }

    async fn update_progress(&self, id: &str, update: &ProgressUpdate) -> Result<u64> {
        // Ask for the touched ids back so a missing row shows up as an empty list.
        let url = self.table_filter("id", id, "id")?;
        let resp = self
            .request(Method::PATCH, url)
            .header("Prefer", "return=representation")
            .json(update)
            .send()
            .await?;

        let rows: Vec<serde_json::Value> = Self::rest_json(resp).await?;
        Ok(rows.len() as u64)
    }
}

#[async_trait]
impl AuthProvider for SupabaseClient {
    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome> {
        let url = self.endpoint("auth/v1/signup")?;
        let resp = self
            .request(Method::POST, url)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await?;

        let body: serde_json::Value = Self::auth_json(resp).await?;

        // With email confirmation on, the endpoint returns the bare user.
        if body.get("access_token").is_some() {
            let session: AuthSession = serde_json::from_value(body)?;
            self.set_access_token(Some(session.access_token.clone()));
            return Ok(SignUpOutcome {
                user: session.user.clone(),
                session: Some(session),
            });
        }

        let user: AuthUser = match body.get("user") {
            Some(user) => serde_json::from_value(user.clone())?,
            None => serde_json::from_value(body)?,
        };
        Ok(SignUpOutcome {
            user,
            session: None,
        })
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession> {
        let url = self.endpoint("auth/v1/token?grant_type=password")?;
        let resp = self
            .request(Method::POST, url)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await?;

        let session: AuthSession = Self::auth_json(resp).await?;
        self.set_access_token(Some(session.access_token.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<()> {
        let url = self.endpoint("auth/v1/logout")?;
        let result = self.request(Method::POST, url).send().await;
        // The local token goes away even if the server call fails.
        self.set_access_token(None);

        let resp = result?;
        if !resp.status().is_success() {
            let (status, message) = Self::read_error(resp).await;
            return Err(GateError::Auth(format!("{} ({})", message, status)));
        }
        Ok(())
    }

    async fn current_user(&self, session: &AuthSession) -> Result<AuthUser> {
        let url = self.endpoint("auth/v1/user")?;
        let resp = self
            .http
            .get(url)
            .header("apikey", &self.anon_key)
            .bearer_auth(&session.access_token)
            .send()
            .await?;

        let user: AuthUser = Self::auth_json(resp).await?;
        self.set_access_token(Some(session.access_token.clone()));
        Ok(user)
    }
}
