//! Low-level HTTP plumbing shared by every `HypervisorApi` call.

use std::collections::HashMap;
use std::sync::Arc;

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::auth::{Auth, ConnectionProfile};
use crate::error::{Error, Result};
use crate::task::TaskId;
use crate::types::ApiEnvelope;

#[derive(Debug, Default)]
struct Ticket {
    csrf_token: String,
    cookie: String,
}

/// A connection to one Proxmox VE cluster, reachable through any of its
/// nodes' REST endpoints.
pub struct PveClient {
    http: reqwest::Client,
    base_url: String,
    profile: ConnectionProfile,
    ticket: Arc<Mutex<Option<Ticket>>>,
}

impl PveClient {
    pub fn new(profile: ConnectionProfile) -> Result<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(!profile.verify_tls)
            .build()?;
        let base_url = profile.base_url();
        Ok(Self {
            http,
            base_url,
            profile,
            ticket: Arc::new(Mutex::new(None)),
        })
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    async fn ensure_ticket(&self) -> Result<()> {
        let Auth::Password { user, password } = &self.profile.auth else {
            return Ok(());
        };
        let mut guard = self.ticket.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let url = format!("{}/access/ticket", self.base_url);
        let resp = self
            .http
            .post(&url)
            .form(&[("username", user.as_str()), ("password", password.as_str())])
            .send()
            .await?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            return Err(Error::Auth(format!("login rejected for {user}")));
        }
        if !resp.status().is_success() {
            return Err(Error::Api {
                status: resp.status().as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }

        #[derive(serde::Deserialize)]
        struct TicketData {
            ticket: String,
            #[serde(rename = "CSRFPreventionToken")]
            csrf: String,
        }
        let envelope: ApiEnvelope<TicketData> = resp.json().await?;
        *guard = Some(Ticket {
            csrf_token: envelope.data.csrf,
            cookie: format!("PVEAuthCookie={}", envelope.data.ticket),
        });
        Ok(())
    }

    async fn apply_auth(&self, req: reqwest::RequestBuilder, mutating: bool) -> Result<reqwest::RequestBuilder> {
        match &self.profile.auth {
            Auth::Token {
                user,
                token_id,
                secret,
            } => Ok(req.header(
                "Authorization",
                format!("PVEAPIToken={user}!{token_id}={secret}"),
            )),
            Auth::Password { .. } => {
                self.ensure_ticket().await?;
                let guard = self.ticket.lock().await;
                let ticket = guard.as_ref().expect("ticket populated by ensure_ticket");
                let mut req = req.header("Cookie", ticket.cookie.clone());
                if mutating {
                    req = req.header("CSRFPreventionToken", ticket.csrf_token.clone());
                }
                Ok(req)
            }
        }
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        form: Option<&HashMap<&str, String>>,
    ) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%method, %url, "pve request");
        let mutating = method != Method::GET;
        let mut builder = self.http.request(method, &url);
        if let Some(form) = form {
            builder = builder.form(form);
        }
        builder = self.apply_auth(builder, mutating).await?;
        let resp = builder.send().await?;

        match resp.status() {
            StatusCode::NOT_FOUND => Err(Error::NotFound(path.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(Error::Auth(format!("rejected: {path}")))
            }
            status if status.is_success() => Ok(resp),
            status => {
                let body = resp.text().await.unwrap_or_default();
                if body.to_lowercase().contains("already exists") {
                    Err(Error::AlreadyExists(body))
                } else {
                    Err(Error::Api {
                        status: status.as_u16(),
                        body,
                    })
                }
            }
        }
    }

    /// Issue a request expecting a plain JSON-decodable `data` payload.
    pub(crate) async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self.send(Method::GET, path, None).await?;
        let envelope: ApiEnvelope<T> = resp.json().await?;
        Ok(envelope.data)
    }

    pub(crate) async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        form: &HashMap<&str, String>,
    ) -> Result<T> {
        let resp = self.send(Method::POST, path, Some(form)).await?;
        let envelope: ApiEnvelope<T> = resp.json().await?;
        Ok(envelope.data)
    }

    pub(crate) async fn put(&self, path: &str, form: &HashMap<&str, String>) -> Result<()> {
        self.send(Method::PUT, path, Some(form)).await?;
        Ok(())
    }

    pub(crate) async fn post(&self, path: &str, form: &HashMap<&str, String>) -> Result<()> {
        self.send(Method::POST, path, Some(form)).await?;
        Ok(())
    }

    pub(crate) async fn delete(&self, path: &str, form: Option<&HashMap<&str, String>>) -> Result<()> {
        self.send(Method::DELETE, path, form).await?;
        Ok(())
    }

    /// POST/DELETE that returns a hypervisor task UPID, wrapped with the
    /// node it runs on for later polling.
    pub(crate) async fn mutate_task(
        &self,
        node: &str,
        method: Method,
        path: &str,
        form: Option<&HashMap<&str, String>>,
    ) -> Result<TaskId> {
        let resp = self.send(method, path, form).await?;
        let envelope: ApiEnvelope<Value> = resp.json().await?;
        let upid = envelope
            .data
            .as_str()
            .ok_or_else(|| Error::Api {
                status: 0,
                body: "expected UPID string in response".to_string(),
            })?
            .to_string();
        Ok(TaskId {
            node: node.to_string(),
            upid,
        })
    }
}
