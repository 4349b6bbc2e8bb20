//! Client for the AwoX Smart Connect cloud, where the mesh credentials and the
//! device list of an account live.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::config::DeviceConfig;
use crate::error::AwoxError;
use crate::mesh::MeshCredentials;

pub const AWOX_CONNECT_URL: &str = "https://l4hparse-prod.awox.cloud/parse/";
pub const AWOX_HOME_CONTROL_URL: &str = "https://l4hparse-hc-prod.awox.cloud/parse/";
pub const AWOX_CONNECT_APPLICATION_ID: &str = "55O69FLtoxPt67LLwaHGpHmVWndhZGn9Wty8PLrJ";
pub const AWOX_CONNECT_CLIENT_KEY: &str = "PyR3yV65rytEicteNlQHSVNpAGvCByOrsLiEqJtI";

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(rename = "objectId")]
    object_id: String,
    #[serde(rename = "sessionToken")]
    session_token: String,
}

#[derive(Debug, Deserialize)]
struct ResultsResponse {
    results: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct AwoxConnect {
    client: Client,
    username: String,
    password: String,
    installation_id: String,
    primary_url: String,
    fallback_url: String,
    api_url: String,
    object_id: Option<String>,
    session_token: Option<String>,
}

impl AwoxConnect {
    /// Creates a client. Nothing is sent until [`AwoxConnect::login`].
    ///
    /// A random installation id is used unless one is given.
    pub fn new(username: &str, password: &str, installation_id: Option<String>) -> Self {
        AwoxConnect {
            client: Client::new(),
            username: username.to_string(),
            password: password.to_string(),
            installation_id: installation_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            primary_url: AWOX_CONNECT_URL.to_string(),
            fallback_url: AWOX_HOME_CONTROL_URL.to_string(),
            api_url: AWOX_CONNECT_URL.to_string(),
            object_id: None,
            session_token: None,
        }
    }

    /// Creates a client and logs in.
    pub async fn connect(username: &str, password: &str) -> Result<Self> {
        let mut connect = Self::new(username, password, None);
        connect.login().await?;
        Ok(connect)
    }

    /// Points the client at other Parse servers.
    pub fn with_base_urls(mut self, primary_url: &str, fallback_url: &str) -> Self {
        self.primary_url = primary_url.to_string();
        self.fallback_url = fallback_url.to_string();
        self.api_url = primary_url.to_string();
        self
    }

    /// The server that accepted the login.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn is_logged_in(&self) -> bool {
        self.session_token.is_some()
    }

    async fn post(&self, base_url: &str, path: &str, body: &Value) -> Result<Response> {
        let url = format!("{}{}", base_url, path);
        debug!("POST {}", url);
        let mut request = self
            .client
            .post(&url)
            .header("x-parse-application-id", AWOX_CONNECT_APPLICATION_ID)
            .header("x-parse-installation-id", &self.installation_id)
            .header("x-parse-client-key", AWOX_CONNECT_CLIENT_KEY)
            .header("content-type", "application/json");
        if let Some(token) = &self.session_token {
            request = request.header("x-parse-session-token", token);
        }

        request
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", url))
    }

    /// Logs in, falling back to the home control server when the main one refuses.
    pub async fn login(&mut self) -> Result<()> {
        let body = json!({
            "username": self.username,
            "password": self.password,
            "_method": "GET",
        });

        let mut response = self.post(&self.primary_url, "login", &body).await?;
        if response.status() != StatusCode::OK {
            info!(
                "Login on {} failed with status {}, trying {}",
                self.primary_url,
                response.status(),
                self.fallback_url
            );
            self.api_url = self.fallback_url.clone();
            response = self.post(&self.fallback_url, "login", &body).await?;
            if response.status() != StatusCode::OK {
                let message = error_message(response).await;
                return Err(AwoxError::LoginFailed(message).into());
            }
        }

        let login: LoginResponse = response
            .json()
            .await
            .context("Failed to deserialize login response")?;
        info!("Logged in to AwoX Smart Connect as {}", self.username);
        self.object_id = Some(login.object_id);
        self.session_token = Some(login.session_token);
        Ok(())
    }

    /// Fetches all objects of a Parse class owned by the logged in user.
    pub async fn fetch_class(&self, class_name: &str) -> Result<Vec<Value>> {
        let object_id = self
            .object_id
            .as_ref()
            .ok_or_else(|| AwoxError::CloudRequest("not logged in".to_string()))?;
        let body = json!({
            "where": {
                "owner": {"__type": "Pointer", "className": "_User", "objectId": object_id}
            },
            "_method": "GET",
        });

        let response = self
            .post(&self.api_url, &format!("classes/{}", class_name), &body)
            .await?;
        if response.status() != StatusCode::OK {
            let message = error_message(response).await;
            return Err(AwoxError::CloudRequest(message).into());
        }

        let results: ResultsResponse = response
            .json()
            .await
            .with_context(|| format!("Failed to deserialize {} results", class_name))?;
        Ok(results.results)
    }

    /// Mesh name, password and long term key stored for the account, if any.
    pub async fn credentials(&self) -> Result<Option<MeshCredentials>> {
        let credentials = self.fetch_class("Credential").await?;
        mesh_credentials(&credentials)
    }

    /// Raw `Device` objects of the account.
    pub async fn devices(&self) -> Result<Vec<Value>> {
        self.fetch_class("Device").await
    }
}

async fn error_message(response: Response) -> String {
    let status = response.status();
    response
        .json::<Value>()
        .await
        .ok()
        .and_then(|body| body.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| format!("status {}", status))
}

/// Picks the mesh entry out of the `Credential` objects.
pub fn mesh_credentials(credentials: &[Value]) -> Result<Option<MeshCredentials>> {
    let entry = match credentials
        .iter()
        .find(|c| c.get("service").and_then(Value::as_str) == Some("mesh"))
    {
        Some(entry) => entry,
        None => return Ok(None),
    };

    let field = |name: &str| -> Result<String> {
        entry
            .get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AwoxError::CloudRequest(format!("mesh credential without {}", name)).into())
    };

    Ok(Some(MeshCredentials {
        name: field("client_id")?,
        password: field("access_token")?,
        long_term_key: field("refresh_token")?,
    }))
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn parse_address(value: &Value) -> Option<u16> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn is_empty_address(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Number(n) => n.as_u64() == Some(0),
        _ => false,
    }
}

/// Turns raw cloud devices into device entries, skipping incomplete ones.
pub fn mesh_devices(raw: &[Value]) -> Vec<DeviceConfig> {
    let mut devices = Vec::new();

    for device in raw {
        debug!("Processing device - {}", device);
        let device_type = match device.get("type").and_then(value_to_string) {
            Some(t) => t,
            None => {
                warn!("Skipped device, missing type - {}", device);
                continue;
            }
        };
        let address = match device.get("address") {
            Some(address) if !is_empty_address(address) => address,
            _ => {
                warn!("Skipped device, missing address - {}", device);
                continue;
            }
        };
        let mesh_id = match parse_address(address) {
            Some(mesh_id) => mesh_id,
            None => {
                warn!("Skipped device, invalid address - {}", device);
                continue;
            }
        };
        let mac = match device.get("macAddress").and_then(value_to_string) {
            Some(mac) => mac,
            None => {
                warn!("Skipped device, missing macAddress - {}", device);
                continue;
            }
        };
        let name = match device.get("displayName").and_then(value_to_string) {
            Some(name) => name,
            None => {
                warn!("Skipped device, missing displayName - {}", device);
                continue;
            }
        };

        let text_or_unknown = |key: &str| {
            device
                .get(key)
                .and_then(value_to_string)
                .unwrap_or_else(|| "unknown".to_string())
        };

        devices.push(DeviceConfig {
            mesh_id,
            name,
            mac,
            model: text_or_unknown("modelName"),
            manufacturer: text_or_unknown("vendor"),
            firmware: text_or_unknown("version"),
            hardware: device.get("hardwareVersion").and_then(value_to_string),
            device_type,
        });
    }

    devices
}
