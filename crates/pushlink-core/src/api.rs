//! REST client for the push service
//!
//! Only the handful of endpoints the client needs:
//! - `GET /pushes` (delta and initial page)
//! - `POST /pushes`
//! - `GET /users/me`
//! - `GET /devices`, `POST /devices`
//!
//! Every request carries the access token in the `Access-Token` header.

use std::time::Duration;

use futures_util::future::BoxFuture;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::ApiError;
use crate::models::{Device, DeviceList, NewDevice, OutgoingPush, PushPage, PushRecord, User};
use crate::sync::FetchWindow;

/// Request timeout in seconds
const REQUEST_TIMEOUT: u64 = 10;

/// Device type this client registers as
pub const DEVICE_TYPE: &str = "chrome";

/// The two REST calls the connection manager depends on
///
/// Kept as a trait so the manager can run against an in-memory service.
pub trait PushService: Send + Sync + 'static {
    /// Fetch one page of pushes for the given window
    fn fetch_pushes(
        &self,
        access_token: &str,
        window: FetchWindow,
    ) -> BoxFuture<'static, Result<PushPage, ApiError>>;

    /// Create a push
    fn send_push(
        &self,
        access_token: &str,
        push: OutgoingPush,
    ) -> BoxFuture<'static, Result<PushRecord, ApiError>>;
}

/// HTTP implementation
#[derive(Debug, Clone)]
pub struct PushApi {
    client: Client,
    base_url: String,
}

impl PushApi {
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT))
            .user_agent(concat!("pushlink/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Account of the token owner (its iden salts the encryption key)
    pub async fn current_user(&self, access_token: &str) -> Result<User, ApiError> {
        let request = self.client.get(self.url("users/me"));
        send_json(request, access_token).await
    }

    pub async fn list_devices(&self, access_token: &str) -> Result<Vec<Device>, ApiError> {
        let request = self.client.get(self.url("devices"));
        let list: DeviceList = send_json(request, access_token).await?;
        Ok(list.devices)
    }

    pub async fn create_device(
        &self,
        access_token: &str,
        nickname: &str,
    ) -> Result<Device, ApiError> {
        let body = NewDevice {
            nickname: nickname.to_string(),
            kind: DEVICE_TYPE.to_string(),
            model: nickname.to_string(),
        };
        let request = self.client.post(self.url("devices")).json(&body);
        send_json(request, access_token).await
    }

    /// Find an active device of this client's type, registering one if missing
    pub async fn ensure_device(
        &self,
        access_token: &str,
        nickname: &str,
    ) -> Result<Device, ApiError> {
        let devices = self.list_devices(access_token).await?;
        if let Some(existing) = find_client_device(&devices) {
            debug!("Using existing device {}", existing.iden);
            return Ok(existing.clone());
        }

        debug!("No {} device found, creating one", DEVICE_TYPE);
        self.create_device(access_token, nickname).await
    }
}

impl PushService for PushApi {
    fn fetch_pushes(
        &self,
        access_token: &str,
        window: FetchWindow,
    ) -> BoxFuture<'static, Result<PushPage, ApiError>> {
        let request = self
            .client
            .get(self.url("pushes"))
            .query(&window.query());
        let token = access_token.to_string();
        Box::pin(async move { send_json(request, &token).await })
    }

    fn send_push(
        &self,
        access_token: &str,
        push: OutgoingPush,
    ) -> BoxFuture<'static, Result<PushRecord, ApiError>> {
        let request = self.client.post(self.url("pushes")).json(&push);
        let token = access_token.to_string();
        Box::pin(async move { send_json(request, &token).await })
    }
}

/// First active device registered with this client's type
pub fn find_client_device(devices: &[Device]) -> Option<&Device> {
    devices
        .iter()
        .find(|d| d.active && d.kind.as_deref() == Some(DEVICE_TYPE))
}

async fn send_json<T: DeserializeOwned>(
    request: RequestBuilder,
    access_token: &str,
) -> Result<T, ApiError> {
    let response = request.header("Access-Token", access_token).send().await?;
    let response = check_status(response).await?;
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string());

    Err(ApiError::Status {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(iden: &str, kind: &str, active: bool) -> Device {
        Device {
            iden: iden.to_string(),
            active,
            nickname: None,
            kind: Some(kind.to_string()),
            model: None,
        }
    }

    #[test]
    fn test_find_client_device_skips_inactive_and_other_types() {
        let devices = vec![
            device("phone", "android", true),
            device("old", DEVICE_TYPE, false),
            device("current", DEVICE_TYPE, true),
        ];
        assert_eq!(find_client_device(&devices).unwrap().iden, "current");
        assert!(find_client_device(&devices[..2]).is_none());
    }

    #[test]
    fn test_base_url_is_normalized() {
        let api = PushApi::new("https://api.example.com/v2/").unwrap();
        assert_eq!(api.url("pushes"), "https://api.example.com/v2/pushes");
    }
}
