//! JSON-RPC client implementation

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error, info, warn};
use url::Url;

use xenapi_models::{JsonRpcRequest, JsonRpcResponse};

use crate::errors::{PrecheckError, RemoteFailure};

/// JSON-RPC client for the pool coordinator
pub struct JsonRpcClient {
    client: Client,
    endpoint: Url,
    next_id: AtomicU64,
    session: RwLock<Option<String>>,
}

impl JsonRpcClient {
    /// Create a new client for `<server_url>/jsonrpc`
    pub fn new(server_url: &str, accept_invalid_certs: bool) -> Result<Self, PrecheckError> {
        let mut endpoint = Url::parse(server_url)?;
        let path = format!("{}/jsonrpc", endpoint.path().trim_end_matches('/'));
        endpoint.set_path(&path);

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()?;

        Ok(Self {
            client,
            endpoint,
            next_id: AtomicU64::new(1),
            session: RwLock::new(None),
        })
    }

    /// Get the endpoint URL
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Make a call without a session
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, PrecheckError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(method, params, id);
        debug!(method, id, "POST {}", self.endpoint);

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("JSON-RPC call {} failed: {} - {}", method, status, body);
            return Err(PrecheckError::SessionError(format!("{}: {}", status, body)));
        }

        let body: JsonRpcResponse = response.json().await?;
        if let Some(err) = body.error {
            let failure = RemoteFailure::new(err.error_description());
            debug!(method, code = %failure.code(), "Remote call failed");
            return Err(failure.into());
        }

        let result = body.result.unwrap_or(Value::Null);
        Ok(serde_json::from_value(result)?)
    }

    /// Make a call with the session reference as first parameter
    pub async fn session_call<T: DeserializeOwned>(
        &self,
        method: &str,
        mut params: Vec<Value>,
    ) -> Result<T, PrecheckError> {
        let session = self.session_ref()?;
        params.insert(0, Value::String(session));
        self.call(method, params).await
    }

    /// Log in with username and password
    pub async fn login(&self, username: &str, password: &SecretString) -> Result<(), PrecheckError> {
        let session: String = self
            .call(
                "session.login_with_password",
                vec![
                    Value::String(username.to_string()),
                    Value::String(password.expose_secret().to_string()),
                    Value::String(env!("CARGO_PKG_VERSION").to_string()),
                    Value::String(env!("CARGO_PKG_NAME").to_string()),
                ],
            )
            .await?;

        let mut current = self.session.write().unwrap_or_else(|e| e.into_inner());
        *current = Some(session);
        info!(user = %username, "Logged in to {}", self.endpoint);
        Ok(())
    }

    /// Log out, if logged in
    pub async fn logout(&self) {
        let session = {
            let mut current = self.session.write().unwrap_or_else(|e| e.into_inner());
            current.take()
        };
        let Some(session) = session else { return };

        if let Err(e) = self
            .call::<Value>("session.logout", vec![Value::String(session)])
            .await
        {
            warn!("Logout failed: {}", e);
        }
    }

    pub fn is_logged_in(&self) -> bool {
        self.session
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    fn session_ref(&self) -> Result<String, PrecheckError> {
        self.session
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| PrecheckError::SessionError("Not logged in".to_string()))
    }
}
