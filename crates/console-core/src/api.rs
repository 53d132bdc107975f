//! API client for communicating with the HSM service

use std::{fs, path::Path, time::Duration};

use async_trait::async_trait;
use reqwest::{
    multipart::{Form, Part},
    Client, Response, Url,
};
use serde::{de::DeserializeOwned, Deserialize};
use tracing::debug;

use crate::{ConsoleError, ConsoleResult, Key, SignRequest, Slot, VerifyRequest};

/// Operations the console performs against the HSM service.
///
/// Every call is a single request/response with no retry.
#[async_trait]
pub trait HsmApi: Send + Sync {
    async fn list_slots(&self) -> ConsoleResult<Vec<Slot>>;

    /// Keys of one slot, addressed by the slot's canonical decimal identifier.
    async fn list_keys(&self, slot_decimal: u64) -> ConsoleResult<Vec<Key>>;

    /// Returns the base64 encoded signature.
    async fn sign(&self, key_label: &str, request: &SignRequest) -> ConsoleResult<String>;

    async fn verify(&self, key_label: &str, request: &VerifyRequest) -> ConsoleResult<bool>;

    async fn login(&self, request: &LoginRequest) -> ConsoleResult<LoginResponse>;
}

/// Transport settings for [`ApiClient`].
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub base_url: String,
    pub timeout: Duration,
    pub user_agent: String,
    /// PEM bundle of extra root certificates for HTTPS endpoints.
    pub ca_bundle_pem: Option<Vec<u8>>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api/v1".to_string(),
            timeout: Duration::from_secs(30),
            user_agent: concat!("hsm-console/", env!("CARGO_PKG_VERSION")).to_string(),
            ca_bundle_pem: None,
        }
    }
}

/// reqwest backed [`HsmApi`] implementation.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(settings: &ClientSettings) -> ConsoleResult<Self> {
        let mut client_builder = Client::builder()
            .timeout(settings.timeout)
            .user_agent(settings.user_agent.clone());

        if let Some(pem) = &settings.ca_bundle_pem {
            let ca_cert = reqwest::Certificate::from_pem(pem)
                .map_err(|err| ConsoleError::invalid(format!("invalid CA bundle: {err}")))?;
            client_builder = client_builder.add_root_certificate(ca_cert);
        }

        let client = client_builder.build()?;
        let base_url = Url::parse(settings.base_url.trim_end_matches('/')).map_err(|err| {
            ConsoleError::invalid(format!("invalid endpoint {:?}: {err}", settings.base_url))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ConsoleError::invalid(format!(
                "endpoint {:?} cannot be used as a base URL",
                settings.base_url
            )));
        }

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Appends path segments to the base URL, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Handle API response and unwrap the `data` envelope.
    async fn handle_response<T: DeserializeOwned>(&self, response: Response) -> ConsoleResult<T> {
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(ConsoleError::operation(
                status.as_u16(),
                server_message(&text).unwrap_or_else(|| status.to_string()),
            ));
        }

        let envelope: Envelope<T> = serde_json::from_str(&text)?;
        if envelope.success == Some(false) {
            return Err(ConsoleError::operation(
                status.as_u16(),
                envelope
                    .message
                    .unwrap_or_else(|| "operation reported failure".to_string()),
            ));
        }
        envelope
            .data
            .ok_or_else(|| ConsoleError::Transport("response is missing the data field".into()))
    }
}

#[async_trait]
impl HsmApi for ApiClient {
    async fn list_slots(&self) -> ConsoleResult<Vec<Slot>> {
        let url = self.endpoint(&["slots"]);
        debug!(%url, "listing slots");
        let response = self.client.get(url).send().await?;
        let slots: Vec<Slot> = self.handle_response(response).await?;
        for slot in &slots {
            slot.check_identity()?;
        }
        Ok(slots)
    }

    async fn list_keys(&self, slot_decimal: u64) -> ConsoleResult<Vec<Key>> {
        let slot = slot_decimal.to_string();
        let url = self.endpoint(&["slots", &slot, "keys"]);
        debug!(%url, "listing keys");
        let response = self.client.get(url).send().await?;
        self.handle_response(response).await
    }

    async fn sign(&self, key_label: &str, request: &SignRequest) -> ConsoleResult<String> {
        let url = self.endpoint(&["data", "sign", key_label]);
        debug!(%url, algorithm = %request.sign_algo, "requesting signature");
        let response = self.client.post(url).json(request).send().await?;
        self.handle_response(response).await
    }

    async fn verify(&self, key_label: &str, request: &VerifyRequest) -> ConsoleResult<bool> {
        let url = self.endpoint(&["data", "verify", key_label]);
        debug!(%url, algorithm = %request.verify_algo, "requesting verification");
        let response = self.client.post(url).json(request).send().await?;
        let verdict: Verdict = self.handle_response(response).await?;
        verdict.into_bool()
    }

    async fn login(&self, request: &LoginRequest) -> ConsoleResult<LoginResponse> {
        let url = self.endpoint(&["auth", "login"]);
        debug!(%url, mutual_tls = request.mutual_tls.is_some(), "submitting login");
        let response = self
            .client
            .post(url)
            .multipart(request.to_form()?)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ConsoleError::operation(
                status.as_u16(),
                server_message(&text).unwrap_or_else(|| status.to_string()),
            ));
        }
        Ok(LoginResponse {
            message: server_message(&text),
        })
    }
}

/// Generic `{ success, message, data }` wrapper used by the data endpoints.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

/// Verification results arrive either as a JSON boolean or as its text form.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Verdict {
    Flag(bool),
    Text(String),
}

impl Verdict {
    fn into_bool(self) -> ConsoleResult<bool> {
        match self {
            Verdict::Flag(flag) => Ok(flag),
            Verdict::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(true),
                "false" => Ok(false),
                _ => Err(ConsoleError::Transport(format!(
                    "unexpected verification result {text:?}"
                ))),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessageBody {
    message: Option<String>,
}

/// Extracts an operator-facing message from a response body: the JSON
/// `message` field when present, otherwise the trimmed text itself.
fn server_message(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }
    if let Ok(text) = serde_json::from_str::<String>(body) {
        let text = text.trim();
        return (!text.is_empty()).then(|| text.to_string());
    }
    match serde_json::from_str::<MessageBody>(body) {
        Ok(parsed) => parsed.message.filter(|m| !m.trim().is_empty()),
        Err(_) => Some(body.to_string()),
    }
}

// ===== LOGIN =====

/// Key store or trust store picked by the operator, held in memory.
#[derive(Clone, PartialEq, Eq)]
pub struct StoreFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl StoreFile {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }

    pub fn from_path(path: &Path) -> ConsoleResult<Self> {
        let bytes = fs::read(path).map_err(|err| {
            ConsoleError::invalid(format!("reading {}: {err}", path.display()))
        })?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "store".to_string());
        Ok(Self { file_name, bytes })
    }
}

impl std::fmt::Debug for StoreFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreFile")
            .field("file_name", &self.file_name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Certificate material for a mutual-TLS login.
#[derive(Clone)]
pub struct MutualTlsMaterial {
    pub key_store: StoreFile,
    pub key_store_password: String,
    pub trust_store: StoreFile,
    pub trust_store_password: String,
}

#[derive(Clone)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    pub mutual_tls: Option<MutualTlsMaterial>,
}

impl std::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("username", &self.username)
            .field("mutual_tls", &self.mutual_tls.is_some())
            .finish_non_exhaustive()
    }
}

impl LoginRequest {
    /// Multipart body with the field names the service expects.
    pub fn to_form(&self) -> ConsoleResult<Form> {
        let mut form = Form::new()
            .text("username", self.username.clone())
            .text("password", self.password.clone());
        if let Some(tls) = &self.mutual_tls {
            form = form
                .part("keyStore", store_part(&tls.key_store)?)
                .text("keyStorePassword", tls.key_store_password.clone())
                .part("trustStore", store_part(&tls.trust_store)?)
                .text("trustStorePassword", tls.trust_store_password.clone());
        }
        Ok(form)
    }
}

fn store_part(store: &StoreFile) -> ConsoleResult<Part> {
    Part::bytes(store.bytes.clone())
        .file_name(store.file_name.clone())
        .mime_str("application/octet-stream")
        .map_err(ConsoleError::transport)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginResponse {
    pub message: Option<String>,
}
