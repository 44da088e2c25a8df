use async_trait::async_trait;
use keyledger_core::config::KeyledgerConfig;
use keyledger_core::store::{ContentRef, ContentStore};
use keyledger_core::{KeyledgerError, KeyledgerResult};
use log::{debug, info, warn};
use reqwest::{multipart, Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Endpoints and credentials for a Pinata account.
#[derive(Clone)]
pub struct PinataConfig {
    pub jwt: String,
    /// Files API v3 upload endpoint.
    pub upload_url: String,
    /// Legacy `pinJSONToIPFS` endpoint, tried when the Files API fails.
    pub legacy_url: String,
    pub gateway_url: String,
    pub timeout: Duration,
}

impl PinataConfig {
    /// Read the `[store]` section. The JWT may come from the file or from
    /// `KEYLEDGER_PINATA_JWT`.
    pub fn from_config(config: &KeyledgerConfig) -> KeyledgerResult<Self> {
        let jwt = config.pinata_jwt().ok_or_else(|| {
            KeyledgerError::InvalidConfig(format!(
                "store.jwt (or {}) is required for the pinata backend",
                keyledger_core::config::PINATA_JWT_ENV
            ))
        })?;
        Ok(Self {
            jwt: jwt.to_string(),
            upload_url: config.store.upload_url.clone(),
            legacy_url: config.store.legacy_url.clone(),
            gateway_url: config.store.gateway_url.clone(),
            timeout: config.store_timeout(),
        })
    }
}

impl std::fmt::Debug for PinataConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinataConfig")
            .field("jwt", &"<redacted>")
            .field("upload_url", &self.upload_url)
            .field("legacy_url", &self.legacy_url)
            .field("gateway_url", &self.gateway_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Content store that pins blobs on IPFS through Pinata.
pub struct PinataStore {
    client: Client,
    config: PinataConfig,
}

#[derive(Debug, Deserialize)]
struct FilesResponse {
    data: FilesData,
}

#[derive(Debug, Deserialize)]
struct FilesData {
    #[serde(default)]
    cid: Option<String>,
    #[serde(default, rename = "IpfsHash")]
    ipfs_hash: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PinResponse {
    ipfs_hash: String,
}

impl PinataStore {
    pub fn new(config: PinataConfig) -> KeyledgerResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| KeyledgerError::StoreUnavailable(format!("http client: {err}")))?;
        Ok(Self { client, config })
    }

    pub fn from_config(config: &KeyledgerConfig) -> KeyledgerResult<Self> {
        Self::new(PinataConfig::from_config(config)?)
    }

    pub fn config(&self) -> &PinataConfig {
        &self.config
    }

    /// Public gateway address for `cid`.
    pub fn gateway_url(&self, cid: &str) -> String {
        format!("{}/{}", self.config.gateway_url.trim_end_matches('/'), cid)
    }

    async fn upload_files_api(&self, bytes: &[u8], stem: &str) -> Result<String, String> {
        let part = multipart::Part::bytes(bytes.to_vec())
            .file_name(format!("{stem}.json"))
            .mime_str("application/json")
            .map_err(|err| err.to_string())?;
        let form = multipart::Form::new()
            .part("file", part)
            .text("network", "public");

        let resp = self
            .client
            .post(&self.config.upload_url)
            .bearer_auth(&self.config.jwt)
            .multipart(form)
            .send()
            .await
            .map_err(|err| err.to_string())?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(format!("HTTP {status}: {}", body.trim()));
        }

        let parsed: FilesResponse = resp
            .json()
            .await
            .map_err(|err| format!("unexpected response: {err}"))?;
        parsed
            .data
            .cid
            .or(parsed.data.ipfs_hash)
            .filter(|cid| !cid.is_empty())
            .ok_or_else(|| "response carried no CID".to_string())
    }

    async fn upload_legacy(&self, bytes: &[u8], stem: &str) -> Result<String, String> {
        // The legacy endpoint pins a JSON document, not a file.
        let content: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|err| format!("content is not JSON: {err}"))?;
        let body = json!({
            "pinataContent": content,
            "pinataMetadata": { "name": stem },
        });

        let resp = self
            .client
            .post(&self.config.legacy_url)
            .bearer_auth(&self.config.jwt)
            .json(&body)
            .send()
            .await
            .map_err(|err| err.to_string())?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(format!("HTTP {status}: {}", body.trim()));
        }

        let parsed: PinResponse = resp
            .json()
            .await
            .map_err(|err| format!("unexpected response: {err}"))?;
        Ok(parsed.ipfs_hash)
    }
}

#[async_trait]
impl ContentStore for PinataStore {
    fn name(&self) -> &str {
        "pinata"
    }

    async fn put(&self, bytes: Vec<u8>) -> KeyledgerResult<ContentRef> {
        let stem = format!("kms-key-{}", unix_millis());

        let files_err = match self.upload_files_api(&bytes, &stem).await {
            Ok(cid) => {
                info!("pinned {stem} as {cid} via files API");
                return Ok(cid);
            }
            Err(err) => err,
        };
        warn!("pinata files API upload failed ({files_err}); trying legacy endpoint");

        match self.upload_legacy(&bytes, &stem).await {
            Ok(cid) => {
                info!("pinned {stem} as {cid} via legacy endpoint");
                Ok(cid)
            }
            Err(legacy_err) => Err(KeyledgerError::StoreUnavailable(format!(
                "all pinata endpoints failed: files API: {files_err}; legacy API: {legacy_err}"
            ))),
        }
    }

    async fn get(&self, content_ref: &str) -> KeyledgerResult<Vec<u8>> {
        if content_ref.trim().is_empty() {
            return Err(KeyledgerError::NotFound(content_ref.to_string()));
        }

        let url = self.gateway_url(content_ref);
        debug!("fetching {url}");
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| KeyledgerError::StoreUnavailable(format!("{url}: {err}")))?;

        match resp.status() {
            status if status.is_success() => {
                let bytes = resp
                    .bytes()
                    .await
                    .map_err(|err| KeyledgerError::StoreUnavailable(format!("{url}: {err}")))?;
                Ok(bytes.to_vec())
            }
            StatusCode::NOT_FOUND => Err(KeyledgerError::NotFound(content_ref.to_string())),
            status => Err(KeyledgerError::StoreUnavailable(format!(
                "{url}: gateway answered HTTP {status}"
            ))),
        }
    }
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or(0)
}
