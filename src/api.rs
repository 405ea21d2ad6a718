//! REST client for the property API.
//!
//! All responses use the `{ message, data }` envelope. Mutations that create
//! server-side records are deduplicated while in flight so a double click does
//! not create two photo groups or upload the same batch twice.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use log::{debug, info};
use reqwest::{Client, RequestBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::Config;
use crate::error::{ApiError, ApiResult};
use crate::models::{Envelope, PhotoGroup, PinQuery, PinsResponse, UploadedPhoto};
use crate::viewport::PinSource;

pub const DEFAULT_UPLOAD_BATCH: usize = 10;

#[derive(Debug, Clone)]
pub struct PhotoFile {
    pub name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

/// Joins concurrent calls that share a key onto one request.
pub struct InFlight<T: Clone> {
    pending: Mutex<HashMap<String, Shared<BoxFuture<'static, ApiResult<T>>>>>,
}

impl<T: Clone + Send + Sync + 'static> InFlight<T> {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run<F>(&self, key: &str, make: F) -> ApiResult<T>
    where
        F: FnOnce() -> BoxFuture<'static, ApiResult<T>>,
    {
        let shared = {
            let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
            match pending.get(key) {
                Some(existing) => {
                    debug!("⏳ joining in-flight request {}", key);
                    existing.clone()
                }
                None => {
                    let fut = make().shared();
                    pending.insert(key.to_string(), fut.clone());
                    fut
                }
            }
        };
        let result = shared.await;
        self.pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(key);
        result
    }

    pub fn in_flight(&self) -> usize {
        self.pending.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

impl<T: Clone + Send + Sync + 'static> Default for InFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreatePhotoGroup<'a> {
    pin_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
}

pub struct ApiClient {
    http: Client,
    base_url: String,
    token: Option<String>,
    upload_batch: usize,
    group_creation: InFlight<PhotoGroup>,
    uploads: InFlight<Vec<UploadedPhoto>>,
}

impl ApiClient {
    pub fn new(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            upload_batch: DEFAULT_UPLOAD_BATCH,
            group_creation: InFlight::new(),
            uploads: InFlight::new(),
        }
    }

    pub fn from_config(http: Client, config: &Config) -> Self {
        let mut client = Self::new(http, config.api_base_url.clone());
        client.token = config.api_token.clone();
        client.upload_batch = config.photo_upload_batch.max(1);
        client
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_upload_batch(mut self, batch: usize) -> Self {
        self.upload_batch = batch.max(1);
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    pub async fn get_pins_in_bounds(&self, query: &PinQuery) -> ApiResult<PinsResponse> {
        let req = self.authed(self.http.get(self.url("/pins/map")).query(query));
        send_envelope(req).await
    }

    pub async fn get_photo_groups(&self, pin_id: &str) -> ApiResult<Vec<PhotoGroup>> {
        let req = self.authed(self.http.get(self.url(&format!("/photo-groups/{}", pin_id))));
        send_envelope(req).await
    }

    /// Concurrent calls for the same pin share one POST.
    pub async fn create_photo_group(&self, pin_id: &str, title: Option<&str>) -> ApiResult<PhotoGroup> {
        let body = serde_json::to_value(CreatePhotoGroup { pin_id, title })?;
        let req = self.authed(self.http.post(self.url("/photo-groups")).json(&body));
        self.group_creation
            .run(pin_id, || send_envelope::<PhotoGroup>(req).boxed())
            .await
    }

    /// Uploads in batches of `upload_batch` files per multipart request.
    pub async fn upload_photos(&self, domain: &str, files: &[PhotoFile]) -> ApiResult<Vec<UploadedPhoto>> {
        let key = upload_key(domain, files);
        let batches: Vec<RequestBuilder> = files
            .chunks(self.upload_batch)
            .map(|chunk| self.upload_request(domain, chunk))
            .collect::<ApiResult<_>>()?;
        let total = files.len();

        self.uploads
            .run(&key, move || {
                async move {
                    let mut uploaded = Vec::with_capacity(total);
                    for (i, req) in batches.into_iter().enumerate() {
                        let mut batch: Vec<UploadedPhoto> = send_envelope(req).await?;
                        debug!("📤 batch {} uploaded {} files", i + 1, batch.len());
                        uploaded.append(&mut batch);
                    }
                    info!("📤 uploaded {} photos", uploaded.len());
                    Ok(uploaded)
                }
                .boxed()
            })
            .await
    }

    fn upload_request(&self, domain: &str, chunk: &[PhotoFile]) -> ApiResult<RequestBuilder> {
        let mut form = reqwest::multipart::Form::new();
        for file in chunk {
            let part = reqwest::multipart::Part::bytes(file.bytes.clone())
                .file_name(file.name.clone())
                .mime_str(&file.mime)?;
            form = form.part("files", part);
        }
        Ok(self.authed(
            self.http
                .post(self.url("/photo/upload"))
                .query(&[("domain", domain)])
                .multipart(form),
        ))
    }
}

impl PinSource for ApiClient {
    fn get_pins_in_bounds(&self, query: PinQuery) -> impl Future<Output = ApiResult<PinsResponse>> + Send {
        async move { ApiClient::get_pins_in_bounds(self, &query).await }
    }
}

fn upload_key(domain: &str, files: &[PhotoFile]) -> String {
    let names: Vec<String> = files
        .iter()
        .map(|f| format!("{}:{}", f.name, f.bytes.len()))
        .collect();
    format!("{}|{}", domain, names.join(","))
}

async fn send_envelope<T: DeserializeOwned>(req: RequestBuilder) -> ApiResult<T> {
    let resp = req.send().await?;
    read_envelope(resp).await
}

async fn read_envelope<T: DeserializeOwned>(resp: Response) -> ApiResult<T> {
    let status = resp.status();
    let body = resp.bytes().await?;
    if !status.is_success() {
        let message = serde_json::from_slice::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("Unknown").to_string());
        return Err(ApiError::from_status(status, message));
    }
    let envelope: Envelope<T> = serde_json::from_slice(&body)?;
    Ok(envelope.data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn in_flight_joins_same_key() {
        let inflight: Arc<InFlight<u32>> = Arc::new(InFlight::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let make = |calls: Arc<AtomicUsize>| {
            move || {
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    Ok(7)
                }
                .boxed()
            }
        };
        let (a, b) = tokio::join!(
            inflight.run("pin-1", make(Arc::clone(&calls))),
            inflight.run("pin-1", make(Arc::clone(&calls)))
        );
        assert_eq!(a.ok(), Some(7));
        assert_eq!(b.ok(), Some(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(inflight.in_flight(), 0);
    }

    #[tokio::test]
    async fn in_flight_keeps_distinct_keys_apart() {
        let inflight: InFlight<u32> = InFlight::new();
        let calls = Arc::new(AtomicUsize::new(0));
        for key in ["a", "b"] {
            let calls = Arc::clone(&calls);
            let _ = inflight
                .run(key, move || {
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(1)
                    }
                    .boxed()
                })
                .await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn base_url_is_normalised() {
        let client = ApiClient::new(Client::new(), "http://localhost:8080/api/v1/");
        assert_eq!(client.url("/pins/map"), "http://localhost:8080/api/v1/pins/map");
        assert_eq!(client.url("photo-groups/3"), "http://localhost:8080/api/v1/photo-groups/3");
    }

    #[test]
    fn upload_key_reflects_domain_and_files() {
        let files = [PhotoFile {
            name: "a.jpg".into(),
            mime: "image/jpeg".into(),
            bytes: vec![0; 3],
        }];
        assert_eq!(upload_key("pin", &files), "pin|a.jpg:3");
        assert_ne!(upload_key("survey", &files), upload_key("pin", &files));
    }
}
