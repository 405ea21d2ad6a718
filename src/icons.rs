//! Marker images, cached by `url|sizePx` with in-flight deduplication.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::future::Shared;
use log::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct MarkerIcon {
    pub url: String,
    pub size_px: u32,
    pub natural_width: u32,
    pub natural_height: u32,
}

impl MarkerIcon {
    pub fn cache_key(&self) -> String {
        icon_key(&self.url, self.size_px)
    }
}

pub fn icon_key(url: &str, size_px: u32) -> String {
    format!("{}|{}", url, size_px)
}

pub trait IconLoader: Send + Sync + 'static {
    /// Loads and decodes the image, or `None` on any failure.
    fn load(&self, url: &str, size_px: u32) -> impl Future<Output = Option<MarkerIcon>> + Send;
}

type PendingIcon = Shared<Pin<Box<dyn Future<Output = Option<MarkerIcon>> + Send>>>;

pub struct IconCache<L> {
    loader: Arc<L>,
    ready: Mutex<HashMap<String, MarkerIcon>>,
    in_flight: Mutex<HashMap<String, PendingIcon>>,
}

impl<L: IconLoader> IconCache<L> {
    pub fn new(loader: L) -> Self {
        Self {
            loader: Arc::new(loader),
            ready: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn cached(&self, url: &str, size_px: u32) -> Option<MarkerIcon> {
        let ready = self.ready.lock().unwrap_or_else(|p| p.into_inner());
        ready.get(&icon_key(url, size_px)).cloned()
    }

    /// Failed loads resolve to `None` and are not cached, so a later call retries.
    pub async fn resolve(&self, url: &str, size_px: u32) -> Option<MarkerIcon> {
        if let Some(icon) = self.cached(url, size_px) {
            return Some(icon);
        }
        let key = icon_key(url, size_px);
        let pending = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
            in_flight
                .entry(key.clone())
                .or_insert_with(|| {
                    let loader = Arc::clone(&self.loader);
                    let url = url.to_string();
                    let fut: Pin<Box<dyn Future<Output = Option<MarkerIcon>> + Send>> =
                        Box::pin(async move { loader.load(&url, size_px).await });
                    fut.shared()
                })
                .clone()
        };

        let icon = pending.await;
        self.in_flight
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&key);
        match &icon {
            Some(icon) => {
                self.ready
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .insert(key, icon.clone());
            }
            None => debug!("icon {} unavailable, keeping previous image", key),
        }
        icon
    }
}

/// Fetches icons over HTTP and decodes them to learn their natural size.
/// Relative urls are joined onto `base_url` when one is set.
pub struct HttpIconLoader {
    client: reqwest::Client,
    base_url: Option<String>,
}

impl HttpIconLoader {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: None,
        }
    }

    pub fn with_base(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: Some(base_url.into().trim_end_matches('/').to_string()),
        }
    }

    fn absolute(&self, url: &str) -> String {
        match &self.base_url {
            Some(base) if url.starts_with('/') => format!("{}{}", base, url),
            _ => url.to_string(),
        }
    }
}

impl IconLoader for HttpIconLoader {
    fn load(&self, url: &str, size_px: u32) -> impl Future<Output = Option<MarkerIcon>> + Send {
        let client = self.client.clone();
        let fetch_url = self.absolute(url);
        let url = url.to_string();
        async move {
            let bytes = match client.get(&fetch_url).send().await.and_then(|r| r.error_for_status()) {
                Ok(resp) => resp.bytes().await.ok()?,
                Err(e) => {
                    warn!("⚠️ icon fetch failed {}: {}", fetch_url, e);
                    return None;
                }
            };
            decode_icon(&url, size_px, &bytes)
        }
    }
}

pub fn decode_icon(url: &str, size_px: u32, bytes: &[u8]) -> Option<MarkerIcon> {
    match image::load_from_memory(bytes) {
        Ok(img) => Some(MarkerIcon {
            url: url.to_string(),
            size_px,
            natural_width: img.width(),
            natural_height: img.height(),
        }),
        Err(e) => {
            warn!("⚠️ icon decode failed {}: {}", url, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLoader {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl IconLoader for CountingLoader {
        fn load(&self, url: &str, size_px: u32) -> impl Future<Output = Option<MarkerIcon>> + Send {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let fail = self.fail;
            let url = url.to_string();
            async move {
                tokio::task::yield_now().await;
                (!fail).then(|| MarkerIcon {
                    url,
                    size_px,
                    natural_width: 24,
                    natural_height: 24,
                })
            }
        }
    }

    #[tokio::test]
    async fn concurrent_resolves_share_one_load() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = IconCache::new(CountingLoader {
            calls: Arc::clone(&calls),
            fail: false,
        });
        let (a, b) = tokio::join!(cache.resolve("/poi/subway.png", 24), cache.resolve("/poi/subway.png", 24));
        assert_eq!(a, b);
        assert!(a.is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // served from cache afterwards
        cache.resolve("/poi/subway.png", 24).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_sizes_are_cached_separately() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = IconCache::new(CountingLoader {
            calls: Arc::clone(&calls),
            fail: false,
        });
        cache.resolve("/poi/school.png", 24).await;
        cache.resolve("/poi/school.png", 32).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_loads_are_swallowed_and_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = IconCache::new(CountingLoader {
            calls: Arc::clone(&calls),
            fail: true,
        });
        assert!(cache.resolve("/poi/bad.png", 24).await.is_none());
        assert!(cache.cached("/poi/bad.png", 24).is_none());
    }

    #[test]
    fn relative_urls_join_the_base() {
        let loader = HttpIconLoader::with_base(reqwest::Client::new(), "http://cdn.local/");
        assert_eq!(loader.absolute("/icons/poi/bank.png"), "http://cdn.local/icons/poi/bank.png");
        assert_eq!(loader.absolute("https://x/y.png"), "https://x/y.png");
    }

    #[test]
    fn garbage_bytes_do_not_decode() {
        assert!(decode_icon("/x.png", 24, b"not an image").is_none());
    }
}
