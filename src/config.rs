use std::env;
use std::str::FromStr;
use std::time::Duration;

use dotenv::dotenv;

use crate::geo::{Bounds, LatLng};

#[derive(Debug, Clone)]
pub struct Config {
    // API
    pub api_base_url: String,
    pub api_token: Option<String>,

    // Viewport fetch
    pub viewport_debounce_ms: u64,

    // Render modes
    pub safe_label_max: f64,
    pub cluster_min_level: f64,

    // POI layer
    pub poi_throttle_ms: u64,
    pub poi_max_level: f64,
    pub poi_max_scale_m: f64,
    pub poi_max_results_per_kind: usize,

    // Geocoding and place search
    pub geocode_timeout_ms: u64,
    pub kakao_base_url: String,
    pub kakao_rest_key: Option<String>,

    // Photo upload
    pub photo_upload_batch: usize,

    // Initial viewport
    pub view_center_lat: f64,
    pub view_center_lng: f64,
    pub view_span_lat: f64,
    pub view_span_lng: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080/api/v1".to_string(),
            api_token: None,
            viewport_debounce_ms: 150,
            safe_label_max: 5.0,
            cluster_min_level: 8.0,
            poi_throttle_ms: 250,
            poi_max_level: 5.0,
            poi_max_scale_m: 500.0,
            poi_max_results_per_kind: 30,
            geocode_timeout_ms: 4000,
            kakao_base_url: "https://dapi.kakao.com".to_string(),
            kakao_rest_key: None,
            photo_upload_batch: 10,
            view_center_lat: 37.5665,
            view_center_lng: 126.9780,
            view_span_lat: 0.02,
            view_span_lng: 0.03,
        }
    }
}

impl Config {
    pub fn new() -> anyhow::Result<Self> {
        // .env 파일 로드 (없어도 됨)
        dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            api_base_url: env::var("API_BASE_URL").unwrap_or(defaults.api_base_url),
            api_token: env::var("API_TOKEN").ok().filter(|t| !t.is_empty()),
            viewport_debounce_ms: env_or("VIEWPORT_DEBOUNCE_MS", defaults.viewport_debounce_ms),
            safe_label_max: env_or("SAFE_LABEL_MAX", defaults.safe_label_max),
            cluster_min_level: env_or("CLUSTER_MIN_LEVEL", defaults.cluster_min_level),
            poi_throttle_ms: env_or("POI_THROTTLE_MS", defaults.poi_throttle_ms),
            poi_max_level: env_or("POI_MAX_LEVEL", defaults.poi_max_level),
            poi_max_scale_m: env_or("POI_MAX_SCALE_M", defaults.poi_max_scale_m),
            poi_max_results_per_kind: env_or(
                "POI_MAX_RESULTS_PER_KIND",
                defaults.poi_max_results_per_kind,
            ),
            geocode_timeout_ms: env_or("GEOCODE_TIMEOUT_MS", defaults.geocode_timeout_ms),
            kakao_base_url: env::var("KAKAO_BASE_URL").unwrap_or(defaults.kakao_base_url),
            kakao_rest_key: env::var("KAKAO_REST_KEY").ok().filter(|k| !k.is_empty()),
            photo_upload_batch: env_or("PHOTO_UPLOAD_BATCH", defaults.photo_upload_batch),
            view_center_lat: env_or("VIEW_CENTER_LAT", defaults.view_center_lat),
            view_center_lng: env_or("VIEW_CENTER_LNG", defaults.view_center_lng),
            view_span_lat: env_or("VIEW_SPAN_LAT", defaults.view_span_lat),
            view_span_lng: env_or("VIEW_SPAN_LNG", defaults.view_span_lng),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.safe_label_max >= self.cluster_min_level {
            anyhow::bail!(
                "SAFE_LABEL_MAX ({}) must be below CLUSTER_MIN_LEVEL ({})",
                self.safe_label_max,
                self.cluster_min_level
            );
        }
        if self.photo_upload_batch == 0 {
            anyhow::bail!("PHOTO_UPLOAD_BATCH must be at least 1");
        }
        Ok(())
    }

    pub fn viewport_debounce(&self) -> Duration {
        Duration::from_millis(self.viewport_debounce_ms)
    }

    pub fn poi_throttle(&self) -> Duration {
        Duration::from_millis(self.poi_throttle_ms)
    }

    pub fn geocode_timeout(&self) -> Duration {
        Duration::from_millis(self.geocode_timeout_ms)
    }

    pub fn initial_bounds(&self) -> Bounds {
        Bounds::around(
            LatLng::new(self.view_center_lat, self.view_center_lng),
            self.view_span_lat,
            self.view_span_lng,
        )
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}
