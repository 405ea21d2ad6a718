use std::collections::BTreeMap;

use anyhow::Context;
use log::{info, warn};
use serde_json::json;

use estate_map::Config;
use estate_map::api::ApiClient;
use estate_map::geo::Bounds;
use estate_map::geocode::GeocodeService;
use estate_map::kakao::KakaoLocal;
use estate_map::poi::{self, PoiKind, SearchTicket};
use estate_map::viewport::ViewportPins;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 로깅 초기화
    env_logger::init();

    info!("🚀 estate-map 시작합니다...");
    let config = Config::new().context("failed to load configuration")?;
    info!("📍 API 주소: {}", config.api_base_url);

    let http = reqwest::Client::new();
    let kakao = KakaoLocal::from_config(http.clone(), &config);

    // 주소 인자가 있으면 해당 위치로 뷰포트 이동
    let mut bounds = config.initial_bounds();
    if let Some(address) = std::env::args().nth(1) {
        match &kakao {
            Some(kakao) => {
                let geocoder = GeocodeService::with_limit(kakao, config.geocode_timeout());
                match geocoder.locate(&address).await {
                    Some(center) => {
                        info!("🧭 '{}' -> {}", address, center.pos_key());
                        bounds = Bounds::around(center, config.view_span_lat, config.view_span_lng);
                    }
                    None => warn!("🧭 '{}' not found, using configured center", address),
                }
            }
            None => warn!("⚠️ KAKAO_REST_KEY not set, ignoring address '{}'", address),
        }
    }

    // 뷰포트 핀 조회
    let client = ApiClient::from_config(http, &config);
    let mut pins = ViewportPins::new(client, config.viewport_debounce());
    let mut rx = pins.subscribe();
    pins.set_bounds(bounds);
    let snapshot = rx
        .wait_for(|s| !s.loading && (s.fetched_at.is_some() || s.error.is_some() || s.forbidden))
        .await
        .context("viewport fetch stopped before completing")?
        .clone();

    if snapshot.forbidden {
        warn!("🚫 no permission to view pins in this area");
    } else if let Some(err) = &snapshot.error {
        anyhow::bail!("pin fetch failed: {}", err);
    }
    info!(
        "✅ {} points, {} drafts, {} markers",
        snapshot.points.len(),
        snapshot.drafts_merged.len(),
        snapshot.markers.len()
    );

    // 주변 POI 개수 집계
    let mut pois = BTreeMap::new();
    if let Some(kakao) = &kakao {
        let ticket = SearchTicket {
            seq: 1,
            bounds,
            kinds: PoiKind::ALL.to_vec(),
            max_per_kind: config.poi_max_results_per_kind,
            icon_size_px: 24,
        };
        let results = poi::collect(kakao, &ticket).await;
        for (kind, places) in results.per_kind {
            pois.insert(kind.key(), places.len());
        }
    }

    let out = json!({
        "bounds": {
            "sw": bounds.south_west(),
            "ne": bounds.north_east(),
        },
        "forbidden": snapshot.forbidden,
        "markers": snapshot.markers,
        "poiCounts": pois,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
