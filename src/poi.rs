//! Auxiliary point-of-interest overlay.
//!
//! The viewport is tiled into cells; each enabled kind is searched per cell,
//! results are deduplicated, trimmed with a near/far picker and upserted into
//! a marker pool. Each search carries a sequence number and results older than
//! the newest issued search are dropped untouched.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::time::Duration;

use futures::future::join_all;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::Config;
use crate::geo::{Bounds, LatLng};
use crate::icons::{IconCache, IconLoader, MarkerIcon};
use crate::marker_pool::{DEFAULT_GRACE_FRAMES, MarkerPool};
use crate::sdk::{MapView, MarkerFactory};

pub const MAX_PAGES: u32 = 3;
pub const MIN_CELL_M: f64 = 250.0;
pub const MAX_CELLS_PER_AXIS: usize = 4;
const NEAR_PERCENT: usize = 70;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PoiKind {
    Subway,
    BusStop,
    ConvenienceStore,
    Mart,
    School,
    Hospital,
    Pharmacy,
    Bank,
    Cafe,
    Parking,
}

impl PoiKind {
    pub const ALL: [PoiKind; 10] = [
        PoiKind::Subway,
        PoiKind::BusStop,
        PoiKind::ConvenienceStore,
        PoiKind::Mart,
        PoiKind::School,
        PoiKind::Hospital,
        PoiKind::Pharmacy,
        PoiKind::Bank,
        PoiKind::Cafe,
        PoiKind::Parking,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            PoiKind::Subway => "subway",
            PoiKind::BusStop => "bus",
            PoiKind::ConvenienceStore => "convenience",
            PoiKind::Mart => "mart",
            PoiKind::School => "school",
            PoiKind::Hospital => "hospital",
            PoiKind::Pharmacy => "pharmacy",
            PoiKind::Bank => "bank",
            PoiKind::Cafe => "cafe",
            PoiKind::Parking => "parking",
        }
    }

    /// Kakao category group code, when one exists.
    pub fn category_code(&self) -> Option<&'static str> {
        match self {
            PoiKind::Subway => Some("SW8"),
            PoiKind::BusStop => None,
            PoiKind::ConvenienceStore => Some("CS2"),
            PoiKind::Mart => Some("MT1"),
            PoiKind::School => Some("SC4"),
            PoiKind::Hospital => Some("HP8"),
            PoiKind::Pharmacy => Some("PM9"),
            PoiKind::Bank => Some("BK9"),
            PoiKind::Cafe => Some("CE7"),
            PoiKind::Parking => Some("PK6"),
        }
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            PoiKind::Subway => "지하철역",
            PoiKind::BusStop => "버스정류장",
            PoiKind::ConvenienceStore => "편의점",
            PoiKind::Mart => "마트",
            PoiKind::School => "학교",
            PoiKind::Hospital => "병원",
            PoiKind::Pharmacy => "약국",
            PoiKind::Bank => "은행",
            PoiKind::Cafe => "카페",
            PoiKind::Parking => "주차장",
        }
    }

    /// Radius around the viewport center counted as "near".
    pub fn near_radius_m(&self) -> f64 {
        match self {
            PoiKind::Subway | PoiKind::School => 1_000.0,
            PoiKind::Hospital | PoiKind::Mart => 800.0,
            _ => 500.0,
        }
    }

    pub fn icon_url(&self) -> String {
        format!("/icons/poi/{}.png", self.key())
    }

    pub fn query(&self) -> PlaceQuery {
        match self.category_code() {
            Some(code) => PlaceQuery::Category(code),
            None => PlaceQuery::Keyword(self.keyword()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceQuery {
    Category(&'static str),
    Keyword(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Place {
    pub id: Option<String>,
    pub name: String,
    /// longitude
    pub x: f64,
    /// latitude
    pub y: f64,
}

impl Place {
    pub fn position(&self) -> LatLng {
        LatLng::new(self.y, self.x)
    }

    fn dedupe_key(&self) -> String {
        match &self.id {
            Some(id) => id.clone(),
            None => format!("{},{}", self.x, self.y),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlacePage {
    pub places: Vec<Place>,
    pub is_end: bool,
}

pub trait PlaceSearch: Send + Sync {
    /// One page of results inside `rect`; `None` when nothing was found or the
    /// lookup failed.
    fn search(&self, query: PlaceQuery, rect: Bounds, page: u32) -> impl Future<Output = Option<PlacePage>> + Send;
}

pub fn poi_key(kind: PoiKind, place: &Place) -> String {
    match &place.id {
        Some(id) => format!("{}:{}", kind.key(), id),
        None => format!("{}:{},{}", kind.key(), place.x, place.y),
    }
}

/// Tiles `bounds` into cells sized from its shorter edge.
pub fn grid_cells(bounds: &Bounds) -> Vec<Bounds> {
    let cell_m = (bounds.shorter_edge_m() / 2.0).max(MIN_CELL_M);
    let cols = ((bounds.width_m() / cell_m).ceil() as usize).clamp(1, MAX_CELLS_PER_AXIS);
    let rows = ((bounds.height_m() / cell_m).ceil() as usize).clamp(1, MAX_CELLS_PER_AXIS);
    let (sw, ne) = (bounds.south_west(), bounds.north_east());
    let d_lat = (ne.lat - sw.lat) / rows as f64;
    let d_lng = (ne.lng - sw.lng) / cols as f64;

    let mut cells = Vec::with_capacity(rows * cols);
    for r in 0..rows {
        for c in 0..cols {
            let cell_sw = LatLng::new(sw.lat + d_lat * r as f64, sw.lng + d_lng * c as f64);
            let cell_ne = LatLng::new(cell_sw.lat + d_lat, cell_sw.lng + d_lng);
            cells.push(Bounds::new(cell_sw, cell_ne));
        }
    }
    cells
}

/// Keeps the first occurrence per place id (or coordinate pair).
pub fn dedupe_places(places: Vec<Place>) -> Vec<Place> {
    let mut seen = HashSet::new();
    places
        .into_iter()
        .filter(|p| seen.insert(p.dedupe_key()))
        .collect()
}

/// Up to `max` places, favouring those within `radius_m` of `center`.
pub fn pick_near_far(places: Vec<Place>, center: LatLng, radius_m: f64, max: usize) -> Vec<Place> {
    let mut ranked: Vec<(f64, Place)> = places
        .into_iter()
        .map(|p| (p.position().haversine_m(&center), p))
        .collect();
    ranked.sort_by(|a, b| a.0.total_cmp(&b.0));
    let split = ranked.partition_point(|(d, _)| *d <= radius_m);
    let far = ranked.split_off(split);
    let near = ranked;

    let near_quota = (max * NEAR_PERCENT).div_ceil(100);
    let near_take = near.len().min(near_quota);
    let far_take = far.len().min(max - near_take.min(max));
    let mut picked: Vec<Place> = Vec::with_capacity(max);
    let mut near_iter = near.into_iter();
    picked.extend(near_iter.by_ref().take(near_take).map(|(_, p)| p));
    picked.extend(far.into_iter().take(far_take).map(|(_, p)| p));
    if picked.len() < max {
        // not enough far places, backfill with remaining near ones
        let room = max - picked.len();
        picked.extend(near_iter.take(room).map(|(_, p)| p));
    }
    picked.truncate(max);
    picked
}

async fn search_cell<S: PlaceSearch>(search: &S, query: PlaceQuery, cell: Bounds) -> Vec<Place> {
    let mut found = Vec::new();
    for page in 1..=MAX_PAGES {
        match search.search(query, cell, page).await {
            Some(PlacePage { places, is_end }) => {
                found.extend(places);
                if is_end {
                    break;
                }
            }
            None => break,
        }
    }
    found
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoiVisibility {
    pub max_level: f64,
    pub max_scale_m: f64,
}

impl PoiVisibility {
    pub fn allows(&self, level: f64, scale_m: f64) -> bool {
        level <= self.max_level && scale_m <= self.max_scale_m
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IconBucket {
    Large,
    Small,
}

impl IconBucket {
    pub const THRESHOLD: f64 = 2.0;
    pub const MARGIN: f64 = 0.5;

    pub fn size_px(&self) -> u32 {
        match self {
            IconBucket::Large => 32,
            IconBucket::Small => 24,
        }
    }

    /// Changes bucket only once `level` clears the threshold by the margin.
    pub fn next(self, level: f64) -> IconBucket {
        match self {
            IconBucket::Large if level > Self::THRESHOLD + Self::MARGIN => IconBucket::Small,
            IconBucket::Small if level < Self::THRESHOLD - Self::MARGIN => IconBucket::Large,
            same => same,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchTicket {
    pub seq: u64,
    pub bounds: Bounds,
    pub kinds: Vec<PoiKind>,
    pub max_per_kind: usize,
    pub icon_size_px: u32,
}

#[derive(Debug, Clone, Default)]
pub struct PoiResults {
    pub seq: u64,
    pub per_kind: Vec<(PoiKind, Vec<Place>)>,
    pub icons: HashMap<PoiKind, MarkerIcon>,
}

/// Runs the searches for `ticket`. Does not touch any overlay.
pub async fn collect<S: PlaceSearch>(search: &S, ticket: &SearchTicket) -> PoiResults {
    let cells = grid_cells(&ticket.bounds);
    let center = ticket.bounds.center();
    let mut per_kind = Vec::with_capacity(ticket.kinds.len());
    for &kind in &ticket.kinds {
        let query = kind.query();
        let batches = join_all(cells.iter().map(|cell| search_cell(search, query, *cell))).await;
        let unique = dedupe_places(batches.into_iter().flatten().collect());
        let picked = pick_near_far(unique, center, kind.near_radius_m(), ticket.max_per_kind);
        debug!("🏷️ {} {} places over {} cells", kind.key(), picked.len(), cells.len());
        per_kind.push((kind, picked));
    }
    PoiResults {
        seq: ticket.seq,
        per_kind,
        icons: HashMap::new(),
    }
}

/// Fills `results.icons`; kinds whose icon fails keep their current image.
pub async fn resolve_icons<L: IconLoader>(cache: &IconCache<L>, results: &mut PoiResults, size_px: u32) {
    for (kind, _) in &results.per_kind {
        if let Some(icon) = cache.resolve(&kind.icon_url(), size_px).await {
            results.icons.insert(*kind, icon);
        }
    }
}

/// Simple leading-edge throttle.
#[derive(Debug, Clone)]
pub struct Throttle {
    interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn ready(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

pub struct PoiLayer<F: MarkerFactory> {
    pool: MarkerPool<F>,
    enabled: BTreeSet<PoiKind>,
    visibility: PoiVisibility,
    max_per_kind: usize,
    latest_seq: u64,
    applied_seq: u64,
    was_visible: bool,
    bucket: IconBucket,
    throttle: Option<Throttle>,
}

impl<F: MarkerFactory> PoiLayer<F> {
    pub fn new(factory: F, visibility: PoiVisibility, max_per_kind: usize) -> Self {
        Self {
            pool: MarkerPool::new(factory),
            enabled: BTreeSet::new(),
            visibility,
            max_per_kind,
            latest_seq: 0,
            applied_seq: 0,
            was_visible: false,
            bucket: IconBucket::Small,
            throttle: None,
        }
    }

    pub fn from_config(factory: F, config: &Config) -> Self {
        let visibility = PoiVisibility {
            max_level: config.poi_max_level,
            max_scale_m: config.poi_max_scale_m,
        };
        Self::new(factory, visibility, config.poi_max_results_per_kind).with_throttle(config.poi_throttle())
    }

    /// Searches closer together than `interval` are skipped.
    pub fn with_throttle(mut self, interval: Duration) -> Self {
        self.throttle = Some(Throttle::new(interval));
        self
    }

    pub fn pool(&self) -> &MarkerPool<F> {
        &self.pool
    }

    pub fn enabled(&self) -> &BTreeSet<PoiKind> {
        &self.enabled
    }

    pub fn set_enabled(&mut self, kinds: impl IntoIterator<Item = PoiKind>) {
        self.enabled = kinds.into_iter().collect();
        if self.enabled.is_empty() {
            // invalidate in-flight searches too
            self.latest_seq += 1;
            self.pool.hide_all();
        }
    }

    pub fn icon_bucket(&self) -> IconBucket {
        self.bucket
    }

    /// Returns a ticket when a search should run for the current view.
    ///
    /// Out of range is a no-op; overlays are hidden only when the view
    /// crosses from visible to not visible.
    pub fn begin_search(&mut self, map: &dyn MapView) -> Option<SearchTicket> {
        let level = map.level();
        let visible = self.visibility.allows(level, map.scale_bar_m());
        if !visible {
            if self.was_visible {
                info!("🙈 POI layer out of range at level {}", level);
                self.was_visible = false;
                self.latest_seq += 1;
                self.pool.hide_all();
            }
            return None;
        }
        self.was_visible = true;
        if self.enabled.is_empty() {
            return None;
        }
        if let Some(throttle) = &mut self.throttle {
            if !throttle.ready(Instant::now()) {
                debug!("⏳ POI search throttled");
                return None;
            }
        }
        self.bucket = self.bucket.next(level);
        self.latest_seq += 1;
        Some(SearchTicket {
            seq: self.latest_seq,
            bounds: map.bounds(),
            kinds: self.enabled.iter().copied().collect(),
            max_per_kind: self.max_per_kind,
            icon_size_px: self.bucket.size_px(),
        })
    }

    /// Upserts the results unless a newer search has been issued since.
    pub fn apply(&mut self, results: &PoiResults) -> bool {
        if results.seq != self.latest_seq || results.seq <= self.applied_seq {
            debug!(
                "🗑️ stale POI results seq={} latest={}",
                results.seq, self.latest_seq
            );
            return false;
        }
        let mut keep = HashSet::new();
        for (kind, places) in &results.per_kind {
            if !self.enabled.contains(kind) {
                continue;
            }
            let icon = results.icons.get(kind);
            for place in places {
                let key = poi_key(*kind, place);
                self.pool.upsert(&key, place.x, place.y, &place.name, icon);
                keep.insert(key);
            }
        }
        self.pool.reconcile(&keep, DEFAULT_GRACE_FRAMES);
        self.applied_seq = results.seq;
        true
    }

    /// begin, collect, resolve icons and apply in one go.
    pub async fn refresh<S: PlaceSearch, L: IconLoader>(
        &mut self,
        map: &dyn MapView,
        search: &S,
        icons: &IconCache<L>,
    ) -> bool {
        let Some(ticket) = self.begin_search(map) else {
            return false;
        };
        let mut results = collect(search, &ticket).await;
        resolve_icons(icons, &mut results, ticket.icon_size_px).await;
        self.apply(&results)
    }

    pub fn reset(&mut self) {
        self.pool.reset();
        self.latest_seq += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::test_support::FlatMap;
    use crate::marker_pool::test_support::{FakeFactory, icon};
    use rstest::{fixture, rstest};
    use std::sync::Mutex;

    fn place(id: &str, lat: f64, lng: f64) -> Place {
        Place {
            id: Some(id.to_string()),
            name: id.to_string(),
            x: lng,
            y: lat,
        }
    }

    struct FixedSearch {
        places: Vec<Place>,
        calls: Mutex<Vec<(PlaceQuery, u32)>>,
    }

    impl PlaceSearch for FixedSearch {
        fn search(&self, query: PlaceQuery, rect: Bounds, page: u32) -> impl Future<Output = Option<PlacePage>> + Send {
            self.calls
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .push((query, page));
            let places: Vec<Place> = if page == 1 {
                self.places
                    .iter()
                    .filter(|p| rect.contains(&p.position()))
                    .cloned()
                    .collect()
            } else {
                Vec::new()
            };
            async move {
                Some(PlacePage {
                    places,
                    is_end: page >= 2,
                })
            }
        }
    }

    #[fixture]
    fn layer() -> PoiLayer<FakeFactory> {
        let mut layer = PoiLayer::new(
            FakeFactory::default(),
            PoiVisibility {
                max_level: 5.0,
                max_scale_m: f64::INFINITY,
            },
            10,
        );
        layer.set_enabled([PoiKind::Subway]);
        layer
    }

    fn results(seq: u64, ids: &[&str]) -> PoiResults {
        PoiResults {
            seq,
            per_kind: vec![(
                PoiKind::Subway,
                ids.iter()
                    .enumerate()
                    .map(|(i, id)| place(id, 37.5 + i as f64 * 0.001, 127.0))
                    .collect(),
            )],
            icons: HashMap::new(),
        }
    }

    #[test]
    fn grid_covers_the_viewport() {
        let b = Bounds::around(LatLng::new(37.5, 127.0), 0.02, 0.04);
        let cells = grid_cells(&b);
        assert!(cells.len() > 1 && cells.len() <= MAX_CELLS_PER_AXIS * MAX_CELLS_PER_AXIS);
        let area: f64 = cells.iter().map(|c| c.rect().width() * c.rect().height()).sum();
        assert!((area - b.rect().width() * b.rect().height()).abs() < 1e-9);
    }

    #[test]
    fn tiny_viewport_is_a_single_cell() {
        let b = Bounds::around(LatLng::new(37.5, 127.0), 0.001, 0.001);
        assert_eq!(grid_cells(&b).len(), 1);
    }

    #[test]
    fn dedupe_by_id_then_coordinates() {
        let anon = Place {
            id: None,
            name: "a".into(),
            x: 127.0,
            y: 37.5,
        };
        let places = vec![place("1", 37.5, 127.0), place("1", 37.6, 127.0), anon.clone(), anon];
        assert_eq!(dedupe_places(places).len(), 2);
    }

    #[test]
    fn near_far_picker_prefers_near_but_keeps_some_far() {
        let center = LatLng::new(37.5, 127.0);
        let mut places: Vec<Place> = (0..10)
            .map(|i| place(&format!("n{i}"), 37.5 + i as f64 * 0.0001, 127.0))
            .collect();
        places.extend((0..10).map(|i| place(&format!("f{i}"), 37.6 + i as f64 * 0.001, 127.0)));
        let picked = pick_near_far(places, center, 500.0, 10);
        assert_eq!(picked.len(), 10);
        let near = picked.iter().filter(|p| p.name.starts_with('n')).count();
        assert_eq!(near, 7);
        assert_eq!(picked[0].name, "n0");
    }

    #[test]
    fn near_far_picker_backfills_from_near() {
        let center = LatLng::new(37.5, 127.0);
        let places: Vec<Place> = (0..12)
            .map(|i| place(&format!("n{i}"), 37.5 + i as f64 * 0.0001, 127.0))
            .collect();
        assert_eq!(pick_near_far(places, center, 500.0, 10).len(), 10);
    }

    #[rstest]
    #[case(IconBucket::Small, 2.0, IconBucket::Small)]
    #[case(IconBucket::Small, 1.0, IconBucket::Large)]
    #[case(IconBucket::Large, 2.0, IconBucket::Large)]
    #[case(IconBucket::Large, 3.0, IconBucket::Small)]
    fn icon_bucket_has_hysteresis(#[case] from: IconBucket, #[case] level: f64, #[case] to: IconBucket) {
        assert_eq!(from.next(level), to);
    }

    #[test]
    fn bus_stops_fall_back_to_keyword_search() {
        assert_eq!(PoiKind::BusStop.query(), PlaceQuery::Keyword("버스정류장"));
        assert_eq!(PoiKind::Subway.query(), PlaceQuery::Category("SW8"));
    }

    #[rstest]
    fn stale_results_do_not_touch_newer_overlays(mut layer: PoiLayer<FakeFactory>) {
        let map = FlatMap::new(1);
        let n = layer.begin_search(&map).expect("ticket n");
        let n1 = layer.begin_search(&map).expect("ticket n+1");
        assert!(layer.apply(&results(n1.seq, &["b", "c"])));
        let before = layer.pool().visible_keys();

        assert!(!layer.apply(&results(n.seq, &["a"])));
        assert_eq!(layer.pool().visible_keys(), before);
        assert!(!layer.pool().contains("subway:a"));
    }

    #[rstest]
    fn out_of_range_is_a_noop_until_the_boundary_is_crossed(mut layer: PoiLayer<FakeFactory>) {
        let mut map = FlatMap::new(1);
        let t = layer.begin_search(&map).expect("visible");
        assert!(layer.apply(&results(t.seq, &["a"])));

        map.level = 7.0;
        assert!(layer.begin_search(&map).is_none());
        assert!(layer.pool().visible_keys().is_empty(), "crossing hides");

        // further out-of-range frames change nothing
        assert!(layer.begin_search(&map).is_none());
        assert!(layer.pool().contains("subway:a"));
    }

    #[rstest]
    fn in_flight_search_is_dropped_after_leaving_range(mut layer: PoiLayer<FakeFactory>) {
        let mut map = FlatMap::new(1);
        let t = layer.begin_search(&map).expect("visible");
        map.level = 9.0;
        layer.begin_search(&map);
        assert!(!layer.apply(&results(t.seq, &["a"])));
        assert!(layer.pool().is_empty());
    }

    #[rstest]
    fn markers_missing_from_results_fade_after_grace(mut layer: PoiLayer<FakeFactory>) {
        let map = FlatMap::new(1);
        let t = layer.begin_search(&map).expect("t1");
        layer.apply(&results(t.seq, &["a", "b"]));
        let t = layer.begin_search(&map).expect("t2");
        layer.apply(&results(t.seq, &["a"]));
        assert!(layer.pool().get("subway:b").is_some_and(|m| m.visible));
        let t = layer.begin_search(&map).expect("t3");
        layer.apply(&results(t.seq, &["a"]));
        assert!(layer.pool().get("subway:b").is_some_and(|m| !m.visible));
    }

    #[rstest]
    fn icons_are_applied_per_kind(mut layer: PoiLayer<FakeFactory>) {
        let map = FlatMap::new(1);
        let t = layer.begin_search(&map).expect("ticket");
        let mut r = results(t.seq, &["a"]);
        r.icons.insert(PoiKind::Subway, icon("/icons/poi/subway.png", 24));
        layer.apply(&r);
        let marker = layer.pool().get("subway:a").expect("marker");
        assert_eq!(marker.image.as_deref(), Some("/icons/poi/subway.png|24"));
    }

    #[tokio::test]
    async fn collect_searches_every_cell_and_dedupes() {
        let map = FlatMap::new(1);
        let bounds = map.bounds();
        let c = bounds.center();
        let search = FixedSearch {
            places: vec![place("1", c.lat, c.lng), place("2", c.lat + 0.001, c.lng + 0.001)],
            calls: Mutex::new(Vec::new()),
        };
        let ticket = SearchTicket {
            seq: 1,
            bounds,
            kinds: vec![PoiKind::Subway, PoiKind::BusStop],
            max_per_kind: 5,
            icon_size_px: 24,
        };
        let results = collect(&search, &ticket).await;
        assert_eq!(results.per_kind.len(), 2);
        assert_eq!(results.per_kind[0].1.len(), 2);

        let calls = search.calls.lock().unwrap_or_else(|p| p.into_inner());
        let cells = grid_cells(&bounds).len();
        // two pages per cell per kind, then is_end
        assert_eq!(calls.len(), cells * 2 * 2);
        assert!(calls.iter().any(|(q, _)| *q == PlaceQuery::Keyword("버스정류장")));
    }

    struct StaticIcons;

    impl IconLoader for StaticIcons {
        fn load(&self, url: &str, size_px: u32) -> impl Future<Output = Option<MarkerIcon>> + Send {
            let found = (url == "/icons/poi/subway.png").then(|| icon(url, size_px));
            async move { found }
        }
    }

    #[rstest]
    #[tokio::test]
    async fn refresh_runs_a_full_search_cycle(mut layer: PoiLayer<FakeFactory>) {
        let map = FlatMap::new(1);
        let c = map.bounds().center();
        let search = FixedSearch {
            places: vec![place("7", c.lat, c.lng)],
            calls: Mutex::new(Vec::new()),
        };
        let icons = IconCache::new(StaticIcons);

        assert!(layer.refresh(&map, &search, &icons).await);
        let marker = layer.pool().get("subway:7").expect("poi marker");
        assert!(marker.visible);
        assert_eq!(marker.image.as_deref(), Some("/icons/poi/subway.png|24"));
        assert_eq!(layer.icon_bucket(), IconBucket::Small);
    }

    #[tokio::test(start_paused = true)]
    async fn refreshes_inside_the_throttle_interval_collapse() {
        let config = Config::default();
        let mut layer = PoiLayer::from_config(FakeFactory::default(), &config);
        layer.set_enabled([PoiKind::Subway]);
        let map = FlatMap::new(1);
        assert!(map.scale_bar_m() <= config.poi_max_scale_m);
        let c = map.bounds().center();
        let search = FixedSearch {
            places: vec![place("7", c.lat, c.lng)],
            calls: Mutex::new(Vec::new()),
        };
        let icons = IconCache::new(StaticIcons);
        let calls = |s: &FixedSearch| s.calls.lock().unwrap_or_else(|p| p.into_inner()).len();

        assert!(layer.refresh(&map, &search, &icons).await);
        let per_search = calls(&search);
        assert!(per_search > 0);

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(!layer.refresh(&map, &search, &icons).await);
        assert_eq!(calls(&search), per_search);

        tokio::time::advance(config.poi_throttle()).await;
        assert!(layer.refresh(&map, &search, &icons).await);
        assert_eq!(calls(&search), per_search * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_does_not_delay_the_out_of_range_hide() {
        let mut layer = PoiLayer::new(
            FakeFactory::default(),
            PoiVisibility {
                max_level: 5.0,
                max_scale_m: f64::INFINITY,
            },
            10,
        )
        .with_throttle(Duration::from_secs(10));
        layer.set_enabled([PoiKind::Subway]);
        let mut map = FlatMap::new(1);
        let t = layer.begin_search(&map).expect("first search");
        layer.apply(&results(t.seq, &["a"]));

        map.level = 8.0;
        assert!(layer.begin_search(&map).is_none());
        assert!(layer.pool().visible_keys().is_empty());
    }

    #[test]
    fn scale_bar_out_of_range_skips_search_and_hides_once() {
        let mut layer = PoiLayer::new(
            FakeFactory::default(),
            PoiVisibility {
                max_level: 5.0,
                max_scale_m: 100.0,
            },
            10,
        );
        layer.set_enabled([PoiKind::Subway]);
        let mut map = FlatMap::new(1);
        assert!(map.scale_bar_m() < 100.0);
        let t = layer.begin_search(&map).expect("in range");
        assert!(layer.apply(&results(t.seq, &["a"])));
        assert!(layer.pool().get("subway:a").is_some_and(|m| m.visible));

        // same level, half the pixels per degree doubles the scale bar
        map.px_per_deg = 50_000.0;
        assert!(map.level() <= 5.0 && map.scale_bar_m() > 100.0);
        assert!(layer.begin_search(&map).is_none());
        assert!(layer.pool().get("subway:a").is_some_and(|m| !m.visible));

        assert!(layer.begin_search(&map).is_none());
        assert!(layer.pool().contains("subway:a"));
        assert!(layer.pool().visible_keys().is_empty());

        map.px_per_deg = 100_000.0;
        assert!(layer.begin_search(&map).is_some());
    }

    #[test]
    fn throttle_spaces_out_searches() {
        let mut t = Throttle::new(Duration::from_millis(250));
        let start = Instant::now();
        assert!(t.ready(start));
        assert!(!t.ready(start + Duration::from_millis(100)));
        assert!(t.ready(start + Duration::from_millis(300)));
    }
}
