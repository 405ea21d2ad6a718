//! Keyed pool of live SDK markers.
//!
//! Markers are created on first sight of a key and then only nudged: moved
//! when displaced beyond [`POSITION_EPSILON`], re-imaged when the resolved icon
//! key changes. Visibility follows a frame-tick hysteresis so a marker that
//! drops out of one search result set does not blink.

use std::collections::{HashMap, HashSet};

use log::debug;

use crate::geo::{LatLng, POSITION_EPSILON};
use crate::icons::MarkerIcon;
use crate::sdk::{MarkerFactory, MarkerObject, Overlay};

pub const DEFAULT_GRACE_FRAMES: u64 = 2;

/// Explicit frame counter. One tick per reconcile pass.
#[derive(Debug, Default, Clone)]
pub struct FrameClock {
    tick: u64,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> u64 {
        self.tick
    }

    pub fn advance(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}

pub struct PoolEntry<M> {
    pub marker: M,
    pub seen_tick: u64,
    pub icon_key: Option<String>,
}

pub struct MarkerPool<F: MarkerFactory> {
    factory: F,
    clock: FrameClock,
    entries: HashMap<String, PoolEntry<F::Marker>>,
}

impl<F: MarkerFactory> MarkerPool<F> {
    pub fn new(factory: F) -> Self {
        Self::with_clock(factory, FrameClock::new())
    }

    pub fn with_clock(factory: F, clock: FrameClock) -> Self {
        Self {
            factory,
            clock,
            entries: HashMap::new(),
        }
    }

    pub fn tick(&self) -> u64 {
        self.clock.now()
    }

    /// Creates or updates the marker for `key` and stamps it with the current tick.
    pub fn upsert(
        &mut self,
        key: &str,
        x: f64,
        y: f64,
        title: &str,
        icon: Option<&MarkerIcon>,
    ) -> &mut F::Marker {
        let pos = LatLng::new(y, x);
        let tick = self.clock.now();
        let factory = &mut self.factory;
        let entry = self.entries.entry(key.to_string()).or_insert_with(|| {
            debug!("➕ pool create {}", key);
            PoolEntry {
                marker: factory.create_marker(pos, title, icon),
                seen_tick: tick,
                icon_key: icon.map(MarkerIcon::cache_key),
            }
        });

        if entry.marker.position().moved_beyond(&pos, POSITION_EPSILON) {
            entry.marker.set_position(pos);
        }
        if let Some(icon) = icon {
            let next = icon.cache_key();
            if entry.icon_key.as_deref() != Some(next.as_str()) {
                entry.marker.set_image(icon);
                entry.icon_key = Some(next);
            }
        }
        entry.seen_tick = tick;
        if !entry.marker.is_visible() {
            entry.marker.set_visible(true);
        }
        &mut entry.marker
    }

    /// Advances the frame, refreshes `keep_keys` and hides entries unseen for
    /// `grace_frames` ticks. Nothing is removed.
    pub fn reconcile(&mut self, keep_keys: &HashSet<String>, grace_frames: u64) {
        let tick = self.clock.advance();
        let mut hidden = 0usize;
        for (key, entry) in self.entries.iter_mut() {
            if keep_keys.contains(key) {
                entry.seen_tick = tick;
                if !entry.marker.is_visible() {
                    entry.marker.set_visible(true);
                }
            } else if tick.saturating_sub(entry.seen_tick) >= grace_frames && entry.marker.is_visible() {
                entry.marker.set_visible(false);
                hidden += 1;
            }
        }
        if hidden > 0 {
            debug!("🙈 pool reconcile tick={} hid {} markers", tick, hidden);
        }
    }

    pub fn hide_all(&mut self) {
        for entry in self.entries.values_mut() {
            if entry.marker.is_visible() {
                entry.marker.set_visible(false);
            }
        }
    }

    /// Drops every entry, detaching markers from the map.
    pub fn reset(&mut self) {
        for (_, mut entry) in self.entries.drain() {
            entry.marker.remove();
        }
    }

    pub fn get(&self, key: &str) -> Option<&F::Marker> {
        self.entries.get(key).map(|e| &e.marker)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn visible_keys(&self) -> HashSet<String> {
        self.entries
            .iter()
            .filter(|(_, e)| e.marker.is_visible())
            .map(|(k, _)| k.clone())
            .collect()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn pool() -> MarkerPool<FakeFactory> {
        MarkerPool::new(FakeFactory::default())
    }

    fn keys(list: &[&str]) -> HashSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[rstest]
    fn repeated_upsert_at_same_spot_does_not_move(mut pool: MarkerPool<FakeFactory>) {
        pool.upsert("subway:1", 127.0, 37.5, "Station", None);
        pool.upsert("subway:1", 127.0, 37.5, "Station", None);
        let marker = pool.get("subway:1").expect("pooled");
        assert_eq!(marker.set_position_calls, 0);
        assert_eq!(pool.len(), 1);
    }

    #[rstest]
    fn sub_epsilon_jitter_is_ignored_but_real_moves_apply(mut pool: MarkerPool<FakeFactory>) {
        pool.upsert("k", 127.0, 37.5, "", None);
        pool.upsert("k", 127.0 + 5e-8, 37.5, "", None);
        assert_eq!(pool.get("k").map(|m| m.set_position_calls), Some(0));
        pool.upsert("k", 127.001, 37.5, "", None);
        assert_eq!(pool.get("k").map(|m| m.set_position_calls), Some(1));
    }

    #[rstest]
    fn icon_swaps_only_when_key_changes(mut pool: MarkerPool<FakeFactory>) {
        let small = icon("/poi/cafe.png", 24);
        let large = icon("/poi/cafe.png", 32);
        pool.upsert("cafe:1", 127.0, 37.5, "", Some(&small));
        pool.upsert("cafe:1", 127.0, 37.5, "", Some(&small));
        assert_eq!(pool.get("cafe:1").map(|m| m.set_image_calls), Some(0));
        pool.upsert("cafe:1", 127.0, 37.5, "", Some(&large));
        assert_eq!(pool.get("cafe:1").map(|m| m.set_image_calls), Some(1));
        // a failed icon load passes None and keeps the current image
        pool.upsert("cafe:1", 127.0, 37.5, "", None);
        let marker = pool.get("cafe:1").expect("pooled");
        assert_eq!(marker.image.as_deref(), Some("/poi/cafe.png|32"));
    }

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(4)]
    fn unkept_marker_hides_on_the_grace_th_reconcile(mut pool: MarkerPool<FakeFactory>, #[case] grace: u64) {
        pool.upsert("a", 127.0, 37.5, "", None);
        pool.upsert("b", 127.1, 37.5, "", None);
        for _ in 0..grace - 1 {
            pool.reconcile(&keys(&["b"]), grace);
            assert!(pool.get("a").is_some_and(|m| m.visible));
        }
        pool.reconcile(&keys(&["b"]), grace);
        assert!(pool.get("a").is_some_and(|m| !m.visible));
        assert!(pool.get("b").is_some_and(|m| m.visible));
        assert!(pool.contains("a"), "hidden entries stay pooled");
    }

    #[rstest]
    fn reappearing_key_becomes_visible_again(mut pool: MarkerPool<FakeFactory>) {
        pool.upsert("a", 127.0, 37.5, "", None);
        pool.reconcile(&keys(&[]), DEFAULT_GRACE_FRAMES);
        pool.reconcile(&keys(&[]), DEFAULT_GRACE_FRAMES);
        assert!(pool.get("a").is_some_and(|m| !m.visible));
        pool.upsert("a", 127.0, 37.5, "", None);
        assert!(pool.get("a").is_some_and(|m| m.visible));
    }

    #[rstest]
    fn reset_removes_everything(mut pool: MarkerPool<FakeFactory>) {
        pool.upsert("a", 127.0, 37.5, "", None);
        pool.upsert("b", 127.0, 37.6, "", None);
        pool.reset();
        assert!(pool.is_empty());
    }
}
