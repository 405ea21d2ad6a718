//! On-screen label tracking with radius-based suppression.
//!
//! A label is drawn iff its owner wants it shown and no suppression zone
//! covers it. Zones come in two flavours:
//!
//! * map-scoped zones match labels on the same map whose projected pixel
//!   distance to the zone center is within the radius;
//! * global zones are used when the caller does not know the map. They match
//!   the nearest registered label(s) by coordinate distance, bounded by
//!   [`GLOBAL_ZONE_MAX_DEG`]. The pixel radius is not consulted.
//!
//! Show calls only remove zones of their own flavour, so a global show does
//! not undo a map-scoped hide. Callers rely on that.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use crate::geo::LatLng;
use crate::sdk::{MapId, MapView, Overlay};

pub const GLOBAL_ZONE_MAX_DEG: f64 = 5e-4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ZoneId(u64);

#[derive(Debug, Clone)]
struct Zone {
    id: ZoneId,
    map: Option<MapId>,
    center: LatLng,
    radius_px: f64,
    // degree distance of the labels a global zone matched
    match_deg: Option<f64>,
}

struct LabelEntry<L> {
    el: L,
    pos: LatLng,
    map: MapId,
    wanted: bool,
    suppressed_by: BTreeSet<ZoneId>,
}

impl<L: Overlay> LabelEntry<L> {
    fn sync(&mut self) {
        let visible = self.wanted && self.suppressed_by.is_empty();
        if self.el.is_visible() != visible {
            self.el.set_visible(visible);
        }
    }
}

pub struct LabelRegistry<L> {
    labels: BTreeMap<String, LabelEntry<L>>,
    zones: Vec<Zone>,
    next_zone: u64,
}

impl<L> Default for LabelRegistry<L> {
    fn default() -> Self {
        Self {
            labels: BTreeMap::new(),
            zones: Vec::new(),
            next_zone: 0,
        }
    }
}

impl<L: Overlay> LabelRegistry<L> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks `el` under `key`. Existing zones apply immediately.
    pub fn register_label(&mut self, key: &str, el: L, pos: LatLng, map: &dyn MapView) {
        let map_id = map.id();
        let here = map.container_point(pos);
        let suppressed_by = self
            .zones
            .iter()
            .filter(|z| match z.map {
                Some(zone_map) => {
                    zone_map == map_id && map.container_point(z.center).distance(&here) <= z.radius_px
                }
                None => {
                    let limit = z.match_deg.unwrap_or(GLOBAL_ZONE_MAX_DEG);
                    z.center.degree_distance(&pos) <= limit + 1e-12
                }
            })
            .map(|z| z.id)
            .collect();
        let mut entry = LabelEntry {
            el,
            pos,
            map: map_id,
            wanted: true,
            suppressed_by,
        };
        entry.sync();
        if let Some(mut old) = self.labels.insert(key.to_string(), entry) {
            old.el.remove();
        }
    }

    pub fn unregister_label(&mut self, key: &str) -> Option<L> {
        self.labels.remove(key).map(|e| e.el)
    }

    /// Owner-side visibility; suppression still applies on top.
    pub fn set_wanted(&mut self, key: &str, wanted: bool) {
        if let Some(entry) = self.labels.get_mut(key) {
            entry.wanted = wanted;
            entry.sync();
        }
    }

    pub fn hide_labels_around(&mut self, map: &dyn MapView, pos: LatLng, radius_px: f64) -> ZoneId {
        let id = self.alloc_zone();
        let map_id = map.id();
        let center = map.container_point(pos);
        let mut hidden = 0usize;
        for entry in self.labels.values_mut().filter(|e| e.map == map_id) {
            if map.container_point(entry.pos).distance(&center) <= radius_px {
                entry.suppressed_by.insert(id);
                entry.sync();
                hidden += 1;
            }
        }
        debug!("🫥 zone {:?} on {:?} hides {} labels", id, map_id, hidden);
        self.zones.push(Zone {
            id,
            map: Some(map_id),
            center: pos,
            radius_px,
            match_deg: None,
        });
        id
    }

    pub fn hide_labels_around_any(&mut self, pos: LatLng, radius_px: f64) -> ZoneId {
        let id = self.alloc_zone();
        let nearest = self
            .labels
            .values()
            .map(|e| e.pos.degree_distance(&pos))
            .fold(f64::INFINITY, f64::min);
        let match_deg = (nearest <= GLOBAL_ZONE_MAX_DEG).then_some(nearest);
        if let Some(limit) = match_deg {
            for entry in self.labels.values_mut() {
                if entry.pos.degree_distance(&pos) <= limit + 1e-12 {
                    entry.suppressed_by.insert(id);
                    entry.sync();
                }
            }
        }
        self.zones.push(Zone {
            id,
            map: None,
            center: pos,
            radius_px,
            match_deg,
        });
        id
    }

    /// Removes the nearest zone scoped to `map` that covers `pos`.
    pub fn show_labels_around(&mut self, map: &dyn MapView, pos: LatLng, radius_px: f64) -> bool {
        let map_id = map.id();
        let here = map.container_point(pos);
        let nearest = self
            .zones
            .iter()
            .filter(|z| z.map == Some(map_id))
            .map(|z| (z.id, map.container_point(z.center).distance(&here), z.radius_px))
            .filter(|(_, d, r)| *d <= r.max(radius_px))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, _, _)| id);
        match nearest {
            Some(id) => {
                self.release_zone(id);
                true
            }
            None => false,
        }
    }

    /// Removes the nearest global zone. Map-scoped zones are left alone.
    pub fn show_labels_around_any(&mut self, pos: LatLng, _radius_px: f64) -> bool {
        let nearest = self
            .zones
            .iter()
            .filter(|z| z.map.is_none())
            .map(|z| (z.id, z.center.degree_distance(&pos)))
            .filter(|(_, d)| *d <= GLOBAL_ZONE_MAX_DEG)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, _)| id);
        match nearest {
            Some(id) => {
                self.release_zone(id);
                true
            }
            None => false,
        }
    }

    pub fn release_zone(&mut self, id: ZoneId) {
        self.zones.retain(|z| z.id != id);
        for entry in self.labels.values_mut() {
            if entry.suppressed_by.remove(&id) {
                entry.sync();
            }
        }
    }

    pub fn is_suppressed(&self, key: &str) -> bool {
        self.labels
            .get(key)
            .is_some_and(|e| !e.suppressed_by.is_empty())
    }

    pub fn is_visible(&self, key: &str) -> bool {
        self.labels.get(key).is_some_and(|e| e.el.is_visible())
    }

    pub fn get(&self, key: &str) -> Option<&L> {
        self.labels.get(key).map(|e| &e.el)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut L> {
        self.labels.get_mut(key).map(|e| &mut e.el)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.labels.keys()
    }

    pub fn visible_keys(&self) -> BTreeSet<String> {
        self.labels
            .iter()
            .filter(|(_, e)| e.el.is_visible())
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn zone_count(&self) -> usize {
        self.zones.len()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    fn alloc_zone(&mut self) -> ZoneId {
        self.next_zone += 1;
        ZoneId(self.next_zone)
    }
}
