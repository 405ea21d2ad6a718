//! Zoom-driven arrangement of marker, label and hitbox overlays.
//!
//! Three mutually exclusive modes, chosen from the map level:
//!
//! | level                          | mode    | shown                           |
//! |--------------------------------|---------|---------------------------------|
//! | `<= safe_label_max`            | Label   | markers + labels (not selected) |
//! | between                        | Mid     | markers + hitboxes              |
//! | `>= cluster_min_level`         | Cluster | clusterer, selected/draft alone |
//!
//! Re-applying a mode never recreates overlays; it only adjusts visibility
//! and z-index.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use log::{debug, info};

use crate::geo::{LatLng, POSITION_EPSILON};
use crate::labels::LabelRegistry;
use crate::models::{MapMarker, MarkerSource};
use crate::sdk::{Clusterer, LabelOverlay, MapView, MarkerObject, Overlay, OverlayFactory};

/// Key of the not-yet-saved pin the user is placing.
pub const DRAFT_MARKER_ID: &str = "__draft__";

pub const Z_MARKER: i32 = 1;
pub const Z_LABEL: i32 = 2;
pub const Z_HITBOX: i32 = 3;
pub const Z_ELEVATED: i32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    Label,
    Mid,
    Cluster,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModeSettings {
    pub safe_label_max: f64,
    pub cluster_min_level: f64,
}

impl Default for ModeSettings {
    fn default() -> Self {
        Self {
            safe_label_max: 5.0,
            cluster_min_level: 8.0,
        }
    }
}

pub fn mode_for_level(level: f64, settings: &ModeSettings) -> RenderMode {
    if level <= settings.safe_label_max {
        RenderMode::Label
    } else if level >= settings.cluster_min_level {
        RenderMode::Cluster
    } else {
        RenderMode::Mid
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkerClick {
    pub key: String,
    pub position: LatLng,
    pub source: MarkerSource,
}

struct Slot<M, H> {
    marker: M,
    hitbox: H,
    position: LatLng,
    title: String,
    source: MarkerSource,
}

pub struct ModeController<F: OverlayFactory, C: Clusterer> {
    factory: F,
    clusterer: C,
    settings: ModeSettings,
    slots: BTreeMap<String, Slot<F::Marker, F::Hitbox>>,
    labels: LabelRegistry<F::Label>,
    faded: HashSet<String>,
    selected: Option<String>,
    mode: Option<RenderMode>,
    cluster_click_installed: bool,
}

impl<F: OverlayFactory, C: Clusterer> ModeController<F, C> {
    pub fn new(factory: F, clusterer: C, settings: ModeSettings) -> Self {
        Self {
            factory,
            clusterer,
            settings,
            slots: BTreeMap::new(),
            labels: LabelRegistry::new(),
            faded: HashSet::new(),
            selected: None,
            mode: None,
            cluster_click_installed: false,
        }
    }

    pub fn mode(&self) -> Option<RenderMode> {
        self.mode
    }

    pub fn settings(&self) -> &ModeSettings {
        &self.settings
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// Replaces the marker set. Known keys keep their overlays.
    pub fn set_markers(&mut self, markers: &[MapMarker], map: &dyn MapView) {
        let incoming: BTreeSet<&str> = markers.iter().map(|m| m.id.as_str()).collect();
        let stale: Vec<String> = self
            .slots
            .keys()
            .filter(|k| k.as_str() != DRAFT_MARKER_ID && !incoming.contains(k.as_str()))
            .cloned()
            .collect();
        for key in &stale {
            self.remove_slot(key);
        }

        let mut created = 0usize;
        for m in markers {
            if self.upsert_slot(&m.id, m.position, &m.title, m.source, map) {
                created += 1;
            }
        }
        debug!(
            "🗺️ markers set: {} total, {} new, {} removed",
            self.slots.len(),
            created,
            stale.len()
        );
        self.arrange();
    }

    /// Places (or moves) the unsaved draft marker.
    pub fn place_draft(&mut self, pos: LatLng, map: &dyn MapView) {
        self.upsert_slot(DRAFT_MARKER_ID, pos, "", MarkerSource::Draft, map);
        self.arrange();
    }

    pub fn clear_draft(&mut self) {
        if self.slots.contains_key(DRAFT_MARKER_ID) {
            self.remove_slot(DRAFT_MARKER_ID);
            self.arrange();
        }
    }

    /// Switches to the mode for `level` and re-arranges. Idempotent.
    pub fn apply_mode(&mut self, level: f64) -> RenderMode {
        let next = mode_for_level(level, &self.settings);
        if self.mode != Some(next) {
            info!("🔀 render mode {:?} -> {:?} at level {}", self.mode, next, level);
            self.mode = Some(next);
        }
        self.arrange();
        next
    }

    pub fn select(&mut self, key: Option<&str>) {
        self.selected = key.map(str::to_string);
        self.arrange();
    }

    /// Single entry point for marker clicks, direct or via a cluster.
    pub fn click(&mut self, key: &str) -> Option<MarkerClick> {
        let slot = self.slots.get(key)?;
        let click = MarkerClick {
            key: key.to_string(),
            position: slot.position,
            source: slot.source,
        };
        self.select(Some(key));
        Some(click)
    }

    /// Resolves a representative member of a clicked cluster and dispatches
    /// it like a marker click.
    pub fn handle_cluster_click(&mut self, members: &[String]) -> Option<MarkerClick> {
        if !self.cluster_click_installed {
            return None;
        }
        let key = members.iter().find(|k| self.slots.contains_key(k.as_str()))?.clone();
        self.click(&key)
    }

    pub fn cluster_click_installed(&self) -> bool {
        self.cluster_click_installed
    }

    /// Removes every overlay colocated with `pos`. Returns the removed keys.
    pub fn cleanup_overlays_at(&mut self, pos: LatLng) -> Vec<String> {
        let doomed: Vec<String> = self
            .slots
            .iter()
            .filter(|(_, s)| s.position.is_colocated(&pos))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            self.remove_slot(key);
        }
        if !doomed.is_empty() {
            debug!("🧹 cleaned {} overlays at {}", doomed.len(), pos.pos_key());
        }
        doomed
    }

    pub fn labels(&self) -> &LabelRegistry<F::Label> {
        &self.labels
    }

    pub fn labels_mut(&mut self) -> &mut LabelRegistry<F::Label> {
        &mut self.labels
    }

    pub fn clusterer(&self) -> &C {
        &self.clusterer
    }

    pub fn marker(&self, key: &str) -> Option<&F::Marker> {
        self.slots.get(key).map(|s| &s.marker)
    }

    pub fn hitbox(&self, key: &str) -> Option<&F::Hitbox> {
        self.slots.get(key).map(|s| &s.hitbox)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.slots.keys()
    }

    fn upsert_slot(
        &mut self,
        key: &str,
        pos: LatLng,
        title: &str,
        source: MarkerSource,
        map: &dyn MapView,
    ) -> bool {
        if let Some(slot) = self.slots.get_mut(key) {
            if slot.position.moved_beyond(&pos, POSITION_EPSILON) {
                slot.marker.set_position(pos);
                slot.position = pos;
                // labels and hitboxes are anchored, re-register at the new spot
                if key != DRAFT_MARKER_ID {
                    let label = self.factory.create_label(pos, title);
                    self.labels.register_label(key, label, pos, map);
                    self.faded.remove(key);
                }
                slot.hitbox.remove();
                slot.hitbox = self.factory.create_hitbox(pos);
            }
            slot.title = title.to_string();
            slot.source = source;
            return false;
        }

        let marker = self.factory.create_marker(pos, title);
        let hitbox = self.factory.create_hitbox(pos);
        // the unsaved draft has no title to show
        if key != DRAFT_MARKER_ID {
            let label = self.factory.create_label(pos, title);
            self.labels.register_label(key, label, pos, map);
        }
        self.slots.insert(
            key.to_string(),
            Slot {
                marker,
                hitbox,
                position: pos,
                title: title.to_string(),
                source,
            },
        );
        true
    }

    fn remove_slot(&mut self, key: &str) {
        if let Some(mut slot) = self.slots.remove(key) {
            slot.marker.remove();
            slot.hitbox.remove();
        }
        if let Some(mut label) = self.labels.unregister_label(key) {
            label.remove();
        }
        self.faded.remove(key);
        if self.clusterer.managed_keys().contains(key) {
            self.clusterer.remove_markers(&[key.to_string()]);
        }
        if self.selected.as_deref() == Some(key) {
            self.selected = None;
        }
    }

    fn is_exempt(&self, key: &str) -> bool {
        key == DRAFT_MARKER_ID || self.selected.as_deref() == Some(key)
    }

    fn arrange(&mut self) {
        let Some(mode) = self.mode else {
            return;
        };
        match mode {
            RenderMode::Label => self.arrange_label(),
            RenderMode::Mid => self.arrange_mid(),
            RenderMode::Cluster => self.arrange_cluster(),
        }
    }

    fn arrange_label(&mut self) {
        if !self.clusterer.managed_keys().is_empty() {
            self.clusterer.clear();
        }
        let keys: Vec<String> = self.slots.keys().cloned().collect();
        for key in keys {
            let exempt = self.is_exempt(&key);
            let selected = self.selected.as_deref() == Some(key.as_str());
            let Some(slot) = self.slots.get_mut(&key) else {
                continue;
            };
            show_marker(&mut slot.marker, exempt);
            set_visible(&mut slot.hitbox, false);

            if selected {
                self.labels.set_wanted(&key, false);
                continue;
            }
            if let Some(label) = self.labels.get_mut(&key) {
                if label.text() != slot.title {
                    label.set_text(&slot.title);
                }
                label.set_z_index(Z_LABEL);
                if self.faded.insert(key.clone()) {
                    label.fade_in();
                }
            }
            self.labels.set_wanted(&key, true);
        }
    }

    fn arrange_mid(&mut self) {
        if !self.clusterer.managed_keys().is_empty() {
            self.clusterer.clear();
        }
        let keys: Vec<String> = self.slots.keys().cloned().collect();
        for key in keys {
            let exempt = self.is_exempt(&key);
            let Some(slot) = self.slots.get_mut(&key) else {
                continue;
            };
            show_marker(&mut slot.marker, exempt);
            slot.hitbox.set_z_index(Z_HITBOX);
            set_visible(&mut slot.hitbox, true);
            self.labels.set_wanted(&key, false);
        }
    }

    fn arrange_cluster(&mut self) {
        if !self.cluster_click_installed {
            self.cluster_click_installed = true;
            debug!("🔌 cluster click handler installed");
        }

        let wanted: BTreeSet<String> = self
            .slots
            .keys()
            .filter(|k| !self.is_exempt(k))
            .cloned()
            .collect();
        let managed = self.clusterer.managed_keys();
        let to_remove: Vec<String> = managed.difference(&wanted).cloned().collect();
        let to_add: Vec<String> = wanted.difference(&managed).cloned().collect();
        if !to_remove.is_empty() {
            self.clusterer.remove_markers(&to_remove);
        }
        if !to_add.is_empty() {
            self.clusterer.add_markers(&to_add);
        }

        let keys: Vec<String> = self.slots.keys().cloned().collect();
        for key in keys {
            let exempt = self.is_exempt(&key);
            let Some(slot) = self.slots.get_mut(&key) else {
                continue;
            };
            if exempt {
                show_marker(&mut slot.marker, true);
            } else {
                // drawn by the clusterer
                set_visible(&mut slot.marker, false);
            }
            set_visible(&mut slot.hitbox, false);
            self.labels.set_wanted(&key, false);
        }
    }
}

fn show_marker<M: Overlay>(marker: &mut M, elevated: bool) {
    marker.set_z_index(if elevated { Z_ELEVATED } else { Z_MARKER });
    set_visible(marker, true);
}

fn set_visible<O: Overlay + ?Sized>(overlay: &mut O, visible: bool) {
    if overlay.is_visible() != visible {
        overlay.set_visible(visible);
    }
}
