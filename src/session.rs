//! One map instance: its event bus, mode controller and label registry.

use log::{debug, info};

use crate::cluster::{MarkerClick, ModeController, ModeSettings, RenderMode};
use crate::events::{MapEvent, MapEventBus};
use crate::geo::LatLng;
use crate::sdk::{Clusterer, MapView, OverlayFactory};
use crate::viewport::PinsSnapshot;

pub const CLEANUP_LISTENER: &str = "map:cleanup-overlays-at";
pub const LABEL_ZONE_LISTENER: &str = "map:label-zones";

/// Default suppression radius around a freshly placed pin.
pub const PIN_LABEL_RADIUS_PX: f64 = 36.0;

pub struct MapSession<F: OverlayFactory, C: Clusterer> {
    bus: MapEventBus,
    controller: ModeController<F, C>,
    cleanup_enabled: bool,
    label_zones_enabled: bool,
}

impl<F: OverlayFactory, C: Clusterer> MapSession<F, C> {
    pub fn new(factory: F, clusterer: C, settings: ModeSettings) -> Self {
        let mut session = Self {
            bus: MapEventBus::new(),
            controller: ModeController::new(factory, clusterer, settings),
            cleanup_enabled: false,
            label_zones_enabled: false,
        };
        session.install_listeners();
        session
    }

    /// Safe to call repeatedly; each listener is installed once.
    pub fn install_listeners(&mut self) {
        if self.bus.install(CLEANUP_LISTENER) {
            self.cleanup_enabled = true;
        }
        if self.bus.install(LABEL_ZONE_LISTENER) {
            self.label_zones_enabled = true;
        }
    }

    pub fn bus(&self) -> &MapEventBus {
        &self.bus
    }

    pub fn controller(&self) -> &ModeController<F, C> {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut ModeController<F, C> {
        &mut self.controller
    }

    pub fn publish(&mut self, event: MapEvent) {
        self.bus.publish(event);
    }

    /// Dispatches every queued event in publish order. Returns how many ran.
    pub fn pump(&mut self, map: &dyn MapView) -> usize {
        let events: Vec<MapEvent> = self.bus.drain().collect();
        let count = events.len();
        for event in events {
            match event {
                MapEvent::CleanupOverlaysAt { pos } if self.cleanup_enabled => {
                    self.controller.cleanup_overlays_at(pos);
                }
                MapEvent::HideLabelsAround { pos, radius_px } if self.label_zones_enabled => {
                    self.controller.labels_mut().hide_labels_around(map, pos, radius_px);
                }
                MapEvent::ShowLabelsAround { pos, radius_px } if self.label_zones_enabled => {
                    self.controller.labels_mut().show_labels_around(map, pos, radius_px);
                }
                other => debug!("no listener for {:?}", other),
            }
        }
        count
    }

    pub fn on_zoom_changed(&mut self, map: &dyn MapView) -> RenderMode {
        self.controller.apply_mode(map.level())
    }

    /// Pushes a fetched pin set into the overlays and re-applies the mode.
    pub fn on_pins(&mut self, snapshot: &PinsSnapshot, map: &dyn MapView) {
        self.controller.set_markers(&snapshot.markers, map);
        self.controller.apply_mode(map.level());
    }

    pub fn place_draft(&mut self, pos: LatLng, map: &dyn MapView) {
        self.controller.place_draft(pos, map);
        self.publish(MapEvent::HideLabelsAround {
            pos,
            radius_px: PIN_LABEL_RADIUS_PX,
        });
        self.pump(map);
    }

    pub fn cancel_draft(&mut self, pos: LatLng, map: &dyn MapView) {
        self.controller.clear_draft();
        self.publish(MapEvent::ShowLabelsAround {
            pos,
            radius_px: PIN_LABEL_RADIUS_PX,
        });
        self.pump(map);
    }

    /// The draft at `pos` was saved; drop whatever overlays sit there so the
    /// next pin fetch can redraw the real pin.
    pub fn promote_draft(&mut self, pos: LatLng, map: &dyn MapView) {
        info!("📌 draft promoted at {}", pos.pos_key());
        self.publish(MapEvent::ShowLabelsAround {
            pos,
            radius_px: PIN_LABEL_RADIUS_PX,
        });
        self.publish(MapEvent::CleanupOverlaysAt { pos });
        self.pump(map);
    }

    pub fn click(&mut self, key: &str) -> Option<MarkerClick> {
        self.controller.click(key)
    }

    pub fn cluster_click(&mut self, members: &[String]) -> Option<MarkerClick> {
        self.controller.handle_cluster_click(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::DRAFT_MARKER_ID;
    use crate::cluster::test_support::{FakeClusterer, FakeOverlays};
    use crate::labels::test_support::FlatMap;
    use crate::models::{MapMarker, PinPoint};
    use rstest::{fixture, rstest};

    type Session = MapSession<FakeOverlays, FakeClusterer>;

    #[fixture]
    fn session() -> Session {
        MapSession::new(
            FakeOverlays::default(),
            FakeClusterer::default(),
            ModeSettings::default(),
        )
    }

    fn snapshot_with(points: &[(&str, f64, f64)]) -> PinsSnapshot {
        PinsSnapshot {
            markers: points
                .iter()
                .map(|(id, lat, lng)| {
                    MapMarker::from_point(&PinPoint {
                        id: id.to_string(),
                        lat: *lat,
                        lng: *lng,
                        title: Some(id.to_string()),
                        kind: None,
                    })
                })
                .collect(),
            ..PinsSnapshot::default()
        }
    }

    #[rstest]
    fn listeners_install_once(mut session: Session) {
        session.install_listeners();
        session.install_listeners();
        assert!(session.bus().is_installed(CLEANUP_LISTENER));
        assert!(session.bus().is_installed(LABEL_ZONE_LISTENER));
    }

    #[rstest]
    fn placing_a_draft_hides_nearby_labels(mut session: Session) {
        let map = FlatMap::new(1);
        session.on_pins(&snapshot_with(&[("1", 37.405, 126.905)]), &map);
        assert!(session.controller().labels().is_visible("1"));

        session.place_draft(LatLng::new(37.405, 126.90501), &map);
        assert!(!session.controller().labels().is_visible("1"));
        assert_eq!(session.bus().pending(), 0);

        session.cancel_draft(LatLng::new(37.405, 126.90501), &map);
        assert!(session.controller().labels().is_visible("1"));
        assert!(session.controller().marker(DRAFT_MARKER_ID).is_none());
    }

    #[rstest]
    fn promotion_cleans_colocated_overlays(mut session: Session) {
        let map = FlatMap::new(1);
        let pos = LatLng::new(37.405, 126.905);
        session.on_pins(&snapshot_with(&[("1", 37.401, 126.901)]), &map);
        session.place_draft(pos, &map);
        assert!(session.controller().marker(DRAFT_MARKER_ID).is_some());

        session.promote_draft(pos, &map);
        assert!(session.controller().marker(DRAFT_MARKER_ID).is_none());
        assert!(session.controller().marker("1").is_some());
    }

    #[rstest]
    fn zoom_drives_the_render_mode(mut session: Session) {
        let mut map = FlatMap::new(1);
        session.on_pins(&snapshot_with(&[("1", 37.401, 126.901)]), &map);
        map.level = 9.0;
        assert_eq!(session.on_zoom_changed(&map), RenderMode::Cluster);
        map.level = 6.0;
        assert_eq!(session.on_zoom_changed(&map), RenderMode::Mid);
    }

    #[rstest]
    fn events_are_dispatched_in_publish_order(mut session: Session) {
        let map = FlatMap::new(1);
        let pos = LatLng::new(37.401, 126.901);
        session.on_pins(&snapshot_with(&[("1", 37.401, 126.901)]), &map);
        session.publish(MapEvent::HideLabelsAround { pos, radius_px: 10.0 });
        session.publish(MapEvent::ShowLabelsAround { pos, radius_px: 10.0 });
        assert_eq!(session.pump(&map), 2);
        assert!(session.controller().labels().is_visible("1"));
    }
}
