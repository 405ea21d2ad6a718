//! Map-scoped event bus.
//!
//! Producers (draft promotion, pin placement) publish; the owning session
//! drains and dispatches. Listeners register through [`MapEventBus::install`],
//! which succeeds once per name for the lifetime of the bus.

use std::collections::{HashSet, VecDeque};

use log::debug;

use crate::geo::LatLng;

#[derive(Debug, Clone, PartialEq)]
pub enum MapEvent {
    /// Remove overlays colocated with `pos` (a draft was promoted in place).
    CleanupOverlaysAt { pos: LatLng },
    HideLabelsAround { pos: LatLng, radius_px: f64 },
    ShowLabelsAround { pos: LatLng, radius_px: f64 },
}

#[derive(Debug, Default)]
pub struct MapEventBus {
    queue: VecDeque<MapEvent>,
    installed: HashSet<&'static str>,
}

impl MapEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if `listener` was already installed.
    pub fn install(&mut self, listener: &'static str) -> bool {
        let fresh = self.installed.insert(listener);
        if fresh {
            debug!("🔌 listener installed: {}", listener);
        }
        fresh
    }

    pub fn is_installed(&self, listener: &str) -> bool {
        self.installed.contains(listener)
    }

    pub fn publish(&mut self, event: MapEvent) {
        self.queue.push_back(event);
    }

    pub fn drain(&mut self) -> impl Iterator<Item = MapEvent> + '_ {
        self.queue.drain(..)
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_is_once_only() {
        let mut bus = MapEventBus::new();
        assert!(bus.install("cleanup-overlays-at"));
        assert!(!bus.install("cleanup-overlays-at"));
        assert!(bus.is_installed("cleanup-overlays-at"));
    }

    #[test]
    fn events_drain_in_publish_order() {
        let mut bus = MapEventBus::new();
        let a = LatLng::new(37.5, 127.0);
        bus.publish(MapEvent::HideLabelsAround { pos: a, radius_px: 36.0 });
        bus.publish(MapEvent::CleanupOverlaysAt { pos: a });
        let drained: Vec<_> = bus.drain().collect();
        assert_eq!(drained.len(), 2);
        assert!(matches!(drained[0], MapEvent::HideLabelsAround { .. }));
        assert_eq!(bus.pending(), 0);
    }
}
