//! Boundary to the map SDK.
//!
//! Everything the reconciliation layer needs from the map widget is expressed
//! here so the state machines can run against a real binding or a test double.

use std::collections::BTreeSet;

use crate::geo::{Bounds, LatLng, ScreenPoint};
use crate::icons::MarkerIcon;

/// Identity of one map instance; label suppression zones can be scoped to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MapId(pub u64);

pub trait MapView {
    fn id(&self) -> MapId;
    fn level(&self) -> f64;
    fn bounds(&self) -> Bounds;
    /// Projects a coordinate to container pixels.
    fn container_point(&self, pos: LatLng) -> ScreenPoint;

    /// Meters represented by the scale bar at the current level.
    fn scale_bar_m(&self) -> f64 {
        let b = self.bounds();
        let sw = self.container_point(b.south_west());
        let ne = self.container_point(b.north_east());
        let px = (ne.x - sw.x).abs().max(1.0);
        // scale bar is ~100px wide
        b.width_m() / px * 100.0
    }
}

/// Any overlay drawn on the map: marker, label or hitbox.
pub trait Overlay {
    fn set_visible(&mut self, visible: bool);
    fn is_visible(&self) -> bool;
    fn set_z_index(&mut self, z: i32);
    /// Detaches the overlay from the map for good.
    fn remove(&mut self);
}

pub trait LabelOverlay: Overlay {
    fn set_text(&mut self, text: &str);
    fn text(&self) -> String;
    /// Applies the fade-in transition. Callers run it at most once per element.
    fn fade_in(&mut self);
}

pub trait MarkerObject: Overlay {
    fn position(&self) -> LatLng;
    fn set_position(&mut self, pos: LatLng);
    fn set_image(&mut self, icon: &MarkerIcon);
}

pub trait MarkerFactory {
    type Marker: MarkerObject;

    fn create_marker(&mut self, pos: LatLng, title: &str, icon: Option<&MarkerIcon>) -> Self::Marker;
}

/// Creates the three overlay kinds the mode controller arranges.
pub trait OverlayFactory {
    type Marker: MarkerObject;
    type Label: LabelOverlay;
    type Hitbox: Overlay;

    fn create_marker(&mut self, pos: LatLng, title: &str) -> Self::Marker;
    fn create_label(&mut self, pos: LatLng, text: &str) -> Self::Label;
    fn create_hitbox(&mut self, pos: LatLng) -> Self::Hitbox;
}

/// The SDK clusterer, addressed by marker key.
pub trait Clusterer {
    fn add_markers(&mut self, keys: &[String]);
    fn remove_markers(&mut self, keys: &[String]);
    fn clear(&mut self);
    fn managed_keys(&self) -> BTreeSet<String>;
}
