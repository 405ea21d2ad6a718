use serde::{Deserialize, Deserializer, Serialize};

use crate::geo::{Bounds, LatLng, pos_key};

/// Every API response is wrapped as `{ message, data }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub message: Option<String>,
    pub data: T,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DraftState {
    Before,
    Scheduled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinPoint {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftPin {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub title: Option<String>,
    pub draft_state: DraftState,
}

impl DraftPin {
    pub fn position(&self) -> LatLng {
        LatLng::new(self.lat, self.lng)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PinsResponse {
    #[serde(default)]
    pub points: Vec<PinPoint>,
    #[serde(default)]
    pub drafts: Vec<DraftPin>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PinFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draft_state: Option<DraftState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_new: Option<bool>,
}

/// Query sent to `GET /pins/map`: bounding box plus filters.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PinQuery {
    pub sw_lat: f64,
    pub sw_lng: f64,
    pub ne_lat: f64,
    pub ne_lng: f64,
    #[serde(flatten)]
    pub filters: PinFilters,
}

impl PinQuery {
    pub fn new(bounds: &Bounds, filters: &PinFilters) -> Self {
        let (sw, ne) = (bounds.south_west(), bounds.north_east());
        Self {
            sw_lat: sw.lat,
            sw_lng: sw.lng,
            ne_lat: ne.lat,
            ne_lng: ne.lng,
            filters: filters.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerSource {
    Pin,
    Draft,
}

/// What the map renders for one point. Rebuilt wholesale on every fetch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapMarker {
    pub id: String,
    pub position: LatLng,
    pub title: String,
    pub kind: String,
    pub source: MarkerSource,
    pub pos_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pin_draft_id: Option<String>,
}

impl MapMarker {
    pub fn from_point(point: &PinPoint) -> Self {
        Self {
            id: point.id.clone(),
            position: LatLng::new(point.lat, point.lng),
            title: point.title.clone().unwrap_or_default(),
            kind: point.kind.clone().unwrap_or_else(|| "pin".to_string()),
            source: MarkerSource::Pin,
            pos_key: pos_key(point.lat, point.lng),
            pin_draft_id: None,
        }
    }

    pub fn from_draft(draft: &DraftPin) -> Self {
        let kind = match draft.draft_state {
            DraftState::Before => "draft-before",
            DraftState::Scheduled => "draft-scheduled",
        };
        Self {
            id: format!("draft:{}", draft.id),
            position: draft.position(),
            title: draft.title.clone().unwrap_or_else(|| "답사예정".to_string()),
            kind: kind.to_string(),
            source: MarkerSource::Draft,
            pos_key: pos_key(draft.lat, draft.lng),
            pin_draft_id: Some(draft.id.clone()),
        }
    }
}

pub fn build_markers<'a>(
    points: &[PinPoint],
    drafts: impl IntoIterator<Item = &'a DraftPin>,
) -> Vec<MapMarker> {
    points
        .iter()
        .map(MapMarker::from_point)
        .chain(drafts.into_iter().map(MapMarker::from_draft))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoGroup {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(deserialize_with = "id_string")]
    pub pin_id: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedPhoto {
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// The API is inconsistent about numeric vs string ids.
fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Number(n) => n.to_string(),
    })
}
