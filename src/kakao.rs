//! Kakao Local REST client backing geocoding and POI search.

use std::future::Future;

use log::{debug, warn};
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::config::Config;
use crate::geo::{Bounds, LatLng};
use crate::geocode::Geocoder;
use crate::poi::{Place, PlacePage, PlaceQuery, PlaceSearch};

const PAGE_SIZE: u32 = 15;

#[derive(Debug, Deserialize)]
struct Meta {
    #[serde(default)]
    is_end: bool,
}

#[derive(Debug, Deserialize)]
struct Documents<T> {
    meta: Option<Meta>,
    #[serde(default = "Vec::new")]
    documents: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct PlaceDoc {
    id: Option<String>,
    place_name: String,
    x: String,
    y: String,
}

#[derive(Debug, Deserialize)]
struct AddressDoc {
    x: String,
    y: String,
}

#[derive(Debug, Deserialize)]
struct AddressName {
    address_name: String,
}

#[derive(Debug, Deserialize)]
struct RegionDoc {
    road_address: Option<AddressName>,
    address: Option<AddressName>,
}

fn to_place(doc: PlaceDoc) -> Option<Place> {
    Some(Place {
        id: doc.id.filter(|id| !id.is_empty()),
        name: doc.place_name,
        x: doc.x.parse().ok()?,
        y: doc.y.parse().ok()?,
    })
}

fn to_page(body: Documents<PlaceDoc>) -> PlacePage {
    PlacePage {
        is_end: body.meta.map(|m| m.is_end).unwrap_or(true),
        places: body.documents.into_iter().filter_map(to_place).collect(),
    }
}

/// `rect` parameter: `min_x,min_y,max_x,max_y` in lng/lat.
fn rect_param(rect: &Bounds) -> String {
    let (sw, ne) = (rect.south_west(), rect.north_east());
    format!("{},{},{},{}", sw.lng, sw.lat, ne.lng, ne.lat)
}

pub struct KakaoLocal {
    http: Client,
    base_url: String,
    rest_key: String,
}

impl KakaoLocal {
    pub fn new(http: Client, base_url: impl Into<String>, rest_key: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            rest_key: rest_key.into(),
        }
    }

    /// `None` when no REST key is configured.
    pub fn from_config(http: Client, config: &Config) -> Option<Self> {
        let key = config.kakao_rest_key.clone()?;
        Some(Self::new(http, config.kakao_base_url.clone(), key))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Option<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .get(&url)
            .header("Authorization", format!("KakaoAK {}", self.rest_key))
            .query(query)
            .send()
            .await;
        let resp = match resp {
            Ok(resp) => resp,
            Err(e) => {
                warn!("📡 kakao request failed {}: {}", path, e);
                return None;
            }
        };
        if !resp.status().is_success() {
            warn!("⚠️ kakao {} returned {}", path, resp.status());
            return None;
        }
        match resp.json::<T>().await {
            Ok(body) => Some(body),
            Err(e) => {
                warn!("📋 kakao {} payload: {}", path, e);
                None
            }
        }
    }
}

impl Geocoder for KakaoLocal {
    fn address_to_coords(&self, address: &str) -> impl Future<Output = Option<LatLng>> + Send {
        let query = vec![("query", address.to_string())];
        async move {
            let body: Documents<AddressDoc> = self.get_json("/v2/local/search/address.json", &query).await?;
            let first = body.documents.into_iter().next()?;
            Some(LatLng::new(first.y.parse().ok()?, first.x.parse().ok()?))
        }
    }

    fn coords_to_address(&self, pos: LatLng) -> impl Future<Output = Option<String>> + Send {
        let query = vec![("x", pos.lng.to_string()), ("y", pos.lat.to_string())];
        async move {
            let body: Documents<RegionDoc> = self.get_json("/v2/local/geo/coord2address.json", &query).await?;
            let first = body.documents.into_iter().next()?;
            first
                .road_address
                .or(first.address)
                .map(|a| a.address_name)
        }
    }
}

impl PlaceSearch for KakaoLocal {
    fn search(&self, query: PlaceQuery, rect: Bounds, page: u32) -> impl Future<Output = Option<PlacePage>> + Send {
        let (path, mut params) = match query {
            PlaceQuery::Category(code) => (
                "/v2/local/search/category.json",
                vec![("category_group_code", code.to_string())],
            ),
            PlaceQuery::Keyword(word) => ("/v2/local/search/keyword.json", vec![("query", word.to_string())]),
        };
        params.push(("rect", rect_param(&rect)));
        params.push(("page", page.to_string()));
        params.push(("size", PAGE_SIZE.to_string()));
        async move {
            let body: Documents<PlaceDoc> = self.get_json(path, &params).await?;
            let result = to_page(body);
            debug!("🔎 kakao {:?} page {} -> {}", query, page, result.places.len());
            if result.places.is_empty() && result.is_end {
                return None;
            }
            Some(result)
        }
    }
}
