use std::future::Future;
use std::time::Duration;

use log::warn;

use crate::geo::LatLng;

pub const DEFAULT_GEOCODE_TIMEOUT: Duration = Duration::from_secs(4);

/// Address lookups. "Not found" is `None`, never an error.
pub trait Geocoder: Send + Sync {
    fn address_to_coords(&self, address: &str) -> impl Future<Output = Option<LatLng>> + Send;
    fn coords_to_address(&self, pos: LatLng) -> impl Future<Output = Option<String>> + Send;
}

impl<G: Geocoder> Geocoder for &G {
    fn address_to_coords(&self, address: &str) -> impl Future<Output = Option<LatLng>> + Send {
        (**self).address_to_coords(address)
    }

    fn coords_to_address(&self, pos: LatLng) -> impl Future<Output = Option<String>> + Send {
        (**self).coords_to_address(pos)
    }
}

/// Races `fut` against `limit`; a timeout resolves to `None`.
pub async fn with_timeout<T>(fut: impl Future<Output = Option<T>>, limit: Duration) -> Option<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!("⏱️ geocode timed out after {:?}", limit);
            None
        }
    }
}

pub struct GeocodeService<G> {
    geocoder: G,
    timeout: Duration,
}

impl<G: Geocoder> GeocodeService<G> {
    pub fn new(geocoder: G) -> Self {
        Self::with_limit(geocoder, DEFAULT_GEOCODE_TIMEOUT)
    }

    pub fn with_limit(geocoder: G, timeout: Duration) -> Self {
        Self { geocoder, timeout }
    }

    pub async fn locate(&self, address: &str) -> Option<LatLng> {
        let address = address.trim();
        if address.is_empty() {
            return None;
        }
        with_timeout(self.geocoder.address_to_coords(address), self.timeout).await
    }

    pub async fn describe(&self, pos: LatLng) -> Option<String> {
        with_timeout(self.geocoder.coords_to_address(pos), self.timeout).await
    }
}
