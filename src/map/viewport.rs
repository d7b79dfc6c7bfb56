use crate::message::GeoPoint;
use crate::storage::Storage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

pub const KEY_CENTER_LAT: &str = "map_center_lat";
pub const KEY_CENTER_LON: &str = "map_center_lon";

/// Camera fallback when no center was ever persisted (Gangnam station area,
/// same as the original client).
pub const DEFAULT_CENTER: GeoPoint = GeoPoint {
    lat: 37.4979,
    lng: 127.0276,
};

/// Visible map region as a latitude/longitude box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLngBounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

/// Seam to the host mapping SDK. Returns `None` until the host map object
/// exists; callers must treat that as "no query possible".
pub trait MapSurface: Send + Sync {
    fn bounds(&self) -> Option<LatLngBounds>;
}

/// Tracks the map camera: persists the last center the user was viewing and
/// answers bounding-box queries through the [`MapSurface`] seam.
pub struct ViewportController {
    storage: Arc<dyn Storage>,
    surface: Arc<dyn MapSurface>,
}

impl ViewportController {
    pub fn new(storage: Arc<dyn Storage>, surface: Arc<dyn MapSurface>) -> Self {
        Self { storage, surface }
    }

    /// Last persisted camera center, or the fixed fallback. A center only
    /// counts when both coordinates are present and parse.
    pub async fn restore_or_default(&self) -> GeoPoint {
        let lat = self.read_coord(KEY_CENTER_LAT).await;
        let lng = self.read_coord(KEY_CENTER_LON).await;

        match (lat, lng) {
            (Some(lat), Some(lng)) => GeoPoint { lat, lng },
            _ => DEFAULT_CENTER,
        }
    }

    /// Called when the map settles after a pan/zoom. Persists the new
    /// center unconditionally, last write wins.
    pub async fn on_idle(&self, center: GeoPoint) {
        if let Err(error) = self
            .storage
            .set(KEY_CENTER_LAT, &center.lat.to_string())
            .await
        {
            warn!(%error, "failed to persist map center latitude");
        }
        if let Err(error) = self
            .storage
            .set(KEY_CENTER_LON, &center.lng.to_string())
            .await
        {
            warn!(%error, "failed to persist map center longitude");
        }
    }

    /// Current visible bounds, or `None` while the host map is not
    /// initialized.
    pub fn current_bounds(&self) -> Option<LatLngBounds> {
        self.surface.bounds()
    }

    async fn read_coord(&self, key: &str) -> Option<f64> {
        match self.storage.get(key).await {
            Ok(Some(raw)) => raw.parse().ok(),
            Ok(None) => None,
            Err(error) => {
                warn!(%error, key, "failed to read persisted map center");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    struct FixedSurface(Option<LatLngBounds>);

    impl MapSurface for FixedSurface {
        fn bounds(&self) -> Option<LatLngBounds> {
            self.0
        }
    }

    fn controller(surface: Option<LatLngBounds>) -> (Arc<MemoryStorage>, ViewportController) {
        let storage = Arc::new(MemoryStorage::new());
        let controller = ViewportController::new(storage.clone(), Arc::new(FixedSurface(surface)));
        (storage, controller)
    }

    #[tokio::test]
    async fn falls_back_to_default_center_when_nothing_persisted() {
        let (_storage, controller) = controller(None);
        assert_eq!(controller.restore_or_default().await, DEFAULT_CENTER);
    }

    #[tokio::test]
    async fn idle_persists_and_restore_returns_it() {
        let (storage, controller) = controller(None);

        let center = GeoPoint {
            lat: 35.1796,
            lng: 129.0756,
        };
        controller.on_idle(center).await;

        assert_eq!(controller.restore_or_default().await, center);
        assert_eq!(
            storage.get(KEY_CENTER_LAT).await.unwrap().as_deref(),
            Some("35.1796")
        );
    }

    #[tokio::test]
    async fn half_persisted_center_counts_as_absent() {
        let (storage, controller) = controller(None);
        storage.set(KEY_CENTER_LAT, "37.0").await.unwrap();

        assert_eq!(controller.restore_or_default().await, DEFAULT_CENTER);
    }

    #[tokio::test]
    async fn unparsable_center_counts_as_absent() {
        let (storage, controller) = controller(None);
        storage.set(KEY_CENTER_LAT, "not-a-number").await.unwrap();
        storage.set(KEY_CENTER_LON, "127.0").await.unwrap();

        assert_eq!(controller.restore_or_default().await, DEFAULT_CENTER);
    }

    #[tokio::test]
    async fn bounds_come_from_the_map_surface() {
        let bounds = LatLngBounds {
            min_lat: 35.0,
            max_lat: 35.3,
            min_lon: 128.9,
            max_lon: 129.2,
        };

        let (_storage, uninitialized) = controller(None);
        assert_eq!(uninitialized.current_bounds(), None);

        let (_storage, ready) = controller(Some(bounds));
        assert_eq!(ready.current_bounds(), Some(bounds));
    }
}
