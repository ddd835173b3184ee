//! Gateway location fixes and the provider seam the pipeline polls.

use std::sync::{Arc, RwLock};

use serde::Serialize;

/// 10^5: coordinates keep five decimal places.
const SCALE: f64 = 100_000.0;

/// A latitude/longitude pair rounded to 5 decimal places at construction.
///
/// Rounding is part of the contract: fixes that differ below ~1 m collapse
/// to the same value and therefore into the same publish group.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LocationFix {
    latitude: f64,
    longitude: f64,
}

impl LocationFix {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        LocationFix {
            latitude: round_coord(latitude),
            longitude: round_coord(longitude),
        }
    }

    /// The `{0, 0}` fix used when nothing better is known.
    pub fn origin() -> Self {
        LocationFix::new(0.0, 0.0)
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    /// Integer key in 1e-5 degree units, usable for hashing and grouping.
    pub fn grid_key(&self) -> (i64, i64) {
        (
            (self.latitude * SCALE).round() as i64,
            (self.longitude * SCALE).round() as i64,
        )
    }
}

fn round_coord(v: f64) -> f64 {
    (v * SCALE).round() / SCALE
}

/// Source of the gateway's last known position.
pub trait LocationProvider: Send + Sync {
    fn current_location(&self) -> Option<LocationFix>;
}

/// Location provider that never knows where it is.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLocation;

impl LocationProvider for NoLocation {
    fn current_location(&self) -> Option<LocationFix> {
        None
    }
}

/// Last-known location shared between an updater (GPS callback, host app)
/// and the pipeline.
#[derive(Debug, Default, Clone)]
pub struct SharedLocation {
    inner: Arc<RwLock<Option<LocationFix>>>,
}

impl SharedLocation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fix(fix: LocationFix) -> Self {
        let shared = Self::new();
        shared.update(Some(fix));
        shared
    }

    pub fn update(&self, fix: Option<LocationFix>) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = fix;
    }
}

impl LocationProvider for SharedLocation {
    fn current_location(&self) -> Option<LocationFix> {
        *self.inner.read().unwrap_or_else(|e| e.into_inner())
    }
}
