//! Lossy canonicalization of raw coordinates into stable request keys.
//!
//! Rounding to 4 fractional digits (~11 m) makes nearby submissions collapse
//! onto the same key, which is what the dedup, cache, and storage layers all
//! key on. The transform is deterministic and idempotent: canonicalizing an
//! already-canonical pair returns it unchanged.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

const FRACTIONAL_DIGITS_SCALE: f64 = 10_000.0;

/// Canonical request key: rounded coordinates plus the configured query radius.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CanonicalKey {
    pub key_lat: f64,
    pub key_lng: f64,
    pub radius_m: u32,
}

impl CanonicalKey {
    /// Shared string form `"{lat}:{lng}:{radius}"` used as the cache key and
    /// the in-memory store index. Four fixed fractional digits keep the
    /// rendering stable across call sites.
    pub fn storage_key(&self) -> String {
        format!("{:.4}:{:.4}:{}", self.key_lat, self.key_lng, self.radius_m)
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.storage_key())
    }
}

/// Validation failure carrying one message per offending field, ready to be
/// rendered into the HTTP error envelope.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid coordinates")]
pub struct InvalidCoordinates {
    pub field_errors: BTreeMap<String, String>,
}

/// Validate raw coordinates and derive the canonical key.
///
/// Latitude must lie in [-90, 90] and longitude in [-180, 180]; both must be
/// finite. Each component is rounded half-up (ties away from zero) to exactly
/// 4 fractional digits.
pub fn canonicalize(lat: f64, lng: f64, radius_m: u32) -> Result<CanonicalKey, InvalidCoordinates> {
    let mut field_errors = BTreeMap::new();
    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        field_errors.insert(
            "lat".to_string(),
            "latitude must be a finite number between -90 and 90".to_string(),
        );
    }
    if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
        field_errors.insert(
            "lng".to_string(),
            "longitude must be a finite number between -180 and 180".to_string(),
        );
    }
    if !field_errors.is_empty() {
        return Err(InvalidCoordinates { field_errors });
    }
    Ok(CanonicalKey {
        key_lat: round_half_up(lat),
        key_lng: round_half_up(lng),
        radius_m,
    })
}

// f64::round ties away from zero, which matches half-up rounding of the
// decimal representation for both signs.
fn round_half_up(value: f64) -> f64 {
    let rounded = (value * FRACTIONAL_DIGITS_SCALE).round() / FRACTIONAL_DIGITS_SCALE;
    // Collapse -0.0 so the rendered key stays stable across sign of zero.
    if rounded == 0.0 { 0.0 } else { rounded }
}
