//! Geofence evaluation: is a reported location fix inside any authorized site?
//!
//! The evaluator is an ordered rule list. Absence of policy and untrustworthy
//! measurement are checked before geometry, so a low-quality input can never
//! be laundered into a pass by a lucky-looking coordinate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::{distance_meters, Coordinate};
use crate::types::{GeofenceResult, Reason};

/// Default ceiling on acceptable GPS accuracy, in meters.
pub const DEFAULT_MAX_ACCURACY_M: f64 = 50.0;

/// A named circular region within which presence is authorized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    pub name: String,
    #[serde(flatten)]
    pub center: Coordinate,
    pub radius_m: f64,
}

/// A client-reported location fix. Transient; never persisted by the core.
#[derive(Debug, Clone, Copy)]
pub struct LocationFix {
    pub coord: Coordinate,
    /// Advisory horizontal accuracy in meters, as reported by the client.
    pub accuracy_m: f64,
    pub captured_at: DateTime<Utc>,
}

impl LocationFix {
    pub fn new(coord: Coordinate, accuracy_m: f64) -> Self {
        LocationFix { coord, accuracy_m, captured_at: Utc::now() }
    }
}

/// Operator policy applied to every geofence decision.
#[derive(Debug, Clone, Copy)]
pub struct GeofencePolicy {
    /// Fixes with a reported accuracy above this are rejected outright,
    /// even when geometrically inside a site.
    pub max_accuracy_m: f64,
}

impl Default for GeofencePolicy {
    fn default() -> Self {
        GeofencePolicy { max_accuracy_m: DEFAULT_MAX_ACCURACY_M }
    }
}

impl GeofencePolicy {
    /// Evaluate a fix against a snapshot of the site registry.
    ///
    /// Rule order (first match wins): no sites configured, accuracy too
    /// poor, outside the nearest site's radius, ok. Containment is judged
    /// against the nearest site only.
    pub fn evaluate(&self, fix: &LocationFix, sites: &[Site]) -> GeofenceResult {
        if sites.is_empty() {
            // Fail closed: without a registry there is nothing to be inside.
            return GeofenceResult {
                within: false,
                nearest_site: None,
                distance_m: None,
                reason: Reason::NoSitesConfigured,
            };
        }

        if fix.accuracy_m > self.max_accuracy_m {
            tracing::debug!(
                accuracy_m = fix.accuracy_m,
                max_accuracy_m = self.max_accuracy_m,
                "fix rejected before geometry: accuracy over policy ceiling"
            );
            return GeofenceResult {
                within: false,
                nearest_site: None,
                distance_m: None,
                reason: Reason::GpsAccuracyPoor,
            };
        }

        let mut nearest = &sites[0];
        let mut d_min = distance_meters(fix.coord, nearest.center);
        for site in &sites[1..] {
            let d = distance_meters(fix.coord, site.center);
            if d < d_min {
                d_min = d;
                nearest = site;
            }
        }

        let within = d_min <= nearest.radius_m;
        GeofenceResult {
            within,
            nearest_site: Some(nearest.name.clone()),
            distance_m: Some(d_min),
            reason: if within { Reason::Ok } else { Reason::OutsideRadius },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(name: &str, lat: f64, lng: f64, radius_m: f64) -> Site {
        Site {
            name: name.to_string(),
            center: Coordinate::new(lat, lng).unwrap(),
            radius_m,
        }
    }

    fn fix(lat: f64, lng: f64, accuracy_m: f64) -> LocationFix {
        LocationFix::new(Coordinate::new(lat, lng).unwrap(), accuracy_m)
    }

    #[test]
    fn test_empty_registry_fails_closed() {
        // Even a perfect fix is denied when no sites are configured.
        let result = GeofencePolicy::default().evaluate(&fix(14.0, 100.0, 1.0), &[]);
        assert!(!result.within);
        assert_eq!(result.reason, Reason::NoSitesConfigured);
        assert!(result.distance_m.is_none());
    }

    #[test]
    fn test_poor_accuracy_overrides_geometric_containment() {
        // Fix sits exactly at the site center, but accuracy 100 m > max 50 m.
        let sites = [site("HQ", 14.0, 100.0, 200.0)];
        let result = GeofencePolicy::default().evaluate(&fix(14.0, 100.0, 100.0), &sites);
        assert!(!result.within);
        assert_eq!(result.reason, Reason::GpsAccuracyPoor);
    }

    #[test]
    fn test_inside_radius_ok() {
        let sites = [site("HQ", 14.0, 100.0, 200.0)];
        let result = GeofencePolicy::default().evaluate(&fix(14.0, 100.0, 5.0), &sites);
        assert!(result.within);
        assert_eq!(result.reason, Reason::Ok);
        assert_eq!(result.nearest_site.as_deref(), Some("HQ"));
        assert!(result.distance_m.unwrap() < 1.0);
    }

    #[test]
    fn test_outside_radius() {
        // ~500 m east of a site whose radius is 100 m.
        let sites = [site("HQ", 0.0, 0.0, 100.0)];
        let result = GeofencePolicy::default().evaluate(&fix(0.0, 0.0045, 5.0), &sites);
        assert!(!result.within);
        assert_eq!(result.reason, Reason::OutsideRadius);
        let d = result.distance_m.unwrap();
        assert!((d - 500.0).abs() < 5.0, "got {d}");
    }

    #[test]
    fn test_nearest_site_selected() {
        let sites = [
            site("far", 1.0, 1.0, 50.0),
            site("near", 0.0, 0.001, 200.0),
        ];
        let result = GeofencePolicy::default().evaluate(&fix(0.0, 0.0, 5.0), &sites);
        assert_eq!(result.nearest_site.as_deref(), Some("near"));
        assert!(result.within);
    }

    #[test]
    fn test_accuracy_at_ceiling_accepted() {
        let sites = [site("HQ", 14.0, 100.0, 200.0)];
        let result = GeofencePolicy::default().evaluate(&fix(14.0, 100.0, 50.0), &sites);
        assert_eq!(result.reason, Reason::Ok);
    }

    #[test]
    fn test_no_sites_checked_before_accuracy() {
        // Both rules would fire; the empty registry wins.
        let result = GeofencePolicy::default().evaluate(&fix(14.0, 100.0, 500.0), &[]);
        assert_eq!(result.reason, Reason::NoSitesConfigured);
    }
}
