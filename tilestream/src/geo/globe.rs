//! Globe projection and bounding volumes.

use glam::DVec3;

/// Mean equatorial radius of the Earth in meters (WGS84).
pub const EARTH_RADIUS_METERS: f64 = 6_378_137.0;

/// Projection from geographic positions to Cartesian model coordinates.
///
/// The engine only needs a radius for its LOD metric and a position
/// mapping for distance and visibility tests. Elevation models are
/// optional; the default surface is the bare ellipsoid/sphere.
pub trait Globe: Send + Sync {
    /// Reference radius in meters.
    fn radius(&self) -> f64;

    /// Surface elevation in meters at the given position.
    fn elevation(&self, _lat: f64, _lon: f64) -> f64 {
        0.0
    }

    /// Cartesian point for a position at `elevation` meters above the surface.
    fn compute_point(&self, lat: f64, lon: f64, elevation: f64) -> DVec3;
}

/// A perfect sphere with no terrain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SphereGlobe {
    radius: f64,
}

impl SphereGlobe {
    pub fn new(radius: f64) -> Self {
        Self { radius }
    }

    /// A sphere with the Earth's equatorial radius.
    pub fn earth() -> Self {
        Self::new(EARTH_RADIUS_METERS)
    }
}

impl Default for SphereGlobe {
    fn default() -> Self {
        Self::earth()
    }
}

impl Globe for SphereGlobe {
    fn radius(&self) -> f64 {
        self.radius
    }

    fn compute_point(&self, lat: f64, lon: f64, elevation: f64) -> DVec3 {
        let r = self.radius + elevation;
        let (sin_lat, cos_lat) = lat.to_radians().sin_cos();
        let (sin_lon, cos_lon) = lon.to_radians().sin_cos();
        DVec3::new(r * cos_lat * sin_lon, r * sin_lat, r * cos_lat * cos_lon)
    }
}

/// Bounding sphere used for frustum culling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent {
    center: DVec3,
    radius: f64,
}

impl Extent {
    pub fn new(center: DVec3, radius: f64) -> Self {
        Self { center, radius }
    }

    pub fn center(&self) -> DVec3 {
        self.center
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_point_axes() {
        let globe = SphereGlobe::new(1.0);

        let p = globe.compute_point(0.0, 0.0, 0.0);
        assert!((p - DVec3::new(0.0, 0.0, 1.0)).length() < 1e-12);

        let p = globe.compute_point(90.0, 0.0, 0.0);
        assert!((p - DVec3::new(0.0, 1.0, 0.0)).length() < 1e-12);

        let p = globe.compute_point(0.0, 90.0, 0.0);
        assert!((p - DVec3::new(1.0, 0.0, 0.0)).length() < 1e-12);
    }

    #[test]
    fn test_compute_point_elevation() {
        let globe = SphereGlobe::new(100.0);
        let p = globe.compute_point(45.0, 45.0, 10.0);
        assert!((p.length() - 110.0).abs() < 1e-9);
    }

    #[test]
    fn test_earth_defaults() {
        let globe = SphereGlobe::default();
        assert_eq!(globe.radius(), EARTH_RADIUS_METERS);
        assert_eq!(globe.elevation(10.0, 10.0), 0.0);
    }
}
