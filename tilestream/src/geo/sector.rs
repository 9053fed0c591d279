//! Latitude/longitude rectangles.

use glam::DVec3;

use super::globe::{Extent, Globe};
use crate::error::GeoError;

/// Minimum valid latitude in degrees.
pub const MIN_LAT: f64 = -90.0;

/// Maximum valid latitude in degrees.
pub const MAX_LAT: f64 = 90.0;

/// Minimum valid longitude in degrees.
pub const MIN_LON: f64 = -180.0;

/// Maximum valid longitude in degrees.
pub const MAX_LON: f64 = 180.0;

/// An axis-aligned latitude/longitude rectangle.
///
/// Bounds are inclusive and always ordered (`south <= north`,
/// `west <= east`). Sectors never wrap across the antimeridian; a region
/// spanning it must be expressed as two sectors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sector {
    south: f64,
    north: f64,
    west: f64,
    east: f64,
}

impl Sector {
    /// The whole sphere.
    pub const FULL_SPHERE: Sector = Sector {
        south: MIN_LAT,
        north: MAX_LAT,
        west: MIN_LON,
        east: MAX_LON,
    };

    /// Creates a sector from bounds in degrees.
    ///
    /// # Errors
    ///
    /// Returns `GeoError` if bounds are reversed, non-finite, or outside
    /// the valid latitude/longitude ranges.
    pub fn new(south: f64, north: f64, west: f64, east: f64) -> Result<Self, GeoError> {
        let lat_ok = south.is_finite()
            && north.is_finite()
            && south <= north
            && (MIN_LAT..=MAX_LAT).contains(&south)
            && (MIN_LAT..=MAX_LAT).contains(&north);
        if !lat_ok {
            return Err(GeoError::InvalidLatitude { south, north });
        }

        let lon_ok = west.is_finite()
            && east.is_finite()
            && west <= east
            && (MIN_LON..=MAX_LON).contains(&west)
            && (MIN_LON..=MAX_LON).contains(&east);
        if !lon_ok {
            return Err(GeoError::InvalidLongitude { west, east });
        }

        Ok(Self::from_bounds(south, north, west, east))
    }

    /// Creates a sector without range validation.
    ///
    /// Used for sectors derived from tile keys, whose bounds are computed
    /// from the tiling origin and may extend past the poles when the level
    /// delta does not divide the covered range evenly.
    pub(crate) const fn from_bounds(south: f64, north: f64, west: f64, east: f64) -> Self {
        Self {
            south,
            north,
            west,
            east,
        }
    }

    pub fn south(&self) -> f64 {
        self.south
    }

    pub fn north(&self) -> f64 {
        self.north
    }

    pub fn west(&self) -> f64 {
        self.west
    }

    pub fn east(&self) -> f64 {
        self.east
    }

    /// Angular height in degrees.
    pub fn delta_lat(&self) -> f64 {
        self.north - self.south
    }

    /// Angular width in degrees.
    pub fn delta_lon(&self) -> f64 {
        self.east - self.west
    }

    /// Angular height in radians.
    pub fn delta_lat_radians(&self) -> f64 {
        self.delta_lat().to_radians()
    }

    /// Returns the (latitude, longitude) midpoint.
    pub fn centroid(&self) -> (f64, f64) {
        (
            0.5 * (self.south + self.north),
            0.5 * (self.west + self.east),
        )
    }

    /// Returns true if the position lies inside the sector (inclusive).
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.south && lat <= self.north && lon >= self.west && lon <= self.east
    }

    /// Returns true if the sectors overlap or share an edge.
    pub fn intersects(&self, other: &Sector) -> bool {
        !(other.east < self.west
            || other.west > self.east
            || other.north < self.south
            || other.south > self.north)
    }

    /// Returns the overlapping region, if any.
    pub fn intersection(&self, other: &Sector) -> Option<Sector> {
        if !self.intersects(other) {
            return None;
        }
        Some(Self::from_bounds(
            self.south.max(other.south),
            self.north.min(other.north),
            self.west.max(other.west),
            self.east.min(other.east),
        ))
    }

    /// Returns the smallest sector containing both sectors.
    pub fn union(&self, other: &Sector) -> Sector {
        Self::from_bounds(
            self.south.min(other.south),
            self.north.max(other.north),
            self.west.min(other.west),
            self.east.max(other.east),
        )
    }

    /// Splits the sector into four quadrants.
    ///
    /// Order is southwest, southeast, northwest, northeast.
    pub fn subdivide(&self) -> [Sector; 4] {
        let (mid_lat, mid_lon) = self.centroid();
        [
            Self::from_bounds(self.south, mid_lat, self.west, mid_lon),
            Self::from_bounds(self.south, mid_lat, mid_lon, self.east),
            Self::from_bounds(mid_lat, self.north, self.west, mid_lon),
            Self::from_bounds(mid_lat, self.north, mid_lon, self.east),
        ]
    }

    /// Computes the Cartesian corner points on the globe surface.
    ///
    /// Order is southwest, southeast, northeast, northwest. Surface
    /// elevation is scaled by `exaggeration`.
    pub fn corner_points(&self, globe: &dyn Globe, exaggeration: f64) -> [DVec3; 4] {
        [
            surface_point(globe, self.south, self.west, exaggeration),
            surface_point(globe, self.south, self.east, exaggeration),
            surface_point(globe, self.north, self.east, exaggeration),
            surface_point(globe, self.north, self.west, exaggeration),
        ]
    }

    /// Computes the Cartesian point at the sector's centroid.
    pub fn center_point(&self, globe: &dyn Globe, exaggeration: f64) -> DVec3 {
        let (lat, lon) = self.centroid();
        surface_point(globe, lat, lon, exaggeration)
    }

    /// Computes a bounding sphere enclosing the sector's surface.
    ///
    /// The sphere is centred on the centroid point and reaches the farthest
    /// of the corners and edge midpoints.
    pub fn compute_extent(&self, globe: &dyn Globe, exaggeration: f64) -> Extent {
        let (mid_lat, mid_lon) = self.centroid();
        let center = surface_point(globe, mid_lat, mid_lon, exaggeration);

        let samples = [
            (self.south, self.west),
            (self.south, self.east),
            (self.north, self.east),
            (self.north, self.west),
            (self.south, mid_lon),
            (self.north, mid_lon),
            (mid_lat, self.west),
            (mid_lat, self.east),
        ];

        let radius = samples
            .iter()
            .map(|&(lat, lon)| surface_point(globe, lat, lon, exaggeration).distance(center))
            .fold(0.0_f64, f64::max);

        Extent::new(center, radius)
    }
}

impl std::fmt::Display for Sector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({:.4}°, {:.4}°) - ({:.4}°, {:.4}°)",
            self.south, self.west, self.north, self.east
        )
    }
}

fn surface_point(globe: &dyn Globe, lat: f64, lon: f64, exaggeration: f64) -> DVec3 {
    let elevation = globe.elevation(lat, lon) * exaggeration;
    globe.compute_point(lat, lon, elevation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::SphereGlobe;

    #[test]
    fn test_new_rejects_reversed_latitude() {
        let result = Sector::new(10.0, -10.0, 0.0, 1.0);
        assert!(matches!(result, Err(GeoError::InvalidLatitude { .. })));
    }

    #[test]
    fn test_new_rejects_out_of_range_longitude() {
        let result = Sector::new(0.0, 1.0, -190.0, 0.0);
        assert!(matches!(result, Err(GeoError::InvalidLongitude { .. })));
    }

    #[test]
    fn test_new_rejects_nan() {
        assert!(Sector::new(f64::NAN, 1.0, 0.0, 1.0).is_err());
    }

    #[test]
    fn test_deltas_and_centroid() {
        let sector = Sector::new(-10.0, 30.0, 20.0, 60.0).unwrap();
        assert_eq!(sector.delta_lat(), 40.0);
        assert_eq!(sector.delta_lon(), 40.0);
        assert_eq!(sector.centroid(), (10.0, 40.0));
    }

    #[test]
    fn test_contains_is_inclusive() {
        let sector = Sector::new(0.0, 10.0, 0.0, 10.0).unwrap();
        assert!(sector.contains(0.0, 0.0));
        assert!(sector.contains(10.0, 10.0));
        assert!(!sector.contains(10.1, 5.0));
    }

    #[test]
    fn test_intersects() {
        let a = Sector::new(0.0, 10.0, 0.0, 10.0).unwrap();
        let b = Sector::new(5.0, 15.0, 5.0, 15.0).unwrap();
        let c = Sector::new(20.0, 30.0, 20.0, 30.0).unwrap();
        let edge = Sector::new(10.0, 20.0, 0.0, 10.0).unwrap();

        assert!(a.intersects(&b));
        assert!(b.intersects(&a));
        assert!(!a.intersects(&c));
        assert!(a.intersects(&edge), "Shared edges count as intersecting");
    }

    #[test]
    fn test_intersection() {
        let a = Sector::new(0.0, 10.0, 0.0, 10.0).unwrap();
        let b = Sector::new(5.0, 15.0, -5.0, 5.0).unwrap();
        let overlap = a.intersection(&b).unwrap();
        assert_eq!(overlap, Sector::new(5.0, 10.0, 0.0, 5.0).unwrap());

        let far = Sector::new(50.0, 60.0, 50.0, 60.0).unwrap();
        assert!(a.intersection(&far).is_none());
    }

    #[test]
    fn test_union() {
        let a = Sector::new(0.0, 10.0, 0.0, 10.0).unwrap();
        let b = Sector::new(-5.0, 5.0, 20.0, 30.0).unwrap();
        assert_eq!(a.union(&b), Sector::new(-5.0, 10.0, 0.0, 30.0).unwrap());
    }

    #[test]
    fn test_subdivide_quadrants() {
        let sector = Sector::new(0.0, 36.0, 0.0, 36.0).unwrap();
        let [sw, se, nw, ne] = sector.subdivide();

        assert_eq!(sw, Sector::new(0.0, 18.0, 0.0, 18.0).unwrap());
        assert_eq!(se, Sector::new(0.0, 18.0, 18.0, 36.0).unwrap());
        assert_eq!(nw, Sector::new(18.0, 36.0, 0.0, 18.0).unwrap());
        assert_eq!(ne, Sector::new(18.0, 36.0, 18.0, 36.0).unwrap());
    }

    #[test]
    fn test_corner_points_on_sphere() {
        let globe = SphereGlobe::new(1000.0);
        let sector = Sector::new(0.0, 10.0, 0.0, 10.0).unwrap();
        for point in sector.corner_points(&globe, 1.0) {
            assert!((point.length() - 1000.0).abs() < 1e-6);
        }
        let center = sector.center_point(&globe, 1.0);
        assert!((center.length() - 1000.0).abs() < 1e-6);
    }

    #[test]
    fn test_extent_encloses_corners() {
        let globe = SphereGlobe::new(6_378_137.0);
        let sector = Sector::new(-90.0, -54.0, -180.0, -144.0).unwrap();
        let extent = sector.compute_extent(&globe, 1.0);

        for point in sector.corner_points(&globe, 1.0) {
            assert!(point.distance(extent.center()) <= extent.radius() + 1e-6);
        }
    }

    #[test]
    fn test_display() {
        let sector = Sector::new(0.0, 1.0, 2.0, 3.0).unwrap();
        let text = sector.to_string();
        assert!(text.contains("0.0000"));
        assert!(text.contains("3.0000"));
    }
}
