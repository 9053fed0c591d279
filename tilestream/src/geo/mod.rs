//! Geographic primitives.
//!
//! Provides the latitude/longitude [`Sector`] rectangle used to address
//! tiles, the [`Globe`] projection used to turn geographic positions into
//! Cartesian model coordinates, and the [`Extent`] bounding volume tested
//! against the view frustum.
//!
//! All angles are in degrees. Cartesian coordinates use the convention
//! `x = r·cos(lat)·sin(lon)`, `y = r·sin(lat)`, `z = r·cos(lat)·cos(lon)`.

mod globe;
mod sector;

pub use globe::{Extent, Globe, SphereGlobe, EARTH_RADIUS_METERS};
pub use sector::{Sector, MAX_LAT, MAX_LON, MIN_LAT, MIN_LON};
