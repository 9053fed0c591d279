//! Viewpoint and frustum culling.
//!
//! A [`View`] carries the per-frame camera state the assembler needs: the
//! eye point used by the LOD metric, the frustum used for visibility, and
//! the vertical exaggeration applied to terrain when computing tile points.

use glam::{DMat4, DVec3};

use crate::geo::Extent;

/// A view frustum as six inward-facing planes.
///
/// Each plane is stored as (unit normal, distance); a point `p` is inside
/// the half-space when `normal · p + distance >= 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    planes: [(DVec3, f64); 6],
}

impl Frustum {
    /// Extracts the frustum planes from an OpenGL-style view-projection matrix.
    pub fn from_matrix(vp: DMat4) -> Self {
        let m = vp.to_cols_array_2d();

        // Left, right, bottom, top, near, far.
        let planes = [
            Self::normalize_plane(
                m[0][3] + m[0][0],
                m[1][3] + m[1][0],
                m[2][3] + m[2][0],
                m[3][3] + m[3][0],
            ),
            Self::normalize_plane(
                m[0][3] - m[0][0],
                m[1][3] - m[1][0],
                m[2][3] - m[2][0],
                m[3][3] - m[3][0],
            ),
            Self::normalize_plane(
                m[0][3] + m[0][1],
                m[1][3] + m[1][1],
                m[2][3] + m[2][1],
                m[3][3] + m[3][1],
            ),
            Self::normalize_plane(
                m[0][3] - m[0][1],
                m[1][3] - m[1][1],
                m[2][3] - m[2][1],
                m[3][3] - m[3][1],
            ),
            Self::normalize_plane(
                m[0][3] + m[0][2],
                m[1][3] + m[1][2],
                m[2][3] + m[2][2],
                m[3][3] + m[3][2],
            ),
            Self::normalize_plane(
                m[0][3] - m[0][2],
                m[1][3] - m[1][2],
                m[2][3] - m[2][2],
                m[3][3] - m[3][2],
            ),
        ];

        Self { planes }
    }

    /// A frustum that accepts every volume.
    ///
    /// Degenerate planes evaluate to zero for any point, so nothing is
    /// ever behind them.
    pub fn unbounded() -> Self {
        Self {
            planes: [(DVec3::ZERO, 0.0); 6],
        }
    }

    fn normalize_plane(a: f64, b: f64, c: f64, d: f64) -> (DVec3, f64) {
        let normal = DVec3::new(a, b, c);
        let length = normal.length();
        if length > 0.0 {
            (normal / length, d / length)
        } else {
            (DVec3::ZERO, 0.0)
        }
    }

    /// Returns true unless the sphere lies entirely behind some plane.
    pub fn intersects(&self, extent: &Extent) -> bool {
        self.planes
            .iter()
            .all(|&(normal, distance)| normal.dot(extent.center()) + distance >= -extent.radius())
    }

    /// Returns true if the point is inside every plane.
    pub fn contains_point(&self, point: DVec3) -> bool {
        self.planes
            .iter()
            .all(|&(normal, distance)| normal.dot(point) + distance >= 0.0)
    }
}

/// Camera state for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct View {
    eye_point: DVec3,
    frustum: Frustum,
    vertical_exaggeration: f64,
}

impl View {
    /// Creates a view with no vertical exaggeration.
    pub fn new(eye_point: DVec3, frustum: Frustum) -> Self {
        Self {
            eye_point,
            frustum,
            vertical_exaggeration: 1.0,
        }
    }

    /// Creates a perspective view looking from `eye` towards `target`.
    ///
    /// # Arguments
    ///
    /// * `fov_y` - Vertical field of view in radians
    /// * `aspect` - Viewport width divided by height
    /// * `near`, `far` - Clip distances in model units
    pub fn look_at(
        eye: DVec3,
        target: DVec3,
        up: DVec3,
        fov_y: f64,
        aspect: f64,
        near: f64,
        far: f64,
    ) -> Self {
        let view = DMat4::look_at_rh(eye, target, up);
        let projection = DMat4::perspective_rh_gl(fov_y, aspect, near, far);
        Self::new(eye, Frustum::from_matrix(projection * view))
    }

    /// Sets the exaggeration applied to terrain elevations.
    pub fn with_vertical_exaggeration(mut self, exaggeration: f64) -> Self {
        self.vertical_exaggeration = exaggeration;
        self
    }

    pub fn eye_point(&self) -> DVec3 {
        self.eye_point
    }

    pub fn frustum(&self) -> &Frustum {
        &self.frustum
    }

    pub fn vertical_exaggeration(&self) -> f64 {
        self.vertical_exaggeration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn looking_down_negative_z() -> View {
        View::look_at(
            DVec3::new(0.0, 0.0, 30.0),
            DVec3::ZERO,
            DVec3::Y,
            std::f64::consts::FRAC_PI_2,
            1.0,
            0.1,
            1000.0,
        )
    }

    #[test]
    fn test_unbounded_accepts_everything() {
        let frustum = Frustum::unbounded();
        assert!(frustum.intersects(&Extent::new(DVec3::new(1e12, -1e12, 5.0), 0.0)));
        assert!(frustum.contains_point(DVec3::new(-3.0, 4.0, 1e9)));
    }

    #[test]
    fn test_sphere_in_front_is_visible() {
        let view = looking_down_negative_z();
        let extent = Extent::new(DVec3::ZERO, 10.0);
        assert!(view.frustum().intersects(&extent));
    }

    #[test]
    fn test_sphere_behind_eye_is_culled() {
        let view = looking_down_negative_z();
        let extent = Extent::new(DVec3::new(0.0, 0.0, 100.0), 5.0);
        assert!(!view.frustum().intersects(&extent));
    }

    #[test]
    fn test_sphere_far_to_the_side_is_culled() {
        let view = looking_down_negative_z();
        let extent = Extent::new(DVec3::new(500.0, 0.0, 0.0), 5.0);
        assert!(!view.frustum().intersects(&extent));
    }

    #[test]
    fn test_sphere_straddling_plane_is_visible() {
        let view = looking_down_negative_z();
        // Behind the eye but large enough to reach into the frustum.
        let extent = Extent::new(DVec3::new(0.0, 0.0, 40.0), 20.0);
        assert!(view.frustum().intersects(&extent));
    }

    #[test]
    fn test_contains_point() {
        let view = looking_down_negative_z();
        assert!(view.frustum().contains_point(DVec3::ZERO));
        assert!(!view.frustum().contains_point(DVec3::new(0.0, 0.0, 31.0)));
    }

    #[test]
    fn test_vertical_exaggeration_builder() {
        let view = View::new(DVec3::ONE, Frustum::unbounded()).with_vertical_exaggeration(2.5);
        assert_eq!(view.vertical_exaggeration(), 2.5);
        assert_eq!(view.eye_point(), DVec3::ONE);
    }
}
