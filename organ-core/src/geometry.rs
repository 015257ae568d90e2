//! Frame and rotation helpers shared by all organ kinds.
//!
//! Headings are unit vectors. A frame is a [`DMat3`] whose first column is
//! the heading and whose remaining columns complete an orthonormal basis.

use glam::{DMat3, DVec3};

/// Builds an orthonormal frame whose first column is `h` (normalized).
///
/// A zero vector yields the identity frame.
pub fn ons(h: DVec3) -> DMat3 {
    let h = h.normalize_or_zero();
    if h == DVec3::ZERO {
        return DMat3::IDENTITY;
    }
    let (b, c) = h.any_orthonormal_pair();
    DMat3::from_cols(h, b, c)
}

#[inline]
pub fn rot_x(a: f64) -> DMat3 {
    DMat3::from_rotation_x(a)
}

#[inline]
pub fn rot_z(a: f64) -> DMat3 {
    DMat3::from_rotation_z(a)
}

/// First column of `rot_x(b) * rot_z(a)`.
///
/// Expressed in a frame, this is the heading deflected by the polar angle
/// `a` towards the azimuth `b`.
#[inline]
pub fn rot_ab(a: f64, b: f64) -> DVec3 {
    DVec3::new(a.cos(), b.cos() * a.sin(), b.sin() * a.sin())
}

/// Rotates `frame` by the azimuth `beta` around its heading, then tilts it
/// by the insertion angle `theta`.
pub fn takeoff_frame(frame: DMat3, beta: f64, theta: f64) -> DMat3 {
    frame * rot_x(beta) * rot_z(theta)
}

/// Direction of the segment `a -> b`, or `fallback` for a degenerate segment.
pub fn direction(a: DVec3, b: DVec3, fallback: DVec3) -> DVec3 {
    let d = (b - a).normalize_or_zero();
    if d == DVec3::ZERO { fallback } else { d }
}
