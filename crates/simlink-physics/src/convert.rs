//! Conversions between the scene's `f64` math and Rapier's `f32` math.
//!
//! This is the only module that narrows or widens precision.

#![allow(clippy::cast_possible_truncation)]

use nalgebra::{Isometry3, Point3, Vector3};

/// Scene vector to engine vector.
#[inline]
#[must_use]
pub fn vector_to_engine(v: &Vector3<f64>) -> Vector3<f32> {
    v.cast::<f32>()
}

/// Engine vector to scene vector.
#[inline]
#[must_use]
pub fn vector_from_engine(v: &Vector3<f32>) -> Vector3<f64> {
    v.cast::<f64>()
}

/// Engine point to scene point.
#[inline]
#[must_use]
pub fn point_from_engine(p: &Point3<f32>) -> Point3<f64> {
    p.cast::<f64>()
}

/// Scene pose to engine pose.
#[inline]
#[must_use]
pub fn isometry_to_engine(pose: &Isometry3<f64>) -> Isometry3<f32> {
    pose.cast::<f32>()
}

/// Engine pose to scene pose.
#[inline]
#[must_use]
pub fn isometry_from_engine(pose: &Isometry3<f32>) -> Isometry3<f64> {
    pose.cast::<f64>()
}
