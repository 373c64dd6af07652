//! Frame conversions and tolerant comparisons for state read-back.

use nalgebra::{Isometry3, Vector3};

use crate::engine::FrameData;

/// Tolerance of the equality used before overwriting state components.
pub const STATE_TOLERANCE: f64 = 1.0e-6;

/// Poses are equal if positions and every quaternion component agree
/// within [`STATE_TOLERANCE`].
pub fn pose_eq(a: &Isometry3<f64>, b: &Isometry3<f64>) -> bool {
    let qa = a.rotation.quaternion();
    let qb = b.rotation.quaternion();
    vector_eq(&a.translation.vector, &b.translation.vector)
        && (qa.coords - qb.coords).iter().all(|d| d.abs() <= STATE_TOLERANCE)
}

/// Vectors are equal if every component agrees within [`STATE_TOLERANCE`].
pub fn vector_eq(a: &Vector3<f64>, b: &Vector3<f64>) -> bool {
    (a - b).iter().all(|d| d.abs() <= STATE_TOLERANCE)
}

/// State of a frame rigidly attached to a link at `offset`.
///
/// The offset is expressed in the link frame.
pub fn frame_at_offset(link: &FrameData, offset: &Isometry3<f64>) -> FrameData {
    let pose = link.pose * offset;
    let r = link.pose.rotation * offset.translation.vector;
    let w = link.angular_velocity;
    let alpha = link.angular_acceleration;

    FrameData {
        pose,
        linear_velocity: link.linear_velocity + w.cross(&r),
        angular_velocity: w,
        linear_acceleration: link.linear_acceleration + alpha.cross(&r) + w.cross(&w.cross(&r)),
        angular_acceleration: alpha,
    }
}

/// Express a world-frame vector in the body frame of `pose`.
pub fn to_body(pose: &Isometry3<f64>, world: &Vector3<f64>) -> Vector3<f64> {
    pose.rotation.inverse_transform_vector(world)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Translation3, UnitQuaternion};
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_sub_tolerance_changes_are_equal() {
        let a = Isometry3::translation(1.0, 2.0, 3.0);
        let b = Isometry3::translation(1.0 + 5.0e-7, 2.0, 3.0);
        assert!(pose_eq(&a, &b));

        let c = Isometry3::translation(1.0 + 1.0e-5, 2.0, 3.0);
        assert!(!pose_eq(&a, &c));

        let v = Vector3::new(0.1, 0.2, 0.3);
        assert!(vector_eq(&v, &(v + Vector3::repeat(9.0e-7))));
        assert!(!vector_eq(&v, &(v + Vector3::new(0.0, 0.0, 2.0e-6))));
    }

    #[test]
    fn test_rotation_difference_is_detected() {
        let a = Isometry3::identity();
        let b = Isometry3::from_parts(
            Translation3::identity(),
            UnitQuaternion::from_euler_angles(0.0, 0.0, 1.0e-3),
        );
        assert!(!pose_eq(&a, &b));
    }

    #[test]
    fn test_frame_at_offset_on_spinning_link() {
        let mut link = FrameData::at_rest(Isometry3::translation(0.0, 0.0, 1.0));
        link.angular_velocity = Vector3::new(0.0, 0.0, 2.0);
        let offset = Isometry3::translation(1.0, 0.0, 0.0);

        let frame = frame_at_offset(&link, &offset);
        assert_relative_eq!(frame.pose.translation.vector, Vector3::new(1.0, 0.0, 1.0));
        // v = w x r, a = w x (w x r)
        assert_relative_eq!(frame.linear_velocity, Vector3::new(0.0, 2.0, 0.0));
        assert_relative_eq!(frame.linear_acceleration, Vector3::new(-4.0, 0.0, 0.0));
        assert_relative_eq!(frame.angular_velocity, link.angular_velocity);
    }

    #[test]
    fn test_to_body_uses_transposed_rotation() {
        let pose = Isometry3::from_parts(
            Translation3::new(5.0, 0.0, 0.0),
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), FRAC_PI_2),
        );
        let body = to_body(&pose, &Vector3::new(0.0, 1.0, 0.0));
        assert_relative_eq!(body, Vector3::new(1.0, 0.0, 0.0), epsilon = 1e-12);
    }
}
