use glam::{Mat3, Quat, Vec3};

use crate::net::schema::PoseData;

/// Position and orientation of an entity. Entities face -Z by default.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub orientation: Quat,
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
        }
    }
}

impl Pose {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }

    /// Turn so the forward (-Z) axis points at `target`, keeping `up` as close
    /// to vertical as possible. Degenerate inputs leave the orientation alone.
    pub fn face_toward(&mut self, target: Vec3, up: Vec3) {
        let Some(forward) = (target - self.position).try_normalize() else {
            return;
        };
        let Some(right) = forward.cross(up).try_normalize() else {
            return;
        };
        let true_up = right.cross(forward);
        self.orientation = Quat::from_mat3(&Mat3::from_cols(right, true_up, -forward));
    }

    pub fn forward(&self) -> Vec3 {
        self.orientation * Vec3::NEG_Z
    }

    /// Map a point from this entity's local frame into world space.
    pub fn transform_point(&self, local: Vec3) -> Vec3 {
        self.position + self.orientation * local
    }

    pub fn to_wire(&self) -> PoseData {
        PoseData {
            position: self.position.to_array(),
            orientation: self.orientation.to_array(),
        }
    }

    pub fn from_wire(data: &PoseData) -> Self {
        let orientation = Quat::from_array(data.orientation);
        // an all-zero pose (never written) decodes to identity
        let orientation = if orientation.length_squared() > 0.0 {
            orientation.normalize()
        } else {
            Quat::IDENTITY
        };
        Self {
            position: Vec3::from_array(data.position),
            orientation,
        }
    }
}
