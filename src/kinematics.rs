use crate::character::CharacterModel;
use crate::error::{Error, Result};
use crate::motion::Motion;
use crate::types::*;
use cgmath::{InnerSpace, One, Rad, Rotation3, Zero};

/////////////////////////////////////////////////////////////////////////////////////////////////

/// Exponential map (axis scaled by angle, radians) to a unit quaternion.
pub fn exp_map_to_quat(exp_map: Position) -> Quaternion {
    let angle = exp_map.magnitude();
    if angle < 1e-9 {
        return Quaternion::one();
    }
    quat_from_axis_angle(exp_map / angle, angle)
}

/// Inverse of `exp_map_to_quat`. The result has an angle in [0, pi].
pub fn quat_to_exp_map(q: Quaternion) -> Position {
    let q = q.normalize();
    // q and -q are the same rotation, keep the one with positive w
    let q = if q.s < 0.0 { -q } else { q };
    let sin_half = q.v.magnitude();
    if sin_half < 1e-9 {
        return Position::zero();
    }
    let angle = 2.0 * sin_half.atan2(q.s);
    q.v / sin_half * angle
}

pub fn quat_from_axis_angle(axis: Position, angle: f64) -> Quaternion {
    Quaternion::from_axis_angle(axis.normalize(), Rad(angle))
}

/// cgmath stores `s` (w) first, json consumers expect `[x, y, z, w]`.
pub fn quat_to_xyzw(q: &Quaternion) -> [f64; 4] {
    [q.v.x, q.v.y, q.v.z, q.s]
}

/////////////////////////////////////////////////////////////////////////////////////////////////

/// Global position and rotation of every body, given the root transform and the per-body joint
/// rotations (as returned by `CharacterModel::dof_to_rot`). Basically forward kinematics.
pub fn forward_kinematics(
    model: &CharacterModel,
    root_pos: Position,
    root_rot: Quaternion,
    joint_rot: &[Quaternion],
) -> (Vec<Position>, Vec<Quaternion>) {
    let num_bodies = model.num_bodies();
    let mut body_pos: Vec<Position> = Vec::with_capacity(num_bodies);
    let mut body_rot: Vec<Quaternion> = Vec::with_capacity(num_bodies);

    for (i, body) in model.bodies().iter().enumerate() {
        if body.parent_index == -1 {
            body_pos.push(root_pos);
            body_rot.push(root_rot);
            continue;
        }
        //// bodies are stored parents first, so the parent transform is already known
        let parent = body.parent_index as Index;
        let parent_pos = body_pos[parent];
        let parent_rot = body_rot[parent];

        let pos = parent_pos + parent_rot * body.local_translation;
        let rot = parent_rot * body.local_rotation * joint_rot[i];
        body_pos.push(pos);
        body_rot.push(rot.normalize());
    }
    (body_pos, body_rot)
}

/// Split a motion frame into root/joint parts and run forward kinematics on it.
pub fn pose_frame(model: &CharacterModel, frame: &[f64]) -> Result<(Vec<Position>, Vec<Quaternion>)> {
    let expected = ROOT_SIZE + model.num_dofs();
    if frame.len() != expected {
        return Err(Error::Character(format!(
            "frame has {} values but the character needs {} ({} root + {} dofs)",
            frame.len(),
            expected,
            ROOT_SIZE,
            model.num_dofs()
        )));
    }
    let root_pos = position_from_slice(&frame[0..ROOT_POS_SIZE]);
    let root_rot = exp_map_to_quat(position_from_slice(&frame[ROOT_POS_SIZE..ROOT_SIZE]));
    let joint_rot = model.dof_to_rot(&frame[ROOT_SIZE..])?;
    Ok(forward_kinematics(model, root_pos, root_rot, &joint_rot))
}

/////////////////////////////////////////////////////////////////////////////////////////////////

/// Global body transforms for every frame of a motion.
#[derive(Debug, Clone)]
pub struct SkeletonTrack {
    pub body_names: Vec<String>,
    pub parent_indices: Vec<ParentIndex>,
    pub fps: f64,
    /// [frame][body]
    pub positions: Vec<Vec<Position>>,
    /// [frame][body]
    pub rotations: Vec<Vec<Quaternion>>,
}

impl SkeletonTrack {
    pub fn compute(model: &CharacterModel, motion: &Motion) -> Result<Self> {
        let mut positions = Vec::with_capacity(motion.num_frames());
        let mut rotations = Vec::with_capacity(motion.num_frames());
        for (i, frame) in motion.frames.iter().enumerate() {
            let (pos, rot) = pose_frame(model, frame).map_err(|err| match err {
                Error::Character(msg) => Error::Character(format!("frame {i}: {msg}")),
                other => other,
            })?;
            positions.push(pos);
            rotations.push(rot);
        }
        Ok(SkeletonTrack {
            body_names: model.body_names(),
            parent_indices: model.parent_indices(),
            fps: motion.fps,
            positions,
            rotations,
        })
    }

    pub fn num_frames(&self) -> usize {
        self.positions.len()
    }

    pub fn num_bodies(&self) -> usize {
        self.body_names.len()
    }

    /// `(parent index, child index)` for every body that has a parent.
    pub fn bone_pairs(&self) -> Vec<(Index, Index)> {
        self.parent_indices
            .iter()
            .enumerate()
            .filter(|(_, p)| **p >= 0)
            .map(|(i, &p)| (p as Index, i))
            .collect()
    }

    /// Positions as plain `[x, y, z]` arrays, frame major.
    pub fn positions_as_arrays(&self) -> Vec<Vec<[f64; 3]>> {
        self.positions
            .iter()
            .map(|frame| frame.iter().map(position_to_array).collect())
            .collect()
    }
}

/////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::Rotation;
    use std::f64::consts::FRAC_PI_2;

    fn assert_close(a: Position, b: Position) {
        assert!((a - b).magnitude() < 1e-9, "{:?} != {:?}", a, b);
    }

    #[test]
    fn zero_exp_map_is_identity() {
        assert_eq!(exp_map_to_quat(Position::zero()), Quaternion::one());
        assert_eq!(quat_to_exp_map(Quaternion::one()), Position::zero());
    }

    #[test]
    fn exp_map_matches_axis_angle() {
        let q = exp_map_to_quat(Position::new(0.0, 0.0, FRAC_PI_2));
        let expected = quat_from_axis_angle(Position::unit_z(), FRAC_PI_2);
        assert!((q - expected).magnitude() < 1e-12);
        // x axis turns into y axis
        assert_close(q.rotate_vector(Position::unit_x()), Position::unit_y());
    }

    #[test]
    fn exp_map_round_trip_takes_short_path() {
        let e = Position::new(0.3, -0.2, 0.9);
        assert_close(quat_to_exp_map(exp_map_to_quat(e)), e);
        assert_close(quat_to_exp_map(-exp_map_to_quat(e)), e);
    }

    #[test]
    fn hinge_swings_child_body() {
        let xml = r#"<mujoco><worldbody>
            <body name="base"><freejoint/>
              <body name="arm" pos="0 0 1">
                <joint name="elbow" type="hinge" axis="1 0 0"/>
                <body name="hand" pos="0 0 1"/>
              </body>
            </body>
          </worldbody></mujoco>"#;
        let model = CharacterModel::from_xml_str(xml).unwrap();

        let (pos, _) = pose_frame(&model, &[0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]).unwrap();
        assert_close(pos[2], Position::new(0.0, 0.0, 2.0));

        // +90 degrees about x takes the arm's +z onto -y
        let (pos, rot) = pose_frame(&model, &[0.0, 0.0, 0.0, 0.0, 0.0, 0.0, FRAC_PI_2]).unwrap();
        assert_close(pos[1], Position::new(0.0, 0.0, 1.0));
        assert_close(pos[2], Position::new(0.0, -1.0, 1.0));
        assert_close(rot[2].rotate_vector(Position::unit_y()), Position::unit_z());
    }

    #[test]
    fn xyzw_order() {
        let q = Quaternion::new(1.0, 2.0, 3.0, 4.0);
        assert_eq!(quat_to_xyzw(&q), [2.0, 3.0, 4.0, 1.0]);
    }
}
