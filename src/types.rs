use cgmath::{Quaternion as CgQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/////////////////////////////////////////////////////////////////////////////////////////////////

pub type Index = usize;
pub type ParentIndex = isize; // can be -1 if body has no parent
pub type Quaternion = CgQuaternion<f64>;
pub type Position = Vector3<f64>;

/// Raw pose vector: root position (3), root rotation as exp map (3), joint dofs (rest).
pub type Frame = Vec<f64>;

pub const ROOT_POS_SIZE: usize = 3;
pub const ROOT_ROT_SIZE: usize = 3;
pub const ROOT_SIZE: usize = ROOT_POS_SIZE + ROOT_ROT_SIZE;

/////////////////////////////////////////////////////////////////////////////////////////////////

/// What happens when playback time leaves the clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopMode {
    /// stop at the last frame
    Clamp = 0,
    /// wrap back to the first frame
    Wrap = 1,
}

impl LoopMode {
    pub fn from_value(value: i64) -> Option<LoopMode> {
        match value {
            0 => Some(LoopMode::Clamp),
            1 => Some(LoopMode::Wrap),
            _ => None,
        }
    }

    pub fn value(&self) -> i64 {
        *self as i64
    }

    pub fn name(&self) -> &'static str {
        match self {
            LoopMode::Clamp => "CLAMP",
            LoopMode::Wrap => "WRAP",
        }
    }
}

/////////////////////////////////////////////////////////////////////////////////////////////////

/// Convert a cgmath vector into a plain array (for json payloads).
pub fn position_to_array(p: &Position) -> [f64; 3] {
    [p.x, p.y, p.z]
}

pub fn position_from_slice(s: &[f64]) -> Position {
    Position::new(s[0], s[1], s[2])
}
