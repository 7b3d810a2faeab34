use crate::kinematics::SkeletonTrack;
use crate::motion::Motion;
use crate::types::*;
use cgmath::InnerSpace;
use serde::{Deserialize, Serialize};

pub type Color = [u8; 3];

pub const ROOT_JOINT_COLOR: Color = [255, 100, 100];
pub const JOINT_COLOR: Color = [100, 150, 255];
pub const BONE_COLOR: Color = [150, 180, 255];
pub const TRAJECTORY_COLOR: Color = [255, 200, 0];

/// Only the first few joint dofs are plotted.
pub const NUM_PLOTTED_DOFS: usize = 3;

/// Scalar time series values of one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameMetrics {
    /// root height (z is up)
    pub height: f64,
    /// root speed in units per second, none for the first frame
    pub velocity: Option<f64>,
    pub joint_dofs: Vec<f64>,
}

/// Root speed estimated from the previous frame.
pub fn root_speed(motion: &Motion, frame: Index) -> Option<f64> {
    if frame == 0 || frame >= motion.num_frames() {
        return None;
    }
    let delta = motion.root_position(frame) - motion.root_position(frame - 1);
    Some(delta.magnitude() * motion.fps)
}

pub fn frame_metrics(motion: &Motion, frame: Index) -> FrameMetrics {
    let dofs = motion.joint_dofs(frame);
    FrameMetrics {
        height: motion.root_position(frame).z,
        velocity: root_speed(motion, frame),
        joint_dofs: dofs[..dofs.len().min(NUM_PLOTTED_DOFS)].to_vec(),
    }
}

pub fn joint_colors(num_bodies: usize) -> Vec<Color> {
    (0..num_bodies)
        .map(|i| if i == 0 { ROOT_JOINT_COLOR } else { JOINT_COLOR })
        .collect()
}

/// Line segments from every parent body to its child at a frame.
pub fn bone_segments(track: &SkeletonTrack, frame: Index) -> Vec<[Position; 2]> {
    let positions = &track.positions[frame];
    track
        .bone_pairs()
        .into_iter()
        .map(|(parent, child)| [positions[parent], positions[child]])
        .collect()
}

/// Piece of the root path travelled since the previous frame.
pub fn trajectory_segment(motion: &Motion, frame: Index) -> Option<[Position; 2]> {
    if frame == 0 || frame >= motion.num_frames() {
        return None;
    }
    Some([motion.root_position(frame - 1), motion.root_position(frame)])
}

/// One line summary printed when a clip is loaded.
pub fn motion_summary(motion: &Motion) -> String {
    format!(
        "Frames: {}, FPS: {}, Duration: {:.2}s",
        motion.num_frames(),
        motion.fps,
        motion.get_length()
    )
}

/// Markdown document describing a clip.
pub fn motion_info_markdown(
    file_name: &str,
    character_name: &str,
    motion: &Motion,
    num_bodies: usize,
) -> String {
    format!(
        "# Motion Info\n\
         - **File**: {}\n\
         - **Frames**: {}\n\
         - **FPS**: {}\n\
         - **Duration**: {:.2}s\n\
         - **Loop Mode**: {}\n\
         - **Character**: {}\n\
         - **Bodies**: {}\n",
        file_name,
        motion.num_frames(),
        motion.fps,
        motion.get_length(),
        motion.loop_mode.name(),
        character_name,
        num_bodies
    )
}
