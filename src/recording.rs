use crate::analysis::{self, Color, FrameMetrics};
use crate::error::{read_file, Error, Result};
use crate::kinematics::{quat_to_xyzw, SkeletonTrack};
use crate::motion::Motion;
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

pub const WORLD_UP: &str = "RIGHT_HAND_Z_UP";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticData {
    pub application: String,
    pub recording_id: String,
    pub view_coordinates: String,
    pub info: String,
    pub body_names: Vec<String>,
    pub parent_indices: Vec<ParentIndex>,
    pub fps: f64,
    pub loop_mode: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub frame: Index,
    pub time: f64,
    pub joint_positions: Vec<[f64; 3]>,
    pub joint_colors: Vec<Color>,
    /// [x, y, z, w]
    pub joint_rotations: Vec<[f64; 4]>,
    pub bones: Vec<[[f64; 3]; 2]>,
    pub trajectory: Option<[[f64; 3]; 2]>,
    pub metrics: FrameMetrics,
}

/// A posed motion laid out for replay: static scene data plus one record per frame. Saved as json.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub static_data: StaticData,
    pub frames: Vec<FrameRecord>,
}

fn segment_to_arrays(segment: [Position; 2]) -> [[f64; 3]; 2] {
    [position_to_array(&segment[0]), position_to_array(&segment[1])]
}

impl Recording {
    pub fn build(
        motion_name: &str,
        character_name: &str,
        motion: &Motion,
        track: &SkeletonTrack,
    ) -> Result<Self> {
        if track.num_frames() != motion.num_frames() {
            return Err(Error::Motion(format!(
                "skeleton track has {} frames but the motion has {}",
                track.num_frames(),
                motion.num_frames()
            )));
        }
        let num_bodies = track.num_bodies();
        let static_data = StaticData {
            application: "Motion Viewer".to_string(),
            recording_id: motion_name.to_string(),
            view_coordinates: WORLD_UP.to_string(),
            info: analysis::motion_info_markdown(motion_name, character_name, motion, num_bodies),
            body_names: track.body_names.clone(),
            parent_indices: track.parent_indices.clone(),
            fps: motion.fps,
            loop_mode: motion.loop_mode.value(),
        };

        let colors = analysis::joint_colors(num_bodies);
        let frames = (0..motion.num_frames())
            .map(|frame| FrameRecord {
                frame,
                time: frame as f64 / motion.fps,
                joint_positions: track.positions[frame].iter().map(position_to_array).collect(),
                joint_colors: colors.clone(),
                joint_rotations: track.rotations[frame].iter().map(quat_to_xyzw).collect(),
                bones: analysis::bone_segments(track, frame)
                    .into_iter()
                    .map(segment_to_arrays)
                    .collect(),
                trajectory: analysis::trajectory_segment(motion, frame).map(segment_to_arrays),
                metrics: analysis::frame_metrics(motion, frame),
            })
            .collect();

        Ok(Recording {
            static_data,
            frames,
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = std::fs::File::create(path)
            .map_err(|err| Error::IO(err, Some(format!("Failed to create {}", path.display()))))?;
        let mut writer = std::io::BufWriter::new(file);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = read_file(path.as_ref())?;
        Ok(serde_json::from_slice(&data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::character::{tests::STICK_XML, CharacterModel};

    #[test]
    fn records_every_frame() {
        let model = CharacterModel::from_xml_str(STICK_XML).unwrap();
        let frames = (0..3)
            .map(|i| {
                let mut frame = vec![0.0; 13];
                frame[0] = i as f64;
                frame[2] = 1.0;
                frame
            })
            .collect();
        let motion = Motion::new(30.0, LoopMode::Wrap, frames).unwrap();
        let track = SkeletonTrack::compute(&model, &motion).unwrap();
        let recording = Recording::build("walk.pkl", "stick", &motion, &track).unwrap();

        assert_eq!(recording.static_data.view_coordinates, WORLD_UP);
        assert_eq!(recording.static_data.loop_mode, 1);
        assert!(recording.static_data.info.contains("- **Loop Mode**: WRAP"));
        assert_eq!(recording.frames.len(), 3);

        let last = &recording.frames[2];
        assert_eq!(last.joint_positions.len(), 5);
        assert_eq!(last.joint_positions[0], [2.0, 0.0, 1.0]);
        assert_eq!(last.bones.len(), 4);
        assert_eq!(last.trajectory, Some([[1.0, 0.0, 1.0], [2.0, 0.0, 1.0]]));
        assert_eq!(last.metrics.velocity, Some(30.0));
        assert!(recording.frames[0].trajectory.is_none());
        assert_eq!(last.joint_rotations[0], [0.0, 0.0, 0.0, 1.0]);

        let path = std::env::temp_dir().join(format!("motion_viewer_rec_{}.json", std::process::id()));
        recording.save(&path).unwrap();
        let loaded = Recording::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded.static_data, recording.static_data);
        assert_eq!(loaded.frames.len(), 3);
        assert_eq!(loaded.frames[2].joint_positions[0], [2.0, 0.0, 1.0]);
    }
}
