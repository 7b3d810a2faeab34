use crate::error::{read_file, Error, Result};
use crate::kinematics::{exp_map_to_quat, quat_to_exp_map};
use crate::pickle::{self, DType, NdArray, PickleValue};
use crate::types::*;
use std::path::Path;

/////////////////////////////////////////////////////////////////////////////////////////////////

/// A clip of character poses sampled at a fixed frame rate.
#[derive(Debug, Clone, PartialEq)]
pub struct Motion {
    pub fps: f64,
    pub loop_mode: LoopMode,
    /// one pose vector per frame, all of the same width
    pub frames: Vec<Frame>,
}

impl Motion {
    pub fn new(fps: f64, loop_mode: LoopMode, frames: Vec<Frame>) -> Result<Self> {
        let motion = Motion {
            fps,
            loop_mode,
            frames,
        };
        motion.validate()?;
        Ok(motion)
    }

    fn validate(&self) -> Result<()> {
        if !(self.fps.is_finite() && self.fps > 0.0) {
            return Err(Error::Motion(format!("fps must be positive, got {}", self.fps)));
        }
        let width = self.frame_width();
        if !self.frames.is_empty() && width < ROOT_SIZE {
            return Err(Error::Motion(format!(
                "frames need at least {ROOT_SIZE} values (root position and rotation), got {width}"
            )));
        }
        if let Some(i) = self.frames.iter().position(|f| f.len() != width) {
            return Err(Error::Motion(format!(
                "frame {i} has {} values, expected {width}",
                self.frames[i].len()
            )));
        }
        Ok(())
    }

    //// ACCESSORS

    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn frame_width(&self) -> usize {
        self.frames.first().map(|f| f.len()).unwrap_or(0)
    }

    pub fn num_joint_dofs(&self) -> usize {
        self.frame_width().saturating_sub(ROOT_SIZE)
    }

    /// Length of the clip in seconds: time between the first and the last frame.
    pub fn get_length(&self) -> f64 {
        if self.frames.len() < 2 {
            return 0.0;
        }
        (self.frames.len() - 1) as f64 / self.fps
    }

    pub fn root_position(&self, frame: Index) -> Position {
        position_from_slice(&self.frames[frame][0..ROOT_POS_SIZE])
    }

    pub fn root_rotation_exp_map(&self, frame: Index) -> Position {
        position_from_slice(&self.frames[frame][ROOT_POS_SIZE..ROOT_SIZE])
    }

    pub fn joint_dofs(&self, frame: Index) -> &[f64] {
        &self.frames[frame][ROOT_SIZE..]
    }

    //// SAMPLING

    /// Map a playback time to the two frames around it and the blend weight between them.
    /// `Wrap` repeats the clip (negative times count back from the end), `Clamp` holds the
    /// first/last frame outside the clip.
    pub fn calc_frame_blend(&self, time: f64) -> (Index, Index, f64) {
        let num_frames = self.num_frames();
        let length = self.get_length();
        if num_frames < 2 || length <= 0.0 {
            return (0, 0, 0.0);
        }

        let phase = time / length;
        let phase = match self.loop_mode {
            LoopMode::Wrap => phase - phase.floor(),
            LoopMode::Clamp => phase.clamp(0.0, 1.0),
        };

        let f = phase * (num_frames - 1) as f64;
        let frame0 = (f.floor() as Index).min(num_frames - 1);
        let frame1 = (frame0 + 1).min(num_frames - 1);
        let blend = (f - frame0 as f64).clamp(0.0, 1.0);
        (frame0, frame1, blend)
    }

    /// Interpolated pose at a playback time. Root rotation is slerped, everything else lerped.
    pub fn calc_frame(&self, time: f64) -> Frame {
        if self.frames.is_empty() {
            return Vec::new();
        }
        let (frame0, frame1, blend) = self.calc_frame_blend(time);
        let a = &self.frames[frame0];
        let b = &self.frames[frame1];
        if blend == 0.0 || frame0 == frame1 {
            return a.clone();
        }

        let mut out: Frame = a
            .iter()
            .zip(b.iter())
            .map(|(x, y)| x + (y - x) * blend)
            .collect();

        let rot0 = exp_map_to_quat(self.root_rotation_exp_map(frame0));
        let rot1 = exp_map_to_quat(self.root_rotation_exp_map(frame1));
        // take the short way around
        let rot1 = if cgmath::dot(rot0, rot1) < 0.0 { -rot1 } else { rot1 };
        let rot = rot0.slerp(rot1, blend);
        let exp = quat_to_exp_map(rot);
        out[ROOT_POS_SIZE..ROOT_SIZE].copy_from_slice(&[exp.x, exp.y, exp.z]);
        out
    }

    //// (DE)SERIALIZATION

    /// Build a motion from the decoded top level pickle dict.
    pub fn from_value(value: &PickleValue) -> Result<Self> {
        if !matches!(value, PickleValue::Dict(_)) {
            return Err(Error::Motion(format!(
                "expected a dict, got {}",
                value.type_name()
            )));
        }
        let field = |key: &str| {
            value
                .get(key)
                .ok_or_else(|| Error::Motion(format!("missing '{key}' entry")))
        };

        let fps = field("fps")?
            .as_f64()
            .ok_or_else(|| Error::Motion("'fps' is not a number".to_string()))?;

        let loop_mode_value = field("loop_mode")?
            .as_i64()
            .ok_or_else(|| Error::Motion("'loop_mode' is not an integer".to_string()))?;
        let loop_mode = LoopMode::from_value(loop_mode_value)
            .ok_or_else(|| Error::Motion(format!("unknown loop mode {loop_mode_value}")))?;

        let frames = frames_from_value(field("frames")?)?;
        Motion::new(fps, loop_mode, frames)
    }

    pub fn from_pickle_bytes(data: &[u8]) -> Result<Self> {
        let value = pickle::from_bytes(data)?;
        Motion::from_value(&value)
    }

    /// The pickle representation: `{"loop_mode": int, "fps": number, "frames": float32 array}`.
    pub fn to_value(&self) -> Result<PickleValue> {
        let data: Vec<f64> = self.frames.iter().flatten().copied().collect();
        let frames = NdArray::new(
            vec![self.num_frames(), self.frame_width()],
            DType::float32(),
            data,
        )?;
        let fps = if self.fps.fract() == 0.0 {
            PickleValue::Int(self.fps as i64)
        } else {
            PickleValue::Float(self.fps)
        };
        Ok(PickleValue::Dict(vec![
            (
                PickleValue::Str("loop_mode".to_string()),
                PickleValue::Int(self.loop_mode.value()),
            ),
            (PickleValue::Str("fps".to_string()), fps),
            (PickleValue::Str("frames".to_string()), PickleValue::NdArray(frames)),
        ]))
    }

    /// Write the motion as a pickle that python tooling can load.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let bytes = pickle::to_bytes(&self.to_value()?)?;
        std::fs::write(path, bytes)
            .map_err(|err| Error::IO(err, Some(format!("Failed to write {}", path.display()))))
    }
}

fn frames_from_value(value: &PickleValue) -> Result<Vec<Frame>> {
    match value {
        PickleValue::NdArray(arr) => match arr.shape.len() {
            2 => arr.rows(),
            //// an empty clip pickles as shape (0,)
            1 if arr.data.is_empty() => Ok(Vec::new()),
            _ => Err(Error::Motion(format!(
                "'frames' must be a 2-D array, got shape {:?}",
                arr.shape
            ))),
        },
        PickleValue::List(rows) | PickleValue::Tuple(rows) => rows
            .iter()
            .enumerate()
            .map(|(i, row)| match row {
                PickleValue::List(items) | PickleValue::Tuple(items) => items
                    .iter()
                    .map(|v| {
                        v.as_f64().ok_or_else(|| {
                            Error::Motion(format!("frame {i} holds a non numeric value"))
                        })
                    })
                    .collect(),
                PickleValue::NdArray(arr) if arr.shape.len() == 1 => Ok(arr.data.clone()),
                other => Err(Error::Motion(format!(
                    "frame {i} is a {}, expected a list of numbers",
                    other.type_name()
                ))),
            })
            .collect(),
        other => Err(Error::Motion(format!(
            "'frames' must be an array, got {}",
            other.type_name()
        ))),
    }
}

//////////////////////////////////////////////////////////////// PUBLIC ///////////////////////////////////////////////////////////////////////////////

/// load a motion clip from a pickle file
pub fn load_motion(path: impl AsRef<Path>) -> Result<Motion> {
    let path = path.as_ref();
    let data = read_file(path)?;
    Motion::from_pickle_bytes(&data).map_err(|err| match err {
        Error::Pickle(msg) => Error::Pickle(format!("{}: {msg}", path.display())),
        Error::Motion(msg) => Error::Motion(format!("{}: {msg}", path.display())),
        other => other,
    })
}

/////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(loop_mode: LoopMode) -> Motion {
        // 5 frames at 2 fps -> 2 seconds, root x goes 0..4
        let frames = (0..5)
            .map(|i| vec![i as f64, 0.0, 1.0, 0.0, 0.0, 0.0, 0.1 * i as f64])
            .collect();
        Motion::new(2.0, loop_mode, frames).unwrap()
    }

    #[test]
    fn length_is_time_between_first_and_last_frame() {
        assert_eq!(clip(LoopMode::Clamp).get_length(), 2.0);
        let single = Motion::new(30.0, LoopMode::Wrap, vec![vec![0.0; 6]]).unwrap();
        assert_eq!(single.get_length(), 0.0);
        assert_eq!(single.calc_frame_blend(10.0), (0, 0, 0.0));
    }

    #[test]
    fn rejects_bad_motions() {
        assert!(Motion::new(0.0, LoopMode::Clamp, vec![vec![0.0; 6]]).is_err());
        assert!(Motion::new(30.0, LoopMode::Clamp, vec![vec![0.0; 5]]).is_err());
        assert!(Motion::new(30.0, LoopMode::Clamp, vec![vec![0.0; 6], vec![0.0; 7]]).is_err());
    }

    #[test]
    fn clamp_holds_last_frame() {
        let motion = clip(LoopMode::Clamp);
        assert_eq!(motion.calc_frame_blend(0.0), (0, 1, 0.0));
        assert_eq!(motion.calc_frame_blend(0.75), (1, 2, 0.5));
        assert_eq!(motion.calc_frame_blend(2.0), (4, 4, 0.0));
        assert_eq!(motion.calc_frame_blend(100.0), (4, 4, 0.0));
        assert_eq!(motion.calc_frame_blend(-3.0), (0, 1, 0.0));
    }

    #[test]
    fn wrap_returns_to_first_frame() {
        let motion = clip(LoopMode::Wrap);
        assert_eq!(motion.calc_frame_blend(2.0), (0, 1, 0.0));
        assert_eq!(motion.calc_frame_blend(2.5), (1, 2, 0.0));
        let (f0, f1, blend) = motion.calc_frame_blend(-0.25);
        assert_eq!((f0, f1), (3, 4));
        assert!((blend - 0.5).abs() < 1e-9);
    }

    #[test]
    fn calc_frame_interpolates() {
        let motion = clip(LoopMode::Clamp);
        let frame = motion.calc_frame(0.25);
        assert!((frame[0] - 0.5).abs() < 1e-9);
        assert!((frame[6] - 0.05).abs() < 1e-9);
        assert_eq!(motion.calc_frame(5.0), motion.frames[4]);
    }

    #[test]
    fn from_value_accepts_nested_lists() {
        let value = PickleValue::Dict(vec![
            (PickleValue::Str("fps".into()), PickleValue::Float(30.0)),
            (PickleValue::Str("loop_mode".into()), PickleValue::Int(1)),
            (
                PickleValue::Str("frames".into()),
                PickleValue::List(vec![PickleValue::List(
                    (0..7).map(PickleValue::Int).collect(),
                )]),
            ),
        ]);
        let motion = Motion::from_value(&value).unwrap();
        assert_eq!(motion.loop_mode, LoopMode::Wrap);
        assert_eq!(motion.frames, vec![vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0]]);
        assert_eq!(motion.joint_dofs(0), &[6.0]);
    }

    #[test]
    fn from_value_rejects_unknown_loop_mode() {
        let value = PickleValue::Dict(vec![
            (PickleValue::Str("fps".into()), PickleValue::Int(30)),
            (PickleValue::Str("loop_mode".into()), PickleValue::Int(2)),
            (PickleValue::Str("frames".into()), PickleValue::List(vec![])),
        ]);
        assert!(matches!(Motion::from_value(&value), Err(Error::Motion(_))));
    }

    fn short_unicode(s: &str, out: &mut Vec<u8>) {
        out.push(0x8c);
        out.push(s.len() as u8);
        out.extend_from_slice(s.as_bytes());
    }

    /// pickle.dumps({'fps': fps, 'loop_mode': loop_mode, 'frames': np.array(frames, dtype='f4')},
    /// protocol=4)
    fn protocol_4_pickle(fps: u8, loop_mode: u8, frames: &[[f32; 7]]) -> Vec<u8> {
        let mut body = vec![b'}', 0x94, b'('];
        for (key, value) in [("fps", fps), ("loop_mode", loop_mode)] {
            short_unicode(key, &mut body);
            body.extend_from_slice(&[0x94, b'K', value]);
        }
        short_unicode("frames", &mut body);
        body.push(0x94);
        short_unicode("numpy.core.multiarray", &mut body);
        body.push(0x94);
        short_unicode("_reconstruct", &mut body);
        body.extend_from_slice(b"\x94\x93\x94");
        short_unicode("numpy", &mut body);
        body.push(0x94);
        short_unicode("ndarray", &mut body);
        body.extend_from_slice(b"\x94\x93\x94K\x00\x85\x94C\x01b\x94\x87\x94R\x94");
        body.extend_from_slice(&[b'(', b'K', 1, b'K', frames.len() as u8, b'K', 7, 0x86, 0x94]);
        // "numpy" is memo entry 7
        body.extend_from_slice(b"h\x07");
        short_unicode("dtype", &mut body);
        body.extend_from_slice(b"\x94\x93\x94");
        short_unicode("f4", &mut body);
        body.extend_from_slice(b"\x94\x89\x88\x87\x94R\x94(K\x03");
        short_unicode("<", &mut body);
        body.extend_from_slice(b"\x94NNNJ\xff\xff\xff\xffJ\xff\xff\xff\xffK\x00t\x94b\x89");
        let raw: Vec<u8> = frames.iter().flatten().flat_map(|v| v.to_le_bytes()).collect();
        if raw.len() < 256 {
            body.extend_from_slice(&[b'C', raw.len() as u8]);
        } else {
            body.push(b'B');
            body.extend_from_slice(&(raw.len() as u32).to_le_bytes());
        }
        body.extend_from_slice(&raw);
        body.extend_from_slice(b"\x94t\x94bu.");

        let mut data = vec![0x80, 4, 0x95];
        data.extend_from_slice(&(body.len() as u64).to_le_bytes());
        data.extend_from_slice(&body);
        data
    }

    #[test]
    fn protocol_2_and_4_pickles_decode_to_the_same_motion() {
        let frames = [
            [0.0, 0.1, 0.9, 0.0, 0.0, 0.5, -1.25],
            [0.5, 0.1, 0.9, 0.0, 0.0, 0.75, 1.5f32],
        ];
        let expected = Motion::new(
            30.0,
            LoopMode::Wrap,
            frames
                .iter()
                .map(|f| f.iter().map(|&v| v as f64).collect())
                .collect(),
        )
        .unwrap();

        let protocol_2 = pickle::to_bytes(&expected.to_value().unwrap()).unwrap();
        assert_eq!(&protocol_2[..2], &[0x80, 2]);
        let from_2 = Motion::from_pickle_bytes(&protocol_2).unwrap();
        let from_4 = Motion::from_pickle_bytes(&protocol_4_pickle(30, 1, &frames)).unwrap();
        assert_eq!(from_4, from_2);
        assert_eq!(from_4, expected);
    }

    #[test]
    fn repeated_row_object_loads() {
        // row = [0] * 7; pickle.dumps({'fps': 30, 'loop_mode': 0, 'frames': [row] * 2}, protocol=2)
        let mut data = b"\x80\x02}q\x00(X\x03\x00\x00\x00fpsq\x01K\x1e".to_vec();
        data.extend_from_slice(b"X\x09\x00\x00\x00loop_modeq\x02K\x00");
        data.extend_from_slice(b"X\x06\x00\x00\x00framesq\x03]q\x04(]q\x05(");
        data.extend_from_slice(&b"K\x00".repeat(7));
        data.extend_from_slice(b"eh\x05eu.");

        let motion = Motion::from_pickle_bytes(&data).unwrap();
        assert_eq!(motion.loop_mode, LoopMode::Clamp);
        assert_eq!(motion.frames, vec![vec![0.0; 7]; 2]);
    }

    #[test]
    fn saved_motion_loads_back() {
        let motion = clip(LoopMode::Wrap);
        let path = std::env::temp_dir().join(format!("motion_viewer_save_{}.pkl", std::process::id()));
        motion.save(&path).unwrap();
        let loaded = load_motion(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded.fps, 2.0);
        assert_eq!(loaded.loop_mode, LoopMode::Wrap);
        assert_eq!(loaded.num_frames(), 5);
        for (a, b) in loaded.frames.iter().flatten().zip(motion.frames.iter().flatten()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn missing_file_is_not_found() {
        assert!(matches!(
            load_motion("/definitely/not/here.pkl"),
            Err(Error::NotFound(_))
        ));
    }
}
