#![allow(dead_code)]

use motion_viewer::motion::Motion;
use motion_viewer::types::LoopMode;
use std::path::{Path, PathBuf};

pub const HUMANOID_XML: &str = r#"<mujoco model="humanoid">
  <worldbody>
    <body name="pelvis" pos="0 0 1">
      <freejoint name="root"/>
      <body name="torso" pos="0 0 0.5">
        <joint name="waist" type="hinge" axis="0 0 1" range="-45 45"/>
        <body name="head" pos="0 0 0.3"/>
      </body>
    </body>
  </worldbody>
</mujoco>
"#;

/// Fresh scratch directory under the system temp dir.
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("motion_viewer_it_{name}_{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn binunicode(s: &str, out: &mut Vec<u8>) {
    out.push(b'X');
    out.extend((s.len() as u32).to_le_bytes());
    out.extend(s.as_bytes());
}

/// Protocol 2 pickle of `{"fps": fps, "loop_mode": loop_mode, "frames": [[...], ...]}` with
/// plain python lists, the way a clip looks before it is converted to numpy.
pub fn list_pickle(fps: u8, loop_mode: u8, frames: &[Vec<f64>]) -> Vec<u8> {
    let mut out = vec![0x80, 2, b'}', b'('];
    binunicode("fps", &mut out);
    out.extend([b'K', fps]);
    binunicode("loop_mode", &mut out);
    out.extend([b'K', loop_mode]);
    binunicode("frames", &mut out);
    out.extend([b']', b'(']);
    for frame in frames {
        out.extend([b']', b'(']);
        for value in frame {
            out.push(b'G');
            out.extend(value.to_be_bytes());
        }
        out.push(b'e');
    }
    out.extend([b'e', b'u', b'.']);
    out
}

/// Two frames of the humanoid walking 0.1 along x while turning the waist.
pub fn walk_frames() -> Vec<Vec<f64>> {
    vec![
        vec![0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0],
        vec![0.1, 0.0, 1.0, 0.0, 0.0, 0.0, 0.5],
    ]
}

/// `<root>/motions/humanoid/{walk,turn}.pkl` and `<root>/assets/humanoid/humanoid.xml`
pub fn write_data_tree(root: &Path) {
    let motions = root.join("motions").join("humanoid");
    let assets = root.join("assets").join("humanoid");
    std::fs::create_dir_all(&motions).unwrap();
    std::fs::create_dir_all(&assets).unwrap();
    std::fs::write(assets.join("humanoid.xml"), HUMANOID_XML).unwrap();
    std::fs::write(motions.join("walk.pkl"), list_pickle(30, 0, &walk_frames())).unwrap();
    Motion::new(60.0, LoopMode::Wrap, walk_frames())
        .unwrap()
        .save(motions.join("turn.pkl"))
        .unwrap();
}
