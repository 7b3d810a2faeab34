mod common;

use motion_viewer::recording::Recording;
use std::process::Command;

#[test]
fn saves_a_recording() {
    let root = common::scratch_dir("view_save");
    common::write_data_tree(&root);
    let output = root.join("walk.json");

    let status = Command::new(env!("CARGO_BIN_EXE_view_motion"))
        .arg("--motion")
        .arg(root.join("motions/humanoid/walk.pkl"))
        .arg("--character")
        .arg(root.join("assets/humanoid/humanoid.xml"))
        .arg("--speed")
        .arg("0.5")
        .arg("--save")
        .arg(&output)
        .status()
        .unwrap();
    assert!(status.success());

    let recording = Recording::load(&output).unwrap();
    assert_eq!(recording.static_data.recording_id, "walk.pkl");
    assert_eq!(recording.static_data.body_names, vec!["pelvis", "torso", "head"]);
    assert!(recording.static_data.info.contains("- **Character**: humanoid\n"));
    assert_eq!(recording.frames.len(), 2);
    assert_eq!(recording.frames[1].bones.len(), 2);
    assert!(recording.frames[1].metrics.velocity.is_some());

    std::fs::remove_dir_all(root).unwrap();
}

#[test]
fn fails_without_inputs() {
    let root = common::scratch_dir("view_fail");
    common::write_data_tree(&root);

    let missing_motion = Command::new(env!("CARGO_BIN_EXE_view_motion"))
        .arg("--motion")
        .arg(root.join("motions/humanoid/missing.pkl"))
        .arg("--character")
        .arg(root.join("assets/humanoid/humanoid.xml"))
        .output()
        .unwrap();
    assert!(!missing_motion.status.success());
    assert!(String::from_utf8_lossy(&missing_motion.stderr).contains("Motion file not found"));

    // outside of a `motions` directory nothing can be inferred
    let no_character = Command::new(env!("CARGO_BIN_EXE_view_motion"))
        .arg("--motion")
        .arg(root.join("walk.pkl"))
        .output()
        .unwrap();
    assert!(!no_character.status.success());
    assert!(String::from_utf8_lossy(&no_character.stderr).contains("--character"));

    let bad_speed = Command::new(env!("CARGO_BIN_EXE_view_motion"))
        .arg("--motion")
        .arg(root.join("motions/humanoid/walk.pkl"))
        .arg("--character")
        .arg(root.join("assets/humanoid/humanoid.xml"))
        .arg("--speed")
        .arg("0")
        .arg("--save")
        .arg(root.join("never.json"))
        .output()
        .unwrap();
    assert!(!bad_speed.status.success());
    assert!(!root.join("never.json").exists());

    std::fs::remove_dir_all(root).unwrap();
}
