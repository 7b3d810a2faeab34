use motion_viewer::analysis::{frame_metrics, motion_summary};
use motion_viewer::character::CharacterModel;
use motion_viewer::config::infer_character_path;
use motion_viewer::kinematics::SkeletonTrack;
use motion_viewer::motion::{load_motion, Motion};
use motion_viewer::playback::Player;
use motion_viewer::types::LoopMode;

const ARM_XML: &str = r#"<mujoco model="arm">
  <worldbody>
    <body name="base" pos="0 0 1">
      <freejoint name="root"/>
      <body name="upper" pos="0 0 0.3">
        <joint name="shoulder" type="ball"/>
        <body name="lower" pos="0 0 0.3">
          <joint name="elbow" axis="0 1 0"/>
        </body>
      </body>
    </body>
  </worldbody>
</mujoco>"#;

fn main() -> anyhow::Result<()> {
    ////////////////////////////// building and saving a clip ///////////////////////////////////////////
    // frame = root position (3) + root rotation as exp map (3) + joint dofs (ball: 3, hinge: 1)
    let frames = (0..60)
        .map(|i| {
            let t = i as f64 / 30.0;
            vec![0.5 * t, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.3 * t, 0.0, t.sin()]
        })
        .collect();
    let motion = Motion::new(30.0, LoopMode::Wrap, frames)?;
    let dir = std::env::temp_dir().join("motions").join("arm");
    std::fs::create_dir_all(&dir)?;
    let path = dir.join("wave.pkl");
    motion.save(&path)?;

    //////////////////////////////// loading it back ////////////////
    let motion = load_motion(&path)?;
    println!("{}", motion_summary(&motion));
    // the character is guessed from the directory after `motions`
    println!("character file: {:?}", infer_character_path(&path));

    //////////////////////////////// sampling ////////////////
    // between two frames the pose is blended, wrap clips continue from the start
    let (f0, f1, blend) = motion.calc_frame_blend(0.51);
    println!("t=0.51s -> frames {f0}/{f1}, blend {blend:.2}");
    let pose = motion.calc_frame(motion.get_length() + 0.5);
    println!("root x half a second after the end: {:.3}", pose[0]);

    //////////////////////////////// forward kinematics ////////////////
    let model = CharacterModel::from_xml_str(ARM_XML)?;
    let track = SkeletonTrack::compute(&model, &motion)?;
    let hand = &track.positions[59][2];
    println!("{} at the last frame: ({:.3}, {:.3}, {:.3})", track.body_names[2], hand.x, hand.y, hand.z);

    //////////////////////////////// playback ////////////////
    // half speed: one second of wall clock shows 15 frames
    let mut player = Player::new(&motion, 0.5)?;
    player.advance(1.0);
    let frame = player.current_frame();
    let metrics = frame_metrics(&motion, frame);
    println!("frame {frame}: height {:.2}, speed {:?}", metrics.height, metrics.velocity);

    std::fs::remove_file(&path)?;
    Ok(())
}
