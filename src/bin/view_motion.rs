use anyhow::{anyhow, bail, Context};
use clap::Parser;
use motion_viewer::analysis::motion_summary;
use motion_viewer::character::CharacterModel;
use motion_viewer::config::infer_character_path;
use motion_viewer::kinematics::SkeletonTrack;
use motion_viewer::motion::load_motion;
use motion_viewer::playback::Player;
use motion_viewer::recording::Recording;
use std::path::{Path, PathBuf};

/// Play a motion clip on its character skeleton.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the motion .pkl file
    #[arg(long)]
    motion: PathBuf,
    /// Path to the character .xml file, guessed from `.../motions/<character>/...` when omitted
    #[arg(long)]
    character: Option<PathBuf>,
    /// Playback speed multiplier (0.5 plays at half speed)
    #[arg(long, default_value_t = 1.0)]
    speed: f64,
    /// Write the recording as json to this file instead of opening a window
    #[arg(long)]
    save: Option<PathBuf>,
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let character_path = args
        .character
        .clone()
        .or_else(|| infer_character_path(&args.motion))
        .ok_or_else(|| {
            anyhow!(
                "Can not infer the character of {}, please specify --character explicitly",
                args.motion.display()
            )
        })?;
    if !args.motion.is_file() {
        bail!("Motion file not found: {}", args.motion.display());
    }
    if !character_path.is_file() {
        bail!(
            "Character file not found: {}\nPlease specify --character explicitly",
            character_path.display()
        );
    }

    println!("Loading motion: {}", args.motion.display());
    let motion = load_motion(&args.motion)?;
    println!("  {}", motion_summary(&motion));
    // reject a bad --speed before posing
    Player::new(&motion, args.speed)?;

    println!("Loading character: {}", character_path.display());
    let model = CharacterModel::load(&character_path)?;
    println!("  Bodies: {}", model.num_bodies());

    let track = SkeletonTrack::compute(&model, &motion)
        .with_context(|| format!("Can not pose {} on {}", args.motion.display(), character_path.display()))?;
    log::info!("Posed {} frames", track.num_frames());

    match &args.save {
        Some(save_path) => {
            let recording = Recording::build(
                &file_name(&args.motion),
                &file_stem(&character_path),
                &motion,
                &track,
            )?;
            recording.save(save_path)?;
            println!("Saved recording to: {}", save_path.display());
            Ok(())
        }
        None => open_viewer(motion, track, args.speed, file_name(&args.motion)),
    }
}

#[cfg(feature = "visualize")]
fn open_viewer(
    motion: motion_viewer::motion::Motion,
    track: SkeletonTrack,
    speed: f64,
    title: String,
) -> anyhow::Result<()> {
    motion_viewer::visualize::visualize_motion(motion, track, speed, title)?;
    Ok(())
}

#[cfg(not(feature = "visualize"))]
fn open_viewer(
    _motion: motion_viewer::motion::Motion,
    _track: SkeletonTrack,
    _speed: f64,
    _title: String,
) -> anyhow::Result<()> {
    Err(motion_viewer::error::Error::Feature("visualize"))
        .context("Rebuild with `--features visualize` or pass --save <file.json>")
}
