use crate::analysis::{self, Color as Rgb, BONE_COLOR, TRAJECTORY_COLOR};
use crate::kinematics::SkeletonTrack;
use crate::motion::Motion;
use crate::playback::Player;
use crate::types::{Position, Quaternion};
use bevy::prelude::*;
use bevy_panorbit_camera::{PanOrbitCamera, PanOrbitCameraPlugin};

const MIN_SPEED: f64 = 1.0 / 64.0;
const MAX_SPEED: f64 = 64.0;

///////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Resource)]
pub struct AppGlobalData {
    pub motion: Motion,
    pub track: SkeletonTrack,
    pub player: Player,
    pub title: String,
    pub show_trajectory: bool,
    pub show_overlay: bool,
}

///////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// Open a window playing `track` (computed from `motion`) at `speed` times real time.
pub fn visualize_motion(motion: Motion, track: SkeletonTrack, speed: f64, title: String) -> crate::error::Result<()> {
    let player = Player::new(&motion, speed)?;

    App::new()
        .insert_resource(AppGlobalData {
            motion,
            track,
            player,
            title,
            show_trajectory: true,
            show_overlay: true,
        })
        .add_plugins(DefaultPlugins)
        .add_plugins(PanOrbitCameraPlugin)
        .add_systems(Startup, setup)
        .add_systems(Update, (update_main, draw_skeleton, update_overlay_text).chain())
        .run();
    Ok(())
}

///////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Component)]
struct OverlayText;

/// Motion data is z up, bevy is y up.
fn to_bevy(p: &Position) -> Vec3 {
    Vec3::new(p.x as f32, p.z as f32, -p.y as f32)
}

fn to_color(c: Rgb) -> Color {
    Color::rgb_u8(c[0], c[1], c[2])
}

///////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

fn setup(
    mut commands: Commands,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
) {
    //// Orbit camera
    commands.spawn((
        Camera3dBundle {
            transform: Transform::from_xyz(0., 1.5, 5.).looking_at(Vec3::new(0., 1., 0.), Vec3::Y),
            ..default()
        },
        PanOrbitCamera::default(),
    ));
    // ground plane
    commands.spawn(PbrBundle {
        mesh: meshes.add(Plane3d::default().mesh().size(10.0, 10.0)),
        material: materials.add(StandardMaterial {
            base_color: Color::rgba(1., 1., 1., 0.3),
            alpha_mode: AlphaMode::Blend,
            double_sided: true,
            cull_mode: None,
            ..default()
        }),
        ..default()
    });

    // instructions
    commands.spawn(
        TextBundle::from_section(
            "Space: play/pause\n\
            Left/Right: step one frame\n\
            Home: restart\n\
            [ / ]: halve/double speed\n\
            T: toggle trajectory\n\
            D: toggle info overlay\n\
            Hold Up/Down: line width\n",
            TextStyle {
                font_size: 15.,
                ..default()
            },
        )
        .with_style(Style {
            position_type: PositionType::Absolute,
            bottom: Val::Px(12.0),
            right: Val::Px(12.0),
            ..default()
        }),
    );

    // info overlay
    commands.spawn((
        TextBundle::from_section(
            "",
            TextStyle {
                font_size: 17.,
                color: Color::rgba(1.0, 1.0, 1.0, 0.7),
                ..default()
            },
        )
        .with_style(Style {
            position_type: PositionType::Absolute,
            top: Val::Px(12.0),
            left: Val::Px(12.0),
            ..default()
        }),
        OverlayText,
    ));
}

///////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// Draw joint axes (red, green, blue) at the joint position.
fn draw_joint_axes(gizmos: &mut Gizmos, rotation: &Quaternion, position: &Position, length: f64) {
    let start = to_bevy(position);
    let axes = [
        (Position::unit_x(), Color::RED),
        (Position::unit_y(), Color::GREEN),
        (Position::unit_z(), Color::BLUE),
    ];
    for (axis, color) in axes {
        let end = *position + *rotation * axis * length;
        gizmos.line(start, to_bevy(&end), color);
    }
}

fn draw_skeleton(mut gizmos: Gizmos, appdata: Res<AppGlobalData>) {
    let track = &appdata.track;
    if track.num_frames() == 0 {
        return;
    }
    let frame = appdata.player.current_frame();
    let positions = &track.positions[frame];
    let rotations = &track.rotations[frame];

    //// bones
    for [parent, child] in analysis::bone_segments(track, frame) {
        gizmos.line(to_bevy(&parent), to_bevy(&child), to_color(BONE_COLOR));
    }

    //// joints, root highlighted
    let colors = analysis::joint_colors(positions.len());
    for (i, (pos, rot)) in positions.iter().zip(rotations).enumerate() {
        let radius = if i == 0 { 0.05 } else { 0.03 };
        gizmos.sphere(to_bevy(pos), Quat::IDENTITY, radius, to_color(colors[i]));
        draw_joint_axes(&mut gizmos, rot, pos, if i == 0 { 0.1 } else { 0.05 });
    }

    //// root path so far
    if appdata.show_trajectory && frame > 0 {
        let path = (0..=frame).map(|f| to_bevy(&appdata.motion.root_position(f)));
        gizmos.linestrip(path, to_color(TRAJECTORY_COLOR));
    }
}

///////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

fn update_main(
    mut config_store: ResMut<GizmoConfigStore>,
    keyboard: Res<ButtonInput<KeyCode>>,
    time: Res<Time>,
    mut appdata: ResMut<AppGlobalData>,
) {
    let (config, _) = config_store.config_mut::<DefaultGizmoConfigGroup>();
    if keyboard.pressed(KeyCode::ArrowUp) {
        config.line_width += 5. * time.delta_seconds();
        config.line_width = config.line_width.clamp(0., 50.);
    }
    if keyboard.pressed(KeyCode::ArrowDown) {
        config.line_width -= 5. * time.delta_seconds();
        config.line_width = config.line_width.clamp(0., 50.);
    }

    let appdata = &mut *appdata;
    if keyboard.just_released(KeyCode::Space) {
        appdata.player.toggle();
    }
    if keyboard.just_released(KeyCode::ArrowRight) {
        appdata.player.step(1);
    }
    if keyboard.just_released(KeyCode::ArrowLeft) {
        appdata.player.step(-1);
    }
    if keyboard.just_released(KeyCode::Home) {
        appdata.player.restart();
    }
    for (key, factor) in [(KeyCode::BracketLeft, 0.5), (KeyCode::BracketRight, 2.0)] {
        if keyboard.just_released(key) {
            let speed = (appdata.player.speed() * factor).clamp(MIN_SPEED, MAX_SPEED);
            if let Err(err) = appdata.player.set_speed(speed) {
                log::warn!("{err}");
            }
        }
    }
    if keyboard.just_released(KeyCode::KeyT) {
        appdata.show_trajectory = !appdata.show_trajectory;
    }
    if keyboard.just_released(KeyCode::KeyD) {
        appdata.show_overlay = !appdata.show_overlay;
    }

    appdata.player.advance(time.delta_seconds_f64());
}

///////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

fn update_overlay_text(mut query: Query<&mut Text, With<OverlayText>>, appdata: Res<AppGlobalData>) {
    let text = if appdata.show_overlay && appdata.motion.num_frames() > 0 {
        let player = &appdata.player;
        let frame = player.current_frame();
        let metrics = analysis::frame_metrics(&appdata.motion, frame);
        let velocity = metrics
            .velocity
            .map_or("-".to_string(), |v| format!("{v:.3}"));
        let dofs: Vec<String> = metrics.joint_dofs.iter().map(|d| format!("{d:.3}")).collect();
        format!(
            "{}\n{}\nFrame: {} / {}\nTime: {:.2}s\nSpeed: {}x{}\nRoot height: {:.3}\nRoot speed: {}\nDofs: [{}]",
            appdata.title,
            analysis::motion_summary(&appdata.motion),
            frame,
            appdata.motion.num_frames() - 1,
            player.time,
            player.speed(),
            if player.playing { "" } else { " (paused)" },
            metrics.height,
            velocity,
            dofs.join(", ")
        )
    } else {
        String::new()
    };
    for mut t in &mut query {
        t.sections[0].value = text.clone();
    }
}
