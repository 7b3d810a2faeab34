//! Viewers for pickled motion-capture clips.
//!
//! A clip is a `{fps, loop_mode, frames}` pickle where every frame holds the root position,
//! the root rotation as an exponential map and the joint dofs of an MJCF character. The crate
//! decodes clips, poses characters with forward kinematics, serves both over a small web api
//! (`motion_server`) and plays them in a bevy window (`view_motion`, feature `visualize`).

pub mod analysis;
pub mod character;
pub mod config;
pub mod error;
pub mod http;
pub mod kinematics;
pub mod motion;
pub mod pickle;
pub mod playback;
pub mod recording;
pub mod server;
pub mod types;

#[cfg(feature = "visualize")]
pub mod visualize;
