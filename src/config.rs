use crate::character::character_xml_path;
use std::path::{Component, Path, PathBuf};

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_MOTION_DIR: &str = "data/motions";
pub const DEFAULT_ASSET_DIR: &str = "data/assets";
pub const DEFAULT_CHARACTER: &str = "humanoid";

/// Where the motion server listens and which directories it serves from.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub motion_dir: PathBuf,
    pub asset_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            motion_dir: PathBuf::from(DEFAULT_MOTION_DIR),
            asset_dir: PathBuf::from(DEFAULT_ASSET_DIR),
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn normal_components(path: &Path) -> Vec<String> {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect()
}

/// Guess the character file of a motion stored as `.../motions/<name>/...`:
/// `data/assets/<name>/<name>.xml`.
pub fn infer_character_path(motion_path: impl AsRef<Path>) -> Option<PathBuf> {
    let parts = normal_components(motion_path.as_ref());
    let idx = parts.iter().position(|part| part == "motions")?;
    //// the component after `motions` must be a directory, not the motion file itself
    if idx + 2 >= parts.len() {
        return None;
    }
    Some(character_xml_path(Path::new(DEFAULT_ASSET_DIR), &parts[idx + 1]))
}

/// Character of a motion given by its path relative to the motion directory.
pub fn character_from_rel_path(rel_path: &str) -> String {
    rel_path
        .split('/')
        .find(|part| !part.is_empty())
        .unwrap_or(DEFAULT_CHARACTER)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 5000);
        assert_eq!(config.address(), "0.0.0.0:5000");
        assert_eq!(config.motion_dir, PathBuf::from("data/motions"));
        assert_eq!(config.asset_dir, PathBuf::from("data/assets"));
    }

    #[test]
    fn infers_character_from_motion_dir() {
        assert_eq!(
            infer_character_path("data/motions/humanoid/walk.pkl"),
            Some(PathBuf::from("data/assets/humanoid/humanoid.xml"))
        );
        assert_eq!(
            infer_character_path("/home/me/data/motions/g1/dance/spin.pkl"),
            Some(PathBuf::from("data/assets/g1/g1.xml"))
        );
        assert_eq!(infer_character_path("data/motions/walk.pkl"), None);
        assert_eq!(infer_character_path("clips/walk.pkl"), None);
    }

    #[test]
    fn character_of_relative_path() {
        assert_eq!(character_from_rel_path("humanoid/walk.pkl"), "humanoid");
        assert_eq!(character_from_rel_path("walk.pkl"), "walk.pkl");
        assert_eq!(character_from_rel_path(""), "humanoid");
    }
}
