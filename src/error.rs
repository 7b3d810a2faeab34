use std::path::PathBuf;

#[derive(Debug)]
pub enum Error {
    IO(std::io::Error, Option<String>),
    Pickle(String),
    Motion(String),
    Character(String),
    Xml(roxmltree::Error),
    Json(serde_json::Error),
    NotFound(PathBuf),
    BadRequest(String),
    InvalidArgument(String),
    Feature(&'static str),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IO(err, Some(context)) => write!(f, "{context}: {err}"),
            Error::IO(err, None) => write!(f, "{err}"),
            Error::Pickle(msg) => write!(f, "Invalid pickle: {msg}"),
            Error::Motion(msg) => write!(f, "Invalid motion: {msg}"),
            Error::Character(msg) => write!(f, "Invalid character: {msg}"),
            Error::Xml(err) => write!(f, "Invalid xml: {err}"),
            Error::Json(err) => write!(f, "{err}"),
            Error::NotFound(path) => write!(f, "File not found: {}", path.display()),
            Error::BadRequest(msg) => write!(f, "Bad request: {msg}"),
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {msg}"),
            Error::Feature(feature) => {
                write!(f, "This build was compiled without the `{feature}` feature")
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IO(err, None)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

impl From<roxmltree::Error> for Error {
    fn from(err: roxmltree::Error) -> Self {
        Error::Xml(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Read a whole file, mapping a missing file to `Error::NotFound`.
pub fn read_file(path: &std::path::Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|err| match err.kind() {
        std::io::ErrorKind::NotFound => Error::NotFound(path.to_path_buf()),
        _ => Error::IO(err, Some(format!("Failed to read {}", path.display()))),
    })
}
