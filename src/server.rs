use crate::character::{character_xml_path, describe_character_xml, CharacterModel};
use crate::config::{character_from_rel_path, ServerConfig};
use crate::error::{read_file, Error, Result};
use crate::http::{Request, Response};
use crate::kinematics::SkeletonTrack;
use crate::motion::load_motion;
use crate::pickle;
use regex::Regex;
use serde_json::json;
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use walkdir::WalkDir;

const INDEX_HTML: &str = include_str!("../static/index.html");

const READ_TIMEOUT: Duration = Duration::from_secs(5);

//////////////////////////////////////////////////////////////// ROUTING ///////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    Index,
    Motions,
    Skeleton(String),
    Raw(String),
    Motion(String),
    Character(String),
}

pub struct Router {
    routes: Vec<(Regex, fn(String) -> Route)>,
}

impl Router {
    pub fn new() -> Result<Router> {
        //// more specific patterns first, `/api/motion/(.+)` would swallow the other two
        let table: [(&str, fn(String) -> Route); 6] = [
            (r"^/$", |_| Route::Index),
            (r"^/api/motions/?$", |_| Route::Motions),
            (r"^/api/motion/(.+)/skeleton$", Route::Skeleton),
            (r"^/api/motion/(.+)/raw$", Route::Raw),
            (r"^/api/motion/(.+)$", Route::Motion),
            (r"^/api/character/([^/]+)$", Route::Character),
        ];
        let mut routes = Vec::with_capacity(table.len());
        for (pattern, make) in table {
            let regex = Regex::new(pattern)
                .map_err(|err| Error::InvalidArgument(format!("bad route {pattern}: {err}")))?;
            routes.push((regex, make));
        }
        Ok(Router { routes })
    }

    pub fn route(&self, path: &str) -> Option<Route> {
        self.routes.iter().find_map(|(regex, make)| {
            let captures = regex.captures(path)?;
            let arg = captures.get(1).map(|m| m.as_str().to_string()).unwrap_or_default();
            Some(make(arg))
        })
    }
}

//////////////////////////////////////////////////////////////// HANDLERS ///////////////////////////////////////////////////////////////////

/// Everything a connection handler needs: the directories to serve from and the character models
/// loaded so far.
pub struct AppState {
    pub config: ServerConfig,
    router: Router,
    models: Mutex<HashMap<String, Arc<CharacterModel>>>,
}

/// Join a client supplied relative path onto `base`, refusing anything that could leave it.
pub fn resolve_within(base: &Path, rel_path: &str) -> Result<PathBuf> {
    let rel = Path::new(rel_path);
    let escapes = rel.is_absolute()
        || rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if rel_path.is_empty() || escapes {
        return Err(Error::BadRequest(format!("invalid path {rel_path:?}")));
    }
    Ok(base.join(rel))
}

fn error_response(err: Error) -> Response {
    match err {
        Error::NotFound(_) => Response::error_json(404, "File not found"),
        Error::BadRequest(msg) => Response::error_json(400, msg),
        other => {
            log::error!("{other}");
            Response::error_json(500, other.to_string())
        }
    }
}

impl AppState {
    pub fn new(config: ServerConfig) -> Result<AppState> {
        Ok(AppState {
            config,
            router: Router::new()?,
            models: Mutex::new(HashMap::new()),
        })
    }

    pub fn handle(&self, request: &Request) -> Response {
        let Some(route) = self.router.route(&request.path) else {
            return Response::error_json(404, "Not found");
        };
        if request.method != "GET" {
            return Response::error_json(405, format!("Method {} not allowed", request.method));
        }
        let result = match route {
            Route::Index => Ok(Response::html(INDEX_HTML)),
            Route::Motions => self.list_motions().map(|list| Response::json(200, &json!(list))),
            Route::Motion(path) => self.motion(&path),
            Route::Raw(path) => self.motion_raw(&path),
            Route::Skeleton(path) => self.motion_skeleton(&path),
            Route::Character(name) => self.character(&name),
        };
        result.unwrap_or_else(error_response)
    }

    /// Cached character model of `name`, `None` when there is no xml for it.
    pub fn character_model(&self, name: &str) -> Result<Option<Arc<CharacterModel>>> {
        if let Some(model) = self.cached_models().get(name) {
            return Ok(Some(model.clone()));
        }
        let xml_path = character_xml_path(&self.config.asset_dir, name);
        if !xml_path.is_file() {
            return Ok(None);
        }
        //// parsed without holding the lock, a concurrent load of the same name keeps the first model
        let model = Arc::new(CharacterModel::load(&xml_path)?);
        let model = self
            .cached_models()
            .entry(name.to_string())
            .or_insert_with(|| {
                log::info!("Loaded character {} ({} bodies)", name, model.num_bodies());
                model.clone()
            })
            .clone();
        Ok(Some(model))
    }

    pub fn num_cached_models(&self) -> usize {
        self.cached_models().len()
    }

    /// Entries are inserted whole, a poisoned map is still consistent.
    fn cached_models(&self) -> MutexGuard<'_, HashMap<String, Arc<CharacterModel>>> {
        self.models.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sorted `.pkl` paths below the motion directory, relative to it, `/` separated.
    pub fn list_motions(&self) -> Result<Vec<String>> {
        let root = &self.config.motion_dir;
        let mut motions = Vec::new();
        for entry in WalkDir::new(root).follow_links(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    log::warn!("{err}");
                    continue;
                }
            };
            let path = entry.path();
            if !entry.file_type().is_file() || path.extension().map_or(true, |ext| ext != "pkl") {
                continue;
            }
            if let Ok(rel) = path.strip_prefix(root) {
                let parts: Vec<_> = rel.components().map(|c| c.as_os_str().to_string_lossy()).collect();
                motions.push(parts.join("/"));
            }
        }
        motions.sort();
        Ok(motions)
    }

    fn existing_motion(&self, rel_path: &str) -> Result<PathBuf> {
        let path = resolve_within(&self.config.motion_dir, rel_path)?;
        if !path.is_file() {
            return Err(Error::NotFound(path));
        }
        Ok(path)
    }

    fn motion(&self, rel_path: &str) -> Result<Response> {
        let path = self.existing_motion(rel_path)?;
        let motion = load_motion(&path)?;
        let file_size = std::fs::metadata(&path)?.len();
        Ok(Response::json(
            200,
            &json!({
                "fps": motion.fps as i64,
                "loop_mode": motion.loop_mode.value(),
                "frames": motion.frames,
                "num_frames": motion.num_frames(),
                "duration": motion.get_length(),
                "file_size": file_size,
            }),
        ))
    }

    fn motion_raw(&self, rel_path: &str) -> Result<Response> {
        let path = self.existing_motion(rel_path)?;
        let value = pickle::from_bytes(&read_file(&path)?)?;
        Ok(Response::json(200, &value.describe_entries()?))
    }

    fn motion_skeleton(&self, rel_path: &str) -> Result<Response> {
        let path = self.existing_motion(rel_path)?;
        let character = character_from_rel_path(rel_path);
        let Some(model) = self.character_model(&character)? else {
            return Ok(Response::error_json(
                404,
                format!("Character model not found for {character}"),
            ));
        };
        let motion = load_motion(&path)?;
        let track = SkeletonTrack::compute(&model, &motion)?;
        Ok(Response::json(
            200,
            &json!({
                "body_names": track.body_names,
                "parent_indices": track.parent_indices,
                "frames": track.positions_as_arrays(),
                "num_bodies": track.num_bodies(),
            }),
        ))
    }

    fn character(&self, name: &str) -> Result<Response> {
        resolve_within(&self.config.asset_dir, name)?;
        let xml_path = character_xml_path(&self.config.asset_dir, name);
        if !xml_path.is_file() {
            return Ok(Response::error_json(404, "Character XML not found"));
        }
        let data = read_file(&xml_path)?;
        let xml = String::from_utf8_lossy(&data);
        let description = describe_character_xml(name, &xml)?;
        Ok(Response::json(200, &serde_json::to_value(description)?))
    }
}

fn handle_connection(state: &AppState, stream: TcpStream) {
    if let Err(err) = stream.set_read_timeout(Some(READ_TIMEOUT)) {
        log::warn!("{err}");
    }
    let response = match Request::read_from(&stream) {
        Ok(request) => {
            let response = state.handle(&request);
            log::info!("{} {} {}", request.method, request.path, response.status);
            response
        }
        Err(err) => {
            log::warn!("{err}");
            Response::error_json(400, err.to_string())
        }
    };
    if let Err(err) = response.write_to(&stream) {
        log::warn!("Failed to write response: {err}");
    }
}

//////////////////////////////////////////////////////////////// SERVER ///////////////////////////////////////////////////////////////////

/// Motion viewer web server. Accepts on its own thread and answers each connection on a fresh
/// one. Dropping the server stops accepting.
pub struct Server {
    addr: SocketAddr,
    state: Arc<AppState>,
    shutdown: Arc<AtomicBool>,
    acceptor: Option<JoinHandle<()>>,
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown_internal();
    }
}

impl Server {
    pub fn bind(config: ServerConfig) -> Result<Server> {
        let address = config.address();
        let listener = TcpListener::bind(&address)
            .map_err(|err| Error::IO(err, Some(format!("Failed to bind to: {address}"))))?;
        let addr = listener.local_addr()?;
        let state = Arc::new(AppState::new(config)?);
        let shutdown = Arc::new(AtomicBool::new(false));

        let acceptor = std::thread::Builder::new()
            .name("Motion Server".to_string())
            .spawn({
                let state = state.clone();
                let shutdown = shutdown.clone();
                move || {
                    for stream in listener.incoming() {
                        if shutdown.load(Ordering::Relaxed) {
                            break;
                        }
                        let stream = match stream {
                            Ok(stream) => stream,
                            Err(err) => {
                                log::warn!("Connection failed: {err}");
                                continue;
                            }
                        };
                        let name = match stream.peer_addr() {
                            Ok(peer) => format!("Connection {peer}"),
                            Err(_) => "Connection".to_string(),
                        };
                        let state = state.clone();
                        let spawned = std::thread::Builder::new()
                            .name(name)
                            .spawn(move || handle_connection(&state, stream));
                        if let Err(err) = spawned {
                            log::error!("Failed to spawn connection thread: {err}");
                        }
                    }
                    log::trace!("Shutdown server: {addr}");
                }
            })
            .map_err(|err| Error::IO(err, None))?;

        Ok(Server {
            addr,
            state,
            shutdown,
            acceptor: Some(acceptor),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Block until the accept loop ends.
    pub fn wait(mut self) -> Result<()> {
        if let Some(acceptor) = self.acceptor.take() {
            acceptor.join().map_err(|_| {
                Error::IO(
                    std::io::Error::new(std::io::ErrorKind::Other, "accept thread panicked"),
                    None,
                )
            })?;
        }
        Ok(())
    }

    pub fn shutdown(mut self) {
        self.shutdown_internal();
    }

    fn shutdown_internal(&mut self) {
        let Some(acceptor) = self.acceptor.take() else {
            return;
        };
        self.shutdown.store(true, Ordering::Relaxed);
        //// the accept loop only looks at the flag once a connection comes in, so make one
        let mut wake = self.addr;
        if wake.ip().is_unspecified() {
            wake.set_ip(Ipv4Addr::LOCALHOST.into());
        }
        let timeout = Duration::from_secs_f32(3.0);
        if let Err(err) = TcpStream::connect_timeout(&wake, timeout) {
            log::warn!("{err}");
        }
        let _ = acceptor.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::character::tests::STICK_XML;
    use crate::motion::Motion;
    use crate::types::LoopMode;
    use serde_json::Value;

    fn request(method: &str, path: &str) -> Request {
        Request {
            method: method.to_string(),
            path: path.to_string(),
            query: None,
            version: "HTTP/1.1".to_string(),
            headers: Vec::new(),
        }
    }

    fn body(response: &Response) -> Value {
        serde_json::from_slice(&response.body).unwrap()
    }

    /// motions/stick/{walk,run}.pkl, motions/misc/odd.pkl, a stray text file and the stick
    /// character.
    fn fixture(name: &str) -> (PathBuf, AppState) {
        let root = std::env::temp_dir().join(format!("motion_viewer_{name}_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&root);
        let motion_dir = root.join("motions");
        let asset_dir = root.join("assets");
        std::fs::create_dir_all(motion_dir.join("stick")).unwrap();
        std::fs::create_dir_all(motion_dir.join("misc")).unwrap();
        std::fs::create_dir_all(asset_dir.join("stick")).unwrap();
        std::fs::write(asset_dir.join("stick").join("stick.xml"), STICK_XML).unwrap();
        std::fs::write(motion_dir.join("notes.txt"), "not a motion").unwrap();

        let frames = (0..4).map(|i| {
            let mut frame = vec![0.0; 13];
            frame[0] = i as f64;
            frame[2] = 1.0;
            frame
        });
        let walk = Motion::new(30.0, LoopMode::Wrap, frames.collect()).unwrap();
        walk.save(motion_dir.join("stick").join("walk.pkl")).unwrap();
        walk.save(motion_dir.join("stick").join("run.pkl")).unwrap();
        let odd = Motion::new(30.0, LoopMode::Clamp, vec![vec![0.0; 8]; 2]).unwrap();
        odd.save(motion_dir.join("misc").join("odd.pkl")).unwrap();

        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            motion_dir,
            asset_dir,
        };
        (root, AppState::new(config).unwrap())
    }

    #[test]
    fn routes_most_specific_first() {
        let router = Router::new().unwrap();
        assert_eq!(router.route("/"), Some(Route::Index));
        assert_eq!(router.route("/api/motions"), Some(Route::Motions));
        assert_eq!(
            router.route("/api/motion/humanoid/walk.pkl/skeleton"),
            Some(Route::Skeleton("humanoid/walk.pkl".to_string()))
        );
        assert_eq!(
            router.route("/api/motion/humanoid/walk.pkl/raw"),
            Some(Route::Raw("humanoid/walk.pkl".to_string()))
        );
        assert_eq!(
            router.route("/api/motion/humanoid/walk.pkl"),
            Some(Route::Motion("humanoid/walk.pkl".to_string()))
        );
        assert_eq!(router.route("/api/character/g1"), Some(Route::Character("g1".to_string())));
        assert_eq!(router.route("/api/character/g1/extra"), None);
        assert_eq!(router.route("/favicon.ico"), None);
    }

    #[test]
    fn refuses_paths_leaving_the_base() {
        let base = Path::new("data/motions");
        assert_eq!(resolve_within(base, "a/b.pkl").unwrap(), base.join("a/b.pkl"));
        assert!(matches!(resolve_within(base, "../secret.pkl"), Err(Error::BadRequest(_))));
        assert!(matches!(resolve_within(base, "a/../../b.pkl"), Err(Error::BadRequest(_))));
        assert!(matches!(resolve_within(base, "/etc/passwd"), Err(Error::BadRequest(_))));
        assert!(matches!(resolve_within(base, ""), Err(Error::BadRequest(_))));
    }

    #[test]
    fn serves_motions() {
        let (root, state) = fixture("serves");

        let list = state.handle(&request("GET", "/api/motions"));
        assert_eq!(list.status, 200);
        assert_eq!(body(&list), json!(["misc/odd.pkl", "stick/run.pkl", "stick/walk.pkl"]));

        let motion = state.handle(&request("GET", "/api/motion/stick/walk.pkl"));
        assert_eq!(motion.status, 200);
        let value = body(&motion);
        assert_eq!(value["fps"], json!(30));
        assert_eq!(value["loop_mode"], json!(1));
        assert_eq!(value["num_frames"], json!(4));
        assert_eq!(value["frames"][3][0], json!(3.0));
        assert!((value["duration"].as_f64().unwrap() - 0.1).abs() < 1e-12);
        let size = std::fs::metadata(root.join("motions/stick/walk.pkl")).unwrap().len();
        assert_eq!(value["file_size"], json!(size));

        let raw = body(&state.handle(&request("GET", "/api/motion/stick/walk.pkl/raw")));
        assert_eq!(raw["fps"], json!({ "type": "int", "value": 30 }));
        assert_eq!(raw["loop_mode"], json!({ "type": "int", "value": 1 }));
        assert_eq!(raw["frames"]["type"], json!("numpy.ndarray"));
        assert_eq!(raw["frames"]["shape"], json!([4, 13]));

        let index = state.handle(&request("GET", "/"));
        assert_eq!(index.status, 200);
        assert!(index.content_type.starts_with("text/html"));

        std::fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn character_cache_is_shared_and_survives_a_panic() {
        let (root, state) = fixture("cache");
        let state = Arc::new(state);

        let loaders: Vec<_> = (0..4)
            .map(|_| {
                let state = state.clone();
                std::thread::spawn(move || state.character_model("stick").unwrap().unwrap())
            })
            .collect();
        let models: Vec<_> = loaders.into_iter().map(|t| t.join().unwrap()).collect();
        assert!(models.iter().all(|m| Arc::ptr_eq(m, &models[0])));
        assert_eq!(state.num_cached_models(), 1);

        let holder = state.clone();
        let _ = std::thread::spawn(move || {
            let _models = holder.models.lock();
            panic!("panicked while holding the character cache");
        })
        .join();
        assert!(state.models.is_poisoned());
        let again = state.character_model("stick").unwrap().unwrap();
        assert!(Arc::ptr_eq(&again, &models[0]));
        assert!(state.character_model("robot").unwrap().is_none());

        std::fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn serves_skeletons_and_characters() {
        let (root, state) = fixture("skeleton");

        let skeleton = state.handle(&request("GET", "/api/motion/stick/walk.pkl/skeleton"));
        assert_eq!(skeleton.status, 200);
        let value = body(&skeleton);
        assert_eq!(value["num_bodies"], json!(5));
        assert_eq!(value["body_names"][0], json!("pelvis"));
        assert_eq!(value["parent_indices"], json!([-1, 0, 1, 0, 3]));
        assert_eq!(value["frames"].as_array().unwrap().len(), 4);
        assert_eq!(value["frames"][2][0], json!([2.0, 0.0, 1.0]));
        assert_eq!(state.num_cached_models(), 1);
        state.handle(&request("GET", "/api/motion/stick/run.pkl/skeleton"));
        assert_eq!(state.num_cached_models(), 1);

        let missing = state.handle(&request("GET", "/api/motion/misc/odd.pkl/skeleton"));
        assert_eq!(missing.status, 404);
        assert_eq!(body(&missing), json!({ "error": "Character model not found for misc" }));

        let character = body(&state.handle(&request("GET", "/api/character/stick")));
        assert_eq!(character["character"], json!("stick"));
        assert_eq!(character["num_joints"], json!(5));
        assert_eq!(character["joints"][0]["name"], json!("abdomen_x"));
        assert_eq!(character["joints"][0]["parent"], json!("pelvis"));

        let no_xml = state.handle(&request("GET", "/api/character/robot"));
        assert_eq!(no_xml.status, 404);
        assert_eq!(body(&no_xml), json!({ "error": "Character XML not found" }));

        std::fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn error_statuses() {
        let (root, state) = fixture("errors");

        let missing = state.handle(&request("GET", "/api/motion/stick/nope.pkl"));
        assert_eq!(missing.status, 404);
        assert_eq!(body(&missing), json!({ "error": "File not found" }));
        assert_eq!(state.handle(&request("GET", "/api/motion/stick/nope.pkl/raw")).status, 404);
        assert_eq!(state.handle(&request("GET", "/api/motion/../secret.pkl")).status, 400);
        assert_eq!(state.handle(&request("GET", "/api/character/..")).status, 400);
        assert_eq!(state.handle(&request("POST", "/api/motions")).status, 405);
        assert_eq!(state.handle(&request("GET", "/nothing/here")).status, 404);

        std::fs::write(root.join("motions/stick/broken.pkl"), b"not a pickle").unwrap();
        let broken = state.handle(&request("GET", "/api/motion/stick/broken.pkl"));
        assert_eq!(broken.status, 500);
        assert!(body(&broken)["error"].as_str().unwrap().starts_with("Invalid pickle"));

        std::fs::remove_dir_all(root).unwrap();
    }
}
