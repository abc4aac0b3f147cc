use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use sprig_formats::{document, DefinitionError, Game};
use thiserror::Error;

/// Header naming the account a remote save or load acts for.
pub const ACCOUNT_HEADER: &str = "X-Account-Id";

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Definition(#[from] DefinitionError),
    #[error("remote endpoint request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("remote endpoint answered {status} for {url}: {body}")]
    Status { url: String, status: u16, body: String },
}

/// Where a session writes its definition on save and reads it back on load.
pub trait Persistence: Send {
    fn save(&self, game: &Game) -> Result<(), PersistenceError>;

    /// Fetches the raw definition. Playability checks are left to the caller.
    fn load(&self, id: &str) -> Result<Game, PersistenceError>;

    fn describe(&self) -> String;
}

/// A single named JSON file on disk.
#[derive(Debug, Clone)]
pub struct LocalFile {
    path: PathBuf,
}

impl LocalFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self) -> impl FnOnce(std::io::Error) -> PersistenceError + '_ {
        move |source| PersistenceError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl Persistence for LocalFile {
    fn save(&self, game: &Game) -> Result<(), PersistenceError> {
        let bytes = document::encode(game)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(self.io_error())?;
        }
        fs::write(&self.path, bytes).map_err(self.io_error())?;
        log::info!("saved game {} to {}", game.id, self.path.display());
        Ok(())
    }

    fn load(&self, _id: &str) -> Result<Game, PersistenceError> {
        let bytes = fs::read(&self.path).map_err(self.io_error())?;
        Ok(document::decode(&bytes)?)
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

/// Connection details for the backing service.
#[derive(Debug, Clone)]
pub struct RemoteSettings {
    pub base_url: String,
    pub token: String,
    pub account: String,
    pub timeout: Duration,
}

/// The backing service's game endpoint, spoken to over blocking HTTP.
#[derive(Debug, Clone)]
pub struct RemoteEndpoint {
    settings: RemoteSettings,
    client: Client,
}

impl RemoteEndpoint {
    pub fn new(settings: RemoteSettings) -> Result<Self, PersistenceError> {
        let client = Client::builder().timeout(settings.timeout).build()?;
        Ok(Self { settings, client })
    }

    pub fn game_url(&self, id: &str) -> String {
        format!("{}/games/{}", self.settings.base_url.trim_end_matches('/'), id)
    }

    fn check(url: String, response: reqwest::blocking::Response) -> Result<reqwest::blocking::Response, PersistenceError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        Err(PersistenceError::Status {
            url,
            status: status.as_u16(),
            body,
        })
    }
}

impl Persistence for RemoteEndpoint {
    fn save(&self, game: &Game) -> Result<(), PersistenceError> {
        let url = self.game_url(&game.id);
        let body = document::encode(game)?;
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.settings.token)
            .header(ACCOUNT_HEADER, &self.settings.account)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()?;
        Self::check(url.clone(), response)?;
        log::info!("posted game {} to {url}", game.id);
        Ok(())
    }

    fn load(&self, id: &str) -> Result<Game, PersistenceError> {
        let url = self.game_url(id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.settings.token)
            .header(ACCOUNT_HEADER, &self.settings.account)
            .send()?;
        let bytes = Self::check(url, response)?.bytes()?;
        Ok(document::decode(&bytes)?)
    }

    fn describe(&self) -> String {
        format!("remote {}", self.settings.base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::{LocalFile, Persistence, PersistenceError, RemoteEndpoint, RemoteSettings};
    use sprig_formats::{document, Game, Object};
    use std::collections::BTreeMap;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread::{self, JoinHandle};
    use std::time::Duration;
    use tempfile::tempdir;

    struct Recorded {
        request_line: String,
        headers: BTreeMap<String, String>,
        body: Vec<u8>,
    }

    /// Answers one connection per canned `(status, body)` and hands back
    /// what each request carried.
    fn canned_server(responses: Vec<(u16, Vec<u8>)>) -> (String, JoinHandle<Vec<Recorded>>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let base = format!("http://{}", listener.local_addr().expect("addr"));
        let handle = thread::spawn(move || {
            let mut seen = Vec::new();
            for (status, body) in responses {
                let (stream, _) = listener.accept().expect("accept");
                let mut reader = BufReader::new(stream);
                let mut request_line = String::new();
                reader.read_line(&mut request_line).expect("request line");
                let mut headers = BTreeMap::new();
                loop {
                    let mut line = String::new();
                    reader.read_line(&mut line).expect("header");
                    let line = line.trim_end();
                    if line.is_empty() {
                        break;
                    }
                    if let Some((name, value)) = line.split_once(':') {
                        headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
                    }
                }
                let length = headers
                    .get("content-length")
                    .and_then(|value| value.parse().ok())
                    .unwrap_or(0);
                let mut request_body = vec![0; length];
                reader.read_exact(&mut request_body).expect("body");

                let mut stream = reader.into_inner();
                write!(
                    stream,
                    "HTTP/1.1 {status} Canned\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                )
                .expect("head");
                stream.write_all(&body).expect("write body");
                stream.flush().expect("flush");
                seen.push(Recorded {
                    request_line: request_line.trim_end().to_string(),
                    headers,
                    body: request_body,
                });
            }
            seen
        });
        (base, handle)
    }

    fn endpoint(base_url: String) -> RemoteEndpoint {
        RemoteEndpoint::new(RemoteSettings {
            base_url,
            token: "secret".into(),
            account: "acct-7".into(),
            timeout: Duration::from_secs(5),
        })
        .expect("client")
    }

    fn playable() -> Game {
        let mut game = Game::new("g1", "demo");
        game.width = 10.0;
        game.height = 10.0;
        game.subject = Some(Object::new("hero"));
        game.insert_object(Object::new("rock"));
        game
    }

    #[test]
    fn local_file_round_trips_a_game() {
        let dir = tempdir().expect("tempdir");
        let store = LocalFile::new(dir.path().join("nested").join("game.json"));
        let mut game = Game::new("g1", "demo");
        game.width = 10.0;
        game.height = 10.0;
        game.insert_object(Object::new("rock"));
        store.save(&game).expect("save");

        let back = store.load("g1").expect("load");
        assert!(back.same_content(&game));
        assert_eq!(back.objects["rock"].owner(), Some("g1"));
    }

    #[test]
    fn missing_local_file_is_an_io_error() {
        let dir = tempdir().expect("tempdir");
        let store = LocalFile::new(dir.path().join("absent.json"));
        assert!(matches!(store.load("x"), Err(PersistenceError::Io { .. })));
    }

    #[test]
    fn remote_urls_join_cleanly() {
        let endpoint = RemoteEndpoint::new(RemoteSettings {
            base_url: "http://localhost:9000/api/".into(),
            token: "t".into(),
            account: "acct".into(),
            timeout: Duration::from_secs(1),
        })
        .expect("client");
        assert_eq!(endpoint.game_url("abc"), "http://localhost:9000/api/games/abc");
    }

    #[test]
    fn remote_save_and_load_carry_credentials_and_body() {
        let game = playable();
        let encoded = document::encode(&game).expect("encode");
        let (base, server) = canned_server(vec![(201, Vec::new()), (200, encoded.clone())]);
        let remote = endpoint(base);

        remote.save(&game).expect("save");
        let back = remote.load("g1").expect("load");
        assert!(back.same_content(&game));
        assert_eq!(back.objects["rock"].owner(), Some("g1"));

        let seen = server.join().expect("server thread");
        assert_eq!(seen[0].request_line, "POST /games/g1 HTTP/1.1");
        assert_eq!(seen[0].body, encoded);
        assert_eq!(seen[1].request_line, "GET /games/g1 HTTP/1.1");
        for request in &seen {
            assert_eq!(request.headers["authorization"], "Bearer secret");
            assert_eq!(request.headers["x-account-id"], "acct-7");
        }
    }

    #[test]
    fn remote_errors_surface_status_and_body() {
        let (base, server) = canned_server(vec![(404, b"no such game".to_vec()), (500, b"boom".to_vec())]);
        let remote = endpoint(base);

        match remote.load("missing") {
            Err(PersistenceError::Status { status, body, url }) => {
                assert_eq!(status, 404);
                assert_eq!(body, "no such game");
                assert!(url.ends_with("/games/missing"));
            }
            other => panic!("expected a status error, got {other:?}"),
        }
        assert!(matches!(
            remote.save(&playable()),
            Err(PersistenceError::Status { status: 500, .. })
        ));
        server.join().expect("server thread");
    }
}
