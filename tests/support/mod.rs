#![allow(dead_code)]

use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::http::{Request, Response, header};
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::{TempDir, tempdir};
use uml_tool::{BlockingGenerator, GeneratorError, ProjectGenerator, ServerConfig, UmlToolServer};
use zip::ZipArchive;

pub const BOUNDARY: &str = "uml-tool-test-boundary";

/// Server wired to throwaway scratch, artifact and static directories.
pub struct TestServer {
    pub server: UmlToolServer,
    pub scratch: TempDir,
    pub artifacts: TempDir,
    pub static_dir: TempDir,
}

impl TestServer {
    pub fn new(generator: impl ProjectGenerator + 'static) -> Self {
        Self::with_config(generator, |_| {})
    }

    pub fn with_config(
        generator: impl ProjectGenerator + 'static,
        configure: impl FnOnce(&mut ServerConfig),
    ) -> Self {
        let scratch = tempdir().expect("scratch dir");
        let artifacts = tempdir().expect("artifact dir");
        let static_dir = tempdir().expect("static dir");

        let mut config = ServerConfig {
            scratch_root: Some(scratch.path().to_path_buf()),
            artifact_dir: Some(artifacts.path().to_path_buf()),
            static_dir: static_dir.path().to_path_buf(),
            ..ServerConfig::default()
        };
        configure(&mut config);

        let generator: Arc<dyn ProjectGenerator> = Arc::new(generator);
        Self {
            server: UmlToolServer::new(Arc::new(config), generator),
            scratch,
            artifacts,
            static_dir,
        }
    }

    pub fn router(&self) -> Router {
        self.server.router()
    }

    /// Nothing left behind in either the scratch root or the artifact dir.
    ///
    /// Artifact removal runs on the blocking pool after the body is dropped, so this
    /// waits briefly for both directories to drain.
    pub async fn assert_no_leftovers(&self) {
        for _ in 0..100 {
            if dir_is_empty(self.scratch.path()) && dir_is_empty(self.artifacts.path()) {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(
            dir_is_empty(self.scratch.path()),
            "workspace left behind in {}",
            self.scratch.path().display()
        );
        assert!(
            dir_is_empty(self.artifacts.path()),
            "artifact left behind in {}",
            self.artifacts.path().display()
        );
    }
}

/// Writes `a.txt` and `sub/b.txt`.
pub fn two_file_generator() -> BlockingGenerator {
    BlockingGenerator::new("two-files", |_input: &Path, output: &Path| {
        let write = || -> std::io::Result<()> {
            std::fs::write(output.join("a.txt"), b"alpha")?;
            std::fs::create_dir_all(output.join("sub"))?;
            std::fs::write(output.join("sub").join("b.txt"), b"beta")?;
            Ok(())
        };
        write().map_err(|e| GeneratorError::Fault(e.to_string()))
    })
}

/// Copies the uploaded model into the output directory.
pub fn echo_generator() -> BlockingGenerator {
    BlockingGenerator::new("echo", |input: &Path, output: &Path| {
        std::fs::copy(input, output.join("model.xmi"))
            .map(|_| ())
            .map_err(|e| GeneratorError::Fault(e.to_string()))
    })
}

pub fn incompatible_generator() -> BlockingGenerator {
    BlockingGenerator::new("incompatible", |_input: &Path, _output: &Path| {
        Err(GeneratorError::IncompatibleInput(
            "unsupported stereotype".to_string(),
        ))
    })
}

pub fn faulty_generator() -> BlockingGenerator {
    BlockingGenerator::new("faulty", |_input: &Path, output: &Path| {
        std::fs::write(output.join("partial.txt"), b"half").ok();
        Err(GeneratorError::Fault("template engine crashed".to_string()))
    })
}

/// Exits cleanly after deleting its own output directory.
pub fn output_removing_generator() -> BlockingGenerator {
    BlockingGenerator::new("output-removing", |_input: &Path, output: &Path| {
        std::fs::remove_dir_all(output).map_err(|e| GeneratorError::Fault(e.to_string()))
    })
}

/// One multipart part.
pub struct Part<'a> {
    pub name: &'a str,
    pub filename: Option<&'a str>,
    pub contents: &'a [u8],
}

pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        let disposition = match part.filename {
            Some(filename) => format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                part.name, filename
            ),
            None => format!("Content-Disposition: form-data; name=\"{}\"\r\n", part.name),
        };
        body.extend_from_slice(disposition.as_bytes());
        if part.filename.is_some() {
            body.extend_from_slice(b"Content-Type: application/octet-stream\r\n");
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(part.contents);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn generate_request(parts: &[Part<'_>]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/generate")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(parts)))
        .expect("request")
}

/// `POST /generate` with a single `file` part.
pub fn upload_request(filename: &str, contents: &[u8]) -> Request<Body> {
    generate_request(&[Part {
        name: "file",
        filename: Some(filename),
        contents,
    }])
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

pub async fn body_bytes(response: Response<Body>) -> Bytes {
    response
        .into_body()
        .collect()
        .await
        .expect("collect body")
        .to_bytes()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).expect("json body")
}

/// `(name, contents)` of every entry, in archive order.
pub fn zip_entries(bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).expect("valid zip");
    (0..archive.len())
        .map(|i| {
            let mut entry = archive.by_index(i).expect("entry");
            let mut contents = Vec::new();
            entry.read_to_end(&mut contents).expect("entry contents");
            (entry.name().to_string(), contents)
        })
        .collect()
}

pub fn dir_is_empty(path: &Path) -> bool {
    std::fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
}
