mod support;

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use futures::stream;
use support::{dir_is_empty, echo_generator, two_file_generator, zip_entries};
use tempfile::TempDir;
use uml_tool::pipeline::{GenerationJob, GenerationPipeline, PipelineSettings, Upload};
use uml_tool::{BlockingGenerator, GeneratorError, PipelineError, ProjectGenerator};

struct Dirs {
    scratch: TempDir,
    artifacts: TempDir,
}

impl Dirs {
    fn new() -> Self {
        Self {
            scratch: tempfile::tempdir().unwrap(),
            artifacts: tempfile::tempdir().unwrap(),
        }
    }

    fn pipeline(&self, generator: Arc<dyn ProjectGenerator>) -> GenerationPipeline {
        let settings = PipelineSettings {
            scratch_root: Some(self.scratch.path().to_path_buf()),
            artifact_dir: self.artifacts.path().to_path_buf(),
            max_upload_bytes: 1024 * 1024,
            generation_timeout: Some(Duration::from_secs(30)),
        };
        GenerationPipeline::new(settings, generator)
    }
}

fn upload(
    filename: &str,
    contents: &[u8],
) -> Upload<impl futures::Stream<Item = Result<Vec<u8>, io::Error>> + use<>> {
    // Split in two chunks to exercise streaming
    let (head, tail) = contents.split_at(contents.len() / 2);
    Upload {
        filename: Some(filename.to_string()),
        body: stream::iter(vec![Ok(head.to_vec()), Ok(tail.to_vec())]),
    }
}

#[tokio::test]
async fn same_input_twice_gives_equal_archives_in_distinct_workspaces() {
    let dirs = Dirs::new();
    let pipeline = dirs.pipeline(Arc::new(echo_generator()));

    let first = pipeline.process(upload("model.xmi", b"<xmi:XMI/>")).await.unwrap();
    let second = pipeline.process(upload("model.xmi", b"<xmi:XMI/>")).await.unwrap();

    assert_ne!(first.path, second.path);
    let first_bytes = std::fs::read(&first.path).unwrap();
    let second_bytes = std::fs::read(&second.path).unwrap();
    assert_eq!(zip_entries(&first_bytes), zip_entries(&second_bytes));
    assert!(dir_is_empty(dirs.scratch.path()));

    assert!(first.cleanup.run());
    assert!(second.cleanup.run());
    // Second deletion is a no-op
    assert!(!first.cleanup.run());
    assert!(dir_is_empty(dirs.artifacts.path()));
}

#[tokio::test]
async fn archive_outlives_workspace_until_cleanup() {
    let dirs = Dirs::new();
    let pipeline = dirs.pipeline(Arc::new(two_file_generator()));

    let archive = pipeline.process(upload("model.xmi", b"<xmi:XMI/>")).await.unwrap();

    assert!(dir_is_empty(dirs.scratch.path()));
    assert!(archive.path.starts_with(dirs.artifacts.path()));
    assert_eq!(archive.size, std::fs::metadata(&archive.path).unwrap().len());
    let names: Vec<_> = zip_entries(&std::fs::read(&archive.path).unwrap())
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(names, vec!["a.txt", "sub/b.txt"]);

    archive.cleanup.run();
    assert!(!archive.path.exists());
}

#[tokio::test]
async fn rejected_filename_never_creates_a_workspace() {
    let dirs = Dirs::new();
    let pipeline = dirs.pipeline(Arc::new(two_file_generator()));

    let err = pipeline
        .process(upload("notes.txt", b"hello"))
        .await
        .expect_err("wrong extension");

    assert_matches!(err, PipelineError::InvalidInputFormat { .. });
    assert!(dir_is_empty(dirs.scratch.path()));
    assert!(dir_is_empty(dirs.artifacts.path()));
}

#[tokio::test]
async fn broken_upload_stream_is_ingest_failure() {
    let dirs = Dirs::new();
    let pipeline = dirs.pipeline(Arc::new(two_file_generator()));

    let upload = Upload {
        filename: Some("model.xmi".to_string()),
        body: stream::iter(vec![
            Ok(b"<xmi:".to_vec()),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer went away")),
        ]),
    };
    let err = pipeline.process(upload).await.expect_err("stream error");

    assert_matches!(err, PipelineError::IngestFailure(_));
    assert!(dir_is_empty(dirs.scratch.path()));
}

struct NeverFinishes;

#[async_trait]
impl ProjectGenerator for NeverFinishes {
    async fn generate(&self, _job: &GenerationJob) -> Result<(), GeneratorError> {
        std::future::pending().await
    }

    fn name(&self) -> &str {
        "never-finishes"
    }
}

#[tokio::test]
async fn dropped_request_reclaims_workspace() {
    let dirs = Dirs::new();
    let pipeline = dirs.pipeline(Arc::new(NeverFinishes));

    let outcome = tokio::time::timeout(
        Duration::from_millis(200),
        pipeline.process(upload("model.xmi", b"<xmi:XMI/>")),
    )
    .await;

    assert!(outcome.is_err(), "pipeline should still be running");
    assert!(dir_is_empty(dirs.scratch.path()));
    assert!(dir_is_empty(dirs.artifacts.path()));
}

#[tokio::test]
async fn generation_timeout_is_generation_failure() {
    let dirs = Dirs::new();
    let settings = PipelineSettings {
        generation_timeout: Some(Duration::from_millis(50)),
        ..dirs.pipeline(Arc::new(NeverFinishes)).settings().clone()
    };
    let pipeline = GenerationPipeline::new(settings, Arc::new(NeverFinishes));

    let err = pipeline
        .process(upload("model.xmi", b"<xmi:XMI/>"))
        .await
        .expect_err("timed out");

    assert_matches!(err, PipelineError::GenerationFailure(_));
    assert!(dir_is_empty(dirs.scratch.path()));
}

async fn wait_until_empty(dir: &Path) -> bool {
    for _ in 0..100 {
        if dir_is_empty(dir) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    dir_is_empty(dir)
}

#[tokio::test]
async fn timed_out_blocking_generator_cannot_recreate_workspace() {
    let dirs = Dirs::new();
    let slow = Arc::new(BlockingGenerator::new(
        "slow-writer",
        |_: &Path, output: &Path| {
            std::thread::sleep(Duration::from_millis(300));
            let nested = output.join("src").join("model");
            std::fs::create_dir_all(&nested)
                .and_then(|()| std::fs::write(nested.join("a.rs"), b"pub struct A;"))
                .map_err(|e| GeneratorError::Fault(e.to_string()))
        },
    ));
    let settings = PipelineSettings {
        generation_timeout: Some(Duration::from_millis(50)),
        ..dirs.pipeline(slow.clone()).settings().clone()
    };
    let pipeline = GenerationPipeline::new(settings, slow);

    let err = pipeline
        .process(upload("model.xmi", b"<xmi:XMI/>"))
        .await
        .expect_err("timed out");
    assert_matches!(err, PipelineError::GenerationFailure(_));

    // The closure is still sleeping; removal waits for it to return.
    assert!(wait_until_empty(dirs.scratch.path()).await);
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(dir_is_empty(dirs.scratch.path()));
    assert!(dir_is_empty(dirs.artifacts.path()));
}
