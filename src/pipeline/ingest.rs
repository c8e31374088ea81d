use futures::{Stream, StreamExt};
use std::fmt::Display;
use std::io;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::error::PipelineError;

/// Required extension, compared against the lowercased filename.
pub const UPLOAD_EXTENSION: &str = ".xmi";

/// Check the declared filename. Touches no filesystem state.
pub fn validate_upload_filename(filename: Option<&str>) -> Result<&str, PipelineError> {
    match filename {
        Some(name) if name.to_lowercase().ends_with(UPLOAD_EXTENSION) => Ok(name),
        other => Err(PipelineError::InvalidInputFormat {
            filename: other.map(str::to_owned),
        }),
    }
}

/// Stream the upload verbatim into `dest`, returning the number of bytes written.
///
/// Transport errors, write errors and uploads larger than `max_bytes` all map to
/// `IngestFailure`. A partially written file is left for workspace teardown.
pub async fn ingest_upload<S, B, E>(
    body: S,
    dest: &Path,
    max_bytes: u64,
) -> Result<u64, PipelineError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    let mut body = std::pin::pin!(body);
    let mut file = File::create(dest)
        .await
        .map_err(PipelineError::IngestFailure)?;
    let mut written: u64 = 0;

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|error| {
            PipelineError::IngestFailure(io::Error::other(format!(
                "failed to read upload: {error}"
            )))
        })?;
        let bytes = chunk.as_ref();
        written += bytes.len() as u64;
        if written > max_bytes {
            return Err(PipelineError::IngestFailure(io::Error::other(format!(
                "upload exceeds {max_bytes} bytes"
            ))));
        }
        file.write_all(bytes)
            .await
            .map_err(PipelineError::IngestFailure)?;
    }

    file.flush().await.map_err(PipelineError::IngestFailure)?;
    Ok(written)
}
