use axum::{
    body::Body,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio_util::io::ReaderStream;

use super::materialize::{ArtifactCleanup, MaterializedArchive};
use crate::error::PipelineError;

pub const ARCHIVE_CONTENT_TYPE: &str = "application/zip";
pub const ARCHIVE_DISPOSITION: &str = "attachment; filename=\"project.zip\"";

/// Body stream that runs its cleanup when dropped.
///
/// Hyper drops the body after the final frame is written, or when the connection
/// goes away first, so the cleanup runs exactly once after delivery ends. The file
/// is removed on the blocking pool, off the connection's task.
pub struct CleanupOnDrop<S> {
    inner: S,
    cleanup: ArtifactCleanup,
}

impl<S> CleanupOnDrop<S> {
    pub fn new(inner: S, cleanup: ArtifactCleanup) -> Self {
        Self { inner, cleanup }
    }
}

impl<S: Stream + Unpin> Stream for CleanupOnDrop<S> {
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<S> Drop for CleanupOnDrop<S> {
    fn drop(&mut self) {
        self.cleanup.run_in_background();
    }
}

/// Build the 200 response streaming the materialized archive.
///
/// If the file cannot be reopened the artifact is cleaned up immediately and the
/// request fails with `MaterializationFailure`.
pub async fn archive_response(archive: MaterializedArchive) -> Result<Response, PipelineError> {
    let MaterializedArchive {
        path,
        size,
        cleanup,
    } = archive;

    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(error) => {
            cleanup.run_in_background();
            tracing::error!(artifact = %path.display(), %error, "failed to open archive for delivery");
            return Err(PipelineError::MaterializationFailure(error));
        }
    };

    let body = Body::from_stream(CleanupOnDrop::new(ReaderStream::new(file), cleanup));

    let mut response = (StatusCode::OK, body).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(ARCHIVE_CONTENT_TYPE),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_static(ARCHIVE_DISPOSITION),
    );
    Ok(response)
}
