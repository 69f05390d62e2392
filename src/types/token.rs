/// A cancellation token used to stop every pipeline stage after a fatal error.
///
/// This is a type alias for [`tokio_util::sync::CancellationToken`]. The
/// pipeline cancels it when a worker hits a non-retryable rejection or a
/// stage fails; every stage races its waits against
/// [`cancelled()`](tokio_util::sync::CancellationToken::cancelled).
pub type PipelineCancellationToken = tokio_util::sync::CancellationToken;

/// Create a new [`PipelineCancellationToken`].
///
/// # Example
///
/// ```
/// use s3_bulk_delete::create_pipeline_cancellation_token;
///
/// let token = create_pipeline_cancellation_token();
/// assert!(!token.is_cancelled());
///
/// token.cancel();
/// assert!(token.is_cancelled());
/// ```
pub fn create_pipeline_cancellation_token() -> PipelineCancellationToken {
    tokio_util::sync::CancellationToken::new()
}
