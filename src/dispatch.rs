//! Hand-off from the connector to request-processing code.

use async_trait::async_trait;

use crate::buffer::{InputBuffer, OutputBuffer};
use crate::http::request::RequestContext;
use crate::http::response::StatusCode;

/// One request/response exchange as seen by the dispatcher.
pub struct Exchange<'a> {
    pub request: RequestContext,
    pub input: InputBuffer<'a>,
    pub output: OutputBuffer<'a>,
}

impl<'a> Exchange<'a> {
    pub fn new(request: RequestContext, input: InputBuffer<'a>, output: OutputBuffer<'a>) -> Self {
        Self {
            request,
            input,
            output,
        }
    }

    pub fn into_parts(self) -> (RequestContext, InputBuffer<'a>, OutputBuffer<'a>) {
        (self.request, self.input, self.output)
    }

    /// Drains the request body, then flushes and ends the response. The
    /// response is closed even when draining fails; the first error wins.
    pub async fn finish(&mut self) -> std::io::Result<()> {
        let drained = self.input.close().await;
        let closed = self.output.close().await;
        drained.and(closed)
    }
}

/// Runs a prepared request.
#[async_trait]
pub trait Dispatcher: Send + Sync + 'static {
    async fn dispatch(&self, exchange: &mut Exchange<'_>) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    Handled,
}

/// A step of a [`Pipeline`].
#[async_trait]
pub trait Stage: Send + Sync + 'static {
    async fn invoke(&self, exchange: &mut Exchange<'_>) -> anyhow::Result<Outcome>;
}

/// Runs its stages in order until one reports the exchange handled.
/// Exchanges nobody handles get a 404.
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, stage: impl Stage) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

#[async_trait]
impl Dispatcher for Pipeline {
    async fn dispatch(&self, exchange: &mut Exchange<'_>) -> anyhow::Result<()> {
        for stage in &self.stages {
            if stage.invoke(exchange).await? == Outcome::Handled {
                return Ok(());
            }
        }
        tracing::debug!(uri = %exchange.request.uri, "No stage handled request");
        let out = &mut exchange.output;
        out.head_mut().status = StatusCode::NotFound;
        out.head_mut().add_header("Content-Type", "text/plain");
        out.write_str("404 Not Found").await?;
        Ok(())
    }
}

/// Writes the fixed 400 response for a request URI that failed
/// validation. The connection stays usable.
pub async fn reject_invalid_uri(output: &mut OutputBuffer<'_>) {
    let head = output.head_mut();
    head.status = StatusCode::BadRequest;
    head.message = Some("Invalid URI".to_string());
    head.add_header("Content-Type", "text/plain");
    let res = async {
        output.write_str("Invalid URI").await?;
        output.close().await
    }
    .await;
    if let Err(e) = res {
        tracing::debug!(error = %e, "Failed to send rejection");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BodySource, CharsetRegistry, MemorySink, MemorySource};
    use bytes::BytesMut;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Count(Arc<AtomicUsize>, Outcome);

    #[async_trait]
    impl Stage for Count {
        async fn invoke(&self, _exchange: &mut Exchange<'_>) -> anyhow::Result<Outcome> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(self.1)
        }
    }

    #[tokio::test]
    async fn stops_at_first_handler() {
        let hits = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::new()
            .stage(Count(hits.clone(), Outcome::Continue))
            .stage(Count(hits.clone(), Outcome::Handled))
            .stage(Count(hits.clone(), Outcome::Handled));

        let charsets = Arc::new(CharsetRegistry::default());
        let mut sink = MemorySink::default();
        let mut ex = Exchange::new(
            RequestContext::default(),
            InputBuffer::new(Box::new(MemorySource::default()), charsets.clone()),
            OutputBuffer::new(Box::new(&mut sink), charsets),
        );
        pipeline.dispatch(&mut ex).await.unwrap();
        ex.finish().await.unwrap();
        drop(ex);

        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(sink.head.unwrap().status, StatusCode::Ok);
    }

    #[tokio::test]
    async fn unhandled_is_not_found() {
        let charsets = Arc::new(CharsetRegistry::default());
        let mut sink = MemorySink::default();
        let mut ex = Exchange::new(
            RequestContext::default(),
            InputBuffer::new(Box::new(MemorySource::default()), charsets.clone()),
            OutputBuffer::new(Box::new(&mut sink), charsets),
        );
        Pipeline::new().dispatch(&mut ex).await.unwrap();
        ex.finish().await.unwrap();
        drop(ex);

        assert_eq!(sink.head.unwrap().status, StatusCode::NotFound);
        assert_eq!(sink.body, b"404 Not Found");
    }

    struct Broken;

    #[async_trait]
    impl BodySource for Broken {
        async fn fill(&mut self, _dst: &mut BytesMut, _max: usize) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "peer gone"))
        }
    }

    #[tokio::test]
    async fn finish_closes_output_when_drain_fails() {
        let charsets = Arc::new(CharsetRegistry::default());
        let mut sink = MemorySink::default();
        let mut ex = Exchange::new(
            RequestContext::default(),
            InputBuffer::new(Box::new(Broken), charsets.clone()),
            OutputBuffer::new(Box::new(&mut sink), charsets),
        );
        ex.output.write_str("partial").await.unwrap();
        let err = ex.finish().await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::ConnectionReset);
        drop(ex);

        assert!(sink.finished);
        assert_eq!(sink.body, b"partial");
        assert_eq!(sink.head.unwrap().content_length, Some(7));
    }
}
