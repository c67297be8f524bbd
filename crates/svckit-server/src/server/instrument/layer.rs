use super::{Call, InstrumentedBody, Instrumentor, status_code};
use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tonic::Code;
use tower::{Layer, Service};

/// [`Layer`] that records call metrics around a gRPC router.
#[derive(Clone)]
pub struct InstrumentLayer {
    instrumentor: Instrumentor,
}

impl InstrumentLayer {
    pub fn new(instrumentor: Instrumentor) -> Self {
        Self { instrumentor }
    }
}

impl<S> Layer<S> for InstrumentLayer {
    type Service = InstrumentService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        InstrumentService {
            inner,
            instrumentor: self.instrumentor.clone(),
        }
    }
}

/// Service produced by [`InstrumentLayer`].
#[derive(Clone)]
pub struct InstrumentService<S> {
    inner: S,
    instrumentor: Instrumentor,
}

impl<S, B, ResBody> Service<http::Request<B>> for InstrumentService<S>
where
    S: Service<http::Request<B>, Response = http::Response<ResBody>>,
{
    type Response = http::Response<InstrumentedBody<ResBody>>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        let call = self.instrumentor.begin(req.uri().path());
        ResponseFuture {
            inner: self.inner.call(req),
            call: Some(call),
        }
    }
}

pin_project! {
    /// Response future of [`InstrumentService`].
    ///
    /// Hands the call over to the response body, which settles it once the
    /// final status is known.
    pub struct ResponseFuture<F> {
        #[pin]
        inner: F,
        call: Option<Call>,
    }
}

impl<F, ResBody, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<http::Response<ResBody>, E>>,
{
    type Output = Result<http::Response<InstrumentedBody<ResBody>>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let result = ready!(this.inner.poll(cx));
        let mut call = this.call.take();

        match result {
            Ok(response) => {
                if let Some(call) = call.as_mut() {
                    call.set_header_code(status_code(response.headers()));
                }
                Poll::Ready(Ok(response.map(|body| InstrumentedBody::new(body, call))))
            }
            Err(e) => {
                if let Some(mut call) = call {
                    call.finish(Code::Unknown);
                }
                Poll::Ready(Err(e))
            }
        }
    }
}
