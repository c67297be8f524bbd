use super::{Call, status_code};
use http_body::{Body, Frame, SizeHint};
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tonic::Code;

pin_project! {
    /// Response body that settles its call when the stream ends.
    ///
    /// The status is read from the trailers frame, falling back to the one
    /// seen in the response headers. A body error or an end without any
    /// status counts as `Unknown`; dropping the body early counts as
    /// `Cancelled`.
    pub struct InstrumentedBody<B> {
        #[pin]
        inner: B,
        call: Option<Call>,
    }
}

impl<B> InstrumentedBody<B> {
    pub(crate) fn new(inner: B, call: Option<Call>) -> Self {
        Self { inner, call }
    }
}

impl<B: Body> Body for InstrumentedBody<B> {
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        let frame = ready!(this.inner.poll_frame(cx));

        let settled = match &frame {
            Some(Ok(frame)) => frame.trailers_ref().map(|trailers| {
                status_code(trailers)
                    .or_else(|| this.call.as_ref().and_then(Call::header_code))
                    .unwrap_or(Code::Unknown)
            }),
            Some(Err(_)) => Some(Code::Unknown),
            None => Some(
                this.call
                    .as_ref()
                    .and_then(Call::header_code)
                    .unwrap_or(Code::Unknown),
            ),
        };

        if let Some(code) = settled {
            if let Some(mut call) = this.call.take() {
                call.finish(code);
            }
        }

        Poll::Ready(frame)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
