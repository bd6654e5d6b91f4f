//! Response body tee
//!
//! Every frame read from the origin is passed to the caller unchanged while a
//! copy of its data is accumulated for the capture record. The record is
//! finalized exactly once: when the stream ends, fails, or is dropped.

use crate::capture::{ExchangeRecorder, HeaderFields, ResponseParts};
use crate::records::SharedRecordLog;
use bytes::{Bytes, BytesMut};
use hyper::body::{Body, Frame, SizeHint};
use std::fmt::Display;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Pending capture of a response that is still streaming
pub struct CaptureTap {
    recorder: ExchangeRecorder,
    status: u16,
    headers: HeaderFields,
    log: SharedRecordLog,
}

impl CaptureTap {
    pub fn new(
        recorder: ExchangeRecorder,
        status: u16,
        headers: HeaderFields,
        log: SharedRecordLog,
    ) -> Self {
        Self {
            recorder,
            status,
            headers,
            log,
        }
    }

    fn finish(self, body: Bytes, failure: Option<String>) {
        let record = match failure {
            None => self
                .recorder
                .complete_success(ResponseParts::new(self.status, self.headers, body)),
            Some(message) => self.recorder.complete_error(message),
        };

        tracing::debug!(
            id = %record.id,
            method = %record.request.method,
            url = %record.request.url,
            status = ?record.status(),
            error = ?record.error,
            duration_ms = %record.timing.total,
            "Exchange finalized"
        );

        self.log.publish(record);
    }
}

/// Body wrapper that copies data frames into a [`CaptureTap`]
pub struct TeeBody<B: Body> {
    inner: Pin<Box<B>>,
    captured: BytesMut,
    tap: Option<CaptureTap>,
}

impl<B> TeeBody<B>
where
    B: Body<Data = Bytes>,
{
    pub fn new(inner: B, tap: CaptureTap) -> Self {
        Self {
            inner: Box::pin(inner),
            captured: BytesMut::new(),
            tap: Some(tap),
        }
    }

    fn finish(&mut self, failure: Option<String>) {
        if let Some(tap) = self.tap.take() {
            let body = std::mem::take(&mut self.captured).freeze();
            tap.finish(body, failure);
        }
    }
}

impl<B> Body for TeeBody<B>
where
    B: Body<Data = Bytes>,
    B::Error: Display,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        match this.inner.as_mut().poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.captured.extend_from_slice(data);
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(err))) => {
                this.finish(Some(format!("response stream failed: {}", err)));
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.finish(None);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl<B: Body> Drop for TeeBody<B> {
    fn drop(&mut self) {
        let Some(tap) = self.tap.take() else {
            return;
        };
        let body = std::mem::take(&mut self.captured).freeze();
        if self.inner.is_end_stream() {
            tap.finish(body, None);
        } else {
            tap.finish(
                body,
                Some("client disconnected before the response completed".to_string()),
            );
        }
    }
}
