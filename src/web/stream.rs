use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{
        header::{CACHE_CONTROL, CONTENT_TYPE, PRAGMA},
        HeaderName, HeaderValue,
    },
    response::Response,
};
use bytes::{BufMut, Bytes, BytesMut};
use futures::stream::unfold;

use super::AppState;
use crate::error::Result;
use crate::frame_buffer::{FrameBuffer, FrameSubscriber};

const BUF_CAPACITY: usize = 1920 * 1080 / 4;

/// One connected viewer; logs when the connection goes away.
struct StreamClient {
    peer: SocketAddr,
    subscriber: FrameSubscriber,
    frames: Arc<FrameBuffer>,
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        tracing::warn!(
            peer = %self.peer,
            // own subscriber is not released until after this runs
            clients = self.frames.subscriber_count().saturating_sub(1),
            "Removed streaming client"
        );
    }
}

pub(super) async fn mjpeg_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Result<Response> {
    let camera = state.camera.clone();
    tokio::task::spawn_blocking(move || camera.ensure_streaming()).await??;

    let frames = Arc::clone(state.camera.frames());
    let subscriber = frames.subscribe();
    tracing::info!(
        peer = %peer,
        clients = frames.subscriber_count(),
        "Streaming client connected"
    );
    let client = StreamClient {
        peer,
        subscriber,
        frames,
    };

    let body_stream = unfold(
        (client, BytesMut::with_capacity(BUF_CAPACITY)),
        |(mut client, mut buf)| async move {
            let jpeg = client.subscriber.wait_for_frame().await?;
            let chunk = build_chunk(&jpeg, &mut buf);
            Some((Ok::<_, std::io::Error>(chunk), (client, buf)))
        },
    );

    let mut response = Response::new(Body::from_stream(body_stream));
    let headers = response.headers_mut();
    headers.insert(HeaderName::from_static("age"), HeaderValue::from_static("0"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache, private"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("multipart/x-mixed-replace; boundary=FRAME"),
    );
    Ok(response)
}

/// One multipart part: boundary, part headers, JPEG, trailing CRLF.
pub fn build_chunk(jpeg: &Bytes, buf: &mut BytesMut) -> Bytes {
    buf.clear();
    buf.put_slice(
        format!(
            "--FRAME\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
            jpeg.len()
        )
        .as_bytes(),
    );
    buf.put_slice(jpeg);
    buf.put_slice(b"\r\n");
    buf.split().freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_layout() {
        let jpeg = Bytes::from_static(&[0xFF, 0xD8, 0x01, 0xFF, 0xD9]);
        let mut buf = BytesMut::new();
        let chunk = build_chunk(&jpeg, &mut buf);

        let mut expected =
            b"--FRAME\r\nContent-Type: image/jpeg\r\nContent-Length: 5\r\n\r\n".to_vec();
        expected.extend_from_slice(&jpeg);
        expected.extend_from_slice(b"\r\n");
        assert_eq!(chunk.as_ref(), expected.as_slice());
        assert!(buf.is_empty());
    }
}
