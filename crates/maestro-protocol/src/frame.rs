// Copyright (C) 2026 Maestro Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire format for QUIC stream framing.
//!
//! Each QUIC stream carries one call with the following frame format:
//! - 4 bytes: payload length (big-endian)
//! - 2 bytes: message type
//! - N bytes: protobuf payload
//!
//! Unary calls are a Request frame answered by a Response (or Error)
//! frame. Streaming responses (history fetch, the work-item feed) are a
//! StreamStart frame, any number of StreamData frames, then StreamEnd.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::Message;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::worker_proto::RpcError;

/// Maximum frame size (16 MB). Histories larger than this are delivered
/// as StreamData chunks, never as one frame.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Frame header size (4 bytes length + 2 bytes type)
pub const HEADER_SIZE: usize = 6;

/// Message types for the wire protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MessageType {
    /// Unary request
    Request = 1,
    /// Unary response
    Response = 2,
    /// Start of a streaming response
    StreamStart = 3,
    /// Data chunk in a streaming response
    StreamData = 4,
    /// End of a streaming response
    StreamEnd = 5,
    /// Error response (payload is an `RpcError`)
    Error = 6,
}

impl TryFrom<u16> for MessageType {
    type Error = FrameError;

    fn try_from(value: u16) -> Result<Self, <Self as TryFrom<u16>>::Error> {
        match value {
            1 => Ok(MessageType::Request),
            2 => Ok(MessageType::Response),
            3 => Ok(MessageType::StreamStart),
            4 => Ok(MessageType::StreamData),
            5 => Ok(MessageType::StreamEnd),
            6 => Ok(MessageType::Error),
            _ => Err(FrameError::InvalidMessageType(value)),
        }
    }
}

/// Errors that can occur during frame encoding/decoding
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),

    #[error("invalid message type: {0}")]
    InvalidMessageType(u16),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("server error [{code}]: {message}")]
    Remote { code: String, message: String },

    #[error("unexpected message type: {0:?}")]
    UnexpectedMessageType(MessageType),

    #[error("connection closed")]
    ConnectionClosed,
}

/// A framed message with type and payload
#[derive(Debug, Clone)]
pub struct Frame {
    pub message_type: MessageType,
    pub payload: Bytes,
}

impl Frame {
    /// Create a new request frame
    pub fn request<M: Message>(msg: &M) -> Result<Self, FrameError> {
        Self::new(MessageType::Request, msg)
    }

    /// Create a new response frame
    pub fn response<M: Message>(msg: &M) -> Result<Self, FrameError> {
        Self::new(MessageType::Response, msg)
    }

    /// Create a new error frame
    pub fn error(err: &RpcError) -> Result<Self, FrameError> {
        Self::new(MessageType::Error, err)
    }

    /// Create a new stream data frame
    pub fn stream_data<M: Message>(msg: &M) -> Result<Self, FrameError> {
        Self::new(MessageType::StreamData, msg)
    }

    /// Create an empty stream start marker
    pub fn stream_start() -> Self {
        Self {
            message_type: MessageType::StreamStart,
            payload: Bytes::new(),
        }
    }

    /// Create an empty stream end marker
    pub fn stream_end() -> Self {
        Self {
            message_type: MessageType::StreamEnd,
            payload: Bytes::new(),
        }
    }

    /// Create a new frame with the given type and message
    pub fn new<M: Message>(message_type: MessageType, msg: &M) -> Result<Self, FrameError> {
        let payload = msg.encode_to_vec();
        if payload.len() > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge(payload.len()));
        }
        Ok(Self {
            message_type,
            payload: Bytes::from(payload),
        })
    }

    /// Decode the payload as a protobuf message
    pub fn decode<M: Message + Default>(&self) -> Result<M, FrameError> {
        Ok(M::decode(self.payload.clone())?)
    }

    /// For an Error frame, decode the payload into `FrameError::Remote`.
    pub fn into_remote_error(&self) -> FrameError {
        match self.decode::<RpcError>() {
            Ok(err) => FrameError::Remote {
                code: err.code,
                message: err.message,
            },
            Err(e) => e,
        }
    }

    /// Encode the frame to bytes for wire transmission
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        buf.put_u32(self.payload.len() as u32);
        buf.put_u16(self.message_type as u16);
        buf.put(self.payload.clone());
        buf.freeze()
    }

    /// Decode a frame from bytes
    pub fn decode_from_bytes(mut bytes: Bytes) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FrameError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "incomplete frame header",
            )));
        }

        let length = bytes.get_u32() as usize;
        let message_type = MessageType::try_from(bytes.get_u16())?;

        if length > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge(length));
        }

        if bytes.len() < length {
            return Err(FrameError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "incomplete frame payload",
            )));
        }

        let payload = bytes.split_to(length);
        Ok(Self {
            message_type,
            payload,
        })
    }
}

/// Write a frame to an async writer
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &Frame,
) -> Result<(), FrameError> {
    let encoded = frame.encode();
    writer.write_all(&encoded).await?;
    Ok(())
}

/// Read a frame from an async reader
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame, FrameError> {
    let mut header = [0u8; HEADER_SIZE];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(FrameError::ConnectionClosed);
        }
        Err(e) => return Err(e.into()),
    }

    let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let message_type = MessageType::try_from(u16::from_be_bytes([header[4], header[5]]))?;

    if length > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge(length));
    }

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;

    Ok(Frame {
        message_type,
        payload: Bytes::from(payload),
    })
}

/// Framed codec for encoding/decoding frames on a stream
pub struct FramedStream<S> {
    stream: S,
}

impl<S> FramedStream<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: AsyncRead + Unpin> FramedStream<S> {
    /// Read the next frame from the stream
    pub async fn read_frame(&mut self) -> Result<Frame, FrameError> {
        read_frame(&mut self.stream).await
    }

    /// Read the next StreamData message from a streaming response.
    ///
    /// Returns `None` on StreamEnd. StreamStart markers are skipped.
    pub async fn read_stream_message<M: Message + Default>(
        &mut self,
    ) -> Result<Option<M>, FrameError> {
        loop {
            let frame = self.read_frame().await?;
            match frame.message_type {
                MessageType::StreamStart => continue,
                MessageType::StreamData => return Ok(Some(frame.decode()?)),
                MessageType::StreamEnd => return Ok(None),
                MessageType::Error => return Err(frame.into_remote_error()),
                other => return Err(FrameError::UnexpectedMessageType(other)),
            }
        }
    }
}

impl<S: AsyncWrite + Unpin> FramedStream<S> {
    /// Write a frame to the stream
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), FrameError> {
        write_frame(&mut self.stream, frame).await
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> FramedStream<S> {
    /// Send a request and wait for a unary response
    pub async fn request<Req: Message, Resp: Message + Default>(
        &mut self,
        request: &Req,
    ) -> Result<Resp, FrameError> {
        let frame = Frame::request(request)?;
        self.write_frame(&frame).await?;

        let response_frame = self.read_frame().await?;
        match response_frame.message_type {
            MessageType::Response => response_frame.decode(),
            MessageType::Error => Err(response_frame.into_remote_error()),
            other => Err(FrameError::UnexpectedMessageType(other)),
        }
    }

    /// Send a response
    pub async fn respond<Resp: Message>(&mut self, response: &Resp) -> Result<(), FrameError> {
        let frame = Frame::response(response)?;
        self.write_frame(&frame).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker_proto::{HistoryChunk, ProbeRequest, ProbeResponse};

    #[test]
    fn message_type_round_trip() {
        for &mt in &[
            MessageType::Request,
            MessageType::Response,
            MessageType::StreamStart,
            MessageType::StreamData,
            MessageType::StreamEnd,
            MessageType::Error,
        ] {
            assert_eq!(MessageType::try_from(mt as u16).unwrap(), mt);
        }
        assert!(MessageType::try_from(0u16).is_err());
        assert!(MessageType::try_from(7u16).is_err());
    }

    #[test]
    fn frame_encode_decode() {
        let frame = Frame::request(&ProbeRequest {}).unwrap();
        let encoded = frame.encode();

        // 4 bytes length + 2 bytes type, big-endian
        let length = u32::from_be_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]) as usize;
        assert_eq!(length, frame.payload.len());
        assert_eq!(
            u16::from_be_bytes([encoded[4], encoded[5]]),
            MessageType::Request as u16
        );

        let decoded = Frame::decode_from_bytes(encoded).unwrap();
        assert_eq!(frame.message_type, decoded.message_type);
        assert_eq!(frame.payload, decoded.payload);
    }

    #[test]
    fn decode_rejects_oversized_length() {
        let mut bytes = BytesMut::new();
        bytes.put_u32((MAX_FRAME_SIZE + 1) as u32);
        bytes.put_u16(1);
        match Frame::decode_from_bytes(bytes.freeze()) {
            Err(FrameError::FrameTooLarge(size)) => assert_eq!(size, MAX_FRAME_SIZE + 1),
            other => panic!("expected FrameTooLarge, got {other:?}"),
        }
    }

    #[test]
    fn decode_rejects_truncated_payload() {
        let mut bytes = BytesMut::new();
        bytes.put_u32(100);
        bytes.put_u16(1);
        bytes.put(&[0u8; 10][..]);
        assert!(matches!(
            Frame::decode_from_bytes(bytes.freeze()),
            Err(FrameError::Io(_))
        ));
    }

    #[test]
    fn error_frame_decodes_to_remote_error() {
        let frame = Frame::error(&RpcError {
            code: "UNAVAILABLE".to_string(),
            message: "draining".to_string(),
        })
        .unwrap();
        match frame.into_remote_error() {
            FrameError::Remote { code, message } => {
                assert_eq!(code, "UNAVAILABLE");
                assert_eq!(message, "draining");
            }
            other => panic!("expected Remote, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn read_write_frame() {
        use tokio::io::duplex;

        let frame = Frame::request(&ProbeRequest {}).unwrap();
        let (mut writer, mut reader) = duplex(1024);

        write_frame(&mut writer, &frame).await.unwrap();
        let read = read_frame(&mut reader).await.unwrap();
        assert_eq!(frame.message_type, read.message_type);
        assert_eq!(frame.payload, read.payload);
    }

    #[tokio::test]
    async fn read_frame_reports_connection_closed_on_eof() {
        use tokio::io::duplex;

        let (_, mut reader) = duplex(1024);
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn framed_request_response() {
        use tokio::io::duplex;

        let (client_side, server_side) = duplex(4096);
        let mut client = FramedStream::new(client_side);
        let mut server = FramedStream::new(server_side);

        let server_task = tokio::spawn(async move {
            let frame = server.read_frame().await.unwrap();
            assert_eq!(frame.message_type, MessageType::Request);
            server.respond(&ProbeResponse {}).await.unwrap();
        });

        let _resp: ProbeResponse = client.request(&ProbeRequest {}).await.unwrap();
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn stream_message_sequence() {
        use tokio::io::duplex;

        let (writer_side, reader_side) = duplex(4096);
        let mut writer = FramedStream::new(writer_side);
        let mut reader = FramedStream::new(reader_side);

        writer.write_frame(&Frame::stream_start()).await.unwrap();
        writer
            .write_frame(&Frame::stream_data(&HistoryChunk { events: vec![] }).unwrap())
            .await
            .unwrap();
        writer.write_frame(&Frame::stream_end()).await.unwrap();

        let first: Option<HistoryChunk> = reader.read_stream_message().await.unwrap();
        assert!(first.is_some());
        let second: Option<HistoryChunk> = reader.read_stream_message().await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn stream_error_frame_surfaces_remote_error() {
        use tokio::io::duplex;

        let (writer_side, reader_side) = duplex(4096);
        let mut writer = FramedStream::new(writer_side);
        let mut reader = FramedStream::new(reader_side);

        writer
            .write_frame(
                &Frame::error(&RpcError {
                    code: "INTERNAL".to_string(),
                    message: "boom".to_string(),
                })
                .unwrap(),
            )
            .await
            .unwrap();

        let result: Result<Option<HistoryChunk>, _> = reader.read_stream_message().await;
        assert!(matches!(result, Err(FrameError::Remote { .. })));
    }
}
