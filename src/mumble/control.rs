use bytes::BytesMut;
use mumble_protocol_2x::control::{ClientControlCodec, ControlPacket};
use mumble_protocol_2x::voice::{Clientbound, Serverbound};
#[cfg(feature = "tls")]
use openssl::ssl::{SslConnector, SslMethod};
#[cfg(feature = "tls")]
use std::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ClientError;
use crate::mumble::voice::OutgoingVoice;

/// Protocol version this client speaks.
pub const PROTOCOL_VERSION: (u16, u16, u16) = (1, 2, 4);

/// Write half of the reliable control stream, supplied by the caller. The
/// wire codec behind it is the implementation's concern.
pub trait DataChannel {
    fn send(&mut self, packet: ControlPacket<Serverbound>) -> Result<(), ClientError>;
}

/// Write half of the unreliable voice stream. When none is attached,
/// outgoing voice tunnels through the data channel as `UDPTunnel`.
pub trait VoiceChannel {
    fn send(&mut self, packet: OutgoingVoice) -> Result<(), ClientError>;
}

/// [`DataChannel`] over any blocking byte stream, framing packets with the
/// client control codec.
pub struct BlockingControlTransport<S> {
    stream: S,
    codec: ClientControlCodec,
    read_buf: BytesMut,
}

impl<S> BlockingControlTransport<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            codec: ClientControlCodec::new(),
            read_buf: BytesMut::with_capacity(4096),
        }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: std::io::Read + std::io::Write> BlockingControlTransport<S> {
    /// Reads the next control packet, or `None` on a clean end of stream.
    pub fn recv(&mut self) -> Result<Option<ControlPacket<Clientbound>>, ClientError> {
        loop {
            if let Some(packet) = self.codec.decode(&mut self.read_buf)? {
                return Ok(Some(packet));
            }

            let mut buffer = [0u8; 4096];
            let bytes_read = self.stream.read(&mut buffer)?;
            if bytes_read == 0 {
                return Ok(None);
            }
            self.read_buf.extend_from_slice(&buffer[..bytes_read]);
        }
    }
}

impl<S: std::io::Read + std::io::Write> DataChannel for BlockingControlTransport<S> {
    fn send(&mut self, packet: ControlPacket<Serverbound>) -> Result<(), ClientError> {
        let mut out = BytesMut::with_capacity(512);
        self.codec.encode(packet, &mut out)?;
        self.stream.write_all(&out)?;
        Ok(())
    }
}

#[cfg(feature = "tls")]
pub fn tls_connect(
    host: &str,
    port: u16,
) -> Result<openssl::ssl::SslStream<TcpStream>, ClientError> {
    let tcp = TcpStream::connect((host, port))?;
    let builder = SslConnector::builder(SslMethod::tls())
        .map_err(|err| ClientError::Transport(format!("tls connector init failed: {err}")))?;
    let connector = builder.build();
    connector
        .connect(host, tcp)
        .map_err(|err| ClientError::Transport(format!("tls handshake failed: {err}")))
}

/// Packs a version triple into the legacy 16/8/8 u32.
pub(crate) fn encode_version_v1(major: u16, minor: u16, patch: u16) -> u32 {
    (u32::from(major) << 16) | (u32::from(minor & 0xff) << 8) | u32::from(patch & 0xff)
}

pub(crate) fn decode_version_v1(version: u32) -> (u16, u16, u16) {
    (
        (version >> 16) as u16,
        ((version >> 8) & 0xff) as u16,
        (version & 0xff) as u16,
    )
}

/// Packs a version triple into the 16/16/16 u64 format that survives patch
/// levels above 255.
pub(crate) fn encode_version_v2(major: u16, minor: u16, patch: u16) -> u64 {
    (u64::from(major) << 32) | (u64::from(minor) << 16) | u64::from(patch)
}

pub(crate) fn decode_version_v2(version: u64) -> (u16, u16, u16) {
    (
        ((version >> 32) & 0xffff) as u16,
        ((version >> 16) & 0xffff) as u16,
        (version & 0xffff) as u16,
    )
}
