use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use mumble_protocol_2x::control::{msgs, ControlPacket};
use mumble_protocol_2x::voice::{Clientbound, Serverbound};

use crate::error::ClientError;
use crate::mumble::bandwidth;
use crate::mumble::codec::{Codec, CodecAdapter, EncodeRequest, EncodedFrame};
use crate::mumble::config::MumbleConfig;
use crate::mumble::control::{self, DataChannel, VoiceChannel, PROTOCOL_VERSION};
use crate::mumble::events::{
    ClientEvent, Denial, RejectKind, Rejection, ServerVersion, TextMessageEvent,
};
use crate::mumble::ping::{PingDue, PingScheduler, RttEstimate};
use crate::mumble::state::{Channel, ChannelChanges, User, UserChanges, World};
use crate::mumble::voice::{IncomingVoice, OutgoingVoice, VoiceReceiver, VoiceSender};

/// Connection lifecycle. Terminal state is `Disconnected`; a client is not
/// reusable afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnState {
    New,
    Authenticating,
    Connected,
    Disconnected,
}

/// Channel properties to change with [`MumbleClient::edit_channel`]. Unset
/// fields are left untouched by the server.
#[derive(Clone, Debug, Default)]
pub struct ChannelEdit {
    pub name: Option<String>,
    pub parent: Option<u32>,
    pub description: Option<String>,
    pub position: Option<i32>,
    pub max_users: Option<u32>,
    pub temporary: Option<bool>,
    pub links_add: Vec<u32>,
    pub links_remove: Vec<u32>,
}

/// A Mumble client core.
///
/// The embedder owns the transports: it decodes incoming bytes with the
/// wire codec and feeds packets via [`handle_message`](Self::handle_message)
/// and [`handle_voice`](Self::handle_voice), drives timers via
/// [`tick`](Self::tick), and drains [`take_events`](Self::take_events).
/// All state lives in this struct; entities are referenced by id and
/// resolved through its indices.
pub struct MumbleClient {
    config: MumbleConfig,
    codecs: Option<Box<dyn CodecAdapter>>,
    conn_state: ConnState,
    events: Vec<ClientEvent>,
    data: Option<Box<dyn DataChannel>>,
    voice: Option<Box<dyn VoiceChannel>>,
    world: World,
    voice_rx: HashMap<u32, VoiceReceiver>,
    ping: PingScheduler,
    self_session: Option<u32>,
    server_version: Option<ServerVersion>,
    max_bandwidth: Option<u32>,
    welcome_message: Option<String>,
    epoch: Option<Instant>,
    connect_outcome: Option<Result<(), ClientError>>,
}

impl fmt::Debug for MumbleClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MumbleClient")
            .field("conn_state", &self.conn_state)
            .field("self_session", &self.self_session)
            .field("users", &self.world.users().count())
            .field("channels", &self.world.channels().count())
            .finish()
    }
}

impl MumbleClient {
    pub fn new(config: MumbleConfig) -> Result<Self, ClientError> {
        Self::build(config, None)
    }

    /// Builds a client with a codec adapter; without one, voice is dropped
    /// in both directions.
    pub fn with_codecs(
        config: MumbleConfig,
        codecs: Box<dyn CodecAdapter>,
    ) -> Result<Self, ClientError> {
        Self::build(config, Some(codecs))
    }

    fn build(
        config: MumbleConfig,
        codecs: Option<Box<dyn CodecAdapter>>,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        let ping = PingScheduler::new(config.data_ping_interval, config.max_in_flight_data_pings);
        Ok(Self {
            config,
            codecs,
            conn_state: ConnState::New,
            events: Vec::new(),
            data: None,
            voice: None,
            world: World::new(),
            voice_rx: HashMap::new(),
            ping,
            self_session: None,
            server_version: None,
            max_bandwidth: None,
            welcome_message: None,
            epoch: None,
            connect_outcome: None,
        })
    }

    pub fn conn_state(&self) -> ConnState {
        self.conn_state
    }

    /// The model of the server: users, channels, membership, links.
    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn user(&self, session: u32) -> Option<&User> {
        self.world.user(session)
    }

    pub fn channel(&self, channel_id: u32) -> Option<&Channel> {
        self.world.channel(channel_id)
    }

    pub fn self_session(&self) -> Option<u32> {
        self.self_session
    }

    /// This client's own user entry, once the server has announced it.
    pub fn self_user(&self) -> Option<&User> {
        self.world.user(self.self_session?)
    }

    pub fn server_version(&self) -> Option<&ServerVersion> {
        self.server_version.as_ref()
    }

    pub fn max_bandwidth(&self) -> Option<u32> {
        self.max_bandwidth
    }

    pub fn welcome_message(&self) -> Option<&str> {
        self.welcome_message.as_deref()
    }

    pub fn data_rtt(&self) -> &RttEstimate {
        self.ping.data_rtt()
    }

    pub fn voice_rtt(&self) -> &RttEstimate {
        self.ping.voice_rtt()
    }

    pub fn in_flight_pings(&self) -> u32 {
        self.ping.in_flight()
    }

    /// Resolution of the connection attempt: `None` while outstanding,
    /// `Ok` once connected, the rejection or first fatal error otherwise.
    pub fn connect_outcome(&self) -> Option<&Result<(), ClientError>> {
        self.connect_outcome.as_ref()
    }

    /// Drains queued events, oldest first.
    pub fn take_events(&mut self) -> Vec<ClientEvent> {
        std::mem::take(&mut self.events)
    }

    /// Attaches the data channel and starts the handshake. Attaching twice
    /// is a usage error.
    pub fn connect(
        &mut self,
        channel: Box<dyn DataChannel>,
        now: Instant,
    ) -> Result<(), ClientError> {
        if self.conn_state != ConnState::New {
            return Err(ClientError::AlreadyConnected);
        }
        self.data = Some(channel);
        self.epoch = Some(now);
        self.conn_state = ConnState::Authenticating;

        let (major, minor, patch) = PROTOCOL_VERSION;
        let mut version = msgs::Version::new();
        version.version_v1 = Some(control::encode_version_v1(major, minor, patch));
        version.version_v2 = Some(control::encode_version_v2(major, minor, patch));
        version.release = Some(self.config.client_software.clone());
        version.os = Some(self.config.os_name.clone());
        version.os_version = Some(self.config.os_version.clone());

        let mut auth = msgs::Authenticate::new();
        auth.username = Some(self.config.username.clone());
        auth.password = self.config.password.clone();
        auth.tokens = self.config.tokens.clone();
        auth.celt_versions = self
            .codecs
            .as_ref()
            .map(|codecs| codecs.celt_versions())
            .unwrap_or_default();
        auth.opus = Some(self.codecs.as_ref().map_or(false, |codecs| codecs.opus()));

        let result = self
            .send(ControlPacket::Version(Box::new(version)))
            .and_then(|()| self.send(ControlPacket::Authenticate(Box::new(auth))));
        if let Err(error) = result {
            self.fail(error.clone());
            return Err(error);
        }
        Ok(())
    }

    /// Attaches the voice channel. Until then, outgoing voice tunnels
    /// through the data channel.
    pub fn attach_voice(&mut self, channel: Box<dyn VoiceChannel>) {
        self.voice = Some(channel);
    }

    /// Dispatches one control message received on the data channel.
    pub fn handle_message(&mut self, packet: ControlPacket<Clientbound>, now: Instant) {
        if matches!(self.conn_state, ConnState::New | ConnState::Disconnected) {
            return;
        }
        match packet {
            ControlPacket::Version(msg) => self.on_version(*msg),
            ControlPacket::UDPTunnel(voice) => {
                if let Some(packet) = IncomingVoice::from_wire(*voice) {
                    self.handle_voice(packet, now);
                }
            }
            ControlPacket::Ping(msg) => self.on_ping(*msg, now),
            ControlPacket::Reject(msg) => self.on_reject(*msg),
            ControlPacket::ServerSync(msg) => self.on_server_sync(*msg, now),
            ControlPacket::ChannelState(msg) => self.on_channel_state(*msg),
            ControlPacket::ChannelRemove(msg) => self.on_channel_remove(*msg),
            ControlPacket::UserState(msg) => self.on_user_state(*msg),
            ControlPacket::UserRemove(msg) => self.on_user_remove(*msg),
            ControlPacket::TextMessage(msg) => self.on_text_message(*msg),
            ControlPacket::PermissionDenied(msg) => self.on_permission_denied(*msg),
            other => log::debug!("ignoring {} message", other.name()),
        }
    }

    /// Feeds one voice packet received on the voice channel (or tunneled).
    pub fn handle_voice(&mut self, packet: IncomingVoice, now: Instant) {
        if matches!(self.conn_state, ConnState::New | ConnState::Disconnected) {
            return;
        }
        let Some(codec) = Codec::from_id(packet.codec) else {
            self.events.push(ClientEvent::UnknownCodec {
                codec: packet.codec,
            });
            return;
        };
        if self.world.user(packet.source).is_none() {
            log::debug!("dropping voice packet from unknown session {}", packet.source);
            return;
        }
        let receiver = self
            .voice_rx
            .entry(packet.source)
            .or_insert_with(|| VoiceReceiver::new(packet.source));
        receiver.handle_packet(
            &packet,
            codec,
            now,
            self.config.user_voice_timeout,
            self.codecs.as_deref_mut(),
            &mut self.events,
        );
    }

    /// Feeds an echoed voice-channel ping timestamp to the voice RTT
    /// statistic reported in data pings.
    pub fn handle_voice_pong(&mut self, timestamp: u64, now: Instant) {
        let rtt_ms = self.now_ms(now).saturating_sub(timestamp);
        self.ping.record_voice_rtt(rtt_ms as f64);
    }

    /// Clean end-of-stream on the data channel.
    pub fn stream_ended(&mut self) {
        self.disconnect();
    }

    /// A transport-level failure reported by the embedder.
    pub fn handle_transport_error(&mut self, message: impl Into<String>) {
        self.fail(ClientError::Transport(message.into()));
    }

    /// Fires due timers: per-user voice idle timeouts and the ping period.
    pub fn tick(&mut self, now: Instant) {
        if self.conn_state == ConnState::Disconnected {
            return;
        }
        for receiver in self.voice_rx.values_mut() {
            receiver.tick(now, &mut self.events);
        }
        match self.ping.poll(now) {
            PingDue::No => {}
            PingDue::Exceeded => self.fail(ClientError::Timeout),
            PingDue::Send => {
                let mut msg = msgs::Ping::new();
                msg.timestamp = Some(self.now_ms(now));
                let data_rtt = *self.ping.data_rtt();
                if data_rtt.count() > 0 {
                    msg.tcp_packets = Some(data_rtt.count());
                    msg.tcp_ping_avg = Some(data_rtt.mean() as f32);
                    msg.tcp_ping_var = Some(data_rtt.variance() as f32);
                }
                let voice_rtt = *self.ping.voice_rtt();
                if voice_rtt.count() > 0 {
                    msg.udp_packets = Some(voice_rtt.count());
                    msg.udp_ping_avg = Some(voice_rtt.mean() as f32);
                    msg.udp_ping_var = Some(voice_rtt.variance() as f32);
                }
                if let Err(error) = self.send(ControlPacket::Ping(Box::new(msg))) {
                    self.fail(error);
                }
            }
        }
    }

    /// Terminal and idempotent: ends both channels, cancels all timers,
    /// drains active transmissions and emits `Disconnected` exactly once.
    pub fn disconnect(&mut self) {
        if self.conn_state == ConnState::Disconnected {
            return;
        }
        self.conn_state = ConnState::Disconnected;
        self.data = None;
        self.voice = None;
        self.ping.stop();
        for (_, mut receiver) in self.voice_rx.drain() {
            receiver.finish(&mut self.events);
        }
        if self.connect_outcome.is_none() {
            self.connect_outcome = Some(Err(ClientError::ServerClosed));
        }
        self.events.push(ClientEvent::Disconnected);
    }

    // ---- outgoing commands ------------------------------------------------

    /// Mutes or unmutes this client. Unmuting also undeafens, matching the
    /// server's coupling of the two flags.
    pub fn set_self_mute(&mut self, mute: bool) -> Result<(), ClientError> {
        let session = self.self_session_required()?;
        let mut msg = msgs::UserState::new();
        msg.session = Some(session);
        msg.self_mute = Some(mute);
        if !mute {
            msg.self_deaf = Some(false);
        }
        self.send(ControlPacket::UserState(Box::new(msg)))
    }

    /// Deafens or undeafens this client. Deafening also mutes.
    pub fn set_self_deaf(&mut self, deaf: bool) -> Result<(), ClientError> {
        let session = self.self_session_required()?;
        let mut msg = msgs::UserState::new();
        msg.session = Some(session);
        msg.self_deaf = Some(deaf);
        if deaf {
            msg.self_mute = Some(true);
        }
        self.send(ControlPacket::UserState(Box::new(msg)))
    }

    /// Server-enforced mute on another user; unmuting also undeafens.
    pub fn set_user_mute(&mut self, session: u32, mute: bool) -> Result<(), ClientError> {
        self.require_user(session)?;
        let mut msg = msgs::UserState::new();
        msg.session = Some(session);
        msg.mute = Some(mute);
        if !mute {
            msg.deaf = Some(false);
        }
        self.send(ControlPacket::UserState(Box::new(msg)))
    }

    /// Server-enforced deafen on another user; deafening also mutes.
    pub fn set_user_deaf(&mut self, session: u32, deaf: bool) -> Result<(), ClientError> {
        self.require_user(session)?;
        let mut msg = msgs::UserState::new();
        msg.session = Some(session);
        msg.deaf = Some(deaf);
        if deaf {
            msg.mute = Some(true);
        }
        self.send(ControlPacket::UserState(Box::new(msg)))
    }

    /// Asks the server to move this client into a channel. The model is
    /// only updated when the authoritative `UserState` comes back.
    pub fn join_channel(&mut self, channel_id: u32) -> Result<(), ClientError> {
        let session = self.self_session_required()?;
        self.require_channel(channel_id)?;
        let mut msg = msgs::UserState::new();
        msg.session = Some(session);
        msg.channel_id = Some(channel_id);
        self.send(ControlPacket::UserState(Box::new(msg)))
    }

    pub fn move_user(&mut self, session: u32, channel_id: u32) -> Result<(), ClientError> {
        self.require_user(session)?;
        self.require_channel(channel_id)?;
        let mut msg = msgs::UserState::new();
        msg.session = Some(session);
        msg.channel_id = Some(channel_id);
        self.send(ControlPacket::UserState(Box::new(msg)))
    }

    pub fn set_comment(&mut self, comment: impl Into<String>) -> Result<(), ClientError> {
        let session = self.self_session_required()?;
        let mut msg = msgs::UserState::new();
        msg.session = Some(session);
        msg.comment = Some(comment.into());
        self.send(ControlPacket::UserState(Box::new(msg)))
    }

    pub fn set_texture(&mut self, texture: Vec<u8>) -> Result<(), ClientError> {
        let session = self.self_session_required()?;
        let mut msg = msgs::UserState::new();
        msg.session = Some(session);
        msg.texture = Some(texture);
        self.send(ControlPacket::UserState(Box::new(msg)))
    }

    pub fn set_plugin_context(&mut self, context: Vec<u8>) -> Result<(), ClientError> {
        let session = self.self_session_required()?;
        let mut msg = msgs::UserState::new();
        msg.session = Some(session);
        msg.plugin_context = Some(context);
        self.send(ControlPacket::UserState(Box::new(msg)))
    }

    pub fn set_plugin_identity(&mut self, identity: impl Into<String>) -> Result<(), ClientError> {
        let session = self.self_session_required()?;
        let mut msg = msgs::UserState::new();
        msg.session = Some(session);
        msg.plugin_identity = Some(identity.into());
        self.send(ControlPacket::UserState(Box::new(msg)))
    }

    pub fn set_recording(&mut self, recording: bool) -> Result<(), ClientError> {
        let session = self.self_session_required()?;
        let mut msg = msgs::UserState::new();
        msg.session = Some(session);
        msg.recording = Some(recording);
        self.send(ControlPacket::UserState(Box::new(msg)))
    }

    /// Sends a text message to users, channels and/or whole subtrees.
    pub fn send_message(
        &mut self,
        message: impl Into<String>,
        users: &[u32],
        channels: &[u32],
        trees: &[u32],
    ) -> Result<(), ClientError> {
        self.require_connected()?;
        let mut msg = msgs::TextMessage::new();
        msg.message = Some(message.into());
        msg.session = users.to_vec();
        msg.channel_id = channels.to_vec();
        msg.tree_id = trees.to_vec();
        self.send(ControlPacket::TextMessage(Box::new(msg)))
    }

    pub fn kick_user(
        &mut self,
        session: u32,
        reason: Option<String>,
        ban: bool,
    ) -> Result<(), ClientError> {
        self.require_user(session)?;
        let mut msg = msgs::UserRemove::new();
        msg.session = Some(session);
        msg.reason = reason;
        msg.ban = Some(ban);
        self.send(ControlPacket::UserRemove(Box::new(msg)))
    }

    pub fn create_channel(
        &mut self,
        name: impl Into<String>,
        parent: u32,
        temporary: bool,
    ) -> Result<(), ClientError> {
        self.require_connected()?;
        let mut msg = msgs::ChannelState::new();
        msg.name = Some(name.into());
        msg.parent = Some(parent);
        msg.temporary = Some(temporary);
        self.send(ControlPacket::ChannelState(Box::new(msg)))
    }

    pub fn remove_channel(&mut self, channel_id: u32) -> Result<(), ClientError> {
        self.require_channel(channel_id)?;
        let mut msg = msgs::ChannelRemove::new();
        msg.channel_id = Some(channel_id);
        self.send(ControlPacket::ChannelRemove(Box::new(msg)))
    }

    pub fn edit_channel(&mut self, channel_id: u32, edit: ChannelEdit) -> Result<(), ClientError> {
        self.require_channel(channel_id)?;
        let mut msg = msgs::ChannelState::new();
        msg.channel_id = Some(channel_id);
        msg.name = edit.name;
        msg.parent = edit.parent;
        msg.description = edit.description;
        msg.position = edit.position;
        msg.max_users = edit.max_users;
        msg.temporary = edit.temporary;
        msg.links_add = edit.links_add;
        msg.links_remove = edit.links_remove;
        self.send(ControlPacket::ChannelState(Box::new(msg)))
    }

    /// Requests a user's full texture blob. Deduplicated until a new
    /// texture hash arrives.
    pub fn request_user_texture(&mut self, session: u32) -> Result<(), ClientError> {
        self.require_user(session)?;
        if !self.world.mark_texture_requested(session) {
            return Ok(());
        }
        let mut msg = msgs::RequestBlob::new();
        msg.session_texture = vec![session];
        self.send(ControlPacket::RequestBlob(Box::new(msg)))
    }

    /// Requests a user's full comment blob. Deduplicated until a new
    /// comment hash arrives.
    pub fn request_user_comment(&mut self, session: u32) -> Result<(), ClientError> {
        self.require_user(session)?;
        if !self.world.mark_comment_requested(session) {
            return Ok(());
        }
        let mut msg = msgs::RequestBlob::new();
        msg.session_comment = vec![session];
        self.send(ControlPacket::RequestBlob(Box::new(msg)))
    }

    /// Requests a channel's full description blob. Deduplicated until a new
    /// description hash arrives.
    pub fn request_channel_description(&mut self, channel_id: u32) -> Result<(), ClientError> {
        self.require_channel(channel_id)?;
        if !self.world.mark_description_requested(channel_id) {
            return Ok(());
        }
        let mut msg = msgs::RequestBlob::new();
        msg.channel_description = vec![channel_id];
        self.send(ControlPacket::RequestBlob(Box::new(msg)))
    }

    // ---- outgoing voice ---------------------------------------------------

    /// Opens an outgoing transmission towards addressing mode 0..=31
    /// (0 normal, 1..=30 whisper/shout targets, 31 loopback).
    pub fn create_voice_stream(&mut self, mode: u8) -> Result<VoiceSender, ClientError> {
        if mode > 31 {
            return Err(ClientError::Config(
                "voice mode must be in 0..=31".to_string(),
            ));
        }
        let (codec, encoder) = match self.codecs.as_mut() {
            Some(adapter) => {
                let codec = if adapter.opus() {
                    Codec::Opus
                } else {
                    Codec::CeltAlpha
                };
                (codec, Some(adapter.create_encoder_sink(codec)))
            }
            None => (Codec::Opus, None),
        };
        Ok(VoiceSender::new(
            mode,
            codec,
            encoder,
            self.config.samples_per_packet,
        ))
    }

    /// Encodes a PCM chunk and emits the resulting voice packets. Without a
    /// codec adapter this silently discards.
    pub fn write_voice(
        &mut self,
        stream: &mut VoiceSender,
        pcm: &[f32],
        channels: u8,
        position: Option<[f32; 3]>,
    ) -> Result<(), ClientError> {
        if stream.finished {
            return Ok(());
        }
        let bitrate = bandwidth::actual_bitrate(
            self.config.bitrate,
            stream.samples_per_packet,
            position.is_some(),
            self.max_bandwidth,
        );
        let frames = match stream.encoder.as_mut() {
            Some(encoder) => encoder.encode(EncodeRequest {
                pcm,
                channels,
                bitrate: Some(bitrate),
            }),
            None => return Ok(()),
        };
        self.emit_voice(stream, frames, position, false)
    }

    /// Ends the transmission: drains the encoder and emits the final packet
    /// with the end flag set.
    pub fn end_voice(&mut self, stream: &mut VoiceSender) -> Result<(), ClientError> {
        if stream.finished {
            return Ok(());
        }
        stream.finished = true;
        let frames = match stream.encoder.as_mut() {
            Some(encoder) => encoder.finish(),
            None => return Ok(()),
        };
        self.emit_voice(stream, frames, None, true)
    }

    /// Highest admissible bitrate under the negotiated bandwidth cap.
    pub fn max_bitrate(&self, samples_per_packet: u32, has_position: bool) -> Option<u32> {
        self.max_bandwidth
            .map(|cap| bandwidth::max_bitrate(samples_per_packet, has_position, cap))
    }

    /// Bitrate outgoing audio is encoded at right now.
    pub fn actual_bitrate(&self, samples_per_packet: u32, has_position: bool) -> u32 {
        bandwidth::actual_bitrate(
            self.config.bitrate,
            samples_per_packet,
            has_position,
            self.max_bandwidth,
        )
    }

    // ---- internals --------------------------------------------------------

    fn emit_voice(
        &mut self,
        stream: &mut VoiceSender,
        frames: Vec<EncodedFrame>,
        position: Option<[f32; 3]>,
        end: bool,
    ) -> Result<(), ClientError> {
        for frame in frames {
            let advance = u64::from((frame.samples / 480).max(1));
            let packet = OutgoingVoice {
                seq_num: stream.seq_num,
                codec: stream.codec,
                mode: stream.mode,
                frames: vec![frame.data],
                position,
                end: false,
            };
            stream.seq_num += advance;
            self.send_voice(packet)?;
        }
        if end {
            self.send_voice(OutgoingVoice {
                seq_num: stream.seq_num,
                codec: stream.codec,
                mode: stream.mode,
                frames: Vec::new(),
                position: None,
                end: true,
            })?;
        }
        Ok(())
    }

    fn send_voice(&mut self, packet: OutgoingVoice) -> Result<(), ClientError> {
        if let Some(voice) = self.voice.as_mut() {
            return voice.send(packet);
        }
        if let Some(data) = self.data.as_mut() {
            return data.send(ControlPacket::UDPTunnel(Box::new(packet.into_wire())));
        }
        Err(ClientError::NotConnected)
    }

    fn send(&mut self, packet: ControlPacket<Serverbound>) -> Result<(), ClientError> {
        match self.data.as_mut() {
            Some(data) => data.send(packet),
            None => Err(ClientError::NotConnected),
        }
    }

    fn require_connected(&self) -> Result<(), ClientError> {
        if self.conn_state == ConnState::Connected {
            Ok(())
        } else {
            Err(ClientError::NotConnected)
        }
    }

    fn self_session_required(&self) -> Result<u32, ClientError> {
        self.require_connected()?;
        self.self_session
            .ok_or_else(|| ClientError::Protocol("missing self session".to_string()))
    }

    fn require_user(&self, session: u32) -> Result<(), ClientError> {
        self.require_connected()?;
        if self.world.user(session).is_none() {
            return Err(ClientError::Protocol("unknown user".to_string()));
        }
        Ok(())
    }

    fn require_channel(&self, channel_id: u32) -> Result<(), ClientError> {
        self.require_connected()?;
        if self.world.channel(channel_id).is_none() {
            return Err(ClientError::Protocol("unknown channel".to_string()));
        }
        Ok(())
    }

    fn now_ms(&self, now: Instant) -> u64 {
        match self.epoch {
            Some(epoch) => now.saturating_duration_since(epoch).as_millis() as u64,
            None => 0,
        }
    }

    fn violation(&mut self, message: impl Into<String>) {
        self.fail(ClientError::Protocol(message.into()));
    }

    fn fail(&mut self, error: ClientError) {
        if self.connect_outcome.is_none() {
            self.connect_outcome = Some(Err(error.clone()));
        }
        self.events.push(ClientEvent::Error(error));
        self.disconnect();
    }

    fn on_version(&mut self, msg: msgs::Version) {
        let (major, minor, patch) = match (msg.version_v2, msg.version_v1) {
            (Some(v2), _) => control::decode_version_v2(v2),
            (None, Some(v1)) => control::decode_version_v1(v1),
            (None, None) => (0, 0, 0),
        };
        self.server_version = Some(ServerVersion {
            major,
            minor,
            patch,
            release: msg.release,
            os: msg.os,
            os_version: msg.os_version,
        });
    }

    fn on_ping(&mut self, msg: msgs::Ping, now: Instant) {
        let Some(timestamp) = msg.timestamp else {
            log::debug!("ignoring ping reply without timestamp");
            return;
        };
        if self.ping.in_flight() == 0 {
            log::warn!("ignoring ping reply with no ping in flight");
            return;
        }
        let rtt_ms = self.now_ms(now).saturating_sub(timestamp);
        self.ping.record_pong(rtt_ms as f64);
        self.events.push(ClientEvent::DataPing { rtt_ms });
    }

    fn on_reject(&mut self, msg: msgs::Reject) {
        use mumble_protocol_2x::control::msgs::reject::RejectType;
        let kind = msg.type_.map(|value| match value.enum_value() {
            Ok(RejectType::None) => RejectKind::None,
            Ok(RejectType::WrongVersion) => RejectKind::WrongVersion,
            Ok(RejectType::InvalidUsername) => RejectKind::InvalidUsername,
            Ok(RejectType::WrongUserPW) => RejectKind::WrongUserPassword,
            Ok(RejectType::WrongServerPW) => RejectKind::WrongServerPassword,
            Ok(RejectType::UsernameInUse) => RejectKind::UsernameInUse,
            Ok(RejectType::ServerFull) => RejectKind::ServerFull,
            Ok(RejectType::NoCertificate) => RejectKind::NoCertificate,
            Ok(RejectType::AuthenticatorFail) => RejectKind::AuthenticatorFail,
            Err(raw) => RejectKind::Other(raw),
        });
        let rejection = Rejection {
            kind,
            reason: msg.reason,
        };
        if self.connect_outcome.is_none() {
            self.connect_outcome = Some(Err(ClientError::Rejected(rejection.clone())));
        }
        self.events.push(ClientEvent::Rejected(rejection));
        self.disconnect();
    }

    fn on_server_sync(&mut self, msg: msgs::ServerSync, now: Instant) {
        self.self_session = msg.session;
        self.max_bandwidth = msg.max_bandwidth;
        self.welcome_message = msg.welcome_text;
        if self.conn_state == ConnState::Authenticating {
            self.ping.start(now);
            self.conn_state = ConnState::Connected;
            if self.connect_outcome.is_none() {
                self.connect_outcome = Some(Ok(()));
            }
            self.events.push(ClientEvent::Connected);
        }
    }

    fn on_channel_state(&mut self, msg: msgs::ChannelState) {
        let Some(channel_id) = msg.channel_id else {
            self.violation("channel state without channel id");
            return;
        };
        let changes = ChannelChanges {
            name: msg.name,
            description: msg.description,
            description_hash: msg.description_hash,
            temporary: msg.temporary,
            position: msg.position,
            max_users: msg.max_users,
            parent: msg.parent,
            links: if msg.links.is_empty() {
                None
            } else {
                Some(msg.links)
            },
            links_add: msg.links_add,
            links_remove: msg.links_remove,
        };
        let is_new = self.world.channel(channel_id).is_none();
        self.world.apply_channel(channel_id, &changes);
        if is_new {
            self.events.push(ClientEvent::NewChannel { channel_id });
        }
        self.events.push(ClientEvent::ChannelUpdate {
            channel_id,
            changes,
        });
    }

    fn on_channel_remove(&mut self, msg: msgs::ChannelRemove) {
        let Some(channel_id) = msg.channel_id else {
            self.violation("channel remove without channel id");
            return;
        };
        if self.world.remove_channel(channel_id) {
            self.events.push(ClientEvent::ChannelRemoved { channel_id });
        } else {
            log::debug!("ignoring removal of unknown channel {channel_id}");
        }
    }

    fn on_user_state(&mut self, msg: msgs::UserState) {
        let Some(session) = msg.session else {
            self.violation("user state without session");
            return;
        };
        let actor = msg.actor.filter(|actor| self.world.user(*actor).is_some());
        let mut changes = UserChanges {
            username: msg.name,
            unique_id: msg.user_id,
            mute: msg.mute,
            deaf: msg.deaf,
            suppress: msg.suppress,
            self_mute: msg.self_mute,
            self_deaf: msg.self_deaf,
            texture: msg.texture,
            texture_hash: msg.texture_hash,
            comment: msg.comment,
            comment_hash: msg.comment_hash,
            cert_hash: msg.hash,
            priority_speaker: msg.priority_speaker,
            recording: msg.recording,
            channel_id: msg.channel_id,
        };
        let is_new = self.world.user(session).is_none();
        if is_new && changes.channel_id.is_none() {
            // The server omits channel_id for users in the root channel.
            changes.channel_id = Some(0);
        }
        self.world.apply_user(session, &changes);
        if is_new {
            self.events.push(ClientEvent::NewUser { session });
        }
        self.events.push(ClientEvent::UserUpdate {
            session,
            actor,
            changes,
        });
    }

    fn on_user_remove(&mut self, msg: msgs::UserRemove) {
        let Some(session) = msg.session else {
            self.violation("user remove without session");
            return;
        };
        let actor = msg.actor.filter(|actor| self.world.user(*actor).is_some());
        if let Some(mut receiver) = self.voice_rx.remove(&session) {
            receiver.finish(&mut self.events);
        }
        if self.world.remove_user(session) {
            self.events.push(ClientEvent::UserRemoved {
                session,
                actor,
                reason: msg.reason,
                ban: msg.ban.unwrap_or(false),
            });
        } else {
            log::debug!("ignoring removal of unknown session {session}");
        }
    }

    fn on_text_message(&mut self, msg: msgs::TextMessage) {
        let sender = msg.actor.filter(|actor| self.world.user(*actor).is_some());
        let users = msg
            .session
            .iter()
            .copied()
            .filter(|session| self.world.user(*session).is_some())
            .collect();
        let channels = msg
            .channel_id
            .iter()
            .copied()
            .filter(|id| self.world.channel(*id).is_some())
            .collect();
        let trees = msg
            .tree_id
            .iter()
            .copied()
            .filter(|id| self.world.channel(*id).is_some())
            .collect();
        self.events.push(ClientEvent::Message(TextMessageEvent {
            sender,
            message: msg.message.unwrap_or_default(),
            users,
            channels,
            trees,
        }));
    }

    fn on_permission_denied(&mut self, msg: msgs::PermissionDenied) {
        use mumble_protocol_2x::control::msgs::permission_denied::DenyType;
        let kind = match msg.type_.map(|value| value.enum_value()) {
            Some(Ok(kind)) => kind,
            Some(Err(raw)) => {
                self.violation(format!("unknown permission denied kind {raw}"));
                return;
            }
            None => {
                self.violation("permission denied without kind");
                return;
            }
        };
        let session = msg.session.filter(|s| self.world.user(*s).is_some());
        let denial = match kind {
            DenyType::Text => Denial::Text { reason: msg.reason },
            DenyType::Permission => Denial::Permission {
                session,
                channel_id: msg.channel_id.filter(|id| self.world.channel(*id).is_some()),
                permission: msg.permission,
            },
            DenyType::SuperUser => Denial::SuperUser,
            DenyType::ChannelName => Denial::ChannelName { name: msg.name },
            DenyType::TextTooLong => Denial::TextTooLong,
            DenyType::TemporaryChannel => Denial::TemporaryChannel,
            DenyType::MissingCertificate => Denial::MissingCertificate { session },
            DenyType::UserName => Denial::UserName { name: msg.name },
            DenyType::ChannelFull => Denial::ChannelFull,
            DenyType::NestingLimit => Denial::NestingLimit,
            other => {
                self.violation(format!("unsupported permission denied kind {other:?}"));
                return;
            }
        };
        self.events.push(ClientEvent::Denied(denial));
    }
}
