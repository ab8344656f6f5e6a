//! UDP command channel pinned to one remote engine.

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket as StdUdpSocket};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

use crate::codec;
use crate::endpoint::Endpoint;
use crate::error::{VbanError, VbanResult};
use crate::events::{TelemetryEvent, TelemetryHub};
use crate::sequencer::CommandSink;
use crate::subscriber::{RESUBSCRIBE_INTERVAL, TelemetrySubscriber};
use crate::telemetry::TelemetryState;

/// Tunables for a [`CommandChannel`].
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// Interval between RT-packet registrations
    pub resubscribe_interval: Duration,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self { resubscribe_interval: RESUBSCRIBE_INTERVAL }
    }
}

struct SendState {
    socket: Option<StdUdpSocket>,
    frame_counter: u32,
}

/// Fire-and-forget command channel to a VBAN engine.
///
/// The socket is bound to an ephemeral local port and connected to the
/// remote endpoint, so the OS drops datagrams from any other peer. Commands
/// are written synchronously without blocking; telemetry runs on background
/// tasks between [`start`](Self::start) and [`stop`](Self::stop).
pub struct CommandChannel {
    endpoint: Endpoint,
    local_addr: SocketAddr,
    options: ChannelOptions,
    send: Mutex<SendState>,
    subscriber: Mutex<Option<TelemetrySubscriber>>,
    hub: Arc<TelemetryHub>,
}

impl CommandChannel {
    /// Open a channel from settings values.
    ///
    /// # Errors
    /// Returns [`VbanError::InvalidEndpointConfig`] for an unparseable
    /// address, port or stream name, or an IO error if the socket cannot be
    /// set up.
    pub fn open(ip: &str, port: i64, stream_name: &str) -> VbanResult<Self> {
        Self::connect(Endpoint::parse(ip, port, stream_name)?)
    }

    /// Open a channel to `endpoint` with default options.
    ///
    /// # Errors
    /// Returns an IO error if the socket cannot be bound or connected.
    pub fn connect(endpoint: Endpoint) -> VbanResult<Self> {
        Self::connect_with_options(endpoint, ChannelOptions::default())
    }

    /// Open a channel to `endpoint`.
    ///
    /// # Errors
    /// Returns an IO error if the socket cannot be bound or connected.
    pub fn connect_with_options(endpoint: Endpoint, options: ChannelOptions) -> VbanResult<Self> {
        let bind_addr = match endpoint.addr() {
            SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
        };
        let socket = StdUdpSocket::bind(bind_addr)?;
        socket.connect(endpoint.addr())?;
        socket.set_nonblocking(true)?;
        let local_addr = socket.local_addr()?;

        info!(%endpoint, %local_addr, "Command channel opened");

        Ok(Self {
            endpoint,
            local_addr,
            options,
            send: Mutex::new(SendState { socket: Some(socket), frame_counter: 0 }),
            subscriber: Mutex::new(None),
            hub: Arc::new(TelemetryHub::new()),
        })
    }

    /// The remote endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// The local address the socket is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Counter value the next text command will carry.
    #[must_use]
    pub fn frame_counter(&self) -> u32 {
        self.send.lock().frame_counter
    }

    /// Whether the socket has been released.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.send.lock().socket.is_none()
    }

    /// Whether the telemetry tasks are running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.subscriber.lock().as_ref().is_some_and(TelemetrySubscriber::is_running)
    }

    /// Frame and send one text command.
    ///
    /// The frame counter advances only after the datagram was handed to the
    /// OS. Sending on a closed channel is a logged no-op.
    ///
    /// # Errors
    /// Returns an IO error if the OS rejects the datagram. A refusal left
    /// over from an earlier datagram is logged and the send retried once.
    pub fn send_command(&self, text: &str) -> VbanResult<()> {
        let mut state = self.send.lock();
        let Some(socket) = state.socket.as_ref() else {
            debug!(command = %text, "Channel closed, command dropped");
            return Ok(());
        };

        let packet = codec::encode_text(self.endpoint.stream_name(), state.frame_counter, text);
        match socket.send(&packet) {
            // ICMP unreachable for an earlier datagram; reporting it clears it
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                debug!(endpoint = %self.endpoint, "Earlier datagram refused, resending");
                socket.send(&packet)?;
            }
            result => {
                result?;
            }
        }
        trace!(frame = state.frame_counter, command = %text, "Command sent");
        state.frame_counter = state.frame_counter.wrapping_add(1);
        Ok(())
    }

    /// Start the telemetry subscription and receive loops.
    ///
    /// Does nothing if they are already running. Must be called from within
    /// a tokio runtime.
    ///
    /// # Errors
    /// Returns [`VbanError::SocketClosed`] after [`close`](Self::close), or an
    /// IO error if the socket cannot be shared with the runtime.
    pub fn start(&self) -> VbanResult<()> {
        let mut subscriber = self.subscriber.lock();
        if subscriber.as_ref().is_some_and(TelemetrySubscriber::is_running) {
            trace!("Telemetry already running");
            return Ok(());
        }
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(VbanError::Io(std::io::Error::other("telemetry requires a tokio runtime")));
        }

        let socket = {
            let state = self.send.lock();
            let socket = state.socket.as_ref().ok_or(VbanError::SocketClosed)?;
            socket.try_clone()?
        };
        let socket = Arc::new(UdpSocket::from_std(socket)?);

        *subscriber = Some(TelemetrySubscriber::spawn(
            socket,
            self.endpoint.addr(),
            codec::encode_rt_subscription(self.endpoint.stream_name()),
            self.options.resubscribe_interval,
            Arc::clone(&self.hub),
        ));
        info!(endpoint = %self.endpoint, "Telemetry started");
        Ok(())
    }

    /// Stop telemetry and release the socket. Same as [`close`](Self::close).
    pub fn stop(&self) {
        self.close();
    }

    /// Cancel background tasks and release the socket.
    ///
    /// Safe to call any number of times.
    pub fn close(&self) {
        if let Some(subscriber) = self.subscriber.lock().take() {
            subscriber.cancel();
        }
        if self.send.lock().socket.take().is_some() {
            info!(endpoint = %self.endpoint, "Command channel closed");
        }
    }

    /// Close the channel and wait for the background loops to exit.
    pub async fn shutdown(&self) {
        let subscriber = self.subscriber.lock().take();
        if let Some(subscriber) = subscriber {
            subscriber.shutdown().await;
        }
        self.close();
    }

    /// Receive decoded telemetry events.
    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.hub.subscribe()
    }

    /// The most recently decoded engine state.
    #[must_use]
    pub fn latest_state(&self) -> Option<Arc<TelemetryState>> {
        self.hub.latest_state()
    }

    #[cfg(test)]
    pub(crate) fn set_frame_counter(&self, value: u32) {
        self.send.lock().frame_counter = value;
    }
}

impl fmt::Debug for CommandChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandChannel")
            .field("endpoint", &self.endpoint)
            .field("local_addr", &self.local_addr)
            .field("frame_counter", &self.frame_counter())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl CommandSink for CommandChannel {
    fn send_command(&self, text: &str) -> VbanResult<()> {
        CommandChannel::send_command(self, text)
    }
}

impl Drop for CommandChannel {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use assert_matches::assert_matches;
    use tokio::time::timeout;

    use super::*;
    use crate::codec::{HEADER_LEN, Packet};
    use crate::endpoint::StreamName;
    use crate::telemetry::label_slot;

    const WAIT: Duration = Duration::from_secs(2);

    /// A loopback socket standing in for the remote engine.
    async fn fake_engine() -> UdpSocket {
        UdpSocket::bind("127.0.0.1:0").await.expect("bind fake engine")
    }

    fn channel_to(engine: &UdpSocket, options: ChannelOptions) -> CommandChannel {
        let endpoint = Endpoint::new(
            engine.local_addr().expect("engine addr"),
            StreamName::new("Command1").expect("stream name"),
        );
        CommandChannel::connect_with_options(endpoint, options).expect("connect")
    }

    fn loopback(channel: &CommandChannel) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), channel.local_addr().port())
    }

    async fn recv_packet(engine: &UdpSocket) -> Packet {
        let mut buf = vec![0u8; 2048];
        let (len, _) = timeout(WAIT, engine.recv_from(&mut buf))
            .await
            .expect("datagram before timeout")
            .expect("recv");
        codec::decode(&buf[..len]).expect("decodable datagram")
    }

    fn rt_packet(state: &TelemetryState) -> Vec<u8> {
        let mut buf = b"VBAN".to_vec();
        buf.extend_from_slice(&[0x60, 0x80, codec::SERVICE_RT_PACKET, 0]);
        buf.extend_from_slice(&StreamName::new("Command1").expect("stream name").to_field());
        buf.extend_from_slice(&0u32.to_le_bytes());
        state.encode(&mut buf);
        buf
    }

    #[test]
    fn test_open_rejects_bad_endpoint() {
        assert_matches!(CommandChannel::open("300.1.1.1", 6980, "Command1"), Err(VbanError::InvalidEndpointConfig(_)));
        assert_matches!(CommandChannel::open("127.0.0.1", 0, "Command1"), Err(VbanError::InvalidEndpointConfig(_)));
    }

    #[test]
    fn test_debug_shows_endpoint() {
        let channel = CommandChannel::open("127.0.0.1", 6980, "Command1").expect("open");
        let text = format!("{channel:?}");
        assert!(text.contains("127.0.0.1:6980"), "{text}");
        assert!(text.contains("frame_counter: 0"), "{text}");
    }

    #[test]
    fn test_sends_survive_refused_port() {
        let port = {
            let gone = StdUdpSocket::bind("127.0.0.1:0").expect("bind");
            gone.local_addr().expect("addr").port()
        };
        let channel = CommandChannel::open("127.0.0.1", i64::from(port), "Command1").expect("open");

        for _ in 0..10 {
            channel.send_command("Command.ResetGrid").expect("send to closed port");
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(channel.frame_counter(), 10);
    }

    #[test]
    fn test_binds_ephemeral_port() {
        let channel = CommandChannel::open("127.0.0.1", 6980, "Command1").expect("open");
        assert_ne!(channel.local_addr().port(), 6980);
        assert_ne!(channel.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn test_send_frames_text_and_counts() {
        let engine = fake_engine().await;
        let channel = channel_to(&engine, ChannelOptions::default());

        for expected in 0..5u32 {
            assert_eq!(channel.frame_counter(), expected);
            channel.send_command(&format!("Strip[{expected}].Mute = 1")).expect("send");

            let packet = recv_packet(&engine).await;
            assert_eq!(
                packet,
                Packet::Text {
                    stream_name: "Command1".to_string(),
                    frame_counter: expected,
                    text: format!("Strip[{expected}].Mute = 1"),
                }
            );
        }
        assert_eq!(channel.frame_counter(), 5);
    }

    #[tokio::test]
    async fn test_frame_counter_wraps() {
        let engine = fake_engine().await;
        let channel = channel_to(&engine, ChannelOptions::default());
        channel.set_frame_counter(u32::MAX - 1);

        for expected in [u32::MAX - 1, u32::MAX, 0, 1] {
            channel.send_command("Command.ResetGrid").expect("send");
            assert_matches!(recv_packet(&engine).await, Packet::Text { frame_counter, .. } if frame_counter == expected);
        }
        assert_eq!(channel.frame_counter(), 2);
    }

    #[tokio::test]
    async fn test_send_after_close_is_noop() {
        let engine = fake_engine().await;
        let channel = channel_to(&engine, ChannelOptions::default());
        channel.send_command("first").expect("send");
        let _ = recv_packet(&engine).await;

        channel.close();
        channel.close();
        assert!(channel.is_closed());
        assert!(channel.send_command("second").is_ok());
        assert_eq!(channel.frame_counter(), 1);

        let mut buf = [0u8; 64];
        assert!(timeout(Duration::from_millis(100), engine.recv_from(&mut buf)).await.is_err());
    }

    #[tokio::test]
    async fn test_start_after_close_fails() {
        let engine = fake_engine().await;
        let channel = channel_to(&engine, ChannelOptions::default());
        channel.stop();

        assert_matches!(channel.start(), Err(VbanError::SocketClosed));
        assert!(!channel.is_running());
    }

    #[tokio::test]
    async fn test_shutdown_waits_and_closes() {
        let engine = fake_engine().await;
        let channel = channel_to(&engine, ChannelOptions::default());
        channel.start().expect("start");
        let _ = recv_packet(&engine).await;

        channel.shutdown().await;
        assert!(!channel.is_running());
        assert!(channel.is_closed());
        channel.shutdown().await;
        assert_matches!(channel.start(), Err(VbanError::SocketClosed));
    }

    #[test]
    fn test_start_requires_runtime() {
        let channel = CommandChannel::open("127.0.0.1", 6980, "Command1").expect("open");
        assert_matches!(channel.start(), Err(VbanError::Io(_)));
    }

    #[tokio::test]
    async fn test_start_subscribes_once() {
        let engine = fake_engine().await;
        let channel = channel_to(&engine, ChannelOptions::default());

        channel.start().expect("start");
        channel.start().expect("second start is a no-op");
        assert!(channel.is_running());

        assert_eq!(
            recv_packet(&engine).await,
            Packet::RtSubscription { stream_name: "Command1".to_string(), timeout_secs: 15 }
        );
        let mut buf = [0u8; 64];
        assert!(timeout(Duration::from_millis(200), engine.recv_from(&mut buf)).await.is_err());
    }

    #[tokio::test]
    async fn test_resubscribes_until_stopped() {
        let engine = fake_engine().await;
        let channel = channel_to(&engine, ChannelOptions { resubscribe_interval: Duration::from_millis(30) });

        channel.start().expect("start");
        for _ in 0..3 {
            assert_matches!(recv_packet(&engine).await, Packet::RtSubscription { .. });
        }

        channel.stop();
        assert!(!channel.is_running());

        // Drain anything already in flight, then expect silence
        let mut buf = [0u8; 64];
        while timeout(Duration::from_millis(50), engine.recv_from(&mut buf)).await.is_ok() {}
        assert!(timeout(Duration::from_millis(150), engine.recv_from(&mut buf)).await.is_err());
    }

    #[tokio::test]
    async fn test_receive_publishes_state_and_text() {
        let engine = fake_engine().await;
        let channel = channel_to(&engine, ChannelOptions::default());
        let mut events = channel.subscribe();
        channel.start().expect("start");
        let _ = recv_packet(&engine).await;

        let mut state = TelemetryState { buffer_size: 256, ..TelemetryState::default() };
        state.bus_labels[0] = label_slot("Main");

        // Malformed and unrecognised packets are dropped without stopping the loop
        engine.send_to(b"VB", loopback(&channel)).await.expect("send short");
        engine.send_to(&[0u8; 40], loopback(&channel)).await.expect("send junk");
        engine.send_to(&rt_packet(&state), loopback(&channel)).await.expect("send rt");

        let event = timeout(WAIT, events.recv()).await.expect("event").expect("recv");
        assert_matches!(event, TelemetryEvent::State(s) if s.buffer_size == 256 && s.bus_label(0).as_deref() == Some("Main"));
        assert_eq!(channel.latest_state().map(|s| s.buffer_size), Some(256));

        let mut reply = b"VBAN".to_vec();
        reply.extend_from_slice(&[0x60, codec::SERVICE_FN_REPLY, codec::SERVICE_TEXT_REPLY, 0]);
        reply.extend_from_slice(&[0u8; 20]);
        reply.extend_from_slice(b"Bus[0].Mute = 0;\0\0");
        assert_eq!(reply.len(), HEADER_LEN + 18);
        engine.send_to(&reply, loopback(&channel)).await.expect("send reply");

        let event = timeout(WAIT, events.recv()).await.expect("event").expect("recv");
        assert_matches!(event, TelemetryEvent::TextReply(t) if t == "Bus[0].Mute = 0;");

        channel.stop();
    }

    #[tokio::test]
    async fn test_ignores_other_peers() {
        let engine = fake_engine().await;
        let stranger = fake_engine().await;
        let channel = channel_to(&engine, ChannelOptions::default());
        let mut events = channel.subscribe();
        channel.start().expect("start");
        let _ = recv_packet(&engine).await;

        let intruder = TelemetryState { sample_rate: 1, ..TelemetryState::default() };
        let genuine = TelemetryState { sample_rate: 48_000, ..TelemetryState::default() };
        let _ = stranger.send_to(&rt_packet(&intruder), loopback(&channel)).await;
        engine.send_to(&rt_packet(&genuine), loopback(&channel)).await.expect("send rt");

        let event = timeout(WAIT, events.recv()).await.expect("event").expect("recv");
        assert_matches!(event, TelemetryEvent::State(s) if s.sample_rate == 48_000);
        channel.stop();
    }
}
