//! Background RT-packet subscription and receive loops.
//!
//! Two tasks share the channel's socket: one re-registers for RT-packets on a
//! fixed interval, the other decodes inbound datagrams from the remote
//! engine. Both stop at the next suspension point once cancelled.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::codec::{self, Packet};
use crate::events::TelemetryHub;

/// Default interval between RT-packet registrations.
pub const RESUBSCRIBE_INTERVAL: Duration = Duration::from_secs(10);

/// Largest datagram the receive loop accepts.
const MAX_DATAGRAM: usize = 2048;

/// Handle to the running subscription and receive tasks.
pub struct TelemetrySubscriber {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl TelemetrySubscriber {
    /// Spawn both loops on the current tokio runtime.
    pub fn spawn(
        socket: Arc<UdpSocket>,
        remote: SocketAddr,
        subscription: Bytes,
        interval: Duration,
        hub: Arc<TelemetryHub>,
    ) -> Self {
        let cancel = CancellationToken::new();

        let resubscribe = tokio::spawn(resubscribe_loop(
            Arc::clone(&socket),
            subscription,
            interval,
            cancel.clone(),
        ));
        let receive = tokio::spawn(receive_loop(socket, remote, hub, cancel.clone()));

        debug!(%remote, ?interval, "Telemetry subscriber started");
        Self { cancel, tasks: vec![resubscribe, receive] }
    }

    /// Cancel both loops without waiting for them.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether both loops are still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && self.tasks.iter().all(|t| !t.is_finished())
    }

    /// Cancel both loops and wait until they have exited.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                warn!(error = %e, "Telemetry task ended abnormally");
            }
        }
    }
}

impl Drop for TelemetrySubscriber {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn resubscribe_loop(
    socket: Arc<UdpSocket>,
    subscription: Bytes,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }
        match socket.send(&subscription).await {
            Ok(_) => trace!("Sent RT-packet subscription"),
            Err(e) => debug!(error = %e, "RT-packet subscription send failed"),
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }
    }
    debug!("Resubscription loop stopped");
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    remote: SocketAddr,
    hub: Arc<TelemetryHub>,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        let (len, from) = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = socket.recv_from(&mut buf) => match result {
                Ok(received) => received,
                Err(e) => {
                    // ICMP errors surface here on connected sockets; not fatal
                    trace!(error = %e, "UDP recv error");
                    continue;
                }
            },
        };

        if from != remote {
            trace!(%from, "Ignoring datagram from unexpected peer");
            continue;
        }

        match codec::decode(&buf[..len]) {
            Ok(Packet::RtState(state)) => hub.publish_state(*state),
            Ok(Packet::TextReply(text)) => {
                debug!(reply = %text, "Text reply received");
                hub.publish_text(text);
            }
            Ok(other) => trace!(packet = ?other, "Ignoring unhandled packet kind"),
            Err(e) => debug!(error = %e, len, "Dropping inbound packet"),
        }
    }
    debug!("Receive loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_waits_for_both_loops() {
        let engine = UdpSocket::bind("127.0.0.1:0").await.expect("bind engine");
        let socket = UdpSocket::bind("127.0.0.1:0").await.expect("bind client");
        let remote = engine.local_addr().expect("engine addr");
        socket.connect(remote).await.expect("connect");

        let subscriber = TelemetrySubscriber::spawn(
            Arc::new(socket),
            remote,
            Bytes::from_static(b"ping"),
            Duration::from_millis(20),
            Arc::new(TelemetryHub::new()),
        );
        assert!(subscriber.is_running());

        let mut buf = [0u8; 16];
        let (len, _) = engine.recv_from(&mut buf).await.expect("first subscription");
        assert_eq!(&buf[..len], b"ping");

        tokio::time::timeout(Duration::from_secs(1), subscriber.shutdown())
            .await
            .expect("loops exit promptly");
    }

    #[tokio::test]
    async fn test_drop_cancels() {
        let engine = UdpSocket::bind("127.0.0.1:0").await.expect("bind engine");
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.expect("bind client"));
        let remote = engine.local_addr().expect("engine addr");

        let subscriber = TelemetrySubscriber::spawn(
            Arc::clone(&socket),
            remote,
            Bytes::new(),
            RESUBSCRIBE_INTERVAL,
            Arc::new(TelemetryHub::new()),
        );
        let cancel = subscriber.cancel.clone();
        drop(subscriber);
        assert!(cancel.is_cancelled());
    }
}
