//! UDP receiver for the upstream controller's color stream.
//!
//! The receiver binds a UDP socket on the stream port (default 60222) and
//! turns every datagram into a [`Frame`] on the shared [`FrameQueue`].  It
//! runs on a dedicated thread with blocking socket I/O so the Tokio runtime
//! is never stalled by `recv_from`.
//!
//! # Read timeout
//!
//! The socket has a short read timeout.  On each timeout the loop checks the
//! shutdown signal and exits once it has fired; the socket is dropped (and
//! therefore closed) when the thread returns.
//!
//! # Malformed datagrams
//!
//! A datagram that fails to decode is counted and dropped; the loop keeps
//! going.  Only the first few failures and then every Nth are logged so a
//! misbehaving sender cannot flood the log.

use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use melkoleaf_core::{decode_stream_packet, Frame};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::application::context::ShutdownSignal;
use crate::application::frame_queue::FrameQueue;
use crate::application::stream_state::StreamState;

/// How long one `recv_from` may block before the shutdown flag is rechecked.
const READ_TIMEOUT: Duration = Duration::from_millis(250);

/// Largest datagram accepted; 1 + 255 * 7 bytes covers every v1 packet and
/// a v2 packet for a few hundred panels.
const MAX_DATAGRAM: usize = 4096;

const LOG_FIRST_PACKETS: u64 = 3;
const LOG_EVERY_NTH_PACKET: u64 = 30;

/// Error type for the stream receiver.
#[derive(Debug, Error)]
pub enum ReceiverError {
    /// The UDP socket could not be bound.
    #[error("failed to bind stream socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    /// The socket could not be configured.
    #[error("failed to configure stream socket: {0}")]
    Socket(#[source] std::io::Error),
    /// The receive thread could not be started.
    #[error("failed to spawn stream receiver thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Handle to a running receiver thread.
pub struct StreamReceiverHandle {
    local_addr: SocketAddr,
    thread: JoinHandle<()>,
}

impl StreamReceiverHandle {
    /// The address the socket is actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Waits for the thread to exit.  Only returns once the shutdown signal
    /// passed to [`start_stream_receiver`] has fired.
    pub fn join(self) {
        if self.thread.join().is_err() {
            error!("stream receiver thread panicked");
        }
    }
}

/// Binds `bind_addr` and spawns the receive loop.
///
/// # Errors
///
/// Returns [`ReceiverError::BindFailed`] if the socket cannot be bound; the
/// caller treats this as fatal.
pub fn start_stream_receiver(
    bind_addr: SocketAddr,
    queue: Arc<FrameQueue>,
    state: Arc<StreamState>,
    shutdown: ShutdownSignal,
) -> Result<StreamReceiverHandle, ReceiverError> {
    let socket = UdpSocket::bind(bind_addr).map_err(|source| ReceiverError::BindFailed {
        addr: bind_addr,
        source,
    })?;
    socket
        .set_read_timeout(Some(READ_TIMEOUT))
        .map_err(ReceiverError::Socket)?;
    let local_addr = socket.local_addr().map_err(ReceiverError::Socket)?;

    let thread = std::thread::Builder::new()
        .name("melk-stream".to_string())
        .spawn(move || receive_loop(socket, &queue, &state, &shutdown))
        .map_err(ReceiverError::Spawn)?;

    info!("stream receiver listening on UDP {local_addr}");
    Ok(StreamReceiverHandle { local_addr, thread })
}

fn receive_loop(socket: UdpSocket, queue: &FrameQueue, state: &StreamState, shutdown: &ShutdownSignal) {
    let mut buf = vec![0u8; MAX_DATAGRAM];

    while !shutdown.is_triggered() {
        let (len, src) = match socket.recv_from(&mut buf) {
            Ok(pair) => pair,
            Err(e) if is_timeout_error(&e) => continue,
            Err(e) => {
                debug!("stream recv error: {e}");
                continue;
            }
        };

        match decode_stream_packet(&buf[..len]) {
            Ok(packet) => {
                let color = packet.color();
                let received = state.record_packet(color);
                queue.publish(Frame::now(color));
                if received <= LOG_FIRST_PACKETS || received % LOG_EVERY_NTH_PACKET == 0 {
                    debug!(
                        packet = received,
                        from = %src,
                        version = ?packet.version,
                        panels = packet.panels.len(),
                        color = %color,
                        "stream datagram"
                    );
                }
            }
            Err(e) => {
                let errors = state.record_decode_error();
                if errors <= LOG_FIRST_PACKETS || errors % LOG_EVERY_NTH_PACKET == 0 {
                    debug!(
                        "dropping malformed datagram #{errors} from {src} ({len} bytes): {e}"
                    );
                }
            }
        }
    }

    info!("stream receiver stopped");
}

/// Returns `true` for OS timeout / would-block errors that should be retried.
fn is_timeout_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}
