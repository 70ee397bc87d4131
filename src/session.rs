//! Session driver: accepts TCP connections (or adopts a given fd), runs
//! one GDB session to completion per connection, and exposes a
//! cancellation token that can interrupt accept or a session in flight.
//!
//! A non-blocking `TcpListener` is polled in a loop with a short sleep on
//! `WouldBlock`; an `mpsc` channel serves as the cancellation token so a
//! session can be cancelled mid-flight, not only between connections, and
//! every frame send goes through the full RSP ack/nak discipline.

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};

use crate::dm::backend::DmBackend;
use crate::dm::transport::DmiTransport;
use crate::error::{Error, Result};
use crate::rsp::wire::{self, FrameDecoder, ReceiveEvent};
use crate::rsp::{DispatchOutcome, Dispatcher};

/// Suspension points poll at this granularity.
const POLL_INTERVAL: Duration = Duration::from_millis(1);
/// Budget for a single ack byte after sending a frame.
const ACK_TIMEOUT: Duration = Duration::from_secs(2);

/// Runs the background worker for one listening endpoint. `T` is the
/// concrete DMI transport; the driver owns the single [`DmBackend`]
/// instance shared across sequential sessions.
pub struct SessionDriver {
    stop_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
    port: u16,
}

impl SessionDriver {
    /// Binds to loopback (`port` 0 = ephemeral) and spawns the worker
    /// thread. Returns the driver and the bound port.
    pub fn start_tcp<T>(backend: DmBackend<T>, port: u16) -> Result<Self>
    where
        T: DmiTransport + Send + 'static,
    {
        let listener = TcpListener::bind(("127.0.0.1", port))?;
        listener.set_nonblocking(true)?;
        let bound_port = listener.local_addr()?.port();
        let (stop_tx, stop_rx) = mpsc::channel();

        let handle = thread::spawn(move || {
            accept_loop(listener, backend, stop_rx);
        });

        Ok(SessionDriver {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
            port: bound_port,
        })
    }

    /// Single-session variant: drives one already-connected fd to
    /// completion instead of listening for new connections.
    #[cfg(unix)]
    pub fn start_fd<T>(backend: DmBackend<T>, fd: std::os::unix::io::RawFd) -> Result<Self>
    where
        T: DmiTransport + Send + 'static,
    {
        use std::os::unix::io::FromRawFd;
        let stream = unsafe { TcpStream::from_raw_fd(fd) };
        let (stop_tx, stop_rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            let mut dispatcher = Dispatcher::new(backend);
            run_session(stream, &mut dispatcher, &stop_rx);
        });
        Ok(SessionDriver {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
            port: 0,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Signals the worker to terminate at the next safe point.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Waits for the worker thread to exit.
    pub fn join(mut self) {
        self.stop_tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn accept_loop<T: DmiTransport>(
    listener: TcpListener,
    backend: DmBackend<T>,
    stop_rx: mpsc::Receiver<()>,
) {
    info!("gdb bridge listening on {:?}", listener.local_addr());
    // Sessions are sequential, so the same back-end instance is reused
    // connection to connection; only its session-local run state (owned
    // by `Dispatcher`) is reset between them.
    let mut dispatcher = Dispatcher::new(backend);
    loop {
        if stop_rx.try_recv().is_ok() {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                info!("accepted connection from {peer}");
                dispatcher.reset_session_state();
                run_session(stream, &mut dispatcher, &stop_rx);
                info!("session with {peer} ended");
            }
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                warn!("accept error: {e}");
                break;
            }
        }
    }
    debug!("accept loop exiting");
}

/// Drives one GDB connection to completion: receive-loop, ack discipline,
/// and the interleaved stop-reason-waiting poll.
fn run_session<T: DmiTransport>(
    mut stream: TcpStream,
    dispatcher: &mut Dispatcher<T>,
    stop_rx: &mpsc::Receiver<()>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        warn!("set_nodelay failed: {e}");
    }
    if let Err(e) = stream.set_read_timeout(Some(POLL_INTERVAL)) {
        warn!("set_read_timeout failed: {e}");
        return;
    }

    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 4096];

    loop {
        if stop_rx.try_recv().is_ok() {
            debug!("session cancelled");
            return;
        }

        match stream.read(&mut buf) {
            Ok(0) => {
                debug!("peer closed connection");
                return;
            }
            Ok(n) => decoder.ingest(&buf[..n]),
            Err(ref e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {}
            Err(e) => {
                warn!("read error: {e}");
                return;
            }
        }

        loop {
            match decoder.scan() {
                ReceiveEvent::Incomplete => break,
                ReceiveEvent::Interrupt => {
                    let reply = dispatcher.handle_interrupt();
                    if send_frame_with_ack(&mut stream, &reply).is_err() {
                        return;
                    }
                }
                ReceiveEvent::BadChecksum => {
                    if stream.write_all(b"-").is_err() {
                        return;
                    }
                }
                ReceiveEvent::Frame(payload) => {
                    if stream.write_all(b"+").is_err() {
                        return;
                    }
                    match dispatcher.handle_packet(&payload) {
                        DispatchOutcome::Reply(resp) => {
                            if send_frame_with_ack(&mut stream, &resp).is_err() {
                                return;
                            }
                        }
                        DispatchOutcome::NoReply => {}
                        DispatchOutcome::Detach(resp) => {
                            let _ = send_frame_with_ack(&mut stream, &resp);
                            debug!("client detached");
                            return;
                        }
                    }
                }
            }
        }

        if dispatcher.waiting_for_stop_reason() {
            if let Some(reply) = dispatcher.poll_stop_reason() {
                if send_frame_with_ack(&mut stream, &reply).is_err() {
                    return;
                }
            }
        }
    }
}

/// Sends `$<payload>#cc`, retransmitting on `-` and failing fatally on
/// anything else.
fn send_frame_with_ack(stream: &mut TcpStream, payload: &[u8]) -> Result<()> {
    let frame = wire::format_frame(payload);
    stream.set_read_timeout(Some(ACK_TIMEOUT))?;
    let result = (|| -> Result<()> {
        loop {
            stream.write_all(&frame)?;
            let mut ack = [0u8; 1];
            stream.read_exact(&mut ack).map_err(|e| {
                if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut {
                    Error::Timeout
                } else {
                    Error::from(e)
                }
            })?;
            match ack[0] {
                b'+' => return Ok(()),
                b'-' => continue,
                _ => return Err(Error::WireFraming),
            }
        }
    })();
    let _ = stream.set_read_timeout(Some(POLL_INTERVAL));
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dm::backend::{DmBackend, Xlen};
    use crate::dm::sim::DmSimulator;

    /// Drives the interrupt-during-run scenario over an actual TCP
    /// socket: GDB's `c` frame is sent and acked, then the bare `0x03`
    /// interrupt byte arrives while the session is waiting for a stop
    /// reason, and the bridge must reply with a `T03` (haltreq) frame
    /// acked in turn.
    #[test]
    fn scenario_6_interrupt_during_continue_over_the_wire() {
        let backend = DmBackend::new(DmSimulator::new(Xlen::Bits64), true);
        let mut driver = SessionDriver::start_tcp(backend, 0).unwrap();
        let port = driver.port();

        let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
        client.set_nodelay(true).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();

        // GDB: "+$c#63" — send the continue frame, expect our ack.
        client.write_all(&wire::format_frame(b"c")).unwrap();
        let mut ack = [0u8; 1];
        client.read_exact(&mut ack).unwrap();
        assert_eq!(ack[0], b'+');

        // GDB sends the raw interrupt byte mid-run.
        client.write_all(&[0x03]).unwrap();

        // Expect a "$T03#b7" frame (cause = haltreq) and ack it.
        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"$T03#b7");
        client.write_all(b"+").unwrap();

        driver.stop();
        driver.join();
    }
}
