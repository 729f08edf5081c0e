//! blockwire echo server
//!
//! Accepts TCP connections on the main thread and hands each one to a
//! dispatcher thread, which echoes whatever arrives through async writes.
//!
//! Usage:
//!     cargo build --release -p blockwire-echo
//!     ./target/release/echo [port]
//!
//! Environment:
//!     BLOCKWIRE_BACKEND=poll|epoll   readiness backend (default: epoll on Linux)
//!     BLOCKWIRE_FATAL_POLICY=report  keep serving after a failed transfer
//!     BLOCKWIRE_LOG=debug            log filter
//!
//! Test with:
//!     echo "hello" | nc -q1 localhost 9999
//!
//!     # Several clients at once:
//!     for i in $(seq 1 100); do echo "ping $i" | nc -q1 localhost 9999 & done

use std::net::TcpListener;

use blockwire::{
    ConnectionRef, Dispatcher, DispatcherConfig, DispatcherThread, ErrorClass, TcpConnection,
};
use tracing::{debug, info, warn};

const DEFAULT_PORT: u16 = 9999;
const BUF_SIZE: usize = 4096;

/// Echo every chunk read from `conn` until the peer closes
fn serve(d: &mut Dispatcher, conn: ConnectionRef) {
    let reader = conn.clone();
    let mut buf = vec![0u8; BUF_SIZE];
    let res = d.add_read(&reader, move |d| match conn.recv_one(&mut buf) {
        Ok(0) => {
            debug!(conn = %conn.label(), "peer closed");
            false
        }
        Ok(n) => match d.async_write_copy(&conn, &buf[..n], |_, _| {}) {
            Ok(()) => true,
            Err(e) => {
                warn!(conn = %conn.label(), error = %e, "echo write rejected");
                false
            }
        },
        Err(e) => match ErrorClass::of(&e) {
            ErrorClass::Transient => true,
            ErrorClass::GracefulEnd => false,
            ErrorClass::Fatal => {
                warn!(conn = %conn.label(), error = %e, "recv failed");
                false
            }
        },
    });
    if let Err(e) = res {
        warn!(conn = %reader.label(), error = %e, "cannot watch connection");
    }
}

fn main() {
    blockwire::init_logging();

    let port = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_PORT);

    let listener = match TcpListener::bind(("0.0.0.0", port)) {
        Ok(l) => l,
        Err(e) => {
            eprintln!("bind :{} failed: {}", port, e);
            std::process::exit(1);
        }
    };

    let dispatcher = match DispatcherThread::spawn(DispatcherConfig::from_env()) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("dispatcher failed to start: {}", e);
            std::process::exit(1);
        }
    };
    info!(port, "echo listening");

    for stream in listener.incoming() {
        let conn = match stream.and_then(TcpConnection::from_stream) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };
        info!(peer = ?conn.peer_addr(), "accepted");
        let conn: ConnectionRef = conn;
        dispatcher.run(move |d| serve(d, conn));
    }

    if let Err(e) = dispatcher.join() {
        eprintln!("dispatcher stopped with error: {}", e);
    }
}
