//! Driving a dispatcher thread from other threads

use std::sync::mpsc;
use std::time::Duration;

use blockwire_core::{Block, BlockPool, Buffer, ConnectionRef, PoolConfig};
use blockwire_runtime::{
    DispatcherConfig, DispatcherState, DispatcherThread, Error, MockConfig, MockConnection,
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn mock_pair(t: &DispatcherThread) -> (ConnectionRef, ConnectionRef) {
    let (a, b) = MockConnection::pair(&t.mock_hub().unwrap(), MockConfig::new().chunk_limit(3));
    (a, b)
}

#[test]
fn test_ping_through_thread() {
    let t = DispatcherThread::spawn(DispatcherConfig::mock()).unwrap();
    let (a, b) = mock_pair(&t);

    let (tx, rx) = mpsc::channel();
    t.async_read(b, 4, move |_, _, buf| tx.send(buf.into_vec()).unwrap());
    t.async_write(a, Buffer::from("ping"), |_, _| {});

    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), b"ping");
    t.join().unwrap();
}

#[test]
fn test_echo_reply_from_callback() {
    let t = DispatcherThread::spawn(DispatcherConfig::mock()).unwrap();
    let (client, server) = mock_pair(&t);

    // server echoes whatever it reads
    t.async_read(server, 5, |d, conn, buf| {
        d.async_write(conn, buf, |_, _| {}).unwrap();
    });

    let (tx, rx) = mpsc::channel();
    let reader = client.clone();
    t.run(move |d| {
        d.async_write_copy(&client, b"hello", |_, _| {}).unwrap();
        d.async_read(&reader, 5, move |_, _, buf| tx.send(buf.into_vec()).unwrap())
            .unwrap();
    });

    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), b"hello");
}

#[test]
fn test_block_write_from_thread() {
    let pool = BlockPool::new(PoolConfig::new()).unwrap();
    let src = pool.from_slice(b"0123456789").unwrap();
    let pinned = Block::new(src.clone(), 2, 8, 2, 3).pin().unwrap();

    let t = DispatcherThread::spawn(DispatcherConfig::mock()).unwrap();
    let (a, b) = mock_pair(&t);
    let (tx, rx) = mpsc::channel();
    t.async_write_block(a, pinned, |_, _| {});
    t.async_read(b, 6, move |_, _, buf| tx.send(buf.into_vec()).unwrap());

    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), b"234567");
    t.join().unwrap();
    assert_eq!(src.pin_count(), 0);
}

#[test]
fn test_panicking_job_is_reported_on_join() {
    let t = DispatcherThread::spawn(DispatcherConfig::mock()).unwrap();
    let (tx, rx) = mpsc::channel();
    t.run(move |_| {
        tx.send(()).unwrap();
        panic!("job failed");
    });
    rx.recv_timeout(TIMEOUT).unwrap();
    assert!(matches!(t.join(), Err(Error::ThreadPanicked)));
}

#[test]
fn test_jobs_after_terminate_are_dropped() {
    let t = DispatcherThread::spawn(DispatcherConfig::mock()).unwrap();
    let handle = t.handle().clone();
    t.terminate();
    handle.run(|_| panic!("job queued after terminate must not run"));
    t.join().unwrap();
    assert_eq!(handle.state(), DispatcherState::Stopped);
}
