use perfagent::config::ServerConfig;
use perfagent::server::{Server, ServerHandle};
use perfagent_common::NUM_CLIENTS;
use serde_json::{json, Value};
use std::io::{self, BufRead, BufReader, Read};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn start_server() -> (ServerHandle, SocketAddr, thread::JoinHandle<()>) {
    let config = ServerConfig {
        bind_address: "127.0.0.1".parse().unwrap(),
        port: 0,
        poll_interval: Duration::from_millis(10),
        ..ServerConfig::default()
    };
    let mut server = Server::new(config).expect("Failed to start server");
    let handle = server.handle();
    let addr = server.local_addr();
    let thread = thread::spawn(move || server.run().expect("Server loop failed"));
    (handle, addr, thread)
}

fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("condition not reached");
}

#[test]
fn test_concurrent_broadcasts_do_not_interleave() {
    const PRODUCERS: usize = 4;
    const RECORDS: usize = 50;

    let (handle, addr, server) = start_server();
    let stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    wait_for(|| handle.client_count() == 1);

    let reader = thread::spawn(move || {
        let mut lines = Vec::new();
        let mut reader = BufReader::new(stream);
        while lines.len() < PRODUCERS * RECORDS {
            let mut line = String::new();
            if reader.read_line(&mut line).unwrap() == 0 {
                break;
            }
            lines.push(line);
        }
        lines
    });

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let handle = handle.clone();
            thread::spawn(move || {
                for seq in 0..RECORDS {
                    handle.broadcast(&json!({
                        "category": "objectAllocEvents",
                        "producer": producer,
                        "seq": seq,
                        "padding": "x".repeat(100),
                    }));
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    let lines = reader.join().unwrap();
    assert_eq!(lines.len(), PRODUCERS * RECORDS);

    let mut next_seq = [0u64; PRODUCERS];
    for line in &lines {
        assert!(line.ends_with('\n'));
        let record: Value = serde_json::from_str(line).expect("interleaved record");
        let producer = usize::try_from(record["producer"].as_u64().unwrap()).unwrap();
        assert_eq!(record["seq"].as_u64().unwrap(), next_seq[producer]);
        next_seq[producer] += 1;
    }

    handle.shutdown();
    server.join().unwrap();
}

#[test]
fn test_connection_beyond_capacity_sees_eof() {
    let (handle, addr, server) = start_server();

    let clients: Vec<TcpStream> = (0..NUM_CLIENTS)
        .map(|_| TcpStream::connect(addr).unwrap())
        .collect();
    wait_for(|| handle.client_count() == NUM_CLIENTS);

    let mut extra = TcpStream::connect(addr).unwrap();
    extra.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let mut buf = [0u8; 16];
    assert_eq!(extra.read(&mut buf).unwrap(), 0);
    assert_eq!(handle.client_count(), NUM_CLIENTS);

    handle.broadcast(&json!({"category": "monitorEvents"}));
    for client in &clients {
        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut line = String::new();
        BufReader::new(client).read_line(&mut line).unwrap();
        assert_eq!(line, "{\"category\":\"monitorEvents\"}\n");
    }

    handle.shutdown();
    server.join().unwrap();
}

#[test]
fn test_stalled_reader_is_evicted_without_stalling_others() {
    const BATCH: usize = 20;
    const MAX_BATCHES: usize = 500;

    let (handle, addr, server) = start_server();
    let mut stalled = TcpStream::connect(addr).unwrap();
    let fast = TcpStream::connect(addr).unwrap();
    fast.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    wait_for(|| handle.client_count() == 2);

    // Counts records that arrive whole and in order
    let received = Arc::new(AtomicUsize::new(0));
    let reader = {
        let received = Arc::clone(&received);
        thread::spawn(move || {
            let mut reader = BufReader::new(fast);
            let mut line = String::new();
            while reader.read_line(&mut line).unwrap_or(0) > 0 {
                let record: Value = serde_json::from_str(&line).expect("torn record");
                let expected = u64::try_from(received.load(Ordering::SeqCst)).unwrap();
                assert_eq!(record["seq"].as_u64(), Some(expected));
                received.fetch_add(1, Ordering::SeqCst);
                line.clear();
            }
        })
    };

    let padding = "x".repeat(4096);
    let mut sent = 0;
    for _ in 0..MAX_BATCHES {
        for _ in 0..BATCH {
            handle.broadcast(&json!({"category": "objectAllocEvents", "seq": sent, "padding": padding}));
            sent += 1;
        }
        wait_for(|| received.load(Ordering::SeqCst) == sent);
        if handle.client_count() == 1 {
            break;
        }
    }
    assert_eq!(handle.client_count(), 1, "stalled reader was never dropped");

    // The remaining observer keeps receiving
    for _ in 0..BATCH {
        handle.broadcast(&json!({"category": "objectAllocEvents", "seq": sent, "padding": padding}));
        sent += 1;
    }
    wait_for(|| received.load(Ordering::SeqCst) == sent);

    // The evicted peer drains what was queued and then sees end of stream
    stalled.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    io::copy(&mut stalled, &mut io::sink()).unwrap();

    handle.shutdown();
    server.join().unwrap();
    reader.join().unwrap();
}

#[test]
fn test_disconnected_client_frees_its_slot() {
    let (handle, addr, server) = start_server();

    let first = TcpStream::connect(addr).unwrap();
    let _second = TcpStream::connect(addr).unwrap();
    wait_for(|| handle.client_count() == 2);

    drop(first);
    wait_for(|| handle.client_count() == 1);

    let _third = TcpStream::connect(addr).unwrap();
    wait_for(|| handle.client_count() == 2);

    handle.shutdown();
    server.join().unwrap();
}

#[test]
fn test_broadcast_after_shutdown_is_noop() {
    let (handle, _addr, server) = start_server();
    handle.shutdown();
    server.join().unwrap();

    handle.broadcast(&json!({"category": "exceptionEvents"}));
    assert_eq!(handle.client_count(), 0);
}
