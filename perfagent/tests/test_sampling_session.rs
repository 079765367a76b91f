use perfagent::config::ServerConfig;
use perfagent::domain::{DispatchError, Pid, SessionError};
use perfagent::server::Server;
use perfagent::session::Sampler;
use serde_json::Value;
use std::io::{BufRead, BufReader};
use std::net::TcpStream;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const REPORT: &str = "\
java  4242/4243 [002] 12.500001:     250000 cycles:  7f00aa001000 Interpreter+0x40 (/opt/jvm/libjvm.so)
garbage that is not a sample
java  4242/4243 [002] 12.500101:     250000 cycles:  7f00aa001010 Interpreter+0x50 (/opt/jvm/libjvm.so)
";

struct SleepSampler;

impl Sampler for SleepSampler {
    fn name(&self) -> &str {
        "sleep"
    }

    fn spawn_record(&self, _target: Pid) -> Result<Child, SessionError> {
        Ok(Command::new("sleep").arg("30").stdout(Stdio::null()).spawn()?)
    }

    fn report(&self) -> Result<String, SessionError> {
        Ok(REPORT.to_string())
    }
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
fn test_session_broadcasts_samples() {
    let config = ServerConfig {
        bind_address: "127.0.0.1".parse().unwrap(),
        port: 0,
        poll_interval: Duration::from_millis(10),
        ..ServerConfig::default()
    };
    let mut server = Server::with_sampler(config, Arc::new(SleepSampler)).unwrap();
    let handle = server.handle();
    let addr = server.local_addr();
    let loop_thread = thread::spawn(move || server.run().unwrap());

    let observer = TcpStream::connect(addr).unwrap();
    observer.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    wait_for(|| handle.client_count() == 1);

    handle
        .handle_client_command(r#"{"functionality":"perf","command":"start","time":30}"#, "stdin")
        .unwrap();
    assert!(handle.session_running());

    let second = handle
        .handle_client_command(r#"{"functionality":"perf","command":"start","time":30}"#, "stdin");
    assert!(matches!(second, Err(DispatchError::SessionActive)));

    handle.handle_client_command(r#"{"functionality":"perf","command":"stop"}"#, "stdin").unwrap();
    assert!(!handle.session_running());

    let mut reader = BufReader::new(&observer);
    let records: Vec<Value> = (0..3)
        .map(|_| {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            serde_json::from_str(&line).unwrap()
        })
        .collect();

    assert_eq!(records[0]["perfSample"]["id"], 0);
    assert_eq!(records[0]["perfSample"]["pid"], "4242");
    assert_eq!(records[1]["perfSample"]["symbol+offset"], "Interpreter+0x50");
    assert_eq!(records[2]["perfSession"]["status"], "cancelled");
    assert_eq!(records[2]["perfSession"]["samples"], 2);

    handle.shutdown();
    loop_thread.join().unwrap();
}
