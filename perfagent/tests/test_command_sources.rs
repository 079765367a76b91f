use perfagent::command::InteractiveSource;
use perfagent::config::{CommandInput, ServerConfig};
use perfagent::server::Server;
use perfagent_common::{EXCEPTION_EVENTS, METHOD_ENTRY_EVENTS, MONITOR_EVENTS, RECEIVE_BUFFER_SIZE};
use serde_json::Value;
use std::fs::File;
use std::io::Write;
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;
use std::thread;
use std::time::Duration;

fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("condition not reached");
}

fn base_config() -> ServerConfig {
    ServerConfig {
        bind_address: "127.0.0.1".parse().unwrap(),
        port: 0,
        poll_interval: Duration::from_millis(10),
        command_interval: Duration::from_millis(30),
        ..ServerConfig::default()
    }
}

#[test]
fn test_scripted_replay_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("commands.json");
    let log_path = dir.path().join("logs.txt");
    std::fs::write(
        &script,
        r#"[
            {"functionality": "exceptionEvents", "command": "start", "sampleRate": 2},
            {"bogus": true},
            {"functionality": "exceptionEvents", "command": "configure", "sampleRate": 0}
        ]"#,
    )
    .unwrap();

    let config = ServerConfig {
        commands: CommandInput::Script(script),
        log_file: Some(log_path.clone()),
        ..base_config()
    };
    let mut server = Server::new(config).unwrap();
    let handle = server.handle();
    let loop_thread = thread::spawn(move || server.run().unwrap());

    let gate = handle.gates().get(EXCEPTION_EVENTS).unwrap();
    wait_for(|| gate.is_active());
    assert_eq!(gate.rate(), 2);
    wait_for(|| !gate.backtrace_enabled());
    assert_eq!(gate.rate(), 2);
    assert!(gate.is_active());

    // Nothing is replayed twice
    thread::sleep(Duration::from_millis(150));
    handle.shutdown();
    loop_thread.join().unwrap();

    let log: Value = serde_json::from_str(&std::fs::read_to_string(&log_path).unwrap()).unwrap();
    let records = log.as_array().unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r["from"] == "commandFile"));
    assert_eq!(records[0]["body"]["command"], "start");
    assert_eq!(records[1]["body"]["command"], "configure");
}

#[test]
fn test_missing_script_degrades() {
    let config = ServerConfig {
        commands: CommandInput::Script("/nonexistent/commands.json".into()),
        ..base_config()
    };
    let mut server = Server::new(config).expect("Missing script must not be fatal");
    let handle = server.handle();
    let loop_thread = thread::spawn(move || server.run().unwrap());

    thread::sleep(Duration::from_millis(100));
    assert!(handle.gates().iter().all(|gate| !gate.is_active()));

    handle.shutdown();
    loop_thread.join().unwrap();
}

#[test]
fn test_interactive_commands() {
    let (input, mut operator) = UnixStream::pair().unwrap();
    let mut server = Server::new(base_config())
        .unwrap()
        .with_command_source(Box::new(InteractiveSource::new("stdin", input)));
    let handle = server.handle();
    let loop_thread = thread::spawn(move || server.run().unwrap());

    operator
        .write_all(b"{\"functionality\":\"monitorEvents\",\"command\":\"start\",\"sampleRate\":4}\n")
        .unwrap();
    let gate = handle.gates().get(MONITOR_EVENTS).unwrap();
    wait_for(|| gate.is_active());
    assert_eq!(gate.rate(), 4);

    operator.write_all(b"{\"functionality\":\"monitorStackTrace\",\"command\":\"stop\"}\n").unwrap();
    wait_for(|| !gate.backtrace_enabled());
    assert!(gate.is_active());

    // End of input leaves the server running
    drop(operator);
    thread::sleep(Duration::from_millis(50));
    assert!(!handle.is_terminating());

    handle.shutdown();
    loop_thread.join().unwrap();
}

#[test]
fn test_interactive_burst_reaches_every_gate() {
    let (input, mut operator) = UnixStream::pair().unwrap();
    let input = File::from(OwnedFd::from(input));
    let mut server = Server::new(base_config())
        .unwrap()
        .with_command_source(Box::new(InteractiveSource::new("stdin", input)));
    let handle = server.handle();
    let loop_thread = thread::spawn(move || server.run().unwrap());

    // Two commands of exactly one receive buffer each, written at once
    let mut burst = String::new();
    for category in [METHOD_ENTRY_EVENTS, EXCEPTION_EVENTS] {
        let command = format!(r#"{{"functionality":"{category}","command":"start"}}"#);
        burst.push_str(&format!("{command:<width$}\n", width = RECEIVE_BUFFER_SIZE - 1));
    }
    assert_eq!(burst.len(), 2 * RECEIVE_BUFFER_SIZE);
    operator.write_all(burst.as_bytes()).unwrap();

    let methods = handle.gates().get(METHOD_ENTRY_EVENTS).unwrap();
    let exceptions = handle.gates().get(EXCEPTION_EVENTS).unwrap();
    wait_for(|| methods.is_active() && exceptions.is_active());

    handle.shutdown();
    loop_thread.join().unwrap();
}

#[test]
fn test_interactive_input_is_logged_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("logs.txt");
    let (input, mut operator) = UnixStream::pair().unwrap();
    let config = ServerConfig { log_file: Some(log_path.clone()), ..base_config() };
    let mut server = Server::new(config)
        .unwrap()
        .with_command_source(Box::new(InteractiveSource::new("stdin", input)));
    let handle = server.handle();
    let loop_thread = thread::spawn(move || server.run().unwrap());

    operator.write_all(b"not json\n").unwrap();
    thread::sleep(Duration::from_millis(50));
    operator
        .write_all(b"{\"functionality\":\"monitorEvents\",\"command\":\"start\",\"extra\":1}\n")
        .unwrap();
    let gate = handle.gates().get(MONITOR_EVENTS).unwrap();
    wait_for(|| gate.is_active());

    handle.shutdown();
    loop_thread.join().unwrap();

    let log: Value = serde_json::from_str(&std::fs::read_to_string(&log_path).unwrap()).unwrap();
    let records = log.as_array().unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r["from"] == "stdin"));
    assert_eq!(records[0]["body"], "not json");
    assert_eq!(records[1]["body"]["extra"], 1);
}
