//! End-to-end runs over a real loopback connection

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::thread;

use clap::Parser;
use echo_bench::benchmark::{CancelFlag, Orchestrator};
use echo_bench::config::{BenchmarkConfig, CliArgs};

/// Byte echo server accepting a single connection
fn spawn_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            stream.set_nodelay(true).ok();
            let mut buf = [0u8; 16 * 1024];
            loop {
                match stream.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if stream.write_all(&buf[..n]).is_err() {
                            break;
                        }
                    }
                }
            }
        }
    });
    addr
}

fn config(addr: SocketAddr, extra: &[&str]) -> BenchmarkConfig {
    let port = addr.port().to_string();
    let mut argv = vec!["echo-bench", "-s", "127.0.0.1", "-p", port.as_str(), "-q"];
    argv.extend_from_slice(extra);
    BenchmarkConfig::from_cli(&CliArgs::parse_from(argv)).unwrap()
}

#[test]
fn test_simple_mode_over_tcp() {
    let addr = spawn_echo();
    let orchestrator = Orchestrator::new(config(addr, &["-c", "4", "-i", "200"]), CancelFlag::new());
    let report = orchestrator.run().unwrap();

    assert!(!report.interrupted);
    assert_eq!(report.counters.sent, 200);
    assert_eq!(report.counters.received, 200);
    assert_eq!(report.counters.iterations_remaining, 0);
    assert_eq!(report.latency.count, 200);
}

#[test]
fn test_wait_all_mode_over_tcp() {
    let addr = spawn_echo();
    let orchestrator = Orchestrator::new(
        config(addr, &["-c", "3", "-i", "30", "--wait-all", "--system", "resp"]),
        CancelFlag::new(),
    );
    let report = orchestrator.run().unwrap();

    assert_eq!(report.counters.received, 30);
    assert_eq!(report.latency.count, 10);
}

#[test]
fn test_reliable_mode_over_tcp() {
    let addr = spawn_echo();
    // Generous timeout so a loaded test machine does not trigger resends
    let orchestrator = Orchestrator::new(
        config(
            addr,
            &["-c", "2", "-i", "100", "--retries", "--timeout-us", "2000000", "--system", "memcpy"],
        ),
        CancelFlag::new(),
    );
    let report = orchestrator.run().unwrap();

    assert_eq!(report.mode, "reliable");
    assert_eq!(report.counters.received, report.counters.sent);
    assert_eq!(report.counters.received, 101);
    assert_eq!(report.latency.count, 100);
}

#[test]
fn test_connect_refused_is_fatal() {
    let addr = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
    let orchestrator = Orchestrator::new(config(addr, &[]), CancelFlag::new());
    assert!(orchestrator.run().is_err());
}
