//! Remote task protocol integration tests
//!
//! A loopback TCP pair stands in for the SSH command channel: the near end
//! implements `CommandStream`, the far end runs the real worker bootstrap on
//! its own thread, the way the deployed executable would after parsing the
//! bootstrap command line. The worker thread's return value plays the role
//! of the remote process exit status.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use tether::config::{ConnectionParameters, SshIdentity};
use tether::error::TetherError;
use tether::protocol;
use tether::remote::{self, NodeSettings};
use tether::session::CommandStream;
use tether::task::{TaskDescriptor, TaskRegistry, ECHO_TASK};
use tether::Result;

/// Near end of the loopback channel. `finish` reports the worker thread's
/// result as the exit status, unless a scripted status overrides it.
struct LoopbackChannel {
    stream: TcpStream,
    worker: Option<JoinHandle<i32>>,
    last_status: i32,
    eof_sent: bool,
    status_override: Option<i32>,
}

impl Read for LoopbackChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for LoopbackChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl CommandStream for LoopbackChannel {
    fn send_eof(&mut self) -> Result<()> {
        self.stream
            .shutdown(Shutdown::Write)
            .map_err(|e| TetherError::Protocol(format!("send eof failed: {}", e)))?;
        self.eof_sent = true;
        Ok(())
    }

    fn drain(&mut self) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        self.stream
            .read_to_end(&mut output)
            .map_err(|e| TetherError::Protocol(format!("channel drain failed: {}", e)))?;
        Ok(output)
    }

    fn finish(&mut self) -> Result<i32> {
        if !self.eof_sent {
            let _ = self.stream.shutdown(Shutdown::Write);
            self.eof_sent = true;
        }
        if let Some(handle) = self.worker.take() {
            self.last_status = handle.join().expect("worker thread panicked");
        }
        Ok(self.status_override.unwrap_or(self.last_status))
    }
}

fn parameters() -> ConnectionParameters {
    ConnectionParameters::new(
        SshIdentity::new("tester", "/keys/id"),
        "target/release/tether",
        "/opt/tether/tether",
    )
    .with_credentials("opaque-token")
}

fn settings() -> NodeSettings {
    NodeSettings::new("127.0.0.1", 9000, "workers")
}

/// Start a worker-bootstrap thread on a loopback socket and connect to it.
/// `node` is what the deployed executable would have parsed from its
/// bootstrap command line.
fn launch_worker(build_registry: fn() -> TaskRegistry, node: NodeSettings) -> LoopbackChannel {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
    let addr = listener.local_addr().unwrap();

    let worker = std::thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept controller");
        let mut reader = stream.try_clone().expect("clone stream");
        let mut writer = stream;
        let registry = build_registry();
        match remote::serve(&mut reader, &mut writer, &registry, node) {
            Ok(()) => 0,
            Err(_) => 1,
        }
    });

    let stream = TcpStream::connect(addr).expect("connect to worker");
    LoopbackChannel {
        stream,
        worker: Some(worker),
        last_status: 0,
        eof_sent: false,
        status_override: None,
    }
}

#[test]
fn call_mode_echo_returns_sent_string() {
    let mut channel = launch_worker(TaskRegistry::with_builtins, settings());
    let descriptor = TaskDescriptor::new(ECHO_TASK, &()).unwrap();

    let reply: String = protocol::call_over(&mut channel, &descriptor, &parameters(), |ch| {
        ch.send(&"ping".to_string())?;
        ch.receive()
    })
    .unwrap();

    assert_eq!(reply, "ping");
}

#[test]
fn call_mode_echo_handles_payload_larger_than_read_unit() {
    let mut channel = launch_worker(TaskRegistry::with_builtins, settings());
    let descriptor = TaskDescriptor::new(ECHO_TASK, &()).unwrap();
    let payload: Vec<u8> = (0..20_000).map(|i| (i % 255) as u8).collect();

    let sent = payload.clone();
    let reply: Vec<u8> = protocol::call_over(&mut channel, &descriptor, &parameters(), move |ch| {
        ch.send(&sent)?;
        ch.receive()
    })
    .unwrap();

    assert_eq!(reply, payload);
}

fn failing_registry() -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    registry.register("divide", |_, _| {
        Err(TetherError::Protocol("division by zero".to_string()))
    });
    registry
}

#[test]
fn call_mode_remote_failure_raises_locally_and_exits_nonzero() {
    let mut channel = launch_worker(failing_registry, settings());
    let descriptor = TaskDescriptor::new("divide", &()).unwrap();

    let err = protocol::call_over(&mut channel, &descriptor, &parameters(), |ch| {
        ch.receive::<String>()
    })
    .unwrap_err();

    match &err {
        TetherError::Remote(description) => {
            assert!(
                description.contains("division by zero"),
                "description should carry the remote failure text, got: {}",
                description
            );
        }
        other => panic!("Expected Remote, got {:?}", other),
    }

    // The same failure is observed on the worker's end as a non-zero exit.
    assert_eq!(channel.finish().unwrap(), 1);
}

static LISTENER_STOPPED: AtomicBool = AtomicBool::new(false);

fn listener_registry() -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    registry.register("listen", |_, ctx| {
        assert!(ctx.node().background, "spawned worker must see --background");
        assert_eq!(ctx.parameters().credentials.as_deref(), Some("opaque-token"));
        // The listener detaches and outlives the bootstrap.
        std::thread::spawn(|| {
            std::thread::sleep(Duration::from_millis(200));
            LISTENER_STOPPED.store(true, Ordering::SeqCst);
        });
        Ok(())
    });
    registry
}

#[test]
fn spawn_mode_returns_without_waiting_for_the_listener() {
    // The session wrapper forces the background flag onto the command line;
    // the worker side parses it back into its node settings.
    let mut channel = launch_worker(listener_registry, settings().background());

    let descriptor = TaskDescriptor::new("listen", &()).unwrap();
    protocol::spawn_over(&mut channel, &descriptor, &parameters()).unwrap();

    // Control came back while the detached listener was still running.
    assert!(
        !LISTENER_STOPPED.load(Ordering::SeqCst),
        "spawn waited for the listener to stop"
    );

    std::thread::sleep(Duration::from_millis(600));
    assert!(
        LISTENER_STOPPED.load(Ordering::SeqCst),
        "listener never ran to completion"
    );
}

fn noop_registry() -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    registry.register("nop", |_, _| Ok(()));
    registry
}

#[test]
fn spawn_mode_gates_on_exit_status() {
    let mut channel = launch_worker(noop_registry, settings().background());
    channel.status_override = Some(2);

    let descriptor = TaskDescriptor::new("nop", &()).unwrap();
    let err = protocol::spawn_over(&mut channel, &descriptor, &parameters()).unwrap_err();

    assert!(matches!(err, TetherError::NonZeroExit { status: 2, .. }));
}

#[test]
fn call_mode_gates_on_exit_status_even_after_clean_frames() {
    let mut channel = launch_worker(TaskRegistry::with_builtins, settings());
    channel.status_override = Some(3);

    let descriptor = TaskDescriptor::new(ECHO_TASK, &()).unwrap();
    let err = protocol::call_over(&mut channel, &descriptor, &parameters(), |ch| {
        ch.send(&"ping".to_string())?;
        // The reply arrives intact; only the exit status is bad.
        let reply: String = ch.receive()?;
        assert_eq!(reply, "ping");
        Ok(reply)
    })
    .unwrap_err();

    assert!(matches!(err, TetherError::NonZeroExit { status: 3, .. }));
}

#[test]
fn spawn_mode_fails_on_unknown_task_key() {
    let mut channel = launch_worker(noop_registry, settings().background());

    let descriptor = TaskDescriptor::new("never-registered", &()).unwrap();
    let err = protocol::spawn_over(&mut channel, &descriptor, &parameters()).unwrap_err();

    // The worker flags the unknown key and exits non-zero; spawn only sees
    // the exit status because it discards the output.
    assert!(matches!(err, TetherError::NonZeroExit { status: 1, .. }));
}

#[test]
fn worker_rejects_bytes_before_the_bootstrap_frames() {
    // Bypass the protocol layer and violate the wire order on purpose.
    let mut channel = launch_worker(TaskRegistry::with_builtins, settings());
    channel.stream.write_all(&[0xDE, 0xAD]).unwrap();
    channel.send_eof().unwrap();

    assert_eq!(channel.finish().unwrap(), 1, "worker accepted a torn frame");
}
