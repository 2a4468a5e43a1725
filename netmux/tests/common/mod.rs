#![allow(dead_code)]

use netmux::{NetworkSend, Selector};

use bytes::Bytes;
use rand::Rng;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const BUFFER_SIZE: usize = 4 * 1024;

/// Upper bound for any blocking helper, so a broken selector fails the
/// test instead of hanging it.
pub const DEADLINE: Duration = Duration::from_secs(30);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A peer that reads size-delimited frames and writes each one back.
///
/// One thread accepts, one thread per connection echoes. Test-only.
pub struct EchoServer {
    addr: SocketAddr,
    stop: Arc<AtomicBool>,
    sockets: Arc<Mutex<Vec<TcpStream>>>,
    threads: Arc<Mutex<Vec<JoinHandle<()>>>>,
    acceptor: Option<JoinHandle<()>>,
}

impl EchoServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind echo server");
        let addr = listener.local_addr().expect("Failed to get local address");

        let stop = Arc::new(AtomicBool::new(false));
        let sockets = Arc::new(Mutex::new(Vec::new()));
        let threads = Arc::new(Mutex::new(Vec::new()));

        let acceptor = {
            let stop = stop.clone();
            let sockets = sockets.clone();
            let threads = threads.clone();

            thread::spawn(move || {
                for stream in listener.incoming() {
                    if stop.load(Ordering::SeqCst) {
                        break;
                    }

                    let Ok(stream) = stream else {
                        continue;
                    };

                    if let Ok(clone) = stream.try_clone() {
                        sockets.lock().unwrap().push(clone);
                    }

                    let handle = thread::spawn(move || echo(stream));
                    threads.lock().unwrap().push(handle);
                }
            })
        };

        Self {
            addr,
            stop,
            sockets,
            threads,
            acceptor: Some(acceptor),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Closes every accepted connection; the server keeps accepting.
    pub fn close_connections(&self) {
        for socket in self.sockets.lock().unwrap().drain(..) {
            let _ = socket.shutdown(Shutdown::Both);
        }
    }
}

impl Drop for EchoServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        // Unblock the accept loop.
        let _ = TcpStream::connect(self.addr);

        if let Some(acceptor) = self.acceptor.take() {
            let _ = acceptor.join();
        }

        self.close_connections();

        for handle in self.threads.lock().unwrap().drain(..) {
            let _ = handle.join();
        }
    }
}

fn echo(mut stream: TcpStream) {
    loop {
        let mut header = [0u8; 8];
        if stream.read_exact(&mut header).is_err() {
            break;
        }

        let size = u64::from_be_bytes(header);
        if size < 8 {
            break;
        }

        let mut payload = vec![0u8; size as usize - 8];
        if stream.read_exact(&mut payload).is_err() {
            break;
        }

        if stream.write_all(&header).is_err() || stream.write_all(&payload).is_err() {
            break;
        }
    }

    let _ = stream.shutdown(Shutdown::Both);
}

/// Connects and polls until the handshake is reported.
pub fn blocking_connect(selector: &mut Selector, id: &str, addr: SocketAddr) {
    selector
        .connect(id, addr, BUFFER_SIZE, BUFFER_SIZE)
        .expect("Failed to start connect");

    let started = Instant::now();
    while !selector.connected().iter().any(|c| c == id) {
        assert!(started.elapsed() < DEADLINE, "connect to {addr} timed out");
        assert!(
            !selector.disconnected().iter().any(|c| c == id),
            "connection {id} was refused"
        );
        selector
            .poll(Duration::from_millis(100))
            .expect("Failed to poll");
    }
}

/// Sends one payload and polls until the matching receive arrives.
pub fn blocking_request(selector: &mut Selector, id: &str, payload: &[u8]) -> Bytes {
    blocking_send(selector, NetworkSend::new(id, payload))
}

pub fn blocking_send(selector: &mut Selector, send: NetworkSend) -> Bytes {
    let id = send.connection_id().to_owned();
    selector
        .poll_with(Duration::from_millis(100), [send])
        .expect("Failed to send");

    let started = Instant::now();
    loop {
        if let Some(receive) = selector
            .completed_receives()
            .iter()
            .find(|r| r.connection_id() == id)
        {
            return receive.payload().clone();
        }

        assert!(started.elapsed() < DEADLINE, "request on {id} timed out");
        selector
            .poll(Duration::from_millis(100))
            .expect("Failed to poll");
    }
}

/// Polls until `id` is reported disconnected.
pub fn wait_for_disconnect(selector: &mut Selector, id: &str) {
    let started = Instant::now();
    while !selector.disconnected().iter().any(|c| c == id) {
        assert!(started.elapsed() < DEADLINE, "disconnect of {id} never reported");
        selector
            .poll(Duration::from_millis(100))
            .expect("Failed to poll");
    }
}

/// A port with nothing listening on it.
pub fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
    listener
        .local_addr()
        .expect("Failed to get local address")
        .port()
}

/// Random letters and digits.
pub fn random_string(len: usize) -> String {
    const CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();

    (0..len)
        .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
        .collect()
}
