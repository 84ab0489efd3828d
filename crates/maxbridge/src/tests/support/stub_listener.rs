//! Stub listener reproducing the host application's listener contract.
//!
//! The stub accepts on a non-blocking socket polled at a fixed interval, reads
//! one request line per connection, and answers according to a [`Reply`]. It
//! handles connections one at a time, as the real listener does on the host's
//! main thread.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use maxbridge_config::ListenerEndpoint;
use serde_json::{Value, json};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// How the stub answers each request.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    /// Writes the line followed by a newline.
    Line(String),
    /// Sleeps, then writes the line.
    Delayed { delay: Duration, line: String },
    /// Never answers; waits for the client to hang up.
    Silent,
    /// Writes raw bytes without a newline and closes.
    CloseAfter(Vec<u8>),
    /// Answers successfully with the received command text as the result,
    /// echoing any correlation id.
    Echo,
}

/// What the stub observed.
#[derive(Debug, Default, Clone)]
pub(crate) struct StubLog {
    pub(crate) requests: Vec<String>,
    pub(crate) peer_closed: Vec<bool>,
}

pub(crate) struct StubListener {
    port: u16,
    shutdown: Arc<AtomicBool>,
    log: Arc<Mutex<StubLog>>,
    handle: Option<thread::JoinHandle<Result<()>>>,
}

impl StubListener {
    /// Binds an ephemeral loopback port and starts serving.
    pub(crate) fn spawn(reply: Reply) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).context("bind stub listener")?;
        listener
            .set_nonblocking(true)
            .context("stub listener nonblocking")?;
        let port = listener.local_addr().context("local addr")?.port();
        let shutdown = Arc::new(AtomicBool::new(false));
        let log = Arc::new(Mutex::new(StubLog::default()));
        let shutdown_flag = Arc::clone(&shutdown);
        let log_clone = Arc::clone(&log);
        let handle =
            thread::spawn(move || serve(&listener, &reply, &shutdown_flag, &log_clone));
        Ok(Self {
            port,
            shutdown,
            log,
            handle: Some(handle),
        })
    }

    pub(crate) fn endpoint(&self) -> ListenerEndpoint {
        ListenerEndpoint::new("127.0.0.1", self.port)
    }

    /// Stops accepting, waits for in-flight handling, and returns the log.
    pub(crate) fn finish(mut self) -> Result<StubLog> {
        self.stop()?;
        let log = self
            .log
            .lock()
            .map_err(|error| anyhow!("lock stub log: {error}"))?;
        Ok(log.clone())
    }

    fn stop(&mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| anyhow!("stub listener thread panicked"))??;
        }
        Ok(())
    }
}

impl Drop for StubListener {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Returns a loopback endpoint with nothing listening on it.
pub(crate) fn unused_endpoint() -> Result<ListenerEndpoint> {
    let listener = TcpListener::bind(("127.0.0.1", 0)).context("bind probe")?;
    let port = listener.local_addr().context("probe addr")?.port();
    drop(listener);
    Ok(ListenerEndpoint::new("127.0.0.1", port))
}

fn serve(
    listener: &TcpListener,
    reply: &Reply,
    shutdown: &AtomicBool,
    log: &Mutex<StubLog>,
) -> Result<()> {
    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => handle_connection(stream, reply, log)?,
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(POLL_INTERVAL);
            }
            Err(error) => return Err(error).context("accept connection"),
        }
    }
    Ok(())
}

fn handle_connection(stream: TcpStream, reply: &Reply, log: &Mutex<StubLog>) -> Result<()> {
    stream
        .set_nonblocking(false)
        .context("blocking stub stream")?;
    stream
        .set_read_timeout(Some(IO_TIMEOUT))
        .context("stub read timeout")?;
    let mut reader = BufReader::new(stream.try_clone().context("clone stream")?);
    let mut request = String::new();
    if reader.read_line(&mut request).context("read request")? == 0 {
        return Ok(());
    }
    record(log, |entry| entry.requests.push(request.clone()))?;

    let mut writer = stream;
    match reply {
        Reply::Line(line) => {
            let _ = write_line(&mut writer, line);
        }
        Reply::Delayed { delay, line } => {
            thread::sleep(*delay);
            let _ = write_line(&mut writer, line);
        }
        Reply::Silent => {
            let closed = wait_for_peer_close(&mut reader);
            record(log, |entry| entry.peer_closed.push(closed))?;
        }
        Reply::CloseAfter(bytes) => {
            let _ = writer.write_all(bytes);
            let _ = writer.flush();
        }
        Reply::Echo => {
            let _ = write_line(&mut writer, &echo_response(&request)?);
        }
    }
    Ok(())
}

fn wait_for_peer_close(reader: &mut impl Read) -> bool {
    let mut buffer = [0_u8; 64];
    loop {
        match reader.read(&mut buffer) {
            Ok(0) => return true,
            Ok(_) => {}
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            // A reset also means the client let go of the connection.
            Err(error) => return error.kind() == io::ErrorKind::ConnectionReset,
        }
    }
}

fn echo_response(request: &str) -> Result<String> {
    let parsed: Value = serde_json::from_str(request).context("parse request")?;
    let command = parsed
        .get("command")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("request without command: {request}"))?;
    let mut response = json!({ "success": true, "result": command, "error": null });
    if let Some(id) = parsed.get("id") {
        response["id"] = id.clone();
    }
    Ok(response.to_string())
}

fn write_line(stream: &mut impl Write, line: &str) -> io::Result<()> {
    stream.write_all(line.as_bytes())?;
    stream.write_all(b"\n")?;
    stream.flush()
}

fn record(log: &Mutex<StubLog>, update: impl FnOnce(&mut StubLog)) -> Result<()> {
    let mut guard = log
        .lock()
        .map_err(|error| anyhow!("lock stub log: {error}"))?;
    update(&mut guard);
    Ok(())
}
