//! TCP transport for one request/response exchange.
//!
//! A [`Connection`] is opened for a single call and dropped when the call
//! ends, which closes the descriptor on every exit path. Every socket
//! operation is bounded by the call's deadline: socket timeouts are reset to
//! the remaining time before every write and read, so a listener that trickles
//! bytes cannot stretch the call past its deadline.

use std::io::{self, Read, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use tracing::debug;

use maxbridge_config::ListenerEndpoint;

use crate::protocol::FRAME_DELIMITER;

const TRANSPORT_TARGET: &str = "maxbridge::transport";
const READ_CHUNK_BYTES: usize = 4096;

/// Why a connection attempt failed.
#[derive(Debug)]
pub(crate) enum ConnectFailure {
    Resolve(io::Error),
    Connect(io::Error),
}

/// Why writing the request failed.
#[derive(Debug)]
pub(crate) enum WriteFailure {
    /// The deadline had passed before any byte was written.
    DeadlineBeforeWrite,
    /// The deadline passed part-way through the write.
    DeadlineElapsed,
    Io(io::Error),
}

/// Why no response line was obtained.
#[derive(Debug)]
pub(crate) enum ReadFailure {
    DeadlineElapsed,
    Closed { received: usize },
    TooLarge { limit: usize },
    Io(io::Error),
}

/// An open connection to the listener.
#[derive(Debug)]
pub(crate) struct Connection {
    stream: TcpStream,
}

impl Connection {
    /// Connects to the endpoint, giving up after `timeout`.
    ///
    /// Each resolved address is tried in turn; the last failure is reported.
    pub(crate) fn open(
        endpoint: &ListenerEndpoint,
        timeout: Duration,
    ) -> Result<Self, ConnectFailure> {
        let addresses = resolve(endpoint).map_err(ConnectFailure::Resolve)?;
        let mut last_error = None;
        for address in addresses {
            match TcpStream::connect_timeout(&address, timeout) {
                Ok(stream) => {
                    // Requests are written in one call; waiting to coalesce
                    // only adds latency.
                    stream.set_nodelay(true).map_err(ConnectFailure::Connect)?;
                    debug!(
                        target: TRANSPORT_TARGET,
                        %address,
                        "connected to listener"
                    );
                    return Ok(Self { stream });
                }
                Err(error) => last_error = Some(error),
            }
        }
        Err(ConnectFailure::Connect(last_error.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, "no resolved addresses")
        })))
    }

    /// Writes a complete frame before the deadline.
    pub(crate) fn write_frame(&mut self, frame: &[u8], deadline: Instant) -> Result<(), WriteFailure> {
        let remaining = remaining_until(deadline).ok_or(WriteFailure::DeadlineBeforeWrite)?;
        self.stream
            .set_write_timeout(Some(remaining))
            .map_err(WriteFailure::Io)?;
        self.stream
            .write_all(frame)
            .and_then(|()| self.stream.flush())
            .map_err(|error| {
                if is_timeout(&error) {
                    WriteFailure::DeadlineElapsed
                } else {
                    WriteFailure::Io(error)
                }
            })
    }

    /// Reads bytes up to the first delimiter, which is not included.
    ///
    /// Bytes after the delimiter are discarded: a connection carries a single
    /// response.
    pub(crate) fn read_frame(
        &mut self,
        deadline: Instant,
        limit: usize,
    ) -> Result<Vec<u8>, ReadFailure> {
        let mut line = Vec::new();
        let mut chunk = [0_u8; READ_CHUNK_BYTES];
        loop {
            let remaining = remaining_until(deadline).ok_or(ReadFailure::DeadlineElapsed)?;
            self.stream
                .set_read_timeout(Some(remaining))
                .map_err(ReadFailure::Io)?;
            let count = match self.stream.read(&mut chunk) {
                Ok(0) => {
                    return Err(ReadFailure::Closed {
                        received: line.len(),
                    });
                }
                Ok(count) => count,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) if is_timeout(&error) => continue,
                Err(error) => return Err(ReadFailure::Io(error)),
            };
            let received = chunk.get(..count).unwrap_or_default();
            if let Some(position) = received.iter().position(|byte| *byte == FRAME_DELIMITER) {
                line.extend_from_slice(received.get(..position).unwrap_or_default());
                return check_limit(line, limit);
            }
            line.extend_from_slice(received);
            if line.len() > limit {
                return Err(ReadFailure::TooLarge { limit });
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // The peer may already be gone; the descriptor closes regardless.
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

fn check_limit(line: Vec<u8>, limit: usize) -> Result<Vec<u8>, ReadFailure> {
    if line.len() > limit {
        Err(ReadFailure::TooLarge { limit })
    } else {
        Ok(line)
    }
}

/// Turns the endpoint into socket addresses.
///
/// Literal addresses and `localhost` resolve without a lookup. Any other host
/// name goes through the system resolver, which blocks for as long as the
/// resolver takes; neither the call deadline nor the connect timeout bounds
/// that lookup.
fn resolve(endpoint: &ListenerEndpoint) -> io::Result<Vec<SocketAddr>> {
    let port = endpoint.port();
    if let Ok(address) = endpoint.host().parse::<IpAddr>() {
        return Ok(vec![SocketAddr::new(address, port)]);
    }
    if endpoint.host().eq_ignore_ascii_case("localhost") {
        return Ok(vec![
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port),
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), port),
        ]);
    }
    let addresses: Vec<SocketAddr> = (endpoint.host(), port).to_socket_addrs()?.collect();
    if addresses.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            "no resolved addresses",
        ));
    }
    Ok(addresses)
}

/// Time left before `deadline`, or `None` once it has passed.
///
/// Zero is folded into `None` because socket timeouts reject it.
pub(crate) fn remaining_until(deadline: Instant) -> Option<Duration> {
    deadline
        .checked_duration_since(Instant::now())
        .filter(|remaining| !remaining.is_zero())
}

fn is_timeout(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;
    use std::thread;

    use super::*;

    fn listener() -> (TcpListener, ListenerEndpoint) {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind listener");
        let port = listener.local_addr().expect("local addr").port();
        (listener, ListenerEndpoint::new("127.0.0.1", port))
    }

    fn deadline_in(millis: u64) -> Instant {
        Instant::now() + Duration::from_millis(millis)
    }

    #[test]
    fn reads_one_line_split_across_writes() {
        let (listener, endpoint) = listener();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            stream.write_all(b"{\"succ").expect("first half");
            stream.flush().expect("flush");
            thread::sleep(Duration::from_millis(20));
            stream
                .write_all(b"ess\":true}\n{\"ignored\":1}\n")
                .expect("second half");
        });

        let mut connection =
            Connection::open(&endpoint, Duration::from_secs(1)).expect("connect");
        let line = connection
            .read_frame(deadline_in(2_000), 1024)
            .expect("read line");
        assert_eq!(line, b"{\"success\":true}".to_vec());
        server.join().expect("server thread");
    }

    #[test]
    fn writes_frame_verbatim() {
        let (listener, endpoint) = listener();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            let mut line = String::new();
            BufReader::new(stream).read_line(&mut line).expect("read");
            line
        });

        let mut connection =
            Connection::open(&endpoint, Duration::from_secs(1)).expect("connect");
        connection
            .write_frame(b"{\"command\":\"1+1\"}\n", deadline_in(1_000))
            .expect("write frame");
        let received = server.join().expect("server thread");
        assert_eq!(received, "{\"command\":\"1+1\"}\n");
    }

    #[test]
    fn reports_close_without_delimiter() {
        let (listener, endpoint) = listener();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            stream.write_all(b"{\"success\":tr").expect("partial");
        });

        let mut connection =
            Connection::open(&endpoint, Duration::from_secs(1)).expect("connect");
        server.join().expect("server thread");
        let failure = connection
            .read_frame(deadline_in(2_000), 1024)
            .expect_err("must fail");
        assert!(
            matches!(failure, ReadFailure::Closed { received: 13 }),
            "unexpected failure: {failure:?}"
        );
    }

    #[test]
    fn enforces_the_size_limit() {
        let (listener, endpoint) = listener();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let _ = stream.write_all(&[b'x'; 64]);
            let _ = stream.write_all(b"\n");
        });

        let mut connection =
            Connection::open(&endpoint, Duration::from_secs(1)).expect("connect");
        let failure = connection
            .read_frame(deadline_in(2_000), 16)
            .expect_err("must fail");
        assert!(matches!(failure, ReadFailure::TooLarge { limit: 16 }));
        server.join().expect("server thread");
    }

    #[test]
    fn gives_up_at_the_deadline() {
        let (listener, endpoint) = listener();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            thread::sleep(Duration::from_millis(400));
            drop(stream);
        });

        let mut connection =
            Connection::open(&endpoint, Duration::from_secs(1)).expect("connect");
        let started = Instant::now();
        let failure = connection
            .read_frame(deadline_in(100), 1024)
            .expect_err("must time out");
        assert!(matches!(failure, ReadFailure::DeadlineElapsed));
        assert!(started.elapsed() < Duration::from_millis(350));
        server.join().expect("server thread");
    }

    #[test]
    fn refused_connection_is_reported() {
        let (listener, endpoint) = listener();
        drop(listener);
        let failure =
            Connection::open(&endpoint, Duration::from_secs(1)).expect_err("must refuse");
        assert!(matches!(failure, ConnectFailure::Connect(_)));
    }

    #[test]
    fn elapsed_deadline_stops_the_write_before_any_byte() {
        let (listener, endpoint) = listener();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            let mut line = String::new();
            BufReader::new(stream).read_line(&mut line).expect("read");
            line
        });

        let mut connection =
            Connection::open(&endpoint, Duration::from_secs(1)).expect("connect");
        let failure = connection
            .write_frame(b"{\"command\":\"1+1\"}\n", Instant::now())
            .expect_err("deadline already passed");
        assert!(matches!(failure, WriteFailure::DeadlineBeforeWrite));
        drop(connection);
        assert_eq!(server.join().expect("server thread"), "");
    }

    #[test]
    fn literal_and_localhost_hosts_skip_the_resolver() {
        let literal = resolve(&ListenerEndpoint::new("127.0.0.1", 8765)).expect("literal");
        assert_eq!(literal, vec![SocketAddr::from(([127, 0, 0, 1], 8765))]);

        let ipv6 = resolve(&ListenerEndpoint::new("::1", 8765)).expect("ipv6 literal");
        assert_eq!(ipv6, vec![SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), 8765)]);

        let local = resolve(&ListenerEndpoint::new("LocalHost", 9000)).expect("localhost");
        assert!(local.iter().all(|address| address.ip().is_loopback()));
        assert!(local.iter().all(|address| address.port() == 9000));
    }

    #[test]
    fn elapsed_deadline_has_no_remaining_time() {
        assert!(remaining_until(Instant::now()).is_none());
        assert!(remaining_until(deadline_in(1_000)).is_some());
    }
}
