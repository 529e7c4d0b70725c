//! StatsD backend over UDP.
//!
//! One datagram per call, plain StatsD line protocol:
//! `<prefix>.<name>:<value>|c`, `|g`, `|ms`, `|s`. Keys are flattened with
//! [`flat_name`]; auxiliary tags are not representable and are dropped.
//!
//! A signed gauge value is a delta in StatsD, so a negative gauge goes out
//! as a reset to zero followed by the value, both lines in one datagram.

use std::fmt::Write as _;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use super::{MetricsSink, flat_name};
use crate::error::SinkError;
use crate::key::{MetricKey, Tag};

/// [`MetricsSink`] writing StatsD lines to a UDP endpoint.
#[derive(Debug)]
pub struct StatsdSink {
    socket: UdpSocket,
    target: SocketAddr,
    prefix: Option<String>,
}

impl StatsdSink {
    /// Bind an ephemeral local socket and connect it to `target`.
    pub fn connect(target: impl ToSocketAddrs, prefix: Option<String>) -> io::Result<Self> {
        let target = target
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no statsd address resolved"))?;
        let local: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local)?;
        socket.connect(target)?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket,
            target,
            prefix: prefix.filter(|p| !p.is_empty()),
        })
    }

    /// Remote endpoint.
    pub fn target(&self) -> SocketAddr {
        self.target
    }

    fn line(&self, key: &MetricKey, value: impl std::fmt::Display, unit: &str) -> String {
        let mut line = String::new();
        if let Some(prefix) = &self.prefix {
            line.push_str(prefix);
            line.push('.');
        }
        line.push_str(&sanitize(&flat_name(key, '.')));
        let _ = write!(line, ":{value}|{unit}");
        line
    }

    fn send(&self, line: &str) -> Result<(), SinkError> {
        self.socket.send(line.as_bytes())?;
        Ok(())
    }
}

impl MetricsSink for StatsdSink {
    fn incr_counter(&self, key: &MetricKey, value: f64, _tags: &[Tag]) -> Result<(), SinkError> {
        self.send(&self.line(key, value, "c"))
    }

    fn set_gauge(&self, key: &MetricKey, value: f64, _tags: &[Tag]) -> Result<(), SinkError> {
        if value < 0.0 {
            let mut lines = self.line(key, 0, "g");
            lines.push('\n');
            lines.push_str(&self.line(key, value, "g"));
            return self.send(&lines);
        }
        // -0.0 would render as "-0".
        self.send(&self.line(key, value + 0.0, "g"))
    }

    fn add_sample(&self, key: &MetricKey, seconds: f64, _tags: &[Tag]) -> Result<(), SinkError> {
        self.send(&self.line(key, seconds * 1000.0, "ms"))
    }

    fn add_set_member(&self, key: &MetricKey, member: &str, _tags: &[Tag]) -> Result<(), SinkError> {
        self.send(&self.line(key, sanitize(member), "s"))
    }

    fn name(&self) -> &'static str {
        "statsd"
    }
}

/// StatsD reserves `:`, `|` and `@`; whitespace would split the line.
fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            ':' | '|' | '@' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect()
}
