//! In-memory stand-ins for the radio, flash and sockets, shared by the host tests.
#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use embassy_time::Duration;
use embedded_io_async::{ErrorKind, ErrorType, Read, Write};
use wifi_portal::radio::ScanResults;
use wifi_portal::transport::{Connection, DatagramSocket, Listener};
use wifi_portal::{
    AccessPointConfig, Error, JoinPolicy, NetworkName, PortalConfig, ProfileStorage, Radio,
    Result, WifiAutoConfig,
};

/// Everything the fakes observed, in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Join(String),
    Disconnect,
    Scan,
    ConfigureAccessPoint(AccessPointConfig),
    AccessPointActive(bool),
    DnsBound(u16),
    Listening(u16),
    DnsDropped,
    ListenerDropped,
}

#[derive(Clone, Default)]
pub struct Timeline(Rc<RefCell<Vec<Event>>>);

impl Timeline {
    pub fn push(&self, event: Event) {
        self.0.borrow_mut().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.borrow().clone()
    }

    pub fn joins(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Join(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    pub fn position(&self, wanted: &Event) -> Option<usize> {
        self.events().iter().position(|event| event == wanted)
    }
}

/// Millisecond timings so portal tests finish quickly.
pub fn fast_config() -> WifiAutoConfig {
    WifiAutoConfig::new("ESP32", "password")
        .unwrap()
        .with_join_policy(JoinPolicy {
            poll_interval: Duration::from_millis(1),
            poll_budget: 5,
        })
        .with_portal(PortalConfig {
            dns_idle_delay: Duration::from_millis(1),
            close_delay: Duration::from_millis(5),
            accept_retry_delay: Duration::from_millis(1),
            ..PortalConfig::default()
        })
}

// ============================================================================
// Radio
// ============================================================================

/// Joins succeed for the networks it knows, after `polls_to_associate` polls.
pub struct FakeRadio {
    known: Vec<(String, String)>,
    visible: Vec<String>,
    rejecting: bool,
    polls_to_associate: u32,
    pending: Option<String>,
    polls: Cell<u32>,
    associated: Cell<bool>,
    timeline: Timeline,
}

impl FakeRadio {
    pub fn new(timeline: &Timeline) -> Self {
        Self {
            known: Vec::new(),
            visible: Vec::new(),
            rejecting: false,
            polls_to_associate: 1,
            pending: None,
            polls: Cell::new(0),
            associated: Cell::new(false),
            timeline: timeline.clone(),
        }
    }

    pub fn with_network(mut self, name: &str, secret: &str) -> Self {
        self.known.push((name.to_owned(), secret.to_owned()));
        self
    }

    pub fn with_scan(mut self, names: &[&str]) -> Self {
        self.visible = names.iter().map(|name| (*name).to_owned()).collect();
        self
    }

    /// Every join fails immediately, as when the radio refuses the request.
    pub fn rejecting(mut self) -> Self {
        self.rejecting = true;
        self
    }

    pub fn associating_after(mut self, polls: u32) -> Self {
        self.polls_to_associate = polls;
        self
    }

    /// Network the station is on.
    pub fn joined_network(&self) -> Option<&str> {
        self.pending.as_deref().filter(|_| self.associated.get())
    }
}

impl Radio for FakeRadio {
    async fn join(&mut self, name: &str, secret: &str) -> Result<()> {
        self.timeline.push(Event::Join(name.to_owned()));
        if self.rejecting {
            return Err(Error::JoinFailed(1));
        }
        let accepted = self
            .known
            .iter()
            .any(|(known, pass)| known == name && pass == secret);
        self.pending = accepted.then(|| name.to_owned());
        self.polls.set(0);
        self.associated.set(false);
        Ok(())
    }

    fn is_joined(&self) -> bool {
        if self.pending.is_none() {
            return false;
        }
        let polls = self.polls.get() + 1;
        self.polls.set(polls);
        let associated = polls >= self.polls_to_associate;
        self.associated.set(associated);
        associated
    }

    async fn disconnect(&mut self) {
        self.timeline.push(Event::Disconnect);
        self.pending = None;
        self.associated.set(false);
    }

    async fn scan(&mut self) -> Result<ScanResults> {
        self.timeline.push(Event::Scan);
        let mut results = ScanResults::new();
        for name in &self.visible {
            results
                .push(NetworkName::try_from(name.as_str()).unwrap())
                .unwrap();
        }
        Ok(results)
    }

    async fn configure_access_point(&mut self, config: &AccessPointConfig) -> Result<()> {
        self.timeline
            .push(Event::ConfigureAccessPoint(config.clone()));
        Ok(())
    }

    async fn set_access_point_active(&mut self, active: bool) -> Result<()> {
        self.timeline.push(Event::AccessPointActive(active));
        Ok(())
    }
}

// ============================================================================
// Storage
// ============================================================================

#[derive(Default)]
pub struct MemoryStorage {
    pub contents: Option<Vec<u8>>,
    pub fail_reads: bool,
    pub writes: usize,
}

impl MemoryStorage {
    pub fn with_text(text: &str) -> Self {
        Self {
            contents: Some(text.as_bytes().to_vec()),
            ..Self::default()
        }
    }

    pub fn text(&self) -> Option<String> {
        self.contents
            .as_ref()
            .map(|bytes| String::from_utf8(bytes.clone()).unwrap())
    }
}

impl ProfileStorage for MemoryStorage {
    fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        if self.fail_reads {
            return Err(Error::StorageCorrupted);
        }
        let Some(bytes) = &self.contents else {
            return Ok(None);
        };
        let len = bytes.len().min(buf.len());
        buf[..len].copy_from_slice(&bytes[..len]);
        Ok(Some(len))
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.contents = Some(bytes.to_vec());
        self.writes += 1;
        Ok(())
    }
}

// ============================================================================
// HTTP
// ============================================================================

/// What a closed connection left behind.
#[derive(Clone, Debug)]
pub struct ConnectionRecord {
    pub response: String,
    /// Scripted input chunks the server never read.
    pub unread_chunks: usize,
}

impl ConnectionRecord {
    pub fn status_line(&self) -> &str {
        self.response.lines().next().unwrap_or_default()
    }

    pub fn body(&self) -> &str {
        self.response
            .split_once("\r\n\r\n")
            .map(|(_, body)| body)
            .unwrap_or_default()
    }
}

pub type Transcript = Rc<RefCell<Vec<ConnectionRecord>>>;

/// A client that sends its request in the given chunks, then half-closes.
pub struct ScriptedConnection {
    chunks: VecDeque<Vec<u8>>,
    output: Vec<u8>,
    transcript: Transcript,
    closed: bool,
}

impl ScriptedConnection {
    pub fn new(transcript: &Transcript, chunks: &[&[u8]]) -> Self {
        Self {
            chunks: chunks.iter().map(|chunk| chunk.to_vec()).collect(),
            output: Vec::new(),
            transcript: transcript.clone(),
            closed: false,
        }
    }
}

impl ErrorType for ScriptedConnection {
    type Error = ErrorKind;
}

impl Read for ScriptedConnection {
    async fn read(&mut self, buf: &mut [u8]) -> core::result::Result<usize, ErrorKind> {
        let Some(chunk) = self.chunks.front_mut() else {
            return Ok(0);
        };
        let len = chunk.len().min(buf.len());
        buf[..len].copy_from_slice(&chunk[..len]);
        chunk.drain(..len);
        if chunk.is_empty() {
            self.chunks.pop_front();
        }
        Ok(len)
    }
}

impl Write for ScriptedConnection {
    async fn write(&mut self, buf: &[u8]) -> core::result::Result<usize, ErrorKind> {
        assert!(!self.closed, "write after close");
        self.output.extend_from_slice(buf);
        Ok(buf.len())
    }
}

impl Connection for ScriptedConnection {
    async fn close(&mut self) {
        assert!(!self.closed, "connection closed twice");
        self.closed = true;
        self.transcript.borrow_mut().push(ConnectionRecord {
            response: String::from_utf8_lossy(&self.output).into_owned(),
            unread_chunks: self.chunks.len(),
        });
    }
}

pub enum AcceptStep {
    Client(ScriptedConnection),
    /// The client reset the connection during accept.
    ClientVanished,
    /// The listening socket itself failed.
    Broken,
}

/// Hands out scripted clients in order, then waits forever.
pub struct ScriptedListener {
    steps: VecDeque<AcceptStep>,
    timeline: Timeline,
}

impl ScriptedListener {
    pub fn new(timeline: &Timeline, steps: Vec<AcceptStep>) -> Self {
        Self {
            steps: steps.into(),
            timeline: timeline.clone(),
        }
    }
}

impl Listener for ScriptedListener {
    type Connection<'a>
        = ScriptedConnection
    where
        Self: 'a;

    fn listen(&mut self, port: u16) -> Result<()> {
        self.timeline.push(Event::Listening(port));
        Ok(())
    }

    async fn accept(&mut self) -> Result<ScriptedConnection> {
        match self.steps.pop_front() {
            Some(AcceptStep::Client(conn)) => Ok(conn),
            Some(AcceptStep::ClientVanished) => Err(Error::ConnectionClosed),
            Some(AcceptStep::Broken) => Err(Error::Bind(80)),
            None => core::future::pending().await,
        }
    }
}

impl Drop for ScriptedListener {
    fn drop(&mut self) {
        self.timeline.push(Event::ListenerDropped);
    }
}

pub fn get(transcript: &Transcript, path: &str) -> AcceptStep {
    let request = format!("GET {path} HTTP/1.1\r\nHost: 10.0.0.1\r\n\r\n");
    AcceptStep::Client(ScriptedConnection::new(transcript, &[request.as_bytes()]))
}

pub fn post_configure(transcript: &Transcript, body: &str) -> AcceptStep {
    let request = format!(
        "POST /configure HTTP/1.1\r\nHost: 10.0.0.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    AcceptStep::Client(ScriptedConnection::new(transcript, &[request.as_bytes()]))
}

// ============================================================================
// DNS
// ============================================================================

pub type Outbox = Rc<RefCell<Vec<(Vec<u8>, u16)>>>;

/// Delivers queued datagrams, then reports "nothing waiting" forever.
pub struct FakeDatagramSocket {
    inbound: VecDeque<Result<(Vec<u8>, u16)>>,
    failing_sends: usize,
    outbox: Outbox,
    timeline: Timeline,
}

impl FakeDatagramSocket {
    pub fn new(timeline: &Timeline, inbound: Vec<(Vec<u8>, u16)>) -> Self {
        Self {
            inbound: inbound.into_iter().map(Ok).collect(),
            failing_sends: 0,
            outbox: Outbox::default(),
            timeline: timeline.clone(),
        }
    }

    /// Queue a receive that fails with an I/O error.
    pub fn then_receive_error(mut self) -> Self {
        self.inbound.push_back(Err(Error::Io(ErrorKind::Other)));
        self
    }

    pub fn then_packet(mut self, packet: Vec<u8>, from: u16) -> Self {
        self.inbound.push_back(Ok((packet, from)));
        self
    }

    /// The next `count` sends fail and deliver nothing.
    pub fn failing_sends(mut self, count: usize) -> Self {
        self.failing_sends = count;
        self
    }

    pub fn outbox(&self) -> Outbox {
        self.outbox.clone()
    }
}

impl DatagramSocket for FakeDatagramSocket {
    type Endpoint = u16;

    fn bind(&mut self, port: u16) -> Result<()> {
        self.timeline.push(Event::DnsBound(port));
        Ok(())
    }

    async fn recv_from(&mut self, buf: &mut [u8]) -> Result<(usize, u16)> {
        let (packet, from) = self.inbound.pop_front().ok_or(Error::WouldBlock)??;
        let len = packet.len().min(buf.len());
        buf[..len].copy_from_slice(&packet[..len]);
        Ok((len, from))
    }

    async fn send_to(&mut self, buf: &[u8], remote: u16) -> Result<()> {
        if self.failing_sends > 0 {
            self.failing_sends -= 1;
            return Err(Error::Io(ErrorKind::Other));
        }
        self.outbox.borrow_mut().push((buf.to_vec(), remote));
        Ok(())
    }
}

impl Drop for FakeDatagramSocket {
    fn drop(&mut self) {
        self.timeline.push(Event::DnsDropped);
    }
}

/// A standard A query for `name`, e.g. `captive.example`.
pub fn dns_query(id: u16, name: &str) -> Vec<u8> {
    let mut packet = Vec::new();
    packet.extend_from_slice(&id.to_be_bytes());
    packet.extend_from_slice(&[0x01, 0x00]); // RD
    packet.extend_from_slice(&[0, 1, 0, 0, 0, 0, 0, 0]);
    for label in name.split('.') {
        packet.push(u8::try_from(label.len()).unwrap());
        packet.extend_from_slice(label.as_bytes());
    }
    packet.push(0);
    packet.extend_from_slice(&[0, 1, 0, 1]);
    packet
}
