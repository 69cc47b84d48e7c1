//! A connected GDB client
//!
//! Reads wait with poll(2) on the socket and the shutdown eventfd, so a
//! shutdown request ends a blocked read promptly. Acknowledgements are
//! handled here: valid frames are answered with `+`, corrupt ones with `-`,
//! oversized ones with `+` and an `E01` response, and a `-` from the client
//! resends the last response.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::os::fd::AsFd;
use std::sync::Arc;
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use crate::error::{GdbError, Result};
use crate::notifier::ShutdownNotifier;
use crate::packet::{frame, Packet, PacketDecoder};

const READ_BUFFER_SIZE: usize = 4096;

pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    decoder: PacketDecoder,
    pending: VecDeque<Packet>,
    last_response: Vec<u8>,
    shutdown: Arc<ShutdownNotifier>,
}

/// What a client sent, after acknowledgement handling
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientInput {
    Command(Vec<u8>),
    Interrupt,
}

impl Connection {
    pub fn new(stream: TcpStream, shutdown: Arc<ShutdownNotifier>) -> Result<Self> {
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            peer,
            decoder: PacketDecoder::new(),
            pending: VecDeque::new(),
            last_response: Vec::new(),
            shutdown,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Wait for the next command or interrupt
    ///
    /// Returns `Ok(None)` if `timeout` elapses first. Without a timeout the
    /// wait only ends on input, disconnection or shutdown.
    pub fn read(&mut self, timeout: Option<Duration>) -> Result<Option<ClientInput>> {
        loop {
            while let Some(packet) = self.pending.pop_front() {
                match packet {
                    Packet::Ack => {}
                    Packet::Nack => {
                        log::debug!("Client requested retransmission");
                        let last = self.last_response.clone();
                        self.write_raw(&last)?;
                    }
                    Packet::Corrupt => self.write_raw(b"-")?,
                    Packet::Oversized => {
                        self.write_raw(b"+")?;
                        self.write_response(b"E01")?;
                    }
                    Packet::Interrupt => return Ok(Some(ClientInput::Interrupt)),
                    Packet::Command(body) => {
                        self.write_raw(b"+")?;
                        return Ok(Some(ClientInput::Command(body)));
                    }
                }
            }

            if !self.fill(timeout)? {
                return Ok(None);
            }
        }
    }

    /// Read whatever the socket has, decoding it into pending packets
    fn fill(&mut self, timeout: Option<Duration>) -> Result<bool> {
        let timeout = match timeout {
            Some(t) => PollTimeout::from(u16::try_from(t.as_millis()).unwrap_or(u16::MAX)),
            None => PollTimeout::NONE,
        };

        let (readable, shutdown) = {
            let mut fds = [
                PollFd::new(self.stream.as_fd(), PollFlags::POLLIN),
                PollFd::new(self.shutdown.as_fd(), PollFlags::POLLIN),
            ];
            match poll(&mut fds, timeout) {
                Ok(_) => {}
                Err(Errno::EINTR) => return Ok(false),
                Err(e) => return Err(e.into()),
            }
            (
                fds[0].any().unwrap_or(false),
                fds[1].any().unwrap_or(false),
            )
        };

        if shutdown {
            return Err(GdbError::Interrupted);
        }
        if !readable {
            return Ok(false);
        }

        let mut buffer = [0u8; READ_BUFFER_SIZE];
        let count = self.stream.read(&mut buffer)?;
        if count == 0 {
            return Err(GdbError::ClientDisconnected);
        }

        for byte in &buffer[..count] {
            if let Some(packet) = self.decoder.pump(*byte) {
                self.pending.push_back(packet);
            }
        }
        Ok(true)
    }

    /// Send a response packet
    pub fn write_response(&mut self, payload: &[u8]) -> Result<()> {
        log::trace!("-> ${}", String::from_utf8_lossy(payload));
        let framed = frame(payload);
        self.write_raw(&framed)?;
        self.last_response = framed;
        Ok(())
    }

    fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes)?;
        Ok(())
    }
}
