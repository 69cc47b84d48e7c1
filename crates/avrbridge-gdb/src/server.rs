//! GDB RSP server loop
//!
//! Accepts one client at a time and runs a [`DebugSession`] for it. A
//! suspended target controller is resumed when a client connects, and with
//! `release_post_debug_session` set it is suspended again when the client
//! goes away, so other tools can use the debugger in between.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::os::fd::AsFd;
use std::sync::Arc;

use avrbridge_controller::{
    ControllerError, EventBus, TargetControllerService, TargetControllerState,
};
use avrbridge_core::description::TargetDescriptionFile;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use crate::connection::Connection;
use crate::descriptor::GdbTargetDescriptor;
use crate::error::{GdbError, Result};
use crate::notifier::ShutdownNotifier;
use crate::session::{DebugSession, SessionEnd};

pub const DEFAULT_PORT: u16 = 1442;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub listen_address: IpAddr,
    pub port: u16,
    /// Suspend the target controller when a client disconnects
    pub release_post_debug_session: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            release_post_debug_session: false,
        }
    }
}

pub struct GdbServer {
    listener: TcpListener,
    config: ServerConfig,
    service: TargetControllerService,
    events: EventBus,
    description: Arc<TargetDescriptionFile>,
    shutdown: Arc<ShutdownNotifier>,
}

impl GdbServer {
    pub fn bind(
        config: ServerConfig,
        service: TargetControllerService,
        events: EventBus,
        description: Arc<TargetDescriptionFile>,
        shutdown: Arc<ShutdownNotifier>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(SocketAddr::new(config.listen_address, config.port))?;
        Ok(Self {
            listener,
            config,
            service,
            events,
            description,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve clients until shutdown is requested
    pub fn run(&mut self) -> Result<()> {
        log::info!("GDB RSP server listening on {}", self.local_addr()?);

        while let Some(stream) = self.accept()? {
            match self.serve(stream) {
                Ok(SessionEnd::Shutdown) => break,
                Ok(_) => {}
                Err(GdbError::Controller(ControllerError::ShutDown)) => {
                    return Err(GdbError::Controller(ControllerError::ShutDown));
                }
                Err(e) => log::error!("Debug session failed: {}", e),
            }
        }

        log::info!("GDB RSP server stopped");
        Ok(())
    }

    /// Wait for a client, or `None` once shutdown is requested
    fn accept(&self) -> Result<Option<TcpStream>> {
        loop {
            let (incoming, shutdown) = {
                let mut fds = [
                    PollFd::new(self.listener.as_fd(), PollFlags::POLLIN),
                    PollFd::new(self.shutdown.as_fd(), PollFlags::POLLIN),
                ];
                match poll(&mut fds, PollTimeout::NONE) {
                    Ok(_) => {}
                    Err(Errno::EINTR) => continue,
                    Err(e) => return Err(e.into()),
                }
                (
                    fds[0].any().unwrap_or(false),
                    fds[1].any().unwrap_or(false),
                )
            };

            if shutdown {
                return Ok(None);
            }
            if incoming {
                let (stream, _) = self.listener.accept()?;
                return Ok(Some(stream));
            }
        }
    }

    fn serve(&mut self, stream: TcpStream) -> Result<SessionEnd> {
        let connection = Connection::new(stream, self.shutdown.clone())?;
        log::info!("GDB client connected from {}", connection.peer());

        if self.service.controller_state()? == TargetControllerState::Suspended {
            log::info!("Resuming target controller");
            self.service.resume()?;
        }

        let descriptor = GdbTargetDescriptor::new(self.service.target_descriptor()?);
        let mut session = DebugSession::new(
            connection,
            self.service.clone(),
            self.events.clone(),
            descriptor,
            self.description.clone(),
        );
        let end = session.run();
        drop(session);

        match &end {
            Ok(end) => log::info!("Debug session ended ({:?})", end),
            Err(e) => log::warn!("Debug session aborted: {}", e),
        }

        if self.config.release_post_debug_session {
            log::info!("Releasing target controller");
            if let Err(e) = self.service.suspend() {
                log::error!("Failed to suspend target controller: {}", e);
            }
        }

        end
    }
}
