//! Serve command implementation
//!
//! Opens the debug tool, activates the target on the controller thread and
//! runs the GDB server until SIGINT or SIGTERM arrives.

use std::path::PathBuf;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use avrbridge_controller::{Avr8Target, EventBus, TargetControllerHandle};
use avrbridge_core::description::TargetDescriptionFile;
use avrbridge_edbg::EdbgTool;
use avrbridge_gdb::{GdbServer, ShutdownNotifier};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::config::Config;

/// Command line values that take precedence over the configuration file
#[derive(Debug, Default)]
pub struct ServeOverrides {
    pub port: Option<u16>,
    pub description_file: Option<PathBuf>,
}

/// eventfd the signal handler writes to, or -1
static SHUTDOWN_FD: AtomicI32 = AtomicI32::new(-1);

extern "C" fn request_shutdown(_signal: libc::c_int) {
    let fd = SHUTDOWN_FD.load(Ordering::SeqCst);
    if fd >= 0 {
        let increment: u64 = 1;
        // write(2) is async-signal-safe
        unsafe {
            libc::write(
                fd,
                (&increment as *const u64).cast(),
                std::mem::size_of::<u64>(),
            );
        }
    }
}

fn install_signal_handlers(notifier: &ShutdownNotifier) -> nix::Result<()> {
    SHUTDOWN_FD.store(notifier.raw_fd(), Ordering::SeqCst);
    let action = SigAction::new(
        SigHandler::Handler(request_shutdown),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    for signal in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: the handler only loads an atomic and calls write(2)
        unsafe { sigaction(signal, &action)? };
    }
    Ok(())
}

fn remove_signal_handlers() {
    SHUTDOWN_FD.store(-1, Ordering::SeqCst);
    let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    for signal in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: restores the default disposition
        if let Err(e) = unsafe { sigaction(signal, &action) } {
            log::warn!("Failed to restore {} handler: {}", signal.as_str(), e);
        }
    }
}

pub fn serve(config: &Config, overrides: ServeOverrides) -> Result<(), Box<dyn std::error::Error>> {
    let location = overrides
        .description_file
        .unwrap_or_else(|| config.description_location());
    let description = TargetDescriptionFile::find_and_load(&location, &config.target.name)?;
    log::info!(
        "Loaded target description for {} from {}",
        description.name,
        location.display()
    );

    let tool = EdbgTool::open(config.tool.name, config.tool.serial.as_deref())?;
    log::info!("Opened {}", config.tool.name.display_name());

    let target = Avr8Target::new(Box::new(tool), description.clone(), config.target_config())?;
    let mut controller = TargetControllerHandle::start(target, EventBus::new())?;
    log::info!(
        "Target {} activated over {}",
        description.name,
        config.target.physical_interface
    );

    let shutdown = Arc::new(ShutdownNotifier::new()?);
    install_signal_handlers(&shutdown)?;

    let mut server_config = config.server_config();
    if let Some(port) = overrides.port {
        server_config.port = port;
    }

    let result = GdbServer::bind(
        server_config,
        controller.service().with_timeout(config.command_timeout()),
        controller.events().clone(),
        Arc::new(description),
        shutdown.clone(),
    )
    .and_then(|mut server| server.run());

    remove_signal_handlers();
    log::info!("Shutting down");
    controller.shutdown()?;
    result?;
    Ok(())
}
