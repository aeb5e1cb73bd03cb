// psk31: a differentially-encoded PSK31 transmitter driving a Raspberry Pi
// GPIO carrier through a DMA-paced sigma-delta envelope shaper (spec.md).

mod arena;
mod boundary;
mod compiler;
mod config;
mod dma;
mod engine;
mod error;
mod modulator;
mod peripheral;
mod regs;
mod varicode;

use std::os::unix::io::RawFd;

use arena::PinnedArena;
use compiler::CompileOutput;
use config::{Config, ParsedArgs};
use dma::{NUM_ARENA_PAGES, NUM_CB_PAGES, TS_COUNT, TS_US};
use engine::SignalEngine;
use modulator::Modulator;
use peripheral::{PeripheralBase, PeripheralMap};

fn main() {
    env_logger::init();

    let config = match Config::parse(std::env::args()) {
        Ok(ParsedArgs::Run(config)) => config,
        Ok(ParsedArgs::Help) => {
            eprint!("{}", config::HELP_TEXT);
            return;
        }
        Err(e) => {
            eprintln!("psk31: {e}");
            std::process::exit(1);
        }
    };

    log::info!(
        "hardware={:?} rc={}s amplitude={} timeout={} symbol_time={}us buffer_time={}us clock_div={} mash={} frequency={}MHz",
        config.pacing,
        config.rc_seconds,
        config.amplitude,
        config.timeout,
        dma::BS_US,
        TS_COUNT as u32 * TS_US,
        config.clock_div,
        config.mash,
        config.frequency_mhz,
    );

    install_signal_handlers();

    let base = PeripheralBase::detect();
    let peripherals = match PeripheralMap::open(base) {
        Ok(p) => p,
        Err(e) => error::fatal(e),
    };

    let mut arena = match PinnedArena::new(NUM_ARENA_PAGES, NUM_CB_PAGES) {
        Ok(a) => a,
        Err(e) => error::fatal(e),
    };

    peripherals.gpio_set(regs::GPIO_POS_PIN, true);
    peripherals.gpio_set(regs::GPIO_NEG_PIN, false);
    peripherals.gpio_set_mode(regs::GPIO_POS_PIN, regs::GPIO_MODE_OUT);
    peripherals.gpio_set_mode(regs::GPIO_NEG_PIN, regs::GPIO_MODE_OUT);

    let CompileOutput {
        slots,
        level_error_max,
    } = compiler::compile(&mut arena, config.amplitude, config.rc_seconds, config.pacing);
    log::info!(
        "worst-case envelope error: {:.1} mV",
        level_error_max * 3300.0
    );

    let mut engine = SignalEngine::new(peripherals, arena, slots);
    error::install_teardown(Box::new(engine.quiesce_handle()));

    let div_override = if config.clock_div > 0 {
        Some(config.clock_div)
    } else {
        None
    };
    if let Err(e) = engine.clock_start(config.frequency_mhz, div_override, config.mash) {
        log::warn!("clock not started: {e}");
    }

    engine.preload_idle();
    engine.start_dma(config.pacing);

    let listener = match boundary::create_boundary_files() {
        Ok(l) => l,
        Err(e) => error::fatal(e),
    };
    let data_fifo = match boundary::open_data_fifo() {
        Ok(f) => f,
        Err(e) => error::fatal(e),
    };

    let mut modulator = Modulator::new(config.timeout, data_fifo);
    let mut status_server = boundary::StatusServer::new(listener);

    run_event_loop(&mut engine, &mut modulator, &mut status_server, &config);
}

/// The event loop (spec §4.5 "I/O multiplexing"): `libc::poll` over the
/// data FIFO, the status-socket listener, and any accepted status
/// connections with writes pending, timeout `TS_US * TS_COUNT / 4`.
fn run_event_loop(
    engine: &mut SignalEngine,
    modulator: &mut Modulator,
    status_server: &mut boundary::StatusServer,
    config: &Config,
) {
    let timeout_ms = (TS_US as i64 * TS_COUNT as i64 / 4) / 1000;

    loop {
        let mut fds: Vec<libc::pollfd> = Vec::new();
        let data_idx = fds.len();
        fds.push(poll_entry(modulator.data_fifo_fd(), libc::POLLIN));
        let listen_idx = fds.len();
        fds.push(poll_entry(status_server.listener_fd(), libc::POLLIN));
        for fd in status_server.client_fds() {
            fds.push(poll_entry(fd, libc::POLLOUT));
        }

        let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms as i32) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::Interrupted {
                error::fatal(format!("poll error: {err}"));
            }
            continue;
        }

        if fds[listen_idx].revents != 0 {
            let snapshot = boundary::format_status(
                config.amplitude,
                config.rc_seconds,
                engine.clock,
                config.timeout,
                modulator.pending_char_count(),
            );
            status_server.accept_pending(&snapshot);
        }
        status_server.flush_writes();

        if modulator.has_room_for_more_input() && fds[data_idx].revents & libc::POLLIN != 0 {
            modulator.pump_input();
        }

        modulator.feed(engine);
    }
}

fn poll_entry(fd: RawFd, events: libc::c_short) -> libc::pollfd {
    libc::pollfd {
        fd,
        events,
        revents: 0,
    }
}

/// Install the same handler for every catchable signal (spec §7): reset
/// DMA, stop the clock, unlink the boundary files, exit(1).
fn install_signal_handlers() {
    extern "C" fn handle(_signum: libc::c_int) {
        error::quiesce_hardware();
        error::unlink_boundary_files();
        std::process::exit(1);
    }
    for signum in 0..64 {
        unsafe {
            libc::signal(signum, handle as libc::sighandler_t);
        }
    }
}
