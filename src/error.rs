// Fatal-path plumbing shared by every component that can hit an
// unrecoverable hardware or initialization error (spec §7).
//
// Every component returns `Result<T, String>` on its own fallible paths;
// this module is only the single funnel that turns "the process cannot
// continue" into the documented cleanup sequence (reset DMA, stop the
// clock, unlink the boundary files, exit(1)).

use std::process;
use std::sync::OnceLock;

use crate::engine::EngineControl;

static TEARDOWN: OnceLock<Box<dyn EngineControl + Send + Sync>> = OnceLock::new();

/// Register the hardware handle used for emergency teardown. Called once,
/// as soon as the DMA engine and clock manager are mapped, so that any
/// fatal error (or signal) occurring afterward can quiesce them.
pub fn install_teardown(control: Box<dyn EngineControl + Send + Sync>) {
    if TEARDOWN.set(control).is_err() {
        log::warn!("teardown handle installed twice; keeping the first one");
    }
}

/// Best-effort hardware quiesce: reset DMA, stop the carrier clock.
/// Safe to call with no handle installed (early startup failures).
pub fn quiesce_hardware() {
    if let Some(control) = TEARDOWN.get() {
        control.reset_dma();
        control.stop_clock();
    }
}

pub fn unlink_boundary_files() {
    for path in crate::boundary::BOUNDARY_PATHS {
        let _ = std::fs::remove_file(path);
    }
}

/// Log a fatal diagnostic, quiesce hardware, unlink boundary files, and
/// exit(1). Never returns. This is the single path every "fatal" branch
/// in spec §7's taxonomy funnels through.
pub fn fatal(msg: impl std::fmt::Display) -> ! {
    log::error!("{msg}");
    quiesce_hardware();
    unlink_boundary_files();
    process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlink_boundary_files_does_not_panic_when_absent() {
        // No files created; should be a silent no-op.
        unlink_boundary_files();
    }
}
