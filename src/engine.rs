// Signal Engine (spec §4.4): programs the carrier clock and pacing
// peripheral, starts the DMA ring, and exposes the ring-cursor operations
// (`pending`, `enqueue`) the modulation driver uses to keep it fed.

use crate::arena::PinnedArena;
use crate::compiler::PacingHw;
use crate::dma::{Symbol, TimeSlot, TS_COUNT};
use crate::peripheral::PeripheralMap;
use crate::regs;

/// Hardware actions the teardown path (fatal error or signal) needs to be
/// able to trigger without touching the rest of the engine's state (spec
/// §7). Implemented by `QuiesceHandle`, which is all raw pointers and so
/// safe to keep in a `'static` slot regardless of what else is alive.
pub trait EngineControl {
    fn reset_dma(&self);
    fn stop_clock(&self);
}

/// A lightweight handle carrying just enough to quiesce the hardware:
/// the DMA and clock-manager windows, held as raw pointers so it can
/// outlive (or be reached independently of) the rest of `SignalEngine`.
pub struct QuiesceHandle {
    dma: *const crate::peripheral::MappedWindow,
    clk: *const crate::peripheral::MappedWindow,
}

// SAFETY: both pointers address long-lived `MappedWindow`s owned by the
// `SignalEngine` that built this handle, which never moves or drops them
// before process exit. This handle exists only to be reachable from the
// signal-handler teardown path (spec §7).
unsafe impl Send for QuiesceHandle {}
unsafe impl Sync for QuiesceHandle {}

impl EngineControl for QuiesceHandle {
    fn reset_dma(&self) {
        unsafe {
            (*self.dma).write(regs::DMA_CS, regs::DMA_RESET);
        }
        std::thread::sleep(std::time::Duration::from_micros(10));
    }

    fn stop_clock(&self) {
        unsafe {
            let ctl = (*self.clk).read(regs::CM_GP0CTL);
            (*self.clk).write(regs::CM_GP0CTL, regs::CM_PASSWORD | (ctl & 0x0000_070f));
            while (*self.clk).read(regs::CM_GP0CTL) & 0x0000_0080 != 0 {
                std::hint::spin_loop();
            }
        }
    }
}

/// MASH feasibility table: `{divi_min, divi_dec, divi_inc}` per stage
/// count, used to pick the lowest MASH order (quietest spur spectrum)
/// that the chosen divisor can still support (spec §4.4).
struct MashLimits {
    divi_min: u32,
    divi_dec: u32,
    divi_inc: u32,
}

const MASH_TABLE: [MashLimits; 3] = [
    MashLimits {
        divi_min: 2,
        divi_dec: 0,
        divi_inc: 1,
    },
    MashLimits {
        divi_min: 3,
        divi_dec: 1,
        divi_inc: 2,
    },
    MashLimits {
        divi_min: 5,
        divi_dec: 3,
        divi_inc: 4,
    },
];

const PLLD_HZ: f64 = 500.0;

#[derive(Debug, Clone, Copy)]
pub struct ClockStatus {
    pub div: u32,
    pub mash: i32,
}

impl ClockStatus {
    pub fn freq_mhz(&self) -> f64 {
        if self.div == 0 {
            0.0
        } else {
            PLLD_HZ * (1u32 << 12) as f64 / self.div as f64
        }
    }
}

pub struct SignalEngine {
    pub peripherals: PeripheralMap,
    pub arena: PinnedArena,
    pub slots: [TimeSlot; TS_COUNT],
    pub clock: ClockStatus,
    ts_last: usize,
    ts_last_cb_offset: Option<u32>,
    ts_last_sym: Symbol,
}

impl SignalEngine {
    pub fn new(peripherals: PeripheralMap, arena: PinnedArena, slots: [TimeSlot; TS_COUNT]) -> Self {
        Self {
            peripherals,
            arena,
            slots,
            clock: ClockStatus { div: 0, mash: 0 },
            ts_last: 0,
            ts_last_cb_offset: None,
            ts_last_sym: Symbol::H,
        }
    }

    /// Raw handle for `error::install_teardown`, valid for as long as this
    /// engine's `peripherals` field is not moved (it isn't — the engine
    /// lives in a single owned slot in `main` for the life of the
    /// process).
    pub fn quiesce_handle(&self) -> QuiesceHandle {
        QuiesceHandle {
            dma: &self.peripherals.dma as *const _,
            clk: &self.peripherals.clk as *const _,
        }
    }

    fn clock_stop(&self) {
        let ctl = self.peripherals.clk.read(regs::CM_GP0CTL);
        self.peripherals
            .clk
            .write(regs::CM_GP0CTL, regs::CM_PASSWORD | (ctl & 0x0000_070f));
        while self.peripherals.clk.read(regs::CM_GP0CTL) & 0x0000_0080 != 0 {
            std::hint::spin_loop();
        }
    }

    /// Program the fractional-N divider and MASH stage count, then enable
    /// the clock on GPIO4 (spec §4.4). `div_override`, if `Some`, takes
    /// the divisor directly (12.12 fixed point) rather than deriving one
    /// from `frequency_khz`; `mash_override` pins the stage count instead
    /// of auto-selecting it.
    pub fn clock_start(
        &mut self,
        frequency_mhz: f64,
        div_override: Option<u32>,
        mash_override: i32,
    ) -> Result<(), String> {
        self.clock_stop();

        let div = if let Some(d) = div_override {
            if d == 0 || d > 0x00fff000 {
                return Err(format!("clock divisor {d:#x} out of range"));
            }
            d
        } else {
            if frequency_mhz < PLLD_HZ * (1u32 << 12) as f64 / 0x00fff000 as f64 {
                return Err(format!("frequency {frequency_mhz} MHz too low for GP0"));
            }
            ((PLLD_HZ / frequency_mhz) * (1u32 << 12) as f64 + 0.5) as u32
        };

        self.peripherals
            .gpio_set_mode(regs::GPIO_CARRIER_PIN, regs::GPIO_MODE_ALT0);

        let divi = div >> 12;
        if divi < 1 || div > 0x00fff000 {
            return Err(format!("clock divisor {div:#x} out of range"));
        }
        self.peripherals
            .clk
            .write(regs::CM_GP0DIV, regs::CM_PASSWORD | div);

        let mash: u32 = if (-3..=0).contains(&mash_override) {
            (-mash_override) as u32
        } else {
            let mut mash = mash_override.min(3).max(0) as u32;
            while mash > 0 {
                let limits = &MASH_TABLE[(mash - 1) as usize];
                if divi >= limits.divi_min
                    && divi >= 500 / 25 + limits.divi_dec
                    && divi <= 4095 - limits.divi_inc
                {
                    break;
                }
                mash -= 1;
            }
            mash
        };

        let ctl = regs::CM_PASSWORD | 0x0000_0006 | (mash << 9);
        self.peripherals.clk.write(regs::CM_GP0CTL, ctl);
        self.peripherals.clk.write(regs::CM_GP0CTL, ctl | 0x0000_0010);

        self.clock = ClockStatus {
            div,
            mash: mash as i32,
        };
        Ok(())
    }

    /// Initialize the pacing peripheral and start the DMA ring at time
    /// slot 0's `H` chain (spec §4.4 "init_hardware").
    pub fn start_dma(&self, pacing: PacingHw) {
        use std::thread::sleep;
        use std::time::Duration;
        let udelay = |us: u64| sleep(Duration::from_micros(us));

        match pacing {
            PacingHw::Pwm => {
                self.peripherals.pwm.write(regs::PWM_CTL, 0);
                udelay(10);
                self.peripherals.clk.write(regs::PWMCLK_CNTL, regs::CM_PASSWORD | 0x06);
                udelay(100);
                self.peripherals
                    .clk
                    .write(regs::PWMCLK_DIV, regs::CM_PASSWORD | (50 << 12));
                udelay(100);
                self.peripherals.clk.write(regs::PWMCLK_CNTL, regs::CM_PASSWORD | 0x16);
                udelay(100);
                self.peripherals
                    .pwm
                    .write(regs::PWM_RNG1, crate::dma::PULSE_WIDTH_INCR_US * 10);
                udelay(10);
                self.peripherals
                    .pwm
                    .write(regs::PWM_DMAC, regs::PWMDMAC_ENAB | regs::PWMDMAC_THRSHLD);
                udelay(10);
                self.peripherals.pwm.write(regs::PWM_CTL, regs::PWMCTL_CLRF);
                udelay(10);
                self.peripherals
                    .pwm
                    .write(regs::PWM_CTL, regs::PWMCTL_USEF1 | regs::PWMCTL_PWEN1);
                udelay(10);
            }
            PacingHw::Pcm => {
                self.peripherals.pcm.write(regs::PCM_CS_A, 1);
                udelay(100);
                self.peripherals.clk.write(regs::PCMCLK_CNTL, regs::CM_PASSWORD | 0x06);
                udelay(100);
                self.peripherals
                    .clk
                    .write(regs::PCMCLK_DIV, regs::CM_PASSWORD | (50 << 12));
                udelay(100);
                self.peripherals.clk.write(regs::PCMCLK_CNTL, regs::CM_PASSWORD | 0x16);
                udelay(100);
                self.peripherals
                    .pcm
                    .write(regs::PCM_TXC_A, (1 << 30) as u32);
                udelay(100);
                self.peripherals
                    .pcm
                    .write(regs::PCM_MODE_A, (crate::dma::PULSE_WIDTH_INCR_US * 10 - 1) << 10);
                udelay(100);
                let cs = self.peripherals.pcm.read(regs::PCM_CS_A);
                self.peripherals.pcm.write(regs::PCM_CS_A, cs | 1 << 4 | 1 << 3);
                udelay(100);
                self.peripherals.pcm.write(regs::PCM_DREQ_A, 64 << 24 | 64 << 8);
                udelay(100);
                let cs = self.peripherals.pcm.read(regs::PCM_CS_A);
                self.peripherals.pcm.write(regs::PCM_CS_A, cs | 1 << 9);
                udelay(100);
            }
        }

        let start_bus = self.slots[0].bs[Symbol::H.index()].start_offset;
        let start_bus = self.arena.offset_to_bus(start_bus);

        self.peripherals.dma.write(regs::DMA_CS, regs::DMA_RESET);
        udelay(10);
        self.peripherals.dma.write(regs::DMA_CS, regs::DMA_INT | regs::DMA_END);
        self.peripherals.dma.write(regs::DMA_CONBLK_AD, start_bus);
        self.peripherals.dma.write(regs::DMA_DEBUG, 7);
        self.peripherals.dma.write(regs::DMA_CS, regs::DMA_CS_START);

        if pacing == PacingHw::Pcm {
            let cs = self.peripherals.pcm.read(regs::PCM_CS_A);
            self.peripherals.pcm.write(regs::PCM_CS_A, cs | 1 << 2);
        }
    }

    /// Seed the ring with `TS_COUNT` `H` (idle) symbols before the DMA
    /// engine starts, so slot 0 is immediately a valid chain start (spec
    /// §4.4).
    pub fn preload_idle(&mut self) {
        for _ in 0..TS_COUNT {
            self.enqueue(Symbol::H);
        }
    }

    /// Number of time slots still ahead of the DMA read cursor — the
    /// feed loop's `TS_COUNT - 1 - pending()` slack computation (spec
    /// §4.4, §4.5). Fatal if the DMA ring has stopped.
    pub fn pending(&self) -> usize {
        let cur_bus = self.peripherals.dma.read(regs::DMA_CONBLK_AD);
        if cur_bus == 0 {
            crate::error::fatal("DMA stopped (CONBLK_AD read as 0)");
        }
        let mut lo = 0usize;
        let mut hi = TS_COUNT;
        while hi > lo + 1 {
            let mid = (lo + hi) / 2;
            if cur_bus >= self.slots[mid].bus_addr {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        (self.ts_last.wrapping_sub(lo)) & (TS_COUNT - 1)
    }

    /// Append one symbol's chain to the ring: advance the cursor, splice
    /// the new chain's tail-terminated CB in as the previous tail's
    /// successor (spec §4.4's five-step procedure).
    pub fn enqueue(&mut self, sym: Symbol) {
        self.ts_last = match self.ts_last_cb_offset {
            None => 0,
            Some(_) => (self.ts_last + 1) % TS_COUNT,
        };
        let chain = self.slots[self.ts_last].bs[sym.index()];
        self.arena.set_next(chain.last_offset, 0);
        let start_bus = self.arena.offset_to_bus(chain.start_offset);
        if let Some(prev_tail) = self.ts_last_cb_offset {
            self.arena.set_next(prev_tail, start_bus);
        }
        self.ts_last_cb_offset = Some(chain.last_offset);
        self.ts_last_sym = sym;
    }

    pub fn last_sym(&self) -> Symbol {
        self.ts_last_sym
    }
}

/// The narrow slice of `SignalEngine` the modulation driver's feed loop
/// actually needs (spec §4.5). Exists so `Modulator::feed` can be driven
/// against a fake ring in tests instead of a mapped DMA engine.
pub trait SymbolSink {
    fn pending(&self) -> usize;
    fn last_sym(&self) -> Symbol;
    fn enqueue(&mut self, sym: Symbol);
}

impl SymbolSink for SignalEngine {
    fn pending(&self) -> usize {
        self.pending()
    }

    fn last_sym(&self) -> Symbol {
        self.last_sym()
    }

    fn enqueue(&mut self, sym: Symbol) {
        self.enqueue(sym)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_status_reports_zero_frequency_when_stopped() {
        let c = ClockStatus { div: 0, mash: 0 };
        assert_eq!(c.freq_mhz(), 0.0);
    }

    #[test]
    fn clock_status_frequency_matches_divisor_formula() {
        // div = 4096 (12.12 fixed point for a divide-by-1) -> 500 MHz.
        let c = ClockStatus { div: 1 << 12, mash: 1 };
        assert!((c.freq_mhz() - 500.0).abs() < 1e-9);
    }

    /// P6: `pending()`'s wraparound arithmetic (`ts_last - lo`, masked to
    /// `TS_COUNT - 1`) can never report more than `TS_COUNT - 1` slots
    /// outstanding, for any cursor position the binary search can land on.
    /// `pending()` itself needs a live DMA ring to call; this checks the
    /// formula it reduces to directly.
    #[test]
    fn pending_formula_never_exceeds_ts_count_minus_one() {
        for ts_last in 0..TS_COUNT {
            for lo in 0..TS_COUNT {
                let pending = ts_last.wrapping_sub(lo) & (TS_COUNT - 1);
                assert!(pending <= TS_COUNT - 1);
            }
        }
    }
}
