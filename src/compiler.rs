// Waveform Compiler (spec §4.3): renders each of the 16 time slots' four
// symbol shapes into sigma-delta GPIO bitstreams and links them into DMA CB
// chains inside the pinned arena.

use crate::arena::{CbStore, PinnedArena};
use crate::dma::{BsChain, ControlBlock, Symbol, TimeSlot, BS_SAMPLES, PULSE_WIDTH_INCR_US, SYM_COUNT, TS_COUNT};
use crate::regs;

/// Which peripheral paces the sigma-delta sample rate (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacingHw {
    Pwm,
    Pcm,
}

pub struct CompileOutput {
    pub slots: [TimeSlot; TS_COUNT],
    /// Largest single-sample error between the ideal envelope and the
    /// sigma-delta approximation of it, across every shape compiled — a
    /// startup diagnostic, not a control input (spec §4.3).
    pub level_error_max: f64,
}

fn shape(sym: Symbol, t: f64, amplitude: f64) -> f64 {
    let half_span = amplitude / 2.0;
    match sym {
        Symbol::L => 0.5 - half_span,
        Symbol::H => 0.5 + half_span,
        Symbol::Lh => 0.5 - (std::f64::consts::PI * t).cos() * half_span,
        Symbol::Hl => 0.5 + (std::f64::consts::PI * t).cos() * half_span,
    }
}

/// Rewrite the `next` field of the CB at `offset` to point at `next_bus`.
/// Plain (non-volatile) store: correct only before the chain is reachable
/// from the DMA engine, which holds for the whole compile pass.
fn link<A: CbStore>(arena: &A, offset: u32, next_bus: u32) {
    let mut cb = arena.read_cb(offset);
    cb.next = next_bus;
    arena.write_cb(offset, cb);
}

/// Pure per-sub-sample sigma-delta decision: for each of `BS_SAMPLES` steps,
/// whether the GPIO pair should be driven "up" (positive rail) this step,
/// and the worst single-sample error between the ideal envelope and the
/// one-pole running mean the hardware actually produces (P1). Factored out
/// of `compile_bs` so it can be checked without writing any CBs at all.
fn render_samples(sym: Symbol, amplitude: f64, rc_seconds: f64) -> (Vec<bool>, f64) {
    let mean_decay = (-(PULSE_WIDTH_INCR_US as f64) / (1_000_000.0 * rc_seconds)).exp();
    let mean_weight = 1.0 - mean_decay;

    let mut v_old = shape(sym, 0.0, amplitude);
    let mut level_error_max = 0.0_f64;
    let mut ups = Vec::with_capacity(BS_SAMPLES);

    for i in 0..BS_SAMPLES {
        let t = (i + 1) as f64 / BS_SAMPLES as f64;
        let v = shape(sym, t, amplitude);
        let up = v > v_old;
        let mut v_new = v_old * mean_decay;
        if up {
            v_new += mean_weight;
        }
        let v_error = (v - v_new).abs();
        if v_error > level_error_max {
            level_error_max = v_error;
        }
        ups.push(up);
        v_old = v_new;
    }

    (ups, level_error_max)
}

/// How many of the per-sample GPIO pairs actually need writing: the first
/// sample always does, and every later one only when the drive direction
/// flipped from the sample before it (P2's CB-elision rule).
fn count_direction_changes(ups: &[bool]) -> usize {
    ups.iter()
        .enumerate()
        .filter(|&(i, &up)| i == 0 || up != ups[i - 1])
        .count()
}

/// Render one symbol's sigma-delta bitstream, starting at `cb_offset`, and
/// return its chain, the worst-case level error seen, and the next free
/// offset. Mirrors `init_bs()`: up to three CBs per sub-sample (two GPIO
/// writes plus one pacing delay), the two GPIO writes dropped whenever the
/// direction doesn't change from the previous sub-sample.
#[allow(clippy::too_many_arguments)]
fn compile_bs<A: CbStore>(
    arena: &A,
    mut cb_offset: u32,
    sym: Symbol,
    amplitude: f64,
    rc_seconds: f64,
    phys_sample_pos: u32,
    phys_sample_neg: u32,
    phys_gpset0: u32,
    phys_gpclr0: u32,
    pacing_info: u32,
    phys_fifo_addr: u32,
) -> (BsChain, f64, u32) {
    let (ups, level_error_max) = render_samples(sym, amplitude, rc_seconds);

    let start_offset = cb_offset;
    let mut up_old = false;
    let mut prev_tail_offset: Option<u32> = None;
    let mut last_offset = cb_offset;

    for (i, &up) in ups.iter().enumerate() {
        // Splice the previous sub-sample's trailing CB to whatever gets
        // written first this iteration.
        if let Some(prev) = prev_tail_offset {
            link(arena, prev, arena.offset_to_bus(cb_offset));
        }

        if i == 0 || up_old != up {
            arena.write_cb(
                cb_offset,
                ControlBlock {
                    info: regs::DMA_NO_WIDE_BURSTS | regs::DMA_WAIT_RESP,
                    src: phys_sample_pos,
                    dst: if up { phys_gpset0 } else { phys_gpclr0 },
                    length: 4,
                    ..Default::default()
                },
            );
            let pos_offset = cb_offset;
            cb_offset += crate::dma::CB_SIZE as u32;
            link(arena, pos_offset, arena.offset_to_bus(cb_offset));

            arena.write_cb(
                cb_offset,
                ControlBlock {
                    info: regs::DMA_NO_WIDE_BURSTS | regs::DMA_WAIT_RESP,
                    src: phys_sample_neg,
                    dst: if up { phys_gpclr0 } else { phys_gpset0 },
                    length: 4,
                    ..Default::default()
                },
            );
            let neg_offset = cb_offset;
            cb_offset += crate::dma::CB_SIZE as u32;
            link(arena, neg_offset, arena.offset_to_bus(cb_offset));
        }

        arena.write_cb(
            cb_offset,
            ControlBlock {
                info: pacing_info,
                src: phys_sample_pos,
                dst: phys_fifo_addr,
                length: 4,
                ..Default::default()
            },
        );
        last_offset = cb_offset;
        prev_tail_offset = Some(cb_offset);
        cb_offset += crate::dma::CB_SIZE as u32;

        up_old = up;
    }

    (
        BsChain {
            start_offset,
            last_offset,
        },
        level_error_max,
        cb_offset,
    )
}

/// Compile all 16 time slots x 4 symbol shapes into the arena and reclaim
/// whatever CB pages went unused (spec §4.3 "Memory reclamation"). The
/// arena must have been sized with its CB region at least
/// `TS_COUNT * SYM_COUNT * BS_SAMPLES * 3` control blocks.
pub fn compile(
    arena: &mut PinnedArena,
    amplitude: f64,
    rc_seconds: f64,
    pacing: PacingHw,
) -> CompileOutput {
    let samples0_offset = arena.samples_offset();
    let samples1_offset = samples0_offset + 4;
    arena.write_word(samples0_offset, 1 << regs::GPIO_POS_PIN);
    arena.write_word(samples1_offset, 1 << regs::GPIO_NEG_PIN);
    let phys_sample_pos = arena.offset_to_bus(samples0_offset);
    let phys_sample_neg = arena.offset_to_bus(samples1_offset);

    let phys_gpset0 = regs::PERIPH_BUS_BASE + regs::GPIO_OFFSET + (regs::GPIO_SET0 * 4) as u32;
    let phys_gpclr0 = regs::PERIPH_BUS_BASE + regs::GPIO_OFFSET + (regs::GPIO_CLR0 * 4) as u32;

    let (pacing_info, phys_fifo_addr) = match pacing {
        PacingHw::Pwm => (
            regs::DMA_NO_WIDE_BURSTS | regs::DMA_WAIT_RESP | regs::DMA_D_DREQ | regs::dma_per_map(5),
            regs::PERIPH_BUS_BASE + regs::PWM_OFFSET + regs::PWM_FIFO,
        ),
        PacingHw::Pcm => (
            regs::DMA_NO_WIDE_BURSTS | regs::DMA_WAIT_RESP | regs::DMA_D_DREQ | regs::dma_per_map(2),
            regs::PERIPH_BUS_BASE + regs::PCM_OFFSET + regs::PCM_FIFO_A,
        ),
    };

    let mut cb_offset = 0u32;
    let mut level_error_max = 0.0_f64;
    let placeholder = TimeSlot {
        bs: [BsChain {
            start_offset: 0,
            last_offset: 0,
        }; SYM_COUNT],
        bus_addr: 0,
    };
    let mut slots = [placeholder; TS_COUNT];

    for slot in slots.iter_mut() {
        let slot_bus = arena.offset_to_bus(cb_offset);
        let mut bs = [BsChain {
            start_offset: 0,
            last_offset: 0,
        }; SYM_COUNT];
        for sym in Symbol::ALL {
            let (chain, err, new_offset) = compile_bs(
                &*arena,
                cb_offset,
                sym,
                amplitude,
                rc_seconds,
                phys_sample_pos,
                phys_sample_neg,
                phys_gpset0,
                phys_gpclr0,
                pacing_info,
                phys_fifo_addr,
            );
            bs[sym.index()] = chain;
            if err > level_error_max {
                level_error_max = err;
            }
            cb_offset = new_offset;
        }
        slot.bs = bs;
        slot.bus_addr = slot_bus;
    }

    arena.reclaim_after(cb_offset as usize);

    CompileOutput {
        slots,
        level_error_max,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// Plain in-memory CB store, offsets keyed directly (no page mapping),
    /// so `compile_bs` can be exercised without a pinned, pagemap-resolved
    /// arena. `offset_to_bus` is the identity: CB-chain layout logic never
    /// depends on the bus/virt split, only on offsets increasing.
    struct TestArena {
        cbs: RefCell<HashMap<u32, ControlBlock>>,
    }

    impl TestArena {
        fn new() -> Self {
            Self {
                cbs: RefCell::new(HashMap::new()),
            }
        }
    }

    impl CbStore for TestArena {
        fn offset_to_bus(&self, offset: u32) -> u32 {
            offset
        }

        fn write_cb(&self, offset: u32, cb: ControlBlock) {
            self.cbs.borrow_mut().insert(offset, cb);
        }

        fn read_cb(&self, offset: u32) -> ControlBlock {
            *self.cbs.borrow().get(&offset).unwrap_or(&ControlBlock::default())
        }
    }

    /// P1: the worst-case sigma-delta approximation error stays under one
    /// full quantization step for a reasonable RC/amplitude pairing.
    #[test]
    fn level_error_max_stays_under_one() {
        for sym in Symbol::ALL {
            let (_, level_error_max) = render_samples(sym, 0.9, 0.0047);
            assert!(
                level_error_max < 1.0,
                "{sym:?}: level_error_max {level_error_max} >= 1.0"
            );
        }
    }

    /// P2: a compiled chain has exactly one pacing CB per sub-sample plus
    /// two GPIO CBs per direction change (including the mandatory first
    /// sample), and its terminal CB is never linked onward.
    #[test]
    fn compiled_chain_has_the_predicted_cb_count_and_terminates() {
        for sym in Symbol::ALL {
            let arena = TestArena::new();
            let (chain, level_error_max, next_offset) = compile_bs(
                &arena,
                0,
                sym,
                0.9,
                0.0047,
                0x7e20_0000,
                0x7e20_0004,
                0x7e20_0008,
                0x7e20_000c,
                regs::DMA_NO_WIDE_BURSTS,
                0x7e20_c000,
            );

            let (ups, expected_error_max) = render_samples(sym, 0.9, 0.0047);
            let changes = count_direction_changes(&ups);
            let expected_cbs = BS_SAMPLES + 2 * changes;

            assert_eq!(level_error_max, expected_error_max);
            assert_eq!(
                (next_offset / crate::dma::CB_SIZE as u32) as usize,
                expected_cbs,
                "{sym:?}: wrong CB count"
            );
            assert_eq!(
                arena.read_cb(chain.last_offset).next,
                0,
                "{sym:?}: terminal CB must not be linked onward at compile time"
            );
        }
    }

    #[test]
    fn shape_l_and_h_are_flat_at_the_amplitude_extremes() {
        assert_eq!(shape(Symbol::L, 0.3, 1.0), 0.0);
        assert_eq!(shape(Symbol::H, 0.7, 1.0), 1.0);
    }

    #[test]
    fn shape_lh_rises_monotonically_from_low_to_high() {
        let amplitude = 1.0;
        let a = shape(Symbol::Lh, 0.1, amplitude);
        let b = shape(Symbol::Lh, 0.5, amplitude);
        let c = shape(Symbol::Lh, 0.9, amplitude);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn shape_hl_falls_monotonically_from_high_to_low() {
        let amplitude = 1.0;
        let a = shape(Symbol::Hl, 0.1, amplitude);
        let b = shape(Symbol::Hl, 0.5, amplitude);
        let c = shape(Symbol::Hl, 0.9, amplitude);
        assert!(a > b);
        assert!(b > c);
    }

    #[test]
    fn shapes_meet_at_the_midpoint_regardless_of_amplitude() {
        for amplitude in [0.2, 0.6, 1.0] {
            assert_eq!(shape(Symbol::L, 1.0, amplitude), shape(Symbol::Hl, 1.0, amplitude));
            assert_eq!(shape(Symbol::H, 1.0, amplitude), shape(Symbol::Lh, 1.0, amplitude));
        }
    }
}
