// DMA control block layout and the symbol/chain/slot data model (spec §3).

use std::mem::size_of;

/// An 8-word DMA control block, 32-byte aligned (spec §3, §6).
#[repr(C, align(32))]
#[derive(Clone, Copy, Debug, Default)]
pub struct ControlBlock {
    pub info: u32,
    pub src: u32,
    pub dst: u32,
    pub length: u32,
    pub stride: u32,
    pub next: u32,
    pub pad: [u32; 2],
}

pub const CB_SIZE: usize = size_of::<ControlBlock>();

/// One of the four envelope shapes (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    L,
    H,
    Lh,
    Hl,
}

impl Symbol {
    pub const ALL: [Symbol; 4] = [Symbol::L, Symbol::H, Symbol::Lh, Symbol::Hl];

    pub fn index(self) -> usize {
        match self {
            Symbol::L => 0,
            Symbol::H => 1,
            Symbol::Lh => 2,
            Symbol::Hl => 3,
        }
    }

    /// Differential-BPSK transition table (spec §3): bit 0 flips phase,
    /// bit 1 preserves it.
    pub fn next(self, bit: u8) -> Symbol {
        match (self, bit & 1) {
            (Symbol::L, 0) => Symbol::Lh,
            (Symbol::L, _) => Symbol::L,
            (Symbol::H, 0) => Symbol::Hl,
            (Symbol::H, _) => Symbol::H,
            (Symbol::Lh, 0) => Symbol::Hl,
            (Symbol::Lh, _) => Symbol::H,
            (Symbol::Hl, 0) => Symbol::Lh,
            (Symbol::Hl, _) => Symbol::L,
        }
    }

    /// The envelope level (LOW or HIGH) this symbol's chain ends at —
    /// used to check invariant (e), continuity across a splice.
    pub fn end_level(self) -> Level {
        match self {
            Symbol::L | Symbol::Hl => Level::Low,
            Symbol::H | Symbol::Lh => Level::High,
        }
    }

    /// The envelope level this symbol's chain starts at.
    pub fn start_level(self) -> Level {
        match self {
            Symbol::L | Symbol::Lh => Level::Low,
            Symbol::H | Symbol::Hl => Level::High,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

/// A burst-symbol chain: the compiled CBs for one symbol kind within one
/// time slot. Stored as arena-relative byte offsets, not pointers — the
/// arena owns all CB storage (spec §9 "Pointer graphs").
#[derive(Debug, Clone, Copy)]
pub struct BsChain {
    pub start_offset: u32,
    pub last_offset: u32,
}

/// One ring slot: one chain per symbol kind, plus the slot's own starting
/// bus address (the address of its `H` chain, used to seed the DMA at
/// startup and as the binary-search key in `pending()`).
#[derive(Debug, Clone, Copy)]
pub struct TimeSlot {
    pub bs: [BsChain; 4],
    pub bus_addr: u32,
}

pub const TS_COUNT: usize = 16;
pub const SYM_COUNT: usize = 4;
pub const PULSE_WIDTH_INCR_US: u32 = 10;
pub const BS_US: u32 = 32_000;
pub const BS_SAMPLES: usize = (BS_US / PULSE_WIDTH_INCR_US) as usize;
pub const TS_US: u32 = BS_US;

/// Worst case: every sub-sample flips direction, emitting all three CBs
/// (spec §4.3). The compiler reclaims whatever this overestimates.
pub const MAX_CBS: usize = TS_COUNT * SYM_COUNT * BS_SAMPLES * 3;
pub const CB_REGION_BYTES: usize = MAX_CBS * CB_SIZE;
/// Arena pages reserved for the CB region, sized off the worst case above
/// (spec §4.2 sizing).
pub const NUM_CB_PAGES: usize = CB_REGION_BYTES.div_ceil(4096);
/// One extra page for the two 1-bit GPIO source words (spec §4.3).
pub const NUM_SAMPLE_PAGES: usize = 1;
pub const NUM_ARENA_PAGES: usize = NUM_CB_PAGES + NUM_SAMPLE_PAGES;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_block_is_32_bytes_aligned_to_32() {
        assert_eq!(CB_SIZE, 32);
        assert_eq!(std::mem::align_of::<ControlBlock>(), 32);
    }

    #[test]
    fn symbol_transition_table_matches_spec() {
        assert_eq!(Symbol::L.next(0), Symbol::Lh);
        assert_eq!(Symbol::L.next(1), Symbol::L);
        assert_eq!(Symbol::H.next(0), Symbol::Hl);
        assert_eq!(Symbol::H.next(1), Symbol::H);
        assert_eq!(Symbol::Lh.next(0), Symbol::Hl);
        assert_eq!(Symbol::Lh.next(1), Symbol::H);
        assert_eq!(Symbol::Hl.next(0), Symbol::Lh);
        assert_eq!(Symbol::Hl.next(1), Symbol::L);
    }

    /// P4: two consecutive phase reversals (bit 0, bit 0) return to a
    /// symbol at the same envelope level as the start — one full cycle.
    #[test]
    fn two_consecutive_zero_bits_complete_a_full_cycle() {
        for s in Symbol::ALL {
            let once = s.next(0);
            let twice = once.next(0);
            assert_eq!(
                twice.end_level(),
                s.end_level(),
                "{s:?} -> {once:?} -> {twice:?} should return to the same level"
            );
        }
    }

    #[test]
    fn bs_samples_matches_spec_constants() {
        assert_eq!(BS_SAMPLES, 3200);
        assert_eq!(TS_COUNT, 16);
    }

    #[test]
    fn cb_region_sizing_matches_worst_case_arithmetic() {
        assert_eq!(MAX_CBS, 614_400);
        assert_eq!(NUM_CB_PAGES, 4800);
    }
}
