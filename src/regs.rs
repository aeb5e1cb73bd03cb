// Peripheral bus addresses and register offsets (spec §6).
//
// Two distinct address spaces appear here and must not be confused:
//   - the ARM physical base, used to `mmap` /dev/mem from this process
//     (varies by SoC revision: 0x2000_0000 legacy, 0xFE00_0000 BCM2711);
//   - the DMA bus alias, the address the DMA engine itself uses to reach
//     a peripheral register, which is always 0x7e00_0000-based regardless
//     of which ARM physical base this process mapped.
// A third alias (`MEM_DMA_ALIAS`) applies only to pinned RAM pages, not
// peripherals, and is added to a page's physical frame number in
// `arena::PinnedArena`.

/// DMA bus alias for the low peripheral block, used when building control
/// blocks whose `dst`/`src` the DMA engine itself will dereference.
pub const PERIPH_BUS_BASE: u32 = 0x7e00_0000;

/// DMA-coherent alias bit ORed into bus addresses of pinned-arena pages.
pub const MEM_DMA_ALIAS: u32 = 0x4000_0000;

/// Legacy ARM physical base (Pi 0/1/2/3).
pub const ARM_BASE_LEGACY: u32 = 0x2000_0000;
/// BCM2711 ARM physical base (Pi 4).
pub const ARM_BASE_BCM2711: u32 = 0xFE00_0000;

pub const DMA_OFFSET: u32 = 0x0000_7000;
pub const DMA_LEN: usize = 0x24;
pub const PWM_OFFSET: u32 = 0x0020_C000;
pub const PWM_LEN: usize = 0x28;
pub const CLK_OFFSET: u32 = 0x0010_1000;
pub const CLK_LEN: usize = 0xA8;
pub const GPIO_OFFSET: u32 = 0x0020_0000;
pub const GPIO_LEN: usize = 0x100;
pub const PCM_OFFSET: u32 = 0x0020_3000;
pub const PCM_LEN: usize = 0x24;

// ── DMA ──────────────────────────────────────────────────────────────────

pub const DMA_CS: usize = 0x00 / 4;
pub const DMA_CONBLK_AD: usize = 0x04 / 4;
pub const DMA_DEBUG: usize = 0x20 / 4;

pub const DMA_NO_WIDE_BURSTS: u32 = 1 << 26;
pub const DMA_WAIT_RESP: u32 = 1 << 3;
pub const DMA_D_DREQ: u32 = 1 << 6;
pub const DMA_END: u32 = 1 << 1;
pub const DMA_RESET: u32 = 1 << 31;
pub const DMA_INT: u32 = 1 << 2;
pub const fn dma_per_map(x: u32) -> u32 {
    x << 16
}
/// go, mid priority, wait for outstanding writes (spec §4.4 "DMA start").
pub const DMA_CS_START: u32 = 0x1088_0001;

// ── GPIO ─────────────────────────────────────────────────────────────────

pub const GPIO_FSEL0: usize = 0x00 / 4;
pub const GPIO_SET0: usize = 0x1c / 4;
pub const GPIO_CLR0: usize = 0x28 / 4;

pub const GPIO_MODE_OUT: u32 = 1;
pub const GPIO_MODE_ALT0: u32 = 4;

pub const GPIO_CARRIER_PIN: u32 = 4;
pub const GPIO_POS_PIN: u32 = 17;
pub const GPIO_NEG_PIN: u32 = 18;

// ── PWM ──────────────────────────────────────────────────────────────────

pub const PWM_CTL: usize = 0x00 / 4;
pub const PWM_DMAC: usize = 0x08 / 4;
pub const PWM_RNG1: usize = 0x10 / 4;
pub const PWM_FIFO: u32 = 0x18;

pub const PWMCLK_CNTL: usize = 40;
pub const PWMCLK_DIV: usize = 41;

pub const PWMCTL_PWEN1: u32 = 1 << 0;
pub const PWMCTL_CLRF: u32 = 1 << 6;
pub const PWMCTL_USEF1: u32 = 1 << 5;

pub const PWMDMAC_ENAB: u32 = 1 << 31;
pub const PWMDMAC_THRSHLD: u32 = (15 << 8) | 15;

// ── PCM ──────────────────────────────────────────────────────────────────

pub const PCM_CS_A: usize = 0x00 / 4;
pub const PCM_MODE_A: usize = 0x08 / 4;
pub const PCM_TXC_A: usize = 0x10 / 4;
pub const PCM_DREQ_A: usize = 0x14 / 4;
pub const PCM_FIFO_A: u32 = 0x04;

pub const PCMCLK_CNTL: usize = 38;
pub const PCMCLK_DIV: usize = 39;

// ── Clock manager ────────────────────────────────────────────────────────

pub const CM_GP0CTL: usize = 0x70 / 4;
pub const CM_GP0DIV: usize = 0x74 / 4;

/// Hardware-mandated password byte, required in the top byte of every
/// clock-manager write (spec §4.4).
pub const CM_PASSWORD: u32 = 0x5A00_0000;
