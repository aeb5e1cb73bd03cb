// Peripheral Map (spec §4.1): maps the five fixed-base physical-memory
// windows the rest of the engine needs and exposes each as a word-addressed
// view with volatile, release-ordered access.

use std::ffi::CString;
use std::os::unix::io::RawFd;
use std::ptr;
use std::sync::atomic::{fence, Ordering};

use crate::regs;

/// One `/dev/mem`-backed window onto a peripheral's register block.
pub struct MappedWindow {
    ptr: *mut u32,
    len_words: usize,
}

// SAFETY: the pointer addresses a fixed physical MMIO window for the
// lifetime of the process; all accesses go through volatile reads/writes,
// which is the same contract the hardware itself assumes. The signal
// handler's teardown path (see `engine::QuiesceHandle`) relies on being
// able to touch these from any thread.
unsafe impl Send for MappedWindow {}
unsafe impl Sync for MappedWindow {}

impl MappedWindow {
    fn map(fd: RawFd, base: u32, len: usize) -> Result<Self, String> {
        let len_words = len.div_ceil(4);
        let map_len = len_words * 4;
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                map_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                base as libc::off_t,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(format!(
                "failed to map peripheral at {base:#010x}: {}",
                std::io::Error::last_os_error()
            ));
        }
        Ok(Self {
            ptr: addr as *mut u32,
            len_words,
        })
    }

    #[inline]
    pub fn read(&self, word_offset: usize) -> u32 {
        debug_assert!(word_offset < self.len_words);
        unsafe { ptr::read_volatile(self.ptr.add(word_offset)) }
    }

    /// Write with release ordering: any peripheral status this write is
    /// meant to influence will observe it before this call returns
    /// (spec §4.1 — "release semantics with respect to subsequent reads").
    #[inline]
    pub fn write(&self, word_offset: usize, value: u32) {
        debug_assert!(word_offset < self.len_words);
        unsafe { ptr::write_volatile(self.ptr.add(word_offset), value) };
        fence(Ordering::Release);
    }
}

impl Drop for MappedWindow {
    fn drop(&mut self) {
        let map_len = self.len_words * 4;
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, map_len);
        }
    }
}

/// The SoC's ARM-side physical base for the low peripheral block. The DMA
/// bus alias used inside control blocks (`regs::PERIPH_BUS_BASE`) does not
/// change with this — only the `mmap` base does (spec §9 Open Question).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeripheralBase {
    Legacy,
    Bcm2711,
}

impl PeripheralBase {
    pub fn arm_base(self) -> u32 {
        match self {
            PeripheralBase::Legacy => regs::ARM_BASE_LEGACY,
            PeripheralBase::Bcm2711 => regs::ARM_BASE_BCM2711,
        }
    }

    /// Best-effort detection from `/proc/cpuinfo`'s `Revision` line, per
    /// SPEC_FULL.md §4.1. Falls back to the legacy base when the file is
    /// missing, unreadable, or the revision code is unrecognized.
    pub fn detect() -> Self {
        let cpuinfo = match std::fs::read_to_string("/proc/cpuinfo") {
            Ok(s) => s,
            Err(_) => return PeripheralBase::Legacy,
        };
        for line in cpuinfo.lines() {
            if let Some(rest) = line.strip_prefix("Revision") {
                let hex = rest.trim_start_matches([':', ' ', '\t']).trim();
                if let Ok(code) = u32::from_str_radix(hex, 16) {
                    // New-style revision codes encode the processor in bits
                    // 12..15; BCM2711 (Pi 4 / 400 / CM4) is processor id 3.
                    let new_style = (code >> 23) & 1 == 1;
                    if new_style && (code >> 12) & 0xf == 3 {
                        return PeripheralBase::Bcm2711;
                    }
                }
            }
        }
        PeripheralBase::Legacy
    }
}

pub struct PeripheralMap {
    pub dma: MappedWindow,
    pub pwm: MappedWindow,
    pub pcm: MappedWindow,
    pub clk: MappedWindow,
    pub gpio: MappedWindow,
}

impl PeripheralMap {
    pub fn open(base: PeripheralBase) -> Result<Self, String> {
        let path = CString::new("/dev/mem").unwrap();
        let fd = unsafe { libc::open(path.as_ptr(), libc::O_RDWR | libc::O_SYNC) };
        if fd < 0 {
            return Err(format!(
                "failed to open /dev/mem: {}",
                std::io::Error::last_os_error()
            ));
        }
        let arm_base = base.arm_base();
        let result = (|| {
            Ok(PeripheralMap {
                dma: MappedWindow::map(fd, arm_base + regs::DMA_OFFSET, regs::DMA_LEN)?,
                pwm: MappedWindow::map(fd, arm_base + regs::PWM_OFFSET, regs::PWM_LEN)?,
                pcm: MappedWindow::map(fd, arm_base + regs::PCM_OFFSET, regs::PCM_LEN)?,
                clk: MappedWindow::map(fd, arm_base + regs::CLK_OFFSET, regs::CLK_LEN)?,
                gpio: MappedWindow::map(fd, arm_base + regs::GPIO_OFFSET, regs::GPIO_LEN)?,
            })
        })();
        unsafe { libc::close(fd) };
        result
    }

    pub fn gpio_set_mode(&self, pin: u32, mode: u32) {
        let reg = regs::GPIO_FSEL0 + (pin / 10) as usize;
        let shift = (pin % 10) * 3;
        let mut fsel = self.gpio.read(reg);
        fsel &= !(0b111 << shift);
        fsel |= mode << shift;
        self.gpio.write(reg, fsel);
    }

    pub fn gpio_set(&self, pin: u32, high: bool) {
        if high {
            self.gpio.write(regs::GPIO_SET0, 1 << pin);
        } else {
            self.gpio.write(regs::GPIO_CLR0, 1 << pin);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peripheral_base_picks_legacy_arm_address() {
        assert_eq!(PeripheralBase::Legacy.arm_base(), 0x2000_0000);
        assert_eq!(PeripheralBase::Bcm2711.arm_base(), 0xFE00_0000);
    }

    #[test]
    fn gpio_fsel_register_math_matches_pin_layout() {
        // Pin 4 (carrier) lives in word 0, 3-bit field starting at bit 12.
        assert_eq!(regs::GPIO_FSEL0 + (4 / 10) as usize, regs::GPIO_FSEL0);
        assert_eq!((4 % 10) * 3, 12);
        // Pin 17 (pos) lives in word 1, field at bit 21.
        assert_eq!(regs::GPIO_FSEL0 + (17 / 10) as usize, regs::GPIO_FSEL0 + 1);
        assert_eq!((17 % 10) * 3, 21);
    }
}
