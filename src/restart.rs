//! sdio-dma-sdmmc - Restart service
//!
//! Some cards refuse to leave the idle state after a cold start and only
//! come up on the second try. When the operating conditions are never
//! accepted the driver asks a [`Restart`] to start over.

/// Restarts the device. Implementations usually never return.
pub trait Restart {
    /// Restart now.
    fn restart(&mut self);
}

impl<T> Restart for &mut T
where
    T: Restart + ?Sized,
{
    fn restart(&mut self) {
        (**self).restart()
    }
}

/// Jumps into the program image at `base`, if its first word is the
/// expected initial stack pointer. Otherwise the restart is skipped and the
/// caller carries on with the error.
#[cfg(feature = "cortex-m")]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BootImage {
    /// Start of the image's vector table
    pub base: u32,
    /// Initial stack pointer a valid image starts with
    pub sentinel: u32,
}

#[cfg(feature = "cortex-m")]
impl Default for BootImage {
    fn default() -> Self {
        // Start of flash, and the top of the STM32F405's 128 KiB SRAM.
        BootImage {
            base: 0x0800_0000,
            sentinel: 0x2002_0000,
        }
    }
}

#[cfg(feature = "cortex-m")]
impl Restart for BootImage {
    fn restart(&mut self) {
        #[cfg(feature = "log")]
        use log::{info, warn};

        #[cfg(feature = "defmt-log")]
        use defmt::{info, warn};

        let vector_table = self.base as *const u32;
        // SAFETY: `base` is the start of flash, which is always readable.
        let stack_pointer = unsafe { core::ptr::read_volatile(vector_table) };
        if stack_pointer == self.sentinel {
            info!("Rebooting...");
            // SAFETY: the image starts with the expected stack pointer, so
            // the next word is its reset vector.
            unsafe { cortex_m::asm::bootload(vector_table) }
        } else {
            warn!("Boot image not found at {:#x}", self.base);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter(u32);

    impl Restart for Counter {
        fn restart(&mut self) {
            self.0 += 1;
        }
    }

    fn restart_twice<R: Restart + ?Sized>(restart: &mut R) {
        restart.restart();
        restart.restart();
    }

    #[test]
    fn borrowed_restart_forwards() {
        let mut counter = Counter(0);
        restart_twice(&mut &mut counter);
        assert_eq!(counter.0, 2);
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
