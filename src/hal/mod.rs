//! Board I/O capability boundary
//!
//! The engine drives four physical resources: a ready LED, the
//! transmit/receive control button, the microphone's analog input and the
//! chip-select-gated serial bus to the DAC. All of them are reached
//! through this trait so the streaming loops can run against a test
//! double or on a host with no board attached.

use tracing::debug;

/// Logic level of a digital pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PinLevel {
    #[default]
    Low,
    High,
}

impl PinLevel {
    pub fn is_high(self) -> bool {
        matches!(self, PinLevel::High)
    }
}

/// Access to the board's pins and the DAC serial bus.
///
/// Pin operations are infallible by contract: a GPIO write on the target
/// board cannot fail, and analog reads return the raw 12-bit conversion
/// (0..=4095). Bus transfers are full-duplex byte exchanges bracketed by
/// `bus_begin`/`bus_end`; chip select is an ordinary output pin.
pub trait Hal {
    fn set_output(&mut self, pin: u8, level: PinLevel);
    fn read_input(&mut self, pin: u8) -> PinLevel;
    fn read_analog(&mut self, pin: u8) -> u16;
    fn bus_begin(&mut self);
    fn bus_transfer(&mut self, byte: u8) -> u8;
    fn bus_end(&mut self);
}

/// HAL for hosts without board support.
///
/// Pin writes are logged at debug, the control input reads as released
/// and the microphone as silence. Lets the full process run end-to-end
/// on a development machine.
#[derive(Debug, Default)]
pub struct NullHal;

impl Hal for NullHal {
    fn set_output(&mut self, pin: u8, level: PinLevel) {
        debug!(pin, ?level, "set_output (no board)");
    }

    fn read_input(&mut self, _pin: u8) -> PinLevel {
        PinLevel::Low
    }

    fn read_analog(&mut self, _pin: u8) -> u16 {
        0
    }

    fn bus_begin(&mut self) {}

    fn bus_transfer(&mut self, _byte: u8) -> u8 {
        0
    }

    fn bus_end(&mut self) {}
}
