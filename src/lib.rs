//! # LAN Intercom
//!
//! Half-duplex voice link between two fixed machines over UDP, driving an
//! MCP4921 DAC on a chip-select-gated serial bus.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      TRANSMITTING SIDE                       │
//! │  ┌────────────┐    ┌──────────────┐    ┌──────────────────┐  │
//! │  │ Microphone │───▶│ Sample Codec │───▶│    Transport     │  │
//! │  │ (analog in)│    │ 12-bit data, │    │  (UDP, one peer) │  │
//! │  │ 16 kHz pace│    │ control bits │    │  fire-and-forget │  │
//! │  └────────────┘    └──────────────┘    └────────┬─────────┘  │
//! └─────────────────────────────────────────────────┼────────────┘
//!                                                   │ UDP chunks
//! ┌─────────────────────────────────────────────────┼────────────┐
//! │                      RECEIVING SIDE              ▼            │
//! │  ┌──────────────────┐    ┌─────────────────────────────────┐ │
//! │  │    Transport     │───▶│   Streaming Engine              │ │
//! │  │  (non-blocking   │    │   busy-poll receive, clock      │ │
//! │  │   receive)       │    │   words to the DAC bus with     │ │
//! │  │                  │    │   45 µs inter-word pacing       │ │
//! │  └──────────────────┘    └─────────────────────────────────┘ │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! A physical control input selects the role each buffer window: held means
//! transmit, released means receive. There is no handshake, no sequencing
//! and no retransmission; the microsecond pacing of the output loop is the
//! only flow control.

pub mod codec;
pub mod config;
pub mod error;
pub mod hal;
pub mod pacing;
pub mod stream;
pub mod transport;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Well-known UDP port both endpoints bind and send to
    pub const UDP_PORT: u16 = 10001;

    /// Live capture/playback sample rate in samples per second
    pub const SAMPLE_RATE_16KHZ: u32 = 16_000;

    /// Inter-word delay for 8 kHz playback, in microseconds.
    /// Calibrated empirically; tweak if playback runs slow or fast.
    pub const DELAY_8KHZ_US: u64 = 80;

    /// Inter-word delay for 16 kHz capture/playback, in microseconds
    pub const DELAY_16KHZ_US: u64 = 45;

    /// Bytes of opaque header skipped at the front of prompt audio files
    pub const WAV_HEADER_SIZE: u64 = 46;

    /// Socket receive buffer size; sized to absorb several seconds of
    /// bursty arrivals at the target rates without drops
    pub const RECV_BUFFER_BYTES: usize = 100_000_000;

    /// Largest datagram payload a receive call will accept
    pub const MAX_CHUNK_BYTES: usize = 65_507;

    /// Largest value a 12-bit DAC data field can hold
    pub const DAC_DATA_MAX: u16 = 4095;
}
