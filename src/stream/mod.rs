//! Streaming engine: the three real-time loops
//!
//! Ties the transport, the sample codec and the board together. One
//! cooperative thread runs exactly one loop at a time:
//!
//! * `play_file`: clock a whole prompt file out to the DAC at 8 kHz
//! * `stream_out`: capture the microphone at 16 kHz, pack, transmit
//! * `stream_in`: poll the transport, clock received words out at 16 kHz
//!
//! The control button picks transmit vs. receive; its state is sampled
//! once per buffer window so a role switch never tears a buffer mid-way.
//! All pacing is fixed microsecond delays between DAC words; with no flow
//! control on the wire, that is the entire backpressure story.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::codec::{pack_buffer_u12, pack_buffer_u8, DacControl};
use crate::config::{AudioConfig, PinConfig};
use crate::constants::{DELAY_16KHZ_US, DELAY_8KHZ_US, SAMPLE_RATE_16KHZ, WAV_HEADER_SIZE};
use crate::error::{CodecError, StreamError};
use crate::hal::{Hal, PinLevel};
use crate::pacing::Pacer;
use crate::transport::{CancelToken, RecvOutcome, Transport};

/// Counters for one streaming session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub samples_captured: u64,
    pub chunks_sent: u64,
    pub bytes_sent: u64,
    pub chunks_received: u64,
    pub bytes_played: u64,
    pub send_errors: u64,
    pub recv_errors: u64,
}

/// The streaming engine.
///
/// Borrows the process-lifetime transport and the board HAL; owns the
/// pacing strategy, the pin assignment and the session's DAC control
/// nibble. A `StreamEngine` value is cheap and carries no session state
/// between calls.
pub struct StreamEngine<'a, H: Hal, P: Pacer> {
    transport: &'a Transport,
    hal: &'a mut H,
    pacer: P,
    pins: PinConfig,
    audio: AudioConfig,
    control: DacControl,
    shutdown: CancelToken,
}

impl<'a, H: Hal, P: Pacer> StreamEngine<'a, H, P> {
    pub fn new(
        transport: &'a Transport,
        hal: &'a mut H,
        pacer: P,
        pins: PinConfig,
        audio: AudioConfig,
    ) -> Self {
        Self {
            transport,
            hal,
            pacer,
            pins,
            audio,
            control: DacControl::default(),
            shutdown: CancelToken::new(),
        }
    }

    /// Use a non-default DAC control nibble for this engine's sessions
    pub fn with_control(mut self, control: DacControl) -> Self {
        self.control = control;
        self
    }

    /// Token that ends any in-progress loop at the next window boundary;
    /// used for process shutdown, not for role switching.
    pub fn with_shutdown(mut self, token: CancelToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Play an audio file straight to the DAC.
    ///
    /// The fixed-size header is skipped unparsed, the rest of the file is
    /// taken as 8-bit PCM at 8 kHz, quantized, packed and clocked out.
    /// A missing or truncated file fails this call only.
    pub fn play_file(&mut self, path: &Path) -> Result<(), StreamError> {
        let samples = read_sample_file(path)?;
        let packed = pack_buffer_u8(&samples, self.control);

        self.hal.set_output(self.pins.dac_cs, PinLevel::High);
        self.hal.bus_begin();
        let played = self.clock_out(&packed, DELAY_8KHZ_US);
        self.hal.bus_end();

        debug!(path = %path.display(), bytes = played, "played file");
        Ok(())
    }

    /// Record-and-transmit loop.
    ///
    /// While the control button is held: fill one buffer window with
    /// 12-bit analog readings at 16 kHz, pack, send. A failed send drops
    /// that window and carries on. Returns when the button is released,
    /// checked once per window.
    pub fn stream_out(&mut self) -> Result<StreamStats, StreamError> {
        self.play_prompt(self.audio.record_prompt.clone());

        let window = (SAMPLE_RATE_16KHZ * self.audio.buffer_seconds) as usize;
        let mut samples: Vec<u16> = Vec::with_capacity(window);
        let mut stats = StreamStats::default();

        while self.hal.read_input(self.pins.control_button).is_high()
            && !self.shutdown.is_cancelled()
        {
            samples.clear();
            for _ in 0..window {
                samples.push(self.hal.read_analog(self.pins.mic_input));
                self.pacer.pause_micros(DELAY_16KHZ_US);
            }
            stats.samples_captured += window as u64;

            let chunk = pack_buffer_u12(&samples, self.control);
            match self.transport.send(&chunk) {
                Ok(n) => {
                    stats.chunks_sent += 1;
                    stats.bytes_sent += n as u64;
                }
                Err(e) => {
                    warn!(error = %e, "send failed, dropping window");
                    stats.send_errors += 1;
                }
            }
        }

        info!(?stats, "record session ended");
        Ok(stats)
    }

    /// Receive-and-play loop.
    ///
    /// Busy-polls the transport; an empty queue just loops. Each received
    /// chunk is clocked to the DAC at the 16 kHz pace. Receive errors are
    /// logged and skipped. Returns when the control button is pressed,
    /// checked between chunks, never mid-chunk.
    pub fn stream_in(&mut self) -> Result<StreamStats, StreamError> {
        self.play_prompt(self.audio.waiting_prompt.clone());

        let max_len = (SAMPLE_RATE_16KHZ * self.audio.buffer_seconds) as usize * 2;
        let mut stats = StreamStats::default();

        self.hal.set_output(self.pins.dac_cs, PinLevel::High);
        self.hal.bus_begin();

        while !self.hal.read_input(self.pins.control_button).is_high()
            && !self.shutdown.is_cancelled()
        {
            match self.transport.recv_chunk(max_len) {
                Ok(RecvOutcome::WouldBlock) => continue,
                Ok(RecvOutcome::Data(chunk)) => {
                    if chunk.len() % 2 != 0 {
                        warn!(
                            error = %CodecError::OddChunkLength(chunk.len()),
                            "malformed chunk, trailing byte ignored"
                        );
                    }
                    stats.chunks_received += 1;
                    stats.bytes_played += self.clock_out(&chunk, DELAY_16KHZ_US) as u64;
                }
                Err(e) => {
                    warn!(error = %e, "receive failed, skipping");
                    stats.recv_errors += 1;
                }
            }
        }

        self.hal.bus_end();
        info!(?stats, "listen session ended");
        Ok(stats)
    }

    /// One-shot file transmission: convert a whole file and send it over
    /// the transport in fixed-size chunks of `chunk_samples` words.
    pub fn stream_out_file(
        &mut self,
        path: &Path,
        chunk_samples: usize,
    ) -> Result<StreamStats, StreamError> {
        let samples = read_sample_file(path)?;
        let packed = pack_buffer_u8(&samples, self.control);
        let chunk_bytes = chunk_samples.max(1) * 2;

        let mut stats = StreamStats::default();
        for chunk in packed.chunks(chunk_bytes) {
            match self.transport.send(chunk) {
                Ok(n) => {
                    stats.chunks_sent += 1;
                    stats.bytes_sent += n as u64;
                }
                Err(e) => {
                    warn!(error = %e, "send failed, dropping chunk");
                    stats.send_errors += 1;
                }
            }
        }

        info!(path = %path.display(), ?stats, "file streamed");
        Ok(stats)
    }

    /// Clock packed words to the DAC bus: chip select low, two bytes,
    /// chip select high, pause. Returns the byte count written; an odd
    /// trailing byte is never clocked.
    fn clock_out(&mut self, chunk: &[u8], delay_us: u64) -> usize {
        for word in chunk.chunks_exact(2) {
            self.hal.set_output(self.pins.dac_cs, PinLevel::Low);
            self.hal.bus_transfer(word[0]);
            self.hal.bus_transfer(word[1]);
            self.hal.set_output(self.pins.dac_cs, PinLevel::High);
            self.pacer.pause_micros(delay_us);
        }
        chunk.len() & !1
    }

    /// Audible cue before a session; losing the cue is not worth losing
    /// the link, so failure is logged and swallowed.
    fn play_prompt(&mut self, prompt: Option<PathBuf>) {
        if let Some(path) = prompt {
            if let Err(e) = self.play_file(&path) {
                warn!(error = %e, "prompt playback failed");
            }
        }
    }
}

/// Read a prompt/stream file: skip the opaque header, return the raw
/// 8-bit samples after it.
fn read_sample_file(path: &Path) -> Result<Vec<u8>, StreamError> {
    let mut file = File::open(path).map_err(|source| StreamError::FileAccess {
        path: path.display().to_string(),
        source,
    })?;

    let len = file
        .metadata()
        .map_err(|source| StreamError::FileAccess {
            path: path.display().to_string(),
            source,
        })?
        .len();
    if len < WAV_HEADER_SIZE {
        return Err(StreamError::FileTooShort(path.display().to_string()));
    }

    file.seek(SeekFrom::Start(WAV_HEADER_SIZE))
        .map_err(|source| StreamError::FileAccess {
            path: path.display().to_string(),
            source,
        })?;

    let mut samples = Vec::with_capacity((len - WAV_HEADER_SIZE) as usize);
    file.read_to_end(&mut samples)
        .map_err(|source| StreamError::FileAccess {
            path: path.display().to_string(),
            source,
        })?;

    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::unpack_word;
    use crate::constants::MAX_CHUNK_BYTES;
    use crate::hal::mock::MockHal;
    use crate::pacing::NoopPacer;
    use crate::transport::{CancelToken, Resolve, RetryPolicy};
    use std::io;
    use std::net::SocketAddr;
    use std::time::{Duration, Instant};

    struct FixedResolver(SocketAddr);

    impl Resolve for FixedResolver {
        fn resolve(&self, host: &str, _port: u16) -> io::Result<SocketAddr> {
            if host == "local" {
                Ok(SocketAddr::from(([127, 0, 0, 1], 0)))
            } else {
                Ok(self.0)
            }
        }
    }

    fn transport_to(remote: SocketAddr) -> Transport {
        Transport::configure_with(
            "local",
            "remote",
            0,
            RetryPolicy::default(),
            &FixedResolver(remote),
            &CancelToken::new(),
        )
        .unwrap()
    }

    fn write_sample_file(dir: &tempfile::TempDir, samples: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join("clip.wav");
        let mut bytes = vec![0u8; WAV_HEADER_SIZE as usize];
        bytes.extend_from_slice(samples);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn recv_with_patience(t: &Transport) -> bytes::Bytes {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            match t.recv_chunk(MAX_CHUNK_BYTES).unwrap() {
                RecvOutcome::Data(data) => return data,
                RecvOutcome::WouldBlock => {
                    assert!(Instant::now() < deadline, "chunk never arrived");
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
        }
    }

    fn quiet_audio() -> AudioConfig {
        AudioConfig {
            buffer_seconds: 1,
            ready_prompt: None,
            record_prompt: None,
            waiting_prompt: None,
        }
    }

    #[test]
    fn play_file_clocks_every_word_with_cs_brackets() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample_file(&dir, &[0, 128, 255]);

        let transport = transport_to(SocketAddr::from(([127, 0, 0, 1], 9)));
        let mut hal = MockHal::new();
        {
            let mut engine = StreamEngine::new(
                &transport,
                &mut hal,
                NoopPacer,
                PinConfig::default(),
                quiet_audio(),
            );
            engine.play_file(&path).unwrap();
        }

        // 3 samples -> 3 words -> 6 bus bytes
        assert_eq!(hal.bus_bytes.len(), 6);
        let words: Vec<_> = hal
            .bus_bytes
            .chunks_exact(2)
            .map(|w| unpack_word([w[0], w[1]]))
            .collect();
        assert_eq!(words, vec![(0b0011, 0), (0b0011, 2056), (0b0011, 4095)]);

        // Initial CS high plus a low/high pair per word
        let cs = hal.writes_to(PinConfig::default().dac_cs);
        assert_eq!(cs.len(), 1 + 3 * 2);
        assert_eq!(cs[0], PinLevel::High);
        assert_eq!(hal.bus_sessions, 1);
    }

    #[test]
    fn play_file_reports_missing_and_short_files() {
        let dir = tempfile::tempdir().unwrap();
        let transport = transport_to(SocketAddr::from(([127, 0, 0, 1], 9)));
        let mut hal = MockHal::new();
        let mut engine = StreamEngine::new(
            &transport,
            &mut hal,
            NoopPacer,
            PinConfig::default(),
            quiet_audio(),
        );

        let missing = dir.path().join("nope.wav");
        assert!(matches!(
            engine.play_file(&missing),
            Err(StreamError::FileAccess { .. })
        ));

        let short = dir.path().join("short.wav");
        std::fs::write(&short, [0u8; 10]).unwrap();
        assert!(matches!(
            engine.play_file(&short),
            Err(StreamError::FileTooShort(_))
        ));
    }

    #[test]
    fn stream_out_sends_one_window_then_exits_on_release() {
        let peer = transport_to(SocketAddr::from(([127, 0, 0, 1], 9)));
        let sender = transport_to(peer.local_addr());

        let mut hal = MockHal::new();
        hal.script_input(&[PinLevel::High, PinLevel::Low]);
        hal.script_analog(&[100, 2000, 4095]);

        let stats = {
            let mut engine = StreamEngine::new(
                &sender,
                &mut hal,
                NoopPacer,
                PinConfig::default(),
                quiet_audio(),
            );
            engine.stream_out().unwrap()
        };

        assert_eq!(stats.samples_captured, 16_000);
        assert_eq!(stats.chunks_sent, 1);
        assert_eq!(stats.bytes_sent, 32_000);
        assert_eq!(stats.send_errors, 0);

        let chunk = recv_with_patience(&peer);
        assert_eq!(chunk.len(), 32_000);
        // First three scripted readings, then silence
        assert_eq!(unpack_word([chunk[0], chunk[1]]), (0b0011, 100));
        assert_eq!(unpack_word([chunk[2], chunk[3]]), (0b0011, 2000));
        assert_eq!(unpack_word([chunk[4], chunk[5]]), (0b0011, 4095));
        assert_eq!(unpack_word([chunk[6], chunk[7]]), (0b0011, 0));
    }

    #[test]
    fn stream_out_absorbs_a_failed_send_and_finishes_the_window() {
        let peer = transport_to(SocketAddr::from(([127, 0, 0, 1], 9)));
        let sender = transport_to(peer.local_addr());

        let mut hal = MockHal::new();
        hal.script_input(&[PinLevel::High, PinLevel::Low]);

        // A 5 second window packs to 160 000 bytes, more than one
        // datagram can carry, so the send itself fails. Best effort:
        // the window is dropped and the loop keeps going.
        let audio = AudioConfig {
            buffer_seconds: 5,
            ..quiet_audio()
        };

        let stats = {
            let mut engine = StreamEngine::new(
                &sender,
                &mut hal,
                NoopPacer,
                PinConfig::default(),
                audio,
            );
            engine.stream_out().unwrap()
        };

        assert_eq!(stats.samples_captured, 80_000);
        assert_eq!(stats.send_errors, 1);
        assert_eq!(stats.chunks_sent, 0);
        assert_eq!(stats.bytes_sent, 0);
        assert_eq!(
            peer.recv_chunk(MAX_CHUNK_BYTES).unwrap(),
            RecvOutcome::WouldBlock
        );
    }

    #[test]
    fn stream_in_plays_received_chunk_then_exits_on_press() {
        let receiver = transport_to(SocketAddr::from(([127, 0, 0, 1], 9)));
        let peer = transport_to(receiver.local_addr());

        let chunk = pack_buffer_u12(&[1, 2, 3], DacControl::default());
        peer.send(&chunk).unwrap();
        // Let the datagram land before the loop starts polling.
        std::thread::sleep(Duration::from_millis(100));

        let mut hal = MockHal::new();
        hal.script_input(&[PinLevel::Low, PinLevel::High]);

        let stats = {
            let mut engine = StreamEngine::new(
                &receiver,
                &mut hal,
                NoopPacer,
                PinConfig::default(),
                quiet_audio(),
            );
            engine.stream_in().unwrap()
        };

        assert_eq!(stats.chunks_received, 1);
        assert_eq!(stats.bytes_played, 6);
        assert_eq!(hal.bus_bytes, chunk.to_vec());
        assert_eq!(hal.bus_sessions, 1);
    }

    #[test]
    fn stream_in_exits_immediately_when_button_already_held() {
        let receiver = transport_to(SocketAddr::from(([127, 0, 0, 1], 9)));

        let mut hal = MockHal::new();
        hal.script_input(&[PinLevel::High]);

        let stats = {
            let mut engine = StreamEngine::new(
                &receiver,
                &mut hal,
                NoopPacer,
                PinConfig::default(),
                quiet_audio(),
            );
            engine.stream_in().unwrap()
        };

        assert_eq!(stats, StreamStats::default());
        assert!(hal.bus_bytes.is_empty());
    }

    #[test]
    fn stream_in_ignores_trailing_odd_byte() {
        let receiver = transport_to(SocketAddr::from(([127, 0, 0, 1], 9)));
        let peer = transport_to(receiver.local_addr());

        peer.send(&[0x30, 0x64, 0xFF]).unwrap();
        std::thread::sleep(Duration::from_millis(100));

        let mut hal = MockHal::new();
        hal.script_input(&[PinLevel::Low, PinLevel::High]);

        let stats = {
            let mut engine = StreamEngine::new(
                &receiver,
                &mut hal,
                NoopPacer,
                PinConfig::default(),
                quiet_audio(),
            );
            engine.stream_in().unwrap()
        };

        assert_eq!(stats.chunks_received, 1);
        assert_eq!(stats.bytes_played, 2);
        assert_eq!(hal.bus_bytes, vec![0x30, 0x64]);
    }

    #[test]
    fn stream_out_file_chunks_the_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample_file(&dir, &[10, 20, 30, 40, 50]);

        let peer = transport_to(SocketAddr::from(([127, 0, 0, 1], 9)));
        let sender = transport_to(peer.local_addr());
        let mut hal = MockHal::new();

        let stats = {
            let mut engine = StreamEngine::new(
                &sender,
                &mut hal,
                NoopPacer,
                PinConfig::default(),
                quiet_audio(),
            );
            engine.stream_out_file(&path, 2).unwrap()
        };

        // 5 samples -> 10 bytes -> chunks of 4, 4, 2
        assert_eq!(stats.chunks_sent, 3);
        assert_eq!(stats.bytes_sent, 10);

        let mut total = 0;
        for _ in 0..3 {
            total += recv_with_patience(&peer).len();
        }
        assert_eq!(total, 10);
    }

    #[test]
    fn shutdown_token_ends_a_listen_loop() {
        let receiver = transport_to(SocketAddr::from(([127, 0, 0, 1], 9)));
        let shutdown = CancelToken::new();
        shutdown.cancel();

        let mut hal = MockHal::new();
        // Button never pressed; only the token can end the loop.
        let stats = {
            let mut engine = StreamEngine::new(
                &receiver,
                &mut hal,
                NoopPacer,
                PinConfig::default(),
                quiet_audio(),
            )
            .with_shutdown(shutdown);
            engine.stream_in().unwrap()
        };

        assert_eq!(stats, StreamStats::default());
    }
}
