//! Microphone capture side: accumulate PCM into 20 ms windows, silence-gate,
//! Opus-encode, and hold the result in a jitter buffer until the network
//! layer is ready to drain it.

use parking_lot::Mutex;
use std::collections::VecDeque;
use thiserror::Error;

pub const SAMPLE_RATE: u32 = 48_000;
/// 20 ms at 48 kHz mono.
pub const WINDOW_SAMPLES: usize = 960;
/// A window is silent iff every sample's magnitude is below this.
const SILENCE_THRESHOLD: i16 = 1024;
/// Consecutive silent windows before a recording session ends (1 s).
const SILENCE_HANGOVER: u32 = 50;
/// Packet count at which emission begins (250 ms of packets).
const MIN_BUFFER_PACKETS: usize = 13;
/// Packet count beyond which the oldest packet is dropped (3 s).
const MAX_BUFFER_PACKETS: usize = 150;
/// Every presence-protocol `SPEECH` payload fits in one byte-length prefix.
pub const MAX_PACKET_BYTES: usize = 255;

#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("opus error: {0}")]
    Opus(#[from] opus::Error),
    #[error("encoded packet exceeds {MAX_PACKET_BYTES} bytes")]
    OversizedPacket,
}

pub type VoiceResult<T> = Result<T, VoiceError>;

struct RecorderState {
    window: Vec<i16>,
    packets: VecDeque<Vec<u8>>,
    recording: bool,
    emitting: bool,
    silence_counter: u32,
}

impl RecorderState {
    fn new() -> RecorderState {
        RecorderState {
            window: Vec::with_capacity(WINDOW_SAMPLES),
            packets: VecDeque::new(),
            recording: false,
            emitting: false,
            silence_counter: 0,
        }
    }

    fn push_packet(&mut self, packet: Vec<u8>) {
        self.packets.push_back(packet);
        if self.packets.len() >= MIN_BUFFER_PACKETS {
            self.emitting = true;
        }
        if self.packets.len() > MAX_BUFFER_PACKETS {
            self.packets.pop_front();
        }
    }
}

/// Accumulates microphone PCM, silence-gates it, and Opus-encodes the result
/// into a jitter buffer of pending packets. Safe to feed from a host audio
/// callback thread distinct from whichever thread drains packets.
pub struct VoiceRecorder {
    encoder: Mutex<opus::Encoder>,
    state: Mutex<RecorderState>,
    notify: Box<dyn Fn() + Send + Sync>,
}

impl VoiceRecorder {
    pub fn new<F: Fn() + Send + Sync + 'static>(notify: F) -> VoiceResult<VoiceRecorder> {
        let mut encoder = opus::Encoder::new(SAMPLE_RATE, opus::Channels::Mono, opus::Application::Voip)?;
        encoder.set_bitrate(opus::Bitrate::Bits(8192))?;

        Ok(VoiceRecorder {
            encoder: Mutex::new(encoder),
            state: Mutex::new(RecorderState::new()),
            notify: Box::new(notify),
        })
    }

    /// Feeds newly captured samples; may be any length, arriving on any
    /// thread. Accumulates into 20 ms windows and processes each as it fills.
    pub fn push_samples(&self, samples: &[i16]) {
        let mut remaining = samples;

        while !remaining.is_empty() {
            let mut notified = false;
            {
                let mut state = self.state.lock();
                let room = WINDOW_SAMPLES - state.window.len();
                let take = room.min(remaining.len());
                state.window.extend_from_slice(&remaining[..take]);
                remaining = &remaining[take..];

                if state.window.len() == WINDOW_SAMPLES {
                    let window = std::mem::replace(&mut state.window, Vec::with_capacity(WINDOW_SAMPLES));
                    drop(state);
                    if self.process_window(&window) {
                        notified = true;
                    }
                }
            }
            if notified {
                (self.notify)();
            }
        }
    }

    /// Runs the silence gate and, if recording, encodes and buffers the
    /// window. Returns whether a packet was produced (worth waking up for).
    fn process_window(&self, window: &[i16]) -> bool {
        let silent = window.iter().all(|&s| (s as i32).abs() < SILENCE_THRESHOLD as i32);

        let mut state = self.state.lock();
        if !state.recording {
            if silent {
                return false;
            }
            state.recording = true;
            state.silence_counter = 0;
        }
        drop(state);

        let packet = match self.encode(window) {
            Ok(packet) => packet,
            Err(_) => return false,
        };

        let mut state = self.state.lock();
        state.push_packet(packet);

        if silent {
            state.silence_counter += 1;
            if state.silence_counter >= SILENCE_HANGOVER {
                state.recording = false;
            }
        } else {
            state.silence_counter = 0;
        }

        if !state.recording && state.packets.is_empty() {
            state.emitting = false;
        }

        true
    }

    fn encode(&self, window: &[i16]) -> VoiceResult<Vec<u8>> {
        let mut out = [0u8; MAX_PACKET_BYTES];
        let mut encoder = self.encoder.lock();
        let len = encoder.encode(window, &mut out)?;
        if len > MAX_PACKET_BYTES {
            return Err(VoiceError::OversizedPacket);
        }
        Ok(out[..len].to_vec())
    }

    /// Whether a packet is available to send: the buffer has primed past
    /// `MIN_BUFFER_PACKETS` and has not since fully drained while silent.
    pub fn has_packet(&self) -> bool {
        let state = self.state.lock();
        state.emitting && !state.packets.is_empty()
    }

    /// Pops the oldest pending packet, if any.
    pub fn get_packet(&self) -> Option<Vec<u8>> {
        let mut state = self.state.lock();
        if !state.emitting {
            return None;
        }
        let packet = state.packets.pop_front();
        if state.packets.is_empty() && !state.recording {
            state.emitting = false;
        }
        packet
    }
}
