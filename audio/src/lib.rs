//! Playback-side mixing: per-source Opus decode into a shared ring buffer.

use parking_lot::Mutex;
use std::collections::HashMap;
use thiserror::Error;

pub const SAMPLE_RATE: u32 = 48_000;
/// 120 ms at 48 kHz mono is comfortably larger than any Opus frame size.
const MAX_FRAME_SAMPLES: usize = 5_760;
const MIN_RING_SAMPLES: usize = 1_024;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("opus error: {0}")]
    Opus(#[from] opus::Error),
    #[error("decoded packet carries zero samples")]
    EmptyPacket,
}

pub type AudioResult<T> = Result<T, AudioError>;

struct ChannelState {
    decoder: opus::Decoder,
    /// Samples ahead of the ring's logical start where this source's next
    /// decoded frame lands.
    offset: usize,
}

struct MixerState {
    ring: Vec<i16>,
    size: usize,
    start: usize,
    length: usize,
    channels: HashMap<u32, ChannelState>,
}

impl MixerState {
    fn new() -> MixerState {
        MixerState {
            ring: vec![0i16; MIN_RING_SAMPLES],
            size: MIN_RING_SAMPLES,
            start: 0,
            length: 0,
            channels: HashMap::new(),
        }
    }

    fn reserve(&mut self, required: usize) {
        if required <= self.size {
            return;
        }
        let mut new_size = self.size;
        while new_size < required {
            new_size *= 2;
        }

        let mut new_ring = vec![0i16; new_size];
        for i in 0..self.length {
            new_ring[i] = self.ring[(self.start + i) % self.size];
        }
        self.ring = new_ring;
        self.size = new_size;
        self.start = 0;
    }

    fn mix(&mut self, offset: usize, samples: &[i16]) {
        self.reserve(offset + samples.len());
        let size = self.size;
        for (i, &sample) in samples.iter().enumerate() {
            let idx = (self.start + offset + i) % size;
            self.ring[idx] = self.ring[idx].saturating_add(sample);
        }
        self.length = self.length.max(offset + samples.len());
    }

    fn drain(&mut self, dst: &mut [i16]) {
        let available = dst.len().min(self.length);
        let size = self.size;

        for (i, slot) in dst.iter_mut().enumerate().take(available) {
            let idx = (self.start + i) % size;
            *slot = self.ring[idx];
            self.ring[idx] = 0;
        }
        for slot in dst.iter_mut().skip(available) {
            *slot = 0;
        }

        self.start = (self.start + available) % size;
        self.length -= available;

        for channel in self.channels.values_mut() {
            channel.offset = channel.offset.saturating_sub(available);
        }
    }
}

/// Shared mixing ring; `add_packet` (decode thread) and `get` (playback
/// thread) are atomic with respect to each other via a single mutex.
pub struct AudioMixer {
    inner: Mutex<MixerState>,
}

impl Default for AudioMixer {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioMixer {
    pub fn new() -> AudioMixer {
        AudioMixer {
            inner: Mutex::new(MixerState::new()),
        }
    }

    /// Decodes `opus_bytes` from `channel`, growing the ring as needed, and
    /// mixes (saturating add) the result at that channel's current offset.
    pub fn add_packet(&self, channel: u32, opus_bytes: &[u8]) -> AudioResult<()> {
        let mut state = self.inner.lock();

        if !state.channels.contains_key(&channel) {
            let decoder = opus::Decoder::new(SAMPLE_RATE, opus::Channels::Mono)?;
            state.channels.insert(channel, ChannelState { decoder, offset: 0 });
        }

        let nb_samples = {
            let channel_state = state.channels.get(&channel).unwrap();
            channel_state.decoder.get_nb_samples(opus_bytes)?
        };
        if nb_samples == 0 {
            return Err(AudioError::EmptyPacket);
        }

        let mut frame = [0i16; MAX_FRAME_SAMPLES];
        let decoded = {
            let channel_state = state.channels.get_mut(&channel).unwrap();
            channel_state
                .decoder
                .decode(opus_bytes, &mut frame[..nb_samples], false)?
        };

        let offset = state.channels.get(&channel).unwrap().offset;
        state.mix(offset, &frame[..decoded]);
        state.channels.get_mut(&channel).unwrap().offset += decoded;

        Ok(())
    }

    /// Copies `dst.len()` mixed samples out, zero-padding any shortfall and
    /// rewinding every channel's offset by the amount drained.
    pub fn get(&self, dst: &mut [i16]) {
        self.inner.lock().drain(dst);
    }

    pub fn drop_channel(&self, channel: u32) {
        self.inner.lock().channels.remove(&channel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mix_state_saturating_add_and_growth() {
        let mut state = MixerState::new();
        state.mix(0, &[100, 200]);
        state.mix(0, &[50, i16::MAX]);

        assert_eq!(state.ring[0], 150);
        assert_eq!(state.ring[1], i16::MAX);
        assert_eq!(state.length, 2);
    }

    #[test]
    fn test_reserve_grows_as_power_of_two_and_preserves_data() {
        let mut state = MixerState::new();
        state.mix(0, &[7, 8, 9]);
        state.reserve(MIN_RING_SAMPLES * 3);

        assert!(state.size >= MIN_RING_SAMPLES * 3);
        assert_eq!(state.size.count_ones(), 1);
        assert_eq!(&state.ring[0..3], &[7, 8, 9]);
    }

    #[test]
    fn test_drain_zeroes_and_advances() {
        let mut state = MixerState::new();
        state.mix(0, &[1, 2, 3, 4]);

        let mut dst = [0i16; 2];
        state.drain(&mut dst);

        assert_eq!(dst, [1, 2]);
        assert_eq!(state.length, 2);
        assert_eq!(state.ring[0], 0);
        assert_eq!(state.ring[1], 0);
    }

    #[test]
    fn test_drain_zero_pads_shortfall() {
        let mut state = MixerState::new();
        state.mix(0, &[9]);

        let mut dst = [5i16; 4];
        state.drain(&mut dst);

        assert_eq!(dst, [9, 0, 0, 0]);
        assert_eq!(state.length, 0);
    }

    #[test]
    fn test_drain_rewinds_channel_offsets_floored_at_zero() {
        let mut state = MixerState::new();
        state.channels.insert(
            1,
            ChannelState {
                decoder: opus::Decoder::new(SAMPLE_RATE, opus::Channels::Mono).unwrap(),
                offset: 3,
            },
        );
        state.mix(3, &[42]);

        let mut dst = [0i16; 10];
        state.drain(&mut dst);

        assert_eq!(state.channels.get(&1).unwrap().offset, 0);
    }
}
