//! PCM/WAV utilities (C2): RMS energy, 16-bit PCM <-> float32, WAV framing.
//!
//! Grounded on the energy computation in the teacher's streaming VAD and on
//! the byte-exact WAV layout spec §6 requires; written by hand rather than
//! via `hound` because the header must be produced into a plain `Vec<u8>`.

/// Emits a 44-byte little-endian RIFF/WAVE header followed by `pcm` as-is.
/// Byte-exact for a given `(pcm, sample_rate)` pair (spec §4.2, §8 prop 3).
pub fn pcm_to_wav(pcm: &[u8], sample_rate: u32) -> Vec<u8> {
    const CHANNELS: u16 = 1;
    const BITS_PER_SAMPLE: u16 = 16;
    let block_align: u16 = CHANNELS * (BITS_PER_SAMPLE / 8);
    let byte_rate: u32 = sample_rate * block_align as u32;
    let data_size = pcm.len() as u32;
    let chunk_size = 36 + data_size;

    let mut out = Vec::with_capacity(44 + pcm.len());
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&chunk_size.to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes()); // fmt chunk size
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM tag
    out.extend_from_slice(&CHANNELS.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_size.to_le_bytes());
    out.extend_from_slice(pcm);
    out
}

/// Parsed subset of a WAV header, used only by tests to verify round-trips.
#[derive(Debug, PartialEq, Eq)]
pub struct WavHeader {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub data_size: u32,
}

pub fn parse_wav_header(wav: &[u8]) -> Option<WavHeader> {
    if wav.len() < 44 || &wav[0..4] != b"RIFF" || &wav[8..12] != b"WAVE" {
        return None;
    }
    let channels = u16::from_le_bytes([wav[22], wav[23]]);
    let sample_rate = u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]);
    let bits_per_sample = u16::from_le_bytes([wav[34], wav[35]]);
    let data_size = u32::from_le_bytes([wav[40], wav[41], wav[42], wav[43]]);
    Some(WavHeader { sample_rate, channels, bits_per_sample, data_size })
}

fn iter_samples(pcm: &[u8]) -> impl Iterator<Item = i16> + '_ {
    pcm.chunks_exact(2).map(|b| i16::from_le_bytes([b[0], b[1]]))
}

/// RMS of signed little-endian 16-bit samples.
pub fn compute_rms(pcm: &[u8]) -> f64 {
    let samples: Vec<i16> = iter_samples(pcm).collect();
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_sq / samples.len() as f64).sqrt()
}

/// Converts signed 16-bit PCM to normalized float32 samples in `[-1.0, 1.0)`.
pub fn pcm_to_float32(pcm: &[u8]) -> Vec<f32> {
    iter_samples(pcm).map(|s| s as f32 / 32768.0).collect()
}

pub fn is_silent(pcm: &[u8], threshold: f64) -> bool {
    compute_rms(pcm) < threshold
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn wav_header_round_trips_byte_exact() {
        let pcm = vec![1u8, 0, 2, 0, 3, 0, 4, 0];
        let wav = pcm_to_wav(&pcm, 16_000);
        assert_eq!(&wav[44..], &pcm[..]);
        let header = parse_wav_header(&wav).unwrap();
        assert_eq!(header.sample_rate, 16_000);
        assert_eq!(header.channels, 1);
        assert_eq!(header.bits_per_sample, 16);
        assert_eq!(header.data_size, pcm.len() as u32);
    }

    #[test]
    fn hound_reads_our_header() {
        let pcm = vec![0u8, 0, 10, 0, 246, 255];
        let wav = pcm_to_wav(&pcm, 16_000);
        let reader = hound::WavReader::new(std::io::Cursor::new(wav)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, 16_000);
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.bits_per_sample, 16);
    }

    #[test]
    fn rms_of_silence_is_zero() {
        let pcm = vec![0u8; 3200];
        assert_relative_eq!(compute_rms(&pcm), 0.0, epsilon = 1e-9);
        assert!(is_silent(&pcm, 1.0));
    }

    #[test]
    fn rms_of_constant_amplitude_matches_amplitude() {
        let mut pcm = Vec::new();
        for _ in 0..100 {
            pcm.extend_from_slice(&1000i16.to_le_bytes());
        }
        assert_relative_eq!(compute_rms(&pcm), 1000.0, epsilon = 1e-6);
    }

    #[test]
    fn float32_conversion_scales_correctly() {
        let pcm = 16384i16.to_le_bytes();
        let floats = pcm_to_float32(&pcm);
        assert_relative_eq!(floats[0], 0.5, epsilon = 1e-4);
    }
}
