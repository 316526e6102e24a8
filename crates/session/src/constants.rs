use std::time::Duration;

/// Working sample rate of the capture pipeline.
pub const SAMPLE_RATE: usize = 16000;

/// Duration of each capture read in milliseconds.
pub const CHUNK_DURATION_MS: usize = 50;

/// Samples per capture read.
pub const CHUNK_SAMPLES: usize = SAMPLE_RATE * CHUNK_DURATION_MS / 1000;

/// Buffer growth increment: 30 seconds of audio.
pub const EPOCH_SAMPLES: usize = SAMPLE_RATE * 30;

/// Free space below which the buffer-limit warning state is raised (~5s),
/// once growth is no longer possible.
pub const BUFFER_TAIL_WARNING_SAMPLES: usize = SAMPLE_RATE * 5;

/// Samples that must elapse before the blocked-microphone state may be
/// raised (~2s).
pub const MIC_BLOCK_GRACE_SAMPLES: usize = SAMPLE_RATE * 2;

/// Attempts at opening the capture device before giving up.
pub const DEVICE_INIT_RETRIES: u32 = 32;

/// Reclaim cycles run between out-of-memory retries.
pub const OOM_RECLAIM_CYCLES: u32 = 2;

/// Wait per reclaim cycle.
pub const OOM_RECLAIM_DELAY: Duration = Duration::from_millis(500);

/// Base `k` of the magnitude curve `1 - k^(c * rms)`.
pub const MAGNITUDE_BASE: f32 = 0.1;

/// Scale `c` of the magnitude curve.
pub const MAGNITUDE_SCALE: f32 = 30.0;

/// Chunk RMS above which the session counts as having heard something.
pub const AUDIBLE_RMS: f32 = 0.003;
