/// A producer of normalized mono samples at [`crate::SAMPLE_RATE`].
///
/// Implementations wrap a capture device (or any other sample producer) and
/// deliver audio in caller-sized chunks. Sessions consume exactly one source
/// for their whole lifetime.
pub trait FrameSource: Send {
    /// Blocking read of up to `max` samples.
    ///
    /// Blocks until `max` samples are available. A short or empty return
    /// signals that the stream has ended and no more samples will arrive.
    fn read(&mut self, max: usize) -> crate::Result<Vec<f32>>;

    /// Non-blocking drain of up to `max` already-buffered samples.
    ///
    /// Used to catch up when processing falls behind real time. An empty
    /// return means the consumer has caught up, not that the stream ended.
    fn try_read(&mut self, max: usize) -> crate::Result<Vec<f32>>;

    /// Whether the device reports a hardware microphone-occlusion signal.
    fn supports_block_detection(&self) -> bool {
        false
    }

    /// Current state of the hardware occlusion signal, if supported.
    fn is_blocked(&self) -> bool {
        false
    }
}

/// Opens a fresh [`FrameSource`] for one recording session.
pub trait CaptureDevice: Send + Sync {
    fn open(&self) -> crate::Result<Box<dyn FrameSource>>;
}
