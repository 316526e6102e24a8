/// Exclusive audio-focus-like resource held around the capture window.
///
/// Acquisition and release are best-effort: failures are logged by the
/// caller and never abort a session. At most one session holds focus at a
/// time; release must be idempotent.
pub trait AudioFocus: Send + Sync {
    fn acquire(&self) -> crate::Result<()>;
    fn release(&self);
}

/// Focus implementation for hosts without audio-focus arbitration.
pub struct NoopFocus;

impl AudioFocus for NoopFocus {
    fn acquire(&self) -> crate::Result<()> {
        Ok(())
    }

    fn release(&self) {}
}
