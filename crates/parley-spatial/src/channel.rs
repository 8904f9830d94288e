use tracing::trace;

use crate::StereoGain;

/// Output stage that receives per-ear gains, e.g. a pair of gain nodes feeding
/// a two-channel merger.
pub trait StereoSink: Send {
    fn set_gains(&mut self, gain: StereoGain);
    /// Toggle the underlying stream. Disabled streams stop decoding entirely.
    fn set_enabled(&mut self, enabled: bool);
    fn close(&mut self);
}

/// Gain stage for one remote voice.
pub struct SpatialChannel {
    sink: Box<dyn StereoSink>,
    gain: StereoGain,
    enabled: bool,
    closed: bool,
}

impl SpatialChannel {
    /// Wrap `sink` and apply `initial` immediately.
    pub fn new(sink: Box<dyn StereoSink>, initial: StereoGain) -> Self {
        let mut channel = Self {
            sink,
            gain: StereoGain::FULL,
            enabled: true,
            closed: false,
        };
        channel.set_volume(initial.left, initial.right);
        channel
    }

    /// Clamp both gains into `[0, 1]` and push them to the sink.
    ///
    /// The stream stays enabled while either ear can hear it, so a source that
    /// is panned hard to one side keeps playing.
    pub fn set_volume(&mut self, left: f64, right: f64) {
        if self.closed {
            return;
        }
        let gain = StereoGain::new(left, right);
        let enabled = !gain.is_silent();
        if enabled != self.enabled {
            trace!(enabled, "spatial channel toggled");
            self.sink.set_enabled(enabled);
            self.enabled = enabled;
        }
        self.sink.set_gains(gain);
        self.gain = gain;
    }

    pub fn apply(&mut self, gain: StereoGain) {
        self.set_volume(gain.left, gain.right);
    }

    pub fn gain(&self) -> StereoGain {
        self.gain
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Release the sink. Later calls are no-ops.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.sink.close();
    }
}

impl Drop for SpatialChannel {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for SpatialChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpatialChannel")
            .field("gain", &self.gain)
            .field("enabled", &self.enabled)
            .field("closed", &self.closed)
            .finish()
    }
}
