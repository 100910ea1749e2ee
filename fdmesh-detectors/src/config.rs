//! Shared detector configuration.

/// Controls whether per-tick traces are emitted. Per spec.md §6: "under
/// non-verbose mode the heartbeat/suspect detectors suppress per-event
/// traces." Transition logs (suspect, recover) always fire regardless.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetectorConfig {
    pub verbose: bool,
}
