//! Session watchdog.
//!
//! Watches the frames leaving a session and kills it when playback has
//! effectively stopped: either every frame has been blank for the
//! no-playback timeout, or every detection window has contained drops
//! for the choppy-playback timeout. A warmup period after startup is
//! exempt from the blank check so a slow sender is not killed before its
//! first packet.

use tracing::debug;

use audiolink_packet_core::units::Nanos;

use crate::error::{AudioError, AudioResult};
use crate::frame::{Frame, FrameReader, FLAG_HAS_DROPS, FLAG_HAS_GAPS, FLAG_HAS_SIGNAL};
use crate::sample::SampleSpec;

/// Watchdog timeouts. Zero fields are deduced from the target latency.
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// Kill the session when every frame was blank for this long.
    /// Negative disables the check.
    pub no_playback_timeout: Nanos,

    /// Kill the session when every detection window contained gaps and
    /// drops for this long. Negative disables the check.
    pub choppy_playback_timeout: Nanos,

    /// Size of the drop detection window.
    pub choppy_playback_window: Nanos,

    /// Grace period after startup during which blank output is allowed.
    pub warmup_duration: Nanos,

    /// Frames per status trace line. Zero disables the trace.
    pub frame_status_window: usize,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            no_playback_timeout: 0,
            choppy_playback_timeout: 0,
            choppy_playback_window: 0,
            warmup_duration: 0,
            frame_status_window: 20,
        }
    }
}

impl WatchdogConfig {
    /// Fill zero fields from the configured target latency.
    pub fn deduce_defaults(&mut self, target_latency: Nanos) {
        if self.no_playback_timeout == 0 {
            self.no_playback_timeout = target_latency * 4 / 3;
        }
        if self.choppy_playback_timeout == 0 {
            self.choppy_playback_timeout = 2 * 1_000_000_000;
        }
        if self.choppy_playback_window == 0 {
            self.choppy_playback_window =
                (300 * 1_000_000).min(self.choppy_playback_timeout / 4);
        }
        if self.warmup_duration == 0 {
            self.warmup_duration = target_latency;
        }
    }
}

/// Frame reader stage enforcing the playback timeouts.
pub struct Watchdog {
    reader: Box<dyn FrameReader>,
    spec: SampleSpec,

    /// All positions below are in samples on the output timeline.
    max_blank_duration: u32,
    max_drops_duration: u32,
    drops_window: u32,
    warmup_duration: u32,

    curr_read_pos: u32,
    last_pos_before_blank: u32,
    last_pos_before_drops: u32,
    in_warmup: bool,
    curr_window_flags: u8,

    /// Per-frame status trace: one symbol per frame, flushed to the log
    /// when the line fills or the session dies. Empty when disabled.
    status: Vec<u8>,
    status_pos: usize,
    show_status: bool,
}

impl Watchdog {
    pub fn new(
        reader: Box<dyn FrameReader>,
        spec: SampleSpec,
        config: &WatchdogConfig,
    ) -> AudioResult<Self> {
        let max_blank_duration = if config.no_playback_timeout >= 0 {
            spec.ns_to_stream_timestamp(config.no_playback_timeout).max(1)
        } else {
            0
        };
        let (max_drops_duration, drops_window) = if config.choppy_playback_timeout >= 0 {
            (
                spec.ns_to_stream_timestamp(config.choppy_playback_timeout).max(1),
                spec.ns_to_stream_timestamp(config.choppy_playback_window).max(1),
            )
        } else {
            (0, 0)
        };
        let warmup_duration = if config.warmup_duration >= 0 {
            spec.ns_to_stream_timestamp(config.warmup_duration).max(1)
        } else {
            0
        };

        if max_drops_duration != 0 && drops_window > max_drops_duration {
            return Err(AudioError::InvalidConfig(
                "drop detection window exceeds choppy playback timeout".into(),
            ));
        }

        debug!(
            max_blank_duration,
            max_drops_duration, drops_window, warmup_duration, "watchdog: initializing"
        );

        let status = if config.frame_status_window != 0 {
            vec![0; config.frame_status_window + 1]
        } else {
            Vec::new()
        };

        Ok(Self {
            reader,
            spec,
            max_blank_duration,
            max_drops_duration,
            drops_window,
            warmup_duration,
            curr_read_pos: 0,
            last_pos_before_blank: warmup_duration,
            last_pos_before_drops: 0,
            in_warmup: warmup_duration != 0,
            curr_window_flags: 0,
            status,
            status_pos: 0,
            show_status: false,
        })
    }

    fn update(&mut self, frame: &Frame, duration: u32) -> AudioResult<()> {
        let next_read_pos = self.curr_read_pos.wrapping_add(duration);

        self.update_blank_timeout(frame, next_read_pos);
        self.update_drops_timeout(frame, next_read_pos);
        self.update_status(frame);

        self.curr_read_pos = next_read_pos;

        if let Err(err) = self.check_drops_timeout() {
            self.flush_status();
            return Err(err);
        }
        if let Err(err) = self.check_blank_timeout() {
            self.flush_status();
            return Err(err);
        }

        self.in_warmup = self.in_warmup && self.curr_read_pos < self.warmup_duration;

        Ok(())
    }

    fn update_blank_timeout(&mut self, frame: &Frame, next_read_pos: u32) {
        if self.max_blank_duration == 0 {
            return;
        }
        if frame.has_flags(FLAG_HAS_SIGNAL) {
            self.last_pos_before_blank = next_read_pos;
            self.in_warmup = false;
        }
    }

    fn check_blank_timeout(&self) -> AudioResult<()> {
        if self.max_blank_duration == 0 || self.in_warmup {
            return Ok(());
        }
        if self.curr_read_pos.wrapping_sub(self.last_pos_before_blank) < self.max_blank_duration
        {
            return Ok(());
        }

        debug!(
            max_blank = self.max_blank_duration,
            "watchdog: no playback timeout reached, every frame was blank"
        );
        Err(AudioError::SessionTimeout(format!(
            "no playback for {:.1} ms",
            self.spec.stream_timestamp_to_ms(self.max_blank_duration)
        )))
    }

    fn update_drops_timeout(&mut self, frame: &Frame, next_read_pos: u32) {
        if self.max_drops_duration == 0 {
            return;
        }

        self.curr_window_flags |= frame.flags();

        let window_start = self.curr_read_pos / self.drops_window * self.drops_window;
        let window_end = window_start + self.drops_window;

        if window_end <= next_read_pos {
            let drop_flags = FLAG_HAS_GAPS | FLAG_HAS_DROPS;

            if self.curr_window_flags & drop_flags != drop_flags {
                self.last_pos_before_drops = next_read_pos;
            }

            if next_read_pos % self.drops_window == 0 {
                self.curr_window_flags = 0;
            } else {
                self.curr_window_flags = frame.flags();
            }
        }
    }

    fn check_drops_timeout(&self) -> AudioResult<()> {
        if self.max_drops_duration == 0 {
            return Ok(());
        }
        if self.curr_read_pos.wrapping_sub(self.last_pos_before_drops) < self.max_drops_duration
        {
            return Ok(());
        }

        debug!(
            max_drops = self.max_drops_duration,
            "watchdog: choppy playback timeout reached"
        );
        Err(AudioError::SessionTimeout(format!(
            "choppy playback for {:.1} ms",
            self.spec.stream_timestamp_to_ms(self.max_drops_duration)
        )))
    }

    /// Append one symbol to the status trace:
    /// `.` clean, `b`/`B` blank (uppercase with drops), `w`/`W` blank
    /// during warmup, `i`/`I` gaps, `D` drops only.
    fn update_status(&mut self, frame: &Frame) {
        if self.status.is_empty() {
            return;
        }

        let flags = frame.flags();

        let symbol = if flags & FLAG_HAS_SIGNAL == 0 {
            match (self.in_warmup, flags & FLAG_HAS_DROPS != 0) {
                (true, true) => b'W',
                (true, false) => b'w',
                (false, true) => b'B',
                (false, false) => b'b',
            }
        } else if flags & FLAG_HAS_GAPS != 0 {
            if flags & FLAG_HAS_DROPS != 0 {
                b'I'
            } else {
                b'i'
            }
        } else if flags & FLAG_HAS_DROPS != 0 {
            b'D'
        } else {
            b'.'
        };

        self.status[self.status_pos] = symbol;
        self.status_pos += 1;
        self.show_status = self.show_status || symbol != b'.';

        if self.status_pos == self.status.len() - 1 {
            self.flush_status();
        }
    }

    /// Log the accumulated trace line, unless it was all clean.
    fn flush_status(&mut self) {
        if self.status_pos == 0 {
            return;
        }

        if self.show_status {
            let line = std::str::from_utf8(&self.status[..self.status_pos]).unwrap_or("");
            debug!(status = line, "watchdog: status");
        }

        self.status_pos = 0;
        self.show_status = false;
    }
}

impl FrameReader for Watchdog {
    fn read(&mut self, frame: &mut Frame, duration: usize) -> AudioResult<()> {
        self.reader.read(frame, duration)?;
        self.update(frame, duration as u32)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ChannelSet;

    /// Inner reader producing frames with scripted flags.
    struct ScriptedReader {
        flags: Vec<u8>,
        pos: usize,
    }

    impl FrameReader for ScriptedReader {
        fn read(&mut self, frame: &mut Frame, duration: usize) -> AudioResult<()> {
            frame.prepare(duration);
            let flags = self.flags.get(self.pos).copied().unwrap_or(0);
            self.pos += 1;
            if flags & FLAG_HAS_SIGNAL != 0 {
                frame.samples_mut()[0] = 0.5;
            }
            frame.add_flags(flags);
            Ok(())
        }
    }

    fn spec() -> SampleSpec {
        SampleSpec::new(1_000, ChannelSet::mono())
    }

    fn config(no_playback_ms: i64, warmup_ms: i64) -> WatchdogConfig {
        WatchdogConfig {
            no_playback_timeout: no_playback_ms * 1_000_000,
            choppy_playback_timeout: -1,
            choppy_playback_window: 0,
            warmup_duration: warmup_ms * 1_000_000,
            ..Default::default()
        }
    }

    #[test]
    fn test_blank_timeout_kills_session() {
        // 100 samples of allowed blank at 1 kHz; warmup disabled.
        let reader = ScriptedReader {
            flags: vec![FLAG_HAS_SIGNAL],
            pos: 0,
        };
        let mut watchdog =
            Watchdog::new(Box::new(reader), spec(), &config(100, -1)).unwrap();

        let mut frame = Frame::new();
        watchdog.read(&mut frame, 50).unwrap(); // signal
        watchdog.read(&mut frame, 50).unwrap(); // blank, 50 < 100
        assert!(watchdog.read(&mut frame, 50).is_err()); // blank, 100 reached
    }

    #[test]
    fn test_signal_resets_blank_timer() {
        let reader = ScriptedReader {
            flags: vec![FLAG_HAS_SIGNAL, 0, FLAG_HAS_SIGNAL, 0, FLAG_HAS_SIGNAL],
            pos: 0,
        };
        let mut watchdog =
            Watchdog::new(Box::new(reader), spec(), &config(100, -1)).unwrap();

        let mut frame = Frame::new();
        for _ in 0..5 {
            watchdog.read(&mut frame, 60).unwrap();
        }
    }

    #[test]
    fn test_warmup_allows_initial_blank() {
        let reader = ScriptedReader {
            flags: vec![],
            pos: 0,
        };
        // 100 ms timeout, 500 ms warmup: blank output survives well past
        // the timeout while warming up.
        let mut watchdog =
            Watchdog::new(Box::new(reader), spec(), &config(100, 500)).unwrap();

        let mut frame = Frame::new();
        for _ in 0..4 {
            watchdog.read(&mut frame, 100).unwrap();
        }
        // This read crosses the warmup boundary and is still forgiven.
        watchdog.read(&mut frame, 200).unwrap();
        // Past warmup, the blank timeout applies again.
        assert!(watchdog.read(&mut frame, 200).is_err());
    }

    #[test]
    fn test_choppy_playback_detection() {
        // Every window has gaps+drops: dies after the choppy timeout.
        let reader = ScriptedReader {
            flags: vec![FLAG_HAS_SIGNAL | FLAG_HAS_GAPS | FLAG_HAS_DROPS; 100],
            pos: 0,
        };
        let config = WatchdogConfig {
            no_playback_timeout: -1,
            choppy_playback_timeout: 400 * 1_000_000,
            choppy_playback_window: 100 * 1_000_000,
            warmup_duration: -1,
            ..Default::default()
        };
        let mut watchdog = Watchdog::new(Box::new(reader), spec(), &config).unwrap();

        let mut frame = Frame::new();
        let mut died = false;
        for _ in 0..10 {
            if watchdog.read(&mut frame, 100).is_err() {
                died = true;
                break;
            }
        }
        assert!(died);
    }

    #[test]
    fn test_status_trace_symbols() {
        // Signal, blank, gaps, gaps+drops, drops-only.
        let reader = ScriptedReader {
            flags: vec![
                FLAG_HAS_SIGNAL,
                0,
                FLAG_HAS_SIGNAL | FLAG_HAS_GAPS,
                FLAG_HAS_SIGNAL | FLAG_HAS_GAPS | FLAG_HAS_DROPS,
                FLAG_HAS_SIGNAL | FLAG_HAS_DROPS,
            ],
            pos: 0,
        };
        let mut cfg = config(10_000, -1);
        cfg.frame_status_window = 8;
        let mut watchdog = Watchdog::new(Box::new(reader), spec(), &cfg).unwrap();

        let mut frame = Frame::new();
        for _ in 0..5 {
            watchdog.read(&mut frame, 10).unwrap();
        }

        assert_eq!(&watchdog.status[..watchdog.status_pos], &b".biID"[..]);
        assert!(watchdog.show_status);
    }

    #[test]
    fn test_status_trace_warmup_symbols() {
        // Blank frames during warmup trace as 'w', after warmup as 'b'.
        let reader = ScriptedReader {
            flags: vec![],
            pos: 0,
        };
        let mut cfg = config(10_000, 30);
        cfg.frame_status_window = 8;
        let mut watchdog = Watchdog::new(Box::new(reader), spec(), &cfg).unwrap();

        let mut frame = Frame::new();
        for _ in 0..5 {
            watchdog.read(&mut frame, 10).unwrap();
        }

        assert_eq!(&watchdog.status[..watchdog.status_pos], &b"wwwbb"[..]);
    }

    #[test]
    fn test_status_trace_flushes_when_full() {
        let reader = ScriptedReader {
            flags: vec![FLAG_HAS_SIGNAL | FLAG_HAS_DROPS; 10],
            pos: 0,
        };
        let mut cfg = config(10_000, -1);
        cfg.frame_status_window = 4;
        let mut watchdog = Watchdog::new(Box::new(reader), spec(), &cfg).unwrap();

        let mut frame = Frame::new();
        for _ in 0..4 {
            watchdog.read(&mut frame, 10).unwrap();
        }

        // The line filled and was flushed: the buffer starts over.
        assert_eq!(watchdog.status_pos, 0);
        assert!(!watchdog.show_status);
    }
}
