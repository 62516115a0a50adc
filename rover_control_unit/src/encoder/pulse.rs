//! ISR-safe pulse capture with consistent snapshots.
//!
//! One instance per encoder channel. The interrupt context is the sole
//! writer and is wait-free; the control task reads a consistent
//! three-word snapshot through a sequence-counter protocol: the writer
//! bumps the counter to odd before touching the payload and to even
//! after, the reader retries while the counter is odd or changed
//! mid-read. With a single writer the reader loop is bounded by one
//! in-flight update.
//!
//! The capture interprets nothing: direction, sectors and correction all
//! live downstream.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Consumer view of the capture state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PulseSnapshot {
    /// Accepted pulses since construction or [`PulseCapture::reset`].
    pub count: u32,
    /// Most recent valid inter-pulse interval [µs]. 0 until two pulses
    /// have been accepted.
    pub period_us: u32,
    /// Timestamp of the most recent accepted pulse [µs].
    pub last_us: u64,
}

/// Shared pulse state between interrupt context and the control task.
#[derive(Debug)]
pub struct PulseCapture {
    /// Snapshot consistency counter: odd while a write is in flight.
    seq: AtomicU32,
    count: AtomicU32,
    period_us: AtomicU32,
    last_us: AtomicU64,
    /// Software debounce on top of the hardware glitch filter. 0 disables.
    min_gap_us: u32,
}

impl PulseCapture {
    pub fn new(min_gap_us: u32) -> Self {
        Self {
            seq: AtomicU32::new(0),
            count: AtomicU32::new(0),
            period_us: AtomicU32::new(0),
            last_us: AtomicU64::new(0),
            min_gap_us,
        }
    }

    /// Record one hardware pulse at `now_us`. Interrupt context only.
    ///
    /// Pulses closer than `min_gap_us` to the previous accepted pulse are
    /// discarded. The first pulse ever seen establishes the timestamp
    /// base without producing a period.
    pub fn on_pulse(&self, now_us: u64) {
        // Sole-writer fields can be read relaxed here.
        let last = self.last_us.load(Ordering::Relaxed);
        let count = self.count.load(Ordering::Relaxed);

        if count > 0 {
            let gap = now_us.saturating_sub(last);
            if self.min_gap_us > 0 && gap < u64::from(self.min_gap_us) {
                return;
            }
            self.begin_write();
            self.period_us
                .store(gap.min(u64::from(u32::MAX)) as u32, Ordering::Relaxed);
            self.count.store(count.wrapping_add(1), Ordering::Relaxed);
            self.last_us.store(now_us, Ordering::Relaxed);
            self.end_write();
        } else {
            self.begin_write();
            self.count.store(1, Ordering::Relaxed);
            self.last_us.store(now_us, Ordering::Relaxed);
            self.end_write();
        }
    }

    /// Read a consistent snapshot. Control task only.
    pub fn snapshot(&self) -> PulseSnapshot {
        loop {
            let s1 = self.seq.load(Ordering::Acquire);
            if s1 & 1 != 0 {
                core::hint::spin_loop();
                continue;
            }
            let snap = PulseSnapshot {
                count: self.count.load(Ordering::Relaxed),
                period_us: self.period_us.load(Ordering::Relaxed),
                last_us: self.last_us.load(Ordering::Relaxed),
            };
            if self.seq.load(Ordering::Acquire) == s1 {
                return snap;
            }
        }
    }

    /// Zero the capture state (count, period, timestamp).
    pub fn reset(&self) {
        self.begin_write();
        self.count.store(0, Ordering::Relaxed);
        self.period_us.store(0, Ordering::Relaxed);
        self.last_us.store(0, Ordering::Relaxed);
        self.end_write();
    }

    #[inline]
    fn begin_write(&self) {
        self.seq.fetch_add(1, Ordering::Release);
    }

    #[inline]
    fn end_write(&self) {
        self.seq.fetch_add(1, Ordering::Release);
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
