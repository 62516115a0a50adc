//! The sector calibrator: owns the correction table, the acquisition
//! runs and the persistence binding for one wheel.
//!
//! Calibration and alignment are each exclusive with themselves but not
//! with each other; `feed_period` services whichever runs are active.
//! Completion is polled from the estimator's pulse loop so LUT updates
//! land between samples, never mid-sample.

use rover_common::state::StepDirection;
use rover_hal::store::KvStore;
use tracing::{info, warn};

use super::alignment::{self, LapMatch};
use super::run::AcquisitionGrid;
use super::store::{load_table, save_table};
use super::table::{trimmed_mean, CorrectionTable};
use super::RoutineStartError;

/// Result of a completed alignment run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignmentOutcome {
    pub dir: StepDirection,
    /// Chosen phase between running sector index and pattern.
    pub offset: u16,
    /// Mean per-sector L1 distance of the winning match.
    pub score: f32,
}

/// Outcome of polling a calibration run for completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationPoll {
    /// No run active, or laps still being collected.
    Pending,
    /// Run completed; the direction's LUT was updated and persisted.
    Finished(StepDirection),
    /// Run completed with zero usable samples; LUT untouched.
    Aborted(StepDirection),
}

/// Outcome of polling an alignment run for completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlignmentPoll {
    Pending,
    /// Run completed; the direction's offset was updated and persisted.
    Finished(AlignmentOutcome),
    /// Run completed with no usable lap; offset untouched.
    Aborted(StepDirection),
}

/// Per-wheel calibration pipeline.
pub struct SectorCalibrator {
    table: CorrectionTable,
    cal_run: AcquisitionGrid,
    align_run: AcquisitionGrid,
    store: Box<dyn KvStore>,
    ns: &'static str,
    max_laps: u8,
}

impl SectorCalibrator {
    pub fn new(
        ppr: usize,
        max_laps: u8,
        use_lut_by_default: bool,
        ns: &'static str,
        store: Box<dyn KvStore>,
    ) -> Self {
        Self {
            table: CorrectionTable::new(ppr, use_lut_by_default),
            cal_run: AcquisitionGrid::new(ppr),
            align_run: AcquisitionGrid::new(ppr),
            store,
            ns,
            max_laps,
        }
    }

    // ── Persistence ─────────────────────────────────────────────────

    /// Populate LUTs, flags and offsets from the store; rebuild patterns.
    /// Missing records degrade to the constructed defaults.
    pub fn load(&mut self) {
        load_table(self.store.as_ref(), self.ns, &mut self.table);
    }

    /// Persist LUTs, flags and offsets.
    pub fn save(&mut self) {
        if let Err(e) = save_table(self.store.as_mut(), self.ns, &self.table) {
            warn!(ns = self.ns, error = %e, "failed to persist calibration records");
        }
    }

    /// Reset both LUTs to neutral, clear flags and offsets, persist.
    pub fn clear(&mut self) {
        self.table.clear();
        self.save();
        info!(ns = self.ns, "calibration cleared to neutral");
    }

    // ── Correction ──────────────────────────────────────────────────

    /// Correct one raw period sample taken at sector `k`.
    #[inline]
    pub fn correct_dt(&self, k: u16, dt_us: f32, dir: StepDirection) -> f32 {
        self.table.correct_dt(k, dt_us, dir)
    }

    // ── Run control ─────────────────────────────────────────────────

    /// Arm a calibration run of `laps` revolutions in `dir`.
    pub fn start_calibration(
        &mut self,
        laps: u8,
        dir: StepDirection,
    ) -> Result<(), RoutineStartError> {
        self.check_laps(laps)?;
        if self.cal_run.active() {
            return Err(RoutineStartError::AlreadyRunning);
        }
        self.cal_run.arm(laps, dir);
        info!(ns = self.ns, laps, ?dir, "calibration started");
        Ok(())
    }

    /// Arm an alignment run; requires a usable pattern for `dir`.
    pub fn start_alignment(
        &mut self,
        laps: u8,
        dir: StepDirection,
    ) -> Result<(), RoutineStartError> {
        self.check_laps(laps)?;
        if self.align_run.active() {
            return Err(RoutineStartError::AlreadyRunning);
        }
        if !self.table.pattern_ready(dir) {
            return Err(RoutineStartError::PatternNotReady { dir });
        }
        self.align_run.arm(laps, dir);
        info!(ns = self.ns, laps, ?dir, "alignment started");
        Ok(())
    }

    fn check_laps(&self, laps: u8) -> Result<(), RoutineStartError> {
        if laps == 0 || laps > self.max_laps {
            return Err(RoutineStartError::InvalidLaps {
                laps,
                max: self.max_laps,
            });
        }
        Ok(())
    }

    /// Record one raw period sample into whichever runs are collecting.
    pub fn feed_period(&mut self, k: u16, dt_us: f32) {
        self.cal_run.feed(k, dt_us);
        self.align_run.feed(k, dt_us);
    }

    /// Abandon any active run without touching LUTs or offsets.
    pub fn cancel(&mut self) {
        if self.cal_run.active() || self.align_run.active() {
            warn!(ns = self.ns, "active runs cancelled");
        }
        self.cal_run.disarm();
        self.align_run.disarm();
    }

    /// Complete the calibration run once all laps are in: trimmed-mean
    /// aggregation per sector, LUT recompute, pattern rebuild, persist.
    pub fn finish_calibration_if_ready(&mut self) -> CalibrationPoll {
        if !self.cal_run.complete() {
            return CalibrationPoll::Pending;
        }
        let dir = self.cal_run.dir();
        let ppr = self.table.ppr();

        let mut means: [Option<f32>; rover_common::consts::PPR_LIMIT] =
            [None; rover_common::consts::PPR_LIMIT];
        for (k, slot) in means.iter_mut().enumerate().take(ppr) {
            *slot = trimmed_mean(&self.cal_run.sector_samples(k));
        }

        self.cal_run.disarm();
        if !self.table.recalibrate(dir, &means) {
            warn!(ns = self.ns, ?dir, "calibration collected no samples, LUT untouched");
            return CalibrationPoll::Aborted(dir);
        }
        self.table.set_enabled(dir, true);
        self.save();
        info!(ns = self.ns, ?dir, "calibration finished, LUT updated");
        CalibrationPoll::Finished(dir)
    }

    /// Complete the alignment run once all laps are in: circular shift
    /// search per lap, plurality vote, offset persist.
    pub fn finish_alignment_if_ready(&mut self) -> AlignmentPoll {
        if !self.align_run.complete() {
            return AlignmentPoll::Pending;
        }
        let dir = self.align_run.dir();
        let ppr = self.table.ppr();
        let mut pattern = [0.0f32; rover_common::consts::PPR_LIMIT];
        pattern[..ppr].copy_from_slice(self.table.pattern(dir));

        let mut matches: heapless::Vec<LapMatch, { rover_common::consts::MAX_LAPS_LIMIT }> =
            heapless::Vec::new();
        for lap in 0..self.align_run.laps_recorded() as usize {
            let row = self.align_run.lap_row(lap);
            if let Some(norm) = alignment::normalize_lap(&row) {
                // Lap count is bounded by the grid capacity; push cannot fail.
                let _ = matches.push(alignment::best_shift(&norm[..ppr], &pattern[..ppr]));
            }
        }

        self.align_run.disarm();
        let Some(winner) = alignment::vote(&matches) else {
            warn!(ns = self.ns, ?dir, "alignment collected no usable lap, offset untouched");
            return AlignmentPoll::Aborted(dir);
        };

        self.table.set_offset(dir, winner.shift);
        self.save();
        info!(
            ns = self.ns,
            ?dir,
            offset = winner.shift,
            score = winner.score,
            "alignment finished, offset updated"
        );
        AlignmentPoll::Finished(AlignmentOutcome {
            dir,
            offset: winner.shift,
            score: winner.score,
        })
    }

    // ── Predicates and accessors ────────────────────────────────────

    #[inline]
    pub fn is_calibrating(&self) -> bool {
        self.cal_run.active()
    }

    #[inline]
    pub fn is_aligning(&self) -> bool {
        self.align_run.active()
    }

    #[inline]
    pub fn pattern_ready(&self, dir: StepDirection) -> bool {
        self.table.pattern_ready(dir)
    }

    #[inline]
    pub fn lut_enabled(&self, dir: StepDirection) -> bool {
        self.table.enabled(dir)
    }

    /// Enable or disable correction for one direction and persist.
    pub fn set_lut_enabled(&mut self, dir: StepDirection, on: bool) {
        self.table.set_enabled(dir, on);
        self.save();
    }

    pub fn table(&self) -> &CorrectionTable {
        &self.table
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rover_hal::store::MemStore;
    use StepDirection::{Forward, Reverse};

    fn calibrator(ppr: usize) -> SectorCalibrator {
        SectorCalibrator::new(ppr, 12, false, "wheel_l", Box::new(MemStore::new()))
    }

    /// Feed one full lap of the given per-sector periods.
    fn feed_lap(c: &mut SectorCalibrator, periods: &[f32]) {
        for (k, p) in periods.iter().enumerate() {
            c.feed_period(k as u16, *p);
        }
    }

    #[test]
    fn start_rejects_bad_lap_counts() {
        let mut c = calibrator(4);
        assert_eq!(
            c.start_calibration(0, Forward),
            Err(RoutineStartError::InvalidLaps { laps: 0, max: 12 })
        );
        assert_eq!(
            c.start_calibration(13, Forward),
            Err(RoutineStartError::InvalidLaps { laps: 13, max: 12 })
        );
        assert!(!c.is_calibrating());
    }

    #[test]
    fn alignment_requires_ready_pattern() {
        let mut c = calibrator(4);
        assert_eq!(
            c.start_alignment(1, Forward),
            Err(RoutineStartError::PatternNotReady { dir: Forward })
        );
    }

    #[test]
    fn double_start_rejected() {
        let mut c = calibrator(4);
        c.start_calibration(2, Forward).unwrap();
        assert_eq!(
            c.start_calibration(2, Forward),
            Err(RoutineStartError::AlreadyRunning)
        );
    }

    #[test]
    fn calibration_and_alignment_can_coexist() {
        let mut c = calibrator(4);
        // Learn a pattern first.
        c.start_calibration(1, Forward).unwrap();
        feed_lap(&mut c, &[100.0, 200.0, 100.0, 100.0]);
        assert!(matches!(
            c.finish_calibration_if_ready(),
            CalibrationPoll::Finished(Forward)
        ));

        c.start_calibration(1, Forward).unwrap();
        c.start_alignment(1, Forward).unwrap();
        assert!(c.is_calibrating() && c.is_aligning());
        // One shared feed stream services both grids.
        feed_lap(&mut c, &[100.0, 200.0, 100.0, 100.0]);
        assert!(matches!(
            c.finish_calibration_if_ready(),
            CalibrationPoll::Finished(Forward)
        ));
        assert!(matches!(
            c.finish_alignment_if_ready(),
            AlignmentPoll::Finished(_)
        ));
    }

    #[test]
    fn calibration_reference_scenario() {
        let mut c = calibrator(4);
        c.start_calibration(3, Forward).unwrap();
        feed_lap(&mut c, &[100.0, 200.0, 100.0, 100.0]);
        feed_lap(&mut c, &[110.0, 220.0, 110.0, 110.0]);
        assert_eq!(c.finish_calibration_if_ready(), CalibrationPoll::Pending);
        feed_lap(&mut c, &[105.0, 210.0, 105.0, 105.0]);
        assert_eq!(
            c.finish_calibration_if_ready(),
            CalibrationPoll::Finished(Forward)
        );

        let expect = [1.25f32, 0.625, 1.25, 1.25];
        for (s, e) in c.table().lut(Forward).iter().zip(expect) {
            assert!((s - e).abs() < 1e-6, "{s} vs {e}");
        }
        // Reciprocals average to 1 exactly: corrected periods recover the
        // raw global mean.
        let recip_mean: f32 =
            c.table().lut(Forward).iter().map(|s| 1.0 / s).sum::<f32>() / 4.0;
        assert!((recip_mean - 1.0).abs() < 1e-6);
        // Finishing enables the direction and leaves the run idle.
        assert!(c.lut_enabled(Forward));
        assert!(!c.is_calibrating());
        assert!(c.pattern_ready(Forward));
    }

    #[test]
    fn calibration_with_no_samples_aborts() {
        let mut c = calibrator(2);
        c.start_calibration(1, Reverse).unwrap();
        // Close the lap by feeding only the last sector with a zero
        // period: the cell is filled but carries no usable duration.
        c.feed_period(1, 0.0);
        let poll = c.finish_calibration_if_ready();
        // Sector means exist (0.0 counts as a sample) so the run finishes;
        // zero means degrade each factor to neutral.
        assert!(matches!(poll, CalibrationPoll::Finished(Reverse)));
        assert!(c.table().lut(Reverse).iter().all(|s| *s == 1.0));
    }

    #[test]
    fn corrected_periods_equalize_after_calibration() {
        let mut c = calibrator(4);
        c.start_calibration(1, Forward).unwrap();
        let lap = [100.0f32, 200.0, 100.0, 100.0];
        feed_lap(&mut c, &lap);
        c.finish_calibration_if_ready();

        let corrected: Vec<f32> = lap
            .iter()
            .enumerate()
            .map(|(k, dt)| c.correct_dt(k as u16, *dt, Forward))
            .collect();
        for v in &corrected {
            assert!((v - corrected[0]).abs() < 1e-3, "{corrected:?}");
        }
    }

    #[test]
    fn alignment_finds_rotated_phase() {
        let mut c = calibrator(4);
        // LUT learned on a ring whose sector 1 is twice as wide.
        c.start_calibration(1, Forward).unwrap();
        feed_lap(&mut c, &[100.0, 200.0, 100.0, 100.0]);
        c.finish_calibration_if_ready();

        // After reboot the index is rotated: the wide sector now shows up
        // where (k + 2) mod 4 hits pattern entry 1, i.e. at k = 3.
        c.start_alignment(2, Forward).unwrap();
        let rotated = [100.0f32, 100.0, 100.0, 200.0];
        feed_lap(&mut c, &rotated);
        feed_lap(&mut c, &rotated);
        let AlignmentPoll::Finished(out) = c.finish_alignment_if_ready() else {
            panic!("alignment should finish");
        };
        assert_eq!(out.offset, 2);
        assert!(out.score < 1e-6);
        assert_eq!(c.table().offset(Forward), 2);

        // With the offset applied, corrected periods equalize again.
        let corrected: Vec<f32> = rotated
            .iter()
            .enumerate()
            .map(|(k, dt)| c.correct_dt(k as u16, *dt, Forward))
            .collect();
        for v in &corrected {
            assert!((v - corrected[0]).abs() < 1e-3, "{corrected:?}");
        }
    }

    #[test]
    fn alignment_with_zero_laps_aborts() {
        let mut c = calibrator(4);
        c.start_calibration(1, Forward).unwrap();
        feed_lap(&mut c, &[100.0, 200.0, 100.0, 100.0]);
        c.finish_calibration_if_ready();
        c.table.set_offset(Forward, 1);

        c.start_alignment(1, Forward).unwrap();
        feed_lap(&mut c, &[0.0, 0.0, 0.0, 0.0]);
        assert!(matches!(
            c.finish_alignment_if_ready(),
            AlignmentPoll::Aborted(Forward)
        ));
        // Offset untouched by the aborted run.
        assert_eq!(c.table().offset(Forward), 1);
    }

    #[test]
    fn cancel_disarms_without_side_effects() {
        let mut c = calibrator(4);
        c.start_calibration(2, Forward).unwrap();
        feed_lap(&mut c, &[100.0, 200.0, 100.0, 100.0]);
        c.cancel();
        assert!(!c.is_calibrating());
        assert!(c.table().lut(Forward).iter().all(|s| *s == 1.0));
    }

    #[test]
    fn clear_resets_and_persists() {
        let mut c = calibrator(4);
        c.start_calibration(1, Forward).unwrap();
        feed_lap(&mut c, &[100.0, 200.0, 100.0, 100.0]);
        c.finish_calibration_if_ready();
        assert!(c.pattern_ready(Forward));

        c.clear();
        assert!(!c.pattern_ready(Forward));
        assert!(!c.lut_enabled(Forward));

        // A fresh calibrator over the same store loads the cleared state.
        // (MemStore is owned, so verify through load on the same instance.)
        c.load();
        assert!(c.table().lut(Forward).iter().all(|s| *s == 1.0));
        assert!(!c.lut_enabled(Forward));
    }
}
