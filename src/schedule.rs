use crate::error::{Result, WaveError};

/// How many frames a run produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameCount {
    Fixed(usize),
    /// As many whole frames as the driving signal covers at the target rate.
    FromSignal { sample_count: usize, sample_rate: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulePolicy {
    /// N sub-steps per frame, fixed number of frames, no time reference.
    FixedCount {
        substeps_per_frame: usize,
        frames: usize,
    },
    /// Sub-steps per frame chosen so each frame spans 1/fps of simulated time.
    RateDerived { fps: u32, frames: FrameCount },
}

/// Resolved schedule. Computed once per run; nothing else decides how much
/// simulated time passes between two frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSchedule {
    pub substeps_per_frame: usize,
    pub total_frames: usize,
}

/// round(1 / (fps · dt))
pub fn substeps_for_rate(fps: u32, dt: f64) -> usize {
    (1.0 / (f64::from(fps) * dt)).round() as usize
}

/// floor(sample_count · fps / sample_rate), in exact integer arithmetic.
pub fn frames_from_signal(sample_count: usize, fps: u32, sample_rate: u32) -> usize {
    (sample_count as u64 * u64::from(fps) / u64::from(sample_rate)) as usize
}

impl FrameSchedule {
    pub fn new(policy: SchedulePolicy, dt: f64) -> Result<Self> {
        let schedule = match policy {
            SchedulePolicy::FixedCount {
                substeps_per_frame,
                frames,
            } => FrameSchedule {
                substeps_per_frame,
                total_frames: frames,
            },
            SchedulePolicy::RateDerived { fps, frames } => {
                if fps == 0 {
                    return Err(WaveError::InvalidConfig("fps must be positive".into()));
                }
                if !(dt > 0.0 && dt.is_finite()) {
                    return Err(WaveError::InvalidConfig(format!(
                        "dt must be positive, got {}",
                        dt
                    )));
                }
                let substeps_per_frame = substeps_for_rate(fps, dt);
                let total_frames = match frames {
                    FrameCount::Fixed(n) => n,
                    FrameCount::FromSignal {
                        sample_count,
                        sample_rate,
                    } => {
                        if sample_rate == 0 {
                            return Err(WaveError::InvalidConfig(
                                "signal sample rate must be positive".into(),
                            ));
                        }
                        // Rounding can make a frame longer than 1/fps of signal;
                        // never schedule a frame the samples cannot finish.
                        frames_from_signal(sample_count, fps, sample_rate)
                            .min(sample_count.checked_div(substeps_per_frame).unwrap_or(0))
                    }
                };
                FrameSchedule {
                    substeps_per_frame,
                    total_frames,
                }
            }
        };

        if schedule.substeps_per_frame == 0 {
            return Err(WaveError::InvalidConfig(
                "schedule resolves to zero sub-steps per frame".into(),
            ));
        }
        schedule.total_substeps()?;
        Ok(schedule)
    }

    pub fn total_substeps(&self) -> Result<usize> {
        self.substeps_per_frame
            .checked_mul(self.total_frames)
            .ok_or_else(|| {
                WaveError::InvalidConfig(format!(
                    "{} frames of {} sub-steps overflow the step counter",
                    self.total_frames, self.substeps_per_frame
                ))
            })
    }

    /// Simulated time between consecutive frames.
    pub fn frame_duration(&self, dt: f64) -> f64 {
        self.substeps_per_frame as f64 * dt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audio_schedule(sample_count: usize) -> FrameSchedule {
        FrameSchedule::new(
            SchedulePolicy::RateDerived {
                fps: 25,
                frames: FrameCount::FromSignal {
                    sample_count,
                    sample_rate: 44_100,
                },
            },
            1.0 / 44_100.0,
        )
        .unwrap()
    }

    #[test]
    fn test_frames_from_signal_length() {
        assert_eq!(audio_schedule(44_100).total_frames, 25);
        assert_eq!(audio_schedule(44_099).total_frames, 24);
        assert_eq!(audio_schedule(0).total_frames, 0);
        assert_eq!(audio_schedule(1764).total_frames, 1);
        assert_eq!(audio_schedule(1763).total_frames, 0);
    }

    #[test]
    fn test_signal_frames_fit_the_signal() {
        // 1 / (24 / 44100) = 1837.5 rounds up to 1838; 24 · 1838 > 44100
        let schedule = FrameSchedule::new(
            SchedulePolicy::RateDerived {
                fps: 24,
                frames: FrameCount::FromSignal {
                    sample_count: 44_100,
                    sample_rate: 44_100,
                },
            },
            1.0 / 44_100.0,
        )
        .unwrap();
        assert_eq!(schedule.substeps_per_frame, 1838);
        assert_eq!(schedule.total_frames, 23);
        assert!(schedule.total_substeps().unwrap() <= 44_100);
    }

    #[test]
    fn test_overflowing_schedule_is_rejected() {
        let result = FrameSchedule::new(
            SchedulePolicy::FixedCount {
                substeps_per_frame: 1764,
                frames: usize::MAX / 2,
            },
            1.0 / 44_100.0,
        );
        assert!(matches!(result, Err(WaveError::InvalidConfig(_))));
    }

    #[test]
    fn test_audio_rate_substeps() {
        let schedule = audio_schedule(44_100);
        assert_eq!(schedule.substeps_per_frame, 1764);
        assert_eq!(schedule.total_substeps().unwrap(), 44_100);
        assert!((schedule.frame_duration(1.0 / 44_100.0) - 0.04).abs() < 1e-12);
    }

    #[test]
    fn test_rate_derived_fixed_frames() {
        let schedule = FrameSchedule::new(
            SchedulePolicy::RateDerived {
                fps: 25,
                frames: FrameCount::Fixed(10),
            },
            0.01,
        )
        .unwrap();
        assert_eq!(schedule.substeps_per_frame, 4);
        assert_eq!(schedule.total_frames, 10);
    }

    #[test]
    fn test_rate_derived_rounds() {
        // 1 / (30 * 0.004) = 8.33
        assert_eq!(substeps_for_rate(30, 0.004), 8);
        // 1 / (25 * 0.0069) = 5.797
        assert_eq!(substeps_for_rate(25, 0.0069), 6);
    }

    #[test]
    fn test_fixed_count() {
        let schedule = FrameSchedule::new(
            SchedulePolicy::FixedCount {
                substeps_per_frame: 416,
                frames: 499,
            },
            1e-4,
        )
        .unwrap();
        assert_eq!(schedule.substeps_per_frame, 416);
        assert_eq!(schedule.total_frames, 499);
    }

    #[test]
    fn test_degenerate_schedules_are_rejected() {
        let zero_steps = FrameSchedule::new(
            SchedulePolicy::FixedCount {
                substeps_per_frame: 0,
                frames: 3,
            },
            0.1,
        );
        assert!(zero_steps.is_err());

        // dt longer than a frame rounds to zero sub-steps
        let coarse = FrameSchedule::new(
            SchedulePolicy::RateDerived {
                fps: 25,
                frames: FrameCount::Fixed(1),
            },
            1.0,
        );
        assert!(coarse.is_err());

        let no_fps = FrameSchedule::new(
            SchedulePolicy::RateDerived {
                fps: 0,
                frames: FrameCount::Fixed(1),
            },
            0.01,
        );
        assert!(no_fps.is_err());
    }
}
