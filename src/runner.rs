use crate::audio::{AudioSink, OutputAudioBuffer};
use crate::error::{Result, WaveError};
use crate::forcing::ForcingSource;
use crate::schedule::FrameSchedule;
use crate::simulation::Simulation;
use crate::visualisation::{FrameSink, OutputFrame, WavefieldVisualiser};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info};

/// Cooperative cancellation flag. Setting it is all an interrupt handler does;
/// the runner notices at the next sub-step or frame boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Initializing,
    Stepping { frame: usize, substep: usize },
    Sampling { frame: usize },
    Finalizing,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every scheduled frame was produced.
    Completed,
    /// The forcing signal ran dry before the schedule did.
    SignalExhausted,
    /// Stopped early on request; output is valid but truncated.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub frames_emitted: usize,
    pub substeps: usize,
    pub audio_samples: usize,
    pub simulated_time: f64,
}

/// Hands frames to a dedicated thread through a one-slot channel, so at most
/// one frame waits while the next is being stepped.
struct FrameEncoder<F> {
    tx: Option<SyncSender<(usize, OutputFrame)>>,
    handle: Option<JoinHandle<(F, Result<()>)>>,
}

impl<F: FrameSink + 'static> FrameEncoder<F> {
    fn spawn(mut sink: F) -> Result<Self> {
        let (tx, rx) = sync_channel::<(usize, OutputFrame)>(1);
        let handle = thread::Builder::new()
            .name("frame-encoder".into())
            .spawn(move || {
                for (index, frame) in rx {
                    if let Err(e) = sink.write_frame(index, frame) {
                        return (sink, Err(e));
                    }
                }
                (sink, Ok(()))
            })?;
        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    fn submit(&mut self, index: usize, frame: OutputFrame) -> Result<()> {
        let sent = match &self.tx {
            Some(tx) => tx.send((index, frame)).is_ok(),
            None => false,
        };
        if sent {
            Ok(())
        } else {
            // The worker only hangs up after a failed write; report that failure
            Err(self.finish().err().unwrap_or(WaveError::EncoderStopped))
        }
    }

    /// Wait for every queued frame to be written and take the sink back.
    fn finish(&mut self) -> Result<F> {
        self.tx.take();
        let handle = self.handle.take().ok_or(WaveError::EncoderStopped)?;
        let (sink, result) = handle.join().map_err(|_| WaveError::EncoderStopped)?;
        result.map(|_| sink)
    }
}

/// Drives the simulation through its schedule and routes output to the sinks.
pub struct Runner<F> {
    simulation: Simulation,
    schedule: FrameSchedule,
    visualiser: WavefieldVisualiser,
    frames: F,
    forcing: Option<Box<dyn ForcingSource>>,
    audio_sink: Option<Box<dyn AudioSink>>,
    cancel: CancelToken,
    emit_initial_frame: bool,
    checkpoint_audio: bool,
}

impl<F: FrameSink + 'static> Runner<F> {
    pub fn new(
        simulation: Simulation,
        schedule: FrameSchedule,
        visualiser: WavefieldVisualiser,
        frames: F,
    ) -> Self {
        Self {
            simulation,
            schedule,
            visualiser,
            frames,
            forcing: None,
            audio_sink: None,
            cancel: CancelToken::new(),
            emit_initial_frame: false,
            checkpoint_audio: false,
        }
    }

    /// One sample of `forcing` is consumed per sub-step.
    pub fn with_forcing(mut self, forcing: Box<dyn ForcingSource>) -> Self {
        self.forcing = Some(forcing);
        self
    }

    /// Receives the probe samples at finalisation (and at checkpoints).
    pub fn with_audio_output(mut self, sink: Box<dyn AudioSink>) -> Self {
        self.audio_sink = Some(sink);
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Emit the initial condition as frame 0, shifting stepped frames up by one.
    pub fn emit_initial_frame(mut self, emit: bool) -> Self {
        self.emit_initial_frame = emit;
        self
    }

    /// Rewrite the audio output after every frame, not just at the end.
    pub fn checkpoint_audio(mut self, checkpoint: bool) -> Self {
        self.checkpoint_audio = checkpoint;
        self
    }

    /// Run to completion, exhaustion or cancellation. Returns the report and
    /// the frame sink once every frame handed to it has been written.
    pub fn run(self) -> Result<(RunReport, F)> {
        let Runner {
            mut simulation,
            schedule,
            visualiser,
            frames,
            mut forcing,
            mut audio_sink,
            cancel,
            emit_initial_frame,
            checkpoint_audio,
        } = self;

        let sampling_audio = simulation.params.probe_cell.is_some();
        let mut audio = if sampling_audio {
            OutputAudioBuffer::with_capacity(schedule.total_substeps()?)?
        } else {
            OutputAudioBuffer::new()
        };
        let mut encoder = FrameEncoder::spawn(frames)?;

        let start_substep = simulation.current_substep();
        let frame_offset = usize::from(emit_initial_frame);
        let mut frames_emitted = 0;
        let mut outcome = RunOutcome::Completed;
        let mut finished_sink = None;
        let mut state = RunState::Initializing;

        while state != RunState::Terminated {
            state = match state {
                RunState::Initializing => {
                    info!(
                        width = simulation.grid.width,
                        height = simulation.grid.height,
                        frames = schedule.total_frames,
                        substeps_per_frame = schedule.substeps_per_frame,
                        frame_time = schedule.frame_duration(simulation.params.dt),
                        "starting simulation"
                    );
                    if emit_initial_frame {
                        encoder.submit(0, visualiser.render(&simulation.wavefield)?)?;
                        frames_emitted += 1;
                    }
                    if schedule.total_frames == 0 {
                        RunState::Finalizing
                    } else {
                        RunState::Stepping {
                            frame: 0,
                            substep: 0,
                        }
                    }
                }

                RunState::Stepping { frame, substep } => {
                    if cancel.is_cancelled() {
                        outcome = RunOutcome::Cancelled;
                        RunState::Finalizing
                    } else if substep == schedule.substeps_per_frame {
                        RunState::Sampling { frame }
                    } else {
                        let sample = forcing.as_mut().map(|source| source.next_sample());
                        match sample {
                            // Forcing is active but has nothing left
                            Some(None) => {
                                outcome = RunOutcome::SignalExhausted;
                                RunState::Finalizing
                            }
                            sample => {
                                simulation.step(sample.flatten());
                                if let Some(value) = simulation.probe_value() {
                                    audio.push(value);
                                }
                                RunState::Stepping {
                                    frame,
                                    substep: substep + 1,
                                }
                            }
                        }
                    }
                }

                RunState::Sampling { frame } => {
                    if cancel.is_cancelled() {
                        outcome = RunOutcome::Cancelled;
                        RunState::Finalizing
                    } else {
                        let rendered = visualiser.render(&simulation.wavefield)?;
                        encoder.submit(frame + frame_offset, rendered)?;
                        frames_emitted += 1;

                        if checkpoint_audio {
                            if let Some(sink) = audio_sink.as_mut() {
                                sink.write_audio(audio.samples())?;
                            }
                        }

                        info!(
                            "Frame {}/{} (t={:.4}s)",
                            frame + 1,
                            schedule.total_frames,
                            simulation.current_time()
                        );

                        if frame + 1 == schedule.total_frames {
                            RunState::Finalizing
                        } else {
                            RunState::Stepping {
                                frame: frame + 1,
                                substep: 0,
                            }
                        }
                    }
                }

                RunState::Finalizing => {
                    debug!(?outcome, "finalizing");
                    finished_sink = Some(encoder.finish()?);
                    if let Some(sink) = audio_sink.as_mut() {
                        sink.write_audio(audio.samples())?;
                    }
                    RunState::Terminated
                }

                RunState::Terminated => RunState::Terminated,
            };
        }

        let report = RunReport {
            outcome,
            frames_emitted,
            substeps: simulation.current_substep() - start_substep,
            audio_samples: audio.len(),
            simulated_time: simulation.current_time(),
        };
        match outcome {
            RunOutcome::Cancelled => info!(
                frames = report.frames_emitted,
                samples = report.audio_samples,
                "run cancelled, output truncated"
            ),
            _ => info!(
                frames = report.frames_emitted,
                samples = report.audio_samples,
                "simulation complete"
            ),
        }

        let sink = finished_sink.ok_or(WaveError::EncoderStopped)?;
        Ok((report, sink))
    }
}
