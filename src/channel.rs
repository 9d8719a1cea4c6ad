//! Per-channel pitch processing: hysteresis, quantization, modulation and
//! the trigger/gate state machine.
//!
//! Each audio channel is processed once per sample in the sampling context.
//! A sample becomes a *candidate* note (quantized, or directly selected while
//! the keyboard override is active), the candidate is *accepted* according to
//! the trigger mode, and the gate output follows its own settle/length phases
//! so that the pitch output is stable before a gate announces a new note.

use crate::aux_input::ModOverlay;
use crate::config::{Configuration, QuantizeMode};
use crate::quantizer::{self, NOTE_MAX, UNITS_PER_SEMITONE};
use crate::scale::Scale;

/// How a channel decides when to update its output.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TriggerMode {
    /// No external trigger present; the output updates on every value change.
    FreeRunning,
    /// The output only updates when an armed trigger fires.
    Triggered,
}

/// A direct note selection from the front panel keyboard override.
#[derive(Clone, Copy)]
pub struct KeyboardNote {
    pub note: u8,
    /// Set for exactly one sample after a key press.
    pub trigger: bool,
}

/// Everything a channel needs to process one sample.
pub struct Context<'a> {
    pub config: &'a Configuration,
    pub overlay: &'a ModOverlay,
    /// The rotated scale, the only form quantization reads.
    pub rotated: Scale,
    /// The active keyboard override, if any; suspends hysteresis.
    pub keyboard: Option<KeyboardNote>,
    /// Gate duration in samples, precomputed by the gate-length calculator.
    pub gate_samples: i32,
}

/// What the channel drives out of the module after one sample.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Output {
    pub pitch: u8,
    pub gate: bool,
}

struct Candidate {
    note: u8,
    /// Explicit keyboard retrigger, accepted in any trigger mode.
    retrigger: bool,
}

/// One audio channel of the quantizer is represented here.
pub struct Channel {
    /// 0 = channel A, 1 = channel B; channel B picks up the extra
    /// channel-specific modulation.
    index: usize,
    /// The last emitted pitch.
    out: u8,
    /// The pitch that produced the previous gate; cleared when that gate
    /// completes its full length.
    gated: Option<u8>,
    /// Signed gate phase: negative counts up through the settling delay
    /// toward gate-on, positive counts down the gate duration, zero is idle.
    gate_phase: i32,
    mode: TriggerMode,
    /// Samples left before another trigger edge is honored.
    debounce: u16,
    /// Samples left before an armed trigger fires; zero when none is armed.
    armed_delay: i16,
    /// Samples since the last honored edge, for the auto-revert timeout.
    idle_samples: u32,
    /// An edge arrived since the previous sample.
    edge_pending: bool,
}

impl Channel {
    /// `Channel::new(i)` is channel `i` (0 or 1) in free-running mode with
    /// all outputs low.
    pub fn new(index: usize) -> Self {
        Self {
            index: index & 1,
            out: 0,
            gated: None,
            gate_phase: 0,
            mode: TriggerMode::FreeRunning,
            debounce: 0,
            armed_delay: 0,
            idle_samples: 0,
            edge_pending: false,
        }
    }

    /// `ch.trigger_edge()` records one debounced active edge from the
    /// trigger input. Safe to call from a lower-priority context; the edge is
    /// honored on the next sample.
    pub fn trigger_edge(&mut self) {
        self.edge_pending = true;
    }

    /// `ch.mode()` is the current trigger mode.
    pub fn mode(&self) -> TriggerMode {
        self.mode
    }

    /// `ch.process(raw, ctx)` advances the channel by one sample and is the
    /// pitch and gate levels to drive.
    pub fn process(&mut self, raw: u16, ctx: &Context) -> Output {
        // the armed delay counts before new edges are honored, so a delay of
        // one fires exactly one sample after its edge
        let fired = self.step_armed_delay();
        self.step_triggers(ctx);
        self.step_gate(ctx);

        let candidate = self.candidate(raw, ctx);

        if let Some(c) = candidate {
            let accept = c.retrigger
                || match self.mode {
                    TriggerMode::FreeRunning => c.note != self.out,
                    TriggerMode::Triggered => fired,
                };

            if accept {
                self.out = c.note;
                // in legato a running gate keeps running and the new pitch
                // slides under it; otherwise the gate is cut and re-armed
                if !ctx.config.legato || self.gate_phase <= 0 {
                    self.gate_phase = -GATE_SETTLE_SAMPLES;
                }
            }
        }

        Output {
            pitch: self.out,
            gate: self.gate_phase > 0,
        }
    }

    /// Edge bookkeeping: debounce, mode transitions and the auto-revert
    /// timeout.
    fn step_triggers(&mut self, ctx: &Context) {
        if self.debounce > 0 {
            self.debounce -= 1;
        }
        self.idle_samples = self.idle_samples.saturating_add(1);

        if self.edge_pending {
            self.edge_pending = false;
            if self.debounce == 0 {
                self.debounce = TRIGGER_DEBOUNCE_SAMPLES;
                self.idle_samples = 0;
                self.mode = TriggerMode::Triggered;
                self.armed_delay = trigger_delay_samples(ctx.config.trigger_delay);
            }
        }

        if self.mode == TriggerMode::Triggered && self.idle_samples > TRIGGER_REVERT_SAMPLES {
            self.mode = TriggerMode::FreeRunning;
            self.armed_delay = 0;
        }
    }

    /// Counts down an armed trigger; true on the sample it fires.
    fn step_armed_delay(&mut self) -> bool {
        if self.armed_delay > 0 {
            self.armed_delay -= 1;
            self.armed_delay == 0
        } else {
            false
        }
    }

    /// Advances the settle/length phases of the gate output.
    ///
    /// The gate turns on only when the pitch that is about to sound differs
    /// from the pitch that produced the previous gate, so an input that
    /// wobbles back to the old pitch before the settle elapses never fires a
    /// spurious second gate.
    fn step_gate(&mut self, ctx: &Context) {
        if self.gate_phase < 0 {
            self.gate_phase += 1;
            if self.gate_phase == 0 && self.gated != Some(self.out) {
                self.gated = Some(self.out);
                self.gate_phase = ctx.gate_samples.max(1);
            }
        } else if self.gate_phase > 0 {
            self.gate_phase -= 1;
            if self.gate_phase == 0 {
                // a completed gate forgets its pitch so the same note can
                // gate again on the next trigger
                self.gated = None;
            }
        }
    }

    /// The candidate note for this sample, if any.
    fn candidate(&self, raw: u16, ctx: &Context) -> Option<Candidate> {
        if let Some(kb) = ctx.keyboard {
            return Some(Candidate {
                note: kb.note.min(NOTE_MAX),
                retrigger: kb.trigger,
            });
        }

        let sample =
            quantizer::with_hysteresis(i32::from(raw), i32::from(self.out) * UNITS_PER_SEMITONE);

        let offset = i32::from(ctx.config.offset)
            + i32::from(ctx.overlay.offset[self.index])
            + if self.index == CHANNEL_B {
                i32::from(ctx.config.offset_b)
            } else {
                0
            };
        let sample = sample + offset * UNITS_PER_SEMITONE;

        let note = match ctx.config.quantize_mode {
            QuantizeMode::Nearest => quantizer::quantize_nearest(ctx.rotated, sample),
            QuantizeMode::Skip => quantizer::quantize_skip(ctx.rotated, sample),
            QuantizeMode::Equal => quantizer::quantize_equal(ctx.rotated, sample),
        }?;

        let transpose = i32::from(ctx.config.transpose)
            + i32::from(ctx.overlay.transpose[self.index])
            + if self.index == CHANNEL_B {
                i32::from(ctx.config.transpose_b)
            } else {
                0
            };

        let note = i32::from(note) + transpose;
        if !(0..=i32::from(NOTE_MAX)).contains(&note) {
            return None;
        }

        Some(Candidate {
            note: note as u8,
            retrigger: false,
        })
    }
}

/// `trigger_delay_samples(setting)` is the armed trigger delay for delay
/// setting 0..=11: one sample minimum plus two per step.
pub fn trigger_delay_samples(setting: u8) -> i16 {
    1 + TRIGGER_DELAY_STEP * i16::from(setting.min(11))
}

/// Channel B index; the channel-specific configuration pair applies here.
pub const CHANNEL_B: usize = 1;

/// Samples between trigger acceptance and the gate turning on, letting the
/// pitch output settle first.
pub const GATE_SETTLE_SAMPLES: i32 = 3;

/// Extra armed-delay samples per trigger-delay setting step.
pub const TRIGGER_DELAY_STEP: i16 = 2;

/// Edges arriving closer together than this are ignored.
pub const TRIGGER_DEBOUNCE_SAMPLES: u16 = 10;

/// Samples of trigger silence before a triggered channel reverts to
/// free-running.
pub const TRIGGER_REVERT_SAMPLES: u32 = 20_000;
