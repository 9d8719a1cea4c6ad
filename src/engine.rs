//! The owned state container tying the core together.
//!
//! All process-wide mutable state lives here behind one entry point per
//! logical group: `on_sample` for the sampling context, `on_trigger_edge`
//! and `on_key_press` for the collaborator callbacks, `take_edit` for the
//! background persistence handshake. The engine itself is plain data; the
//! firmware wraps it in a critical-section mutex and every context above the
//! lowest priority touches it only inside minimal critical sections.

use crate::aux_input::{AuxInput, ModOverlay, AUX_CENTER, GATE_CENTER_STEPS, GATE_UNITS_PER_STEP};
use crate::channel::{Channel, Context, KeyboardNote, Output, CHANNEL_B};
use crate::config::{AuxMode, Configuration};
use crate::gate_length;
use crate::quantizer::NOTE_MAX;
use crate::scale::{Scale, ScaleModel, NUM_BANKS};
use crate::scheduler::SampleSource;
use crate::store::Store;

/// A discrete front-panel key event, as delivered by the (external) panel
/// polling collaborator.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Key {
    /// One of the twelve note keys.
    Note(u8),
    /// The keyboard-override mode toggle.
    Keyboard,
}

/// The complete quantizer core is represented here.
pub struct Engine {
    config: Configuration,
    scale: ScaleModel,
    overlay: ModOverlay,
    channels: [Channel; 2],
    aux_inputs: [AuxInput; 2],
    /// Cached gate duration in samples; recomputed when the configured index
    /// or the aux overlay changes.
    gate_samples: i32,
    keyboard_mode: bool,
    keyboard_note: u8,
    /// One-shot keyboard retrigger per channel.
    keyboard_trigger: [bool; 2],
    /// A configuration edit happened since the last `take_edit`.
    edited: bool,
}

impl Engine {
    /// `Engine::new(config, banks)` is a core over an already-loaded
    /// configuration and preset cache.
    pub fn new(config: Configuration, banks: [Scale; NUM_BANKS]) -> Self {
        let mut engine = Self {
            config,
            scale: ScaleModel::new(config.scale, banks),
            overlay: ModOverlay::neutral(),
            channels: [Channel::new(0), Channel::new(1)],
            aux_inputs: [AuxInput::new(), AuxInput::new()],
            gate_samples: 0,
            keyboard_mode: false,
            keyboard_note: KEYBOARD_BASE_OCTAVE * 12,
            keyboard_trigger: [false; 2],
            edited: false,
        };
        engine.recompute_rotation();
        engine.recompute_gate_length();
        engine
    }

    /// `Engine::load(store)` is a core initialized from persistent storage.
    ///
    /// Uninitialized storage fails open: the documented defaults are adopted
    /// and written back right away.
    pub fn load<S: Store>(store: &mut S) -> Self {
        let config = match store.load_configuration() {
            Some(config) => config,
            None => {
                let config = Configuration::default();
                store.save_configuration(&config);
                config
            }
        };

        let mut banks = [Scale::empty(); NUM_BANKS];
        for (i, bank) in banks.iter_mut().enumerate() {
            *bank = store.load_scale_bank(i as u8);
        }

        Self::new(config, banks)
    }

    /// `engine.on_sample(source, raw)` processes one completed conversion.
    ///
    /// Sampling context only. Audio channel sources yield the pitch and gate
    /// levels to drive; auxiliary sources update shared modulation state and
    /// yield nothing.
    pub fn on_sample(&mut self, source: SampleSource, raw: u16) -> Option<Output> {
        match source {
            SampleSource::ChannelA => Some(self.process_channel(0, raw)),
            SampleSource::ChannelB => Some(self.process_channel(1, raw)),
            SampleSource::AuxA => {
                self.process_aux(0, raw);
                None
            }
            SampleSource::AuxB => {
                self.process_aux(1, raw);
                None
            }
        }
    }

    /// `engine.on_trigger_edge(ch)` records one debounced trigger edge for
    /// channel `ch`, as delivered by the I/O polling collaborator.
    pub fn on_trigger_edge(&mut self, channel: usize) {
        self.channels[channel & 1].trigger_edge();
    }

    /// `engine.on_key_press(key, shift)` applies one front-panel key event.
    ///
    /// Callers outside the sampling context must hold the critical section
    /// for the duration of the call.
    pub fn on_key_press(&mut self, key: Key, shift: bool) {
        match key {
            Key::Keyboard => {
                self.keyboard_mode = !self.keyboard_mode;
                self.keyboard_trigger = [false; 2];
            }
            Key::Note(n) if self.keyboard_mode => {
                let octave = KEYBOARD_BASE_OCTAVE + u8::from(shift);
                self.keyboard_note = (octave * 12 + n % 12).min(NOTE_MAX);
                self.keyboard_trigger = [true; 2];
            }
            Key::Note(n) if shift => {
                self.recall_bank(n % 12);
                self.edited = true;
            }
            Key::Note(n) => {
                self.scale.toggle_note(n % 12);
                self.config.scale = self.scale.scale();
                self.recompute_rotation();
                self.edited = true;
            }
        }
    }

    /// `engine.apply_config(config)` replaces the whole configuration, as
    /// the menu collaborator does after an edit, and refreshes every derived
    /// cache so the change takes effect on the next sample.
    ///
    /// Callers outside the sampling context must hold the critical section
    /// for the duration of the call.
    pub fn apply_config(&mut self, config: Configuration) {
        self.config = config;
        self.scale.set_scale(config.scale);
        self.recompute_rotation();
        self.recompute_gate_length();
        self.edited = true;
    }

    /// `engine.set_aux_mode(aux, mode)` reassigns the effect of auxiliary
    /// input `aux`.
    ///
    /// Every overlay contribution of the input's previous mode resets to
    /// neutral and the rotation recomputes even when the scale is unchanged.
    pub fn set_aux_mode(&mut self, aux: usize, mode: AuxMode) {
        let aux = aux & 1;
        let previous = core::mem::replace(&mut self.config.aux_mode[aux], mode);

        match previous {
            AuxMode::Rotate => self.overlay.rotation = 0,
            AuxMode::Transpose => self.overlay.transpose = [0; 2],
            AuxMode::TransposeB => self.overlay.transpose[CHANNEL_B] = 0,
            AuxMode::Offset => self.overlay.offset = [0; 2],
            AuxMode::OffsetB => self.overlay.offset[CHANNEL_B] = 0,
            AuxMode::GateLength => {
                self.overlay.gate_index = 0;
                self.overlay.gate_remainder = 0;
                self.recompute_gate_length();
            }
            AuxMode::ScaleRecall | AuxMode::Off => {}
        }

        self.aux_inputs[aux] = AuxInput::new();
        self.recompute_rotation();
        self.edited = true;
    }

    /// `engine.indicator_state()` is the front-panel display mask: the
    /// rotated scale in the top 12 bits and the active mode context in the
    /// low nibble.
    ///
    /// Pure query, safe to call from any context.
    pub fn indicator_state(&self) -> u16 {
        let context = if self.keyboard_mode {
            INDICATOR_KEYBOARD
        } else {
            0
        };
        self.scale.rotated().raw() | context
    }

    /// `engine.take_edit()` is the configuration to persist iff an edit
    /// happened since the previous call.
    ///
    /// The background loop copies the snapshot out under the critical section
    /// and performs the storage operation outside it.
    pub fn take_edit(&mut self) -> Option<Configuration> {
        if self.edited {
            self.edited = false;
            Some(self.config)
        } else {
            None
        }
    }

    /// `engine.config()` is the live configuration.
    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// `engine.rotated_scale()` is the scale form quantization reads.
    pub fn rotated_scale(&self) -> Scale {
        self.scale.rotated()
    }

    /// `engine.bank_occupancy()` has bit `b` set iff preset `b` holds notes.
    pub fn bank_occupancy(&self) -> u16 {
        self.scale.occupancy_mask()
    }

    fn process_channel(&mut self, channel: usize, raw: u16) -> Output {
        let keyboard = if self.keyboard_mode {
            Some(KeyboardNote {
                note: self.keyboard_note,
                trigger: self.keyboard_trigger[channel],
            })
        } else {
            None
        };
        self.keyboard_trigger[channel] = false;

        let ctx = Context {
            config: &self.config,
            overlay: &self.overlay,
            rotated: self.scale.rotated(),
            keyboard,
            gate_samples: self.gate_samples,
        };
        self.channels[channel].process(raw, &ctx)
    }

    fn process_aux(&mut self, aux: usize, raw: u16) {
        let mode = self.config.aux_mode[aux];

        // gate length tracks the input continuously, not only on change
        if mode == AuxMode::GateLength {
            let steps = raw / GATE_UNITS_PER_STEP;
            self.overlay.gate_index = steps as i8 - GATE_CENTER_STEPS;
            self.overlay.gate_remainder = (raw % GATE_UNITS_PER_STEP) as u8;
            self.recompute_gate_length();
        }

        let quantized = match self.aux_inputs[aux].requantize(raw) {
            Some(q) => q,
            None => return,
        };
        let amount = i16::from(quantized) - i16::from(AUX_CENTER);

        match mode {
            AuxMode::Off | AuxMode::GateLength => {}
            AuxMode::Rotate => {
                self.overlay.rotation = amount.rem_euclid(12) as u8;
                self.recompute_rotation();
            }
            AuxMode::Transpose => self.overlay.transpose = [amount; 2],
            AuxMode::TransposeB => self.overlay.transpose[CHANNEL_B] = amount,
            AuxMode::Offset => self.overlay.offset = [amount; 2],
            AuxMode::OffsetB => self.overlay.offset[CHANNEL_B] = amount,
            AuxMode::ScaleRecall => self.recall_bank(amount.rem_euclid(12) as u8),
        }
    }

    /// Replaces the scale with preset `bank`, resets the base rotation and
    /// recomputes the rotated form.
    fn recall_bank(&mut self, bank: u8) {
        self.scale.recall_bank(bank);
        self.config.base_rotation = 0;
        self.config.scale = self.scale.scale();
        self.recompute_rotation();
    }

    fn recompute_rotation(&mut self) {
        self.scale
            .recompute_rotation(self.config.base_rotation, self.overlay.rotation);
    }

    fn recompute_gate_length(&mut self) {
        self.gate_samples = gate_length::duration(self.config.gate_length, &self.overlay);
    }
}

/// Octave of the lowest keyboard-override note.
const KEYBOARD_BASE_OCTAVE: u8 = 4;

/// Low-nibble indicator code for the keyboard override context.
const INDICATOR_KEYBOARD: u16 = 0x1;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantizer::UNITS_PER_SEMITONE;
    use crate::scale;
    use crate::store::RamStore;

    fn raw(note: u16) -> u16 {
        note * UNITS_PER_SEMITONE as u16
    }

    fn aux_raw(value: u16) -> u16 {
        value * UNITS_PER_SEMITONE as u16
    }

    fn engine() -> Engine {
        Engine::new(Configuration::default(), [Scale::empty(); NUM_BANKS])
    }

    #[test]
    fn uninitialized_storage_fails_open_and_persists_defaults() {
        let mut store = RamStore::uninitialized();
        let engine = Engine::load(&mut store);
        assert_eq!(*engine.config(), Configuration::default());
        // the fallback is authoritative and was written back immediately
        assert_eq!(store.load_configuration(), Some(Configuration::default()));
    }

    #[test]
    fn channel_samples_drive_outputs_and_aux_samples_do_not() {
        let mut engine = engine();
        assert!(engine.on_sample(SampleSource::ChannelA, raw(4)).is_some());
        assert!(engine.on_sample(SampleSource::AuxA, 512).is_none());
    }

    #[test]
    fn rotate_effect_shifts_the_rotated_scale() {
        let mut engine = engine();
        engine.set_aux_mode(0, AuxMode::Rotate);
        // three semitones above center rotates by three
        engine.on_sample(SampleSource::AuxA, aux_raw(u16::from(AUX_CENTER) + 3));
        assert_eq!(engine.rotated_scale(), scale::MAJOR.rotated_left(3));
    }

    #[test]
    fn reassigning_an_aux_mode_resets_its_contribution() {
        let mut engine = engine();
        engine.set_aux_mode(0, AuxMode::Rotate);
        engine.on_sample(SampleSource::AuxA, aux_raw(u16::from(AUX_CENTER) + 5));
        assert_ne!(engine.rotated_scale(), scale::MAJOR);

        // the scale itself never changed, but the reassignment must drop the
        // rotation overlay and recompute
        engine.set_aux_mode(0, AuxMode::Off);
        assert_eq!(engine.rotated_scale(), scale::MAJOR);
    }

    #[test]
    fn transpose_effect_shifts_both_channels_after_quantization() {
        let mut engine = engine();
        engine.set_aux_mode(1, AuxMode::Transpose);
        engine.on_sample(SampleSource::AuxB, aux_raw(u16::from(AUX_CENTER) + 2));

        let out = engine.on_sample(SampleSource::ChannelA, raw(4)).unwrap();
        assert_eq!(out.pitch, 6);
        let out = engine.on_sample(SampleSource::ChannelB, raw(4)).unwrap();
        assert_eq!(out.pitch, 6);
    }

    #[test]
    fn single_channel_offset_reaches_channel_b_only() {
        let mut engine = engine();
        engine.set_aux_mode(0, AuxMode::OffsetB);
        engine.on_sample(SampleSource::AuxA, aux_raw(u16::from(AUX_CENTER) + 3));

        let out = engine.on_sample(SampleSource::ChannelA, raw(4)).unwrap();
        assert_eq!(out.pitch, 4);
        // offset lands before quantization: 4 + 3 = semitone 7, in-scale
        let out = engine.on_sample(SampleSource::ChannelB, raw(4)).unwrap();
        assert_eq!(out.pitch, 7);
    }

    #[test]
    fn gate_length_effect_tracks_every_sample() {
        let mut engine = engine();
        engine.set_aux_mode(0, AuxMode::GateLength);
        engine.on_sample(SampleSource::AuxA, 512);
        let length = engine.gate_samples;
        // the quantized semitone is unchanged but the interpolation remainder
        // still tracks the input
        engine.on_sample(SampleSource::AuxA, 513);
        assert_ne!(engine.gate_samples, length);
    }

    #[test]
    fn scale_recall_effect_loads_presets_and_clears_base_rotation() {
        let mut banks = [Scale::empty(); NUM_BANKS];
        banks[4] = Scale::from_semitones(&[1, 6]);
        let mut config = Configuration::default();
        config.base_rotation = 5;
        let mut engine = Engine::new(config, banks);
        engine.set_aux_mode(0, AuxMode::ScaleRecall);

        engine.on_sample(SampleSource::AuxA, aux_raw(u16::from(AUX_CENTER) + 4));
        assert_eq!(engine.config().base_rotation, 0);
        assert_eq!(engine.rotated_scale(), banks[4]);
    }

    #[test]
    fn applied_configuration_refreshes_the_derived_caches() {
        let mut engine = engine();
        let mut config = *engine.config();
        config.gate_length = 11;
        config.base_rotation = 2;
        engine.apply_config(config);

        assert_eq!(engine.gate_samples, 51200);
        assert_eq!(engine.rotated_scale(), scale::MAJOR.rotated_left(2));
        assert!(engine.take_edit().is_some());
    }

    #[test]
    fn note_keys_toggle_the_scale() {
        let mut engine = engine();
        engine.on_key_press(Key::Note(1), false);
        assert_ne!(engine.config().scale, scale::MAJOR);
        engine.on_key_press(Key::Note(1), false);
        assert_eq!(engine.config().scale, scale::MAJOR);
    }

    #[test]
    fn shifted_note_keys_recall_banks() {
        let mut banks = [Scale::empty(); NUM_BANKS];
        banks[2] = Scale::from_semitones(&[0, 6]);
        let mut engine = Engine::new(Configuration::default(), banks);

        engine.on_key_press(Key::Note(2), true);
        assert_eq!(engine.config().scale, banks[2]);
        assert_eq!(engine.bank_occupancy(), 1 << 2);
    }

    #[test]
    fn edits_surface_exactly_once_to_the_background_loop() {
        let mut engine = engine();
        assert!(engine.take_edit().is_none());
        engine.on_key_press(Key::Note(3), false);
        let snapshot = engine.take_edit().expect("edit pending");
        assert_eq!(snapshot, *engine.config());
        assert!(engine.take_edit().is_none());
    }

    #[test]
    fn keyboard_mode_plays_keys_and_shows_in_the_indicator() {
        let mut engine = engine();
        engine.on_key_press(Key::Keyboard, false);
        assert_eq!(engine.indicator_state() & 0xF, 0x1);

        engine.on_key_press(Key::Note(7), false);
        let out = engine.on_sample(SampleSource::ChannelA, raw(0)).unwrap();
        assert_eq!(out.pitch, 4 * 12 + 7);

        // leaving keyboard mode resumes quantized tracking
        engine.on_key_press(Key::Keyboard, false);
        assert_eq!(engine.indicator_state() & 0xF, 0);
    }

    #[test]
    fn indicator_reflects_the_rotated_scale() {
        let mut engine = engine();
        assert_eq!(engine.indicator_state() & 0xFFF0, scale::MAJOR.raw());
        engine.set_aux_mode(0, AuxMode::Rotate);
        engine.on_sample(SampleSource::AuxA, aux_raw(u16::from(AUX_CENTER) + 1));
        assert_eq!(
            engine.indicator_state() & 0xFFF0,
            scale::MAJOR.rotated_left(1).raw()
        );
    }
}
