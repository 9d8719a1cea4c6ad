//! The 12-tone scale model shared by the quantization engine.
//!
//! A scale is the set of semitones currently allowed for quantization. The
//! set is stored in the top 12 bits of a 16 bit word because that is the
//! layout of the front panel display register; the low nibble is always zero.

/// A 12-tone musical scale is represented here.
///
/// Bit `semitone + 4` of the inner word is set when that semitone is allowed.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Scale(u16);

impl Scale {
    /// `Scale::empty()` is the scale with no notes allowed.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// `Scale::from_raw(w)` is the scale stored in display-register word `w`.
    ///
    /// The low nibble of `w` is discarded, it never carries scale data.
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw & SCALE_MASK)
    }

    /// `Scale::from_semitones(ns)` is the scale allowing exactly the semitones in `ns`.
    pub fn from_semitones(semitones: &[u8]) -> Self {
        let mut scale = Self::empty();
        for &s in semitones {
            if !scale.contains(s % 12) {
                scale.toggle(s % 12);
            }
        }
        scale
    }

    /// `scale.raw()` is the scale as a display-register word.
    pub fn raw(&self) -> u16 {
        self.0
    }

    /// `scale.contains(s)` is true iff semitone `s` (0..=11) is allowed.
    pub fn contains(&self, semitone: u8) -> bool {
        self.0 >> (semitone % 12 + FIELD_SHIFT) & 1 == 1
    }

    /// `scale.toggle(s)` flips the allowed-state of semitone `s`.
    ///
    /// Callers that quantize against a rotated form of this scale must
    /// recompute the rotation afterwards.
    pub fn toggle(&mut self, semitone: u8) {
        self.0 ^= 1 << (semitone % 12 + FIELD_SHIFT);
    }

    /// `scale.is_empty()` is true iff no note is allowed.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// `scale.note_count()` is the number of allowed notes, 0..=12.
    pub fn note_count(&self) -> u8 {
        self.0.count_ones() as u8
    }

    /// `scale.rotated_left(r)` is the scale cyclically rotated left by `r`
    /// positions within its 12-bit field.
    pub fn rotated_left(&self, amount: u8) -> Self {
        let r = u32::from(amount % 12);
        let field = self.0 >> FIELD_SHIFT;
        let rotated = (field << r | field >> (12 - r)) & 0x0FFF;
        Self(rotated << FIELD_SHIFT)
    }
}

/// The scale model: the base scale, its cached rotated form read by the
/// quantization engine, and the RAM cache of the stored scale presets.
///
/// The rotated form is the only one real-time code reads; it is recomputed
/// whenever the base scale or either rotation contribution changes, and the
/// recomputation is a single word store so the sampling context never sees a
/// half-updated value.
pub struct ScaleModel {
    scale: Scale,
    rotated: Scale,
    banks: [Scale; NUM_BANKS],
}

impl ScaleModel {
    /// `ScaleModel::new(scale, banks)` is a model over `scale` with preset
    /// cache `banks`; the rotated form starts unrotated.
    pub fn new(scale: Scale, banks: [Scale; NUM_BANKS]) -> Self {
        Self {
            scale,
            rotated: scale,
            banks,
        }
    }

    /// `model.scale()` is the current base scale.
    pub fn scale(&self) -> Scale {
        self.scale
    }

    /// `model.rotated()` is the cached rotated scale.
    pub fn rotated(&self) -> Scale {
        self.rotated
    }

    /// `model.toggle_note(s)` flips semitone `s` in the base scale.
    ///
    /// Must be followed by `recompute_rotation`.
    pub fn toggle_note(&mut self, semitone: u8) {
        self.scale.toggle(semitone);
    }

    /// `model.set_scale(s)` replaces the base scale outright.
    ///
    /// Must be followed by `recompute_rotation`.
    pub fn set_scale(&mut self, scale: Scale) {
        self.scale = scale;
    }

    /// `model.recompute_rotation(base, aux)` derives the rotated scale from
    /// the base scale and the two rotation contributions.
    ///
    /// Pure function of its inputs, no hidden state.
    pub fn recompute_rotation(&mut self, base_rotation: u8, aux_rotation: u8) {
        let amount = (base_rotation + aux_rotation) % 12;
        self.rotated = self.scale.rotated_left(amount);
    }

    /// `model.recall_bank(b)` replaces the base scale with preset `b`.
    ///
    /// Empty banks load like any other; emptiness only matters for the
    /// occupancy mask. The caller resets the base rotation and recomputes.
    pub fn recall_bank(&mut self, bank: u8) {
        self.scale = self.banks[usize::from(bank) % NUM_BANKS];
    }

    /// `model.store_bank(b, s)` replaces preset `b` in the RAM cache.
    pub fn store_bank(&mut self, bank: u8, scale: Scale) {
        self.banks[usize::from(bank) % NUM_BANKS] = scale;
    }

    /// `model.bank(b)` is preset `b` from the RAM cache.
    pub fn bank(&self, bank: u8) -> Scale {
        self.banks[usize::from(bank) % NUM_BANKS]
    }

    /// `model.occupancy_mask()` has bit `b` set iff bank `b` holds at least
    /// one allowed note.
    pub fn occupancy_mask(&self) -> u16 {
        let mut mask = 0;
        for (i, bank) in self.banks.iter().enumerate() {
            if !bank.is_empty() {
                mask |= 1 << i;
            }
        }
        mask
    }
}

/// The major-scale pattern, semitones {0, 2, 4, 5, 7, 9, 11}.
pub const MAJOR: Scale = Scale(0xAB50);

/// The number of scale presets.
pub const NUM_BANKS: usize = 12;

/// Only the top 12 bits of the scale word ever carry data.
const SCALE_MASK: u16 = 0xFFF0;

/// The scale field starts above the low nibble of the display word.
const FIELD_SHIFT: u8 = 4;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn major_scale_matches_its_semitone_list() {
        assert_eq!(Scale::from_semitones(&[0, 2, 4, 5, 7, 9, 11]), MAJOR);
    }

    #[test]
    fn low_nibble_is_always_zero() {
        for raw in 0..=u16::MAX {
            assert_eq!(Scale::from_raw(raw).raw() & 0xF, 0);
        }
    }

    #[test]
    fn rotation_is_invertible_mod_12() {
        for field in 0..1 << 12 {
            let scale = Scale::from_raw(field << 4);
            for r in 0..12 {
                let there_and_back = scale.rotated_left(r).rotated_left(12 - r);
                assert_eq!(there_and_back, scale);
                assert_eq!(scale.rotated_left(r).raw() & 0xF, 0);
            }
        }
    }

    #[test]
    fn rotation_by_zero_is_identity() {
        assert_eq!(MAJOR.rotated_left(0), MAJOR);
        assert_eq!(MAJOR.rotated_left(12), MAJOR);
    }

    #[test]
    fn rotating_left_moves_note_zero_up() {
        let only_c = Scale::from_semitones(&[0]);
        assert!(only_c.rotated_left(1).contains(1));
        assert!(!only_c.rotated_left(1).contains(0));
        assert!(only_c.rotated_left(11).contains(11));
    }

    #[test]
    fn toggle_flips_membership() {
        let mut scale = Scale::empty();
        scale.toggle(3);
        assert!(scale.contains(3));
        assert_eq!(scale.note_count(), 1);
        scale.toggle(3);
        assert!(scale.is_empty());
    }

    #[test]
    fn recall_ignores_rotation_state_of_previous_scale() {
        let mut banks = [Scale::empty(); NUM_BANKS];
        banks[2] = Scale::from_semitones(&[1, 6]);
        let mut model = ScaleModel::new(MAJOR, banks);
        model.recompute_rotation(5, 0);
        model.recall_bank(2);
        model.recompute_rotation(0, 0);
        assert_eq!(model.rotated(), banks[2]);
    }

    #[test]
    fn empty_banks_load_but_read_as_unoccupied() {
        let mut banks = [Scale::empty(); NUM_BANKS];
        banks[0] = MAJOR;
        banks[7] = Scale::from_semitones(&[5]);
        let mut model = ScaleModel::new(MAJOR, banks);
        assert_eq!(model.occupancy_mask(), 1 << 0 | 1 << 7);
        model.recall_bank(3);
        assert!(model.scale().is_empty());
    }

    #[test]
    fn rotated_scale_tracks_combined_rotation() {
        let mut model = ScaleModel::new(Scale::from_semitones(&[0]), [Scale::empty(); NUM_BANKS]);
        model.recompute_rotation(7, 8);
        // 7 + 8 wraps to a rotation of 3
        assert!(model.rotated().contains(3));
    }
}
