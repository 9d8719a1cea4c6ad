//! The scale quantization engine.
//!
//! All algorithms operate on raw samples in a fixed fractional unit where 8
//! units is one semitone, so 96 units span an octave and the 10 bit converter
//! range covers notes 0..=127. A result of `None` means "do not update the
//! output"; on the wire this corresponds to the reserved values 128 and above
//! (127 is the highest valid note, 128 and up never reach an output).
//!
//! Samples are signed so that offset modulation below zero or past the top of
//! the range stays total; candidates outside 0..=127 quantize to `None`.

use crate::scale::Scale;

use heapless::Vec;

/// `quantize_semitones(s)` is sample `s` rounded to the nearest semitone with
/// no scale constraint.
///
/// Only used for auxiliary-voltage quantization; the pitch channels always go
/// through one of the scale-aware algorithms.
pub fn quantize_semitones(sample: i32) -> Option<u8> {
    note_in_range((sample + HALF_SEMITONE_UNITS).div_euclid(UNITS_PER_SEMITONE))
}

/// `quantize_nearest(scale, s)` is the allowed note nearest to sample `s`.
///
/// The sample is rounded to the nearest semitone first. When that semitone is
/// not allowed the neighbors are searched outward in both directions, wrapping
/// across octave boundaries. An equidistant pair is broken by the rounding
/// remainder: below half a semitone the lower candidate wins, otherwise the
/// higher one.
pub fn quantize_nearest(scale: Scale, sample: i32) -> Option<u8> {
    if scale.is_empty() {
        return None;
    }

    let biased = sample + HALF_SEMITONE_UNITS;
    let note = biased.div_euclid(UNITS_PER_SEMITONE);
    let remainder = biased.rem_euclid(UNITS_PER_SEMITONE);
    let position = note.rem_euclid(12);

    if scale.contains(position as u8) {
        return note_in_range(note);
    }

    for distance in 1..=6 {
        let below = scale.contains((position - distance).rem_euclid(12) as u8);
        let above = scale.contains((position + distance).rem_euclid(12) as u8);

        let candidate = match (below, above) {
            (false, false) => continue,
            (true, false) => note - distance,
            (false, true) => note + distance,
            // equidistant in both directions, the rounding remainder decides
            (true, true) => {
                if remainder < HALF_SEMITONE_UNITS {
                    note - distance
                } else {
                    note + distance
                }
            }
        };

        return note_in_range(candidate);
    }

    None
}

/// `quantize_skip(scale, s)` is sample `s` rounded to the nearest semitone if
/// that exact semitone is allowed, `None` otherwise.
///
/// Callers hold their previous output on `None`, which turns disallowed notes
/// into flat spots instead of snapping them sideways.
pub fn quantize_skip(scale: Scale, sample: i32) -> Option<u8> {
    if scale.is_empty() {
        return None;
    }

    let note = (sample + HALF_SEMITONE_UNITS).div_euclid(UNITS_PER_SEMITONE);
    if scale.contains(note.rem_euclid(12) as u8) {
        note_in_range(note)
    } else {
        None
    }
}

/// `quantize_equal(scale, s)` redistributes the allowed notes to equal
/// spacing across the octave regardless of their true semitone gaps.
///
/// The sample's position within its octave (0..=95 units) selects the allowed
/// note of rank `position * count / 96`, counted in ascending order.
pub fn quantize_equal(scale: Scale, sample: i32) -> Option<u8> {
    let allowed: Vec<u8, 12> = (0..12).filter(|&s| scale.contains(s)).collect();
    if allowed.is_empty() {
        return None;
    }

    let position = sample.rem_euclid(UNITS_PER_OCTAVE);
    let octave = sample.div_euclid(UNITS_PER_OCTAVE);
    let rank = (position * allowed.len() as i32) / UNITS_PER_OCTAVE;

    note_in_range(octave * 12 + i32::from(allowed[rank as usize]))
}

/// `with_hysteresis(s, reference)` is sample `s` pulled toward the level of
/// the previous conversion to suppress chatter near bucket boundaries.
///
/// The pull is asymmetric: a rising sample loses slightly more than a falling
/// sample gains, both well under the half-semitone rounding bias.
pub fn with_hysteresis(sample: i32, reference: i32) -> i32 {
    if sample > reference {
        sample - HYSTERESIS_RISING
    } else if sample < reference {
        sample + HYSTERESIS_FALLING
    } else {
        sample
    }
}

fn note_in_range(note: i32) -> Option<u8> {
    if (0..=i32::from(NOTE_MAX)).contains(&note) {
        Some(note as u8)
    } else {
        None
    }
}

/// The highest valid output note; 128 and above are reserved on the wire for
/// "do not update".
pub const NOTE_MAX: u8 = 127;

/// The fixed fractional unit scale: 8 units per semitone.
pub const UNITS_PER_SEMITONE: i32 = 8;

/// One octave in sample units.
pub const UNITS_PER_OCTAVE: i32 = UNITS_PER_SEMITONE * 12;

/// Round-half-up bias, also the tie-break threshold of the nearest search.
const HALF_SEMITONE_UNITS: i32 = UNITS_PER_SEMITONE / 2;

/// Hysteresis against a rising input.
const HYSTERESIS_RISING: i32 = 3;

/// Hysteresis against a falling input, slightly smaller than the rising pull.
const HYSTERESIS_FALLING: i32 = 2;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scale::{Scale, MAJOR};

    fn semitone(n: i32) -> i32 {
        n * UNITS_PER_SEMITONE
    }

    #[test]
    fn semitones_round_half_up() {
        assert_eq!(quantize_semitones(0), Some(0));
        assert_eq!(quantize_semitones(3), Some(0));
        assert_eq!(quantize_semitones(4), Some(1));
        assert_eq!(quantize_semitones(semitone(60) + 3), Some(60));
        assert_eq!(quantize_semitones(semitone(60) + 4), Some(61));
    }

    #[test]
    fn out_of_range_samples_are_not_notes() {
        assert_eq!(quantize_semitones(semitone(128)), None);
        assert_eq!(quantize_semitones(-semitone(1)), None);
        assert_eq!(quantize_semitones(semitone(127)), Some(127));
    }

    #[test]
    fn empty_scale_never_quantizes() {
        for sample in [0, 100, 500, 1023] {
            assert_eq!(quantize_nearest(Scale::empty(), sample), None);
            assert_eq!(quantize_skip(Scale::empty(), sample), None);
            assert_eq!(quantize_equal(Scale::empty(), sample), None);
        }
    }

    #[test]
    fn skip_holds_on_disallowed_semitones() {
        assert_eq!(quantize_skip(MAJOR, semitone(1)), None);
        assert_eq!(quantize_skip(MAJOR, semitone(2)), Some(2));
    }

    #[test]
    fn nearest_returns_allowed_notes_unchanged() {
        assert_eq!(quantize_nearest(MAJOR, semitone(4)), Some(4));
        assert_eq!(quantize_nearest(MAJOR, semitone(12)), Some(12));
    }

    #[test]
    fn nearest_tie_break_follows_the_rounding_remainder() {
        // semitone 1 is disallowed in the major pattern and notes 0 and 2 are
        // equidistant; exactly on-center the remainder is half a semitone so
        // the upper neighbor wins, just below center the lower neighbor wins
        assert_eq!(quantize_nearest(MAJOR, semitone(1)), Some(2));
        assert_eq!(quantize_nearest(MAJOR, semitone(1) - 1), Some(0));
    }

    #[test]
    fn nearest_wraps_across_the_octave_boundary() {
        let only_b = Scale::from_semitones(&[11]);
        // note 12 (C one octave up) is disallowed, the nearest allowed note
        // is B just below the boundary
        assert_eq!(quantize_nearest(only_b, semitone(12)), Some(11));
        // and from below the boundary, B in the next octave up
        let only_c = Scale::from_semitones(&[0]);
        assert_eq!(quantize_nearest(only_c, semitone(11)), Some(12));
    }

    #[test]
    fn nearest_rejects_candidates_past_the_range_ends() {
        let only_b = Scale::from_semitones(&[11]);
        // the nearest allowed note to a sample at note 0 would be B below
        // note 0, which does not exist
        assert_eq!(quantize_nearest(only_b, 0), None);
    }

    #[test]
    fn equal_spacing_selects_by_rank() {
        // position 50 of 96 with 7 allowed notes selects rank 3, the 4th
        // allowed note of the major pattern in ascending order
        assert_eq!(quantize_equal(MAJOR, 50), Some(5));
        // the same position an octave up lands on the same degree + 12
        assert_eq!(quantize_equal(MAJOR, UNITS_PER_OCTAVE + 50), Some(17));
    }

    #[test]
    fn equal_spacing_covers_the_whole_octave() {
        let pentatonic = Scale::from_semitones(&[0, 2, 4, 7, 9]);
        assert_eq!(quantize_equal(pentatonic, 0), Some(0));
        assert_eq!(quantize_equal(pentatonic, 95), Some(9));
    }

    #[test]
    fn hysteresis_pulls_toward_the_reference() {
        assert_eq!(with_hysteresis(100, 50), 97);
        assert_eq!(with_hysteresis(100, 150), 102);
        assert_eq!(with_hysteresis(100, 100), 100);
    }
}
