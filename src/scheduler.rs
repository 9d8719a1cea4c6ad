//! Execution-model primitives shared by the interrupt wiring and the
//! background loop.
//!
//! The firmware runs three fixed priority levels: the sampling context
//! (highest, once per completed conversion), the housekeeping context (~1
//! kHz, front panel and trigger polling) and the background loop (lowest,
//! deferred persistence). The pieces here are the hardware-independent state
//! machines those contexts drive; the actual interrupt handlers live in the
//! firmware binary.

/// The four sources multiplexed onto the voltage converter.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SampleSource {
    ChannelA,
    ChannelB,
    AuxA,
    AuxB,
}

impl SampleSource {
    /// `SampleSource::from_slot(s)` is the source assigned to converter slot
    /// `s & 3`.
    pub fn from_slot(slot: u8) -> Self {
        match slot & 3 {
            0 => Self::ChannelA,
            1 => Self::ChannelB,
            2 => Self::AuxA,
            _ => Self::AuxB,
        }
    }

    /// `src.channel_index()` is the audio channel this source feeds, if any.
    pub fn channel_index(&self) -> Option<usize> {
        match self {
            Self::ChannelA => Some(0),
            Self::ChannelB => Some(1),
            Self::AuxA | Self::AuxB => None,
        }
    }
}

/// One sequencer step: the source whose conversion is started now and the
/// source whose completed conversion is ready to consume.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Step {
    pub start: SampleSource,
    pub ready: SampleSource,
}

/// Round-robin source sequencer with the converter's one-conversion pipeline
/// made explicit.
///
/// The converter produces the sample whose conversion was started while the
/// previous result was being read out, so the value ready at each step
/// belongs to the source selected [`PIPELINE_SLOTS`] steps earlier. With four
/// slots that is the XOR-2 pairing of the slot counter.
pub struct SampleSequencer {
    next: u8,
}

impl SampleSequencer {
    /// `SampleSequencer::new()` is a sequencer starting at slot 0.
    pub const fn new() -> Self {
        Self { next: 0 }
    }

    /// `seq.advance()` moves to the next slot and is the pair of sources to
    /// start converting and to consume.
    pub fn advance(&mut self) -> Step {
        let start = self.next;
        self.next = (self.next + 1) & 3;
        Step {
            start: SampleSource::from_slot(start),
            ready: SampleSource::from_slot(start ^ PIPELINE_SLOTS),
        }
    }
}

/// Deferred configuration commit: a deadline re-armed on every edit plus a
/// busy flag serializing storage operations.
///
/// The background loop polls this once per iteration. While the busy flag is
/// held a due commit simply stays pending; it never blocks the sampling or
/// housekeeping contexts.
pub struct SaveScheduler {
    deadline: Option<u32>,
    busy: bool,
}

impl SaveScheduler {
    /// `SaveScheduler::new()` is an idle scheduler with nothing pending.
    pub const fn new() -> Self {
        Self {
            deadline: None,
            busy: false,
        }
    }

    /// `s.note_edit(now)` re-arms the commit deadline a fixed delay after the
    /// latest edit.
    pub fn note_edit(&mut self, now: u32) {
        self.deadline = Some(now.wrapping_add(SAVE_DELAY_TICKS));
    }

    /// `s.poll(now)` is true when a commit should begin now; the scheduler
    /// then holds the busy flag until [`SaveScheduler::finish`].
    pub fn poll(&mut self, now: u32) -> bool {
        if self.busy {
            return false;
        }
        match self.deadline {
            Some(deadline) if now.wrapping_sub(deadline) < u32::MAX / 2 => {
                self.deadline = None;
                self.busy = true;
                true
            }
            _ => false,
        }
    }

    /// `s.finish()` releases the busy flag after the storage operation
    /// completes.
    pub fn finish(&mut self) {
        self.busy = false;
    }
}

/// The conversion started for a source is consumed this many steps later.
pub const PIPELINE_SLOTS: u8 = 2;

/// Housekeeping ticks between the last configuration edit and its commit.
pub const SAVE_DELAY_TICKS: u32 = 2_000;
