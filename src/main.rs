// cargo flash --chip stm32l031f4px --features firmware --release

#![no_std]
#![no_main]

mod board;

use core::cell::RefCell;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::board::{Board, PanelIo, SamplingIo};

use dual_quantizer::config::Configuration;
use dual_quantizer::engine::Engine;
use dual_quantizer::scheduler::{SampleSequencer, SaveScheduler};
use dual_quantizer::store::{RamStore, Store};

use panic_halt as _;

use cortex_m::interrupt::{free, Mutex};
use cortex_m_rt::entry;
use stm32l0xx_hal::pac::{interrupt, Interrupt, NVIC};

/// All shared mutable state lives behind critical-section mutexes. The
/// sampling interrupt is the highest priority; every lower-priority context
/// touches the engine only inside minimal `interrupt::free` sections, so the
/// sampling context never observes a partially updated value.
static ENGINE: Mutex<RefCell<Option<Engine>>> = Mutex::new(RefCell::new(None));

/// Context-owned peripherals parked here at startup; each interrupt handler
/// moves its half out on first entry and owns it exclusively afterwards.
static SAMPLING_IO: Mutex<RefCell<Option<SamplingIo>>> = Mutex::new(RefCell::new(None));
static PANEL_IO: Mutex<RefCell<Option<PanelIo>>> = Mutex::new(RefCell::new(None));

/// Millisecond-ish tick driven by the housekeeping interrupt, read by the
/// background loop for the deferred-save deadline.
static HOUSEKEEPING_TICKS: AtomicU32 = AtomicU32::new(0);

#[entry]
fn main() -> ! {
    let board = Board::init();

    // the EEPROM driver is an external collaborator; until one is wired to
    // the Store trait a blank volatile store boots the documented defaults
    let mut store = RamStore::uninitialized();
    let engine = Engine::load(&mut store);

    free(|cs| {
        ENGINE.borrow(cs).replace(Some(engine));
        SAMPLING_IO.borrow(cs).replace(Some(board.sampling));
        PANEL_IO.borrow(cs).replace(Some(board.panel));
    });

    // sampling preempts housekeeping, never the other way around
    let mut cp = cortex_m::Peripherals::take().unwrap();
    unsafe {
        cp.NVIC.set_priority(Interrupt::TIM22, SAMPLING_PRIORITY);
        cp.NVIC.set_priority(Interrupt::TIM21, HOUSEKEEPING_PRIORITY);
        NVIC::unmask(Interrupt::TIM22);
        NVIC::unmask(Interrupt::TIM21);
    }

    let mut saver = SaveScheduler::new();
    let mut pending: Option<Configuration> = None;

    // background context: runs only when neither interrupt is pending and
    // commits configuration edits a fixed delay after the last change
    loop {
        let now = HOUSEKEEPING_TICKS.load(Ordering::Relaxed);

        let edit = free(|cs| {
            ENGINE
                .borrow(cs)
                .borrow_mut()
                .as_mut()
                .and_then(|engine| engine.take_edit())
        });
        if let Some(config) = edit {
            pending = Some(config);
            saver.note_edit(now);
        }

        if saver.poll(now) {
            // the storage operation itself runs with interrupts enabled
            if let Some(config) = pending.take() {
                store.save_configuration(&config);
            }
            saver.finish();
        }

        cortex_m::asm::wfi();
    }
}

/// Sampling context: one completed conversion per interrupt, round-robin
/// across the four sources. Must finish before the next conversion lands;
/// overruns skew samples but never corrupt state.
#[interrupt]
fn TIM22() {
    static mut IO: Option<SamplingIo> = None;
    static mut SEQUENCER: SampleSequencer = SampleSequencer::new();

    let io = IO.get_or_insert_with(|| {
        free(|cs| SAMPLING_IO.borrow(cs).replace(None)).unwrap()
    });

    io.clear_sampling_irq();
    io.set_debug(true);

    let step = SEQUENCER.advance();
    let raw = io.read(step.ready);

    let out = free(|cs| {
        ENGINE
            .borrow(cs)
            .borrow_mut()
            .as_mut()
            .and_then(|engine| engine.on_sample(step.ready, raw))
    });

    if let (Some(out), Some(channel)) = (out, step.ready.channel_index()) {
        io.write_pitch(channel, out.pitch);
        io.set_gate(channel, out.gate);
    }

    io.set_debug(false);
}

/// Housekeeping context: trigger polling and indicator refresh at a fixed
/// low rate. The NVIC never re-enters this handler, and the sampling
/// interrupt preempts it freely outside the short critical sections.
#[interrupt]
fn TIM21() {
    static mut IO: Option<PanelIo> = None;
    static mut LAST_TRIGGER_LEVELS: [bool; 2] = [true; 2];

    let io = IO.get_or_insert_with(|| {
        free(|cs| PANEL_IO.borrow(cs).replace(None)).unwrap()
    });

    io.clear_housekeeping_irq();
    HOUSEKEEPING_TICKS.store(
        HOUSEKEEPING_TICKS.load(Ordering::Relaxed).wrapping_add(1),
        Ordering::Relaxed,
    );

    // trigger lines idle high, an active edge is a falling one
    let levels = io.trigger_levels();
    for channel in 0..2 {
        if LAST_TRIGGER_LEVELS[channel] && !levels[channel] {
            free(|cs| {
                if let Some(engine) = ENGINE.borrow(cs).borrow_mut().as_mut() {
                    engine.on_trigger_edge(channel);
                }
            });
        }
    }
    *LAST_TRIGGER_LEVELS = levels;

    let mask = free(|cs| {
        ENGINE
            .borrow(cs)
            .borrow()
            .as_ref()
            .map(|engine| engine.indicator_state())
    });
    if let Some(mask) = mask {
        io.write_indicator(mask);
    }
}

/// Cortex-M0+ exposes the top two priority bits; lower is more urgent.
const SAMPLING_PRIORITY: u8 = 0x00;
const HOUSEKEEPING_PRIORITY: u8 = 0x40;
