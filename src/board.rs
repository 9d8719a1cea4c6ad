use dual_quantizer::scheduler::SampleSource;

use stm32l0xx_hal::{
    adc::{Adc, Ready},
    gpio::{
        gpioa::{PA0, PA1, PA10, PA2, PA3, PA4, PA5, PA6, PA7, PA9},
        gpiob::{PB0, PB1},
        gpioc::{PC14, PC15},
        Analog, Input, Output, PullUp, PushPull,
    },
    pac::{Peripherals, TIM2, TIM21, TIM22},
    prelude::*,
    pwm::{Assigned, Pwm, Timer as PwmTimer, C1, C2},
    rcc::Config,
    timer::Timer,
};

/// The physical board hardware is represented here, split by the execution
/// context that owns each half.
pub struct Board {
    pub sampling: SamplingIo,
    pub panel: PanelIo,
}

/// Peripherals owned by the sampling interrupt: the converter with its four
/// multiplexed inputs, the two PWM pitch outputs, the two gate pins and a
/// debug pin for scope-timing the per-sample budget.
pub struct SamplingIo {
    adc: Adc<Ready>,
    pitch_a_in: PA0<Analog>,
    pitch_b_in: PA2<Analog>,
    aux_a_in: PA3<Analog>,
    aux_b_in: PA4<Analog>,
    pitch_a_out: Pwm<TIM2, C2, Assigned<PA1<Analog>>>,
    pitch_b_out: Pwm<TIM2, C1, Assigned<PA5<Analog>>>,
    /// Gate B sits one bit above gate A on the same port.
    gate_a: PA6<Output<PushPull>>,
    gate_b: PA7<Output<PushPull>>,
    debug_pin: PC15<Output<PushPull>>,
    /// PWM duty per note step, derived from the timer resolution.
    pitch_step: u16,
    timer: Timer<TIM22>,
}

/// Peripherals owned by the housekeeping interrupt: the trigger inputs and
/// the bit-banged shift register behind the front panel indicator.
pub struct PanelIo {
    trigger_a: PB0<Input<PullUp>>,
    trigger_b: PB1<Input<PullUp>>,
    indicator_clock: PA9<Output<PushPull>>,
    indicator_data: PA10<Output<PushPull>>,
    indicator_latch: PC14<Output<PushPull>>,
    timer: Timer<TIM21>,
}

impl Board {
    /// `Board::init()` is the board with all peripherals initialized and
    /// both context timers running and listening.
    pub fn init() -> Self {
        let dp = Peripherals::take().unwrap();

        // use internal HSI oscillator as clock
        let mut rcc = dp.RCC.freeze(Config::hsi16());

        let gpioa = dp.GPIOA.split(&mut rcc);
        let gpiob = dp.GPIOB.split(&mut rcc);
        let gpioc = dp.GPIOC.split(&mut rcc);

        let adc = dp.ADC.constrain(&mut rcc);

        let pwm = PwmTimer::new(dp.TIM2, PITCH_PWM_FREQ_HZ.Hz(), &mut rcc);
        let mut pitch_a_out = pwm.channel2.assign(gpioa.pa1);
        let mut pitch_b_out = pwm.channel1.assign(gpioa.pa5);
        pitch_a_out.enable();
        pitch_b_out.enable();
        let pitch_step = pitch_a_out.get_max_duty() / 128;

        let mut sampling_timer = dp.TIM22.timer(SAMPLE_RATE_HZ.Hz(), &mut rcc);
        sampling_timer.listen();
        let mut housekeeping_timer = dp.TIM21.timer(HOUSEKEEPING_RATE_HZ.Hz(), &mut rcc);
        housekeeping_timer.listen();

        Self {
            sampling: SamplingIo {
                adc,
                pitch_a_in: gpioa.pa0.into_analog(),
                pitch_b_in: gpioa.pa2.into_analog(),
                aux_a_in: gpioa.pa3.into_analog(),
                aux_b_in: gpioa.pa4.into_analog(),
                pitch_a_out,
                pitch_b_out,
                gate_a: gpioa.pa6.into_push_pull_output(),
                gate_b: gpioa.pa7.into_push_pull_output(),
                debug_pin: gpioc.pc15.into_push_pull_output(),
                pitch_step,
                timer: sampling_timer,
            },
            panel: PanelIo {
                trigger_a: gpiob.pb0.into_pull_up_input(),
                trigger_b: gpiob.pb1.into_pull_up_input(),
                indicator_clock: gpioa.pa9.into_push_pull_output(),
                indicator_data: gpioa.pa10.into_push_pull_output(),
                indicator_latch: gpioc.pc14.into_push_pull_output(),
                timer: housekeeping_timer,
            },
        }
    }
}

impl SamplingIo {
    /// `io.read(source)` is the completed conversion for `source`, scaled to
    /// the 10 bit range the engine runs on.
    pub fn read(&mut self, source: SampleSource) -> u16 {
        let raw: u16 = match source {
            SampleSource::ChannelA => nb::block!(self.adc.read(&mut self.pitch_a_in)),
            SampleSource::ChannelB => nb::block!(self.adc.read(&mut self.pitch_b_in)),
            SampleSource::AuxA => nb::block!(self.adc.read(&mut self.aux_a_in)),
            SampleSource::AuxB => nb::block!(self.adc.read(&mut self.aux_b_in)),
        }
        .unwrap();

        // 12 bit converter, the engine uses the 10 bit scale of the original range
        raw >> 2
    }

    /// `io.write_pitch(ch, note)` drives note `note` on pitch output `ch`.
    pub fn write_pitch(&mut self, channel: usize, note: u8) {
        let duty = self.pitch_step * u16::from(note);
        match channel {
            0 => self.pitch_a_out.set_duty(duty),
            _ => self.pitch_b_out.set_duty(duty),
        }
    }

    /// `io.set_gate(ch, on)` sets the state of gate output `ch`.
    pub fn set_gate(&mut self, channel: usize, on: bool) {
        match (channel, on) {
            (0, true) => self.gate_a.set_high().unwrap(),
            (0, false) => self.gate_a.set_low().unwrap(),
            (_, true) => self.gate_b.set_high().unwrap(),
            (_, false) => self.gate_b.set_low().unwrap(),
        }
    }

    /// `io.set_debug(on)` drives the scope-timing pin.
    pub fn set_debug(&mut self, on: bool) {
        match on {
            true => self.debug_pin.set_high().unwrap(),
            false => self.debug_pin.set_low().unwrap(),
        }
    }

    pub fn clear_sampling_irq(&mut self) {
        self.timer.clear_irq();
    }
}

impl PanelIo {
    /// `io.trigger_levels()` is the raw level of both trigger inputs; the
    /// lines idle high.
    pub fn trigger_levels(&self) -> [bool; 2] {
        [
            self.trigger_a.is_high().unwrap(),
            self.trigger_b.is_high().unwrap(),
        ]
    }

    /// `io.write_indicator(mask)` clocks the display mask into the front
    /// panel shift register, MSB first.
    pub fn write_indicator(&mut self, mask: u16) {
        for bit in (0..16).rev() {
            match mask >> bit & 1 {
                1 => self.indicator_data.set_high().unwrap(),
                _ => self.indicator_data.set_low().unwrap(),
            }
            self.indicator_clock.set_high().unwrap();
            self.indicator_clock.set_low().unwrap();
        }
        self.indicator_latch.set_high().unwrap();
        self.indicator_latch.set_low().unwrap();
    }

    pub fn clear_housekeeping_irq(&mut self) {
        self.timer.clear_irq();
    }
}

/// Conversions per second across the four multiplexed sources, so each
/// source updates at a quarter of this rate. The per-sample time budget for
/// the whole sampling handler is the inverse of this rate.
pub const SAMPLE_RATE_HZ: u32 = 5_000;

/// Front panel and trigger polling rate.
pub const HOUSEKEEPING_RATE_HZ: u32 = 1_000;

/// Carrier frequency of the PWM pitch outputs.
const PITCH_PWM_FREQ_HZ: u32 = 10_000;
