use crate::config::ValueScale;
use crate::hal::{CompressorIo, OutputLevels};

/// Simulated compressor with a tank and a regulated outlet line.
#[derive(Debug, Clone)]
pub struct SimulatedCompressor {
    tank_pressure: f64,
    line_pressure: f64,

    fill_rate: f64,
    leak_rate: f64,
    drain_rate: f64,
    unload_rate: f64,
    regulator_setpoint: f64,

    tank_scale: ValueScale,
    line_scale: Option<ValueScale>,
    drain_valve: bool,
    unload_valve: bool,
    outputs: OutputLevels,
    forced_tank_raw: Option<f64>,
}

impl SimulatedCompressor {
    pub fn new(tank_scale: ValueScale, line_scale: Option<ValueScale>) -> Self {
        Self {
            tank_pressure: 0.0,
            line_pressure: 0.0,
            fill_rate: 1.5,
            leak_rate: 0.02,
            drain_rate: 3.0,
            unload_rate: 0.5,
            regulator_setpoint: 90.0,
            tank_scale,
            line_scale,
            drain_valve: true,
            unload_valve: true,
            outputs: OutputLevels::default(),
            forced_tank_raw: None,
        }
    }

    pub fn with_tank_pressure(mut self, pressure: f64) -> Self {
        self.tank_pressure = pressure;
        self
    }

    pub fn without_drain_valve(mut self) -> Self {
        self.drain_valve = false;
        self
    }

    pub fn without_unload_valve(mut self) -> Self {
        self.unload_valve = false;
        self
    }

    pub fn set_tank_pressure(&mut self, pressure: f64) {
        self.tank_pressure = pressure;
    }

    /// Report `raw` from the tank sensor regardless of the tank model, e.g. to
    /// simulate a broken wire. `None` restores normal readings.
    pub fn force_tank_raw(&mut self, raw: Option<f64>) {
        self.forced_tank_raw = raw;
    }

    pub fn tank_pressure(&self) -> f64 {
        self.tank_pressure
    }

    pub fn line_pressure(&self) -> f64 {
        self.line_pressure
    }

    pub fn outputs(&self) -> OutputLevels {
        self.outputs
    }
}

impl Default for SimulatedCompressor {
    fn default() -> Self {
        Self::new(ValueScale::default(), Some(ValueScale::default()))
    }
}

impl CompressorIo for SimulatedCompressor {
    fn step(&mut self, dt_s: f64) {
        let mut rate = -self.leak_rate;
        if self.outputs.motor {
            rate += self.fill_rate;
        }
        if self.outputs.drain_valve {
            rate -= self.drain_rate;
        }
        if self.outputs.unload_valve {
            rate -= self.unload_rate;
        }
        self.tank_pressure = (self.tank_pressure + rate * dt_s).max(0.0);
        self.line_pressure = self.tank_pressure.min(self.regulator_setpoint);
    }

    fn read_tank_raw(&self) -> f64 {
        self.forced_tank_raw
            .unwrap_or_else(|| self.tank_scale.unmap(self.tank_pressure))
    }

    fn read_line_raw(&self) -> Option<f64> {
        self.line_scale.map(|scale| scale.unmap(self.line_pressure))
    }

    fn set_motor(&mut self, on: bool) {
        self.outputs.motor = on;
    }

    fn set_drain_valve(&mut self, open: bool) {
        if self.drain_valve {
            self.outputs.drain_valve = open;
        }
    }

    fn set_unload_valve(&mut self, open: bool) {
        if self.unload_valve {
            self.outputs.unload_valve = open;
        }
    }

    fn has_drain_valve(&self) -> bool {
        self.drain_valve
    }

    fn has_unload_valve(&self) -> bool {
        self.unload_valve
    }
}

/// I/O whose readings are set directly, for exercising the controller
/// without any physics.
#[derive(Debug, Clone)]
pub struct ScriptedIo {
    scale: ValueScale,
    tank_raw: f64,
    line_raw: Option<f64>,
    drain_valve: bool,
    unload_valve: bool,
    outputs: OutputLevels,
    motor_starts: u64,
}

impl ScriptedIo {
    pub fn new(scale: ValueScale) -> Self {
        Self {
            scale,
            tank_raw: scale.sensor_min,
            line_raw: None,
            drain_valve: true,
            unload_valve: true,
            outputs: OutputLevels::default(),
            motor_starts: 0,
        }
    }

    pub fn without_drain_valve(mut self) -> Self {
        self.drain_valve = false;
        self
    }

    pub fn without_unload_valve(mut self) -> Self {
        self.unload_valve = false;
        self
    }

    pub fn set_tank_pressure(&mut self, pressure: f64) {
        self.tank_raw = self.scale.unmap(pressure);
    }

    pub fn set_tank_raw(&mut self, raw: f64) {
        self.tank_raw = raw;
    }

    /// `None` removes the line sensor.
    pub fn set_line_pressure(&mut self, pressure: Option<f64>) {
        self.line_raw = pressure.map(|p| self.scale.unmap(p));
    }

    pub fn set_line_raw(&mut self, raw: Option<f64>) {
        self.line_raw = raw;
    }

    pub fn outputs(&self) -> OutputLevels {
        self.outputs
    }

    /// Number of off-to-on motor transitions driven so far.
    pub fn motor_starts(&self) -> u64 {
        self.motor_starts
    }
}

impl Default for ScriptedIo {
    fn default() -> Self {
        Self::new(ValueScale::default())
    }
}

impl CompressorIo for ScriptedIo {
    fn read_tank_raw(&self) -> f64 {
        self.tank_raw
    }

    fn read_line_raw(&self) -> Option<f64> {
        self.line_raw
    }

    fn set_motor(&mut self, on: bool) {
        if on && !self.outputs.motor {
            self.motor_starts += 1;
        }
        self.outputs.motor = on;
    }

    fn set_drain_valve(&mut self, open: bool) {
        self.outputs.drain_valve = open && self.drain_valve;
    }

    fn set_unload_valve(&mut self, open: bool) {
        self.outputs.unload_valve = open && self.unload_valve;
    }

    fn has_drain_valve(&self) -> bool {
        self.drain_valve
    }

    fn has_unload_valve(&self) -> bool {
        self.unload_valve
    }
}
