/// Sensor and actuator boundary of one compressor.
///
/// Readings are raw sensor units; the controller maps them through the
/// configured [`ValueScale`](crate::config::ValueScale)s.
pub trait CompressorIo: Send {
    /// Advance any simulated physics by `dt_s` seconds.
    fn step(&mut self, _dt_s: f64) {}

    fn read_tank_raw(&self) -> f64;

    /// `None` when the installation has no line-pressure sensor.
    fn read_line_raw(&self) -> Option<f64>;

    fn set_motor(&mut self, on: bool);

    fn set_drain_valve(&mut self, open: bool);

    fn set_unload_valve(&mut self, open: bool);

    fn has_drain_valve(&self) -> bool {
        true
    }

    fn has_unload_valve(&self) -> bool {
        true
    }
}

impl<T: CompressorIo + ?Sized> CompressorIo for Box<T> {
    fn step(&mut self, dt_s: f64) {
        (**self).step(dt_s)
    }

    fn read_tank_raw(&self) -> f64 {
        (**self).read_tank_raw()
    }

    fn read_line_raw(&self) -> Option<f64> {
        (**self).read_line_raw()
    }

    fn set_motor(&mut self, on: bool) {
        (**self).set_motor(on)
    }

    fn set_drain_valve(&mut self, open: bool) {
        (**self).set_drain_valve(open)
    }

    fn set_unload_valve(&mut self, open: bool) {
        (**self).set_unload_valve(open)
    }

    fn has_drain_valve(&self) -> bool {
        (**self).has_drain_valve()
    }

    fn has_unload_valve(&self) -> bool {
        (**self).has_unload_valve()
    }
}

/// Output levels as last driven by the controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputLevels {
    pub motor: bool,
    pub drain_valve: bool,
    pub unload_valve: bool,
}
