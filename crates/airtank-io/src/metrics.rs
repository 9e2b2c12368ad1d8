//! Prometheus metrics for the compressor.
//!
//! Gauges are refreshed from controller snapshots; the registry is rendered by
//! the telemetry endpoint.

use airtank_core::StateView;
use prometheus::{Encoder, Gauge, IntGauge, Registry, TextEncoder};
use std::sync::LazyLock;

/// Global metrics registry
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

fn gauge(name: &str, help: &str) -> Gauge {
    let gauge = Gauge::new(name, help).expect("static gauge definition is valid");
    if let Err(err) = REGISTRY.register(Box::new(gauge.clone())) {
        tracing::warn!("metric {} not registered: {}", name, err);
    }
    gauge
}

fn int_gauge(name: &str, help: &str) -> IntGauge {
    let gauge = IntGauge::new(name, help).expect("static gauge definition is valid");
    if let Err(err) = REGISTRY.register(Box::new(gauge.clone())) {
        tracing::warn!("metric {} not registered: {}", name, err);
    }
    gauge
}

// ============================================================================
// Process state
// ============================================================================

/// Tank pressure; NaN while the sensor is faulted
pub static TANK_PRESSURE: LazyLock<Gauge> =
    LazyLock::new(|| gauge("airtank_tank_pressure", "Tank pressure in sensor units"));

/// Line pressure; NaN while the sensor is faulted
pub static LINE_PRESSURE: LazyLock<Gauge> =
    LazyLock::new(|| gauge("airtank_line_pressure", "Line pressure in sensor units"));

pub static DUTY: LazyLock<Gauge> = LazyLock::new(|| {
    gauge(
        "airtank_duty_ratio",
        "Motor duty over the configured duty window (0.0-1.0)",
    )
});

pub static RUNTIME_SECONDS: LazyLock<IntGauge> = LazyLock::new(|| {
    int_gauge(
        "airtank_runtime_seconds",
        "Motor run time across the retained event log",
    )
});

// ============================================================================
// Controller state
// ============================================================================

/// Motor state (0=running,1=off,2=sensor_error,3=paused,4=overpressure,
/// 5=pressure_change_error,6=duty_limited,7=purging)
pub static MOTOR_STATE: LazyLock<IntGauge> = LazyLock::new(|| {
    int_gauge(
        "airtank_motor_state",
        "Motor state (0=running,1=off,2=sensor_error,3=paused,4=overpressure,5=pressure_change_error,6=duty_limited,7=purging)",
    )
});

pub static COMPRESSOR_ENABLED: LazyLock<IntGauge> = LazyLock::new(|| {
    int_gauge("airtank_compressor_enabled", "Compressor enabled (1) or off (0)")
});

pub static PURGE_OPEN: LazyLock<IntGauge> =
    LazyLock::new(|| int_gauge("airtank_purge_open", "Drain valve open for a purge"));

pub static UNLOAD_OPEN: LazyLock<IntGauge> =
    LazyLock::new(|| int_gauge("airtank_unload_open", "Unload valve open"));

pub static TANK_SENSOR_FAULT: LazyLock<IntGauge> = LazyLock::new(|| {
    int_gauge("airtank_tank_sensor_fault", "Tank sensor reading out of range")
});

pub static LINE_SENSOR_FAULT: LazyLock<IntGauge> = LazyLock::new(|| {
    int_gauge("airtank_line_sensor_fault", "Line sensor reading out of range")
});

pub static PRESSURE_CHANGE_FAULTS: LazyLock<IntGauge> = LazyLock::new(|| {
    int_gauge(
        "airtank_pressure_change_faults",
        "Pressure-change faults raised since start",
    )
});

pub static TICKS: LazyLock<IntGauge> =
    LazyLock::new(|| int_gauge("airtank_ticks", "Control ticks executed"));

fn flag(value: bool) -> i64 {
    i64::from(value)
}

/// Refresh every gauge from `view`.
pub fn record_snapshot(view: &StateView) {
    TANK_PRESSURE.set(view.tank_pressure.unwrap_or(f64::NAN));
    LINE_PRESSURE.set(view.line_pressure.unwrap_or(f64::NAN));
    DUTY.set(view.duty);
    RUNTIME_SECONDS.set(view.runtime_secs as i64);
    MOTOR_STATE.set(view.motor_state.code());
    COMPRESSOR_ENABLED.set(flag(view.compressor_enabled));
    PURGE_OPEN.set(flag(view.purge_open));
    UNLOAD_OPEN.set(flag(view.unload_open));
    TANK_SENSOR_FAULT.set(flag(view.tank_sensor_fault));
    LINE_SENSOR_FAULT.set(flag(view.line_sensor_fault));
    PRESSURE_CHANGE_FAULTS.set(view.pressure_change_faults as i64);
    TICKS.set(view.tick_count as i64);
}

/// Text exposition of the registry.
pub fn render() -> Result<Vec<u8>, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(buffer)
}

/// Initialize all metrics (forces lazy initialization)
pub fn init_metrics() {
    let _ = TANK_PRESSURE.get();
    let _ = LINE_PRESSURE.get();
    let _ = DUTY.get();
    let _ = RUNTIME_SECONDS.get();
    let _ = MOTOR_STATE.get();
    let _ = COMPRESSOR_ENABLED.get();
    let _ = PURGE_OPEN.get();
    let _ = UNLOAD_OPEN.get();
    let _ = TANK_SENSOR_FAULT.get();
    let _ = LINE_SENSOR_FAULT.get();
    let _ = PRESSURE_CHANGE_FAULTS.get();
    let _ = TICKS.get();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_lists_registered_gauges() {
        init_metrics();
        MOTOR_STATE.set(6);
        let text = String::from_utf8(render().unwrap()).unwrap();
        assert!(text.contains("airtank_motor_state 6"));
        assert!(text.contains("airtank_tank_pressure"));
    }
}
