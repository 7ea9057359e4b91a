//! INA3221 power monitor readings (Jetson Nano / TX2 sysfs layout).
//!
//! Each channel exposes `in_current{N}_input` (mA), `in_voltage{N}_input` (mV)
//! and `in_power{N}_input` (mW).

use jetson_kernel::models::PowerReading;
use std::path::Path;
use tracing::debug;

fn read_milli(dir: &Path, file: &str) -> Option<f32> {
    let raw = std::fs::read_to_string(dir.join(file)).ok()?;
    let value: f32 = raw.trim().parse().ok()?;
    Some(value / 1000.0)
}

/// Reads one rail. `None` when the board has no such monitor.
pub fn read_rail(dir: &Path, channel: u8) -> Option<PowerReading> {
    let current = read_milli(dir, &format!("in_current{channel}_input"))?;
    let voltage = read_milli(dir, &format!("in_voltage{channel}_input"))?;
    let power = read_milli(dir, &format!("in_power{channel}_input"));
    debug!(current, voltage, ?power, "power rail {channel}");
    Some(PowerReading { current, voltage, power })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_rail_in_si_units() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("in_current0_input"), "1200\n").unwrap();
        std::fs::write(dir.path().join("in_voltage0_input"), "5000\n").unwrap();
        std::fs::write(dir.path().join("in_power0_input"), "6000\n").unwrap();

        let reading = read_rail(dir.path(), 0).unwrap();
        assert_eq!(reading.current, 1.2);
        assert_eq!(reading.voltage, 5.0);
        assert_eq!(reading.power, Some(6.0));
    }

    #[test]
    fn test_power_file_is_optional() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("in_current1_input"), "2000").unwrap();
        std::fs::write(dir.path().join("in_voltage1_input"), "5000").unwrap();

        let reading = read_rail(dir.path(), 1).unwrap();
        assert_eq!(reading.power, None);
        assert_eq!(reading.watts(), 10.0);
        assert!(read_rail(dir.path(), 0).is_none());
    }
}
