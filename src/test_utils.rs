/*
 * Test utilities and fakes for fscd
 *
 * Scripted sensor, tach and PWM fakes that stand in for sysfs and vendor
 * utilities, plus helpers for temporary sysfs trees and config documents.
 */

#[cfg(test)]
pub mod test_utils {
    use std::collections::VecDeque;
    use std::fs;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    use serde_json::json;
    use tempfile::{NamedTempFile, TempDir};

    use fscd_error::{FscError, Result};

    use crate::fan::{ActuatorSink, TachSource};
    use crate::sensor::{SensorReading, SensorSource, SensorStatus};

    /// Pop the next scripted value; the last one repeats forever.
    fn next_scripted<T: Clone>(queue: &Mutex<VecDeque<T>>) -> Option<T> {
        let mut q = queue.lock().unwrap();
        if q.len() > 1 {
            q.pop_front()
        } else {
            q.front().cloned()
        }
    }

    /// Sensor source replaying a script of readings (`Err(())` = read failure).
    #[derive(Clone, Default)]
    pub struct FakeSource {
        script: Arc<Mutex<VecDeque<std::result::Result<SensorReading, ()>>>>,
    }

    impl FakeSource {
        pub fn new(values: Vec<std::result::Result<f64, ()>>) -> Self {
            let script = values.into_iter().map(|v| v.map(SensorReading::ok)).collect();
            Self { script: Arc::new(Mutex::new(script)) }
        }

        pub fn constant(value: f64) -> Self {
            Self::new(vec![Ok(value)])
        }

        pub fn ucr(value: f64) -> Self {
            let reading = SensorReading { value, status: SensorStatus::Ucr };
            Self { script: Arc::new(Mutex::new(VecDeque::from(vec![Ok(reading)]))) }
        }

        /// Replace the script with a single repeating value.
        pub fn set(&self, value: std::result::Result<f64, ()>) {
            let mut q = self.script.lock().unwrap();
            q.clear();
            q.push_back(value.map(SensorReading::ok));
        }
    }

    impl SensorSource for FakeSource {
        fn read(&mut self) -> Result<SensorReading> {
            match next_scripted(&self.script) {
                Some(Ok(r)) => Ok(r),
                _ => Err(FscError::SensorUnavailable("fake".to_string())),
            }
        }

        fn describe(&self) -> String {
            "fake".to_string()
        }
    }

    /// Tach replaying a script of RPM values (`None` = read failure).
    #[derive(Clone, Default)]
    pub struct FakeTach {
        script: Arc<Mutex<VecDeque<Option<f64>>>>,
    }

    impl FakeTach {
        pub fn new(values: Vec<Option<f64>>) -> Self {
            Self { script: Arc::new(Mutex::new(values.into_iter().collect())) }
        }

        pub fn constant(rpm: f64) -> Self {
            Self::new(vec![Some(rpm)])
        }

        pub fn set(&self, rpm: Option<f64>) {
            let mut q = self.script.lock().unwrap();
            q.clear();
            q.push_back(rpm);
        }
    }

    impl TachSource for FakeTach {
        fn read_rpm(&mut self) -> Result<f64> {
            next_scripted(&self.script).flatten().ok_or_else(|| FscError::FanRead {
                name: "fake".to_string(),
                reason: "scripted failure".to_string(),
            })
        }

        fn describe(&self) -> String {
            "fake tach".to_string()
        }
    }

    /// PWM sink recording every write; clones share the record.
    #[derive(Clone, Default)]
    pub struct MemorySink {
        written: Arc<Mutex<Vec<f64>>>,
        fail: Arc<Mutex<bool>>,
    }

    impl MemorySink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn written(&self) -> Vec<f64> {
            self.written.lock().unwrap().clone()
        }

        pub fn last(&self) -> Option<f64> {
            self.written.lock().unwrap().last().copied()
        }

        pub fn set_failing(&self, fail: bool) {
            *self.fail.lock().unwrap() = fail;
        }
    }

    impl ActuatorSink for MemorySink {
        fn write_pwm(&mut self, pwm: f64) -> Result<()> {
            if *self.fail.lock().unwrap() {
                return Err(FscError::PwmWrite { target: "memory".to_string(), reason: "scripted failure".to_string() });
            }
            self.written.lock().unwrap().push(pwm);
            Ok(())
        }

        fn read_pwm(&mut self) -> Result<f64> {
            self.last().ok_or_else(|| FscError::NotSupported("nothing written".to_string()))
        }

        fn describe(&self) -> String {
            "memory".to_string()
        }
    }

    /// Creates a temporary file with JSON content
    pub fn create_temp_json_file<T: serde::Serialize>(data: &T) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        let json = serde_json::to_string_pretty(data).unwrap();
        temp_file.write_all(json.as_bytes()).unwrap();
        temp_file.flush().unwrap();
        temp_file
    }

    /// Creates a flat temporary directory shaped like one hwmon device
    pub fn create_mock_sysfs_dir() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("temp1_input"), "45500").unwrap();
        fs::write(root.join("temp2_input"), "30000").unwrap();
        fs::write(root.join("fan1_input"), "1200").unwrap();
        fs::write(root.join("fan2_input"), "1300").unwrap();
        fs::write(root.join("pwm1"), "0").unwrap();
        fs::write(root.join("pwm2"), "0").unwrap();
        temp_dir
    }

    /// A small valid document: one sensor, two fans, one zone, rooted at `root`
    pub fn minimal_config_json(root: &str) -> String {
        json!({
            "pwm_transition_value": 70,
            "pwm_boost_value": 100,
            "min_rpm": 500,
            "sensors": {
                "inlet": { "read_source": { "sysfs": format!("{}/temp1_input", root) } }
            },
            "profiles": {
                "linear_inlet": {
                    "type": "linear",
                    "positive_hysteresis": 0,
                    "negative_hysteresis": 2,
                    "data": [[20, 20], [40, 40], [60, 80]]
                }
            },
            "fans": {
                "0": {
                    "read_source": { "sysfs": format!("{}/fan1_input", root) },
                    "write_source": { "sysfs": format!("{}/pwm1", root) }
                },
                "1": {
                    "read_source": { "sysfs": format!("{}/fan2_input", root) },
                    "write_source": { "sysfs": format!("{}/pwm2", root) }
                }
            },
            "zones": {
                "zone_1": {
                    "pwm_output": [0, 1],
                    "inputs": [{ "sensor": "inlet", "profile": "linear_inlet" }]
                }
            }
        })
        .to_string()
    }

    /// Asserts that two floating point numbers are approximately equal
    pub fn assert_approx_eq(a: f64, b: f64, tolerance: f64) {
        assert!(
            (a - b).abs() < tolerance,
            "Values {} and {} are not approximately equal (tolerance: {})",
            a, b, tolerance
        );
    }
}

#[cfg(test)]
mod tests {
    use super::test_utils::*;
    use crate::fan::{ActuatorSink, TachSource};
    use crate::sensor::SensorSource;

    #[test]
    fn test_assert_approx_eq() {
        assert_approx_eq(1.0, 1.001, 0.01);
        assert_approx_eq(25.5, 25.49, 0.1);
    }

    #[test]
    #[should_panic]
    fn test_assert_approx_eq_fails() {
        assert_approx_eq(1.0, 1.1, 0.01);
    }

    #[test]
    fn test_fake_source_script_repeats_last() {
        let mut source = FakeSource::new(vec![Ok(1.0), Err(()), Ok(3.0)]);
        assert_eq!(source.read().unwrap().value, 1.0);
        assert!(source.read().is_err());
        assert_eq!(source.read().unwrap().value, 3.0);
        assert_eq!(source.read().unwrap().value, 3.0);

        let handle = source.clone();
        handle.set(Err(()));
        assert!(source.read().is_err());
    }

    #[test]
    fn test_fake_tach_and_sink() {
        let mut tach = FakeTach::new(vec![Some(100.0), None]);
        assert_eq!(tach.read_rpm().unwrap(), 100.0);
        assert!(tach.read_rpm().is_err());

        let sink = MemorySink::new();
        let mut writer = sink.clone();
        writer.write_pwm(42.0).unwrap();
        assert_eq!(sink.written(), vec![42.0]);
        sink.set_failing(true);
        assert!(writer.write_pwm(50.0).is_err());
    }

    #[test]
    fn test_mock_sysfs_dir() {
        let dir = create_mock_sysfs_dir();
        assert!(dir.path().join("temp1_input").exists());
        assert!(dir.path().join("pwm2").exists());
    }
}
