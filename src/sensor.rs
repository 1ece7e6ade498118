use log::debug;
use std::fmt;

/// Default I2C address of a BME280 with SDO pulled high.
pub const DEFAULT_ADDRESS: u8 = 0x77;
/// Alternate I2C address of a BME280 with SDO pulled low.
pub const ALTERNATE_ADDRESS: u8 = 0x76;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    BusNotEnabled,
    NoAnswer { address: u8 },
    NotStarted,
    /// Humidity compensation needs a temperature reading first.
    NotCalibrated,
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorError::BusNotEnabled => write!(f, "The given i2c is not enabled"),
            SensorError::NoAnswer { address } => write!(
                f,
                "The sensor did not answer correctly at address 0x{:02X}",
                address
            ),
            SensorError::NotStarted => write!(f, "The sensor has not been started"),
            SensorError::NotCalibrated => write!(f, "The sensor is not calibrated"),
        }
    }
}

impl std::error::Error for SensorError {}

/// A temperature, pressure and humidity sensor.
///
/// Temperatures are in hundredths of a degree Celsius, pressure in Pascal
/// and relative humidity in hundredths of a percent.
pub trait EnvironmentSensor: Send {
    fn read_temperature(&mut self) -> Result<i16, SensorError>;

    fn read_pressure(&mut self) -> Result<u32, SensorError>;

    /// Reads the relative humidity. Drivers compensate it against the last
    /// temperature reading, so callers read temperature first.
    fn read_humidity(&mut self) -> Result<u16, SensorError>;
}

/// Bus parameters of the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorParams {
    pub bus: u8,
    pub bus_enabled: bool,
    pub address: u8,
}

impl Default for SensorParams {
    fn default() -> Self {
        Self {
            bus: 0,
            bus_enabled: true,
            address: DEFAULT_ADDRESS,
        }
    }
}

/// Software BME280 producing slowly drifting, deterministic readings.
#[derive(Debug)]
pub struct SimulatedBme280 {
    params: SensorParams,
    started: bool,
    step: u32,
    t_fine: Option<i32>,
}

impl SimulatedBme280 {
    pub fn new(params: SensorParams) -> Self {
        Self {
            params,
            started: false,
            step: 0,
            t_fine: None,
        }
    }

    /// Probes the device on its bus.
    pub fn start(&mut self) -> Result<(), SensorError> {
        if !self.params.bus_enabled {
            return Err(SensorError::BusNotEnabled);
        }
        if self.params.address != DEFAULT_ADDRESS && self.params.address != ALTERNATE_ADDRESS {
            return Err(SensorError::NoAnswer {
                address: self.params.address,
            });
        }

        debug!(
            "bme280 started on bus {} at 0x{:02X}",
            self.params.bus, self.params.address
        );
        self.started = true;
        Ok(())
    }

    fn advance(&mut self) -> Result<i32, SensorError> {
        if !self.started {
            return Err(SensorError::NotStarted);
        }
        self.step = self.step.wrapping_add(1);
        Ok(Self::triangle(self.step, 40))
    }

    // Triangle wave in [-period/2, period/2].
    fn triangle(step: u32, period: u32) -> i32 {
        let phase = (step % period) as i32;
        let half = (period / 2) as i32;
        if phase <= half {
            phase - half / 2
        } else {
            (period as i32 - phase) - half / 2
        }
    }
}

impl EnvironmentSensor for SimulatedBme280 {
    fn read_temperature(&mut self) -> Result<i16, SensorError> {
        let drift = self.advance()?;
        let temperature = 2150 + drift * 5;
        self.t_fine = Some(temperature);
        Ok(temperature as i16)
    }

    fn read_pressure(&mut self) -> Result<u32, SensorError> {
        let drift = self.advance()?;
        Ok((101_325 + drift * 12) as u32)
    }

    fn read_humidity(&mut self) -> Result<u16, SensorError> {
        let drift = self.advance()?;
        let t_fine = self.t_fine.ok_or(SensorError::NotCalibrated)?;
        // warmer air holds more water, so relative humidity drops
        let humidity = 4500 + drift * 20 - (t_fine - 2150) / 2;
        Ok(humidity.clamp(0, 10_000) as u16)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_start_errors() {
        let mut sensor = SimulatedBme280::new(SensorParams {
            bus_enabled: false,
            ..SensorParams::default()
        });
        assert_eq!(sensor.start(), Err(SensorError::BusNotEnabled));

        let mut sensor = SimulatedBme280::new(SensorParams {
            address: 0x42,
            ..SensorParams::default()
        });
        let error = sensor.start().unwrap_err();
        assert_eq!(error, SensorError::NoAnswer { address: 0x42 });
        assert_eq!(
            error.to_string(),
            "The sensor did not answer correctly at address 0x42"
        );
    }

    #[test]
    fn test_read_before_start() {
        let mut sensor = SimulatedBme280::new(SensorParams::default());
        assert_eq!(sensor.read_temperature(), Err(SensorError::NotStarted));
    }

    #[test]
    fn test_humidity_needs_temperature() {
        let mut sensor = SimulatedBme280::new(SensorParams::default());
        sensor.start().unwrap();
        assert_eq!(sensor.read_humidity(), Err(SensorError::NotCalibrated));

        sensor.read_temperature().unwrap();
        let humidity = sensor.read_humidity().unwrap();
        assert!(humidity > 3000 && humidity < 6000, "{}", humidity);
    }

    #[test]
    fn test_readings_are_plausible() {
        let mut sensor = SimulatedBme280::new(SensorParams {
            address: ALTERNATE_ADDRESS,
            ..SensorParams::default()
        });
        sensor.start().unwrap();
        for _ in 0..100 {
            let temperature = sensor.read_temperature().unwrap();
            assert!((2000..2300).contains(&temperature), "{}", temperature);
            let pressure = sensor.read_pressure().unwrap();
            assert!((101_000..101_700).contains(&pressure), "{}", pressure);
        }
    }
}
