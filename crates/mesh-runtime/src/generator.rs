//! # Telemetry Generator
//!
//! Produces plausible samples for every vehicle metric. Each metric has a
//! fixed value range; discrete status metrics are 0 or 1.

use chrono::{DateTime, Utc};
use mesh_contracts::TelemetryDataPublished;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Value domain of one metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueRange {
    /// Uniform over `min..min + span`.
    Uniform { min: f64, span: f64 },
    /// 0 or 1.
    Binary,
}

impl ValueRange {
    const fn uniform(min: f64, span: f64) -> Self {
        Self::Uniform { min, span }
    }

    pub fn contains(&self, value: f64) -> bool {
        match *self {
            Self::Uniform { min, span } => value >= min && value <= min + span,
            Self::Binary => value == 0.0 || value == 1.0,
        }
    }

    fn sample<R: Rng>(&self, rng: &mut R) -> f64 {
        match *self {
            Self::Uniform { min, span } => min + rng.gen::<f64>() * span,
            Self::Binary => f64::from(rng.gen_range(0u8..2)),
        }
    }
}

/// Range used for metrics without a known profile.
pub const FALLBACK_RANGE: ValueRange = ValueRange::uniform(0.0, 1.0);

/// Value range of `metric`, `None` when it has no profile.
pub fn value_range(metric: &str) -> Option<ValueRange> {
    let range = match metric {
        // Propulsion
        "PropulsionMainEngineThrust" => ValueRange::uniform(500_000.0, 1_000_000.0),
        "PropulsionMainEngineTemperature" => ValueRange::uniform(2_500.0, 500.0),
        "PropulsionFuelPressure" | "PropulsionOxidizerPressure" => ValueRange::uniform(200.0, 50.0),
        "PropulsionCombustionChamberTemp" => ValueRange::uniform(3_000.0, 200.0),
        "PropulsionNozzleTemperature" => ValueRange::uniform(1_500.0, 300.0),
        "PropulsionTurboPumpSpeed" => ValueRange::uniform(30_000.0, 5_000.0),
        "PropulsionFuelFlowRate" => ValueRange::uniform(200.0, 100.0),

        // Power
        "PowerSolarPanelVoltage" => ValueRange::uniform(28.0, 5.0),
        "PowerSolarPanelCurrent" => ValueRange::uniform(15.0, 10.0),
        "PowerBatteryVoltage" => ValueRange::uniform(26.0, 2.0),
        "PowerBatteryTemperature" => ValueRange::uniform(15.0, 20.0),
        "PowerBatteryStateOfCharge" => ValueRange::uniform(70.0, 30.0),
        "PowerBusVoltage" => ValueRange::uniform(28.0, 0.5),
        "PowerLoadCurrent" => ValueRange::uniform(10.0, 5.0),
        "PowerGenerationWatts" => ValueRange::uniform(2_000.0, 500.0),

        // Thermal
        "ThermalRadiatorTemperature" => ValueRange::uniform(-20.0, 50.0),
        "ThermalHeatPipeStatus" => ValueRange::Binary,
        "ThermalHeaterPower" | "ThermalLouverPosition" => ValueRange::uniform(0.0, 100.0),
        "ThermalCoolantFlowRate" => ValueRange::uniform(1.0, 2.0),
        "ThermalMLITemperature" => ValueRange::uniform(-150.0, 100.0),
        "ThermalHeatExchangerDelta" => ValueRange::uniform(5.0, 10.0),
        "ThermalCryoCoolerTemp" => ValueRange::uniform(-270.0, 5.0),

        // Attitude
        "AttitudeRollAngle" | "AttitudeYawAngle" => ValueRange::uniform(-180.0, 360.0),
        "AttitudePitchAngle" => ValueRange::uniform(-90.0, 180.0),
        "AttitudeRollRate" | "AttitudePitchRate" | "AttitudeYawRate" => {
            ValueRange::uniform(-1.0, 2.0)
        }
        "AttitudeReactionWheelSpeed" => ValueRange::uniform(-3_000.0, 6_000.0),
        "AttitudeThrusterFiring" => ValueRange::Binary,

        // Navigation
        "NavPositionX" | "NavPositionY" | "NavPositionZ" => {
            ValueRange::uniform(-500_000.0, 1_000_000.0)
        }
        "NavVelocityX" | "NavVelocityY" | "NavVelocityZ" => ValueRange::uniform(-50.0, 100.0),
        "NavAltitude" => ValueRange::uniform(300_000.0, 100_000.0),
        "NavGroundSpeed" => ValueRange::uniform(7_000.0, 1_000.0),

        // Communications
        "CommSignalStrength" => ValueRange::uniform(-100.0, 30.0),
        "CommBitErrorRate" => ValueRange::uniform(0.0, 0.001),
        "CommAntennaPointing" => ValueRange::uniform(0.0, 2.0),
        "CommDataRate" => ValueRange::uniform(50.0, 100.0),
        "CommTransmitterPower" => ValueRange::uniform(20.0, 10.0),
        "CommReceiverSensitivity" => ValueRange::uniform(-130.0, 10.0),

        // Life support
        "LifeSupportOxygenLevel" => ValueRange::uniform(20.0, 2.0),
        "LifeSupportCO2Level" => ValueRange::uniform(0.3, 0.5),
        "LifeSupportCabinPressure" => ValueRange::uniform(100.0, 2.0),
        "LifeSupportCabinTemperature" => ValueRange::uniform(20.0, 5.0),

        _ => return None,
    };
    Some(range)
}

/// Sample source for the generator loop.
pub struct TelemetryGenerator {
    rng: StdRng,
}

impl Default for TelemetryGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryGenerator {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Reproducible sequence, for tests.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// One sample of `metric` taken at `now`.
    pub fn generate(&mut self, metric: &str, now: DateTime<Utc>) -> TelemetryDataPublished {
        let range = value_range(metric).unwrap_or(FALLBACK_RANGE);
        TelemetryDataPublished::new(metric, range.sample(&mut self.rng), now)
    }

    /// One sample per metric, all stamped with the same time.
    pub fn generate_batch<S: AsRef<str>>(
        &mut self,
        metrics: &[S],
        now: DateTime<Utc>,
    ) -> Vec<TelemetryDataPublished> {
        metrics
            .iter()
            .map(|metric| self.generate(metric.as_ref(), now))
            .collect()
    }
}
