//! # Telemetry Contracts
//!
//! Space-vehicle telemetry: 50 metrics across seven subsystems, published
//! as [`TelemetryDataPublished`] samples on the telemetry channel.

use crate::ContractError;
use chrono::{DateTime, TimeZone, Utc};
use mesh_bus::Message;
use serde::{Deserialize, Serialize};

/// Vehicle subsystem a metric belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subsystem {
    Propulsion,
    Power,
    Thermal,
    Attitude,
    Navigation,
    Communications,
    LifeSupport,
}

impl Subsystem {
    pub const ALL: [Subsystem; 7] = [
        Self::Propulsion,
        Self::Power,
        Self::Thermal,
        Self::Attitude,
        Self::Navigation,
        Self::Communications,
        Self::LifeSupport,
    ];

    /// Metric names reported by this subsystem.
    pub fn metrics(&self) -> &'static [&'static str] {
        match self {
            Self::Propulsion => &ALL_METRICS[0..8],
            Self::Power => &ALL_METRICS[8..16],
            Self::Thermal => &ALL_METRICS[16..24],
            Self::Attitude => &ALL_METRICS[24..32],
            Self::Navigation => &ALL_METRICS[32..40],
            Self::Communications => &ALL_METRICS[40..46],
            Self::LifeSupport => &ALL_METRICS[46..50],
        }
    }

    /// Subsystem reporting `metric`.
    ///
    /// # Errors
    ///
    /// `ContractError::UnknownMetric` if no subsystem reports it.
    pub fn of(metric: &str) -> Result<Self, ContractError> {
        Self::ALL
            .into_iter()
            .find(|subsystem| subsystem.metrics().iter().any(|m| *m == metric))
            .ok_or_else(|| ContractError::UnknownMetric(metric.to_string()))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Propulsion => "propulsion",
            Self::Power => "power",
            Self::Thermal => "thermal",
            Self::Attitude => "attitude",
            Self::Navigation => "navigation",
            Self::Communications => "communications",
            Self::LifeSupport => "life_support",
        }
    }
}

/// Every telemetry metric, grouped by subsystem in [`Subsystem::ALL`] order.
pub const ALL_METRICS: [&str; 50] = [
    // Propulsion
    "PropulsionMainEngineThrust",
    "PropulsionMainEngineTemperature",
    "PropulsionFuelPressure",
    "PropulsionOxidizerPressure",
    "PropulsionCombustionChamberTemp",
    "PropulsionNozzleTemperature",
    "PropulsionTurboPumpSpeed",
    "PropulsionFuelFlowRate",
    // Electrical power
    "PowerSolarPanelVoltage",
    "PowerSolarPanelCurrent",
    "PowerBatteryVoltage",
    "PowerBatteryTemperature",
    "PowerBatteryStateOfCharge",
    "PowerBusVoltage",
    "PowerLoadCurrent",
    "PowerGenerationWatts",
    // Thermal control
    "ThermalRadiatorTemperature",
    "ThermalHeatPipeStatus",
    "ThermalHeaterPower",
    "ThermalCoolantFlowRate",
    "ThermalMLITemperature",
    "ThermalLouverPosition",
    "ThermalHeatExchangerDelta",
    "ThermalCryoCoolerTemp",
    // Attitude control
    "AttitudeRollAngle",
    "AttitudePitchAngle",
    "AttitudeYawAngle",
    "AttitudeRollRate",
    "AttitudePitchRate",
    "AttitudeYawRate",
    "AttitudeReactionWheelSpeed",
    "AttitudeThrusterFiring",
    // Navigation and guidance
    "NavPositionX",
    "NavPositionY",
    "NavPositionZ",
    "NavVelocityX",
    "NavVelocityY",
    "NavVelocityZ",
    "NavAltitude",
    "NavGroundSpeed",
    // Communications
    "CommSignalStrength",
    "CommBitErrorRate",
    "CommAntennaPointing",
    "CommDataRate",
    "CommTransmitterPower",
    "CommReceiverSensitivity",
    // Life support
    "LifeSupportOxygenLevel",
    "LifeSupportCO2Level",
    "LifeSupportCabinPressure",
    "LifeSupportCabinTemperature",
];

/// One telemetry sample.
///
/// Field order is the wire order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryDataPublished {
    /// Metric name, one of [`ALL_METRICS`].
    pub name: String,
    pub value: f64,
    /// Universal sample time, Unix milliseconds.
    pub ust_unix_ms: i64,
}

impl TelemetryDataPublished {
    pub fn new(name: impl Into<String>, value: f64, ust: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            value,
            ust_unix_ms: ust.timestamp_millis(),
        }
    }

    /// Sample time, `None` if out of chrono's range.
    pub fn ust(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.ust_unix_ms).single()
    }
}

impl Message for TelemetryDataPublished {}
