use crate::types::{AqError, AqResult, Pollutant};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Molar volume of an ideal gas at 25 °C and 1 atm (L/mol)
pub const MOLAR_VOLUME_25C: f64 = 24.45;

/// Avogadro constant (1/mol)
pub const AVOGADRO: f64 = 6.022_140_76e23;

/// Measurement units seen in ground and satellite feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Unit {
    /// µg/m³
    MicrogramsPerCubicMeter,
    /// mg/m³
    MilligramsPerCubicMeter,
    /// ng/m³
    NanogramsPerCubicMeter,
    Ppb,
    Ppm,
    /// Column density, mol/m²
    MolPerSquareMeter,
    /// Column density, µmol/m²
    MicromolPerSquareMeter,
    /// Column density, molecules/cm²
    MoleculesPerSquareCm,
}

impl Unit {
    pub fn symbol(&self) -> &'static str {
        match self {
            Unit::MicrogramsPerCubicMeter => "µg/m³",
            Unit::MilligramsPerCubicMeter => "mg/m³",
            Unit::NanogramsPerCubicMeter => "ng/m³",
            Unit::Ppb => "ppb",
            Unit::Ppm => "ppm",
            Unit::MolPerSquareMeter => "mol/m²",
            Unit::MicromolPerSquareMeter => "µmol/m²",
            Unit::MoleculesPerSquareCm => "molecules/cm²",
        }
    }

    fn is_volume_fraction(&self) -> bool {
        matches!(self, Unit::Ppb | Unit::Ppm)
    }

    /// Volume-fraction units expressed in ppb
    fn ppb_factor(&self) -> f64 {
        match self {
            Unit::Ppm => 1000.0,
            _ => 1.0,
        }
    }
}

impl std::fmt::Display for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

impl FromStr for Unit {
    type Err = AqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .to_lowercase()
            .replace(['µ', 'μ'], "u")
            .replace('³', "3")
            .replace('²', "2")
            .replace("^", "")
            .replace(' ', "");

        match normalized.as_str() {
            "ug/m3" | "ugm-3" | "microgramspercubicmeter" => Ok(Unit::MicrogramsPerCubicMeter),
            "mg/m3" | "mgm-3" => Ok(Unit::MilligramsPerCubicMeter),
            "ng/m3" | "ngm-3" => Ok(Unit::NanogramsPerCubicMeter),
            "ppb" => Ok(Unit::Ppb),
            "ppm" => Ok(Unit::Ppm),
            "mol/m2" | "molm-2" => Ok(Unit::MolPerSquareMeter),
            "umol/m2" | "umolm-2" => Ok(Unit::MicromolPerSquareMeter),
            "molecules/cm2" | "moleculescm-2" | "molec/cm2" => Ok(Unit::MoleculesPerSquareCm),
            _ => Err(AqError::UnitConversion(format!("Unknown unit: {}", s))),
        }
    }
}

/// Constant-factor conversions: `to = from × factor`
const FACTOR_TABLE: &[(Unit, Unit, f64)] = &[
    (Unit::Ppm, Unit::Ppb, 1000.0),
    (Unit::MilligramsPerCubicMeter, Unit::MicrogramsPerCubicMeter, 1000.0),
    (Unit::NanogramsPerCubicMeter, Unit::MicrogramsPerCubicMeter, 1.0e-3),
    (Unit::MilligramsPerCubicMeter, Unit::NanogramsPerCubicMeter, 1.0e6),
    (Unit::MolPerSquareMeter, Unit::MicromolPerSquareMeter, 1.0e6),
    (Unit::MolPerSquareMeter, Unit::MoleculesPerSquareCm, AVOGADRO / 1.0e4),
    (
        Unit::MicromolPerSquareMeter,
        Unit::MoleculesPerSquareCm,
        AVOGADRO / 1.0e10,
    ),
];

/// Standard storage unit for each pollutant (matches its AQI breakpoint table)
pub fn standard_unit(pollutant: Pollutant) -> Unit {
    match pollutant {
        Pollutant::PM25 | Pollutant::PM10 => Unit::MicrogramsPerCubicMeter,
        Pollutant::NO2 | Pollutant::SO2 | Pollutant::O3 => Unit::Ppb,
        Pollutant::CO => Unit::Ppm,
    }
}

fn table_factor(from: Unit, to: Unit) -> Option<f64> {
    FACTOR_TABLE.iter().find_map(|&(a, b, factor)| {
        if a == from && b == to {
            Some(factor)
        } else if a == to && b == from {
            Some(1.0 / factor)
        } else {
            None
        }
    })
}

/// One conversion step: same unit, table factor, or gas-law conversion
fn convert_direct(value: f64, from: Unit, to: Unit, pollutant: Option<Pollutant>) -> AqResult<Option<f64>> {
    if from == to {
        return Ok(Some(value));
    }
    if let Some(factor) = table_factor(from, to) {
        return Ok(Some(value * factor));
    }

    let gas_pair = (from.is_volume_fraction() && to == Unit::MicrogramsPerCubicMeter)
        || (from == Unit::MicrogramsPerCubicMeter && to.is_volume_fraction());
    if !gas_pair {
        return Ok(None);
    }

    let molecular_weight = pollutant.and_then(|p| p.molecular_weight()).ok_or_else(|| {
        AqError::UnitConversion(format!(
            "Converting {} to {} requires a molecular weight, none defined for {}",
            from,
            to,
            pollutant.map(|p| p.to_string()).unwrap_or_else(|| "unspecified pollutant".to_string())
        ))
    })?;

    // µg/m³ = ppb × MW / molar_volume
    let converted = if from.is_volume_fraction() {
        value * from.ppb_factor() * molecular_weight / MOLAR_VOLUME_25C
    } else {
        value * MOLAR_VOLUME_25C / molecular_weight / to.ppb_factor()
    };
    Ok(Some(converted))
}

/// Convert `value` between units
///
/// Falls back to a two-hop conversion through µg/m³ when no direct path
/// exists.
pub fn convert(value: f64, from: Unit, to: Unit, pollutant: Option<Pollutant>) -> AqResult<f64> {
    if let Some(converted) = convert_direct(value, from, to, pollutant)? {
        return Ok(converted);
    }

    let hub = Unit::MicrogramsPerCubicMeter;
    if from != hub && to != hub {
        if let Some(mid) = convert_direct(value, from, hub, pollutant)? {
            if let Some(converted) = convert_direct(mid, hub, to, pollutant)? {
                return Ok(converted);
            }
        }
    }

    Err(AqError::UnitConversion(format!(
        "No conversion path from {} to {}",
        from, to
    )))
}

/// Ingestion-time normalisation to the pollutant's standard unit
///
/// Never fails: on any conversion problem the original value is returned
/// tagged with its original unit string.
pub fn normalize_to_standard(value: f64, unit: &str, pollutant: &str) -> (f64, String) {
    let attempt = || -> AqResult<(f64, String)> {
        let pollutant: Pollutant = pollutant.parse()?;
        let from: Unit = unit.parse()?;
        let target = standard_unit(pollutant);
        let converted = convert(value, from, target, Some(pollutant))?;
        Ok((converted, target.symbol().to_string()))
    };

    match attempt() {
        Ok(normalized) => normalized,
        Err(e) => {
            log::warn!(
                "Keeping {} {} for {} unconverted: {}",
                value,
                unit,
                pollutant,
                e
            );
            (value, unit.to_string())
        }
    }
}
