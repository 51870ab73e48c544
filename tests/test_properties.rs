use smogmap::core::aqi::calculate_aqi;
use smogmap::core::correction::{BiasCorrector, GwrCorrector, GwrParams, LinearCorrector};
use smogmap::core::units::{convert, Unit};
use smogmap::types::Pollutant;

const UNITS: [Unit; 8] = [
    Unit::MicrogramsPerCubicMeter,
    Unit::MilligramsPerCubicMeter,
    Unit::NanogramsPerCubicMeter,
    Unit::Ppb,
    Unit::Ppm,
    Unit::MolPerSquareMeter,
    Unit::MicromolPerSquareMeter,
    Unit::MoleculesPerSquareCm,
];

#[test]
fn test_unit_round_trip_for_gases() {
    let mut checked = 0;
    for pollutant in Pollutant::ALL.iter().filter(|p| p.molecular_weight().is_some()) {
        for &from in &UNITS {
            for &to in &UNITS {
                for &value in &[0.0, 0.37, 12.5, 840.0] {
                    let Ok(there) = convert(value, from, to, Some(*pollutant)) else {
                        continue;
                    };
                    let back = convert(there, to, from, Some(*pollutant))
                        .unwrap_or_else(|e| panic!("{} -> {} reachable but not back: {}", from, to, e));
                    approx::assert_relative_eq!(back, value, epsilon = 1e-9, max_relative = 1e-9);
                    checked += 1;
                }
            }
        }
    }
    assert!(checked > 0);
}

#[test]
fn test_aqi_is_monotonic() {
    for pollutant in Pollutant::ALL {
        let mut previous = f64::NEG_INFINITY;
        for step in 0..=6000 {
            let concentration = step as f64 * 0.25;
            let aqi = calculate_aqi(pollutant, concentration);
            assert!(
                aqi >= previous,
                "{} AQI dropped at {}: {} < {}",
                pollutant,
                concentration,
                aqi,
                previous
            );
            previous = aqi;
        }
    }
}

#[test]
fn test_predictions_never_negative() {
    let x: Vec<f64> = (0..15).map(|i| 10.0 + i as f64 * 4.0).collect();
    let y: Vec<f64> = x
        .iter()
        .enumerate()
        .map(|(i, v)| v * 0.8 - 5.0 + ((i * 7) % 5) as f64 * 0.3)
        .collect();
    let coords: Vec<(f64, f64)> = (0..15)
        .map(|i| (70.0 + (i % 5) as f64 * 0.2, 30.0 + (i / 5) as f64 * 0.3))
        .collect();

    let mut linear = LinearCorrector::new();
    linear.fit(&x, &y, &coords).unwrap();
    let mut gwr = GwrCorrector::new(GwrParams::default());
    gwr.fit(&x, &y, &coords).unwrap();

    let adversarial = [-500.0, -1.0, 0.0, 1e-9, -1e6];
    let at = vec![(70.4, 30.3); adversarial.len()];
    for model in [&linear as &dyn Predict, &gwr as &dyn Predict] {
        for value in model.run(&adversarial, &at) {
            assert!(value >= 0.0, "negative prediction {}", value);
        }
    }
}

trait Predict {
    fn run(&self, x: &[f64], coords: &[(f64, f64)]) -> Vec<f64>;
}

impl<T: BiasCorrector> Predict for T {
    fn run(&self, x: &[f64], coords: &[(f64, f64)]) -> Vec<f64> {
        self.predict(x, coords).unwrap()
    }
}
