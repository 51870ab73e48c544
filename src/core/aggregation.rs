//! District ranking and province/national roll-ups.

use crate::core::exposure::{DataSource, ExposureStats};
use crate::records::{DistrictExposure, ExposureScope, NationalExposure, ProvinceExposure};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Assign rank 1 to the highest exposure index
///
/// Ties break by district id ascending so ranks are reproducible. Records are
/// left sorted in rank order.
pub fn rank_districts(records: &mut [DistrictExposure]) {
    records.sort_by(|a, b| {
        b.stats
            .exposure_index
            .total_cmp(&a.stats.exposure_index)
            .then_with(|| a.district_id.cmp(&b.district_id))
    });
    for (i, record) in records.iter_mut().enumerate() {
        record.rank = Some(i + 1);
    }
}

/// Worst-pollutant record per district, re-scoped as combined
///
/// The dominant pollutant is the one with the highest mean AQI; ties go to
/// the pollutant that sorts first.
pub fn combine_pollutants(records: &[DistrictExposure]) -> Vec<DistrictExposure> {
    let mut dominant: BTreeMap<&str, &DistrictExposure> = BTreeMap::new();
    for record in records {
        if record.scope == ExposureScope::Combined {
            continue;
        }
        dominant
            .entry(record.district_id.as_str())
            .and_modify(|current| {
                if worse(record, current) {
                    *current = record;
                }
            })
            .or_insert(record);
    }

    dominant
        .into_values()
        .map(|record| DistrictExposure {
            scope: ExposureScope::Combined,
            rank: None,
            ..record.clone()
        })
        .collect()
}

fn worse(candidate: &DistrictExposure, current: &DistrictExposure) -> bool {
    match candidate.stats.mean_aqi.total_cmp(&current.stats.mean_aqi) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => candidate.scope < current.scope,
    }
}

/// Sum or population-weight a set of child statistics into one parent
///
/// Populations, category counts, pixels and area are summed. Means of
/// concentration, AQI and exposure index are population-weighted when the
/// children carry population and plain means otherwise.
pub fn aggregate_stats<'a, I>(children: I) -> Option<ExposureStats>
where
    I: IntoIterator<Item = &'a ExposureStats>,
{
    let children: Vec<&ExposureStats> = children.into_iter().collect();
    let worst = children
        .iter()
        .copied()
        .max_by(|a, b| a.mean_aqi.total_cmp(&b.mean_aqi))?;

    let total_population: f64 = children.iter().map(|s| s.total_population).sum();
    let weights: Vec<f64> = if total_population > 0.0 {
        children.iter().map(|s| s.total_population / total_population).collect()
    } else {
        vec![1.0 / children.len() as f64; children.len()]
    };
    let weighted = |f: fn(&ExposureStats) -> f64| -> f64 {
        children.iter().zip(&weights).map(|(s, w)| f(*s) * w).sum()
    };

    let mut categories = children[0].categories.clone();
    for child in &children[1..] {
        categories.merge(&child.categories);
    }

    let first_source = children[0].data_source;
    let data_source = if children.iter().all(|s| s.data_source == first_source) {
        first_source
    } else {
        DataSource::Fused
    };

    Some(ExposureStats {
        pollutant: worst.pollutant,
        total_population,
        mean_concentration: weighted(|s| s.mean_concentration),
        min_concentration: children.iter().map(|s| s.min_concentration).fold(f64::INFINITY, f64::min),
        max_concentration: children.iter().map(|s| s.max_concentration).fold(f64::NEG_INFINITY, f64::max),
        mean_aqi: weighted(|s| s.mean_aqi),
        max_aqi: children.iter().map(|s| s.max_aqi).fold(f64::NEG_INFINITY, f64::max),
        exposure_index: weighted(|s| s.exposure_index),
        categories,
        valid_pixels: children.iter().map(|s| s.valid_pixels).sum(),
        area_km2: children.iter().map(|s| s.area_km2).sum(),
        data_source,
    })
}

/// Highest mean AQI, ties to the smallest id
fn worst_by_aqi<'a, T>(items: &'a [T], id: impl Fn(&T) -> &str, stats: impl Fn(&T) -> &ExposureStats) -> Option<&'a T> {
    items.iter().max_by(|a, b| {
        stats(*a)
            .mean_aqi
            .total_cmp(&stats(*b).mean_aqi)
            .then_with(|| id(*b).cmp(id(*a)))
    })
}

/// Province records from the district records of one scope and date
///
/// Districts without a province are left out of every province (and hence
/// the national total) and reported in the log.
pub fn rollup_provinces(districts: &[DistrictExposure]) -> Vec<ProvinceExposure> {
    let mut groups: BTreeMap<&str, Vec<&DistrictExposure>> = BTreeMap::new();
    let mut orphans = 0usize;
    for district in districts {
        match district.province_id.as_deref() {
            Some(province) => groups.entry(province).or_default().push(district),
            None => orphans += 1,
        }
    }
    if orphans > 0 {
        log::warn!("{} district records have no province and are not rolled up", orphans);
    }

    groups
        .into_iter()
        .filter_map(|(province_id, members)| {
            let stats = aggregate_stats(members.iter().map(|d| &d.stats))?;
            let worst = worst_by_aqi(&members, |d| d.district_id.as_str(), |d| &d.stats);
            Some(ProvinceExposure {
                province_id: province_id.to_string(),
                scope: members[0].scope,
                date: members[0].date,
                stats,
                n_districts: members.len(),
                worst_district: worst.map(|d| d.district_id.clone()),
            })
        })
        .collect()
}

/// National record from province records
///
/// `districts` only supplies the worst district; totals come from provinces.
pub fn rollup_national(provinces: &[ProvinceExposure], districts: &[DistrictExposure]) -> Option<NationalExposure> {
    let stats = aggregate_stats(provinces.iter().map(|p| &p.stats))?;
    let worst_province = worst_by_aqi(provinces, |p| p.province_id.as_str(), |p| &p.stats);
    let contributing: Vec<&DistrictExposure> = districts.iter().filter(|d| d.province_id.is_some()).collect();
    let worst_district = worst_by_aqi(&contributing, |d| d.district_id.as_str(), |d| &d.stats);

    Some(NationalExposure {
        scope: provinces[0].scope,
        date: provinces[0].date,
        stats,
        n_provinces: provinces.len(),
        worst_province: worst_province.map(|p| p.province_id.clone()),
        worst_district: worst_district.map(|d| d.district_id.clone()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::exposure::ExposureParams;
    use crate::types::Pollutant;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn district(id: &str, province: &str, pollutant: Pollutant, conc: f64, pop: f64) -> DistrictExposure {
        DistrictExposure {
            district_id: id.to_string(),
            province_id: Some(province.to_string()),
            scope: ExposureScope::Pollutant(pollutant),
            date: NaiveDate::from_ymd_opt(2024, 11, 10).unwrap(),
            stats: ExposureStats::from_value(pollutant, conc, pop, 100.0, DataSource::Raster, &ExposureParams::default()),
            rank: None,
        }
    }

    #[test]
    fn test_rank_ties_by_id() {
        let mut records = vec![
            district("D3", "P1", Pollutant::PM25, 40.0, 1000.0),
            district("D1", "P1", Pollutant::PM25, 40.0, 1000.0),
            district("D2", "P1", Pollutant::PM25, 150.0, 1000.0),
        ];
        rank_districts(&mut records);
        let order: Vec<_> = records.iter().map(|r| (r.district_id.as_str(), r.rank)).collect();
        assert_eq!(order, vec![("D2", Some(1)), ("D1", Some(2)), ("D3", Some(3))]);
    }

    #[test]
    fn test_rollup_population_consistency() {
        let districts = vec![
            district("D1", "P1", Pollutant::PM25, 20.0, 1000.0),
            district("D2", "P1", Pollutant::PM25, 80.0, 3000.0),
            district("D3", "P2", Pollutant::PM25, 200.0, 500.0),
        ];
        let provinces = rollup_provinces(&districts);
        assert_eq!(provinces.len(), 2);

        let p1 = &provinces[0];
        assert_eq!(p1.n_districts, 2);
        assert_relative_eq!(p1.stats.total_population, 4000.0);
        assert_relative_eq!(p1.stats.categories.total(), 4000.0);
        assert_relative_eq!(p1.stats.mean_concentration, (20.0 * 1000.0 + 80.0 * 3000.0) / 4000.0);
        assert_eq!(p1.worst_district.as_deref(), Some("D2"));

        let national = rollup_national(&provinces, &districts).unwrap();
        assert_relative_eq!(national.stats.total_population, 4500.0);
        assert_relative_eq!(national.stats.categories.total(), 4500.0);
        assert_eq!(national.n_provinces, 2);
        assert_eq!(national.worst_province.as_deref(), Some("P2"));
        assert_eq!(national.worst_district.as_deref(), Some("D3"));
    }

    #[test]
    fn test_combined_takes_dominant_pollutant() {
        let records = vec![
            district("D1", "P1", Pollutant::PM25, 12.0, 1000.0),
            district("D1", "P1", Pollutant::NO2, 400.0, 1000.0),
            district("D2", "P1", Pollutant::PM25, 90.0, 1000.0),
        ];
        let combined = combine_pollutants(&records);
        assert_eq!(combined.len(), 2);
        assert!(combined.iter().all(|r| r.scope == ExposureScope::Combined));
        assert_eq!(combined[0].stats.pollutant, Pollutant::NO2);
        assert_eq!(combined[1].stats.pollutant, Pollutant::PM25);
    }

    #[test]
    fn test_rollup_consistency_on_random_districts() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        for seed in 0..8u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let n_provinces = rng.gen_range(1..5);
            let n_districts = rng.gen_range(1..40);
            let districts: Vec<DistrictExposure> = (0..n_districts)
                .map(|i| {
                    let province = format!("P{}", rng.gen_range(0..n_provinces));
                    let mut record = district(
                        &format!("D{:02}", i),
                        &province,
                        Pollutant::PM25,
                        rng.gen_range(0.0..400.0),
                        rng.gen_range(0.0..50_000.0),
                    );
                    // Roughly one in ten districts has no province
                    if rng.gen_bool(0.1) {
                        record.province_id = None;
                    }
                    record
                })
                .collect();

            let provinces = rollup_provinces(&districts);
            for province in &provinces {
                let members: Vec<&DistrictExposure> = districts
                    .iter()
                    .filter(|d| d.province_id.as_deref() == Some(province.province_id.as_str()))
                    .collect();
                let population: f64 = members.iter().map(|d| d.stats.total_population).sum();
                assert_eq!(province.n_districts, members.len(), "seed {}", seed);
                assert_relative_eq!(province.stats.total_population, population, max_relative = 1e-9);
                assert_relative_eq!(province.stats.categories.total(), population, max_relative = 1e-9);

                let lo = members.iter().map(|d| d.stats.mean_concentration).fold(f64::INFINITY, f64::min);
                let hi = members.iter().map(|d| d.stats.mean_concentration).fold(f64::NEG_INFINITY, f64::max);
                assert!(province.stats.mean_concentration >= lo - 1e-9);
                assert!(province.stats.mean_concentration <= hi + 1e-9);
            }

            let Some(national) = rollup_national(&provinces, &districts) else {
                assert!(provinces.is_empty(), "seed {}", seed);
                continue;
            };
            let province_total: f64 = provinces.iter().map(|p| p.stats.total_population).sum();
            let assigned: f64 = districts
                .iter()
                .filter(|d| d.province_id.is_some())
                .map(|d| d.stats.total_population)
                .sum();
            assert_eq!(national.n_provinces, provinces.len());
            assert_relative_eq!(national.stats.total_population, province_total, max_relative = 1e-9);
            assert_relative_eq!(national.stats.total_population, assigned, max_relative = 1e-9);
            assert_relative_eq!(national.stats.categories.total(), province_total, max_relative = 1e-9);

            let worst = national.worst_district.as_deref().unwrap();
            assert!(districts
                .iter()
                .any(|d| d.district_id == worst && d.province_id.is_some()));
        }
    }

    #[test]
    fn test_empty_rollup() {
        assert!(rollup_provinces(&[]).is_empty());
        assert!(rollup_national(&[], &[]).is_none());
    }
}
