//! Population construction: the (race, horse, date) rows every feature hangs off.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::preprocess::{EntryRecord, RaceRecord};
use crate::types::PopulationRow;

/// Race dates by race id. The first record of a duplicated race wins.
pub fn race_dates(races: &[RaceRecord]) -> HashMap<&str, NaiveDate> {
    let mut dates = HashMap::with_capacity(races.len());
    for race in races {
        dates.entry(race.race_id.as_str()).or_insert(race.date);
    }
    dates
}

/// Join entries with race info on race id.
///
/// One row per distinct (race_id, horse_id) entry, dated by the race. Entries
/// whose race has no info row are dropped.
pub fn build(entries: &[EntryRecord], races: &[RaceRecord]) -> Vec<PopulationRow> {
    let dates = race_dates(races);
    let mut seen: HashSet<(&str, &str)> = HashSet::with_capacity(entries.len());
    let mut population = Vec::with_capacity(entries.len());
    let mut unmatched = 0usize;

    for entry in entries {
        let Some(&date) = dates.get(entry.race_id.as_str()) else {
            unmatched += 1;
            continue;
        };
        if !seen.insert((entry.race_id.as_str(), entry.horse_id.as_str())) {
            debug!("duplicate entry {} / {}", entry.race_id, entry.horse_id);
            continue;
        }
        population.push(PopulationRow {
            race_id: entry.race_id.clone(),
            horse_id: entry.horse_id.clone(),
            date,
        });
    }

    info!(
        "population: {} rows ({} entries without race info)",
        population.len(),
        unmatched
    );
    population
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::mapping::CategoryCode;
    use crate::preprocess::race_info::seasonal_encoding;

    pub fn entry(race_id: &str, horse_id: &str, umaban: u32) -> EntryRecord {
        EntryRecord {
            race_id: race_id.to_string(),
            horse_id: horse_id.to_string(),
            jockey_id: None,
            trainer_id: None,
            owner_id: None,
            rank: Some(umaban),
            umaban: Some(umaban),
            wakuban: None,
            tansho_odds: None,
            popularity: None,
            impost: None,
            sex: CategoryCode::Unmapped,
            age: None,
            weight: None,
            weight_diff: None,
        }
    }

    pub fn race(race_id: &str, date: NaiveDate) -> RaceRecord {
        let (sin_date, cos_date) = seasonal_encoding(date);
        RaceRecord {
            race_id: race_id.to_string(),
            date,
            race_type: CategoryCode::Mapped(0),
            around: CategoryCode::Mapped(0),
            course_len: Some(1600),
            weather: CategoryCode::Mapped(0),
            ground_state: CategoryCode::Mapped(0),
            race_class: CategoryCode::Unmapped,
            place: crate::preprocess::race_info::place_code(race_id),
            month: chrono::Datelike::month(&date),
            sin_date,
            cos_date,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::{entry, race};
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_population_takes_race_date() {
        let races = vec![race("202301010101", date(2023, 1, 15))];
        let entries = vec![
            entry("202301010101", "2019104567", 1),
            entry("202301010101", "2019100002", 2),
        ];
        let population = build(&entries, &races);
        assert_eq!(population.len(), 2);
        assert!(population.iter().all(|p| p.date == date(2023, 1, 15)));
        assert_eq!(population[0].horse_id, "2019104567");
    }

    #[test]
    fn test_population_inner_join() {
        let races = vec![race("202301010101", date(2023, 1, 15))];
        let entries = vec![
            entry("202301010101", "h1", 1),
            entry("202301010199", "h2", 1),
        ];
        let population = build(&entries, &races);
        assert_eq!(population.len(), 1);
        assert_eq!(population[0].horse_id, "h1");
    }

    #[test]
    fn test_population_never_duplicates() {
        let races = vec![
            race("r1", date(2023, 1, 15)),
            race("r1", date(2023, 1, 16)),
        ];
        let entries = vec![entry("r1", "h1", 1), entry("r1", "h1", 1)];
        let population = build(&entries, &races);
        assert_eq!(population.len(), 1);
        assert_eq!(population[0].date, date(2023, 1, 15));
    }
}
