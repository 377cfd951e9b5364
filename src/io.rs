//! File formats.
//!
//! - Traffic profiles: CSV with a `hour,<segment>,...` header and one row
//!   of request counts per hour.
//! - Experiment sets, individuals and populations: JSON.
//! - Run statistics and traffic consumption: CSV.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{Error, Result};
use crate::fitness::GenerationStats;
use crate::models::{Experiment, Individual, Slot, TrafficProfile};

fn format_error(line: usize, reason: impl Into<String>) -> Error {
    Error::ProfileFormat {
        line,
        reason: reason.into(),
    }
}

/// Parses a traffic profile CSV.
///
/// Rows may come in any order but must cover every hour from 0 without
/// gaps. Blank lines are ignored.
pub fn read_profile<R: BufRead>(reader: R) -> Result<TrafficProfile> {
    let mut lines = reader.lines().enumerate();

    let header = loop {
        match lines.next() {
            Some((_, line)) => {
                let line = line?;
                if !line.trim().is_empty() {
                    break line;
                }
            }
            None => return Err(format_error(1, "missing header")),
        }
    };
    let columns: Vec<String> = header.split(',').map(|c| c.trim().to_string()).collect();
    if columns.first().map(String::as_str) != Some("hour") {
        return Err(format_error(1, "first column must be `hour`"));
    }
    let segments = &columns[1..];
    if segments.is_empty() {
        return Err(format_error(1, "no segment columns"));
    }

    let mut rows: Vec<(Slot, BTreeMap<String, u64>)> = Vec::new();
    for (index, line) in lines {
        let line = line?;
        let number = index + 1;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != columns.len() {
            return Err(format_error(
                number,
                format!("expected {} fields, found {}", columns.len(), fields.len()),
            ));
        }
        let hour: Slot = fields[0]
            .parse()
            .map_err(|_| format_error(number, format!("invalid hour `{}`", fields[0])))?;
        let row = segments
            .iter()
            .zip(&fields[1..])
            .map(|(segment, value)| {
                value
                    .parse::<u64>()
                    .map(|v| (segment.clone(), v))
                    .map_err(|_| format_error(number, format!("invalid request count `{value}`")))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;
        rows.push((hour, row));
    }

    TrafficProfile::from_rows(rows)
}

/// Loads a traffic profile CSV file.
pub fn load_profile(path: impl AsRef<Path>) -> Result<TrafficProfile> {
    read_profile(BufReader::new(File::open(path)?))
}

/// Parses an aggregate traffic CSV: a header, then one row per hour whose
/// third column holds the total requests of that hour.
///
/// Values may be fractional and are rounded. Blank lines are ignored.
pub fn read_aggregate<R: BufRead>(reader: R) -> Result<Vec<u64>> {
    let mut totals = Vec::new();
    let mut header_seen = false;
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let number = index + 1;
        if line.trim().is_empty() {
            continue;
        }
        if !header_seen {
            header_seen = true;
            continue;
        }
        let field = line
            .split(',')
            .nth(2)
            .map(str::trim)
            .ok_or_else(|| format_error(number, "missing request column"))?;
        let value: f64 = field
            .parse()
            .map_err(|_| format_error(number, format!("invalid request count `{field}`")))?;
        if !value.is_finite() || value < 0.0 {
            return Err(format_error(number, format!("invalid request count `{field}`")));
        }
        totals.push(value.round() as u64);
    }
    Ok(totals)
}

/// Loads an aggregate traffic CSV file.
pub fn load_aggregate(path: impl AsRef<Path>) -> Result<Vec<u64>> {
    read_aggregate(BufReader::new(File::open(path)?))
}

/// Writes `profile` in the format read by [`read_profile`].
pub fn write_profile<W: Write>(profile: &TrafficProfile, mut writer: W) -> Result<()> {
    let segments = profile.segments();
    writeln!(writer, "hour,{}", segments.join(","))?;
    for (hour, row) in profile.iter() {
        let values: Vec<String> = segments
            .iter()
            .map(|s| row.get(s).copied().unwrap_or(0).to_string())
            .collect();
        writeln!(writer, "{hour},{}", values.join(","))?;
    }
    writer.flush()?;
    Ok(())
}

pub fn save_profile(profile: &TrafficProfile, path: impl AsRef<Path>) -> Result<()> {
    write_profile(profile, BufWriter::new(File::create(path)?))
}

fn load_json<T: serde::de::DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let mut content = String::new();
    File::open(path)?.read_to_string(&mut content)?;
    Ok(serde_json::from_str(&content)?)
}

fn save_json<T: serde::Serialize + ?Sized>(value: &T, path: impl AsRef<Path>) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

/// Loads an experiment set.
pub fn load_experiments(path: impl AsRef<Path>) -> Result<Vec<Experiment>> {
    let experiments: Vec<Experiment> = load_json(path)?;
    if experiments.is_empty() {
        return Err(Error::EmptyExperimentSet);
    }
    Ok(experiments)
}

pub fn save_experiments(experiments: &[Experiment], path: impl AsRef<Path>) -> Result<()> {
    save_json(experiments, path)
}

pub fn load_individual(path: impl AsRef<Path>) -> Result<Individual> {
    load_json(path)
}

pub fn save_individual(individual: &Individual, path: impl AsRef<Path>) -> Result<()> {
    save_json(individual, path)
}

/// Loads a saved population. Lineage counters start over at zero.
pub fn load_population(path: impl AsRef<Path>) -> Result<Vec<Individual>> {
    let mut population: Vec<Individual> = load_json(path)?;
    for individual in &mut population {
        individual.set_lineage(0, 0);
    }
    Ok(population)
}

pub fn save_population(population: &[Individual], path: impl AsRef<Path>) -> Result<()> {
    save_json(population, path)
}

/// Requests `service` consumes per hour and segment in `individual`.
///
/// One row per hour from 0 to the last hour any of the service's
/// experiments runs, with the total followed by one column per segment.
pub fn write_consumption<W: Write>(
    individual: &Individual,
    service: &str,
    profile: &TrafficProfile,
    mut writer: W,
) -> Result<()> {
    let schedules: Vec<_> = individual
        .scheduled()
        .filter(|(e, _)| e.target_service == service)
        .map(|(_, s)| s)
        .collect();
    let segments: BTreeSet<&str> = schedules
        .iter()
        .flat_map(|s| s.assignments.iter())
        .flat_map(|a| a.traffic.keys().map(String::as_str))
        .collect();
    let last = schedules
        .iter()
        .flat_map(|s| s.assignments.iter())
        .map(|a| a.hour)
        .max()
        .unwrap_or(0);

    let mut by_hour: BTreeMap<Slot, BTreeMap<&str, u64>> = BTreeMap::new();
    for assignment in schedules.iter().flat_map(|s| s.assignments.iter()) {
        let row = by_hour.entry(assignment.hour).or_default();
        for (segment, &fraction) in &assignment.traffic {
            let consumed = profile
                .consumed(assignment.hour, segment, fraction)
                .unwrap_or(0);
            *row.entry(segment.as_str()).or_default() += consumed;
        }
    }

    let header: Vec<&str> = segments.iter().copied().collect();
    writeln!(writer, "hour,totalConsumption,{}", header.join(","))?;
    let empty = BTreeMap::new();
    for hour in 0..=last {
        let row = by_hour.get(&hour).unwrap_or(&empty);
        let total: u64 = row.values().sum();
        let values: Vec<String> = segments
            .iter()
            .map(|s| row.get(s).copied().unwrap_or(0).to_string())
            .collect();
        writeln!(writer, "{hour},{total},{}", values.join(","))?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes one statistics row per generation or iteration.
pub struct StatsWriter<W: Write> {
    inner: W,
}

impl<W: Write> StatsWriter<W> {
    /// Wraps `inner` and writes the header.
    pub fn new(mut inner: W) -> Result<Self> {
        writeln!(inner, "{}", GenerationStats::CSV_HEADER)?;
        Ok(Self { inner })
    }

    pub fn record(&mut self, stats: &GenerationStats) -> Result<()> {
        writeln!(self.inner, "{}", stats.to_csv_row())?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl StatsWriter<BufWriter<File>> {
    /// Creates (or truncates) a statistics file.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(BufWriter::new(File::create(path)?))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rand::rngs::SmallRng;
    use rand::SeedableRng;
    use tempfile::TempDir;

    use super::*;
    use crate::fitness::{Fitness, FitnessWeights};
    use crate::models::{DemandCurve, ExperimentKind, Schedule};

    #[test]
    fn test_read_profile() {
        let csv = "hour,B,A\n1,30,40\n0,10,20\n\n2,50,60\n";
        let profile = read_profile(csv.as_bytes()).unwrap();
        assert_eq!(profile.horizon(), 3);
        assert_eq!(profile.available(0, "A"), Some(20));
        assert_eq!(profile.available(1, "B"), Some(30));
        assert_eq!(profile.segments(), vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn test_malformed_profiles() {
        let cases = [
            ("", 1),
            ("time,A\n0,1\n", 1),
            ("hour\n0\n", 1),
            ("hour,A\n0,1,2\n", 2),
            ("hour,A\n0,1\nx,2\n", 3),
            ("hour,A\n0,-5\n", 2),
        ];
        for (csv, expected) in cases {
            match read_profile(csv.as_bytes()) {
                Err(Error::ProfileFormat { line, .. }) => assert_eq!(line, expected, "{csv:?}"),
                other => panic!("{csv:?}: unexpected {other:?}"),
            }
        }
        assert!(matches!(
            read_profile("hour,A\n0,1\n2,1\n".as_bytes()),
            Err(Error::SparseProfile { expected: 1, found: 2 })
        ));
    }

    #[test]
    fn test_read_aggregate() {
        let csv = "date,hour,requests\n2019-01-01,0,1200.4\n\n2019-01-01,1,980.5\n2019-01-01,2,0\n";
        assert_eq!(read_aggregate(csv.as_bytes()).unwrap(), vec![1200, 981, 0]);
        assert!(read_aggregate("".as_bytes()).unwrap().is_empty());

        for (csv, expected) in [("h\n0,1\n", 2), ("h\n0,1,x\n", 2), ("h\n0,1,2\n0,1,-3\n", 3)] {
            match read_aggregate(csv.as_bytes()) {
                Err(Error::ProfileFormat { line, .. }) => assert_eq!(line, expected, "{csv:?}"),
                other => panic!("{csv:?}: unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_load_aggregate_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("aggregate.csv");
        std::fs::write(&path, "day,hour,total\nmon,0,10\nmon,1,20\n").unwrap();
        assert_eq!(load_aggregate(&path).unwrap(), vec![10, 20]);
    }

    #[test]
    fn test_profile_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("profile.csv");
        let profile = TrafficProfile::uniform(5, &[("A", 100), ("B", 7)]);
        save_profile(&profile, &path).unwrap();
        assert_eq!(load_profile(&path).unwrap(), profile);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let err = load_profile(dir.path().join("absent.csv")).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_experiment_snapshot() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("experiments.json");
        let experiments = vec![
            Experiment::new(1, ExperimentKind::Regression, "svc", 24, 1000),
            Experiment::new(2, ExperimentKind::Business, "svc", 48, 2000)
                .with_preferred_segments(["A"])
                .with_demand(DemandCurve::Gradual { start_traffic: 5.0 }),
        ];
        save_experiments(&experiments, &path).unwrap();
        assert_eq!(load_experiments(&path).unwrap(), experiments);

        std::fs::write(&path, "[]").unwrap();
        assert!(matches!(load_experiments(&path), Err(Error::EmptyExperimentSet)));
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_experiments(&path), Err(Error::Json(_))));
    }

    #[test]
    fn test_population_lineage_is_reset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("population.json");
        let mut rng = SmallRng::seed_from_u64(42);
        let mut ind = Individual::empty(&mut rng);
        ind.insert(
            Arc::new(Experiment::new(1, ExperimentKind::Regression, "svc", 2, 10)),
            Some(Schedule::uniform(0, 2, &[("A", 0.5)])),
        );
        ind.set_lineage(7, 3);

        save_individual(&ind, dir.path().join("best.json")).unwrap();
        assert_eq!(load_individual(dir.path().join("best.json")).unwrap().mutation_count(), 7);

        save_population(&[ind.clone()], &path).unwrap();
        let back = load_population(&path).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].id(), ind.id());
        assert_eq!(back[0].mutation_count(), 0);
        assert_eq!(back[0].crossover_count(), 0);
        assert_eq!(back[0].schedule(1), ind.schedule(1));
    }

    #[test]
    fn test_consumption_per_service() {
        let profile = TrafficProfile::uniform(10, &[("A", 1000), ("B", 100)]);
        let mut ind = Individual::empty(&mut SmallRng::seed_from_u64(42));
        ind.insert(
            Arc::new(Experiment::new(1, ExperimentKind::Regression, "svc", 2, 10)),
            Some(Schedule::uniform(1, 2, &[("A", 0.5)])),
        );
        ind.insert(
            Arc::new(Experiment::new(2, ExperimentKind::Regression, "svc", 1, 10)),
            Some(Schedule::uniform(2, 1, &[("A", 0.1), ("B", 0.5)])),
        );
        ind.insert(
            Arc::new(Experiment::new(3, ExperimentKind::Regression, "other", 1, 10)),
            Some(Schedule::uniform(5, 1, &[("A", 1.0)])),
        );

        let mut out = Vec::new();
        write_consumption(&ind, "svc", &profile, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "hour,totalConsumption,A,B\n0,0,0,0\n1,500,500,0\n2,650,600,50\n"
        );
    }

    #[test]
    fn test_stats_writer() {
        let fitness = Fitness {
            duration: 0.5,
            segment: 1.0,
            start: 0.25,
            weights: FitnessWeights::default(),
        };
        let mut writer = StatsWriter::new(Vec::new()).unwrap();
        writer.record(&GenerationStats::new(0, &fitness)).unwrap();
        writer.record(&GenerationStats::new(1, &fitness)).unwrap();
        let text = String::from_utf8(writer.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], GenerationStats::CSV_HEADER);
        assert!(lines[2].starts_with("1,0.5,1,0.25,"));
    }
}
