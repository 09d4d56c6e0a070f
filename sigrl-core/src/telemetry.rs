use crate::{
    config::Metric,
    error::{IoContext, Result},
};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    path::{Path, PathBuf},
};

/// One row of per step metrics. Field order is the column order of the artifact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub step: usize,
    pub system_total_stopped: f64,
    pub system_total_waiting_time: f64,
    pub system_mean_waiting_time: f64,
    pub system_mean_speed: f64,
}

impl TelemetryRecord {
    pub fn metric(&self, metric: Metric) -> f64 {
        match metric {
            Metric::SystemTotalStopped => self.system_total_stopped,
            Metric::SystemTotalWaitingTime => self.system_total_waiting_time,
            Metric::SystemMeanWaitingTime => self.system_mean_waiting_time,
            Metric::SystemMeanSpeed => self.system_mean_speed,
        }
    }
}

pub fn agent_dir(root: &Path, agent: &str) -> PathBuf {
    root.join(agent)
}

/// `root/agent/agent_ep{episode}.csv`
pub fn episode_artifact_path(root: &Path, agent: &str, episode: usize) -> PathBuf {
    agent_dir(root, agent).join(format!("{agent}_ep{episode}.csv"))
}

/// Inverse of the file name part of [`episode_artifact_path`].
pub fn parse_episode_index(file_name: &str, agent: &str) -> Option<usize> {
    file_name
        .strip_prefix(agent)?
        .strip_prefix("_ep")?
        .strip_suffix(".csv")?
        .parse()
        .ok()
}

/// Every episode artifact of `agent` in `dir`, ordered by episode index.
pub fn list_episode_artifacts(dir: &Path, agent: &str) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir).with_path(dir)? {
        let path = entry.with_path(dir)?.path();
        let index = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| parse_episode_index(name, agent));
        if let Some(index) = index {
            found.push((index, path));
        }
    }
    found.sort_by_key(|(index, _)| *index);
    Ok(found.into_iter().map(|(_, path)| path).collect())
}

/// Removes every episode artifact of `agent` left in `dir` by an earlier run.
/// A missing `dir` counts as empty.
pub fn clear_episode_artifacts(dir: &Path, agent: &str) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }
    let stale = list_episode_artifacts(dir, agent)?;
    for path in &stale {
        std::fs::remove_file(path).with_path(path)?;
    }
    Ok(stale.len())
}

pub fn write_records(path: &Path, records: &[TelemetryRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_path(parent)?;
    }
    let file = File::create(path).with_path(path)?;
    let mut writer = csv::Writer::from_writer(file);
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush().with_path(path)?;
    Ok(())
}

pub fn read_records(path: &Path) -> Result<Vec<TelemetryRecord>> {
    let file = File::open(path).with_path(path)?;
    let mut reader = csv::Reader::from_reader(file);
    let records = reader
        .deserialize()
        .collect::<std::result::Result<Vec<TelemetryRecord>, _>>()?;
    Ok(records)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn artifact_path_is_derived_from_name_and_episode() {
        let path = episode_artifact_path(Path::new("out/low"), "QL_1", 3);
        assert_eq!(path, PathBuf::from("out/low/QL_1/QL_1_ep3.csv"));
        assert_eq!(parse_episode_index("QL_1_ep3.csv", "QL_1"), Some(3));
        assert_eq!(parse_episode_index("QL_1_ep3.csv", "QL"), None);
        assert_eq!(parse_episode_index("QL_1_epx.csv", "QL_1"), None);
    }

    #[test]
    fn listing_orders_numerically() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        for episode in [10, 2, 0, 1] {
            write_records(
                &episode_artifact_path(root.path(), "a", episode),
                &[TelemetryRecord::default()],
            )?;
        }
        std::fs::write(agent_dir(root.path(), "a").join("notes.txt"), "x")?;
        let listed = list_episode_artifacts(&agent_dir(root.path(), "a"), "a")?;
        let names: Vec<_> = listed
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["a_ep0.csv", "a_ep1.csv", "a_ep2.csv", "a_ep10.csv"]);
        Ok(())
    }

    #[test]
    fn clearing_keeps_other_agents_and_files() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let dir = agent_dir(root.path(), "a");
        assert_eq!(clear_episode_artifacts(&dir, "a")?, 0);
        for episode in 0..3 {
            write_records(&episode_artifact_path(root.path(), "a", episode), &[])?;
        }
        std::fs::write(dir.join("ab_ep0.csv"), "")?;
        std::fs::write(dir.join("notes.txt"), "x")?;
        assert_eq!(clear_episode_artifacts(&dir, "a")?, 3);
        assert!(list_episode_artifacts(&dir, "a")?.is_empty());
        assert_eq!(std::fs::read_dir(&dir)?.count(), 2);
        Ok(())
    }

    #[test]
    fn unwritable_artifact_is_an_io_error() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let taken = dir.path().join("x_ep0.csv");
        std::fs::create_dir(&taken)?;
        let err = write_records(&taken, &[TelemetryRecord::default()]).unwrap_err();
        match err {
            crate::error::Error::Io { path, .. } => assert_eq!(path, taken),
            other => panic!("expected an io error, got {other}"),
        }
        Ok(())
    }

    #[test]
    fn records_survive_the_artifact() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("x_ep0.csv");
        let records = vec![
            TelemetryRecord {
                step: 0,
                system_total_stopped: 3.,
                system_total_waiting_time: 12.5,
                system_mean_waiting_time: 4.25,
                system_mean_speed: 7.,
            },
            TelemetryRecord {
                step: 1,
                ..Default::default()
            },
        ];
        write_records(&path, &records)?;
        let header = std::fs::read_to_string(&path)?;
        assert!(header.starts_with(
            "step,system_total_stopped,system_total_waiting_time,system_mean_waiting_time,system_mean_speed"
        ));
        assert_eq!(read_records(&path)?, records);
        Ok(())
    }
}
