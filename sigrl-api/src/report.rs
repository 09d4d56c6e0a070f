use indexmap::IndexMap;
use sigrl_core::{
    config::{Metric, ReportConfig},
    error::{Error, IoContext, Result},
    telemetry::{TelemetryRecord, read_records},
};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Final-step value of every reported metric, per series, as written next to each report.
pub type LastValues = IndexMap<String, IndexMap<String, f64>>;

/// `<output>/<label>_last_values.yaml`
pub fn last_values_path(output: &Path, label: &str) -> PathBuf {
    output.join(format!("{label}_last_values.yaml"))
}

pub fn read_last_values(path: &Path) -> Result<LastValues> {
    let content = std::fs::read_to_string(path).with_path(path)?;
    serde_yaml::from_str(&content).map_err(|err| {
        Error::io(
            path,
            std::io::Error::new(std::io::ErrorKind::InvalidData, err),
        )
    })
}

/// Turns an ordered group of telemetry artifacts into rendered artifacts.
pub trait Reporter {
    fn render(&mut self, files: &[PathBuf], group_label: &str) -> Result<Vec<PathBuf>>;
}

impl<R: Reporter + ?Sized> Reporter for &mut R {
    fn render(&mut self, files: &[PathBuf], group_label: &str) -> Result<Vec<PathBuf>> {
        (**self).render(files, group_label)
    }
}

impl<R: Reporter + ?Sized> Reporter for Box<R> {
    fn render(&mut self, files: &[PathBuf], group_label: &str) -> Result<Vec<PathBuf>> {
        (**self).render(files, group_label)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn render(&mut self, _files: &[PathBuf], _group_label: &str) -> Result<Vec<PathBuf>> {
        Ok(vec![])
    }
}

/// Writes the series a plot of each metric would draw.
///
/// For every metric: `<output>/<label>_<metric>.csv` with a `step` column and
/// one column per input file, aligned on step. Series shorter than the longest
/// one leave their cells empty. Alongside, `<label>_last_values.yaml` holds the
/// final-step value of every metric for every series.
#[derive(Debug, Clone)]
pub struct SummaryReporter {
    output: PathBuf,
    metrics: Vec<Metric>,
}

impl SummaryReporter {
    pub fn new(output: impl Into<PathBuf>, metrics: Vec<Metric>) -> Self {
        Self {
            output: output.into(),
            metrics,
        }
    }

    pub fn from_config(config: &ReportConfig) -> Self {
        Self::new(&config.output, config.metrics.clone())
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    fn write_metric_table(
        &self,
        label: &str,
        metric: Metric,
        series: &[(String, Vec<TelemetryRecord>)],
    ) -> Result<PathBuf> {
        let path = self.output.join(format!("{label}_{metric}.csv"));
        let file = std::fs::File::create(&path).with_path(&path)?;
        let mut writer = csv::Writer::from_writer(file);
        let header = std::iter::once("step").chain(series.iter().map(|(name, _)| name.as_str()));
        writer.write_record(header)?;
        let steps = series.iter().map(|(_, rows)| rows.len()).max().unwrap_or(0);
        for step in 0..steps {
            let row = std::iter::once(step.to_string()).chain(series.iter().map(|(_, rows)| {
                rows.get(step)
                    .map(|record| record.metric(metric).to_string())
                    .unwrap_or_default()
            }));
            writer.write_record(row)?;
        }
        writer.flush().with_path(&path)?;
        Ok(path)
    }

    fn write_last_values(
        &self,
        label: &str,
        series: &[(String, Vec<TelemetryRecord>)],
    ) -> Result<PathBuf> {
        let path = last_values_path(&self.output, label);
        let last_values: IndexMap<&str, IndexMap<&str, f64>> = series
            .iter()
            .filter_map(|(name, rows)| Some((name.as_str(), rows.last()?)))
            .map(|(name, last)| {
                let values = self
                    .metrics
                    .iter()
                    .map(|metric| (metric.column(), last.metric(*metric)))
                    .collect();
                (name, values)
            })
            .collect();
        let content = serde_yaml::to_string(&last_values)
            .map_err(|err| Error::io(&path, std::io::Error::other(err)))?;
        std::fs::write(&path, content).with_path(&path)?;
        Ok(path)
    }
}

fn series_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

impl Reporter for SummaryReporter {
    fn render(&mut self, files: &[PathBuf], group_label: &str) -> Result<Vec<PathBuf>> {
        if files.is_empty() {
            return Ok(vec![]);
        }
        std::fs::create_dir_all(&self.output).with_path(&self.output)?;
        let series = files
            .iter()
            .map(|path| -> Result<(String, Vec<TelemetryRecord>)> {
                Ok((series_name(path), read_records(path)?))
            })
            .collect::<Result<Vec<_>>>()?;
        let mut rendered = Vec::with_capacity(self.metrics.len() + 1);
        for metric in &self.metrics {
            rendered.push(self.write_metric_table(group_label, *metric, &series)?);
        }
        rendered.push(self.write_last_values(group_label, &series)?);
        debug!(label = group_label, series = series.len(), "report rendered");
        Ok(rendered)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use sigrl_core::telemetry::write_records;

    fn record(step: usize, stopped: f64) -> TelemetryRecord {
        TelemetryRecord {
            step,
            system_total_stopped: stopped,
            system_mean_speed: 10.,
            ..Default::default()
        }
    }

    #[test]
    fn metric_tables_align_series_on_step() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let short = dir.path().join("a_ep0.csv");
        let long = dir.path().join("a_ep1.csv");
        write_records(&short, &[record(0, 1.), record(1, 2.)])?;
        write_records(&long, &[record(0, 3.), record(1, 4.), record(2, 5.)])?;

        let out = dir.path().join("plots");
        let mut reporter = SummaryReporter::new(&out, vec![Metric::SystemTotalStopped]);
        let rendered = reporter.render(&[short, long], "a")?;
        assert_eq!(
            rendered,
            [
                out.join("a_system_total_stopped.csv"),
                out.join("a_last_values.yaml")
            ]
        );

        let table = std::fs::read_to_string(&rendered[0])?;
        let lines: Vec<_> = table.lines().collect();
        assert_eq!(lines, ["step,a_ep0,a_ep1", "0,1,3", "1,2,4", "2,,5"]);

        let last = read_last_values(&rendered[1])?;
        assert_eq!(last["a_ep0"]["system_total_stopped"], 2.);
        assert_eq!(last["a_ep1"]["system_total_stopped"], 5.);
        Ok(())
    }

    #[test]
    fn empty_group_renders_nothing() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let out = dir.path().join("plots");
        let mut reporter = SummaryReporter::new(&out, Metric::ALL.to_vec());
        assert!(reporter.render(&[], "none")?.is_empty());
        assert!(!out.exists());
        Ok(())
    }

    #[test]
    fn unreadable_series_fails_the_render() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut reporter = SummaryReporter::new(dir.path(), Metric::ALL.to_vec());
        assert!(
            reporter
                .render(&[dir.path().join("missing_ep0.csv")], "missing")
                .is_err()
        );
        Ok(())
    }
}
