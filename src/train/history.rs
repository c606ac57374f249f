use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Errors of one epoch, one CSV row.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    #[serde(rename = "training-top1-err")]
    pub train_top1_err: f64,
    #[serde(rename = "training-top5-err")]
    pub train_top5_err: f64,
    #[serde(rename = "validation-top1-err")]
    pub valid_top1_err: f64,
    #[serde(rename = "validation-top5-err")]
    pub valid_top5_err: f64,
    pub loss: f64,
    pub lr: f64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrainingHistory {
    records: Vec<EpochRecord>,
}

impl TrainingHistory {
    /// Appends a record, replacing any previous record of the same epoch.
    pub fn update(&mut self, record: EpochRecord) {
        self.records.retain(|r| r.epoch != record.epoch);
        self.records.push(record);
        self.records.sort_by_key(|r| r.epoch);
    }

    pub fn records(&self) -> &[EpochRecord] {
        &self.records
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let csv_err = |source| Error::Csv {
            path: path.to_path_buf(),
            source,
        };
        let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;
        for record in &self.records {
            writer.serialize(record).map_err(csv_err)?;
        }
        writer.flush().map_err(Error::io(path))
    }

    /// Loads the history, or an empty one if the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let csv_err = |source| Error::Csv {
            path: path.to_path_buf(),
            source,
        };
        let mut reader = csv::Reader::from_path(path).map_err(csv_err)?;
        let records = reader
            .deserialize()
            .collect::<std::result::Result<Vec<EpochRecord>, _>>()
            .map_err(csv_err)?;
        Ok(Self { records })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(epoch: usize, valid_top1_err: f64) -> EpochRecord {
        EpochRecord {
            epoch,
            train_top1_err: 0.5,
            train_top5_err: 0.1,
            valid_top1_err,
            valid_top5_err: 0.2,
            loss: 1.25,
            lr: 0.045,
        }
    }

    #[test]
    fn csv_keeps_every_epoch() {
        let dir = temp_dir::TempDir::new().unwrap();
        let path = dir.path().join("history.csv");
        let mut history = TrainingHistory::default();
        history.update(record(1, 0.4));
        history.update(record(0, 0.6));
        history.update(record(1, 0.3));
        history.save(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("epoch,training-top1-err,training-top5-err,"));

        let loaded = TrainingHistory::load(&path).unwrap();
        assert_eq!(loaded, history);
        assert_eq!(loaded.records().len(), 2);
        assert_eq!(loaded.records()[1].valid_top1_err, 0.3);
    }

    #[test]
    fn missing_file_is_an_empty_history() {
        let dir = temp_dir::TempDir::new().unwrap();
        let history = TrainingHistory::load(&dir.path().join("history.csv")).unwrap();
        assert!(history.records().is_empty());
    }
}
