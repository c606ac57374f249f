use crate::data::RawImage;
use crate::error::{Error, Result};
use burn::data::dataset::Dataset;
use image::RgbImage;
use std::path::{Path, PathBuf};

pub const WIDTH: usize = 32;
pub const HEIGHT: usize = 32;
/// One label byte followed by the red, green and blue planes.
pub const RECORD_SIZE: usize = 1 + 3 * WIDTH * HEIGHT;

pub const TRAIN_BATCHES: [&str; 5] = [
    "data_batch_1.bin",
    "data_batch_2.bin",
    "data_batch_3.bin",
    "data_batch_4.bin",
    "data_batch_5.bin",
];
pub const TEST_BATCH: &str = "test_batch.bin";
pub const META: &str = "batches.meta.txt";

pub const CLASS_NAMES: [&str; 10] = [
    "airplane",
    "automobile",
    "bird",
    "cat",
    "deer",
    "dog",
    "frog",
    "horse",
    "ship",
    "truck",
];

#[derive(Clone, Debug)]
struct CifarRecord {
    /// # Shape
    /// [3, HEIGHT, WIDTH]
    planes: Vec<u8>,
    label: u8,
}

/// The CIFAR-10 dataset in its binary version, read from a local directory
/// (usually `cifar-10-batches-bin`).
///
/// The whole split is loaded in memory: 50,000 training and 10,000 test images of 3x32x32 bytes.
#[derive(Clone, Debug)]
pub struct Cifar10Dataset {
    records: Vec<CifarRecord>,
    class_names: Vec<String>,
}

impl Cifar10Dataset {
    /// Creates a new train dataset.
    pub fn train(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let files: Vec<PathBuf> = TRAIN_BATCHES.iter().map(|f| root.join(f)).collect();
        Self::from_files(root, &files)
    }

    /// Creates a new test dataset.
    pub fn test(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        Self::from_files(root, &[root.join(TEST_BATCH)])
    }

    fn from_files(root: &Path, files: &[PathBuf]) -> Result<Self> {
        let mut records = vec![];
        for file in files {
            let bytes = std::fs::read(file).map_err(Error::io(file))?;
            records.extend(parse_records(file, &bytes)?);
        }
        Ok(Self {
            records,
            class_names: read_class_names(&root.join(META))?,
        })
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }
}

fn parse_records(path: &Path, bytes: &[u8]) -> Result<Vec<CifarRecord>> {
    if bytes.is_empty() || bytes.len() % RECORD_SIZE != 0 {
        return Err(Error::dataset(
            path,
            format!(
                "size {} is not a multiple of the {RECORD_SIZE}-byte record",
                bytes.len()
            ),
        ));
    }
    bytes
        .chunks(RECORD_SIZE)
        .map(|chunk| {
            let label = chunk[0];
            if label as usize >= CLASS_NAMES.len() {
                return Err(Error::dataset(path, format!("label {label} out of range")));
            }
            Ok(CifarRecord {
                planes: chunk[1..].to_vec(),
                label,
            })
        })
        .collect()
}

/// Class names of the dataset under `root`, without reading the batches.
pub fn class_names(root: &Path) -> Result<Vec<String>> {
    read_class_names(&root.join(META))
}

/// Class names from `batches.meta.txt`, falling back to the standard ones.
fn read_class_names(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Ok(CLASS_NAMES.iter().map(|s| s.to_string()).collect());
    }
    let text = std::fs::read_to_string(path).map_err(Error::io(path))?;
    let names: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect();
    if names.len() != CLASS_NAMES.len() {
        return Err(Error::dataset(
            path,
            format!("expected {} class names, found {}", CLASS_NAMES.len(), names.len()),
        ));
    }
    Ok(names)
}

impl Dataset<RawImage> for Cifar10Dataset {
    fn get(&self, index: usize) -> Option<RawImage> {
        let record = self.records.get(index)?;
        let plane = WIDTH * HEIGHT;
        let image = RgbImage::from_fn(WIDTH as u32, HEIGHT as u32, |x, y| {
            let i = y as usize * WIDTH + x as usize;
            image::Rgb([
                record.planes[i],
                record.planes[plane + i],
                record.planes[2 * plane + i],
            ])
        });
        Some(RawImage {
            image,
            label: record.label as usize,
        })
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(label: u8, red: u8) -> Vec<u8> {
        let mut bytes = vec![label];
        bytes.extend(std::iter::repeat_n(red, WIDTH * HEIGHT));
        bytes.extend(std::iter::repeat_n(0, 2 * WIDTH * HEIGHT));
        bytes
    }

    #[test]
    fn records_are_split_and_planes_interleaved() {
        let mut bytes = record(3, 200);
        bytes.extend(record(9, 10));
        let records = parse_records(Path::new("mem"), &bytes).unwrap();
        assert_eq!(records.len(), 2);
        let dataset = Cifar10Dataset {
            records,
            class_names: CLASS_NAMES.iter().map(|s| s.to_string()).collect(),
        };
        let item = dataset.get(0).unwrap();
        assert_eq!(item.label, 3);
        assert_eq!(item.image.get_pixel(5, 7).0, [200, 0, 0]);
        assert_eq!(dataset.get(1).unwrap().label, 9);
        assert!(dataset.get(2).is_none());
    }

    #[test]
    fn truncated_files_are_rejected() {
        let mut bytes = record(1, 0);
        bytes.pop();
        assert!(parse_records(Path::new("mem"), &bytes).is_err());
    }

    #[test]
    fn out_of_range_labels_are_rejected() {
        assert!(parse_records(Path::new("mem"), &record(10, 0)).is_err());
    }
}
