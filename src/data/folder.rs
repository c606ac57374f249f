use crate::data::RawImage;
use crate::error::{Error, Result};
use burn::data::dataset::Dataset;
use image::RgbImage;
use std::path::{Path, PathBuf};

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "JPEG", "JPG", "PNG"];

#[derive(Clone, Debug)]
struct ImageRef {
    path: PathBuf,
    label: usize,
}

/// Images laid out as `root/<class name>/<image file>`.
///
/// Class names are the sorted sub-directory names and labels are their indices.
/// Images are decoded on access.
#[derive(Clone, Debug)]
pub struct ImageFolderDataset {
    class_names: Vec<String>,
    items: Vec<ImageRef>,
}

impl ImageFolderDataset {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let class_names = class_dirs(root.as_ref())?;
        Self::with_classes(root, class_names)
    }

    /// Uses a fixed class list, so that a validation split shares the labels of
    /// its training split even when some class directories are missing.
    pub fn with_classes(root: impl AsRef<Path>, class_names: Vec<String>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let mut items = vec![];
        for (label, class_name) in class_names.iter().enumerate() {
            let class_dir = root.join(class_name);
            if !class_dir.is_dir() {
                tracing::warn!("missing class directory {}", class_dir.display());
                continue;
            }
            let mut paths = vec![];
            for entry in std::fs::read_dir(&class_dir).map_err(Error::io(&class_dir))? {
                let path = entry.map_err(Error::io(&class_dir))?.path();
                if is_image(&path) {
                    paths.push(path);
                }
            }
            paths.sort();
            items.extend(paths.into_iter().map(|path| ImageRef { path, label }));
        }
        if items.is_empty() {
            return Err(Error::dataset(&root, "no images found"));
        }
        tracing::info!(
            "found {} images in {} classes under {}",
            items.len(),
            class_names.len(),
            root.display()
        );
        Ok(Self { class_names, items })
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }
}

impl Dataset<RawImage> for ImageFolderDataset {
    fn get(&self, index: usize) -> Option<RawImage> {
        let item = self.items.get(index)?;
        let image = match load_rgb(&item.path) {
            Ok(image) => image,
            Err(err) => {
                // the dataloader stops at the first missing item, so keep the index filled
                tracing::warn!("{err}; substituting a black image");
                RgbImage::new(1, 1)
            }
        };
        Some(RawImage {
            image,
            label: item.label,
        })
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// Sorted names of the sub-directories of `root`.
pub fn class_dirs(root: &Path) -> Result<Vec<String>> {
    let mut class_names = vec![];
    for entry in std::fs::read_dir(root).map_err(Error::io(root))? {
        let entry = entry.map_err(Error::io(root))?;
        if entry.file_type().map_err(Error::io(entry.path()))?.is_dir() {
            class_names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    class_names.sort();
    if class_names.is_empty() {
        return Err(Error::dataset(root, "no class directories found"));
    }
    Ok(class_names)
}

pub fn is_image(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext))
}

pub fn load_rgb(path: &Path) -> Result<RgbImage> {
    let image = image::open(path).map_err(|source| Error::Image {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(image.to_rgb8())
}
