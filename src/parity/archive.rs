//! Reference archive loading
//!
//! A reference archive is a set of named arrays saved by the reference
//! implementation. Three containers are understood:
//! - a directory holding one `<name>.npy` file per variable
//! - a `.safetensors` file
//! - a single `.npy` file, named by its file stem

use anyhow::{Context, Result};
use candle_core::{safetensors, DType, Device, Tensor};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use super::npy_loader::{dtype_name, load_npy};

/// Why a reference archive could not be loaded
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ArchiveError {
    /// Nothing exists at the given path
    #[error("archive not found: {0:?}")]
    NotFound(PathBuf),
    /// The path exists but is not a known container
    #[error("unsupported archive format: {0:?}")]
    UnsupportedFormat(PathBuf),
    /// Reading or parsing failed
    #[error("failed to read archive {path:?}: {message}")]
    Read {
        /// Archive path
        path: PathBuf,
        /// Underlying error chain
        message: String,
    },
}

/// One named array from the archive
#[derive(Debug, Clone)]
pub struct ReferenceArray {
    /// Element type as stored in the archive, NumPy-style (e.g. "int32", "float64")
    pub dtype: String,
    /// Values, possibly widened to a dtype candle supports
    pub tensor: Tensor,
}

impl ReferenceArray {
    /// Wrap a tensor, labelling it with its own dtype
    pub fn from_tensor(tensor: Tensor) -> Self {
        Self {
            dtype: dtype_name(tensor.dtype()).to_string(),
            tensor,
        }
    }

    /// Shape of the stored array
    pub fn shape(&self) -> &[usize] {
        self.tensor.dims()
    }
}

/// Immutable mapping from variable name to reference array
#[derive(Debug, Clone, Default)]
pub struct ReferenceArchive {
    source: Option<PathBuf>,
    arrays: BTreeMap<String, ReferenceArray>,
}

impl ReferenceArchive {
    /// Load an archive from disk
    pub fn load<P: AsRef<Path>>(path: P) -> std::result::Result<Self, ArchiveError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ArchiveError::NotFound(path.to_path_buf()));
        }

        let loaded = if path.is_dir() {
            load_npy_dir(path)
        } else {
            match path.extension().and_then(|e| e.to_str()) {
                Some("safetensors") => load_safetensors(path),
                Some("npy") => load_single_npy(path),
                _ => return Err(ArchiveError::UnsupportedFormat(path.to_path_buf())),
            }
        };

        let arrays = loaded.map_err(|e| ArchiveError::Read {
            path: path.to_path_buf(),
            message: format!("{:#}", e),
        })?;

        let archive = Self {
            source: Some(path.to_path_buf()),
            arrays,
        };

        info!("Loaded reference archive {:?}", path);
        info!("Available variables: {:?}", archive.names());
        Ok(archive)
    }

    /// Build an archive from in-memory tensors
    pub fn from_arrays<I, S>(arrays: I) -> Self
    where
        I: IntoIterator<Item = (S, Tensor)>,
        S: Into<String>,
    {
        Self {
            source: None,
            arrays: arrays
                .into_iter()
                .map(|(name, tensor)| (name.into(), ReferenceArray::from_tensor(tensor)))
                .collect(),
        }
    }

    /// Path the archive was loaded from, if any
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Look up a variable
    pub fn get(&self, name: &str) -> Option<&ReferenceArray> {
        self.arrays.get(name)
    }

    /// Check whether a variable exists
    pub fn contains(&self, name: &str) -> bool {
        self.arrays.contains_key(name)
    }

    /// Variable names, sorted
    pub fn names(&self) -> Vec<&str> {
        self.arrays.keys().map(String::as_str).collect()
    }

    /// Iterate over variables in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ReferenceArray)> {
        self.arrays.iter().map(|(name, array)| (name.as_str(), array))
    }

    /// Number of variables
    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    /// Check if the archive holds no variables
    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }

    /// Describe every variable: shape, dtype and either its values (fewer
    /// than 10 elements) or its value range
    pub fn describe(&self) -> Result<Vec<VariableInfo>> {
        self.iter()
            .map(|(name, array)| VariableInfo::new(name, array))
            .collect()
    }
}

/// Summary of one archive variable, for listing archive contents
#[derive(Debug, Clone, PartialEq)]
pub struct VariableInfo {
    /// Variable name
    pub name: String,
    /// Shape
    pub shape: Vec<usize>,
    /// Stored element type
    pub dtype: String,
    /// Either all values or the range
    pub contents: VariableContents,
}

/// What a [`VariableInfo`] shows of the values
#[derive(Debug, Clone, PartialEq)]
pub enum VariableContents {
    /// Every value, row-major
    Values(Vec<f64>),
    /// Minimum and maximum
    Range {
        /// Smallest value
        min: f64,
        /// Largest value
        max: f64,
    },
    /// Zero-element array
    Empty,
}

impl VariableContents {
    /// Range of non-empty values; any NaN makes both ends NaN
    fn range(values: &[f64]) -> Self {
        if values.iter().any(|v| v.is_nan()) {
            return Self::Range { min: f64::NAN, max: f64::NAN };
        }
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Self::Range { min, max }
    }
}

/// Arrays with fewer elements than this are listed in full
const SMALL_ARRAY_LIMIT: usize = 10;

impl VariableInfo {
    fn new(name: &str, array: &ReferenceArray) -> Result<Self> {
        let values = array
            .tensor
            .flatten_all()?
            .to_dtype(DType::F64)?
            .to_vec1::<f64>()
            .with_context(|| format!("Failed to read values of {}", name))?;

        let contents = if values.is_empty() {
            VariableContents::Empty
        } else if values.len() < SMALL_ARRAY_LIMIT {
            VariableContents::Values(values)
        } else {
            VariableContents::range(&values)
        };

        Ok(Self {
            name: name.to_string(),
            shape: array.shape().to_vec(),
            dtype: array.dtype.clone(),
            contents,
        })
    }
}

fn load_npy_dir(dir: &Path) -> Result<BTreeMap<String, ReferenceArray>> {
    let mut arrays = BTreeMap::new();

    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list archive directory: {:?}", dir))?;
    for entry in entries {
        let path = entry?.path();
        if path.extension().map_or(true, |e| e != "npy") {
            continue;
        }
        let (name, array) = read_npy_entry(&path)?;
        arrays.insert(name, array);
    }

    debug!("Read {} npy files from {:?}", arrays.len(), dir);
    Ok(arrays)
}

fn load_single_npy(path: &Path) -> Result<BTreeMap<String, ReferenceArray>> {
    let (name, array) = read_npy_entry(path)?;
    Ok(BTreeMap::from([(name, array)]))
}

fn read_npy_entry(path: &Path) -> Result<(String, ReferenceArray)> {
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid variable file name: {:?}", path))?
        .to_string();

    let npy = load_npy(path)?;
    let dtype = npy.element_type()?.name().to_string();
    let tensor = npy
        .to_tensor(&Device::Cpu)
        .with_context(|| format!("Failed to decode {:?}", path))?;

    Ok((name, ReferenceArray { dtype, tensor }))
}

fn load_safetensors(path: &Path) -> Result<BTreeMap<String, ReferenceArray>> {
    let tensors = safetensors::load(path, &Device::Cpu)
        .with_context(|| format!("Failed to load safetensors: {:?}", path))?;

    Ok(tensors
        .into_iter()
        .map(|(name, tensor)| (name, ReferenceArray::from_tensor(tensor)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parity::npy_loader::save_npy;
    use std::collections::HashMap;

    #[test]
    fn test_missing_path_is_not_found() {
        let err = ReferenceArchive::load("does/not/exist.safetensors").unwrap_err();
        assert!(matches!(err, ArchiveError::NotFound(_)));
    }

    #[test]
    fn test_unknown_extension_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("FADE_key_variables.mat");
        std::fs::write(&path, b"MATLAB 5.0 MAT-file").unwrap();

        let err = ReferenceArchive::load(&path).unwrap_err();
        assert!(matches!(err, ArchiveError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_corrupt_npy_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("R.npy"), b"not an npy file").unwrap();

        let err = ReferenceArchive::load(dir.path()).unwrap_err();
        assert!(matches!(err, ArchiveError::Read { .. }));
    }

    #[test]
    fn test_load_npy_directory() {
        let dir = tempfile::tempdir().unwrap();
        let ps = Tensor::from_vec(vec![8i64], (1, 1), &Device::Cpu).unwrap();
        let r = Tensor::zeros((16, 24), DType::F64, &Device::Cpu).unwrap();
        save_npy(dir.path().join("ps.npy"), &ps).unwrap();
        save_npy(dir.path().join("R.npy"), &r).unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let archive = ReferenceArchive::load(dir.path()).unwrap();
        assert_eq!(archive.names(), vec!["R", "ps"]);
        assert_eq!(archive.get("R").unwrap().shape(), &[16, 24]);
        assert_eq!(archive.get("ps").unwrap().dtype, "int64");
        assert_eq!(archive.source(), Some(dir.path()));
    }

    #[test]
    fn test_load_safetensors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reference.safetensors");
        let mut tensors = HashMap::new();
        tensors.insert(
            "Ig".to_string(),
            Tensor::from_vec(vec![0.5f64, 1.5], (1, 2), &Device::Cpu).unwrap(),
        );
        safetensors::save(&tensors, &path).unwrap();

        let archive = ReferenceArchive::load(&path).unwrap();
        assert_eq!(archive.len(), 1);
        assert_eq!(archive.get("Ig").unwrap().dtype, "float64");
    }

    #[test]
    fn test_load_single_npy_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("R.npy");
        let r = Tensor::ones((8, 16), DType::F64, &Device::Cpu).unwrap();
        save_npy(&path, &r).unwrap();

        let archive = ReferenceArchive::load(&path).unwrap();
        assert_eq!(archive.names(), vec!["R"]);
        assert_eq!(archive.get("R").unwrap().shape(), &[8, 16]);
        assert_eq!(archive.source(), Some(path.as_path()));
    }

    #[test]
    fn test_dtype_label_is_the_same_for_every_container() {
        let dir = tempfile::tempdir().unwrap();
        let ps = Tensor::from_vec(vec![8i64], (1, 1), &Device::Cpu).unwrap();

        let npy_path = dir.path().join("ps.npy");
        save_npy(&npy_path, &ps).unwrap();
        let st_path = dir.path().join("reference.safetensors");
        safetensors::save(&HashMap::from([("ps".to_string(), ps.clone())]), &st_path).unwrap();

        let from_npy = ReferenceArchive::load(&npy_path).unwrap();
        let from_st = ReferenceArchive::load(&st_path).unwrap();
        let in_memory = ReferenceArchive::from_arrays([("ps", ps)]);

        assert_eq!(from_npy.get("ps").unwrap().dtype, "int64");
        assert_eq!(from_st.get("ps").unwrap().dtype, "int64");
        assert_eq!(in_memory.describe().unwrap()[0].dtype, "int64");
    }

    #[test]
    fn test_describe_range_keeps_nan() {
        let mut values: Vec<f64> = (0..12).map(f64::from).collect();
        values[5] = f64::NAN;
        let archive = ReferenceArchive::from_arrays([(
            "Ig",
            Tensor::from_vec(values, (3, 4), &Device::Cpu).unwrap(),
        )]);

        let infos = archive.describe().unwrap();
        match infos[0].contents {
            VariableContents::Range { min, max } => assert!(min.is_nan() && max.is_nan()),
            ref other => panic!("expected a range, got {:?}", other),
        }
    }

    #[test]
    fn test_describe_small_and_large_arrays() {
        let archive = ReferenceArchive::from_arrays([
            ("ps", Tensor::from_vec(vec![8i64], (1, 1), &Device::Cpu).unwrap()),
            (
                "R",
                Tensor::arange(0f64, 20f64, &Device::Cpu).unwrap().reshape((4, 5)).unwrap(),
            ),
        ]);

        let infos = archive.describe().unwrap();
        assert_eq!(infos[0].name, "R");
        assert_eq!(infos[0].contents, VariableContents::Range { min: 0.0, max: 19.0 });
        assert_eq!(infos[1].contents, VariableContents::Values(vec![8.0]));
    }
}
