//! Numeric parity checking against a reference implementation
//!
//! Tools for comparing locally computed intermediates against saved
//! reference outputs:
//! - NPY file loading and writing
//! - Reference archives (npy directories, safetensors files)
//! - Variable and batch comparison with tolerance
//! - Diagnostic formatting

mod archive;
mod comparator;
mod npy_loader;
pub mod report;

pub use archive::{ArchiveError, ReferenceArchive, ReferenceArray, VariableContents, VariableInfo};
pub use comparator::{
    compare_arrays, quick_compare, ArrayValues, BatchResult, Comparator, ComparatorConfig,
    ComparisonResult, FailureReason, Mismatch,
};
pub use npy_loader::{dtype_name, load_npy, read_npy, save_npy, ElementType, NpyArray};
