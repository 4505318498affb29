//! FADE (Fog Aware Density Evaluator)
//!
//! Only the preprocessing is ported so far:
//! 1. Patch grid sizing (floor division by the patch size)
//! 2. Truncation to whole patches and the first three channels
//! 3. R, G, B split as f64 and the luma channel
//!
//! The density estimation itself is not implemented; [`Fade::score`] returns
//! [`PLACEHOLDER_SCORE`]. Intermediates can be routed through a
//! [`Comparator`] to check them against the reference implementation.

use anyhow::Result;
use candle_core::{DType, Tensor};
use tracing::{debug, info};

use crate::parity::{BatchResult, Comparator};
use crate::utils::tensor_utils::scalar_matrix;
use crate::DEFAULT_PATCH_SIZE;

/// Score returned until the density estimation is ported
pub const PLACEHOLDER_SCORE: f64 = 1.0;

/// Luma weights applied to R, G and B
pub const GRAY_WEIGHTS: [f64; 3] = [0.2989, 0.5870, 0.1140];

/// Patch tiling of an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchGrid {
    /// Patch edge length in pixels
    pub patch_size: usize,
    /// Image height before truncation
    pub rows: usize,
    /// Image width before truncation
    pub cols: usize,
    /// Channel count before truncation
    pub channels: usize,
    /// Whole patches vertically
    pub patch_rows: usize,
    /// Whole patches horizontally
    pub patch_cols: usize,
}

impl PatchGrid {
    /// Tile an image of shape (height, width, channels)
    pub fn new(dims: &[usize], patch_size: usize) -> Result<Self> {
        if patch_size == 0 {
            anyhow::bail!("Patch size must be positive");
        }
        let &[rows, cols, channels] = dims else {
            anyhow::bail!("Expected an image of shape (height, width, channels), got {:?}", dims);
        };
        if channels < 3 {
            anyhow::bail!("Expected at least 3 channels, got {}", channels);
        }

        Ok(Self {
            patch_size,
            rows,
            cols,
            channels,
            patch_rows: rows / patch_size,
            patch_cols: cols / patch_size,
        })
    }

    /// Height after truncation to whole patches
    pub fn cropped_rows(&self) -> usize {
        self.patch_rows * self.patch_size
    }

    /// Width after truncation to whole patches
    pub fn cropped_cols(&self) -> usize {
        self.patch_cols * self.patch_size
    }
}

/// Preprocessed arrays, named as the reference implementation names them
#[derive(Debug, Clone)]
pub struct FadeIntermediates {
    /// Patch grid
    pub grid: PatchGrid,
    /// Truncated image `I`, original dtype
    pub image: Tensor,
    /// Red channel, f64
    pub red: Tensor,
    /// Green channel, f64
    pub green: Tensor,
    /// Blue channel, f64
    pub blue: Tensor,
    /// Luma channel `Ig`, f64
    pub gray: Tensor,
}

impl FadeIntermediates {
    /// Run the preprocessing on an image of shape (height, width, channels)
    pub fn compute(image: &Tensor, patch_size: usize) -> Result<Self> {
        let grid = PatchGrid::new(image.dims(), patch_size)?;
        debug!(
            "Patch grid {}x{} of {}px for a {}x{} image",
            grid.patch_rows, grid.patch_cols, patch_size, grid.rows, grid.cols
        );

        let image = image
            .narrow(0, 0, grid.cropped_rows())?
            .narrow(1, 0, grid.cropped_cols())?
            .narrow(2, 0, 3)?
            .contiguous()?;

        let channel = |c: usize| -> Result<Tensor> {
            Ok(image.narrow(2, c, 1)?.squeeze(2)?.to_dtype(DType::F64)?.contiguous()?)
        };
        let red = channel(0)?;
        let green = channel(1)?;
        let blue = channel(2)?;
        let gray = luma(&red, &green, &blue)?;

        Ok(Self { grid, image, red, green, blue, gray })
    }

    /// Grid sizes and the truncated image: `ps`, `row`, `col`,
    /// `patch_row_num`, `patch_col_num`, `I`
    ///
    /// Scalars are 1x1 int64 matrices, matching how the reference stores them.
    pub fn setup_variables(&self) -> Result<Vec<(&'static str, Tensor)>> {
        let device = self.image.device();
        let g = &self.grid;
        Ok(vec![
            ("ps", scalar_matrix(g.patch_size as i64, device)?),
            ("row", scalar_matrix(g.rows as i64, device)?),
            ("col", scalar_matrix(g.cols as i64, device)?),
            ("patch_row_num", scalar_matrix(g.patch_rows as i64, device)?),
            ("patch_col_num", scalar_matrix(g.patch_cols as i64, device)?),
            ("I", self.image.clone()),
        ])
    }

    /// Channel variables: `R`, `G`, `B`, `Ig`
    pub fn channel_variables(&self) -> Vec<(&'static str, Tensor)> {
        vec![
            ("R", self.red.clone()),
            ("G", self.green.clone()),
            ("B", self.blue.clone()),
            ("Ig", self.gray.clone()),
        ]
    }
}

/// `0.2989*R + 0.5870*G + 0.1140*B`, evaluated left to right
pub fn luma(red: &Tensor, green: &Tensor, blue: &Tensor) -> Result<Tensor> {
    let [wr, wg, wb] = GRAY_WEIGHTS;
    let gray = ((red.affine(wr, 0.0)? + green.affine(wg, 0.0)?)? + blue.affine(wb, 0.0)?)?;
    Ok(gray)
}

/// FADE evaluator
pub struct Fade {
    patch_size: usize,
    comparator: Option<Comparator>,
}

impl Default for Fade {
    fn default() -> Self {
        Self::new(DEFAULT_PATCH_SIZE)
    }
}

impl Fade {
    /// Create an evaluator without parity checking
    pub fn new(patch_size: usize) -> Self {
        Self { patch_size, comparator: None }
    }

    /// Check intermediates against `comparator` on every evaluation
    pub fn with_comparator(mut self, comparator: Comparator) -> Self {
        self.comparator = Some(comparator);
        self
    }

    /// Patch edge length
    pub fn patch_size(&self) -> usize {
        self.patch_size
    }

    /// Attached comparator, if any
    pub fn comparator(&self) -> Option<&Comparator> {
        self.comparator.as_ref()
    }

    /// Preprocess an image
    pub fn prepare(&self, image: &Tensor) -> Result<FadeIntermediates> {
        FadeIntermediates::compute(image, self.patch_size)
    }

    /// Compare intermediates in two stages: setup, then channels
    ///
    /// Returns an empty list when no comparator is attached.
    pub fn check(&self, intermediates: &FadeIntermediates) -> Result<Vec<BatchResult>> {
        let Some(comparator) = &self.comparator else {
            return Ok(Vec::new());
        };

        info!("--- Stage 1: setup ---");
        let setup = comparator.compare_all(intermediates.setup_variables()?)?;

        info!("--- Stage 2: RGB and gray channels ---");
        let channels = comparator.compare_all(intermediates.channel_variables())?;

        Ok(vec![setup, channels])
    }

    /// Run the ported preprocessing and, when a comparator is attached, the
    /// parity check
    pub fn evaluate(&self, image: &Tensor) -> Result<FadeOutput> {
        let intermediates = self.prepare(image)?;
        let parity = self.check(&intermediates)?;
        Ok(FadeOutput {
            score: PLACEHOLDER_SCORE,
            parity,
        })
    }

    /// Evaluate the fog density of an image
    ///
    /// Always [`PLACEHOLDER_SCORE`] until the density estimation is ported.
    pub fn score(&self, image: &Tensor) -> Result<f64> {
        Ok(self.evaluate(image)?.score)
    }
}

/// Score plus the parity results of one evaluation
#[derive(Debug, Clone)]
pub struct FadeOutput {
    /// Fog density score
    pub score: f64,
    /// One batch per check stage, empty without a comparator
    pub parity: Vec<BatchResult>,
}

impl FadeOutput {
    /// Whether every parity check passed (vacuously true without checks)
    pub fn parity_passed(&self) -> bool {
        self.parity.iter().all(|b| b.all_passed())
    }
}

/// Evaluate with the default patch size and no parity checking
pub fn fade(image: &Tensor) -> Result<f64> {
    Fade::default().score(image)
}
