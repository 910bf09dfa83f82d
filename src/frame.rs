//! Captured image frames and region-of-interest statistics.

use crate::error::{AppResult, PolarError};
use image::error::{ParameterError, ParameterErrorKind};
use image::{ImageBuffer, ImageError, Luma};
use std::path::Path;

/// Sub-rectangle of a camera frame used for intensity averaging.
///
/// Rows and columns are half-open ranges: `row_start..row_end`,
/// `col_start..col_end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Roi {
    pub row_start: usize,
    pub row_end: usize,
    pub col_start: usize,
    pub col_end: usize,
}

impl Roi {
    pub fn new(
        row_start: usize,
        row_end: usize,
        col_start: usize,
        col_end: usize,
    ) -> AppResult<Self> {
        if row_start >= row_end || col_start >= col_end {
            return Err(PolarError::Configuration(format!(
                "malformed ROI: rows {row_start}..{row_end}, cols {col_start}..{col_end}"
            )));
        }
        Ok(Self {
            row_start,
            row_end,
            col_start,
            col_end,
        })
    }
}

/// A single-channel 16-bit intensity grid as delivered by the camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    rows: usize,
    cols: usize,
    data: Vec<i16>,
}

impl Frame {
    /// Build a frame from row-major pixel data.
    ///
    /// # Panics
    /// Panics if `data.len() != rows * cols`; frames always come from sources
    /// that construct them consistently.
    pub fn new(rows: usize, cols: usize, data: Vec<i16>) -> Self {
        assert_eq!(data.len(), rows * cols, "frame data length mismatch");
        Self { rows, cols, data }
    }

    /// Build a frame by evaluating `f(row, col)` at every pixel.
    pub fn from_fn(rows: usize, cols: usize, mut f: impl FnMut(usize, usize) -> i16) -> Self {
        let mut data = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for c in 0..cols {
                data.push(f(r, c));
            }
        }
        Self { rows, cols, data }
    }

    /// Build a frame filled with a constant value.
    pub fn constant(rows: usize, cols: usize, value: i16) -> Self {
        Self {
            rows,
            cols,
            data: vec![value; rows * cols],
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn data(&self) -> &[i16] {
        &self.data
    }

    /// Mean intensity over the whole frame.
    pub fn mean(&self) -> f64 {
        let sum: f64 = self.data.iter().map(|&v| f64::from(v)).sum();
        sum / self.data.len() as f64
    }

    /// Mean intensity over a region of interest.
    ///
    /// The ROI must lie inside the frame; an ROI extending past the frame
    /// bounds is reported as a configuration error rather than averaged over
    /// a silently clipped region.
    pub fn roi_mean(&self, roi: &Roi) -> AppResult<f64> {
        if roi.row_end > self.rows || roi.col_end > self.cols {
            return Err(PolarError::Configuration(format!(
                "ROI rows {}..{}, cols {}..{} exceeds the {}x{} frame",
                roi.row_start, roi.row_end, roi.col_start, roi.col_end, self.rows, self.cols
            )));
        }
        let mut sum = 0.0;
        for r in roi.row_start..roi.row_end {
            let row = &self.data[r * self.cols..(r + 1) * self.cols];
            for &v in &row[roi.col_start..roi.col_end] {
                sum += f64::from(v);
            }
        }
        let count = (roi.row_end - roi.row_start) * (roi.col_end - roi.col_start);
        Ok(sum / count as f64)
    }

    /// Write the frame as a 16-bit single-channel TIFF.
    pub fn save_tiff(&self, path: &Path) -> AppResult<()> {
        let pixels: Vec<u16> = self.data.iter().map(|&v| v as u16).collect();
        let buffer =
            ImageBuffer::<Luma<u16>, Vec<u16>>::from_raw(self.cols as u32, self.rows as u32, pixels)
                .ok_or_else(|| {
                    PolarError::Image(ImageError::Parameter(ParameterError::from_kind(
                        ParameterErrorKind::DimensionMismatch,
                    )))
                })?;
        buffer.save(path)?;
        Ok(())
    }
}
