use ndarray::Array2;

/// A single grayscale video frame, row-major (`[row, col]`), with its capture time.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: Array2<u8>,
    pub timestamp: f64, // in seconds
}

impl Frame {
    #[inline]
    pub fn new(image: Array2<u8>, timestamp: f64) -> Self {
        Self { image, timestamp }
    }

    /// Uniformly filled frame of the given size.
    pub fn filled(width: usize, height: usize, value: u8, timestamp: f64) -> Self {
        Self::new(Array2::from_elem((height, width), value), timestamp)
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.image.ncols()
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.image.nrows()
    }
}
