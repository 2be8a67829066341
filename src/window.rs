//! Execution windows, tile descriptors and 3-D window slicing.
//!
//! A [`Window`] describes the iteration space of a generated kernel. The
//! runtime dispatcher walks a window as a flat sequence of 3-D slices: the
//! first three dimensions form the NDRange of one enqueue, every dimension
//! above them is iterated one step at a time.

/// One iteration dimension: `[start, end)` walked with `step`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Dimension {
    pub start: i32,
    pub end: i32,
    pub step: i32,
}

impl Dimension {
    pub fn new(start: i32, end: i32, step: i32) -> Self {
        Dimension { start, end, step }
    }

    /// Number of steps needed to cover `[start, end)`.
    pub fn num_iterations(&self) -> usize {
        if self.step <= 0 || self.end <= self.start {
            return 0;
        }
        ((self.end - self.start + self.step - 1) / self.step) as usize
    }
}

impl Default for Dimension {
    fn default() -> Self {
        Dimension {
            start: 0,
            end: 0,
            step: 1,
        }
    }
}

/// Maximum number of window dimensions.
pub const MAX_WINDOW_DIMS: usize = 4;

/// The iteration space of a kernel, up to [`MAX_WINDOW_DIMS`] dimensions.
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct Window {
    dims: [Dimension; MAX_WINDOW_DIMS],
}

impl Window {
    pub fn new() -> Self {
        Window::default()
    }

    pub fn set(&mut self, d: usize, dim: Dimension) {
        self.dims[d] = dim;
    }

    pub fn dim(&self, d: usize) -> Dimension {
        self.dims[d]
    }

    pub fn num_iterations(&self, d: usize) -> usize {
        self.dims[d].num_iterations()
    }

    /// True if no dimension iterates at all.
    pub fn is_empty(&self) -> bool {
        self.dims.iter().all(|d| d.num_iterations() == 0)
    }

    /// NDRange extents of the first three dimensions, with empty dimensions
    /// promoted to a single iteration.
    pub fn global_work_size(&self) -> [usize; 3] {
        [
            self.num_iterations(0).max(1),
            self.num_iterations(1).max(1),
            self.num_iterations(2).max(1),
        ]
    }

    /// Splits the window into sequential 3-D slices.
    ///
    /// Dimensions 0..3 are carried into every slice unchanged; each dimension
    /// above them is fixed to one step per slice. A window with no iteration
    /// above dimension 2 yields exactly one slice.
    pub fn slices_3d(&self) -> Vec<Window> {
        let outer = self.dims[3];
        if outer.num_iterations() <= 1 {
            return vec![self.clone()];
        }
        let mut slices = Vec::with_capacity(outer.num_iterations());
        let mut w = outer.start;
        while w < outer.end {
            let mut slice = self.clone();
            slice.dims[3] = Dimension::new(w, (w + outer.step).min(outer.end), outer.step);
            slices.push(slice);
            w += outer.step;
        }
        slices
    }

    /// Returns a copy with the z and w dimensions collapsed to one element,
    /// used for arguments that do not slide along the z dimension.
    pub fn with_fixed_z(&self) -> Window {
        let mut fixed = self.clone();
        fixed.dims[2] = Dimension::new(0, 1, 1);
        fixed.dims[3] = Dimension::new(0, 1, 1);
        fixed
    }
}

/// Output-edge handling for a tiled kernel: which corner of the output the
/// partially-filled tiles sit in.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum ClippingStrategy {
    #[default]
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

/// Tile shape and output boundary of a blueprint, set once per blueprint.
///
/// `n0` is the tile width in columns (x), `m0` the tile height in rows (y).
/// `boundary_x`/`boundary_y` are the output shape against which boundary
/// conditions are generated.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TileDescriptor {
    pub n0: usize,
    pub m0: usize,
    pub boundary_x: usize,
    pub boundary_y: usize,
    pub clipping: ClippingStrategy,
}

impl TileDescriptor {
    pub fn new(
        n0: usize,
        m0: usize,
        boundary_x: usize,
        boundary_y: usize,
        clipping: ClippingStrategy,
    ) -> Self {
        TileDescriptor {
            n0,
            m0,
            boundary_x,
            boundary_y,
            clipping,
        }
    }

    /// True when no tile information was supplied; codegen then falls back to
    /// a 1x1 tile.
    pub fn is_empty(&self) -> bool {
        self.boundary_x == 0 && self.boundary_y == 0
    }
}

impl Default for TileDescriptor {
    fn default() -> Self {
        TileDescriptor {
            n0: 1,
            m0: 1,
            boundary_x: 0,
            boundary_y: 0,
            clipping: ClippingStrategy::TopLeft,
        }
    }
}

/// Ceil division helper shared by window calculations.
pub fn ceil_div(a: usize, b: usize) -> usize {
    debug_assert!(b > 0);
    a.div_ceil(b)
}
