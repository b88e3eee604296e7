// Sliding paraboloid background subtraction, applied independently to each
// slice.
//
// The slice is first smoothed with a 3x3 maximum then a 3x3 mean. A
// parabola of curvature 1/(2 radius) is then slid from below along every
// row, every column and both diagonal directions: wherever it cannot touch
// the profile, the profile is replaced by the parabola. In one dimension
// this is the lower convex hull of `f(i) + coeff i^2`, mapped back. The
// estimate is finally lowered by the average rise of the maximum filter
// and clipped to the input.

use itertools::Itertools;
use ndarray::{Array2, ArrayView2, ArrayViewMut1, Axis, Zip};

use crate::voxels::VoxelGrid;

pub fn subtract_background(grid: &VoxelGrid, radius: f64) -> VoxelGrid {
    let mut data = grid.data().clone();
    Zip::from(data.axis_iter_mut(Axis(0))).par_for_each(|mut slice| {
        let background = paraboloid_background(slice.view(), radius);
        Zip::from(&mut slice).and(&background).for_each(|v, &b| {
            *v = (*v - b).max(0.0);
        });
    });
    grid.with_data(data)
}

/// Background estimate for one slice. Never exceeds the input.
pub fn paraboloid_background(slice: ArrayView2<f32>, radius: f64) -> Array2<f32> {
    let (height, width) = slice.dim();
    if height == 0 || width == 0 {
        return slice.to_owned();
    }

    let mut smoothed = slice.mapv(f64::from);
    let shift = filter3x3(&mut smoothed, Filter3::Maximum);
    filter3x3(&mut smoothed, Filter3::Mean);

    let coeff = 0.5 / radius;
    let coeff_diag = 1.0 / radius;
    let mut slider = LineSlider::with_capacity(height.max(width));

    correct_corners(&mut smoothed, coeff, &mut slider);

    for line in rows(height, width) {
        slider.slide(&mut smoothed, line, coeff);
    }
    for line in columns(height, width) {
        slider.slide(&mut smoothed, line, coeff);
    }
    for line in rows(height, width) {
        slider.slide(&mut smoothed, line, coeff);
    }
    for anti in [false, true, false] {
        for line in diagonals(height, width, anti) {
            slider.slide(&mut smoothed, line, coeff_diag);
        }
    }

    let mut background = Array2::zeros((height, width));
    Zip::from(&mut background)
        .and(&smoothed)
        .and(&slice)
        .for_each(|b, &s, &v| *b = ((s - shift) as f32).min(v));

    background
}

#[derive(Clone, Copy, Debug)]
enum Filter3 {
    Maximum,
    Mean,
}

// Separable 3x3 filter with replicated borders. Returns the average amount
// by which pixels were raised, which is only nonzero for the maximum.
fn filter3x3(data: &mut Array2<f64>, kind: Filter3) -> f64 {
    let (height, width) = data.dim();
    let mut shift = 0.0;
    for row in data.rows_mut() {
        shift += filter3(row, kind);
    }
    for column in data.columns_mut() {
        shift += filter3(column, kind);
    }
    shift / (height * width) as f64
}

fn filter3(mut line: ArrayViewMut1<f64>, kind: Filter3) -> f64 {
    let n = line.len();
    let mut shift = 0.0;
    let (mut v2, mut v3) = (line[0], line[0]);
    for i in 0..n {
        let v1 = v2;
        v2 = v3;
        if i + 1 < n {
            v3 = line[i + 1];
        }
        line[i] = match kind {
            Filter3::Maximum => {
                let max = v1.max(v2).max(v3);
                shift += max - v2;
                max
            }
            Filter3::Mean => (v1 + v2 + v3) / 3.0,
        };
    }
    shift
}

// Near a corner, the hull only has the corner pixel and the other edge to
// lean on, so an object sitting in the corner would be taken for
// background. Each corner is capped by the average of three line
// extrapolations (both edges and the diagonal) that skip the outermost
// touching points.
fn correct_corners(data: &mut Array2<f64>, coeff: f64, slider: &mut LineSlider) {
    let (height, width) = data.dim();
    if height < 2 || width < 2 {
        return;
    }
    let (last_row, last_col) = (height - 1, width - 1);
    let mut corners = [0.0; 4];

    let (left, right) = slider.slide_with_edges(data, Line::row(0, width), coeff);
    corners[0] += left;
    corners[1] += right;
    let (left, right) = slider.slide_with_edges(data, Line::row(last_row, width), coeff);
    corners[2] += left;
    corners[3] += right;
    let (top, bottom) = slider.slide_with_edges(data, Line::column(0, height), coeff);
    corners[0] += top;
    corners[2] += bottom;
    let (top, bottom) = slider.slide_with_edges(data, Line::column(last_col, height), coeff);
    corners[1] += top;
    corners[3] += bottom;

    let len = height.min(width);
    let diagonal_lines = [
        Line { start: (0, 0), step: (1, 1), len },
        Line { start: (0, last_col), step: (1, -1), len },
        Line { start: (last_row, 0), step: (-1, 1), len },
        Line { start: (last_row, last_col), step: (-1, -1), len },
    ];
    for (corner, line) in corners.iter_mut().zip(diagonal_lines) {
        *corner += slider.slide_with_edges(data, line, 2.0 * coeff).0;
    }

    let positions = [(0, 0), (0, last_col), (last_row, 0), (last_row, last_col)];
    for (pos, corner) in positions.into_iter().zip(corners) {
        let v = &mut data[pos];
        *v = v.min(corner / 3.0);
    }
}

// A straight run of pixels through a slice.
#[derive(Clone, Copy, Debug)]
struct Line {
    start: (usize, usize),
    step: (isize, isize),
    len: usize,
}

impl Line {
    fn row(i: usize, width: usize) -> Line {
        Line { start: (i, 0), step: (0, 1), len: width }
    }

    fn column(j: usize, height: usize) -> Line {
        Line { start: (0, j), step: (1, 0), len: height }
    }

    fn at(&self, k: usize) -> (usize, usize) {
        let k = k as isize;
        (
            (self.start.0 as isize + self.step.0 * k) as usize,
            (self.start.1 as isize + self.step.1 * k) as usize,
        )
    }
}

fn rows(height: usize, width: usize) -> impl Iterator<Item = Line> {
    (0..height).map(move |i| Line::row(i, width))
}

fn columns(height: usize, width: usize) -> impl Iterator<Item = Line> {
    (0..width).map(move |j| Line::column(j, height))
}

// Every diagonal running down-right, or down-left when `anti` is set.
fn diagonals(height: usize, width: usize, anti: bool) -> impl Iterator<Item = Line> {
    let first_col = if anti { width - 1 } else { 0 };
    (0..width)
        .map(|j| (0, j))
        .chain((1..height).map(move |i| (i, first_col)))
        .map(move |(i0, j0)| {
            if anti {
                Line { start: (i0, j0), step: (1, -1), len: (height - i0).min(j0 + 1) }
            } else {
                Line { start: (i0, j0), step: (1, 1), len: (height - i0).min(width - j0) }
            }
        })
}

// Scratch space for sliding a parabola along one line.
struct LineSlider {
    cache: Vec<f64>,
    hull: Vec<usize>,
}

impl LineSlider {
    fn with_capacity(n: usize) -> Self {
        LineSlider {
            cache: Vec::with_capacity(n),
            hull: Vec::with_capacity(n),
        }
    }

    fn slide(&mut self, data: &mut Array2<f64>, line: Line, coeff: f64) {
        self.cache.clear();
        self.cache.extend((0..line.len).map(|k| data[line.at(k)]));
        self.lower_hull(coeff);

        for (&i1, &i2) in self.hull.iter().tuple_windows() {
            let (v1, v2) = (self.cache[i1], self.cache[i2]);
            let d = (i2 - i1) as f64;
            let slope = (v2 - v1) / d + coeff * d;
            for j in i1 + 1..i2 {
                let dj = (j - i1) as f64;
                data[line.at(j)] = v1 + dj * (slope - dj * coeff);
            }
        }
    }

    // Slide along a line of at least two pixels, then return the values a
    // straight line through the outermost inner touching points predicts at
    // both ends, corrected back for the parabola. Touching points within a
    // quarter of the line from an end are ignored.
    fn slide_with_edges(&mut self, data: &mut Array2<f64>, line: Line, coeff: f64) -> (f64, f64) {
        self.slide(data, line, coeff);

        let n = self.cache.len();
        let last = n - 1;
        let mut first_corner = self.hull[1];
        let mut last_corner = self.hull[self.hull.len() - 2];
        if 4 * first_corner >= n {
            first_corner = 0;
        }
        if 4 * (last - last_corner) >= n {
            last_corner = last;
        }

        let (v1, v2) = (self.cache[first_corner], self.cache[last_corner]);
        let slope = (v2 - v1) / (last_corner - first_corner) as f64;
        let offset = v1 - slope * first_corner as f64;
        let head = first_corner as f64;
        let tail = (last - last_corner) as f64;
        (
            offset + coeff * head * head,
            offset + slope * last as f64 + coeff * tail * tail,
        )
    }

    // Indices of the lower convex hull of `cache[i] + coeff i^2`.
    fn lower_hull(&mut self, coeff: f64) {
        let cache = &self.cache;
        let g = |i: usize| cache[i] + coeff * (i * i) as f64;

        self.hull.clear();
        for i in 0..cache.len() {
            while self.hull.len() >= 2 {
                let o = self.hull[self.hull.len() - 2];
                let a = self.hull[self.hull.len() - 1];
                let cross = (a - o) as f64 * (g(i) - g(o)) - (g(a) - g(o)) * (i - o) as f64;
                if cross > 0.0 {
                    break;
                }
                self.hull.pop();
            }
            self.hull.push(i);
        }
    }
}
