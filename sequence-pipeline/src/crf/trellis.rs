/// Dense row-major matrix of scores, time on the rows and labels on the
/// columns.
#[derive(Debug, Clone, Default)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.cols + col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.data[row * self.cols + col] = value;
    }

    pub fn add(&mut self, row: usize, col: usize, value: f64) {
        self.data[row * self.cols + col] += value;
    }

    pub fn row(&self, row: usize) -> &[f64] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    pub fn row_mut(&mut self, row: usize) -> &mut [f64] {
        &mut self.data[row * self.cols..(row + 1) * self.cols]
    }
}

/// Plain probability trellis, used for the backward pass.
#[derive(Debug, Clone)]
pub struct Trellis {
    probabilities: Matrix,
}

impl Trellis {
    pub fn new(time_steps: usize, labels: usize) -> Self {
        Self {
            probabilities: Matrix::new(time_steps, labels),
        }
    }

    pub fn probability(&self, t: usize, label: usize) -> f64 {
        self.probabilities.get(t, label)
    }

    pub fn set_probability(&mut self, t: usize, label: usize, value: f64) {
        self.probabilities.set(t, label, value);
    }
}

/// Forward trellis with a per-column normalizer to guard against
/// underflow: each time step's probabilities are rescaled to sum to one and
/// the reciprocal of the pre-normalization mass is kept, so
/// `log Z(x) = -sum_t ln(normalizer(t))`.
#[derive(Debug, Clone)]
pub struct ForwardTrellis {
    trellis: Trellis,
    normalizers: Vec<f64>,
}

impl ForwardTrellis {
    pub fn new(time_steps: usize, labels: usize) -> Self {
        Self {
            trellis: Trellis::new(time_steps, labels),
            normalizers: vec![1.0; time_steps],
        }
    }

    pub fn probability(&self, t: usize, label: usize) -> f64 {
        self.trellis.probability(t, label)
    }

    pub fn set_probability(&mut self, t: usize, label: usize, value: f64) {
        self.trellis.set_probability(t, label, value);
    }

    pub fn normalize(&mut self, t: usize) {
        let row = self.trellis.probabilities.row_mut(t);
        let sum: f64 = row.iter().sum();
        if sum > 0.0 {
            let scale = 1.0 / sum;
            for value in row {
                *value *= scale;
            }
            self.normalizers[t] = scale;
        } else {
            self.normalizers[t] = 1.0;
        }
    }

    pub fn normalizer(&self, t: usize) -> f64 {
        self.normalizers[t]
    }
}

/// Log-domain Viterbi trellis with back-pointers.
#[derive(Debug, Clone)]
pub struct ViterbiTrellis {
    scores: Matrix,
    previous: Vec<usize>,
    labels: usize,
}

impl ViterbiTrellis {
    pub fn new(time_steps: usize, labels: usize) -> Self {
        Self {
            scores: Matrix::new(time_steps, labels),
            previous: vec![0; time_steps * labels],
            labels,
        }
    }

    pub fn probability(&self, t: usize, label: usize) -> f64 {
        self.scores.get(t, label)
    }

    pub fn set_probability(&mut self, t: usize, label: usize, value: f64) {
        self.scores.set(t, label, value);
    }

    pub fn previous_tag(&self, t: usize, label: usize) -> usize {
        self.previous[t * self.labels + label]
    }

    pub fn set_previous_tag(&mut self, t: usize, label: usize, previous: usize) {
        self.previous[t * self.labels + label] = previous;
    }
}
