use crate::{trace::Gpr, Element, Error, Result};

/// Immutable input/output rows that programs are scored against.
///
/// In vectorized sets every row holds `lanes` independent samples, one per
/// vector lane.
#[derive(Debug, Clone)]
pub struct SampleSet<E> {
    // Indexed by row, then column, then lane.
    inputs: Vec<E>,
    // Indexed by row, then lane.
    outputs: Vec<E>,
    rows: usize,
    arity: usize,
    lanes: usize,
}

impl<E: Element> SampleSet<E> {
    /// One sample per row.
    pub fn scalar<I>(arity: usize, rows: I) -> Result<Self>
    where
        I: IntoIterator<Item = (Vec<E>, E)>,
    {
        Self::with_lanes(arity, 1, rows)
    }

    /// Groups consecutive rows into vector rows of `E::KIND.lanes()` samples.
    pub fn vectorized<I>(arity: usize, rows: I) -> Result<Self>
    where
        I: IntoIterator<Item = (Vec<E>, E)>,
    {
        Self::with_lanes(arity, E::KIND.lanes(), rows)
    }

    fn with_lanes<I>(arity: usize, lanes: usize, rows: I) -> Result<Self>
    where
        I: IntoIterator<Item = (Vec<E>, E)>,
    {
        if arity == 0 {
            return Err(Error::Zero("input arity"));
        }
        if arity > Gpr::ALL.len() {
            return Err(Error::ArityTooLarge(arity));
        }

        let mut scalar_inputs = vec![];
        let mut outputs = vec![];
        for (row, (input, output)) in rows.into_iter().enumerate() {
            if input.len() != arity {
                return Err(Error::ArityMismatch {
                    row,
                    found: input.len(),
                    expected: arity,
                });
            }
            scalar_inputs.extend(input);
            outputs.push(output);
        }

        let scalar_rows = outputs.len();
        if scalar_rows == 0 {
            return Err(Error::Zero("sample rows"));
        }
        if scalar_rows % lanes != 0 {
            return Err(Error::RaggedVectorRows {
                rows: scalar_rows,
                lanes,
            });
        }

        let rows = scalar_rows / lanes;
        let mut inputs = Vec::with_capacity(scalar_inputs.len());
        for row in 0..rows {
            for column in 0..arity {
                inputs.extend(
                    (0..lanes).map(|lane| scalar_inputs[(row * lanes + lane) * arity + column]),
                );
            }
        }

        Ok(Self {
            inputs,
            outputs,
            rows,
            arity,
            lanes,
        })
    }

    /// Amount of (vector) rows.
    pub fn row_count(&self) -> usize {
        self.rows
    }

    /// Amount of inputs per sample.
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Samples per row, 1 for scalar sets.
    pub fn lanes(&self) -> usize {
        self.lanes
    }

    /// Whether rows hold full vectors.
    pub fn is_vectorized(&self) -> bool {
        self.lanes > 1
    }

    /// # Panics
    /// If any index is out of range.
    pub fn input(&self, row: usize, column: usize, lane: usize) -> E {
        assert!(row < self.rows && column < self.arity && lane < self.lanes);
        self.inputs[(row * self.arity + column) * self.lanes + lane]
    }

    /// # Panics
    /// If any index is out of range.
    pub fn output(&self, row: usize, lane: usize) -> E {
        assert!(row < self.rows && lane < self.lanes);
        self.outputs[row * self.lanes + lane]
    }

    /// Expected outputs in row, then lane order.
    pub fn outputs(&self) -> &[E] {
        &self.outputs
    }
}
