use crate::{
    trace::{BitRange, Gpr, Register, Xmm},
    Element, ElementKind, Error, Result, SampleSet, VECTOR_BYTES,
};

use dynasmrt::{dynasm, x64::Assembler, DynasmApi};

use std::slice::ChunksMut;

/// Shape of the input and output regions, and the machine code that moves
/// values between them and the register file.
///
/// Generated code expects the current row index in `rbx`, the input region in
/// `r13` and the output base of the current program in `r12`. `r11` is
/// clobbered.
#[derive(Debug, Clone)]
pub struct IoLayout {
    element: ElementKind,
    rows: usize,
    arity: usize,
    lanes: usize,
    programs: usize,
}

impl IoLayout {
    /// Layout for evaluating `programs` programs on `samples`.
    pub fn new<E: Element>(samples: &SampleSet<E>, programs: usize) -> Result<Self> {
        Self::from_dimensions(
            E::KIND,
            samples.row_count(),
            samples.arity(),
            samples.lanes(),
            programs,
        )
    }

    /// Layout from raw dimensions. `lanes` is 1 for scalar samples, or the
    /// amount of elements in a vector register.
    pub fn from_dimensions(
        element: ElementKind,
        rows: usize,
        arity: usize,
        lanes: usize,
        programs: usize,
    ) -> Result<Self> {
        if rows == 0 {
            return Err(Error::Zero("sample rows"));
        }
        if arity == 0 {
            return Err(Error::Zero("input arity"));
        }
        if programs == 0 {
            return Err(Error::Zero("program count"));
        }
        if arity > Gpr::ALL.len() {
            return Err(Error::ArityTooLarge(arity));
        }
        if lanes != 1 && (lanes != element.lanes() || !element.is_float()) {
            return Err(Error::UnsupportedVector(element));
        }

        let layout = Self {
            element,
            rows,
            arity,
            lanes,
            programs,
        };

        // Every stride is emitted as a 32 bit immediate or displacement.
        let fits = |bytes: usize| i32::try_from(bytes).is_ok();
        if !fits(layout.input_row_stride())
            || !fits(layout.output_program_stride())
            || !fits(layout.rows * layout.input_row_stride())
        {
            return Err(Error::RegionTooLarge);
        }

        Ok(layout)
    }

    /// Element type of both regions.
    pub fn element(&self) -> ElementKind {
        self.element
    }

    /// Amount of (vector) rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Input columns per row.
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Elements per row and column.
    pub fn lanes(&self) -> usize {
        self.lanes
    }

    /// Amount of programs the output region holds.
    pub fn programs(&self) -> usize {
        self.programs
    }

    /// Whether rows hold full vectors.
    pub fn is_vectorized(&self) -> bool {
        self.lanes > 1
    }

    /// Length of the input region in elements.
    pub fn input_len(&self) -> usize {
        self.rows * self.arity * self.lanes
    }

    /// Outputs written by one program.
    pub fn outputs_per_program(&self) -> usize {
        self.rows * self.lanes
    }

    /// Length of the output region in elements.
    pub fn output_len(&self) -> usize {
        self.programs * self.outputs_per_program()
    }

    /// Register input `column` is loaded into.
    ///
    /// # Panics
    /// If `column` is not below the arity.
    pub fn input_register(&self, column: usize) -> Register {
        assert!(column < self.arity);
        if self.uses_xmm() {
            Xmm::ALL[column].into()
        } else {
            Gpr::ALL[column].into()
        }
    }

    /// Register the output is stored from.
    pub fn output_register(&self) -> Register {
        if self.uses_xmm() {
            Xmm::ALL[0].into()
        } else {
            Gpr::ALL[0].into()
        }
    }

    /// Bits of the output register that make up the output.
    pub fn output_range(&self) -> BitRange {
        if self.is_vectorized() {
            BitRange::low(VECTOR_BYTES as u16 * 8)
        } else {
            BitRange::low(self.element.bits())
        }
    }

    fn uses_xmm(&self) -> bool {
        self.element.is_float() || self.is_vectorized()
    }

    fn column_stride(&self) -> usize {
        self.lanes * self.element.size()
    }

    fn input_row_stride(&self) -> usize {
        self.arity * self.column_stride()
    }

    fn output_row_stride(&self) -> usize {
        self.lanes * self.element.size()
    }

    /// Bytes between the outputs of consecutive programs.
    pub(crate) fn output_program_stride(&self) -> usize {
        self.rows * self.output_row_stride()
    }

    /// Clear the register file and load the inputs of row `rbx`.
    pub(crate) fn emit_load(&self, ops: &mut Assembler) {
        // Every row starts from the same register state.
        for reg in Gpr::ALL {
            dynasm!(ops; xor Rd(reg.code()), Rd(reg.code()));
        }
        for reg in Xmm::ALL {
            dynasm!(ops; xorps Rx(reg.code()), Rx(reg.code()));
        }

        let stride = self.input_row_stride() as i32;
        dynasm!(ops; imul r11, rbx, stride);

        for column in 0..self.arity {
            let disp = (column * self.column_stride()) as i32;
            let x = Xmm::ALL[column].code();
            let g = Gpr::ALL[column].code();
            match (self.element, self.is_vectorized()) {
                (_, true) => dynasm!(ops; movups Rx(x), OWORD [r13 + r11 + disp]),
                (ElementKind::F32, false) => dynasm!(ops; movss Rx(x), DWORD [r13 + r11 + disp]),
                (ElementKind::F64, false) => dynasm!(ops; movsd Rx(x), QWORD [r13 + r11 + disp]),
                (ElementKind::I32, false) => dynasm!(ops; mov Rd(g), DWORD [r13 + r11 + disp]),
                (ElementKind::I64, false) => dynasm!(ops; mov Rq(g), QWORD [r13 + r11 + disp]),
            }
        }
    }

    /// Store the output of row `rbx`.
    pub(crate) fn emit_store(&self, ops: &mut Assembler) {
        let stride = self.output_row_stride() as i32;
        dynasm!(ops; imul r11, rbx, stride);

        match (self.element, self.is_vectorized()) {
            (_, true) => dynasm!(ops; movups OWORD [r12 + r11], xmm0),
            (ElementKind::F32, false) => dynasm!(ops; movss DWORD [r12 + r11], xmm0),
            (ElementKind::F64, false) => dynasm!(ops; movsd QWORD [r12 + r11], xmm0),
            (ElementKind::I32, false) => dynasm!(ops; mov DWORD [r12 + r11], eax),
            (ElementKind::I64, false) => dynasm!(ops; mov QWORD [r12 + r11], rax),
        }
    }
}

/// The input region shared by every program, read-only during evaluation.
#[derive(Debug, Clone)]
pub struct ProgramSetInput<E> {
    // Indexed by row, then column, then lane.
    values: Box<[E]>,
    arity: usize,
    lanes: usize,
}

impl<E: Element> ProgramSetInput<E> {
    /// Input region filled from `samples`.
    ///
    /// # Panics
    /// If `samples` does not have the dimensions of `layout`.
    pub fn new(layout: &IoLayout, samples: &SampleSet<E>) -> Self {
        assert_eq!(layout.rows(), samples.row_count());
        assert_eq!(layout.arity(), samples.arity());
        assert_eq!(layout.lanes(), samples.lanes());

        let mut input = Self::zeroed(layout);
        for row in 0..layout.rows() {
            for column in 0..layout.arity() {
                for lane in 0..layout.lanes() {
                    input.set(row, column, lane, samples.input(row, column, lane));
                }
            }
        }
        input
    }

    /// Input region with every value zero.
    pub fn zeroed(layout: &IoLayout) -> Self {
        assert_eq!(layout.element(), E::KIND, "layout is for another element type");
        Self {
            values: vec![E::default(); layout.input_len()].into_boxed_slice(),
            arity: layout.arity(),
            lanes: layout.lanes(),
        }
    }

    fn index(&self, row: usize, column: usize, lane: usize) -> usize {
        assert!(column < self.arity && lane < self.lanes);
        (row * self.arity + column) * self.lanes + lane
    }

    /// Overwrite one input.
    pub fn set(&mut self, row: usize, column: usize, lane: usize, value: E) {
        let idx = self.index(row, column, lane);
        self.values[idx] = value;
    }

    /// Read one input.
    pub fn get(&self, row: usize, column: usize, lane: usize) -> E {
        self.values[self.index(row, column, lane)]
    }

    /// The whole region.
    pub fn as_slice(&self) -> &[E] {
        &self.values
    }
}

/// Outputs of every program for every row, rewritten by each evaluation.
#[derive(Debug, Clone)]
pub struct ProgramSetOutput<E> {
    // Indexed by program, then row, then lane.
    values: Box<[E]>,
    per_program: usize,
    lanes: usize,
}

impl<E: Element> ProgramSetOutput<E> {
    /// Zeroed output region.
    pub fn new(layout: &IoLayout) -> Self {
        assert_eq!(layout.element(), E::KIND, "layout is for another element type");
        Self {
            values: vec![E::default(); layout.output_len()].into_boxed_slice(),
            per_program: layout.outputs_per_program(),
            lanes: layout.lanes(),
        }
    }

    /// One output.
    pub fn get(&self, program: usize, row: usize, lane: usize) -> E {
        assert!(lane < self.lanes);
        self.program(program)[row * self.lanes + lane]
    }

    /// Every output of one program, in row then lane order.
    pub fn program(&self, program: usize) -> &[E] {
        let start = program * self.per_program;
        &self.values[start..start + self.per_program]
    }

    /// The whole region.
    pub fn as_slice(&self) -> &[E] {
        &self.values
    }

    /// The whole region.
    pub fn as_mut_slice(&mut self) -> &mut [E] {
        &mut self.values
    }

    /// Disjoint slices for each of `threads` equally sized partitions.
    pub fn partitions_mut(&mut self, threads: usize) -> ChunksMut<'_, E> {
        assert_eq!(self.values.len() % threads, 0);
        let len = self.values.len() / threads;
        self.values.chunks_mut(len)
    }

    /// Set every output to zero.
    pub fn zero(&mut self) {
        self.values.fill(E::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_follow_element_type() {
        let ints = IoLayout::from_dimensions(ElementKind::I32, 3, 2, 1, 4).unwrap();
        assert_eq!(ints.input_register(1), Register::Gpr(Gpr::Rcx));
        assert_eq!(ints.output_register(), Register::Gpr(Gpr::Rax));
        assert_eq!(ints.output_range(), BitRange::low(32));

        let floats = IoLayout::from_dimensions(ElementKind::F32, 3, 2, 4, 4).unwrap();
        assert_eq!(floats.input_register(1), Register::Xmm(Xmm::ALL[1]));
        assert_eq!(floats.output_range(), BitRange::low(128));
        assert_eq!(floats.output_len(), 4 * 3 * 4);
        assert_eq!(floats.output_program_stride(), 3 * 4 * 4);
    }

    #[test]
    fn invalid_dimensions() {
        assert!(matches!(
            IoLayout::from_dimensions(ElementKind::I64, 1, 1, 2, 1),
            Err(Error::UnsupportedVector(ElementKind::I64))
        ));
        assert!(matches!(
            IoLayout::from_dimensions(ElementKind::F64, 1, 1, 4, 1),
            Err(Error::UnsupportedVector(ElementKind::F64))
        ));
        assert!(matches!(
            IoLayout::from_dimensions(ElementKind::F64, 1 << 30, 1, 1, 1),
            Err(Error::RegionTooLarge)
        ));
        assert!(matches!(
            IoLayout::from_dimensions(ElementKind::F64, 1, 5, 1, 1),
            Err(Error::ArityTooLarge(5))
        ));
    }

    #[test]
    fn input_region_matches_samples() {
        let rows = (0..4).map(|i| (vec![i, 10 + i], 0i64));
        let samples = SampleSet::scalar(2, rows).unwrap();
        let layout = IoLayout::new(&samples, 2).unwrap();
        let input = ProgramSetInput::new(&layout, &samples);

        assert_eq!(input.as_slice(), &[0, 10, 1, 11, 2, 12, 3, 13]);
        assert_eq!(input.get(2, 1, 0), 12);
    }

    #[test]
    fn output_partitions_are_disjoint() {
        let layout = IoLayout::from_dimensions(ElementKind::F64, 3, 1, 1, 4).unwrap();
        let mut output = ProgramSetOutput::<f64>::new(&layout);

        for (t, chunk) in output.partitions_mut(2).enumerate() {
            chunk.fill(t as f64 + 1.0);
        }
        assert_eq!(output.program(1), &[1.0; 3]);
        assert_eq!(output.get(2, 2, 0), 2.0);

        output.zero();
        assert!(output.as_slice().iter().all(|&v| v == 0.0));
    }
}
