use crate::{
    codegen::{
        io::{IoLayout, ProgramSetInput},
        Instrumentation,
    },
    Catalog, Element, Error, Opcode, Partition, Result, END, HALT,
};

use dynasmrt::{
    dynasm, x64::Assembler, AssemblyOffset, DynasmApi, DynasmLabelApi, ExecutableBuffer,
};

use std::mem::{size_of, transmute};

const CELL_SHIFT: i8 = 5;

/// Bytes of machine code reserved for every opcode.
pub const CELL_SIZE: usize = 1 << CELL_SHIFT;

type Entry = extern "sysv64" fn(*const Opcode, *const u8, *mut u8) -> u64;

/// Threaded code dispatch over a table of per-opcode code cells.
///
/// Every cell runs its instruction, then loads the next opcode and jumps
/// directly into the cell for it. The `END` cell stores the output of the
/// current row and either restarts the program on the next row or moves on
/// to the next program. The `HALT` cell returns to the host, so a whole
/// partition runs in a single call.
///
/// Register use inside generated code:
/// - `r15`: address of the current opcode
/// - `r14`: table base
/// - `r13`: input region
/// - `r12`: output base of the current program
/// - `rbx`: row index
/// - `r11`: scratch
/// - `r10`: executed instruction count
pub struct Trampoline {
    code: ExecutableBuffer,
    entry: AssemblyOffset,
    layout: IoLayout,
    program_size: usize,
    opcode_count: usize,
    largest_cell: usize,
}

impl Trampoline {
    /// Emit the table and stubs for every opcode of `catalog`.
    pub fn new(
        catalog: &Catalog,
        layout: &IoLayout,
        program_size: usize,
        instrumentation: Instrumentation,
    ) -> Result<Self> {
        if catalog.element() != layout.element() || catalog.vectorized() != layout.is_vectorized()
        {
            return Err(Error::LayoutMismatch);
        }
        if program_size == 0 {
            return Err(Error::Zero("program size"));
        }

        let rows = i32::try_from(layout.rows()).map_err(|_| Error::RegionTooLarge)?;
        let program_stride =
            i32::try_from(layout.output_program_stride()).map_err(|_| Error::RegionTooLarge)?;
        let rewind = i32::try_from(program_size * size_of::<Opcode>())
            .map_err(|_| Error::RegionTooLarge)?;

        let mut ops = Assembler::new()?;

        let entry = ops.offset();
        dynasm!(ops
            ; push rbx
            ; push r12
            ; push r13
            ; push r14
            ; push r15
            ; mov r15, rdi
            ; mov r13, rsi
            ; mov r12, rdx
            ; lea r14, [->table]
            ; xor ebx, ebx
            ; xor r10d, r10d
        );
        layout.emit_load(&mut ops);
        emit_dispatch(&mut ops);

        // r15 points at the END slot of the current program.
        dynasm!(ops; ->end:);
        layout.emit_store(&mut ops);
        dynasm!(ops
            ; add rbx, 1
            ; cmp rbx, rows
            ; jae >next_program
            ; sub r15, rewind
        );
        layout.emit_load(&mut ops);
        emit_dispatch(&mut ops);
        dynasm!(ops
            ; next_program:
            ; xor ebx, ebx
            ; add r12, program_stride
            ; add r15, 2
        );
        layout.emit_load(&mut ops);
        emit_dispatch(&mut ops);

        dynasm!(ops
            ; ->halt:
            ; mov rax, r10
            ; pop r15
            ; pop r14
            ; pop r13
            ; pop r12
            ; pop rbx
            ; ret
        );

        ops.align(CELL_SIZE, 0xcc);
        dynasm!(ops; ->table:);
        let mut largest_cell = 0;
        for opcode in 0..catalog.opcode_count() as Opcode {
            let start = ops.offset();
            match opcode {
                END => dynasm!(ops; jmp ->end),
                HALT => dynasm!(ops; jmp ->halt),
                _ => {
                    let inst = catalog
                        .instruction(opcode)
                        .ok_or(Error::UnknownOpcode(opcode))?;
                    if instrumentation == Instrumentation::CountInstructions {
                        dynasm!(ops; inc r10);
                    }
                    inst.encode(&mut ops);
                    // Literal immediate so the short encoding is picked.
                    dynasm!(ops; add r15, 2);
                    emit_dispatch(&mut ops);
                }
            }

            let size = ops.offset().0 - start.0;
            if size > CELL_SIZE {
                return Err(Error::CellOverflow { opcode, size });
            }
            largest_cell = largest_cell.max(size);
            ops.align(CELL_SIZE, 0xcc);
        }

        ops.commit()
            .map_err(|e| Error::Assembler(e.to_string()))?;
        let code = ops
            .finalize()
            .map_err(|_| Error::Assembler("could not finalize trampoline".to_owned()))?;

        tracing::debug!(
            bytes = code.len(),
            opcodes = catalog.opcode_count(),
            largest_cell,
            ?instrumentation,
            "emitted trampoline"
        );

        Ok(Self {
            code,
            entry,
            layout: layout.clone(),
            program_size,
            opcode_count: catalog.opcode_count(),
            largest_cell,
        })
    }

    /// The layout the trampoline was emitted for.
    pub fn layout(&self) -> &IoLayout {
        &self.layout
    }

    /// Instructions per program.
    pub fn program_size(&self) -> usize {
        self.program_size
    }

    /// Bytes used by the biggest opcode cell, at most [CELL_SIZE].
    pub fn largest_cell(&self) -> usize {
        self.largest_cell
    }

    /// Size of the generated code in bytes.
    pub fn code_size(&self) -> usize {
        self.code.len()
    }

    /// Run every program of `partition` on every row of `input`, writing the
    /// outputs of the partition to `output`.
    ///
    /// Returns the amount of executed instructions when instruction counting
    /// is enabled, zero otherwise.
    ///
    /// # Panics
    /// If the partition, input or output do not have the shape the trampoline
    /// was emitted for.
    pub fn run<E: Element>(
        &self,
        partition: Partition<'_>,
        input: &ProgramSetInput<E>,
        output: &mut [E],
    ) -> Result<u64> {
        assert_eq!(E::KIND, self.layout.element());
        assert_eq!(partition.program_size(), self.program_size);
        assert_eq!(input.as_slice().len(), self.layout.input_len());
        assert_eq!(
            output.len(),
            partition.program_count() * self.layout.outputs_per_program()
        );

        let slots = partition.slots();
        assert_eq!(slots.last(), Some(&HALT));
        if let Some(&opcode) = slots
            .iter()
            .find(|&&opcode| usize::from(opcode) >= self.opcode_count)
        {
            return Err(Error::UnknownOpcode(opcode));
        }

        // Every slot indexes the table and the regions match the layout.
        let entry: Entry = unsafe { transmute(self.code.ptr(self.entry)) };
        Ok(entry(
            slots.as_ptr(),
            input.as_slice().as_ptr().cast(),
            output.as_mut_ptr().cast(),
        ))
    }
}

/// Jump to the cell of the opcode `r15` points at.
fn emit_dispatch(ops: &mut Assembler) {
    dynasm!(ops
        ; movzx r11d, WORD [r15]
        ; shl r11d, CELL_SHIFT
        ; add r11, r14
        ; jmp r11
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codegen::ProgramSetOutput,
        trace::{Gpr, Xmm},
        CatalogOptions, ElementKind, FloatForm, FloatOp, Instruction, IntOp, ProgramStore,
        SampleSet,
    };

    fn int_catalog() -> Catalog {
        let instructions = vec![
            Instruction::Nop,
            // rax += rcx
            Instruction::Int {
                op: IntOp::Add,
                dst: Gpr::Rax,
                src: Gpr::Rcx,
            },
            // rax *= rax
            Instruction::Int {
                op: IntOp::Imul,
                dst: Gpr::Rax,
                src: Gpr::Rax,
            },
        ];
        Catalog::from_instructions(ElementKind::I64, false, instructions).unwrap()
    }

    #[test]
    fn every_program_on_every_row() {
        let catalog = int_catalog();
        let nop = catalog.opcode(Instruction::Nop).unwrap();
        let add = nop + 1;
        let square = nop + 2;

        let rows = [(vec![1i64, 2], 0), (vec![3, 4], 0), (vec![-5, 5], 0)];
        let samples = SampleSet::scalar(2, rows).unwrap();

        let mut store = ProgramStore::new(2, 4, 2).unwrap();
        store.initialize().unwrap();
        for (program, [a, b]) in [[nop, nop], [add, nop], [add, square], [square, add]]
            .into_iter()
            .enumerate()
        {
            store.set(program, 0, a).unwrap();
            store.set(program, 1, b).unwrap();
        }

        let layout = IoLayout::new(&samples, store.program_count()).unwrap();
        let trampoline = Trampoline::new(&catalog, &layout, 2, Instrumentation::None).unwrap();
        let input = ProgramSetInput::new(&layout, &samples);
        let mut output = ProgramSetOutput::<i64>::new(&layout);

        for (partition, out) in store.partitions().zip(output.partitions_mut(2)) {
            assert_eq!(trampoline.run(partition, &input, out).unwrap(), 0);
        }

        assert_eq!(output.program(0), &[1, 3, -5]);
        assert_eq!(output.program(1), &[3, 7, 0]);
        assert_eq!(output.program(2), &[9, 49, 0]);
        assert_eq!(output.program(3), &[3, 13, 30]);
    }

    #[test]
    fn instruction_count() {
        let catalog = int_catalog();
        let samples = SampleSet::scalar(1, (0..5).map(|i| (vec![i as i64], 0))).unwrap();

        let mut store = ProgramStore::new(1, 3, 4).unwrap();
        store.initialize().unwrap();

        let layout = IoLayout::new(&samples, store.program_count()).unwrap();
        let trampoline =
            Trampoline::new(&catalog, &layout, 4, Instrumentation::CountInstructions).unwrap();
        let input = ProgramSetInput::new(&layout, &samples);
        let mut output = ProgramSetOutput::new(&layout);

        let count = trampoline
            .run(store.partition(0), &input, output.as_mut_slice())
            .unwrap();
        assert_eq!(count, 3 * 5 * 4);
        // Only nops, the input passes through.
        assert_eq!(output.program(2), &[0, 1, 2, 3, 4]);
    }

    #[test]
    fn registers_are_cleared_between_rows() {
        let catalog = int_catalog();
        let add = catalog.instruction_opcodes().start + 1;
        // rcx is not an input, so the add only sees zero.
        let samples = SampleSet::scalar(1, [(vec![7i64], 0), (vec![8], 0)]).unwrap();

        let mut store = ProgramStore::new(1, 1, 3).unwrap();
        store.initialize().unwrap();
        for i in 0..3 {
            store.set(0, i, add).unwrap();
        }

        let layout = IoLayout::new(&samples, 1).unwrap();
        let trampoline = Trampoline::new(&catalog, &layout, 3, Instrumentation::None).unwrap();
        let input = ProgramSetInput::new(&layout, &samples);
        let mut output = ProgramSetOutput::new(&layout);
        trampoline
            .run(store.partition(0), &input, output.as_mut_slice())
            .unwrap();

        assert_eq!(output.program(0), &[7, 8]);
    }

    #[test]
    fn vectorized_rows() {
        let mul = Instruction::Float {
            op: FloatOp::Mul,
            form: FloatForm::PackedSingle,
            dst: Xmm::ALL[0],
            src: Xmm::ALL[1],
        };
        let catalog = Catalog::from_instructions(ElementKind::F32, true, vec![mul]).unwrap();

        let rows = (0..8).map(|i| (vec![i as f32, 2.0], 0.0));
        let samples = SampleSet::vectorized(2, rows).unwrap();

        let mut store = ProgramStore::new(1, 1, 1).unwrap();
        store.initialize().unwrap();

        let layout = IoLayout::new(&samples, 1).unwrap();
        let trampoline = Trampoline::new(&catalog, &layout, 1, Instrumentation::None).unwrap();
        let input = ProgramSetInput::new(&layout, &samples);
        let mut output = ProgramSetOutput::new(&layout);
        trampoline
            .run(store.partition(0), &input, output.as_mut_slice())
            .unwrap();

        let expected: Vec<f32> = (0..8).map(|i| i as f32 * 2.0).collect();
        assert_eq!(output.program(0), &expected[..]);
    }

    #[test]
    fn counted_guarded_division_fits_a_cell() {
        let samples = SampleSet::scalar(1, [(vec![1i64], 1)]).unwrap();
        let layout = IoLayout::new(&samples, 1).unwrap();

        let catalog = Catalog::build(&CatalogOptions::new(ElementKind::I64)).unwrap();
        let plain = Trampoline::new(&catalog, &layout, 1, Instrumentation::None).unwrap();
        let counting =
            Trampoline::new(&catalog, &layout, 1, Instrumentation::CountInstructions).unwrap();
        assert!(counting.largest_cell() <= CELL_SIZE);
        // inc r10
        assert_eq!(counting.largest_cell(), plain.largest_cell() + 3);

        // The biggest cell of the full catalog is the guarded division.
        let div = Instruction::Div {
            src: Gpr::Rsi,
            guarded: true,
        };
        let catalog = Catalog::from_instructions(ElementKind::I64, false, vec![div]).unwrap();
        let single =
            Trampoline::new(&catalog, &layout, 1, Instrumentation::CountInstructions).unwrap();
        assert_eq!(single.largest_cell(), counting.largest_cell());

        let mut store = ProgramStore::new(1, 1, 1).unwrap();
        store.initialize().unwrap();
        let input = ProgramSetInput::new(&layout, &samples);
        let mut output = ProgramSetOutput::new(&layout);
        let count = single
            .run(store.partition(0), &input, output.as_mut_slice())
            .unwrap();
        assert_eq!(count, 1);
        // rsi is zero, so the division is skipped and only rdx is cleared.
        assert_eq!(output.program(0), &[1]);
    }

    #[test]
    fn rejects_foreign_opcodes_and_layouts() {
        let catalog = int_catalog();
        let samples = SampleSet::scalar(1, [(vec![1i64], 1)]).unwrap();
        let layout = IoLayout::new(&samples, 1).unwrap();
        let trampoline = Trampoline::new(&catalog, &layout, 1, Instrumentation::None).unwrap();

        let mut other = ProgramStore::new(1, 1, 1).unwrap();
        other.initialize().unwrap();
        other.set(0, 0, catalog.opcode_count() as Opcode).unwrap();

        let input = ProgramSetInput::new(&layout, &samples);
        let mut output = ProgramSetOutput::new(&layout);
        assert!(matches!(
            trampoline.run(other.partition(0), &input, output.as_mut_slice()),
            Err(Error::UnknownOpcode(_))
        ));

        let floats = SampleSet::scalar(1, [(vec![1.0f64], 1.0)]).unwrap();
        let float_layout = IoLayout::new(&floats, 1).unwrap();
        assert!(matches!(
            Trampoline::new(&catalog, &float_layout, 1, Instrumentation::None),
            Err(Error::LayoutMismatch)
        ));
    }
}
