use crate::{codegen::io::IoLayout, Catalog, Element, Error, Program, Result};

use dynasmrt::{dynasm, x64::Assembler, AssemblyOffset, DynasmApi, ExecutableBuffer};

use std::{marker::PhantomData, mem::transmute};

type Entry = extern "sysv64" fn(*const u8, *mut u8);

/// One program compiled to straight-line machine code, for running it outside
/// of a population.
pub struct CompiledProgram<E> {
    code: ExecutableBuffer,
    layout: IoLayout,
    _element: PhantomData<fn(&[E]) -> E>,
}

impl<E: Element> CompiledProgram<E> {
    /// Compile `program` for inputs of `arity` columns. Vectorized when the
    /// catalog is.
    pub fn new(catalog: &Catalog, program: &Program, arity: usize) -> Result<Self> {
        if catalog.element() != E::KIND {
            return Err(Error::LayoutMismatch);
        }
        let lanes = if catalog.vectorized() {
            E::KIND.lanes()
        } else {
            1
        };
        let layout = IoLayout::from_dimensions(E::KIND, 1, arity, lanes, 1)?;

        let mut ops = Assembler::new()?;
        dynasm!(ops
            ; push rbx
            ; push r12
            ; push r13
            ; mov r13, rdi
            ; mov r12, rsi
            ; xor ebx, ebx
        );
        layout.emit_load(&mut ops);
        for &opcode in program.opcodes() {
            catalog
                .instruction(opcode)
                .ok_or(Error::UnknownOpcode(opcode))?
                .encode(&mut ops);
        }
        layout.emit_store(&mut ops);
        dynasm!(ops
            ; pop r13
            ; pop r12
            ; pop rbx
            ; ret
        );

        let code = ops
            .finalize()
            .map_err(|_| Error::Assembler("could not finalize program".to_owned()))?;

        tracing::debug!(
            bytes = code.len(),
            instructions = program.len(),
            "compiled program"
        );

        Ok(Self {
            code,
            layout,
            _element: PhantomData,
        })
    }

    /// Input columns.
    pub fn arity(&self) -> usize {
        self.layout.arity()
    }

    /// Elements per column and per output.
    pub fn lanes(&self) -> usize {
        self.layout.lanes()
    }

    /// Run on one (vector) row. `inputs` holds the columns in order, each
    /// column [lanes](Self::lanes) elements wide.
    ///
    /// # Panics
    /// If `inputs` does not hold exactly `arity * lanes` elements.
    pub fn call(&self, inputs: &[E]) -> Vec<E> {
        assert_eq!(inputs.len(), self.layout.input_len());

        let mut outputs = vec![E::default(); self.lanes()];
        let entry: Entry = unsafe { transmute(self.code.ptr(AssemblyOffset(0))) };
        entry(inputs.as_ptr().cast(), outputs.as_mut_ptr().cast());
        outputs
    }
}
