#![deny(missing_docs)]

//! Threaded-code execution of evolved x86-64 instruction sequences.
//!
//! Programs are sequences of 16 bit opcodes, each selecting one concrete
//! register-only instruction from a [Catalog]. Instead of decoding opcodes in
//! a loop, a [Trampoline](codegen::Trampoline) holds one small block of native code per opcode that
//! runs the instruction and jumps straight to the block of the next opcode.
//! Whole populations of programs live in a partitioned [ProgramStore] and are
//! run over every sample row with a single call per partition.
//!
//! ## Quick start
//! ```
//! use nativegp::{
//!     codegen::{CompiledProgram, Instrumentation, IoLayout, ProgramSetInput, ProgramSetOutput, Trampoline},
//!     Catalog, CatalogOptions, ElementKind, Mnemonic, Program, ProgramStore, SampleSet,
//! };
//!
//! let samples = SampleSet::scalar(1, [(vec![2.0f64], 4.0), (vec![3.0], 9.0)]).unwrap();
//! let options = CatalogOptions {
//!     instructions: Some(vec![Mnemonic::FMul]),
//!     moves: Some(vec![]),
//!     ..CatalogOptions::new(ElementKind::F64)
//! };
//! let catalog = Catalog::build(&options).unwrap();
//!
//! let mut store = ProgramStore::new(1, 1, 1).unwrap();
//! store.initialize().unwrap();
//! // mulsd xmm0, xmm0
//! store.set(0, 0, catalog.instruction_opcodes().start).unwrap();
//!
//! let layout = IoLayout::new::<f64>(&samples, store.program_count()).unwrap();
//! let trampoline = Trampoline::new(&catalog, &layout, 1, Instrumentation::None).unwrap();
//! let input = ProgramSetInput::new(&layout, &samples);
//! let mut output = ProgramSetOutput::<f64>::new(&layout);
//!
//! trampoline.run(store.partition(0), &input, output.as_mut_slice()).unwrap();
//! assert_eq!(output.program(0), &[4.0, 9.0]);
//!
//! // The same program, compiled on its own.
//! let mut program = Program::default();
//! store.copy_program_to(0, &mut program);
//! let compiled = CompiledProgram::<f64>::new(&catalog, &program, 1).unwrap();
//! assert_eq!(compiled.call(&[5.0]), vec![25.0]);
//! ```

/// Machine code generation: the dispatch engine, the I/O layout and the
/// standalone compiler.
pub mod codegen;
mod catalog;
mod element;
mod error;
/// Dead code elimination.
pub mod intron;
mod program;
mod samples;
mod store;
/// Register identities and the operand trace protocol.
pub mod trace;

pub use catalog::{
    BitCountOp, Catalog, CatalogOptions, FloatForm, FloatOp, Instruction, IntOp, Mnemonic,
    OpcodeTable, UnaryOp,
};
pub use element::{Element, ElementKind, VECTOR_BYTES};
pub use error::{Error, Result};
pub use program::{Listing, Program};
pub use samples::SampleSet;
pub use store::{Partition, ProgramStore};

/// Index into a [Catalog], or a sentinel.
pub type Opcode = u16;

/// Marks the end of a program. Stores its output and moves on to the next row
/// or program.
pub const END: Opcode = 0;

/// Marks the end of a thread partition, returning to the host.
pub const HALT: Opcode = 1;

/// The lowest opcode that is an instruction.
pub const FIRST_INSTRUCTION: Opcode = 2;

/// Whether `opcode` is [END] or [HALT].
#[inline]
pub fn is_sentinel(opcode: Opcode) -> bool {
    opcode < FIRST_INSTRUCTION
}
