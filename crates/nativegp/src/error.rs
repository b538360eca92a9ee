use crate::{element::ElementKind, Opcode};

use thiserror::Error;

/// Errors produced while building or manipulating programs.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A sentinel opcode was about to be written into an instruction slot.
    #[error("opcode {opcode} is a sentinel and can not be used as an instruction")]
    SentinelOpcode {
        /// The offending opcode.
        opcode: Opcode,
    },

    /// The program store was initialized twice.
    #[error("program store is already initialized")]
    AlreadyInitialized,

    /// The program count is not a multiple of the thread count.
    #[error("{programs} programs can not be split evenly over {threads} threads")]
    UnevenPartition {
        /// Amount of programs.
        programs: usize,
        /// Amount of threads.
        threads: usize,
    },

    /// A size that must be at least one was zero.
    #[error("{0} must not be zero")]
    Zero(&'static str),

    /// The sample rows can not be grouped into vector rows.
    #[error("{rows} sample rows is not a multiple of {lanes} lanes")]
    RaggedVectorRows {
        /// Amount of scalar rows.
        rows: usize,
        /// Lanes per vector row.
        lanes: usize,
    },

    /// A sample row has a different amount of inputs than the first one.
    #[error("sample row {row} has {found} inputs, expected {expected}")]
    ArityMismatch {
        /// Index of the row.
        row: usize,
        /// Amount of inputs in the row.
        found: usize,
        /// Amount of inputs in the first row.
        expected: usize,
    },

    /// There are more input columns than registers to load them into.
    #[error("input arity {0} exceeds the register file")]
    ArityTooLarge(usize),

    /// A stride or offset does not fit a 32 bit displacement.
    #[error("I/O region too large to address with 32 bit displacements")]
    RegionTooLarge,

    /// Vectorized samples are only supported for floating point elements.
    #[error("vectorized samples of {0:?} are not supported")]
    UnsupportedVector(ElementKind),

    /// No instruction survived filtering.
    #[error("instruction catalog is empty")]
    EmptyCatalog,

    /// The catalog does not fit in the 16 bit opcode space.
    #[error("instruction catalog has {0} entries, which exceeds the opcode space")]
    CatalogTooLarge(usize),

    /// An instruction and the dispatch epilog did not fit in one table cell.
    #[error("cell for opcode {opcode} needs {size} bytes")]
    CellOverflow {
        /// The opcode.
        opcode: Opcode,
        /// Bytes needed.
        size: usize,
    },

    /// Runtime assembler failure.
    #[error("assembler failure: {0}")]
    Assembler(String),

    /// Memory for machine code could not be allocated.
    #[error("failed to allocate executable memory")]
    Io(#[from] std::io::Error),

    /// The intron eliminator met an instruction with a memory operand.
    #[error("instruction at {position} has a memory operand")]
    MemoryOperand {
        /// Index of the instruction in the program.
        position: usize,
    },

    /// An opcode outside of the catalog.
    #[error("opcode {0} is not in the catalog")]
    UnknownOpcode(Opcode),

    /// The catalog was built for another element type or mode than the I/O
    /// layout.
    #[error("catalog and I/O layout disagree on element type or vectorization")]
    LayoutMismatch,
}

/// Alias with this crate's [Error].
pub type Result<T> = std::result::Result<T, Error>;
