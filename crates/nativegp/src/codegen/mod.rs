mod io;
mod standalone;
mod trampoline;

pub use io::{IoLayout, ProgramSetInput, ProgramSetOutput};
pub use standalone::CompiledProgram;
pub use trampoline::{Trampoline, CELL_SIZE};

/// Extra code emitted around every instruction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Instrumentation {
    /// Only the instructions themselves.
    #[default]
    None,
    /// Count executed instructions, returned by [Trampoline::run].
    CountInstructions,
}
