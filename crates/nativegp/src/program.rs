use crate::{Catalog, Opcode};

use std::fmt;

/// A standalone program, owned independently of any [ProgramStore](crate::ProgramStore).
///
/// Contains no sentinels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Program {
    opcodes: Vec<Opcode>,
}

impl Program {
    /// Create a program from instruction opcodes.
    pub fn new(opcodes: Vec<Opcode>) -> Self {
        Self { opcodes }
    }

    /// The instruction opcodes.
    pub fn opcodes(&self) -> &[Opcode] {
        &self.opcodes
    }

    pub(crate) fn opcodes_mut(&mut self) -> &mut Vec<Opcode> {
        &mut self.opcodes
    }

    /// Amount of instructions.
    pub fn len(&self) -> usize {
        self.opcodes.len()
    }

    /// Whether the program has no instructions.
    pub fn is_empty(&self) -> bool {
        self.opcodes.is_empty()
    }

    /// Render as assembly, one instruction per line.
    pub fn listing<'a>(&'a self, catalog: &'a Catalog) -> Listing<'a> {
        Listing {
            program: self,
            catalog,
        }
    }
}

impl From<Vec<Opcode>> for Program {
    fn from(opcodes: Vec<Opcode>) -> Self {
        Self::new(opcodes)
    }
}

/// Returned by [Program::listing].
pub struct Listing<'a> {
    program: &'a Program,
    catalog: &'a Catalog,
}

impl fmt::Display for Listing<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &opcode in self.program.opcodes() {
            match self.catalog.instruction(opcode) {
                Some(inst) => writeln!(f, "{inst}")?,
                None => writeln!(f, "; invalid opcode {opcode}")?,
            }
        }
        Ok(())
    }
}
