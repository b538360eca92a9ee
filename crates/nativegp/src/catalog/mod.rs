use crate::{
    element::ElementKind,
    trace::{Gpr, Trace, Xmm},
    Error, Opcode, Result, FIRST_INSTRUCTION,
};

use std::{collections::BTreeSet, ops::Range};

#[cfg(target_arch = "x86_64")]
mod x86_64;
#[cfg(target_arch = "x86_64")]
pub use x86_64::{BitCountOp, FloatForm, FloatOp, Instruction, IntOp, UnaryOp};

#[cfg(not(any(target_arch = "x86_64")))]
compile_error!("unsupported architecture for nativegp");

/// Instruction families, as used by the allow-lists.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Mnemonic {
    Nop,

    Mov,
    Add,
    Sub,
    Imul,
    And,
    Or,
    Xor,
    Neg,
    Not,
    Inc,
    Dec,
    Popcnt,
    Lzcnt,
    Tzcnt,
    Div,

    Movaps,
    /// `movss` or `movsd`, depending on the element type.
    MovLow,
    FAdd,
    FSub,
    FMul,
    FDiv,
    FMin,
    FMax,
    FSqrt,
}

impl Mnemonic {
    /// Every mnemonic the catalog knows about.
    pub const ALL: [Mnemonic; 25] = [
        Self::Nop,
        Self::Mov,
        Self::Add,
        Self::Sub,
        Self::Imul,
        Self::And,
        Self::Or,
        Self::Xor,
        Self::Neg,
        Self::Not,
        Self::Inc,
        Self::Dec,
        Self::Popcnt,
        Self::Lzcnt,
        Self::Tzcnt,
        Self::Div,
        Self::Movaps,
        Self::MovLow,
        Self::FAdd,
        Self::FSub,
        Self::FMul,
        Self::FDiv,
        Self::FMin,
        Self::FMax,
        Self::FSqrt,
    ];

    /// Whether this only copies a register. Moves have their own allow-list.
    pub fn is_move(self) -> bool {
        matches!(self, Self::Mov | Self::Movaps | Self::MovLow)
    }

    /// Whether this operates on SSE registers.
    pub fn is_float(self) -> bool {
        matches!(
            self,
            Self::Movaps
                | Self::MovLow
                | Self::FAdd
                | Self::FSub
                | Self::FMul
                | Self::FDiv
                | Self::FMin
                | Self::FMax
                | Self::FSqrt
        )
    }

    fn fits(self, element: ElementKind) -> bool {
        self == Self::Nop || self.is_float() == element.is_float()
    }
}

/// Controls which instructions end up in a [Catalog].
#[derive(Debug, Clone)]
pub struct CatalogOptions {
    /// Element type of the samples the programs are evaluated on.
    pub element: ElementKind,
    /// Whether every sample row holds a full vector of elements.
    pub vectorized: bool,
    /// Non-move mnemonics to include. `None` includes every mnemonic that fits
    /// the element type.
    pub instructions: Option<Vec<Mnemonic>>,
    /// Move mnemonics to include. `None` includes every move that fits the
    /// element type.
    pub moves: Option<Vec<Mnemonic>>,
    /// Keep instructions that can fault the host.
    pub allow_unsafe: bool,
    /// Keep instructions the host CPU does not support.
    pub allow_unsupported: bool,
    /// Use division encodings that can not fault.
    pub safe_division: bool,
}

impl CatalogOptions {
    /// Default options for the given element type.
    pub fn new(element: ElementKind) -> Self {
        Self {
            element,
            vectorized: false,
            instructions: None,
            moves: None,
            allow_unsafe: false,
            allow_unsupported: false,
            safe_division: true,
        }
    }

    fn selected(&self) -> BTreeSet<Mnemonic> {
        let instructions = self
            .instructions
            .as_deref()
            .map_or_else(|| Mnemonic::ALL.to_vec(), <[_]>::to_vec);
        let moves = self
            .moves
            .as_deref()
            .map_or_else(|| Mnemonic::ALL.to_vec(), <[_]>::to_vec);

        instructions
            .into_iter()
            .filter(|m| !m.is_move())
            .chain(moves.into_iter().filter(|m| m.is_move()))
            .filter(|m| m.fits(self.element))
            .collect()
    }

    fn float_form(&self) -> FloatForm {
        match (self.element, self.vectorized) {
            (ElementKind::F32, false) => FloatForm::ScalarSingle,
            (ElementKind::F32, true) => FloatForm::PackedSingle,
            (_, false) => FloatForm::ScalarDouble,
            (_, true) => FloatForm::PackedDouble,
        }
    }
}

/// Maps opcodes to concrete instructions.
///
/// Opcode `END` and `HALT` are reserved, instruction `i` has opcode
/// `FIRST_INSTRUCTION + i`.
#[derive(Debug, Clone)]
pub struct Catalog {
    instructions: Vec<Instruction>,
    element: ElementKind,
    vectorized: bool,
}

impl Catalog {
    /// Expand the selected mnemonics over the register file and filter the
    /// result for the host.
    pub fn build(options: &CatalogOptions) -> Result<Self> {
        if options.vectorized && !options.element.is_float() {
            return Err(Error::UnsupportedVector(options.element));
        }

        let form = options.float_form();
        let mut instructions = vec![];
        let mut unsupported = BTreeSet::new();

        for mnemonic in options.selected() {
            for inst in expand(mnemonic, form, options.safe_division) {
                if inst.is_unsafe() && !options.allow_unsafe {
                    tracing::debug!(%inst, "skipping unsafe instruction");
                    continue;
                }
                if !inst.is_supported() && !options.allow_unsupported {
                    unsupported.insert(mnemonic);
                    continue;
                }
                instructions.push(inst);
            }
        }

        for mnemonic in unsupported {
            tracing::warn!(?mnemonic, "host does not support instruction, dropping it");
        }

        Self::from_instructions(options.element, options.vectorized, instructions)
    }

    /// Use exactly the given instructions, in order.
    pub fn from_instructions(
        element: ElementKind,
        vectorized: bool,
        instructions: Vec<Instruction>,
    ) -> Result<Self> {
        if instructions.is_empty() {
            return Err(Error::EmptyCatalog);
        }
        if instructions.len() > usize::from(Opcode::MAX - FIRST_INSTRUCTION) {
            return Err(Error::CatalogTooLarge(instructions.len()));
        }

        tracing::debug!(
            instructions = instructions.len(),
            ?element,
            vectorized,
            "built instruction catalog"
        );

        Ok(Self {
            instructions,
            element,
            vectorized,
        })
    }

    /// Amount of instructions, excluding sentinels.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Always false, an empty catalog can not be built.
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Amount of opcodes, including sentinels.
    pub fn opcode_count(&self) -> usize {
        self.instructions.len() + usize::from(FIRST_INSTRUCTION)
    }

    /// Opcodes that map to instructions.
    pub fn instruction_opcodes(&self) -> Range<Opcode> {
        FIRST_INSTRUCTION..self.opcode_count() as Opcode
    }

    /// Returns `None` for sentinels and out of range opcodes.
    pub fn instruction(&self, opcode: Opcode) -> Option<Instruction> {
        let idx = opcode.checked_sub(FIRST_INSTRUCTION)?;
        self.instructions.get(usize::from(idx)).copied()
    }

    /// The opcode of the first occurrence of `instruction`.
    pub fn opcode(&self, instruction: Instruction) -> Option<Opcode> {
        self.instructions
            .iter()
            .position(|&inst| inst == instruction)
            .map(|idx| idx as Opcode + FIRST_INSTRUCTION)
    }

    /// Every instruction with its opcode.
    pub fn iter(&self) -> impl Iterator<Item = (Opcode, Instruction)> + '_ {
        self.instruction_opcodes().zip(self.instructions.iter().copied())
    }

    /// Element type the catalog was built for.
    pub fn element(&self) -> ElementKind {
        self.element
    }

    /// Whether the catalog was built for vectorized samples.
    pub fn vectorized(&self) -> bool {
        self.vectorized
    }
}

/// Lookup of traceable instructions by opcode.
pub trait OpcodeTable {
    /// The instruction type.
    type Instruction: Trace;

    /// Returns `None` for sentinels and unknown opcodes.
    fn lookup(&self, opcode: Opcode) -> Option<Self::Instruction>;
}

impl OpcodeTable for Catalog {
    type Instruction = Instruction;

    fn lookup(&self, opcode: Opcode) -> Option<Instruction> {
        self.instruction(opcode)
    }
}

fn pairs<R: Copy + PartialEq>(regs: &[R], allow_same: bool) -> impl Iterator<Item = (R, R)> + '_ {
    regs.iter()
        .flat_map(move |&dst| regs.iter().map(move |&src| (dst, src)))
        .filter(move |(dst, src)| allow_same || dst != src)
}

fn expand(mnemonic: Mnemonic, form: FloatForm, safe_division: bool) -> Vec<Instruction> {
    use Mnemonic::*;

    let int = |op: IntOp| -> Vec<Instruction> {
        pairs(&Gpr::ALL, op != IntOp::Mov)
            .map(move |(dst, src)| Instruction::Int { op, dst, src })
            .collect()
    };
    let unary = |op: UnaryOp| -> Vec<Instruction> {
        Gpr::ALL
            .iter()
            .map(|&reg| Instruction::Unary { op, reg })
            .collect()
    };
    let bit_count = |op: BitCountOp| -> Vec<Instruction> {
        pairs(&Gpr::ALL, true)
            .map(move |(dst, src)| Instruction::BitCount { op, dst, src })
            .collect()
    };
    let float = |op: FloatOp| -> Vec<Instruction> {
        pairs(&Xmm::ALL, true)
            .map(move |(dst, src)| Instruction::Float { op, form, dst, src })
            .collect()
    };

    match mnemonic {
        Nop => vec![Instruction::Nop],
        Mov => int(IntOp::Mov),
        Add => int(IntOp::Add),
        Sub => int(IntOp::Sub),
        Imul => int(IntOp::Imul),
        And => int(IntOp::And),
        Or => int(IntOp::Or),
        Xor => int(IntOp::Xor),
        Neg => unary(UnaryOp::Neg),
        Not => unary(UnaryOp::Not),
        Inc => unary(UnaryOp::Inc),
        Dec => unary(UnaryOp::Dec),
        Popcnt => bit_count(BitCountOp::Popcnt),
        Lzcnt => bit_count(BitCountOp::Lzcnt),
        Tzcnt => bit_count(BitCountOp::Tzcnt),
        // `rax` and `rdx` are the implicit dividend.
        Div => [Gpr::Rcx, Gpr::Rsi]
            .into_iter()
            .map(|src| Instruction::Div {
                src,
                guarded: safe_division,
            })
            .collect(),
        Movaps => pairs(&Xmm::ALL, false)
            .map(|(dst, src)| Instruction::MoveAll { dst, src })
            .collect(),
        MovLow if form.is_scalar() => pairs(&Xmm::ALL, false)
            .map(|(dst, src)| Instruction::MoveLow { form, dst, src })
            .collect(),
        MovLow => vec![],
        FAdd => float(FloatOp::Add),
        FSub => float(FloatOp::Sub),
        FMul => float(FloatOp::Mul),
        FDiv => float(FloatOp::Div),
        FMin => float(FloatOp::Min),
        FMax => float(FloatOp::Max),
        FSqrt => float(FloatOp::Sqrt),
    }
}
