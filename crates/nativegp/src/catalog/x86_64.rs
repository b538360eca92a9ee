use crate::{
    catalog::Mnemonic,
    trace::{BitRange, ControlField, Gpr, StatusFlags, Trace, Tracer, Xmm},
};

use dynasmrt::{dynasm, x64::Assembler, DynasmApi};

use std::fmt;

const QWORD: BitRange = BitRange::low(64);
const OWORD: BitRange = BitRange::low(128);

/// Length of `div r64` with one of the catalog divisors.
const DIV_LEN: u8 = 3;

/// One concrete machine instruction, operands included.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Instruction {
    /// Does nothing.
    Nop,
    /// `op dst, src` on 64 bit general purpose registers.
    Int { op: IntOp, dst: Gpr, src: Gpr },
    /// `op reg` on a 64 bit general purpose register.
    Unary { op: UnaryOp, reg: Gpr },
    /// `op dst, src` bit counting.
    BitCount { op: BitCountOp, dst: Gpr, src: Gpr },
    /// Unsigned division of `rdx:rax` by `src`. When `guarded`, `rdx` is
    /// cleared first and the division is skipped for a zero divisor, so it
    /// can not fault.
    Div { src: Gpr, guarded: bool },
    /// `op dst, src` on SSE registers.
    Float {
        op: FloatOp,
        form: FloatForm,
        dst: Xmm,
        src: Xmm,
    },
    /// `movaps dst, src`
    MoveAll { dst: Xmm, src: Xmm },
    /// `movss`/`movsd dst, src`, leaving the upper part of `dst` intact.
    MoveLow { form: FloatForm, dst: Xmm, src: Xmm },
}

/// Two operand integer operations.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntOp {
    Mov,
    Add,
    Sub,
    Imul,
    And,
    Or,
    Xor,
}

/// Single operand integer operations.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
    Inc,
    Dec,
}

/// Bit counting operations, each behind its own CPU feature.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BitCountOp {
    Popcnt,
    Lzcnt,
    Tzcnt,
}

/// SSE arithmetic.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatOp {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
    Sqrt,
}

/// Which part of an SSE register an instruction operates on, and how.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatForm {
    /// Low `f32`.
    ScalarSingle,
    /// Low `f64`.
    ScalarDouble,
    /// Four `f32`.
    PackedSingle,
    /// Two `f64`.
    PackedDouble,
}

impl FloatForm {
    /// The bits of the register read and written.
    pub fn range(self) -> BitRange {
        match self {
            Self::ScalarSingle => BitRange::low(32),
            Self::ScalarDouble => QWORD,
            Self::PackedSingle | Self::PackedDouble => OWORD,
        }
    }

    /// Whether only the lowest element is touched.
    pub fn is_scalar(self) -> bool {
        matches!(self, Self::ScalarSingle | Self::ScalarDouble)
    }

    fn suffix(self) -> &'static str {
        match self {
            Self::ScalarSingle => "ss",
            Self::ScalarDouble => "sd",
            Self::PackedSingle => "ps",
            Self::PackedDouble => "pd",
        }
    }
}

macro_rules! sse {
    ($ops:ident, $form:expr, $dst:expr, $src:expr, $ss:ident, $sd:ident, $ps:ident, $pd:ident) => {
        match $form {
            FloatForm::ScalarSingle => dynasm!($ops; $ss Rx($dst), Rx($src)),
            FloatForm::ScalarDouble => dynasm!($ops; $sd Rx($dst), Rx($src)),
            FloatForm::PackedSingle => dynasm!($ops; $ps Rx($dst), Rx($src)),
            FloatForm::PackedDouble => dynasm!($ops; $pd Rx($dst), Rx($src)),
        }
    };
}

impl Instruction {
    /// Append the machine code of this instruction.
    pub fn encode(self, ops: &mut Assembler) {
        match self {
            Self::Nop => (),
            Self::Int { op, dst, src } => {
                let (d, s) = (dst.code(), src.code());
                match op {
                    IntOp::Mov => dynasm!(ops; mov Rq(d), Rq(s)),
                    IntOp::Add => dynasm!(ops; add Rq(d), Rq(s)),
                    IntOp::Sub => dynasm!(ops; sub Rq(d), Rq(s)),
                    IntOp::Imul => dynasm!(ops; imul Rq(d), Rq(s)),
                    IntOp::And => dynasm!(ops; and Rq(d), Rq(s)),
                    IntOp::Or => dynasm!(ops; or Rq(d), Rq(s)),
                    IntOp::Xor => dynasm!(ops; xor Rq(d), Rq(s)),
                }
            }
            Self::Unary { op, reg } => {
                let r = reg.code();
                match op {
                    UnaryOp::Neg => dynasm!(ops; neg Rq(r)),
                    UnaryOp::Not => dynasm!(ops; not Rq(r)),
                    UnaryOp::Inc => dynasm!(ops; inc Rq(r)),
                    UnaryOp::Dec => dynasm!(ops; dec Rq(r)),
                }
            }
            Self::BitCount { op, dst, src } => {
                let (d, s) = (dst.code(), src.code());
                match op {
                    BitCountOp::Popcnt => dynasm!(ops; popcnt Rq(d), Rq(s)),
                    BitCountOp::Lzcnt => dynasm!(ops; lzcnt Rq(d), Rq(s)),
                    BitCountOp::Tzcnt => dynasm!(ops; tzcnt Rq(d), Rq(s)),
                }
            }
            Self::Div { src, guarded } => {
                let s = src.code();
                if guarded {
                    dynasm!(ops
                        ; xor edx, edx
                        ; test Rq(s), Rq(s)
                    );
                    // jz rel8 over the division
                    ops.push(0x74);
                    ops.push(DIV_LEN);
                    let start = ops.offset().0;
                    dynasm!(ops; div Rq(s));
                    debug_assert_eq!(ops.offset().0 - start, usize::from(DIV_LEN));
                } else {
                    dynasm!(ops; div Rq(s));
                }
            }
            Self::Float { op, form, dst, src } => {
                let (d, s) = (dst.code(), src.code());
                match op {
                    FloatOp::Add => sse!(ops, form, d, s, addss, addsd, addps, addpd),
                    FloatOp::Sub => sse!(ops, form, d, s, subss, subsd, subps, subpd),
                    FloatOp::Mul => sse!(ops, form, d, s, mulss, mulsd, mulps, mulpd),
                    FloatOp::Div => sse!(ops, form, d, s, divss, divsd, divps, divpd),
                    FloatOp::Min => sse!(ops, form, d, s, minss, minsd, minps, minpd),
                    FloatOp::Max => sse!(ops, form, d, s, maxss, maxsd, maxps, maxpd),
                    FloatOp::Sqrt => sse!(ops, form, d, s, sqrtss, sqrtsd, sqrtps, sqrtpd),
                }
            }
            Self::MoveAll { dst, src } => dynasm!(ops; movaps Rx(dst.code()), Rx(src.code())),
            Self::MoveLow { form, dst, src } => {
                let (d, s) = (dst.code(), src.code());
                match form {
                    FloatForm::ScalarSingle => dynasm!(ops; movss Rx(d), Rx(s)),
                    _ => dynasm!(ops; movsd Rx(d), Rx(s)),
                }
            }
        }
    }

    /// Whether the host CPU can execute this instruction with its documented
    /// semantics.
    pub fn is_supported(self) -> bool {
        match self {
            Self::BitCount { op, .. } => match op {
                BitCountOp::Popcnt => std::is_x86_feature_detected!("popcnt"),
                BitCountOp::Lzcnt => std::is_x86_feature_detected!("lzcnt"),
                BitCountOp::Tzcnt => std::is_x86_feature_detected!("bmi1"),
            },
            // SSE2 is part of the x86-64 baseline.
            _ => true,
        }
    }

    /// Whether executing this instruction can fault the host.
    pub fn is_unsafe(self) -> bool {
        matches!(self, Self::Div { guarded: false, .. })
    }

    /// The allow-list entry this instruction belongs to.
    pub fn mnemonic(self) -> Mnemonic {
        match self {
            Self::Nop => Mnemonic::Nop,
            Self::Int { op, .. } => match op {
                IntOp::Mov => Mnemonic::Mov,
                IntOp::Add => Mnemonic::Add,
                IntOp::Sub => Mnemonic::Sub,
                IntOp::Imul => Mnemonic::Imul,
                IntOp::And => Mnemonic::And,
                IntOp::Or => Mnemonic::Or,
                IntOp::Xor => Mnemonic::Xor,
            },
            Self::Unary { op, .. } => match op {
                UnaryOp::Neg => Mnemonic::Neg,
                UnaryOp::Not => Mnemonic::Not,
                UnaryOp::Inc => Mnemonic::Inc,
                UnaryOp::Dec => Mnemonic::Dec,
            },
            Self::BitCount { op, .. } => match op {
                BitCountOp::Popcnt => Mnemonic::Popcnt,
                BitCountOp::Lzcnt => Mnemonic::Lzcnt,
                BitCountOp::Tzcnt => Mnemonic::Tzcnt,
            },
            Self::Div { .. } => Mnemonic::Div,
            Self::Float { op, .. } => match op {
                FloatOp::Add => Mnemonic::FAdd,
                FloatOp::Sub => Mnemonic::FSub,
                FloatOp::Mul => Mnemonic::FMul,
                FloatOp::Div => Mnemonic::FDiv,
                FloatOp::Min => Mnemonic::FMin,
                FloatOp::Max => Mnemonic::FMax,
                FloatOp::Sqrt => Mnemonic::FSqrt,
            },
            Self::MoveAll { .. } => Mnemonic::Movaps,
            Self::MoveLow { .. } => Mnemonic::MovLow,
        }
    }
}

impl Trace for Instruction {
    fn trace<T: Tracer>(&self, tracer: &mut T) {
        match *self {
            Self::Nop => (),
            Self::Int {
                op: IntOp::Mov,
                dst,
                src,
            } => {
                tracer.read(src.into(), QWORD);
                tracer.write(dst.into(), QWORD, true);
            }
            Self::Int { op, dst, src } => {
                // `xor r, r` and `sub r, r` do not depend on `r`.
                let zeroing = dst == src && matches!(op, IntOp::Xor | IntOp::Sub);
                if !zeroing {
                    tracer.read(dst.into(), QWORD);
                    tracer.read(src.into(), QWORD);
                }
                tracer.write(dst.into(), QWORD, true);
                tracer.status_write(StatusFlags::ARITHMETIC);
            }
            Self::Unary { op, reg } => {
                tracer.read(reg.into(), QWORD);
                tracer.write(reg.into(), QWORD, true);
                match op {
                    UnaryOp::Neg => tracer.status_write(StatusFlags::ARITHMETIC),
                    UnaryOp::Not => (),
                    UnaryOp::Inc | UnaryOp::Dec => {
                        tracer.implicit_immediate(if op == UnaryOp::Inc { 1 } else { -1 });
                        tracer.status_write(StatusFlags::ARITHMETIC.without(StatusFlags::CARRY));
                    }
                }
            }
            Self::BitCount { dst, src, .. } => {
                tracer.read(src.into(), QWORD);
                tracer.write(dst.into(), QWORD, true);
                tracer.status_write(StatusFlags::ARITHMETIC);
            }
            Self::Div { src, guarded } => {
                tracer.read(Gpr::Rax.into(), QWORD);
                tracer.read(src.into(), QWORD);
                if !guarded {
                    tracer.read(Gpr::Rdx.into(), QWORD);
                }
                tracer.write(Gpr::Rax.into(), QWORD, !guarded);
                tracer.write(Gpr::Rdx.into(), QWORD, true);
                tracer.status_write(StatusFlags::ARITHMETIC);
            }
            Self::Float { op, form, dst, src } => {
                let range = form.range();
                if op != FloatOp::Sqrt {
                    tracer.read(dst.into(), range);
                }
                tracer.read(src.into(), range);
                tracer.write(dst.into(), range, true);
                tracer.control_read(ControlField::Mxcsr);
            }
            Self::MoveAll { dst, src } => {
                tracer.read(src.into(), OWORD);
                tracer.write(dst.into(), OWORD, true);
            }
            Self::MoveLow { form, dst, src } => {
                tracer.read(src.into(), form.range());
                tracer.write(dst.into(), form.range(), true);
            }
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Nop => f.write_str("nop"),
            Self::Int { op, dst, src } => {
                let name = match op {
                    IntOp::Mov => "mov",
                    IntOp::Add => "add",
                    IntOp::Sub => "sub",
                    IntOp::Imul => "imul",
                    IntOp::And => "and",
                    IntOp::Or => "or",
                    IntOp::Xor => "xor",
                };
                write!(f, "{name} {dst}, {src}")
            }
            Self::Unary { op, reg } => {
                let name = match op {
                    UnaryOp::Neg => "neg",
                    UnaryOp::Not => "not",
                    UnaryOp::Inc => "inc",
                    UnaryOp::Dec => "dec",
                };
                write!(f, "{name} {reg}")
            }
            Self::BitCount { op, dst, src } => {
                let name = match op {
                    BitCountOp::Popcnt => "popcnt",
                    BitCountOp::Lzcnt => "lzcnt",
                    BitCountOp::Tzcnt => "tzcnt",
                };
                write!(f, "{name} {dst}, {src}")
            }
            Self::Div { src, guarded } => {
                write!(f, "div {src}")?;
                if guarded {
                    f.write_str(" ; zero guarded")?;
                }
                Ok(())
            }
            Self::Float { op, form, dst, src } => {
                let name = match op {
                    FloatOp::Add => "add",
                    FloatOp::Sub => "sub",
                    FloatOp::Mul => "mul",
                    FloatOp::Div => "div",
                    FloatOp::Min => "min",
                    FloatOp::Max => "max",
                    FloatOp::Sqrt => "sqrt",
                };
                write!(f, "{name}{} {dst}, {src}", form.suffix())
            }
            Self::MoveAll { dst, src } => write!(f, "movaps {dst}, {src}"),
            Self::MoveLow { form, dst, src } => write!(f, "mov{} {dst}, {src}", form.suffix()),
        }
    }
}
