use std::fmt;

/// General purpose registers that catalog instructions may touch.
///
/// The remaining general purpose registers are reserved by the dispatch engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Gpr {
    /// `rax`, also the output register for scalar integer samples.
    Rax,
    /// `rcx`
    Rcx,
    /// `rdx`
    Rdx,
    /// `rsi`
    Rsi,
}

impl Gpr {
    /// The register file, in input column order.
    pub const ALL: [Gpr; 4] = [Gpr::Rax, Gpr::Rcx, Gpr::Rdx, Gpr::Rsi];

    /// Hardware register number.
    pub fn code(self) -> u8 {
        match self {
            Self::Rax => 0,
            Self::Rcx => 1,
            Self::Rdx => 2,
            Self::Rsi => 6,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Rax => "rax",
            Self::Rcx => "rcx",
            Self::Rdx => "rdx",
            Self::Rsi => "rsi",
        }
    }
}

/// An SSE register from the catalog register file (`xmm0`..`xmm3`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Xmm(u8);

impl Xmm {
    /// The register file, in input column order.
    pub const ALL: [Xmm; 4] = [Xmm(0), Xmm(1), Xmm(2), Xmm(3)];

    /// Returns `None` when `idx` is outside the register file.
    pub fn new(idx: u8) -> Option<Self> {
        (usize::from(idx) < Self::ALL.len()).then_some(Self(idx))
    }

    /// Hardware register number.
    pub fn code(self) -> u8 {
        self.0
    }
}

/// Any register an instruction can read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Register {
    /// A general purpose register.
    Gpr(Gpr),
    /// An SSE register.
    Xmm(Xmm),
}

impl Register {
    /// Width of the whole register in bits.
    pub fn bits(self) -> u16 {
        match self {
            Self::Gpr(_) => 64,
            Self::Xmm(_) => 128,
        }
    }

    /// The range covering the whole register.
    pub fn full_range(self) -> BitRange {
        BitRange::low(self.bits())
    }
}

impl From<Gpr> for Register {
    fn from(reg: Gpr) -> Self {
        Self::Gpr(reg)
    }
}

impl From<Xmm> for Register {
    fn from(reg: Xmm) -> Self {
        Self::Xmm(reg)
    }
}

impl fmt::Display for Gpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for Xmm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "xmm{}", self.0)
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gpr(reg) => reg.fmt(f),
            Self::Xmm(reg) => reg.fmt(f),
        }
    }
}

/// Half-open span of bits `start..end` within a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BitRange {
    /// First bit.
    pub start: u16,
    /// One past the last bit.
    pub end: u16,
}

impl BitRange {
    /// # Panics
    /// If the range is empty.
    pub const fn new(start: u16, end: u16) -> Self {
        assert!(start < end, "empty bit range");
        Self { start, end }
    }

    /// The lowest `bits` bits.
    pub const fn low(bits: u16) -> Self {
        Self::new(0, bits)
    }

    /// Whether every bit of `other` is also in `self`.
    pub fn contains(self, other: Self) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Smallest range containing both.
    pub fn cover(self, other: Self) -> Self {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// Amount of bits in the range.
    pub fn len(self) -> u16 {
        self.end - self.start
    }
}

impl fmt::Display for BitRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}..{})", self.start, self.end)
    }
}

/// Set of arithmetic status flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusFlags(u8);

impl StatusFlags {
    /// CF
    pub const CARRY: Self = Self(1 << 0);
    /// PF
    pub const PARITY: Self = Self(1 << 1);
    /// AF
    pub const ADJUST: Self = Self(1 << 2);
    /// ZF
    pub const ZERO: Self = Self(1 << 3);
    /// SF
    pub const SIGN: Self = Self(1 << 4);
    /// OF
    pub const OVERFLOW: Self = Self(1 << 5);
    /// Every flag written by ordinary integer arithmetic.
    pub const ARITHMETIC: Self = Self(0x3f);

    /// Flags in `self` but not in `other`.
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Whether `other` is a subset of `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Control and status fields that are not general registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlField {
    /// SSE rounding mode and exception masks.
    Mxcsr,
}

/// Receives the operands an instruction reads and writes.
///
/// Implementations that cannot deal with memory operands are expected to fail
/// once one of the memory callbacks has been invoked.
pub trait Tracer {
    /// The instruction reads `range` of `register`.
    fn read(&mut self, register: Register, range: BitRange);

    /// The instruction writes `range` of `register`. `always` is false when the
    /// write depends on a runtime condition.
    fn write(&mut self, register: Register, range: BitRange, always: bool);

    /// The instruction uses an immediate that is implied by its encoding.
    fn implicit_immediate(&mut self, _value: i64) {}

    /// The instruction reads status flags.
    fn status_read(&mut self, _flags: StatusFlags) {}

    /// The instruction writes status flags.
    fn status_write(&mut self, _flags: StatusFlags) {}

    /// The instruction depends on a control field.
    fn control_read(&mut self, _field: ControlField) {}

    /// The instruction reads `width` bits of memory.
    fn memory_read(&mut self, width: u16);

    /// The instruction writes `width` bits of memory.
    fn memory_write(&mut self, width: u16);
}

/// Something that can describe its operands to a [Tracer].
pub trait Trace {
    /// Report every read and write, explicit and implicit.
    fn trace<T: Tracer>(&self, tracer: &mut T);
}
