use crate::{
    trace::{BitRange, Gpr, Register, Trace, Tracer, Xmm},
    Error, OpcodeTable, Program, Result,
};

use arrayvec::ArrayVec;
use bitvec::prelude::*;

const REGISTERS: usize = Gpr::ALL.len() + Xmm::ALL.len();

/// Uncovered bits per register: bits whose value still reaches the output.
type Liveness = ArrayVec<(Register, BitRange), REGISTERS>;

/// Remove every instruction of `program` that can not influence `range` of
/// `output`.
///
/// Works backwards from the output, tracking which bits of which registers
/// are still needed. An instruction is kept when it writes needed bits, at
/// which point the bits it reads become needed. Instructions that access
/// memory are not supported.
pub fn eliminate_introns<T: OpcodeTable>(
    table: &T,
    program: &Program,
    output: Register,
    range: BitRange,
) -> Result<Program> {
    let opcodes = program.opcodes();
    let mut liveness = Liveness::new();
    liveness.push((output, range));

    let (_, live) = opcodes.iter().enumerate().rev().try_fold(
        (liveness, bitvec![0; opcodes.len()]),
        |(liveness, mut live), (position, &opcode)| {
            let inst = table.lookup(opcode).ok_or(Error::UnknownOpcode(opcode))?;
            let (liveness, is_live) = step(liveness, &inst, position)?;
            live.set(position, is_live);
            Ok::<_, Error>((liveness, live))
        },
    )?;

    let kept: Vec<_> = live.iter_ones().map(|i| opcodes[i]).collect();
    tracing::trace!(before = opcodes.len(), after = kept.len(), "eliminated introns");

    Ok(Program::new(kept))
}

fn step<I: Trace>(mut liveness: Liveness, inst: &I, position: usize) -> Result<(Liveness, bool)> {
    let mut operands = Operands::default();
    inst.trace(&mut operands);
    if operands.memory {
        return Err(Error::MemoryOperand { position });
    }

    let mut is_live = false;
    for &(register, written, always) in &operands.writes {
        let Some(idx) = liveness.iter().position(|&(r, _)| r == register) else {
            continue;
        };
        let uncovered = liveness[idx].1;
        if !overlaps(written, uncovered) {
            continue;
        }
        is_live = true;

        if !always {
            continue;
        }
        if written.contains(uncovered) {
            liveness.swap_remove(idx);
        } else if uncovered == BitRange::low(16) && written == BitRange::low(8) {
            liveness[idx].1 = BitRange::new(8, 16);
        } else if uncovered == BitRange::low(128) && written == BitRange::low(64) {
            liveness[idx].1 = BitRange::new(64, 128);
        }
        // Any other partial overlap keeps the instruction and the whole range.
    }

    if is_live {
        for &(register, read) in &operands.reads {
            match liveness.iter_mut().find(|(r, _)| *r == register) {
                Some((_, uncovered)) => *uncovered = uncovered.cover(read),
                None => liveness.push((register, read)),
            }
        }
    }

    Ok((liveness, is_live))
}

fn overlaps(a: BitRange, b: BitRange) -> bool {
    a.start < b.end && b.start < a.end
}

#[derive(Default)]
struct Operands {
    reads: ArrayVec<(Register, BitRange), 4>,
    writes: ArrayVec<(Register, BitRange, bool), 2>,
    memory: bool,
}

impl Tracer for Operands {
    fn read(&mut self, register: Register, range: BitRange) {
        self.reads.push((register, range));
    }

    fn write(&mut self, register: Register, range: BitRange, always: bool) {
        self.writes.push((register, range, always));
    }

    fn memory_read(&mut self, _width: u16) {
        self.memory = true;
    }

    fn memory_write(&mut self, _width: u16) {
        self.memory = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codegen::CompiledProgram, Catalog, CatalogOptions, ElementKind, FloatForm, FloatOp,
        Instruction, Opcode, FIRST_INSTRUCTION,
    };

    use rand::{Rng, SeedableRng};
    use rand_pcg::Pcg64;

    const RAX: Register = Register::Gpr(Gpr::Rax);
    const RCX: Register = Register::Gpr(Gpr::Rcx);
    const RSI: Register = Register::Gpr(Gpr::Rsi);
    const QWORD: BitRange = BitRange::low(64);

    fn xmm(idx: u8) -> Xmm {
        Xmm::ALL[usize::from(idx)]
    }

    fn float(op: FloatOp, dst: u8, src: u8) -> Instruction {
        Instruction::Float {
            op,
            form: FloatForm::ScalarDouble,
            dst: xmm(dst),
            src: xmm(src),
        }
    }

    fn eliminate(instructions: &[Instruction]) -> Vec<Instruction> {
        let catalog =
            Catalog::from_instructions(ElementKind::F64, false, instructions.to_vec()).unwrap();
        let program = Program::new(catalog.instruction_opcodes().collect());
        let out = eliminate_introns(&catalog, &program, xmm(0).into(), QWORD).unwrap();
        out.opcodes()
            .iter()
            .map(|&op| catalog.instruction(op).unwrap())
            .collect()
    }

    #[test]
    fn unused_results_are_removed() {
        let square = float(FloatOp::Mul, 0, 0);
        let dead = float(FloatOp::Add, 1, 0);
        assert_eq!(eliminate(&[dead, square, dead]), vec![square]);
    }

    #[test]
    fn overwritten_results_are_removed() {
        let overwritten = float(FloatOp::Add, 0, 1);
        let movaps = Instruction::MoveAll {
            dst: xmm(0),
            src: xmm(2),
        };
        let feed = float(FloatOp::Mul, 2, 3);
        assert_eq!(
            eliminate(&[feed, overwritten, movaps]),
            vec![feed, movaps]
        );
    }

    #[test]
    fn nothing_to_remove() {
        let program = [
            float(FloatOp::Mul, 1, 0),
            float(FloatOp::Add, 0, 1),
            float(FloatOp::Sqrt, 0, 0),
        ];
        assert_eq!(eliminate(&program), program.to_vec());
    }

    #[test]
    fn idempotent_and_behavior_preserving() {
        let catalog = Catalog::build(&CatalogOptions::new(ElementKind::I64)).unwrap();
        let mut rng = Pcg64::seed_from_u64(3);

        for _ in 0..64 {
            let opcodes = (0..24)
                .map(|_| rng.gen_range(catalog.instruction_opcodes()))
                .collect();
            let program = Program::new(opcodes);

            let once = eliminate_introns(&catalog, &program, RAX, QWORD).unwrap();
            let twice = eliminate_introns(&catalog, &once, RAX, QWORD).unwrap();
            assert!(once.len() <= program.len());
            assert!(twice.len() <= once.len());

            let full = CompiledProgram::<i64>::new(&catalog, &program, 2).unwrap();
            let short = CompiledProgram::<i64>::new(&catalog, &once, 2).unwrap();
            for _ in 0..8 {
                let inputs: [i64; 2] = [rng.gen_range(-100..100), rng.gen()];
                assert_eq!(full.call(&inputs), short.call(&inputs));
            }
        }
    }

    #[derive(Clone, Copy)]
    struct Op {
        reads: &'static [(Register, BitRange)],
        write: (Register, BitRange, bool),
        memory: bool,
    }

    impl Trace for Op {
        fn trace<T: Tracer>(&self, tracer: &mut T) {
            for &(register, range) in self.reads {
                tracer.read(register, range);
            }
            let (register, range, always) = self.write;
            tracer.write(register, range, always);
            if self.memory {
                tracer.memory_read(64);
            }
        }
    }

    struct Table(Vec<Op>);

    impl OpcodeTable for Table {
        type Instruction = Op;

        fn lookup(&self, opcode: Opcode) -> Option<Op> {
            let idx = opcode.checked_sub(FIRST_INSTRUCTION)?;
            self.0.get(usize::from(idx)).copied()
        }
    }

    fn kept(ops: Vec<Op>, output: Register, range: BitRange) -> Result<Vec<Opcode>> {
        let program = Program::new((0..ops.len() as Opcode).map(|i| i + FIRST_INSTRUCTION).collect());
        eliminate_introns(&Table(ops), &program, output, range)
            .map(|program| program.opcodes().to_vec())
    }

    fn write(register: Register, range: BitRange) -> Op {
        Op {
            reads: &[],
            write: (register, range, true),
            memory: false,
        }
    }

    #[test]
    fn low_byte_leaves_high_byte_uncovered() {
        let ops = vec![
            // dead, the rest of the word is covered below
            write(RAX, BitRange::low(16)),
            write(RAX, BitRange::new(8, 16)),
            write(RAX, BitRange::low(8)),
        ];
        assert_eq!(kept(ops, RAX, BitRange::low(16)).unwrap(), vec![3, 4]);
    }

    #[test]
    fn low_half_leaves_high_half_uncovered() {
        let x0 = Register::Xmm(xmm(0));
        let ops = vec![
            write(x0, BitRange::low(128)),
            write(x0, BitRange::low(64)),
        ];
        assert_eq!(kept(ops, x0, BitRange::low(128)).unwrap(), vec![2, 3]);
    }

    #[test]
    fn conditional_write_keeps_earlier_writes() {
        let ops = vec![
            // dead, overwritten unconditionally below
            write(RAX, QWORD),
            write(RCX, QWORD),
            write(RSI, QWORD),
            Op {
                reads: &[(RCX, QWORD)],
                write: (RAX, QWORD, true),
                memory: false,
            },
            Op {
                reads: &[(RSI, QWORD)],
                write: (RAX, QWORD, false),
                memory: false,
            },
        ];
        assert_eq!(kept(ops, RAX, QWORD).unwrap(), vec![3, 4, 5, 6]);
    }

    #[test]
    fn memory_operands_fail() {
        let ops = vec![
            Op {
                reads: &[],
                write: (RAX, QWORD, true),
                memory: true,
            },
            write(RCX, QWORD),
        ];
        assert!(matches!(
            kept(ops, RAX, QWORD),
            Err(Error::MemoryOperand { position: 0 })
        ));
    }
}
