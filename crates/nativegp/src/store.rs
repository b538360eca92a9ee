use crate::{is_sentinel, Error, Opcode, Program, Result, END, FIRST_INSTRUCTION, HALT};

/// Every program of a population in one buffer.
///
/// The buffer is split into one partition per worker thread. A partition holds
/// its programs back to back, every program being `program_size` instruction
/// slots followed by an `END` slot, and ends with a single `HALT` slot:
///
/// ```text
/// | p0 i0 .. p0 iN END | p1 i0 .. p1 iN END | .. | HALT || next partition ..
/// ```
pub struct ProgramStore {
    slots: Box<[Opcode]>,
    thread_count: usize,
    programs_per_thread: usize,
    program_size: usize,
    initialized: bool,
}

impl ProgramStore {
    /// Allocate a store. It must be [initialized](Self::initialize) before use.
    pub fn new(thread_count: usize, program_count: usize, program_size: usize) -> Result<Self> {
        if thread_count == 0 {
            return Err(Error::Zero("thread count"));
        }
        if program_count == 0 {
            return Err(Error::Zero("program count"));
        }
        if program_size == 0 {
            return Err(Error::Zero("program size"));
        }
        if program_count % thread_count != 0 {
            return Err(Error::UnevenPartition {
                programs: program_count,
                threads: thread_count,
            });
        }

        let programs_per_thread = program_count / thread_count;
        let partition_len = programs_per_thread * (program_size + 1) + 1;

        Ok(Self {
            slots: vec![END; partition_len * thread_count].into_boxed_slice(),
            thread_count,
            programs_per_thread,
            program_size,
            initialized: false,
        })
    }

    /// Write every sentinel and fill instruction slots with the first
    /// instruction opcode.
    pub fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Err(Error::AlreadyInitialized);
        }

        let stride = self.program_stride();
        let partition_len = self.partition_len();
        for partition in self.slots.chunks_exact_mut(partition_len) {
            for program in partition[..partition_len - 1].chunks_exact_mut(stride) {
                program[..stride - 1].fill(FIRST_INSTRUCTION);
                program[stride - 1] = END;
            }
            partition[partition_len - 1] = HALT;
        }

        self.initialized = true;
        Ok(())
    }

    /// Whether [initialize](Self::initialize) has been called.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Total amount of programs.
    pub fn program_count(&self) -> usize {
        self.programs_per_thread * self.thread_count
    }

    /// Amount of partitions.
    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    /// Programs in each partition.
    pub fn programs_per_thread(&self) -> usize {
        self.programs_per_thread
    }

    /// Instruction slots per program.
    pub fn program_size(&self) -> usize {
        self.program_size
    }

    /// The raw buffer, sentinels included.
    pub fn as_slice(&self) -> &[Opcode] {
        &self.slots
    }

    /// # Panics
    /// If out of range or not initialized.
    pub fn get(&self, program: usize, instruction: usize) -> Opcode {
        self.slots[self.offset(program, instruction)]
    }

    /// Overwrite one instruction. Sentinels are rejected.
    ///
    /// # Panics
    /// If out of range or not initialized.
    pub fn set(&mut self, program: usize, instruction: usize, opcode: Opcode) -> Result<()> {
        let offset = self.offset(program, instruction);
        if is_sentinel(opcode) {
            return Err(Error::SentinelOpcode { opcode });
        }
        self.slots[offset] = opcode;
        Ok(())
    }

    /// The instruction slots of one program.
    pub fn program(&self, program: usize) -> &[Opcode] {
        let start = self.offset(program, 0);
        &self.slots[start..start + self.program_size]
    }

    /// Overwrite program `to` with program `from`, `END` slot included.
    pub fn copy_program(&mut self, from: usize, to: usize) {
        let src = self.offset(from, 0);
        let dst = self.offset(to, 0);
        let len = self.program_stride();
        self.slots.copy_within(src..src + len, dst);
    }

    /// Like [copy_program](Self::copy_program), passing every instruction and
    /// its index through `f` on the way. Stops at the first sentinel `f`
    /// returns.
    pub fn copy_program_with<F>(&mut self, from: usize, to: usize, mut f: F) -> Result<()>
    where
        F: FnMut(Opcode, usize) -> Opcode,
    {
        let src = self.offset(from, 0);
        let dst = self.offset(to, 0);
        for i in 0..self.program_size {
            let opcode = f(self.slots[src + i], i);
            if is_sentinel(opcode) {
                return Err(Error::SentinelOpcode { opcode });
            }
            self.slots[dst + i] = opcode;
        }
        self.slots[dst + self.program_size] = self.slots[src + self.program_size];

        Ok(())
    }

    /// Copy one program out of the store, replacing the contents of `out`.
    pub fn copy_program_to(&self, program: usize, out: &mut Program) {
        let opcodes = out.opcodes_mut();
        opcodes.clear();
        opcodes.extend_from_slice(self.program(program));
    }

    /// Replace every instruction slot with
    /// `f(opcode, thread, program_in_thread, instruction)`.
    ///
    /// Stops at the first sentinel `f` returns, without writing it.
    pub fn transform<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(Opcode, usize, usize, usize) -> Opcode,
    {
        assert!(self.initialized, "program store used before initialization");

        let partition_len = self.partition_len();
        let stride = self.program_stride();
        for (t, partition) in self.slots.chunks_exact_mut(partition_len).enumerate() {
            let programs = &mut partition[..partition_len - 1];
            for (p, program) in programs.chunks_exact_mut(stride).enumerate() {
                for (i, slot) in program[..stride - 1].iter_mut().enumerate() {
                    let opcode = f(*slot, t, p, i);
                    if is_sentinel(opcode) {
                        return Err(Error::SentinelOpcode { opcode });
                    }
                    *slot = opcode;
                }
            }
        }

        Ok(())
    }

    /// The programs run by one worker thread.
    pub fn partition(&self, thread: usize) -> Partition<'_> {
        assert!(self.initialized, "program store used before initialization");
        let len = self.partition_len();
        Partition {
            slots: &self.slots[thread * len..(thread + 1) * len],
            program_count: self.programs_per_thread,
            program_size: self.program_size,
        }
    }

    /// Every partition, in thread order.
    pub fn partitions(&self) -> impl ExactSizeIterator<Item = Partition<'_>> + '_ {
        (0..self.thread_count).map(move |t| self.partition(t))
    }

    fn program_stride(&self) -> usize {
        self.program_size + 1
    }

    fn partition_len(&self) -> usize {
        self.programs_per_thread * self.program_stride() + 1
    }

    fn offset(&self, program: usize, instruction: usize) -> usize {
        assert!(self.initialized, "program store used before initialization");
        assert!(program < self.program_count(), "program index out of range");
        assert!(instruction < self.program_size, "instruction index out of range");

        let thread = program / self.programs_per_thread;
        let local = program % self.programs_per_thread;
        thread * self.partition_len() + local * self.program_stride() + instruction
    }
}

/// The slots of one thread partition, ending in `HALT`.
#[derive(Debug, Clone, Copy)]
pub struct Partition<'a> {
    slots: &'a [Opcode],
    program_count: usize,
    program_size: usize,
}

impl<'a> Partition<'a> {
    /// Raw slots, sentinels included.
    pub fn slots(&self) -> &'a [Opcode] {
        self.slots
    }

    /// Amount of programs in the partition.
    pub fn program_count(&self) -> usize {
        self.program_count
    }

    /// Instruction slots per program.
    pub fn program_size(&self) -> usize {
        self.program_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashSet;

    fn store(threads: usize, programs: usize, size: usize) -> ProgramStore {
        let mut store = ProgramStore::new(threads, programs, size).unwrap();
        store.initialize().unwrap();
        store
    }

    #[test]
    fn offsets_are_a_bijection() {
        for (threads, programs, size) in [(1, 1, 1), (1, 5, 3), (2, 4, 2), (3, 9, 7), (4, 4, 1)] {
            let mut store = store(threads, programs, size);

            let mut seen = HashSet::new();
            for p in 0..programs {
                for i in 0..size {
                    let offset = store.offset(p, i);
                    assert!(seen.insert(offset));
                    assert!(!is_sentinel(store.as_slice()[offset]));

                    store
                        .set(p, i, FIRST_INSTRUCTION + (p * size + i) as Opcode)
                        .unwrap();
                }
            }

            for p in 0..programs {
                for i in 0..size {
                    assert_eq!(store.get(p, i), FIRST_INSTRUCTION + (p * size + i) as Opcode);
                }
            }

            let sentinels = store.as_slice().iter().filter(|&&op| is_sentinel(op)).count();
            assert_eq!(sentinels, programs + threads);
            assert_eq!(seen.len() + sentinels, store.as_slice().len());
        }
    }

    #[test]
    fn copy_includes_end() {
        let mut store = store(2, 4, 3);
        for i in 0..3 {
            store.set(1, i, 10 + i as Opcode).unwrap();
        }

        store.copy_program(1, 3);
        assert_eq!(store.program(3), &[10, 11, 12]);
        let end = store.offset(3, 2) + 1;
        assert_eq!(store.as_slice()[end], END);

        store.copy_program_with(1, 2, |op, i| op + i as Opcode).unwrap();
        assert_eq!(store.program(2), &[10, 12, 14]);

        let mut program = Program::default();
        store.copy_program_to(2, &mut program);
        assert_eq!(program.opcodes(), &[10, 12, 14]);
    }

    #[test]
    fn copy_rejects_sentinels() {
        let mut store = store(1, 2, 2);
        let result = store.copy_program_with(0, 1, |_, i| if i == 1 { HALT } else { 5 });
        assert!(matches!(result, Err(Error::SentinelOpcode { opcode: HALT })));
    }

    #[test]
    fn identity_transform_changes_nothing() {
        let mut store = store(3, 6, 4);
        store
            .transform(|_, t, p, i| FIRST_INSTRUCTION + (t * 100 + p * 10 + i) as Opcode)
            .unwrap();
        let before = store.as_slice().to_vec();

        store.transform(|op, _, _, _| op).unwrap();
        assert_eq!(store.as_slice(), &before[..]);
    }

    #[test]
    fn transform_rejects_sentinels() {
        let mut store = store(1, 2, 2);
        let result = store.transform(|op, _, p, i| if p == 1 && i == 1 { END } else { op + 1 });

        assert!(matches!(result, Err(Error::SentinelOpcode { opcode: END })));
        assert_eq!(store.get(1, 1), FIRST_INSTRUCTION);
        assert!(store.set(0, 0, HALT).is_err());
    }

    #[test]
    fn partition_ownership() {
        let store = store(2, 4, 2);

        let partitions: Vec<_> = store.partitions().collect();
        assert_eq!(partitions.len(), 2);
        // Programs 0 and 1 belong to thread 0, 2 and 3 to thread 1.
        assert!(store.offset(1, 1) < partitions[0].slots().len());
        assert!(store.offset(2, 0) >= partitions[0].slots().len());
        assert_eq!(partitions[1].program_count(), 2);

        for partition in &partitions {
            let slots = partition.slots();
            assert_eq!(slots, &[2, 2, END, 2, 2, END, HALT]);
        }
        let halts: Vec<_> = store
            .as_slice()
            .iter()
            .enumerate()
            .filter(|&(_, &op)| op == HALT)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(halts, [6, 13]);
    }

    #[test]
    fn lifecycle() {
        let mut store = ProgramStore::new(1, 1, 1).unwrap();
        assert!(!store.is_initialized());
        store.initialize().unwrap();
        assert!(matches!(store.initialize(), Err(Error::AlreadyInitialized)));

        assert!(matches!(
            ProgramStore::new(3, 4, 1),
            Err(Error::UnevenPartition {
                programs: 4,
                threads: 3
            })
        ));
        assert!(matches!(ProgramStore::new(1, 1, 0), Err(Error::Zero(_))));
    }

    #[test]
    #[should_panic(expected = "before initialization")]
    fn use_before_initialization() {
        let store = ProgramStore::new(1, 1, 1).unwrap();
        store.get(0, 0);
    }
}
