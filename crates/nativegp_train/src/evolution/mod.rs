use crate::{Error, Options, Result};

use nativegp::{
    codegen::{CompiledProgram, IoLayout, ProgramSetInput, ProgramSetOutput, Trampoline},
    intron::eliminate_introns,
    Catalog, Element, Program, ProgramStore, SampleSet,
};
use rand::prelude::*;
use rand_pcg::Pcg64;
use rayon::{ThreadPool, ThreadPoolBuilder};

mod mutate;
mod select;

/// A population of programs evolving towards the samples.
///
/// Every generation evaluates all programs, holds tournaments over their
/// losses, replaces the losers with copies of the winners and mutates the
/// result.
pub struct Population<E: Element> {
    options: Options,
    samples: SampleSet<E>,
    catalog: Catalog,
    layout: IoLayout,
    trampoline: Trampoline,
    input: ProgramSetInput<E>,
    output: ProgramSetOutput<E>,
    store: ProgramStore,
    losses: Vec<f64>,
    wins: Vec<u8>,
    win_cap: u8,
    best: Program,
    best_loss: f64,
    generation: u64,
    executed: u64,
    rng: Pcg64,
    pool: ThreadPool,
}

impl<E: Element> Population<E> {
    /// Build the catalog and native code and seed the population with random
    /// programs.
    pub fn new(options: Options, samples: SampleSet<E>) -> Result<Self> {
        options.validate()?;
        if options.vectorized != samples.is_vectorized() {
            return Err(Error::InvalidOptions(
                "vectorized option does not match the samples",
            ));
        }

        let catalog = Catalog::build(&options.catalog_options(E::KIND))?;
        let mut rng = Pcg64::seed_from_u64(options.seed);

        let mut store =
            ProgramStore::new(options.threads, options.population_size, options.program_size)?;
        store.initialize()?;
        mutate::randomize(&mut store, catalog.instruction_opcodes(), &mut rng)?;

        let layout = IoLayout::new(&samples, options.population_size)?;
        let trampoline = Trampoline::new(
            &catalog,
            &layout,
            options.program_size,
            options.instrumentation,
        )?;
        let input = ProgramSetInput::new(&layout, &samples);
        let output = ProgramSetOutput::new(&layout);

        let pool = ThreadPoolBuilder::new()
            .num_threads(options.threads)
            .thread_name(|i| format!("nativegp-worker-{i}"))
            .build()?;

        tracing::info!(
            population = options.population_size,
            threads = options.threads,
            instructions = catalog.len(),
            code_bytes = trampoline.code_size(),
            "created population"
        );

        Ok(Self {
            losses: vec![f64::INFINITY; options.population_size],
            wins: vec![0; options.population_size],
            win_cap: options.win_cap(),
            options,
            samples,
            catalog,
            layout,
            trampoline,
            input,
            output,
            store,
            best: Program::default(),
            best_loss: f64::INFINITY,
            generation: 0,
            executed: 0,
            rng,
            pool,
        })
    }

    /// Run every program on every sample and update the losses and the best
    /// program.
    pub fn evaluate(&mut self) -> Result<()> {
        if self.options.zero_outputs {
            self.output.zero();
        }

        let threads = self.store.thread_count();
        let mut executed = vec![0; threads];
        if threads == 1 {
            executed[0] = self.trampoline.run(
                self.store.partition(0),
                &self.input,
                self.output.as_mut_slice(),
            )?;
        } else {
            let mut results: Vec<nativegp::Result<u64>> = (0..threads).map(|_| Ok(0)).collect();
            let trampoline = &self.trampoline;
            let input = &self.input;
            let partitions = self.store.partitions();
            let outputs = self.output.partitions_mut(threads);

            self.pool.scope(|s| {
                for ((partition, output), result) in
                    partitions.zip(outputs).zip(results.iter_mut())
                {
                    s.spawn(move |_| *result = trampoline.run(partition, input, output));
                }
            });

            for (count, result) in executed.iter_mut().zip(results) {
                *count = result?;
            }
        }
        self.executed = executed.iter().sum();

        self.calculate_losses();
        self.track_best();
        Ok(())
    }

    fn calculate_losses(&mut self) {
        let expected = self.samples.outputs();
        let outputs = self
            .output
            .as_slice()
            .chunks_exact(self.layout.outputs_per_program());

        for (loss, actual) in self.losses.iter_mut().zip(outputs) {
            let sum: f64 = actual
                .iter()
                .zip(expected)
                .map(|(&actual, &expected)| actual.distance(expected))
                .sum();
            *loss = if sum.is_finite() { sum } else { f64::INFINITY };
        }
    }

    fn track_best(&mut self) {
        let Some((program, &loss)) = self
            .losses
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))
        else {
            return;
        };

        if loss < self.best_loss {
            self.store.copy_program_to(program, &mut self.best);
            self.best_loss = loss;
            tracing::info!(generation = self.generation, loss, "new best program");
        }
    }

    /// Tournament selection over the current losses.
    ///
    /// Returns the amount of wins handed out.
    pub fn select(&mut self) -> Result<usize> {
        select::tournament(
            &self.losses,
            &mut self.wins,
            self.win_cap,
            self.options.tournament_size,
            &mut self.rng,
        )
    }

    /// Replace programs without wins with copies of the winners, then mutate.
    ///
    /// Returns the amount of copies made.
    pub fn reproduce(&mut self) -> Result<usize> {
        let copies = select::reproduce(&mut self.store, &self.wins);
        self.mutate()?;
        Ok(copies)
    }

    /// Randomly replace instructions across the whole population.
    ///
    /// Returns the amount of replaced instructions.
    pub fn mutate(&mut self) -> Result<usize> {
        mutate::mutate(
            &mut self.store,
            self.catalog.instruction_opcodes(),
            self.options.mutation_rate,
            &mut self.rng,
        )
    }

    /// Evaluate, select, reproduce and mutate once.
    pub fn next_generation(&mut self) -> Result<()> {
        self.evaluate()?;

        // Major and minor generations do the same work.
        let major = self.generation % self.options.major_frequency == 0;
        let selected = self.select()?;
        let copies = self.reproduce()?;

        tracing::debug!(
            generation = self.generation,
            major,
            selected,
            copies,
            best_loss = self.best_loss,
            executed = self.executed,
            "finished generation"
        );

        self.generation += 1;
        Ok(())
    }

    /// Run generations until `stop(generation, best_loss)` returns true.
    /// Checked before every generation.
    pub fn run_until<F>(&mut self, mut stop: F) -> Result<()>
    where
        F: FnMut(u64, f64) -> bool,
    {
        while !stop(self.generation, self.best_loss) {
            self.next_generation()?;
        }
        Ok(())
    }

    /// Lowest loss seen so far, infinite before the first evaluation.
    pub fn best_loss(&self) -> f64 {
        self.best_loss
    }

    /// The program with the lowest loss seen so far.
    pub fn best(&self) -> Option<&Program> {
        self.best_loss.is_finite().then_some(&self.best)
    }

    fn best_program(&self, eliminate: bool) -> Result<Option<Program>> {
        let Some(best) = self.best() else {
            return Ok(None);
        };
        if !eliminate {
            return Ok(Some(best.clone()));
        }

        let program = eliminate_introns(
            &self.catalog,
            best,
            self.layout.output_register(),
            self.layout.output_range(),
        )?;
        Ok(Some(program))
    }

    /// The best program as assembly, optionally without introns.
    pub fn best_listing(&self, eliminate_introns: bool) -> Result<Option<String>> {
        let program = self.best_program(eliminate_introns)?;
        Ok(program.map(|program| program.listing(&self.catalog).to_string()))
    }

    /// The best program compiled on its own, optionally without introns.
    pub fn compile_best(&self, eliminate_introns: bool) -> Result<Option<CompiledProgram<E>>> {
        let Some(program) = self.best_program(eliminate_introns)? else {
            return Ok(None);
        };
        let compiled = CompiledProgram::new(&self.catalog, &program, self.samples.arity())?;
        Ok(Some(compiled))
    }

    /// Completed generations.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Loss of every program in the last evaluation.
    pub fn losses(&self) -> &[f64] {
        &self.losses
    }

    /// Wins of every program in the last selection.
    pub fn wins(&self) -> &[u8] {
        &self.wins
    }

    /// Instructions executed in the last evaluation, when counting them.
    pub fn executed_instructions(&self) -> u64 {
        self.executed
    }

    /// The programs.
    pub fn store(&self) -> &ProgramStore {
        &self.store
    }

    /// The instructions programs are made of.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// The options the population was created with.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Stop the worker threads.
    pub fn shutdown(self) {
        tracing::debug!(generation = self.generation, "shutting down population");
        drop(self.pool);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use nativegp::{codegen::Instrumentation, Mnemonic};

    fn squares() -> SampleSet<f64> {
        SampleSet::scalar(1, (1..=3).map(|x| (vec![x as f64], (x * x) as f64))).unwrap()
    }

    fn options() -> Options {
        Options::default()
            .with_population_size(32)
            .with_deme_size(32)
            .with_threads(2)
            .with_program_size(4)
            .with_instructions(vec![Mnemonic::FMul, Mnemonic::Nop])
            .with_moves(vec![Mnemonic::Movaps])
    }

    #[test]
    fn losses_are_absolute_errors() {
        let mut population = Population::new(options(), squares()).unwrap();
        // Every program computes the identity.
        let nop = population
            .catalog()
            .opcode(nativegp::Instruction::Nop)
            .unwrap();
        population.store.transform(|_, _, _, _| nop).unwrap();

        population.evaluate().unwrap();
        // |1 - 1| + |2 - 4| + |3 - 9|
        assert!(population.losses().iter().all(|&loss| loss == 8.0));
        assert_eq!(population.best_loss(), 8.0);
        assert_eq!(population.best().unwrap().opcodes(), &[nop; 4]);
        assert_eq!(
            population.best_listing(true).unwrap().as_deref(),
            Some("")
        );
    }

    #[test]
    fn counts_instructions() {
        let options = options().with_instrumentation(Instrumentation::CountInstructions);
        let mut population = Population::new(options, squares()).unwrap();
        population.evaluate().unwrap();
        assert_eq!(population.executed_instructions(), 32 * 3 * 4);
    }

    #[test]
    fn vectorized_option_must_match_samples() {
        assert!(matches!(
            Population::new(options().with_vectorized(true), squares()),
            Err(Error::InvalidOptions(_))
        ));
    }

    #[test]
    fn selection_and_mutation_find_the_square() {
        let mut population =
            Population::new(options().with_mutation_rate(0.05), squares()).unwrap();
        let nop = population
            .catalog()
            .opcode(nativegp::Instruction::Nop)
            .unwrap();
        population.store.transform(|_, _, _, _| nop).unwrap();

        population.evaluate().unwrap();
        assert_eq!(population.best_loss(), 8.0);

        population
            .run_until(|generation, loss| loss == 0.0 || generation >= 2000)
            .unwrap();
        assert_eq!(population.best_loss(), 0.0);
        assert!(population.generation() > 0);
    }

    #[test]
    fn generations_keep_the_best_loss_monotonic() {
        let mut population = Population::new(options(), squares()).unwrap();
        let mut last = f64::INFINITY;
        for _ in 0..20 {
            population.next_generation().unwrap();
            assert!(population.best_loss() <= last);
            last = population.best_loss();
        }
        assert_eq!(population.generation(), 20);
        population.shutdown();
    }
}
