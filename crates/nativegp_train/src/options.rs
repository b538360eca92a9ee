use crate::{Error, Result};

use nativegp::{codegen::Instrumentation, CatalogOptions, ElementKind, Mnemonic};

/// Settings of a [Population](crate::Population).
#[derive(Debug, Clone)]
pub struct Options {
    /// Amount of programs.
    pub population_size: usize,
    /// Programs drawn per tournament.
    pub tournament_size: usize,
    /// Seed of every random draw.
    pub seed: u64,
    /// Instructions per program.
    pub program_size: usize,
    /// Chance of each instruction being replaced during mutation.
    pub mutation_rate: f64,
    /// Programs per deme. Must divide the population size.
    pub deme_size: usize,
    /// Every this many generations is a major one.
    pub major_frequency: u64,
    /// Upper bound on the share of the next generation one program can
    /// produce.
    pub max_offspring_ratio: f64,
    /// Worker threads used for evaluation. Must divide the population size.
    pub threads: usize,
    /// Non-move instructions to use, `None` for all.
    pub instructions: Option<Vec<Mnemonic>>,
    /// Move instructions to use, `None` for all.
    pub moves: Option<Vec<Mnemonic>>,
    /// Use instructions that can fault the host.
    pub allow_unsafe: bool,
    /// Use instructions the host CPU does not support.
    pub allow_unsupported: bool,
    /// Use division that skips zero divisors.
    pub safe_division: bool,
    /// Samples hold full vectors.
    pub vectorized: bool,
    /// Clear the output region before every evaluation.
    pub zero_outputs: bool,
    /// Extra code around every instruction.
    pub instrumentation: Instrumentation,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            population_size: 1024,
            tournament_size: 4,
            seed: 0,
            program_size: 32,
            mutation_rate: 0.01,
            deme_size: 1024,
            major_frequency: 10,
            max_offspring_ratio: 0.05,
            threads: 1,
            instructions: None,
            moves: None,
            allow_unsafe: false,
            allow_unsupported: false,
            safe_division: true,
            vectorized: false,
            zero_outputs: false,
            instrumentation: Instrumentation::None,
        }
    }
}

macro_rules! with {
    ($($(#[$doc:meta])* $name:ident: $field:ident: $ty:ty,)*) => {
        impl Options {
            $(
                $(#[$doc])*
                pub fn $name(mut self, $field: $ty) -> Self {
                    self.$field = $field;
                    self
                }
            )*
        }
    };
}

with! {
    /// Set [population_size](Self::population_size).
    with_population_size: population_size: usize,
    /// Set [tournament_size](Self::tournament_size).
    with_tournament_size: tournament_size: usize,
    /// Set [seed](Self::seed).
    with_seed: seed: u64,
    /// Set [program_size](Self::program_size).
    with_program_size: program_size: usize,
    /// Set [mutation_rate](Self::mutation_rate).
    with_mutation_rate: mutation_rate: f64,
    /// Set [deme_size](Self::deme_size).
    with_deme_size: deme_size: usize,
    /// Set [major_frequency](Self::major_frequency).
    with_major_frequency: major_frequency: u64,
    /// Set [max_offspring_ratio](Self::max_offspring_ratio).
    with_max_offspring_ratio: max_offspring_ratio: f64,
    /// Set [threads](Self::threads).
    with_threads: threads: usize,
    /// Set [allow_unsafe](Self::allow_unsafe).
    with_allow_unsafe: allow_unsafe: bool,
    /// Set [allow_unsupported](Self::allow_unsupported).
    with_allow_unsupported: allow_unsupported: bool,
    /// Set [safe_division](Self::safe_division).
    with_safe_division: safe_division: bool,
    /// Set [vectorized](Self::vectorized).
    with_vectorized: vectorized: bool,
    /// Set [zero_outputs](Self::zero_outputs).
    with_zero_outputs: zero_outputs: bool,
    /// Set [instrumentation](Self::instrumentation).
    with_instrumentation: instrumentation: Instrumentation,
}

impl Options {
    /// Only use these non-move instructions.
    pub fn with_instructions(mut self, instructions: Vec<Mnemonic>) -> Self {
        self.instructions = Some(instructions);
        self
    }

    /// Only use these move instructions.
    pub fn with_moves(mut self, moves: Vec<Mnemonic>) -> Self {
        self.moves = Some(moves);
        self
    }

    /// Check the options for consistency.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg| Err(Error::InvalidOptions(msg));

        if self.population_size == 0 {
            return fail("population size must not be zero");
        }
        if self.threads == 0 || self.population_size % self.threads != 0 {
            return fail("population size must be a multiple of the thread count");
        }
        if self.deme_size == 0 || self.population_size % self.deme_size != 0 {
            return fail("population size must be a multiple of the deme size");
        }
        if self.tournament_size == 0 {
            return fail("tournament size must not be zero");
        }
        if self.program_size == 0 {
            return fail("program size must not be zero");
        }
        if !(0.0..=1.0).contains(&self.mutation_rate) {
            return fail("mutation rate must be between 0 and 1");
        }
        if !(self.max_offspring_ratio > 0.0 && self.max_offspring_ratio.is_finite()) {
            return fail("max offspring ratio must be positive");
        }
        if self.major_frequency == 0 {
            return fail("major frequency must not be zero");
        }

        Ok(())
    }

    /// Most wins a single program can collect in one selection.
    pub fn win_cap(&self) -> u8 {
        let share = (self.max_offspring_ratio * self.population_size as f64).ceil();
        share.clamp(1.0, f64::from(u8::MAX)) as u8
    }

    /// The catalog settings for samples of `element`.
    pub fn catalog_options(&self, element: ElementKind) -> CatalogOptions {
        CatalogOptions {
            element,
            vectorized: self.vectorized,
            instructions: self.instructions.clone(),
            moves: self.moves.clone(),
            allow_unsafe: self.allow_unsafe,
            allow_unsupported: self.allow_unsupported,
            safe_division: self.safe_division,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Options::default().validate().unwrap();
    }

    #[test]
    fn invalid() {
        let invalid = [
            Options::default().with_threads(3),
            Options::default().with_deme_size(100),
            Options::default().with_tournament_size(0),
            Options::default().with_program_size(0),
            Options::default().with_mutation_rate(1.5),
            Options::default().with_mutation_rate(f64::NAN),
            Options::default().with_max_offspring_ratio(0.0),
            Options::default().with_major_frequency(0),
        ];
        for options in invalid {
            assert!(
                matches!(options.validate(), Err(Error::InvalidOptions(_))),
                "{options:?}"
            );
        }
    }

    #[test]
    fn win_cap_saturates() {
        let options = Options::default().with_population_size(64);
        assert_eq!(options.clone().with_max_offspring_ratio(0.1).win_cap(), 7);
        assert_eq!(options.clone().with_max_offspring_ratio(1.0).win_cap(), 64);
        assert_eq!(
            options
                .with_population_size(1 << 12)
                .with_deme_size(1 << 12)
                .with_max_offspring_ratio(1.0)
                .win_cap(),
            255
        );
        assert_eq!(Options::default().with_max_offspring_ratio(1e-9).win_cap(), 1);
    }

    #[test]
    fn catalog_options_follow_allow_lists() {
        let options = Options::default()
            .with_instructions(vec![Mnemonic::Add])
            .with_safe_division(false);
        let catalog = options.catalog_options(ElementKind::I32);

        assert_eq!(catalog.instructions, Some(vec![Mnemonic::Add]));
        assert_eq!(catalog.moves, None);
        assert!(!catalog.safe_division);
    }
}
