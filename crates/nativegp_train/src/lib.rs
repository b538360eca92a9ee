#![deny(missing_docs)]

//! Evolves [nativegp] programs against a sample set with tournament
//! selection.
//!
//! ```no_run
//! use nativegp::{Mnemonic, SampleSet};
//! use nativegp_train::{Options, Population};
//!
//! let samples = SampleSet::scalar(1, (1..=3).map(|x| (vec![x as f64], (x * x) as f64))).unwrap();
//! let options = Options::default()
//!     .with_instructions(vec![Mnemonic::FMul, Mnemonic::Nop])
//!     .with_moves(vec![Mnemonic::Movaps]);
//!
//! let mut population = Population::new(options, samples).unwrap();
//! population.run_until(|_, loss| loss == 0.0).unwrap();
//! println!("{}", population.best_listing(true).unwrap().unwrap());
//! population.shutdown();
//! ```

mod error;
/// The population and its generation cycle.
pub mod evolution;
mod options;

pub use error::{Error, Result};
pub use evolution::Population;
pub use options::Options;
