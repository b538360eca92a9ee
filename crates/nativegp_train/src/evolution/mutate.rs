use crate::Result;

use nativegp::{Opcode, ProgramStore};
use rand::prelude::*;

use std::ops::Range;

/// Fill every instruction slot with a random opcode from `opcodes`.
pub(crate) fn randomize<R: Rng>(
    store: &mut ProgramStore,
    opcodes: Range<Opcode>,
    rng: &mut R,
) -> Result<()> {
    store.transform(|_, _, _, _| rng.gen_range(opcodes.clone()))?;
    Ok(())
}

/// Replace each instruction slot with a random opcode from `opcodes` with
/// chance `rate`.
///
/// Returns the amount of replaced slots.
pub(crate) fn mutate<R: Rng>(
    store: &mut ProgramStore,
    opcodes: Range<Opcode>,
    rate: f64,
    rng: &mut R,
) -> Result<usize> {
    let mut mutations = 0;
    store.transform(|opcode, _, _, _| {
        if rng.gen_bool(rate) {
            mutations += 1;
            rng.gen_range(opcodes.clone())
        } else {
            opcode
        }
    })?;

    Ok(mutations)
}
