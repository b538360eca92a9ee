use crate::{Error, Result};

use nativegp::ProgramStore;
use rand::prelude::*;

/// Tournament selection. Resets `wins`, then holds tournaments until as many
/// wins as programs have been handed out, or until every program with a
/// finite loss has reached `cap`.
///
/// The winner of a tournament is the first drawn program with the lowest
/// loss. It only gets a win when its loss is finite and it has not reached
/// `cap` yet.
///
/// Returns the amount of wins handed out.
pub(crate) fn tournament<R: Rng>(
    losses: &[f64],
    wins: &mut [u8],
    cap: u8,
    size: usize,
    rng: &mut R,
) -> Result<usize> {
    assert_eq!(losses.len(), wins.len());
    assert!(size > 0 && cap > 0);
    wins.fill(0);

    let population = losses.len();
    let finite = losses.iter().filter(|loss| loss.is_finite()).count();
    let mut capacity = finite * usize::from(cap);
    let mut selected = 0;
    let mut draws = 0;

    while selected < population {
        if selected > 0 && capacity == 0 {
            break;
        }

        let mut winner = rng.gen_range(0..population);
        for _ in 1..size {
            let challenger = rng.gen_range(0..population);
            if losses[challenger] < losses[winner] {
                winner = challenger;
            }
        }
        draws += 1;

        if losses[winner].is_finite() && wins[winner] < cap {
            wins[winner] += 1;
            selected += 1;
            capacity -= 1;
        } else if selected == 0 && draws > population {
            tracing::error!(draws, "no program with a finite loss");
            return Err(Error::PopulationCollapsed { draws });
        }
    }

    Ok(selected)
}

/// Overwrite programs without wins with copies of the winners: `w - 1`
/// copies of a program with `w` wins, in program order.
///
/// Returns the amount of copies made.
pub(crate) fn reproduce(store: &mut ProgramStore, wins: &[u8]) -> usize {
    assert_eq!(store.program_count(), wins.len());

    let mut dead = wins
        .iter()
        .enumerate()
        .filter(|&(_, &w)| w == 0)
        .map(|(program, _)| program);
    let mut copies = 0;

    for (program, &w) in wins.iter().enumerate() {
        for _ in 1..w {
            let Some(slot) = dead.next() else {
                return copies;
            };
            store.copy_program(program, slot);
            copies += 1;
        }
    }

    copies
}
