//! The deterministic load sequence.
//!
//! A [`Sequence`] selects which target each shot is fired at. Selections come
//! from an explicit, seeded generator owned by the sequence, so that a fixed
//! seed, random limit, shot count and target list produce the same ordering on
//! every run. The selection policy is: draw `next_u32() % random_limit`, reduce
//! that modulo the number of targets, index the target list.

use std::num::NonZeroU32;

use rand::{RngCore, SeedableRng, rngs::StdRng};

/// Errors produced by [`Sequence`]
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The target list has no members
    #[error("target list must not be empty")]
    EmptyTargets,
}

/// A finite, replayable sequence of targets.
#[derive(Debug)]
pub struct Sequence<'a, R = StdRng> {
    targets: &'a [String],
    rng: R,
    random_limit: NonZeroU32,
    remaining: u32,
}

impl<'a> Sequence<'a, StdRng> {
    /// Create a new [`Sequence`] with a generator derived from `seed`.
    ///
    /// # Errors
    ///
    /// Function will return an error if `targets` is empty.
    pub fn seeded(
        targets: &'a [String],
        seed: u64,
        random_limit: NonZeroU32,
        shot_count: u32,
    ) -> Result<Self, Error> {
        Self::new(targets, StdRng::seed_from_u64(seed), random_limit, shot_count)
    }
}

impl<'a, R> Sequence<'a, R>
where
    R: RngCore,
{
    /// Create a new [`Sequence`] that will yield `shot_count` selections drawn
    /// from `rng`.
    ///
    /// # Errors
    ///
    /// Function will return an error if `targets` is empty.
    pub fn new(
        targets: &'a [String],
        rng: R,
        random_limit: NonZeroU32,
        shot_count: u32,
    ) -> Result<Self, Error> {
        if targets.is_empty() {
            return Err(Error::EmptyTargets);
        }
        Ok(Self {
            targets,
            rng,
            random_limit,
            remaining: shot_count,
        })
    }

    /// The number of selections left in this sequence.
    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Draw the next index into the target list, or `None` once the shot count
    /// is exhausted. The index is always less than the number of targets.
    pub fn next_index(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let draw = self.rng.next_u32() % self.random_limit.get();
        // u32 always fits usize on supported platforms.
        Some(draw as usize % self.targets.len())
    }

    /// Draw the next target, or `None` once the shot count is exhausted.
    pub fn next_target(&mut self) -> Option<&'a str> {
        let targets = self.targets;
        self.next_index().map(|idx| targets[idx].as_str())
    }
}

impl<'a, R> Iterator for Sequence<'a, R>
where
    R: RngCore,
{
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_target()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining as usize;
        (remaining, Some(remaining))
    }
}
