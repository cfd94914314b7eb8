//! Random streams: symbolic draws whose generator state is a shared variable
//! advanced by a default update after every call.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::error::Result;
use crate::graph::{Graph, VarId};
use crate::ops::{functional as F, Distribution};
use crate::shared::SharedVariable;
use crate::value::Value;

const SEED_RANGE: u64 = 1 << 30;

/// Factory for random draws sharing one master seed.
///
/// Each draw gets its own generator state, seeded from the master generator
/// in creation order, so reseeding reproduces the same sequence of samples.
#[derive(Debug)]
pub struct RandomStreams {
    seed: u64,
    seedgen: StdRng,
    states: Vec<SharedVariable>,
}

impl RandomStreams {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            seedgen: StdRng::seed_from_u64(seed),
            states: Vec::new(),
        }
    }

    pub fn master_seed(&self) -> u64 {
        self.seed
    }

    /// Generator states created so far, in creation order.
    pub fn states(&self) -> &[SharedVariable] {
        &self.states
    }

    pub fn uniform(
        &mut self,
        graph: &mut Graph,
        shape: &[usize],
        low: f64,
        high: f64,
    ) -> Result<VarId> {
        self.draw(graph, Distribution::Uniform { low, high }, shape)
    }

    pub fn normal(
        &mut self,
        graph: &mut Graph,
        shape: &[usize],
        mean: f64,
        std: f64,
    ) -> Result<VarId> {
        self.draw(graph, Distribution::Normal { mean, std }, shape)
    }

    /// Resets the master generator and re-seeds every existing state from it.
    pub fn seed(&mut self, seed: u64) -> Result<()> {
        debug!(seed, streams = self.states.len(), "reseeding random streams");
        self.seed = seed;
        self.seedgen = StdRng::seed_from_u64(seed);
        for state in &self.states {
            let next = self.seedgen.gen_range(0..SEED_RANGE);
            state.set_value(Value::RandomState(next))?;
        }
        Ok(())
    }

    fn draw(
        &mut self,
        graph: &mut Graph,
        distribution: Distribution,
        shape: &[usize],
    ) -> Result<VarId> {
        let state = SharedVariable::new(
            Some(&format!("rng{}", self.states.len())),
            Value::RandomState(self.seedgen.gen_range(0..SEED_RANGE)),
        );
        let rng = graph.shared(&state);
        let (next, sample) = F::random(graph, rng, distribution, shape)?;
        graph.set_default_update(rng, next)?;
        self.states.push(state);
        Ok(sample)
    }
}
