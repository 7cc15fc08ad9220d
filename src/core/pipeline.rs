//! Ordered, fail-fast stage execution.
//!
//! A pipeline is a list of named stages run strictly in sequence against a
//! processor and the cluster. The first failing stage stops the run and its
//! error is returned unchanged. Stages are expected to be idempotent so a
//! failed run can simply be repeated.

use crate::cluster::Cluster;
use crate::error::Result;

pub type StageFn<P> = fn(&mut P, &mut Cluster) -> Result<()>;

pub struct Stage<P> {
    pub name: &'static str,
    pub run: StageFn<P>,
}

impl<P> Stage<P> {
    pub const fn new(name: &'static str, run: StageFn<P>) -> Self {
        Self { name, run }
    }
}

impl<P> Clone for Stage<P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P> Copy for Stage<P> {}

/// A named pipeline shape.
pub trait Processor: Sized {
    fn pipeline(&self) -> Vec<Stage<Self>>;

    fn execute(&mut self, cluster: &mut Cluster) -> Result<()> {
        let stages = self.pipeline();
        run_stages(self, cluster, &stages)
    }
}

pub fn run_stages<P>(processor: &mut P, cluster: &mut Cluster, stages: &[Stage<P>]) -> Result<()> {
    let total = stages.len();
    for (index, stage) in stages.iter().enumerate() {
        log_status!(
            "pipeline",
            "[{}/{}] {} started for cluster {}",
            index + 1,
            total,
            stage.name,
            cluster.name()
        );
        if let Err(err) = (stage.run)(processor, cluster) {
            log_status!("pipeline", "{} failed: {}", stage.name, err.message);
            return Err(err);
        }
        log_status!("pipeline", "{} finished", stage.name);
    }
    Ok(())
}
