use graph_builder::prelude::{Idx, UndirectedCsrGraph};
use graph_compute::prelude::{LabelPropagation, LabelPropagationConfig, TerminationFlag};
use log::info;

use crate::loading::{with_graph, GraphRunner};
use crate::{AppError, CommonArgs};

pub(crate) fn label_propagation(
    args: CommonArgs,
    config: LabelPropagationConfig,
) -> Result<(), AppError> {
    let pool = args.thread_pool()?;
    with_graph(
        &args,
        LabelPropagationRunner {
            args: &args,
            config,
            pool,
        },
    )
}

struct LabelPropagationRunner<'a> {
    args: &'a CommonArgs,
    config: LabelPropagationConfig,
    pool: rayon::ThreadPool,
}

impl GraphRunner for LabelPropagationRunner<'_> {
    fn run<NI: Idx>(self, graph: &UndirectedCsrGraph<NI>) -> Result<(), AppError> {
        let lp = LabelPropagation::new(graph, self.config)?;
        let flag = TerminationFlag::running_true();

        let last = crate::time(self.args.runs, self.args.warmup_runs, || {
            lp.compute(&self.pool, &flag)
        });

        if let Some(outcome) = last {
            let result = outcome.into_result()?;
            info!(
                "Found {} communities after {} iterations (converged = {})",
                result.community_count(),
                result.ran_iterations(),
                result.did_converge()
            );
        }

        Ok(())
    }
}
