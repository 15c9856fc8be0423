use graph_builder::prelude::{Idx, UndirectedCsrGraph};
use graph_compute::prelude::{TerminationFlag, Wcc, WccConfig};
use log::info;

use crate::loading::{with_graph, GraphRunner};
use crate::{AppError, CommonArgs};

pub(crate) fn wcc(args: CommonArgs, config: WccConfig) -> Result<(), AppError> {
    let pool = args.thread_pool()?;
    with_graph(
        &args,
        WccRunner {
            args: &args,
            config,
            pool,
        },
    )
}

struct WccRunner<'a> {
    args: &'a CommonArgs,
    config: WccConfig,
    pool: rayon::ThreadPool,
}

impl GraphRunner for WccRunner<'_> {
    fn run<NI: Idx>(self, graph: &UndirectedCsrGraph<NI>) -> Result<(), AppError> {
        let wcc = Wcc::new(graph, self.config)?;
        let flag = TerminationFlag::running_true();

        let last = crate::time(self.args.runs, self.args.warmup_runs, || {
            wcc.compute(&self.pool, &flag)
        });

        if let Some(outcome) = last {
            let dss = outcome.into_result()?;
            let sizes = dss.component_sizes();
            let largest = sizes.values().copied().max().unwrap_or_default();
            info!(
                "Found {} components, the largest has {} nodes",
                sizes.len(),
                largest
            );
        }

        Ok(())
    }
}
