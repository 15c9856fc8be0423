use std::path::PathBuf;

use graph_builder::prelude::*;
use log::info;

use crate::{AppError, CommonArgs, FileFormat};

/// Loads the graph described by `args` and hands it to `run`.
///
/// The node id type and the input format are resolved at runtime, so
/// `run` has to be generic over the loaded graph.
pub(crate) fn with_graph<R>(args: &CommonArgs, run: R) -> Result<(), AppError>
where
    R: GraphRunner,
{
    info!(
        "Reading graph ({} bit) from: {:?}",
        if args.use_32_bit { "32" } else { "64" },
        args.path
    );

    let layout = if args.deduplicate {
        CsrLayout::Deduplicated
    } else {
        CsrLayout::Sorted
    };

    match (args.use_32_bit, args.format) {
        (true, FileFormat::EdgeList) => {
            run.run(&load::<u32, _>(args.path.clone(), EdgeListInput::default(), layout)?)
        }
        (true, FileFormat::Graph500) => {
            run.run(&load::<u32, _>(args.path.clone(), Graph500Input::default(), layout)?)
        }
        (false, FileFormat::EdgeList) => {
            run.run(&load::<usize, _>(args.path.clone(), EdgeListInput::default(), layout)?)
        }
        (false, FileFormat::Graph500) => {
            run.run(&load::<usize, _>(args.path.clone(), Graph500Input::default(), layout)?)
        }
    }
}

pub(crate) trait GraphRunner {
    fn run<NI: Idx>(self, graph: &UndirectedCsrGraph<NI>) -> Result<(), AppError>;
}

fn load<NI, Format>(
    path: PathBuf,
    file_format: Format,
    layout: CsrLayout,
) -> Result<UndirectedCsrGraph<NI>, AppError>
where
    NI: Idx,
    Format: InputCapabilities<NI>,
    Format::GraphInput: TryFrom<InputPath<PathBuf>>,
    UndirectedCsrGraph<NI>: TryFrom<(Format::GraphInput, CsrLayout)>,
    Error: From<<Format::GraphInput as TryFrom<InputPath<PathBuf>>>::Error>,
    Error: From<<UndirectedCsrGraph<NI> as TryFrom<(Format::GraphInput, CsrLayout)>>::Error>,
{
    let graph: UndirectedCsrGraph<NI> = GraphBuilder::new()
        .csr_layout(layout)
        .file_format(file_format)
        .path(path)
        .build()?;

    info!(
        "Loaded graph with {} nodes and {} relationships",
        graph.node_count().index(),
        graph.edge_count().index()
    );

    Ok(graph)
}
