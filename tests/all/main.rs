mod loops;
mod memory;
mod runs;

use tentative_loads::entity::EntityRef;
use tentative_loads::ir::{Block, BodyData, Context, InstData, InstKind, SpecTree};
use tentative_loads::{Config, TentativeLoads};

/// A body of `n` blocks chained in order, the last one returning.
pub(crate) fn linear(name: &str, n: usize) -> BodyData {
    let mut body = BodyData::new(name);
    body.add_blocks(n);
    for i in 1..n {
        body.add_edge(Block::new(i - 1), Block::new(i));
    }
    body.set_return(Block::new(n - 1));
    body
}

/// Run the analysis with the default configuration.
pub(crate) fn analyze(tree: &SpecTree) -> TentativeLoads {
    analyze_with(tree, &Config::new())
}

pub(crate) fn analyze_with(tree: &SpecTree, config: &Config) -> TentativeLoads {
    let _ = env_logger::try_init();
    let mut analysis = TentativeLoads::new(tree);
    analysis
        .run(tree, config)
        .expect("analysis of a well-formed tree");
    analysis
}

/// Append instructions of the given kinds to `block` of `ctx`.
pub(crate) fn append(
    tree: &mut SpecTree,
    ctx: Context,
    block: usize,
    kinds: impl IntoIterator<Item = InstKind>,
) -> Vec<tentative_loads::ir::Inst> {
    kinds
        .into_iter()
        .map(|kind| tree.append_inst(ctx, Block::new(block), InstData::new(kind)))
        .collect()
}
