use crate::{append, linear};
use tentative_loads::entity::EntityRef;
use tentative_loads::ir::*;
use tentative_loads::timing::{self, Pass};
use tentative_loads::{Config, ConfigError, TentativeError, TentativeLoads};

fn fenced_load() -> (SpecTree, Context, Inst) {
    let mut tree = SpecTree::new();
    let x = tree.add_object(ObjectData::global(8));
    let body = tree.add_body(linear("main", 1));
    let ctx = tree.add_entry(body);
    let insts = append(
        &mut tree,
        ctx,
        0,
        [InstKind::Fence, InstKind::load(Pointer::to(x, 0), 4)],
    );
    (tree, ctx, insts[1])
}

#[test]
fn reset_and_rerun() -> Result<(), TentativeError> {
    let _ = env_logger::try_init();
    let (tree, ctx, load) = fenced_load();
    let config = Config::new();
    let mut tl = TentativeLoads::new(&tree);
    tl.run(&tree, &config)?;
    assert_eq!(tl.run(&tree, &config), Err(TentativeError::AlreadyRun));

    tl.reset(&tree);
    assert!(!tl.has_run());
    assert!(!tl.reads_tentative_data(ctx));
    assert_eq!(tl.classification(load), ThreadLocalState::Unevaluated);

    tl.run(&tree, &config)?;
    assert_eq!(tl.classification(load), ThreadLocalState::MustCheck);
    assert!(tl.reads_tentative_data(ctx));
    Ok(())
}

#[test]
fn invalid_configuration() {
    let (tree, ..) = fenced_load();
    let mut config = Config::new();
    config.max_loop_passes(1);
    let mut tl = TentativeLoads::new(&tree);
    assert_eq!(
        tl.run(&tree, &config),
        Err(TentativeError::Config(ConfigError::TooFewLoopPasses(1)))
    );
    assert!(!tl.has_run());
}

#[test]
fn verifier_rejects_broken_trees() {
    let (mut tree, ctx, _) = fenced_load();
    // A load from an object that was never declared.
    append(
        &mut tree,
        ctx,
        0,
        [InstKind::load(Pointer::to(Object::new(9), 0), 4)],
    );
    let mut tl = TentativeLoads::new(&tree);
    match tl.run(&tree, &Config::new()) {
        Err(TentativeError::Verifier(errors)) => assert_eq!(errors.0.len(), 1),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn omitted_checks_keep_summaries() {
    let (tree, ctx, load) = fenced_load();
    let mut config = Config::new();
    config.omit_checks(true);
    let mut tl = TentativeLoads::new(&tree);
    tl.run(&tree, &config).unwrap();
    assert!(!tl.requires_runtime_check(&tree, &config, load));
    assert!(tl.requires_any_runtime_check(&tree, load));
    assert!(tl.reads_tentative_data(ctx));
    assert_eq!(tl.count_tentative_instructions(&tree).total(ctx), 1);
}

#[test]
fn passes_are_timed() {
    let (tree, ..) = fenced_load();
    timing::take_current();
    let mut tl = TentativeLoads::new(&tree);
    tl.run(&tree, &Config::new()).unwrap();
    tl.add_checkpoint_failed_blocks(&tree);
    let times = timing::take_current();
    assert_eq!(times.get(Pass::TentativeLoads).runs, 1);
    assert_eq!(times.get(Pass::Verifier).runs, 1);
    assert_eq!(times.get(Pass::CheckpointBlocks).runs, 1);
    assert_eq!(times.get(Pass::Reset).runs, 0);
    assert_eq!(timing::take_current().get(Pass::TentativeLoads).runs, 0);
}

#[test]
fn committed_contexts_are_skipped() {
    let (mut tree, ctx, load) = fenced_load();
    tree.context_mut(ctx).committed = true;
    let tl = crate::analyze(&tree);
    assert_eq!(tl.classification(load), ThreadLocalState::MustCheck);
    assert_eq!(tl.count_tentative_instructions(&tree).get(ctx).here, 0);
    assert!(tl.add_checkpoint_failed_blocks(&tree).is_empty());
}
