use crate::{analyze, append};
use tentative_loads::entity::EntityRef;
use tentative_loads::ir::*;
use tentative_loads::{Config, TentativeLoads};

/// block0 (preheader) -> block1 (header) -> block2 (latch) -> block1 | block3
fn simple_loop() -> (SpecTree, Context, Loop, Object) {
    let mut body = BodyData::new("looper");
    let b0 = body.add_blocks(4);
    let (b1, b2, b3) = (Block::new(1), Block::new(2), Block::new(3));
    body.add_edge(b0, b1);
    body.add_edge(b1, b2);
    body.add_edge(b2, b1);
    body.add_edge(b2, b3);
    body.set_return(b3);
    let lp = body.add_loop(b1, 2, b0, b2);
    let mut tree = SpecTree::new();
    let x = tree.add_object(ObjectData::global(8));
    let body = tree.add_body(body);
    let ctx = tree.add_entry(body);
    append(
        &mut tree,
        ctx,
        0,
        [InstKind::Fence, InstKind::store(Pointer::to(x, 0), 8)],
    );
    (tree, ctx, lp, x)
}

fn instantiate_loop(tree: &mut SpecTree, ctx: Context) {
    for block in 0..4 {
        tree.instantiate_block(ctx, Block::new(block));
    }
}

#[test]
fn loop_without_yield_is_stable() {
    let (mut tree, ctx, _, x) = simple_loop();
    instantiate_loop(&mut tree, ctx);
    let header = append(&mut tree, ctx, 1, [InstKind::load(Pointer::to(x, 0), 4)]);
    append(&mut tree, ctx, 2, [InstKind::store(Pointer::to(x, 4), 4)]);
    let exit = append(&mut tree, ctx, 3, [InstKind::load(Pointer::to(x, 0), 8)]);
    let tl = analyze(&tree);
    assert_eq!(tl.classification(header[0]), ThreadLocalState::NoCheck);
    assert_eq!(tl.classification(exit[0]), ThreadLocalState::NoCheck);
    assert!(!tl.reads_tentative_data(ctx));
}

#[test]
fn yield_on_back_edge() {
    let (mut tree, ctx, _, x) = simple_loop();
    instantiate_loop(&mut tree, ctx);
    let header = append(&mut tree, ctx, 1, [InstKind::load(Pointer::to(x, 0), 4)]);
    append(&mut tree, ctx, 2, [InstKind::Fence]);
    let exit = append(&mut tree, ctx, 3, [InstKind::load(Pointer::to(x, 4), 4)]);
    let tl = analyze(&tree);
    // The first optimistic pass found the load verified; the real latch
    // store does not agree.
    assert_eq!(tl.classification(header[0]), ThreadLocalState::MustCheck);
    assert_eq!(tl.classification(exit[0]), ThreadLocalState::MustCheck);
    assert!(tl.reads_tentative_data(ctx));
}

#[test]
fn dead_back_edge() {
    let (mut tree, ctx, _, x) = simple_loop();
    instantiate_loop(&mut tree, ctx);
    tree.kill_edge(ctx, Block::new(2), Block::new(1));
    let header = append(&mut tree, ctx, 1, [InstKind::load(Pointer::to(x, 0), 4)]);
    append(&mut tree, ctx, 2, [InstKind::Fence]);
    let tl = analyze(&tree);
    assert_eq!(tl.classification(header[0]), ThreadLocalState::NoCheck);
}

#[test]
fn peeled_iterations() {
    let (mut tree, ctx, lp, x) = simple_loop();
    let (b1, b2, b3) = (Block::new(1), Block::new(2), Block::new(3));
    let peel = tree.add_peel(ctx, lp);
    let first = tree.add_iteration(peel);
    let second = tree.add_iteration(peel);
    tree.peel_mut(peel).terminated = true;

    let load0 = append(&mut tree, first, 1, [InstKind::load(Pointer::to(x, 0), 4)]);
    append(&mut tree, first, 2, [InstKind::Fence]);
    tree.kill_edge(first, b2, b3);
    let load1 = append(&mut tree, second, 1, [InstKind::load(Pointer::to(x, 0), 4)]);
    tree.instantiate_block(second, b2);
    tree.kill_edge(second, b2, b1);
    let exit = append(
        &mut tree,
        ctx,
        3,
        [
            InstKind::load(Pointer::to(x, 0), 4),
            InstKind::load(Pointer::to(x, 4), 4),
        ],
    );

    let tl = analyze(&tree);
    assert_eq!(tl.classification(load0[0]), ThreadLocalState::NoCheck);
    assert_eq!(tl.classification(load1[0]), ThreadLocalState::MustCheck);
    // The second iteration's check verified bytes 0..4 again.
    assert_eq!(tl.classification(exit[0]), ThreadLocalState::NoCheck);
    assert_eq!(tl.classification(exit[1]), ThreadLocalState::MustCheck);
    assert!(!tl.reads_tentative_data(first));
    assert!(tl.reads_tentative_data(second));
    assert!(tl.peel_reads_tentative_data(&tree, peel));
    assert!(tl.reads_tentative_data(ctx));

    let stats = tl.count_tentative_instructions(&tree);
    assert_eq!(stats.get(second).here, 1);
    assert_eq!(stats.get(ctx).here, 1);
    assert_eq!(stats.total(ctx), 2);
}

#[test]
fn disabled_peel_escalates_phis() {
    let (mut tree, ctx, lp, x) = simple_loop();
    let (b1, b2) = (Block::new(1), Block::new(2));
    let peel = tree.add_peel(ctx, lp);
    let only = tree.add_iteration(peel);
    tree.peel_mut(peel).terminated = true;
    tree.peel_mut(peel).enabled = false;

    append(
        &mut tree,
        only,
        1,
        [InstKind::Fence, InstKind::load(Pointer::to(x, 0), 4)],
    );
    tree.instantiate_block(only, b2);
    tree.kill_edge(only, b2, b1);
    let phi = tree.append_inst(
        ctx,
        Block::new(3),
        InstData::new(InstKind::Phi).with_result(ResultState::Known),
    );
    let unknown_phi = tree.append_inst(
        ctx,
        Block::new(3),
        InstData::new(InstKind::Phi).with_result(ResultState::Unknown),
    );
    let config = Config::new();
    let tl = analyze(&tree);
    assert!(tl.reads_tentative_data(only));
    assert!(tl.requires_runtime_check(&tree, &config, phi));
    assert!(!tl.requires_runtime_check(&tree, &config, unknown_phi));
}

#[test]
fn disabled_peel_verifies_nothing() {
    let (mut tree, ctx, lp, x) = simple_loop();
    let (b1, b2) = (Block::new(1), Block::new(2));
    let y = tree.add_object(ObjectData::global(8));
    let peel = tree.add_peel(ctx, lp);
    let only = tree.add_iteration(peel);
    tree.peel_mut(peel).terminated = true;
    tree.peel_mut(peel).enabled = false;
    append(&mut tree, only, 1, [InstKind::store(Pointer::to(y, 0), 8)]);
    tree.instantiate_block(only, b2);
    tree.kill_edge(only, b2, b1);
    let exit = append(
        &mut tree,
        ctx,
        3,
        [
            InstKind::load(Pointer::to(y, 0), 4),
            InstKind::load(Pointer::to(x, 0), 4),
        ],
    );
    let tl = analyze(&tree);
    assert_eq!(tl.classification(exit[0]), ThreadLocalState::MustCheck);
    assert_eq!(tl.classification(exit[1]), ThreadLocalState::NoCheck);
}

/// A loop nested in another, both walked in place.
#[test]
fn nested_loops() {
    // block0 -> block1 (outer header) -> block2 (inner header, latch)
    //   -> block2 | block3 (outer latch) -> block1 | block4
    let mut body = BodyData::new("nest");
    let b0 = body.add_blocks(5);
    let b: Vec<Block> = (0..5).map(Block::new).collect();
    body.add_edge(b0, b[1]);
    body.add_edge(b[1], b[2]);
    body.add_edge(b[2], b[2]);
    body.add_edge(b[2], b[3]);
    body.add_edge(b[3], b[1]);
    body.add_edge(b[3], b[4]);
    body.set_return(b[4]);
    body.add_loop(b[1], 3, b0, b[3]);
    body.add_loop(b[2], 1, b[1], b[2]);

    let mut tree = SpecTree::new();
    let x = tree.add_object(ObjectData::global(8));
    let y = tree.add_object(ObjectData::global(8));
    let body = tree.add_body(body);
    let ctx = tree.add_entry(body);
    for &block in &b {
        tree.instantiate_block(ctx, block);
    }
    append(
        &mut tree,
        ctx,
        0,
        [
            InstKind::Fence,
            InstKind::store(Pointer::to(x, 0), 8),
            InstKind::store(Pointer::to(y, 0), 8),
        ],
    );
    let outer = append(&mut tree, ctx, 1, [InstKind::load(Pointer::to(x, 0), 4)]);
    let inner = append(
        &mut tree,
        ctx,
        2,
        [
            InstKind::load(Pointer::to(y, 0), 4),
            InstKind::call(CallTarget::Indirect),
        ],
    );
    let exit = append(&mut tree, ctx, 4, [InstKind::load(Pointer::to(x, 4), 4)]);

    let tl = analyze(&tree);
    assert_eq!(tl.classification(outer[0]), ThreadLocalState::MustCheck);
    assert_eq!(tl.classification(inner[0]), ThreadLocalState::MustCheck);
    assert_eq!(tl.classification(exit[0]), ThreadLocalState::MustCheck);
}

#[test]
fn bounded_passes() {
    let (mut tree, ctx, _, x) = simple_loop();
    instantiate_loop(&mut tree, ctx);
    let header = append(&mut tree, ctx, 1, [InstKind::load(Pointer::to(x, 0), 4)]);
    append(&mut tree, ctx, 2, [InstKind::Fence]);
    let mut config = Config::new();
    config.max_loop_passes(2);
    let mut tl = TentativeLoads::new(&tree);
    tl.run(&tree, &config).unwrap();
    assert_eq!(tl.classification(header[0]), ThreadLocalState::MustCheck);
}
