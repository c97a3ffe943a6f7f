use crate::{analyze, analyze_with, append, linear};
use smallvec::smallvec;
use tentative_loads::Config;
use tentative_loads::entity::EntityRef;
use tentative_loads::ir::*;

fn single_block() -> (SpecTree, Context, Object, Object) {
    let mut tree = SpecTree::new();
    let x = tree.add_object(ObjectData::global(16));
    let y = tree.add_object(ObjectData::heap(16));
    let body = tree.add_body(linear("f", 1));
    let ctx = tree.add_entry(body);
    (tree, ctx, x, y)
}

#[test]
fn write_then_read() {
    let (mut tree, ctx, x, _) = single_block();
    let insts = append(
        &mut tree,
        ctx,
        0,
        [
            InstKind::Fence,
            InstKind::store(Pointer::to(x, 0), 4),
            InstKind::load(Pointer::to(x, 0), 4),
        ],
    );
    let tl = analyze(&tree);
    assert_eq!(tl.classification(insts[2]), ThreadLocalState::NoCheck);
    assert!(!tl.reads_tentative_data(ctx));
    assert!(tl.crosses_yield_point(ctx));
}

#[test]
fn yield_point_invalidates() {
    let (mut tree, ctx, x, _) = single_block();
    let insts = append(
        &mut tree,
        ctx,
        0,
        [
            InstKind::store(Pointer::to(x, 0), 4),
            InstKind::Fence,
            InstKind::load(Pointer::to(x, 0), 4),
            // The checked load verifies its own bytes.
            InstKind::load(Pointer::to(x, 0), 4),
            InstKind::load(Pointer::to(x, 2), 4),
        ],
    );
    let tl = analyze(&tree);
    assert_eq!(tl.classification(insts[2]), ThreadLocalState::MustCheck);
    assert_eq!(tl.classification(insts[3]), ThreadLocalState::NoCheck);
    assert_eq!(tl.classification(insts[4]), ThreadLocalState::MustCheck);
    assert!(tl.requires_runtime_check(&tree, &Config::new(), insts[2]));
    assert!(tl.reads_tentative_data(ctx));
}

#[test]
fn disjoint_objects() {
    let (mut tree, ctx, x, y) = single_block();
    let lock = InstKind::Call {
        target: CallTarget::Indirect,
        lock: LockDomain::Globals(smallvec![x]),
    };
    let insts = append(
        &mut tree,
        ctx,
        0,
        [
            InstKind::Fence,
            InstKind::store(Pointer::to(x, 0), 8),
            InstKind::store(Pointer::to(y, 0), 8),
            lock,
            InstKind::load(Pointer::to(x, 0), 4),
            InstKind::load(Pointer::to(y, 4), 4),
        ],
    );
    let tl = analyze(&tree);
    assert_eq!(tl.classification(insts[4]), ThreadLocalState::MustCheck);
    assert_eq!(tl.classification(insts[5]), ThreadLocalState::NoCheck);
}

#[test]
fn calls_and_yield_functions() {
    let (mut tree, ctx, x, _) = single_block();
    let (quiet, sync) = (FuncRef::new(0), FuncRef::new(1));
    tree.add_yield_function(sync);
    let pessimistic = InstKind::Call {
        target: CallTarget::Direct(sync),
        lock: LockDomain::Pessimistic,
    };
    let insts = append(
        &mut tree,
        ctx,
        0,
        [
            InstKind::Fence,
            InstKind::store(Pointer::to(x, 0), 4),
            InstKind::call(CallTarget::Direct(quiet)),
            InstKind::load(Pointer::to(x, 0), 4),
            pessimistic,
            InstKind::load(Pointer::to(x, 0), 4),
            InstKind::call(CallTarget::Direct(sync)),
            InstKind::load(Pointer::to(x, 0), 4),
            InstKind::store(Pointer::to(x, 0), 4),
            InstKind::call(CallTarget::Indirect),
            InstKind::load(Pointer::to(x, 0), 4),
        ],
    );
    let tl = analyze(&tree);
    assert_eq!(tl.classification(insts[3]), ThreadLocalState::NoCheck);
    assert_eq!(tl.classification(insts[5]), ThreadLocalState::NoCheck);
    assert_eq!(tl.classification(insts[7]), ThreadLocalState::MustCheck);
    assert_eq!(tl.classification(insts[10]), ThreadLocalState::MustCheck);
}

#[test]
fn exempt_reads() {
    let mut tree = SpecTree::new();
    let konst = tree.add_object(ObjectData::constant_global(8));
    let private = tree.add_object(ObjectData::heap(8).private());
    let x = tree.add_object(ObjectData::global(8));
    let body = tree.add_body(linear("f", 1));
    let ctx = tree.add_entry(body);
    let insts = append(
        &mut tree,
        ctx,
        0,
        [
            InstKind::Fence,
            InstKind::load(Pointer::to(konst, 0), 4),
            InstKind::load(Pointer::to(private, 0), 4),
            InstKind::load(Pointer::Null, 4),
            InstKind::load(Pointer::to(x, 0), 0),
            InstKind::load(Pointer::to(x, -4), 4),
        ],
    );
    let tl = analyze(&tree);
    for &inst in &insts[1..5] {
        assert_eq!(tl.classification(inst), ThreadLocalState::NeverCheck);
    }
    assert_eq!(tl.classification(insts[5]), ThreadLocalState::MustCheck);
}

#[test]
fn seeded_never_check_is_kept() {
    let (mut tree, ctx, x, _) = single_block();
    tree.append_inst(ctx, Block::new(0), InstData::new(InstKind::Fence));
    let load = tree.append_inst(
        ctx,
        Block::new(0),
        InstData::new(InstKind::load(Pointer::to(x, 0), 4))
            .with_thread_local(ThreadLocalState::NeverCheck),
    );
    let tl = analyze(&tree);
    assert_eq!(tl.classification(load), ThreadLocalState::NeverCheck);
    assert!(!tl.requires_runtime_check(&tree, &Config::new(), load));
}

#[test]
fn allocations_and_transfers() {
    let mut tree = SpecTree::new();
    let src = tree.add_object(ObjectData::global(16));
    let dst = tree.add_object(ObjectData::heap(16));
    let fresh = tree.add_object(ObjectData::heap(32));
    let buf = tree.add_object(ObjectData::global(8));
    let body = tree.add_body(linear("f", 1));
    let ctx = tree.add_entry(body);
    let copy = InstKind::MemCopy {
        dest: Pointer::to(dst, 0),
        src: Pointer::to(src, 0),
        len: Some(16),
        reads: smallvec![ValueRange::known(0, 16)],
    };
    let insts = append(
        &mut tree,
        ctx,
        0,
        [
            InstKind::Fence,
            copy,
            InstKind::load(Pointer::to(dst, 8), 8),
            InstKind::load(Pointer::to(src, 0), 8),
            InstKind::Malloc {
                object: fresh,
                size: 32,
            },
            InstKind::load(Pointer::to(fresh, 24), 8),
            InstKind::FileRead {
                buffer: Pointer::to(buf, 0),
                len: 8,
            },
            InstKind::load(Pointer::to(buf, 0), 8),
            InstKind::MemSet {
                dest: Pointer::to(dst, 0),
                len: None,
            },
        ],
    );
    let tl = analyze(&tree);
    let config = Config::new();
    // The copy read tentative source bytes.
    assert_eq!(tl.classification(insts[1]), ThreadLocalState::MustCheck);
    assert!(tl.requires_runtime_check(&tree, &config, insts[1]));
    // Both ends of the copy are verified afterwards.
    assert_eq!(tl.classification(insts[2]), ThreadLocalState::NoCheck);
    assert_eq!(tl.classification(insts[3]), ThreadLocalState::NoCheck);
    assert_eq!(tl.classification(insts[5]), ThreadLocalState::NoCheck);
    assert_eq!(tl.classification(insts[7]), ThreadLocalState::NoCheck);
    // Calls are never checked for interference themselves.
    assert!(!tl.requires_runtime_check(&tree, &config, insts[4]));
}

#[test]
fn atomics() {
    let (mut tree, ctx, x, y) = single_block();
    let insts = append(
        &mut tree,
        ctx,
        0,
        [
            InstKind::store(Pointer::to(x, 0), 8),
            InstKind::store(Pointer::to(y, 0), 8),
            InstKind::AtomicRmw {
                ptr: Pointer::to(y, 0),
                size: 4,
                simple: true,
            },
            InstKind::load(Pointer::to(x, 0), 4),
            InstKind::Load {
                ptr: Pointer::to(y, 0),
                size: 4,
                ordered: true,
                volatile: false,
                simple: false,
                parts: smallvec![],
            },
            InstKind::load(Pointer::to(x, 0), 4),
        ],
    );
    let tl = analyze(&tree);
    assert_eq!(tl.classification(insts[2]), ThreadLocalState::MustCheck);
    // A simple atomic is not a yield point.
    assert_eq!(tl.classification(insts[3]), ThreadLocalState::NoCheck);
    assert_eq!(tl.classification(insts[4]), ThreadLocalState::MustCheck);
    // An ordered load is.
    assert_eq!(tl.classification(insts[5]), ThreadLocalState::MustCheck);
}

#[test]
fn lock_acquire_is_a_yield_point() {
    let (mut tree, ctx, x, lock) = single_block();
    append(
        &mut tree,
        ctx,
        0,
        [InstKind::Fence, InstKind::store(Pointer::to(x, 0), 8)],
    );
    // A compare-exchange on a lock word whose old value nobody knows.
    let acquire = tree.append_inst(
        ctx,
        Block::new(0),
        InstData::new(InstKind::AtomicRmw {
            ptr: Pointer::to(lock, 0),
            size: 4,
            simple: false,
        })
        .with_result(ResultState::Unknown),
    );
    let after = append(&mut tree, ctx, 0, [InstKind::load(Pointer::to(x, 0), 4)]);
    let tl = analyze(&tree);
    assert_eq!(tl.classification(acquire), ThreadLocalState::MustCheck);
    assert_eq!(tl.classification(after[0]), ThreadLocalState::MustCheck);
    assert!(tl.reads_tentative_data(ctx));
    assert!(tl.crosses_yield_point(ctx));
}

#[test]
fn writes_through_unknown_pointers() {
    let (mut tree, ctx, x, _) = single_block();
    let insts = append(
        &mut tree,
        ctx,
        0,
        [
            InstKind::load(Pointer::to(x, 0), 4),
            InstKind::store(Pointer::Unknown, 4),
            InstKind::load(Pointer::to(x, 0), 4),
        ],
    );
    let tl = analyze(&tree);
    assert_eq!(tl.classification(insts[0]), ThreadLocalState::NoCheck);
    assert_eq!(tl.classification(insts[2]), ThreadLocalState::MustCheck);
    // Nothing is known any more, but no other thread ran.
    assert!(!tl.crosses_yield_point(ctx));
}

/// block0 -> block1 | block2 -> block3
fn diamond() -> (SpecTree, Context, Object, Object) {
    let mut body = BodyData::new("diamond");
    let b0 = body.add_blocks(4);
    let (b1, b2, b3) = (Block::new(1), Block::new(2), Block::new(3));
    body.add_edge(b0, b1);
    body.add_edge(b0, b2);
    body.add_edge(b1, b3);
    body.add_edge(b2, b3);
    body.set_return(b3);
    let mut tree = SpecTree::new();
    let x = tree.add_object(ObjectData::global(8));
    let y = tree.add_object(ObjectData::global(8));
    let body = tree.add_body(body);
    let ctx = tree.add_entry(body);
    for block in [b0, b1, b2, b3] {
        tree.instantiate_block(ctx, block);
    }
    append(&mut tree, ctx, 0, [InstKind::Fence]);
    (tree, ctx, x, y)
}

#[test]
fn joins_intersect() {
    let (mut tree, ctx, x, y) = diamond();
    append(
        &mut tree,
        ctx,
        1,
        [
            InstKind::store(Pointer::to(x, 0), 8),
            InstKind::store(Pointer::to(y, 0), 4),
        ],
    );
    append(&mut tree, ctx, 2, [InstKind::store(Pointer::to(x, 0), 8)]);
    let insts = append(
        &mut tree,
        ctx,
        3,
        [
            InstKind::load(Pointer::to(x, 4), 4),
            InstKind::load(Pointer::to(y, 0), 4),
        ],
    );
    let tl = analyze(&tree);
    assert_eq!(tl.classification(insts[0]), ThreadLocalState::NoCheck);
    assert_eq!(tl.classification(insts[1]), ThreadLocalState::MustCheck);
}

#[test]
fn dead_edges_do_not_merge() {
    let (mut tree, ctx, x, _) = diamond();
    tree.kill_edge(ctx, Block::new(0), Block::new(2));
    append(&mut tree, ctx, 1, [InstKind::store(Pointer::to(x, 0), 8)]);
    let unreached = append(&mut tree, ctx, 2, [InstKind::load(Pointer::to(x, 0), 4)]);
    let insts = append(&mut tree, ctx, 3, [InstKind::load(Pointer::to(x, 0), 4)]);
    let tl = analyze(&tree);
    assert_eq!(tl.classification(insts[0]), ThreadLocalState::NoCheck);
    assert_eq!(tl.classification(unreached[0]), ThreadLocalState::Unevaluated);
}

#[test]
fn ambiguous_pointers() {
    let (mut tree, ctx, x, y) = single_block();
    let either = Pointer::any_of([Target::new(x, 0), Target::new(y, 0)]);
    let insts = append(
        &mut tree,
        ctx,
        0,
        [
            InstKind::Fence,
            InstKind::store(Pointer::to(x, 0), 4),
            // Stores through an ambiguous pointer verify nothing.
            InstKind::store(either.clone(), 4),
            InstKind::load(either, 4),
            InstKind::load(Pointer::Unknown, 4),
        ],
    );
    let tl = analyze(&tree);
    assert_eq!(tl.classification(insts[3]), ThreadLocalState::MustCheck);
    assert_eq!(tl.classification(insts[4]), ThreadLocalState::MustCheck);
}

#[test]
fn single_threaded_program() {
    let (mut tree, ctx, x, _) = single_block();
    let insts = append(
        &mut tree,
        ctx,
        0,
        [
            InstKind::store(Pointer::to(x, 0), 4),
            InstKind::call(CallTarget::Indirect),
            InstKind::load(Pointer::to(x, 0), 4),
            InstKind::Fence,
            InstKind::load(Pointer::to(x, 0), 4),
        ],
    );
    let mut config = Config::new();
    config.program_single_threaded(true);
    let tl = analyze_with(&tree, &config);
    assert_eq!(tl.classification(insts[2]), ThreadLocalState::NeverCheck);
    assert_eq!(tl.classification(insts[4]), ThreadLocalState::NeverCheck);
    assert!(!tl.reads_tentative_data(ctx));
}
