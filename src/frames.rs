//! Frame lists.
//!
//! A [`FrameList`] is the analysis state at one program point: one
//! [`IntervalStore`] for globals and heap objects plus one per live stack
//! frame. Popping a frame forgets everything known about its stack objects.
//!
//! Both levels are copy-on-write. Control flow edges share one `Rc<FrameList>`,
//! and a frame list shares its stores with the lists it was cloned from; every
//! mutation goes through `Rc::make_mut`, so a store is only copied when a block
//! actually changes it.

use crate::ir::{Context, Object};
use crate::store::IntervalStore;
use core::ops::Range;
use std::rc::Rc;

/// The store tracking an object.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Home {
    /// The store shared by globals and heap objects.
    Global,
    /// The store of the frame at this depth.
    Frame(u32),
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Frame {
    owner: Context,
    store: Rc<IntervalStore>,
}

/// The stack of interval stores live at a program point.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameList {
    globals: Rc<IntervalStore>,
    frames: Vec<Frame>,
}

/// Two frame lists of different depth met at a join.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DepthMismatch {
    /// Depth of the incoming list.
    pub from: usize,
    /// Depth of the list merged into.
    pub into: usize,
}

impl FrameList {
    /// A frame list with no frames in which everything is verified.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live frames.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Owners of the live frames, outermost first.
    pub fn owners(&self) -> impl Iterator<Item = Context> + '_ {
        self.frames.iter().map(|f| f.owner)
    }

    /// Push a frame for `owner`. It starts with the global store's view of
    /// unlisted objects.
    pub fn push_frame(&mut self, owner: Context) {
        let store = if self.globals.all_others_clobbered() {
            IntervalStore::clobbered()
        } else {
            IntervalStore::new()
        };
        self.frames.push(Frame {
            owner,
            store: Rc::new(store),
        });
    }

    /// Pop the innermost frame, returning its owner.
    pub fn pop_frame(&mut self) -> Option<Context> {
        self.frames.pop().map(|f| f.owner)
    }

    /// The store for `home`, or `None` if that frame is not live.
    pub fn store(&self, home: Home) -> Option<&IntervalStore> {
        match home {
            Home::Global => Some(&self.globals),
            Home::Frame(depth) => self.frames.get(depth as usize).map(|f| &*f.store),
        }
    }

    /// The store for `home`, unshared so it can be written.
    pub fn store_mut(&mut self, home: Home) -> Option<&mut IntervalStore> {
        match home {
            Home::Global => Some(Rc::make_mut(&mut self.globals)),
            Home::Frame(depth) => self
                .frames
                .get_mut(depth as usize)
                .map(|f| Rc::make_mut(&mut f.store)),
        }
    }

    /// Are all `len` bytes of `object` from `offset` verified? Objects of
    /// frames that are not live are never verified.
    pub fn is_range_verified(&self, object: Object, home: Home, offset: u64, len: u64) -> bool {
        self.store(home)
            .is_some_and(|store| store.is_range_verified(object, offset, len))
    }

    /// Record `range` of `object` as verified. Stores are only unshared when
    /// something actually changes.
    pub fn add_verified(&mut self, object: Object, home: Home, range: Range<u64>) {
        let len = range.end.saturating_sub(range.start);
        if self.is_range_verified(object, home, range.start, len) {
            return;
        }
        if let Some(store) = self.store_mut(home) {
            store.add_verified(object, range);
        }
    }

    /// Make every byte of `object` tentative.
    pub fn clobber_object(&mut self, object: Object, home: Home) {
        let unchanged = self.store(home).is_none_or(|s| match s.get_readable(object) {
            Some(ranges) => ranges.is_empty(),
            None => s.all_others_clobbered(),
        });
        if unchanged {
            return;
        }
        if let Some(store) = self.store_mut(home) {
            store.clobber_object(object);
        }
    }

    /// A yield point was crossed: every store becomes fully tentative.
    pub fn mark_clobbered_all(&mut self) {
        let clobbered = Rc::new(IntervalStore::clobbered());
        self.globals = clobbered.clone();
        for frame in &mut self.frames {
            frame.store = clobbered.clone();
        }
    }

    /// Is every store of the list fully tentative?
    pub fn is_clobbered_all(&self) -> bool {
        core::iter::once(&self.globals)
            .chain(self.frames.iter().map(|f| &f.store))
            .all(|s| s.all_others_clobbered() && s.is_empty())
    }

    /// Merge `from` into `into` at a control flow join, store by store.
    pub fn merge(from: &FrameList, into: &mut FrameList) -> Result<(), DepthMismatch> {
        if from.depth() != into.depth() {
            return Err(DepthMismatch {
                from: from.depth(),
                into: into.depth(),
            });
        }
        merge_store(&from.globals, &mut into.globals);
        for (theirs, ours) in from.frames.iter().zip(into.frames.iter_mut()) {
            merge_store(&theirs.store, &mut ours.store);
        }
        Ok(())
    }

    /// Does `self` verify everything `other` verifies?
    pub fn covers(&self, other: &FrameList) -> bool {
        self.depth() == other.depth()
            && self.globals.covers(&other.globals)
            && self
                .frames
                .iter()
                .zip(&other.frames)
                .all(|(ours, theirs)| ours.store.covers(&theirs.store))
    }
}

fn merge_store(from: &Rc<IntervalStore>, into: &mut Rc<IntervalStore>) {
    if Rc::ptr_eq(from, into) || from.covers(into) {
        return;
    }
    if into.covers(from) {
        *into = from.clone();
        return;
    }
    IntervalStore::merge(from, Rc::make_mut(into));
}
