//! Signal equivalence oracle.
//!
//! A `SigMap` maps every bit of a module to the canonical representative of
//! its equivalence class, as implied by the module's connection list. It is
//! built once and is immutable afterwards; all lookups go through a
//! precomputed table.
//!
//! Constants are deliberately excluded from unification: two otherwise
//! unrelated wires that are both tied to the same constant must not end up
//! in one class.

use indexmap::{IndexMap, IndexSet};
use union_find_rs::{disjoint_sets::DisjointSets, traits::UnionFind};

use crate::{Module, SigBit, SigSpec};

pub struct SigMap {
    map: IndexMap<SigBit, SigBit>,
}

impl SigMap {
    /// Builds the map from every connection of `module`.
    pub fn new(module: &Module) -> SigMap {
        SigMap::from_connections(module, module.connections().iter())
    }

    /// Builds the map from a caller-filtered connection list. For each
    /// connection, corresponding bits of both sides are unified unless either
    /// one is a constant.
    ///
    /// The representative of each class prefers a bit of an input-port wire,
    /// then a bit of a public-named wire, then the first member seen.
    pub fn from_connections<'a>(
        module: &Module,
        connections: impl Iterator<Item = &'a (SigSpec, SigSpec)>,
    ) -> SigMap {
        let mut sets: DisjointSets<SigBit> = DisjointSets::new();
        let mut seen: IndexSet<SigBit> = IndexSet::new();
        for (lhs, rhs) in connections {
            assert_eq!(lhs.len(), rhs.len(), "connection width mismatch");
            for (lhs_bit, rhs_bit) in lhs.iter().zip(rhs.iter()) {
                if lhs_bit.is_const() || rhs_bit.is_const() {
                    continue;
                }
                for bit in [lhs_bit, rhs_bit] {
                    if seen.insert(bit) {
                        let _ = sets.make_set(bit);
                    }
                }
                // work around https://gitlab.com/rustychoi/union_find/-/issues/1
                if sets.find_set(&lhs_bit).unwrap() != sets.find_set(&rhs_bit).unwrap() {
                    sets.union(&lhs_bit, &rhs_bit).unwrap();
                }
            }
        }

        // Re-pick the root of each class by preference.
        let mut classes: IndexMap<SigBit, Vec<SigBit>> = IndexMap::new();
        for &bit in &seen {
            let root = sets.find_set(&bit).unwrap().clone();
            classes.entry(root).or_default().push(bit);
        }
        let mut map = IndexMap::new();
        for members in classes.values() {
            let representative = pick_representative(module, members);
            for &bit in members {
                map.insert(bit, representative);
            }
        }
        SigMap { map }
    }

    /// The canonical representative of `bit`. Bits that never took part in a
    /// connection map to themselves. Idempotent.
    pub fn map_bit(&self, bit: SigBit) -> SigBit {
        self.map.get(&bit).copied().unwrap_or(bit)
    }

    pub fn map_spec(&self, spec: &SigSpec) -> SigSpec {
        spec.iter().map(|bit| self.map_bit(bit)).collect()
    }

    /// Every bit that appears in the map, in first-seen order.
    pub fn allbits(&self) -> impl Iterator<Item = SigBit> + '_ {
        self.map.keys().copied()
    }
}

// Ties within a preference tier break toward the lowest bit, so that
// re-running a pass picks the same representative regardless of the
// orientation of the connections it emitted.
fn pick_representative(module: &Module, members: &[SigBit]) -> SigBit {
    let is_input = |bit: &SigBit| module.wire(bit.wire().unwrap()).port_input;
    let is_public = |bit: &SigBit| module.wire(bit.wire().unwrap()).is_public();
    if let Some(&bit) = members.iter().filter(|&bit| is_input(bit)).min() {
        return bit;
    }
    if let Some(&bit) = members.iter().filter(|&bit| is_public(bit)).min() {
        return bit;
    }
    *members.iter().min().unwrap()
}
