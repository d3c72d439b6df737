//! Connected-wire merging.
//!
//! Every weakly connected component of the wire-to-wire connection graph is
//! collapsed onto a single representative bit: cell ports and connections are
//! rewritten to reference the representative, and the connection list is
//! reduced to one representative-to-member connection per contiguous run.

use indexmap::{IndexMap, IndexSet};

use weft_netlist::{Design, Module, Selection, SigBit, SigMap, SigSpec};

/// Runs the pass on every selected module. Returns whether any connection
/// changed; if so, the `opt.did_something` scratchpad key is set.
pub fn merge_wires(design: &mut Design, selection: &Selection) -> bool {
    log::debug!("executing merge-wires pass (detect connected wires)");

    let names: Vec<String> = design
        .modules()
        .filter(|module| selection.selected_module(module))
        .map(|module| module.name().to_string())
        .collect();

    let mut changed_connections = 0;
    for name in &names {
        changed_connections += merge_module_wires(design.module_mut(name));
    }

    if changed_connections > 0 {
        design.scratchpad_set_bool("opt.did_something", true);
    }
    log::debug!("modified a total of {} connections", changed_connections);
    changed_connections > 0
}

fn merge_module_wires(module: &mut Module) -> usize {
    // Constant-bearing connections are left out of the map, so that two
    // components tied to the same constant do not merge.
    let sigmap = SigMap::from_connections(
        module,
        module.connections().iter().filter(|(lhs, rhs)| {
            lhs.iter().all(SigBit::is_wire) && rhs.iter().all(SigBit::is_wire)
        }),
    );

    log::debug!("finding weakly connected components of bits in module `{}`", module.name());

    let mut components: IndexMap<SigBit, IndexSet<SigBit>> = IndexMap::new();
    for bit in sigmap.allbits() {
        components.entry(sigmap.map_bit(bit)).or_default().insert(bit);
    }

    let mut bit_to_repr: IndexMap<SigBit, SigBit> = IndexMap::new();
    for (&representative, members) in &components {
        log::debug!(
            "representative bit for component `{}` is `{}`",
            module.display_sig(&members.iter().copied().collect()),
            module.display_bit(representative)
        );
        for &bit in members {
            if bit != representative {
                bit_to_repr.insert(bit, representative);
            }
        }
    }

    // Rewrite every cell port through the representative map.
    let cell_ids: Vec<_> = module.cells().map(|(id, _)| id).collect();
    for id in cell_ids {
        let ports: Vec<_> = module.cell(id).ports().map(|(port, _)| port).collect();
        for port in ports {
            let old = module.cell(id).port(port).clone();
            let mut new = old.clone();
            new.replace(&bit_to_repr);
            if new != old {
                log::debug!(
                    "mapped cell `{}` port {} from `{}` to `{}`",
                    module.cell(id).name(),
                    port,
                    module.display_sig(&old),
                    module.display_sig(&new)
                );
                module.cell_mut(id).set_port(port, new);
            }
        }
    }

    // Remove bits connected to themselves. A member bit and its
    // representative canonicalize identically, so every intra-component
    // connection collapses here; this runs before the representative rewrite
    // below so that the count reflects the pre-rewrite structure.
    let mut connections = std::mem::take(module.connections_mut());
    let mut changed = 0;
    for (lhs, rhs) in &mut connections {
        let first = sigmap.map_spec(lhs);
        let second = sigmap.map_spec(rhs);
        let mut modified = false;
        for index in (0..first.len()).rev() {
            if first[index] == second[index] {
                lhs.remove_at(index);
                rhs.remove_at(index);
                modified = true;
            }
        }
        if modified {
            changed += 1;
        }
    }
    connections.retain(|(lhs, rhs)| {
        debug_assert_eq!(lhs.len(), rhs.len());
        !lhs.is_empty()
    });

    // Whatever survives is rewritten to reference representatives only.
    for (lhs, rhs) in &mut connections {
        let before = (lhs.clone(), rhs.clone());
        lhs.replace(&bit_to_repr);
        rhs.replace(&bit_to_repr);
        if *lhs != before.0 || *rhs != before.1 {
            log::debug!(
                "mapped connection `{} <- {}` to `{} <- {}`",
                module.display_sig(&before.0),
                module.display_sig(&before.1),
                module.display_sig(lhs),
                module.display_sig(rhs)
            );
        }
    }
    *module.connections_mut() = connections;

    // Connect each member back to its representative, coalescing runs that
    // connect the same pair of wires into one multi-bit connection.
    let mut pairs: Vec<(SigSpec, SigSpec)> = bit_to_repr
        .iter()
        .map(|(&member, &repr)| (SigSpec::from(member), SigSpec::from(repr)))
        .collect();
    pairs.sort_by_key(|(member, repr)| (member[0].wire().unwrap(), repr[0].offset().unwrap()));

    let mut coalesced: Vec<(SigSpec, SigSpec)> = Vec::new();
    for (member, repr) in pairs {
        if let Some((last_member, last_repr)) = coalesced.last_mut() {
            if last_member[0].wire() == member[0].wire() && last_repr[0].wire() == repr[0].wire() {
                last_member.append(&member);
                last_repr.append(&repr);
                continue;
            }
        }
        coalesced.push((member, repr));
    }

    for (member, repr) in coalesced {
        log::debug!(
            "connecting representative `{}` to `{}`",
            module.display_sig(&repr),
            module.display_sig(&member)
        );
        module.connect(member, repr);
    }

    changed
}
