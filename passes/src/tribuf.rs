//! Tri-state buffer inference.
//!
//! Multiplexers with high-impedance inputs encode tri-state behavior; this
//! pass makes that behavior explicit. Recognition rewrites z-muxes into
//! tri-state buffer cells. Propagation pushes a buffer's high-impedance
//! semantics through downstream multiplexers and tri-state buffers, exposing
//! the `z` at the primary output. Merging coalesces multiple tri-state
//! drivers of one net into a single driver behind a priority mux, or into
//! plain logic with driver-conflict assertions.

use indexmap::{IndexMap, IndexSet};
use thiserror::Error;

use weft_netlist::{
    CellId, CellKind, Design, Module, Param, Port, Selection, SigBit, SigMap, SigSpec, State,
};

#[derive(Debug, Clone, Default)]
pub struct TribufConfig {
    /// Merge multiple tri-state buffers driving the same net into one.
    pub merge: bool,
    /// Convert tri-state buffers that do not drive output ports to
    /// non-tristate logic. Implies `merge`.
    pub logic: bool,
    /// Convert all tri-state buffers to non-tristate logic and assert that
    /// no two buffers drive the same net simultaneously. Implies `merge`.
    pub formal: bool,
    /// Propagate tri-state buffers through downstream mux cells. Implies
    /// `merge`.
    pub propagate: bool,
    /// Together with `logic` or `formal`, also rewrite tri-state buffers
    /// that drive output ports.
    pub force: bool,
}

impl TribufConfig {
    pub fn merge_mode(&self) -> bool {
        self.merge || self.logic || self.formal || self.propagate
    }
}

#[derive(Debug, Error)]
pub enum TribufError {
    #[error("tri-state buffer `{cell}` has a {width}-bit enable signal")]
    WideEnable { cell: String, width: usize },
    #[error("tri-state buffer `{cell}` drives no bit of the merge intersection")]
    PartitionWithoutSharedBits { cell: String },
    #[error("index invariant violated: {0}")]
    IndexInvariant(String),
}

/// Runs the pass on every selected module. Sets the `tribuf.added_something`
/// scratchpad key whenever a tri-state buffer was created, rewritten, or
/// converted to logic.
pub fn tribuf(design: &mut Design, config: &TribufConfig, selection: &Selection) -> Result<(), TribufError> {
    log::debug!("executing tribuf pass");

    let names: Vec<String> = design
        .modules()
        .filter(|module| selection.selected_module(module))
        .map(|module| module.name().to_string())
        .collect();

    for name in &names {
        let module = design.module_mut(name);
        let mut worker = TribufWorker::new(module, config, selection);
        let result = worker.run();
        let added_something = worker.added_something;
        if added_something {
            design.scratchpad_set_bool("tribuf.added_something", true);
        }
        result?;
    }
    Ok(())
}

fn is_all_z(sig: &SigSpec) -> bool {
    sig.iter().all(|bit| bit == SigBit::Const(State::HiZ))
}

fn pick(spec: &SigSpec, positions: &[usize]) -> SigSpec {
    positions.iter().map(|&index| spec[index]).collect()
}

struct TribufWorker<'a> {
    module: &'a mut Module,
    sigmap: SigMap,
    config: &'a TribufConfig,
    selection: &'a Selection,
    /// Canonical bits of output-port wires (populated under logic/formal).
    output_bits: IndexSet<SigBit>,
    /// Canonical bits driven by tri-state buffers.
    tribuf_signals: IndexSet<SigBit>,
    /// bit -> cells reading it through a data port tracked for propagation
    /// (`A` of a tri-state buffer, `A`/`B` of a mux under propagation).
    know_muxes: IndexMap<SigBit, IndexSet<CellId>>,
    /// bit -> cells with the bit in an output port.
    driving_cells: IndexMap<SigBit, IndexSet<CellId>>,
    /// Worklist of bits whose driving tri-state is a propagation candidate.
    added_tribufs: IndexSet<SigBit>,
    added_something: bool,
}

impl<'a> TribufWorker<'a> {
    fn new(module: &'a mut Module, config: &'a TribufConfig, selection: &'a Selection) -> TribufWorker<'a> {
        let sigmap = SigMap::new(module);
        TribufWorker {
            module,
            sigmap,
            config,
            selection,
            output_bits: IndexSet::new(),
            tribuf_signals: IndexSet::new(),
            know_muxes: IndexMap::new(),
            driving_cells: IndexMap::new(),
            added_tribufs: IndexSet::new(),
            added_something: false,
        }
    }

    fn run(&mut self) -> Result<(), TribufError> {
        if self.config.logic || self.config.formal {
            let mut output_bits = IndexSet::new();
            for (id, wire) in self.module.wires() {
                if wire.port_output {
                    output_bits.extend(self.sigmap.map_spec(&self.module.sig(id)).iter());
                }
            }
            self.output_bits = output_bits;
        }

        self.recognize();

        for id in self.cell_ids() {
            self.track_cell(id);
        }
        if cfg!(debug_assertions) {
            self.verify_indexes()?;
        }

        if self.config.propagate {
            self.propagate()?;
        }

        if self.config.merge_mode() {
            for bit in self.tribuf_signals.clone() {
                let all_tribufs = match self.driving_cells.get(&bit) {
                    Some(drivers) if !drivers.is_empty() => {
                        drivers.iter().all(|&id| self.module.cell(id).kind().is_tribuf())
                    }
                    _ => continue,
                };
                if !all_tribufs {
                    log::debug!(
                        "there is a non-tri-state buffer driving `{}`",
                        self.module.display_bit(bit)
                    );
                    continue;
                }
                self.merge_drivers(bit)?;
            }
        }

        if cfg!(debug_assertions) {
            self.verify_indexes()?;
        }
        Ok(())
    }

    /// Rewrites every selected mux with an all-z data input into the matching
    /// tri-state kind and records tri-state outputs for the later phases.
    fn recognize(&mut self) {
        let selected: Vec<CellId> = self
            .module
            .cells()
            .filter(|&(_, cell)| self.selection.selected_cell(self.module, cell))
            .map(|(id, _)| id)
            .collect();

        for id in selected {
            let kind = self.module.cell(id).kind();
            if kind.is_tribuf() {
                self.record_tribuf_outputs(id);
            } else if kind.is_mux() {
                let tri_kind = match kind {
                    CellKind::Mux => CellKind::Tribuf,
                    _ => CellKind::TribufGate,
                };
                let a_all_z = is_all_z(self.module.cell(id).port(Port::A));
                let b_all_z = is_all_z(self.module.cell(id).port(Port::B));

                if a_all_z && b_all_z {
                    log::debug!(
                        "removing mux `{}` with both data inputs high-impedance",
                        self.module.cell(id).name()
                    );
                    self.module.remove_cell(id);
                    continue;
                }

                if a_all_z {
                    let b = self.module.cell(id).port(Port::B).clone();
                    let s = self.module.cell(id).port(Port::S).clone();
                    let cell = self.module.cell_mut(id);
                    cell.set_port(Port::A, b);
                    cell.set_port(tri_kind.enable_port(), s);
                    cell.unset_port(Port::B);
                    cell.unset_port(Port::S);
                    cell.set_kind(tri_kind);
                    log::debug!(
                        "converted mux `{}` with high-impedance A input into {}",
                        self.module.cell(id).name(),
                        tri_kind.name()
                    );
                    self.record_tribuf_outputs(id);
                    self.added_something = true;
                } else if b_all_z {
                    let s = self.module.cell(id).port(Port::S).clone();
                    let enable_wire = self.module.fresh_wire(1);
                    let enable = self.module.sig(enable_wire);
                    self.module.add_not(s, enable.clone());
                    let cell = self.module.cell_mut(id);
                    cell.set_port(tri_kind.enable_port(), enable);
                    cell.unset_port(Port::B);
                    cell.unset_port(Port::S);
                    cell.set_kind(tri_kind);
                    log::debug!(
                        "converted mux `{}` with high-impedance B input into {} with inverted enable",
                        self.module.cell(id).name(),
                        tri_kind.name()
                    );
                    self.record_tribuf_outputs(id);
                    self.added_something = true;
                }
            }
        }
    }

    fn record_tribuf_outputs(&mut self, id: CellId) {
        for bit in self.sigmap.map_spec(self.module.cell(id).port(Port::Y)).iter() {
            if bit.is_wire() {
                self.tribuf_signals.insert(bit);
            }
        }
    }

    fn cell_ids(&self) -> Vec<CellId> {
        self.module.cells().map(|(id, _)| id).collect()
    }

    fn selected(&self, id: CellId) -> bool {
        self.selection.selected_cell(self.module, self.module.cell(id))
    }

    /// The canonical bits a cell drives and the canonical bits it reads
    /// through a tracked data port.
    fn scan_cell(&self, id: CellId) -> (Vec<SigBit>, Vec<SigBit>) {
        let cell = self.module.cell(id);
        let mut drives = Vec::new();
        for (port, sig) in cell.ports() {
            if cell.is_output(port) {
                drives.extend(self.sigmap.map_spec(sig).iter().filter(|bit| bit.is_wire()));
            }
        }
        let mut reads = Vec::new();
        if self.selection.selected_cell(self.module, cell) {
            let reader_ports: &[Port] = if cell.kind().is_tribuf() {
                &[Port::A]
            } else if cell.kind().is_mux() && self.config.propagate {
                &[Port::A, Port::B]
            } else {
                &[]
            };
            for &port in reader_ports {
                if let Some(sig) = cell.get_port(port) {
                    reads.extend(self.sigmap.map_spec(sig).iter().filter(|bit| bit.is_wire()));
                }
            }
        }
        (drives, reads)
    }

    fn track_cell(&mut self, id: CellId) {
        let (drives, reads) = self.scan_cell(id);
        for bit in drives {
            self.driving_cells.entry(bit).or_default().insert(id);
        }
        for bit in reads {
            self.know_muxes.entry(bit).or_default().insert(id);
        }
    }

    fn untrack_cell(&mut self, id: CellId) {
        let (drives, reads) = self.scan_cell(id);
        for bit in drives {
            if let Some(set) = self.driving_cells.get_mut(&bit) {
                set.shift_remove(&id);
            }
        }
        for bit in reads {
            if let Some(set) = self.know_muxes.get_mut(&bit) {
                set.shift_remove(&id);
            }
        }
    }

    /// All port rewrites after index construction go through here so that
    /// `driving_cells` and `know_muxes` stay exact.
    fn set_port_tracked(&mut self, id: CellId, port: Port, sig: SigSpec) {
        self.untrack_cell(id);
        self.module.cell_mut(id).set_port(port, sig);
        self.track_cell(id);
    }

    fn remove_cell_tracked(&mut self, id: CellId) {
        self.untrack_cell(id);
        self.module.remove_cell(id);
    }

    /// Recomputes both indexes from the netlist and compares them against
    /// the incrementally maintained ones.
    fn verify_indexes(&self) -> Result<(), TribufError> {
        let mut want_driving: IndexMap<SigBit, IndexSet<CellId>> = IndexMap::new();
        let mut want_readers: IndexMap<SigBit, IndexSet<CellId>> = IndexMap::new();
        for id in self.cell_ids() {
            let (drives, reads) = self.scan_cell(id);
            for bit in drives {
                want_driving.entry(bit).or_default().insert(id);
            }
            for bit in reads {
                want_readers.entry(bit).or_default().insert(id);
            }
        }
        self.compare_index("driving cells", &self.driving_cells, &want_driving)?;
        self.compare_index("known readers", &self.know_muxes, &want_readers)?;
        Ok(())
    }

    fn compare_index(
        &self,
        what: &str,
        have: &IndexMap<SigBit, IndexSet<CellId>>,
        want: &IndexMap<SigBit, IndexSet<CellId>>,
    ) -> Result<(), TribufError> {
        let empty = IndexSet::new();
        let bits: IndexSet<SigBit> = have.keys().chain(want.keys()).copied().collect();
        for bit in bits {
            let have_set = have.get(&bit).unwrap_or(&empty);
            let want_set = want.get(&bit).unwrap_or(&empty);
            if have_set != want_set {
                return Err(TribufError::IndexInvariant(format!(
                    "{} index for `{}` is stale",
                    what,
                    self.module.display_bit(bit)
                )));
            }
        }
        Ok(())
    }

    fn propagate(&mut self) -> Result<(), TribufError> {
        self.added_tribufs = self.tribuf_signals.clone();

        while !self.added_tribufs.is_empty() {
            log::debug!(
                "propagating tri-state buffers through muxes: {} signals left",
                self.added_tribufs.len()
            );
            let current = std::mem::take(&mut self.added_tribufs);
            for bit in current {
                if cfg!(debug_assertions) {
                    self.verify_indexes()?;
                }
                if self.know_muxes.get(&bit).map_or(true, IndexSet::is_empty) {
                    continue;
                }

                let all_tribufs = match self.driving_cells.get(&bit) {
                    Some(drivers) if !drivers.is_empty() => {
                        drivers.iter().all(|&id| self.module.cell(id).kind().is_tribuf())
                    }
                    _ => continue,
                };
                if !all_tribufs {
                    log::debug!(
                        "there is a non-tri-state buffer driving `{}`",
                        self.module.display_bit(bit)
                    );
                    continue;
                }

                if self.driving_cells[&bit].len() > 1 {
                    if self.config.merge_mode() {
                        self.merge_drivers(bit)?;
                    } else {
                        log::debug!(
                            "there is more than one tri-state buffer driving `{}`",
                            self.module.display_bit(bit)
                        );
                        continue;
                    }
                }
                let upstream = match self.driving_cells.get(&bit) {
                    Some(drivers) if drivers.len() == 1 => *drivers.first().unwrap(),
                    // merging converted the drivers to plain logic
                    _ => continue,
                };

                if !self.tribuf_signals.contains(&bit) {
                    log::warn!(
                        "no tri-state buffer recorded for `{}`",
                        self.module.display_bit(bit)
                    );
                    continue;
                }
                self.tribuf_signals.shift_remove(&bit);

                let readers: Vec<CellId> = self.know_muxes[&bit].iter().copied().collect();
                for reader in readers {
                    if self.module.get_cell(reader).is_none() || !self.selected(reader) {
                        continue;
                    }
                    let kind = self.module.cell(reader).kind();
                    if kind.is_mux() {
                        self.propagate_into_mux(bit, upstream, reader)?;
                    } else if kind.is_tribuf() {
                        self.propagate_into_tribuf(bit, upstream, reader)?;
                    }
                }
            }
        }

        self.sweep_dangling();
        Ok(())
    }

    /// tribuf(X, E, Y) -> mux(A=Y, B, S, Y2)
    /// becomes       mux(A=X, B, S, Y3) -> tribuf(Y3, E || S, Y2)
    /// and symmetrically for the B input with E || !S.
    fn propagate_into_mux(&mut self, bit: SigBit, upstream: CellId, mux_id: CellId) -> Result<(), TribufError> {
        let up_y = self.sigmap.map_spec(self.module.cell(upstream).port(Port::Y));
        let up_a = self.module.cell(upstream).port(Port::A).clone();
        let data_for: IndexMap<SigBit, SigBit> = up_y.iter().zip(up_a.iter()).collect();

        let a_canon = self.sigmap.map_spec(self.module.cell(mux_id).port(Port::A));
        let b_canon = self.sigmap.map_spec(self.module.cell(mux_id).port(Port::B));
        let is_a = if a_canon.iter().any(|b| b == bit) {
            true
        } else if b_canon.iter().any(|b| b == bit) {
            false
        } else {
            log::warn!(
                "mux `{}` does not read `{}` through a data port",
                self.module.cell(mux_id).name(),
                self.module.display_bit(bit)
            );
            return Ok(());
        };
        let data_port = if is_a { Port::A } else { Port::B };
        let input_y = if is_a { a_canon } else { b_canon };

        let en1_port = self.module.cell(upstream).kind().enable_port();
        let en1 = self.module.cell(upstream).port(en1_port).clone();
        if en1.len() != 1 {
            return Err(TribufError::WideEnable {
                cell: self.module.cell(upstream).name().to_string(),
                width: en1.len(),
            });
        }

        // The positions of the mux data port covered by the upstream
        // tri-state, with the matching upstream data bits.
        let shared: Vec<usize> =
            (0..input_y.len()).filter(|&index| data_for.contains_key(&input_y[index])).collect();
        debug_assert!(!shared.is_empty());
        let x_slice: SigSpec = shared.iter().map(|&index| data_for[&input_y[index]]).collect();
        let y2 = self.module.cell(mux_id).port(Port::Y).clone();
        let y2_slice = input_y.extract_mapped(&up_y, &y2);
        let s = self.module.cell(mux_id).port(Port::S).clone();
        let y3_wire = self.module.fresh_wire(shared.len());
        let y3 = self.module.sig(y3_wire);

        if shared.len() == input_y.len() {
            log::debug!(
                "propagating tri-state `{}` through mux `{}` ({} input)",
                self.module.cell(upstream).name(),
                self.module.cell(mux_id).name(),
                data_port
            );
            self.set_port_tracked(mux_id, data_port, x_slice);
            self.set_port_tracked(mux_id, Port::Y, y3.clone());
        } else {
            let a = self.module.cell(mux_id).port(Port::A).clone();
            let b = self.module.cell(mux_id).port(Port::B).clone();
            let residual: Vec<usize> =
                (0..input_y.len()).filter(|index| !shared.contains(index)).collect();
            let covered_a = if is_a { x_slice.clone() } else { pick(&a, &shared) };
            let covered_b = if is_a { pick(&b, &shared) } else { x_slice };
            log::debug!(
                "splitting mux `{}` into covered `{}` and residual `{}`",
                self.module.cell(mux_id).name(),
                self.module.display_sig(&y2_slice),
                self.module.display_sig(&pick(&y2, &residual))
            );
            self.set_port_tracked(mux_id, Port::A, pick(&a, &residual));
            self.set_port_tracked(mux_id, Port::B, pick(&b, &residual));
            self.set_port_tracked(mux_id, Port::Y, pick(&y2, &residual));
            if self.module.cell(mux_id).kind() == CellKind::Mux {
                self.module.cell_mut(mux_id).set_param(Param::Width, residual.len());
            }
            let covered = self.module.add_mux(covered_a, covered_b, s.clone(), y3.clone());
            self.track_cell(covered);
        }

        let or_b = if is_a {
            s
        } else {
            let not_wire = self.module.fresh_wire(1);
            let not_y = self.module.sig(not_wire);
            let not_gate = self.module.add_not(s, not_y.clone());
            self.track_cell(not_gate);
            not_y
        };
        let or_wire = self.module.fresh_wire(1);
        let or_y = self.module.sig(or_wire);
        let or_gate = self.module.add_or(en1, or_b, or_y.clone());
        self.track_cell(or_gate);

        let new_tribuf = self.module.add_tribuf(y3, or_y, y2_slice.clone());
        self.track_cell(new_tribuf);
        self.added_something = true;

        for out_bit in self.sigmap.map_spec(&y2_slice).iter() {
            if out_bit.is_wire() {
                self.tribuf_signals.insert(out_bit);
                self.added_tribufs.insert(out_bit);
            }
        }
        Ok(())
    }

    /// tribuf(A, E1, Y) -> tribuf(A=Y, E2, Y2) becomes tribuf(A, E1 && E2, Y2).
    fn propagate_into_tribuf(&mut self, bit: SigBit, upstream: CellId, reader: CellId) -> Result<(), TribufError> {
        if upstream == reader {
            // a tri-state buffer feeding its own data input cannot collapse
            return Ok(());
        }
        let up_y = self.sigmap.map_spec(self.module.cell(upstream).port(Port::Y));
        let up_a = self.module.cell(upstream).port(Port::A).clone();
        let data_for: IndexMap<SigBit, SigBit> = up_y.iter().zip(up_a.iter()).collect();

        let input = self.sigmap.map_spec(self.module.cell(reader).port(Port::A));
        let shared: Vec<usize> =
            (0..input.len()).filter(|&index| data_for.contains_key(&input[index])).collect();
        if shared.is_empty() {
            log::warn!(
                "tri-state buffer `{}` does not read `{}` on its data input",
                self.module.cell(reader).name(),
                self.module.display_bit(bit)
            );
            return Ok(());
        }

        let en1_port = self.module.cell(upstream).kind().enable_port();
        let en2_port = self.module.cell(reader).kind().enable_port();
        let en1 = self.module.cell(upstream).port(en1_port).clone();
        let en2 = self.module.cell(reader).port(en2_port).clone();
        for (id, enable) in [(upstream, &en1), (reader, &en2)] {
            if enable.len() != 1 {
                return Err(TribufError::WideEnable {
                    cell: self.module.cell(id).name().to_string(),
                    width: enable.len(),
                });
            }
        }
        let x_slice: SigSpec = shared.iter().map(|&index| data_for[&input[index]]).collect();

        let and_wire = self.module.fresh_wire(1);
        let and_y = self.module.sig(and_wire);
        let and_gate = self.module.add_and(en1, en2, and_y.clone());
        self.track_cell(and_gate);

        if shared.len() == input.len() {
            log::debug!(
                "collapsing tri-state chain `{}` -> `{}`",
                self.module.cell(upstream).name(),
                self.module.cell(reader).name()
            );
            self.set_port_tracked(reader, Port::A, x_slice);
            self.set_port_tracked(reader, en2_port, and_y);
        } else {
            let a = self.module.cell(reader).port(Port::A).clone();
            let y2 = self.module.cell(reader).port(Port::Y).clone();
            let residual: Vec<usize> =
                (0..input.len()).filter(|index| !shared.contains(index)).collect();
            let y2_slice = input.extract_mapped(&up_y, &y2);
            log::debug!(
                "splitting tri-state `{}` into covered `{}` and residual `{}`",
                self.module.cell(reader).name(),
                self.module.display_sig(&y2_slice),
                self.module.display_sig(&pick(&y2, &residual))
            );
            self.set_port_tracked(reader, Port::A, pick(&a, &residual));
            self.set_port_tracked(reader, Port::Y, pick(&y2, &residual));
            if self.module.cell(reader).kind() == CellKind::Tribuf {
                self.module.cell_mut(reader).set_param(Param::Width, residual.len());
            }
            let new_tribuf = self.module.add_tribuf(x_slice, and_y, y2_slice.clone());
            self.track_cell(new_tribuf);
            for out_bit in self.sigmap.map_spec(&y2_slice).iter() {
                if out_bit.is_wire() {
                    self.tribuf_signals.insert(out_bit);
                    self.added_tribufs.insert(out_bit);
                }
            }
        }
        self.added_something = true;
        Ok(())
    }

    /// Removes tri-state buffers whose outputs are read by nothing, appear in
    /// no connection, and drive no output port. Runs after the propagation
    /// worklist drains.
    fn sweep_dangling(&mut self) {
        loop {
            let mut read: IndexSet<SigBit> = IndexSet::new();
            for (_, cell) in self.module.cells() {
                for (port, sig) in cell.ports() {
                    if !cell.is_output(port) {
                        read.extend(self.sigmap.map_spec(sig).iter());
                    }
                }
            }
            for (_, rhs) in self.module.connections() {
                read.extend(self.sigmap.map_spec(rhs).iter());
            }
            for (id, wire) in self.module.wires() {
                if wire.port_output {
                    read.extend(self.sigmap.map_spec(&self.module.sig(id)).iter());
                }
            }

            let victims: Vec<CellId> = self
                .module
                .cells()
                .filter(|&(_, cell)| {
                    cell.kind().is_tribuf()
                        && !cell.keep()
                        && self.selection.selected_cell(self.module, cell)
                        && self
                            .sigmap
                            .map_spec(cell.port(Port::Y))
                            .iter()
                            .all(|bit| !read.contains(&bit))
                })
                .map(|(id, _)| id)
                .collect();
            if victims.is_empty() {
                break;
            }

            for id in victims {
                log::debug!("removing dangling tri-state buffer `{}`", self.module.cell(id).name());
                let outputs: Vec<SigBit> = self
                    .sigmap
                    .map_spec(self.module.cell(id).port(Port::Y))
                    .iter()
                    .filter(|bit| bit.is_wire())
                    .collect();
                self.remove_cell_tracked(id);
                for bit in outputs {
                    if self.driving_cells.get(&bit).map_or(true, IndexSet::is_empty) {
                        self.tribuf_signals.shift_remove(&bit);
                        self.added_tribufs.shift_remove(&bit);
                    }
                }
            }
        }
    }

    /// Coalesces every tri-state buffer driving `sig` (and, transitively,
    /// the siblings they also drive) into one driver per net, or into plain
    /// logic when `no_tribuf` applies.
    fn merge_drivers(&mut self, sig: SigBit) -> Result<(), TribufError> {
        let mut no_tribuf = false;
        if self.config.logic && !self.config.formal {
            no_tribuf = self.config.force || !self.output_bits.contains(&sig);
        }
        if self.config.formal {
            no_tribuf = true;
        }

        let cells: Vec<CellId> =
            self.driving_cells.get(&sig).map(|set| set.iter().copied().collect()).unwrap_or_default();
        if cells.is_empty() || (cells.len() <= 1 && !no_tribuf) {
            return Ok(());
        }

        log::debug!(
            "merging {} tri-state buffers driving `{}`",
            cells.len(),
            self.module.display_bit(sig)
        );

        for &cell in &cells {
            if !self.module.cell(cell).kind().is_tribuf() {
                log::debug!(
                    "there is a non-tri-state buffer driving `{}`",
                    self.module.display_bit(sig)
                );
                return Ok(());
            }
        }

        // every bit driven by any driver of `sig`
        let mut siblings: IndexSet<SigBit> = IndexSet::new();
        for &cell in &cells {
            for bit in self.sigmap.map_spec(self.module.cell(cell).port(Port::Y)).iter() {
                if bit.is_wire() {
                    siblings.insert(bit);
                }
            }
        }

        let mut drivers: IndexSet<CellId> = IndexSet::new();
        for &bit in &siblings {
            let Some(these) = self.driving_cells.get(&bit) else { continue };
            for &cell in these {
                if !self.module.cell(cell).kind().is_tribuf() {
                    log::debug!(
                        "there is a non-tri-state buffer driving `{}`",
                        self.module.display_bit(bit)
                    );
                    return Ok(());
                }
            }
            drivers.extend(these.iter().copied());
        }

        // drivers sharing a canonical enable bit can be fused
        let mut partitions: IndexMap<SigBit, IndexSet<CellId>> = IndexMap::new();
        for &cell in &drivers {
            let en_port = self.module.cell(cell).kind().enable_port();
            let enable = self.sigmap.map_spec(self.module.cell(cell).port(en_port));
            if enable.len() != 1 {
                return Err(TribufError::WideEnable {
                    cell: self.module.cell(cell).name().to_string(),
                    width: enable.len(),
                });
            }
            partitions.entry(enable.as_bit()).or_default().insert(cell);
        }

        let enables_driving_sig: Vec<SigBit> = partitions
            .iter()
            .filter(|(_, members)| cells.iter().any(|cell| members.contains(cell)))
            .map(|(&enable, _)| enable)
            .collect();

        let mut partition_bits: IndexMap<SigBit, IndexSet<SigBit>> = IndexMap::new();
        for &enable in &enables_driving_sig {
            let mut bits = IndexSet::new();
            for &cell in &partitions[&enable] {
                for bit in self.sigmap.map_spec(self.module.cell(cell).port(Port::Y)).iter() {
                    if bit.is_wire() {
                        bits.insert(bit);
                    }
                }
            }
            partition_bits.insert(enable, bits);
        }

        // the bits every relevant partition drives
        let intersection: IndexSet<SigBit> = siblings
            .iter()
            .copied()
            .filter(|bit| enables_driving_sig.iter().all(|enable| partition_bits[enable].contains(bit)))
            .collect();
        let intersection_sig: SigSpec = intersection.iter().copied().collect();
        log::debug!("merge intersection is `{}`", self.module.display_sig(&intersection_sig));

        // slice each driver down to the intersection, then fuse the slices of
        // each partition into a single tri-state with the shared enable
        let mut merged: Vec<CellId> = Vec::new();
        for &enable in &enables_driving_sig {
            let members: Vec<CellId> = partitions[&enable].iter().copied().collect();
            let mut to_merge: Vec<CellId> = Vec::new();
            for cell in members {
                let output = self.sigmap.map_spec(self.module.cell(cell).port(Port::Y));
                let matching: Vec<usize> =
                    (0..output.len()).filter(|&index| intersection.contains(&output[index])).collect();
                if matching.len() == output.len() {
                    to_merge.push(cell);
                } else if matching.is_empty() {
                    return Err(TribufError::PartitionWithoutSharedBits {
                        cell: self.module.cell(cell).name().to_string(),
                    });
                } else {
                    let a = self.module.cell(cell).port(Port::A).clone();
                    let y = self.module.cell(cell).port(Port::Y).clone();
                    let residual: Vec<usize> =
                        (0..output.len()).filter(|index| !matching.contains(index)).collect();
                    let (part_a, part_y) = (pick(&a, &matching), pick(&y, &matching));
                    log::debug!(
                        "split `{}` into (`{}`, `{}`) and (`{}`, `{}`)",
                        self.module.cell(cell).name(),
                        self.module.display_sig(&part_a),
                        self.module.display_sig(&part_y),
                        self.module.display_sig(&pick(&a, &residual)),
                        self.module.display_sig(&pick(&y, &residual))
                    );
                    self.set_port_tracked(cell, Port::A, pick(&a, &residual));
                    self.set_port_tracked(cell, Port::Y, pick(&y, &residual));
                    if self.module.cell(cell).kind() == CellKind::Tribuf {
                        self.module.cell_mut(cell).set_param(Param::Width, residual.len());
                    }
                    let split = self.module.add_tribuf(part_a, SigSpec::from(enable), part_y);
                    self.track_cell(split);
                    to_merge.push(split);
                }
            }

            let mut merged_a = SigSpec::new();
            let mut merged_y = SigSpec::new();
            for &cell in &to_merge {
                merged_a.append(self.module.cell(cell).port(Port::A));
                merged_y.append(self.module.cell(cell).port(Port::Y));
            }
            for cell in to_merge {
                self.remove_cell_tracked(cell);
            }
            log::debug!(
                "merged partition of `{}` into (`{}`, `{}`)",
                self.module.display_bit(enable),
                self.module.display_sig(&merged_a),
                self.module.display_sig(&merged_y)
            );
            let fused = self.module.add_tribuf(merged_a, SigSpec::from(enable), merged_y);
            self.track_cell(fused);
            merged.push(fused);
        }

        if self.config.formal && merged.len() >= 2 {
            for &cell in &merged {
                let mut others = SigSpec::new();
                for &other in &merged {
                    if other != cell {
                        others.append(self.module.cell(other).port(Port::En));
                    }
                }
                let enable = self.module.cell(cell).port(Port::En).clone();
                let reduce_wire = self.module.fresh_wire(1);
                let reduce_y = self.module.sig(reduce_wire);
                let reduce_gate = self.module.add_reduce_or(others, reduce_y.clone());
                self.track_cell(reduce_gate);
                let conflict_wire = self.module.fresh_wire(1);
                let conflict_y = self.module.sig(conflict_wire);
                let conflict_gate = self.module.add_and(enable, reduce_y, conflict_y.clone());
                self.track_cell(conflict_gate);
                let ok_wire = self.module.fresh_wire(1);
                let ok_y = self.module.sig(ok_wire);
                let ok_gate = self.module.add_not(conflict_y, ok_y.clone());
                self.track_cell(ok_gate);

                let name = format!("$tribuf_conflict${}", self.module.cell(cell).name());
                let src = self.module.cell(cell).src().map(str::to_owned);
                let assert_id = self.module.add_assert(name, ok_y, SigSpec::from(State::One));
                let assert_cell = self.module.cell_mut(assert_id);
                assert_cell.set_keep(true);
                assert_cell.set_src(src);
                self.track_cell(assert_id);
                self.added_something = true;
            }
        }

        let mut pmux_b = SigSpec::new();
        let mut pmux_s = SigSpec::new();
        for &cell in &merged {
            // align each partition's data input with the intersection order
            let outputs = self.sigmap.map_spec(self.module.cell(cell).port(Port::Y));
            let data: IndexMap<SigBit, SigBit> =
                outputs.iter().zip(self.module.cell(cell).port(Port::A).iter()).collect();
            let aligned: SigSpec = intersection_sig.iter().map(|bit| data[&bit]).collect();
            pmux_s.append(self.module.cell(cell).port(Port::En));
            pmux_b.append(&aligned);
            self.remove_cell_tracked(cell);
        }

        let muxout = if pmux_s.len() > 1 {
            let pmux_wire = self.module.fresh_wire(intersection_sig.len());
            let pmux_y = self.module.sig(pmux_wire);
            let pmux_gate = self.module.add_pmux(
                SigSpec::constant(State::Undef, intersection_sig.len()),
                pmux_b,
                pmux_s.clone(),
                pmux_y.clone(),
            );
            self.track_cell(pmux_gate);
            pmux_y
        } else {
            pmux_b
        };

        if no_tribuf {
            log::debug!(
                "replaced tri-state buffers driving `{}` with multiplexer logic",
                self.module.display_sig(&intersection_sig)
            );
            self.module.connect(intersection_sig, muxout);
            self.added_something = true;
        } else {
            let reduce_wire = self.module.fresh_wire(1);
            let reduce_y = self.module.sig(reduce_wire);
            let reduce_gate = self.module.add_reduce_or(pmux_s, reduce_y.clone());
            self.track_cell(reduce_gate);
            let fused = self.module.add_tribuf(muxout, reduce_y, intersection_sig.clone());
            self.track_cell(fused);
            self.added_something = true;
            log::debug!(
                "merged tri-state buffers driving `{}` into `{}`",
                self.module.display_sig(&intersection_sig),
                self.module.cell(fused).name()
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use weft_netlist::{Cell, CellId, CellKind, Design, Module, Param, Port, Selection, SigSpec, State};

    use crate::tribuf::{tribuf, TribufConfig, TribufError};

    fn cells_of(module: &Module, kind: CellKind) -> Vec<CellId> {
        module.cells().filter(|&(_, cell)| cell.kind() == kind).map(|(id, _)| id).collect()
    }

    #[test]
    fn test_recognize_z_on_a() {
        let mut design = Design::new();
        let module = design.add_module("top");
        let d = module.add_input("d", 1);
        let en = module.add_input("en", 1);
        let out = module.add_output("out", 1);
        let (d, en, out) = (module.sig(d), module.sig(en), module.sig(out));
        let mux = module.add_mux(SigSpec::constant(State::HiZ, 1), d.clone(), en.clone(), out.clone());

        tribuf(&mut design, &TribufConfig::default(), &Selection::full()).unwrap();
        assert!(design.scratchpad_get_bool("tribuf.added_something"));

        let module = design.module("top").unwrap();
        let cell = module.cell(mux);
        assert_eq!(cell.kind(), CellKind::Tribuf);
        assert_eq!(cell.port(Port::A), &d);
        assert_eq!(cell.port(Port::En), &en);
        assert_eq!(cell.port(Port::Y), &out);
        assert!(cell.get_port(Port::B).is_none());
        assert!(cell.get_port(Port::S).is_none());
    }

    #[test]
    fn test_recognize_z_on_b() {
        let mut design = Design::new();
        let module = design.add_module("top");
        let d = module.add_input("d", 1);
        let en = module.add_input("en", 1);
        let out = module.add_output("out", 1);
        let (d, en, out) = (module.sig(d), module.sig(en), module.sig(out));
        let mux = module.add_mux(d.clone(), SigSpec::constant(State::HiZ, 1), en.clone(), out.clone());

        tribuf(&mut design, &TribufConfig::default(), &Selection::full()).unwrap();

        let module = design.module("top").unwrap();
        let cell = module.cell(mux);
        assert_eq!(cell.kind(), CellKind::Tribuf);
        assert_eq!(cell.port(Port::A), &d);
        let nots = cells_of(module, CellKind::Not);
        assert_eq!(nots.len(), 1);
        assert_eq!(module.cell(nots[0]).port(Port::A), &en);
        assert_eq!(module.cell(nots[0]).port(Port::Y), cell.port(Port::En));
    }

    #[test]
    fn test_remove_mux_with_all_z_inputs() {
        let mut design = Design::new();
        let module = design.add_module("top");
        let en = module.add_input("en", 1);
        let out = module.add_output("out", 1);
        let (en, out) = (module.sig(en), module.sig(out));
        module.add_mux(SigSpec::constant(State::HiZ, 1), SigSpec::constant(State::HiZ, 1), en, out);

        tribuf(&mut design, &TribufConfig::default(), &Selection::full()).unwrap();

        assert_eq!(design.module("top").unwrap().cells().count(), 0);
        assert!(!design.scratchpad_get_bool("tribuf.added_something"));
    }

    #[test]
    fn test_gate_level_recognition() {
        let mut design = Design::new();
        let module = design.add_module("top");
        let d = module.add_input("d", 1);
        let en = module.add_input("en", 1);
        let out = module.add_output("out", 1);
        let (d, en, out) = (module.sig(d), module.sig(en), module.sig(out));
        let mux = module.add_cell(
            Cell::new(CellKind::MuxGate)
                .with_port(Port::A, SigSpec::constant(State::HiZ, 1))
                .with_port(Port::B, d.clone())
                .with_port(Port::S, en.clone())
                .with_port(Port::Y, out),
        );

        tribuf(&mut design, &TribufConfig::default(), &Selection::full()).unwrap();

        let module = design.module("top").unwrap();
        let cell = module.cell(mux);
        assert_eq!(cell.kind(), CellKind::TribufGate);
        assert_eq!(cell.port(Port::A), &d);
        assert_eq!(cell.port(Port::E), &en);
    }

    #[test]
    fn test_merge_two_drivers() {
        let mut design = Design::new();
        let module = design.add_module("top");
        let a1 = module.add_input("a1", 1);
        let a2 = module.add_input("a2", 1);
        let e1 = module.add_input("e1", 1);
        let e2 = module.add_input("e2", 1);
        let out = module.add_wire("out", 1);
        let (a1, a2, e1, e2, out) =
            (module.sig(a1), module.sig(a2), module.sig(e1), module.sig(e2), module.sig(out));
        module.add_tribuf(a1.clone(), e1.clone(), out.clone());
        module.add_tribuf(a2.clone(), e2.clone(), out.clone());

        let config = TribufConfig { merge: true, ..Default::default() };
        tribuf(&mut design, &config, &Selection::full()).unwrap();
        assert!(design.scratchpad_get_bool("tribuf.added_something"));

        let module = design.module("top").unwrap();
        let tribufs = cells_of(module, CellKind::Tribuf);
        let pmuxes = cells_of(module, CellKind::Pmux);
        let reduces = cells_of(module, CellKind::ReduceOr);
        assert_eq!((tribufs.len(), pmuxes.len(), reduces.len()), (1, 1, 1));

        let mut data = a1.clone();
        data.append(&a2);
        let mut enables = e1.clone();
        enables.append(&e2);

        let pmux = module.cell(pmuxes[0]);
        assert_eq!(pmux.port(Port::A), &SigSpec::constant(State::Undef, 1));
        assert_eq!(pmux.port(Port::B), &data);
        assert_eq!(pmux.port(Port::S), &enables);

        let fused = module.cell(tribufs[0]);
        assert_eq!(fused.port(Port::Y), &out);
        assert_eq!(fused.port(Port::A), pmux.port(Port::Y));

        let reduce = module.cell(reduces[0]);
        assert_eq!(reduce.port(Port::A), &enables);
        assert_eq!(reduce.port(Port::Y), fused.port(Port::En));
    }

    #[test]
    fn test_merge_single_driver_is_noop() {
        let mut design = Design::new();
        let module = design.add_module("top");
        let a = module.add_input("a", 1);
        let e = module.add_input("e", 1);
        let out = module.add_wire("out", 1);
        let (a, e, out) = (module.sig(a), module.sig(e), module.sig(out));
        let buf = module.add_tribuf(a.clone(), e.clone(), out.clone());

        let config = TribufConfig { merge: true, ..Default::default() };
        tribuf(&mut design, &config, &Selection::full()).unwrap();

        let module = design.module("top").unwrap();
        assert_eq!(module.cells().count(), 1);
        assert_eq!(module.cell(buf).port(Port::A), &a);
        assert!(!design.scratchpad_get_bool("tribuf.added_something"));
    }

    #[test]
    fn test_logic_mode_connects_directly() {
        let mut design = Design::new();
        let module = design.add_module("top");
        let a1 = module.add_input("a1", 1);
        let a2 = module.add_input("a2", 1);
        let e1 = module.add_input("e1", 1);
        let e2 = module.add_input("e2", 1);
        let out = module.add_wire("out", 1);
        let (a1, a2, e1, e2, out) =
            (module.sig(a1), module.sig(a2), module.sig(e1), module.sig(e2), module.sig(out));
        module.add_tribuf(a1, e1, out.clone());
        module.add_tribuf(a2, e2, out.clone());

        let config = TribufConfig { logic: true, ..Default::default() };
        tribuf(&mut design, &config, &Selection::full()).unwrap();
        assert!(design.scratchpad_get_bool("tribuf.added_something"));

        let module = design.module("top").unwrap();
        assert!(cells_of(module, CellKind::Tribuf).is_empty());
        let pmuxes = cells_of(module, CellKind::Pmux);
        assert_eq!(pmuxes.len(), 1);
        let pmux_y = module.cell(pmuxes[0]).port(Port::Y).clone();
        assert_eq!(module.connections(), &[(out, pmux_y)]);
    }

    #[test]
    fn test_logic_mode_keeps_output_port_drivers() {
        let mut design = Design::new();
        let module = design.add_module("top");
        let a1 = module.add_input("a1", 1);
        let a2 = module.add_input("a2", 1);
        let e1 = module.add_input("e1", 1);
        let e2 = module.add_input("e2", 1);
        let out = module.add_output("out", 1);
        let (a1, a2, e1, e2, out) =
            (module.sig(a1), module.sig(a2), module.sig(e1), module.sig(e2), module.sig(out));
        module.add_tribuf(a1, e1, out.clone());
        module.add_tribuf(a2, e2, out.clone());

        let config = TribufConfig { logic: true, ..Default::default() };
        tribuf(&mut design, &config, &Selection::full()).unwrap();

        let module = design.module("top").unwrap();
        assert_eq!(cells_of(module, CellKind::Tribuf).len(), 1);
        assert!(module.connections().is_empty());

        let config = TribufConfig { logic: true, force: true, ..Default::default() };
        tribuf(&mut design, &config, &Selection::full()).unwrap();

        let module = design.module("top").unwrap();
        assert!(cells_of(module, CellKind::Tribuf).is_empty());
        assert_eq!(module.connections().len(), 1);
    }

    #[test]
    fn test_formal_mode_adds_asserts() {
        let mut design = Design::new();
        let module = design.add_module("top");
        let a1 = module.add_input("a1", 1);
        let a2 = module.add_input("a2", 1);
        let e1 = module.add_input("e1", 1);
        let e2 = module.add_input("e2", 1);
        let out = module.add_output("out", 1);
        let (a1, a2, e1, e2, out) =
            (module.sig(a1), module.sig(a2), module.sig(e1), module.sig(e2), module.sig(out));
        module.add_tribuf(a1, e1, out.clone());
        module.add_tribuf(a2, e2, out.clone());

        let config = TribufConfig { formal: true, ..Default::default() };
        tribuf(&mut design, &config, &Selection::full()).unwrap();

        let module = design.module("top").unwrap();
        assert!(cells_of(module, CellKind::Tribuf).is_empty());
        assert_eq!(module.connections().len(), 1);
        let asserts = cells_of(module, CellKind::Assert);
        assert_eq!(asserts.len(), 2);
        for id in asserts {
            let cell = module.cell(id);
            assert!(cell.keep());
            assert!(cell.name().starts_with("$tribuf_conflict$"));
            assert_eq!(cell.port(Port::En), &SigSpec::from(State::One));
        }
    }

    #[test]
    fn test_wide_enable_is_fatal() {
        let mut design = Design::new();
        let module = design.add_module("top");
        let a = module.add_input("a", 1);
        let e = module.add_input("e", 2);
        let out = module.add_wire("out", 1);
        let (a, e, out) = (module.sig(a), module.sig(e), module.sig(out));
        module.add_tribuf(a, e, out);

        let config = TribufConfig { logic: true, ..Default::default() };
        let result = tribuf(&mut design, &config, &Selection::full());
        assert!(matches!(result, Err(TribufError::WideEnable { width: 2, .. })));
    }

    #[test]
    fn test_propagate_through_mux_a() {
        let mut design = Design::new();
        let module = design.add_module("top");
        let x = module.add_input("x", 1);
        let e = module.add_input("e", 1);
        let b = module.add_input("b", 1);
        let s = module.add_input("s", 1);
        let y1 = module.add_wire("y1", 1);
        let y2 = module.add_output("y2", 1);
        let (x, e, b, s, y1, y2) =
            (module.sig(x), module.sig(e), module.sig(b), module.sig(s), module.sig(y1), module.sig(y2));
        module.add_tribuf(x.clone(), e.clone(), y1.clone());
        let mux = module.add_mux(y1.clone(), b.clone(), s.clone(), y2.clone());

        let config = TribufConfig { propagate: true, ..Default::default() };
        tribuf(&mut design, &config, &Selection::full()).unwrap();
        assert!(design.scratchpad_get_bool("tribuf.added_something"));

        let module = design.module("top").unwrap();
        let cell = module.cell(mux);
        assert_eq!(cell.port(Port::A), &x);
        assert_eq!(cell.port(Port::B), &b);
        assert_eq!(cell.port(Port::S), &s);
        let y3 = cell.port(Port::Y).clone();
        assert_ne!(y3, y2);
        assert_ne!(y3, y1);

        let tribufs = cells_of(module, CellKind::Tribuf);
        assert_eq!(tribufs.len(), 1);
        let new_tribuf = module.cell(tribufs[0]);
        assert_eq!(new_tribuf.port(Port::A), &y3);
        assert_eq!(new_tribuf.port(Port::Y), &y2);

        let ors = cells_of(module, CellKind::Or);
        assert_eq!(ors.len(), 1);
        let or_gate = module.cell(ors[0]);
        assert_eq!(or_gate.port(Port::A), &e);
        assert_eq!(or_gate.port(Port::B), &s);
        assert_eq!(or_gate.port(Port::Y), new_tribuf.port(Port::En));
    }

    #[test]
    fn test_propagate_through_mux_b() {
        let mut design = Design::new();
        let module = design.add_module("top");
        let x = module.add_input("x", 1);
        let e = module.add_input("e", 1);
        let a = module.add_input("a", 1);
        let s = module.add_input("s", 1);
        let y1 = module.add_wire("y1", 1);
        let y2 = module.add_output("y2", 1);
        let (x, e, a, s, y1, y2) =
            (module.sig(x), module.sig(e), module.sig(a), module.sig(s), module.sig(y1), module.sig(y2));
        module.add_tribuf(x.clone(), e.clone(), y1.clone());
        let mux = module.add_mux(a.clone(), y1.clone(), s.clone(), y2.clone());

        let config = TribufConfig { propagate: true, ..Default::default() };
        tribuf(&mut design, &config, &Selection::full()).unwrap();

        let module = design.module("top").unwrap();
        assert_eq!(module.cell(mux).port(Port::A), &a);
        assert_eq!(module.cell(mux).port(Port::B), &x);

        let nots = cells_of(module, CellKind::Not);
        let ors = cells_of(module, CellKind::Or);
        assert_eq!((nots.len(), ors.len()), (1, 1));
        assert_eq!(module.cell(nots[0]).port(Port::A), &s);
        assert_eq!(module.cell(ors[0]).port(Port::A), &e);
        assert_eq!(module.cell(ors[0]).port(Port::B), module.cell(nots[0]).port(Port::Y));
    }

    #[test]
    fn test_propagate_collapses_tribuf_chain() {
        let mut design = Design::new();
        let module = design.add_module("top");
        let x = module.add_input("x", 1);
        let e1 = module.add_input("e1", 1);
        let e2 = module.add_input("e2", 1);
        let y1 = module.add_wire("y1", 1);
        let y2 = module.add_output("y2", 1);
        let (x, e1, e2, y1, y2) =
            (module.sig(x), module.sig(e1), module.sig(e2), module.sig(y1), module.sig(y2));
        module.add_tribuf(x.clone(), e1.clone(), y1.clone());
        let second = module.add_tribuf(y1.clone(), e2.clone(), y2.clone());

        let config = TribufConfig { propagate: true, ..Default::default() };
        tribuf(&mut design, &config, &Selection::full()).unwrap();

        let module = design.module("top").unwrap();
        let tribufs = cells_of(module, CellKind::Tribuf);
        assert_eq!(tribufs, vec![second]);
        let cell = module.cell(second);
        assert_eq!(cell.port(Port::A), &x);
        assert_eq!(cell.port(Port::Y), &y2);

        let ands = cells_of(module, CellKind::And);
        assert_eq!(ands.len(), 1);
        let and_gate = module.cell(ands[0]);
        assert_eq!(and_gate.port(Port::A), &e1);
        assert_eq!(and_gate.port(Port::B), &e2);
        assert_eq!(and_gate.port(Port::Y), cell.port(Port::En));
    }

    #[test]
    fn test_propagate_splits_partially_covered_mux() {
        let mut design = Design::new();
        let module = design.add_module("top");
        let x = module.add_input("x", 2);
        let e = module.add_input("e", 1);
        let r = module.add_input("r", 1);
        let b = module.add_input("b", 2);
        let s = module.add_input("s", 1);
        let p = module.add_wire("p", 2);
        let q = module.add_output("q", 2);
        let (x, e, r, b, s, p, q) = (
            module.sig(x),
            module.sig(e),
            module.sig(r),
            module.sig(b),
            module.sig(s),
            module.sig(p),
            module.sig(q),
        );
        module.add_tribuf(x.clone(), e.clone(), p.clone());
        let mut mux_a = p.slice(0..1);
        mux_a.append(&r);
        let mux = module.add_mux(mux_a, b.clone(), s.clone(), q.clone());

        let config = TribufConfig { propagate: true, ..Default::default() };
        tribuf(&mut design, &config, &Selection::full()).unwrap();

        let module = design.module("top").unwrap();
        let muxes = cells_of(module, CellKind::Mux);
        assert_eq!(muxes.len(), 2);

        let residual = module.cell(mux);
        assert_eq!(residual.port(Port::A), &r);
        assert_eq!(residual.port(Port::B), &b.slice(1..2));
        assert_eq!(residual.port(Port::Y), &q.slice(1..2));
        assert_eq!(residual.param(Param::Width), Some(1));

        let covered = module.cell(*muxes.iter().find(|&&id| id != mux).unwrap());
        assert_eq!(covered.port(Port::A), &x.slice(0..1));
        assert_eq!(covered.port(Port::B), &b.slice(0..1));
        assert_eq!(covered.port(Port::S), &s);

        let tribufs = cells_of(module, CellKind::Tribuf);
        assert_eq!(tribufs.len(), 1);
        let new_tribuf = module.cell(tribufs[0]);
        assert_eq!(new_tribuf.port(Port::A), covered.port(Port::Y));
        assert_eq!(new_tribuf.port(Port::Y), &q.slice(0..1));
    }

    #[test]
    fn test_propagation_skips_unselected_readers() {
        let mut design = Design::new();
        let module = design.add_module("top");
        let x = module.add_input("x", 1);
        let e = module.add_input("e", 1);
        let b = module.add_input("b", 1);
        let s = module.add_input("s", 1);
        let y1 = module.add_wire("y1", 1);
        let y2 = module.add_output("y2", 1);
        let (x, e, b, s, y1, y2) =
            (module.sig(x), module.sig(e), module.sig(b), module.sig(s), module.sig(y1), module.sig(y2));
        module.add_tribuf(x, e, y1.clone());
        let mux = module.add_mux(y1.clone(), b, s, y2);
        let mux_name = module.cell(mux).name().to_string();

        let config = TribufConfig { propagate: true, ..Default::default() };
        let selection = Selection::full().with_cell_filter(move |_, cell| cell.name() != mux_name);
        tribuf(&mut design, &config, &selection).unwrap();

        let module = design.module("top").unwrap();
        assert_eq!(module.cells().count(), 2);
        assert_eq!(module.cell(mux).port(Port::A), &y1);
    }

    #[test]
    fn test_untouched_netlist_leaves_scratchpad_alone() {
        let mut design = Design::new();
        let module = design.add_module("top");
        let a = module.add_input("a", 1);
        let y = module.add_output("y", 1);
        let (a, y) = (module.sig(a), module.sig(y));
        module.add_not(a, y);

        tribuf(&mut design, &TribufConfig::default(), &Selection::full()).unwrap();
        assert!(!design.scratchpad_get_bool("tribuf.added_something"));
    }
}
