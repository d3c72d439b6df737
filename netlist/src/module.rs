use crate::{Cell, CellKind, Param, Port, SigBit, SigSpec, WireId};

/// A stable handle for a cell within its module's arena. Ids stay valid
/// across removals of other cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellId(pub(crate) u32);

impl CellId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A multi-bit signal carrier. A wire is public iff its name does not begin
/// with the generated-name sigil `$`.
#[derive(Debug, Clone)]
pub struct Wire {
    pub(crate) name: String,
    pub(crate) width: usize,
    pub port_input: bool,
    pub port_output: bool,
}

impl Wire {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn is_public(&self) -> bool {
        !self.name.starts_with('$')
    }
}

#[derive(Debug, Clone)]
pub struct Module {
    name: String,
    wires: Vec<Wire>,
    cells: Vec<Option<Cell>>,
    connections: Vec<(SigSpec, SigSpec)>,
    next_auto: u32,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Module {
        Module {
            name: name.into(),
            wires: Vec::new(),
            cells: Vec::new(),
            connections: Vec::new(),
            next_auto: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn auto_name(&mut self, stem: &str) -> String {
        self.next_auto += 1;
        format!("${}${}", stem, self.next_auto)
    }

    pub fn add_wire(&mut self, name: impl Into<String>, width: usize) -> WireId {
        let id = WireId(self.wires.len() as u32);
        self.wires.push(Wire { name: name.into(), width, port_input: false, port_output: false });
        id
    }

    pub fn add_input(&mut self, name: impl Into<String>, width: usize) -> WireId {
        let id = self.add_wire(name, width);
        self.wires[id.index()].port_input = true;
        id
    }

    pub fn add_output(&mut self, name: impl Into<String>, width: usize) -> WireId {
        let id = self.add_wire(name, width);
        self.wires[id.index()].port_output = true;
        id
    }

    /// Adds a wire with a fresh generated name.
    pub fn fresh_wire(&mut self, width: usize) -> WireId {
        let name = self.auto_name("wire");
        self.add_wire(name, width)
    }

    pub fn wire(&self, id: WireId) -> &Wire {
        &self.wires[id.index()]
    }

    pub fn wire_mut(&mut self, id: WireId) -> &mut Wire {
        &mut self.wires[id.index()]
    }

    pub fn wires(&self) -> impl Iterator<Item = (WireId, &Wire)> {
        self.wires.iter().enumerate().map(|(index, wire)| (WireId(index as u32), wire))
    }

    /// The spec covering every bit of `wire`, LSB first.
    pub fn sig(&self, wire: WireId) -> SigSpec {
        (0..self.wire(wire).width).map(|offset| SigBit::Wire(wire, offset)).collect()
    }

    /// Adds a cell, assigning a fresh generated name unless the cell already
    /// carries one. Port width relations are checked here.
    pub fn add_cell(&mut self, mut cell: Cell) -> CellId {
        if cell.name.is_empty() {
            cell.name = self.auto_name(cell.kind().name().trim_matches(|c| c == '$' || c == '_'));
        }
        cell.validate();
        let id = CellId(self.cells.len() as u32);
        self.cells.push(Some(cell));
        id
    }

    pub fn cell(&self, id: CellId) -> &Cell {
        self.cells[id.index()].as_ref().expect("cell was removed")
    }

    pub fn get_cell(&self, id: CellId) -> Option<&Cell> {
        self.cells[id.index()].as_ref()
    }

    pub fn cell_mut(&mut self, id: CellId) -> &mut Cell {
        self.cells[id.index()].as_mut().expect("cell was removed")
    }

    pub fn remove_cell(&mut self, id: CellId) {
        assert!(self.cells[id.index()].take().is_some(), "cell was already removed");
    }

    pub fn cells(&self) -> impl Iterator<Item = (CellId, &Cell)> {
        self.cells
            .iter()
            .enumerate()
            .filter_map(|(index, cell)| cell.as_ref().map(|cell| (CellId(index as u32), cell)))
    }

    pub fn connections(&self) -> &[(SigSpec, SigSpec)] {
        &self.connections
    }

    pub fn connections_mut(&mut self) -> &mut Vec<(SigSpec, SigSpec)> {
        &mut self.connections
    }

    /// Records that `rhs` drives `lhs`.
    pub fn connect(&mut self, lhs: SigSpec, rhs: SigSpec) {
        assert_eq!(
            lhs.len(),
            rhs.len(),
            "connection width mismatch in module `{}`: {} vs {}",
            self.name,
            lhs.len(),
            rhs.len()
        );
        self.connections.push((lhs, rhs));
    }

    pub fn add_not(&mut self, a: SigSpec, y: SigSpec) -> CellId {
        let width = y.len();
        self.add_cell(
            Cell::new(CellKind::Not)
                .with_port(Port::A, a)
                .with_port(Port::Y, y)
                .with_param(Param::Width, width),
        )
    }

    pub fn add_and(&mut self, a: SigSpec, b: SigSpec, y: SigSpec) -> CellId {
        let width = y.len();
        self.add_cell(
            Cell::new(CellKind::And)
                .with_port(Port::A, a)
                .with_port(Port::B, b)
                .with_port(Port::Y, y)
                .with_param(Param::Width, width),
        )
    }

    pub fn add_or(&mut self, a: SigSpec, b: SigSpec, y: SigSpec) -> CellId {
        let width = y.len();
        self.add_cell(
            Cell::new(CellKind::Or)
                .with_port(Port::A, a)
                .with_port(Port::B, b)
                .with_port(Port::Y, y)
                .with_param(Param::Width, width),
        )
    }

    pub fn add_reduce_or(&mut self, a: SigSpec, y: SigSpec) -> CellId {
        let width = a.len();
        self.add_cell(
            Cell::new(CellKind::ReduceOr)
                .with_port(Port::A, a)
                .with_port(Port::Y, y)
                .with_param(Param::Width, width),
        )
    }

    pub fn add_mux(&mut self, a: SigSpec, b: SigSpec, s: SigSpec, y: SigSpec) -> CellId {
        let width = y.len();
        self.add_cell(
            Cell::new(CellKind::Mux)
                .with_port(Port::A, a)
                .with_port(Port::B, b)
                .with_port(Port::S, s)
                .with_port(Port::Y, y)
                .with_param(Param::Width, width),
        )
    }

    pub fn add_pmux(&mut self, a: SigSpec, b: SigSpec, s: SigSpec, y: SigSpec) -> CellId {
        let width = y.len();
        let s_width = s.len();
        self.add_cell(
            Cell::new(CellKind::Pmux)
                .with_port(Port::A, a)
                .with_port(Port::B, b)
                .with_port(Port::S, s)
                .with_port(Port::Y, y)
                .with_param(Param::Width, width)
                .with_param(Param::SWidth, s_width),
        )
    }

    pub fn add_tribuf(&mut self, a: SigSpec, en: SigSpec, y: SigSpec) -> CellId {
        let width = y.len();
        self.add_cell(
            Cell::new(CellKind::Tribuf)
                .with_port(Port::A, a)
                .with_port(Port::En, en)
                .with_port(Port::Y, y)
                .with_param(Param::Width, width),
        )
    }

    pub fn add_assert(&mut self, name: impl Into<String>, a: SigSpec, en: SigSpec) -> CellId {
        self.add_cell(
            Cell::new(CellKind::Assert).with_name(name).with_port(Port::A, a).with_port(Port::En, en),
        )
    }
}
