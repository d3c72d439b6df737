use std::fmt;

use indexmap::IndexMap;

use crate::SigSpec;

/// The primitive operator a cell instantiates. `Mux` and `Tribuf` are the
/// parameterized coarse cells; `MuxGate` and `TribufGate` are their
/// single-bit gate-level counterparts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellKind {
    Mux,
    MuxGate,
    Tribuf,
    TribufGate,
    Not,
    And,
    Or,
    ReduceOr,
    Pmux,
    Assert,
}

impl CellKind {
    pub fn name(self) -> &'static str {
        match self {
            CellKind::Mux => "$mux",
            CellKind::MuxGate => "$_MUX_",
            CellKind::Tribuf => "$tribuf",
            CellKind::TribufGate => "$_TBUF_",
            CellKind::Not => "$not",
            CellKind::And => "$and",
            CellKind::Or => "$or",
            CellKind::ReduceOr => "$reduce_or",
            CellKind::Pmux => "$pmux",
            CellKind::Assert => "$assert",
        }
    }

    pub fn is_mux(self) -> bool {
        matches!(self, CellKind::Mux | CellKind::MuxGate)
    }

    pub fn is_tribuf(self) -> bool {
        matches!(self, CellKind::Tribuf | CellKind::TribufGate)
    }

    /// The enable port of a tri-state buffer: `EN` on the coarse cell,
    /// `E` on the gate-level one.
    pub fn enable_port(self) -> Port {
        match self {
            CellKind::Tribuf => Port::En,
            CellKind::TribufGate => Port::E,
            _ => panic!("cell kind {} has no enable port", self.name()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Port {
    A,
    B,
    S,
    Y,
    En,
    E,
}

impl Port {
    pub fn name(self) -> &'static str {
        match self {
            Port::A => "A",
            Port::B => "B",
            Port::S => "S",
            Port::Y => "Y",
            Port::En => "EN",
            Port::E => "E",
        }
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Param {
    Width,
    SWidth,
}

/// A parameterized operator instance with named ports.
#[derive(Debug, Clone)]
pub struct Cell {
    pub(crate) name: String,
    kind: CellKind,
    ports: IndexMap<Port, SigSpec>,
    params: IndexMap<Param, usize>,
    keep: bool,
    src: Option<String>,
}

impl Cell {
    pub fn new(kind: CellKind) -> Cell {
        Cell {
            name: String::new(),
            kind,
            ports: IndexMap::new(),
            params: IndexMap::new(),
            keep: false,
            src: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Cell {
        self.name = name.into();
        self
    }

    pub fn with_port(mut self, port: Port, sig: impl Into<SigSpec>) -> Cell {
        self.set_port(port, sig.into());
        self
    }

    pub fn with_param(mut self, param: Param, value: usize) -> Cell {
        self.set_param(param, value);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> CellKind {
        self.kind
    }

    pub fn set_kind(&mut self, kind: CellKind) {
        self.kind = kind;
    }

    pub fn port(&self, port: Port) -> &SigSpec {
        match self.ports.get(&port) {
            Some(sig) => sig,
            None => panic!("cell `{}` ({}) has no port {}", self.name, self.kind.name(), port),
        }
    }

    pub fn get_port(&self, port: Port) -> Option<&SigSpec> {
        self.ports.get(&port)
    }

    pub fn set_port(&mut self, port: Port, sig: SigSpec) {
        self.ports.insert(port, sig);
    }

    pub fn unset_port(&mut self, port: Port) {
        self.ports.shift_remove(&port);
    }

    pub fn ports(&self) -> impl Iterator<Item = (Port, &SigSpec)> {
        self.ports.iter().map(|(&port, sig)| (port, sig))
    }

    /// Whether `port` carries a value driven by this cell.
    pub fn is_output(&self, port: Port) -> bool {
        port == Port::Y
    }

    pub fn param(&self, param: Param) -> Option<usize> {
        self.params.get(&param).copied()
    }

    pub fn set_param(&mut self, param: Param, value: usize) {
        self.params.insert(param, value);
    }

    pub fn keep(&self) -> bool {
        self.keep
    }

    pub fn set_keep(&mut self, keep: bool) {
        self.keep = keep;
    }

    pub fn src(&self) -> Option<&str> {
        self.src.as_deref()
    }

    pub fn set_src(&mut self, src: Option<String>) {
        self.src = src;
    }

    /// Checks the width relations between ports. Called when a cell is added
    /// to a module; in-place rewrites are expected to restore the relations
    /// before the next structural query. A tri-state enable is deliberately
    /// not constrained here: wide enables are data the passes diagnose.
    pub fn validate(&self) {
        let width = |port: Port| self.port(port).len();
        match self.kind {
            CellKind::Mux | CellKind::MuxGate => {
                assert_eq!(width(Port::A), width(Port::Y), "cell `{}`: A/Y width mismatch", self.name);
                assert_eq!(width(Port::B), width(Port::Y), "cell `{}`: B/Y width mismatch", self.name);
                assert_eq!(width(Port::S), 1, "cell `{}`: S must be one bit", self.name);
            }
            CellKind::Tribuf | CellKind::TribufGate => {
                assert_eq!(width(Port::A), width(Port::Y), "cell `{}`: A/Y width mismatch", self.name);
            }
            CellKind::Not => {
                assert_eq!(width(Port::A), width(Port::Y), "cell `{}`: A/Y width mismatch", self.name);
            }
            CellKind::And | CellKind::Or => {
                assert_eq!(width(Port::A), width(Port::Y), "cell `{}`: A/Y width mismatch", self.name);
                assert_eq!(width(Port::B), width(Port::Y), "cell `{}`: B/Y width mismatch", self.name);
            }
            CellKind::ReduceOr => {
                assert_eq!(width(Port::Y), 1, "cell `{}`: Y must be one bit", self.name);
            }
            CellKind::Pmux => {
                assert_eq!(width(Port::A), width(Port::Y), "cell `{}`: A/Y width mismatch", self.name);
                assert_eq!(
                    width(Port::B),
                    width(Port::A) * width(Port::S),
                    "cell `{}`: B width must be A width times S width",
                    self.name
                );
            }
            CellKind::Assert => {
                assert_eq!(width(Port::A), 1, "cell `{}`: A must be one bit", self.name);
                assert_eq!(width(Port::En), 1, "cell `{}`: EN must be one bit", self.name);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use crate::{Cell, CellKind, Port, SigSpec, State};

    #[test]
    fn test_enable_port() {
        assert_eq!(CellKind::Tribuf.enable_port(), Port::En);
        assert_eq!(CellKind::TribufGate.enable_port(), Port::E);
    }

    #[test]
    #[should_panic(expected = "has no port")]
    fn test_missing_port() {
        let cell = Cell::new(CellKind::Not);
        cell.port(Port::A);
    }

    #[test]
    #[should_panic(expected = "width mismatch")]
    fn test_validate_width() {
        Cell::new(CellKind::Not)
            .with_port(Port::A, SigSpec::constant(State::Zero, 2))
            .with_port(Port::Y, SigSpec::constant(State::Zero, 1))
            .validate();
    }
}
