use indexmap::IndexMap;

use crate::{Cell, Module};

/// A design is a set of named modules plus the scratchpad, a key/value
/// channel passes use to signal cross-pass state to the driver.
pub struct Design {
    modules: IndexMap<String, Module>,
    scratchpad: IndexMap<String, bool>,
}

impl Design {
    pub fn new() -> Design {
        Design { modules: IndexMap::new(), scratchpad: IndexMap::new() }
    }

    pub fn add_module(&mut self, name: impl Into<String>) -> &mut Module {
        let name = name.into();
        match self.modules.entry(name.clone()) {
            indexmap::map::Entry::Occupied(entry) => {
                panic!("duplicate module `{}`", entry.key());
            }
            indexmap::map::Entry::Vacant(entry) => entry.insert(Module::new(name)),
        }
    }

    pub fn module(&self, name: &str) -> Option<&Module> {
        self.modules.get(name)
    }

    pub fn module_mut(&mut self, name: &str) -> &mut Module {
        self.modules.get_mut(name).expect("no such module")
    }

    pub fn modules(&self) -> impl Iterator<Item = &Module> {
        self.modules.values()
    }

    pub fn scratchpad_set_bool(&mut self, key: &str, value: bool) {
        self.scratchpad.insert(key.to_string(), value);
    }

    pub fn scratchpad_get_bool(&self, key: &str) -> bool {
        self.scratchpad.get(key).copied().unwrap_or(false)
    }
}

impl Default for Design {
    fn default() -> Self {
        Design::new()
    }
}

type ModuleFilter = Box<dyn Fn(&Module) -> bool>;
type CellFilter = Box<dyn Fn(&Module, &Cell) -> bool>;

/// The pass manager's selection predicates. Passes consult the module filter
/// to decide which modules to transform and the cell filter to decide which
/// cells inside a selected module may be rewritten.
pub struct Selection {
    module_filter: Option<ModuleFilter>,
    cell_filter: Option<CellFilter>,
}

impl Selection {
    /// Selects every module and every cell.
    pub fn full() -> Selection {
        Selection { module_filter: None, cell_filter: None }
    }

    pub fn with_module_filter(mut self, filter: impl Fn(&Module) -> bool + 'static) -> Selection {
        self.module_filter = Some(Box::new(filter));
        self
    }

    pub fn with_cell_filter(mut self, filter: impl Fn(&Module, &Cell) -> bool + 'static) -> Selection {
        self.cell_filter = Some(Box::new(filter));
        self
    }

    pub fn selected_module(&self, module: &Module) -> bool {
        self.module_filter.as_ref().map_or(true, |filter| filter(module))
    }

    pub fn selected_cell(&self, module: &Module, cell: &Cell) -> bool {
        self.cell_filter.as_ref().map_or(true, |filter| filter(module, cell))
    }
}

impl Default for Selection {
    fn default() -> Self {
        Selection::full()
    }
}
