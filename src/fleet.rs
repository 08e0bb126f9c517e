use crate::module::{BatteryModule, CellError, ModuleName, ModuleState};
use crate::topics::{self, Route, RouteTable};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FleetError {
    #[error("fleet needs at least one module")]
    NoModules,
    #[error("invalid module: {0}")]
    Cell(#[from] CellError),
    #[error("module {0} does not exist")]
    UnknownModule(usize),
    #[error("name '{name}' is already used by module {owner}")]
    NameInUse { name: ModuleName, owner: usize },
}

/// Subscription change caused by renaming a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resubscription {
    pub module: usize,
    pub retire: Vec<String>,
    pub subscribe: Vec<String>,
}

/// Ordered set of modules with the route table for their current names.
#[derive(Debug, Clone)]
pub struct Fleet {
    modules: Vec<BatteryModule>,
    cell_count: usize,
    routes: RouteTable,
}

impl Fleet {
    pub fn new(module_count: usize, cell_count: usize) -> Result<Self, FleetError> {
        if module_count == 0 {
            return Err(FleetError::NoModules);
        }

        let modules = (0..module_count)
            .map(|position| BatteryModule::new(position, cell_count))
            .collect::<Result<Vec<_>, _>>()?;

        let mut routes = RouteTable::new();
        for module in &modules {
            routes.insert_module(module.position(), module.name(), cell_count);
        }

        Ok(Self {
            modules,
            cell_count,
            routes,
        })
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn cell_count(&self) -> usize {
        self.cell_count
    }

    pub fn modules(&self) -> &[BatteryModule] {
        &self.modules
    }

    pub fn module(&self, position: usize) -> Option<&BatteryModule> {
        self.modules.get(position)
    }

    pub fn module_mut(&mut self, position: usize) -> Option<&mut BatteryModule> {
        self.modules.get_mut(position)
    }

    pub fn states(&self) -> Vec<ModuleState> {
        self.modules.iter().map(BatteryModule::state).collect()
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn route(&self, topic: &str) -> Option<Route> {
        self.routes.lookup(topic)
    }

    /// Every topic the fleet listens on under the current names.
    pub fn subscription_topics(&self) -> Vec<String> {
        self.modules
            .iter()
            .flat_map(|module| topics::subscription_topics(module.name(), self.cell_count))
            .collect()
    }

    /// Applies a configuration to one module and swaps its routes in one step.
    ///
    /// Returns the subscription change when the name actually changed. Nothing is
    /// modified when the name belongs to another module.
    pub fn configure(
        &mut self,
        position: usize,
        name: ModuleName,
        measure_system_voltage: bool,
        measure_system_current: bool,
    ) -> Result<Option<Resubscription>, FleetError> {
        if position >= self.modules.len() {
            return Err(FleetError::UnknownModule(position));
        }
        if let Some(owner) = self.routes.owner(&name) {
            if owner != position {
                return Err(FleetError::NameInUse { name, owner });
            }
        }

        let cell_count = self.cell_count;
        let module = &mut self.modules[position];
        let old_name = *module.name_buf();
        module.apply_config(name, measure_system_voltage, measure_system_current);

        if old_name == name {
            return Ok(None);
        }

        self.routes.remove_module(&old_name, cell_count);
        self.routes.insert_module(position, &name, cell_count);

        Ok(Some(Resubscription {
            module: position,
            retire: topics::subscription_topics(&old_name, cell_count),
            subscribe: topics::subscription_topics(&name, cell_count),
        }))
    }
}
