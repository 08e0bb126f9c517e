use crate::signal;
use arrayvec::ArrayString;
use chrono::Timelike;
use heapless::Vec;
use thiserror::Error;

/// Largest cell stack a single module front-end monitors.
pub const MAX_CELLS: usize = 16;
pub const MAX_NAME_LEN: usize = 32;

const DEFAULT_NAME_PREFIX: &str = "bat-sim-";
const PLACEHOLDER_TEMP_C: f64 = 24.0;

pub type ModuleName = ArrayString<MAX_NAME_LEN>;
pub type BalancingFlags = Vec<bool, MAX_CELLS>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NameError {
    #[error("module name is empty")]
    Empty,
    #[error("module name is longer than {MAX_NAME_LEN} bytes")]
    TooLong,
    #[error("module name contains reserved topic character '{0}'")]
    ReservedChar(char),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CellError {
    #[error("cell count {0} outside 1..={MAX_CELLS}")]
    InvalidCount(usize),
    #[error("cell index {index} outside 0..{cell_count}")]
    OutOfRange { index: usize, cell_count: usize },
}

/// Validates a module name for use as a single topic level.
pub fn parse_name(raw: &str) -> Result<ModuleName, NameError> {
    if raw.is_empty() {
        return Err(NameError::Empty);
    }
    if let Some(c) = raw.chars().find(|c| matches!(c, '/' | '+' | '#')) {
        return Err(NameError::ReservedChar(c));
    }
    ModuleName::from(raw).map_err(|_| NameError::TooLong)
}

/// Name a module gets at startup, from its 0-based fleet position.
pub fn default_name(position: usize) -> ModuleName {
    let mut name = ModuleName::new();
    name.push_str(DEFAULT_NAME_PREFIX);
    // position is bounded by the fleet size, the digits always fit
    let digits = (position + 1).to_string();
    let _ = name.try_push_str(&digits);
    name
}

/// Observable module state copied out under the fleet lock.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleState {
    pub position: usize,
    pub name: ModuleName,
    pub cell_balancing: BalancingFlags,
    pub chip_temp_c: f64,
    pub module_temps_c: [f64; 2],
    pub measure_system_voltage: bool,
    pub measure_system_current: bool,
}

/// One simulated battery module.
#[derive(Debug, Clone)]
pub struct BatteryModule {
    position: usize,
    name: ModuleName,
    cell_balancing: BalancingFlags,
    chip_temp_c: f64,
    module_temps_c: [f64; 2],
    measure_system_voltage: bool,
    measure_system_current: bool,
}

impl BatteryModule {
    pub fn new(position: usize, cell_count: usize) -> Result<Self, CellError> {
        if !(1..=MAX_CELLS).contains(&cell_count) {
            return Err(CellError::InvalidCount(cell_count));
        }

        let mut cell_balancing = BalancingFlags::new();
        for _ in 0..cell_count {
            // capacity checked above
            let _ = cell_balancing.push(false);
        }

        Ok(Self {
            position,
            name: default_name(position),
            cell_balancing,
            chip_temp_c: PLACEHOLDER_TEMP_C,
            module_temps_c: [PLACEHOLDER_TEMP_C; 2],
            measure_system_voltage: false,
            measure_system_current: false,
        })
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn name_buf(&self) -> &ModuleName {
        &self.name
    }

    pub fn cell_count(&self) -> usize {
        self.cell_balancing.len()
    }

    pub fn cell_balancing(&self) -> &[bool] {
        &self.cell_balancing
    }

    pub fn is_balancing(&self, index: usize) -> Option<bool> {
        self.cell_balancing.get(index).copied()
    }

    pub fn chip_temp(&self) -> f64 {
        self.chip_temp_c
    }

    pub fn measure_system_voltage(&self) -> bool {
        self.measure_system_voltage
    }

    pub fn measure_system_current(&self) -> bool {
        self.measure_system_current
    }

    /// Voltage of a single cell, `index` is 0-based.
    pub fn cell_voltage<T: Timelike>(&self, index: usize, now: &T) -> f64 {
        signal::cell_voltage(index, now)
    }

    pub fn module_voltage<T: Timelike>(&self, now: &T) -> f64 {
        (0..self.cell_count())
            .map(|index| self.cell_voltage(index, now))
            .sum()
    }

    /// The two module temperature sensors as a comma separated pair.
    pub fn module_temps(&self) -> String {
        format!("{},{}", self.module_temps_c[0], self.module_temps_c[1])
    }

    /// Flags a cell for balancing, `index` is 0-based.
    pub fn request_balancing(&mut self, index: usize) -> Result<(), CellError> {
        let cell_count = self.cell_count();
        match self.cell_balancing.get_mut(index) {
            Some(flag) => {
                *flag = true;
                Ok(())
            }
            None => Err(CellError::OutOfRange { index, cell_count }),
        }
    }

    pub(crate) fn apply_config(
        &mut self,
        name: ModuleName,
        measure_system_voltage: bool,
        measure_system_current: bool,
    ) {
        self.name = name;
        self.measure_system_voltage = measure_system_voltage;
        self.measure_system_current = measure_system_current;
    }

    pub fn state(&self) -> ModuleState {
        ModuleState {
            position: self.position,
            name: self.name,
            cell_balancing: self.cell_balancing.clone(),
            chip_temp_c: self.chip_temp_c,
            module_temps_c: self.module_temps_c,
            measure_system_voltage: self.measure_system_voltage,
            measure_system_current: self.measure_system_current,
        }
    }
}
