use crate::fleet::{Fleet, FleetError, Resubscription};
use crate::module::{parse_name, ModuleName, NameError};
use crate::topics::{self, CommandKind};
use thiserror::Error;
use tracing::{debug, info, warn};

const SET_CONFIG_FIELDS: usize = 3;
const FLAG_ON: &str = "1";

/// A command addressed to one module, or traffic the simulator does not own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetConfig {
        module: usize,
        name: ModuleName,
        measure_system_voltage: bool,
        measure_system_current: bool,
    },
    Blink { module: usize },
    Restart { module: usize },
    /// `cell` is the 1-based ordinal from the topic.
    BalanceRequest { module: usize, cell: usize },
    Unknown,
}

impl Command {
    pub fn module(&self) -> Option<usize> {
        match self {
            Command::SetConfig { module, .. }
            | Command::Blink { module }
            | Command::Restart { module }
            | Command::BalanceRequest { module, .. } => Some(*module),
            Command::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("payload is not valid UTF-8")]
    InvalidUtf8,
    #[error("set_config expects {expected} comma separated fields, got {found}")]
    FieldCount { expected: usize, found: usize },
    #[error("invalid module name '{name}': {source}")]
    InvalidName { name: String, source: NameError },
    #[error("cell {cell} outside 1..={cell_count}")]
    CellOutOfRange { cell: usize, cell_count: usize },
    #[error(transparent)]
    Fleet(#[from] FleetError),
}

/// What applying a command did to the fleet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Module state changed, subscriptions unchanged.
    Applied { module: usize },
    /// Module renamed, the caller must move its subscriptions.
    Renamed(Resubscription),
    /// Indicator-only command, nothing changed.
    Acknowledged { module: usize },
    /// Topic not owned by any module.
    Ignored,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RouterStats {
    pub applied: u32,
    pub rejected: u32,
    pub ignored: u32,
}

/// Turns inbound `(topic, payload)` pairs into commands and applies them.
#[derive(Debug, Default)]
pub struct CommandRouter {
    stats: RouterStats,
}

impl CommandRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> RouterStats {
        self.stats
    }

    pub fn parse(&self, fleet: &Fleet, topic: &str, payload: &[u8]) -> Result<Command, CommandError> {
        let Some(route) = fleet.route(topic) else {
            // a cell request beyond the module's cells never gets a route, but it is
            // still addressed to us and deserves a rejection rather than silence
            if let Some((_, suffix)) = fleet.routes().split(topic) {
                if let Some(CommandKind::BalanceRequest { cell }) = topics::parse_command_suffix(suffix) {
                    return Err(CommandError::CellOutOfRange {
                        cell,
                        cell_count: fleet.cell_count(),
                    });
                }
            }
            return Ok(Command::Unknown);
        };

        let module = route.module;
        match route.kind {
            CommandKind::SetConfig => {
                let payload = std::str::from_utf8(payload).map_err(|_| CommandError::InvalidUtf8)?;
                let fields: Vec<&str> = payload.split(',').collect();
                if fields.len() != SET_CONFIG_FIELDS {
                    return Err(CommandError::FieldCount {
                        expected: SET_CONFIG_FIELDS,
                        found: fields.len(),
                    });
                }
                let name = parse_name(fields[0]).map_err(|source| CommandError::InvalidName {
                    name: fields[0].to_string(),
                    source,
                })?;
                Ok(Command::SetConfig {
                    module,
                    name,
                    measure_system_voltage: fields[1] == FLAG_ON,
                    measure_system_current: fields[2] == FLAG_ON,
                })
            }
            CommandKind::Blink => Ok(Command::Blink { module }),
            CommandKind::Restart => Ok(Command::Restart { module }),
            CommandKind::BalanceRequest { cell } => {
                check_cell(cell, fleet.cell_count())?;
                Ok(Command::BalanceRequest { module, cell })
            }
        }
    }

    pub fn apply(&mut self, fleet: &mut Fleet, command: Command) -> Result<CommandOutcome, CommandError> {
        match command {
            Command::SetConfig {
                module,
                name,
                measure_system_voltage,
                measure_system_current,
            } => {
                let change = fleet.configure(module, name, measure_system_voltage, measure_system_current)?;
                info!(
                    module = module + 1,
                    name = %name,
                    measure_system_voltage,
                    measure_system_current,
                    "⚙️  Configuration applied"
                );
                Ok(match change {
                    Some(resubscription) => CommandOutcome::Renamed(resubscription),
                    None => CommandOutcome::Applied { module },
                })
            }
            Command::Blink { module } => {
                let name = module_name(fleet, module)?;
                info!(module = module + 1, name = %name, "💡 Blink blink!");
                Ok(CommandOutcome::Acknowledged { module })
            }
            Command::Restart { module } => {
                // hardware restarts are fire-and-forget, simulated state is kept
                let name = module_name(fleet, module)?;
                info!(module = module + 1, name = %name, "🔄 Restart requested");
                Ok(CommandOutcome::Acknowledged { module })
            }
            Command::BalanceRequest { module, cell } => {
                let cell_count = fleet.cell_count();
                check_cell(cell, cell_count)?;
                fleet
                    .module_mut(module)
                    .ok_or(FleetError::UnknownModule(module))?
                    .request_balancing(cell - 1)
                    .map_err(|_| CommandError::CellOutOfRange { cell, cell_count })?;
                info!(module = module + 1, cell, "⚖️  Balancing requested");
                Ok(CommandOutcome::Applied { module })
            }
            Command::Unknown => Ok(CommandOutcome::Ignored),
        }
    }

    /// Parses and applies one inbound message, logging rejections.
    pub fn dispatch(
        &mut self,
        fleet: &mut Fleet,
        topic: &str,
        payload: &[u8],
    ) -> Result<CommandOutcome, CommandError> {
        let result = self
            .parse(fleet, topic, payload)
            .and_then(|command| self.apply(fleet, command));

        match &result {
            Ok(CommandOutcome::Ignored) => {
                self.stats.ignored = self.stats.ignored.wrapping_add(1);
                debug!(topic, "Ignoring message outside the module namespace");
            }
            Ok(_) => self.stats.applied = self.stats.applied.wrapping_add(1),
            Err(e) => {
                self.stats.rejected = self.stats.rejected.wrapping_add(1);
                warn!(topic, "❌ Command rejected: {}", e);
            }
        }

        result
    }
}

fn check_cell(cell: usize, cell_count: usize) -> Result<(), CommandError> {
    if !(1..=cell_count).contains(&cell) {
        return Err(CommandError::CellOutOfRange { cell, cell_count });
    }
    Ok(())
}

fn module_name(fleet: &Fleet, module: usize) -> Result<ModuleName, FleetError> {
    fleet
        .module(module)
        .map(|m| *m.name_buf())
        .ok_or(FleetError::UnknownModule(module))
}
