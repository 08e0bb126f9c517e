//! Topic namespace and route table.
//!
//! Inbound commands live under `esp-module/<name>/` with 1-based cell indices,
//! outbound telemetry under the same prefix with 0-based cell indices. The
//! asymmetry matches the firmware the platform talks to and must not be "fixed".

use std::collections::HashMap;

pub const TOPIC_ROOT: &str = "esp-module";

pub const SET_CONFIG: &str = "set_config";
pub const BLINK: &str = "blink";
pub const RESTART: &str = "restart";
pub const BALANCE_REQUEST: &str = "balance_request";

pub const UPTIME: &str = "uptime";
pub const MODULE_VOLTAGE: &str = "module_voltage";
pub const MODULE_TEMPS: &str = "module_temps";
pub const CHIP_TEMP: &str = "chip_temp";
pub const IS_BALANCING: &str = "is_balancing";
pub const CELL_VOLTAGE: &str = "voltage";

/// What an inbound topic asks the module to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    SetConfig,
    Blink,
    Restart,
    /// `cell` is the 1-based ordinal carried by the topic.
    BalanceRequest { cell: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub module: usize,
    pub kind: CommandKind,
}

pub fn namespace(name: &str) -> String {
    format!("{TOPIC_ROOT}/{name}")
}

pub fn command_topic(name: &str, kind: CommandKind) -> String {
    match kind {
        CommandKind::SetConfig => format!("{TOPIC_ROOT}/{name}/{SET_CONFIG}"),
        CommandKind::Blink => format!("{TOPIC_ROOT}/{name}/{BLINK}"),
        CommandKind::Restart => format!("{TOPIC_ROOT}/{name}/{RESTART}"),
        CommandKind::BalanceRequest { cell } => {
            format!("{TOPIC_ROOT}/{name}/cell/{cell}/{BALANCE_REQUEST}")
        }
    }
}

pub fn telemetry_topic(name: &str, field: &str) -> String {
    format!("{TOPIC_ROOT}/{name}/{field}")
}

/// `cell` is 0-based here.
pub fn cell_telemetry_topic(name: &str, cell: usize, field: &str) -> String {
    format!("{TOPIC_ROOT}/{name}/cell/{cell}/{field}")
}

/// Every command a module with `cell_count` cells answers to, in subscription order.
pub fn command_kinds(cell_count: usize) -> impl Iterator<Item = CommandKind> {
    [CommandKind::SetConfig, CommandKind::Blink, CommandKind::Restart]
        .into_iter()
        .chain((1..=cell_count).map(|cell| CommandKind::BalanceRequest { cell }))
}

pub fn subscription_topics(name: &str, cell_count: usize) -> Vec<String> {
    command_kinds(cell_count)
        .map(|kind| command_topic(name, kind))
        .collect()
}

/// Parses the part of a topic after `esp-module/<name>/` into a command kind,
/// without checking the cell ordinal against the module.
pub fn parse_command_suffix(suffix: &str) -> Option<CommandKind> {
    match suffix {
        SET_CONFIG => Some(CommandKind::SetConfig),
        BLINK => Some(CommandKind::Blink),
        RESTART => Some(CommandKind::Restart),
        _ => {
            let mut parts = suffix.split('/');
            match (parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some("cell"), Some(index), Some(BALANCE_REQUEST), None) => index
                    .parse::<usize>()
                    .ok()
                    .map(|cell| CommandKind::BalanceRequest { cell }),
                _ => None,
            }
        }
    }
}

/// Precomputed lookup from subscribed topic to module and command.
///
/// Rebuilt per module whenever a module is renamed so lookups never rescan
/// the fleet.
#[derive(Debug, Default, Clone)]
pub struct RouteTable {
    routes: HashMap<String, Route>,
    namespaces: HashMap<String, usize>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_module(&mut self, module: usize, name: &str, cell_count: usize) {
        for kind in command_kinds(cell_count) {
            self.routes.insert(command_topic(name, kind), Route { module, kind });
        }
        self.namespaces.insert(name.to_string(), module);
    }

    pub fn remove_module(&mut self, name: &str, cell_count: usize) {
        for kind in command_kinds(cell_count) {
            self.routes.remove(&command_topic(name, kind));
        }
        self.namespaces.remove(name);
    }

    pub fn lookup(&self, topic: &str) -> Option<Route> {
        self.routes.get(topic).copied()
    }

    /// Module currently owning `name`, if any.
    pub fn owner(&self, name: &str) -> Option<usize> {
        self.namespaces.get(name).copied()
    }

    /// Splits a topic under a known module namespace into module position and
    /// the remaining suffix.
    pub fn split<'a>(&self, topic: &'a str) -> Option<(usize, &'a str)> {
        let rest = topic.strip_prefix(TOPIC_ROOT)?.strip_prefix('/')?;
        let (name, suffix) = rest.split_once('/')?;
        self.owner(name).map(|module| (module, suffix))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_topics() {
        let topics = subscription_topics("bat-sim-1", 2);
        assert_eq!(
            topics,
            vec![
                "esp-module/bat-sim-1/set_config",
                "esp-module/bat-sim-1/blink",
                "esp-module/bat-sim-1/restart",
                "esp-module/bat-sim-1/cell/1/balance_request",
                "esp-module/bat-sim-1/cell/2/balance_request",
            ]
        );
    }

    #[test]
    fn test_telemetry_topics_are_zero_based() {
        assert_eq!(telemetry_topic("m", UPTIME), "esp-module/m/uptime");
        assert_eq!(
            cell_telemetry_topic("m", 0, IS_BALANCING),
            "esp-module/m/cell/0/is_balancing"
        );
    }

    #[test]
    fn test_parse_command_suffix() {
        assert_eq!(parse_command_suffix("set_config"), Some(CommandKind::SetConfig));
        assert_eq!(parse_command_suffix("blink"), Some(CommandKind::Blink));
        assert_eq!(parse_command_suffix("restart"), Some(CommandKind::Restart));
        assert_eq!(
            parse_command_suffix("cell/13/balance_request"),
            Some(CommandKind::BalanceRequest { cell: 13 })
        );
        assert_eq!(parse_command_suffix("cell/x/balance_request"), None);
        assert_eq!(parse_command_suffix("cell/1/balance_request/extra"), None);
        assert_eq!(parse_command_suffix("uptime"), None);
    }

    #[test]
    fn test_route_table_rename() {
        let mut table = RouteTable::new();
        table.insert_module(0, "a", 3);
        table.insert_module(1, "b", 3);
        assert_eq!(table.len(), 12);

        let route = table.lookup("esp-module/b/cell/3/balance_request").unwrap();
        assert_eq!(route, Route { module: 1, kind: CommandKind::BalanceRequest { cell: 3 } });
        assert!(table.lookup("esp-module/b/cell/4/balance_request").is_none());

        table.remove_module("b", 3);
        table.insert_module(1, "c", 3);
        assert!(table.lookup("esp-module/b/blink").is_none());
        assert_eq!(table.lookup("esp-module/c/blink").unwrap().module, 1);
        assert_eq!(table.owner("c"), Some(1));
        assert_eq!(table.owner("b"), None);
        assert_eq!(table.len(), 12);
    }

    #[test]
    fn test_split() {
        let mut table = RouteTable::new();
        table.insert_module(4, "pack", 1);
        assert_eq!(
            table.split("esp-module/pack/cell/9/balance_request"),
            Some((4, "cell/9/balance_request"))
        );
        assert_eq!(table.split("esp-module/other/blink"), None);
        assert_eq!(table.split("bms/pack/blink"), None);
    }
}
