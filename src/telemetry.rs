use crate::fleet::Fleet;
use crate::topics;
use crate::transport::Transport;
use chrono::Timelike;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

/// Every telemetry value is retained so late subscribers see the last state.
pub const RETAIN_TELEMETRY: bool = true;

/// Topics a module publishes per tick, excluding the per-cell pair.
pub const SCALAR_FIELDS: usize = 4;
pub const FIELDS_PER_CELL: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryValue {
    Integer(u64),
    Float(f64),
    Flag(bool),
    Text(String),
}

impl fmt::Display for TelemetryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryValue::Integer(v) => write!(f, "{v}"),
            // Debug keeps the fractional part on whole numbers ("24.0", not "24")
            TelemetryValue::Float(v) => write!(f, "{v:?}"),
            TelemetryValue::Flag(v) => f.write_str(if *v { "1" } else { "0" }),
            TelemetryValue::Text(v) => f.write_str(v),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryPoint {
    pub topic: String,
    pub value: TelemetryValue,
}

impl TelemetryPoint {
    fn new(topic: String, value: TelemetryValue) -> Self {
        Self { topic, value }
    }

    pub fn payload(&self) -> String {
        self.value.to_string()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub published: usize,
    pub failed: usize,
}

/// Number of topics one tick produces for a fleet of this shape.
pub fn points_per_tick(modules: usize, cells: usize) -> usize {
    modules * (SCALAR_FIELDS + FIELDS_PER_CELL * cells)
}

/// Builds and sends the periodic telemetry frame.
#[derive(Debug, Default)]
pub struct TelemetryPublisher {
    ticks: u64,
    failures: u64,
}

impl TelemetryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Snapshot of every module's observable state, in publication order:
    /// modules in fleet order, scalar fields first, then cells ascending.
    pub fn collect<T: Timelike>(fleet: &Fleet, uptime: Duration, now: &T) -> Vec<TelemetryPoint> {
        let mut points = Vec::with_capacity(points_per_tick(fleet.len(), fleet.cell_count()));

        for module in fleet.modules() {
            let name = module.name();
            points.push(TelemetryPoint::new(
                topics::telemetry_topic(name, topics::UPTIME),
                TelemetryValue::Integer(uptime.as_secs()),
            ));
            points.push(TelemetryPoint::new(
                topics::telemetry_topic(name, topics::MODULE_VOLTAGE),
                TelemetryValue::Float(module.module_voltage(now)),
            ));
            points.push(TelemetryPoint::new(
                topics::telemetry_topic(name, topics::MODULE_TEMPS),
                TelemetryValue::Text(module.module_temps()),
            ));
            points.push(TelemetryPoint::new(
                topics::telemetry_topic(name, topics::CHIP_TEMP),
                TelemetryValue::Float(module.chip_temp()),
            ));

            for (cell, balancing) in module.cell_balancing().iter().enumerate() {
                points.push(TelemetryPoint::new(
                    topics::cell_telemetry_topic(name, cell, topics::IS_BALANCING),
                    TelemetryValue::Flag(*balancing),
                ));
                points.push(TelemetryPoint::new(
                    topics::cell_telemetry_topic(name, cell, topics::CELL_VOLTAGE),
                    TelemetryValue::Float(module.cell_voltage(cell, now)),
                ));
            }
        }

        points
    }

    /// Publishes a frame. A failed topic is logged and skipped, the rest of the
    /// frame still goes out.
    pub async fn publish<T: Transport + ?Sized>(
        &mut self,
        transport: &T,
        points: &[TelemetryPoint],
    ) -> TickReport {
        self.ticks = self.ticks.wrapping_add(1);
        let mut report = TickReport::default();

        for point in points {
            match transport
                .publish(&point.topic, point.payload(), RETAIN_TELEMETRY)
                .await
            {
                Ok(()) => report.published += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!("📡 Telemetry publish failed: {}", e);
                }
            }
        }

        self.failures = self.failures.wrapping_add(report.failed as u64);
        debug!(
            tick = self.ticks,
            published = report.published,
            failed = report.failed,
            "📡 Telemetry tick"
        );
        report
    }
}
