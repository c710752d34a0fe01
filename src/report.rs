use tracing::{debug, warn};

use crate::measurement::{HeartRateReading, SensorContact};

/// Where decoded readings end up. Calls are sequential, never concurrent.
pub trait ReportSink: Send {
    fn report(&mut self, reading: &HeartRateReading);

    fn report_warning(&mut self, message: &str);

    fn report_info(&mut self, message: &str) {
        let _ = message;
    }

    fn report_error(&mut self, message: &str) {
        self.report_warning(message);
    }
}

#[derive(Debug, Default)]
pub struct ConsoleSink;

impl ReportSink for ConsoleSink {
    fn report(&mut self, reading: &HeartRateReading) {
        println!("Heart rate: {reading}");
        if reading.sensor_contact == SensorContact::NotDetected {
            debug!("sensor reports no skin contact");
        }
        if let Some(kj) = reading.energy_expended {
            debug!("energy expended: {kj} kJ");
        }
        if !reading.rr_intervals.is_empty() {
            debug!("rr intervals: {:?}", reading.rr_interval_durations().collect::<Vec<_>>());
        }
    }

    fn report_warning(&mut self, message: &str) {
        warn!("{message}");
    }

    fn report_info(&mut self, message: &str) {
        println!("{message}");
    }

    fn report_error(&mut self, message: &str) {
        eprintln!("Error: {message}");
    }
}
