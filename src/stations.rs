//! Station registry
//!
//! Holds the last-known state of every station slot the hub manages. The
//! wire protocol has no station ids; a station IS its position, so the
//! registry is a fixed-capacity sequence that never grows, shrinks or
//! reorders. Poll results merge in by position, commands mutate a slot
//! optimistically and roll back when the hub rejects them.

use crate::hub_client::StationStatusReport;
use serde::Serialize;
use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};
use thiserror::Error;

/// Maximum station name length accepted by the hub firmware.
pub const NAME_MAX_LEN: usize = 20;

pub type SharedRegistry = Arc<Mutex<StationRegistry>>;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Station {
    pub name: String,
    pub code: String,
    pub powered: bool,
}

/// Station commands the hub accepts. One command of each kind may be in
/// flight per station at a time; the in-flight guard rejects duplicates.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CommandKind {
    Power,
    Record,
    Rename,
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum CommandError {
    #[error("no station at index {0}")]
    NoSuchStation(usize),
    #[error("name too short (at least 1 character)")]
    NameTooShort,
    #[error("name too long (at most {NAME_MAX_LEN} characters)")]
    NameTooLong,
    #[error("station {0} already has this command in flight")]
    CommandInFlight(usize),
}

pub struct StationRegistry {
    slots: Vec<Station>,
    in_flight: HashSet<(usize, CommandKind)>,
}

impl StationRegistry {
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|i| Station {
                name: format!("Station {}", i + 1),
                code: String::new(),
                powered: false,
            })
            .collect();

        Self {
            slots,
            in_flight: HashSet::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn snapshot(&self) -> Vec<Station> {
        self.slots.clone()
    }

    pub fn station(&self, sid: usize) -> Result<&Station, CommandError> {
        self.slots.get(sid).ok_or(CommandError::NoSuchStation(sid))
    }

    /// Merge a device status report by position. Slots beyond what the
    /// device reported keep their last-known state; reported entries beyond
    /// capacity are ignored.
    pub fn apply_poll(&mut self, report: &StationStatusReport) {
        for (slot, reported) in self.slots.iter_mut().zip(&report.stations) {
            slot.name = reported.name.clone();
            slot.code = reported.code.clone();
            slot.powered = reported.status != 0;
        }
    }

    /// Claim the per-(station, command) in-flight guard. Must be paired
    /// with [`finish_command`](Self::finish_command) once the request
    /// resolves, success or not.
    pub fn begin_command(&mut self, sid: usize, kind: CommandKind) -> Result<(), CommandError> {
        if sid >= self.slots.len() {
            return Err(CommandError::NoSuchStation(sid));
        }
        if !self.in_flight.insert((sid, kind)) {
            return Err(CommandError::CommandInFlight(sid));
        }
        Ok(())
    }

    pub fn finish_command(&mut self, sid: usize, kind: CommandKind) {
        self.in_flight.remove(&(sid, kind));
    }

    /// Optimistically set the power state, returning the previous value so
    /// the caller can roll back on command failure. Whatever request
    /// completes last wins; the protocol carries no sequence numbers.
    pub fn set_powered(&mut self, sid: usize, on: bool) -> Result<bool, CommandError> {
        let slot = self
            .slots
            .get_mut(sid)
            .ok_or(CommandError::NoSuchStation(sid))?;

        let previous = slot.powered;
        slot.powered = on;
        Ok(previous)
    }

    /// Optimistically set the name, returning the previous value for
    /// rollback. Length violations are rejected here, before any network
    /// request is issued.
    pub fn set_name(&mut self, sid: usize, name: &str) -> Result<String, CommandError> {
        Self::validate_name(name)?;

        let slot = self
            .slots
            .get_mut(sid)
            .ok_or(CommandError::NoSuchStation(sid))?;

        let previous = std::mem::replace(&mut slot.name, name.to_string());
        Ok(previous)
    }

    pub fn validate_name(name: &str) -> Result<(), CommandError> {
        if name.is_empty() {
            return Err(CommandError::NameTooShort);
        }
        if name.chars().count() > NAME_MAX_LEN {
            return Err(CommandError::NameTooLong);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub_client::StationStatus;

    fn report(entries: &[(&str, u8, &str)]) -> StationStatusReport {
        StationStatusReport {
            stations: entries
                .iter()
                .map(|(name, status, code)| StationStatus {
                    name: name.to_string(),
                    status: *status,
                    code: code.to_string(),
                })
                .collect(),
        }
    }

    mod capacity {
        use super::*;

        #[test]
        fn slots_exist_before_first_poll() {
            let registry = StationRegistry::new(3);
            assert_eq!(registry.capacity(), 3);
            assert_eq!(registry.station(0).unwrap().name, "Station 1");
            assert!(!registry.station(2).unwrap().powered);
        }

        #[test]
        fn size_never_changes() {
            let mut registry = StationRegistry::new(2);

            registry.apply_poll(&report(&[
                ("a", 1, ""),
                ("b", 0, ""),
                ("c", 1, ""),
                ("d", 1, ""),
            ]));
            assert_eq!(registry.capacity(), 2);

            registry.apply_poll(&report(&[("a", 1, "")]));
            assert_eq!(registry.capacity(), 2);
        }
    }

    mod apply_poll {
        use super::*;

        #[test]
        fn merges_by_position() {
            let mut registry = StationRegistry::new(2);

            registry.apply_poll(&report(&[("Lamp", 1, "a9f3"), ("Fan", 0, "77")]));

            assert_eq!(registry.station(0).unwrap().name, "Lamp");
            assert!(registry.station(0).unwrap().powered);
            assert_eq!(registry.station(0).unwrap().code, "a9f3");
            assert_eq!(registry.station(1).unwrap().name, "Fan");
            assert!(!registry.station(1).unwrap().powered);
        }

        #[test]
        fn short_report_keeps_remaining_slots() {
            let mut registry = StationRegistry::new(2);
            registry.apply_poll(&report(&[("Lamp", 1, ""), ("Fan", 1, "")]));

            registry.apply_poll(&report(&[("Lamp", 0, "")]));

            assert!(!registry.station(0).unwrap().powered);
            // slot 1 untouched by the shorter report
            assert!(registry.station(1).unwrap().powered);
            assert_eq!(registry.station(1).unwrap().name, "Fan");
        }

        #[test]
        fn is_idempotent() {
            let mut registry = StationRegistry::new(2);
            let r = report(&[("Lamp", 1, "a9f3")]);

            registry.apply_poll(&r);
            let first = registry.snapshot();
            registry.apply_poll(&r);

            assert_eq!(registry.snapshot(), first);
        }
    }

    mod commands {
        use super::*;

        #[test]
        fn set_powered_returns_previous_for_rollback() {
            let mut registry = StationRegistry::new(1);

            let previous = registry.set_powered(0, true).unwrap();
            assert!(!previous);
            assert!(registry.station(0).unwrap().powered);

            // rollback path
            registry.set_powered(0, previous).unwrap();
            assert!(!registry.station(0).unwrap().powered);
        }

        #[test]
        fn last_completed_write_wins() {
            let mut registry = StationRegistry::new(1);

            // command staged on, then a poll completes reporting on, then
            // the command's rollback completes last: rollback wins
            registry.set_powered(0, true).unwrap();
            registry.apply_poll(&report(&[("Lamp", 1, "")]));
            registry.set_powered(0, false).unwrap();

            assert!(!registry.station(0).unwrap().powered);
        }

        #[test]
        fn rejects_out_of_range_index() {
            let mut registry = StationRegistry::new(1);
            assert_eq!(
                registry.set_powered(1, true),
                Err(CommandError::NoSuchStation(1))
            );
        }

        #[test]
        fn in_flight_guard_rejects_duplicates() {
            let mut registry = StationRegistry::new(1);

            registry.begin_command(0, CommandKind::Power).unwrap();
            assert_eq!(
                registry.begin_command(0, CommandKind::Power),
                Err(CommandError::CommandInFlight(0))
            );

            // a different command kind on the same station is independent
            registry.begin_command(0, CommandKind::Record).unwrap();

            registry.finish_command(0, CommandKind::Power);
            registry.begin_command(0, CommandKind::Power).unwrap();
        }
    }

    mod names {
        use super::*;

        #[test]
        fn rejects_too_long_locally() {
            let mut registry = StationRegistry::new(1);
            let name = "x".repeat(21);

            assert_eq!(
                registry.set_name(0, &name),
                Err(CommandError::NameTooLong)
            );
            assert_eq!(registry.station(0).unwrap().name, "Station 1");
        }

        #[test]
        fn rejects_empty() {
            assert_eq!(
                StationRegistry::validate_name(""),
                Err(CommandError::NameTooShort)
            );
        }

        #[test]
        fn accepts_boundary_lengths() {
            assert!(StationRegistry::validate_name("x").is_ok());
            assert!(StationRegistry::validate_name(&"x".repeat(20)).is_ok());
        }

        #[test]
        fn set_name_returns_previous_for_rollback() {
            let mut registry = StationRegistry::new(1);

            let previous = registry.set_name(0, "Desk Lamp").unwrap();
            assert_eq!(previous, "Station 1");
            assert_eq!(registry.station(0).unwrap().name, "Desk Lamp");
        }
    }
}
