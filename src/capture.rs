//! Raw-sample capture sessions
//!
//! The hub cannot scan and report in one round-trip: it must be told to
//! scan, be given time to collect, and then be asked for the result. A
//! session therefore runs scan -> wait -> fetch -> decode as one sequential
//! task. Only one session may be active; any failing step aborts back to
//! Idle and publishes nothing.

use crate::{
    hub_client::{ClientError, HubClient},
    sample::{CodecError, SampleRecord, Timeline, decode},
};
use log::{debug, info};
use serde::Serialize;
use std::{
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use thiserror::Error;
use tokio::time::sleep;

/// Wait this factor of the reported scan duration before fetching, leaving
/// the device a 20% margin to finish collecting.
pub const FETCH_MARGIN: f64 = 1.2;

// Upper bound on a plausible scan duration; anything beyond this is a
// garbled device response, not a real capture.
const MAX_SCAN_SECONDS: f64 = 3600.0;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum CapturePhase {
    Idle,
    Scanning,
    AwaitingFetch,
    Decoding,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("a capture session is already running")]
    Busy,
    #[error("a transmit request is already in flight")]
    TransmitBusy,
    #[error("scan request failed: {0}")]
    Scan(#[source] ClientError),
    #[error("scan reported invalid duration {0}")]
    InvalidDuration(f64),
    #[error("fetch request failed: {0}")]
    Fetch(#[source] ClientError),
    #[error("captured data invalid: {0}")]
    Decode(#[from] CodecError),
    #[error("transmit request failed: {0}")]
    Transmit(#[source] ClientError),
}

/// Result of a completed session: the persistable record plus its expanded
/// timeline.
#[derive(Debug, Serialize)]
pub struct CaptureOutcome {
    pub record: SampleRecord,
    pub timeline: Timeline,
}

pub struct CaptureController {
    phase: Mutex<CapturePhase>,
    last_record: Mutex<Option<SampleRecord>>,
    transmit_in_flight: AtomicBool,
}

impl CaptureController {
    pub fn new() -> Self {
        Self {
            phase: Mutex::new(CapturePhase::Idle),
            last_record: Mutex::new(None),
            transmit_in_flight: AtomicBool::new(false),
        }
    }

    pub fn phase(&self) -> CapturePhase {
        *self.phase.lock().unwrap()
    }

    /// The most recent successful capture, kept for export and inspection.
    pub fn last_record(&self) -> Option<SampleRecord> {
        self.last_record.lock().unwrap().clone()
    }

    /// Run one capture session to completion. Rejected with
    /// [`CaptureError::Busy`] while another session is active; always back
    /// at Idle when this returns.
    pub async fn run<Client: HubClient>(
        &self,
        hub: &Client,
    ) -> Result<CaptureOutcome, CaptureError> {
        self.begin()?;

        let result = self.drive(hub).await;
        self.set_phase(CapturePhase::Idle);

        if let Ok(outcome) = &result {
            *self.last_record.lock().unwrap() = Some(outcome.record.clone());
        }

        result
    }

    async fn drive<Client: HubClient>(
        &self,
        hub: &Client,
    ) -> Result<CaptureOutcome, CaptureError> {
        let scan = hub.start_scan().await.map_err(CaptureError::Scan)?;

        if !(0.0..=MAX_SCAN_SECONDS).contains(&scan.time) {
            return Err(CaptureError::InvalidDuration(scan.time));
        }

        // Fetching too early must be avoided: the data is not ready until
        // the reported scan duration has passed.
        let wait = Duration::from_secs_f64(scan.time * FETCH_MARGIN);
        info!(
            "scan started: {}s at {}us resolution, fetching in {wait:?}",
            scan.time, scan.interval
        );

        self.set_phase(CapturePhase::AwaitingFetch);
        sleep(wait).await;

        let samples = hub.fetch_samples().await.map_err(CaptureError::Fetch)?;

        self.set_phase(CapturePhase::Decoding);
        debug!("decoding {} hex digits", samples.data.len());

        let timeline = decode(&samples.data)?;
        let record = SampleRecord {
            time: scan.time,
            interval: scan.interval,
            data: samples.data.to_ascii_uppercase(),
        };

        Ok(CaptureOutcome { record, timeline })
    }

    fn begin(&self) -> Result<(), CaptureError> {
        let mut phase = self.phase.lock().unwrap();
        if *phase != CapturePhase::Idle {
            return Err(CaptureError::Busy);
        }
        *phase = CapturePhase::Scanning;
        Ok(())
    }

    fn set_phase(&self, next: CapturePhase) {
        *self.phase.lock().unwrap() = next;
    }

    /// Replay the signal the hub currently holds. Independent of capture,
    /// but guarded so the same transmission cannot be submitted twice while
    /// in flight.
    pub async fn transmit<Client: HubClient>(&self, hub: &Client) -> Result<(), CaptureError> {
        self.try_begin_transmit()?;

        let result = hub.transmit().await.map_err(CaptureError::Transmit);
        self.end_transmit();

        result
    }

    fn try_begin_transmit(&self) -> Result<(), CaptureError> {
        if self.transmit_in_flight.swap(true, Ordering::SeqCst) {
            return Err(CaptureError::TransmitBusy);
        }
        Ok(())
    }

    fn end_transmit(&self) {
        self.transmit_in_flight.store(false, Ordering::SeqCst);
    }
}

impl Default for CaptureController {
    fn default() -> Self {
        Self::new()
    }
}
