//! In-flight operation slots for scan, associate and WPS.
//!
//! Exactly one instance per kind may be live. Drivers report through a
//! completion token that is consumed on first use, so a driver cannot
//! complete twice; a generation counter on each slot lets the machine
//! discard completions that arrive after its own timeout or cancel
//! already settled the operation.

use crate::events::Event;
use crate::scan::ScanResult;
use crate::traits::WpsCredentials;
use crate::types::WifiErr;
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Scan,
    Assoc,
    Wps,
}

/// Final outcome of an async operation. The watchdog timer synthesizes
/// `Failure(Time)`; an explicit cancel synthesizes `Canceled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpOutcome {
    Success,
    Failure(WifiErr),
    Canceled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Phase {
    #[default]
    Idle,
    Active,
    /// Settled; late driver completions for this generation are dropped.
    Done,
}

#[derive(Debug, Default)]
struct OpSlot {
    gen: u64,
    phase: Phase,
}

#[derive(Debug, Default)]
pub struct Ops {
    scan: OpSlot,
    assoc: OpSlot,
    wps: OpSlot,
}

impl Ops {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, kind: OpKind) -> &OpSlot {
        match kind {
            OpKind::Scan => &self.scan,
            OpKind::Assoc => &self.assoc,
            OpKind::Wps => &self.wps,
        }
    }

    fn slot_mut(&mut self, kind: OpKind) -> &mut OpSlot {
        match kind {
            OpKind::Scan => &mut self.scan,
            OpKind::Assoc => &mut self.assoc,
            OpKind::Wps => &mut self.wps,
        }
    }

    pub fn active(&self, kind: OpKind) -> bool {
        self.slot(kind).phase == Phase::Active
    }

    pub fn any_active(&self) -> bool {
        self.active(OpKind::Scan) || self.active(OpKind::Assoc) || self.active(OpKind::Wps)
    }

    /// Marks a new in-flight instance and returns its generation, to be
    /// carried by the completion token handed to the driver.
    pub fn begin(&mut self, kind: OpKind) -> u64 {
        let slot = self.slot_mut(kind);
        slot.gen += 1;
        slot.phase = Phase::Active;
        slot.gen
    }

    /// Accepts a driver completion. False means the operation was already
    /// settled (timed out, canceled, or superseded) and the event must be
    /// ignored.
    pub fn settle(&mut self, kind: OpKind, gen: u64) -> bool {
        let slot = self.slot_mut(kind);
        if slot.phase == Phase::Active && slot.gen == gen {
            slot.phase = Phase::Done;
            true
        } else {
            false
        }
    }

    /// Settles an operation from the machine's own watchdog or cancel
    /// path. True when there was a live instance to settle.
    pub fn settle_local(&mut self, kind: OpKind) -> bool {
        let slot = self.slot_mut(kind);
        if slot.phase == Phase::Active {
            slot.phase = Phase::Done;
            true
        } else {
            false
        }
    }
}

/// Completion token for a scan. Consumed on first use.
#[derive(Debug)]
pub struct ScanDone {
    tx: UnboundedSender<Event>,
    gen: u64,
}

impl ScanDone {
    pub(crate) fn new(tx: UnboundedSender<Event>, gen: u64) -> Self {
        Self { tx, gen }
    }

    pub fn complete(self, outcome: OpOutcome, results: Vec<ScanResult>) {
        let _ = self.tx.send(Event::ScanDone { gen: self.gen, outcome, results });
    }
}

/// Completion token for an associate. Consumed on first use.
#[derive(Debug)]
pub struct AssocDone {
    tx: UnboundedSender<Event>,
    gen: u64,
}

impl AssocDone {
    pub(crate) fn new(tx: UnboundedSender<Event>, gen: u64) -> Self {
        Self { tx, gen }
    }

    pub fn complete(self, outcome: OpOutcome) {
        let _ = self.tx.send(Event::AssocDone { gen: self.gen, outcome });
    }
}

/// Completion token for WPS. Successful completion may carry the
/// provisioned credentials.
#[derive(Debug)]
pub struct WpsDone {
    tx: UnboundedSender<Event>,
    gen: u64,
}

impl WpsDone {
    pub(crate) fn new(tx: UnboundedSender<Event>, gen: u64) -> Self {
        Self { tx, gen }
    }

    pub fn complete(self, outcome: OpOutcome, creds: Option<WpsCredentials>) {
        let _ = self.tx.send(Event::WpsDone { gen: self.gen, outcome, creds });
    }
}
