//! Day initialization with shift carry-over.
//!
//! A new day starts from the previous day's census: the night shift hands
//! over to the next day shift, so night rosters become day rosters and each
//! occupied bed's night handoff note becomes the new day's starting note.

mod month;

pub use month::{DayFailure, MonthIntegrityReport};

use log::{info, warn};

use crate::models::{parse_record_date, DailyRecord, PatientSlot, NURSE_SLOTS, TECHNICIAN_SLOTS};
use crate::store::RecordStore;
use crate::{SyncError, SyncResult};

/// Builds daily records for a [`RecordStore`].
pub struct DayInitializer<'a> {
    store: &'a RecordStore,
}

impl<'a> DayInitializer<'a> {
    pub fn new(store: &'a RecordStore) -> Self {
        Self { store }
    }

    /// Get or create the record for `new_date`.
    ///
    /// Order of preference: the remote record (persisted locally, returned
    /// as-is), the local record, then a fresh record carried over from
    /// `previous_date` when that day exists locally, otherwise a blank one.
    /// Fresh records are persisted locally before returning, unless another
    /// writer stored the day first; that record is returned instead.
    pub async fn initialize_day(&self, new_date: &str, previous_date: Option<&str>) -> SyncResult<DailyRecord> {
        if parse_record_date(new_date).is_none() {
            return Err(SyncError::InvalidInput(format!("invalid record date `{}`", new_date)));
        }
        let namespace = self.store.namespace();

        if let Some(remote) = self.store.remote_route() {
            match remote.fetch(namespace, new_date).await {
                Ok(Some(record)) => {
                    self.store.put_local(namespace, &record).await?;
                    info!(
                        "event=day_init module=init source=remote namespace={} date={}",
                        namespace, new_date
                    );
                    return Ok(record);
                }
                Ok(None) => {}
                Err(e) => warn!(
                    "event=day_init module=init status=remote_unavailable namespace={} date={} error=\"{}\"",
                    namespace, new_date, e
                ),
            }
        }

        let local = self.store.local();
        if let Some(record) = local.get(namespace, new_date).await? {
            return Ok(record);
        }

        let previous = match previous_date {
            Some(prev) => local.get(namespace, prev).await?,
            None => None,
        };

        let record = match &previous {
            Some(prev) => carry_over(new_date, prev, self.store.bed_ids()),
            None => DailyRecord::blank(new_date, self.store.bed_ids()),
        };
        if !local.put_if_absent(namespace, &record).await? {
            if let Some(existing) = local.get(namespace, new_date).await? {
                info!(
                    "event=day_init module=init source=local_race namespace={} date={}",
                    namespace, new_date
                );
                return Ok(existing);
            }
            self.store.put_local(namespace, &record).await?;
        }

        info!(
            "event=day_init module=init source={} namespace={} date={}",
            if previous.is_some() { "carry_over" } else { "blank" },
            namespace,
            new_date
        );
        Ok(record)
    }
}

/// Build the record for `new_date` from the previous day's record.
///
/// Beds that are occupied (by the patient or a sub-occupant) or blocked keep
/// every clinical field; their day and night handoff notes both start from
/// the previous night note. Event logs, checklists and signatures start
/// empty. Beds no longer configured are dropped.
pub fn carry_over<S: AsRef<str>>(new_date: &str, previous: &DailyRecord, bed_ids: &[S]) -> DailyRecord {
    let mut record = DailyRecord::blank(new_date, bed_ids);

    record.nurses_day_shift = fixed(&previous.nurses_night_shift, NURSE_SLOTS);
    record.technicians_day_shift = fixed(&previous.technicians_night_shift, TECHNICIAN_SLOTS);

    for (bed_id, slot) in record.beds.iter_mut() {
        let Some(prev) = previous.beds.get(bed_id) else {
            continue;
        };
        let crib_occupied = prev
            .clinical_crib
            .as_deref()
            .is_some_and(PatientSlot::is_occupied);
        if !(prev.is_occupied() || crib_occupied || prev.is_blocked) {
            continue;
        }

        let mut carried = prev.clone();
        carry_notes(&mut carried);
        if let Some(crib) = carried.clinical_crib.as_deref_mut() {
            carry_notes(crib);
        }
        *slot = carried;
    }

    record
}

fn carry_notes(slot: &mut PatientSlot) {
    slot.handoff_note_day_shift = slot.handoff_note_night_shift.clone();
}

fn fixed(roster: &[String], len: usize) -> Vec<String> {
    let mut out: Vec<String> = roster.iter().take(len).cloned().collect();
    out.resize(len, String::new());
    out
}
