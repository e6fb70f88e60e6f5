mod availability;
mod blocked;
mod error;
mod guard;
mod ledger;
mod slots;

pub use blocked::NewBlockedPeriod;
pub use error::EngineError;
pub use guard::ReserveRequest;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;
use uuid::Uuid;

use crate::collab::{Catalog, Directory, ProviderSettings};
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedCalendar = Arc<RwLock<CalendarState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit:
/// block until the first append arrives, drain everything immediately
/// available, write the whole batch with a single fsync, then answer all
/// waiting senders at once.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let first = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };

        let mut batch = vec![first];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    // Flush the batch first so the deferred command sees it.
                    deferred = Some(other);
                    break;
                }
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
            .record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());

        for (_, tx) in batch {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = tx.send(r);
        }
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// One provider's scheduling engine: weekly templates, blocked periods,
/// and booking calendars, all restored from that provider's WAL.
pub struct Engine {
    pub provider_id: Ulid,
    /// One lock per (location, member) calendar; reservations for a key
    /// serialize through it.
    pub(super) calendars: DashMap<CalendarKey, SharedCalendar>,
    pub(super) templates: DashMap<TemplateKey, AvailabilityRecord>,
    pub(super) blocked: DashMap<Ulid, BlockedPeriod>,
    /// Reverse lookup: booking id → calendar.
    pub(super) booking_index: DashMap<Ulid, CalendarKey>,
    /// Cancel token → booking id, for anonymous cancellation.
    pub(super) token_index: DashMap<Uuid, Ulid>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) catalog: Arc<dyn Catalog>,
    pub(super) directory: Arc<dyn Directory>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("provider_id", &self.provider_id)
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn new(
        provider_id: Ulid,
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        catalog: Arc<dyn Catalog>,
        directory: Arc<dyn Directory>,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            provider_id,
            calendars: DashMap::new(),
            templates: DashMap::new(),
            blocked: DashMap::new(),
            booking_index: DashMap::new(),
            token_index: DashMap::new(),
            wal_tx,
            notify,
            catalog,
            directory,
        };

        // Replay — we're the sole owner of the calendar Arcs here, so
        // try_write always succeeds instantly. Never block: this may run
        // inside an async context (lazy provider creation).
        for event in &events {
            match event {
                Event::BookingCreated { booking } => {
                    let cal = engine.calendar_or_create(booking.calendar_key());
                    let mut guard = cal.try_write().expect("replay: uncontended write");
                    engine.apply_booking_event(&mut guard, event);
                }
                Event::BookingRescheduled { id, .. } | Event::BookingStatusChanged { id, .. } => {
                    let Some(key) = engine.booking_index.get(id).map(|e| *e.value()) else {
                        continue; // modified-before-created can only mean a corrupt log
                    };
                    let cal = engine.calendar_or_create(key);
                    let mut guard = cal.try_write().expect("replay: uncontended write");
                    engine.apply_booking_event(&mut guard, event);
                }
                other => engine.apply_store_event(other),
            }
        }

        Ok(engine)
    }

    /// Write an event to the WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    pub(super) fn calendar(&self, key: CalendarKey) -> Option<SharedCalendar> {
        self.calendars.get(&key).map(|e| e.value().clone())
    }

    pub(super) fn calendar_or_create(&self, key: CalendarKey) -> SharedCalendar {
        self.calendars
            .entry(key)
            .or_insert_with(|| Arc::new(RwLock::new(CalendarState::new(key))))
            .value()
            .clone()
    }

    /// Apply a template/blocked-period event to the read-mostly stores.
    pub(super) fn apply_store_event(&self, event: &Event) {
        match event {
            Event::AvailabilitySet { record } => {
                self.templates.insert(record.key(), record.clone());
            }
            Event::AvailabilityWeekSet { records } => {
                for record in records {
                    self.templates.insert(record.key(), record.clone());
                }
            }
            Event::BlockedPeriodCreated { period } => {
                self.blocked.insert(period.id, period.clone());
            }
            Event::BlockedPeriodDeleted { id } => {
                self.blocked.remove(id);
            }
            _ => {}
        }
    }

    /// Apply a booking event to a calendar (no locking — caller holds the lock).
    pub(super) fn apply_booking_event(&self, cal: &mut CalendarState, event: &Event) {
        match event {
            Event::BookingCreated { booking } => {
                self.booking_index.insert(booking.id, booking.calendar_key());
                self.token_index.insert(booking.cancel_token, booking.id);
                cal.insert(booking.clone());
            }
            Event::BookingRescheduled { id, starts_at, ends_at } => {
                cal.set_times(*id, *starts_at, *ends_at);
            }
            Event::BookingStatusChanged { id, status, at, by, reason } => {
                cal.set_status(*id, *status, *at, *by, reason.clone());
            }
            _ => {}
        }
    }

    /// WAL-append + apply + notify in one call, for booking events
    /// committed under a held calendar lock.
    pub(super) async fn persist_and_apply(
        &self,
        cal: &mut CalendarState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.apply_booking_event(cal, event);
        self.notify.send(cal.key.location_id, event);
        Ok(())
    }

    /// WAL-append + apply + notify for template/blocked-period events.
    pub(super) async fn persist_store_event(
        &self,
        location_id: Option<Ulid>,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.apply_store_event(event);
        if let Some(location_id) = location_id {
            self.notify.send(location_id, event);
        }
        Ok(())
    }

    /// Today's date on the provider's wall clock.
    pub async fn today(&self) -> Result<chrono::NaiveDate, EngineError> {
        let settings = self.settings().await?;
        Ok(local_now(settings.timezone).date())
    }

    pub fn has_booking(&self, id: Ulid) -> bool {
        self.booking_index.contains_key(&id)
    }

    pub fn has_token(&self, token: Uuid) -> bool {
        self.token_index.contains_key(&token)
    }

    /// The provider's settings, fetched from the directory collaborator.
    pub(super) async fn settings(&self) -> Result<ProviderSettings, EngineError> {
        self.directory
            .settings(self.provider_id)
            .await
            .ok_or(EngineError::NotFound("provider"))
    }

    /// Compact the WAL down to the events needed to recreate current state.
    /// Bookings are kept whole — terminal statuses included — so the audit
    /// trail survives compaction.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events: Vec<Event> = Vec::new();

        for entry in self.templates.iter() {
            events.push(Event::AvailabilitySet {
                record: entry.value().clone(),
            });
        }
        for entry in self.blocked.iter() {
            events.push(Event::BlockedPeriodCreated {
                period: entry.value().clone(),
            });
        }
        let calendars: Vec<SharedCalendar> =
            self.calendars.iter().map(|e| e.value().clone()).collect();
        for cal in calendars {
            let guard = cal.read().await;
            for booking in &guard.bookings {
                events.push(Event::BookingCreated {
                    booking: booking.clone(),
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
