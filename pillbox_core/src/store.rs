//! Concurrent in-memory repository.
//!
//! Each entity kind (users, prescriptions, regimens with their doses) lives in
//! its own table behind its own reader/writer lock, with its own monotonically
//! increasing id counter. Within a kind, writes are serialized and reads run
//! concurrently. Prescribing writes two kinds at once and always locks
//! prescriptions before regimens.
//!
//! Backends implement [`Store`]; [`MemoryStore`] is the reference backend.

use crate::engine::Occurrence;
use crate::error::Entity;
use crate::{
    Dose, DoseId, Error, NewPrescription, Medication, Prescription, PrescriptionId, Regimen,
    RegimenId, Result, User, UserId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Storage operations the service layer depends on
pub trait Store: Send + Sync {
    /// Register a user, assigning the next user id
    fn put_user(&self, name: &str) -> Result<User>;

    fn get_user(&self, id: UserId) -> Result<User>;

    fn list_users(&self) -> Result<Vec<User>>;

    /// Persist prescription, medication, regimen and every dose as one unit
    ///
    /// Either all of it becomes visible or none of it does.
    fn create_prescription(
        &self,
        patient: UserId,
        rx: &NewPrescription,
        schedule_start: Option<DateTime<Utc>>,
        occurrences: &[Occurrence],
    ) -> Result<(Prescription, Regimen)>;

    fn get_prescription(&self, id: PrescriptionId) -> Result<Prescription>;

    fn list_prescriptions(&self) -> Result<Vec<Prescription>>;

    fn get_regimen(&self, id: RegimenId) -> Result<Regimen>;

    /// All regimens of a patient, copied out of the store
    fn regimens_for_patient(&self, patient: UserId) -> Result<Vec<Regimen>>;

    /// Set `taken` and `time_taken` on a dose, returning the updated dose
    fn mark_taken(&self, dose: DoseId, taken: bool, at: DateTime<Utc>) -> Result<Dose>;
}

impl<T: Store + ?Sized> Store for &T {
    fn put_user(&self, name: &str) -> Result<User> {
        (**self).put_user(name)
    }

    fn get_user(&self, id: UserId) -> Result<User> {
        (**self).get_user(id)
    }

    fn list_users(&self) -> Result<Vec<User>> {
        (**self).list_users()
    }

    fn create_prescription(
        &self,
        patient: UserId,
        rx: &NewPrescription,
        schedule_start: Option<DateTime<Utc>>,
        occurrences: &[Occurrence],
    ) -> Result<(Prescription, Regimen)> {
        (**self).create_prescription(patient, rx, schedule_start, occurrences)
    }

    fn get_prescription(&self, id: PrescriptionId) -> Result<Prescription> {
        (**self).get_prescription(id)
    }

    fn list_prescriptions(&self) -> Result<Vec<Prescription>> {
        (**self).list_prescriptions()
    }

    fn get_regimen(&self, id: RegimenId) -> Result<Regimen> {
        (**self).get_regimen(id)
    }

    fn regimens_for_patient(&self, patient: UserId) -> Result<Vec<Regimen>> {
        (**self).regimens_for_patient(patient)
    }

    fn mark_taken(&self, dose: DoseId, taken: bool, at: DateTime<Utc>) -> Result<Dose> {
        (**self).mark_taken(dose, taken, at)
    }
}

// ============================================================================
// Tables
// ============================================================================

/// Rows of one entity kind plus the next id to hand out
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Table<T> {
    next_id: u64,
    rows: HashMap<u64, T>,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            next_id: 1,
            rows: HashMap::new(),
        }
    }
}

impl<T> Table<T> {
    /// Reserve `n` sequential ids, returning the first
    fn allocate(&mut self, n: u64) -> u64 {
        let first = self.next_id;
        self.next_id += n;
        first
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn read<'a, T>(lock: &'a RwLock<T>, kind: Entity) -> Result<RwLockReadGuard<'a, T>> {
    lock.read()
        .map_err(|_| Error::Store(format!("{} table lock poisoned", kind)))
}

fn write<'a, T>(lock: &'a RwLock<T>, kind: Entity) -> Result<RwLockWriteGuard<'a, T>> {
    lock.write()
        .map_err(|_| Error::Store(format!("{} table lock poisoned", kind)))
}

/// Serializable image of a [`MemoryStore`], counters included
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub users: Table<User>,
    #[serde(default)]
    pub prescriptions: Table<Prescription>,
    #[serde(default)]
    pub regimens: Table<Regimen>,
}

// ============================================================================
// Memory Store
// ============================================================================

/// Mutex-guarded in-memory backend
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: RwLock<Table<User>>,
    prescriptions: RwLock<Table<Prescription>>,
    regimens: RwLock<Table<Regimen>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            users: RwLock::new(snapshot.users),
            prescriptions: RwLock::new(snapshot.prescriptions),
            regimens: RwLock::new(snapshot.regimens),
        }
    }

    /// Copy every table out of the store
    ///
    /// All three tables are read-locked together, in the order writers take
    /// them, so the image is consistent across kinds.
    pub fn snapshot(&self) -> Result<StoreSnapshot> {
        let users = read(&self.users, Entity::User)?;
        let prescriptions = read(&self.prescriptions, Entity::Prescription)?;
        let regimens = read(&self.regimens, Entity::Regimen)?;

        Ok(StoreSnapshot {
            users: users.clone(),
            prescriptions: prescriptions.clone(),
            regimens: regimens.clone(),
        })
    }
}

/// Insert a prescription and its medication
///
/// The prescription takes id `c` and the medication `c + 1`.
fn insert_prescription(
    table: &mut Table<Prescription>,
    rx: &NewPrescription,
    schedule_start: Option<DateTime<Utc>>,
) -> Prescription {
    let id = table.allocate(2);

    let prescription = Prescription {
        id,
        medication: Medication {
            id: id + 1,
            name: rx.medication.name.clone(),
            generic: rx.medication.generic,
            brand: rx.medication.brand.clone(),
        },
        schedule: rx.schedule.clone(),
        dose_count: rx.dose_count,
        refill_count: rx.refill_count,
        schedule_start,
    };
    table.rows.insert(id, prescription.clone());

    prescription
}

/// Insert a regimen with all of its doses
///
/// The regimen takes the next id and every dose the ids that follow.
fn insert_regimen(
    table: &mut Table<Regimen>,
    patient: UserId,
    prescription: &Prescription,
    occurrences: &[Occurrence],
) -> Regimen {
    let id = table.allocate(1 + occurrences.len() as u64);

    let doses = occurrences
        .iter()
        .zip(id + 1..)
        .map(|(occ, dose_id)| Dose {
            id: dose_id,
            regimen_id: id,
            refill: occ.refill,
            time: occ.time,
            amount: occ.amount,
            unit: occ.unit.clone(),
            taken: None,
            time_taken: None,
        })
        .collect();

    let regimen = Regimen {
        id,
        medication_id: prescription.medication.id,
        patient_id: patient,
        prescription_id: prescription.id,
        doses,
    };
    table.rows.insert(id, regimen.clone());

    regimen
}

impl Store for MemoryStore {
    fn put_user(&self, name: &str) -> Result<User> {
        let mut table = write(&self.users, Entity::User)?;
        let id = table.allocate(1);

        let user = User {
            id,
            name: name.to_string(),
        };
        table.rows.insert(id, user.clone());

        tracing::debug!("Stored user {}", id);
        Ok(user)
    }

    fn get_user(&self, id: UserId) -> Result<User> {
        read(&self.users, Entity::User)?
            .rows
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found(Entity::User, id))
    }

    fn list_users(&self) -> Result<Vec<User>> {
        let table = read(&self.users, Entity::User)?;
        let mut users: Vec<_> = table.rows.values().cloned().collect();
        users.sort_by_key(|u| u.id);
        Ok(users)
    }

    fn create_prescription(
        &self,
        patient: UserId,
        rx: &NewPrescription,
        schedule_start: Option<DateTime<Utc>>,
        occurrences: &[Occurrence],
    ) -> Result<(Prescription, Regimen)> {
        // Lock order: prescriptions, then regimens. Both are held until every
        // row is in place, so readers never see a prescription without its
        // regimen and a failed lock leaves no trace.
        let mut prescriptions = write(&self.prescriptions, Entity::Prescription)?;
        let mut regimens = write(&self.regimens, Entity::Regimen)?;

        let prescription = insert_prescription(&mut prescriptions, rx, schedule_start);
        let regimen = insert_regimen(&mut regimens, patient, &prescription, occurrences);

        tracing::debug!(
            "Stored prescription {} with regimen {} ({} doses)",
            prescription.id,
            regimen.id,
            regimen.doses.len()
        );
        Ok((prescription, regimen))
    }

    fn get_prescription(&self, id: PrescriptionId) -> Result<Prescription> {
        read(&self.prescriptions, Entity::Prescription)?
            .rows
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found(Entity::Prescription, id))
    }

    fn list_prescriptions(&self) -> Result<Vec<Prescription>> {
        let table = read(&self.prescriptions, Entity::Prescription)?;
        let mut prescriptions: Vec<_> = table.rows.values().cloned().collect();
        prescriptions.sort_by_key(|p| p.id);
        Ok(prescriptions)
    }

    fn get_regimen(&self, id: RegimenId) -> Result<Regimen> {
        read(&self.regimens, Entity::Regimen)?
            .rows
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found(Entity::Regimen, id))
    }

    fn regimens_for_patient(&self, patient: UserId) -> Result<Vec<Regimen>> {
        let table = read(&self.regimens, Entity::Regimen)?;
        let mut regimens: Vec<_> = table
            .rows
            .values()
            .filter(|r| r.patient_id == patient)
            .cloned()
            .collect();
        regimens.sort_by_key(|r| r.id);
        Ok(regimens)
    }

    fn mark_taken(&self, dose: DoseId, taken: bool, at: DateTime<Utc>) -> Result<Dose> {
        let mut table = write(&self.regimens, Entity::Regimen)?;

        // No dose index; scan every regimen
        let found = table
            .rows
            .values_mut()
            .flat_map(|r| r.doses.iter_mut())
            .find(|d| d.id == dose)
            .ok_or_else(|| Error::not_found(Entity::Dose, dose))?;

        found.taken = Some(taken);
        found.time_taken = Some(at);

        Ok(found.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Duration, NewMedication, Schedule, ScheduledDose};
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    fn new_rx() -> NewPrescription {
        NewPrescription {
            medication: NewMedication {
                name: "Lisinopril".into(),
                generic: true,
                brand: "Zestril".into(),
            },
            schedule: Schedule {
                period: Duration::hours(24),
                doses: vec![ScheduledDose {
                    offset_into_period: Duration::ZERO,
                    amount: 10.0,
                    unit: "mg".into(),
                }],
            },
            dose_count: 3,
            refill_count: 0,
            schedule_start: None,
        }
    }

    fn occurrences(n: usize) -> Vec<Occurrence> {
        let start = Utc::now();
        (0..n)
            .map(|i| Occurrence {
                refill: 0,
                time: start + chrono::Duration::days(i as i64),
                amount: 10.0,
                unit: "mg".into(),
            })
            .collect()
    }

    #[test]
    fn test_prescription_takes_two_ids() {
        let store = MemoryStore::new();

        let (first, _) = store
            .create_prescription(1, &new_rx(), None, &occurrences(3))
            .unwrap();
        let (second, _) = store
            .create_prescription(1, &new_rx(), None, &occurrences(3))
            .unwrap();

        assert_eq!((first.id, first.medication.id), (1, 2));
        assert_eq!((second.id, second.medication.id), (3, 4));
    }

    #[test]
    fn test_regimen_and_dose_ids_share_counter() {
        let store = MemoryStore::new();

        let (rx, regimen) = store
            .create_prescription(7, &new_rx(), None, &occurrences(3))
            .unwrap();

        assert_eq!(regimen.id, 1);
        let dose_ids: Vec<_> = regimen.doses.iter().map(|d| d.id).collect();
        assert_eq!(dose_ids, vec![2, 3, 4]);
        assert!(regimen.doses.iter().all(|d| d.regimen_id == regimen.id));
        assert_eq!(regimen.prescription_id, rx.id);
        assert_eq!(regimen.medication_id, rx.medication.id);
        assert_eq!(regimen.patient_id, 7);

        let (_, next) = store
            .create_prescription(7, &new_rx(), None, &occurrences(1))
            .unwrap();
        assert_eq!(next.id, 5);
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let store = MemoryStore::new();

        assert!(store.get_user(1).unwrap_err().is_not_found());
        assert!(store.get_prescription(1).unwrap_err().is_not_found());
        assert!(store.get_regimen(1).unwrap_err().is_not_found());
    }

    #[test]
    fn test_regimens_for_patient_filters() {
        let store = MemoryStore::new();
        store.create_prescription(1, &new_rx(), None, &occurrences(2)).unwrap();
        store.create_prescription(2, &new_rx(), None, &occurrences(2)).unwrap();
        store.create_prescription(1, &new_rx(), None, &occurrences(2)).unwrap();

        let regimens = store.regimens_for_patient(1).unwrap();
        assert_eq!(regimens.len(), 2);
        assert!(regimens.iter().all(|r| r.patient_id == 1));
        assert!(store.regimens_for_patient(99).unwrap().is_empty());
    }

    #[test]
    fn test_mark_taken_updates_dose() {
        let store = MemoryStore::new();
        let (_, regimen) = store
            .create_prescription(1, &new_rx(), None, &occurrences(3))
            .unwrap();
        let target = regimen.doses[1].id;
        let at = Utc::now();

        let dose = store.mark_taken(target, true, at).unwrap();
        assert_eq!(dose.taken, Some(true));
        assert_eq!(dose.time_taken, Some(at));

        let stored = store.get_regimen(regimen.id).unwrap();
        assert_eq!(stored.doses[1].taken, Some(true));
        assert_eq!(stored.doses[0].taken, None);
    }

    #[test]
    fn test_mark_missing_dose_leaves_store_untouched() {
        let store = MemoryStore::new();
        let (_, regimen) = store
            .create_prescription(1, &new_rx(), None, &occurrences(2))
            .unwrap();

        let err = store.mark_taken(9_999, true, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            Error::NotFound {
                entity: Entity::Dose,
                id: 9_999
            }
        ));
        assert_eq!(store.get_regimen(regimen.id).unwrap(), regimen);
    }

    #[test]
    fn test_poisoned_regimen_table_stores_nothing() {
        let store = Arc::new(MemoryStore::new());

        // Poison the regimen table
        let poisoner = Arc::clone(&store);
        let _ = thread::spawn(move || {
            let _guard = poisoner.regimens.write().unwrap();
            panic!("poison regimen table");
        })
        .join();

        let err = store
            .create_prescription(1, &new_rx(), None, &occurrences(2))
            .unwrap_err();
        assert!(matches!(err, Error::Store(_)));
        assert!(store.list_prescriptions().unwrap().is_empty());
        // No ids were handed out either
        assert_eq!(store.prescriptions.read().unwrap().next_id, 1);
    }

    #[test]
    fn test_prescription_never_visible_without_regimen() {
        let store = Arc::new(MemoryStore::new());
        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let writer = {
            let store = Arc::clone(&store);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                for _ in 0..500 {
                    store
                        .create_prescription(1, &new_rx(), None, &occurrences(2))
                        .unwrap();
                }
                done.store(true, std::sync::atomic::Ordering::SeqCst);
            })
        };

        let mut checks = 0;
        while !done.load(std::sync::atomic::Ordering::SeqCst) || checks == 0 {
            // Regimens are never removed, so anything listed here must
            // already have its regimen in place
            let listed = store.list_prescriptions().unwrap();
            let regimens = store.regimens_for_patient(1).unwrap();
            let with_regimen: HashSet<_> = regimens.iter().map(|r| r.prescription_id).collect();
            for rx in &listed {
                assert!(
                    with_regimen.contains(&rx.id),
                    "prescription {} visible without its regimen",
                    rx.id
                );
            }
            checks += 1;
        }

        writer.join().expect("Writer thread panicked");
        assert_eq!(store.list_prescriptions().unwrap().len(), 500);
    }

    #[test]
    fn test_concurrent_user_puts_assign_distinct_gap_free_ids() {
        let store = Arc::new(MemoryStore::new());
        const THREADS: usize = 16;
        const PER_THREAD: usize = 50;

        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    (0..PER_THREAD)
                        .map(|i| store.put_user(&format!("user-{}-{}", t, i)).unwrap().id)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ids: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("Thread panicked"))
            .collect();
        ids.sort_unstable();

        let expected: Vec<u64> = (1..=(THREADS * PER_THREAD) as u64).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_concurrent_prescriptions_never_share_ids() {
        let store = Arc::new(MemoryStore::new());
        const THREADS: u64 = 8;
        const PER_THREAD: usize = 25;

        let handles: Vec<_> = (0..THREADS)
            .map(|patient| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let mut created = Vec::new();
                    for _ in 0..PER_THREAD {
                        created.push(
                            store
                                .create_prescription(patient, &new_rx(), None, &occurrences(4))
                                .unwrap(),
                        );
                    }
                    created
                })
            })
            .collect();

        let created: Vec<_> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("Thread panicked"))
            .collect();

        let mut rx_ids = HashSet::new();
        let mut med_ids = HashSet::new();
        let mut dose_ids = HashSet::new();
        for (rx, regimen) in &created {
            assert!(rx_ids.insert(rx.id));
            assert!(med_ids.insert(rx.medication.id));
            assert_eq!(rx.medication.id, rx.id + 1);
            assert_eq!(regimen.doses.len(), 4);
            for dose in &regimen.doses {
                assert!(dose_ids.insert(dose.id));
            }
        }

        let total = THREADS as usize * PER_THREAD;
        assert_eq!(store.list_prescriptions().unwrap().len(), total);
        for patient in 0..THREADS {
            assert_eq!(store.regimens_for_patient(patient).unwrap().len(), PER_THREAD);
        }
    }

    #[test]
    fn test_snapshot_preserves_counters() {
        let store = MemoryStore::new();
        store.put_user("Ada").unwrap();
        store.create_prescription(1, &new_rx(), None, &occurrences(2)).unwrap();

        let json = serde_json::to_string(&store.snapshot().unwrap()).unwrap();
        let restored = MemoryStore::from_snapshot(serde_json::from_str(&json).unwrap());

        assert_eq!(restored.get_user(1).unwrap().name, "Ada");
        assert_eq!(restored.put_user("Grace").unwrap().id, 2);
        let (rx, regimen) = restored
            .create_prescription(1, &new_rx(), None, &occurrences(1))
            .unwrap();
        assert_eq!(rx.id, 3);
        assert_eq!(regimen.id, 4);
    }
}
