//! Per-person identity records keyed by the key of the person's first detection.
//!
//! The store is append-only for the process lifetime: there is no eviction, and
//! numeric ids come from a counter that is never rewound.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    id: u64,
    name: Option<String>,
    age: Option<u32>,
    sample_count: u32,
}

impl Registration {
    fn new(id: u64) -> Self { Self { id, name: None, age: None, sample_count: 0 } }

    pub fn id(&self) -> u64 { self.id }
    pub fn name(&self) -> Option<&str> { self.name.as_deref() }
    pub fn age(&self) -> Option<u32> { self.age }
    pub fn sample_count(&self) -> u32 { self.sample_count }

    /// Folds one age observation into the running mean.
    ///
    /// The mean is recomputed from the previous (already rounded) mean on every call and
    /// rounded half-to-even, so rounding drift accumulates across observations.
    /// Do not replace with an exact sum.
    pub fn add_age(&mut self, observed: u32) {
        let next = match self.age {
            Some(current) if self.sample_count > 0 => {
                let n = f64::from(self.sample_count);
                ((f64::from(observed) + f64::from(current) * n) / (n + 1.0)).round_ties_even() as u32
            }
            _ => observed,
        };
        self.age = Some(next);
        self.sample_count += 1;
    }

    /// Last write wins.
    pub fn add_name(&mut self, name: impl Into<String>) { self.name = Some(name.into()); }

    /// Operator-supplied name, else the synthesized `ID: <id>` tag.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(n) => n.clone(),
            None => format!("ID: {}", self.id),
        }
    }
}

#[derive(Debug, Default)]
pub struct RegistrationStore {
    entries: HashMap<String, Registration>,
    last_id: u64,
}

impl RegistrationStore {
    pub fn new() -> Self { Self::default() }

    /// Returns the registration for `person_key`, creating it with the next id when absent.
    /// The flag reports whether this call created it.
    pub fn get_or_create(&mut self, person_key: &str) -> (&mut Registration, bool) {
        match self.entries.entry(person_key.to_string()) {
            Entry::Occupied(e) => (e.into_mut(), false),
            Entry::Vacant(e) => {
                self.last_id += 1;
                (e.insert(Registration::new(self.last_id)), true)
            }
        }
    }

    pub fn lookup(&self, person_key: &str) -> Option<&Registration> { self.entries.get(person_key) }

    pub fn lookup_mut(&mut self, person_key: &str) -> Option<&mut Registration> { self.entries.get_mut(person_key) }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
}
