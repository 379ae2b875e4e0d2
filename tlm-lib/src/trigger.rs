//! Trigger positions and the registries that map them to targets.
//!
//! A [Trigger] names a position in a namespace: either a minor frame position
//! `(minor_frame_idx, offset)` or a position within a sub-commutated logical frame. Trackers
//! resolve a trigger for every byte they place and invoke whatever [Target]s are registered.
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

/// Key of the minor-frame namespace.
pub const MINOR_FRAME_KEY: &str = "MIF";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Namespace {
    MinorFrame,
    Subcom(String),
}

impl Namespace {
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Namespace::MinorFrame => MINOR_FRAME_KEY,
            Namespace::Subcom(key) => key,
        }
    }
}

impl Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// A position key in a namespace.
///
/// Minor-frame triggers carry `[minor_frame_idx, offset]`, or just `[offset]` for the wildcard
/// form matching that offset in every minor frame. Sub-commutation triggers carry the single
/// byte index within the logical frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Trigger {
    pub namespace: Namespace,
    pub indices: Vec<usize>,
}

impl Trigger {
    pub fn new(namespace: Namespace, indices: Vec<usize>) -> Self {
        Trigger { namespace, indices }
    }

    #[must_use]
    pub fn minor_frame(minor_frame_idx: usize, offset: usize) -> Self {
        Trigger::new(Namespace::MinorFrame, vec![minor_frame_idx, offset])
    }

    /// Matches `offset` in every minor frame.
    #[must_use]
    pub fn every_minor_frame(offset: usize) -> Self {
        Trigger::new(Namespace::MinorFrame, vec![offset])
    }

    #[must_use]
    pub fn subcom(group: &str, index: usize) -> Self {
        Trigger::new(Namespace::Subcom(group.to_string()), vec![index])
    }

    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.namespace == Namespace::MinorFrame && self.indices.len() == 1
    }

    /// The wildcard form of an exact minor-frame trigger, i.e., its offset alone.
    #[must_use]
    pub fn wildcard(&self) -> Option<Trigger> {
        match (&self.namespace, self.indices.as_slice()) {
            (Namespace::MinorFrame, [_, offset]) => Some(Trigger::every_minor_frame(*offset)),
            _ => None,
        }
    }

    /// The last index, i.e., the byte offset within the namespace's frame.
    #[must_use]
    pub fn offset(&self) -> Option<usize> {
        self.indices.last().copied()
    }
}

impl Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let indices: Vec<String> = self.indices.iter().map(ToString::to_string).collect();
        write!(f, "{}:{}", self.namespace, indices.join(","))
    }
}

pub type ConsumerId = u64;

/// Something invoked when a trigger fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Target {
    /// Index of an element in the catalog.
    Element(usize),
    /// Index of a sub-commutation tracker.
    Subcom(usize),
    Consumer(ConsumerId),
}

/// Insertion-ordered multimap from trigger to targets.
#[derive(Debug, Clone)]
pub struct TriggerRegistry<T> {
    targets: HashMap<Trigger, Vec<T>>,
}

impl<T> Default for TriggerRegistry<T> {
    fn default() -> Self {
        TriggerRegistry {
            targets: HashMap::default(),
        }
    }
}

impl<T: PartialEq + Clone> TriggerRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `target` for `trigger`. Returns false if it was already registered.
    pub fn register(&mut self, trigger: Trigger, target: T) -> bool {
        let targets = self.targets.entry(trigger).or_default();
        if targets.contains(&target) {
            return false;
        }
        targets.push(target);
        true
    }

    /// Remove `target` from `trigger`, pruning the trigger once no targets remain. Returns
    /// false if it was not registered.
    pub fn unregister(&mut self, trigger: &Trigger, target: &T) -> bool {
        let Some(targets) = self.targets.get_mut(trigger) else {
            return false;
        };
        let Some(pos) = targets.iter().position(|t| t == target) else {
            return false;
        };
        targets.remove(pos);
        if targets.is_empty() {
            self.targets.remove(trigger);
        }
        true
    }

    /// Targets registered for exactly `trigger`, in registration order.
    #[must_use]
    pub fn get(&self, trigger: &Trigger) -> Option<&[T]> {
        self.targets.get(trigger).map(Vec::as_slice)
    }

    /// Targets to invoke for `trigger`.
    ///
    /// For minor-frame triggers this is the exact match followed by the wildcard match for the
    /// same offset, without repeating a target registered under both. Other namespaces match
    /// exactly.
    #[must_use]
    pub fn resolve(&self, trigger: &Trigger) -> Vec<T> {
        let mut resolved: Vec<T> = self.get(trigger).map(<[T]>::to_vec).unwrap_or_default();
        if let Some(wildcard) = trigger.wildcard() {
            for target in self.get(&wildcard).unwrap_or_default() {
                if !resolved.contains(target) {
                    resolved.push(target.clone());
                }
            }
        }
        resolved
    }

    pub fn triggers(&self) -> impl Iterator<Item = &Trigger> {
        self.targets.keys()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Lock a shared registry, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_is_idempotent() {
        let mut reg = TriggerRegistry::new();
        let trigger = Trigger::subcom("DS", 4);

        assert!(reg.register(trigger.clone(), Target::Element(1)));
        assert!(!reg.register(trigger.clone(), Target::Element(1)));
        assert_eq!(reg.get(&trigger), Some(&[Target::Element(1)][..]));
    }

    #[test]
    fn unregister_prunes_empty_triggers() {
        let mut reg = TriggerRegistry::new();
        let trigger = Trigger::subcom("DS", 4);
        reg.register(trigger.clone(), Target::Element(1));

        assert!(!reg.unregister(&trigger, &Target::Element(2)));
        assert!(reg.unregister(&trigger, &Target::Element(1)));
        assert!(!reg.unregister(&trigger, &Target::Element(1)));
        assert!(reg.is_empty(), "trigger with no targets should be pruned");
    }

    #[test]
    fn resolve_keeps_registration_order() {
        let mut reg = TriggerRegistry::new();
        let trigger = Trigger::subcom("AS1", 7);
        for target in [Target::Element(3), Target::Consumer(1), Target::Element(0)] {
            reg.register(trigger.clone(), target);
        }
        assert_eq!(
            reg.resolve(&trigger),
            vec![Target::Element(3), Target::Consumer(1), Target::Element(0)]
        );
    }

    #[test]
    fn minor_frame_resolve_merges_wildcard() {
        let mut reg = TriggerRegistry::new();
        reg.register(Trigger::minor_frame(3, 60), Target::Element(1));
        reg.register(Trigger::every_minor_frame(60), Target::Element(2));

        assert_eq!(
            reg.resolve(&Trigger::minor_frame(3, 60)),
            vec![Target::Element(1), Target::Element(2)]
        );
        assert_eq!(
            reg.resolve(&Trigger::minor_frame(4, 60)),
            vec![Target::Element(2)]
        );
        assert!(reg.resolve(&Trigger::minor_frame(4, 61)).is_empty());
    }

    #[test]
    fn target_under_exact_and_wildcard_resolves_once() {
        let mut reg = TriggerRegistry::new();
        reg.register(Trigger::minor_frame(3, 60), Target::Consumer(7));
        reg.register(Trigger::every_minor_frame(60), Target::Element(2));
        reg.register(Trigger::every_minor_frame(60), Target::Consumer(7));

        assert_eq!(
            reg.resolve(&Trigger::minor_frame(3, 60)),
            vec![Target::Consumer(7), Target::Element(2)]
        );
    }

    #[test]
    fn subcom_resolve_has_no_wildcard() {
        let mut reg = TriggerRegistry::new();
        reg.register(Trigger::subcom("DS", 1), Target::Element(1));
        assert!(reg.resolve(&Trigger::subcom("DS", 2)).is_empty());
        assert!(Trigger::subcom("DS", 1).wildcard().is_none());
    }

    #[test]
    fn unregistering_one_consumer_keeps_the_other() {
        let mut reg = TriggerRegistry::new();
        let trigger = Trigger::every_minor_frame(60);
        reg.register(trigger.clone(), Target::Consumer(1));
        reg.register(trigger.clone(), Target::Consumer(2));

        reg.unregister(&trigger, &Target::Consumer(1));

        assert_eq!(
            reg.resolve(&Trigger::minor_frame(0, 60)),
            vec![Target::Consumer(2)]
        );
    }

    #[test]
    fn display() {
        assert_eq!(Trigger::minor_frame(3, 60).to_string(), "MIF:3,60");
        assert_eq!(Trigger::subcom("AS2", 7).to_string(), "AS2:7");
    }
}
