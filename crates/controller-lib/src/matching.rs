//! Resource matching primitives shared by the scaling controllers

use crate::models::Pod;
use std::collections::HashMap;

/// Decide whether an object with `labels` is selected by `selector`.
///
/// Every selector key must be present with an equal value. An empty
/// selector matches everything.
pub fn matches(labels: &HashMap<String, String>, selector: &HashMap<String, String>) -> bool {
    selector
        .iter()
        .all(|(key, value)| labels.get(key) == Some(value))
}

/// Pods selected by `selector`, in snapshot order
pub fn select_pods<'a>(pods: &'a [Pod], selector: &HashMap<String, String>) -> Vec<&'a Pod> {
    pods.iter()
        .filter(|pod| matches(pod.labels(), selector))
        .collect()
}

/// Corrective action needed to bring an observed replica count to the
/// desired one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaDiff {
    Create(usize),
    Delete(usize),
    Steady,
}

impl ReplicaDiff {
    pub fn compute(observed: usize, desired: i32) -> Self {
        let desired = desired.max(0) as usize;

        if observed < desired {
            ReplicaDiff::Create(desired - observed)
        } else if observed > desired {
            ReplicaDiff::Delete(observed - desired)
        } else {
            ReplicaDiff::Steady
        }
    }
}
