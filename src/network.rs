//! Shared model registry: units, synapses and their link indices.
//!
//! A `Network` is cheap to clone and safe to share between threads. Every
//! collection sits behind its own `RwLock`; documents take short read locks
//! to snapshot the units they touch, while structural changes take the
//! writer lock only around the mutation itself.
//!
//! ## Lock order
//!
//! When more than one lock is needed they are taken in the order
//! `units → synapses → inputs → outputs` and released before returning.

use hashbrown::HashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::model::*;
use crate::{Error, Result};

// ============================================================================
// Network
// ============================================================================

#[derive(Clone)]
pub struct Network {
    inner: Arc<NetworkInner>,
}

struct NetworkInner {
    units: RwLock<HashMap<UnitId, Unit>>,
    synapses: RwLock<HashMap<SynapseId, Synapse>>,
    /// unit → incoming synapse ids
    inputs: RwLock<HashMap<UnitId, Vec<SynapseId>>>,
    /// unit → outgoing synapse ids
    outputs: RwLock<HashMap<UnitId, Vec<SynapseId>>>,
    next_unit_id: AtomicU32,
    next_synapse_id: AtomicU32,
    next_document_id: AtomicU64,
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("units", &self.unit_count())
            .field("synapses", &self.synapse_count())
            .finish()
    }
}

impl Network {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(NetworkInner {
                units: RwLock::new(HashMap::new()),
                synapses: RwLock::new(HashMap::new()),
                inputs: RwLock::new(HashMap::new()),
                outputs: RwLock::new(HashMap::new()),
                next_unit_id: AtomicU32::new(0),
                next_synapse_id: AtomicU32::new(0),
                next_document_id: AtomicU64::new(0),
            }),
        }
    }

    pub(crate) fn next_document_id(&self) -> u64 {
        self.inner.next_document_id.fetch_add(1, Ordering::Relaxed)
    }

    // ========================================================================
    // Units
    // ========================================================================

    pub fn add_unit(&self, spec: UnitSpec) -> UnitId {
        let id = UnitId(self.inner.next_unit_id.fetch_add(1, Ordering::Relaxed));
        let unit = Unit {
            id,
            label: spec.label,
            kind: spec.kind,
            bias: spec.bias,
            transfer: spec.transfer,
        };
        self.inner.units.write().insert(id, unit);
        id
    }

    pub fn unit(&self, id: UnitId) -> Option<Unit> {
        self.inner.units.read().get(&id).cloned()
    }

    pub fn find_unit(&self, label: &str) -> Option<UnitId> {
        let units = self.inner.units.read();
        units
            .values()
            .filter(|u| u.label == label)
            .map(|u| u.id)
            .min()
    }

    pub fn set_bias(&self, id: UnitId, bias: f64) -> Result<()> {
        let mut units = self.inner.units.write();
        let unit = units
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("unit {id}")))?;
        unit.bias = bias;
        Ok(())
    }

    pub fn unit_count(&self) -> usize {
        self.inner.units.read().len()
    }

    // ========================================================================
    // Synapses
    // ========================================================================

    /// Adds a synapse feeding `output` from `spec.input`.
    ///
    /// The slot check and the insertion happen under the same writer locks,
    /// so concurrent callers can never bind one slot twice.
    pub fn connect(&self, output: UnitId, spec: SynapseSpec) -> Result<SynapseId> {
        if !spec.weight.is_finite() {
            return Err(Error::InvalidInput(format!("synapse weight {} is not finite", spec.weight)));
        }
        let units = self.inner.units.read();
        for id in [spec.input, output] {
            if !units.contains_key(&id) {
                return Err(Error::NotFound(format!("unit {id}")));
            }
        }

        let mut synapses = self.inner.synapses.write();
        let mut inputs = self.inner.inputs.write();
        let mut outputs = self.inner.outputs.write();
        if let Some(slot) = spec.slot {
            let taken = inputs
                .get(&output)
                .is_some_and(|ids| ids.iter().any(|id| synapses.get(id).is_some_and(|s| s.slot == Some(slot))));
            if taken {
                return Err(Error::InvalidInput(format!("slot {slot} of unit {output} is already bound")));
            }
        }

        let id = SynapseId(self.inner.next_synapse_id.fetch_add(1, Ordering::Relaxed));
        let input = spec.input;
        synapses.insert(
            id,
            Synapse {
                id,
                input,
                output,
                weight: spec.weight,
                recurrent: spec.recurrent,
                slot: spec.slot,
                range_match: spec.range_match,
                range_output: spec.range_output,
                relations: spec.relations,
                distance: spec.distance,
                inactive: spec.inactive,
            },
        );
        inputs.entry(output).or_default().push(id);
        outputs.entry(input).or_default().push(id);
        tracing::debug!(synapse = id.0, input = input.0, output = output.0, "synapse connected");
        Ok(id)
    }

    pub fn disconnect(&self, id: SynapseId) -> Result<Synapse> {
        let mut synapses = self.inner.synapses.write();
        let mut inputs = self.inner.inputs.write();
        let mut outputs = self.inner.outputs.write();
        let synapse = synapses
            .remove(&id)
            .ok_or_else(|| Error::NotFound(format!("synapse {id}")))?;
        if let Some(list) = inputs.get_mut(&synapse.output) {
            list.retain(|s| *s != id);
        }
        if let Some(list) = outputs.get_mut(&synapse.input) {
            list.retain(|s| *s != id);
        }
        tracing::debug!(synapse = id.0, "synapse disconnected");
        Ok(synapse)
    }

    pub fn set_weight(&self, id: SynapseId, weight: f64) -> Result<()> {
        if !weight.is_finite() {
            return Err(Error::InvalidInput(format!("synapse weight {weight} is not finite")));
        }
        let mut synapses = self.inner.synapses.write();
        let synapse = synapses
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("synapse {id}")))?;
        synapse.weight = weight;
        Ok(())
    }

    pub fn synapse(&self, id: SynapseId) -> Option<Synapse> {
        self.inner.synapses.read().get(&id).cloned()
    }

    pub fn synapse_count(&self) -> usize {
        self.inner.synapses.read().len()
    }

    /// Incoming synapses of `unit`, ordered by id.
    pub fn input_synapses(&self, unit: UnitId) -> Vec<Synapse> {
        let synapses = self.inner.synapses.read();
        let inputs = self.inner.inputs.read();
        resolve(&synapses, inputs.get(&unit))
    }

    /// Outgoing synapses of `unit`, ordered by id.
    pub fn output_synapses(&self, unit: UnitId) -> Vec<Synapse> {
        let synapses = self.inner.synapses.read();
        let outputs = self.inner.outputs.read();
        resolve(&synapses, outputs.get(&unit))
    }

    /// Consistent read-only copy of everything a document needs about `unit`.
    ///
    /// All four read locks are held together, so a concurrent `connect` or
    /// `disconnect` is seen either completely or not at all.
    pub fn snapshot(&self, unit: UnitId) -> Result<UnitSnapshot> {
        let units = self.inner.units.read();
        let synapses = self.inner.synapses.read();
        let inputs = self.inner.inputs.read();
        let outputs = self.inner.outputs.read();
        let unit = units
            .get(&unit)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("unit {unit}")))?;
        let incoming = resolve(&synapses, inputs.get(&unit.id));
        let outgoing = resolve(&synapses, outputs.get(&unit.id));
        Ok(UnitSnapshot::new(unit, incoming, outgoing))
    }
}

fn resolve(synapses: &HashMap<SynapseId, Synapse>, ids: Option<&Vec<SynapseId>>) -> Vec<Synapse> {
    let mut resolved: Vec<Synapse> = ids
        .into_iter()
        .flatten()
        .filter_map(|id| synapses.get(id).cloned())
        .collect();
    resolved.sort_by_key(|s| s.id);
    resolved
}

// ============================================================================
// UnitSnapshot
// ============================================================================

/// Document-local view of a unit and its synapses, taken once per document
/// so that concurrent model edits never change a running search.
#[derive(Debug, Clone)]
pub struct UnitSnapshot {
    pub unit: Unit,
    pub inputs: Vec<Synapse>,
    pub outputs: Vec<Synapse>,
    /// Sum of active negative recurrent input weights (`<= 0`).
    pub neg_rec_sum: f64,
    /// Sum of active positive recurrent input weights.
    pub pos_rec_sum: f64,
    /// Some active input synapse carries a join slot.
    pub conjunctive: bool,
    /// Some active input synapse is negative and recurrent.
    pub competing: bool,
}

impl UnitSnapshot {
    fn new(unit: Unit, inputs: Vec<Synapse>, outputs: Vec<Synapse>) -> Self {
        let active = || inputs.iter().filter(|s| !s.inactive);
        let neg_rec_sum = active()
            .filter(|s| s.recurrent && s.is_negative())
            .map(|s| s.weight)
            .sum();
        let pos_rec_sum = active()
            .filter(|s| s.recurrent && !s.is_negative())
            .map(|s| s.weight)
            .sum();
        let conjunctive = active().any(|s| s.slot.is_some());
        let competing = active().any(|s| s.recurrent && s.is_negative());
        Self { unit, inputs, outputs, neg_rec_sum, pos_rec_sum, conjunctive, competing }
    }

    pub fn id(&self) -> UnitId {
        self.unit.id
    }

    /// Whether input synapse `syn` creates and identifies this unit's
    /// activations instead of being linked by range.
    pub fn is_structural(&self, syn: &Synapse) -> bool {
        !syn.recurrent
            && !syn.is_negative()
            && !syn.inactive
            && (syn.slot.is_some() || !self.conjunctive)
    }

    /// Structural input synapses carrying join slots, ordered by slot.
    pub fn slots(&self) -> Vec<&Synapse> {
        let mut slots: Vec<&Synapse> = self
            .inputs
            .iter()
            .filter(|s| s.slot.is_some() && self.is_structural(s))
            .collect();
        slots.sort_by_key(|s| s.slot);
        slots
    }

    pub fn input(&self, id: SynapseId) -> Option<&Synapse> {
        self.inputs.iter().find(|s| s.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn competing_pair() -> (Network, UnitId, UnitId, UnitId) {
        let net = Network::new();
        let word = net.add_unit(UnitSpec::input("W"));
        let a = net.add_unit(UnitSpec::excitatory("A").with_bias(-1.0));
        let inhib = net.add_unit(UnitSpec::inhibitory("N"));
        net.connect(a, SynapseSpec::new(word, 5.0)).unwrap();
        net.connect(inhib, SynapseSpec::new(a, 1.0)).unwrap();
        net.connect(a, SynapseSpec::new(inhib, -10.0).recurrent()).unwrap();
        (net, word, a, inhib)
    }

    #[test]
    fn test_add_and_lookup_units() {
        let (net, word, a, _) = competing_pair();
        assert_eq!(net.unit_count(), 3);
        assert_eq!(net.synapse_count(), 3);
        assert_eq!(net.find_unit("A"), Some(a));
        assert_eq!(net.unit(word).unwrap().kind, UnitKind::Input);
        assert!(net.find_unit("missing").is_none());
    }

    #[test]
    fn test_snapshot_sums_and_flags() {
        let (net, _, a, inhib) = competing_pair();
        let snap = net.snapshot(a).unwrap();
        assert_eq!(snap.neg_rec_sum, -10.0);
        assert_eq!(snap.pos_rec_sum, 0.0);
        assert!(snap.competing);
        assert!(!snap.conjunctive);
        assert_eq!(snap.inputs.len(), 2);
        assert_eq!(snap.outputs.len(), 1);
        assert!(snap.is_structural(&snap.inputs[0]));
        assert!(!snap.is_structural(&snap.inputs[1]));

        let n = net.snapshot(inhib).unwrap();
        assert!(!n.competing);
    }

    #[test]
    fn test_connect_rejects_unknown_units_and_duplicate_slots() {
        let net = Network::new();
        let i = net.add_unit(UnitSpec::input("I"));
        let p = net.add_unit(UnitSpec::excitatory("P"));
        assert!(matches!(
            net.connect(p, SynapseSpec::new(UnitId(99), 1.0)),
            Err(Error::NotFound(_))
        ));
        net.connect(p, SynapseSpec::new(i, 1.0).with_slot(0)).unwrap();
        assert!(matches!(
            net.connect(p, SynapseSpec::new(i, 1.0).with_slot(0)),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            net.connect(p, SynapseSpec::new(i, f64::NAN)),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_disconnect_and_reweight() {
        let (net, _, a, _) = competing_pair();
        let syn = net.input_synapses(a)[0].id;
        net.set_weight(syn, 2.5).unwrap();
        assert_eq!(net.synapse(syn).unwrap().weight, 2.5);
        net.set_bias(a, 0.5).unwrap();
        assert_eq!(net.unit(a).unwrap().bias, 0.5);

        let removed = net.disconnect(syn).unwrap();
        assert_eq!(removed.id, syn);
        assert_eq!(net.input_synapses(a).len(), 1);
        assert!(matches!(net.disconnect(syn), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_concurrent_connects_bind_a_slot_once() {
        let net = Network::new();
        let i = net.add_unit(UnitSpec::input("I"));
        let p = net.add_unit(UnitSpec::excitatory("P"));
        let bound = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let net = net.clone();
                    scope.spawn(move || net.connect(p, SynapseSpec::new(i, 1.0).with_slot(0)).is_ok())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).filter(|&ok| ok).count()
        });
        assert_eq!(bound, 1);
        assert_eq!(net.input_synapses(p).len(), 1);
        assert_eq!(net.output_synapses(i).len(), 1);
    }

    #[test]
    fn test_snapshots_see_whole_edits() {
        let net = Network::new();
        let i = net.add_unit(UnitSpec::input("I"));
        let p = net.add_unit(UnitSpec::excitatory("P"));
        std::thread::scope(|scope| {
            let writer = net.clone();
            scope.spawn(move || {
                for _ in 0..50 {
                    let id = writer.connect(p, SynapseSpec::new(i, -1.0).recurrent()).unwrap();
                    writer.disconnect(id).unwrap();
                }
            });
            for _ in 0..200 {
                let snap = net.snapshot(p).unwrap();
                assert!(snap.inputs.iter().all(|s| s.output == p));
                assert_eq!(snap.neg_rec_sum, -(snap.inputs.len() as f64));
                assert_eq!(snap.competing, !snap.inputs.is_empty());
                let source = net.snapshot(i).unwrap();
                assert!(source.outputs.iter().all(|s| s.input == i));
            }
        });
    }

    #[test]
    fn test_concurrent_snapshots() {
        let (net, _, a, _) = competing_pair();
        std::thread::scope(|scope| {
            for _ in 0..4 {
                let net = net.clone();
                scope.spawn(move || {
                    for _ in 0..100 {
                        let snap = net.snapshot(a).unwrap();
                        assert_eq!(snap.inputs.len(), 2);
                    }
                });
            }
        });
    }
}
