//! End-to-end tests for the branch-and-bound search.
//!
//! These drive [`SearchTree`] directly as well as through
//! [`Document::process`], checking that the search is deterministic,
//! leaves no trace on the document it explored, agrees with and without
//! memoization, and degrades gracefully when its step budget runs out.

use interp_search::{
    Decision, Document, DocumentResult, InputSpec, Network, SearchConfig, SearchTree, SynapseSpec,
    UnitId, UnitSpec,
};
use pretty_assertions::assert_eq;

struct Competition {
    net: Network,
    word: UnitId,
    a: UnitId,
    b: UnitId,
}

fn competition() -> Competition {
    let net = Network::new();
    let word = net.add_unit(UnitSpec::input("W"));
    let a = net.add_unit(UnitSpec::excitatory("A").with_bias(-1.0));
    let b = net.add_unit(UnitSpec::excitatory("B").with_bias(-1.0));
    let inhibitor = net.add_unit(UnitSpec::inhibitory("N"));
    net.connect(a, SynapseSpec::new(word, 5.0)).unwrap();
    net.connect(b, SynapseSpec::new(word, 3.0)).unwrap();
    net.connect(inhibitor, SynapseSpec::new(a, 1.0)).unwrap();
    net.connect(inhibitor, SynapseSpec::new(b, 1.0)).unwrap();
    net.connect(a, SynapseSpec::new(inhibitor, -10.0).recurrent()).unwrap();
    net.connect(b, SynapseSpec::new(inhibitor, -10.0).recurrent()).unwrap();
    Competition { net, word, a, b }
}

fn two_words(c: &Competition, config: SearchConfig) -> Document {
    let mut doc = Document::with_config(&c.net, "word word", config);
    doc.add_input(c.word, InputSpec::new(0, 4)).unwrap();
    doc.add_input(c.word, InputSpec::new(5, 9)).unwrap();
    doc
}

/// Result fields that do not depend on the document id or search effort.
fn outcome(result: &DocumentResult) -> (Vec<String>, String) {
    let finals = result
        .activations
        .iter()
        .filter(|a| a.is_final())
        .map(|a| format!("{} {} {:.6}", a.label, a.range, a.state.value))
        .collect();
    (finals, format!("{}", result.best_weight))
}

// ============================================================================
// 1. Determinism
// ============================================================================

#[test]
fn test_identical_documents_get_identical_results() {
    let c = competition();
    let first = two_words(&c, SearchConfig::default()).process().unwrap();
    let second = two_words(&c, SearchConfig::default()).process().unwrap();

    assert_ne!(first.document_id, second.document_id);
    assert_eq!(first.selected_options, second.selected_options);
    assert_eq!(first.stats, second.stats);
    assert_eq!(outcome(&first), outcome(&second));
}

// ============================================================================
// 2. The search leaves no trace until materialized
// ============================================================================

#[test]
fn test_search_restores_document_state() {
    let c = competition();
    let mut doc = two_words(&c, SearchConfig::default());
    let rounds_before = doc.snapshot_rounds();
    let decisions_before: Vec<Decision> = doc.activations().iter().map(|a| a.decision).collect();

    let mut tree = SearchTree::new(doc.config().clone());
    tree.run(&mut doc).unwrap();
    assert!(tree.stats().leaves >= 2);

    let decisions_after: Vec<Decision> = doc.activations().iter().map(|a| a.decision).collect();
    assert_eq!(doc.snapshot_rounds(), rounds_before);
    assert_eq!(decisions_after, decisions_before);

    let selected = tree.materialize(&mut doc);
    assert_eq!(selected, tree.selected_options());
    assert_eq!(doc.final_activations(c.a).len(), 2);
    assert!(doc.final_activations(c.b).is_empty());
}

#[test]
fn test_excluded_branch_is_undone_before_its_sibling() {
    let c = competition();
    let mut doc = Document::with_config(&c.net, "word", SearchConfig::default().with_recorded_leaves(true));
    doc.add_input(c.word, InputSpec::new(0, 4)).unwrap();
    let result = doc.process().unwrap();

    // A-selected, then A-excluded with B selected, then neither.
    let norms: Vec<f64> = result.stats.leaf_summaries.iter().map(|l| l.weight.norm()).collect();
    assert_eq!(norms.len(), 3);
    assert!((norms[0] - 4.0 / 6.0).abs() < 1e-9);
    assert!((norms[1] - 2.0 / 6.0).abs() < 1e-9);
    assert!(norms[2].abs() < 1e-9);
}

// ============================================================================
// 3. Memoized decisions agree with the full search
// ============================================================================

#[test]
fn test_cached_and_uncached_search_agree() {
    let c = competition();
    let cached = two_words(&c, SearchConfig::default().with_cached_decisions(true))
        .process()
        .unwrap();
    let uncached = two_words(&c, SearchConfig::default().with_cached_decisions(false))
        .process()
        .unwrap();

    assert!(cached.stats.cache_hits >= 1);
    assert_eq!(uncached.stats.cache_hits, 0);
    assert!(cached.stats.steps <= uncached.stats.steps);
    assert_eq!(cached.selected_options, uncached.selected_options);
    assert_eq!(outcome(&cached), outcome(&uncached));
}

// ============================================================================
// 4. Leaf weights
// ============================================================================

#[test]
fn test_weights_grow_along_every_path() {
    let c = competition();
    let config = SearchConfig::default()
        .with_recorded_leaves(true)
        .with_cached_decisions(false);
    let result = two_words(&c, config).process().unwrap();

    let leaves = &result.stats.leaf_summaries;
    assert_eq!(leaves.len(), result.stats.leaves);
    for leaf in leaves {
        assert_eq!(leaf.path.last(), Some(&leaf.weight));
        for step in leaf.path.windows(2) {
            assert!(step[1].w >= step[0].w - 1e-9, "w decreased along {:?}", leaf.path);
            assert!(step[1].n >= step[0].n - 1e-9, "n decreased along {:?}", leaf.path);
        }
    }

    let best = result.best_weight.norm();
    let winners = leaves.iter().filter(|l| (l.weight.norm() - best).abs() < 1e-9).count();
    assert_eq!(winners, 1);
    assert!(leaves.iter().all(|l| l.weight.norm() <= best + 1e-9));
}

// ============================================================================
// 5. Step budget
// ============================================================================

#[test]
fn test_step_budget_keeps_best_so_far() {
    let c = competition();
    let config = SearchConfig::default().with_max_search_steps(2);
    let mut doc = Document::with_config(&c.net, "word", config);
    doc.add_input(c.word, InputSpec::new(0, 4)).unwrap();
    let result = doc.process().unwrap();

    assert!(result.interrupted);
    assert_eq!(result.stats.steps, 2);
    assert_eq!(result.final_activations(c.a).len(), 1);
    assert!(result.final_activations(c.b).is_empty());
}

#[test]
fn test_exhausted_budget_without_leaf() {
    let c = competition();
    let config = SearchConfig::default().with_max_search_steps(1);
    let mut doc = Document::with_config(&c.net, "word", config);
    doc.add_input(c.word, InputSpec::new(0, 4)).unwrap();
    let result = doc.process().unwrap();

    assert!(result.interrupted);
    assert!(result.selected_options.is_empty());
    assert!(result.final_activations(c.a).is_empty());
    assert!(result.final_activations(c.b).is_empty());
}

// ============================================================================
// 6. Documents on a shared network
// ============================================================================

#[test]
fn test_concurrent_documents() {
    let c = competition();
    let results: Vec<DocumentResult> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let c = &c;
                s.spawn(move || {
                    let mut doc = Document::new(&c.net, format!("word {i}"));
                    doc.add_input(c.word, InputSpec::new(0, 4).with_rid(i)).unwrap();
                    doc.process().unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for result in &results {
        assert_eq!(result.final_activations(c.a).len(), 1);
        assert!(result.final_activations(c.b).is_empty());
        assert_eq!(outcome(result), outcome(&results[0]));
    }
}

#[test]
fn test_model_edits_do_not_reach_running_documents() {
    let c = competition();
    let mut doc = Document::new(&c.net, "word");
    doc.add_input(c.word, InputSpec::new(0, 4)).unwrap();

    let b_in = c.net.input_synapses(c.b).into_iter().find(|s| s.input == c.word).unwrap();
    c.net.set_weight(b_in.id, 9.0).unwrap();
    let result = doc.process().unwrap();
    assert_eq!(result.final_activations(c.a).len(), 1);

    let mut fresh = Document::new(&c.net, "word");
    fresh.add_input(c.word, InputSpec::new(0, 4)).unwrap();
    let result = fresh.process().unwrap();
    assert_eq!(result.final_activations(c.b).len(), 1);
    assert!(result.final_activations(c.a).is_empty());
}

// ============================================================================
// 7. Serialized results
// ============================================================================

#[test]
fn test_result_json_round_trip() {
    let c = competition();
    let config = SearchConfig::default().with_recorded_leaves(true);
    let result = two_words(&c, config).process().unwrap();

    let json = result.to_json().unwrap();
    let back = DocumentResult::from_json(&json).unwrap();
    assert_eq!(back, result);
    assert!(back.stats.leaf_summaries.len() >= 2);
}
