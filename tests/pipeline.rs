//! End-to-end pipeline scenarios: batching, flush-on-idle, backpressure,
//! bypass, and fault handling.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use modcall::testutil::{
    RecordingSink, TestScorer, adenine_params, cpg_params, uniform_read,
};
use modcall::{MessageSink, ModBaseNode, ModCallError, ModelScorer, PipelineConfig, ReadRecord};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn small_config() -> PipelineConfig {
    PipelineConfig {
        expander_threads: 2,
        flush_timeout: Duration::from_millis(50),
        ..PipelineConfig::for_batch_size(4)
    }
}

/// Sequence with CpG motif hits at positions 2 and 5 and nowhere else.
const TWO_HIT_SEQ: &[u8] = b"AACGACGA";

#[test]
fn test_end_to_end_two_chunks_single_batch() {
    init_logging();
    let sink = RecordingSink::new();
    let scorer = Arc::new(TestScorer::new(cpg_params()));
    let node = ModBaseNode::new(
        sink.clone(),
        vec![Arc::clone(&scorer) as Arc<dyn ModelScorer>],
        1,
        small_config(),
    )
    .unwrap();

    node.push_message(uniform_read("read-1", TWO_HIT_SEQ)).unwrap();
    node.join().unwrap();

    // Both chunks fit one batch (2 <= capacity 4), scored in a single call.
    assert_eq!(scorer.batch_sizes(), vec![2]);

    let reads = sink.reads();
    assert_eq!(reads.len(), 1);
    let read = &reads[0];
    assert_eq!(read.chunks_issued(), 2);
    assert_eq!(read.chunks_completed(), 2);
    assert!(read.is_complete());

    // Classes per position: [A, C, m, G, T].
    let probs = read.probs().unwrap();
    assert_eq!(probs.num_classes(), 5);
    let default_for = |symbol: u8| -> Vec<u8> {
        match symbol {
            b'A' => vec![255, 0, 0, 0, 0],
            b'G' => vec![0, 0, 0, 255, 0],
            other => panic!("unexpected symbol {}", other as char),
        }
    };
    for position in [0usize, 1, 3, 4, 6, 7] {
        assert_eq!(
            probs.position_probs(position),
            default_for(TWO_HIT_SEQ[position]),
            "default distribution disturbed at position {position}"
        );
    }
    for position in [2usize, 5] {
        // Canonical C scored 0.25 -> 64, 5mC scored 0.75 -> 192.
        assert_eq!(probs.position_probs(position), vec![0, 64, 192, 0, 0]);
    }

    assert_eq!(sink.termination_count(), 1);
}

#[test]
fn test_zero_chunk_read_bypasses_scoring() {
    init_logging();
    let sink = RecordingSink::new();
    let scorer = Arc::new(TestScorer::new(cpg_params()));
    let node = ModBaseNode::new(
        sink.clone(),
        vec![Arc::clone(&scorer) as Arc<dyn ModelScorer>],
        1,
        small_config(),
    )
    .unwrap();
    let stats = node.stats();

    node.push_message(uniform_read("no-hits", b"TTTTTTTT")).unwrap();
    node.join().unwrap();

    assert_eq!(scorer.calls(), 0, "bypassed read must never reach a scorer");
    assert_eq!(stats.reads_bypassed(), 1);
    assert_eq!(stats.peak_queue_len(), 0, "bypassed read must never enter a request queue");

    let reads = sink.reads();
    assert_eq!(reads.len(), 1);
    let read = &reads[0];
    assert_eq!(read.chunks_issued(), 0);
    // The buffer is still initialized to the all-canonical default.
    let probs = read.probs().unwrap();
    for position in 0..8 {
        assert_eq!(probs.position_probs(position), vec![0, 0, 0, 0, 255]);
    }
}

#[test]
fn test_partial_batch_flushes_on_idle() {
    init_logging();
    let sink = RecordingSink::new();
    let scorer = Arc::new(TestScorer::new(cpg_params()));
    let node = ModBaseNode::new(
        sink.clone(),
        vec![Arc::clone(&scorer) as Arc<dyn ModelScorer>],
        1,
        small_config(),
    )
    .unwrap();

    // Two chunks against a batch capacity of four, then no further input:
    // the partial batch must be scored by the idle timeout, without the
    // pipeline shutting down.
    node.push_message(uniform_read("read-1", TWO_HIT_SEQ)).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while sink.is_empty() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }

    assert_eq!(sink.len(), 1, "partial batch was not flushed within the idle timeout");
    assert_eq!(scorer.batch_sizes().iter().sum::<usize>(), 2);
    assert!(!sink.is_terminated(), "pipeline must still be running");

    node.join().unwrap();
    assert_eq!(sink.termination_count(), 1);
}

#[test]
fn test_no_read_lost_or_duplicated() {
    init_logging();
    let sink = RecordingSink::new();
    let scorer = Arc::new(TestScorer::new(cpg_params()));
    let node = ModBaseNode::new(
        sink.clone(),
        vec![Arc::clone(&scorer) as Arc<dyn ModelScorer>],
        1,
        PipelineConfig {
            expander_threads: 4,
            flush_timeout: Duration::from_millis(10),
            ..PipelineConfig::for_batch_size(4)
        },
    )
    .unwrap();

    for index in 0..100 {
        node.push_message(uniform_read(&format!("read-{index}"), TWO_HIT_SEQ)).unwrap();
    }
    node.join().unwrap();

    let reads = sink.reads();
    assert_eq!(reads.len(), 100);
    let ids: HashSet<String> = reads.iter().map(|read| read.id.clone()).collect();
    assert_eq!(ids.len(), 100, "a read was duplicated");
    for read in &reads {
        assert_eq!(read.chunks_issued(), 2);
        assert_eq!(read.chunks_completed(), 2, "read '{}' over- or under-completed", read.id);
    }
}

#[test]
fn test_backpressure_bounds_queue_occupancy() {
    init_logging();
    let sink = RecordingSink::new();
    let scorer =
        Arc::new(TestScorer::new(cpg_params()).with_delay(Duration::from_millis(2)));
    let node = ModBaseNode::new(
        sink.clone(),
        vec![Arc::clone(&scorer) as Arc<dyn ModelScorer>],
        1,
        PipelineConfig {
            expander_threads: 2,
            chunk_queue_capacity: 10,
            chunk_queue_high_water: 10,
            flush_timeout: Duration::from_millis(10),
            ..PipelineConfig::for_batch_size(4)
        },
    )
    .unwrap();
    let stats = node.stats();

    for index in 0..100 {
        node.push_message(uniform_read(&format!("read-{index}"), TWO_HIT_SEQ)).unwrap();
    }
    node.join().unwrap();

    assert_eq!(sink.len(), 100, "backpressure must never drop a read");
    assert_eq!(stats.chunks_issued(), 200);
    assert_eq!(stats.chunks_scored(), 200, "backpressure must never drop a chunk");
    assert!(
        stats.peak_queue_len() <= 10,
        "request queue exceeded its bound: peak {}",
        stats.peak_queue_len()
    );
}

#[test]
fn test_two_models_on_two_devices() {
    init_logging();
    let sink = RecordingSink::new();
    // Device-major handle layout: [cpg@0, adenine@0, cpg@1, adenine@1].
    let cpg_replicas =
        [Arc::new(TestScorer::new(cpg_params())), Arc::new(TestScorer::new(cpg_params()))];
    let adenine_replicas = [
        Arc::new(TestScorer::new(adenine_params())),
        Arc::new(TestScorer::new(adenine_params())),
    ];
    let scorers: Vec<Arc<dyn ModelScorer>> = vec![
        Arc::clone(&cpg_replicas[0]) as Arc<dyn ModelScorer>,
        Arc::clone(&adenine_replicas[0]) as Arc<dyn ModelScorer>,
        Arc::clone(&cpg_replicas[1]) as Arc<dyn ModelScorer>,
        Arc::clone(&adenine_replicas[1]) as Arc<dyn ModelScorer>,
    ];
    let node = ModBaseNode::new(sink.clone(), scorers, 2, small_config()).unwrap();
    assert_eq!(node.mod_base_info().alphabet(), "AaCmGT");

    node.push_message(uniform_read("read-1", TWO_HIT_SEQ)).unwrap();
    node.join().unwrap();

    let reads = sink.reads();
    assert_eq!(reads.len(), 1);
    let read = &reads[0];
    // CpG hits {2, 5} plus adenine hits {0, 1, 4, 7}.
    assert_eq!(read.chunks_issued(), 6);
    assert!(read.is_complete());

    let cpg_chunks: usize =
        cpg_replicas.iter().flat_map(|scorer| scorer.batch_sizes()).sum();
    let adenine_chunks: usize =
        adenine_replicas.iter().flat_map(|scorer| scorer.batch_sizes()).sum();
    assert_eq!(cpg_chunks, 2);
    assert_eq!(adenine_chunks, 4);

    // Classes per position: [A, a, C, m, G, T].
    let probs = read.probs().unwrap();
    assert_eq!(probs.num_classes(), 6);
    for position in [0usize, 1, 4, 7] {
        assert_eq!(probs.position_probs(position), vec![64, 192, 0, 0, 0, 0]);
    }
    for position in [2usize, 5] {
        assert_eq!(probs.position_probs(position), vec![0, 0, 64, 192, 0, 0]);
    }
    for position in [3usize, 6] {
        assert_eq!(probs.position_probs(position), vec![0, 0, 0, 0, 255, 0]);
    }
}

#[test]
fn test_inference_failure_aborts_run() {
    init_logging();
    let sink = RecordingSink::new();
    let scorer: Arc<dyn ModelScorer> = Arc::new(TestScorer::new(cpg_params()).failing());
    let node = ModBaseNode::new(
        sink.clone(),
        vec![scorer],
        1,
        PipelineConfig {
            flush_timeout: Duration::from_millis(10),
            ..PipelineConfig::for_batch_size(4)
        },
    )
    .unwrap();

    for index in 0..3 {
        node.push_message(uniform_read(&format!("read-{index}"), TWO_HIT_SEQ)).unwrap();
    }
    let err = node.join().unwrap_err();
    assert!(matches!(err, ModCallError::Inference { .. }), "unexpected error: {err}");

    // Orderly termination rather than a hang: the sink still hears the
    // cascade, and no partially scored read leaks downstream.
    assert_eq!(sink.termination_count(), 1);
    assert!(sink.is_empty());
}

#[test]
fn test_invalid_sequence_symbol_aborts_run() {
    init_logging();
    let sink = RecordingSink::new();
    let scorer: Arc<dyn ModelScorer> = Arc::new(TestScorer::new(cpg_params()));
    let node = ModBaseNode::new(sink.clone(), vec![scorer], 1, small_config()).unwrap();

    node.push_message(uniform_read("bad-read", b"AANCGACG")).unwrap();
    let err = node.join().unwrap_err();
    assert!(
        matches!(err, ModCallError::InvalidBase { symbol: 'N', position: 2, .. }),
        "unexpected error: {err}"
    );
    assert_eq!(sink.termination_count(), 1);
}

#[test]
fn test_malformed_alignment_map_aborts_run() {
    init_logging();
    let sink = RecordingSink::new();
    let scorer: Arc<dyn ModelScorer> = Arc::new(TestScorer::new(cpg_params()));
    let node = ModBaseNode::new(sink.clone(), vec![scorer], 1, small_config()).unwrap();

    // Map has the wrong number of entries for the sequence.
    let read = Arc::new(ReadRecord::new(
        "bad-map",
        b"ACGT".to_vec(),
        vec![0.0; 40],
        vec![0, 10, 20],
    ));
    node.push_message(read).unwrap();
    let err = node.join().unwrap_err();
    assert!(matches!(err, ModCallError::AlignmentMapLength { .. }), "unexpected error: {err}");
}

#[test]
fn test_constructor_rejects_bad_topology() {
    let sink = RecordingSink::new();
    let err = ModBaseNode::new(sink.clone(), Vec::new(), 1, small_config()).unwrap_err();
    assert!(matches!(err, ModCallError::InvalidParameter { .. }));

    let scorers: Vec<Arc<dyn ModelScorer>> = vec![
        Arc::new(TestScorer::new(cpg_params())),
        Arc::new(TestScorer::new(cpg_params())),
        Arc::new(TestScorer::new(cpg_params())),
    ];
    let err = ModBaseNode::new(sink.clone(), scorers, 2, small_config()).unwrap_err();
    assert!(matches!(err, ModCallError::InvalidParameter { .. }));
}

#[test]
fn test_constructor_rejects_inconsistent_replicas() {
    let sink = RecordingSink::new();
    let mut other = cpg_params();
    other.context_before = 4;
    let scorers: Vec<Arc<dyn ModelScorer>> = vec![
        Arc::new(TestScorer::new(cpg_params())),
        Arc::new(TestScorer::new(other)),
    ];
    let err = ModBaseNode::new(sink, scorers, 2, small_config()).unwrap_err();
    assert!(matches!(err, ModCallError::InconsistentReplica { role: 0, device: 1 }));
}

#[test]
fn test_empty_input_terminates_cleanly() {
    init_logging();
    let sink = RecordingSink::new();
    let scorer: Arc<dyn ModelScorer> = Arc::new(TestScorer::new(cpg_params()));
    let node = ModBaseNode::new(sink.clone(), vec![scorer], 1, small_config()).unwrap();
    node.join().unwrap();
    assert!(sink.is_empty());
    assert_eq!(sink.termination_count(), 1);
}
