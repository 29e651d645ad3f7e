//! Read-to-chunk expansion workers.
//!
//! Each worker pops reads from the node input and, per model role, turns
//! every motif hit into a scoring chunk with a correctly windowed,
//! edge-padded signal slice. Before any chunk becomes visible the read's
//! probability buffer is initialized to the all-canonical default, its final
//! issued-chunk count is stored, and the read is registered in the working
//! set, so the aggregator's completion check can never observe a read whose
//! issuance is still growing.
//!
//! Chunk generation is gated on every request queue being below the
//! configured high-water mark; a read already in progress is never dropped,
//! the worker just blocks. Reads with no motif hit under any model bypass
//! scoring entirely and go straight to the downstream sink.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use log::warn;

use crate::errors::{ModCallError, Result};
use crate::model::ModelParams;
use crate::node::Shared;
use crate::read::{Chunk, ProbBuffer, ReadRecord};

/// Worker loop: consume reads until the input channel is drained, then take
/// part in the termination cascade. The last expander to finish terminates
/// every request queue.
pub(crate) fn run(shared: &Shared) {
    while let Some(read) = shared.input.pop() {
        shared.stats.note_read_received();
        if let Err(err) = expand_read(shared, &read) {
            shared.fail(err);
            break;
        }
    }
    if shared.active_expanders.fetch_sub(1, Ordering::AcqRel) == 1 {
        for role in &shared.roles {
            role.queue.terminate();
        }
    }
}

/// Expand one read into chunks and hand them to the request queues.
///
/// Returns `Ok(())` without finishing if the pipeline is shutting down (a
/// queue reports termination); errors are fatal malformed-input conditions.
fn expand_read(shared: &Shared, read: &Arc<ReadRecord>) -> Result<()> {
    validate_alignment_map(read)?;
    if read.probs().is_some() {
        return Err(ModCallError::InvariantViolation {
            detail: format!("read '{}' was delivered to the pipeline more than once", read.id),
        });
    }

    let hits_per_role: Vec<Vec<usize>> =
        shared.roles.iter().map(|role| role.params.motif_hits(&read.seq)).collect();
    let total: usize = hits_per_role.iter().map(Vec::len).sum();

    // Buffer defaults, metadata, and the final issued count are all in place
    // before the first chunk can be scored.
    let probs = ProbBuffer::with_defaults(&read.id, &read.seq, shared.info.layout())?;
    read.init_scoring(probs, Arc::clone(&shared.info), total);
    shared.stats.note_chunks_issued(total as u64);

    if total == 0 {
        shared.stats.note_read_bypassed();
        shared.stats.note_read_forwarded();
        if shared.sink.push_message(Arc::clone(read)).is_err() {
            warn!("Downstream sink rejected read '{}'", read.id);
        }
        return Ok(());
    }

    shared.working.lock().push(Arc::clone(read));

    for role in &shared.roles {
        if !role.queue.wait_below(shared.high_water) {
            return Ok(());
        }
    }

    for (role_index, (role, hits)) in shared.roles.iter().zip(&hits_per_role).enumerate() {
        for &position in hits {
            let window = signal_window(&read.signal, &read.seq_to_sig_map, position, &role.params);
            if role.queue.push(Chunk::new(read, role_index, position, window)).is_err() {
                return Ok(());
            }
        }
    }
    Ok(())
}

/// Check the sequence-to-signal alignment map before using it for windowing.
fn validate_alignment_map(read: &ReadRecord) -> Result<()> {
    let map = &read.seq_to_sig_map;
    if map.is_empty() {
        return Err(ModCallError::EmptyAlignmentMap { read_id: read.id.clone() });
    }
    if map.len() != read.seq.len() + 1 {
        return Err(ModCallError::AlignmentMapLength {
            read_id: read.id.clone(),
            expected: read.seq.len() + 1,
            actual: map.len(),
        });
    }
    let mut previous = 0;
    for (index, &value) in map.iter().enumerate() {
        if value < previous || value > read.signal.len() {
            return Err(ModCallError::AlignmentMapRange {
                read_id: read.id.clone(),
                index,
                value,
                signal_len: read.signal.len(),
            });
        }
        previous = value;
    }
    Ok(())
}

/// Extract the model's context window around a scored base, zero-padding
/// samples that fall outside the signal.
///
/// The window is centered on the midpoint of the base's signal range and
/// always has length `context_before + context_after`, so every chunk of a
/// model batches uniformly.
fn signal_window(
    signal: &[f32],
    seq_to_sig_map: &[usize],
    position: usize,
    params: &ModelParams,
) -> Vec<f32> {
    let start = seq_to_sig_map[position];
    let end = seq_to_sig_map[position + 1];
    let center = (start + (end - start) / 2) as isize;

    let lo = center - params.context_before as isize;
    let hi = center + params.context_after as isize;
    let lead_pad = if lo < 0 { lo.unsigned_abs() } else { 0 };
    let lo_clamped = lo.max(0) as usize;
    let hi_clamped = (hi.max(0) as usize).min(signal.len());

    let mut window = vec![0.0f32; params.window_len()];
    if lo_clamped < hi_clamped {
        let copied = hi_clamped - lo_clamped;
        window[lead_pad..lead_pad + copied].copy_from_slice(&signal[lo_clamped..hi_clamped]);
    }
    window
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(before: usize, after: usize) -> ModelParams {
        ModelParams {
            motif: b"CG".to_vec(),
            motif_offset: 0,
            mod_codes: vec!['m'],
            mod_long_names: vec!["5mC".to_string()],
            context_before: before,
            context_after: after,
        }
    }

    fn ramp(len: usize) -> Vec<f32> {
        (0..len).map(|i| i as f32).collect()
    }

    #[test]
    fn test_signal_window_interior() {
        // Base 2 maps to samples 20..30, midpoint 25.
        let map: Vec<usize> = (0..=8).map(|i| i * 10).collect();
        let window = signal_window(&ramp(80), &map, 2, &params(4, 4));
        assert_eq!(window, vec![21.0, 22.0, 23.0, 24.0, 25.0, 26.0, 27.0, 28.0]);
    }

    #[test]
    fn test_signal_window_pads_leading_edge() {
        let map: Vec<usize> = (0..=8).map(|i| i * 10).collect();
        // Base 0 midpoint is sample 5; a 8-before window runs off the start.
        let window = signal_window(&ramp(80), &map, 0, &params(8, 2));
        assert_eq!(window.len(), 10);
        assert_eq!(&window[..3], &[0.0, 0.0, 0.0]);
        assert_eq!(&window[3..], &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_signal_window_pads_trailing_edge() {
        let map: Vec<usize> = (0..=8).map(|i| i * 10).collect();
        // Base 7 midpoint is sample 75; a 10-after window runs off the end.
        let window = signal_window(&ramp(80), &map, 7, &params(2, 10));
        assert_eq!(window.len(), 12);
        assert_eq!(&window[..7], &[73.0, 74.0, 75.0, 76.0, 77.0, 78.0, 79.0, 0.0][..7]);
        assert_eq!(&window[7..], &[0.0; 5]);
    }

    #[test]
    fn test_signal_window_zero_length_base_range() {
        // Base 1 has an empty signal range (map entries equal).
        let map = vec![0, 10, 10, 20];
        let window = signal_window(&ramp(20), &map, 1, &params(2, 2));
        assert_eq!(window, vec![8.0, 9.0, 10.0, 11.0]);
    }

    #[test]
    fn test_validate_alignment_map_accepts_well_formed() {
        let read = ReadRecord::new("r", b"ACGT".to_vec(), ramp(40), vec![0, 10, 20, 30, 40]);
        assert!(validate_alignment_map(&read).is_ok());
    }

    #[test]
    fn test_validate_alignment_map_rejects_empty() {
        let read = ReadRecord::new("r", Vec::new(), Vec::new(), Vec::new());
        assert!(matches!(
            validate_alignment_map(&read),
            Err(ModCallError::EmptyAlignmentMap { .. })
        ));
    }

    #[test]
    fn test_validate_alignment_map_rejects_wrong_length() {
        let read = ReadRecord::new("r", b"ACGT".to_vec(), ramp(40), vec![0, 10, 20]);
        assert!(matches!(
            validate_alignment_map(&read),
            Err(ModCallError::AlignmentMapLength { expected: 5, actual: 3, .. })
        ));
    }

    #[test]
    fn test_validate_alignment_map_rejects_decreasing_entries() {
        let read = ReadRecord::new("r", b"AC".to_vec(), ramp(20), vec![0, 15, 10]);
        assert!(matches!(
            validate_alignment_map(&read),
            Err(ModCallError::AlignmentMapRange { index: 2, value: 10, .. })
        ));
    }

    #[test]
    fn test_validate_alignment_map_rejects_past_signal_end() {
        let read = ReadRecord::new("r", b"AC".to_vec(), ramp(20), vec![0, 10, 25]);
        assert!(matches!(
            validate_alignment_map(&read),
            Err(ModCallError::AlignmentMapRange { index: 2, value: 25, signal_len: 20, .. })
        ));
    }
}
