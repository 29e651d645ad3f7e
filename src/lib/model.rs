//! Model instance handles and modified-base metadata.
//!
//! A [`ModelScorer`] is one loaded inference model bound to one device. The
//! engine treats scoring as an opaque, possibly blocking capability: chunks
//! are staged slot by slot with [`ModelScorer::accept`], then one
//! [`ModelScorer::score`] call runs the whole batch and returns a score
//! vector per slot.
//!
//! [`ModelParams`] is the per-model metadata consumed once at startup: the
//! motif the model scores, the modifications it can call, and its signal
//! context window. From the full set of model roles the engine builds a
//! [`ModBaseInfo`]: the class alphabet, the modification long names, and the
//! [`ClassLayout`] used to size every read's probability buffer and to place
//! each chunk's scores within it.

use bstr::ByteSlice;
use itertools::Itertools;

use crate::errors::{ModCallError, Result};
use crate::read::{CANONICAL_BASES, base_id};

/// One loaded inference model bound to one device.
///
/// Implementations stage inputs into an internal batch buffer, so `accept`
/// and `score` take `&self` with interior mutability. The pipeline runs
/// exactly one dispatcher thread per handle, guaranteeing exclusive use.
pub trait ModelScorer: Send + Sync {
    /// The model's metadata. Must be identical across device replicas of the
    /// same model role.
    fn params(&self) -> &ModelParams;

    /// Stage one chunk's signal window into batch slot `slot`.
    fn accept(&self, slot: usize, window: &[f32]);

    /// Score the staged batch. Returns one per-class score vector per slot,
    /// in slot order. A failure is fatal to the run: there is no
    /// partial-result semantics for a failed batch and no automatic retry.
    fn score(&self, batch_len: usize) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Metadata for one model role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelParams {
    /// The sequence motif the model scores, e.g. `b"CG"`.
    pub motif: Vec<u8>,
    /// Offset of the scored base within the motif.
    pub motif_offset: usize,
    /// Single-character code per modification, e.g. `['m']`.
    pub mod_codes: Vec<char>,
    /// Long name per modification, e.g. `["5mC"]`.
    pub mod_long_names: Vec<String>,
    /// Signal samples included before the scored base's signal midpoint.
    pub context_before: usize,
    /// Signal samples included after the scored base's signal midpoint.
    pub context_after: usize,
}

impl ModelParams {
    /// The canonical base this model scores: the motif base at the scored
    /// offset.
    #[must_use]
    pub fn canonical_base(&self) -> u8 {
        self.motif[self.motif_offset]
    }

    /// Number of modifications this model can call.
    #[must_use]
    pub fn mod_count(&self) -> usize {
        self.mod_long_names.len()
    }

    /// Fixed length of every signal window scored by this model.
    #[must_use]
    pub fn window_len(&self) -> usize {
        self.context_before + self.context_after
    }

    /// All sequence positions scored by this model: for every (possibly
    /// overlapping) motif occurrence, the position of the scored base.
    #[must_use]
    pub fn motif_hits(&self, seq: &[u8]) -> Vec<usize> {
        if seq.len() < self.motif.len() {
            return Vec::new();
        }
        seq.windows(self.motif.len())
            .positions(|window| window == self.motif.as_slice())
            .map(|start| start + self.motif_offset)
            .collect()
    }

    /// Check the metadata for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ModCallError::InvalidMotifBase`] or
    /// [`ModCallError::InvalidModelParams`] describing the inconsistency.
    pub fn validate(&self, role: usize) -> Result<()> {
        let invalid = |reason: String| ModCallError::InvalidModelParams { role, reason };

        if self.motif.is_empty() {
            return Err(invalid("motif is empty".to_string()));
        }
        if self.motif_offset >= self.motif.len() {
            return Err(invalid(format!(
                "motif offset {} is past the end of motif '{}'",
                self.motif_offset,
                self.motif.as_bstr()
            )));
        }
        for (offset, &symbol) in self.motif.iter().enumerate() {
            if base_id(symbol).is_none() {
                return Err(ModCallError::InvalidMotifBase {
                    role,
                    motif: self.motif.as_bstr().to_string(),
                    offset,
                    symbol: symbol as char,
                });
            }
        }
        if self.mod_codes.is_empty() {
            return Err(invalid("model declares no modifications".to_string()));
        }
        if self.mod_codes.len() != self.mod_long_names.len() {
            return Err(invalid(format!(
                "{} modification codes but {} long names",
                self.mod_codes.len(),
                self.mod_long_names.len()
            )));
        }
        if self.window_len() == 0 {
            return Err(invalid("context window is empty".to_string()));
        }
        Ok(())
    }
}

/// Placement of per-class probabilities within a read's result buffer.
///
/// Each sequence position owns `num_classes` consecutive slots. Within a
/// position, classes are laid out per canonical base in A, C, G, T order:
/// the canonical class first, then that base's modification classes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassLayout {
    offsets: [usize; 4],
    num_classes: usize,
}

impl ClassLayout {
    fn new(class_counts: [usize; 4]) -> Self {
        let mut offsets = [0usize; 4];
        let mut total = 0;
        for (offset, count) in offsets.iter_mut().zip(class_counts) {
            *offset = total;
            total += count;
        }
        Self { offsets, num_classes: total }
    }

    /// Total probability classes per sequence position.
    #[must_use]
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Offset of a canonical base's class group within a position's slots,
    /// or `None` for a symbol outside the A/C/G/T alphabet.
    #[must_use]
    pub fn class_offset(&self, symbol: u8) -> Option<usize> {
        base_id(symbol).map(|id| self.offsets[id])
    }
}

/// Aggregate modified-base metadata across all model roles.
///
/// Attached to every read so downstream consumers can interpret the
/// probability buffer without access to the models themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModBaseInfo {
    alphabet: String,
    long_names: String,
    layout: ClassLayout,
}

impl ModBaseInfo {
    /// Build the aggregate metadata from one [`ModelParams`] per model role.
    ///
    /// At most one role may score each canonical base; the per-position
    /// class count is one canonical class per base plus that base's
    /// modifications.
    ///
    /// # Errors
    ///
    /// Returns a metadata error if any role is internally inconsistent or
    /// two roles score the same canonical base.
    pub fn from_role_params(roles: &[ModelParams]) -> Result<Self> {
        let mut class_counts = [1usize; 4];
        let mut role_for_base: [Option<&ModelParams>; 4] = [None; 4];

        for (role, params) in roles.iter().enumerate() {
            params.validate(role)?;
            let base = params.canonical_base();
            let id = base_id(base).ok_or_else(|| ModCallError::InvalidMotifBase {
                role,
                motif: params.motif.as_bstr().to_string(),
                offset: params.motif_offset,
                symbol: base as char,
            })?;
            if role_for_base[id].is_some() {
                return Err(ModCallError::InvalidModelParams {
                    role,
                    reason: format!("duplicate model for canonical base '{}'", base as char),
                });
            }
            class_counts[id] = 1 + params.mod_count();
            role_for_base[id] = Some(params);
        }

        let mut alphabet = String::new();
        let mut long_names: Vec<&str> = Vec::new();
        for (id, &canonical) in CANONICAL_BASES.iter().enumerate() {
            alphabet.push(canonical as char);
            if let Some(params) = role_for_base[id] {
                alphabet.extend(params.mod_codes.iter());
                long_names.extend(params.mod_long_names.iter().map(String::as_str));
            }
        }

        Ok(Self {
            alphabet,
            long_names: long_names.join(" "),
            layout: ClassLayout::new(class_counts),
        })
    }

    /// The class alphabet in buffer order, canonical bases interleaved with
    /// their modification codes (e.g. `"ACmGT"`).
    #[must_use]
    pub fn alphabet(&self) -> &str {
        &self.alphabet
    }

    /// Space-separated modification long names, in buffer order.
    #[must_use]
    pub fn long_names(&self) -> &str {
        &self.long_names
    }

    /// The class layout shared by every read's probability buffer.
    #[must_use]
    pub fn layout(&self) -> &ClassLayout {
        &self.layout
    }
}
