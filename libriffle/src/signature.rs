//! Computes a content-derived signature for each section. A signature is the set of 64-bit
//! hashes of every 4-byte window of the section's content, optionally mixed with hashes of the
//! relocations that land inside those windows. Sections whose signatures overlap heavily are
//! likely to compress well when placed next to each other, which is what the bisection stage
//! optimises for.

use crate::hash::hash_bytes;
use crate::hash::hash_value;
use crate::section::Relocation;
use crate::section::RelocationTarget;
use crate::section::Section;
use crate::section::SectionIndex;
use rayon::iter::IndexedParallelIterator;
use rayon::iter::IntoParallelRefIterator;
use rayon::iter::ParallelIterator;

pub(crate) const WINDOW_SIZE: usize = 4;

/// The deduplicated, sorted feature hashes of one section.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct Signature {
    pub(crate) features: Vec<u64>,
}

/// Computes signatures for `members`, which index into `sections`. The result is parallel to
/// `members`.
#[tracing::instrument(skip_all, name = "Compute section signatures")]
pub(crate) fn compute_signatures<S: Section + Sync>(
    sections: &[S],
    members: &[SectionIndex],
    structural_features: bool,
) -> Vec<Signature> {
    members
        .par_iter()
        .with_min_len(64)
        .map(|index| signature_for(&sections[index.as_usize()], structural_features))
        .collect()
}

fn signature_for<S: Section>(section: &S, structural_features: bool) -> Signature {
    if !section.has_content() {
        return Signature::default();
    }

    let content = section.content();
    let mut features = Vec::with_capacity(content.len());

    if content.len() >= WINDOW_SIZE {
        for window in content.windows(WINDOW_SIZE) {
            features.push(hash_bytes(window));
        }
    } else if !content.is_empty() {
        // Too short for even one full window, so the whole content is the one feature.
        features.push(hash_bytes(content));
    }

    if structural_features {
        for relocation in section.relocations() {
            add_relocation_features(&mut features, content, &relocation);
        }
    }

    features.sort_unstable();
    features.dedup();
    Signature { features }
}

/// Mixes the relocation's hash into every window that overlaps the relocated field. Two sections
/// with identical bytes but different relocation targets then get different signatures, so
/// near-duplicate code that calls different functions doesn't cluster as if identical.
fn add_relocation_features(features: &mut Vec<u64>, content: &[u8], relocation: &Relocation) {
    if relocation.size == 0 {
        return;
    }
    let Ok(offset) = usize::try_from(relocation.offset) else {
        return;
    };
    if offset >= content.len() {
        return;
    }

    let relocation_hash = relocation_hash(relocation);

    if content.len() < WINDOW_SIZE {
        features.push(hash_bytes(content).wrapping_add(relocation_hash));
        return;
    }

    let field_end = offset + usize::from(relocation.size);
    let first = offset.saturating_sub(WINDOW_SIZE - 1);
    let last_exclusive = field_end.min(content.len() - WINDOW_SIZE + 1);
    for position in first..last_exclusive {
        let window = &content[position..position + WINDOW_SIZE];
        features.push(hash_bytes(window).wrapping_add(relocation_hash));
    }
}

fn relocation_hash(relocation: &Relocation) -> u64 {
    // Target sections are identified by index + 1 so that an unknown target (0) can't collide
    // with section 0.
    let (target_index, target_value) = match relocation.target {
        RelocationTarget::Defined { section, value } => {
            (section.map_or(0, |s| u64::from(s.as_u32()) + 1), value)
        }
        RelocationTarget::Unresolved => (0, 0),
    };
    hash_value((relocation.kind, target_index, target_value, relocation.addend))
}
