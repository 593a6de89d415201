use crate::error::Result;
use crate::section::SectionIndex;
use anyhow::Context as _;
use anyhow::bail;

/// The result of an ordering request: a dense position in `0..N` for each of the `N` input
/// sections. The layout pass places sections in increasing position order; positions carry no
/// other meaning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionMap {
    /// Indexed by section index, holds the section's position.
    positions: Vec<u32>,
}

impl PositionMap {
    /// Builds the map from a placement order: `order[k]` is the section placed at position `k`.
    /// Checks that `order` is a permutation of all `section_count` sections, in release builds
    /// too. An ordering bug must surface as an error here rather than as a silently dropped
    /// section in the output image.
    pub(crate) fn from_order(order: &[SectionIndex], section_count: usize) -> Result<Self> {
        if order.len() != section_count {
            bail!(
                "ordering produced {} positions for {section_count} sections",
                order.len()
            );
        }
        let mut positions = vec![u32::MAX; section_count];
        for (position, section) in order.iter().enumerate() {
            let slot = positions
                .get_mut(section.as_usize())
                .with_context(|| format!("ordering placed out-of-range section {section}"))?;
            if *slot != u32::MAX {
                bail!("ordering placed section {section} twice");
            }
            *slot = position as u32;
        }
        // Lengths match and no section repeats, so every slot got written.
        debug_assert!(positions.iter().all(|&p| p != u32::MAX));
        Ok(Self { positions })
    }

    pub fn position(&self, section: SectionIndex) -> u32 {
        self.positions[section.as_usize()]
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// All `(section, position)` pairs in section-index order.
    pub fn iter(&self) -> impl Iterator<Item = (SectionIndex, u32)> + '_ {
        self.positions
            .iter()
            .enumerate()
            .map(|(section, &position)| (SectionIndex::from_usize(section), position))
    }

    /// Section indexes sorted by position, i.e. the order in which the layout pass should place
    /// them.
    pub fn placement_order(&self) -> Vec<SectionIndex> {
        let mut order = vec![SectionIndex::from_u32(0); self.positions.len()];
        for (section, &position) in self.positions.iter().enumerate() {
            order[position as usize] = SectionIndex::from_usize(section);
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indexes(raw: &[u32]) -> Vec<SectionIndex> {
        raw.iter().map(|&i| SectionIndex::from_u32(i)).collect()
    }

    #[test]
    fn valid_permutation() {
        let map = PositionMap::from_order(&indexes(&[2, 0, 1]), 3).unwrap();
        assert_eq!(map.position(SectionIndex::from_u32(2)), 0);
        assert_eq!(map.position(SectionIndex::from_u32(0)), 1);
        assert_eq!(map.position(SectionIndex::from_u32(1)), 2);
        assert_eq!(map.len(), 3);
        assert_eq!(map.placement_order(), indexes(&[2, 0, 1]));
    }

    #[test]
    fn empty_input() {
        let map = PositionMap::from_order(&[], 0).unwrap();
        assert!(map.is_empty());
        assert!(map.placement_order().is_empty());
    }

    #[test]
    fn duplicate_section_rejected() {
        let error = PositionMap::from_order(&indexes(&[0, 1, 0]), 3).unwrap_err();
        assert!(error.to_string().contains("twice"), "{error}");
    }

    #[test]
    fn out_of_range_section_rejected() {
        assert!(PositionMap::from_order(&indexes(&[0, 3]), 2).is_err());
    }

    #[test]
    fn wrong_length_rejected() {
        assert!(PositionMap::from_order(&indexes(&[0, 1]), 3).is_err());
        assert!(PositionMap::from_order(&indexes(&[0, 1, 2]), 2).is_err());
    }

    #[test]
    fn iter_is_in_section_order() {
        let map = PositionMap::from_order(&indexes(&[1, 2, 0]), 3).unwrap();
        let pairs: Vec<(SectionIndex, u32)> = map.iter().collect();
        assert_eq!(
            pairs,
            vec![
                (SectionIndex::from_u32(0), 2),
                (SectionIndex::from_u32(1), 0),
                (SectionIndex::from_u32(2), 1),
            ]
        );
    }
}
