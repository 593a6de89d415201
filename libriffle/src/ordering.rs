//! The top-level ordering pass. Sections are assigned to groups, each group is ordered on its
//! own, and the groups are concatenated:
//!
//! 1. The startup group: code sections whose symbols a startup profile names, in profile order
//!    (or similarity-ordered with profile order as the tie-break).
//! 2. The compression group: the remaining code and/or data sections selected by the compression
//!    flags, ordered by recursive bisection over content signatures. One combined run, so
//!    content shared across the code/data boundary still ends up together.
//! 3. Everything else, in its original relative order.
//!
//! With no profile and no compression flags the result is the identity order.

use crate::bisection::bisect_order;
use crate::debug_assert_bail;
use crate::error::Result;
use crate::hash::PassThroughHashBuilder;
use crate::options::OrderOptions;
use crate::position_map::PositionMap;
use crate::profile::StartupProfile;
use crate::section::Section;
use crate::section::SectionIndex;
use crate::section::Symbol;
use crate::signature::Signature;
use crate::signature::compute_signatures;
use bytesize::ByteSize;
use rayon::iter::IntoParallelRefIterator;
use rayon::iter::ParallelIterator;

/// Computes a position for every section in `sections`. The returned map is a permutation: each
/// section appears exactly once and positions are dense in `0..sections.len()`.
#[tracing::instrument(skip_all, name = "Order sections")]
pub fn order<S: Section + Sync>(sections: &[S], options: &OrderOptions) -> Result<PositionMap> {
    let section_count = sections.len();

    let profile = options
        .use_startup_profile
        .then(|| options.profile_path.as_deref())
        .flatten()
        .and_then(StartupProfile::load)
        .unwrap_or_default();

    let startup_members = startup_members(sections, &profile);

    if startup_members.is_empty() && !options.compress_code && !options.compress_data {
        let identity: Vec<SectionIndex> =
            (0..section_count).map(SectionIndex::from_usize).collect();
        return PositionMap::from_order(&identity, section_count);
    }

    let mut assigned = vec![false; section_count];
    for member in &startup_members {
        assigned[member.as_usize()] = true;
    }

    let mut compression_members: Vec<SectionIndex> = Vec::new();
    let mut passthrough: Vec<SectionIndex> = Vec::new();
    for (index, section) in sections.iter().enumerate() {
        if assigned[index] {
            continue;
        }
        let compress = if section.is_code() {
            options.compress_code
        } else {
            options.compress_data
        };
        if compress {
            compression_members.push(SectionIndex::from_usize(index));
        } else {
            passthrough.push(SectionIndex::from_usize(index));
        }
    }

    if options.verbose {
        let startup = startup_members.len();
        let compression = compression_members.len();
        let unordered = passthrough.len();
        let profile_names = profile.len();
        tracing::info!(
            "ordering {startup} startup, {compression} compression and {unordered} unordered \
             sections ({profile_names} profile names)"
        );
    }

    let startup_order = if options.compression_sort_startup {
        order_group(sections, startup_members, options, "startup")
    } else {
        startup_members
    };
    let compression_order = order_group(sections, compression_members, options, "compression");

    let mut placement = Vec::with_capacity(section_count);
    placement.extend(startup_order);
    placement.extend(compression_order);
    placement.extend(passthrough);
    debug_assert_bail!(
        placement.len() == section_count,
        "grouping produced {} placements for {section_count} sections",
        placement.len()
    );
    PositionMap::from_order(&placement, section_count)
}

/// Code sections with a profile-named symbol, ordered by first mention in the profile. Ties
/// (several sections at the same rank can't happen, but several symbols in one section can)
/// resolve to the section's lowest-ranked symbol, then input order.
fn startup_members<S: Section + Sync>(
    sections: &[S],
    profile: &StartupProfile,
) -> Vec<SectionIndex> {
    if profile.is_empty() {
        return Vec::new();
    }
    let ranks: Vec<Option<u32>> = sections
        .par_iter()
        .map(|section| {
            if !section.is_code() {
                return None;
            }
            let mut best: Option<u32> = None;
            for symbol in section.symbols() {
                if !symbol.is_defined() {
                    continue;
                }
                if let Some(rank) = profile.rank(symbol.name()) {
                    best = Some(best.map_or(rank, |b| b.min(rank)));
                }
            }
            best
        })
        .collect();

    let mut members: Vec<(u32, usize)> = ranks
        .iter()
        .enumerate()
        .filter_map(|(index, rank)| rank.map(|rank| (rank, index)))
        .collect();
    members.sort_unstable();
    members
        .into_iter()
        .map(|(_, index)| SectionIndex::from_usize(index))
        .collect()
}

/// Bisection-orders one group. The incoming `members` order is the stability order: it's what
/// sections fall back to wherever their signatures express no preference.
fn order_group<S: Section + Sync>(
    sections: &[S],
    members: Vec<SectionIndex>,
    options: &OrderOptions,
    group: &str,
) -> Vec<SectionIndex> {
    if members.len() <= 1 {
        return members;
    }
    let signatures = compute_signatures(sections, &members, options.structural_features);
    if options.verbose {
        log_group_stats(sections, &members, &signatures, group);
    }
    bisect_order(&signatures, &options.bisect)
        .into_iter()
        .map(|slot| members[slot as usize])
        .collect()
}

fn log_group_stats<S: Section>(
    sections: &[S],
    members: &[SectionIndex],
    signatures: &[Signature],
    group: &str,
) {
    let hashed: u64 = members
        .iter()
        .map(|member| sections[member.as_usize()].content().len() as u64)
        .sum();
    let mut distinct: std::collections::HashSet<u64, PassThroughHashBuilder> =
        std::collections::HashSet::default();
    for signature in signatures {
        distinct.extend(&signature.features);
    }
    let section_count = members.len();
    let distinct_features = distinct.len();
    let empty_signatures = signatures.iter().filter(|s| s.features.is_empty()).count();
    let hashed = ByteSize(hashed);
    tracing::info!(
        "{group} group: {section_count} sections, {distinct_features} distinct features, \
         {empty_signatures} empty signatures, {hashed} hashed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::section::test_fixtures::FakeSection;
    use crate::section::test_fixtures::FakeSymbol;
    use std::io::Write as _;

    fn positions(map: &PositionMap) -> Vec<u32> {
        map.iter().map(|(_, position)| position).collect()
    }

    fn write_profile(lines: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(lines.as_bytes()).unwrap();
        file
    }

    #[test]
    fn no_modes_is_identity() {
        let sections = vec![
            FakeSection::code("a", &[1, 2, 3, 4]),
            FakeSection::data("b", &[5, 6, 7, 8]),
            FakeSection::code("c", &[9, 10, 11, 12]),
        ];
        let map = order(&sections, &OrderOptions::default()).unwrap();
        assert_eq!(positions(&map), vec![0, 1, 2]);
    }

    #[test]
    fn empty_input() {
        let sections: Vec<FakeSection> = Vec::new();
        let map = order(&sections, &OrderOptions::default()).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn similar_code_clusters() {
        // Sections 0 and 2 share content, as do 1 and 3. Expect the pairs adjacent.
        let sections = vec![
            FakeSection::code("a1", b"first flavour of code bytes"),
            FakeSection::code("b1", b"the other sort of contents!"),
            FakeSection::code("a2", b"first flavour of code bytes"),
            FakeSection::code("b2", b"the other sort of contents!"),
        ];
        let options = OrderOptions {
            compress_code: true,
            ..OrderOptions::default()
        };
        let map = order(&sections, &options).unwrap();
        let p = positions(&map);
        assert_eq!(p[0].abs_diff(p[2]), 1, "identical sections 0 and 2 not adjacent: {p:?}");
        assert_eq!(p[1].abs_diff(p[3]), 1, "identical sections 1 and 3 not adjacent: {p:?}");
    }

    #[test]
    fn compress_data_leaves_code_order_alone() {
        let sections = vec![
            FakeSection::data("d1", b"aaaa aaaa aaaa"),
            FakeSection::code("c1", b"some code here"),
            FakeSection::data("d2", b"bbbb bbbb bbbb"),
            FakeSection::code("c2", b"other code too"),
            FakeSection::data("d3", b"aaaa aaaa aaaa"),
        ];
        let options = OrderOptions {
            compress_data: true,
            ..OrderOptions::default()
        };
        let map = order(&sections, &options).unwrap();
        let p = positions(&map);
        // Data twins d1/d3 cluster.
        assert_eq!(p[0].abs_diff(p[4]), 1);
        // Code sections keep their relative order, after the compression group.
        assert!(p[1] < p[3]);
        assert!(p[1] >= 3, "code placed before the data group: {p:?}");
    }

    #[test]
    fn profile_orders_startup_first() {
        let profile = write_profile("main\n_start\n");
        let sections = vec![
            FakeSection::code("unrelated", b"filler filler filler"),
            FakeSection::code("_start", b"startup code number 1"),
            FakeSection::data("main", b"a data section named like a function"),
            FakeSection::code("main", b"startup code number 2"),
        ];
        let options = OrderOptions {
            profile_path: Some(profile.path().to_owned()),
            ..OrderOptions::default()
        };
        let map = order(&sections, &options).unwrap();
        let p = positions(&map);
        // Profile names main before _start; the data section named main doesn't count.
        assert_eq!(p[3], 0);
        assert_eq!(p[1], 1);
        // The rest keep input order after the startup group.
        assert_eq!(p[0], 2);
        assert_eq!(p[2], 3);
    }

    #[test]
    fn section_rank_is_its_best_symbol() {
        let profile = write_profile("early\nlate\n");
        let sections = vec![
            FakeSection::code("f", b"one function").with_symbols(vec![FakeSymbol {
                name: "late",
                value: 0,
                size: 4,
                defined: true,
            }]),
            FakeSection::code("g", b"two functions fused").with_symbols(vec![
                FakeSymbol {
                    name: "other",
                    value: 0,
                    size: 4,
                    defined: true,
                },
                FakeSymbol {
                    name: "early",
                    value: 8,
                    size: 4,
                    defined: true,
                },
            ]),
        ];
        let options = OrderOptions {
            profile_path: Some(profile.path().to_owned()),
            ..OrderOptions::default()
        };
        let map = order(&sections, &options).unwrap();
        let p = positions(&map);
        assert_eq!(p[1], 0, "section with the earlier-ranked symbol goes first");
        assert_eq!(p[0], 1);
    }

    #[test]
    fn undefined_symbols_do_not_select_startup() {
        let profile = write_profile("external\n");
        let sections = vec![
            FakeSection::code("f", b"calls external").with_symbols(vec![FakeSymbol {
                name: "external",
                value: 0,
                size: 0,
                defined: false,
            }]),
            FakeSection::code("g", b"does nothing much"),
        ];
        let options = OrderOptions {
            profile_path: Some(profile.path().to_owned()),
            ..OrderOptions::default()
        };
        let map = order(&sections, &options).unwrap();
        assert_eq!(positions(&map), vec![0, 1]);
    }

    #[test]
    fn disabled_profile_is_ignored() {
        let profile = write_profile("f\n");
        let sections = vec![
            FakeSection::code("g", b"gggg gggg"),
            FakeSection::code("f", b"ffff ffff"),
        ];
        let options = OrderOptions {
            profile_path: Some(profile.path().to_owned()),
            use_startup_profile: false,
            ..OrderOptions::default()
        };
        let map = order(&sections, &options).unwrap();
        assert_eq!(positions(&map), vec![0, 1]);
    }

    #[test]
    fn startup_members_skip_compression() {
        let profile = write_profile("hot\n");
        let sections = vec![
            FakeSection::code("hot", b"identical bytes right here"),
            FakeSection::code("cold", b"identical bytes right here"),
        ];
        let options = OrderOptions {
            compress_code: true,
            profile_path: Some(profile.path().to_owned()),
            ..OrderOptions::default()
        };
        let map = order(&sections, &options).unwrap();
        // hot is startup, cold is compression; both appear exactly once.
        assert_eq!(positions(&map), vec![0, 1]);
    }

    #[test]
    fn zero_fill_and_empty_sections_get_positions() {
        let sections = vec![
            FakeSection::zero_fill("bss", 4096),
            FakeSection::code("empty", &[]),
            FakeSection::code("tiny", &[1]),
            FakeSection::data("blob", b"zz zz zz zz"),
        ];
        let options = OrderOptions {
            compress_code: true,
            compress_data: true,
            ..OrderOptions::default()
        };
        let map = order(&sections, &options).unwrap();
        let mut p = positions(&map);
        p.sort_unstable();
        assert_eq!(p, vec![0, 1, 2, 3]);
    }

    #[test]
    fn deterministic_end_to_end() {
        let sections: Vec<FakeSection> = (0..40)
            .map(|i| {
                let content: Vec<u8> = (0..20u8).map(|b| b.wrapping_mul(i as u8 / 4 + 1)).collect();
                if i % 3 == 0 {
                    FakeSection::data("d", &content)
                } else {
                    FakeSection::code("c", &content)
                }
            })
            .collect();
        let options = OrderOptions {
            compress_code: true,
            compress_data: true,
            ..OrderOptions::default()
        };
        let first = order(&sections, &options).unwrap();
        let second = order(&sections, &options).unwrap();
        assert_eq!(first, second);
        let mut p = positions(&first);
        p.sort_unstable();
        assert_eq!(p, (0..40).collect::<Vec<u32>>());
    }

    #[test]
    fn compression_sort_startup_keeps_startup_first() {
        let profile = write_profile("s1\ns2\ns3\ns4\n");
        let sections = vec![
            FakeSection::code("s1", b"startup kind one cluster"),
            FakeSection::code("s3", b"startup kind one cluster"),
            FakeSection::code("s2", b"different startup cluster"),
            FakeSection::code("s4", b"different startup cluster"),
            FakeSection::code("cold", b"non startup code section"),
        ];
        let options = OrderOptions {
            profile_path: Some(profile.path().to_owned()),
            compression_sort_startup: true,
            ..OrderOptions::default()
        };
        let map = order(&sections, &options).unwrap();
        let p = positions(&map);
        // All four startup sections come before the cold one.
        assert!(p[0] < 4 && p[1] < 4 && p[2] < 4 && p[3] < 4);
        assert_eq!(p[4], 4);
        // Content twins cluster within the startup group.
        assert_eq!(p[0].abs_diff(p[1]), 1);
        assert_eq!(p[2].abs_diff(p[3]), 1);
    }

    #[test]
    fn missing_profile_degrades_to_no_startup_group() {
        let sections = vec![
            FakeSection::code("a", b"aaaa"),
            FakeSection::code("b", b"bbbb"),
        ];
        let options = OrderOptions {
            profile_path: Some("/nonexistent/profile.txt".into()),
            ..OrderOptions::default()
        };
        let map = order(&sections, &options).unwrap();
        assert_eq!(positions(&map), vec![0, 1]);
    }
}
