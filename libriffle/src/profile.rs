//! Loads a startup profile: a text file naming, one per line, the symbols that were observed to
//! run during program startup, in first-use order. Profile problems are never fatal. A file we
//! can't read or a line we can't make sense of costs us ordering quality, not the link.

use hashbrown::HashMap;
use std::path::Path;

/// Symbol names from a startup profile, each mapped to its first-mention rank.
#[derive(Debug, Default)]
pub(crate) struct StartupProfile {
    ranks: HashMap<Vec<u8>, u32>,
}

impl StartupProfile {
    /// Reads and parses the profile at `path`. An unreadable file degrades to no profile with a
    /// warning.
    #[tracing::instrument(skip_all, name = "Load startup profile")]
    pub(crate) fn load(path: &Path) -> Option<Self> {
        match std::fs::read(path) {
            Ok(bytes) => Some(Self::parse(&bytes)),
            Err(error) => {
                tracing::warn!(
                    "Cannot read startup profile `{}`: {error}; ordering without it",
                    path.display()
                );
                None
            }
        }
    }

    pub(crate) fn parse(bytes: &[u8]) -> Self {
        let mut ranks = HashMap::new();
        for (line_number, line) in bytes.split(|&b| b == b'\n').enumerate() {
            let line = line.trim_ascii();
            if line.is_empty() || line.starts_with(b"#") {
                continue;
            }
            if std::str::from_utf8(line).is_err() {
                tracing::warn!(
                    "Startup profile line {} isn't valid UTF-8; skipping it",
                    line_number + 1
                );
                continue;
            }
            if line.iter().any(|b| b.is_ascii_whitespace()) {
                tracing::warn!(
                    "Startup profile line {} has multiple tokens; skipping it",
                    line_number + 1
                );
                continue;
            }
            let next_rank = u32::try_from(ranks.len()).expect("profile ranks overflowed 32 bits");
            ranks.entry(line.to_owned()).or_insert(next_rank);
        }
        Self { ranks }
    }

    /// The first-mention rank of `name`, if the profile names it.
    pub(crate) fn rank(&self, name: &[u8]) -> Option<u32> {
        self.ranks.get(name).copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.ranks.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn parses_names_in_first_mention_order() {
        let profile = StartupProfile::parse(b"_start\nmain\nhelper\nmain\n");
        assert_eq!(profile.len(), 3);
        assert_eq!(profile.rank(b"_start"), Some(0));
        assert_eq!(profile.rank(b"main"), Some(1));
        assert_eq!(profile.rank(b"helper"), Some(2));
        assert_eq!(profile.rank(b"absent"), None);
    }

    #[test]
    fn skips_comments_and_blank_lines() {
        let profile = StartupProfile::parse(b"# a comment\n\n  \nmain\n\n# another\nexit\n");
        assert_eq!(profile.rank(b"main"), Some(0));
        assert_eq!(profile.rank(b"exit"), Some(1));
        assert_eq!(profile.len(), 2);
    }

    #[test]
    fn skips_malformed_lines() {
        let profile = StartupProfile::parse(b"good\nbad line with spaces\n\xff\xfe\nalso_good\n");
        assert_eq!(profile.rank(b"good"), Some(0));
        assert_eq!(profile.rank(b"also_good"), Some(1));
        assert_eq!(profile.len(), 2);
    }

    #[test]
    fn tolerates_windows_line_endings() {
        let profile = StartupProfile::parse(b"main\r\nexit\r\n");
        assert_eq!(profile.rank(b"main"), Some(0));
        assert_eq!(profile.rank(b"exit"), Some(1));
    }

    #[test]
    fn missing_file_is_not_fatal() {
        assert!(StartupProfile::load(Path::new("/nonexistent/startup.profile")).is_none());
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"main\nhelper\n").unwrap();
        let profile = StartupProfile::load(file.path()).unwrap();
        assert_eq!(profile.rank(b"helper"), Some(1));
    }

    #[test]
    fn empty_profile() {
        let profile = StartupProfile::parse(b"");
        assert!(profile.is_empty());
        assert_eq!(profile.rank(b"main"), None);
    }
}
