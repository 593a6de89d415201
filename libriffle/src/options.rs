use crate::bisection::BisectParams;
use std::path::PathBuf;

/// Configuration for one ordering request. Owned by the caller; the engine holds no global
/// state.
#[derive(Debug, Clone)]
pub struct OrderOptions {
    /// Order executable sections for compression locality.
    pub compress_code: bool,

    /// Order data sections for compression locality.
    pub compress_data: bool,

    /// Path to a startup profile. Unreadable files degrade to no profile.
    pub profile_path: Option<PathBuf>,

    /// Place profile-named code sections first, in profile order. Only meaningful with
    /// `profile_path`.
    pub use_startup_profile: bool,

    /// Order the startup group by content similarity instead of strict profile order. Profile
    /// order still breaks ties.
    pub compression_sort_startup: bool,

    /// Mix relocation targets into section signatures, distinguishing sections whose bytes are
    /// identical but which reference different things.
    pub structural_features: bool,

    /// Log group sizes and feature statistics.
    pub verbose: bool,

    pub bisect: BisectParams,
}

impl Default for OrderOptions {
    fn default() -> Self {
        Self {
            compress_code: false,
            compress_data: false,
            profile_path: None,
            use_startup_profile: true,
            compression_sort_startup: false,
            structural_features: true,
            verbose: false,
            bisect: BisectParams::default(),
        }
    }
}
