use std::num::NonZeroUsize;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub mod elf;
pub mod error;

pub(crate) mod bisection;
pub(crate) mod hash;
pub(crate) mod options;
pub(crate) mod ordering;
pub(crate) mod position_map;
pub(crate) mod profile;
pub(crate) mod section;
pub(crate) mod signature;
pub(crate) mod timing;

pub use bisection::BisectParams;
pub use options::OrderOptions;
pub use ordering::order;
pub use position_map::PositionMap;
pub use section::Relocation;
pub use section::RelocationTarget;
pub use section::Section;
pub use section::SectionIndex;
pub use section::Symbol;

/// Initialises the global tracing subscriber: per-phase wall-time reporting when `time_phases`
/// is set, otherwise env-filtered log output. Call at most once.
pub fn setup_tracing(time_phases: bool) -> error::Result {
    if time_phases {
        timing::init_timing()?;
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(EnvFilter::from_default_env())
            .init();
    }
    Ok(())
}

/// Sizes the global thread pool. Call once, before ordering anything.
pub fn setup_thread_pool(num_threads: NonZeroUsize) -> error::Result {
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads.get())
        .build_global()?;
    Ok(())
}

pub fn available_parallelism() -> NonZeroUsize {
    std::thread::available_parallelism().unwrap_or(NonZeroUsize::new(1).unwrap())
}
