//! Reports how long each phase of the ordering pass takes when the driver is asked to time
//! things. Phases are the spans that instrumented functions open, so nesting comes for free.

use crate::error::AlreadyInitialised;
use std::time::Instant;

#[derive(Default)]
struct TimingLayer {}

struct Timing {
    started: Instant,
}

impl<S> tracing_subscriber::Layer<S> for TimingLayer
where
    S: tracing::Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span>,
{
    fn max_level_hint(&self) -> Option<tracing::level_filters::LevelFilter> {
        Some(tracing::level_filters::LevelFilter::INFO)
    }

    fn on_new_span(
        &self,
        attributes: &tracing::span::Attributes,
        id: &tracing::span::Id,
        ctx: tracing_subscriber::layer::Context<S>,
    ) {
        if *attributes.metadata().level() > tracing::Level::INFO {
            return;
        }
        let span = ctx.span(id).expect("valid span ID");
        span.extensions_mut().insert(Timing {
            started: Instant::now(),
        });
    }

    fn on_enter(&self, id: &tracing::span::Id, ctx: tracing_subscriber::layer::Context<S>) {
        let span = ctx.span(id).expect("valid span ID");
        if let Some(timing) = span.extensions_mut().get_mut::<Timing>() {
            timing.started = Instant::now();
        }
    }

    fn on_close(&self, id: tracing::span::Id, ctx: tracing_subscriber::layer::Context<S>) {
        let span = ctx.span(&id).expect("valid span ID");
        let metadata = span.metadata();
        if *metadata.level() > tracing::Level::INFO {
            return;
        }
        if let Some(timing) = span.extensions().get::<Timing>() {
            let depth = span.scope().count() - 1;
            let ms = timing.started.elapsed().as_secs_f64() * 1000.0;
            let name = metadata.name();
            println!("{:indent$}{ms:>8.2}ms {name}", "", indent = depth * 2);
        }
    }
}

/// Installs the timing layer as the global subscriber. Call at most once, before any phase runs.
pub fn init_timing() -> Result<(), AlreadyInitialised> {
    use tracing_subscriber::prelude::*;

    let subscriber = tracing_subscriber::Registry::default().with(TimingLayer::default());
    tracing::subscriber::set_global_default(subscriber).map_err(|_| AlreadyInitialised)
}
