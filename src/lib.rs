// Bindery - request parameter binding and content negotiation for HTTP handlers
//
// This library turns an HTTP request into typed handler arguments through an
// ordered chain of binders, and turns handler results into responses through
// content negotiation and view resolution.

// Re-export core functionality
pub use bindery_core::*;

// Re-export optional crates
#[cfg(feature = "config")]
pub use bindery_config;

#[cfg(feature = "config")]
pub use bindery_config::PipelineConfig;

// Prelude for common imports
pub mod prelude {
    pub use bindery_core::prelude::*;

    pub use bindery_core::{
        BindError,
        ConversionRegistry,
        Dispatcher,
        DispatcherBuilder,
        Error,
        Handler,
        LogConfig,
        LogLevel,
        Outcome,
        RequestContext,
    };

    #[cfg(feature = "config")]
    pub use bindery_config::{PipelineConfig, Validate};
}
