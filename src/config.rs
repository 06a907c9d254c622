//! Channel configuration (spec §6 "Construct a channel with a transport
//! and an options bundle").
//!
//! Kept deliberately small and in-process, in the spirit of the teacher's
//! `BenchmarkConfig` (a plain struct with `Default` and validating
//! constructors) rather than an attribute-macro config crate: this is a
//! library surface, not a CLI, so there is no argument-parsing concern to
//! pull a `clap`-shaped dependency in for.

use crate::api::ExposedApi;
use crate::interceptor::Interceptor;
use crate::serialization::Dialect;
use crate::validation::Validators;
use std::sync::Arc;
use std::time::Duration;

pub struct ChannelOptions {
    pub expose: Option<Arc<ExposedApi>>,
    pub serialization: Dialect,
    pub validators: Arc<Validators>,
    pub interceptors: Vec<Arc<dyn Interceptor>>,
    /// `0` disables the per-request timer (spec §4.5 "Timeouts").
    pub timeout: Duration,
    pub enable_transfer: bool,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            expose: None,
            serialization: Dialect::Enhanced,
            validators: Arc::new(Validators::new()),
            interceptors: Vec::new(),
            timeout: Duration::ZERO,
            enable_transfer: false,
        }
    }
}

impl ChannelOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_expose(mut self, api: ExposedApi) -> Self {
        self.expose = Some(Arc::new(api));
        self
    }

    pub fn with_serialization(mut self, dialect: Dialect) -> Self {
        self.serialization = dialect;
        self
    }

    pub fn with_validators(mut self, validators: Validators) -> Self {
        self.validators = Arc::new(validators);
        self
    }

    pub fn with_interceptors(mut self, interceptors: Vec<Arc<dyn Interceptor>>) -> Self {
        self.interceptors = interceptors;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_transfer_enabled(mut self, enabled: bool) -> Self {
        self.enable_transfer = enabled;
        self
    }
}
