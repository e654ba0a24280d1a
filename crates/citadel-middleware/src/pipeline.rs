//! Fixed-order security pipeline.
//!
//! This module implements the immutable pipeline every proxied request flows
//! through. The builder exposes one slot per stage, so the execution order
//! is fixed by construction and cannot be changed by callers:
//!
//! 1. **Rate limit** - per-client sliding window
//! 2. **Firewall** - blocked-pattern inspection of URL, body and headers
//! 3. **Zero trust** - dynamic-token gate
//! 4. **Routing** - service resolution and availability
//! 5. **Authentication** - bearer-token verification
//!
//! Dispatch and audit happen after the pipeline and are owned by the
//! gateway. Unset slots are skipped.

use std::sync::Arc;

use tracing::debug;

use crate::context::GatewayContext;
use crate::middleware::{Stage, StageOutcome};
use crate::types::BufferedRequest;

/// A type-erased stage that can be stored in the pipeline.
pub type BoxedStage = Arc<dyn Stage>;

/// The fixed-order pipeline.
///
/// # Example
///
/// ```ignore
/// let pipeline = Pipeline::builder()
///     .rate_limit(RateLimitStage::new(limiter))
///     .firewall(firewall)
///     .zero_trust(gate)
///     .routing(routing)
///     .authentication(verifier)
///     .build();
///
/// match pipeline.run(&mut ctx, &request).await {
///     StageOutcome::Continue => { /* dispatch */ }
///     other => { /* answer the client */ }
/// }
/// ```
pub struct Pipeline {
    stages: Vec<(StageKind, BoxedStage)>,
}

impl Pipeline {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Runs the stages in order, stopping at the first terminal outcome.
    ///
    /// Returns [`StageOutcome::Continue`] when every stage let the request
    /// through.
    pub async fn run(&self, ctx: &mut GatewayContext, request: &BufferedRequest) -> StageOutcome {
        for (kind, stage) in &self.stages {
            let outcome = stage.check(ctx, request).await;
            if !outcome.is_continue() {
                debug!(stage = kind.name(), component = stage.name(), "pipeline halted");
                ctx.set_halted_by(*kind);
                return outcome;
            }
        }

        StageOutcome::Continue
    }

    /// Returns the names of the configured stages in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|(kind, _)| kind.name()).collect()
    }

    /// Returns the number of configured stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

/// Builder for constructing a [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    rate_limit: Option<BoxedStage>,
    firewall: Option<BoxedStage>,
    zero_trust: Option<BoxedStage>,
    routing: Option<BoxedStage>,
    authentication: Option<BoxedStage>,
}

impl PipelineBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the rate-limit stage.
    #[must_use]
    pub fn rate_limit<S: Stage>(mut self, stage: S) -> Self {
        self.rate_limit = Some(Arc::new(stage));
        self
    }

    /// Sets the firewall stage.
    #[must_use]
    pub fn firewall<S: Stage>(mut self, stage: S) -> Self {
        self.firewall = Some(Arc::new(stage));
        self
    }

    /// Sets the zero-trust stage.
    #[must_use]
    pub fn zero_trust<S: Stage>(mut self, stage: S) -> Self {
        self.zero_trust = Some(Arc::new(stage));
        self
    }

    /// Sets the routing stage.
    #[must_use]
    pub fn routing<S: Stage>(mut self, stage: S) -> Self {
        self.routing = Some(Arc::new(stage));
        self
    }

    /// Sets the authentication stage.
    #[must_use]
    pub fn authentication<S: Stage>(mut self, stage: S) -> Self {
        self.authentication = Some(Arc::new(stage));
        self
    }

    /// Builds the pipeline.
    #[must_use]
    pub fn build(self) -> Pipeline {
        let slots = [
            (StageKind::RateLimit, self.rate_limit),
            (StageKind::Firewall, self.firewall),
            (StageKind::ZeroTrust, self.zero_trust),
            (StageKind::Routing, self.routing),
            (StageKind::Authentication, self.authentication),
        ];

        Pipeline {
            stages: slots
                .into_iter()
                .filter_map(|(kind, stage)| stage.map(|s| (kind, s)))
                .collect(),
        }
    }
}

/// Pipeline stage marker.
///
/// This enum represents the fixed order of pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum StageKind {
    /// Stage 1: Rate limiting
    RateLimit = 1,
    /// Stage 2: Request firewall
    Firewall = 2,
    /// Stage 3: Zero-trust gate
    ZeroTrust = 3,
    /// Stage 4: Route resolution
    Routing = 4,
    /// Stage 5: Bearer-token authentication
    Authentication = 5,
}

impl StageKind {
    /// Returns the stage name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::RateLimit => "rate_limit",
            Self::Firewall => "firewall",
            Self::ZeroTrust => "zero_trust",
            Self::Routing => "routing",
            Self::Authentication => "authentication",
        }
    }

    /// Returns all stages in order.
    #[must_use]
    pub const fn all() -> [StageKind; 5] {
        [
            Self::RateLimit,
            Self::Firewall,
            Self::ZeroTrust,
            Self::Routing,
            Self::Authentication,
        ]
    }
}
