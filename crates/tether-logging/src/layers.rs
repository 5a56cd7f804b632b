//! Custom tracing layers for Tether

use tracing::{Subscriber, span};
use tracing_subscriber::{
    layer::{Context, Layer},
    registry::{LookupSpan, SpanRef},
};

use crate::context::{UserContextData, UserContextGuard};

/// Layer that attaches the active user context to new spans
///
/// Spans created while a [`UserContextGuard`] is alive carry a
/// [`UserContextExtension`]; events find it through their parent span.
#[derive(Debug, Default, Clone, Copy)]
pub struct UserContextLayer;

impl UserContextLayer {
    pub fn new() -> Self {
        Self
    }
}

/// Extension data stored on spans
#[derive(Debug, Clone)]
pub struct UserContextExtension {
    pub data: UserContextData,
}

impl<S> Layer<S> for UserContextLayer
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn on_new_span(&self, _attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        if let Some(span) = ctx.span(id) {
            if let Some(data) = UserContextGuard::current() {
                span.extensions_mut().insert(UserContextExtension { data });
            }
        }
    }
}

/// User context attached to `span` or the closest ancestor that has one
pub fn user_context_of<'a, R>(span: &SpanRef<'a, R>) -> Option<UserContextData>
where
    R: LookupSpan<'a>,
{
    span.scope().find_map(|s| {
        s.extensions()
            .get::<UserContextExtension>()
            .map(|ext| ext.data.clone())
    })
}
