//! Metric name and label definitions.
//!
//! Every metric emitted by a tessera crate is named here so the full set can
//! be documented in one place.

/// Event bus metrics
pub mod events {
    /// Total number of events published
    pub const PUBLISHED_TOTAL: &str = "tessera_events_published_total";
    /// Total number of successful handler invocations
    pub const DELIVERED_TOTAL: &str = "tessera_events_delivered_total";
    /// Total number of handler failures (errors and panics)
    pub const HANDLER_FAILURES_TOTAL: &str = "tessera_events_handler_failures_total";
    /// Handler execution time in seconds
    pub const HANDLER_DURATION_SECONDS: &str = "tessera_events_handler_duration_seconds";
    /// Number of live subscriptions
    pub const SUBSCRIPTIONS: &str = "tessera_events_subscriptions";
}

/// Plugin runtime metrics
pub mod plugins {
    /// Total number of plugin load attempts
    pub const LOADS_TOTAL: &str = "tessera_plugins_loads_total";
    /// Total number of failed plugin loads
    pub const LOAD_FAILURES_TOTAL: &str = "tessera_plugins_load_failures_total";
    /// Total number of hot reloads
    pub const RELOADS_TOTAL: &str = "tessera_plugins_reloads_total";
    /// Number of active plugins
    pub const ACTIVE: &str = "tessera_plugins_active";
}

/// Protocol gateway metrics
pub mod gateway {
    /// Total number of provider sessions established
    pub const SESSIONS_OPENED_TOTAL: &str = "tessera_gateway_sessions_opened_total";
    /// Number of open provider sessions
    pub const SESSIONS_OPEN: &str = "tessera_gateway_sessions_open";
    /// Total number of capability invocations
    pub const INVOCATIONS_TOTAL: &str = "tessera_gateway_invocations_total";
    /// Capability invocation duration in seconds
    pub const INVOCATION_DURATION_SECONDS: &str = "tessera_gateway_invocation_duration_seconds";
    /// Total number of invocations that returned an error result
    pub const INVOCATION_ERRORS_TOTAL: &str = "tessera_gateway_invocation_errors_total";
    /// Total number of invocations rejected by schema validation
    pub const INVALID_ARGUMENTS_TOTAL: &str = "tessera_gateway_invalid_arguments_total";
    /// Total number of invocations that timed out
    pub const TIMEOUTS_TOTAL: &str = "tessera_gateway_timeouts_total";
}

/// Command dispatcher metrics
pub mod commands {
    /// Total number of executed commands
    pub const EXECUTED_TOTAL: &str = "tessera_commands_executed_total";
    /// Total number of failed commands
    pub const FAILED_TOTAL: &str = "tessera_commands_failed_total";
    /// Command execution duration in seconds
    pub const DURATION_SECONDS: &str = "tessera_commands_duration_seconds";
}

/// Common label keys
pub mod labels {
    pub const EVENT_TYPE: &str = "type";
    pub const PLUGIN: &str = "plugin";
    pub const PROVIDER: &str = "provider";
    pub const TOOL: &str = "tool";
    pub const ROUTE: &str = "route";
}
