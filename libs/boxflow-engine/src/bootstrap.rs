//! Registry bootstrap: declaratively register every built-in plugin and
//! assemble the default chains.

use std::sync::Arc;

use serde_json::Value;

use boxflow_api::registry::Registry;

use crate::chain::{ChainConfig, MiddlewareChain, PostProcessorChain};
use crate::coordinator::PipelineCoordinator;
use crate::error::EngineError;

/// Build a registry with all built-in plugins, one namespace per kind.
pub fn default_registry() -> Arc<Registry> {
    let registry = Registry::new();

    registry.register_fetcher(boxflow_fetcher_http::NAME, boxflow_fetcher_http::create);
    registry.register_fetcher(boxflow_fetcher_file::NAME, boxflow_fetcher_file::create);

    registry.register_parser(boxflow_parser_uri_list::NAME, boxflow_parser_uri_list::create);
    registry.register_parser(
        boxflow_parser_uri_list::BASE64_NAME,
        boxflow_parser_uri_list::create_base64,
    );
    registry.register_parser(boxflow_parser_json::NAME, boxflow_parser_json::create);
    registry.register_parser(boxflow_parser_clash::NAME, boxflow_parser_clash::create);

    registry.register_raw_validator(
        boxflow_validator_raw::NOOP_NAME,
        boxflow_validator_raw::create_noop,
    );
    registry.register_raw_validator(
        boxflow_validator_raw::BASIC_NAME,
        boxflow_validator_raw::create_basic,
    );
    registry.register_parsed_validator(
        boxflow_validator_protocol::NAME,
        boxflow_validator_protocol::create,
    );

    registry.register_middleware(
        boxflow_middleware_tag_normalizer::NAME,
        boxflow_middleware_tag_normalizer::create,
    );
    registry.register_middleware(boxflow_middleware_enrich::NAME, boxflow_middleware_enrich::create);
    registry.register_middleware(
        boxflow_middleware_outbound_filter::NAME,
        boxflow_middleware_outbound_filter::create,
    );
    registry.register_middleware(
        boxflow_middleware_route_config::NAME,
        boxflow_middleware_route_config::create,
    );
    registry.register_middleware(
        boxflow_middleware_logging::NAME,
        boxflow_middleware_logging::create,
    );

    registry.register_postprocessor(
        boxflow_postprocessor_geo_filter::NAME,
        boxflow_postprocessor_geo_filter::create,
    );
    registry.register_postprocessor(
        boxflow_postprocessor_tag_filter::NAME,
        boxflow_postprocessor_tag_filter::create,
    );
    registry.register_postprocessor(
        boxflow_postprocessor_latency_sort::NAME,
        boxflow_postprocessor_latency_sort::create,
    );

    registry.register_routing(boxflow_routing_default::NAME, boxflow_routing_default::create);
    registry.register_exporter(boxflow_exporter_singbox::NAME, boxflow_exporter_singbox::create);

    tracing::debug!(
        parsers = registry.parser_names().len(),
        middleware = registry.middleware_names().len(),
        postprocessors = registry.postprocessor_names().len(),
        exporters = registry.exporter_names().len(),
        "registry bootstrapped"
    );
    Arc::new(registry)
}

/// Default middleware chain: normalize tags, enrich, observe.
pub fn default_middleware(registry: &Registry) -> Result<MiddlewareChain, EngineError> {
    let mut chain = MiddlewareChain::default();
    for name in ["tag_normalizer", "enrich", "logging"] {
        let ctor = registry
            .middleware(name)
            .ok_or_else(|| EngineError::unknown_plugin("middleware", name))?;
        chain.push(ctor(&Value::Null)?);
    }
    Ok(chain)
}

/// Build a postprocessor chain from `(name, config)` pairs.
pub fn postprocessor_chain(
    registry: &Registry,
    steps: &[(&str, Value)],
    config: ChainConfig,
) -> Result<PostProcessorChain, EngineError> {
    let mut chain = PostProcessorChain::new(Vec::new(), config);
    for (name, step_config) in steps {
        let ctor = registry
            .postprocessor(name)
            .ok_or_else(|| EngineError::unknown_plugin("postprocessor", name.to_string()))?;
        chain.push(Arc::from(ctor(step_config)?));
    }
    Ok(chain)
}

/// A coordinator wired with the default chains.
pub fn default_coordinator(registry: Arc<Registry>) -> Result<PipelineCoordinator, EngineError> {
    let middleware = default_middleware(&registry)?;
    Ok(PipelineCoordinator::new(registry).with_middleware(middleware))
}
