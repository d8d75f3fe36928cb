//! Baseline enrichment: stable id, timestamp, trace-id mirror.

use boxflow_api::model::{ParsedServer, PipelineContext, short_hash};

pub struct BasicEnricher;

impl BasicEnricher {
    pub fn enrich(&self, server: &mut ParsedServer, ctx: &PipelineContext) {
        let id = short_hash(&server.endpoint());
        server.set_meta("server_id", id);
        server.set_meta(
            "enriched_at",
            chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        );
        server.set_meta("trace_id", ctx.trace_id.clone());
    }
}
