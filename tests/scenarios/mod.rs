mod engine_sweep;
mod pipeline_stages;
