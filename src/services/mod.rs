pub mod activity_store;
pub mod browser;
pub mod capture_pipeline;
pub mod classifier;
pub mod dashboard_engine;
pub mod native_host;
pub mod screenshot;
pub mod settings_store;
pub mod signals;
pub mod trigger_engine;

#[cfg(test)]
mod test_support;
