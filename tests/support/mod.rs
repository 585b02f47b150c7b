pub mod dataset;
pub mod segprep_env;
