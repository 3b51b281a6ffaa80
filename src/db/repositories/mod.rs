pub mod availability;
pub mod client_tasks;
pub mod episode_numbers;
pub mod jobs;
pub mod strm_mappings;
