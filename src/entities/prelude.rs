pub use super::client_task::Entity as ClientTask;
pub use super::episode_availability::Entity as EpisodeAvailability;
pub use super::episode_number_mapping::Entity as EpisodeNumberMapping;
pub use super::job::Entity as Job;
pub use super::strm_url_mapping::Entity as StrmUrlMapping;
