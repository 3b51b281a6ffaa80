pub mod episode;
pub mod errors;
pub mod language;
pub mod magnet;
pub mod naming;

pub use episode::{EpisodeHandle, ResolvedStream};
pub use errors::{DownloadError, MagnetError, ResolverError};
