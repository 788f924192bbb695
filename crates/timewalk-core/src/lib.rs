//! Timewalk — Core library.
//! Collaborators of the voice guide that carry no turn-taking logic: the
//! World Labs generation job client and the background music catalog.

pub mod error;
pub mod music;
pub mod world;

pub use error::{CoreError, CoreResult};
pub use music::{select_track, MusicTrack, MUSIC_LIBRARY};
pub use world::{
    extract_renderable_assets, extract_splat_urls, extract_world_id, preferred_splat_url,
    OperationStatus, WorldAssets, WorldJobs, WorldLabsClient,
};
