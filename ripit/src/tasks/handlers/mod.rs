//! Handlers for every task type in the catalogue.

mod analyze;
mod download;
mod media_files;
mod settings;

pub use analyze::AnalyzeMediaInfoHandler;
pub use download::DownloadMediaFileHandler;
pub use media_files::{
    AddMediaFileHandler, DeleteMediaFilesHandler, GetMediaFilesHandler, UpdateMediaFileHandler,
};
pub use settings::{AppSettingsChangeHandler, AppSettingsGetHandler};
