//! User-facing texts.

pub const PROCESSING: &str = "Processing your request...";
pub const SELECT_FORMAT: &str = "Select a format:";
pub const DOWNLOADING: &str = "Downloading";
pub const DOWNLOADING_VIDEO: &str = "Downloading video";
pub const DOWNLOADING_AUDIO: &str = "Downloading audio";
pub const CONVERTING: &str = "Converting";
pub const UPLOADING: &str = "Uploading...";
pub const FAILED: &str = "Error: Please try again";
pub const BUSY: &str = "Still working on your previous link. Please wait until it is delivered.";
pub const INVALID_URL: &str = "Error: this does not look like a video link";
pub const NO_FORMATS: &str = "Error: no downloadable formats were found for this link";
pub const SELECTION_EXPIRED: &str = "This format list has expired. Send the link again.";
pub const SELECTION_INVALID: &str = "Error: this format is not available";
