pub mod archive;
pub mod browse;
pub mod paths;
pub mod range;
pub mod records;
pub mod uploads;

pub use archive::{archive_file_name, build_archive, Archive, ArchiveError};
pub use browse::{BrowseError, Listing};
pub use paths::{PathError, ShareRoot};
pub use range::{open_range, ByteRange, RangeError};
pub use uploads::{UploadError, UploadStore, UploadView};
