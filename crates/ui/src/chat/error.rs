use std::path::PathBuf;

use danzin_storage::StoreError;
use snafu::Snafu;

pub type ChatResult<T> = Result<T, ChatError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ChatError {
    #[snafu(display("failed to read image at {path:?} on `{stage}`: {source}"))]
    ReadImage {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("image at {path:?} has unsupported type '{media_type}'"))]
    UnsupportedImageType {
        stage: &'static str,
        path: PathBuf,
        media_type: String,
    },
    #[snafu(display("image at {path:?} is {size} bytes, above the {max_bytes} byte limit"))]
    ImageTooLarge {
        stage: &'static str,
        path: PathBuf,
        size: u64,
        max_bytes: u64,
    },
    #[snafu(display("image at {path:?} is empty"))]
    EmptyImage { stage: &'static str, path: PathBuf },
    #[snafu(display("conversation store rejected `{stage}`: {source}"))]
    Store {
        stage: &'static str,
        source: StoreError,
    },
}
