use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to open '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read a CSV row from '{path}': {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("unparseable timestamp '{raw}' in '{path}'")]
    Timestamp { path: PathBuf, raw: String },

    #[error(transparent)]
    Tape(#[from] bt_common::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
