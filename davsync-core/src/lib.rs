mod client;
mod propfind;

pub use client::{
    ConnectionCheck, DirEntry, EntryType, ErrorClass, WebdavClient, WebdavError,
};
pub use propfind::{MultistatusEntry, parse_multistatus};
