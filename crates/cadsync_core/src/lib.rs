#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

mod codec;
mod error;
mod observer;
mod shared_doc;
mod synchronizer;
mod types;

pub use codec::{FileCodec, JcadCodec};
pub use error::{Result, SyncError};
pub use observer::{
    Channel, ChangeHub, ContainerDelta, DeltaKind, DocChange, EntryDelta, EntryOp, ObserveConfig,
    ObserveDepth, PathStep, SeqOp, TextOp,
};
pub use shared_doc::CadDoc;
pub use synchronizer::FileSynchronizer;
pub use types::{CadObject, DocContent};
