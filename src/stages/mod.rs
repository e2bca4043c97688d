//! The stage library (C10): one `Stage`/`BatchWorker` implementation per
//! file, composed into facades in [`crate::facades`].

pub mod aem_complete;
pub mod aem_initiate;
pub mod close_files;
pub mod create_parts;
pub mod fail_unsupported;
pub mod filter_failed;
pub mod get_metadata;
pub mod join_parts;
pub mod transfer;

pub use aem_complete::AEMCompleteUpload;
pub use aem_initiate::AEMInitiateUpload;
pub use close_files::CloseFiles;
pub use create_parts::CreateTransferParts;
pub use fail_unsupported::FailUnsupportedAssets;
pub use filter_failed::FilterFailedAssets;
pub use get_metadata::GetAssetMetadata;
pub use join_parts::JoinTransferParts;
pub use transfer::TransferWorker;
