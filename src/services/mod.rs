//! The folder layer: path policy, the store gateway and one service per
//! concern, composed by [`drive_service::Drive`].

pub mod archive_service;
pub mod drive_service;
pub mod file_service;
pub mod folder_service;
pub mod gateway;
pub mod path_policy;
pub mod quota_service;
pub mod search_service;
