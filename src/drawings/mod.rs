pub mod model;
pub mod paths;
pub mod version;

pub use model::{
    latest_version,
    ActivityEntry,
    Drawing,
    DrawingVersion,
    Folder,
    FolderType,
    NewDrawing,
    NewFolder,
    NewVersion,
    StorageRef,
};
pub use paths::{
    module_package_folder_name,
    next_available_filename,
    next_version_label,
    parse_module_id,
    versioned_file_name,
    FolderPath,
};
pub use version::{UploadPlan, VersionReconciler};
